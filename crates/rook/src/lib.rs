//
// lib.rs
//
// Exposes the analysis modules for integration tests and for embedding
// the analyzer in other tools. The debugging CLI entry point lives in
// main.rs.
//

pub mod arguments;
pub mod cfg;
pub mod classes;
pub mod document;
pub mod lexer_patch;
pub mod oracle;
pub mod package_descriptor;
pub mod parser_pool;
pub mod resolver;
pub mod stub_index;
