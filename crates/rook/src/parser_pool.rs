//
// parser_pool.rs
//
// Thread-local parser pool for efficient parser reuse
//

use std::cell::RefCell;
use tree_sitter::{Parser, Tree};

thread_local! {
    static PARSER: RefCell<Parser> = RefCell::new({
        let mut parser = Parser::new();
        parser.set_language(&tree_sitter_r::LANGUAGE.into())
            .expect("Failed to set R language");
        parser
    });
}

/// Execute a function with a thread-local parser instance.
/// The parser is reused across calls on the same thread.
pub fn with_parser<F, R>(f: F) -> R
where
    F: FnOnce(&mut Parser) -> R,
{
    PARSER.with(|parser| f(&mut parser.borrow_mut()))
}

/// Parse R source text into a fresh syntax tree.
///
/// Returns `None` only if the parser was cancelled or misconfigured;
/// syntactically broken input still yields a tree with ERROR nodes.
pub fn parse_r(text: &str) -> Option<Tree> {
    with_parser(|parser| parser.parse(text, None))
}

/// Collect non-extra (non-comment) children of a tree-sitter node.
///
/// Filters out "extra" nodes (comments) so that positional indexing into
/// the child list is reliable.
pub(crate) fn non_extra_children<'a>(
    node: tree_sitter::Node<'a>,
    cursor: &mut tree_sitter::TreeCursor<'a>,
) -> Vec<tree_sitter::Node<'a>> {
    node.children(cursor).filter(|c| !c.is_extra()).collect()
}

/// Slice the source text covered by a node.
pub(crate) fn node_text<'a>(node: tree_sitter::Node<'_>, text: &'a str) -> &'a str {
    &text[node.start_byte()..node.end_byte()]
}
