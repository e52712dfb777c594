//
// main.rs
//
// Debugging CLI for the analysis crate: dump control-flow graphs,
// resolve symbols, and parse DESCRIPTION manifests.
//

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use tokio_util::sync::CancellationToken;

use rook::document::Document;
use rook::oracle::RSessionOracle;
use rook::package_descriptor::PackageDescriptor;
use rook::resolver::Resolver;
use rook::stub_index::StubIndex;

fn print_usage() {
    println!(
        "rook {}, a static analysis toolkit for R.",
        env!("CARGO_PKG_VERSION")
    );
    print!(
        r#"
Usage: rook <COMMAND> [ARGS]

Commands:

  dump-cfg <file.R>                  Print control-flow graphs, one per scope
  resolve <file.R> <offset>          Resolve the symbol at a byte offset (JSON)
          [--stubs <dir>] [--oracle]
  describe <DESCRIPTION>             Parse a DESCRIPTION manifest (JSON)

Options:

--version                    Print the version
--help                       Print this help message

"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut argv = env::args();
    argv.next(); // skip executable name

    let Some(command) = argv.next() else {
        print_usage();
        return Ok(());
    };

    match command.as_str() {
        "--version" => {
            println!("rook {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "--help" => {
            print_usage();
            Ok(())
        }
        "dump-cfg" => {
            let path = argv
                .next()
                .ok_or_else(|| anyhow!("dump-cfg needs a file argument"))?;
            dump_cfg(&path)
        }
        "resolve" => {
            let path = argv
                .next()
                .ok_or_else(|| anyhow!("resolve needs a file argument"))?;
            let offset: usize = argv
                .next()
                .ok_or_else(|| anyhow!("resolve needs a byte offset"))?
                .parse()
                .context("offset must be an unsigned integer")?;
            let mut stub_dir = None;
            let mut use_oracle = false;
            while let Some(arg) = argv.next() {
                match arg.as_str() {
                    "--stubs" => {
                        stub_dir = Some(PathBuf::from(
                            argv.next().ok_or_else(|| anyhow!("--stubs needs a directory"))?,
                        ));
                    }
                    "--oracle" => use_oracle = true,
                    other => bail!("Unknown argument: '{other}'"),
                }
            }
            resolve(&path, offset, stub_dir, use_oracle).await
        }
        "describe" => {
            let path = argv
                .next()
                .ok_or_else(|| anyhow!("describe needs a DESCRIPTION file argument"))?;
            describe(&path)
        }
        other => {
            bail!("Unknown command: '{other}'");
        }
    }
}

fn dump_cfg(path: &str) -> Result<()> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let document = Document::new(text);
    let root = document
        .root()
        .ok_or_else(|| anyhow!("{path} did not parse as R"))?;

    println!("== file scope ==");
    print_flow(&document, root);

    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        for i in (0..node.named_child_count()).rev() {
            if let Some(child) = node.named_child(i) {
                stack.push(child);
            }
        }
        if node.kind() == "function_definition" {
            let line = node.start_position().row + 1;
            println!("\n== function scope (line {line}) ==");
            print_flow(&document, node);
        }
    }
    Ok(())
}

fn print_flow(document: &Document, scope: tree_sitter::Node<'_>) {
    let flow = document.control_flow(scope);
    for instruction in flow.instructions() {
        let dead = if flow.is_reachable(instruction) {
            ""
        } else {
            "  [unreachable]"
        };
        println!("{instruction}{dead}");
    }
}

async fn resolve(path: &str, offset: usize, stub_dir: Option<PathBuf>, use_oracle: bool) -> Result<()> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    if offset >= text.len() {
        bail!("offset {offset} is past the end of {path} ({} bytes)", text.len());
    }
    let document = Document::new(text);
    let node = document
        .node_at(offset)
        .ok_or_else(|| anyhow!("no syntax node at offset {offset}"))?;

    let stubs = StubIndex::new();
    if let Some(dir) = stub_dir {
        let count = stubs.load_directory(&dir)?;
        log::info!("loaded {count} stubs from {}", dir.display());
    }
    let resolver = Resolver::new(&stubs);

    let candidates = if use_oracle {
        match RSessionOracle::new() {
            Some(oracle) => {
                let token = CancellationToken::new();
                resolver
                    .resolve_with_oracle(&document, node, &oracle, &token)
                    .await
            }
            None => {
                log::warn!("no R executable found, resolving statically");
                resolver.resolve(&document, node)
            }
        }
    } else {
        resolver.resolve(&document, node)
    };

    println!("{}", serde_json::to_string_pretty(&candidates)?);
    Ok(())
}

fn describe(path: &str) -> Result<()> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let descriptor = PackageDescriptor::parse(&text)?;
    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    Ok(())
}
