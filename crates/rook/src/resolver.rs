//
// resolver.rs
//
// Symbol resolution over a document: local control-flow scope, then file
// scope and sourced files, then the stub-index library scope, then an
// optional live-interpreter pass. Resolution is additive; every step
// appends its candidates, and an empty result is the normal "not found"
// answer, not an error.
//

use std::ops::Range;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tree_sitter::Node;

use crate::document::Document;
use crate::oracle::InterpreterOracle;
use crate::parser_pool::node_text;
use crate::stub_index::StubIndex;

/// Where a candidate came from, outermost last. Candidates are ordered by
/// this rank, so the head of a result is the binding R would use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ScopeRank {
    Local,
    File,
    Sourced,
    Library,
    Runtime,
}

/// The declaration a candidate points at, when a location is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeclarationSite {
    /// Path of the declaring file, for sourced-file candidates.
    pub file: Option<String>,
    pub range: Option<Range<usize>>,
    /// Instruction number within the declaring scope's graph.
    pub instruction: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolveCandidate {
    pub name: String,
    pub rank: ScopeRank,
    /// Providing package, for library and runtime candidates.
    pub package: Option<String>,
    pub site: Option<DeclarationSite>,
    /// For control-flow candidates: whether every path to the use site
    /// binds the name.
    pub always_initialized: Option<bool>,
}

/// Resolves a name inside a file another file has `source()`d. The CLI
/// wires this to a filesystem loader; tests use stubs.
pub trait SourcedFileResolver: Send + Sync {
    fn resolve_in(&self, path: &str, name: &str) -> Vec<ResolveCandidate>;
}

pub struct Resolver<'a> {
    stubs: &'a StubIndex,
    sourced: Option<&'a dyn SourcedFileResolver>,
}

impl<'a> Resolver<'a> {
    pub fn new(stubs: &'a StubIndex) -> Self {
        Self {
            stubs,
            sourced: None,
        }
    }

    pub fn with_sourced_files(mut self, sourced: &'a dyn SourcedFileResolver) -> Self {
        self.sourced = Some(sourced);
        self
    }

    /// Resolve the name at `node`. Qualified forms (`pkg::name`,
    /// `pkg:::name`) go straight to the library scope of that package.
    pub fn resolve(&self, document: &Document, node: Node<'_>) -> Vec<ResolveCandidate> {
        let text = document.text();
        if let Some((package, name, internal)) = qualified_name(node, text) {
            return self.library_candidates(Some(&package), &name, internal);
        }
        let Some(name) = referenced_name(node, text) else {
            return Vec::new();
        };

        let mut candidates = Vec::new();
        self.scope_candidates(document, node, &name, &mut candidates);
        candidates.extend(self.library_candidates(None, &name, false));
        candidates
    }

    /// [`Resolver::resolve`] plus a live-interpreter pass appending
    /// `Runtime` candidates. Oracle failures are logged and ignored; the
    /// static result stands on its own.
    pub async fn resolve_with_oracle(
        &self,
        document: &Document,
        node: Node<'_>,
        oracle: &dyn InterpreterOracle,
        token: &CancellationToken,
    ) -> Vec<ResolveCandidate> {
        let mut candidates = self.resolve(document, node);
        let Some(name) = referenced_name(node, document.text()) else {
            return candidates;
        };
        match oracle.variable_bindings(token).await {
            Ok(bindings) => {
                for binding in bindings.iter().filter(|b| b.name == name) {
                    candidates.push(ResolveCandidate {
                        name: binding.name.clone(),
                        rank: ScopeRank::Runtime,
                        package: None,
                        site: None,
                        always_initialized: None,
                    });
                }
            }
            Err(e) => log::debug!("oracle pass skipped: {e:#}"),
        }
        candidates
    }

    /// Local and file scope plus included sources, in rank order.
    fn scope_candidates(
        &self,
        document: &Document,
        node: Node<'_>,
        name: &str,
        out: &mut Vec<ResolveCandidate>,
    ) {
        let Some(analyses) = document.analyses() else {
            return;
        };
        let Some(root) = document.root() else {
            return;
        };
        let scope = enclosing_scope(node, root);
        let Some(result) = analyses.scope(scope.id()) else {
            return;
        };
        let flow = document.control_flow(scope);
        let Some(num) = instruction_at(&flow, node) else {
            return;
        };
        let info = &result.infos[num.min(result.infos.len().saturating_sub(1))];

        if let Some(definition) = info.get(name) {
            let variable = analyses.variable(definition.variable);
            // A binding owned by a function scope outranks one inherited
            // from the file level.
            let rank = if variable.scope_id == root.id() {
                ScopeRank::File
            } else {
                ScopeRank::Local
            };
            out.push(ResolveCandidate {
                name: name.to_string(),
                rank,
                package: None,
                site: Some(DeclarationSite {
                    file: None,
                    range: variable.first_definition_range.clone(),
                    instruction: Some(variable.first_definition),
                }),
                always_initialized: Some(definition.is_always_initialized),
            });
        }

        if let Some(sourced) = self.sourced {
            let included = &result.included[num.min(result.included.len().saturating_sub(1))];
            for path in included {
                for mut candidate in sourced.resolve_in(path, name) {
                    candidate.rank = ScopeRank::Sourced;
                    if let Some(site) = &mut candidate.site {
                        site.file.get_or_insert_with(|| path.clone());
                    } else {
                        candidate.site = Some(DeclarationSite {
                            file: Some(path.clone()),
                            range: None,
                            instruction: None,
                        });
                    }
                    out.push(candidate);
                }
            }
        }
    }

    fn library_candidates(
        &self,
        package: Option<&str>,
        name: &str,
        include_internal: bool,
    ) -> Vec<ResolveCandidate> {
        let hits = match package {
            Some(package) => self.stubs.lookup_in(package, name, include_internal),
            None => self.stubs.lookup(name, include_internal),
        };
        hits.into_iter()
            .map(|hit| ResolveCandidate {
                name: hit.symbol.name,
                rank: ScopeRank::Library,
                package: Some(hit.package),
                site: None,
                always_initialized: None,
            })
            .collect()
    }
}

/// `pkg::name` / `pkg:::name` around `node`, when it is part of one.
fn qualified_name(node: Node<'_>, text: &str) -> Option<(String, String, bool)> {
    let operator = if node.kind() == "namespace_operator" {
        node
    } else {
        let parent = node.parent()?;
        if parent.kind() != "namespace_operator" {
            return None;
        }
        parent
    };
    let lhs = operator.child_by_field_name("lhs")?;
    let rhs = operator.child_by_field_name("rhs")?;
    let internal = operator
        .child_by_field_name("operator")
        .is_some_and(|op| node_text(op, text) == ":::");
    Some((
        node_text(lhs, text).to_string(),
        node_text(rhs, text).to_string(),
        internal,
    ))
}

fn referenced_name(node: Node<'_>, text: &str) -> Option<String> {
    match node.kind() {
        "identifier" => Some(node_text(node, text).to_string()),
        "string" | "string_content" => crate::classes::string_value(node, text),
        _ => None,
    }
}

/// The innermost function definition containing `node`, or the file root.
fn enclosing_scope<'t>(node: Node<'t>, root: Node<'t>) -> Node<'t> {
    let mut current = node.parent();
    while let Some(candidate) = current {
        if candidate.kind() == "function_definition" {
            return candidate;
        }
        current = candidate.parent();
    }
    root
}

/// The instruction evaluating `node` or its nearest instruction-bearing
/// ancestor within the scope's graph.
fn instruction_at(flow: &crate::cfg::ControlFlow, node: Node<'_>) -> Option<usize> {
    let mut current = Some(node);
    while let Some(candidate) = current {
        if let Some(instruction) = flow.instruction_for_node(candidate.id()) {
            return Some(instruction.num());
        }
        current = candidate.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{LoadedPackage, OracleBinding, OracleClassInfo};
    use crate::stub_index::{PackageStub, StubKind, StubPriority, StubSymbol};
    use anyhow::Result;
    use async_trait::async_trait;

    fn stub_library() -> StubIndex {
        let index = StubIndex::new();
        index.insert(PackageStub {
            name: "stats".to_string(),
            version: "4.3.0".to_string(),
            priority: StubPriority::Base,
            symbols: vec![
                StubSymbol {
                    name: "filter".to_string(),
                    kind: StubKind::Function,
                    exported: true,
                    parameters: vec!["x".to_string()],
                },
                StubSymbol {
                    name: "hidden".to_string(),
                    kind: StubKind::Function,
                    exported: false,
                    parameters: vec![],
                },
            ],
        });
        index
    }

    fn node_at<'t>(document: &'t Document, needle: &str) -> Node<'t> {
        let offset = document.text().find(needle).unwrap() + 1;
        document.node_at(offset).unwrap()
    }

    #[test]
    fn test_local_binding_outranks_file_and_library() {
        let stubs = stub_library();
        let document = Document::new(
            "filter <- function(x) x\ng <- function() { filter <- 2; filter }",
        );
        let resolver = Resolver::new(&stubs);
        let use_site = node_at(&document, "filter }");
        let candidates = resolver.resolve(&document, use_site);
        assert!(candidates.len() >= 2);
        assert_eq!(candidates[0].rank, ScopeRank::Local);
        assert!(candidates.iter().any(|c| c.rank == ScopeRank::Library));
    }

    #[test]
    fn test_file_binding_visible_inside_function() {
        let stubs = StubIndex::new();
        let document = Document::new("top <- 1\nf <- function() top");
        let resolver = Resolver::new(&stubs);
        // The read inside f, not the file-level assignment target.
        let offset = document.text().rfind("top").unwrap() + 1;
        let use_site = document.node_at(offset).unwrap();
        let candidates = resolver.resolve(&document, use_site);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].rank, ScopeRank::File);
    }

    #[test]
    fn test_library_only_for_unbound_name() {
        let stubs = stub_library();
        let document = Document::new("filter(x)");
        let resolver = Resolver::new(&stubs);
        let use_site = node_at(&document, "filter");
        let candidates = resolver.resolve(&document, use_site);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].rank, ScopeRank::Library);
        assert_eq!(candidates[0].package.as_deref(), Some("stats"));
    }

    #[test]
    fn test_qualified_name_goes_to_library_scope() {
        let stubs = stub_library();
        let document = Document::new("stats::filter(x)");
        let resolver = Resolver::new(&stubs);
        let use_site = node_at(&document, "filter");
        let candidates = resolver.resolve(&document, use_site);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].rank, ScopeRank::Library);
    }

    #[test]
    fn test_internal_symbol_needs_triple_colon() {
        let stubs = stub_library();
        let resolver = Resolver::new(&stubs);

        let exported_only = Document::new("stats::hidden(x)");
        let candidates = resolver.resolve(&exported_only, node_at(&exported_only, "hidden"));
        assert!(candidates.is_empty());

        let internal = Document::new("stats:::hidden(x)");
        let candidates = resolver.resolve(&internal, node_at(&internal, "hidden"));
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_unknown_name_resolves_to_empty() {
        let stubs = StubIndex::new();
        let document = Document::new("mystery(1)");
        let resolver = Resolver::new(&stubs);
        let candidates = resolver.resolve(&document, node_at(&document, "mystery"));
        assert!(candidates.is_empty());
    }

    struct OneFileSources;

    impl SourcedFileResolver for OneFileSources {
        fn resolve_in(&self, path: &str, name: &str) -> Vec<ResolveCandidate> {
            if path == "util.R" && name == "helper" {
                vec![ResolveCandidate {
                    name: name.to_string(),
                    rank: ScopeRank::Sourced,
                    package: None,
                    site: None,
                    always_initialized: None,
                }]
            } else {
                Vec::new()
            }
        }
    }

    #[test]
    fn test_sourced_file_scope_after_source_call() {
        let stubs = StubIndex::new();
        let sources = OneFileSources;
        let resolver = Resolver::new(&stubs).with_sourced_files(&sources);

        let document = Document::new("source(\"util.R\")\nhelper(1)");
        let candidates = resolver.resolve(&document, node_at(&document, "helper"));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].rank, ScopeRank::Sourced);
        assert_eq!(
            candidates[0].site.as_ref().unwrap().file.as_deref(),
            Some("util.R")
        );

        // Before the source() call the file is not in scope.
        let early = Document::new("helper(1)\nsource(\"util.R\")");
        let candidates = resolver.resolve(&early, node_at(&early, "helper"));
        assert!(candidates.is_empty());
    }

    struct FixedOracle;

    #[async_trait]
    impl InterpreterOracle for FixedOracle {
        async fn variable_bindings(
            &self,
            _token: &CancellationToken,
        ) -> Result<Vec<OracleBinding>> {
            Ok(vec![OracleBinding {
                name: "session_var".to_string(),
                class: "numeric".to_string(),
            }])
        }

        async fn loaded_packages(
            &self,
            _token: &CancellationToken,
        ) -> Result<Vec<LoadedPackage>> {
            Ok(Vec::new())
        }

        async fn eval_distinct_strings(
            &self,
            _code: &str,
            _token: &CancellationToken,
        ) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn class_introspection(
            &self,
            _class_name: &str,
            _token: &CancellationToken,
        ) -> Result<Option<OracleClassInfo>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_oracle_appends_runtime_candidates() {
        let stubs = StubIndex::new();
        let document = Document::new("session_var + 1");
        let resolver = Resolver::new(&stubs);
        let token = CancellationToken::new();
        let candidates = resolver
            .resolve_with_oracle(
                &document,
                node_at(&document, "session_var"),
                &FixedOracle,
                &token,
            )
            .await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].rank, ScopeRank::Runtime);
    }
}
