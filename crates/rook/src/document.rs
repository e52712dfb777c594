//
// document.rs
//
// One analyzed R file: text, parse tree, and generation-stamped caches for
// control-flow graphs and local-variable analyses. Every cached entry
// carries the generation it was computed under; an update bumps the
// generation, so stale entries are never served and never mixed with
// fresh ones.
//

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tree_sitter::{Node, Tree};

use crate::cfg::{analyze_scopes, build_control_flow, ControlFlow, ScopeAnalyses};
use crate::parser_pool;

/// A parsed document plus its derived-analysis caches.
pub struct Document {
    text: String,
    tree: Option<Tree>,
    generation: AtomicU64,
    /// Per-scope control-flow graphs, keyed by scope node id.
    graphs: DashMap<usize, (u64, Arc<ControlFlow>)>,
    /// Whole-file local-variable analysis.
    analyses: Mutex<Option<(u64, Arc<ScopeAnalyses>)>>,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let tree = parser_pool::parse_r(&text);
        if tree.is_none() {
            log::warn!("document failed to parse ({} bytes)", text.len());
        }
        Self {
            text,
            tree,
            generation: AtomicU64::new(0),
            graphs: DashMap::new(),
            analyses: Mutex::new(None),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tree(&self) -> Option<&Tree> {
        self.tree.as_ref()
    }

    pub fn root(&self) -> Option<Node<'_>> {
        self.tree.as_ref().map(|t| t.root_node())
    }

    /// Monotonic stamp; bumped by every [`Document::update`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Replace the text, reparse, and invalidate all cached analyses.
    pub fn update(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.tree = parser_pool::parse_r(&self.text);
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.graphs.clear();
        if let Ok(mut analyses) = self.analyses.lock() {
            *analyses = None;
        }
        log::trace!(
            "document updated, generation {}",
            self.generation.load(Ordering::Acquire)
        );
    }

    /// The control-flow graph for a scope node (the file root or a
    /// function definition). Built lazily, cached per generation.
    pub fn control_flow(&self, scope: Node<'_>) -> Arc<ControlFlow> {
        let generation = self.generation();
        if let Some(entry) = self.graphs.get(&scope.id()) {
            let (stamp, flow) = entry.value();
            if *stamp == generation {
                return Arc::clone(flow);
            }
        }
        let flow = Arc::new(build_control_flow(&self.text, scope));
        self.graphs
            .insert(scope.id(), (generation, Arc::clone(&flow)));
        flow
    }

    /// Local-variable analysis for the whole file, including every nested
    /// function scope. Cached per generation.
    pub fn analyses(&self) -> Option<Arc<ScopeAnalyses>> {
        let generation = self.generation();
        if let Ok(cached) = self.analyses.lock() {
            if let Some((stamp, analyses)) = cached.as_ref() {
                if *stamp == generation {
                    return Some(Arc::clone(analyses));
                }
            }
        }
        let root = self.root()?;
        let computed = Arc::new(analyze_scopes(root, &mut |node| self.control_flow(node)));
        if let Ok(mut cached) = self.analyses.lock() {
            *cached = Some((generation, Arc::clone(&computed)));
        }
        Some(computed)
    }

    /// The smallest named node covering the byte offset.
    pub fn node_at(&self, offset: usize) -> Option<Node<'_>> {
        self.root()?
            .named_descendant_for_byte_range(offset, offset)
    }
}
