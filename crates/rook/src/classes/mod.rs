//
// classes/mod.rs
//
// Class-system context detection: given a syntax node (typically a string
// or name the caret sits on), decide whether it names a class, superclass,
// slot, member, or method of a supported class system. Detectors are
// consulted in registration order; the first answer wins. Results are
// cached per (node, document generation).
//

pub mod r6;
pub mod s4;

use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::Mutex;

use lru::LruCache;
use tree_sitter::Node;

use crate::arguments::{ArgumentInfo, ParameterSpec};

pub use r6::R6Detector;
pub use s4::S4Detector;

const CONTEXT_CACHE_CAPACITY: usize = 2048;

/// Which class system produced a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ClassSystem {
    S4,
    R6,
}

/// What role the inspected node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ContextKind {
    /// The name under which a class is being defined.
    ClassNameDefinition,
    /// A superclass reference in a definition (`contains`, `inherit`).
    SuperClassName,
    /// A slot name of an S4 definition or instantiation.
    SlotName,
    /// A public/private/active member of an R6 definition.
    MemberName,
    /// A generic or method name (`setGeneric`, `setMethod`).
    MethodName,
    /// A reference to an existing class in a usage position
    /// (`new("C")`, a `setMethod` signature).
    NewObjectClassName,
}

/// A detected class-system context for one node.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LibraryClassContext {
    pub system: ClassSystem,
    pub kind: ContextKind,
    /// The recognized library function, as written (`setClass`,
    /// `methods::setClass`, `R6Class`, ...).
    pub function_name: String,
    /// Byte span of the recognized call expression.
    pub call_range: Range<usize>,
    /// Byte span of the queried element itself.
    pub element_range: Range<usize>,
    /// The class the context belongs to, when the construct names one.
    pub class_name: Option<String>,
}

impl LibraryClassContext {
    pub(crate) fn new(
        system: ClassSystem,
        kind: ContextKind,
        call: Node<'_>,
        element: Node<'_>,
        text: &str,
        class_name: Option<String>,
    ) -> Self {
        let function_name = call
            .child_by_field_name("function")
            .map(|f| text[f.byte_range()].to_string())
            .unwrap_or_default();
        Self {
            system,
            kind,
            function_name,
            call_range: call.byte_range(),
            element_range: element.byte_range(),
            class_name,
        }
    }
}

/// One class-system detector. Implementations are cheap to call; the
/// registry handles caching.
pub trait ContextDetector: Send + Sync {
    fn class_system(&self) -> ClassSystem;

    /// The context for `node`, or `None` when this system does not apply.
    fn detect(&self, node: Node<'_>, text: &str) -> Option<LibraryClassContext>;
}

/// Ordered detector registry with a bounded per-element result cache.
/// Order is part of the contract: detectors registered earlier shadow
/// later ones for nodes both would claim.
pub struct DetectorRegistry {
    detectors: Vec<Box<dyn ContextDetector>>,
    cache: Mutex<LruCache<(usize, u64), Option<LibraryClassContext>>>,
}

impl DetectorRegistry {
    /// An empty registry. Most callers want [`DetectorRegistry::standard`].
    pub fn new() -> Self {
        let capacity = NonZeroUsize::new(CONTEXT_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            detectors: Vec::new(),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// The built-in detectors: S4 first, then R6.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(S4Detector));
        registry.register(Box::new(R6Detector));
        registry
    }

    pub fn register(&mut self, detector: Box<dyn ContextDetector>) {
        self.detectors.push(detector);
    }

    /// Registration order of the detectors, for callers that present
    /// per-system results.
    pub fn systems(&self) -> Vec<ClassSystem> {
        self.detectors.iter().map(|d| d.class_system()).collect()
    }

    /// Detect the context for `node`, caching under the document
    /// generation. A bumped generation makes old entries unreachable.
    pub fn detect(
        &self,
        node: Node<'_>,
        text: &str,
        generation: u64,
    ) -> Option<LibraryClassContext> {
        let key = (node.id(), generation);
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(cached) = cache.get(&key) {
                return cached.clone();
            }
        }
        let result = self
            .detectors
            .iter()
            .find_map(|detector| detector.detect(node, text));
        if let Ok(mut cache) = self.cache.lock() {
            cache.push(key, result.clone());
        }
        result
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

// --- shared node helpers for detectors ---

/// The innermost call enclosing `node`, with its callee name.
pub(crate) fn enclosing_call<'t>(node: Node<'t>, text: &str) -> Option<(Node<'t>, String)> {
    let mut current = node.parent();
    while let Some(candidate) = current {
        if candidate.kind() == "call" {
            if let Some(function) = candidate.child_by_field_name("function") {
                return Some((candidate, text[function.byte_range()].to_string()));
            }
        }
        current = candidate.parent();
    }
    None
}

/// Match a recognized library call against its known parameter names,
/// using the same R argument semantics as user-defined calls.
pub(crate) fn match_known_call(call: Node<'_>, text: &str, names: &[&str]) -> ArgumentInfo {
    let parameters = names
        .iter()
        .map(|n| ParameterSpec {
            name: (*n).to_string(),
            default: None,
            is_dots: *n == "...",
        })
        .collect();
    ArgumentInfo::new(call, text, parameters)
}

/// True when `node` is (part of) an argument name of `call`, the `n` in
/// `f(n = v)`.
pub(crate) fn is_argument_name(call: Node<'_>, node: Node<'_>) -> bool {
    let Some(args) = call.child_by_field_name("arguments") else {
        return false;
    };
    let mut cursor = args.walk();
    let found = args.children(&mut cursor).any(|child| {
        child.kind() == "argument"
            && child
                .child_by_field_name("name")
                .is_some_and(|n| covers(n, node))
    });
    found
}

/// The string literal passed to `parameter`, whether by name or position.
pub(crate) fn matched_string(
    call: Node<'_>,
    text: &str,
    info: &ArgumentInfo,
    parameter: &str,
) -> Option<String> {
    let target = info.argument_for(parameter)?.value_id;
    let args = call.child_by_field_name("arguments")?;
    let mut cursor = args.walk();
    for child in args.children(&mut cursor) {
        if child.kind() != "argument" {
            continue;
        }
        if let Some(value) = child.child_by_field_name("value") {
            if value.id() == target {
                return string_value(value, text);
            }
        }
    }
    None
}

fn covers(outer: Node<'_>, inner: Node<'_>) -> bool {
    outer.start_byte() <= inner.start_byte() && inner.end_byte() <= outer.end_byte()
}

/// The string literal value of a node, when it is one (`string` or the
/// `string_content` inside it).
pub(crate) fn string_value(node: Node<'_>, text: &str) -> Option<String> {
    match node.kind() {
        "string_content" => Some(text[node.byte_range()].to_string()),
        "string" => {
            let mut cursor = node.walk();
            let content = node
                .children(&mut cursor)
                .find(|c| c.kind() == "string_content");
            Some(
                content
                    .map(|c| text[c.byte_range()].to_string())
                    .unwrap_or_default(),
            )
        }
        _ => None,
    }
}
