//
// classes/s4.rs
//
// S4 context detection: setClass / setGeneric / setMethod / new call
// shapes from the methods package.
//

use tree_sitter::Node;

use super::{
    enclosing_call, is_argument_name, match_known_call, matched_string, string_value, ClassSystem,
    ContextDetector, ContextKind, LibraryClassContext,
};

// Leading parameters of the recognized methods-package signatures, in
// declaration order so positional arguments match correctly.
const SET_CLASS_PARAMS: &[&str] = &["Class", "representation", "prototype", "contains", "slots"];
const SET_GENERIC_PARAMS: &[&str] = &["name", "def", "..."];
const SET_METHOD_PARAMS: &[&str] = &["f", "signature", "definition"];
const NEW_PARAMS: &[&str] = &["Class", "..."];

pub struct S4Detector;

impl ContextDetector for S4Detector {
    fn class_system(&self) -> ClassSystem {
        ClassSystem::S4
    }

    fn detect(&self, node: Node<'_>, text: &str) -> Option<LibraryClassContext> {
        let (call, callee) = enclosing_call(node, text)?;
        match callee.as_str() {
            "setClass" | "methods::setClass" => self.detect_set_class(call, node, text),
            "setGeneric" | "methods::setGeneric" => self.detect_set_generic(call, node, text),
            "setMethod" | "methods::setMethod" => self.detect_set_method(call, node, text),
            "new" | "methods::new" => self.detect_new(call, node, text),
            // representation()/slots inside setClass: classify against the
            // outer setClass call instead.
            "representation" | "c" | "list" => {
                let (outer, outer_callee) = enclosing_call(call, text)?;
                if matches!(outer_callee.as_str(), "setClass" | "methods::setClass") {
                    self.detect_set_class_inner(outer, call, node, text)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

impl S4Detector {
    fn context(
        &self,
        kind: ContextKind,
        call: Node<'_>,
        node: Node<'_>,
        text: &str,
        class_name: Option<String>,
    ) -> LibraryClassContext {
        LibraryClassContext::new(ClassSystem::S4, kind, call, node, text, class_name)
    }

    /// setClass("Name", contains = "Parent", slots = c(count = "numeric"))
    fn detect_set_class(
        &self,
        call: Node<'_>,
        node: Node<'_>,
        text: &str,
    ) -> Option<LibraryClassContext> {
        let info = match_known_call(call, text, SET_CLASS_PARAMS);
        let class_name = matched_string(call, text, &info, "Class");
        if string_value(node, text).is_none() {
            return None;
        }
        match info.parameter_for_node(node) {
            Some("Class") => Some(self.context(
                ContextKind::ClassNameDefinition,
                call,
                node,
                text,
                class_name,
            )),
            Some("contains") => {
                Some(self.context(ContextKind::SuperClassName, call, node, text, class_name))
            }
            _ => None,
        }
    }

    /// A node inside representation(...) or slots = c(...) of a setClass:
    /// argument names are slot names, string values are slot types.
    fn detect_set_class_inner(
        &self,
        set_class: Node<'_>,
        inner_call: Node<'_>,
        node: Node<'_>,
        text: &str,
    ) -> Option<LibraryClassContext> {
        let info = match_known_call(set_class, text, SET_CLASS_PARAMS);
        let within_slots = matches!(
            info.parameter_for_node(inner_call),
            Some("representation") | Some("slots")
        );
        if !within_slots {
            return None;
        }
        if is_argument_name(inner_call, node) {
            let class_name = matched_string(set_class, text, &info, "Class");
            return Some(self.context(ContextKind::SlotName, set_class, node, text, class_name));
        }
        None
    }

    /// setGeneric("area", function(shape) standardGeneric("area"))
    fn detect_set_generic(
        &self,
        call: Node<'_>,
        node: Node<'_>,
        text: &str,
    ) -> Option<LibraryClassContext> {
        let info = match_known_call(call, text, SET_GENERIC_PARAMS);
        if info.parameter_for_node(node) == Some("name") && string_value(node, text).is_some() {
            return Some(self.context(ContextKind::MethodName, call, node, text, None));
        }
        None
    }

    /// setMethod("area", "Circle", function(shape) ...)
    fn detect_set_method(
        &self,
        call: Node<'_>,
        node: Node<'_>,
        text: &str,
    ) -> Option<LibraryClassContext> {
        let info = match_known_call(call, text, SET_METHOD_PARAMS);
        if string_value(node, text).is_none() {
            return None;
        }
        match info.parameter_for_node(node) {
            Some("f") => Some(self.context(ContextKind::MethodName, call, node, text, None)),
            Some("signature") => {
                let class_name = string_value(node, text);
                Some(self.context(
                    ContextKind::NewObjectClassName,
                    call,
                    node,
                    text,
                    class_name,
                ))
            }
            _ => None,
        }
    }

    /// new("Circle", radius = 1): the first positional string names the
    /// class, argument names after it are slot names.
    fn detect_new(
        &self,
        call: Node<'_>,
        node: Node<'_>,
        text: &str,
    ) -> Option<LibraryClassContext> {
        let info = match_known_call(call, text, NEW_PARAMS);
        let class_name = matched_string(call, text, &info, "Class");
        if is_argument_name(call, node) {
            return Some(self.context(ContextKind::SlotName, call, node, text, class_name));
        }
        if info.parameter_for_node(node) == Some("Class") && string_value(node, text).is_some() {
            return Some(self.context(
                ContextKind::NewObjectClassName,
                call,
                node,
                text,
                class_name,
            ));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser_pool::parse_r;

    fn detect_at(text: &str, needle: &str) -> Option<LibraryClassContext> {
        let tree = parse_r(text).unwrap();
        let offset = text.find(needle).unwrap() + 1;
        let node = tree
            .root_node()
            .named_descendant_for_byte_range(offset, offset)
            .unwrap();
        S4Detector.detect(node, text)
    }

    #[test]
    fn test_set_class_first_argument_is_definition() {
        let text = r#"setClass("Circle", contains = "Shape")"#;
        let context = detect_at(text, "Circle").unwrap();
        assert_eq!(context.kind, ContextKind::ClassNameDefinition);
        assert_eq!(context.class_name.as_deref(), Some("Circle"));
        assert_eq!(context.function_name, "setClass");
        assert_eq!(context.call_range, 0..text.len());
        assert_eq!(&text[context.element_range.clone()], "Circle");
    }

    #[test]
    fn test_set_class_contains_is_superclass() {
        let context = detect_at(r#"setClass("Circle", contains = "Shape")"#, "Shape").unwrap();
        assert_eq!(context.kind, ContextKind::SuperClassName);
        assert_eq!(context.class_name.as_deref(), Some("Circle"));
    }

    #[test]
    fn test_set_class_slot_names() {
        let text = r#"setClass("Circle", slots = c(radius = "numeric"))"#;
        let context = detect_at(text, "radius").unwrap();
        assert_eq!(context.kind, ContextKind::SlotName);
        assert_eq!(context.class_name.as_deref(), Some("Circle"));
    }

    #[test]
    fn test_set_generic_name() {
        let context = detect_at(r#"setGeneric("area")"#, "area").unwrap();
        assert_eq!(context.kind, ContextKind::MethodName);
    }

    #[test]
    fn test_set_method_name_and_signature() {
        let text = r#"setMethod("area", "Circle", function(obj) obj@radius)"#;
        let name = detect_at(text, "area").unwrap();
        assert_eq!(name.kind, ContextKind::MethodName);
        let signature = detect_at(text, "Circle").unwrap();
        assert_eq!(signature.kind, ContextKind::NewObjectClassName);
        assert_eq!(signature.class_name.as_deref(), Some("Circle"));
    }

    #[test]
    fn test_new_class_reference() {
        let context = detect_at(r#"new("Circle")"#, "Circle").unwrap();
        assert_eq!(context.kind, ContextKind::NewObjectClassName);
        assert_eq!(context.class_name.as_deref(), Some("Circle"));
    }

    #[test]
    fn test_new_named_argument_is_slot() {
        let text = r#"new("Circle", radius = 1)"#;
        let context = detect_at(text, "radius").unwrap();
        assert_eq!(context.kind, ContextKind::SlotName);
        assert_eq!(context.class_name.as_deref(), Some("Circle"));
    }

    #[test]
    fn test_unrelated_call_is_not_claimed() {
        assert!(detect_at(r#"paste("Circle")"#, "Circle").is_none());
    }

    #[test]
    fn test_set_class_named_class_argument() {
        let context = detect_at(r#"setClass(Class = "Circle")"#, "Circle").unwrap();
        assert_eq!(context.kind, ContextKind::ClassNameDefinition);
        assert_eq!(context.class_name.as_deref(), Some("Circle"));
    }

    #[test]
    fn test_set_method_named_f_shifts_positional_signature() {
        // f is claimed by name, so the first positional argument fills
        // the signature slot.
        let text = r#"setMethod(f = "area", "Circle", function(obj) obj@radius)"#;
        let signature = detect_at(text, "Circle").unwrap();
        assert_eq!(signature.kind, ContextKind::NewObjectClassName);
        assert_eq!(signature.class_name.as_deref(), Some("Circle"));
    }

    #[test]
    fn test_namespaced_set_class() {
        let context =
            detect_at(r#"methods::setClass("Circle")"#, "Circle").unwrap();
        assert_eq!(context.kind, ContextKind::ClassNameDefinition);
        assert_eq!(context.function_name, "methods::setClass");
    }
}
