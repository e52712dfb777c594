//
// classes/r6.rs
//
// R6 context detection: R6Class("Name", inherit = Parent,
// public = list(...), private = list(...), active = list(...)).
//

use tree_sitter::Node;

use super::{
    enclosing_call, is_argument_name, match_known_call, matched_string, string_value, ClassSystem,
    ContextDetector, ContextKind, LibraryClassContext,
};

// Leading parameters of R6::R6Class, in declaration order.
const R6_CLASS_PARAMS: &[&str] = &["classname", "public", "private", "active", "inherit"];

pub struct R6Detector;

impl ContextDetector for R6Detector {
    fn class_system(&self) -> ClassSystem {
        ClassSystem::R6
    }

    fn detect(&self, node: Node<'_>, text: &str) -> Option<LibraryClassContext> {
        let (call, callee) = enclosing_call(node, text)?;
        match callee.as_str() {
            "R6Class" | "R6::R6Class" => self.detect_r6_class(call, node, text),
            // Member lists nest one call deeper.
            "list" => {
                let (outer, outer_callee) = enclosing_call(call, text)?;
                if matches!(outer_callee.as_str(), "R6Class" | "R6::R6Class") {
                    self.detect_member_list(outer, call, node, text)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

impl R6Detector {
    fn context(
        &self,
        kind: ContextKind,
        call: Node<'_>,
        node: Node<'_>,
        text: &str,
        class_name: Option<String>,
    ) -> LibraryClassContext {
        LibraryClassContext::new(ClassSystem::R6, kind, call, node, text, class_name)
    }

    fn detect_r6_class(
        &self,
        call: Node<'_>,
        node: Node<'_>,
        text: &str,
    ) -> Option<LibraryClassContext> {
        let info = match_known_call(call, text, R6_CLASS_PARAMS);
        let class_name = matched_string(call, text, &info, "classname");
        match info.parameter_for_node(node) {
            Some("classname") if string_value(node, text).is_some() => Some(self.context(
                ContextKind::ClassNameDefinition,
                call,
                node,
                text,
                class_name,
            )),
            Some("inherit") if node.kind() == "identifier" => {
                Some(self.context(ContextKind::SuperClassName, call, node, text, class_name))
            }
            _ => None,
        }
    }

    /// A node inside public/private/active = list(...): the argument
    /// names are member names (fields and methods alike).
    fn detect_member_list(
        &self,
        r6_call: Node<'_>,
        list_call: Node<'_>,
        node: Node<'_>,
        text: &str,
    ) -> Option<LibraryClassContext> {
        let info = match_known_call(r6_call, text, R6_CLASS_PARAMS);
        if !matches!(
            info.parameter_for_node(list_call),
            Some("public") | Some("private") | Some("active")
        ) {
            return None;
        }
        if is_argument_name(list_call, node) {
            let class_name = matched_string(r6_call, text, &info, "classname");
            return Some(self.context(ContextKind::MemberName, r6_call, node, text, class_name));
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
        R6Detector.detect(node, text)
    }

    const COUNTER: &str = r#"Counter <- R6Class("Counter",
  inherit = BaseCounter,
  public = list(
    count = 0,
    add = function(n = 1) {
      self$count <- self$count + n
    }
  ),
  private = list(secret = NULL)
)"#;

    #[test]
    fn test_class_name_definition() {
        let context = detect_at(COUNTER, "\"Counter\"").unwrap();
        assert_eq!(context.system, ClassSystem::R6);
        assert_eq!(context.kind, ContextKind::ClassNameDefinition);
        assert_eq!(context.class_name.as_deref(), Some("Counter"));
        assert_eq!(context.function_name, "R6Class");
        assert_eq!(&COUNTER[context.element_range.clone()], "Counter");
    }

    #[test]
    fn test_inherit_is_superclass() {
        let context = detect_at(COUNTER, "BaseCounter").unwrap();
        assert_eq!(context.kind, ContextKind::SuperClassName);
        assert_eq!(context.class_name.as_deref(), Some("Counter"));
    }

    #[test]
    fn test_public_field_and_method_are_members() {
        let field = detect_at(COUNTER, "count =").unwrap();
        assert_eq!(field.kind, ContextKind::MemberName);
        let method = detect_at(COUNTER, "add").unwrap();
        assert_eq!(method.kind, ContextKind::MemberName);
    }

    #[test]
    fn test_private_member() {
        let context = detect_at(COUNTER, "secret").unwrap();
        assert_eq!(context.kind, ContextKind::MemberName);
        assert_eq!(context.class_name.as_deref(), Some("Counter"));
    }

    #[test]
    fn test_plain_list_is_not_claimed() {
        assert!(detect_at("x <- list(a = 1)", "a").is_none());
    }

    #[test]
    fn test_positional_public_list_members() {
        // public passed positionally still classifies member names.
        let text = r#"R6Class("Point", list(xcoord = 0, ycoord = 0))"#;
        let context = detect_at(text, "xcoord").unwrap();
        assert_eq!(context.kind, ContextKind::MemberName);
        assert_eq!(context.class_name.as_deref(), Some("Point"));
    }

    #[test]
    fn test_namespaced_r6_class() {
        let context = detect_at(r#"R6::R6Class("Point")"#, "Point").unwrap();
        assert_eq!(context.kind, ContextKind::ClassNameDefinition);
    }
}
