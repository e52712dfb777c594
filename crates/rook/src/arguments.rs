//
// arguments.rs
//
// Call-argument to parameter matching with R's semantics: named arguments
// claim their parameters first, remaining positional arguments fill the
// unclaimed parameters in declaration order, and `...` absorbs everything
// left over.
//

use std::ops::Range;

use indexmap::IndexMap;
use tree_sitter::Node;

use crate::parser_pool::node_text;

/// A declared parameter of a function definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    /// Default value text, verbatim from the definition.
    pub default: Option<String>,
    pub is_dots: bool,
}

/// One argument of a call, after matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedArgument {
    /// The parameter this argument was matched to; `None` when the call
    /// passes more positional arguments than the function declares and
    /// there is no `...` to absorb them.
    pub parameter: Option<String>,
    /// Byte range of the argument's value expression.
    pub value_range: Range<usize>,
    /// Stable node id of the value expression.
    pub value_id: usize,
    /// True when the argument was passed as `name = value`.
    pub named: bool,
}

/// The matched view of one call site.
#[derive(Debug, Clone)]
pub struct ArgumentInfo {
    parameters: Vec<ParameterSpec>,
    arguments: Vec<MatchedArgument>,
}

/// Read the parameter list of a `function_definition` node.
pub fn parameters_of(function_def: Node<'_>, text: &str) -> Vec<ParameterSpec> {
    let Some(params) = function_def.child_by_field_name("parameters") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut cursor = params.walk();
    for child in params.children(&mut cursor) {
        if child.kind() != "parameter" {
            continue;
        }
        let Some(name_node) = child.child_by_field_name("name") else {
            continue;
        };
        let name = node_text(name_node, text).to_string();
        let is_dots = name_node.kind() == "dots";
        let default = child
            .child_by_field_name("default")
            .map(|d| node_text(d, text).to_string());
        out.push(ParameterSpec {
            name,
            default,
            is_dots,
        });
    }
    out
}

impl ArgumentInfo {
    /// Match the arguments of `call` against `parameters`.
    pub fn new(call: Node<'_>, text: &str, parameters: Vec<ParameterSpec>) -> Self {
        let mut named: Vec<(String, MatchedArgument)> = Vec::new();
        let mut positional: Vec<MatchedArgument> = Vec::new();

        if let Some(args) = call.child_by_field_name("arguments") {
            let mut cursor = args.walk();
            for child in args.children(&mut cursor) {
                if child.kind() != "argument" {
                    continue;
                }
                let Some(value) = child.child_by_field_name("value") else {
                    continue;
                };
                let slot = MatchedArgument {
                    parameter: None,
                    value_range: value.start_byte()..value.end_byte(),
                    value_id: value.id(),
                    named: false,
                };
                match child.child_by_field_name("name") {
                    Some(name_node) => {
                        let name = node_text(name_node, text).to_string();
                        named.push((name, MatchedArgument { named: true, ..slot }));
                    }
                    None => positional.push(slot),
                }
            }
        }

        // Named arguments claim their parameters first.
        let mut claimed: IndexMap<&str, bool> = parameters
            .iter()
            .map(|p| (p.name.as_str(), false))
            .collect();
        let dots = parameters.iter().any(|p| p.is_dots);
        let mut arguments = Vec::with_capacity(named.len() + positional.len());
        for (name, mut arg) in named {
            match claimed.get_mut(name.as_str()) {
                Some(taken) if !*taken => {
                    *taken = true;
                    arg.parameter = Some(name);
                }
                // Unknown or repeated names land in `...` when present.
                _ if dots => arg.parameter = Some("...".to_string()),
                _ => {}
            }
            arguments.push(arg);
        }

        // Positional arguments fill the unclaimed parameters in order;
        // `...` absorbs itself and everything after it.
        let mut free = parameters
            .iter()
            .filter(|p| !claimed.get(p.name.as_str()).copied().unwrap_or(false));
        let mut absorbed = false;
        for mut arg in positional {
            if absorbed {
                arg.parameter = Some("...".to_string());
            } else {
                match free.next() {
                    Some(p) if p.is_dots => {
                        absorbed = true;
                        arg.parameter = Some("...".to_string());
                    }
                    Some(p) => arg.parameter = Some(p.name.clone()),
                    None => {}
                }
            }
            arguments.push(arg);
        }

        Self {
            parameters,
            arguments,
        }
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn arguments(&self) -> &[MatchedArgument] {
        &self.arguments
    }

    /// The argument matched to a parameter, if the call passes one.
    /// For `...` this answers the first absorbed argument.
    pub fn argument_for(&self, parameter: &str) -> Option<&MatchedArgument> {
        self.arguments
            .iter()
            .find(|a| a.parameter.as_deref() == Some(parameter))
    }

    /// Every argument absorbed by `...`, in call order.
    pub fn dots_arguments(&self) -> impl Iterator<Item = &MatchedArgument> {
        self.arguments
            .iter()
            .filter(|a| a.parameter.as_deref() == Some("..."))
    }

    /// The parameter an expression is passed to, by byte containment. The
    /// expression may sit anywhere inside the argument's value.
    pub fn parameter_for_node(&self, node: Node<'_>) -> Option<&str> {
        let start = node.start_byte();
        let end = node.end_byte();
        self.arguments
            .iter()
            .find(|a| a.value_range.start <= start && end <= a.value_range.end)
            .and_then(|a| a.parameter.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser_pool::parse_r;

    fn specs(names: &[&str]) -> Vec<ParameterSpec> {
        names
            .iter()
            .map(|n| ParameterSpec {
                name: n.to_string(),
                default: None,
                is_dots: *n == "...",
            })
            .collect()
    }

    fn first_call(tree: &tree_sitter::Tree) -> tree_sitter::Node<'_> {
        let mut node = tree.root_node().child(0).unwrap();
        while node.kind() != "call" {
            node = node.named_child(0).unwrap();
        }
        node
    }

    fn match_call(text: &str, params: &[&str]) -> (tree_sitter::Tree, ArgumentInfo) {
        let tree = parse_r(text).unwrap();
        let info = ArgumentInfo::new(first_call(&tree), text, specs(params));
        (tree, info)
    }

    #[test]
    fn test_positional_fill_in_order() {
        let (_, info) = match_call("f(1, 2)", &["a", "b"]);
        assert_eq!(info.argument_for("a").unwrap().named, false);
        assert!(info.argument_for("b").is_some());
    }

    #[test]
    fn test_named_argument_claims_parameter_first() {
        // b is claimed by name, so the positional 1 goes to a.
        let (_, info) = match_call("f(b = 2, 1)", &["a", "b"]);
        let b = info.argument_for("b").unwrap();
        assert!(b.named);
        let a = info.argument_for("a").unwrap();
        assert!(!a.named);
    }

    #[test]
    fn test_named_argument_out_of_order() {
        let (_, info) = match_call("f(1, a = 2)", &["a", "b"]);
        // a is claimed by name; the positional argument falls to b.
        assert!(info.argument_for("a").unwrap().named);
        assert!(!info.argument_for("b").unwrap().named);
    }

    #[test]
    fn test_dots_absorb_extra_positional() {
        let (_, info) = match_call("f(1, 2, 3)", &["a", "..."]);
        assert!(info.argument_for("a").is_some());
        assert_eq!(info.dots_arguments().count(), 2);
    }

    #[test]
    fn test_dots_absorb_unknown_named() {
        let (_, info) = match_call("f(1, weight = 2)", &["a", "..."]);
        assert!(info.argument_for("a").is_some());
        assert_eq!(info.dots_arguments().count(), 1);
    }

    #[test]
    fn test_excess_positional_without_dots_unmatched() {
        let (_, info) = match_call("f(1, 2, 3)", &["a"]);
        let unmatched = info
            .arguments()
            .iter()
            .filter(|a| a.parameter.is_none())
            .count();
        assert_eq!(unmatched, 2);
    }

    #[test]
    fn test_parameter_for_node_by_containment() {
        let text = "f(x + 1, b = g(y))";
        let (tree, info) = match_call(text, &["a", "b"]);
        // The y identifier sits inside g(y), the value of b.
        let root = tree.root_node();
        let mut stack = vec![root];
        let mut y = None;
        while let Some(node) = stack.pop() {
            if node.kind() == "identifier" && &text[node.byte_range()] == "y" {
                y = Some(node);
                break;
            }
            for i in 0..node.child_count() {
                stack.push(node.child(i).unwrap());
            }
        }
        assert_eq!(info.parameter_for_node(y.unwrap()), Some("b"));
    }

    #[test]
    fn test_parameters_of_reads_defaults_and_dots() {
        let text = "function(x, n = 10, ...) x";
        let tree = parse_r(text).unwrap();
        let def = tree.root_node().child(0).unwrap();
        let params = parameters_of(def, text);
        assert_eq!(params.len(), 3);
        assert_eq!(params[0].name, "x");
        assert_eq!(params[1].default.as_deref(), Some("10"));
        assert!(params[2].is_dots);
    }

    #[test]
    fn test_call_with_no_arguments() {
        let (_, info) = match_call("f()", &["a", "b"]);
        assert!(info.arguments().is_empty());
        assert!(info.argument_for("a").is_none());
    }
}
