//
// cfg/builder.rs
//
// Structural traversal of a parsed scope emitting the instruction graph.
// Instructions are emitted in evaluation (post) order: operands before the
// expression that consumes them. Abrupt exits (`return`, `break`, `next`)
// park pending edges that loop exits and the scope exit pick up later.
//

use std::collections::HashMap;

use tree_sitter::Node;

use super::{
    next_graph_id, ControlFlow, IdentifierRole, Instruction, InstructionElement, LoopKind,
};
use crate::parser_pool::node_text;

/// Build the control-flow graph for one scope: a `program` root or a
/// `function_definition` node. Function literals encountered inside the
/// scope stay terminal; their bodies get their own graphs.
///
/// Construction never fails: ERROR and missing nodes degrade to no-op
/// placeholder instructions.
pub fn build_control_flow(text: &str, scope: Node<'_>) -> ControlFlow {
    let mut builder = GraphBuilder::new(text);
    match scope.kind() {
        "function_definition" => {
            if let Some(params) = scope.child_by_field_name("parameters") {
                let mut cursor = params.walk();
                for param in params.children(&mut cursor) {
                    if param.kind() != "parameter" {
                        continue;
                    }
                    if let Some(default) = param.child_by_field_name("default") {
                        builder.visit(default);
                    }
                    if let Some(name) = param.child_by_field_name("name") {
                        let name = node_text(name, text).to_string();
                        builder.start_node(Some(param), InstructionElement::Parameter { name });
                    }
                }
            }
            if let Some(body) = scope.child_by_field_name("body") {
                builder.visit(body);
            }
            let exit = builder.start_node(Some(scope), InstructionElement::ScopeExit);
            builder.connect_pending_to_exit(exit);
        }
        _ => {
            let mut cursor = scope.walk();
            for child in scope.named_children(&mut cursor) {
                if !child.is_extra() {
                    builder.visit(child);
                }
            }
            // Top-level `return` has nowhere to land; its flow just ends.
            builder.pending.clear();
        }
    }
    ControlFlow::new(builder.instructions, builder.by_node)
}

struct GraphBuilder<'t> {
    text: &'t str,
    graph_id: u64,
    instructions: Vec<Instruction>,
    by_node: HashMap<usize, usize>,
    prev: Option<usize>,
    /// (loop node id or None for scope exit, instruction awaiting an edge)
    pending: Vec<(Option<usize>, usize)>,
    loops: Vec<usize>,
}

impl<'t> GraphBuilder<'t> {
    fn new(text: &'t str) -> Self {
        let graph_id = next_graph_id();
        let entry = Instruction {
            num: 0,
            graph_id,
            node_id: None,
            range: None,
            element: InstructionElement::Entry,
            succ: Vec::new(),
            pred: Vec::new(),
        };
        Self {
            text,
            graph_id,
            instructions: vec![entry],
            by_node: HashMap::new(),
            prev: Some(0),
            pending: Vec::new(),
            loops: Vec::new(),
        }
    }

    fn start_node(&mut self, node: Option<Node<'_>>, element: InstructionElement) -> usize {
        let num = self.instructions.len();
        self.instructions.push(Instruction {
            num,
            graph_id: self.graph_id,
            node_id: node.map(|n| n.id()),
            range: node.map(|n| n.start_byte()..n.end_byte()),
            element,
            succ: Vec::new(),
            pred: Vec::new(),
        });
        if let Some(node) = node {
            self.by_node.insert(node.id(), num);
        }
        if let Some(prev) = self.prev {
            self.add_edge(prev, num);
        }
        self.prev = Some(num);
        num
    }

    fn add_edge(&mut self, from: usize, to: usize) {
        if !self.instructions[from].succ.contains(&to) {
            self.instructions[from].succ.push(to);
            self.instructions[to].pred.push(from);
        }
    }

    fn flow_abrupted(&mut self) {
        self.prev = None;
    }

    fn connect_pending_to_exit(&mut self, exit: usize) {
        let pending = std::mem::take(&mut self.pending);
        for (scope, instruction) in pending {
            if scope.is_none() {
                self.add_edge(instruction, exit);
            }
        }
    }

    fn visit(&mut self, node: Node<'_>) {
        if node.is_missing() {
            self.start_node(Some(node), InstructionElement::Placeholder);
            return;
        }
        match node.kind() {
            "ERROR" => {
                self.visit_named_children(node);
                self.start_node(Some(node), InstructionElement::Placeholder);
            }
            "binary_operator" => self.visit_binary(node),
            "call" => self.visit_call(node),
            "braced_expression" => {
                self.visit_named_children(node);
                self.start_node(Some(node), InstructionElement::Block);
            }
            "if_statement" => self.visit_if(node),
            "for_statement" => self.visit_for(node),
            "while_statement" => self.visit_while(node),
            "repeat_statement" => self.visit_repeat(node),
            "function_definition" => {
                // Terminal in the enclosing scope; body graphs are built on demand.
                self.start_node(Some(node), InstructionElement::FunctionDef);
            }
            "break" => {
                let num = self.start_node(Some(node), InstructionElement::Break);
                if let Some(&loop_id) = self.loops.last() {
                    self.pending.push((Some(loop_id), num));
                    self.flow_abrupted();
                }
            }
            "next" => {
                let num = self.start_node(Some(node), InstructionElement::Next);
                if let Some(&loop_id) = self.loops.last() {
                    self.pending.push((Some(loop_id), num));
                    self.flow_abrupted();
                }
            }
            "identifier" => {
                let name = node_text(node, self.text).to_string();
                let role = identifier_role(node);
                self.start_node(Some(node), InstructionElement::Identifier { name, role });
            }
            "string" | "integer" | "float" | "complex" | "true" | "false" | "null" | "inf"
            | "nan" | "na" | "dots" => {
                self.start_node(Some(node), InstructionElement::Literal);
            }
            "namespace_operator" => {
                // `pkg::name` is an atomic reference, not two variable reads.
                self.start_node(Some(node), InstructionElement::Other);
            }
            "extract_operator" => {
                // `x$field` / `x@slot`: only the object side is evaluated as
                // a variable; the member name is not a read.
                let mut cursor = node.walk();
                if let Some(first) = node.named_children(&mut cursor).find(|c| !c.is_extra()) {
                    self.visit(first);
                }
                self.start_node(Some(node), InstructionElement::Other);
            }
            "subset" | "subset2" => {
                if let Some(function) = node.child_by_field_name("function") {
                    self.visit(function);
                }
                if let Some(arguments) = node.child_by_field_name("arguments") {
                    self.visit_argument_values(arguments);
                }
                self.start_node(Some(node), InstructionElement::Other);
            }
            "unary_operator" => {
                if let Some(rhs) = node.child_by_field_name("rhs") {
                    self.visit(rhs);
                }
                self.start_node(Some(node), InstructionElement::Other);
            }
            "parenthesized_expression" => {
                if let Some(body) = node.child_by_field_name("body") {
                    self.visit(body);
                }
            }
            "comment" => {}
            _ => self.visit_named_children(node),
        }
    }

    fn visit_named_children(&mut self, node: Node<'_>) {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node
            .named_children(&mut cursor)
            .filter(|c| !c.is_extra())
            .collect();
        for child in children {
            self.visit(child);
        }
    }

    fn visit_binary(&mut self, node: Node<'_>) {
        let op = node
            .child_by_field_name("operator")
            .map(|o| node_text(o, self.text));
        let (target, value) = match op {
            Some("<-") | Some("<<-") | Some("=") => (
                node.child_by_field_name("lhs"),
                node.child_by_field_name("rhs"),
            ),
            Some("->") | Some("->>") => (
                node.child_by_field_name("rhs"),
                node.child_by_field_name("lhs"),
            ),
            _ => {
                if let Some(lhs) = node.child_by_field_name("lhs") {
                    self.visit(lhs);
                }
                if let Some(rhs) = node.child_by_field_name("rhs") {
                    self.visit(rhs);
                }
                self.start_node(Some(node), InstructionElement::Other);
                return;
            }
        };
        if let Some(value) = value {
            self.visit(value);
        }
        if let Some(target) = target {
            self.visit(target);
        }
        let target_name = target
            .filter(|t| t.kind() == "identifier")
            .map(|t| node_text(t, self.text).to_string());
        let closure = matches!(op, Some("<<-") | Some("->>"));
        self.start_node(
            Some(node),
            InstructionElement::Assignment {
                target: target_name,
                closure,
            },
        );
    }

    fn visit_call(&mut self, node: Node<'_>) {
        let callee = node.child_by_field_name("function");
        let fname = callee.and_then(|c| callee_name(c, self.text));
        if fname.as_deref() == Some("return") {
            if let Some(arguments) = node.child_by_field_name("arguments") {
                self.visit_argument_values(arguments);
            }
            let num = self.start_node(Some(node), InstructionElement::Return);
            self.pending.push((None, num));
            self.flow_abrupted();
            return;
        }
        if let Some(callee) = callee {
            self.visit(callee);
        }
        if let Some(arguments) = node.child_by_field_name("arguments") {
            self.visit_argument_values(arguments);
        }
        let element = if fname.as_deref() == Some("source") {
            InstructionElement::SourceCall {
                path: source_call_path(node, self.text),
            }
        } else {
            InstructionElement::Call { function: fname }
        };
        self.start_node(Some(node), element);
    }

    /// Visit only the value side of each argument: named-argument names are
    /// parameter references, not variable reads.
    fn visit_argument_values(&mut self, arguments: Node<'_>) {
        let mut cursor = arguments.walk();
        let values: Vec<Node<'_>> = arguments
            .children(&mut cursor)
            .filter(|c| c.kind() == "argument")
            .filter_map(|a| a.child_by_field_name("value"))
            .collect();
        for value in values {
            self.visit(value);
        }
    }

    fn visit_if(&mut self, node: Node<'_>) {
        if let Some(condition) = node.child_by_field_name("condition") {
            self.visit(condition);
        }
        let condition = self.prev;
        let mut then_end = None;
        if let Some(consequence) = node.child_by_field_name("consequence") {
            self.visit(consequence);
            then_end = self.prev;
        }
        self.prev = condition;
        if let Some(alternative) = node.child_by_field_name("alternative") {
            self.visit(alternative);
        }
        let end = self.start_node(Some(node), InstructionElement::If);
        if let Some(then_end) = then_end {
            self.add_edge(then_end, end);
        }
    }

    fn visit_for(&mut self, node: Node<'_>) {
        if let Some(sequence) = node.child_by_field_name("sequence") {
            self.visit(sequence);
        }
        if let Some(variable) = node.child_by_field_name("variable") {
            self.visit(variable);
        }
        let entry = self.prev;
        self.loops.push(node.id());
        if let Some(body) = node.child_by_field_name("body") {
            self.visit(body);
        }
        self.loops.pop();
        let last = self.prev;
        let exit = self.start_node(Some(node), InstructionElement::Loop { kind: LoopKind::For });
        self.handle_loop(entry, last, exit, node.id(), true);
    }

    fn visit_while(&mut self, node: Node<'_>) {
        let first_new = self.instructions.len();
        self.loops.push(node.id());
        if let Some(condition) = node.child_by_field_name("condition") {
            self.visit(condition);
        }
        if let Some(body) = node.child_by_field_name("body") {
            self.visit(body);
        }
        self.loops.pop();
        let entry = (self.instructions.len() > first_new).then_some(first_new);
        let last = self.prev;
        let exit = self.start_node(
            Some(node),
            InstructionElement::Loop {
                kind: LoopKind::While,
            },
        );
        self.handle_loop(entry, last, exit, node.id(), true);
    }

    fn visit_repeat(&mut self, node: Node<'_>) {
        let first_new = self.instructions.len();
        self.loops.push(node.id());
        if let Some(body) = node.child_by_field_name("body") {
            self.visit(body);
        }
        self.loops.pop();
        let entry = (self.instructions.len() > first_new).then_some(first_new);
        let last = self.prev;
        let exit = self.start_node(
            Some(node),
            InstructionElement::Loop {
                kind: LoopKind::Repeat,
            },
        );
        // Unlike for/while there is no zero-iteration edge: repeat always
        // runs its body at least once.
        self.handle_loop(entry, last, exit, node.id(), false);
    }

    fn handle_loop(
        &mut self,
        entry: Option<usize>,
        last: Option<usize>,
        exit: usize,
        loop_id: usize,
        implicit_exit: bool,
    ) {
        let pending = std::mem::take(&mut self.pending);
        for (scope, instruction) in pending {
            if scope == Some(loop_id) {
                match self.instructions[instruction].element {
                    InstructionElement::Break => self.add_edge(instruction, exit),
                    InstructionElement::Next => {
                        if let Some(entry) = entry {
                            self.add_edge(instruction, entry);
                        }
                    }
                    _ => {}
                }
            } else {
                self.pending.push((scope, instruction));
            }
        }
        if let (Some(last), Some(entry)) = (last, entry) {
            self.add_edge(last, entry);
        }
        if implicit_exit {
            if let Some(entry) = entry {
                self.add_edge(entry, exit);
            }
        }
    }
}

fn identifier_role(node: Node<'_>) -> IdentifierRole {
    if let Some(parent) = node.parent() {
        match parent.kind() {
            "binary_operator" => {
                // The assignee side is a write carried by the assignment
                // instruction; operator direction decides which side.
                let lhs = parent.child_by_field_name("lhs");
                let rhs = parent.child_by_field_name("rhs");
                let op_is = |ops: &[&str]| {
                    parent
                        .child_by_field_name("operator")
                        .map(|o| ops.contains(&o.kind()))
                        .unwrap_or(false)
                };
                let is_lhs = lhs.map(|l| l.id() == node.id()).unwrap_or(false);
                let is_rhs = rhs.map(|r| r.id() == node.id()).unwrap_or(false);
                if (is_lhs && op_is(&["<-", "<<-", "="])) || (is_rhs && op_is(&["->", "->>"])) {
                    return IdentifierRole::AssignTarget;
                }
            }
            "for_statement" => {
                if parent
                    .child_by_field_name("variable")
                    .map(|v| v.id() == node.id())
                    .unwrap_or(false)
                {
                    return IdentifierRole::ForTarget;
                }
            }
            _ => {}
        }
    }
    IdentifierRole::Read
}

/// Statically readable callee name: a plain identifier, or the `name` side
/// of `pkg::name` / `pkg:::name`.
pub(crate) fn callee_name(callee: Node<'_>, text: &str) -> Option<String> {
    match callee.kind() {
        "identifier" => Some(node_text(callee, text).to_string()),
        "namespace_operator" => callee
            .child_by_field_name("rhs")
            .map(|r| node_text(r, text).to_string()),
        _ => None,
    }
}

/// The string-literal path of a `source()` call: the `file` named argument
/// or the first positional argument.
fn source_call_path(call: Node<'_>, text: &str) -> Option<String> {
    let arguments = call.child_by_field_name("arguments")?;
    let mut cursor = arguments.walk();
    let mut positional = None;
    for argument in arguments.children(&mut cursor) {
        if argument.kind() != "argument" {
            continue;
        }
        let name = argument
            .child_by_field_name("name")
            .map(|n| node_text(n, text));
        let value = argument.child_by_field_name("value");
        match name {
            Some("file") => return value.and_then(|v| string_value(v, text)),
            Some(_) => {}
            None => {
                if positional.is_none() {
                    positional = value;
                }
            }
        }
    }
    positional.and_then(|v| string_value(v, text))
}

pub(crate) fn string_value(node: Node<'_>, text: &str) -> Option<String> {
    if node.kind() != "string" {
        return None;
    }
    let mut cursor = node.walk();
    let content = node
        .children(&mut cursor)
        .find(|c| c.kind() == "string_content");
    match content {
        Some(content) => Some(node_text(content, text).to_string()),
        // Empty string literal: no string_content child.
        None => Some(String::new()),
    }
}
