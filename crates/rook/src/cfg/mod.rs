//
// cfg/mod.rs
//
// Control-flow graph over parsed R syntax: instruction graph, reachability,
// and entry-point resolution. One graph is built per scope (file or function
// body); function literal bodies are never inlined into the enclosing graph.
//

pub mod builder;
pub mod local_analysis;

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use fixedbitset::FixedBitSet;
use tree_sitter::Node;

pub use builder::build_control_flow;
pub use local_analysis::{
    analyze_scopes, IncludedSources, LocalAnalysisResult, LocalVariableInfo, ScopeAnalyses,
    VariableDefinition, VariableDescription, VariableId,
};

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// How an identifier instruction participates in data flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierRole {
    /// Plain use of a variable.
    Read,
    /// Left-hand side of an assignment (the write is carried by the
    /// assignment instruction itself).
    AssignTarget,
    /// Loop variable of a `for` statement; binds at this instruction.
    ForTarget,
}

/// Which loop construct an exit instruction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    For,
    While,
    Repeat,
}

/// Summary of the syntax construct an instruction evaluates, captured at
/// build time so data-flow passes never re-walk the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionElement {
    /// Synthetic entry instruction 0.
    Entry,
    /// Final instruction of the scope (the scope's own node).
    ScopeExit,
    /// Assignment; `target` is the assignee name when it is a plain
    /// identifier, `closure` marks `<<-`/`->>` forms.
    Assignment {
        target: Option<String>,
        closure: bool,
    },
    /// Function parameter binding (inside a function scope's graph).
    Parameter { name: String },
    Identifier {
        name: String,
        role: IdentifierRole,
    },
    Call { function: Option<String> },
    /// A recognized `source()` call pulling in another file.
    SourceCall { path: Option<String> },
    /// Function literal: a single terminal instruction in the enclosing
    /// scope; its body is a separate, lazily built graph.
    FunctionDef,
    Loop { kind: LoopKind },
    If,
    Block,
    Break,
    Next,
    Return,
    Literal,
    /// ERROR or missing syntax degraded to a no-op placeholder.
    Placeholder,
    Other,
}

/// One node of a control-flow graph.
#[derive(Debug, Clone)]
pub struct Instruction {
    num: usize,
    graph_id: u64,
    node_id: Option<usize>,
    range: Option<Range<usize>>,
    element: InstructionElement,
    succ: Vec<usize>,
    pred: Vec<usize>,
}

impl Instruction {
    pub fn num(&self) -> usize {
        self.num
    }

    /// Stable id of the syntax node this instruction evaluates, if any.
    pub fn node_id(&self) -> Option<usize> {
        self.node_id
    }

    pub fn range(&self) -> Option<Range<usize>> {
        self.range.clone()
    }

    pub fn element(&self) -> &InstructionElement {
        &self.element
    }

    pub fn successors(&self) -> &[usize] {
        &self.succ
    }

    pub fn predecessors(&self) -> &[usize] {
        &self.pred
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preds: Vec<String> = self.pred.iter().map(|p| p.to_string()).collect();
        write!(f, "{}({}) {:?}", self.num, preds.join(","), self.element)
    }
}

/// An immutable control-flow graph plus its derived reachability bitset.
pub struct ControlFlow {
    graph_id: u64,
    instructions: Vec<Instruction>,
    reachable: FixedBitSet,
    by_node: HashMap<usize, usize>,
}

impl ControlFlow {
    pub(crate) fn new(instructions: Vec<Instruction>, by_node: HashMap<usize, usize>) -> Self {
        let graph_id = instructions
            .first()
            .map(|i| i.graph_id)
            .unwrap_or_else(next_graph_id);
        let reachable = compute_reachable(&instructions);
        Self {
            graph_id,
            instructions,
            reachable,
            by_node,
        }
    }

    pub fn graph_id(&self) -> u64 {
        self.graph_id
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// The instruction evaluating the node with the given stable id.
    pub fn instruction_for_node(&self, node_id: usize) -> Option<&Instruction> {
        self.by_node.get(&node_id).map(|&i| &self.instructions[i])
    }

    /// Whether an instruction of this graph is reachable from instruction 0.
    ///
    /// Panics if `instruction` belongs to a different graph: cross-graph
    /// queries are a precondition violation, never a silent default.
    pub fn is_reachable(&self, instruction: &Instruction) -> bool {
        assert_eq!(
            instruction.graph_id, self.graph_id,
            "reachability queried with an instruction from another control-flow graph"
        );
        self.reachable.contains(instruction.num)
    }

    /// Reachability by instruction index within this graph.
    pub fn is_reachable_index(&self, num: usize) -> bool {
        self.reachable.contains(num)
    }

    /// The instruction where evaluation of `element` actually begins.
    ///
    /// For an assignment this is the entry point of the assigned value; for
    /// a `for` loop, of the iterated range; a function literal answers with
    /// its own instruction. Statement containers (blocks, `if`) descend into
    /// their first evaluated sub-expression; everything else answers with
    /// its own instruction when it has one.
    pub fn entry_point(&self, element: Node<'_>, text: &str) -> Option<&Instruction> {
        match element.kind() {
            "binary_operator" => {
                let op = element
                    .child_by_field_name("operator")
                    .map(|o| &text[o.start_byte()..o.end_byte()]);
                match op {
                    Some("<-") | Some("<<-") | Some("=") => {
                        let value = element.child_by_field_name("rhs");
                        self.entry_of_child(value, element, text)
                    }
                    Some("->") | Some("->>") => {
                        let value = element.child_by_field_name("lhs");
                        self.entry_of_child(value, element, text)
                    }
                    _ => self.own_or_descend(element, text),
                }
            }
            "for_statement" => {
                self.entry_of_child(element.child_by_field_name("sequence"), element, text)
            }
            "function_definition" => self.instruction_for_node(element.id()),
            "braced_expression" | "program" => {
                let mut cursor = element.walk();
                for child in element.named_children(&mut cursor) {
                    if child.is_extra() {
                        continue;
                    }
                    if let Some(found) = self.entry_point(child, text) {
                        return Some(found);
                    }
                }
                self.instruction_for_node(element.id())
            }
            "if_statement" => {
                self.entry_of_child(element.child_by_field_name("condition"), element, text)
            }
            "parenthesized_expression" => {
                self.entry_of_child(element.child_by_field_name("body"), element, text)
            }
            _ => self.own_or_descend(element, text),
        }
    }

    fn entry_of_child(
        &self,
        child: Option<Node<'_>>,
        element: Node<'_>,
        text: &str,
    ) -> Option<&Instruction> {
        child
            .and_then(|c| self.entry_point(c, text))
            .or_else(|| self.instruction_for_node(element.id()))
    }

    fn own_or_descend(&self, element: Node<'_>, text: &str) -> Option<&Instruction> {
        if let Some(instruction) = self.instruction_for_node(element.id()) {
            return Some(instruction);
        }
        let mut cursor = element.walk();
        for child in element.named_children(&mut cursor) {
            if child.is_extra() {
                continue;
            }
            if let Some(found) = self.entry_point(child, text) {
                return Some(found);
            }
        }
        None
    }
}

pub(crate) fn next_graph_id() -> u64 {
    NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed)
}

fn compute_reachable(instructions: &[Instruction]) -> FixedBitSet {
    let mut reachable = FixedBitSet::with_capacity(instructions.len());
    if instructions.is_empty() {
        return reachable;
    }
    let mut stack = vec![0usize];
    reachable.insert(0);
    while let Some(num) = stack.pop() {
        for &succ in &instructions[num].succ {
            if !reachable.contains(succ) {
                reachable.insert(succ);
                stack.push(succ);
            }
        }
    }
    reachable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser_pool::parse_r;

    fn file_flow(text: &str) -> (tree_sitter::Tree, ControlFlow) {
        let tree = parse_r(text).unwrap();
        let flow = build_control_flow(text, tree.root_node());
        (tree, flow)
    }

    #[test]
    fn test_straight_line_chain_has_n_plus_one_instructions() {
        // Three single-instruction statements plus the synthetic entry.
        let text = "1\n2\n3";
        let (_tree, flow) = file_flow(text);
        assert_eq!(flow.instructions().len(), 4);
        for (i, instruction) in flow.instructions().iter().enumerate() {
            assert!(flow.is_reachable(instruction), "instruction {i} unreachable");
            if i > 0 {
                assert_eq!(instruction.predecessors(), &[i - 1]);
            }
        }
    }

    #[test]
    fn test_reachability_iff_path_from_entry() {
        let text = "repeat next\n2";
        let (_tree, flow) = file_flow(text);
        // The body always jumps back to the loop entry, so the loop exit
        // and everything after it have no path from instruction 0.
        let dead: Vec<_> = flow
            .instructions()
            .iter()
            .filter(|i| !flow.is_reachable(i))
            .collect();
        assert!(!dead.is_empty(), "expected unreachable code after repeat next");
    }

    #[test]
    #[should_panic(expected = "another control-flow graph")]
    fn test_cross_graph_reachability_query_panics() {
        let (_t1, flow1) = file_flow("1");
        let (_t2, flow2) = file_flow("2");
        let foreign = &flow2.instructions()[0];
        let _ = flow1.is_reachable(foreign);
    }

    #[test]
    fn test_entry_point_of_assignment_is_assigned_value() {
        let text = "x <- f(1)";
        let (tree, flow) = file_flow(text);
        let assignment = tree.root_node().child(0).unwrap();
        let entry = flow.entry_point(assignment, text).unwrap();
        let call = assignment.child_by_field_name("rhs").unwrap();
        assert_eq!(entry.node_id(), Some(call.id()));
        assert!(matches!(entry.element(), InstructionElement::Call { .. }));
    }

    #[test]
    fn test_entry_point_of_for_is_range_expression() {
        let text = "for (i in xs) i";
        let (tree, flow) = file_flow(text);
        let for_node = tree.root_node().child(0).unwrap();
        let entry = flow.entry_point(for_node, text).unwrap();
        let range = for_node.child_by_field_name("sequence").unwrap();
        assert_eq!(entry.node_id(), Some(range.id()));
    }

    #[test]
    fn test_entry_point_of_function_literal_is_itself() {
        let text = "function(x) x";
        let (tree, flow) = file_flow(text);
        let func = tree.root_node().child(0).unwrap();
        let entry = flow.entry_point(func, text).unwrap();
        assert_eq!(entry.node_id(), Some(func.id()));
        assert!(matches!(entry.element(), InstructionElement::FunctionDef));
    }
}
