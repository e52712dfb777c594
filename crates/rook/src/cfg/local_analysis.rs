//
// cfg/local_analysis.rs
//
// Local-variable data flow over a scope's control-flow graph: which names
// are bound at each instruction, where they were first defined, which
// reads cross a function boundary (closure capture), and which other files
// a `source()` call has pulled in at each point.
//

use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

use tree_sitter::Node;

use super::{ControlFlow, IdentifierRole, InstructionElement};

/// Index into the shared [`ScopeAnalyses::variables`] arena.
pub type VariableId = usize;

/// One variable: its name, the scope that owns it, and every read/write
/// site recorded during the pass.
#[derive(Debug, Clone)]
pub struct VariableDescription {
    pub name: String,
    /// Node id of the owning scope (function definition or file root).
    pub scope_id: usize,
    /// Instruction (within the owning scope's graph) of the first binding.
    pub first_definition: usize,
    pub first_definition_range: Option<Range<usize>>,
    /// (scope node id, instruction num) pairs.
    pub reads: Vec<(usize, usize)>,
    pub writes: Vec<(usize, usize)>,
}

/// A binding visible at some instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableDefinition {
    pub variable: VariableId,
    /// False when at least one joined path reaches the instruction without
    /// the binding.
    pub is_always_initialized: bool,
}

/// Bindings visible at one instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalVariableInfo {
    pub variables: HashMap<String, VariableDefinition>,
}

impl LocalVariableInfo {
    pub fn get(&self, name: &str) -> Option<&VariableDefinition> {
        self.variables.get(name)
    }
}

/// Files logically included (via `source()`) at one instruction.
pub type IncludedSources = BTreeSet<String>;

/// Per-scope analysis output: one info record and one included-sources set
/// per instruction, plus the free variables captured from outer scopes.
#[derive(Debug, Clone)]
pub struct LocalAnalysisResult {
    pub scope_id: usize,
    pub infos: Vec<LocalVariableInfo>,
    pub included: Vec<IncludedSources>,
    pub closure: HashSet<VariableId>,
}

impl LocalAnalysisResult {
    /// State at the end of the scope.
    pub fn exit_info(&self) -> LocalVariableInfo {
        self.infos.last().cloned().unwrap_or_default()
    }
}

/// Whole-file analysis: results for the file scope and every nested
/// function scope, over a shared variable arena.
#[derive(Debug, Clone, Default)]
pub struct ScopeAnalyses {
    pub variables: Vec<VariableDescription>,
    pub scopes: HashMap<usize, LocalAnalysisResult>,
}

impl ScopeAnalyses {
    pub fn scope(&self, scope_id: usize) -> Option<&LocalAnalysisResult> {
        self.scopes.get(&scope_id)
    }

    pub fn variable(&self, id: VariableId) -> &VariableDescription {
        &self.variables[id]
    }
}

/// Analyze `scope` and, recursively, every function literal inside it.
/// Inner scopes receive the enclosing scope's exit state as their input, so
/// bindings flow inward for closure resolution.
///
/// `flow_for` supplies the control-flow graph for each scope node; callers
/// with a cache (see `Document`) pass their cached lookup.
pub fn analyze_scopes<'t, F>(scope: Node<'t>, flow_for: &mut F) -> ScopeAnalyses
where
    F: FnMut(Node<'t>) -> Arc<ControlFlow>,
{
    let mut analyses = ScopeAnalyses::default();
    analyze_one(scope, LocalVariableInfo::default(), flow_for, &mut analyses);
    analyses
}

fn analyze_one<'t, F>(
    scope: Node<'t>,
    input: LocalVariableInfo,
    flow_for: &mut F,
    analyses: &mut ScopeAnalyses,
) -> HashSet<VariableId>
where
    F: FnMut(Node<'t>) -> Arc<ControlFlow>,
{
    let flow = flow_for(scope);
    let scope_id = scope.id();
    let count = flow.instructions().len();

    let mut infos: Vec<LocalVariableInfo> = Vec::with_capacity(count);
    let mut included: Vec<IncludedSources> = Vec::with_capacity(count);
    let mut name_map: HashMap<String, VariableId> = HashMap::new();
    let mut closure: HashSet<VariableId> = HashSet::new();
    let mut inner_functions: Vec<usize> = Vec::new();

    infos.push(input);
    included.push(IncludedSources::new());

    for num in 1..count {
        let instruction = &flow.instructions()[num];
        let preds: Vec<usize> = instruction
            .predecessors()
            .iter()
            .copied()
            .filter(|&p| flow.is_reachable_index(p) && p < num)
            .collect();
        let mut info = join(&infos, &preds);
        included.push(join_included(&flow, &included, &preds));

        match instruction.element() {
            InstructionElement::Assignment {
                target: Some(name),
                closure: closure_assign,
            } => {
                add_write(
                    name,
                    *closure_assign,
                    num,
                    instruction.range(),
                    scope_id,
                    &mut info,
                    &mut name_map,
                    &mut analyses.variables,
                );
            }
            InstructionElement::Parameter { name } => {
                add_write(
                    name,
                    false,
                    num,
                    instruction.range(),
                    scope_id,
                    &mut info,
                    &mut name_map,
                    &mut analyses.variables,
                );
            }
            InstructionElement::Identifier { name, role } => match role {
                IdentifierRole::ForTarget => {
                    add_write(
                        name,
                        false,
                        num,
                        instruction.range(),
                        scope_id,
                        &mut info,
                        &mut name_map,
                        &mut analyses.variables,
                    );
                }
                IdentifierRole::Read => {
                    if let Some(def) = info.variables.get(name) {
                        let variable = def.variable;
                        if analyses.variables[variable].scope_id != scope_id {
                            closure.insert(variable);
                        }
                        analyses.variables[variable].reads.push((scope_id, num));
                    }
                }
                IdentifierRole::AssignTarget => {}
            },
            InstructionElement::FunctionDef => {
                if let Some(node_id) = instruction.node_id() {
                    inner_functions.push(node_id);
                }
            }
            _ => {}
        }
        infos.push(info);
    }

    let exit_info = infos.last().cloned().unwrap_or_default();
    for node_id in inner_functions {
        let Some(inner) = find_node_by_id(scope, node_id) else {
            continue;
        };
        let inner_closure = analyze_one(inner, exit_info.clone(), flow_for, analyses);
        for variable in inner_closure {
            if analyses.variables[variable].scope_id != scope_id {
                closure.insert(variable);
            }
        }
    }

    analyses.scopes.insert(
        scope_id,
        LocalAnalysisResult {
            scope_id,
            infos,
            included,
            closure: closure.clone(),
        },
    );
    closure
}

#[allow(clippy::too_many_arguments)]
fn add_write(
    name: &str,
    closure_assign: bool,
    num: usize,
    range: Option<Range<usize>>,
    scope_id: usize,
    info: &mut LocalVariableInfo,
    name_map: &mut HashMap<String, VariableId>,
    variables: &mut Vec<VariableDescription>,
) {
    let existing = info.variables.get(name).map(|d| d.variable);
    let rebind = match existing {
        None => true,
        // A plain write shadows an outer binding; `<<-` targets it instead.
        Some(variable) => variables[variable].scope_id != scope_id && !closure_assign,
    };
    if rebind {
        let variable = *name_map.entry(name.to_string()).or_insert_with(|| {
            variables.push(VariableDescription {
                name: name.to_string(),
                scope_id,
                first_definition: num,
                first_definition_range: range,
                reads: Vec::new(),
                writes: vec![(scope_id, num)],
            });
            variables.len() - 1
        });
        info.variables.insert(
            name.to_string(),
            VariableDefinition {
                variable,
                is_always_initialized: true,
            },
        );
    } else if let Some(variable) = existing {
        variables[variable].writes.push((scope_id, num));
    }
}

fn join(infos: &[LocalVariableInfo], preds: &[usize]) -> LocalVariableInfo {
    match preds {
        [] => LocalVariableInfo::default(),
        [single] => infos[*single].clone(),
        _ => {
            let mut names: Vec<&str> = Vec::new();
            for &p in preds {
                for name in infos[p].variables.keys() {
                    if !names.contains(&name.as_str()) {
                        names.push(name);
                    }
                }
            }
            let mut variables = HashMap::with_capacity(names.len());
            for name in names {
                let Some(definition) = preds
                    .iter()
                    .find_map(|&p| infos[p].variables.get(name))
                    .copied()
                else {
                    continue;
                };
                let is_always_initialized = preds.iter().all(|&p| {
                    infos[p]
                        .variables
                        .get(name)
                        .map(|d| d.is_always_initialized)
                        .unwrap_or(false)
                });
                variables.insert(
                    name.to_string(),
                    VariableDefinition {
                        variable: definition.variable,
                        is_always_initialized,
                    },
                );
            }
            LocalVariableInfo { variables }
        }
    }
}

fn join_included(
    flow: &ControlFlow,
    included: &[IncludedSources],
    preds: &[usize],
) -> IncludedSources {
    let mut out = IncludedSources::new();
    for &p in preds {
        out.extend(included[p].iter().cloned());
        if let InstructionElement::SourceCall { path: Some(path) } = flow.instructions()[p].element()
        {
            out.insert(path.clone());
        }
    }
    out
}

/// Depth-first search for a node by its stable id within `root`'s subtree.
pub(crate) fn find_node_by_id<'t>(root: Node<'t>, id: usize) -> Option<Node<'t>> {
    if root.id() == id {
        return Some(root);
    }
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if let Some(found) = find_node_by_id(child, id) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build_control_flow;
    use crate::parser_pool::parse_r;

    fn analyze(text: &str) -> (tree_sitter::Tree, ScopeAnalyses) {
        let tree = parse_r(text).unwrap();
        let root = tree.root_node();
        let analyses = analyze_scopes(root, &mut |node| Arc::new(build_control_flow(text, node)));
        (tree, analyses)
    }

    fn info_at_exit<'a>(analyses: &'a ScopeAnalyses, scope_id: usize) -> LocalVariableInfo {
        analyses.scope(scope_id).unwrap().exit_info()
    }

    #[test]
    fn test_assignment_binds_variable_at_file_scope() {
        let text = "x <- 1\ny <- x";
        let (tree, analyses) = analyze(text);
        let info = info_at_exit(&analyses, tree.root_node().id());
        let x = info.get("x").expect("x bound");
        assert!(x.is_always_initialized);
        let desc = analyses.variable(x.variable);
        assert_eq!(desc.name, "x");
        assert_eq!(desc.scope_id, tree.root_node().id());
        assert_eq!(desc.reads.len(), 1, "y <- x reads x once");
    }

    #[test]
    fn test_branch_binding_is_not_always_initialized() {
        let text = "if (p) x <- 1\nx";
        let (tree, analyses) = analyze(text);
        let result = analyses.scope(tree.root_node().id()).unwrap();
        // At the final read of x, one path never bound it.
        let read_num = result.infos.len() - 1;
        let x = result.infos[read_num].get("x").expect("x joined in");
        assert!(!x.is_always_initialized);
    }

    #[test]
    fn test_both_branches_binding_is_always_initialized() {
        let text = "if (p) x <- 1 else x <- 2\nx";
        let (tree, analyses) = analyze(text);
        let result = analyses.scope(tree.root_node().id()).unwrap();
        let last = result.infos.last().unwrap();
        let x = last.get("x").expect("x bound on both paths");
        assert!(x.is_always_initialized);
    }

    #[test]
    fn test_parameter_binds_in_function_scope() {
        let text = "f <- function(a, b) a + b";
        let (tree, analyses) = analyze(text);
        let assignment = tree.root_node().child(0).unwrap();
        let func = assignment.child_by_field_name("rhs").unwrap();
        let result = analyses.scope(func.id()).expect("function scope analyzed");
        let exit = result.exit_info();
        for name in ["a", "b"] {
            let def = exit.get(name).expect("parameter bound");
            assert_eq!(analyses.variable(def.variable).scope_id, func.id());
        }
    }

    #[test]
    fn test_for_target_binds_loop_variable() {
        let text = "for (i in 1:10) i";
        let (tree, analyses) = analyze(text);
        let info = info_at_exit(&analyses, tree.root_node().id());
        assert!(info.get("i").is_some());
    }

    #[test]
    fn test_local_shadowing_creates_new_variable() {
        let text = "x <- 1\nf <- function() { x <- 2; x }";
        let (tree, analyses) = analyze(text);
        let assignment = tree.root_node().child(1).unwrap();
        let func = assignment.child_by_field_name("rhs").unwrap();
        let result = analyses.scope(func.id()).expect("function scope");
        let inner_x = result.exit_info().get("x").copied().expect("x in function");
        assert_eq!(
            analyses.variable(inner_x.variable).scope_id,
            func.id(),
            "plain assignment shadows the outer x"
        );
        // The shadowing binding never reads the outer one.
        assert!(result.closure.is_empty());
    }

    #[test]
    fn test_superassignment_writes_outer_variable() {
        let text = "x <- 1\nf <- function() { x <<- 2 }";
        let (tree, analyses) = analyze(text);
        let assignment = tree.root_node().child(1).unwrap();
        let func = assignment.child_by_field_name("rhs").unwrap();
        let result = analyses.scope(func.id()).expect("function scope");
        let x = result.exit_info().get("x").copied().expect("x visible");
        assert_eq!(
            analyses.variable(x.variable).scope_id,
            tree.root_node().id(),
            "<<- targets the file-scope x"
        );
        assert_eq!(analyses.variable(x.variable).writes.len(), 2);
    }

    #[test]
    fn test_closure_capture_recorded() {
        let text = "n <- 1\nf <- function() n + 1";
        let (tree, analyses) = analyze(text);
        let assignment = tree.root_node().child(1).unwrap();
        let func = assignment.child_by_field_name("rhs").unwrap();
        let result = analyses.scope(func.id()).expect("function scope");
        assert_eq!(result.closure.len(), 1);
        let captured = *result.closure.iter().next().unwrap();
        assert_eq!(analyses.variable(captured).name, "n");
    }

    #[test]
    fn test_nested_function_closure_bubbles_up() {
        let text = "n <- 1\nouter <- function() { inner <- function() n; inner }";
        let (tree, analyses) = analyze(text);
        let assignment = tree.root_node().child(1).unwrap();
        let outer = assignment.child_by_field_name("rhs").unwrap();
        let result = analyses.scope(outer.id()).expect("outer scope");
        // n is defined at file scope, so the capture propagates through outer.
        assert!(result
            .closure
            .iter()
            .any(|&v| analyses.variable(v).name == "n"));
    }

    #[test]
    fn test_included_sources_accumulate_downstream() {
        let text = "source(\"a.R\")\nx <- 1\nsource(\"b.R\")\ny <- 2";
        let (tree, analyses) = analyze(text);
        let result = analyses.scope(tree.root_node().id()).unwrap();
        let last = result.included.last().unwrap();
        assert!(last.contains("a.R"));
        assert!(last.contains("b.R"));
        // The first assignment sees only a.R.
        let first_with_a = result
            .included
            .iter()
            .position(|s| s.contains("a.R"))
            .unwrap();
        assert!(!result.included[first_with_a].contains("b.R"));
    }

    #[test]
    fn test_unreachable_code_gets_empty_state() {
        let text = "repeat next\nx <- 1\nx";
        let (tree, analyses) = analyze(text);
        let result = analyses.scope(tree.root_node().id()).unwrap();
        // The dead assignment still gets a record, with nothing joined in.
        let last = result.infos.last().unwrap();
        assert!(last.variables.is_empty());
    }
}
