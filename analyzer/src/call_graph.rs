//! Call graph over discovered callees (§4.11), used to detect recursion
//! for function summaries.
//!
//! Grounded on the teacher's `call_graph.rs`: same Tarjan-SCC recursion
//! detector, generalized from word-call statements to S-expression
//! application heads. spec.md's §4.11 literal wording ("recursion is
//! detected by presence of the function's own name in its body") only
//! requires direct self-recursion; we keep the teacher's SCC machinery so
//! mutual recursion is flagged too (`is_recursive` looks at the whole SCC,
//! not just the self-edge) — an enrichment, not a contradiction, per
//! SPEC_FULL.md §G.1.

use std::collections::{HashMap, HashSet};

use crate::forms::{self, Expr, Head};

/// Which functions call which, restricted to edges between known
/// (user-defined) function names — primitive/builtin calls never appear
/// as call-graph edges.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    edges: HashMap<String, HashSet<String>>,
    known: HashSet<String>,
    recursive_sccs: Vec<HashSet<String>>,
}

impl CallGraph {
    pub fn new() -> Self {
        CallGraph::default()
    }

    /// Record one function's body, scanning it for calls to any name in
    /// `known` (the full universe of user-defined function names).
    pub fn record(&mut self, name: &str, body: Expr<'_>, known: &HashSet<String>) {
        self.known = known.clone();
        let callees = extract_calls(body, known);
        self.edges.insert(name.to_string(), callees);
        self.recursive_sccs = find_sccs(&self.edges, &self.known);
    }

    pub fn callees(&self, name: &str) -> Option<&HashSet<String>> {
        self.edges.get(name)
    }

    /// `true` if `name` participates in a recursive cycle, direct or
    /// mutual.
    pub fn is_recursive(&self, name: &str) -> bool {
        self.recursive_sccs.iter().any(|scc| scc.contains(name))
    }

    pub fn are_mutually_recursive(&self, a: &str, b: &str) -> bool {
        self.recursive_sccs.iter().any(|scc| scc.contains(a) && scc.contains(b))
    }
}

fn extract_calls<'a>(expr: Expr<'a>, known: &HashSet<String>) -> HashSet<String> {
    let mut calls = HashSet::new();
    walk(expr, known, &mut calls);
    calls
}

fn walk<'a>(expr: Expr<'a>, known: &HashSet<String>, calls: &mut HashSet<String>) {
    if let Some((head, args)) = forms::classify(expr) {
        match head {
            Head::Quote => {}
            Head::Let | Head::LetStar | Head::Letrec => {
                if let Some(&bindings_list) = args.first() {
                    for (_, value_expr) in forms::parse_bindings(bindings_list) {
                        walk(value_expr, known, calls);
                    }
                }
                for &e in &args[1.min(args.len())..] {
                    walk(e, known, calls);
                }
            }
            Head::Lambda => {
                for &e in &args[1.min(args.len())..] {
                    walk(e, known, calls);
                }
            }
            _ => {
                for &e in &args {
                    walk(e, known, calls);
                }
            }
        }
        return;
    }

    if let Some((name, args)) = forms::application(expr) {
        if known.contains(name) {
            calls.insert(name.to_string());
        }
        for a in args {
            walk(a, known, calls);
        }
    }
}

fn find_sccs(edges: &HashMap<String, HashSet<String>>, known: &HashSet<String>) -> Vec<HashSet<String>> {
    struct State {
        index_counter: usize,
        stack: Vec<String>,
        on_stack: HashSet<String>,
        indices: HashMap<String, usize>,
        lowlinks: HashMap<String, usize>,
        sccs: Vec<HashSet<String>>,
    }

    fn visit(name: &str, edges: &HashMap<String, HashSet<String>>, known: &HashSet<String>, state: &mut State) {
        state.indices.insert(name.to_string(), state.index_counter);
        state.lowlinks.insert(name.to_string(), state.index_counter);
        state.index_counter += 1;
        state.stack.push(name.to_string());
        state.on_stack.insert(name.to_string());

        if let Some(callees) = edges.get(name) {
            for callee in callees {
                if !known.contains(callee) {
                    continue;
                }
                if !state.indices.contains_key(callee) {
                    visit(callee, edges, known, state);
                    let callee_low = state.lowlinks[callee];
                    let v_low = state.lowlinks[name];
                    state.lowlinks.insert(name.to_string(), v_low.min(callee_low));
                } else if state.on_stack.contains(callee) {
                    let callee_idx = state.indices[callee];
                    let v_low = state.lowlinks[name];
                    state.lowlinks.insert(name.to_string(), v_low.min(callee_idx));
                }
            }
        }

        if state.lowlinks[name] == state.indices[name] {
            let mut scc = HashSet::new();
            loop {
                let w = state.stack.pop().unwrap();
                state.on_stack.remove(&w);
                let is_name = w == name;
                scc.insert(w);
                if is_name {
                    break;
                }
            }
            state.sccs.push(scc);
        }
    }

    let mut state = State {
        index_counter: 0,
        stack: Vec::new(),
        on_stack: HashSet::new(),
        indices: HashMap::new(),
        lowlinks: HashMap::new(),
        sccs: Vec::new(),
    };
    for name in known {
        if !state.indices.contains_key(name) {
            visit(name, edges, known, &mut state);
        }
    }

    state
        .sccs
        .into_iter()
        .filter(|scc| {
            if scc.len() > 1 {
                true
            } else {
                let name = scc.iter().next().unwrap();
                edges.get(name).map(|c| c.contains(name)).unwrap_or(false)
            }
        })
        .collect()
}
