//! CFG builder (C3, §3.5/§4.3): one basic-block control-flow graph per
//! function body.

use std::collections::HashSet;

use crate::errors::CfgError;
use crate::forms::{self, Expr, Head};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Entry,
    Exit,
    Basic,
    Branch,
    Join,
    LoopHead,
    LoopExit,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub uses: HashSet<String>,
    pub defs: HashSet<String>,
    pub live_in: HashSet<String>,
    pub live_out: HashSet<String>,
    pub succs: Vec<NodeId>,
    pub preds: Vec<NodeId>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Node {
            kind,
            uses: HashSet::new(),
            defs: HashSet::new(),
            live_in: HashSet::new(),
            live_out: HashSet::new(),
            succs: Vec::new(),
            preds: Vec::new(),
        }
    }
}

/// A function body's control-flow graph. Nodes are addressed by `NodeId`,
/// stable for the lifetime of the graph.
#[derive(Debug, Clone)]
pub struct Cfg {
    pub nodes: Vec<Node>,
    pub entry: NodeId,
    pub exit: NodeId,
}

impl Cfg {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn reverse_postorder(&self) -> Vec<NodeId> {
        let mut visited = vec![false; self.nodes.len()];
        let mut postorder = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(NodeId, usize)> = vec![(self.entry, 0)];
        visited[self.entry.0] = true;
        while let Some((id, next_succ)) = stack.pop() {
            let succs = &self.node(id).succs;
            if next_succ < succs.len() {
                let succ = succs[next_succ];
                stack.push((id, next_succ + 1));
                if !visited[succ.0] {
                    visited[succ.0] = true;
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(id);
            }
        }
        postorder.reverse();
        postorder
    }

    /// Remove nodes unreachable from `entry` (§4.15: "Unreachable code in
    /// the CFG is pruned before liveness; removed nodes must not leak
    /// storage" — dropping their `Node` values is exactly that).
    pub fn prune_unreachable(&mut self) {
        let reachable: HashSet<usize> = self.reverse_postorder().into_iter().map(|id| id.0).collect();
        for (idx, node) in self.nodes.iter_mut().enumerate() {
            if !reachable.contains(&idx) {
                *node = Node::new(node.kind);
            } else {
                node.preds.retain(|p| reachable.contains(&p.0));
                node.succs.retain(|s| reachable.contains(&s.0));
            }
        }
    }
}

/// Builds a CFG for one function body, plus collects any structural
/// diagnostics encountered along the way (§7 "Structural": malformed forms
/// degrade to a no-op subtree with a `warn`, they never abort the build).
pub struct CfgBuilder {
    nodes: Vec<Node>,
    diagnostics: Vec<CfgError>,
}

impl CfgBuilder {
    pub fn new() -> Self {
        CfgBuilder {
            nodes: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn diagnostics(&self) -> &[CfgError] {
        &self.diagnostics
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(Node::new(kind));
        NodeId(self.nodes.len() - 1)
    }

    fn connect(&mut self, from: NodeId, to: NodeId) {
        self.nodes[from.0].succs.push(to);
        self.nodes[to.0].preds.push(from);
    }

    /// Build the CFG for `body`. Every terminal control path is connected
    /// to `Exit`. Takes `&mut self` (rather than consuming the builder) so
    /// the structural diagnostics accumulated along the way remain
    /// available afterward via `diagnostics()`.
    pub fn build(&mut self, body: Expr<'_>) -> Cfg {
        let entry = self.push(NodeKind::Entry);
        let last = self.build_expr(body, entry);
        let exit = self.push(NodeKind::Exit);
        self.connect(last, exit);
        Cfg {
            nodes: std::mem::take(&mut self.nodes),
            entry,
            exit,
        }
    }

    /// Append `expr`'s control-flow contribution after `pred`, returning
    /// the node subsequent statements should chain from.
    fn build_expr<'a>(&mut self, expr: Expr<'a>, pred: NodeId) -> NodeId {
        if let Some((head, args)) = forms::classify(expr) {
            return self.build_form(head, &args, pred, expr);
        }

        // Literal, bare symbol, or ordinary application: one Basic node.
        let node = self.push(NodeKind::Basic);
        self.connect(pred, node);
        let uses = crate::freevars::free_symbols(expr);
        self.nodes[node.0].uses.extend(uses.into_iter().map(|s| s.to_string()));
        node
    }

    fn build_form<'a>(&mut self, head: Head, args: &[Expr<'a>], pred: NodeId, whole: Expr<'a>) -> NodeId {
        match head {
            Head::Quote => pred, // no CFG contribution

            Head::If => {
                let Some((&cond, rest)) = args.split_first() else {
                    self.diagnostics.push(CfgError::MalformedForm {
                        form: "if".into(),
                        reason: "missing condition".into(),
                    });
                    return pred;
                };
                let branch = self.push(NodeKind::Branch);
                self.connect(pred, branch);
                self.nodes[branch.0]
                    .uses
                    .extend(crate::freevars::free_symbols(cond).into_iter().map(|s| s.to_string()));

                let then_expr = rest.first().copied();
                let else_expr = rest.get(1).copied();
                let join = self.push(NodeKind::Join);

                match then_expr {
                    Some(then_expr) => {
                        let then_end = self.build_expr(then_expr, branch);
                        self.connect(then_end, join);
                    }
                    None => self.connect(branch, join),
                }
                match else_expr {
                    Some(else_expr) => {
                        let else_end = self.build_expr(else_expr, branch);
                        self.connect(else_end, join);
                    }
                    None => self.connect(branch, join),
                }
                join
            }

            Head::Let | Head::LetStar | Head::Letrec => {
                let Some(bindings_list) = args.first() else {
                    self.diagnostics.push(CfgError::MalformedForm {
                        form: "let".into(),
                        reason: "missing bindings".into(),
                    });
                    return pred;
                };
                let bindings = forms::parse_bindings(bindings_list);
                let mut cur = pred;
                for (name, value_expr) in &bindings {
                    let value_end = self.build_expr(value_expr, cur);
                    let def_node = self.push(NodeKind::Basic);
                    self.connect(value_end, def_node);
                    self.nodes[def_node.0].defs.insert(name.to_string());
                    cur = def_node;
                }
                if args.len() < 2 {
                    self.diagnostics.push(CfgError::MalformedForm {
                        form: whole_form_name(whole),
                        reason: "missing body".into(),
                    });
                    return cur;
                }
                for body_expr in &args[1..] {
                    cur = self.build_expr(body_expr, cur);
                }
                cur
            }

            Head::Lambda => {
                // Isolated subgraph: the body is analyzed separately, per
                // function, by the caller (only free-var captures cross
                // into the enclosing CFG, computed via `freevars`).
                let node = self.push(NodeKind::Basic);
                self.connect(pred, node);
                self.nodes[node.0]
                    .uses
                    .extend(crate::freevars::free_symbols(whole).into_iter().map(|s| s.to_string()));
                node
            }

            Head::Begin => {
                let mut cur = pred;
                for e in args {
                    cur = self.build_expr(e, cur);
                }
                cur
            }

            Head::SetBang => {
                let node = self.push(NodeKind::Basic);
                self.connect(pred, node);
                if let Some(target) = args.first().and_then(|e| e.as_symbol()) {
                    self.nodes[node.0].defs.insert(target.to_string());
                }
                for value_expr in args.iter().skip(1) {
                    self.nodes[node.0]
                        .uses
                        .extend(crate::freevars::free_symbols(value_expr).into_iter().map(|s| s.to_string()));
                }
                node
            }

            Head::While | Head::Loop | Head::ForEach | Head::Map | Head::Filter | Head::Fold | Head::Reduce => {
                let head_node = self.push(NodeKind::LoopHead);
                self.connect(pred, head_node);
                self.nodes[head_node.0]
                    .uses
                    .extend(crate::freevars::free_symbols(whole).into_iter().map(|s| s.to_string()));

                let body_start = self.push(NodeKind::Basic);
                self.connect(head_node, body_start);
                let body_end = match args.last() {
                    Some(&body) => self.build_expr(body, body_start),
                    None => body_start,
                };
                // Back edge from the body to the loop head.
                self.connect(body_end, head_node);

                let exit_node = self.push(NodeKind::LoopExit);
                self.connect(head_node, exit_node);
                exit_node
            }

            Head::Define | Head::DefStruct => {
                // Top-level declarations contribute no control flow within
                // a function body; treat as a pass-through with recorded
                // uses for completeness.
                let node = self.push(NodeKind::Basic);
                self.connect(pred, node);
                node
            }

            Head::Spawn | Head::Send | Head::Recv | Head::Close | Head::Atom | Head::Swap | Head::Reset | Head::CompareAndSwap => {
                let node = self.push(NodeKind::Basic);
                self.connect(pred, node);
                self.nodes[node.0]
                    .uses
                    .extend(crate::freevars::free_symbols(whole).into_iter().map(|s| s.to_string()));
                node
            }
        }
    }
}

impl Default for CfgBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn whole_form_name(expr: Expr<'_>) -> String {
    forms::application(expr).map(|(n, _)| n.to_string()).unwrap_or_else(|| "?".to_string())
}
