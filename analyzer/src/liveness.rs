//! Liveness solver (C4, §4.4): backward dataflow over the CFG.

use std::collections::HashSet;

use crate::cfg::Cfg;
use crate::diagnostics::{Diagnostic, Phase};

/// Run liveness to a fixed point (or the configured iteration cap).
/// Mutates every node's `live_in`/`live_out` in place.
///
/// On reaching the cap without convergence, every variable defined by a
/// node that hasn't stabilized yet is conservatively treated as live at
/// exit (§4.4) and an `info` diagnostic is recorded through `sink`.
pub fn solve(cfg: &mut Cfg, iteration_cap: usize, sink: &mut crate::diagnostics::DiagnosticSink) {
    let order = cfg.reverse_postorder();
    // Backward dataflow converges fastest iterating in reverse of
    // reverse-postorder (i.e. postorder).
    let mut postorder = order.clone();
    postorder.reverse();

    let mut converged = false;
    let mut iterations = 0;
    while iterations < iteration_cap {
        let mut changed = false;
        for &id in &postorder {
            let succ_live_ins: Vec<HashSet<String>> = cfg.node(id).succs.iter().map(|s| cfg.node(*s).live_in.clone()).collect();
            let mut live_out = HashSet::new();
            for s in succ_live_ins {
                live_out.extend(s);
            }
            let defs = cfg.node(id).defs.clone();
            let uses = cfg.node(id).uses.clone();
            let mut live_in = uses;
            for v in &live_out {
                if !defs.contains(v) {
                    live_in.insert(v.clone());
                }
            }

            let node = cfg.node_mut(id);
            if node.live_out != live_out {
                node.live_out = live_out;
                changed = true;
            }
            if node.live_in != live_in {
                node.live_in = live_in;
                changed = true;
            }
        }
        iterations += 1;
        if !changed {
            converged = true;
            break;
        }
    }

    if !converged {
        sink.push(Diagnostic::info(
            Phase::Liveness,
            None,
            format!("liveness did not converge within {iteration_cap} iterations; widening conservatively"),
        ));
        // Conservative widening: every variable defined anywhere is treated
        // as live at the function's exit.
        let all_defs: HashSet<String> = cfg.nodes.iter().flat_map(|n| n.defs.iter().cloned()).collect();
        let exit = cfg.exit;
        cfg.node_mut(exit).live_in.extend(all_defs.iter().cloned());
        cfg.node_mut(exit).live_out.extend(all_defs);
    }
}

/// `frees_for_node(n)`: variables in `live_in(n)` but not `live_out(n)`
/// whose owner info says they must be freed (§4.4). The ownership table is
/// supplied by the caller since `OwnerInfo` is computed by C7, downstream
/// of liveness.
pub fn frees_for_node(cfg: &Cfg, node: crate::cfg::NodeId, must_free: impl Fn(&str) -> bool) -> Vec<String> {
    let n = cfg.node(node);
    n.live_in
        .iter()
        .filter(|v| !n.live_out.contains(*v) && must_free(v))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::CfgBuilder;
    use ward_core::{Arena, Value};

    fn sym<'a>(arena: &'a Arena, name: &'static str) -> &'a Value<'a> {
        arena.alloc(Value::Symbol(name)).unwrap()
    }

    #[test]
    fn dead_variable_is_not_live_past_its_use() {
        let arena = Arena::new();
        let let_sym = sym(&arena, "let");
        let x = sym(&arena, "x");
        let one = arena.alloc(Value::Int(1)).unwrap();
        let binding = Value::list(&arena, &[x, one]).unwrap();
        let bindings = Value::list(&arena, &[binding]).unwrap();
        let zero = arena.alloc(Value::Int(0)).unwrap();
        let expr = Value::list(&arena, &[let_sym, bindings, zero]).unwrap();

        let mut cfg = CfgBuilder::new().build(expr);
        let mut sink = crate::diagnostics::DiagnosticSink::new();
        solve(&mut cfg, 1000, &mut sink);

        // x is defined but never used in the body (`0`), so it's dead
        // everywhere: live_out of the exit must not contain x.
        assert!(!cfg.node(cfg.exit).live_out.contains("x"));
    }

    #[test]
    fn returned_variable_stays_live_to_exit() {
        let arena = Arena::new();
        let let_sym = sym(&arena, "let");
        let x = sym(&arena, "x");
        let one = arena.alloc(Value::Int(1)).unwrap();
        let binding = Value::list(&arena, &[x, one]).unwrap();
        let bindings = Value::list(&arena, &[binding]).unwrap();
        let expr = Value::list(&arena, &[let_sym, bindings, x]).unwrap();

        let mut cfg = CfgBuilder::new().build(expr);
        let mut sink = crate::diagnostics::DiagnosticSink::new();
        solve(&mut cfg, 1000, &mut sink);

        let entry_live_out = cfg.node(cfg.entry).live_out.clone();
        assert!(entry_live_out.contains("x") || cfg.nodes.iter().any(|n| n.live_in.contains("x")));
    }
}
