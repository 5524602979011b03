//! Free-variable collection, shared by the CFG builder (C3, node `uses`),
//! the escape walker (C5), and closure-capture detection (C11/C12).
//!
//! This treats `quote`d subtrees as opaque data (no uses) and stops at a
//! nested `lambda`/`fn`, reporting only *its* free variables rather than
//! descending into its body unconditionally — the body is that lambda's
//! own isolated subgraph (§3.5).

use std::collections::HashSet;

use crate::forms::{self, Head};

/// Collect every symbol read as a value within `expr`, excluding head
/// positions of recognized special forms and names bound by `let`/`letrec`
/// within the same expression (those are defs, not uses, at this level).
pub fn free_symbols<'a>(expr: forms::Expr<'a>) -> HashSet<&'a str> {
    let mut out = HashSet::new();
    walk(expr, &mut out);
    out
}

fn walk<'a>(expr: forms::Expr<'a>, out: &mut HashSet<&'a str>) {
    use ward_core::Value;

    if let Some(name) = expr.as_symbol() {
        out.insert(name);
        return;
    }

    match expr {
        Value::Cell { .. } => {}
        // Scalars, Nil, Unit, and every other leaf variant contribute no uses.
        _ => return,
    }

    if let Some((head, args)) = forms::classify(expr) {
        match head {
            Head::Quote => {}
            Head::Lambda => {
                // Only the lambda's free variables are visible here; its
                // own body is analyzed as an isolated subgraph.
                if let Some(params_list) = args.first() {
                    let (params, _) = params_list.to_vec();
                    let param_names: HashSet<&str> = params.iter().filter_map(|p| p.as_symbol()).collect();
                    if let Some(body) = args.get(1) {
                        let mut inner = HashSet::new();
                        walk(body, &mut inner);
                        for name in inner {
                            if !param_names.contains(name) {
                                out.insert(name);
                            }
                        }
                    }
                }
            }
            Head::Let | Head::LetStar | Head::Letrec => {
                if let Some(bindings_list) = args.first() {
                    let bindings = forms::parse_bindings(bindings_list);
                    let bound: HashSet<&str> = bindings.iter().map(|(n, _)| *n).collect();
                    for (_, value_expr) in &bindings {
                        walk(value_expr, out);
                    }
                    for body_expr in &args[1..] {
                        let mut inner = HashSet::new();
                        walk(body_expr, &mut inner);
                        for name in inner {
                            if !bound.contains(name) {
                                out.insert(name);
                            }
                        }
                    }
                }
            }
            Head::SetBang => {
                // The target name is a use of the *location*, plus the
                // assigned value is a use.
                if let Some(target) = args.first().and_then(|e| e.as_symbol()) {
                    out.insert(target);
                }
                for value_expr in &args[1..] {
                    walk(value_expr, out);
                }
            }
            Head::Define => {
                for e in args.iter().skip(1) {
                    walk(e, out);
                }
            }
            _ => {
                for e in &args {
                    walk(e, out);
                }
            }
        }
        return;
    }

    // Ordinary application: operator (if a symbol naming a callable
    // binding) plus every argument.
    if let Some((_name, args)) = forms::application(expr) {
        // The operator position for a primitive/global function name isn't
        // a variable use; only recurse into the arguments. A called
        // first-class value would itself appear as a symbol in the
        // operator position of a non-form application represented
        // elsewhere as an explicit `(apply f args)`-style call, which
        // falls through the same argument walk.
        for arg in args {
            walk(arg, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ward_core::{Arena, Value};

    #[test]
    fn collects_plain_reference() {
        let arena = Arena::new();
        let x = arena.alloc(Value::Symbol("x")).unwrap();
        let uses = free_symbols(x);
        assert!(uses.contains("x"));
    }

    #[test]
    fn let_binding_name_is_not_a_free_use_of_the_body() {
        let arena = Arena::new();
        let let_sym = arena.alloc(Value::Symbol("let")).unwrap();
        let x_sym = arena.alloc(Value::Symbol("x")).unwrap();
        let one = arena.alloc(Value::Int(1)).unwrap();
        let binding = Value::list(&arena, &[x_sym, one]).unwrap();
        let bindings = Value::list(&arena, &[binding]).unwrap();
        let body = x_sym;
        let expr = Value::list(&arena, &[let_sym, bindings, body]).unwrap();
        let uses = free_symbols(expr);
        assert!(uses.is_empty(), "x is bound, not free: {uses:?}");
    }

    #[test]
    fn quote_contributes_no_uses() {
        let arena = Arena::new();
        let quote_sym = arena.alloc(Value::Symbol("quote")).unwrap();
        let x_sym = arena.alloc(Value::Symbol("x")).unwrap();
        let expr = Value::list(&arena, &[quote_sym, x_sym]).unwrap();
        assert!(free_symbols(expr).is_empty());
    }
}
