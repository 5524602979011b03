//! Function summaries (C11, §3.4/§4.11): per-parameter ownership,
//! return-value origin, and effect set, built bottom-up on the call graph.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::forms::{self, Expr, Head};

/// `FunctionSummary.params[i].ownership` (§3.4/§4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamOwnership {
    Borrowed,
    Consumed,
    /// The value received through this parameter flows straight back out
    /// as the function's return value.
    Passthrough(usize),
    Captured,
}

/// `FunctionSummary.return_origin` (§4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnOrigin {
    Fresh,
    Passthrough(usize),
    Borrowed,
    None,
}

/// One bit of a function's effect set (§4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Effect {
    Allocates,
    Frees,
    Mutates,
    Io,
    Throws,
    Concurrent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSummary {
    pub name: String,
    pub ownership: ParamOwnership,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSummary {
    pub name: String,
    pub params: Vec<ParamSummary>,
    pub return_origin: ReturnOrigin,
    pub allocates: bool,
    pub effects: HashSet<Effect>,
    pub is_recursive: bool,
}

impl FunctionSummary {
    pub fn param_ownership(&self, param: &str) -> Option<ParamOwnership> {
        self.params.iter().find(|p| p.name == param).map(|p| p.ownership)
    }

    /// `caller_should_free_arg(fn, i)` of §6.3: the caller keeps
    /// responsibility for an argument unless the callee consumed it.
    pub fn caller_should_free_arg(&self, index: usize) -> bool {
        !matches!(self.params.get(index).map(|p| p.ownership), Some(ParamOwnership::Consumed))
    }

    /// Is a pure effect: empty effect set and no mutation (§4.14).
    pub fn is_pure(&self) -> bool {
        self.effects.is_empty()
    }
}

/// Preloaded summaries for the built-in surface forms (§4.11). Only the
/// primitives whose ownership/effects the spec states explicitly are
/// covered; anything else falls back to `is_allocating_primitive` etc.
/// from `forms` when building a user function's own summary.
pub fn primitive_summary(name: &str) -> Option<FunctionSummary> {
    let mut effects = HashSet::new();
    let (params, return_origin, allocates) = match name {
        "cons" | "pair" => {
            effects.insert(Effect::Allocates);
            (vec![borrowed("a"), borrowed("b")], ReturnOrigin::Fresh, true)
        }
        "list" => {
            effects.insert(Effect::Allocates);
            (vec![], ReturnOrigin::Fresh, true)
        }
        "car" | "cdr" => (vec![borrowed("p")], ReturnOrigin::Borrowed, false),
        "map" | "filter" | "fold" => {
            effects.insert(Effect::Allocates);
            (vec![borrowed("f"), borrowed("coll")], ReturnOrigin::Fresh, true)
        }
        "box" => {
            effects.insert(Effect::Allocates);
            (vec![consumed("v")], ReturnOrigin::Fresh, true)
        }
        "unbox" => (vec![borrowed("b")], ReturnOrigin::Borrowed, false),
        "set-box!" => {
            effects.insert(Effect::Mutates);
            (vec![borrowed("b"), consumed("v")], ReturnOrigin::None, false)
        }
        "display" | "print" => {
            effects.insert(Effect::Io);
            (vec![borrowed("v")], ReturnOrigin::None, false)
        }
        "make-chan" => {
            effects.insert(Effect::Allocates);
            effects.insert(Effect::Concurrent);
            (vec![], ReturnOrigin::Fresh, true)
        }
        "chan-send!" => {
            effects.insert(Effect::Concurrent);
            (vec![borrowed("ch"), consumed("v")], ReturnOrigin::None, false)
        }
        "chan-recv!" => {
            effects.insert(Effect::Concurrent);
            (vec![borrowed("ch")], ReturnOrigin::Fresh, false)
        }
        "error" => {
            effects.insert(Effect::Throws);
            (vec![borrowed("msg")], ReturnOrigin::None, false)
        }
        _ => return None,
    };
    Some(FunctionSummary {
        name: name.to_string(),
        params,
        return_origin,
        allocates,
        effects,
        is_recursive: false,
    })
}

fn borrowed(name: &str) -> ParamSummary {
    ParamSummary {
        name: name.to_string(),
        ownership: ParamOwnership::Borrowed,
    }
}

fn consumed(name: &str) -> ParamSummary {
    ParamSummary {
        name: name.to_string(),
        ownership: ParamOwnership::Consumed,
    }
}

/// Builds a user-defined function's summary by walking its body (§4.11).
pub struct SummaryBuilder<'a> {
    name: String,
    params: Vec<&'a str>,
    effects: HashSet<Effect>,
    consumed_params: HashSet<String>,
    captured_params: HashSet<String>,
    return_origin: ReturnOrigin,
    allocates: bool,
}

impl<'a> SummaryBuilder<'a> {
    pub fn new(name: impl Into<String>, params: Vec<&'a str>) -> Self {
        SummaryBuilder {
            name: name.into(),
            params,
            effects: HashSet::new(),
            consumed_params: HashSet::new(),
            captured_params: HashSet::new(),
            return_origin: ReturnOrigin::None,
            allocates: false,
        }
    }

    pub fn build(mut self, body: Expr<'a>) -> FunctionSummary {
        self.walk(body, true);
        let params = self
            .params
            .iter()
            .map(|p| ParamSummary {
                name: p.to_string(),
                ownership: if self.captured_params.contains(*p) {
                    ParamOwnership::Captured
                } else if self.consumed_params.contains(*p) {
                    ParamOwnership::Consumed
                } else if let ReturnOrigin::Passthrough(i) = self.return_origin {
                    if self.params.get(i) == Some(p) {
                        ParamOwnership::Passthrough(i)
                    } else {
                        ParamOwnership::Borrowed
                    }
                } else {
                    ParamOwnership::Borrowed
                },
            })
            .collect();
        FunctionSummary {
            name: self.name,
            params,
            return_origin: self.return_origin,
            allocates: self.allocates,
            effects: self.effects,
            is_recursive: false,
        }
    }

    fn walk(&mut self, expr: Expr<'a>, in_return_position: bool) {
        if let Some(name) = expr.as_symbol() {
            if in_return_position {
                if let Some(i) = self.params.iter().position(|p| *p == name) {
                    self.return_origin = ReturnOrigin::Passthrough(i);
                }
            }
            return;
        }

        if let Some((head, args)) = forms::classify(expr) {
            match head {
                Head::Quote => {}
                Head::Let | Head::LetStar | Head::Letrec => {
                    if let Some(&bindings_list) = args.first() {
                        for (_, value_expr) in forms::parse_bindings(bindings_list) {
                            self.walk(value_expr, false);
                        }
                    }
                    let body = &args[1.min(args.len())..];
                    for (i, &e) in body.iter().enumerate() {
                        self.walk(e, in_return_position && i + 1 == body.len());
                    }
                }
                Head::Begin => {
                    for (i, &e) in args.iter().enumerate() {
                        self.walk(e, in_return_position && i + 1 == args.len());
                    }
                }
                Head::If => {
                    if let Some(&cond) = args.first() {
                        self.walk(cond, false);
                    }
                    if let Some(&then_e) = args.get(1) {
                        self.walk(then_e, in_return_position);
                    }
                    if let Some(&else_e) = args.get(2) {
                        self.walk(else_e, in_return_position);
                    }
                }
                Head::Lambda => {
                    let captured = crate::freevars::free_symbols(expr);
                    for p in &self.params {
                        if captured.contains(p) {
                            self.captured_params.insert(p.to_string());
                        }
                    }
                    for &e in &args[1.min(args.len())..] {
                        self.walk(e, false);
                    }
                }
                Head::SetBang => {
                    self.effects.insert(Effect::Mutates);
                    for &e in args.iter().skip(1) {
                        self.walk(e, false);
                    }
                }
                Head::Spawn | Head::Send | Head::Recv | Head::Close | Head::Atom | Head::Swap | Head::Reset | Head::CompareAndSwap => {
                    self.effects.insert(Effect::Concurrent);
                    if head == Head::Send {
                        if let Some(value_arg) = args.get(1).and_then(|e| e.as_symbol()) {
                            self.consumed_params.insert(value_arg.to_string());
                        }
                    }
                    for &e in &args {
                        self.walk(e, false);
                    }
                }
                _ => {
                    for &e in &args {
                        self.walk(e, false);
                    }
                }
            }
            return;
        }

        if let Some((name, args)) = forms::application(expr) {
            if forms::is_allocating_primitive(name) {
                self.effects.insert(Effect::Allocates);
                self.allocates = true;
                if in_return_position {
                    self.return_origin = ReturnOrigin::Fresh;
                }
            }
            if forms::is_mutating_primitive(name) {
                self.effects.insert(Effect::Mutates);
            }
            if forms::is_io_primitive(name) {
                self.effects.insert(Effect::Io);
            }
            if forms::is_throwing_primitive(name) {
                self.effects.insert(Effect::Throws);
            }
            if forms::is_concurrent_primitive(name) {
                self.effects.insert(Effect::Concurrent);
            }
            if forms::is_free_primitive(name) {
                self.effects.insert(Effect::Frees);
                if let Some(target) = args.first().and_then(|e| e.as_symbol()) {
                    self.consumed_params.insert(target.to_string());
                }
            }
            for a in args {
                self.walk(a, false);
            }
        }
    }
}
