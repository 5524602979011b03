//! Escape / usage analysis (C5, §3.4/§4.5): a single forward walk that
//! tracks first/last use, capture, return position, and argument position,
//! and folds them into a per-variable escape class.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::forms::{self, Expr, Head};

/// `None < Arg < Return < Closure < Global` (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EscapeClass {
    None,
    Arg,
    Return,
    Closure,
    Global,
}

impl Default for EscapeClass {
    fn default() -> Self {
        EscapeClass::None
    }
}

#[derive(Debug, Clone, Default)]
pub struct VarUsage {
    pub first_use: Option<usize>,
    pub last_use: Option<usize>,
    pub def_pos: Option<usize>,
    pub is_param: bool,
    pub read: bool,
    pub write: bool,
    pub captured: bool,
    pub escaped: bool,
    pub returned: bool,
}

impl VarUsage {
    fn mark_read(&mut self, pos: usize) {
        self.read = true;
        self.first_use.get_or_insert(pos);
        self.last_use = Some(self.last_use.map_or(pos, |l| l.max(pos)));
    }
}

#[derive(Debug, Clone, Default)]
pub struct EscapeInfo {
    pub class: EscapeClass,
    pub is_unique: bool,
}

/// The accumulated usage/escape table for one function body.
#[derive(Debug, Default)]
pub struct EscapeTable {
    pub usage: HashMap<String, VarUsage>,
    pub escape: HashMap<String, EscapeInfo>,
}

impl EscapeTable {
    fn usage_mut(&mut self, name: &str) -> &mut VarUsage {
        self.usage.entry(name.to_string()).or_default()
    }

    fn escalate(&mut self, name: &str, class: EscapeClass) {
        let entry = self.escape.entry(name.to_string()).or_insert_with(|| EscapeInfo {
            class: EscapeClass::None,
            is_unique: true,
        });
        if class > entry.class {
            entry.class = class;
        }
    }

    /// Widen a variable's escape class from outside the walk itself (used
    /// by the concurrency pass, C12, to push captured/shared values to
    /// `Global`).
    pub fn escalate_external(&mut self, name: &str, class: EscapeClass) {
        self.escalate(name, class);
    }
}

/// Walks one function body, recording usage and escape information for
/// every variable it mentions — including dipping into nested `lambda`
/// bodies just far enough to tag captures of variables bound in an
/// enclosing scope (the lambda's own body is analyzed as its own function
/// by the pipeline separately; this walk only needs to know what it
/// captures).
pub struct EscapeWalker {
    position: usize,
    lambda_depth: usize,
    /// Stack of (name -> lambda_depth at binding time) scopes, innermost last.
    scopes: Vec<HashMap<String, usize>>,
    table: EscapeTable,
}

impl EscapeWalker {
    pub fn new(params: &[&str]) -> Self {
        let mut table = EscapeTable::default();
        let mut root_scope = HashMap::new();
        for p in params {
            let mut usage = VarUsage::default();
            usage.is_param = true;
            usage.def_pos = Some(0);
            table.usage.insert(p.to_string(), usage);
            root_scope.insert(p.to_string(), 0usize);
        }
        EscapeWalker {
            position: 1,
            lambda_depth: 0,
            scopes: vec![root_scope],
            table,
        }
    }

    pub fn finish(self) -> EscapeTable {
        self.table
    }

    fn binding_depth(&self, name: &str) -> Option<usize> {
        for scope in self.scopes.iter().rev() {
            if let Some(d) = scope.get(name) {
                return Some(*d);
            }
        }
        None
    }

    fn bind(&mut self, name: &str) {
        self.scopes.last_mut().unwrap().insert(name.to_string(), self.lambda_depth);
    }

    fn tick(&mut self) -> usize {
        let p = self.position;
        self.position += 1;
        p
    }

    /// Walk `expr`. `in_return_position` is true only for the last
    /// expression of a function/lambda/`begin` body (§4.5). `as_arg` marks
    /// that `expr` is itself an argument expression to some application.
    pub fn walk(&mut self, expr: Expr<'_>, in_return_position: bool, as_arg: bool) {
        let pos = self.tick();

        if let Some(name) = expr.as_symbol() {
            self.reference(name, pos, in_return_position, as_arg);
            return;
        }

        match forms::classify(expr) {
            Some((Head::Quote, _)) => {}
            Some((Head::If, args)) => {
                if let Some(&cond) = args.first() {
                    self.walk(cond, false, false);
                }
                if let Some(&then_e) = args.get(1) {
                    self.walk(then_e, in_return_position, false);
                }
                if let Some(&else_e) = args.get(2) {
                    self.walk(else_e, in_return_position, false);
                }
            }
            Some((Head::Let | Head::LetStar | Head::Letrec, args)) => {
                self.scopes.push(HashMap::new());
                if let Some(&bindings_list) = args.first() {
                    let bindings = forms::parse_bindings(bindings_list);
                    for (name, value_expr) in &bindings {
                        self.walk(value_expr, false, false);
                        self.bind(name);
                        let def_pos = pos;
                        let usage = self.table.usage_mut(name);
                        usage.def_pos = Some(def_pos);
                    }
                }
                let body = &args[1.min(args.len())..];
                for (i, &e) in body.iter().enumerate() {
                    let last = i + 1 == body.len();
                    self.walk(e, in_return_position && last, false);
                }
                self.scopes.pop();
            }
            Some((Head::Begin, args)) => {
                for (i, &e) in args.iter().enumerate() {
                    let last = i + 1 == args.len();
                    self.walk(e, in_return_position && last, false);
                }
            }
            Some((Head::Lambda, args)) => {
                self.lambda_depth += 1;
                self.scopes.push(HashMap::new());
                if let Some(&params_list) = args.first() {
                    let (params, _) = params_list.to_vec();
                    for p in params {
                        if let Some(name) = p.as_symbol() {
                            self.bind(name);
                        }
                    }
                }
                let body = &args[1.min(args.len())..];
                for (i, &e) in body.iter().enumerate() {
                    let last = i + 1 == body.len();
                    self.walk(e, last, false);
                }
                self.scopes.pop();
                self.lambda_depth -= 1;
                // A lambda literal appearing in return position escapes
                // like any other returned value.
                if in_return_position {
                    // No single named variable to credit; the binding that
                    // receives this lambda (if any) is handled by the
                    // enclosing `let`/`define` walk via `reference`.
                }
            }
            Some((Head::SetBang, args)) => {
                if let Some(&value_expr) = args.get(1) {
                    self.walk(value_expr, false, false);
                }
                if let Some(name) = args.first().and_then(|e| e.as_symbol()) {
                    let usage = self.table.usage_mut(name);
                    usage.write = true;
                    usage.def_pos = Some(pos);
                }
            }
            Some((_, args)) => {
                for &e in &args {
                    self.walk(e, false, true);
                }
            }
            None => {
                if let Some((_name, args)) = forms::application(expr) {
                    for e in args {
                        self.walk(e, false, true);
                    }
                }
            }
        }
    }

    fn reference(&mut self, name: &str, pos: usize, in_return_position: bool, as_arg: bool) {
        {
            let usage = self.table.usage_mut(name);
            usage.mark_read(pos);
        }

        if self.lambda_depth > 0 {
            if let Some(binding_depth) = self.binding_depth(name) {
                if binding_depth < self.lambda_depth {
                    self.table.usage_mut(name).captured = true;
                    self.table.escalate(name, EscapeClass::Closure);
                }
            }
        }
        if in_return_position {
            self.table.usage_mut(name).returned = true;
            self.table.escalate(name, EscapeClass::Return);
        }
        if as_arg {
            self.table.escalate(name, EscapeClass::Arg);
        }
    }
}
