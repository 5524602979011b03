//! RC-elision (C8, §3.4/§4.8): alias tracking, uniqueness, and the
//! query rules that decide which inc/dec-ref operations a use-point can
//! skip.

use std::collections::HashMap;

use crate::forms::{self, Expr, Head};

/// `RCElisionInfo.class` (§3.4, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RcElisionClass {
    Required,
    ElideInc,
    ElideDec,
    ElideBoth,
}

#[derive(Debug, Clone, Copy)]
pub struct RcElisionInfo {
    pub class: RcElisionClass,
    pub region_id: Option<u32>,
    pub same_region_refs: bool,
}

/// The facts the §4.8 query rules switch on, gathered from C7's
/// `OwnerInfo`, C9's region table, and this module's own alias graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct RcElisionQuery {
    pub is_borrowed: bool,
    pub is_stack: bool,
    /// Arena-/pool-allocated (bulk-freed by a region exit, §4.9).
    pub is_region_managed: bool,
    pub is_unique: bool,
    /// A same-binding alias with a later use exists; the peer will decref.
    pub has_later_alias: bool,
    /// Callee summary marked the corresponding parameter `Consumed`.
    pub is_consumed: bool,
}

/// Apply the §4.8 query rules, in the order the spec lists them (first
/// match wins — each rule is a stronger guarantee than the ones after it).
pub fn classify(q: RcElisionQuery) -> RcElisionClass {
    if q.is_borrowed {
        return RcElisionClass::ElideBoth;
    }
    if q.is_stack {
        return RcElisionClass::ElideBoth;
    }
    if q.is_unique {
        return RcElisionClass::ElideBoth;
    }
    if q.is_region_managed {
        return RcElisionClass::ElideDec;
    }
    if q.has_later_alias {
        return RcElisionClass::ElideDec;
    }
    if q.is_consumed {
        return RcElisionClass::ElideDec;
    }
    RcElisionClass::Required
}

pub fn can_elide_inc_ref(class: RcElisionClass) -> bool {
    matches!(class, RcElisionClass::ElideInc | RcElisionClass::ElideBoth)
}

pub fn can_elide_dec_ref(class: RcElisionClass) -> bool {
    matches!(class, RcElisionClass::ElideDec | RcElisionClass::ElideBoth)
}

/// Running totals for reporting (§4.8 "statistics counters").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RcElisionStats {
    pub required: usize,
    pub elide_inc: usize,
    pub elide_dec: usize,
    pub elide_both: usize,
}

impl RcElisionStats {
    pub fn record(&mut self, class: RcElisionClass) {
        match class {
            RcElisionClass::Required => self.required += 1,
            RcElisionClass::ElideInc => self.elide_inc += 1,
            RcElisionClass::ElideDec => self.elide_dec += 1,
            RcElisionClass::ElideBoth => self.elide_both += 1,
        }
    }
}

/// The alias graph: who aliases whom, plus which variables a fresh
/// allocation keeps unique (§4.8 second paragraph).
///
/// A fresh allocation starts unique. Binding `y := x` where `x` names a
/// variable marks `y` an alias of `x` and turns `x` non-unique; `set!`
/// does the same. Consumption by a callee (recorded externally, via
/// `mark_consumed`) doesn't affect aliasing, only the `is_consumed` query
/// flag above.
#[derive(Debug, Default)]
pub struct AliasGraph {
    /// var -> the variable it's a pure alias of.
    alias_of: HashMap<String, String>,
    non_unique: std::collections::HashSet<String>,
    consumed: std::collections::HashSet<String>,
}

impl AliasGraph {
    pub fn new() -> Self {
        AliasGraph::default()
    }

    pub fn is_unique(&self, name: &str) -> bool {
        !self.non_unique.contains(name)
    }

    pub fn is_consumed(&self, name: &str) -> bool {
        self.consumed.contains(name)
    }

    pub fn alias_root<'s>(&'s self, name: &'s str) -> &'s str {
        let mut cur = name;
        while let Some(next) = self.alias_of.get(cur) {
            cur = next;
        }
        cur
    }

    pub fn mark_consumed(&mut self, name: &str) {
        self.consumed.insert(name.to_string());
    }

    fn bind_alias(&mut self, alias: &str, source: &str) {
        self.alias_of.insert(alias.to_string(), source.to_string());
        self.non_unique.insert(source.to_string());
    }

    /// Walk one function body collecting alias edges from `let`/`let*`
    /// bindings whose value is a bare variable reference, and from
    /// `set!` targets assigned a bare variable reference.
    pub fn walk(&mut self, expr: Expr<'_>) {
        match forms::classify(expr) {
            Some((Head::Let | Head::LetStar | Head::Letrec, args)) => {
                if let Some(&bindings_list) = args.first() {
                    for (name, value_expr) in forms::parse_bindings(bindings_list) {
                        if let Some(source) = value_expr.as_symbol() {
                            self.bind_alias(name, source);
                        }
                        self.walk(value_expr);
                    }
                }
                for &body_expr in &args[1.min(args.len())..] {
                    self.walk(body_expr);
                }
            }
            Some((Head::SetBang, args)) => {
                if let (Some(target), Some(&value_expr)) = (args.first().and_then(|e| e.as_symbol()), args.get(1)) {
                    if let Some(source) = value_expr.as_symbol() {
                        self.bind_alias(target, source);
                    }
                    self.walk(value_expr);
                }
            }
            Some((Head::Lambda, args)) => {
                for &e in &args[1.min(args.len())..] {
                    self.walk(e);
                }
            }
            Some((_, args)) => {
                for e in args {
                    self.walk(e);
                }
            }
            None => {
                if let Some((_, args)) = forms::application(expr) {
                    for e in args {
                        self.walk(e);
                    }
                }
            }
        }
    }
}
