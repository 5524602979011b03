//! Lowering engine (C13, §4.13): consumes the fully populated per-function
//! context and emits a target-agnostic directive stream in AST-evaluation
//! order.

use std::collections::{HashMap, HashSet};

use crate::concurrency::ConcurrencyTable;
use crate::forms::{self, Expr, Head};
use crate::ownership::{AllocStrategy, FreeStrategy, OwnerInfo, OwnershipKind};
use crate::rc_elision::{self, RcElisionClass};
use crate::region::RegionTable;
use crate::reuse::{ReuseMatcher, TargetType};
use crate::summary::{FunctionSummary, ParamOwnership};
use crate::types::TypeRegistry;

/// One step of the directive stream (§4.13).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Bind {
        var: String,
        value_desc: String,
        alloc: AllocKind,
        is_unique: bool,
        is_stack: bool,
        is_borrow_ref: bool,
    },
    Reuse {
        alloc_var: String,
        freed_var: String,
        alloc_type: String,
    },
    IncRef(String),
    DecRef(String),
    FreeUnique(String),
    FreeTree(String),
    ReleaseTyped(String, String),
    RegionEnter(u32, Option<String>),
    RegionExit(u32, bool),
    TetherEnter(String),
    TetherExit(String),
    BorrowCreate(String, String),
    BorrowRelease(String),
    ConsumedSkip(String, String),
    BorrowedSkip(String, String),
    EscapedSkip(String, String),
    Comment(String),
}

/// A plain mirror of `ownership::AllocStrategy`, since `Directive` needs to
/// be comparable/cloneable independent of the inferrer's internal type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocKind {
    Stack,
    Heap,
}

impl From<AllocStrategy> for AllocKind {
    fn from(a: AllocStrategy) -> Self {
        match a {
            AllocStrategy::Stack => AllocKind::Stack,
            AllocStrategy::Heap => AllocKind::Heap,
        }
    }
}

/// Records the last textual reference position of every symbol in `body`,
/// using the same left-to-right, tick-per-node traversal order the
/// lowering walk itself uses below. The two counters are independent, but
/// since both visit nodes in identical order, positions computed here are
/// valid to compare against positions ticked during lowering.
pub fn collect_last_use(body: Expr<'_>) -> HashMap<String, usize> {
    let mut pos = 0usize;
    let mut map = HashMap::new();
    walk_last_use(body, &mut pos, &mut map);
    map
}

fn walk_last_use<'a>(expr: Expr<'a>, pos: &mut usize, map: &mut HashMap<String, usize>) {
    *pos += 1;
    let here = *pos;
    if let Some(name) = expr.as_symbol() {
        map.insert(name.to_string(), here);
        return;
    }
    match forms::classify(expr) {
        Some((Head::Quote, _)) => {}
        Some((Head::Let | Head::LetStar | Head::Letrec, args)) => {
            if let Some(&bindings_list) = args.first() {
                for (_, value_expr) in forms::parse_bindings(bindings_list) {
                    walk_last_use(value_expr, pos, map);
                }
            }
            for &e in &args[1.min(args.len())..] {
                walk_last_use(e, pos, map);
            }
        }
        Some((Head::Lambda, args)) => {
            for &e in &args[1.min(args.len())..] {
                walk_last_use(e, pos, map);
            }
        }
        Some((Head::SetBang, args)) => {
            if let Some(target) = args.first().and_then(|e| e.as_symbol()) {
                map.insert(target.to_string(), here);
            }
            for &e in args.iter().skip(1) {
                walk_last_use(e, pos, map);
            }
        }
        Some((_, args)) => {
            for e in args {
                walk_last_use(e, pos, map);
            }
        }
        None => {
            if let Some((_, args)) = forms::application(expr) {
                for e in args {
                    walk_last_use(e, pos, map);
                }
            }
        }
    }
}

fn infer_target_type(expr: Expr<'_>, registry: &TypeRegistry) -> Option<TargetType> {
    if let Some((name, args)) = forms::application(expr) {
        match name {
            "cons" | "pair" | "list" => return Some(TargetType::Pair),
            _ if registry.is_registered(name) => {
                return Some(TargetType::UserRecord { field_count: args.len() });
            }
            _ => {}
        }
    }
    match expr {
        ward_core::Value::Int(_) | ward_core::Value::Float(_) | ward_core::Value::Char(_) | ward_core::Value::Keyword(_) => {
            Some(TargetType::Scalar)
        }
        ward_core::Value::StringCode(_) | ward_core::Value::Symbol(_) => Some(TargetType::StringOrSymbol),
        _ => None,
    }
}

fn describe(expr: Expr<'_>) -> String {
    if let Some((name, _)) = forms::application(expr) {
        name.to_string()
    } else if let Some(name) = expr.as_symbol() {
        name.to_string()
    } else {
        "literal".to_string()
    }
}

/// Lowers one function body. Holds references to everything C2/C7-C12
/// computed for this function and a mutable handle on the shared reuse
/// matcher (allocations and frees interleave across nested scopes).
pub struct LoweringEngine<'a> {
    registry: &'a TypeRegistry,
    owner: &'a HashMap<String, OwnerInfo>,
    rc: &'a HashMap<String, RcElisionClass>,
    regions: &'a RegionTable,
    reuse: &'a mut ReuseMatcher,
    summaries: &'a HashMap<String, FunctionSummary>,
    concurrency: &'a ConcurrencyTable,
    last_use: &'a HashMap<String, usize>,
    pos: usize,
    next_region: u32,
    /// Vars bound via `BorrowCreate` rather than `Bind` in the current
    /// lowering (§4.13: "the bound value is a bare variable reference").
    borrow_refs: HashSet<String>,
    /// Vars whose ownership was consumed by a call/send within this
    /// lowering; their free point becomes `ConsumedSkip` instead.
    consumed: HashSet<String>,
    directives: Vec<Directive>,
}

impl<'a> LoweringEngine<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: &'a TypeRegistry,
        owner: &'a HashMap<String, OwnerInfo>,
        rc: &'a HashMap<String, RcElisionClass>,
        regions: &'a RegionTable,
        reuse: &'a mut ReuseMatcher,
        summaries: &'a HashMap<String, FunctionSummary>,
        concurrency: &'a ConcurrencyTable,
        last_use: &'a HashMap<String, usize>,
    ) -> Self {
        LoweringEngine {
            registry,
            owner,
            rc,
            regions,
            reuse,
            summaries,
            concurrency,
            last_use,
            pos: 0,
            next_region: 0,
            borrow_refs: HashSet::new(),
            consumed: HashSet::new(),
            directives: Vec::new(),
        }
    }

    pub fn lower(mut self, body: Expr<'a>) -> Vec<Directive> {
        self.lower_expr(body);
        self.directives
    }

    fn tick(&mut self) -> usize {
        self.pos += 1;
        self.pos
    }

    fn emit(&mut self, d: Directive) {
        self.directives.push(d);
    }

    fn is_channel_transferred_or_consumed(&self, var: &str) -> bool {
        self.consumed.contains(var) || self.concurrency.is_channel_transferred(var)
    }

    /// Walks `expr`, emitting directives as a side effect. Returns the
    /// position ticked for `expr` itself, usable as an allocation position
    /// for reuse matching. Mirrors `walk_last_use`'s traversal order node
    /// for node so the two counters stay comparable.
    fn lower_expr(&mut self, expr: Expr<'a>) -> usize {
        let here = self.tick();
        if expr.as_symbol().is_some() {
            return here;
        }
        match forms::classify(expr) {
            Some((Head::Quote, _)) => {}
            Some((Head::Let | Head::LetStar | Head::Letrec, args)) => {
                self.lower_let(&args);
            }
            Some((Head::If, args)) => {
                if let Some(&cond) = args.first() {
                    self.lower_expr(cond);
                }
                if let Some(&then_e) = args.get(1) {
                    self.lower_expr(then_e);
                }
                if let Some(&else_e) = args.get(2) {
                    self.lower_expr(else_e);
                }
            }
            Some((Head::Begin, args)) => {
                for &e in &args {
                    self.lower_expr(e);
                }
            }
            Some((Head::Lambda, args)) => {
                for &e in &args[1.min(args.len())..] {
                    self.lower_expr(e);
                }
            }
            Some((Head::SetBang, args)) => {
                for &e in args.iter().skip(1) {
                    self.lower_expr(e);
                }
            }
            Some((Head::Send, args)) => {
                if let Some(name) = args.get(1).and_then(|e| e.as_symbol()) {
                    self.consumed.insert(name.to_string());
                }
                for &e in &args {
                    self.lower_expr(e);
                }
            }
            Some((_, args)) => {
                for e in args {
                    self.lower_expr(e);
                }
            }
            None => {
                if let Some((name, args)) = forms::application(expr) {
                    self.lower_call(name, &args);
                }
            }
        }
        here
    }

    /// Call lowering (§4.13 "Call lowering"): for each bare-variable
    /// argument, consult the callee's summary for this parameter's
    /// ownership and decide whether to emit an `IncRef` at the call site.
    fn lower_call(&mut self, callee: &str, args: &[Expr<'a>]) {
        let summary = self.summaries.get(callee);
        for (i, &arg) in args.iter().enumerate() {
            self.lower_expr(arg);
            let Some(var) = arg.as_symbol() else { continue };
            let ownership = summary.and_then(|s| s.params.get(i)).map(|p| p.ownership);
            match ownership {
                Some(ParamOwnership::Borrowed) => {}
                Some(ParamOwnership::Consumed) => {
                    self.consumed.insert(var.to_string());
                }
                Some(ParamOwnership::Passthrough(_)) | Some(ParamOwnership::Captured) | None => {
                    if let Some(info) = self.owner.get(var) {
                        if info.kind == OwnershipKind::Shared {
                            self.emit(Directive::IncRef(var.to_string()));
                        }
                    }
                }
            }
        }
    }

    /// `let`/`let*`/`letrec` lowering (§4.13 core algorithm): open a
    /// region, bind/reuse/borrow-create each binding in order, lower the
    /// body, then emit frees in reverse order and close the region.
    fn lower_let(&mut self, args: &[Expr<'a>]) {
        let Some(&bindings_list) = args.first() else { return };
        let bindings = forms::parse_bindings(bindings_list);

        let region_id = self.next_region;
        self.next_region += 1;
        self.emit(Directive::RegionEnter(region_id, None));

        let mut order: Vec<&str> = Vec::with_capacity(bindings.len());
        for (name, value_expr) in bindings.iter().copied() {
            order.push(name);

            if let Some(source) = value_expr.as_symbol() {
                self.tick();
                self.emit(Directive::BorrowCreate(name.to_string(), source.to_string()));
                self.borrow_refs.insert(name.to_string());
                continue;
            }

            let alloc_pos = self.lower_expr(value_expr);
            let target = infer_target_type(value_expr, self.registry);

            if let Some(t) = target {
                if let Some(candidate) = self.reuse.try_match(alloc_pos, t) {
                    self.emit(Directive::Reuse {
                        alloc_var: name.to_string(),
                        freed_var: candidate.freed_var,
                        alloc_type: candidate.target_type,
                    });
                    continue;
                }
            }

            let info = self.owner.get(name);
            let alloc = info.map(|i| i.alloc.into()).unwrap_or(AllocKind::Heap);
            let is_unique = info.map(|i| i.is_unique).unwrap_or(false);
            let is_stack = matches!(alloc, AllocKind::Stack);
            self.emit(Directive::Bind {
                var: name.to_string(),
                value_desc: describe(value_expr),
                alloc,
                is_unique,
                is_stack,
                is_borrow_ref: false,
            });

            // This binding's own slot becomes a pending-free candidate once
            // its last use has passed, so a later allocation in this same
            // scope can reuse it (§4.10).
            if let Some(info) = info {
                if info.must_free && info.is_unique {
                    if let (Some(t), Some(&last_use)) = (target, self.last_use.get(name)) {
                        self.reuse.record_pending_free(name, last_use, t, true);
                    }
                }
            }
        }

        for &body_expr in &args[1.min(args.len())..] {
            self.lower_expr(body_expr);
        }

        for name in order.into_iter().rev() {
            self.emit_free(name);
        }

        let bulk_free = self.regions.region_can_bulk_free(region_id);
        self.emit(Directive::RegionExit(region_id, bulk_free));
        if bulk_free {
            self.fold_frees_into_region(region_id);
        }
    }

    /// Retroactively replaces the individual frees just emitted for this
    /// region's members with a comment noting they're covered by the bulk
    /// region free (§4.13 step 6).
    fn fold_frees_into_region(&mut self, region_id: u32) {
        let Some(region) = self.regions.region(region_id) else { return };
        let members: HashSet<&str> = region.members.iter().map(|s| s.as_str()).collect();
        for d in self.directives.iter_mut().rev() {
            let var = match d {
                Directive::FreeUnique(v) | Directive::FreeTree(v) | Directive::DecRef(v) | Directive::ReleaseTyped(v, _) => Some(v.clone()),
                _ => None,
            };
            match var {
                Some(v) if members.contains(v.as_str()) => {
                    *d = Directive::Comment(format!("{v}: covered by region"));
                }
                Some(_) => {}
                None => {
                    if matches!(d, Directive::RegionEnter(id, _) if *id == region_id) {
                        break;
                    }
                }
            }
        }
    }

    fn emit_free(&mut self, name: &str) {
        if self.reuse.matches().iter().any(|c| c.freed_var == name) {
            // Already subsumed by a `Reuse` directive; nothing more to
            // emit for this binding.
            return;
        }

        let Some(info) = self.owner.get(name) else {
            // §7: missing OwnerInfo degrades to Borrowed/None with a note.
            self.emit(Directive::Comment(format!("{name}: no owner info, treated as borrowed")));
            return;
        };

        if matches!(info.kind, OwnershipKind::Transferred) {
            self.emit(Directive::EscapedSkip(name.to_string(), "transferred".to_string()));
            return;
        }
        if self.is_channel_transferred_or_consumed(name) {
            self.emit(Directive::ConsumedSkip(name.to_string(), "callee".to_string()));
            return;
        }
        if matches!(info.alloc, AllocStrategy::Stack) {
            return;
        }
        if self.borrow_refs.contains(name) {
            self.emit(Directive::BorrowRelease(name.to_string()));
            return;
        }
        if !info.must_free {
            return;
        }

        let class = self.rc.get(name).copied().unwrap_or_else(|| {
            rc_elision::classify(rc_elision::RcElisionQuery {
                is_borrowed: info.kind == OwnershipKind::Borrowed,
                is_stack: matches!(info.alloc, AllocStrategy::Stack),
                is_unique: info.is_unique,
                ..Default::default()
            })
        });

        match info.strategy {
            FreeStrategy::None => {}
            FreeStrategy::Unique => self.emit(Directive::FreeUnique(name.to_string())),
            FreeStrategy::Tree => self.emit(Directive::FreeTree(name.to_string())),
            FreeStrategy::Rc | FreeStrategy::RcWithTreeRelease => {
                if rc_elision::can_elide_dec_ref(class) {
                    self.emit(Directive::Comment(format!("{name}: elided")));
                } else if info.strategy == FreeStrategy::RcWithTreeRelease {
                    self.emit(Directive::ReleaseTyped(name.to_string(), "record".to_string()));
                } else {
                    self.emit(Directive::DecRef(name.to_string()));
                }
            }
            FreeStrategy::Reuse => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escape::EscapeWalker;
    use crate::ownership::OwnershipInferrer;
    use crate::rc_elision::AliasGraph;
    use crate::region::RegionAnalyzer;
    use crate::shape::ShapeAnalyzer;
    use ward_core::{Arena, Value};

    fn sym<'a>(arena: &'a Arena, name: &'static str) -> Expr<'a> {
        arena.alloc(Value::Symbol(name)).unwrap()
    }

    struct Fixture {
        owner: HashMap<String, OwnerInfo>,
        rc: HashMap<String, RcElisionClass>,
        regions: RegionTable,
        summaries: HashMap<String, FunctionSummary>,
        concurrency: ConcurrencyTable,
        last_use: HashMap<String, usize>,
    }

    fn build_fixture<'a>(registry: &TypeRegistry, body: Expr<'a>) -> Fixture {
        let mut walker = EscapeWalker::new(&[]);
        walker.walk(body, true, false);
        let escape = walker.finish();

        let mut shape_analyzer = ShapeAnalyzer::new(registry);
        shape_analyzer.walk(body);
        let shapes = shape_analyzer.finish();

        let inferrer = OwnershipInferrer::new(&escape, &shapes.shapes);
        let owner = inferrer.infer_all(&HashMap::new());

        let mut aliases = AliasGraph::new();
        aliases.walk(body);

        let mut region_analyzer = RegionAnalyzer::new(true);
        region_analyzer.walk(body);
        let regions = region_analyzer.finish(&escape, &aliases);

        let mut concurrency_analyzer = crate::concurrency::ConcurrencyAnalyzer::new();
        concurrency_analyzer.walk(body);
        let concurrency = concurrency_analyzer.finish();

        let last_use = collect_last_use(body);

        let mut rc = HashMap::new();
        for (name, info) in &owner {
            let class = rc_elision::classify(rc_elision::RcElisionQuery {
                is_borrowed: info.kind == OwnershipKind::Borrowed,
                is_stack: matches!(info.alloc, AllocStrategy::Stack),
                is_unique: info.is_unique,
                has_later_alias: !aliases.is_unique(name),
                ..Default::default()
            });
            rc.insert(name.clone(), class);
        }

        Fixture {
            owner,
            rc,
            regions,
            summaries: HashMap::new(),
            concurrency,
            last_use,
        }
    }

    // S1: let x = cons(1, 2) in 0
    #[test]
    fn unused_local_frees_immediately() {
        let arena = Arena::new();
        let registry = TypeRegistry::new();
        let let_sym = sym(&arena, "let");
        let x = sym(&arena, "x");
        let cons_sym = sym(&arena, "cons");
        let one = arena.alloc(Value::Int(1)).unwrap();
        let two = arena.alloc(Value::Int(2)).unwrap();
        let cons_expr = Value::list(&arena, &[cons_sym, one, two]).unwrap();
        let binding = Value::list(&arena, &[x, cons_expr]).unwrap();
        let bindings = Value::list(&arena, &[binding]).unwrap();
        let zero = arena.alloc(Value::Int(0)).unwrap();
        let expr = Value::list(&arena, &[let_sym, bindings, zero]).unwrap();

        let fixture = build_fixture(&registry, expr);
        let mut reuse = ReuseMatcher::new();
        let engine = LoweringEngine::new(
            &registry,
            &fixture.owner,
            &fixture.rc,
            &fixture.regions,
            &mut reuse,
            &fixture.summaries,
            &fixture.concurrency,
            &fixture.last_use,
        );
        let directives = engine.lower(expr);

        assert!(directives.iter().any(|d| matches!(d, Directive::Bind { var, .. } if var == "x")));
        assert!(directives.iter().any(|d| matches!(d, Directive::FreeUnique(v) if v == "x")));
    }

    // S2: let x = cons(1, 2) in x
    #[test]
    fn returned_binding_has_no_free() {
        let arena = Arena::new();
        let registry = TypeRegistry::new();
        let let_sym = sym(&arena, "let");
        let x = sym(&arena, "x");
        let cons_sym = sym(&arena, "cons");
        let one = arena.alloc(Value::Int(1)).unwrap();
        let two = arena.alloc(Value::Int(2)).unwrap();
        let cons_expr = Value::list(&arena, &[cons_sym, one, two]).unwrap();
        let binding = Value::list(&arena, &[x, cons_expr]).unwrap();
        let bindings = Value::list(&arena, &[binding]).unwrap();
        let expr = Value::list(&arena, &[let_sym, bindings, x]).unwrap();

        let fixture = build_fixture(&registry, expr);
        let mut reuse = ReuseMatcher::new();
        let engine = LoweringEngine::new(
            &registry,
            &fixture.owner,
            &fixture.rc,
            &fixture.regions,
            &mut reuse,
            &fixture.summaries,
            &fixture.concurrency,
            &fixture.last_use,
        );
        let directives = engine.lower(expr);

        assert!(!directives
            .iter()
            .any(|d| matches!(d, Directive::FreeUnique(v) | Directive::FreeTree(v) | Directive::DecRef(v) if v == "x")));
        assert!(directives.iter().any(|d| matches!(d, Directive::EscapedSkip(v, _) if v == "x")));
    }

    // S6: let v = cons(1,2) in (send! ch v)
    #[test]
    fn send_produces_consumed_skip_not_a_free() {
        let arena = Arena::new();
        let registry = TypeRegistry::new();
        let let_sym = sym(&arena, "let");
        let v = sym(&arena, "v");
        let cons_sym = sym(&arena, "cons");
        let one = arena.alloc(Value::Int(1)).unwrap();
        let two = arena.alloc(Value::Int(2)).unwrap();
        let cons_expr = Value::list(&arena, &[cons_sym, one, two]).unwrap();
        let binding = Value::list(&arena, &[v, cons_expr]).unwrap();
        let bindings = Value::list(&arena, &[binding]).unwrap();
        let send_sym = sym(&arena, "send!");
        let ch = sym(&arena, "ch");
        let send_expr = Value::list(&arena, &[send_sym, ch, v]).unwrap();
        let expr = Value::list(&arena, &[let_sym, bindings, send_expr]).unwrap();

        let fixture = build_fixture(&registry, expr);
        let mut reuse = ReuseMatcher::new();
        let engine = LoweringEngine::new(
            &registry,
            &fixture.owner,
            &fixture.rc,
            &fixture.regions,
            &mut reuse,
            &fixture.summaries,
            &fixture.concurrency,
            &fixture.last_use,
        );
        let directives = engine.lower(expr);

        assert!(!directives.iter().any(|d| matches!(d, Directive::FreeUnique(v) | Directive::DecRef(v) if v == "v")));
        assert!(directives.iter().any(|d| matches!(d, Directive::ConsumedSkip(v, _) if v == "v")));
    }

    // S8: let x = cons(1,2) in x — a redundant exercise of the reuse path
    // finding nothing to reuse against, ensuring x is still freed exactly
    // once (it is not, here, since it escapes as the return value).
    #[test]
    fn escaping_binding_is_never_double_freed() {
        let arena = Arena::new();
        let registry = TypeRegistry::new();
        let let_sym = sym(&arena, "let");
        let x = sym(&arena, "x");
        let cons_sym = sym(&arena, "cons");
        let one = arena.alloc(Value::Int(1)).unwrap();
        let two = arena.alloc(Value::Int(2)).unwrap();
        let cons_expr = Value::list(&arena, &[cons_sym, one, two]).unwrap();
        let binding = Value::list(&arena, &[x, cons_expr]).unwrap();
        let bindings = Value::list(&arena, &[binding]).unwrap();
        let expr = Value::list(&arena, &[let_sym, bindings, x]).unwrap();

        let fixture = build_fixture(&registry, expr);
        let mut reuse = ReuseMatcher::new();
        let engine = LoweringEngine::new(
            &registry,
            &fixture.owner,
            &fixture.rc,
            &fixture.regions,
            &mut reuse,
            &fixture.summaries,
            &fixture.concurrency,
            &fixture.last_use,
        );
        let directives = engine.lower(expr);
        let free_count = directives.iter().filter(|d| matches!(d, Directive::FreeUnique(v) if v == "x")).count();
        assert_eq!(free_count, 0, "x escapes as the return value, so it must never be freed");
    }
}
