//! Ward Analyzer: the static memory-management analysis pipeline (C2-C13)
//! and its query API.
//!
//! This crate consumes the [`ward_core::Value`] AST one top-level form at a
//! time and runs every analysis pass in dependency order (§2): the type
//! registry is built incrementally as `deftype`/`defstruct` forms are seen;
//! the per-function passes (CFG, liveness, escape, shape, ownership,
//! RC-elision, region, reuse, concurrency, summary) run for each function
//! body, in that order, feeding a lowering engine that emits the final
//! directive stream (§4.13).
//!
//! [`Pipeline`] is the library entry point a host driver (the
//! out-of-scope CLI, per §1/§6) calls through; see SPEC_FULL.md §E.

pub mod call_graph;
pub mod cfg;
pub mod concurrency;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod escape;
pub mod forms;
pub mod freevars;
pub mod liveness;
pub mod lowering;
pub mod ownership;
pub mod rc_elision;
pub mod region;
pub mod reuse;
pub mod shape;
pub mod summary;
pub mod types;

use std::collections::{HashMap, HashSet};

use call_graph::CallGraph;
use concurrency::{ConcurrencyAnalyzer, ConcurrencyTable, ThreadLocality};
use config::PipelineConfig;
use diagnostics::{Diagnostic, DiagnosticSink, Phase};
use errors::PipelineError;
use escape::{EscapeClass, EscapeTable, EscapeWalker, VarUsage};
use forms::Expr;
use lowering::{collect_last_use, Directive, LoweringEngine};
use ownership::{AllocStrategy, FreeStrategy, OwnerInfo, OwnershipHints, OwnershipInferrer, OwnershipKind};
use rc_elision::{AliasGraph, RcElisionClass, RcElisionQuery};
use region::{RegionAnalyzer, RegionId, RegionInfo, RegionTable};
use reuse::ReuseMatcher;
use shape::{Shape, ShapeAnalyzer};
use summary::{FunctionSummary, ParamOwnership, ReturnOrigin, SummaryBuilder};
use types::{CycleStatus, FieldInfo, TypeRegistry};

pub use diagnostics::Severity;

/// `return_ownership(fn) -> ReturnOwnership` of §6.3; the spec's separate
/// name for what `summary::ReturnOrigin` already models.
pub type ReturnOwnership = ReturnOrigin;

/// Everything computed for one function body (§3.4's "per-function
/// analysis context"), retained after lowering so the query API (§6.3) can
/// be exercised by tests and downstream consumers.
pub struct FunctionAnalysis {
    pub escape: EscapeTable,
    pub shapes: HashMap<String, Shape>,
    pub owner: HashMap<String, OwnerInfo>,
    pub rc: HashMap<String, RcElisionClass>,
    pub regions: RegionTable,
    pub concurrency: ConcurrencyTable,
    pub last_use: HashMap<String, usize>,
    pub directives: Vec<Directive>,
    pub cfg_diagnostic_count: usize,
}

impl FunctionAnalysis {
    pub fn var_usage(&self, name: &str) -> Option<&VarUsage> {
        self.escape.usage.get(name)
    }

    pub fn escape_class(&self, name: &str) -> EscapeClass {
        self.escape.escape.get(name).map(|e| e.class).unwrap_or(EscapeClass::None)
    }

    pub fn owner_info(&self, name: &str) -> Option<&OwnerInfo> {
        self.owner.get(name)
    }

    pub fn free_strategy(&self, name: &str) -> FreeStrategy {
        self.owner.get(name).map(|o| o.strategy).unwrap_or(FreeStrategy::None)
    }

    pub fn alloc_strategy(&self, name: &str) -> AllocStrategy {
        self.owner.get(name).map(|o| o.alloc).unwrap_or(AllocStrategy::Heap)
    }

    /// `can_stack_alloc(name)` of §4.13/§6.3.
    pub fn can_stack_alloc(&self, name: &str) -> bool {
        let Some(info) = self.owner.get(name) else { return false };
        let class = self.escape_class(name);
        let escaped_flag = self.escape.usage.get(name).map(|u| u.escaped).unwrap_or(false);
        ownership::can_stack_alloc(info, class, escaped_flag)
    }

    pub fn rc_elision(&self, name: &str) -> RcElisionClass {
        self.rc.get(name).copied().unwrap_or(RcElisionClass::Required)
    }

    pub fn can_elide_inc_ref(&self, name: &str) -> bool {
        rc_elision::can_elide_inc_ref(self.rc_elision(name))
    }

    pub fn can_elide_dec_ref(&self, name: &str) -> bool {
        rc_elision::can_elide_dec_ref(self.rc_elision(name))
    }

    pub fn region_of(&self, name: &str) -> Option<&RegionInfo> {
        self.regions.region_of(name)
    }

    pub fn same_region(&self, a: &str, b: &str) -> bool {
        self.regions.same_region(a, b)
    }

    pub fn region_can_bulk_free(&self, id: RegionId) -> bool {
        self.regions.region_can_bulk_free(id)
    }

    pub fn thread_locality(&self, name: &str) -> ThreadLocality {
        self.concurrency.thread_locality(name)
    }

    pub fn needs_atomic_rc(&self, name: &str) -> bool {
        self.concurrency.needs_atomic_rc(name)
    }

    pub fn is_channel_transferred(&self, name: &str) -> bool {
        self.concurrency.is_channel_transferred(name)
    }
}

/// The library entry point: owns the type registry, the incrementally
/// built call graph / function-summary table, and the accumulated
/// diagnostic log across every top-level form analyzed so far (SPEC_FULL.md
/// §E).
///
/// `Pipeline` does not own an AST or the arena it came from — the caller
/// threads one `Value` body per top-level form through [`Pipeline::analyze_function`],
/// in whatever dependency order it chooses (§1: AST construction and
/// forward-declaration handling are out of scope here).
pub struct Pipeline {
    config: PipelineConfig,
    registry: TypeRegistry,
    call_graph: CallGraph,
    summaries: HashMap<String, FunctionSummary>,
    known_functions: HashSet<String>,
    contexts: HashMap<String, FunctionAnalysis>,
    diagnostics: DiagnosticSink,
}

impl Pipeline {
    /// `arena` is accepted to mirror SPEC_FULL.md §E's driving example and
    /// to fix the lifetime a caller's `Value` trees must outlive; the
    /// pipeline itself holds no arena-borrowed state between calls (every
    /// per-function result is copied into owned `String`-keyed tables).
    pub fn new(_arena: &ward_core::Arena, config: PipelineConfig) -> Self {
        Pipeline {
            config,
            registry: TypeRegistry::new(),
            call_graph: CallGraph::new(),
            summaries: HashMap::new(),
            known_functions: HashSet::new(),
            contexts: HashMap::new(),
            diagnostics: DiagnosticSink::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ---- C2: type registry -------------------------------------------

    pub fn register_type(&mut self, name: &str, fields: Vec<FieldInfo>) -> Result<(), PipelineError> {
        let span = tracing::debug_span!("type_registry", type_name = name);
        let _enter = span.enter();
        self.registry.register_type(name, fields)?;
        self.registry.analyze_back_edges(&self.config);
        Ok(())
    }

    pub fn is_cyclic_type(&self, type_name: &str) -> bool {
        self.registry.is_cyclic_type(type_name)
    }

    pub fn cycle_status(&self, type_name: &str) -> Option<CycleStatus> {
        self.registry.cycle_status(type_name)
    }

    pub fn back_edge_fields(&self, type_name: &str) -> Vec<String> {
        self.registry.back_edge_fields(type_name)
    }

    pub fn is_back_edge_field(&self, type_name: &str, field: &str) -> bool {
        self.registry.is_back_edge_field(type_name, field)
    }

    pub fn type_shape(&self, type_name: &str) -> Shape {
        shape::classify_type(&self.registry, type_name).for_rc()
    }

    // ---- C3-C13: one function body -------------------------------------

    /// Runs the full per-function pipeline (§2 data flow) over `body` and
    /// returns the emitted directive stream. The function's summary,
    /// recursion flag, and retained [`FunctionAnalysis`] become available
    /// through the query API immediately afterward.
    pub fn analyze_function<'a>(&mut self, name: &str, params: &[&'a str], body: Expr<'a>) -> &[Directive] {
        let span = tracing::debug_span!("lowering", function = name);
        let _enter = span.enter();

        // C3: CFG, with structural diagnostics downgraded to `warn` (§7).
        let mut builder = cfg::CfgBuilder::new();
        let mut graph = builder.build(body);
        graph.prune_unreachable();
        let cfg_diag_count = builder.diagnostics().len();
        for e in builder.diagnostics() {
            self.diagnostics.push(Diagnostic::warn(Phase::Cfg, None, e.to_string()));
        }

        // C4: liveness.
        {
            let span = tracing::debug_span!("liveness", function = name);
            let _enter = span.enter();
            liveness::solve(&mut graph, self.config.liveness_iteration_cap, &mut self.diagnostics);
        }

        // C5: escape / usage.
        let escape = {
            let span = tracing::debug_span!("escape", function = name);
            let _enter = span.enter();
            let mut walker = EscapeWalker::new(params);
            walker.walk(body, true, false);
            walker.finish()
        };

        // C6: shape.
        let shapes = {
            let span = tracing::debug_span!("shape", function = name);
            let _enter = span.enter();
            let mut analyzer = ShapeAnalyzer::new(&self.registry);
            analyzer.walk(body);
            analyzer.finish().shapes
        };

        // C8 (alias tracking runs ahead of C7 so ownership/region/rc can
        // all consult uniqueness).
        let mut aliases = AliasGraph::new();
        aliases.walk(body);

        // C12: concurrency, consulted by C7's ownership hints (captured-
        // by-spawn variables are forced non-unique) before C9/C10/C13.
        let concurrency = {
            let span = tracing::debug_span!("concurrency", function = name);
            let _enter = span.enter();
            let mut analyzer = ConcurrencyAnalyzer::new();
            analyzer.walk(body);
            analyzer.finish()
        };

        // C7: ownership.
        let owner = {
            let span = tracing::debug_span!("ownership", function = name);
            let _enter = span.enter();
            let mut hints: HashMap<String, OwnershipHints> = HashMap::new();
            for var in escape.usage.keys() {
                let aliased = !aliases.is_unique(var) || concurrency.needs_atomic_rc(var);
                hints.insert(var.clone(), OwnershipHints { aliased });
            }
            let inferrer = OwnershipInferrer::new(&escape, &shapes);
            inferrer.infer_all(&hints)
        };

        // C9: regions.
        let regions = {
            let span = tracing::debug_span!("region", function = name);
            let _enter = span.enter();
            let mut analyzer = RegionAnalyzer::new(self.config.region_bulk_free_requires_exact_refcount);
            analyzer.walk(body);
            analyzer.finish(&escape, &aliases)
        };

        let last_use = collect_last_use(body);

        // C8 (classification proper): §4.8 query rules per variable.
        let rc: HashMap<String, RcElisionClass> = {
            let span = tracing::debug_span!("rc_elision", function = name);
            let _enter = span.enter();
            owner
                .iter()
                .map(|(var, info)| {
                    let is_region_managed = regions.region_of(var).map(|r| r.can_bulk_free()).unwrap_or(false);
                    let has_later_alias = !aliases.is_unique(var) && last_use.contains_key(aliases.alias_root(var));
                    let class = rc_elision::classify(RcElisionQuery {
                        is_borrowed: info.kind == OwnershipKind::Borrowed,
                        is_stack: matches!(info.alloc, AllocStrategy::Stack),
                        is_region_managed,
                        is_unique: info.is_unique,
                        has_later_alias,
                        is_consumed: aliases.is_consumed(var) || concurrency.is_channel_transferred(var),
                    });
                    (var.clone(), class)
                })
                .collect()
        };

        // C11: this function's own summary, plus call-graph bookkeeping so
        // recursion (direct or mutual) is known before later callers
        // consult it.
        let mut known = self.known_functions.clone();
        known.insert(name.to_string());
        self.call_graph.record(name, body, &known);
        let mut summary = {
            let span = tracing::debug_span!("summary", function = name);
            let _enter = span.enter();
            SummaryBuilder::new(name, params.to_vec()).build(body)
        };
        summary.is_recursive = self.call_graph.is_recursive(name);
        self.summaries.insert(name.to_string(), summary);
        self.known_functions.insert(name.to_string());

        // C10 + C13: reuse matching interleaves with directive emission
        // inside the lowering engine itself.
        let mut reuse = ReuseMatcher::new();
        let directives = {
            let engine = LoweringEngine::new(&self.registry, &owner, &rc, &regions, &mut reuse, &self.summaries, &concurrency, &last_use);
            engine.lower(body)
        };

        let analysis = FunctionAnalysis {
            escape,
            shapes,
            owner,
            rc,
            regions,
            concurrency,
            last_use,
            directives,
            cfg_diagnostic_count: cfg_diag_count,
        };
        self.contexts.insert(name.to_string(), analysis);
        &self.contexts[name].directives
    }

    // ---- Per-function query API (§6.3) ---------------------------------

    pub fn function_analysis(&self, name: &str) -> Option<&FunctionAnalysis> {
        self.contexts.get(name)
    }

    pub fn var_usage(&self, function: &str, var: &str) -> Option<&VarUsage> {
        self.contexts.get(function).and_then(|c| c.var_usage(var))
    }

    pub fn escape_class(&self, function: &str, var: &str) -> EscapeClass {
        self.contexts.get(function).map(|c| c.escape_class(var)).unwrap_or(EscapeClass::None)
    }

    pub fn owner_info(&self, function: &str, var: &str) -> Option<&OwnerInfo> {
        self.contexts.get(function).and_then(|c| c.owner_info(var))
    }

    pub fn free_strategy(&self, function: &str, var: &str) -> FreeStrategy {
        self.contexts.get(function).map(|c| c.free_strategy(var)).unwrap_or(FreeStrategy::None)
    }

    pub fn alloc_strategy(&self, function: &str, var: &str) -> AllocStrategy {
        self.contexts.get(function).map(|c| c.alloc_strategy(var)).unwrap_or(AllocStrategy::Heap)
    }

    pub fn can_stack_alloc(&self, function: &str, var: &str) -> bool {
        self.contexts.get(function).map(|c| c.can_stack_alloc(var)).unwrap_or(false)
    }

    pub fn rc_elision(&self, function: &str, var: &str) -> RcElisionClass {
        self.contexts
            .get(function)
            .map(|c| c.rc_elision(var))
            .unwrap_or(RcElisionClass::Required)
    }

    pub fn can_elide_inc_ref(&self, function: &str, var: &str) -> bool {
        self.contexts.get(function).map(|c| c.can_elide_inc_ref(var)).unwrap_or(false)
    }

    pub fn can_elide_dec_ref(&self, function: &str, var: &str) -> bool {
        self.contexts.get(function).map(|c| c.can_elide_dec_ref(var)).unwrap_or(false)
    }

    pub fn region_of(&self, function: &str, var: &str) -> Option<&RegionInfo> {
        self.contexts.get(function).and_then(|c| c.region_of(var))
    }

    pub fn same_region(&self, function: &str, a: &str, b: &str) -> bool {
        self.contexts.get(function).map(|c| c.same_region(a, b)).unwrap_or(false)
    }

    pub fn region_can_bulk_free(&self, function: &str, id: RegionId) -> bool {
        self.contexts.get(function).map(|c| c.region_can_bulk_free(id)).unwrap_or(false)
    }

    pub fn thread_locality(&self, function: &str, var: &str) -> ThreadLocality {
        self.contexts
            .get(function)
            .map(|c| c.thread_locality(var))
            .unwrap_or(ThreadLocality::Unknown)
    }

    pub fn needs_atomic_rc(&self, function: &str, var: &str) -> bool {
        self.contexts.get(function).map(|c| c.needs_atomic_rc(var)).unwrap_or(false)
    }

    pub fn is_channel_transferred(&self, function: &str, var: &str) -> bool {
        self.contexts.get(function).map(|c| c.is_channel_transferred(var)).unwrap_or(false)
    }

    // ---- Function-summary query API (§6.3) -----------------------------

    pub fn function_summary(&self, name: &str) -> Option<&FunctionSummary> {
        self.summaries.get(name)
    }

    pub fn param_ownership(&self, function: &str, param: &str) -> Option<ParamOwnership> {
        self.summaries.get(function).and_then(|s| s.param_ownership(param))
    }

    pub fn return_ownership(&self, function: &str) -> Option<ReturnOwnership> {
        self.summaries.get(function).map(|s| s.return_origin)
    }

    pub fn caller_should_free_arg(&self, function: &str, index: usize) -> bool {
        self.summaries.get(function).map(|s| s.caller_should_free_arg(index)).unwrap_or(true)
    }

    // ---- Diagnostics ----------------------------------------------------

    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.diagnostics.records()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ward_core::{Arena, Value};

    fn sym<'a>(arena: &'a Arena, name: &'static str) -> Expr<'a> {
        arena.alloc(Value::Symbol(name)).unwrap()
    }

    // S1: let x = cons(1, 2) in 0
    #[test]
    fn pipeline_runs_unused_local_end_to_end() {
        let arena = Arena::new();
        let mut pipeline = Pipeline::new(&arena, PipelineConfig::default());

        let let_sym = sym(&arena, "let");
        let x = sym(&arena, "x");
        let cons_sym = sym(&arena, "cons");
        let one = arena.alloc(Value::Int(1)).unwrap();
        let two = arena.alloc(Value::Int(2)).unwrap();
        let cons_expr = Value::list(&arena, &[cons_sym, one, two]).unwrap();
        let binding = Value::list(&arena, &[x, cons_expr]).unwrap();
        let bindings = Value::list(&arena, &[binding]).unwrap();
        let zero = arena.alloc(Value::Int(0)).unwrap();
        let body = Value::list(&arena, &[let_sym, bindings, zero]).unwrap();

        let directives = pipeline.analyze_function("main", &[], body);
        assert!(directives.iter().any(|d| matches!(d, Directive::FreeUnique(v) if v == "x")));
        assert_eq!(pipeline.free_strategy("main", "x"), FreeStrategy::Unique);
        assert!(pipeline.owner_info("main", "x").unwrap().is_unique);
    }

    #[test]
    fn register_type_then_cycle_status_is_queryable() {
        let arena = Arena::new();
        let mut pipeline = Pipeline::new(&arena, PipelineConfig::default());
        pipeline
            .register_type(
                "Node",
                vec![
                    FieldInfo::scalar("value"),
                    FieldInfo::reference("next", "Node"),
                    FieldInfo::reference("parent", "Node"),
                ],
            )
            .unwrap();
        assert_eq!(pipeline.cycle_status("Node"), Some(CycleStatus::Broken));
        assert!(pipeline.is_back_edge_field("Node", "parent"));
        assert!(!pipeline.is_cyclic_type("Node"));
    }

    #[test]
    fn duplicate_type_registration_is_a_pipeline_error() {
        let arena = Arena::new();
        let mut pipeline = Pipeline::new(&arena, PipelineConfig::default());
        pipeline.register_type("Leaf", vec![FieldInfo::scalar("v")]).unwrap();
        let err = pipeline.register_type("Leaf", vec![]).unwrap_err();
        assert!(matches!(err, PipelineError::TypeRegistry(_)));
    }

    // S9: defn f(a) = a; caller `let v = ... in f(v)`.
    #[test]
    fn passthrough_param_summary_is_visible_to_a_later_caller() {
        let arena = Arena::new();
        let mut pipeline = Pipeline::new(&arena, PipelineConfig::default());

        let a = sym(&arena, "a");
        pipeline.analyze_function("f", &["a"], a);
        assert_eq!(pipeline.param_ownership("f", "a"), Some(ParamOwnership::Passthrough(0)));
        assert!(pipeline.caller_should_free_arg("f", 0));

        let let_sym = sym(&arena, "let");
        let v = sym(&arena, "v");
        let cons_sym = sym(&arena, "cons");
        let one = arena.alloc(Value::Int(1)).unwrap();
        let two = arena.alloc(Value::Int(2)).unwrap();
        let cons_expr = Value::list(&arena, &[cons_sym, one, two]).unwrap();
        let binding = Value::list(&arena, &[v, cons_expr]).unwrap();
        let bindings = Value::list(&arena, &[binding]).unwrap();
        let f_sym = sym(&arena, "f");
        let call = Value::list(&arena, &[f_sym, v]).unwrap();
        let caller_body = Value::list(&arena, &[let_sym, bindings, call]).unwrap();

        let directives = pipeline.analyze_function("caller", &[], caller_body);
        assert!(!directives.iter().any(|d| matches!(d, Directive::IncRef(name) if name == "v")));
    }

    // Determinism (§8.2): running twice on the same body yields identical
    // directive streams.
    #[test]
    fn analysis_is_deterministic() {
        let arena = Arena::new();
        let let_sym = sym(&arena, "let");
        let x = sym(&arena, "x");
        let cons_sym = sym(&arena, "cons");
        let one = arena.alloc(Value::Int(1)).unwrap();
        let two = arena.alloc(Value::Int(2)).unwrap();
        let cons_expr = Value::list(&arena, &[cons_sym, one, two]).unwrap();
        let binding = Value::list(&arena, &[x, cons_expr]).unwrap();
        let bindings = Value::list(&arena, &[binding]).unwrap();
        let body = Value::list(&arena, &[let_sym, bindings, x]).unwrap();

        let mut p1 = Pipeline::new(&arena, PipelineConfig::default());
        let d1 = p1.analyze_function("main", &[], body).to_vec();
        let mut p2 = Pipeline::new(&arena, PipelineConfig::default());
        let d2 = p2.analyze_function("main", &[], body).to_vec();
        assert_eq!(d1, d2);
    }
}
