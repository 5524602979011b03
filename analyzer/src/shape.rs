//! Shape analyzer (C6, §4.6): classifies bindings and types as
//! Scalar/Tree/DAG/Cyclic.

use std::collections::HashMap;

use crate::forms::{self, Expr, Head};
use crate::types::{CycleStatus, TypeRegistry};

/// Structural classification lattice: `Tree ⊑ DAG ⊑ Cyclic`, with
/// `Unknown` absorbing into (acting as identity for) whatever it's joined
/// with, and `Scalar` as the lattice bottom below `Tree`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Unknown,
    Scalar,
    Tree,
    DAG,
    Cyclic,
}

impl Shape {
    fn rank(self) -> u8 {
        match self {
            Shape::Unknown => 0,
            Shape::Scalar => 0,
            Shape::Tree => 1,
            Shape::DAG => 2,
            Shape::Cyclic => 3,
        }
    }

    /// Least upper bound. `Unknown` never wins a join against a known
    /// shape; joining two knowns takes the higher-ranked one.
    pub fn join(self, other: Shape) -> Shape {
        match (self, other) {
            (Shape::Unknown, x) | (x, Shape::Unknown) => x,
            (a, b) => {
                if a.rank() >= b.rank() {
                    a
                } else {
                    b
                }
            }
        }
    }
}

/// A user type's shape carries extra nuance for the self-reference case
/// (§4.6): a back-edge-hinted self-reference is a tree for freeing
/// purposes but still routes through RC, since the registry only proved
/// *that one* cycle broken, not general acyclicity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeShape {
    Tree,
    Dag,
    Cyclic,
    /// Self-reference weakened by a back-edge hint.
    BrokenTree,
}

impl TypeShape {
    pub fn for_free(self) -> Shape {
        match self {
            TypeShape::Tree | TypeShape::BrokenTree => Shape::Tree,
            TypeShape::Dag => Shape::DAG,
            TypeShape::Cyclic => Shape::Cyclic,
        }
    }

    pub fn for_rc(self) -> Shape {
        match self {
            TypeShape::Tree => Shape::Tree,
            TypeShape::Dag => Shape::DAG,
            TypeShape::BrokenTree | TypeShape::Cyclic => Shape::Cyclic,
        }
    }
}

/// Classify a registered type's shape (§4.6, first half).
pub fn classify_type(registry: &TypeRegistry, type_name: &str) -> TypeShape {
    let has_reference_fields = registry.fields(type_name).map(|fs| fs.iter().any(|f| f.is_reference)).unwrap_or(false);
    if !has_reference_fields {
        return TypeShape::Tree;
    }
    match registry.cycle_status(type_name) {
        Some(CycleStatus::Unbroken) => TypeShape::Cyclic,
        Some(CycleStatus::Broken) => {
            if registry.participates_in_multi_type_cycle(type_name) {
                TypeShape::Cyclic
            } else {
                TypeShape::BrokenTree
            }
        }
        Some(CycleStatus::None) | None => TypeShape::Dag,
    }
}

/// Per-binding shape table for one function body (§4.6, second half): the
/// shape of an expression is derived from its constructor; `letrec`
/// bindings are always `Cyclic`; `set!` upgrades its target to `Cyclic`.
#[derive(Debug, Default)]
pub struct ShapeTable {
    pub shapes: HashMap<String, Shape>,
}

impl ShapeTable {
    fn join_into(&mut self, name: &str, shape: Shape) {
        let entry = self.shapes.entry(name.to_string()).or_insert(Shape::Unknown);
        *entry = entry.join(shape);
    }
}

/// Walks one function body assigning a shape to every `let`/`letrec`
/// binding, consulting `registry` for user-type constructor shapes.
pub struct ShapeAnalyzer<'r> {
    registry: &'r TypeRegistry,
    table: ShapeTable,
}

impl<'r> ShapeAnalyzer<'r> {
    pub fn new(registry: &'r TypeRegistry) -> Self {
        ShapeAnalyzer {
            registry,
            table: ShapeTable::default(),
        }
    }

    pub fn finish(self) -> ShapeTable {
        self.table
    }

    pub fn walk(&mut self, expr: Expr<'_>) {
        self.walk_inner(expr, false);
    }

    fn walk_inner(&mut self, expr: Expr<'_>, is_letrec_scope: bool) {
        match forms::classify(expr) {
            Some((Head::Let | Head::LetStar, args)) => {
                if let Some(&bindings_list) = args.first() {
                    for (name, value_expr) in forms::parse_bindings(bindings_list) {
                        let shape = self.expr_shape(value_expr);
                        self.table.join_into(name, shape);
                        self.walk_inner(value_expr, false);
                    }
                }
                for &body_expr in &args[1.min(args.len())..] {
                    self.walk_inner(body_expr, false);
                }
            }
            Some((Head::Letrec, args)) => {
                if let Some(&bindings_list) = args.first() {
                    for (name, value_expr) in forms::parse_bindings(bindings_list) {
                        // letrec always produces Cyclic (§4.6), regardless
                        // of the bound expression's own constructor shape.
                        self.table.join_into(name, Shape::Cyclic);
                        self.walk_inner(value_expr, true);
                    }
                }
                for &body_expr in &args[1.min(args.len())..] {
                    self.walk_inner(body_expr, false);
                }
            }
            Some((Head::SetBang, args)) => {
                if let Some(target) = args.first().and_then(|e| e.as_symbol()) {
                    self.table.join_into(target, Shape::Cyclic);
                }
                for &e in args.iter().skip(1) {
                    self.walk_inner(e, false);
                }
            }
            Some((Head::Lambda, args)) => {
                for &e in &args[1.min(args.len())..] {
                    self.walk_inner(e, false);
                }
            }
            Some((_, args)) => {
                for e in args {
                    self.walk_inner(e, is_letrec_scope);
                }
            }
            None => {
                if let Some((_, args)) = forms::application(expr) {
                    for e in args {
                        self.walk_inner(e, is_letrec_scope);
                    }
                }
            }
        }
    }

    /// The shape implied by `expr`'s own constructor head, joining the
    /// shapes of its children for `cons`/`list`/`pair`.
    fn expr_shape(&mut self, expr: Expr<'_>) -> Shape {
        if let Some((name, args)) = forms::application(expr) {
            match name {
                "cons" | "pair" => {
                    let mut shape = Shape::Tree;
                    for a in &args {
                        shape = shape.join(self.expr_shape(a));
                    }
                    return shape;
                }
                "list" => return Shape::Tree,
                _ => {
                    if self.registry.is_registered(name) {
                        return classify_type(self.registry, name).for_rc();
                    }
                }
            }
        }
        match expr {
            ward_core::Value::Int(_)
            | ward_core::Value::Float(_)
            | ward_core::Value::Char(_)
            | ward_core::Value::Keyword(_)
            | ward_core::Value::Nil
            | ward_core::Value::Unit => Shape::Scalar,
            _ => Shape::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::types::FieldInfo;
    use ward_core::{Arena, Value};

    fn sym<'a>(arena: &'a Arena, name: &'static str) -> Expr<'a> {
        arena.alloc(Value::Symbol(name)).unwrap()
    }

    #[test]
    fn join_lattice_order() {
        assert_eq!(Shape::Tree.join(Shape::DAG), Shape::DAG);
        assert_eq!(Shape::DAG.join(Shape::Cyclic), Shape::Cyclic);
        assert_eq!(Shape::Unknown.join(Shape::Tree), Shape::Tree);
        assert_eq!(Shape::Tree.join(Shape::Unknown), Shape::Tree);
    }

    // S5: letrec x = cons(1, x) in x => shape(x) = Cyclic
    #[test]
    fn letrec_binding_is_always_cyclic() {
        let arena = Arena::new();
        let registry = TypeRegistry::new();
        let letrec_sym = sym(&arena, "letrec");
        let x = sym(&arena, "x");
        let cons_sym = sym(&arena, "cons");
        let one = arena.alloc(Value::Int(1)).unwrap();
        let cons_expr = Value::list(&arena, &[cons_sym, one, x]).unwrap();
        let binding = Value::list(&arena, &[x, cons_expr]).unwrap();
        let bindings = Value::list(&arena, &[binding]).unwrap();
        let expr = Value::list(&arena, &[letrec_sym, bindings, x]).unwrap();

        let mut analyzer = ShapeAnalyzer::new(&registry);
        analyzer.walk(expr);
        let table = analyzer.finish();
        assert_eq!(table.shapes["x"], Shape::Cyclic);
    }

    #[test]
    fn set_bang_upgrades_target_to_cyclic() {
        let arena = Arena::new();
        let registry = TypeRegistry::new();
        let let_sym = sym(&arena, "let");
        let x = sym(&arena, "x");
        let one = arena.alloc(Value::Int(1)).unwrap();
        let binding = Value::list(&arena, &[x, one]).unwrap();
        let bindings = Value::list(&arena, &[binding]).unwrap();
        let set_sym = sym(&arena, "set!");
        let two = arena.alloc(Value::Int(2)).unwrap();
        let set_expr = Value::list(&arena, &[set_sym, x, two]).unwrap();
        let expr = Value::list(&arena, &[let_sym, bindings, set_expr]).unwrap();

        let mut analyzer = ShapeAnalyzer::new(&registry);
        analyzer.walk(expr);
        let table = analyzer.finish();
        assert_eq!(table.shapes["x"], Shape::Cyclic);
    }

    // S7: deftype Node (value Int) (next Node) (parent Node)
    #[test]
    fn back_edge_hinted_self_ref_is_broken_tree() {
        let mut registry = TypeRegistry::new();
        registry
            .register_type(
                "Node",
                vec![
                    FieldInfo::scalar("value"),
                    FieldInfo::reference("next", "Node"),
                    FieldInfo::reference("parent", "Node"),
                ],
            )
            .unwrap();
        registry.analyze_back_edges(&PipelineConfig::default());
        let shape = classify_type(&registry, "Node");
        assert_eq!(shape, TypeShape::BrokenTree);
        assert_eq!(shape.for_free(), Shape::Tree);
        assert_eq!(shape.for_rc(), Shape::Cyclic);
    }

    #[test]
    fn mutual_type_cycle_is_cyclic_even_when_broken() {
        let mut registry = TypeRegistry::new();
        registry.register_type("A", vec![FieldInfo::reference("b", "B")]).unwrap();
        registry.register_type("B", vec![FieldInfo::reference("a", "A")]).unwrap();
        registry.analyze_back_edges(&PipelineConfig::default());
        assert_eq!(classify_type(&registry, "A"), TypeShape::Cyclic);
        assert_eq!(classify_type(&registry, "B"), TypeShape::Cyclic);
    }
}
