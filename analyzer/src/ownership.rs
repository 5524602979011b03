//! Ownership inferrer (C7, §3.4/§4.7): combines escape (C5) and shape (C6)
//! into an ownership kind and free strategy per variable.

use std::collections::HashMap;

use crate::escape::{EscapeClass, EscapeTable};
use crate::shape::Shape;

/// `OwnerInfo.kind` (§3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipKind {
    Local,
    Borrowed,
    Transferred,
    Shared,
    Weak,
    Consumed,
}

/// The mechanism chosen to release a value's storage (§4.7 table, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeStrategy {
    None,
    Unique,
    Tree,
    Rc,
    RcWithTreeRelease,
    Reuse,
}

/// Where a binding's storage is allocated (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocStrategy {
    Stack,
    Heap,
}

#[derive(Debug, Clone)]
pub struct OwnerInfo {
    pub kind: OwnershipKind,
    pub must_free: bool,
    pub free_pos: Option<usize>,
    pub is_unique: bool,
    pub shape: Shape,
    pub alloc: AllocStrategy,
    pub strategy: FreeStrategy,
}

/// Extra per-variable facts the inferrer needs beyond `EscapeTable`/
/// `ShapeTable`, supplied by the caller (the per-function context wiring
/// passes together, §3.4).
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnershipHints {
    /// Set by C11/C12 (closure capture, channel send) to force
    /// non-uniqueness independent of what the escape walk alone can tell.
    pub aliased: bool,
}

/// Infers `OwnerInfo` for every variable recorded in `escape`, given their
/// shapes in `shapes` (missing shape entries default to `Unknown`, which
/// only ever routes to the conservative `RC`/`Heap` defaults — §4.15).
pub struct OwnershipInferrer<'a> {
    escape: &'a EscapeTable,
    shapes: &'a HashMap<String, Shape>,
}

impl<'a> OwnershipInferrer<'a> {
    pub fn new(escape: &'a EscapeTable, shapes: &'a HashMap<String, Shape>) -> Self {
        OwnershipInferrer { escape, shapes }
    }

    pub fn infer_all(&self, hints: &HashMap<String, OwnershipHints>) -> HashMap<String, OwnerInfo> {
        self.escape
            .usage
            .keys()
            .map(|name| (name.clone(), self.infer(name, hints.get(name).copied().unwrap_or_default())))
            .collect()
    }

    pub fn infer(&self, name: &str, hints: OwnershipHints) -> OwnerInfo {
        let usage = self.escape.usage.get(name);
        let escape_info = self.escape.escape.get(name);
        let class = escape_info.map(|e| e.class).unwrap_or(EscapeClass::None);
        let is_param = usage.map(|u| u.is_param).unwrap_or(false);
        let captured = usage.map(|u| u.captured).unwrap_or(false);
        let shape = self.shapes.get(name).copied().unwrap_or(Shape::Unknown);

        // First sweep (§4.7): ownership kind.
        let (kind, must_free) = if captured {
            (OwnershipKind::Transferred, false)
        } else if class >= EscapeClass::Return {
            (OwnershipKind::Transferred, false)
        } else if is_param {
            (OwnershipKind::Borrowed, false)
        } else {
            (OwnershipKind::Local, true)
        };

        let free_pos = if must_free { usage.and_then(|u| u.last_use) } else { None };

        // Second sweep: uniqueness refinement.
        let is_unique = !(captured || class == EscapeClass::Arg || hints.aliased);

        let strategy = free_strategy(kind, is_unique, shape);
        let alloc = alloc_strategy(class, is_param, captured, shape);

        OwnerInfo {
            kind,
            must_free,
            free_pos,
            is_unique,
            shape,
            alloc,
            strategy,
        }
    }
}

/// The free-strategy table of §4.7, as a pure function of
/// `(ownership, unique, shape)`.
pub fn free_strategy(kind: OwnershipKind, is_unique: bool, shape: Shape) -> FreeStrategy {
    match kind {
        OwnershipKind::Borrowed | OwnershipKind::Transferred | OwnershipKind::Consumed | OwnershipKind::Weak => FreeStrategy::None,
        OwnershipKind::Shared => match shape {
            Shape::Tree => FreeStrategy::RcWithTreeRelease,
            _ => FreeStrategy::Rc,
        },
        OwnershipKind::Local => {
            if is_unique {
                FreeStrategy::Unique
            } else {
                match shape {
                    Shape::Scalar => FreeStrategy::Unique,
                    Shape::Tree => FreeStrategy::Tree,
                    _ => FreeStrategy::Rc,
                }
            }
        }
    }
}

/// `None→Stack`, `Arg/Return/Closure/Global→Heap`; parameters, captured
/// variables, and anything shaped `Tree`/`DAG`/`Cyclic` (a constructor
/// result is never a scalar) always force `Heap` (§4.7). A missing/
/// `Unknown` shape also forces `Heap`, the conservative default of §4.15.
pub fn alloc_strategy(class: EscapeClass, is_param: bool, captured: bool, shape: Shape) -> AllocStrategy {
    if is_param || captured || class != EscapeClass::None || shape != Shape::Scalar {
        AllocStrategy::Heap
    } else {
        AllocStrategy::Stack
    }
}

/// `can_stack_alloc(var)` of §4.13/§6.3:
/// `escape=None ∧ ownership≠Borrowed ∧ ¬flags.escaped`.
pub fn can_stack_alloc(info: &OwnerInfo, class: EscapeClass, escaped_flag: bool) -> bool {
    class == EscapeClass::None && info.kind != OwnershipKind::Borrowed && !escaped_flag
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escape::EscapeWalker;
    use ward_core::{Arena, Value};

    fn sym<'a>(arena: &'a Arena, name: &'static str) -> &'a Value<'a> {
        arena.alloc(Value::Symbol(name)).unwrap()
    }

    // S1: let x = cons(1, 2) in 0 => Local, unique, Tree, Heap. x escapes
    // nowhere, but cons is a constructor, so its Tree shape forces Heap
    // regardless of escape class (§4.7); a real allocation still needs a
    // free even when nothing observes it.
    #[test]
    fn unused_local_is_unique_and_must_free() {
        let arena = Arena::new();
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

        let mut walker = EscapeWalker::new(&[]);
        walker.walk(expr, true, false);
        let escape = walker.finish();
        let mut shapes = HashMap::new();
        shapes.insert("x".to_string(), Shape::Tree);

        let inferrer = OwnershipInferrer::new(&escape, &shapes);
        let info = inferrer.infer("x", OwnershipHints::default());
        assert_eq!(info.kind, OwnershipKind::Local);
        assert!(info.must_free);
        assert!(info.is_unique);
        assert_eq!(info.strategy, FreeStrategy::Unique);
        assert_eq!(info.alloc, AllocStrategy::Heap);
    }

    // S2: let x = cons(1, 2) in x => Transferred, must_free=false
    #[test]
    fn returned_binding_is_transferred() {
        let arena = Arena::new();
        let let_sym = sym(&arena, "let");
        let x = sym(&arena, "x");
        let cons_sym = sym(&arena, "cons");
        let one = arena.alloc(Value::Int(1)).unwrap();
        let two = arena.alloc(Value::Int(2)).unwrap();
        let cons_expr = Value::list(&arena, &[cons_sym, one, two]).unwrap();
        let binding = Value::list(&arena, &[x, cons_expr]).unwrap();
        let bindings = Value::list(&arena, &[binding]).unwrap();
        let expr = Value::list(&arena, &[let_sym, bindings, x]).unwrap();

        let mut walker = EscapeWalker::new(&[]);
        walker.walk(expr, true, false);
        let escape = walker.finish();
        let mut shapes = HashMap::new();
        shapes.insert("x".to_string(), Shape::Tree);

        let inferrer = OwnershipInferrer::new(&escape, &shapes);
        let info = inferrer.infer("x", OwnershipHints::default());
        assert_eq!(info.kind, OwnershipKind::Transferred);
        assert!(!info.must_free);
        assert_eq!(info.strategy, FreeStrategy::None);
    }

    #[test]
    fn parameter_is_borrowed() {
        let escape = EscapeWalker::new(&["a"]).finish();
        let shapes = HashMap::new();
        let inferrer = OwnershipInferrer::new(&escape, &shapes);
        let info = inferrer.infer("a", OwnershipHints::default());
        assert_eq!(info.kind, OwnershipKind::Borrowed);
        assert_eq!(info.strategy, FreeStrategy::None);
        assert_eq!(info.alloc, AllocStrategy::Heap);
    }

    #[test]
    fn free_strategy_table_matches_spec() {
        assert_eq!(free_strategy(OwnershipKind::Borrowed, true, Shape::Tree), FreeStrategy::None);
        assert_eq!(free_strategy(OwnershipKind::Shared, true, Shape::Tree), FreeStrategy::RcWithTreeRelease);
        assert_eq!(free_strategy(OwnershipKind::Shared, true, Shape::DAG), FreeStrategy::Rc);
        assert_eq!(free_strategy(OwnershipKind::Local, true, Shape::Cyclic), FreeStrategy::Unique);
        assert_eq!(free_strategy(OwnershipKind::Local, false, Shape::Scalar), FreeStrategy::Unique);
        assert_eq!(free_strategy(OwnershipKind::Local, false, Shape::Tree), FreeStrategy::Tree);
        assert_eq!(free_strategy(OwnershipKind::Local, false, Shape::DAG), FreeStrategy::Rc);
    }
}
