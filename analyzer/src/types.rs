//! Type registry (C2, §3.3/§4.2): named record types, field strength, the
//! ownership graph, and back-edge inference.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};

use crate::config::PipelineConfig;
use crate::errors::TypeRegistryError;

/// Whether a reference-typed field keeps its referent reachable for
/// ownership purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strength {
    Strong,
    Weak,
}

/// One field of a registered record type.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub referent_type: Option<String>,
    pub is_reference: bool,
    pub strength: Cell<Strength>,
}

impl FieldInfo {
    pub fn scalar(name: impl Into<String>) -> Self {
        FieldInfo {
            name: name.into(),
            referent_type: None,
            is_reference: false,
            strength: Cell::new(Strength::Strong),
        }
    }

    pub fn reference(name: impl Into<String>, referent_type: impl Into<String>) -> Self {
        FieldInfo {
            name: name.into(),
            referent_type: Some(referent_type.into()),
            is_reference: true,
            strength: Cell::new(Strength::Strong),
        }
    }
}

/// Per-type cycle status computed by `analyze_back_edges`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    None,
    /// Every cycle through this type has at least one weak-marked edge.
    Broken,
    /// At least one cycle remains strong-only.
    Unbroken,
}

struct TypeEntry {
    fields: Vec<FieldInfo>,
}

/// Registry of named record types, keyed by type name (§3.3).
///
/// `register_type` stores field order as given. `build_ownership_graph`
/// and `analyze_back_edges` are idempotent and may be called repeatedly as
/// more types are registered; each re-run only ever promotes additional
/// edges to weak, never un-weakens one (§3.3 invariant).
pub struct TypeRegistry {
    entries: HashMap<String, TypeEntry>,
    order: Vec<String>,
    back_edges_done: bool,
    cycle_status: HashMap<String, CycleStatus>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry {
            entries: HashMap::new(),
            order: Vec::new(),
            back_edges_done: false,
            cycle_status: HashMap::new(),
        }
    }

    pub fn register_type(&mut self, name: &str, fields: Vec<FieldInfo>) -> Result<(), TypeRegistryError> {
        if self.entries.contains_key(name) {
            return Err(TypeRegistryError::DuplicateType(name.to_string()));
        }
        self.entries.insert(name.to_string(), TypeEntry { fields });
        self.order.push(name.to_string());
        // A newly registered type invalidates any previously computed cycle
        // status; back-edge analysis must be re-run before it's queried.
        self.back_edges_done = false;
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn fields(&self, name: &str) -> Option<&[FieldInfo]> {
        self.entries.get(name).map(|e| e.fields.as_slice())
    }

    /// The ownership graph: directed edge from each type to each referent
    /// type of each reference-typed field. This is a pure function of the
    /// registered entries, so "building" it is just computing it on
    /// demand; it's exposed as a method so callers match the spec's named
    /// operation.
    pub fn build_ownership_graph(&self) -> HashMap<String, Vec<(String, String)>> {
        let mut graph: HashMap<String, Vec<(String, String)>> = HashMap::new();
        for name in &self.order {
            let entry = &self.entries[name];
            let mut edges = Vec::new();
            for field in &entry.fields {
                if field.is_reference {
                    if let Some(referent) = &field.referent_type {
                        edges.push((field.name.clone(), referent.clone()));
                    }
                }
            }
            graph.insert(name.clone(), edges);
        }
        graph
    }

    /// Break cycles in the ownership graph by marking one reference edge
    /// per strongly-connected component weak, preferring back-edge-hinted
    /// fields. Idempotent: re-running never re-breaks an already-weak
    /// cycle or re-promotes an already-weak edge (§3.3 invariants).
    pub fn analyze_back_edges(&mut self, config: &PipelineConfig) {
        let graph = self.build_ownership_graph();
        let sccs = tarjan_sccs(&self.order, &graph);

        for scc in &sccs {
            let participants: HashSet<&String> = scc.iter().collect();
            // Intra-SCC edges only: an edge whose source and target are
            // both members of this component.
            let mut intra_edges: Vec<(String, String, String)> = Vec::new(); // (type, field, referent)
            for ty in scc {
                for (field_name, referent) in &graph[ty] {
                    if participants.contains(referent) {
                        intra_edges.push((ty.clone(), field_name.clone(), referent.clone()));
                    }
                }
            }
            if intra_edges.is_empty() {
                continue;
            }
            // Already broken? A cycle already containing a weak edge is not
            // re-broken (§3.3).
            let already_weak = intra_edges.iter().any(|(ty, field, _)| {
                matches!(
                    self.entries[ty]
                        .fields
                        .iter()
                        .find(|f| &f.name == field)
                        .map(|f| f.strength.get()),
                    Some(Strength::Weak)
                )
            });
            if already_weak {
                continue;
            }
            // §4.2 edge case: a self-referential field (1-node SCC) is only
            // ever auto-weakened when it's back-edge-hinted. A general SCC
            // with more than one participating type always has one edge
            // broken, preferring (but not requiring) a hint match.
            let is_self_loop = scc.len() == 1;
            let chosen = if is_self_loop {
                intra_edges.iter().find(|(_, field, _)| config.is_back_edge_pattern(field)).cloned()
            } else {
                intra_edges
                    .iter()
                    .find(|(_, field, _)| config.is_back_edge_pattern(field))
                    .or_else(|| intra_edges.first())
                    .cloned()
            };
            if let Some((ty, field, _)) = chosen {
                if let Some(f) = self.entries.get_mut(&ty).and_then(|e| e.fields.iter_mut().find(|f| f.name == field)) {
                    f.strength.set(Strength::Weak);
                }
            }
        }

        // Recompute cycle status per type using the (possibly now weaker)
        // graph: a type is Unbroken if any remaining strong-only cycle
        // reaches it, Broken if it participates in a cycle that's now
        // acyclic via weak edges, None if it's in no cycle at all.
        let graph = self.build_ownership_graph();
        let strong_graph: HashMap<String, Vec<String>> = self
            .order
            .iter()
            .map(|ty| {
                let targets = graph[ty]
                    .iter()
                    .filter(|(field_name, _)| {
                        !matches!(
                            self.entries[ty]
                                .fields
                                .iter()
                                .find(|f| &f.name == field_name)
                                .map(|f| f.strength.get()),
                            Some(Strength::Weak)
                        )
                    })
                    .map(|(_, referent)| referent.clone())
                    .collect();
                (ty.clone(), targets)
            })
            .collect();
        let strong_sccs = tarjan_sccs(&self.order, &wrap_graph(&strong_graph));

        self.cycle_status.clear();
        for ty in &self.order {
            // A self-loop (1-node SCC) can have more than one field
            // referencing the same type; Tarjan only sees the node, not
            // the multiplicity of edges. Once any one of those fields has
            // been weakened, that self-loop counts as broken even if a
            // second, unhinted field on the same type still references it
            // strongly; that remaining field is recursion, not a cycle
            // the registry left unbroken.
            let has_weak_self_edge = self.entries[ty].fields.iter().any(|f| {
                f.is_reference && f.referent_type.as_deref() == Some(ty.as_str()) && matches!(f.strength.get(), Strength::Weak)
            });
            let in_strong_cycle = strong_sccs.iter().any(|scc| scc.len() > 1 && scc.contains(ty))
                || (!has_weak_self_edge && strong_graph[ty].contains(ty));
            let in_original_cycle = sccs
                .iter()
                .any(|scc| scc.len() > 1 && scc.contains(ty) || (scc.len() == 1 && scc[0] == *ty && graph[ty].iter().any(|(_, r)| r == ty)));
            let status = if !in_original_cycle {
                CycleStatus::None
            } else if in_strong_cycle {
                CycleStatus::Unbroken
            } else {
                CycleStatus::Broken
            };
            self.cycle_status.insert(ty.clone(), status);
        }
        self.back_edges_done = true;
    }

    /// Returns `None` until `analyze_back_edges` has run at least once
    /// since the last registration.
    pub fn cycle_status(&self, type_name: &str) -> Option<CycleStatus> {
        if !self.back_edges_done {
            return None;
        }
        self.cycle_status.get(type_name).copied()
    }

    pub fn is_field_weak(&self, type_name: &str, field: &str) -> bool {
        self.entries
            .get(type_name)
            .and_then(|e| e.fields.iter().find(|f| f.name == field))
            .map(|f| matches!(f.strength.get(), Strength::Weak))
            .unwrap_or(false)
    }

    /// Back-edge field names for a type, per the query API (§6.3).
    pub fn back_edge_fields(&self, type_name: &str) -> Vec<String> {
        self.entries
            .get(type_name)
            .map(|e| {
                e.fields
                    .iter()
                    .filter(|f| matches!(f.strength.get(), Strength::Weak))
                    .map(|f| f.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_back_edge_field(&self, type_name: &str, field: &str) -> bool {
        self.back_edge_fields(type_name).iter().any(|f| f == field)
    }

    pub fn is_cyclic_type(&self, type_name: &str) -> bool {
        matches!(self.cycle_status(type_name), Some(CycleStatus::Unbroken))
    }

    /// `true` if `type_name` sits in a strongly-connected component with
    /// more than one participating type (as opposed to a lone
    /// self-referential field, a 1-node SCC). Used by the shape analyzer
    /// (C6) to distinguish "Broken-Tree" (self-loop weakened) from a true
    /// `Cyclic` classification for a multi-type back-edge break.
    pub fn participates_in_multi_type_cycle(&self, type_name: &str) -> bool {
        let graph = self.build_ownership_graph();
        let sccs = tarjan_sccs(&self.order, &graph);
        sccs.iter().any(|scc| scc.len() > 1 && scc.iter().any(|t| t == type_name))
    }
}

fn wrap_graph(g: &HashMap<String, Vec<String>>) -> HashMap<String, Vec<(String, String)>> {
    g.iter()
        .map(|(k, vs)| (k.clone(), vs.iter().map(|v| (String::new(), v.clone())).collect()))
        .collect()
}

/// Tarjan's SCC algorithm over a named directed graph, grounded on the
/// teacher's `call_graph.rs::find_sccs` (same algorithm, generalized from
/// `HashSet<String>` call-edges to labeled ownership-graph edges).
fn tarjan_sccs(order: &[String], graph: &HashMap<String, Vec<(String, String)>>) -> Vec<Vec<String>> {
    struct State {
        index_counter: usize,
        stack: Vec<String>,
        on_stack: HashSet<String>,
        indices: HashMap<String, usize>,
        lowlink: HashMap<String, usize>,
        sccs: Vec<Vec<String>>,
    }

    fn strongconnect(v: &str, graph: &HashMap<String, Vec<(String, String)>>, state: &mut State) {
        state.indices.insert(v.to_string(), state.index_counter);
        state.lowlink.insert(v.to_string(), state.index_counter);
        state.index_counter += 1;
        state.stack.push(v.to_string());
        state.on_stack.insert(v.to_string());

        if let Some(edges) = graph.get(v) {
            for (_, w) in edges {
                if !graph.contains_key(w) {
                    continue;
                }
                if !state.indices.contains_key(w) {
                    strongconnect(w, graph, state);
                    let w_low = state.lowlink[w];
                    let v_low = state.lowlink[v];
                    state.lowlink.insert(v.to_string(), v_low.min(w_low));
                } else if state.on_stack.contains(w) {
                    let w_idx = state.indices[w];
                    let v_low = state.lowlink[v];
                    state.lowlink.insert(v.to_string(), v_low.min(w_idx));
                }
            }
        }

        if state.lowlink[v] == state.indices[v] {
            let mut component = Vec::new();
            loop {
                let w = state.stack.pop().unwrap();
                state.on_stack.remove(&w);
                let is_v = w == v;
                component.push(w);
                if is_v {
                    break;
                }
            }
            state.sccs.push(component);
        }
    }

    let mut state = State {
        index_counter: 0,
        stack: Vec::new(),
        on_stack: HashSet::new(),
        indices: HashMap::new(),
        lowlink: HashMap::new(),
        sccs: Vec::new(),
    };

    for name in order {
        if !state.indices.contains_key(name) {
            strongconnect(name, graph, &mut state);
        }
    }
    state.sccs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_type_is_an_error() {
        let mut reg = TypeRegistry::new();
        reg.register_type("Node", vec![FieldInfo::scalar("value")]).unwrap();
        let err = reg.register_type("Node", vec![]).unwrap_err();
        assert_eq!(err, TypeRegistryError::DuplicateType("Node".to_string()));
    }

    #[test]
    fn tree_type_has_no_cycle() {
        let mut reg = TypeRegistry::new();
        reg.register_type("Leaf", vec![FieldInfo::scalar("value")]).unwrap();
        let cfg = PipelineConfig::default();
        reg.analyze_back_edges(&cfg);
        assert_eq!(reg.cycle_status("Leaf"), Some(CycleStatus::None));
    }

    // S7 from §8.3: deftype Node (value Int) (next Node) (parent Node)
    #[test]
    fn back_edge_weakening_prefers_hinted_field() {
        let mut reg = TypeRegistry::new();
        reg.register_type(
            "Node",
            vec![
                FieldInfo::scalar("value"),
                FieldInfo::reference("next", "Node"),
                FieldInfo::reference("parent", "Node"),
            ],
        )
        .unwrap();
        let cfg = PipelineConfig::default();
        reg.analyze_back_edges(&cfg);
        assert!(reg.is_field_weak("Node", "parent"));
        assert!(!reg.is_field_weak("Node", "next"));
        assert_eq!(reg.cycle_status("Node"), Some(CycleStatus::Broken));
    }

    #[test]
    fn mutual_cycle_without_hint_breaks_on_first_edge_and_is_idempotent() {
        let mut reg = TypeRegistry::new();
        reg.register_type("A", vec![FieldInfo::reference("b", "B")]).unwrap();
        reg.register_type("B", vec![FieldInfo::reference("a", "A")]).unwrap();
        let cfg = PipelineConfig::default();
        reg.analyze_back_edges(&cfg);
        let a_weak = reg.is_field_weak("A", "b");
        let b_weak = reg.is_field_weak("B", "a");
        assert!(a_weak ^ b_weak, "exactly one edge in the 2-cycle is weakened");
        assert_eq!(reg.cycle_status("A"), Some(CycleStatus::Broken));
        assert_eq!(reg.cycle_status("B"), Some(CycleStatus::Broken));

        // Idempotence: re-running doesn't flip which edge is weak.
        reg.analyze_back_edges(&cfg);
        assert_eq!(reg.is_field_weak("A", "b"), a_weak);
        assert_eq!(reg.is_field_weak("B", "a"), b_weak);
    }

    #[test]
    fn self_reference_without_hint_stays_unbroken() {
        let mut reg = TypeRegistry::new();
        reg.register_type("Stream", vec![FieldInfo::reference("tail", "Stream")]).unwrap();
        let cfg = PipelineConfig::default();
        reg.analyze_back_edges(&cfg);
        // §4.2: a self-referential 1-cycle is only auto-weakened when the
        // field is back-edge-hinted. `tail` isn't, so it stays strong.
        assert!(!reg.is_field_weak("Stream", "tail"));
        assert_eq!(reg.cycle_status("Stream"), Some(CycleStatus::Unbroken));
    }

    #[test]
    fn self_reference_with_hint_is_broken() {
        let mut reg = TypeRegistry::new();
        reg.register_type("Node", vec![FieldInfo::reference("parent", "Node")]).unwrap();
        let cfg = PipelineConfig::default();
        reg.analyze_back_edges(&cfg);
        assert!(reg.is_field_weak("Node", "parent"));
        assert_eq!(reg.cycle_status("Node"), Some(CycleStatus::Broken));
    }

    #[test]
    fn fresh_registry_is_deterministic() {
        let cfg = PipelineConfig::default();
        let mut reg1 = TypeRegistry::new();
        reg1.register_type("Leaf", vec![FieldInfo::scalar("v")]).unwrap();
        reg1.analyze_back_edges(&cfg);

        let mut reg2 = TypeRegistry::new();
        reg2.register_type("Leaf", vec![FieldInfo::scalar("v")]).unwrap();
        reg2.analyze_back_edges(&cfg);

        assert_eq!(reg1.cycle_status("Leaf"), reg2.cycle_status("Leaf"));
    }
}
