//! Pipeline configuration.
//!
//! Follows the teacher's `CompilerConfig` extensibility pattern: a plain
//! struct with `with_*` builder methods and a `Default` that reproduces
//! every default named in the spec.

/// The default back-edge-hint substrings (§3.3), checked case-insensitively
/// as a substring or as a `_`-split prefix/suffix.
pub const DEFAULT_BACK_EDGE_HINTS: &[&str] = &[
    "parent",
    "prev",
    "previous",
    "back",
    "up",
    "owner",
    "container",
    "outer",
    "ancestor",
    "predecessor",
    "enclosing",
    "backref",
    "backpointer",
];

/// Knobs the spec leaves to the implementer.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Hard cap on liveness fixed-point iterations (§4.4).
    pub liveness_iteration_cap: usize,
    /// Forwarded to `ward_core::Arena`'s initial chunk size (§3.2).
    pub arena_chunk_bytes: usize,
    /// Field-name substrings that mark a back-edge hint (§3.3, §9).
    pub back_edge_hints: Vec<String>,
    /// When set, semantic-conservative degrades (§7) also emit an `info`
    /// diagnostic instead of silently degrading.
    pub verbose_diagnostics: bool,
    /// When `false`, region bulk-free is never legal (§9 Open Questions:
    /// degrade rather than risk an inexact external refcount).
    pub region_bulk_free_requires_exact_refcount: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            liveness_iteration_cap: 1000,
            arena_chunk_bytes: 1024 * 1024,
            back_edge_hints: DEFAULT_BACK_EDGE_HINTS.iter().map(|s| s.to_string()).collect(),
            verbose_diagnostics: false,
            region_bulk_free_requires_exact_refcount: true,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_liveness_cap(mut self, cap: usize) -> Self {
        self.liveness_iteration_cap = cap;
        self
    }

    pub fn with_arena_chunk_bytes(mut self, bytes: usize) -> Self {
        self.arena_chunk_bytes = bytes;
        self
    }

    pub fn with_back_edge_hints(mut self, hints: Vec<String>) -> Self {
        self.back_edge_hints = hints;
        self
    }

    pub fn with_verbose_diagnostics(mut self, verbose: bool) -> Self {
        self.verbose_diagnostics = verbose;
        self
    }

    /// The query named in §9's Open Questions and §6.3:
    /// `is_back_edge_pattern(name)`.
    pub fn is_back_edge_pattern(&self, field_name: &str) -> bool {
        let lower = field_name.to_ascii_lowercase();
        self.back_edge_hints.iter().any(|hint| {
            if lower.contains(hint.as_str()) {
                return true;
            }
            lower.split('_').any(|part| part == hint.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.liveness_iteration_cap, 1000);
        assert_eq!(cfg.arena_chunk_bytes, 1024 * 1024);
        assert!(cfg.region_bulk_free_requires_exact_refcount);
    }

    #[test]
    fn back_edge_pattern_matches_substring_and_split() {
        let cfg = PipelineConfig::default();
        assert!(cfg.is_back_edge_pattern("parent"));
        assert!(cfg.is_back_edge_pattern("Parent"));
        assert!(cfg.is_back_edge_pattern("parent_node"));
        assert!(cfg.is_back_edge_pattern("node_back"));
        assert!(!cfg.is_back_edge_pattern("value"));
    }

    #[test]
    fn back_edge_hints_are_overridable() {
        let cfg = PipelineConfig::default().with_back_edge_hints(vec!["custom".to_string()]);
        assert!(cfg.is_back_edge_pattern("custom_field"));
        assert!(!cfg.is_back_edge_pattern("parent"));
    }
}
