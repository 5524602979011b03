//! Reuse matcher (C10, §3.4/§4.10): Perceus-style FBIP reuse, pairing a
//! pending free with a subsequent same-size-class allocation.

/// Word size assumed when sizing user records (§4.10).
const WORD_BYTES: usize = 8;
/// The smallest size class; scalars round down to exactly this.
const MIN_CLASS: usize = 24;

/// What's being allocated, for size-class inference (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    Scalar,
    Pair,
    StringOrSymbol,
    UserRecord { field_count: usize },
}

impl TargetType {
    pub fn size_class(self) -> usize {
        match self {
            TargetType::Scalar => MIN_CLASS,
            TargetType::Pair | TargetType::StringOrSymbol => 32,
            TargetType::UserRecord { field_count } => round_to_class(field_count * WORD_BYTES),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TargetType::Scalar => "Scalar",
            TargetType::Pair => "Pair",
            TargetType::StringOrSymbol => "StringOrSymbol",
            TargetType::UserRecord { .. } => "Record",
        }
    }
}

fn round_to_class(bytes: usize) -> usize {
    let b = bytes.max(MIN_CLASS);
    b.div_ceil(8) * 8
}

#[derive(Debug, Clone)]
pub struct ReuseCandidate {
    pub alloc_pos: usize,
    pub free_pos: usize,
    pub freed_var: String,
    pub target_type: String,
    pub size_class: usize,
    pub can_reuse: bool,
    pub is_consumed: bool,
}

#[derive(Debug, Clone)]
struct PendingFree {
    var: String,
    free_pos: usize,
    size_class: usize,
    is_unique: bool,
}

/// Matches allocations against variables whose last use has passed but
/// whose free hasn't been emitted yet, in evaluation order.
#[derive(Debug, Default)]
pub struct ReuseMatcher {
    pending: Vec<PendingFree>,
    matches: Vec<ReuseCandidate>,
}

impl ReuseMatcher {
    pub fn new() -> Self {
        ReuseMatcher::default()
    }

    /// Record that `var`'s last use has passed at `free_pos` and it would
    /// otherwise be freed here. Non-unique/shared-owned slots are never
    /// reuse candidates (§4.10 precondition), so they're simply not
    /// tracked.
    pub fn record_pending_free(&mut self, var: &str, free_pos: usize, target: TargetType, is_unique: bool) {
        if !is_unique {
            return;
        }
        self.pending.push(PendingFree {
            var: var.to_string(),
            free_pos,
            size_class: target.size_class(),
            is_unique,
        });
    }

    /// Try to satisfy an allocation of `target` at `alloc_pos` from a
    /// pending free in the same size class. Consumes the matched pending
    /// free on success so it isn't reused twice.
    pub fn try_match(&mut self, alloc_pos: usize, target: TargetType) -> Option<ReuseCandidate> {
        let size_class = target.size_class();
        let idx = self
            .pending
            .iter()
            .position(|p| p.is_unique && p.size_class == size_class && p.free_pos < alloc_pos)?;
        let pending = self.pending.remove(idx);
        let candidate = ReuseCandidate {
            alloc_pos,
            free_pos: pending.free_pos,
            freed_var: pending.var,
            target_type: target.name().to_string(),
            size_class,
            can_reuse: true,
            is_consumed: false,
        };
        self.matches.push(candidate.clone());
        Some(candidate)
    }

    pub fn matches(&self) -> &[ReuseCandidate] {
        &self.matches
    }

    /// Pending frees that were never matched by an allocation: ordinary
    /// frees the lowering engine still needs to emit.
    pub fn unmatched(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(|p| p.var.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_classes_match_spec() {
        assert_eq!(TargetType::Scalar.size_class(), 24);
        assert_eq!(TargetType::Pair.size_class(), 32);
        assert_eq!(TargetType::StringOrSymbol.size_class(), 32);
    }

    // S8: let x = cons(1,2) in let y = cons(3, x) in y, with x's last use
    // right before the second cons.
    #[test]
    fn reuse_matches_same_size_class() {
        let mut matcher = ReuseMatcher::new();
        matcher.record_pending_free("x", 2, TargetType::Pair, true);
        let candidate = matcher.try_match(3, TargetType::Pair).unwrap();
        assert_eq!(candidate.freed_var, "x");
        assert!(candidate.can_reuse);
        assert!(matcher.unmatched().next().is_none());
    }

    #[test]
    fn non_unique_free_is_never_a_candidate() {
        let mut matcher = ReuseMatcher::new();
        matcher.record_pending_free("x", 2, TargetType::Pair, false);
        assert!(matcher.try_match(3, TargetType::Pair).is_none());
    }

    #[test]
    fn mismatched_size_class_does_not_match() {
        let mut matcher = ReuseMatcher::new();
        matcher.record_pending_free("x", 2, TargetType::Scalar, true);
        assert!(matcher.try_match(3, TargetType::Pair).is_none());
    }

    #[test]
    fn allocation_before_free_position_does_not_match() {
        let mut matcher = ReuseMatcher::new();
        matcher.record_pending_free("x", 5, TargetType::Pair, true);
        assert!(matcher.try_match(2, TargetType::Pair).is_none());
    }
}
