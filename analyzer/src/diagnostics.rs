//! Diagnostics: the `(severity, phase, position, message)` tuples of §6.4.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How serious a diagnostic is. `Error` is reserved for impossible internal
/// states (§6.4); every normal conservative fallback is `Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Which pass produced a diagnostic, for routing/filtering by a host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    TypeRegistry,
    Cfg,
    Liveness,
    Escape,
    Shape,
    Ownership,
    RcElision,
    Region,
    Reuse,
    Summary,
    Concurrency,
    Lowering,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::TypeRegistry => "type_registry",
            Phase::Cfg => "cfg",
            Phase::Liveness => "liveness",
            Phase::Escape => "escape",
            Phase::Shape => "shape",
            Phase::Ownership => "ownership",
            Phase::RcElision => "rc_elision",
            Phase::Region => "region",
            Phase::Reuse => "reuse",
            Phase::Summary => "summary",
            Phase::Concurrency => "concurrency",
            Phase::Lowering => "lowering",
        };
        write!(f, "{s}")
    }
}

/// One diagnostic record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub phase: Phase,
    /// AST-evaluation position this diagnostic anchors to, if any (§4.5's
    /// monotonically increasing position counter).
    pub position: Option<usize>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, phase: Phase, position: Option<usize>, message: impl Into<String>) -> Self {
        Diagnostic {
            severity,
            phase,
            position,
            message: message.into(),
        }
    }

    pub fn info(phase: Phase, position: Option<usize>, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, phase, position, message)
    }

    pub fn warn(phase: Phase, position: Option<usize>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warn, phase, position, message)
    }

    pub fn error(phase: Phase, position: Option<usize>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, phase, position, message)
    }

    /// Log this diagnostic through `tracing` at the matching level, per
    /// SPEC_FULL.md §B.
    pub fn emit(&self) {
        match self.severity {
            Severity::Info => tracing::info!(phase = %self.phase, position = ?self.position, "{}", self.message),
            Severity::Warn => tracing::warn!(phase = %self.phase, position = ?self.position, "{}", self.message),
            Severity::Error => tracing::error!(phase = %self.phase, position = ?self.position, "{}", self.message),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(p) => write!(f, "[{}] {} @{}: {}", self.severity, self.phase, p, self.message),
            None => write!(f, "[{}] {}: {}", self.severity, self.phase, self.message),
        }
    }
}

/// An append-only diagnostic sink shared by all passes for one `Pipeline`.
#[derive(Debug, Default, Clone)]
pub struct DiagnosticSink {
    records: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        diag.emit();
        self.records.push(diag);
    }

    pub fn records(&self) -> &[Diagnostic] {
        &self.records
    }

    pub fn has_errors(&self) -> bool {
        self.records.iter().any(|d| d.severity == Severity::Error)
    }

    /// Serialize the accumulated diagnostics as JSON, for a host driver
    /// that wants to report a whole compilation's diagnostics together
    /// (§7 "the driver may collect all diagnostics and report them
    /// together") the way the teacher's LSP front-end serializes its own
    /// `lsp_types::Diagnostic` values over the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.records)
    }
}
