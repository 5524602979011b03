//! Error types for the few operations that can fail outright.
//!
//! Most passes never fail (§4.15/§7): they degrade to a conservative
//! default and record a `Diagnostic` instead. These types cover the narrow
//! set of operations where there's nothing sensible to degrade to.

use std::fmt;

/// Errors from [`crate::types::TypeRegistry`] operations (§4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRegistryError {
    DuplicateType(String),
}

impl fmt::Display for TypeRegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRegistryError::DuplicateType(name) => write!(f, "type `{name}` is already registered"),
        }
    }
}

impl std::error::Error for TypeRegistryError {}

/// Structural problems in one subtree (§7 "Structural"). The CFG builder
/// downgrades these to a `warn` diagnostic and treats the subtree as a
/// no-op rather than propagating the error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfgError {
    MalformedForm { form: String, reason: String },
}

impl fmt::Display for CfgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CfgError::MalformedForm { form, reason } => write!(f, "malformed `{form}`: {reason}"),
        }
    }
}

impl std::error::Error for CfgError {}

/// Errors that abort the current top-level form (§7 "Resource"/"Internal").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    ArenaExhausted,
    RegionMismatch { region: u32 },
    OwnershipLatticeCycle { var: String },
    TypeRegistry(TypeRegistryError),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::ArenaExhausted => write!(f, "arena exhausted"),
            PipelineError::RegionMismatch { region } => write!(f, "region {region} exited without matching enter"),
            PipelineError::OwnershipLatticeCycle { var } => {
                write!(f, "impossible ownership-kind cycle for `{var}`")
            }
            PipelineError::TypeRegistry(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<TypeRegistryError> for PipelineError {
    fn from(e: TypeRegistryError) -> Self {
        PipelineError::TypeRegistry(e)
    }
}
