//! Ward Core: the semantic value model and compilation arena.
//!
//! This crate provides the one shared data structure the analysis pipeline
//! is built around: a tagged [`Value`] enum used uniformly as both the AST
//! fed in by the reader/resolver and the semantic values the analyses reason
//! about (the surface language is homoiconic, so "code" and "data" share a
//! representation).
//!
//! Values are never freed individually. They live in an [`Arena`] that is
//! dropped whole at the end of one compilation. The arena is an explicit,
//! owned object rather than thread-local or process-global state, so that
//! multiple independent compilations can coexist (see the design notes on
//! global mutable state).
//!
//! # Modules
//!
//! - `arena`: bump allocation with chained blocks, doubling growth.
//! - `value`: the `Value` sum type and list/pair helpers.

pub mod arena;
pub mod value;

pub use arena::Arena;
pub use value::{ProcessState, Value};
