//! Core types shared by the warrant board crates
//!
//! This crate provides:
//! - Live and enriched row types
//! - The per-cycle snapshot and its single-writer store
//! - Configuration, errors and the shutdown signal

pub mod types;
pub mod snapshot;
pub mod settings;
pub mod errors;
pub mod shutdown;

pub use types::*;
pub use snapshot::*;
pub use settings::*;
pub use errors::*;
pub use shutdown::*;
