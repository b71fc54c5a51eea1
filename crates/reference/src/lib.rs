//! Static reference data and enrichment
//!
//! Features:
//! - One-shot load of the latest exercise prices
//! - SQLite-backed source
//! - Load failures degrade to an empty map instead of aborting startup
//! - Pure row enrichment

pub mod store;
pub mod sqlite;
pub mod enricher;

pub use store::{ReferenceRecord, ReferenceSource, ReferenceStore};
pub use sqlite::SqliteReferenceSource;
pub use enricher::Enricher;
