//! Multi-session scraper for a virtualized instrument list
//!
//! Features:
//! - Parallel render sessions parked at staggered scroll offsets
//! - Staggered startup with degraded-session tolerance
//! - Per-session extraction with explicit success/failure results
//! - Deterministic last-write-wins merge into one snapshot per cycle

pub mod session;
pub mod webdriver;
pub mod scripts;
pub mod extract;
pub mod pool;
pub mod aggregator;

#[cfg(test)]
pub(crate) mod testing;

pub use session::{RenderSession, SessionFactory};
pub use webdriver::{WebDriverFactory, WebDriverSession};
pub use extract::{ExtractionOutcome, RowExtractor, SessionExtraction};
pub use pool::{PoolStats, RenderSessionPool};
pub use aggregator::{merge_extractions, CycleReport, SnapshotAggregator};
