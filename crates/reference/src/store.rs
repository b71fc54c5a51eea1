//! Reference store: loads the symbol -> exercise price map once

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use warrant_core::{ReferenceMap, ReferenceResult};

/// One row of the reference table
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceRecord {
    pub symbol: Option<String>,
    pub exercise_price: Option<f64>,
}

/// Read-only query capability over the reference data
pub trait ReferenceSource: Send + Sync {
    /// Rows of the most recent record-date partition
    fn fetch_latest(&self) -> ReferenceResult<Vec<ReferenceRecord>>;

    fn describe(&self) -> String;
}

/// Loader for the immutable reference map
pub struct ReferenceStore;

impl ReferenceStore {
    /// Load the reference map. Never fails: any source error yields an empty map.
    pub fn load(source: &dyn ReferenceSource) -> Arc<ReferenceMap> {
        let start = Instant::now();

        match source.fetch_latest() {
            Ok(records) => {
                let map = Self::build_map(records);
                info!(
                    "Loaded {} reference prices from {} in {:?}",
                    map.len(),
                    source.describe(),
                    start.elapsed()
                );
                Arc::new(map)
            }
            Err(e) => {
                error!(
                    "Reference data unavailable from {}: {}; exercise prices default to 0",
                    source.describe(),
                    e
                );
                Arc::new(ReferenceMap::new())
            }
        }
    }

    /// Trim symbols, drop blank ones, default missing prices to 0.0
    pub fn build_map(records: Vec<ReferenceRecord>) -> ReferenceMap {
        let mut map = ReferenceMap::new();

        for record in records {
            let symbol = match record.symbol.as_deref().map(str::trim) {
                Some(s) if !s.is_empty() => s.to_string(),
                _ => {
                    debug!("Skipping reference row without symbol");
                    continue;
                }
            };

            map.insert(symbol, record.exercise_price.unwrap_or(0.0));
        }

        map
    }
}
