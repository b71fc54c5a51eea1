//! Joins live rows with the reference map

use std::sync::Arc;

use warrant_core::{EnrichedRow, RawRow, ReferenceMap, Snapshot};

/// Pure enrichment over a shared, read-only reference map
#[derive(Debug, Clone)]
pub struct Enricher {
    reference: Arc<ReferenceMap>,
}

impl Enricher {
    pub fn new(reference: Arc<ReferenceMap>) -> Self {
        Self { reference }
    }

    pub fn enrich(&self, row: &RawRow) -> EnrichedRow {
        enrich_row(row, &self.reference)
    }

    /// Enrich every row of a snapshot, preserving its order
    pub fn enrich_snapshot(&self, snapshot: &Snapshot) -> Vec<EnrichedRow> {
        snapshot.rows().iter().map(|row| self.enrich(row)).collect()
    }

    pub fn reference(&self) -> &ReferenceMap {
        &self.reference
    }
}

/// Attach the exercise price for the row's symbol, 0.0 when absent
pub fn enrich_row(row: &RawRow, reference: &ReferenceMap) -> EnrichedRow {
    EnrichedRow {
        row: row.clone(),
        exercise_price: reference.exercise_price(&row.symbol),
    }
}
