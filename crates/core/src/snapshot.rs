//! Per-cycle snapshot and the shared slot that publishes it
//!
//! The aggregator is the only writer. It builds a complete `BoardSnapshot`
//! privately and swaps it in; readers clone the `Arc` and never observe a
//! partially merged cycle.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{EnrichedRow, RawRow};

/// De-duplicated rows of one cycle, keyed by symbol.
///
/// Iteration follows the order in which each symbol was first inserted;
/// a later insert for the same symbol replaces the value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    rows: Vec<RawRow>,
    index: HashMap<String, usize>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row, last write wins. Rows with an empty symbol are dropped.
    /// Returns true when an earlier row for the same symbol was replaced.
    pub fn insert(&mut self, row: RawRow) -> bool {
        if row.symbol.is_empty() {
            return false;
        }

        match self.index.get(&row.symbol) {
            Some(&pos) => {
                self.rows[pos] = row;
                true
            }
            None => {
                self.index.insert(row.symbol.clone(), self.rows.len());
                self.rows.push(row);
                false
            }
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&RawRow> {
        self.index.get(symbol).map(|&pos| &self.rows[pos])
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.index.contains_key(symbol)
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.symbol.as_str())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// What subscribers read: the enriched rows of the latest cycle
#[derive(Debug, Clone)]
pub struct BoardSnapshot {
    /// Cycle that produced this snapshot, 0 before the first cycle
    pub cycle: u64,
    pub captured_at: DateTime<Utc>,
    pub rows: Vec<EnrichedRow>,
}

impl BoardSnapshot {
    pub fn empty() -> Self {
        Self {
            cycle: 0,
            captured_at: Utc::now(),
            rows: vec![],
        }
    }

    /// JSON array of rows, the payload pushed to subscribers
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.rows)
    }
}

/// Single-writer, multi-reader holder for the latest `BoardSnapshot`
#[derive(Debug)]
pub struct SnapshotStore {
    current: RwLock<Arc<BoardSnapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(BoardSnapshot::empty())),
        }
    }

    /// Replace the current snapshot wholesale
    pub fn publish(&self, snapshot: BoardSnapshot) {
        let next = Arc::new(snapshot);
        *self.current.write() = next;
    }

    /// Latest published snapshot
    pub fn latest(&self) -> Arc<BoardSnapshot> {
        Arc::clone(&self.current.read())
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(symbol: &str, price: &str, session: usize) -> RawRow {
        RawRow {
            symbol: symbol.to_string(),
            issuer: String::new(),
            price: price.to_string(),
            volume: String::new(),
            change: String::new(),
            source_session: session,
        }
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut snapshot = Snapshot::new();
        assert!(!snapshot.insert(row("A", "1", 0)));
        assert!(!snapshot.insert(row("B", "2", 0)));
        assert!(snapshot.insert(row("A", "3", 1)));

        let symbols: Vec<_> = snapshot.symbols().collect();
        assert_eq!(symbols, vec!["A", "B"]);
        assert_eq!(snapshot.get("A").unwrap().price, "3");
        assert_eq!(snapshot.get("A").unwrap().source_session, 1);
    }

    #[test]
    fn test_empty_symbol_is_dropped() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(row("", "1", 0));
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_store_swaps_whole_snapshot() {
        let store = SnapshotStore::new();
        let before = store.latest();
        assert_eq!(before.cycle, 0);
        assert!(before.rows.is_empty());

        store.publish(BoardSnapshot {
            cycle: 7,
            captured_at: Utc::now(),
            rows: vec![],
        });

        // Readers holding the old Arc keep a consistent view
        assert_eq!(before.cycle, 0);
        assert_eq!(store.latest().cycle, 7);
    }

    #[test]
    fn test_empty_snapshot_serializes_to_empty_array() {
        assert_eq!(BoardSnapshot::empty().to_json().unwrap(), "[]");
    }
}
