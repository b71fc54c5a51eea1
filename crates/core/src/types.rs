//! Core type definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Lifecycle of a single render session inside the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Starting,
    Positioned,
    Active,
    Failed,
    Closed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Starting => "starting",
            SessionState::Positioned => "positioned",
            SessionState::Active => "active",
            SessionState::Failed => "failed",
            SessionState::Closed => "closed",
        }
    }

    /// Whether the session still takes part in extraction cycles
    pub fn is_live(&self) -> bool {
        !matches!(self, SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One instrument row as read from a session's viewport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    pub symbol: String,
    pub issuer: String,
    pub price: String,
    pub volume: String,
    pub change: String,
    pub source_session: usize,
}

/// Cell texts returned by the DOM query, before session tagging
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowCells {
    pub symbol: String,
    pub issuer: String,
    pub price: String,
    pub volume: String,
    pub change: String,
}

impl RowCells {
    /// Tag the cells with the session they were read from. Text is trimmed.
    pub fn into_row(self, source_session: usize) -> RawRow {
        RawRow {
            symbol: self.symbol.trim().to_string(),
            issuer: self.issuer.trim().to_string(),
            price: self.price.trim().to_string(),
            volume: self.volume.trim().to_string(),
            change: self.change.trim().to_string(),
            source_session,
        }
    }
}

/// Row delivered to subscribers: the live row plus its reference exercise price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRow {
    #[serde(flatten)]
    pub row: RawRow,
    pub exercise_price: f64,
}

/// Static symbol -> exercise price mapping, loaded once
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceMap {
    prices: HashMap<String, f64>,
}

impl ReferenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a price. Negative and non-finite values are stored as 0.0.
    pub fn insert(&mut self, symbol: impl Into<String>, price: f64) {
        let price = if price.is_finite() && price > 0.0 { price } else { 0.0 };
        self.prices.insert(symbol.into(), price);
    }

    /// Exercise price for a symbol, 0.0 when unknown
    pub fn exercise_price(&self, symbol: &str) -> f64 {
        self.prices.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.prices.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

impl FromIterator<(String, f64)> for ReferenceMap {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        let mut map = ReferenceMap::new();
        for (symbol, price) in iter {
            map.insert(symbol, price);
        }
        map
    }
}
