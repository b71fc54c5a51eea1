//! In-memory render sessions for tests

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use warrant_core::{RowCells, ScrapeError, ScrapeResult};

use crate::scripts;
use crate::session::{RenderSession, SessionFactory};

pub fn cells(symbol: &str, price: &str) -> RowCells {
    RowCells {
        symbol: symbol.to_string(),
        issuer: "SSI".to_string(),
        price: price.to_string(),
        volume: "1,000".to_string(),
        change: "0.00".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MockEvent {
    Navigate { session: usize, at: Instant },
    Position { session: usize, offset: u64 },
    Close { session: usize },
}

/// Behaviour and recorded calls of one mock session
#[derive(Debug, Default)]
pub struct MockState {
    pub rows: Mutex<Vec<RowCells>>,
    pub fail_navigation: AtomicBool,
    pub fail_extraction: AtomicBool,
    /// Extraction reports the browser context as gone
    pub lose_session: AtomicBool,
    pub extraction_delay: Mutex<Option<Duration>>,
    pub navigation_delay: Mutex<Option<Duration>>,
}

#[derive(Debug)]
pub struct MockSession {
    index: usize,
    state: Arc<MockState>,
    events: Arc<Mutex<Vec<MockEvent>>>,
}

impl MockSession {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            state: Arc::new(MockState::default()),
            events: Arc::new(Mutex::new(vec![])),
        }
    }

    pub fn with_rows(self, rows: Vec<RowCells>) -> Self {
        *self.state.rows.lock() = rows;
        self
    }

    pub fn failing_extraction(self) -> Self {
        self.state.fail_extraction.store(true, Ordering::SeqCst);
        self
    }

    pub fn losing_session(self) -> Self {
        self.state.lose_session.store(true, Ordering::SeqCst);
        self
    }

    pub fn state(&self) -> &Arc<MockState> {
        &self.state
    }

    fn record(&self, event: MockEvent) {
        self.events.lock().push(event);
    }
}

#[async_trait::async_trait]
impl RenderSession for MockSession {
    fn index(&self) -> usize {
        self.index
    }

    async fn navigate(&self, url: &str, timeout: Duration) -> ScrapeResult<()> {
        self.record(MockEvent::Navigate {
            session: self.index,
            at: Instant::now(),
        });

        let delay = *self.state.navigation_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay.min(timeout)).await;
        }

        if self.state.fail_navigation.load(Ordering::SeqCst) {
            return Err(ScrapeError::NavigationTimeout {
                url: url.to_string(),
                timeout,
            });
        }
        Ok(())
    }

    async fn execute(&self, script: &str, args: Vec<Value>) -> ScrapeResult<Value> {
        if script == scripts::ROW_PRESENT {
            return Ok(Value::Bool(true));
        }

        if script == scripts::POSITION_VIEW {
            let offset = args.get(1).and_then(Value::as_u64).unwrap_or_default();
            self.record(MockEvent::Position {
                session: self.index,
                offset,
            });
            return Ok(Value::from("container"));
        }

        if script == scripts::EXTRACT_ROWS {
            let delay = *self.state.extraction_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.state.lose_session.load(Ordering::SeqCst) {
                return Err(ScrapeError::SessionNotOpen(self.index));
            }
            if self.state.fail_extraction.load(Ordering::SeqCst) {
                return Err(ScrapeError::Script("stale element reference".to_string()));
            }
            let rows = self.state.rows.lock().clone();
            return serde_json::to_value(rows).map_err(|e| ScrapeError::Script(e.to_string()));
        }

        Err(ScrapeError::Script("unknown script".to_string()))
    }

    async fn close(&self) -> ScrapeResult<()> {
        self.record(MockEvent::Close {
            session: self.index,
        });
        Ok(())
    }
}

/// Factory handing out mock sessions whose state tests can reach
#[derive(Debug, Default)]
pub struct MockFactory {
    states: Mutex<HashMap<usize, Arc<MockState>>>,
    events: Arc<Mutex<Vec<MockEvent>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for session `index`, created on first access
    pub fn state(&self, index: usize) -> Arc<MockState> {
        Arc::clone(self.states.lock().entry(index).or_default())
    }

    pub fn set_rows(&self, index: usize, rows: Vec<RowCells>) {
        *self.state(index).rows.lock() = rows;
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.events.lock().clone()
    }

    pub fn navigations(&self) -> Vec<(usize, Instant)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::Navigate { session, at } => Some((session, at)),
                _ => None,
            })
            .collect()
    }
}

impl SessionFactory for MockFactory {
    type Session = MockSession;

    fn create(&self, index: usize) -> MockSession {
        MockSession {
            index,
            state: self.state(index),
            events: Arc::clone(&self.events),
        }
    }
}
