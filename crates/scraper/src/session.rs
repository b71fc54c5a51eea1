//! Render session capability

use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use warrant_core::{ScrapeError, ScrapeResult};

use crate::scripts;

/// Interval between row-presence checks
pub const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// An isolated, stateful view of the source page
#[async_trait::async_trait]
pub trait RenderSession: Send + Sync {
    /// Ordinal of this session within its pool
    fn index(&self) -> usize;

    /// Navigate to `url`, failing once `timeout` elapses
    async fn navigate(&self, url: &str, timeout: Duration) -> ScrapeResult<()>;

    /// Run a script against the current view and return its JSON result
    async fn execute(&self, script: &str, args: Vec<Value>) -> ScrapeResult<Value>;

    /// Release the session. Closing twice is not an error.
    async fn close(&self) -> ScrapeResult<()>;

    /// Poll until an element matching `selector` exists
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> ScrapeResult<()> {
        let deadline = Instant::now() + timeout;

        loop {
            match self
                .execute(scripts::ROW_PRESENT, vec![Value::from(selector)])
                .await
            {
                Ok(Value::Bool(true)) => return Ok(()),
                Ok(_) => {}
                Err(e) => debug!(session = self.index(), "Row check failed: {}", e),
            }

            if Instant::now() >= deadline {
                return Err(ScrapeError::SelectorTimeout {
                    selector: selector.to_string(),
                    timeout,
                });
            }

            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }
}

/// Creates sessions for the pool
pub trait SessionFactory: Send + Sync {
    type Session: RenderSession + 'static;

    /// Build the session with ordinal `index`. No I/O happens here; the
    /// session connects on first navigation.
    fn create(&self, index: usize) -> Self::Session;
}
