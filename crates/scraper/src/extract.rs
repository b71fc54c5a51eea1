//! Row extraction from a session's current view

use serde_json::Value;
use std::time::Duration;

use warrant_core::{ColumnMap, RawRow, RowCells, ScrapeError, ScrapeResult, ScraperConfig};

use crate::scripts;
use crate::session::RenderSession;

/// Result of one extraction call on one session
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    Rows(Vec<RawRow>),
    Failed(String),
}

/// Extraction result tagged with the session it came from
#[derive(Debug, Clone, PartialEq)]
pub struct SessionExtraction {
    pub session: usize,
    pub outcome: ExtractionOutcome,
}

impl SessionExtraction {
    pub fn rows(session: usize, rows: Vec<RawRow>) -> Self {
        Self {
            session,
            outcome: ExtractionOutcome::Rows(rows),
        }
    }

    pub fn failed(session: usize, reason: impl Into<String>) -> Self {
        Self {
            session,
            outcome: ExtractionOutcome::Failed(reason.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, ExtractionOutcome::Failed(_))
    }

    pub fn row_count(&self) -> usize {
        match &self.outcome {
            ExtractionOutcome::Rows(rows) => rows.len(),
            ExtractionOutcome::Failed(_) => 0,
        }
    }
}

/// Runs the row query against a session and parses the result
#[derive(Debug, Clone)]
pub struct RowExtractor {
    row_selector: String,
    cell_selector: String,
    columns: ColumnMap,
    timeout: Duration,
}

impl RowExtractor {
    pub fn new(config: &ScraperConfig) -> Self {
        Self {
            row_selector: config.row_selector.clone(),
            cell_selector: config.cell_selector.clone(),
            columns: config.columns,
            timeout: config.extract_timeout(),
        }
    }

    pub fn row_selector(&self) -> &str {
        &self.row_selector
    }

    /// Extract rows visible in `session`, tagged with its index.
    /// Never returns an error: failures become `ExtractionOutcome::Failed`.
    pub async fn extract<S: RenderSession + ?Sized>(&self, session: &S) -> SessionExtraction {
        let index = session.index();

        match self.try_extract(session).await {
            Ok(rows) => SessionExtraction::rows(index, rows),
            Err(e) => SessionExtraction::failed(index, e.to_string()),
        }
    }

    /// Like `extract`, but keeps the error so callers can tell a lost
    /// browser from a transient script failure
    pub async fn try_extract<S: RenderSession + ?Sized>(&self, session: &S) -> ScrapeResult<Vec<RawRow>> {
        match tokio::time::timeout(self.timeout, self.run_query(session)).await {
            Ok(result) => result,
            Err(_) => Err(ScrapeError::ExtractionTimeout(self.timeout)),
        }
    }

    async fn run_query<S: RenderSession + ?Sized>(&self, session: &S) -> ScrapeResult<Vec<RawRow>> {
        let args = vec![
            Value::from(self.row_selector.as_str()),
            Value::from(self.cell_selector.as_str()),
            serde_json::to_value(self.columns).map_err(|e| ScrapeError::Script(e.to_string()))?,
        ];

        let value = session.execute(scripts::EXTRACT_ROWS, args).await?;
        parse_rows(value, session.index())
    }
}

/// Parse the script result into rows, dropping entries without a symbol
pub fn parse_rows(value: Value, source_session: usize) -> ScrapeResult<Vec<RawRow>> {
    let items = match value {
        Value::Null => return Ok(vec![]),
        Value::Array(items) => items,
        other => {
            return Err(ScrapeError::Script(format!(
                "expected an array of rows, got {}",
                other
            )))
        }
    };

    let rows = items
        .into_iter()
        .filter(|item| !item.is_null())
        .map(|item| {
            serde_json::from_value::<RowCells>(item)
                .map_err(|e| ScrapeError::Script(format!("malformed row: {}", e)))
        })
        .collect::<ScrapeResult<Vec<_>>>()?
        .into_iter()
        .map(|cells| cells.into_row(source_session))
        .filter(|row| !row.symbol.is_empty())
        .collect();

    Ok(rows)
}
