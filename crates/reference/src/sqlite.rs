//! SQLite-backed reference source

use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags};
use std::path::PathBuf;
use tracing::{debug, warn};

use warrant_core::{ReferenceConfig, ReferenceError, ReferenceResult};

use crate::store::{ReferenceRecord, ReferenceSource};

/// Reads the latest record-date partition of the reference table
#[derive(Debug, Clone)]
pub struct SqliteReferenceSource {
    path: PathBuf,
    query: String,
}

impl SqliteReferenceSource {
    pub fn new(config: &ReferenceConfig) -> ReferenceResult<Self> {
        let table = quote_identifier(&config.table)?;
        let symbol = quote_identifier(&config.symbol_column)?;
        let price = quote_identifier(&config.price_column)?;
        let date = quote_identifier(&config.date_column)?;

        let query = format!(
            "SELECT {symbol}, {price} FROM {table} \
             WHERE {date} = (SELECT MAX({date}) FROM {table})"
        );

        Ok(Self {
            path: PathBuf::from(&config.database_path),
            query,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

impl ReferenceSource for SqliteReferenceSource {
    fn fetch_latest(&self) -> ReferenceResult<Vec<ReferenceRecord>> {
        let conn = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(db_error)?;

        debug!("Running reference query: {}", self.query);
        let mut stmt = conn.prepare(&self.query).map_err(db_error)?;

        let rows = stmt
            .query_map([], |row| {
                let symbol: Option<String> = row.get(0)?;
                let price: Value = row.get(1)?;
                Ok((symbol, price))
            })
            .map_err(db_error)?;

        let mut records = Vec::new();
        for row in rows {
            let (symbol, price) = row.map_err(db_error)?;
            let exercise_price = price_from_value(symbol.as_deref(), price);
            records.push(ReferenceRecord {
                symbol,
                exercise_price,
            });
        }

        Ok(records)
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

/// Numeric prices pass through, text is parsed, anything else is absent
fn price_from_value(symbol: Option<&str>, value: Value) -> Option<f64> {
    match value {
        Value::Real(v) => Some(v),
        Value::Integer(v) => Some(v as f64),
        Value::Text(s) => match s.trim().parse::<f64>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Unparseable exercise price {:?} for {:?}", s, symbol);
                None
            }
        },
        Value::Null | Value::Blob(_) => None,
    }
}

fn quote_identifier(ident: &str) -> ReferenceResult<String> {
    let valid = !ident.is_empty()
        && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid {
        return Err(ReferenceError::InvalidIdentifier(ident.to_string()));
    }

    Ok(format!("\"{}\"", ident))
}

fn db_error(e: rusqlite::Error) -> ReferenceError {
    ReferenceError::Database(e.to_string())
}
