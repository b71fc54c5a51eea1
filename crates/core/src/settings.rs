//! Configuration types
//!
//! Every field has a default, so an empty file (or none at all) yields a
//! working configuration. Values are layered: optional TOML file, then
//! `WARRANT__SECTION__FIELD` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{ConfigError, ConfigResult};

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "warrant-feed.toml";

/// Cell positions inside one row element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub symbol: usize,
    pub issuer: usize,
    pub price: usize,
    pub volume: usize,
    pub change: usize,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            symbol: 0,
            issuer: 8,
            price: 9,
            volume: 10,
            change: 11,
        }
    }
}

/// Render session pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub source_url: String,
    pub webdriver_url: String,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub total_sessions: usize,
    pub page_height_px: u32,
    pub stagger_delay_ms: u64,
    pub settle_delay_ms: u64,
    pub navigation_timeout_ms: u64,
    pub row_wait_timeout_ms: u64,
    pub extract_timeout_ms: u64,
    pub row_selector: String,
    pub cell_selector: String,
    pub columns: ColumnMap,
    pub max_recovery_attempts: u32,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            source_url: "https://banggia.vps.com.vn/chung-khoan/chung-quyen".to_string(),
            webdriver_url: "http://localhost:9515".to_string(),
            headless: true,
            viewport_width: 1920,
            viewport_height: 1080,
            total_sessions: 11,
            page_height_px: 800,
            stagger_delay_ms: 1500,
            settle_delay_ms: 1000,
            navigation_timeout_ms: 60_000,
            row_wait_timeout_ms: 30_000,
            extract_timeout_ms: 10_000,
            row_selector: ".table-row".to_string(),
            cell_selector: "span".to_string(),
            columns: ColumnMap::default(),
            max_recovery_attempts: 3,
        }
    }
}

impl ScraperConfig {
    pub fn stagger_delay(&self) -> Duration {
        Duration::from_millis(self.stagger_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn row_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.row_wait_timeout_ms)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_millis(self.extract_timeout_ms)
    }

    /// Upper bound on re-positioning one degraded session
    pub fn recovery_timeout(&self) -> Duration {
        self.navigation_timeout() + self.row_wait_timeout() + self.extract_timeout() + self.settle_delay()
    }

    /// Virtual scroll offset assigned to a session
    pub fn offset_for(&self, index: usize) -> u64 {
        index as u64 * self.page_height_px as u64
    }
}

/// Aggregator loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub cycle_interval_ms: u64,
    /// Re-position degraded sessions every N cycles, 0 disables
    pub recovery_every_cycles: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 1000,
            recovery_every_cycles: 30,
        }
    }
}

impl AggregatorConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }
}

/// Reference database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    pub database_path: String,
    pub table: String,
    pub symbol_column: String,
    pub price_column: String,
    pub date_column: String,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            database_path: "reference.db".to_string(),
            table: "CWMain".to_string(),
            symbol_column: "CWName".to_string(),
            price_column: "ExercisePrice".to_string(),
            date_column: "RecordDate".to_string(),
        }
    }
}

/// Subscriber-facing server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub cadence_ms: u64,
    pub max_subscribers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            path: "/ws".to_string(),
            cadence_ms: 1000,
            max_subscribers: 256,
        }
    }
}

impl ServerConfig {
    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub scraper: ScraperConfig,
    pub aggregator: AggregatorConfig,
    pub reference: ReferenceConfig,
    pub server: ServerConfig,
}

impl BoardConfig {
    /// Load from an optional file plus `WARRANT__*` environment overrides
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: BoardConfig = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("WARRANT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.scraper.total_sessions == 0 {
            return Err(ConfigError::Invalid("scraper.total_sessions must be > 0".into()));
        }
        if self.scraper.page_height_px == 0 {
            return Err(ConfigError::Invalid("scraper.page_height_px must be > 0".into()));
        }
        if self.aggregator.cycle_interval_ms == 0 {
            return Err(ConfigError::Invalid("aggregator.cycle_interval_ms must be > 0".into()));
        }
        if self.server.cadence_ms == 0 {
            return Err(ConfigError::Invalid("server.cadence_ms must be > 0".into()));
        }
        if self.scraper.row_selector.trim().is_empty() {
            return Err(ConfigError::Invalid("scraper.row_selector must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_page_contract() {
        let config = BoardConfig::default();

        assert_eq!(config.scraper.total_sessions, 11);
        assert_eq!(config.scraper.page_height_px, 800);
        assert_eq!(config.scraper.stagger_delay(), Duration::from_millis(1500));
        assert_eq!(config.server.cadence(), Duration::from_secs(1));
        assert_eq!(config.scraper.columns.issuer, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_offsets_are_multiples_of_page_height() {
        let config = ScraperConfig::default();
        assert_eq!(config.offset_for(0), 0);
        assert_eq!(config.offset_for(1), 800);
        assert_eq!(config.offset_for(12), 9600);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[scraper]\ntotal_sessions = 3\n\n[server]\nport = 9100").unwrap();

        let config = BoardConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.scraper.total_sessions, 3);
        assert_eq!(config.scraper.page_height_px, 800);
        assert_eq!(config.server.port, 9100);
    }

    #[test]
    fn test_zero_sessions_rejected() {
        let mut config = BoardConfig::default();
        config.scraper.total_sessions = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
