//! Configuration infrastructure
//!
//! Harvest configuration is a JSON document loaded through `ConfigManager`.
//!
//! Two values have no default and must be present in every configuration file:
//! `crawler.early_exit_threshold` and `checkpoint.save_interval`. Everything else
//! falls back to the constants in [`defaults`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::domain::quality::QualityGate;

/// Complete harvester configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    pub website: WebsiteConfig,

    pub crawler: CrawlerConfig,

    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub deduplication: DedupConfig,

    #[serde(default)]
    pub quality: QualityConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Target site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebsiteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Entry point of the listing
    pub list_page_url: String,
}

/// Crawl loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Consecutive duplicates that end the run (required)
    pub early_exit_threshold: u32,

    /// Explicit page window; overrides checkpoint resume when present
    #[serde(default)]
    pub page_range: Option<PageRange>,

    #[serde(default)]
    pub wait: WaitConfig,

    #[serde(default)]
    pub pagination: PaginationConfig,

    /// Page-level errors tolerated before the crawl aborts
    #[serde(default = "default_max_page_errors")]
    pub max_page_errors: u32,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageRange {
    pub start: u32,
    /// Inclusive last page; open-ended when absent
    #[serde(default)]
    pub end: Option<u32>,
}

impl PageRange {
    pub fn contains(&self, page: u32) -> bool {
        page >= self.start && self.end.is_none_or(|end| page <= end)
    }
}

/// Time bounds for every browser wait, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    pub navigation_timeout_ms: u64,
    pub element_timeout_ms: u64,
    /// How long to wait for a detail view to open in a new tab
    pub new_surface_timeout_ms: u64,
    /// Settle time before checking for a detail modal
    pub modal_settle_ms: u64,
    /// How long to wait for an in-place detail view
    pub in_place_timeout_ms: u64,
    /// Visibility timeout for the list-page check
    pub list_check_timeout_ms: u64,
    pub after_load_ms: u64,
    /// Short pause after clicks that trigger re-rendering
    pub action_settle_ms: u64,
    /// Rate-limit delay between listing pages
    pub between_pages_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: defaults::NAVIGATION_TIMEOUT_MS,
            element_timeout_ms: defaults::ELEMENT_TIMEOUT_MS,
            new_surface_timeout_ms: defaults::NEW_SURFACE_TIMEOUT_MS,
            modal_settle_ms: defaults::MODAL_SETTLE_MS,
            in_place_timeout_ms: defaults::IN_PLACE_TIMEOUT_MS,
            list_check_timeout_ms: defaults::LIST_CHECK_TIMEOUT_MS,
            after_load_ms: defaults::AFTER_LOAD_MS,
            action_settle_ms: defaults::ACTION_SETTLE_MS,
            between_pages_ms: defaults::BETWEEN_PAGES_MS,
        }
    }
}

impl WaitConfig {
    /// Zero waits everywhere; for scripted sessions that never block.
    pub fn immediate() -> Self {
        Self {
            navigation_timeout_ms: 0,
            element_timeout_ms: 0,
            new_surface_timeout_ms: 0,
            modal_settle_ms: 0,
            in_place_timeout_ms: 0,
            list_check_timeout_ms: 0,
            after_load_ms: 0,
            action_settle_ms: 0,
            between_pages_ms: 0,
        }
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }

    pub fn new_surface_timeout(&self) -> Duration {
        Duration::from_millis(self.new_surface_timeout_ms)
    }

    pub fn modal_settle(&self) -> Duration {
        Duration::from_millis(self.modal_settle_ms)
    }

    pub fn in_place_timeout(&self) -> Duration {
        Duration::from_millis(self.in_place_timeout_ms)
    }

    pub fn list_check_timeout(&self) -> Duration {
        Duration::from_millis(self.list_check_timeout_ms)
    }

    pub fn after_load(&self) -> Duration {
        Duration::from_millis(self.after_load_ms)
    }

    pub fn action_settle(&self) -> Duration {
        Duration::from_millis(self.action_settle_ms)
    }

    pub fn between_pages(&self) -> Duration {
        Duration::from_millis(self.between_pages_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub group_size: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            group_size: defaults::PAGINATION_GROUP_SIZE,
        }
    }
}

/// Backoff settings for retried operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            initial_delay_ms: defaults::RETRY_INITIAL_DELAY_MS,
            backoff_factor: defaults::RETRY_BACKOFF_FACTOR,
            max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_dir")]
    pub directory: PathBuf,

    #[serde(default = "default_checkpoint_file")]
    pub filename: String,

    /// Processed items between throttled saves (required)
    pub save_interval: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,
    pub key_fields: Vec<String>,
    pub storage_file: PathBuf,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_fields: defaults::DEDUP_KEY_FIELDS.iter().map(|s| (*s).to_string()).collect(),
            storage_file: PathBuf::from(defaults::DEDUP_STORAGE_FILE),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub critical_fields: Vec<String>,
    /// Empty critical fields at which a record is rejected
    pub missing_threshold: usize,
    /// Free-text field that excuses missing data
    pub note_field: String,
    /// Field the detail validation gate requires
    pub validation_field: String,
}

impl Default for QualityConfig {
    fn default() -> Self {
        use crate::domain::quality;
        Self {
            critical_fields: quality::DEFAULT_CRITICAL_FIELDS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            missing_threshold: quality::DEFAULT_MISSING_THRESHOLD,
            note_field: quality::DEFAULT_NOTE_FIELD.to_string(),
            validation_field: quality::DEFAULT_VALIDATION_FIELD.to_string(),
        }
    }
}

impl QualityConfig {
    pub fn gate(&self) -> QualityGate {
        QualityGate::new(
            self.critical_fields.clone(),
            self.missing_threshold,
            self.note_field.clone(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub output_dir: PathBuf,
    /// Output files are named `<prefix>_<YYYYmmdd_HHMMSS_mmm>.<ext>`
    pub filename_prefix: String,
    pub pretty: bool,
    pub json_output: bool,
    pub csv_output: bool,
    pub csv_delimiter: char,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(defaults::OUTPUT_DIR),
            filename_prefix: defaults::OUTPUT_PREFIX.to_string(),
            pretty: true,
            json_output: true,
            csv_output: false,
            csv_delimiter: defaults::CSV_DELIMITER,
        }
    }
}

impl StorageConfig {
    /// Fresh output path for one batch. Millisecond timestamp, plus a `_<n>` counter
    /// when a file with that name already exists.
    pub fn output_file(&self, extension: &str) -> PathBuf {
        let stem = format!(
            "{}_{}",
            self.filename_prefix,
            Utc::now().format("%Y%m%d_%H%M%S_%3f")
        );
        let mut path = self.output_dir.join(format!("{stem}.{extension}"));
        let mut n = 1;
        while path.exists() {
            path = self.output_dir.join(format!("{stem}_{n}.{extension}"));
            n += 1;
        }
        path
    }
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs
    pub json_format: bool,

    pub console_output: bool,

    pub file_output: bool,

    /// Defaults to `logs/` beside the executable
    pub directory: Option<PathBuf>,

    pub file_name: String,

    /// "daily" or "never"
    pub rotation: String,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,

    /// Enable automatic log cleanup on startup
    pub auto_cleanup_logs: bool,

    /// Module-specific log level filters
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            directory: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
            rotation: "never".to_string(),
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: true,
            module_filters: {
                let mut filters = HashMap::new();
                filters.insert("tokio".to_string(), "info".to_string());
                filters.insert("listing_harvester".to_string(), defaults::LOG_LEVEL.to_string());
                filters
            },
        }
    }
}

fn default_base_url() -> String {
    defaults::BASE_URL.to_string()
}

fn default_max_page_errors() -> u32 {
    defaults::MAX_PAGE_ERRORS
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(defaults::CHECKPOINT_DIR)
}

fn default_checkpoint_file() -> String {
    defaults::CHECKPOINT_FILE.to_string()
}

impl HarvestConfig {
    /// Configuration with every optional section at its default.
    pub fn new(list_page_url: impl Into<String>, early_exit_threshold: u32, save_interval: u32) -> Self {
        Self {
            website: WebsiteConfig {
                base_url: default_base_url(),
                list_page_url: list_page_url.into(),
            },
            crawler: CrawlerConfig {
                early_exit_threshold,
                page_range: None,
                wait: WaitConfig::default(),
                pagination: PaginationConfig::default(),
                max_page_errors: defaults::MAX_PAGE_ERRORS,
                retry: RetryConfig::default(),
            },
            checkpoint: CheckpointConfig {
                directory: default_checkpoint_dir(),
                filename: default_checkpoint_file(),
                save_interval,
            },
            deduplication: DedupConfig::default(),
            quality: QualityConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Every problem found, not only the first.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for (name, value) in [
            ("website.base_url", &self.website.base_url),
            ("website.list_page_url", &self.website.list_page_url),
        ] {
            if let Err(e) = url::Url::parse(value) {
                problems.push(format!("{name} is not a valid URL ({value:?}): {e}"));
            }
        }
        if self.crawler.early_exit_threshold == 0 {
            problems.push("crawler.early_exit_threshold must be at least 1".to_string());
        }
        if self.checkpoint.save_interval == 0 {
            problems.push("checkpoint.save_interval must be at least 1".to_string());
        }
        if self.crawler.pagination.group_size == 0 {
            problems.push("crawler.pagination.group_size must be at least 1".to_string());
        }
        if let Some(range) = self.crawler.page_range {
            if range.start == 0 {
                problems.push("crawler.page_range.start must be at least 1".to_string());
            }
            if range.end.is_some_and(|end| end < range.start) {
                problems.push("crawler.page_range.end must not precede start".to_string());
            }
        }
        if self.crawler.retry.max_attempts == 0 {
            problems.push("crawler.retry.max_attempts must be at least 1".to_string());
        }
        if self.crawler.retry.backoff_factor < 1.0 {
            problems.push("crawler.retry.backoff_factor must be >= 1.0".to_string());
        }
        if self.deduplication.enabled && self.deduplication.key_fields.is_empty() {
            problems.push("deduplication.key_fields must not be empty when enabled".to_string());
        }
        if self.quality.missing_threshold > self.quality.critical_fields.len() {
            problems.push("quality.missing_threshold exceeds the number of critical fields".to_string());
        }
        if matches!(self.storage.csv_delimiter, '"' | '\n' | '\r') {
            problems.push(format!(
                "storage.csv_delimiter cannot be {:?}",
                self.storage.csv_delimiter
            ));
        }
        if !self.logging.console_output && !self.logging.file_output {
            problems.push("logging needs console_output or file_output".to_string());
        }

        problems
    }
}

/// Loads and saves `HarvestConfig` files
pub struct ConfigManager {
    pub config_path: PathBuf,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join(defaults::APP_DIR_NAME);

        Ok(config_dir)
    }

    /// Manager for the default per-user configuration file
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;
        Ok(Self {
            config_path: config_dir.join(defaults::CONFIG_FILE_NAME),
        })
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    /// Load and validate the configuration.
    ///
    /// A file that is not valid JSON is copied to `*.json.corrupted` before the error is returned.
    pub async fn load_config(&self) -> Result<HarvestConfig> {
        if !self.config_path.exists() {
            bail!(
                "Configuration file not found: {:?} (crawler.early_exit_threshold and checkpoint.save_interval must be provided)",
                self.config_path
            );
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .context("Failed to read configuration file")?;

        let config = match serde_json::from_str::<HarvestConfig>(&content) {
            Ok(config) => config,
            Err(parse_error) => {
                if serde_json::from_str::<serde_json::Value>(&content).is_err() {
                    self.backup_corrupted().await;
                }
                return Err(parse_error)
                    .with_context(|| format!("Invalid configuration file {:?}", self.config_path));
            }
        };

        let problems = config.validate();
        if !problems.is_empty() {
            for problem in &problems {
                warn!("⚠️  Configuration problem: {}", problem);
            }
            bail!("Configuration is invalid: {}", problems.join("; "));
        }

        info!("Loaded configuration from: {:?}", self.config_path);
        Ok(config)
    }

    async fn backup_corrupted(&self) {
        let backup_path = self.config_path.with_extension("json.corrupted");
        match fs::copy(&self.config_path, &backup_path).await {
            Ok(_) => info!("Backed up corrupted config to: {:?}", backup_path),
            Err(e) => warn!("Failed to create backup of corrupted config: {}", e),
        }
    }

    /// Save configuration to file (write-then-rename)
    pub async fn save_config(&self, config: &HarvestConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;

        let tmp_path = self.config_path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .await
            .context("Failed to write configuration file")?;
        fs::rename(&tmp_path, &self.config_path)
            .await
            .context("Failed to replace configuration file")?;

        info!("Saved configuration to: {:?}", self.config_path);
        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

/// Default configuration values
pub mod defaults {
    pub const APP_DIR_NAME: &str = "listing-harvester";
    pub const CONFIG_FILE_NAME: &str = "harvester_config.json";

    pub const BASE_URL: &str = "https://nuri.g2b.go.kr";

    // 대기 시간 (ms)
    pub const NAVIGATION_TIMEOUT_MS: u64 = 30_000;
    pub const ELEMENT_TIMEOUT_MS: u64 = 10_000;
    pub const NEW_SURFACE_TIMEOUT_MS: u64 = 3_000;
    pub const MODAL_SETTLE_MS: u64 = 2_000;
    pub const IN_PLACE_TIMEOUT_MS: u64 = 15_000;
    pub const LIST_CHECK_TIMEOUT_MS: u64 = 3_000;
    pub const AFTER_LOAD_MS: u64 = 2_000;
    pub const ACTION_SETTLE_MS: u64 = 1_000;
    pub const BETWEEN_PAGES_MS: u64 = 1_000;

    pub const PAGINATION_GROUP_SIZE: u32 = 10;
    pub const MAX_PAGE_ERRORS: u32 = 10;

    pub const RETRY_MAX_ATTEMPTS: u32 = 3;
    pub const RETRY_INITIAL_DELAY_MS: u64 = 1_000;
    pub const RETRY_BACKOFF_FACTOR: f64 = 2.0;
    pub const RETRY_MAX_DELAY_MS: u64 = 30_000;

    pub const CHECKPOINT_DIR: &str = "checkpoints";
    pub const CHECKPOINT_FILE: &str = "crawler_checkpoint.json";

    pub const DEDUP_KEY_FIELDS: [&str; 1] = ["bid_notice_number"];
    pub const DEDUP_STORAGE_FILE: &str = "checkpoints/seen_items.json";

    pub const OUTPUT_DIR: &str = "data";
    pub const OUTPUT_PREFIX: &str = "bid_notices";
    pub const CSV_DELIMITER: char = ',';

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_FILE_NAME: &str = "harvester.log";
    pub const LOG_MAX_FILES: u32 = 10;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn minimal_json() -> serde_json::Value {
        json!({
            "website": { "list_page_url": "https://nuri.g2b.go.kr/list" },
            "crawler": { "early_exit_threshold": 30 },
            "checkpoint": { "save_interval": 10 }
        })
    }

    #[test]
    fn minimal_file_fills_defaults() {
        let config: HarvestConfig = serde_json::from_value(minimal_json()).unwrap();
        assert_eq!(config.crawler.early_exit_threshold, 30);
        assert_eq!(config.checkpoint.save_interval, 10);
        assert_eq!(config.crawler.pagination.group_size, 10);
        assert_eq!(config.crawler.max_page_errors, 10);
        assert_eq!(config.crawler.wait.new_surface_timeout_ms, 3_000);
        assert_eq!(config.crawler.wait.in_place_timeout_ms, 15_000);
        assert_eq!(config.deduplication.key_fields, vec!["bid_notice_number"]);
        assert_eq!(config.quality.validation_field, "opening_date");
        assert!(config.validate().is_empty());
    }

    #[test]
    fn required_values_have_no_default() {
        let mut value = minimal_json();
        value["crawler"] = json!({});
        assert!(serde_json::from_value::<HarvestConfig>(value).is_err());

        let mut value = minimal_json();
        value["checkpoint"] = json!({ "directory": "cp" });
        assert!(serde_json::from_value::<HarvestConfig>(value).is_err());
    }

    #[test]
    fn validate_reports_every_problem() {
        let mut config = HarvestConfig::new("not a url", 0, 0);
        config.crawler.page_range = Some(PageRange { start: 5, end: Some(2) });
        let problems = config.validate();
        assert_eq!(problems.len(), 4, "{problems:?}");
    }

    #[test]
    fn page_range_bounds() {
        let open = PageRange { start: 3, end: None };
        assert!(!open.contains(2));
        assert!(open.contains(300));
        let closed = PageRange { start: 3, end: Some(4) };
        assert!(closed.contains(4));
        assert!(!closed.contains(5));
    }

    #[test]
    fn output_file_never_reuses_a_name() {
        let dir = TempDir::new().unwrap();
        let storage = StorageConfig {
            output_dir: dir.path().to_path_buf(),
            ..StorageConfig::default()
        };

        let first = storage.output_file("json");
        std::fs::write(&first, b"{}").unwrap();
        let second = storage.output_file("json");

        assert_ne!(first, second);
        assert!(!second.exists());
        let name = second.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("bid_notices_") && name.ends_with(".json"));
    }

    #[test]
    fn quote_is_not_a_csv_delimiter() {
        let mut config = HarvestConfig::new("https://example.org/list", 5, 3);
        config.storage.csv_delimiter = '"';
        assert!(config.validate().iter().any(|p| p.contains("csv_delimiter")));
    }

    #[tokio::test]
    async fn save_then_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("config.json"));
        let config = HarvestConfig::new("https://example.org/list", 5, 3);

        manager.save_config(&config).await.unwrap();
        let loaded = manager.load_config().await.unwrap();

        assert_eq!(loaded.crawler.early_exit_threshold, 5);
        assert_eq!(loaded.checkpoint.save_interval, 3);
        assert!(!dir.path().join("config.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupted_file_is_backed_up() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let manager = ConfigManager::with_path(&path);
        assert!(manager.load_config().await.is_err());
        assert!(dir.path().join("config.json.corrupted").exists());
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("absent.json"));
        let err = manager.load_config().await.unwrap_err();
        assert!(err.to_string().contains("early_exit_threshold"));
    }
}
