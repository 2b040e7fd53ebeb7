//! Infrastructure layer: persistence, configuration, logging and browser navigation
//!
//! - Stores persist through `atomic_file` (temp file + rename)
//! - Navigation talks to the browser only through the `PageSurface` contract
//! - Configuration and logging follow the ConfigManager / tracing setup of the app

pub mod atomic_file;
pub mod checkpoint_store;
pub mod config; // Configuration file handling and defaults
pub mod csv_sink;
pub mod dedup_store;
pub mod json_sink;
pub mod logging; // Logging infrastructure
pub mod navigation;
pub mod retry_policy;

// Re-export commonly used items
pub use checkpoint_store::{CheckpointError, CheckpointStore};
pub use config::{ConfigManager, HarvestConfig};
pub use dedup_store::{DedupError, DedupStats, DedupStore};
pub use csv_sink::CsvRecordSink;
pub use json_sink::JsonRecordSink;
pub use logging::{component_span, get_log_directory, init_logging_with_config};
pub use navigation::{DetailFetcher, NavigationError, Navigator, Pacer, PaginationRestorer, RecoveryLadder};
pub use retry_policy::{RetryError, RetryPolicy, with_retry};
