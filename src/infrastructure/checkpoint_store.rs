//! Durable crawl-progress store
//!
//! Owns the single `CrawlCheckpoint` of a crawl target. Every mutation goes through
//! this type; persistence is throttled by `save_interval` and always crash-atomic.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{Span, debug, error, info, warn};

use crate::domain::checkpoint::{CrawlCheckpoint, CrawlState, FailedItem, ResumeInfo, stat_keys};
use crate::infrastructure::atomic_file;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid crawl state transition: {from} -> {to}")]
    InvalidTransition { from: CrawlState, to: CrawlState },

    #[error("No checkpoint file to back up at {0:?}")]
    NothingToBackup(PathBuf),
}

impl CheckpointError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub struct CheckpointStore {
    path: PathBuf,
    save_interval: u32,
    checkpoint: CrawlCheckpoint,
    items_since_save: u32,
    last_save_time: Option<DateTime<Utc>>,
    span: Span,
}

impl CheckpointStore {
    pub fn new(directory: impl AsRef<Path>, filename: &str, save_interval: u32, span: Span) -> Self {
        Self {
            path: directory.as_ref().join(filename),
            save_interval,
            checkpoint: CrawlCheckpoint::default(),
            items_since_save: 0,
            last_save_time: None,
            span,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn checkpoint(&self) -> &CrawlCheckpoint {
        &self.checkpoint
    }

    pub fn state(&self) -> CrawlState {
        self.checkpoint.state
    }

    pub fn current_page(&self) -> u32 {
        self.checkpoint.current_page
    }

    pub fn failed_items(&self) -> &[FailedItem] {
        &self.checkpoint.failed_items
    }

    pub fn statistics(&self) -> &BTreeMap<String, Value> {
        &self.checkpoint.statistics
    }

    pub fn last_save_time(&self) -> Option<DateTime<Utc>> {
        self.last_save_time
    }

    /// Reset progress and start a new crawl.
    ///
    /// The failed backlog is carried over: it only shrinks through `remove_failed_item`.
    pub fn initialize_crawl(&mut self, metadata: BTreeMap<String, Value>) {
        let _enter = self.span.enter();
        let failed_items = std::mem::take(&mut self.checkpoint.failed_items);
        let mut statistics = BTreeMap::new();
        statistics.insert(stat_keys::START_TIME.to_string(), Value::String(Utc::now().to_rfc3339()));
        statistics.insert(stat_keys::TOTAL_PROCESSED.to_string(), Value::from(0));
        statistics.insert(stat_keys::TOTAL_FAILED.to_string(), Value::from(failed_items.len()));
        statistics.insert(stat_keys::PAGES_CRAWLED.to_string(), Value::from(0));

        if !failed_items.is_empty() {
            info!("Carrying {} failed items into the new crawl", failed_items.len());
        }
        self.checkpoint = CrawlCheckpoint {
            state: CrawlState::InProgress,
            failed_items,
            statistics,
            metadata,
            ..CrawlCheckpoint::default()
        };
        self.items_since_save = 0;
        info!("🆕 Initialized new crawl session");
    }

    /// Read the persisted checkpoint; any failure means "not found".
    pub fn load(&mut self) -> bool {
        let _enter = self.span.enter();
        if !self.path.exists() {
            info!("No checkpoint file found, starting fresh");
            return false;
        }

        let loaded = std::fs::read_to_string(&self.path)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                serde_json::from_str::<CrawlCheckpoint>(&content).map_err(|e| e.to_string())
            });

        match loaded {
            Ok(checkpoint) => {
                info!(
                    "📂 Loaded checkpoint: page {}, {} processed items, state {}",
                    checkpoint.current_page,
                    checkpoint.processed_items.len(),
                    checkpoint.state
                );
                self.checkpoint = checkpoint;
                self.items_since_save = 0;
                true
            }
            Err(e) => {
                error!("Failed to load checkpoint {:?}: {}", self.path, e);
                false
            }
        }
    }

    /// Persist the checkpoint. Without `force`, nothing happens until
    /// `save_interval` items were processed since the last save.
    pub fn save(&mut self, force: bool) -> Result<bool, CheckpointError> {
        if !force && self.items_since_save < self.save_interval {
            return Ok(false);
        }
        let _enter = self.span.enter();

        let now = Utc::now();
        self.checkpoint.last_updated = Some(now);
        atomic_file::write_json_atomic(&self.path, &self.checkpoint, true)
            .map_err(|e| CheckpointError::io(&self.path, e))?;

        self.last_save_time = Some(now);
        self.items_since_save = 0;
        debug!("Checkpoint saved: page {}", self.checkpoint.current_page);
        Ok(true)
    }

    /// Throttled save for hot paths; failures are logged and retried at the next save.
    fn save_throttled(&mut self) {
        if let Err(e) = self.save(false) {
            let _enter = self.span.enter();
            error!("Failed to save checkpoint: {}", e);
        }
    }

    pub fn is_item_processed(&self, item_id: &str) -> bool {
        self.checkpoint.processed_items.contains(item_id)
    }

    pub fn mark_item_processed(&mut self, item_id: &str) {
        if !self.checkpoint.processed_items.insert(item_id) {
            return;
        }
        let total = self.checkpoint.processed_items.len();
        self.set_stat(stat_keys::TOTAL_PROCESSED, Value::from(total));
        self.items_since_save += 1;

        if self.items_since_save >= self.save_interval {
            self.save_throttled();
        }
    }

    /// Append a failure to the backlog. An older entry for the same id is dropped
    /// first, so the backlog holds the latest error once per item.
    pub fn mark_item_failed(&mut self, item_id: &str, error: &str, details: Option<Value>) {
        self.checkpoint.failed_items.retain(|item| item.item_id != item_id);
        self.checkpoint.failed_items.push(FailedItem {
            item_id: item_id.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
            details,
        });
        let total = self.checkpoint.failed_items.len();
        self.set_stat(stat_keys::TOTAL_FAILED, Value::from(total));
    }

    /// Drop every failed entry for `item_id` and persist immediately.
    pub fn remove_failed_item(&mut self, item_id: &str) -> Result<usize, CheckpointError> {
        let before = self.checkpoint.failed_items.len();
        self.checkpoint.failed_items.retain(|item| item.item_id != item_id);
        let removed = before - self.checkpoint.failed_items.len();

        if removed > 0 {
            let total = self.checkpoint.failed_items.len();
            self.set_stat(stat_keys::TOTAL_FAILED, Value::from(total));
            self.save(true)?;
            let _enter = self.span.enter();
            info!("Removed item {} from failed items list", item_id);
        }
        Ok(removed)
    }

    pub fn advance_page(&mut self) {
        self.checkpoint.current_page += 1;
        let crawled = self.checkpoint.current_page - 1;
        self.set_stat(stat_keys::PAGES_CRAWLED, Value::from(crawled));
        let _enter = self.span.enter();
        debug!("Advanced to page {}", self.checkpoint.current_page);
    }

    /// Move the cursor forward to `page` (explicit page-range start). Never moves backwards.
    pub fn seek_page(&mut self, page: u32) {
        if page > self.checkpoint.current_page {
            self.checkpoint.current_page = page;
            let _enter = self.span.enter();
            debug!("Cursor moved to page {}", page);
        }
    }

    pub fn set_state(&mut self, state: CrawlState) -> Result<(), CheckpointError> {
        let old = self.checkpoint.state;
        if !old.can_transition_to(state) {
            return Err(CheckpointError::InvalidTransition { from: old, to: state });
        }
        self.checkpoint.state = state;
        let _enter = self.span.enter();
        info!("Crawl state changed: {} -> {}", old, state);
        Ok(())
    }

    /// Finalize as Completed/Failed, stamp end time and duration, and force a save.
    pub fn complete_crawl(&mut self, success: bool) -> Result<(), CheckpointError> {
        let target = if success { CrawlState::Completed } else { CrawlState::Failed };
        if !self.checkpoint.state.can_transition_to(target) {
            let _enter = self.span.enter();
            warn!("Finalizing crawl from state {}", self.checkpoint.state);
        }
        self.checkpoint.state = target;

        let end = Utc::now();
        self.set_stat(stat_keys::END_TIME, Value::String(end.to_rfc3339()));
        let start = self
            .checkpoint
            .statistics
            .get(stat_keys::START_TIME)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok());
        if let Some(start) = start {
            #[allow(clippy::cast_precision_loss)]
            let seconds = (end - start.with_timezone(&Utc)).num_milliseconds() as f64 / 1000.0;
            self.set_stat(stat_keys::DURATION_SECONDS, Value::from(seconds));
        }

        self.save(true)?;

        let _enter = self.span.enter();
        info!(
            "Crawl {}: {} items processed, {} items failed",
            if success { "completed" } else { "failed" },
            self.checkpoint.processed_items.len(),
            self.checkpoint.failed_items.len()
        );
        Ok(())
    }

    fn set_stat(&mut self, key: &str, value: Value) {
        self.checkpoint.statistics.insert(key.to_string(), value);
    }

    pub fn resume_info(&self) -> ResumeInfo {
        self.checkpoint.resume_info()
    }

    /// Remove the checkpoint file; the in-memory state is left untouched.
    pub fn clear(&self) -> Result<bool, CheckpointError> {
        let _enter = self.span.enter();
        if !self.path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&self.path).map_err(|e| CheckpointError::io(&self.path, e))?;
        info!("Checkpoint file removed");
        Ok(true)
    }

    /// Copy the checkpoint file to `<stem>_backup_<suffix>.json`.
    pub fn backup(&self, suffix: Option<&str>) -> Result<PathBuf, CheckpointError> {
        let _enter = self.span.enter();
        if !self.path.exists() {
            return Err(CheckpointError::NothingToBackup(self.path.clone()));
        }

        let suffix = suffix.map_or_else(
            || Utc::now().format("%Y%m%d_%H%M%S").to_string(),
            ToString::to_string,
        );
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "checkpoint".to_string());
        let backup_path = self.path.with_file_name(format!("{stem}_backup_{suffix}.json"));

        std::fs::copy(&self.path, &backup_path).map_err(|e| CheckpointError::io(&backup_path, e))?;
        info!("Checkpoint backed up to: {:?}", backup_path);
        Ok(backup_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(dir: &TempDir, save_interval: u32) -> CheckpointStore {
        CheckpointStore::new(dir.path(), "crawler_checkpoint.json", save_interval, Span::none())
    }

    #[test]
    fn round_trip_preserves_progress() {
        let dir = TempDir::new().unwrap();
        let mut cp = store(&dir, 100);
        cp.initialize_crawl(BTreeMap::from([("target".to_string(), json!("nuri"))]));
        cp.mark_item_processed("A1");
        cp.mark_item_processed("A2");
        cp.mark_item_failed("B1", "timeout", Some(json!({"page": 2})));
        cp.advance_page();
        cp.advance_page();
        assert!(cp.save(true).unwrap());

        let mut reloaded = store(&dir, 100);
        assert!(reloaded.load());
        let (a, b) = (cp.checkpoint(), reloaded.checkpoint());
        assert_eq!(b.current_page, 3);
        assert_eq!(a.processed_items, b.processed_items);
        assert_eq!(a.failed_items, b.failed_items);
        assert_eq!(a.statistics, b.statistics);
        assert_eq!(b.statistics[stat_keys::PAGES_CRAWLED], json!(2));
        assert!(reloaded.is_item_processed("A2"));
    }

    #[test]
    fn saves_are_throttled_by_interval() {
        let dir = TempDir::new().unwrap();
        let mut cp = store(&dir, 3);
        cp.initialize_crawl(BTreeMap::new());

        cp.mark_item_processed("1");
        cp.mark_item_processed("2");
        assert!(!cp.path().exists());
        assert!(!cp.save(false).unwrap());

        cp.mark_item_processed("3");
        assert!(cp.path().exists());
        assert!(cp.last_save_time().is_some());
    }

    #[test]
    fn repeated_processed_id_is_ignored() {
        let dir = TempDir::new().unwrap();
        let mut cp = store(&dir, 10);
        cp.initialize_crawl(BTreeMap::new());
        cp.mark_item_processed("X");
        cp.mark_item_processed("X");
        assert_eq!(cp.checkpoint().processed_items.len(), 1);
        assert_eq!(cp.statistics()[stat_keys::TOTAL_PROCESSED], json!(1));
    }

    #[test]
    fn failed_entries_are_replaced_and_removed() {
        let dir = TempDir::new().unwrap();
        let mut cp = store(&dir, 10);
        cp.initialize_crawl(BTreeMap::new());
        cp.mark_item_failed("F1", "first", None);
        cp.mark_item_failed("F2", "other", None);
        cp.mark_item_failed("F1", "second", None);

        assert_eq!(cp.failed_items().len(), 2);
        assert_eq!(cp.failed_items()[1].error, "second");

        assert_eq!(cp.remove_failed_item("F1").unwrap(), 1);
        assert!(cp.path().exists(), "removal forces a save");
        assert_eq!(cp.statistics()[stat_keys::TOTAL_FAILED], json!(1));
        assert_eq!(cp.remove_failed_item("missing").unwrap(), 0);
    }

    #[test]
    fn new_crawl_keeps_failed_backlog() {
        let dir = TempDir::new().unwrap();
        let mut cp = store(&dir, 10);
        cp.initialize_crawl(BTreeMap::new());
        cp.mark_item_processed("P1");
        cp.mark_item_failed("F1", "Row not found", None);
        cp.advance_page();

        cp.initialize_crawl(BTreeMap::new());

        assert_eq!(cp.current_page(), 1);
        assert!(cp.checkpoint().processed_items.is_empty());
        assert_eq!(cp.failed_items().len(), 1);
        assert_eq!(cp.failed_items()[0].item_id, "F1");
        assert_eq!(cp.statistics()[stat_keys::TOTAL_FAILED], json!(1));
    }

    #[test]
    fn corrupt_file_loads_as_not_found() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("crawler_checkpoint.json"), "{\"state\": 42").unwrap();
        let mut cp = store(&dir, 10);
        assert!(!cp.load());
        assert_eq!(cp.state(), CrawlState::Initialized);
    }

    #[test]
    fn complete_crawl_stamps_duration() {
        let dir = TempDir::new().unwrap();
        let mut cp = store(&dir, 10);
        cp.initialize_crawl(BTreeMap::new());
        cp.complete_crawl(true).unwrap();

        assert_eq!(cp.state(), CrawlState::Completed);
        assert!(cp.statistics().contains_key(stat_keys::END_TIME));
        assert!(cp.statistics()[stat_keys::DURATION_SECONDS].as_f64().unwrap() >= 0.0);
        assert!(!cp.resume_info().can_resume);
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut cp = store(&dir, 10);
        cp.initialize_crawl(BTreeMap::new());
        cp.complete_crawl(true).unwrap();
        assert!(matches!(
            cp.set_state(CrawlState::InProgress),
            Err(CheckpointError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn seek_never_moves_backwards() {
        let dir = TempDir::new().unwrap();
        let mut cp = store(&dir, 10);
        cp.seek_page(5);
        cp.seek_page(2);
        assert_eq!(cp.current_page(), 5);
    }

    #[test]
    fn backup_and_clear() {
        let dir = TempDir::new().unwrap();
        let mut cp = store(&dir, 10);
        assert!(matches!(cp.backup(None), Err(CheckpointError::NothingToBackup(_))));

        cp.initialize_crawl(BTreeMap::new());
        cp.save(true).unwrap();
        let backup = cp.backup(Some("manual")).unwrap();
        assert_eq!(
            backup.file_name().unwrap(),
            "crawler_checkpoint_backup_manual.json"
        );
        assert!(cp.clear().unwrap());
        assert!(!cp.path().exists());
        assert!(backup.exists());
        assert!(!cp.clear().unwrap());
    }
}
