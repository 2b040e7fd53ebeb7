//! Fingerprint-based deduplication store
//!
//! A fingerprint is the blake3 hash of the configured key-field values, each
//! trimmed and lower-cased, joined with `|`. Only the key-field snapshot is kept
//! per fingerprint. The key-field list is persisted with the fingerprints; a store
//! written with different key fields is discarded on load.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{Span, debug, error, info, warn};

use crate::domain::record::RawItem;
use crate::infrastructure::atomic_file;
use crate::infrastructure::config::DedupConfig;

#[derive(Error, Debug)]
pub enum DedupError {
    #[error("Failed to persist seen items to {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// On-disk layout: `{key_fields[], seen_items{fingerprint: {field: value}}}`
#[derive(Debug, Serialize, Deserialize)]
struct DedupFile {
    key_fields: Vec<String>,
    #[serde(default)]
    seen_items: BTreeMap<String, BTreeMap<String, Value>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DedupStats {
    pub enabled: bool,
    pub key_fields: Vec<String>,
    pub total_seen: usize,
    pub storage_file: Option<PathBuf>,
}

pub struct DedupStore {
    key_fields: Vec<String>,
    storage_file: Option<PathBuf>,
    enabled: bool,
    seen_items: BTreeMap<String, BTreeMap<String, Value>>,
    span: Span,
}

fn normalized(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_lowercase(),
        Some(other) => other.to_string().trim().to_lowercase(),
    }
}

/// Fingerprint of `item` under `key_fields`.
pub fn fingerprint(item: &RawItem, key_fields: &[String]) -> String {
    let key_string = key_fields
        .iter()
        .map(|field| normalized(item.get(field)))
        .collect::<Vec<_>>()
        .join("|");
    blake3::hash(key_string.as_bytes()).to_hex().to_string()
}

impl DedupStore {
    /// Store backed by `config.storage_file`; existing data is loaded immediately.
    pub fn new(config: &DedupConfig, span: Span) -> Self {
        let mut store = Self {
            key_fields: config.key_fields.clone(),
            storage_file: Some(config.storage_file.clone()),
            enabled: config.enabled,
            seen_items: BTreeMap::new(),
            span,
        };
        if store.enabled {
            store.load();
        }
        store
    }

    /// Enabled, non-persistent store.
    pub fn in_memory(key_fields: Vec<String>) -> Self {
        Self {
            key_fields,
            storage_file: None,
            enabled: true,
            seen_items: BTreeMap::new(),
            span: Span::none(),
        }
    }

    fn load(&mut self) {
        let _enter = self.span.enter();
        let Some(path) = self.storage_file.as_deref() else {
            return;
        };
        if !path.exists() {
            info!("No existing deduplication data found, starting fresh");
            return;
        }

        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|content| serde_json::from_str::<DedupFile>(&content).map_err(|e| e.to_string()));

        match parsed {
            Ok(file) if file.key_fields != self.key_fields => {
                warn!(
                    "Key fields mismatch. Stored: {:?}, Current: {:?}. Starting fresh.",
                    file.key_fields, self.key_fields
                );
            }
            Ok(file) => {
                self.seen_items = file.seen_items;
                info!("Loaded {} seen items from {:?}", self.seen_items.len(), path);
            }
            Err(e) => {
                error!("Failed to load seen items from {:?}: {}", path, e);
                self.seen_items.clear();
            }
        }
    }

    pub fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    pub fn fingerprint(&self, item: &RawItem) -> String {
        fingerprint(item, &self.key_fields)
    }

    /// Always `false` when deduplication is disabled.
    pub fn is_duplicate(&self, item: &RawItem) -> bool {
        self.enabled && self.seen_items.contains_key(&self.fingerprint(item))
    }

    /// Record the item's fingerprint with a snapshot of its key fields.
    /// Returns `None` when deduplication is disabled.
    pub fn mark_as_seen(&mut self, item: &RawItem) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let hash = self.fingerprint(item);
        let snapshot = self
            .key_fields
            .iter()
            .map(|field| (field.clone(), item.get(field).cloned().unwrap_or(Value::Null)))
            .collect();
        self.seen_items.insert(hash.clone(), snapshot);

        let _enter = self.span.enter();
        debug!("Marked item as seen: {}...", &hash[..8]);
        Some(hash)
    }

    pub fn save(&self) -> Result<(), DedupError> {
        if !self.enabled {
            return Ok(());
        }
        let Some(path) = self.storage_file.as_deref() else {
            return Ok(());
        };
        let _enter = self.span.enter();

        let file = DedupFileRef {
            key_fields: &self.key_fields,
            seen_items: &self.seen_items,
        };
        atomic_file::write_json_atomic(path, &file, true).map_err(|source| DedupError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        info!("Saved {} seen items to {:?}", self.seen_items.len(), path);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.seen_items.clear();
        let _enter = self.span.enter();
        info!("Cleared all seen items");
    }

    pub fn len(&self) -> usize {
        self.seen_items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen_items.is_empty()
    }

    pub fn storage_file(&self) -> Option<&Path> {
        self.storage_file.as_deref()
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            enabled: self.enabled,
            key_fields: self.key_fields.clone(),
            total_seen: self.seen_items.len(),
            storage_file: self.storage_file.clone(),
        }
    }
}

#[derive(Serialize)]
struct DedupFileRef<'a> {
    key_fields: &'a [String],
    seen_items: &'a BTreeMap<String, BTreeMap<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepPolicy {
    First,
    Last,
}

/// Post-processing helpers for whole batches
pub struct BatchDeduplicator;

impl BatchDeduplicator {
    /// Drop later (or earlier, with `KeepPolicy::Last`) repeats; relative order is kept.
    pub fn deduplicate(items: &[RawItem], key_fields: &[String], keep: KeepPolicy) -> Vec<RawItem> {
        let mut store = DedupStore::in_memory(key_fields.to_vec());
        let mut kept = Vec::with_capacity(items.len());

        let mut visit = |item: &RawItem| {
            if !store.is_duplicate(item) {
                store.mark_as_seen(item);
                kept.push(item.clone());
            }
        };
        match keep {
            KeepPolicy::First => items.iter().for_each(&mut visit),
            KeepPolicy::Last => items.iter().rev().for_each(&mut visit),
        }
        if keep == KeepPolicy::Last {
            kept.reverse();
        }

        info!(
            "Deduplicated {} items: kept {}, removed {} duplicates",
            items.len(),
            kept.len(),
            items.len() - kept.len()
        );
        kept
    }

    /// Fingerprints that occur more than once, with the indices they occur at.
    pub fn find_duplicates(items: &[RawItem], key_fields: &[String]) -> HashMap<String, Vec<usize>> {
        let mut by_hash: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, item) in items.iter().enumerate() {
            by_hash.entry(fingerprint(item, key_fields)).or_default().push(idx);
        }
        by_hash.retain(|_, indices| indices.len() > 1);
        by_hash
    }
}
