//! JSON file sink for harvested notices
//!
//! Each batch becomes one `<prefix>_<YYYYmmdd_HHMMSS_mmm>.json` document:
//! `{metadata: {crawled_at, total_count, source}, total_count, notices: [...]}`.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{Span, info};

use crate::domain::collaborators::{RecordSink, SinkError};
use crate::domain::record::NoticeRecord;
use crate::infrastructure::atomic_file;
use crate::infrastructure::config::StorageConfig;

#[derive(Serialize)]
struct ExportMetadata<'a> {
    crawled_at: String,
    total_count: usize,
    source: &'a str,
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    metadata: ExportMetadata<'a>,
    total_count: usize,
    notices: &'a [NoticeRecord],
}

pub struct JsonRecordSink {
    config: StorageConfig,
    source: String,
    span: Span,
}

impl JsonRecordSink {
    pub fn new(config: StorageConfig, source: impl Into<String>, span: Span) -> Self {
        Self {
            config,
            source: source.into(),
            span,
        }
    }
}

#[async_trait]
impl RecordSink for JsonRecordSink {
    fn name(&self) -> &str {
        "json"
    }

    async fn save(&self, records: &[NoticeRecord]) -> Result<PathBuf, SinkError> {
        let document = ExportDocument {
            metadata: ExportMetadata {
                crawled_at: Utc::now().to_rfc3339(),
                total_count: records.len(),
                source: &self.source,
            },
            total_count: records.len(),
            notices: records,
        };
        let bytes = if self.config.pretty {
            serde_json::to_vec_pretty(&document)?
        } else {
            serde_json::to_vec(&document)?
        };

        let path = self.config.output_file("json");
        let target = path.clone();
        tokio::task::spawn_blocking(move || atomic_file::write_bytes_atomic(&target, &bytes))
            .await
            .map_err(|e| SinkError::Rejected(format!("writer task failed: {e}")))??;

        let _enter = self.span.enter();
        info!("💾 Saved {} notices to {:?}", records.len(), path);
        Ok(path)
    }
}
