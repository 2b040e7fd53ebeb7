//! Extractor and sink contracts
//!
//! Site-specific parsing and durable output formats are plugged in by the host.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use super::record::{NoticeRecord, RawItem};
use super::session::{PageSurface, SessionError};

/// How a detail view was rendered when it was extracted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailView {
    NewSurface,
    Modal,
    InPlace,
}

impl DetailView {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewSurface => "new_tab",
            Self::Modal => "modal",
            Self::InPlace => "in_place",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("Browser interaction failed during extraction: {0}")]
    Session(#[from] SessionError),

    #[error("Could not parse {context}: {reason}")]
    Parse { context: String, reason: String },

    #[error("Pagination control unavailable: {0}")]
    Pagination(String),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sink serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sink rejected batch: {0}")]
    Rejected(String),
}

/// Reads listing rows and detail views off a page
#[async_trait]
pub trait ListingExtractor: Send + Sync {
    /// Rows of the current listing page, in display order.
    async fn extract_rows(&self, page: &dyn PageSurface) -> Result<Vec<RawItem>, ExtractionError>;

    /// Enrich `base` with the fields shown by an open detail view.
    async fn extract_detail(
        &self,
        page: &dyn PageSurface,
        base: &RawItem,
        view: DetailView,
    ) -> Result<RawItem, ExtractionError>;

    async fn has_next_page(&self, page: &dyn PageSurface) -> Result<bool, ExtractionError>;

    /// Returns `false` when the next page could not be reached.
    async fn go_to_next_page(&self, page: &dyn PageSurface) -> Result<bool, ExtractionError>;
}

/// Durable output for harvested records
#[async_trait]
pub trait RecordSink: Send + Sync {
    fn name(&self) -> &str;

    /// Persist one sorted batch and return where it landed.
    async fn save(&self, records: &[NoticeRecord]) -> Result<PathBuf, SinkError>;
}
