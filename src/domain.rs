//! Domain module - crawl progress, harvested records and collaborator contracts
//!
//! Everything here is backend-agnostic: no file I/O and no browser code.
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod checkpoint;
pub mod collaborators;
pub mod pagination;
pub mod quality;
pub mod record;
pub mod session;

pub use checkpoint::{CrawlCheckpoint, CrawlState, FailedItem, ResumeInfo};
pub use collaborators::{DetailView, ExtractionError, ListingExtractor, RecordSink, SinkError};
pub use pagination::{PaginationCalculator, PaginationPlan};
pub use quality::QualityGate;
pub use record::{NoticeRecord, RawItem, RecordCollection, RecordError};
pub use session::{BrowserSession, ClickMode, PageSurface, ScriptAction, SessionError, UiTarget, WaitCondition};
