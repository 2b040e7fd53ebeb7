//! Browsing-session contracts
//!
//! The harvesting core never touches selectors or scripts directly. It talks to a
//! `PageSurface` in terms of semantic `UiTarget`s and `ScriptAction`s; the host
//! program supplies the concrete browser backend that maps them onto the site.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Semantic UI element addresses understood by every `PageSurface`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UiTarget {
    /// Body of the listing grid
    ListingGrid,
    /// Any data row of the listing grid
    ListingRows,
    /// The listing row for one item
    ItemRow(String),
    /// The clickable name cell inside an item's row
    ItemLink(String),
    SearchButton,
    /// Identifier input of the search form
    SearchInput,
    TopMenu,
    ListMenu,
    /// Tab that returns to the listing when a detail tab is open
    ListTab,
    FirstTab,
    PageButton(u32),
    /// Dialog, cover, or mask that intercepts clicks
    BlockingOverlay,
    /// Loading indicator shown while the grid refreshes
    BusyIndicator,
    DetailModal,
    DetailModalClose,
    /// Element that only exists when a detail view is rendered in place
    DetailIndicator,
    BackToList,
}

impl fmt::Display for UiTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ItemRow(id) => write!(f, "row[{id}]"),
            Self::ItemLink(id) => write!(f, "link[{id}]"),
            Self::PageButton(n) => write!(f, "page_button[{n}]"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Scripted actions evaluated inside the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptAction {
    /// Click every visible dialog close button
    ClickCloseButtons,
    /// Remove overlay/mask elements that block pointer events
    ForceRemoveOverlays,
    /// Remove open modal windows entirely
    ForceRemoveModals,
    /// Press the "next group" pagination control; `false` when it does not exist
    ClickNextGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    Attached,
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClickMode {
    #[default]
    Standard,
    /// Ignore actionability checks (covered or animating elements)
    Forced,
    /// Dispatch the click from script, bypassing swallowed native events
    Scripted,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Timed out after {timeout_ms}ms waiting for {what}")]
    Timeout { what: String, timeout_ms: u64 },

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Script action {action:?} failed: {reason}")]
    Script { action: ScriptAction, reason: String },

    #[error("Browsing surface is closed")]
    SurfaceClosed,

    #[error("Browser backend error: {0}")]
    Backend(String),
}

impl SessionError {
    pub fn timeout(what: impl fmt::Display, timeout: Duration) -> Self {
        Self::Timeout {
            what: what.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Timeouts, missing elements and script hiccups are handled by the recovery path.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::ElementNotFound(_) | Self::Script { .. }
        )
    }
}

/// One browsing tab/page
#[async_trait]
pub trait PageSurface: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), SessionError>;

    /// Block until network activity settles.
    async fn wait_for_load(&self, timeout: Duration) -> Result<(), SessionError>;

    async fn count(&self, target: &UiTarget) -> Result<usize, SessionError>;

    async fn is_visible(&self, target: &UiTarget) -> Result<bool, SessionError>;

    async fn click(&self, target: &UiTarget, mode: ClickMode) -> Result<(), SessionError>;

    async fn fill(&self, target: &UiTarget, value: &str) -> Result<(), SessionError>;

    async fn wait_for(
        &self,
        target: &UiTarget,
        condition: WaitCondition,
        timeout: Duration,
    ) -> Result<(), SessionError>;

    /// Returns whether the script found something to act on.
    async fn run_script(&self, action: ScriptAction) -> Result<bool, SessionError>;

    async fn press_key(&self, key: &str) -> Result<(), SessionError>;

    /// Click `trigger` and wait up to `timeout` for the session to open a new surface.
    async fn expect_new_surface(
        &self,
        trigger: &UiTarget,
        timeout: Duration,
    ) -> Result<Option<Box<dyn PageSurface>>, SessionError>;

    async fn bring_to_front(&self) -> Result<(), SessionError>;

    async fn close(&self) -> Result<(), SessionError>;

    /// Persist a screenshot/DOM dump for post-mortem analysis.
    async fn dump_diagnostics(&self, label: &str) -> Result<Option<PathBuf>, SessionError>;
}

/// A browser context able to hand out the primary page
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn open_page(&self) -> Result<Box<dyn PageSurface>, SessionError>;

    async fn close(&self) -> Result<(), SessionError>;
}
