//! Listing navigation and state repair
//!
//! `Navigator` knows how to bring the listing into a usable state (entry point,
//! overlays, list tab, search). The recovery ladder, pagination restore and detail
//! fetch build on it:
//! - `recovery`: ordered soft/hard reset steps driven by a small loop
//! - `pagination_restore`: replays group jumps back to the page the crawl was on
//! - `detail_fetch`: new tab → modal → in-place detail strategies plus validation gate

pub mod detail_fetch;
pub mod pagination_restore;
pub mod recovery;

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, warn};

use crate::domain::collaborators::ExtractionError;
use crate::domain::record::RecordError;
use crate::domain::session::{ClickMode, PageSurface, ScriptAction, SessionError, UiTarget, WaitCondition};
use crate::infrastructure::config::WaitConfig;

pub use detail_fetch::DetailFetcher;
pub use pagination_restore::PaginationRestorer;
pub use recovery::{RecoveryContext, RecoveryLadder, RecoveryStep, ResetLevel};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavigationError {
    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Listing entry point unreachable ({url}): {reason}")]
    EntryPoint { url: String, reason: String },

    #[error("Next group button not found while leaving group starting at {group_start}")]
    NextGroupMissing { group_start: u32 },

    #[error("Page button {0} not found")]
    PageButtonMissing(u32),

    #[error("Pagination lost: page {page} could not be restored after a hard reset ({reason})")]
    PaginationLost { page: u32, reason: String },

    #[error("Row for {item_id} not found even after soft and hard reset")]
    RowNotFound { item_id: String },

    #[error("Failed to open detail page for {item_id} (tried all methods)")]
    DetailUnavailable { item_id: String },

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Validation(#[from] RecordError),
}

impl NavigationError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The crawl position can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PaginationLost { .. })
    }
}

/// Cancellation-aware suspension points.
///
/// Every wait of the crawl goes through a `Pacer` so a fired token surfaces as
/// `NavigationError::Cancelled` at the next suspension point.
#[derive(Debug, Clone)]
pub struct Pacer {
    token: CancellationToken,
}

impl Pacer {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn pause(&self, duration: Duration) -> Result<(), NavigationError> {
        if self.token.is_cancelled() {
            return Err(NavigationError::Cancelled);
        }
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            () = self.token.cancelled() => Err(NavigationError::Cancelled),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Race a browser call against cancellation.
    pub async fn guard<T, F>(&self, call: F) -> Result<T, NavigationError>
    where
        F: Future<Output = Result<T, SessionError>>,
    {
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(NavigationError::Cancelled),
            result = call => result.map_err(NavigationError::from),
        }
    }
}

/// Swallow anything but cancellation; used for best-effort UI chores.
pub(crate) fn tolerate<T>(result: Result<T, NavigationError>, what: &str) -> Result<Option<T>, NavigationError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(NavigationError::Cancelled) => Err(NavigationError::Cancelled),
        Err(e) => {
            debug!("{} failed: {}", what, e);
            Ok(None)
        }
    }
}

const MAX_DISMISS_ROUNDS: usize = 3;

pub struct Navigator {
    wait: WaitConfig,
    list_page_url: String,
    pacer: Pacer,
    span: Span,
}

impl Navigator {
    pub fn new(wait: WaitConfig, list_page_url: impl Into<String>, pacer: Pacer, span: Span) -> Self {
        Self {
            wait,
            list_page_url: list_page_url.into(),
            pacer,
            span,
        }
    }

    pub fn wait(&self) -> &WaitConfig {
        &self.wait
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    async fn visible(&self, page: &dyn PageSurface, target: &UiTarget) -> Result<bool, NavigationError> {
        Ok(tolerate(self.pacer.guard(page.is_visible(target)).await, "visibility check")?.unwrap_or(false))
    }

    async fn present(&self, page: &dyn PageSurface, target: &UiTarget) -> Result<bool, NavigationError> {
        Ok(tolerate(self.pacer.guard(page.count(target)).await, "element count")?.unwrap_or(0) > 0)
    }

    /// Standard click first, forced click when the element is covered.
    async fn click_with_fallback(&self, page: &dyn PageSurface, target: &UiTarget) -> Result<(), NavigationError> {
        match self.pacer.guard(page.click(target, ClickMode::Standard)).await {
            Err(NavigationError::Session(e)) => {
                warn!("Standard click on {} failed ({}), trying force click", target, e);
                self.pacer.guard(page.click(target, ClickMode::Forced)).await
            }
            other => other,
        }
    }

    /// Open the listing from its entry point: start-up dialogs, menus, search, grid.
    pub async fn enter_listing(&self, page: &dyn PageSurface) -> Result<(), NavigationError> {
        async {
            info!("🌐 Initializing listing state at {}", self.list_page_url);
            self.pacer
                .guard(page.navigate(&self.list_page_url, self.wait.navigation_timeout()))
                .await
                .map_err(|e| match e {
                    NavigationError::Cancelled => NavigationError::Cancelled,
                    other => NavigationError::EntryPoint {
                        url: self.list_page_url.clone(),
                        reason: other.to_string(),
                    },
                })?;

            self.pacer.pause(self.wait.modal_settle()).await?;
            tolerate(
                self.pacer.guard(page.run_script(ScriptAction::ClickCloseButtons)).await,
                "start-up dialog dismissal",
            )?;

            for menu in [UiTarget::TopMenu, UiTarget::ListMenu] {
                let waited = self
                    .pacer
                    .guard(page.wait_for(&menu, WaitCondition::Attached, self.wait.element_timeout()))
                    .await;
                let clicked = match waited {
                    Ok(()) => self.click_with_fallback(page, &menu).await,
                    Err(e) => Err(e),
                };
                if tolerate(clicked, "menu navigation")?.is_none() {
                    warn!("Menu entry {} unavailable during start-up", menu);
                }
                self.pacer.pause(self.wait.action_settle()).await?;
            }

            self.run_search(page).await?;
            self.pacer
                .guard(page.wait_for(&UiTarget::ListingGrid, WaitCondition::Visible, self.wait.element_timeout()))
                .await
                .map_err(|e| match e {
                    NavigationError::Cancelled => NavigationError::Cancelled,
                    other => NavigationError::EntryPoint {
                        url: self.list_page_url.clone(),
                        reason: format!("listing grid never appeared: {other}"),
                    },
                })?;
            self.pacer.pause(self.wait.after_load()).await?;
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Click the search button if it is there; returns whether it was clicked.
    async fn run_search(&self, page: &dyn PageSurface) -> Result<bool, NavigationError> {
        let ready = self
            .pacer
            .guard(page.wait_for(&UiTarget::SearchButton, WaitCondition::Visible, self.wait.element_timeout()))
            .await;
        if tolerate(ready, "search button wait")?.is_none() {
            debug!("Could not find search button");
            return Ok(false);
        }
        let clicked = self.pacer.guard(page.click(&UiTarget::SearchButton, ClickMode::Forced)).await;
        Ok(tolerate(clicked, "search click")?.is_some())
    }

    /// Close dialogs, overlays and extra tabs, then switch to the first tab.
    pub async fn dismiss_overlays(&self, page: &dyn PageSurface) -> Result<(), NavigationError> {
        for round in 0..MAX_DISMISS_ROUNDS {
            let has_modal = self.present(page, &UiTarget::DetailModal).await?;
            let has_overlay = self.present(page, &UiTarget::BlockingOverlay).await?;
            if !has_modal && !has_overlay {
                break;
            }
            debug!("Closing modals (round {})", round + 1);

            tolerate(self.pacer.guard(page.press_key("Escape")).await, "escape key")?;
            self.pacer.pause(self.wait.action_settle() / 2).await?;
            tolerate(
                self.pacer.guard(page.run_script(ScriptAction::ClickCloseButtons)).await,
                "close buttons",
            )?;
            tolerate(
                self.pacer.guard(page.run_script(ScriptAction::ForceRemoveOverlays)).await,
                "overlay removal",
            )?;
            self.pacer.pause(self.wait.action_settle()).await?;
        }

        if self.visible(page, &UiTarget::FirstTab).await? {
            debug!("Switching to first tab (list view)...");
            tolerate(
                self.pacer.guard(page.click(&UiTarget::FirstTab, ClickMode::Forced)).await,
                "first tab click",
            )?;
            self.pacer.pause(self.wait.action_settle()).await?;
        }
        Ok(())
    }

    /// Close a detail modal: close button, then Escape, then script removal.
    pub async fn close_detail_modal(&self, page: &dyn PageSurface) -> Result<(), NavigationError> {
        if self.visible(page, &UiTarget::DetailModalClose).await? {
            tolerate(
                self.pacer
                    .guard(page.click(&UiTarget::DetailModalClose, ClickMode::Forced))
                    .await,
                "modal close button",
            )?;
        } else {
            debug!("No close button found, trying ESC key...");
            tolerate(self.pacer.guard(page.press_key("Escape")).await, "escape key")?;
        }
        self.pacer.pause(self.wait.action_settle()).await?;

        if self.visible(page, &UiTarget::DetailModal).await? {
            debug!("Modal still visible, removing it by script");
            tolerate(
                self.pacer.guard(page.run_script(ScriptAction::ForceRemoveModals)).await,
                "modal removal",
            )?;
            tolerate(
                self.pacer.guard(page.run_script(ScriptAction::ForceRemoveOverlays)).await,
                "overlay removal",
            )?;
        }
        Ok(())
    }

    /// Make sure the listing grid is on screen; returns whether it is.
    pub async fn ensure_on_list_page(&self, page: &dyn PageSurface) -> Result<bool, NavigationError> {
        let grid_wait = self
            .pacer
            .guard(page.wait_for(&UiTarget::ListingGrid, WaitCondition::Visible, self.wait.list_check_timeout()))
            .await;
        if tolerate(grid_wait, "list grid check")?.is_some() {
            return Ok(true);
        }
        warn!("List grid not visible, attempting recovery...");

        self.dismiss_overlays(page).await?;
        if self.visible(page, &UiTarget::ListingGrid).await? {
            debug!("✓ List grid became visible after closing modals");
            return Ok(true);
        }

        if self.visible(page, &UiTarget::ListTab).await? {
            tolerate(
                self.pacer.guard(page.click(&UiTarget::ListTab, ClickMode::Forced)).await,
                "list tab click",
            )?;
            self.pacer.pause(self.wait.modal_settle()).await?;
            if self.visible(page, &UiTarget::ListingGrid).await? {
                debug!("✓ Successfully returned to list page");
                return Ok(true);
            }
        }

        if self.visible(page, &UiTarget::SearchButton).await? {
            tolerate(
                self.pacer.guard(page.click(&UiTarget::SearchButton, ClickMode::Forced)).await,
                "search click",
            )?;
            self.pacer.pause(self.wait.after_load()).await?;
            if self.visible(page, &UiTarget::ListingGrid).await? {
                debug!("✓ List refreshed successfully");
                return Ok(true);
            }
        }

        warn!("Could not verify list page visibility");
        Ok(false)
    }

    /// Re-issue the listing query from the current view.
    pub async fn soft_reset(&self, page: &dyn PageSurface) -> Result<(), NavigationError> {
        self.dismiss_overlays(page).await?;
        debug!("Resetting list view via search button (soft reset)...");
        if !self.run_search(page).await? {
            debug!("Could not find search button for soft reset");
            return Ok(());
        }
        self.pacer.pause(self.wait.after_load()).await?;
        let rows = self
            .pacer
            .guard(page.wait_for(&UiTarget::ListingRows, WaitCondition::Visible, self.wait.element_timeout()))
            .await;
        tolerate(rows, "row wait after soft reset")?;
        Ok(())
    }

    /// Rebuild the listing context through the top-level menus, then query again.
    pub async fn hard_reset(&self, page: &dyn PageSurface) -> Result<(), NavigationError> {
        info!("Triggering HARD RESET via menu...");
        self.dismiss_overlays(page).await?;

        if self.visible(page, &UiTarget::TopMenu).await? {
            tolerate(
                self.pacer.guard(page.click(&UiTarget::TopMenu, ClickMode::Forced)).await,
                "top menu click",
            )?;
            self.pacer.pause(self.wait.action_settle() / 2).await?;
        }
        self.pacer
            .guard(page.click(&UiTarget::ListMenu, ClickMode::Forced))
            .await?;
        self.pacer.pause(self.wait.modal_settle()).await?;

        if self.run_search(page).await? {
            let busy = self
                .pacer
                .guard(page.wait_for(&UiTarget::BusyIndicator, WaitCondition::Hidden, self.wait.element_timeout()))
                .await;
            tolerate(busy, "busy indicator wait")?;
            let rows = self
                .pacer
                .guard(page.wait_for(&UiTarget::ListingRows, WaitCondition::Visible, self.wait.in_place_timeout()))
                .await;
            match tolerate(rows, "row wait after hard reset")? {
                Some(()) => {
                    let count = tolerate(self.pacer.guard(page.count(&UiTarget::ListingRows)).await, "row count")?;
                    info!("Hard reset complete. Grid populated with {} rows.", count.unwrap_or(0));
                }
                None => warn!("Grid did not populate after hard reset"),
            }
        }
        Ok(())
    }

    /// Targeted lookup: reset the listing and query it by identifier.
    /// Returns whether the item's row is visible afterwards.
    pub async fn search_item(&self, page: &dyn PageSurface, item_id: &str) -> Result<bool, NavigationError> {
        async {
            self.enter_listing(page).await?;
            info!("🔍 Searching for {}...", item_id);

            self.pacer
                .guard(page.wait_for(&UiTarget::SearchInput, WaitCondition::Attached, self.wait.element_timeout()))
                .await?;
            self.pacer.guard(page.fill(&UiTarget::SearchInput, item_id)).await?;
            self.pacer
                .guard(page.click(&UiTarget::SearchButton, ClickMode::Standard))
                .await?;
            self.pacer.pause(self.wait.modal_settle()).await?;
            self.pacer
                .guard(page.wait_for(&UiTarget::ListingGrid, WaitCondition::Visible, self.wait.element_timeout()))
                .await?;

            self.visible(page, &UiTarget::ItemRow(item_id.to_string())).await
        }
        .instrument(self.span.clone())
        .await
    }

    /// Let a freshly loaded listing settle before rows are read.
    pub async fn wait_for_page_load(&self, page: &dyn PageSurface) -> Result<(), NavigationError> {
        let load = self.pacer.guard(page.wait_for_load(self.wait.navigation_timeout())).await;
        tolerate(load, "page load wait")?;
        self.pacer.pause(self.wait.after_load()).await
    }

    /// Mandatory delay between listing pages.
    pub async fn rate_limit(&self) -> Result<(), NavigationError> {
        self.pacer.pause(self.wait.between_pages()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedPage;

    fn navigator(token: CancellationToken) -> Navigator {
        Navigator::new(
            WaitConfig::immediate(),
            "https://example.org/list",
            Pacer::new(token),
            Span::none(),
        )
    }

    #[tokio::test]
    async fn pause_reports_cancellation() {
        let token = CancellationToken::new();
        let pacer = Pacer::new(token.clone());
        assert!(pacer.pause(Duration::ZERO).await.is_ok());
        token.cancel();
        assert_eq!(pacer.pause(Duration::from_secs(60)).await, Err(NavigationError::Cancelled));
    }

    #[tokio::test]
    async fn enter_listing_walks_menus_and_searches() {
        let page = ScriptedPage::listing();
        navigator(CancellationToken::new()).enter_listing(&page).await.unwrap();

        let log = page.actions();
        let top = log.iter().position(|a| a == "click:TopMenu").unwrap();
        let list = log.iter().position(|a| a == "click:ListMenu").unwrap();
        let search = log.iter().position(|a| a == "click:SearchButton").unwrap();
        assert!(top < list && list < search, "{log:?}");
        assert!(log[0].starts_with("navigate:"));
    }

    #[tokio::test]
    async fn unreachable_entry_point_is_reported() {
        let page = ScriptedPage::listing();
        page.fail_navigation();
        let err = navigator(CancellationToken::new()).enter_listing(&page).await.unwrap_err();
        assert!(matches!(err, NavigationError::EntryPoint { .. }));
    }

    #[tokio::test]
    async fn dismiss_overlays_stops_after_three_rounds() {
        let page = ScriptedPage::listing();
        page.show(UiTarget::BlockingOverlay);
        page.make_sticky(UiTarget::BlockingOverlay);

        navigator(CancellationToken::new()).dismiss_overlays(&page).await.unwrap();

        let escapes = page.actions().iter().filter(|a| *a == "key:Escape").count();
        assert_eq!(escapes, MAX_DISMISS_ROUNDS);
    }

    #[tokio::test]
    async fn ensure_on_list_page_uses_list_tab() {
        let page = ScriptedPage::listing();
        page.hide(UiTarget::ListingGrid);
        page.show(UiTarget::ListTab);
        page.on_click(UiTarget::ListTab, &[UiTarget::ListingGrid], &[]);

        assert!(navigator(CancellationToken::new()).ensure_on_list_page(&page).await.unwrap());
        assert!(page.actions().contains(&"click:ListTab".to_string()));
    }

    #[tokio::test]
    async fn search_item_fills_identifier() {
        let page = ScriptedPage::listing();
        page.show(UiTarget::ItemRow("R25BK0099".into()));

        let found = navigator(CancellationToken::new())
            .search_item(&page, "R25BK0099")
            .await
            .unwrap();

        assert!(found);
        assert!(page.actions().contains(&"fill:SearchInput=R25BK0099".to_string()));
    }

    #[test]
    fn only_pagination_loss_is_fatal() {
        assert!(NavigationError::PaginationLost { page: 3, reason: "x".into() }.is_fatal());
        assert!(!NavigationError::RowNotFound { item_id: "a".into() }.is_fatal());
        assert!(NavigationError::Cancelled.is_cancelled());
    }
}
