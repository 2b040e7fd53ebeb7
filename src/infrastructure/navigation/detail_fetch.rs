//! Detail page acquisition
//!
//! A listing row's detail can open three ways. They are tried in order:
//! 1. a new tab (popup) that is read and then closed
//! 2. a modal dialog over the listing
//! 3. an in-place view that replaces the grid
//!
//! Whatever path produced the content, it must pass the validation gate;
//! otherwise the item is treated as failed so it lands in the retry queue.

use std::sync::Arc;

use tracing::{Instrument, Span, debug, info, warn};

use super::{NavigationError, Navigator, RecoveryContext, RecoveryLadder, tolerate};
use crate::domain::collaborators::{DetailView, ListingExtractor};
use crate::domain::quality::validate_detail;
use crate::domain::record::RawItem;
use crate::domain::session::{ClickMode, PageSurface, UiTarget, WaitCondition};

pub struct DetailFetcher {
    navigator: Arc<Navigator>,
    ladder: RecoveryLadder,
    extractor: Arc<dyn ListingExtractor>,
    validation_field: String,
    span: Span,
}

impl DetailFetcher {
    pub fn new(
        navigator: Arc<Navigator>,
        ladder: RecoveryLadder,
        extractor: Arc<dyn ListingExtractor>,
        validation_field: impl Into<String>,
        span: Span,
    ) -> Self {
        Self {
            navigator,
            ladder,
            extractor,
            validation_field: validation_field.into(),
            span,
        }
    }

    /// Open `base`'s detail view, extract it and return the enriched item.
    pub async fn fetch(&self, page: &dyn PageSurface, base: &RawItem, page_number: u32) -> Result<RawItem, NavigationError> {
        let item_id = base.item_id();
        async {
            self.navigator.dismiss_overlays(page).await?;
            self.ladder
                .locate_row(page, &RecoveryContext::new(page_number, item_id.clone()))
                .await?;
            self.navigator.dismiss_overlays(page).await?;

            let result = self.open_and_extract(page, base, &item_id).await;
            if let Err(e) = &result {
                if !e.is_cancelled() {
                    // leave the listing usable for the next row
                    tolerate(self.navigator.dismiss_overlays(page).await, "cleanup after detail failure")?;
                }
            }
            result
        }
        .instrument(self.span.clone())
        .await
    }

    async fn open_and_extract(&self, page: &dyn PageSurface, base: &RawItem, item_id: &str) -> Result<RawItem, NavigationError> {
        let pacer = self.navigator.pacer();
        let wait = self.navigator.wait();
        let link = UiTarget::ItemLink(item_id.to_string());

        info!("🔗 Opening detail for {}...", item_id);

        let popup = pacer
            .guard(page.expect_new_surface(&link, wait.new_surface_timeout()))
            .await;
        if let Some(Some(surface)) = tolerate(popup, "new tab detection")? {
            debug!("Detail page opened (new tab)");
            return self.read_new_surface(page, surface.as_ref(), base).await;
        }
        debug!("Not opened in new tab, checking for modal...");

        pacer.pause(wait.modal_settle()).await?;
        let modal_open = pacer.guard(page.is_visible(&UiTarget::DetailModal)).await;
        if tolerate(modal_open, "modal check")? == Some(true) {
            debug!("Detail modal detected");
            let extracted = self.extractor.extract_detail(page, base, DetailView::Modal).await;
            self.navigator.close_detail_modal(page).await?;
            self.navigator.ensure_on_list_page(page).await?;
            return self.validated(extracted?, DetailView::Modal);
        }

        debug!("No modal detected, checking for in-place navigation...");
        tolerate(pacer.guard(page.click(&link, ClickMode::Scripted)).await, "scripted link click")?;
        let in_place = pacer
            .guard(page.wait_for(&UiTarget::DetailIndicator, WaitCondition::Visible, wait.in_place_timeout()))
            .await;
        if tolerate(in_place, "in-place detail wait")?.is_some() {
            debug!("In-place detail view detected");
            pacer.pause(wait.modal_settle()).await?;
            let extracted = self.extractor.extract_detail(page, base, DetailView::InPlace).await;
            self.return_from_in_place(page).await?;
            return self.validated(extracted?, DetailView::InPlace);
        }

        warn!("Failed to open detail page for {} (tried all methods)", item_id);
        Err(NavigationError::DetailUnavailable {
            item_id: item_id.to_string(),
        })
    }

    async fn read_new_surface(
        &self,
        page: &dyn PageSurface,
        surface: &dyn PageSurface,
        base: &RawItem,
    ) -> Result<RawItem, NavigationError> {
        let pacer = self.navigator.pacer();
        let wait = self.navigator.wait();

        tolerate(
            pacer.guard(surface.wait_for_load(wait.navigation_timeout())).await,
            "detail tab load",
        )?;
        let extracted = self.extractor.extract_detail(surface, base, DetailView::NewSurface).await;

        tolerate(pacer.guard(surface.close()).await, "detail tab close")?;
        tolerate(pacer.guard(page.bring_to_front()).await, "listing focus")?;
        pacer.pause(wait.action_settle()).await?;
        if !self.navigator.ensure_on_list_page(page).await? {
            warn!("Listing not confirmed after closing detail tab");
        }
        self.validated(extracted?, DetailView::NewSurface)
    }

    async fn return_from_in_place(&self, page: &dyn PageSurface) -> Result<(), NavigationError> {
        let pacer = self.navigator.pacer();
        let back_visible = pacer.guard(page.is_visible(&UiTarget::BackToList)).await;
        if tolerate(back_visible, "back button check")? == Some(true) {
            tolerate(
                pacer.guard(page.click(&UiTarget::BackToList, ClickMode::Standard)).await,
                "back to list click",
            )?;
            pacer.pause(self.navigator.wait().after_load()).await?;
        } else {
            self.navigator.ensure_on_list_page(page).await?;
        }
        Ok(())
    }

    fn validated(&self, item: RawItem, view: DetailView) -> Result<RawItem, NavigationError> {
        if let Err(e) = validate_detail(&item, &self.validation_field) {
            warn!("🚫 {} (via {})", e, view.as_str());
            return Err(e.into());
        }
        info!("✓ Detail extracted for {} via {}", item.item_id(), view.as_str());
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pagination::PaginationCalculator;
    use crate::domain::record::RecordError;
    use crate::infrastructure::config::WaitConfig;
    use crate::infrastructure::navigation::{Pacer, PaginationRestorer};
    use crate::test_utils::{ScriptedExtractor, ScriptedPage, complete_detail, listing_row};
    use tokio_util::sync::CancellationToken;

    fn fetcher(extractor: Arc<ScriptedExtractor>) -> DetailFetcher {
        let navigator = Arc::new(Navigator::new(
            WaitConfig::immediate(),
            "https://example.org/list",
            Pacer::new(CancellationToken::new()),
            Span::none(),
        ));
        let restorer = PaginationRestorer::new(Arc::clone(&navigator), PaginationCalculator::default());
        let ladder = RecoveryLadder::standard(Arc::clone(&navigator), restorer, Span::none());
        DetailFetcher::new(navigator, ladder, extractor, "opening_date", Span::none())
    }

    fn extractor_with(id: &str, detail: RawItem) -> Arc<ScriptedExtractor> {
        Arc::new(ScriptedExtractor::new(vec![]).with_detail(id, detail))
    }

    #[tokio::test]
    async fn new_tab_is_read_and_closed() {
        let page = ScriptedPage::listing();
        let tab = ScriptedPage::new();
        page.queue_new_surface(tab.clone());
        let extractor = extractor_with("A1", complete_detail());

        let item = fetcher(Arc::clone(&extractor))
            .fetch(&page, &listing_row("A1", "Road works", "City"), 1)
            .await
            .unwrap();

        assert_eq!(item.text("budget_amount").as_deref(), Some("1,000,000"));
        assert_eq!(extractor.detail_calls(), vec![("A1".to_string(), DetailView::NewSurface)]);
        assert!(tab.is_closed());
        assert!(page.actions().contains(&"front".to_string()));
    }

    #[tokio::test]
    async fn modal_is_used_when_no_tab_opens() {
        let page = ScriptedPage::listing();
        page.on_click(
            UiTarget::ItemLink("A1".into()),
            &[UiTarget::DetailModal, UiTarget::DetailModalClose],
            &[],
        );
        page.on_click(
            UiTarget::DetailModalClose,
            &[],
            &[UiTarget::DetailModal, UiTarget::DetailModalClose],
        );
        let extractor = extractor_with("A1", complete_detail());

        fetcher(Arc::clone(&extractor))
            .fetch(&page, &listing_row("A1", "Road works", "City"), 1)
            .await
            .unwrap();

        assert_eq!(extractor.detail_calls()[0].1, DetailView::Modal);
        assert_eq!(page.count_action("click:DetailModalClose"), 1);
    }

    #[tokio::test]
    async fn in_place_view_returns_to_list() {
        let page = ScriptedPage::listing();
        page.show(UiTarget::DetailIndicator);
        page.show(UiTarget::BackToList);
        let extractor = extractor_with("A1", complete_detail());

        fetcher(Arc::clone(&extractor))
            .fetch(&page, &listing_row("A1", "Road works", "City"), 1)
            .await
            .unwrap();

        assert_eq!(extractor.detail_calls()[0].1, DetailView::InPlace);
        assert_eq!(page.count_action("click:BackToList"), 1);
    }

    #[tokio::test]
    async fn validation_gate_rejects_half_rendered_detail() {
        let page = ScriptedPage::listing();
        page.open_details_in_new_tab();
        let extractor = extractor_with("A1", RawItem::new().with("budget_amount", "5"));

        let err = fetcher(extractor)
            .fetch(&page, &listing_row("A1", "Road works", "City"), 1)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            NavigationError::Validation(RecordError::ValidationGateRejected { .. })
        ));
    }

    #[tokio::test]
    async fn unavailable_when_nothing_opens() {
        let page = ScriptedPage::listing();
        let err = fetcher(extractor_with("A1", complete_detail()))
            .fetch(&page, &listing_row("A1", "Road works", "City"), 1)
            .await
            .unwrap_err();
        assert_eq!(err, NavigationError::DetailUnavailable { item_id: "A1".into() });
    }
}
