//! Test utilities for the harvester
//!
//! Scripted stand-ins for the browser, extractor and sinks so that navigation,
//! recovery and the crawl loop can be exercised without a real browser.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::collaborators::{DetailView, ExtractionError, ListingExtractor, RecordSink, SinkError};
use crate::domain::record::{NoticeRecord, RawItem, fields};
use crate::domain::session::{
    BrowserSession, ClickMode, PageSurface, ScriptAction, SessionError, UiTarget, WaitCondition,
};
use crate::infrastructure::config::{HarvestConfig, RetryConfig, WaitConfig};

#[derive(Default)]
struct PageState {
    visible: HashSet<UiTarget>,
    hidden: HashSet<UiTarget>,
    /// Survives Escape and script removal
    sticky: HashSet<UiTarget>,
    rows_visible_by_default: bool,
    unclickable: HashSet<UiTarget>,
    click_effects: HashMap<UiTarget, (Vec<UiTarget>, Vec<UiTarget>)>,
    script_results: HashMap<ScriptAction, bool>,
    queued_surfaces: VecDeque<ScriptedPage>,
    details_in_new_tab: bool,
    navigation_fails: bool,
    closed: bool,
    actions: Vec<String>,
}

impl PageState {
    fn is_visible(&self, target: &UiTarget) -> bool {
        if self.hidden.contains(target) {
            return false;
        }
        if self.visible.contains(target) {
            return true;
        }
        self.rows_visible_by_default && matches!(target, UiTarget::ItemRow(_) | UiTarget::ItemLink(_))
    }

    fn show(&mut self, target: UiTarget) {
        self.hidden.remove(&target);
        self.visible.insert(target);
    }

    fn hide(&mut self, target: UiTarget) {
        self.visible.remove(&target);
        self.hidden.insert(target);
    }

    fn remove_unless_sticky(&mut self, target: UiTarget) {
        if !self.sticky.contains(&target) {
            self.visible.remove(&target);
        }
    }

    fn apply_click(&mut self, target: &UiTarget) -> Result<(), SessionError> {
        self.actions.push(format!("click:{target}"));
        if self.unclickable.contains(target) {
            return Err(SessionError::ElementNotFound(target.to_string()));
        }
        if let Some((show, hide)) = self.click_effects.get(target).cloned() {
            for t in show {
                self.show(t);
            }
            for t in hide {
                self.hide(t);
            }
        }
        Ok(())
    }
}

/// A page whose UI state is a set of visible targets plus click effects.
/// Clones share state, so a test keeps a handle while the code under test owns another.
#[derive(Clone, Default)]
pub struct ScriptedPage {
    state: Arc<Mutex<PageState>>,
}

impl ScriptedPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A healthy listing page: menus, search form, grid and every row on screen.
    pub fn listing() -> Self {
        let page = Self::new();
        {
            let mut state = page.lock();
            state.rows_visible_by_default = true;
            for target in [
                UiTarget::ListingGrid,
                UiTarget::ListingRows,
                UiTarget::SearchButton,
                UiTarget::SearchInput,
                UiTarget::TopMenu,
                UiTarget::ListMenu,
            ] {
                state.visible.insert(target);
            }
        }
        page
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap()
    }

    pub fn show(&self, target: UiTarget) {
        self.lock().show(target);
    }

    pub fn hide(&self, target: UiTarget) {
        self.lock().hide(target);
    }

    pub fn make_sticky(&self, target: UiTarget) {
        self.lock().sticky.insert(target);
    }

    /// Clicking `target` shows and hides the given targets.
    pub fn on_click(&self, target: UiTarget, show: &[UiTarget], hide: &[UiTarget]) {
        self.lock()
            .click_effects
            .insert(target, (show.to_vec(), hide.to_vec()));
    }

    pub fn make_unclickable(&self, target: UiTarget) {
        self.lock().unclickable.insert(target);
    }

    pub fn set_script_result(&self, action: ScriptAction, found: bool) {
        self.lock().script_results.insert(action, found);
    }

    pub fn queue_new_surface(&self, surface: ScriptedPage) {
        self.lock().queued_surfaces.push_back(surface);
    }

    /// Every item link opens a fresh detail tab.
    pub fn open_details_in_new_tab(&self) {
        self.lock().details_in_new_tab = true;
    }

    pub fn fail_navigation(&self) {
        self.lock().navigation_fails = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn actions(&self) -> Vec<String> {
        self.lock().actions.clone()
    }

    pub fn count_action(&self, action: &str) -> usize {
        self.lock().actions.iter().filter(|a| *a == action).count()
    }
}

#[async_trait]
impl PageSurface for ScriptedPage {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), SessionError> {
        let mut state = self.lock();
        state.actions.push(format!("navigate:{url}"));
        if state.navigation_fails {
            return Err(SessionError::Navigation {
                url: url.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(())
    }

    async fn wait_for_load(&self, _timeout: Duration) -> Result<(), SessionError> {
        Ok(())
    }

    async fn count(&self, target: &UiTarget) -> Result<usize, SessionError> {
        Ok(usize::from(self.lock().is_visible(target)))
    }

    async fn is_visible(&self, target: &UiTarget) -> Result<bool, SessionError> {
        Ok(self.lock().is_visible(target))
    }

    async fn click(&self, target: &UiTarget, _mode: ClickMode) -> Result<(), SessionError> {
        self.lock().apply_click(target)
    }

    async fn fill(&self, target: &UiTarget, value: &str) -> Result<(), SessionError> {
        self.lock().actions.push(format!("fill:{target}={value}"));
        Ok(())
    }

    async fn wait_for(
        &self,
        target: &UiTarget,
        condition: WaitCondition,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let visible = self.lock().is_visible(target);
        let satisfied = match condition {
            WaitCondition::Attached | WaitCondition::Visible => visible,
            WaitCondition::Hidden => !visible,
        };
        if satisfied {
            Ok(())
        } else {
            Err(SessionError::timeout(target, timeout))
        }
    }

    async fn run_script(&self, action: ScriptAction) -> Result<bool, SessionError> {
        let mut state = self.lock();
        state.actions.push(format!("script:{action:?}"));
        match action {
            ScriptAction::ClickCloseButtons | ScriptAction::ForceRemoveOverlays => {
                state.remove_unless_sticky(UiTarget::BlockingOverlay);
            }
            ScriptAction::ForceRemoveModals => {
                state.remove_unless_sticky(UiTarget::DetailModal);
                state.remove_unless_sticky(UiTarget::DetailModalClose);
            }
            ScriptAction::ClickNextGroup => {}
        }
        Ok(state.script_results.get(&action).copied().unwrap_or(true))
    }

    async fn press_key(&self, key: &str) -> Result<(), SessionError> {
        let mut state = self.lock();
        state.actions.push(format!("key:{key}"));
        if key == "Escape" {
            state.remove_unless_sticky(UiTarget::DetailModal);
        }
        Ok(())
    }

    async fn expect_new_surface(
        &self,
        trigger: &UiTarget,
        _timeout: Duration,
    ) -> Result<Option<Box<dyn PageSurface>>, SessionError> {
        let mut state = self.lock();
        state.apply_click(trigger)?;
        if let Some(surface) = state.queued_surfaces.pop_front() {
            return Ok(Some(Box::new(surface)));
        }
        if state.details_in_new_tab {
            return Ok(Some(Box::new(ScriptedPage::new())));
        }
        Ok(None)
    }

    async fn bring_to_front(&self) -> Result<(), SessionError> {
        self.lock().actions.push("front".to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        let mut state = self.lock();
        state.actions.push("close".to_string());
        state.closed = true;
        Ok(())
    }

    async fn dump_diagnostics(&self, label: &str) -> Result<Option<PathBuf>, SessionError> {
        self.lock().actions.push(format!("diagnostics:{label}"));
        Ok(None)
    }
}

/// Browser handing out one shared `ScriptedPage`
pub struct ScriptedBrowser {
    page: ScriptedPage,
    closed: Mutex<bool>,
}

impl ScriptedBrowser {
    pub fn new(page: ScriptedPage) -> Self {
        Self {
            page,
            closed: Mutex::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

#[async_trait]
impl BrowserSession for ScriptedBrowser {
    async fn open_page(&self) -> Result<Box<dyn PageSurface>, SessionError> {
        Ok(Box::new(self.page.clone()))
    }

    async fn close(&self) -> Result<(), SessionError> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

/// Extractor serving fixed listing pages and per-item detail fields
#[derive(Default)]
pub struct ScriptedExtractor {
    pages: Vec<Vec<RawItem>>,
    cursor: Mutex<usize>,
    details: HashMap<String, RawItem>,
    failing_pages: Mutex<HashSet<usize>>,
    detail_calls: Mutex<Vec<(String, DetailView)>>,
}

impl ScriptedExtractor {
    pub fn new(pages: Vec<Vec<RawItem>>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    pub fn with_detail(mut self, item_id: &str, detail: RawItem) -> Self {
        self.details.insert(item_id.to_string(), detail);
        self
    }

    /// The next row extraction on this page index fails once.
    pub fn fail_rows_once(self, index: usize) -> Self {
        self.failing_pages.lock().unwrap().insert(index);
        self
    }

    pub fn detail_calls(&self) -> Vec<(String, DetailView)> {
        self.detail_calls.lock().unwrap().clone()
    }

    pub fn cursor(&self) -> usize {
        *self.cursor.lock().unwrap()
    }
}

#[async_trait]
impl ListingExtractor for ScriptedExtractor {
    async fn extract_rows(&self, _page: &dyn PageSurface) -> Result<Vec<RawItem>, ExtractionError> {
        let index = self.cursor();
        if self.failing_pages.lock().unwrap().remove(&index) {
            return Err(ExtractionError::Parse {
                context: format!("listing page {}", index + 1),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(self.pages.get(index).cloned().unwrap_or_default())
    }

    async fn extract_detail(
        &self,
        _page: &dyn PageSurface,
        base: &RawItem,
        view: DetailView,
    ) -> Result<RawItem, ExtractionError> {
        let id = base.item_id();
        self.detail_calls.lock().unwrap().push((id.clone(), view));
        let detail = self.details.get(&id).ok_or_else(|| ExtractionError::Parse {
            context: format!("detail of {id}"),
            reason: "no detail scripted".to_string(),
        })?;
        let mut enriched = base.clone();
        enriched.merge(detail);
        Ok(enriched)
    }

    async fn has_next_page(&self, _page: &dyn PageSurface) -> Result<bool, ExtractionError> {
        Ok(self.cursor() + 1 < self.pages.len())
    }

    async fn go_to_next_page(&self, _page: &dyn PageSurface) -> Result<bool, ExtractionError> {
        let mut cursor = self.cursor.lock().unwrap();
        if *cursor + 1 < self.pages.len() {
            *cursor += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Sink keeping every batch in memory
#[derive(Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<NoticeRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<NoticeRecord>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save(&self, records: &[NoticeRecord]) -> Result<PathBuf, SinkError> {
        let mut batches = self.batches.lock().unwrap();
        batches.push(records.to_vec());
        Ok(PathBuf::from(format!("memory://batch-{}", batches.len())))
    }
}

/// Sink rejecting every batch
pub struct FailingSink;

#[async_trait]
impl RecordSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    async fn save(&self, _records: &[NoticeRecord]) -> Result<PathBuf, SinkError> {
        Err(SinkError::Rejected("disk full".to_string()))
    }
}

/// Listing row that asks for a detail fetch.
pub fn listing_row(id: &str, name: &str, agency: &str) -> RawItem {
    RawItem::new()
        .with(fields::ITEM_ID, id)
        .with(fields::NAME, name)
        .with(fields::AGENCY, agency)
        .with("announcement_date", "2025-01-15")
        .with(fields::NEEDS_DETAIL, true)
}

/// Detail fields that satisfy both the validation gate and the quality gate.
pub fn complete_detail() -> RawItem {
    RawItem::new()
        .with("opening_date", "2025-02-01 10:00")
        .with("budget_amount", "1,000,000")
        .with("base_price", "950,000")
        .with("pre_qualification", "Y")
        .with("contract_bond", "10%")
}

/// Configuration with zero waits and every file under `dir`.
pub fn test_config(dir: &Path, early_exit_threshold: u32) -> HarvestConfig {
    let mut config = HarvestConfig::new("https://example.org/list", early_exit_threshold, 1);
    config.crawler.wait = WaitConfig::immediate();
    config.crawler.retry = RetryConfig {
        max_attempts: 2,
        initial_delay_ms: 0,
        backoff_factor: 1.0,
        max_delay_ms: 0,
    };
    config.checkpoint.directory = dir.join("checkpoints");
    config.deduplication.storage_file = dir.join("seen_items.json");
    config.storage.output_dir = dir.join("data");
    config.logging.file_output = false;
    config
}
