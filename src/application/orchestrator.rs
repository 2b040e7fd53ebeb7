//! Crawl orchestrator
//!
//! Resolves where to start (page range override, checkpoint resume or fresh),
//! drives the page loop with the item workflow, applies the page-level error
//! ceiling, and finalizes the checkpoint as Completed, Paused or Failed.
//!
//! Resume policy: an `InProgress` or `Paused` checkpoint resumes at its page. A
//! `Completed` or `Failed` checkpoint starts again from page 1; the dedup store and
//! early exit stop the run once it reaches already harvested items.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, warn};
use uuid::Uuid;

use super::item_processor::{HarvestState, ItemError, ItemProcessor};
use super::retry_replayer::RetryReplayer;
use super::statistics::{CrawlStatistics, ReplaySummary, StatisticsReport};
use crate::domain::checkpoint::CrawlState;
use crate::domain::collaborators::{ExtractionError, ListingExtractor, RecordSink};
use crate::domain::pagination::PaginationCalculator;
use crate::domain::record::{RecordCollection, RecordError};
use crate::domain::session::{BrowserSession, PageSurface, SessionError};
use crate::infrastructure::checkpoint_store::{CheckpointError, CheckpointStore};
use crate::infrastructure::config::HarvestConfig;
use crate::infrastructure::dedup_store::DedupStore;
use crate::infrastructure::csv_sink::CsvRecordSink;
use crate::infrastructure::json_sink::JsonRecordSink;
use crate::infrastructure::logging::component_span;
use crate::infrastructure::navigation::{
    DetailFetcher, NavigationError, Navigator, Pacer, PaginationRestorer, RecoveryLadder, tolerate,
};
use crate::infrastructure::retry_policy::{RetryPolicy, with_retry};

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Crawl cancelled")]
    Cancelled,

    #[error("Browser session error: {0}")]
    Session(#[from] SessionError),

    #[error(transparent)]
    Navigation(NavigationError),

    #[error("Could not restore pagination to page {page} before reading rows: {source}")]
    StartupRestore {
        page: u32,
        #[source]
        source: NavigationError,
    },

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Record(RecordError),

    #[error("Aborting crawl after {0} page-level errors")]
    TooManyPageErrors(u32),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl CrawlError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Errors confined to one listing page; the loop skips the page and goes on.
    pub fn is_page_level(&self) -> bool {
        match self {
            Self::Extraction(_) | Self::Session(_) | Self::Record(_) => true,
            Self::Navigation(e) => !e.is_fatal(),
            _ => false,
        }
    }
}

impl From<NavigationError> for CrawlError {
    fn from(e: NavigationError) -> Self {
        match e {
            NavigationError::Cancelled => Self::Cancelled,
            other => Self::Navigation(other),
        }
    }
}

impl From<ItemError> for CrawlError {
    fn from(e: ItemError) -> Self {
        match e {
            ItemError::Navigation(e) => e.into(),
            ItemError::Record(e) => Self::Record(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageFlow {
    Advanced,
    EarlyExit,
    Exhausted,
}

/// Per-run components wired to one cancellation token
struct RunComponents {
    navigator: Arc<Navigator>,
    restorer: PaginationRestorer,
    processor: ItemProcessor,
}

pub struct Orchestrator {
    config: HarvestConfig,
    browser: Arc<dyn BrowserSession>,
    extractor: Arc<dyn ListingExtractor>,
    sinks: Vec<Arc<dyn RecordSink>>,
    state: HarvestState,
    span: Span,
}

impl Orchestrator {
    pub fn new(
        config: HarvestConfig,
        browser: Arc<dyn BrowserSession>,
        extractor: Arc<dyn ListingExtractor>,
        sinks: Vec<Arc<dyn RecordSink>>,
    ) -> Self {
        let checkpoint = CheckpointStore::new(
            &config.checkpoint.directory,
            &config.checkpoint.filename,
            config.checkpoint.save_interval,
            component_span("checkpoint"),
        );
        let dedup = DedupStore::new(&config.deduplication, component_span("dedup"));
        Self {
            config,
            browser,
            extractor,
            sinks,
            state: HarvestState::new(checkpoint, dedup),
            span: component_span("orchestrator"),
        }
    }

    /// Orchestrator writing its output to files under `storage.output_dir`: a
    /// `JsonRecordSink` and/or a `CsvRecordSink`, as `storage` enables them.
    pub fn with_file_output(
        config: HarvestConfig,
        browser: Arc<dyn BrowserSession>,
        extractor: Arc<dyn ListingExtractor>,
    ) -> Self {
        let mut sinks: Vec<Arc<dyn RecordSink>> = Vec::new();
        if config.storage.json_output {
            sinks.push(Arc::new(JsonRecordSink::new(
                config.storage.clone(),
                config.website.list_page_url.clone(),
                component_span("json_sink"),
            )));
        }
        if config.storage.csv_output {
            sinks.push(Arc::new(CsvRecordSink::new(
                config.storage.clone(),
                component_span("csv_sink"),
            )));
        }
        if sinks.is_empty() {
            warn!("No output format enabled in storage settings; records will not be written");
        }
        Self::new(config, browser, extractor, sinks)
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.state.checkpoint
    }

    pub fn dedup(&self) -> &DedupStore {
        &self.state.dedup
    }

    pub fn collection(&self) -> &RecordCollection {
        &self.state.collection
    }

    /// Statistics of the last run plus resume and dedup state.
    pub fn statistics(&self) -> StatisticsReport {
        StatisticsReport {
            run: self.state.stats,
            resume: self.state.checkpoint.resume_info(),
            dedup: self.state.dedup.stats(),
        }
    }

    fn components(&self, token: &CancellationToken) -> RunComponents {
        let navigator = Arc::new(Navigator::new(
            self.config.crawler.wait.clone(),
            self.config.website.list_page_url.clone(),
            Pacer::new(token.clone()),
            component_span("navigator"),
        ));
        let calculator = PaginationCalculator::new(self.config.crawler.pagination.group_size);
        let ladder = RecoveryLadder::standard(
            Arc::clone(&navigator),
            PaginationRestorer::new(Arc::clone(&navigator), calculator),
            component_span("recovery"),
        );
        let fetcher = DetailFetcher::new(
            Arc::clone(&navigator),
            ladder,
            Arc::clone(&self.extractor),
            self.config.quality.validation_field.clone(),
            component_span("detail"),
        );
        let processor = ItemProcessor::new(
            fetcher,
            self.config.quality.gate(),
            self.config.crawler.early_exit_threshold,
            component_span("item"),
        );
        RunComponents {
            restorer: PaginationRestorer::new(Arc::clone(&navigator), calculator),
            navigator,
            processor,
        }
    }

    fn run_metadata(&self) -> BTreeMap<String, Value> {
        let mut metadata = BTreeMap::new();
        metadata.insert("run_id".to_string(), Value::from(Uuid::new_v4().to_string()));
        metadata.insert(
            "list_page_url".to_string(),
            Value::from(self.config.website.list_page_url.clone()),
        );
        metadata.insert(
            "early_exit_threshold".to_string(),
            Value::from(self.config.crawler.early_exit_threshold),
        );
        metadata.insert(
            "key_fields".to_string(),
            Value::from(self.config.deduplication.key_fields.clone()),
        );
        metadata
    }

    /// Decide the starting page and leave the checkpoint `InProgress`.
    ///
    /// Only a `Completed` crawl starts over; every other stored state resumes at its page.
    /// The failed backlog survives either way.
    fn resolve_start(&mut self, resume: bool) {
        let metadata = self.run_metadata();
        // loaded even for a fresh start so the stored backlog is carried forward
        let loaded = self.state.checkpoint.load();

        if let Some(range) = self.config.crawler.page_range {
            info!("📌 Page range override: pages {}..{:?}", range.start, range.end);
            self.state.checkpoint.initialize_crawl(metadata);
            self.state.checkpoint.seek_page(range.start);
            return;
        }

        if resume && loaded {
            let resume_info = self.state.checkpoint.resume_info();
            if resume_info.state != CrawlState::Completed {
                if resume_info.state != CrawlState::InProgress {
                    if let Err(e) = self.state.checkpoint.set_state(CrawlState::InProgress) {
                        warn!("Could not mark checkpoint in progress: {}", e);
                    }
                }
                info!(
                    "▶️ Resuming {} crawl from page {} ({} processed, {} failed)",
                    resume_info.state, resume_info.current_page, resume_info.total_processed, resume_info.total_failed
                );
                return;
            }
            info!("Previous crawl is completed; starting again from page 1 to pick up new items");
        }

        self.state.checkpoint.initialize_crawl(metadata);
    }

    /// Run one crawl. Statistics are logged however the run ends.
    pub async fn run(&mut self, resume: bool, token: CancellationToken) -> Result<CrawlStatistics, CrawlError> {
        let span = self.span.clone();
        async {
            self.state.collection = RecordCollection::new();
            self.state.stats = CrawlStatistics::default();
            self.resolve_start(resume);

            let mut components = self.components(&token);
            let result = self.crawl(&mut components, &token).await;
            let result = self.finalize(result).await;

            self.state.stats.total_collected = self.state.collection.len();
            self.state.stats.log_summary();
            result.map(|()| self.state.stats)
        }
        .instrument(span)
        .await
    }

    async fn crawl(&mut self, components: &mut RunComponents, token: &CancellationToken) -> Result<(), CrawlError> {
        let browser = Arc::clone(&self.browser);
        let page = components
            .navigator
            .pacer()
            .guard(browser.open_page())
            .await
            .map_err(CrawlError::from)?;

        let result = self.crawl_pages(page.as_ref(), components, token).await;

        if let Err(e) = page.close().await {
            debug!("Closing page failed: {}", e);
        }
        if let Err(e) = browser.close().await {
            warn!("Closing browser session failed: {}", e);
        }
        result
    }

    async fn enter_listing(
        &self,
        page: &dyn PageSurface,
        navigator: &Navigator,
        token: &CancellationToken,
    ) -> Result<(), CrawlError> {
        let policy = RetryPolicy::from(&self.config.crawler.retry);
        with_retry(
            &policy,
            token,
            |e: &NavigationError| !e.is_cancelled(),
            move |_| navigator.enter_listing(page),
        )
        .await
        .map_err(|e| e.into_inner().map_or(CrawlError::Cancelled, CrawlError::from))
    }

    async fn crawl_pages(
        &mut self,
        page: &dyn PageSurface,
        components: &mut RunComponents,
        token: &CancellationToken,
    ) -> Result<(), CrawlError> {
        let navigator = Arc::clone(&components.navigator);
        self.enter_listing(page, &navigator, token).await?;

        let start_page = self.state.checkpoint.current_page();
        if start_page > 1 {
            components
                .restorer
                .restore(page, start_page)
                .await
                .map_err(|e| match e {
                    NavigationError::Cancelled => CrawlError::Cancelled,
                    source => CrawlError::StartupRestore {
                        page: start_page,
                        source,
                    },
                })?;
        }

        let page_range = self.config.crawler.page_range;
        loop {
            let current = self.state.checkpoint.current_page();
            if page_range.is_some_and(|range| !range.contains(current)) {
                info!("Reached end of configured page range at page {}", current);
                break;
            }

            info!("📄 Processing page {}", current);
            match self.process_page(page, &navigator, &mut components.processor, current).await {
                Ok(PageFlow::Advanced) => {
                    self.state.stats.pages_crawled += 1;
                    self.state.checkpoint.advance_page();
                    if let Err(e) = self.state.checkpoint.save(true) {
                        error!("Failed to save checkpoint after page {}: {}", current, e);
                    }
                    navigator.rate_limit().await?;
                }
                Ok(PageFlow::EarlyExit) => {
                    self.state.stats.pages_crawled += 1;
                    info!(
                        "🛑 Early exit: {} consecutive duplicates on page {}",
                        components.processor.consecutive_duplicates(),
                        current
                    );
                    break;
                }
                Ok(PageFlow::Exhausted) => {
                    self.state.stats.pages_crawled += 1;
                    info!("No more pages after page {}", current);
                    break;
                }
                Err(e) if e.is_page_level() => {
                    self.state.stats.page_errors += 1;
                    error!(
                        "Error processing page {} ({}/{} page errors): {}",
                        current, self.state.stats.page_errors, self.config.crawler.max_page_errors, e
                    );
                    let label = format!("page_{current}_error");
                    tolerate(navigator.pacer().guard(page.dump_diagnostics(&label)).await, "diagnostics dump")?;

                    if self.state.stats.page_errors > self.config.crawler.max_page_errors {
                        return Err(CrawlError::TooManyPageErrors(self.state.stats.page_errors));
                    }
                    // skip the page so a persistent error cannot stall the loop
                    self.state.checkpoint.advance_page();
                    match self.extractor.go_to_next_page(page).await {
                        Ok(true) => {}
                        Ok(false) => warn!("Could not move past page {}", current),
                        Err(e) => warn!("Resync after page error failed: {}", e),
                    }
                    navigator.rate_limit().await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn process_page(
        &mut self,
        page: &dyn PageSurface,
        navigator: &Navigator,
        processor: &mut ItemProcessor,
        page_number: u32,
    ) -> Result<PageFlow, CrawlError> {
        navigator.wait_for_page_load(page).await?;
        let rows = self.extractor.extract_rows(page).await?;
        info!("Found {} items on page {}", rows.len(), page_number);
        self.state.stats.items_extracted += rows.len() as u64;

        for raw in &rows {
            processor.process(page, raw, page_number, &mut self.state).await?;
            if processor.early_exit_reached() {
                return Ok(PageFlow::EarlyExit);
            }
        }

        if !self.extractor.has_next_page(page).await? {
            return Ok(PageFlow::Exhausted);
        }
        if !self.extractor.go_to_next_page(page).await? {
            warn!("Next page reported but could not be reached");
            return Ok(PageFlow::Exhausted);
        }
        Ok(PageFlow::Advanced)
    }

    /// Hand the sorted collection to every sink. A failing sink is logged and
    /// counted; the remaining sinks still run.
    async fn flush_to_sinks(&mut self) {
        if self.state.collection.is_empty() {
            info!("No records to save");
            return;
        }
        let records = self.state.collection.sorted();
        for sink in &self.sinks {
            match sink.save(&records).await {
                Ok(location) => {
                    info!("💾 {} records written by {} sink to {:?}", records.len(), sink.name(), location);
                }
                Err(e) => {
                    self.state.stats.sink_failures += 1;
                    error!("Sink '{}' failed to save {} records: {}", sink.name(), records.len(), e);
                }
            }
        }
    }

    fn persist_dedup(&self) {
        if let Err(e) = self.state.dedup.save() {
            error!("Failed to save dedup store: {}", e);
        }
    }

    async fn finalize(&mut self, result: Result<(), CrawlError>) -> Result<(), CrawlError> {
        match result {
            Ok(()) => {
                self.flush_to_sinks().await;
                self.persist_dedup();
                self.state.checkpoint.complete_crawl(true)?;
                Ok(())
            }
            Err(CrawlError::Cancelled) => {
                warn!("⏸️ Crawl interrupted, saving progress");
                if let Err(e) = self.state.checkpoint.set_state(CrawlState::Paused) {
                    warn!("Could not mark checkpoint paused: {}", e);
                }
                self.persist_after_interruption().await;
                Err(CrawlError::Cancelled)
            }
            Err(e) => {
                error!("💥 Crawl failed: {}", e);
                if let Err(save_err) = self.state.checkpoint.complete_crawl(false) {
                    error!("Failed to finalize checkpoint: {}", save_err);
                }
                self.persist_after_interruption().await;
                Err(e)
            }
        }
    }

    /// Committed records are already marked seen, so they are written out even
    /// when the run did not complete.
    async fn persist_after_interruption(&mut self) {
        self.flush_to_sinks().await;
        if let Err(e) = self.state.checkpoint.save(true) {
            error!("Failed to save checkpoint: {}", e);
        }
        self.persist_dedup();
    }

    /// Replay the failed backlog without paging.
    pub async fn retry_failed(&mut self, token: CancellationToken) -> Result<ReplaySummary, CrawlError> {
        let span = self.span.clone();
        async {
            if !self.state.checkpoint.load() {
                info!("No checkpoint found; nothing to retry");
                return Ok(ReplaySummary::default());
            }
            if self.state.checkpoint.failed_items().is_empty() {
                info!("No failed items to retry");
                return Ok(ReplaySummary::default());
            }
            self.state.collection = RecordCollection::new();

            let mut components = self.components(&token);
            let replayer = RetryReplayer::new(
                Arc::clone(&components.navigator),
                Arc::clone(&self.extractor),
                RetryPolicy::from(&self.config.crawler.retry),
                component_span("retry"),
            );

            let browser = Arc::clone(&self.browser);
            let page = components
                .navigator
                .pacer()
                .guard(browser.open_page())
                .await
                .map_err(CrawlError::from)?;
            let result = replayer
                .run(page.as_ref(), &mut components.processor, &mut self.state)
                .await
                .map_err(CrawlError::from);
            if let Err(e) = page.close().await {
                debug!("Closing page failed: {}", e);
            }
            if let Err(e) = browser.close().await {
                warn!("Closing browser session failed: {}", e);
            }

            self.flush_to_sinks().await;
            if let Err(e) = self.state.checkpoint.save(true) {
                error!("Failed to save checkpoint: {}", e);
            }
            self.persist_dedup();
            result
        }
        .instrument(span)
        .await
    }
}
