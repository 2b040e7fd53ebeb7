//! Row recovery ladder
//!
//! When an item's row is missing from the grid the ladder applies its steps in
//! order (soft reset, then hard reset), restoring pagination after each one when
//! the crawl is past page 1. A restore failure after the soft step escalates to
//! the hard step; a restore failure after the hard step means the crawl position
//! is lost.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Instrument, Span, info, warn};

use super::{NavigationError, Navigator, PaginationRestorer, tolerate};
use crate::domain::session::{PageSurface, UiTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetLevel {
    Soft,
    Hard,
}

/// Where the crawl is and which row it is looking for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryContext {
    pub page_number: u32,
    pub item_id: String,
}

impl RecoveryContext {
    pub fn new(page_number: u32, item_id: impl Into<String>) -> Self {
        Self {
            page_number,
            item_id: item_id.into(),
        }
    }

    fn row(&self) -> UiTarget {
        UiTarget::ItemRow(self.item_id.clone())
    }
}

/// One rung of the ladder.
///
/// The driver only applies a step while its precondition holds, and checks the
/// declared postcondition target afterwards.
#[async_trait]
pub trait RecoveryStep: Send + Sync {
    fn name(&self) -> &'static str;

    fn level(&self) -> ResetLevel;

    fn precondition(&self, _ctx: &RecoveryContext) -> bool {
        true
    }

    /// Element expected on screen once the step has run.
    fn postcondition(&self) -> UiTarget {
        UiTarget::ListingRows
    }

    async fn apply(&self, page: &dyn PageSurface) -> Result<(), NavigationError>;
}

/// Re-run the search on the current listing
pub struct SoftReset {
    navigator: Arc<Navigator>,
}

impl SoftReset {
    pub fn new(navigator: Arc<Navigator>) -> Self {
        Self { navigator }
    }
}

#[async_trait]
impl RecoveryStep for SoftReset {
    fn name(&self) -> &'static str {
        "soft reset"
    }

    fn level(&self) -> ResetLevel {
        ResetLevel::Soft
    }

    async fn apply(&self, page: &dyn PageSurface) -> Result<(), NavigationError> {
        self.navigator.soft_reset(page).await
    }
}

/// Rebuild the listing through the site menus
pub struct HardReset {
    navigator: Arc<Navigator>,
}

impl HardReset {
    pub fn new(navigator: Arc<Navigator>) -> Self {
        Self { navigator }
    }
}

#[async_trait]
impl RecoveryStep for HardReset {
    fn name(&self) -> &'static str {
        "hard reset"
    }

    fn level(&self) -> ResetLevel {
        ResetLevel::Hard
    }

    async fn apply(&self, page: &dyn PageSurface) -> Result<(), NavigationError> {
        self.navigator.hard_reset(page).await
    }
}

pub struct RecoveryLadder {
    steps: Vec<Box<dyn RecoveryStep>>,
    restorer: PaginationRestorer,
    navigator: Arc<Navigator>,
    span: Span,
}

impl RecoveryLadder {
    pub fn new(steps: Vec<Box<dyn RecoveryStep>>, restorer: PaginationRestorer, navigator: Arc<Navigator>, span: Span) -> Self {
        Self {
            steps,
            restorer,
            navigator,
            span,
        }
    }

    /// Soft reset, then hard reset.
    pub fn standard(navigator: Arc<Navigator>, restorer: PaginationRestorer, span: Span) -> Self {
        let steps: Vec<Box<dyn RecoveryStep>> = vec![
            Box::new(SoftReset::new(Arc::clone(&navigator))),
            Box::new(HardReset::new(Arc::clone(&navigator))),
        ];
        Self::new(steps, restorer, navigator, span)
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    async fn row_visible(&self, page: &dyn PageSurface, ctx: &RecoveryContext) -> Result<bool, NavigationError> {
        let visible = self.navigator.pacer().guard(page.is_visible(&ctx.row())).await;
        Ok(tolerate(visible, "row check")?.unwrap_or(false))
    }

    /// Make the row for `ctx.item_id` visible, escalating through the steps.
    pub async fn locate_row(&self, page: &dyn PageSurface, ctx: &RecoveryContext) -> Result<(), NavigationError> {
        async {
            if self.row_visible(page, ctx).await? {
                return Ok(());
            }

            for step in &self.steps {
                if !step.precondition(ctx) {
                    continue;
                }
                warn!("Row not found for {}, attempting {}...", ctx.item_id, step.name());
                match step.apply(page).await {
                    Err(NavigationError::Cancelled) => return Err(NavigationError::Cancelled),
                    Err(e) => warn!("{} failed: {}", step.name(), e),
                    Ok(()) => {}
                }

                if ctx.page_number > 1 {
                    if let Err(e) = self.restorer.restore(page, ctx.page_number).await {
                        match (e, step.level()) {
                            (NavigationError::Cancelled, _) => return Err(NavigationError::Cancelled),
                            (e, ResetLevel::Hard) => {
                                return Err(NavigationError::PaginationLost {
                                    page: ctx.page_number,
                                    reason: e.to_string(),
                                });
                            }
                            (e, ResetLevel::Soft) => {
                                warn!(
                                    "Pagination restore to page {} failed after {}: {}. Escalating...",
                                    ctx.page_number,
                                    step.name(),
                                    e
                                );
                                continue;
                            }
                        }
                    }
                }

                let expected = step.postcondition();
                let settled = self.navigator.pacer().guard(page.is_visible(&expected)).await;
                if tolerate(settled, "postcondition check")? != Some(true) {
                    warn!("{} left {} off screen", step.name(), expected);
                }

                if self.row_visible(page, ctx).await? {
                    info!("✓ Row for {} recovered via {}", ctx.item_id, step.name());
                    return Ok(());
                }
            }

            Err(NavigationError::RowNotFound {
                item_id: ctx.item_id.clone(),
            })
        }
        .instrument(self.span.clone())
        .await
    }
}
