//! Return a freshly reset listing to the page the crawl was on.
//!
//! The pager only shows one group of page buttons at a time, so reaching page N
//! means pressing "next group" `(N - 1) / group_size` times and then clicking the
//! button for N.

use std::sync::Arc;

use tracing::{debug, info};

use super::{NavigationError, Navigator};
use crate::domain::pagination::PaginationCalculator;
use crate::domain::session::{ClickMode, PageSurface, ScriptAction, UiTarget};

pub struct PaginationRestorer {
    navigator: Arc<Navigator>,
    calculator: PaginationCalculator,
}

impl PaginationRestorer {
    pub fn new(navigator: Arc<Navigator>, calculator: PaginationCalculator) -> Self {
        Self { navigator, calculator }
    }

    async fn clear_blockers(&self, page: &dyn PageSurface) -> Result<(), NavigationError> {
        let blocked = self
            .navigator
            .pacer()
            .guard(page.count(&UiTarget::BlockingOverlay))
            .await?;
        if blocked > 0 {
            self.navigator.dismiss_overlays(page).await?;
        }
        Ok(())
    }

    pub async fn restore(&self, page: &dyn PageSurface, target_page: u32) -> Result<(), NavigationError> {
        let plan = self.calculator.plan(target_page);
        if plan.is_noop() {
            return Ok(());
        }
        let pacer = self.navigator.pacer();
        let wait = self.navigator.wait();

        info!("Restoring pagination to page {}...", target_page);
        self.navigator.dismiss_overlays(page).await?;
        pacer.pause(wait.action_settle()).await?;

        let mut group_start = 1;
        for jump in 0..plan.group_jumps {
            self.clear_blockers(page).await?;
            debug!(
                "Jumping to next group ({}/{}) from page {}...",
                jump + 1,
                plan.group_jumps,
                group_start
            );
            if !pacer.guard(page.run_script(ScriptAction::ClickNextGroup)).await? {
                return Err(NavigationError::NextGroupMissing { group_start });
            }
            pacer.pause(wait.after_load()).await?;
            group_start += self.calculator.group_size();
        }

        self.clear_blockers(page).await?;
        pacer
            .guard(page.click(&UiTarget::PageButton(target_page), ClickMode::Forced))
            .await
            .map_err(|e| match e {
                NavigationError::Cancelled => NavigationError::Cancelled,
                _ => NavigationError::PageButtonMissing(target_page),
            })?;
        pacer.pause(wait.after_load()).await?;

        info!("✓ Restored to page {}", target_page);
        Ok(())
    }
}
