//! Pagination group arithmetic.
//!
//! The listing shows page links in fixed-size blocks (1..=10, 11..=20, ...).
//! Reaching page `n` from page 1 means pressing "next group" until the block that
//! contains `n` is visible and then clicking `n` itself.

pub const DEFAULT_GROUP_SIZE: u32 = 10;

/// Step sequence needed to reach a page from the first page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationPlan {
    pub target_page: u32,
    pub group_jumps: u32,
    pub group_start: u32,
}

impl PaginationPlan {
    /// No navigation is needed when the target is the first page.
    pub fn is_noop(&self) -> bool {
        self.target_page <= 1
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PaginationCalculator {
    group_size: u32,
}

impl Default for PaginationCalculator {
    fn default() -> Self {
        Self {
            group_size: DEFAULT_GROUP_SIZE,
        }
    }
}

impl PaginationCalculator {
    pub fn new(group_size: u32) -> Self {
        Self {
            group_size: group_size.max(1),
        }
    }

    pub fn group_size(&self) -> u32 {
        self.group_size
    }

    /// 대상 페이지까지의 이동 계획: 그룹 점프 횟수 = (target - 1) / group_size
    pub fn plan(&self, target_page: u32) -> PaginationPlan {
        let target_page = target_page.max(1);
        let group_jumps = (target_page - 1) / self.group_size;
        PaginationPlan {
            target_page,
            group_jumps,
            group_start: group_jumps * self.group_size + 1,
        }
    }

    /// 1-based index of the group that contains `page`.
    pub fn group_of(&self, page: u32) -> u32 {
        (page.max(1) - 1) / self.group_size + 1
    }
}
