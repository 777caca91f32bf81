//! Core data model.
//!
//! An event audit record is the durable trace of one ingested business event.
//! It has identity (event id + dedup key), provenance (org, source), a content
//! fingerprint, and a lifecycle state with an append-only timeline.
//!
//! Scheduled jobs and their execution logs live in [`job`]; delivery work
//! items in [`notification`].

pub mod event;
pub mod job;
pub mod notification;

pub use event::*;
pub use job::*;
pub use notification::*;

/// Page-based pagination request. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub const DEFAULT_LIMIT: u32 = 50;
    pub const MAX_LIMIT: u32 = 500;

    /// Build a pagination request, clamping out-of-range values.
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn skip(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One page of results plus the total/page-count envelope.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub pages: u64,
    pub page: u32,
    pub limit: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let limit = u64::from(pagination.limit);
        Self {
            items,
            total,
            pages: total.div_ceil(limit),
            page: pagination.page,
            limit: pagination.limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_clamps_and_skips() {
        let p = Pagination::new(Some(0), Some(10_000));
        assert_eq!(p.page, 1);
        assert_eq!(p.limit, Pagination::MAX_LIMIT);
        assert_eq!(Pagination::new(Some(3), Some(20)).skip(), 40);
    }

    #[test]
    fn page_count_rounds_up() {
        let page: Page<u8> = Page::new(vec![], 101, Pagination::new(Some(1), Some(50)));
        assert_eq!(page.pages, 3);
        let empty: Page<u8> = Page::new(vec![], 0, Pagination::default());
        assert_eq!(empty.pages, 0);
    }
}
