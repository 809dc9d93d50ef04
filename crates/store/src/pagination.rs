use serde::Serialize;
use tagscope_core::SortSpec;

/// Paging cursor for the current filter stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginationState {
    /// Offset of the last issued request; always a multiple of `limit`.
    pub offset: usize,
    pub limit: usize,
    /// Pages loaded into the cache for the current stream.
    pub page: usize,
    pub has_next: bool,
    pub is_fetching_next: bool,
    /// The stream's first page has not been applied yet; next pages wait for it.
    pub fresh_pending: bool,
    pub sort: Option<SortSpec>,
}

impl PaginationState {
    pub fn new(limit: usize) -> Self {
        Self { offset: 0, limit: limit.max(1), page: 0, has_next: true, is_fetching_next: false, fresh_pending: true, sort: None }
    }

    /// Start a new stream for a filter or sort change. The fresh fetch covers page one.
    pub fn restart(&mut self, sort: Option<SortSpec>) {
        self.offset = 0;
        self.page = 1;
        self.has_next = true;
        self.is_fetching_next = false;
        self.fresh_pending = true;
        self.sort = sort;
    }

    /// The fresh fetch for the current stream landed.
    pub fn fresh_applied(&mut self) {
        self.page = 1;
        self.fresh_pending = false;
    }

    pub fn next_offset(&self) -> usize { self.page * self.limit }

    /// Whether a next-page fetch may be issued right now.
    pub fn can_fetch_next(&self) -> bool { self.has_next && !self.is_fetching_next && !self.fresh_pending }
}
