//! Fetch controller state machine.
//!
//! Every network request is split in two: a `begin_*` call that mutates state and
//! returns a [`FetchTicket`], and a `complete_*` call that validates the ticket's
//! generation before applying the response. No I/O happens here; the actor in
//! [`crate::actor`] owns an instance and drives it from a single task.

use std::time::Duration;

use metrics::counter;
use tagscope_api::{ApiError, ResourceQuery};
use tagscope_core::selection::{self, default_selection, normalize_selection};
use tagscope_core::{
    build_filter, find_field, EngineStatus, Field, FieldGroup, FieldValue, FilterExpression, Resource, ResultPage,
    SortSpec, Tag,
};
use tracing::{debug, info, warn};

use crate::{PaginationState, ResultCache, ViewSnapshot};

/// Controller settings. Environment: `TAGSCOPE_PAGE_SIZE`, `TAGSCOPE_SCROLL_DEBOUNCE_MS`,
/// `TAGSCOPE_SCROLL_THRESHOLD`, `TAGSCOPE_STATUS_POLL_MS`, `TAGSCOPE_QUEUE_CAP`.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub page_size: usize,
    pub scroll_debounce: Duration,
    pub scroll_threshold: f64,
    pub status_poll: Duration,
    pub queue_cap: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            page_size: 25,
            scroll_debounce: Duration::from_millis(300),
            scroll_threshold: 0.75,
            status_poll: Duration::from_millis(2000),
            queue_cap: 256,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

impl ControllerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            page_size: env_parse::<usize>("TAGSCOPE_PAGE_SIZE").filter(|n| *n > 0).unwrap_or(d.page_size),
            scroll_debounce: env_parse::<u64>("TAGSCOPE_SCROLL_DEBOUNCE_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.scroll_debounce),
            scroll_threshold: env_parse::<f64>("TAGSCOPE_SCROLL_THRESHOLD")
                .filter(|t| (0.0..1.0).contains(t))
                .unwrap_or(d.scroll_threshold),
            status_poll: env_parse::<u64>("TAGSCOPE_STATUS_POLL_MS")
                .map(|ms| Duration::from_millis(ms.max(1)))
                .unwrap_or(d.status_poll),
            queue_cap: env_parse::<usize>("TAGSCOPE_QUEUE_CAP").filter(|n| *n > 0).unwrap_or(d.queue_cap),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Fresh,
    NextPage,
}

impl FetchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchKind::Fresh => "fresh",
            FetchKind::NextPage => "next_page",
        }
    }
}

/// A request the controller wants issued, stamped with the generation it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchTicket {
    pub generation: u64,
    pub kind: FetchKind,
    pub query: ResourceQuery,
}

/// What a completed intent did to the displayed results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Fresh fetch replaced the cache; `count` is the new total.
    Applied { count: u64 },
    /// Next page appended `added` new resources.
    Appended { added: usize },
    /// Next page came back empty; no further pages for this stream.
    Exhausted,
    /// The response belonged to an older filter or sort and was dropped.
    Discarded,
    /// Next page not issued: the fresh fetch is outstanding, a page is in flight, or the stream is exhausted.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("controller stopped")]
    Closed,
}

pub struct Controller {
    tags: Vec<Tag>,
    filter: FilterExpression,
    fields: Vec<FieldGroup>,
    selection_touched: bool,
    cache: ResultCache,
    page: PaginationState,
    generation: u64,
    last_error: Option<ApiError>,
    engine: Option<EngineStatus>,
}

impl Controller {
    pub fn new(cfg: &ControllerConfig) -> Self {
        Self {
            tags: Vec::new(),
            filter: FilterExpression::MatchAll,
            fields: Vec::new(),
            selection_touched: false,
            cache: ResultCache::default(),
            page: PaginationState::new(cfg.page_size),
            generation: 0,
            last_error: None,
            engine: None,
        }
    }

    pub fn tags(&self) -> &[Tag] { &self.tags }
    pub fn fields(&self) -> &[FieldGroup] { &self.fields }
    pub fn cache(&self) -> &ResultCache { &self.cache }
    pub fn pagination(&self) -> &PaginationState { &self.page }
    pub fn generation(&self) -> u64 { self.generation }
    pub fn last_error(&self) -> Option<&ApiError> { self.last_error.as_ref() }

    fn ticket(&self, kind: FetchKind, offset: usize) -> FetchTicket {
        counter!("controller_fetches_total", 1u64, "kind" => kind.as_str());
        let mut query = ResourceQuery::new(self.filter.clone(), self.page.limit);
        query.offset = offset;
        query.sort = self.page.sort.clone();
        FetchTicket { generation: self.generation, kind, query }
    }

    /// New selection (and optional sort): start a fresh stream. Drops the sort when none is given.
    pub fn begin_apply_filter(&mut self, tags: &[Tag], sort: Option<SortSpec>) -> FetchTicket {
        self.tags = normalize_selection(tags);
        self.selection_touched = true;
        self.filter = build_filter(&self.tags);
        self.restart(sort)
    }

    /// Same selection, new order.
    pub fn change_sort(&mut self, sort: SortSpec) -> FetchTicket {
        self.restart(Some(sort))
    }

    /// Column-header click on `field`.
    pub fn sort_clicked(&mut self, field: &str) -> FetchTicket {
        let next = SortSpec::clicked(self.page.sort.as_ref(), field);
        self.change_sort(next)
    }

    /// Re-run the current selection and sort from page one, e.g. after re-ingestion.
    pub fn begin_reload(&mut self) -> FetchTicket {
        let sort = self.page.sort.clone();
        self.restart(sort)
    }

    fn restart(&mut self, sort: Option<SortSpec>) -> FetchTicket {
        self.generation += 1;
        self.page.restart(sort);
        debug!(generation = self.generation, clauses = self.filter.clauses().len(), "controller: fresh fetch");
        self.ticket(FetchKind::Fresh, 0)
    }

    /// Next page for the current stream, or `None` while its fresh fetch is outstanding,
    /// another page is in flight, or the stream is exhausted.
    pub fn begin_next_page(&mut self) -> Option<FetchTicket> {
        if !self.page.can_fetch_next() {
            counter!("controller_next_page_skipped_total", 1u64);
            debug!(
                fetching = self.page.is_fetching_next,
                fresh_pending = self.page.fresh_pending,
                has_next = self.page.has_next,
                "controller: next page skipped"
            );
            return None;
        }
        self.page.is_fetching_next = true;
        self.page.offset = self.page.next_offset();
        Some(self.ticket(FetchKind::NextPage, self.page.offset))
    }

    fn is_stale(&self, generation: u64, kind: FetchKind) -> bool {
        if generation == self.generation {
            return false;
        }
        counter!("controller_stale_discards_total", 1u64, "kind" => kind.as_str());
        debug!(generation, current = self.generation, kind = kind.as_str(), "controller: stale response discarded");
        true
    }

    fn fail(&mut self, kind: FetchKind, err: ApiError) -> FetchError {
        counter!("controller_fetch_failures_total", 1u64, "kind" => kind.as_str());
        warn!(kind = kind.as_str(), error = %err, "controller: fetch failed");
        self.last_error = Some(err.clone());
        FetchError::Api(err)
    }

    pub fn complete_fresh(&mut self, generation: u64, result: Result<ResultPage, ApiError>) -> Result<FetchOutcome, FetchError> {
        if self.is_stale(generation, FetchKind::Fresh) {
            return Ok(FetchOutcome::Discarded);
        }
        match result {
            Ok(page) => {
                let count = page.count;
                self.cache.replace(page);
                self.page.fresh_applied();
                self.last_error = None;
                info!(generation, count, shown = self.cache.len(), "controller: results replaced");
                Ok(FetchOutcome::Applied { count })
            }
            Err(e) => Err(self.fail(FetchKind::Fresh, e)),
        }
    }

    pub fn complete_next_page(
        &mut self,
        generation: u64,
        result: Result<ResultPage, ApiError>,
    ) -> Result<FetchOutcome, FetchError> {
        if self.is_stale(generation, FetchKind::NextPage) {
            return Ok(FetchOutcome::Discarded);
        }
        self.page.is_fetching_next = false;
        match result {
            Ok(page) if page.resources.is_empty() => {
                self.page.has_next = false;
                self.last_error = None;
                info!(generation, offset = self.page.offset, "controller: results exhausted");
                Ok(FetchOutcome::Exhausted)
            }
            Ok(page) => {
                let added = self.cache.append(page);
                self.page.page += 1;
                self.last_error = None;
                debug!(generation, added, shown = self.cache.len(), "controller: page appended");
                Ok(FetchOutcome::Appended { added })
            }
            Err(e) => Err(self.fail(FetchKind::NextPage, e)),
        }
    }

    /// Resolve a field by name; unknown fields act as if they had no values.
    fn field(&self, name: &str) -> Field {
        find_field(&self.fields, name)
            .cloned()
            .unwrap_or_else(|| Field { name: name.to_string(), count: 0, values: Vec::new() })
    }

    fn value(field: &Field, value: &str) -> FieldValue {
        field.value(value).cloned().unwrap_or_else(|| FieldValue { value: value.to_string(), count: 0 })
    }

    pub fn toggle(&mut self, key: &str, value: &str, checked: bool) -> FetchTicket {
        let field = self.field(key);
        let tags = selection::toggle_tag(&self.tags, &field, &Self::value(&field, value), checked);
        self.begin_apply_filter(&tags, None)
    }

    pub fn select_only(&mut self, key: &str, value: &str) -> FetchTicket {
        let field = self.field(key);
        let tags = selection::select_only(&self.tags, &field, &Self::value(&field, value));
        self.begin_apply_filter(&tags, None)
    }

    pub fn select_all(&mut self, key: &str) -> FetchTicket {
        let field = self.field(key);
        let tags = selection::select_all(&self.tags, &field);
        self.begin_apply_filter(&tags, None)
    }

    /// Store field metadata; seeds the all-selected default when nothing was chosen yet.
    pub fn set_fields(&mut self, groups: Vec<FieldGroup>) {
        self.fields = groups;
        if !self.selection_touched {
            self.tags = default_selection(&self.fields);
            self.filter = build_filter(&self.tags);
        }
        info!(groups = self.fields.len(), selected = self.tags.len(), "controller: fields loaded");
    }

    pub fn fields_failed(&mut self, err: ApiError) -> FetchError {
        warn!(error = %err, "controller: field metadata unavailable");
        self.last_error = Some(err.clone());
        FetchError::Api(err)
    }

    pub fn select_resource(&mut self, resource: Resource) {
        self.cache.select_resource(resource);
    }

    pub fn close_detail(&mut self) {
        self.cache.close_detail();
    }

    pub fn set_engine(&mut self, result: &Result<EngineStatus, ApiError>) {
        match result {
            Ok(status) => self.engine = Some(status.clone()),
            Err(e) => self.last_error = Some(e.clone()),
        }
    }

    pub fn snapshot(&self, epoch: u64) -> ViewSnapshot {
        ViewSnapshot {
            epoch,
            generation: self.generation,
            tags: self.tags.clone(),
            fields: self.fields.clone(),
            cache: self.cache.clone(),
            pagination: self.page.clone(),
            last_error: self.last_error.clone(),
            engine: self.engine.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res(id: &str) -> Resource { Resource::new("ec2.Instance", id, "us-east-1") }

    fn page(ids: &[&str], count: u64) -> ResultPage {
        ResultPage { resources: ids.iter().map(|id| res(id)).collect(), count }
    }

    fn ctl(limit: usize) -> Controller {
        Controller::new(&ControllerConfig { page_size: limit, ..ControllerConfig::default() })
    }

    fn shown(c: &Controller) -> Vec<&str> { c.cache().resources.iter().map(|r| r.id.as_str()).collect() }

    #[test]
    fn fresh_fetch_replaces_and_resets_paging() {
        let mut c = ctl(2);
        let t = c.begin_apply_filter(&[Tag::new("region", "us-east-1")], None);
        assert_eq!(t.query.offset, 0);
        assert_eq!(t.query.limit, 2);
        assert_eq!(c.complete_fresh(t.generation, Ok(page(&["A", "B"], 3))), Ok(FetchOutcome::Applied { count: 3 }));

        let n = c.begin_next_page().unwrap();
        assert_eq!(n.query.offset, 2);
        assert_eq!(c.complete_next_page(n.generation, Ok(page(&["C"], 3))), Ok(FetchOutcome::Appended { added: 1 }));

        let t = c.begin_apply_filter(&[], None);
        c.complete_fresh(t.generation, Ok(page(&["Z"], 1))).unwrap();
        assert_eq!(shown(&c), vec!["Z"]);
        assert_eq!(c.pagination().page, 1);
        assert!(c.pagination().has_next);
    }

    #[test]
    fn merge_dedup_on_next_page() {
        let mut c = ctl(3);
        let t = c.begin_apply_filter(&[], None);
        c.complete_fresh(t.generation, Ok(page(&["A", "B", "C"], 4))).unwrap();
        let n = c.begin_next_page().unwrap();
        c.complete_next_page(n.generation, Ok(page(&["C", "D"], 4))).unwrap();
        assert_eq!(shown(&c), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn empty_page_exhausts_until_filter_changes() {
        let mut c = ctl(2);
        let t = c.begin_apply_filter(&[], None);
        c.complete_fresh(t.generation, Ok(page(&["A", "B"], 2))).unwrap();
        let n = c.begin_next_page().unwrap();
        assert_eq!(c.complete_next_page(n.generation, Ok(page(&[], 2))), Ok(FetchOutcome::Exhausted));
        assert!(!c.pagination().has_next);
        assert!(c.begin_next_page().is_none());

        let t = c.change_sort(SortSpec::asc("id"));
        assert_eq!(t.query.sort, Some(SortSpec::asc("id")));
        c.complete_fresh(t.generation, Ok(page(&["A", "B"], 2))).unwrap();
        assert!(c.begin_next_page().is_some());
    }

    #[test]
    fn next_page_is_single_flight() {
        let mut c = ctl(2);
        let t = c.begin_apply_filter(&[], None);
        c.complete_fresh(t.generation, Ok(page(&["A", "B"], 9))).unwrap();
        assert!(c.begin_next_page().is_some());
        assert!(c.pagination().is_fetching_next);
        assert!(c.begin_next_page().is_none());
    }

    #[test]
    fn stale_fresh_responses_are_discarded_in_any_order() {
        let mut c = ctl(5);
        let a = c.begin_apply_filter(&[Tag::new("type", "a")], None);
        let b = c.begin_apply_filter(&[Tag::new("type", "b")], None);
        assert_eq!(c.complete_fresh(b.generation, Ok(page(&["B"], 1))), Ok(FetchOutcome::Applied { count: 1 }));
        assert_eq!(c.complete_fresh(a.generation, Ok(page(&["A"], 1))), Ok(FetchOutcome::Discarded));
        assert_eq!(shown(&c), vec!["B"]);

        let a = c.begin_apply_filter(&[Tag::new("type", "a")], None);
        let b = c.begin_apply_filter(&[Tag::new("type", "b")], None);
        assert_eq!(c.complete_fresh(a.generation, Ok(page(&["A"], 1))), Ok(FetchOutcome::Discarded));
        c.complete_fresh(b.generation, Ok(page(&["B2"], 1))).unwrap();
        assert_eq!(shown(&c), vec!["B2"]);
    }

    #[test]
    fn next_page_waits_for_the_fresh_fetch() {
        let mut c = ctl(2);
        assert!(c.begin_next_page().is_none());

        let t = c.begin_apply_filter(&[Tag::new("type", "a")], None);
        assert!(c.begin_next_page().is_none());
        assert!(!c.pagination().is_fetching_next);
        c.complete_fresh(t.generation, Ok(page(&["A", "B"], 6))).unwrap();
        let n = c.begin_next_page().unwrap();
        assert_eq!(n.query.offset, 2);
        c.complete_next_page(n.generation, Ok(page(&["C", "D"], 6))).unwrap();

        // Old rows stay visible until the new stream's first page lands.
        let t = c.begin_apply_filter(&[Tag::new("type", "b")], None);
        assert!(c.begin_next_page().is_none());
        assert_eq!(shown(&c), vec!["A", "B", "C", "D"]);
        c.complete_fresh(t.generation, Ok(page(&["X", "Y"], 4))).unwrap();
        assert_eq!(c.begin_next_page().map(|n| n.query.offset), Some(2));
    }

    #[test]
    fn failed_fresh_fetch_blocks_paging_until_restarted() {
        let mut c = ctl(2);
        let t = c.begin_apply_filter(&[], None);
        c.complete_fresh(t.generation, Ok(page(&["A", "B"], 6))).unwrap();

        let t = c.begin_apply_filter(&[Tag::new("type", "b")], None);
        let err = ApiError::Status { status: 500, message: "boom".into() };
        assert_eq!(c.complete_fresh(t.generation, Err(err.clone())), Err(FetchError::Api(err)));
        assert!(c.begin_next_page().is_none());
        assert_eq!(shown(&c), vec!["A", "B"]);

        let t = c.begin_reload();
        assert_eq!(t.query.filter.clause("type").map(|o| o.values.len()), Some(1));
        c.complete_fresh(t.generation, Ok(page(&["X", "Y"], 4))).unwrap();
        assert_eq!(shown(&c), vec!["X", "Y"]);
        assert_eq!(c.begin_next_page().map(|n| n.query.offset), Some(2));
    }

    #[test]
    fn reload_keeps_selection_and_sort_and_discards_older_fetches() {
        let mut c = ctl(2);
        let t = c.begin_apply_filter(&[Tag::new("region", "x")], Some(SortSpec::desc("id")));
        c.complete_fresh(t.generation, Ok(page(&["A", "B"], 6))).unwrap();
        let n = c.begin_next_page().unwrap();

        let r = c.begin_reload();
        assert!(r.generation > n.generation);
        assert_eq!(r.query.offset, 0);
        assert_eq!(r.query.sort, Some(SortSpec::desc("id")));
        assert_eq!(c.tags(), &[Tag::new("region", "x")]);
        assert_eq!(c.complete_next_page(n.generation, Ok(page(&["C"], 6))), Ok(FetchOutcome::Discarded));
        c.complete_fresh(r.generation, Ok(page(&["A2"], 1))).unwrap();
        assert_eq!(shown(&c), vec!["A2"]);
    }

    #[test]
    fn filter_change_discards_inflight_next_page_and_frees_paging() {
        let mut c = ctl(1);
        let t = c.begin_apply_filter(&[], None);
        c.complete_fresh(t.generation, Ok(page(&["A"], 5))).unwrap();
        let old = c.begin_next_page().unwrap();
        let t = c.begin_apply_filter(&[Tag::new("region", "eu-west-1")], None);
        assert!(!c.pagination().is_fetching_next);
        assert_eq!(c.complete_next_page(old.generation, Ok(page(&["B"], 5))), Ok(FetchOutcome::Discarded));
        c.complete_fresh(t.generation, Ok(page(&["E"], 1))).unwrap();
        assert_eq!(shown(&c), vec!["E"]);
    }

    #[test]
    fn failed_next_page_keeps_state_and_can_retry() {
        let mut c = ctl(2);
        let t = c.begin_apply_filter(&[], None);
        c.complete_fresh(t.generation, Ok(page(&["A", "B"], 4))).unwrap();
        let n = c.begin_next_page().unwrap();
        let err = ApiError::Status { status: 502, message: "bad gateway".into() };
        assert_eq!(c.complete_next_page(n.generation, Err(err.clone())), Err(FetchError::Api(err.clone())));
        assert_eq!(shown(&c), vec!["A", "B"]);
        assert!(c.pagination().has_next);
        assert!(!c.pagination().is_fetching_next);
        assert_eq!(c.last_error(), Some(&err));

        let n = c.begin_next_page().unwrap();
        assert_eq!(n.query.offset, 2);
        c.complete_next_page(n.generation, Ok(page(&["C", "D"], 4))).unwrap();
        assert_eq!(shown(&c), vec!["A", "B", "C", "D"]);
        assert!(c.last_error().is_none());
    }

    #[test]
    fn filter_change_drops_sort_unless_given() {
        let mut c = ctl(2);
        c.change_sort(SortSpec::desc("region"));
        let t = c.begin_apply_filter(&[Tag::new("type", "s3.Bucket")], None);
        assert_eq!(t.query.sort, None);
        let t = c.begin_apply_filter(&[Tag::new("type", "s3.Bucket")], Some(SortSpec::asc("id")));
        assert_eq!(t.query.sort.map(|s| s.encode()), Some("id".to_string()));
    }

    #[test]
    fn column_clicks_cycle_direction() {
        let mut c = ctl(2);
        assert_eq!(c.sort_clicked("Region").query.sort, Some(SortSpec::asc("Region")));
        assert_eq!(c.sort_clicked("Region").query.sort.map(|s| s.encode()), Some("-region".to_string()));
        assert_eq!(c.sort_clicked("Region").query.sort, Some(SortSpec::asc("Region")));
    }

    #[test]
    fn fields_seed_default_selection_once() {
        let mut c = ctl(2);
        let region = Field {
            name: "region".into(),
            count: 2,
            values: vec![FieldValue { value: "us-east-1".into(), count: 1 }, FieldValue { value: "eu-west-1".into(), count: 1 }],
        };
        c.set_fields(vec![FieldGroup { name: "core".into(), fields: vec![region] }]);
        assert_eq!(c.tags().len(), 2);

        let t = c.toggle("region", "eu-west-1", false);
        assert_eq!(c.tags(), &[Tag::new("region", "us-east-1")]);
        assert_eq!(t.query.filter.clause("region").map(|o| o.values.len()), Some(1));

        c.select_all("region");
        assert_eq!(c.tags().len(), 2);
        c.select_only("region", "eu-west-1");
        assert_eq!(c.tags(), &[Tag::new("region", "eu-west-1")]);

        c.set_fields(Vec::new());
        assert_eq!(c.tags(), &[Tag::new("region", "eu-west-1")]);
    }

    #[test]
    fn selection_is_normalized() {
        let mut c = ctl(2);
        let dup = vec![Tag::new("type", "a"), Tag::new("type", "a"), Tag::new("region", "x")];
        c.begin_apply_filter(&dup, None);
        assert_eq!(c.tags(), &[Tag::new("type", "a"), Tag::new("region", "x")]);
    }

    #[test]
    fn detail_survives_append_and_closes() {
        let mut c = ctl(1);
        let t = c.begin_apply_filter(&[], None);
        c.complete_fresh(t.generation, Ok(page(&["A"], 2))).unwrap();
        c.select_resource(res("A"));
        let n = c.begin_next_page().unwrap();
        c.complete_next_page(n.generation, Ok(page(&["B"], 2))).unwrap();
        let snap = c.snapshot(7);
        assert_eq!(snap.epoch, 7);
        assert!(snap.cache.detail_visible);
        assert_eq!(snap.cache.current_resource.as_ref().map(|r| r.id.as_str()), Some("A"));
        c.close_detail();
        assert!(!c.cache().detail_visible);
        assert!(c.cache().current_resource.is_none());
    }
}
