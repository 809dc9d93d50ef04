//! In-memory inventory backend.
//!
//! Evaluates filters, sorting and paging over a resource list with the same
//! semantics as the real backend. Tests can inject failures and hold query
//! responses to control the order in which concurrent requests complete.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use tagscope_core::{
    EngineState, EngineStatus, FieldGroup, Info, Resource, ResultPage, SortDirection, Stats,
};
use tokio::sync::{oneshot, watch};

use crate::{ApiError, ApiResult, InventoryApi, ResourceQuery};

/// Page length used by the unfiltered `resources()` call.
pub const MOCK_DEFAULT_LIMIT: usize = 25;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct MockApi {
    resources: Mutex<Vec<Resource>>,
    fields: Option<serde_json::Value>,
    statuses: Mutex<VecDeque<EngineStatus>>,
    failures: Mutex<VecDeque<ApiError>>,
    hold: Mutex<bool>,
    held: Mutex<HashMap<usize, oneshot::Sender<()>>>,
    arrived_tx: watch::Sender<usize>,
    query_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
}

impl Default for MockApi {
    fn default() -> Self { Self::new(Vec::new()) }
}

impl MockApi {
    pub fn new(resources: Vec<Resource>) -> Self {
        let (arrived_tx, _rx) = watch::channel(0usize);
        Self {
            resources: Mutex::new(resources),
            fields: None,
            statuses: Mutex::new(VecDeque::new()),
            failures: Mutex::new(VecDeque::new()),
            hold: Mutex::new(false),
            held: Mutex::new(HashMap::new()),
            arrived_tx,
            query_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    /// Field metadata served by `fields()`. Defaults to groups derived from the resources.
    pub fn with_fields(mut self, groups: Vec<FieldGroup>) -> Self {
        self.fields = serde_json::to_value(groups).ok();
        self
    }

    /// Serve raw JSON from `fields()`, e.g. to exercise malformed metadata.
    pub fn with_raw_fields(mut self, raw: serde_json::Value) -> Self {
        self.fields = Some(raw);
        self
    }

    /// Engine statuses returned in order by `engine_status()`; the last one repeats.
    pub fn with_statuses(self, statuses: Vec<EngineStatus>) -> Self {
        *lock(&self.statuses) = statuses.into();
        self
    }

    /// Swap the inventory, as a backend re-ingestion would.
    pub fn replace_inventory(&self, resources: Vec<Resource>) { *lock(&self.resources) = resources; }

    /// Fail the next query-style call (`resources`/`query`) with `err`.
    pub fn fail_next(&self, err: ApiError) { lock(&self.failures).push_back(err); }

    /// While on, every `query()` waits for [`MockApi::release`] before answering.
    pub fn hold_queries(&self, on: bool) { *lock(&self.hold) = on; }

    /// Let the n-th (0-based) `query()` call answer.
    pub fn release(&self, call: usize) -> bool {
        match lock(&self.held).remove(&call) {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Wait until at least `n` `query()` calls have arrived.
    pub async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.arrived_tx.subscribe();
        let _ = rx.wait_for(|c| *c >= n).await;
    }

    pub fn query_calls(&self) -> usize { self.query_calls.load(Ordering::SeqCst) }
    pub fn refresh_calls(&self) -> usize { self.refresh_calls.load(Ordering::SeqCst) }

    fn take_failure(&self) -> Option<ApiError> { lock(&self.failures).pop_front() }

    /// Evaluate a query against the fixture.
    pub fn evaluate(&self, query: &ResourceQuery) -> ResultPage {
        let all = lock(&self.resources);
        let mut hits: Vec<&Resource> = all.iter().filter(|r| query.filter.matches(r)).collect();
        if let Some(sort) = &query.sort {
            let field = sort.field.to_lowercase();
            hits.sort_by(|a, b| {
                let ord = a.field(&field).unwrap_or("").cmp(b.field(&field).unwrap_or(""));
                match sort.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }
        let count = hits.len() as u64;
        let resources = hits.into_iter().skip(query.offset).take(query.limit).cloned().collect();
        ResultPage { resources, count }
    }

    /// Field groups computed from the fixture: a `core` group and a `tags` group.
    pub fn derived_fields(&self) -> Vec<FieldGroup> {
        use tagscope_core::filter::NULL_VALUE;
        use tagscope_core::{Field, FieldValue};
        fn histogram<'a>(name: &str, vals: impl Iterator<Item = &'a str>) -> Field {
            let mut order: Vec<String> = Vec::new();
            let mut counts: HashMap<String, u64> = HashMap::new();
            let mut total = 0u64;
            for v in vals {
                total += 1;
                let c = counts.entry(v.to_string()).or_insert(0);
                if *c == 0 {
                    order.push(v.to_string());
                }
                *c += 1;
            }
            let values = order.into_iter().map(|v| FieldValue { count: counts[&v], value: v }).collect();
            Field { name: name.to_string(), count: total, values }
        }
        let all = lock(&self.resources);
        let core = vec![
            histogram("region", all.iter().map(|r| r.region.as_str())),
            histogram("type", all.iter().map(|r| r.kind.as_str())),
        ];
        let mut tag_keys: Vec<&str> = Vec::new();
        for r in all.iter() {
            for t in &r.tags {
                if !tag_keys.contains(&t.key.as_str()) {
                    tag_keys.push(&t.key);
                }
            }
        }
        // Tag fields carry a `(null)` bucket for resources without the tag, as the backend does.
        let tags = tag_keys
            .into_iter()
            .map(|k| {
                let mut f = histogram(k, all.iter().filter_map(|r| r.tag(k)));
                let missing = all.len() as u64 - f.count;
                if missing > 0 {
                    f.values.push(FieldValue { value: NULL_VALUE.to_string(), count: missing });
                }
                f
            })
            .collect();
        vec![FieldGroup { name: "core".into(), fields: core }, FieldGroup { name: "tags".into(), fields: tags }]
    }
}

/// Small fixed inventory used by tests and the CLI's `--mock` mode.
pub fn demo_inventory() -> Vec<Resource> {
    let mut out = Vec::new();
    let regions = ["us-east-1", "us-west-2", "eu-west-1"];
    for (i, region) in regions.iter().enumerate() {
        for n in 0..4 {
            let id = format!("i-{}{:03}", i, n);
            let mut r = Resource::new("ec2.Instance", id, *region)
                .with_tag("team", if n % 2 == 0 { "infra" } else { "data" });
            if n == 3 {
                r = r.with_tag("env", "prod");
            }
            out.push(r);
        }
        out.push(Resource::new("s3.Bucket", format!("logs-{}", region), *region).with_tag("team", "infra"));
        out.push(Resource::new("rds.DBInstance", format!("db-{}", i), *region));
    }
    out
}

#[async_trait::async_trait]
impl InventoryApi for MockApi {
    async fn resources(&self) -> ApiResult<ResultPage> {
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        let q = ResourceQuery::new(Default::default(), MOCK_DEFAULT_LIMIT);
        Ok(self.evaluate(&q))
    }

    async fn query(&self, query: &ResourceQuery) -> ApiResult<ResultPage> {
        let call = self.query_calls.fetch_add(1, Ordering::SeqCst);
        let result = match self.take_failure() {
            Some(e) => Err(e),
            None => Ok(self.evaluate(query)),
        };
        let gate = if *lock(&self.hold) {
            let (tx, rx) = oneshot::channel();
            lock(&self.held).insert(call, tx);
            Some(rx)
        } else {
            None
        };
        self.arrived_tx.send_modify(|c| *c = (*c).max(call + 1));
        if let Some(rx) = gate {
            let _ = rx.await;
        }
        result
    }

    async fn resource(&self, id: &str) -> ApiResult<Resource> {
        let found = lock(&self.resources).iter().find(|r| r.id == id).cloned();
        found.ok_or_else(|| ApiError::NotFound(format!("can't find resource with id '{}'", id)))
    }

    async fn fields(&self) -> ApiResult<Vec<FieldGroup>> {
        match &self.fields {
            Some(raw) => Ok(crate::http::fields_from_value(raw.clone())),
            None => Ok(self.derived_fields()),
        }
    }

    async fn refresh(&self) -> ApiResult<()> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn engine_status(&self) -> ApiResult<EngineStatus> {
        let mut q = lock(&self.statuses);
        let next = if q.len() > 1 { q.pop_front() } else { q.front().cloned() };
        Ok(next.unwrap_or(EngineStatus { status: EngineState::Success, error_message: None, fetched_at: None }))
    }

    async fn stats(&self) -> ApiResult<Stats> {
        Ok(Stats { resources_count: lock(&self.resources).len() as u64 })
    }

    async fn info(&self) -> ApiResult<Info> {
        Ok(Info { version: "mock".into(), git_commit: None, build_time: None })
    }
}
