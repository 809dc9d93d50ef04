//! Controller actor: owns the [`Controller`] on a single task and publishes snapshots.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use metrics::histogram;
use tagscope_api::{refresh_and_wait, ApiError, InventoryApi};
use tagscope_core::{EngineStatus, FieldGroup, Resource, ResultPage, SortSpec, Tag};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::controller::{Controller, ControllerConfig, FetchError, FetchKind, FetchOutcome, FetchTicket};
use crate::debounce::Debouncer;
use crate::scroll::ScrollPosition;
use crate::ViewSnapshot;

type Reply = oneshot::Sender<Result<FetchOutcome, FetchError>>;

enum Intent {
    ApplyFilter { tags: Vec<Tag>, sort: Option<SortSpec>, reply: Reply },
    NextPage { reply: Option<Reply> },
    Toggle { key: String, value: String, checked: bool, reply: Reply },
    SelectOnly { key: String, value: String, reply: Reply },
    SelectAll { key: String, reply: Reply },
    ChangeSort { sort: SortSpec, reply: Reply },
    SortClicked { field: String, reply: Reply },
    SelectResource { resource: Resource, reply: oneshot::Sender<()> },
    CloseDetail { reply: oneshot::Sender<()> },
    LoadFields { reply: oneshot::Sender<Result<usize, FetchError>> },
    Refresh { reply: oneshot::Sender<Result<EngineStatus, FetchError>> },
}

enum Completion {
    Page { generation: u64, kind: FetchKind, result: Result<ResultPage, ApiError>, reply: Option<Reply> },
    Fields { result: Result<Vec<FieldGroup>, ApiError>, reply: Option<oneshot::Sender<Result<usize, FetchError>>> },
    Engine { result: Result<EngineStatus, ApiError>, reply: oneshot::Sender<Result<EngineStatus, FetchError>> },
}

/// Read side: the latest published view plus an epoch subscription.
#[derive(Clone)]
pub struct ViewHandle {
    snap: Arc<ArcSwap<ViewSnapshot>>,
    epoch_rx: watch::Receiver<u64>,
}

impl ViewHandle {
    pub fn current(&self) -> Arc<ViewSnapshot> { self.snap.load_full() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }

    /// Wait until a published snapshot satisfies `pred`. `None` if the controller stopped first.
    pub async fn wait_for<F>(&self, mut pred: F) -> Option<Arc<ViewSnapshot>>
    where
        F: FnMut(&ViewSnapshot) -> bool,
    {
        let mut rx = self.subscribe_epoch();
        loop {
            let snap = self.current();
            if pred(&snap) {
                return Some(snap);
            }
            if rx.changed().await.is_err() {
                let snap = self.current();
                return pred(&snap).then_some(snap);
            }
        }
    }
}

/// Write side: intents in, outcomes back. Cheap to clone.
#[derive(Clone)]
pub struct ControllerHandle {
    intents: mpsc::Sender<Intent>,
    scroll: mpsc::Sender<ScrollPosition>,
    view: ViewHandle,
}

impl ControllerHandle {
    pub fn view(&self) -> &ViewHandle { &self.view }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<Result<T, FetchError>>) -> Intent) -> Result<T, FetchError> {
        let (tx, rx) = oneshot::channel();
        self.intents.send(make(tx)).await.map_err(|_| FetchError::Closed)?;
        rx.await.map_err(|_| FetchError::Closed)?
    }

    async fn notify(&self, make: impl FnOnce(oneshot::Sender<()>) -> Intent) -> Result<(), FetchError> {
        let (tx, rx) = oneshot::channel();
        self.intents.send(make(tx)).await.map_err(|_| FetchError::Closed)?;
        rx.await.map_err(|_| FetchError::Closed)
    }

    pub async fn apply_filter(&self, tags: Vec<Tag>, sort: Option<SortSpec>) -> Result<FetchOutcome, FetchError> {
        self.call(|reply| Intent::ApplyFilter { tags, sort, reply }).await
    }

    pub async fn fetch_next_page(&self) -> Result<FetchOutcome, FetchError> {
        self.call(|reply| Intent::NextPage { reply: Some(reply) }).await
    }

    pub async fn toggle_tag(&self, key: &str, value: &str, checked: bool) -> Result<FetchOutcome, FetchError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.call(|reply| Intent::Toggle { key, value, checked, reply }).await
    }

    pub async fn select_only(&self, key: &str, value: &str) -> Result<FetchOutcome, FetchError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.call(|reply| Intent::SelectOnly { key, value, reply }).await
    }

    pub async fn select_all(&self, key: &str) -> Result<FetchOutcome, FetchError> {
        let key = key.to_string();
        self.call(|reply| Intent::SelectAll { key, reply }).await
    }

    pub async fn change_sort(&self, sort: SortSpec) -> Result<FetchOutcome, FetchError> {
        self.call(|reply| Intent::ChangeSort { sort, reply }).await
    }

    /// Column-header click: ascending first, then flips to descending.
    pub async fn sort_clicked(&self, field: &str) -> Result<FetchOutcome, FetchError> {
        let field = field.to_string();
        self.call(|reply| Intent::SortClicked { field, reply }).await
    }

    pub async fn select_resource(&self, resource: Resource) -> Result<(), FetchError> {
        self.notify(|reply| Intent::SelectResource { resource, reply }).await
    }

    pub async fn close_detail(&self) -> Result<(), FetchError> {
        self.notify(|reply| Intent::CloseDetail { reply }).await
    }

    /// Fetch field metadata. Returns the number of field groups stored.
    pub async fn load_fields(&self) -> Result<usize, FetchError> {
        self.call(|reply| Intent::LoadFields { reply }).await
    }

    /// Trigger backend re-ingestion and wait for the engine to settle.
    pub async fn refresh(&self) -> Result<EngineStatus, FetchError> {
        self.call(|reply| Intent::Refresh { reply }).await
    }

    /// Feed a raw scroll position. Dropped when the scroll queue is full.
    pub fn report_scroll(&self, pos: ScrollPosition) -> bool {
        self.scroll.try_send(pos).is_ok()
    }
}

/// Spawn the controller loop and its scroll adapter. Must be called inside a tokio runtime.
///
/// Intent calls resolve only after the snapshot reflecting them is published.
pub fn spawn_controller(api: Arc<dyn InventoryApi>, cfg: ControllerConfig) -> ControllerHandle {
    let (intent_tx, mut intent_rx) = mpsc::channel::<Intent>(cfg.queue_cap);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
    let (scroll_tx, scroll_rx) = mpsc::channel::<ScrollPosition>(cfg.queue_cap);

    let mut ctl = Controller::new(&cfg);
    let snap = Arc::new(ArcSwap::from_pointee(ctl.snapshot(0)));
    let (epoch_tx, epoch_rx) = watch::channel(0u64);
    let view = ViewHandle { snap: Arc::clone(&snap), epoch_rx };

    spawn_scroll_adapter(scroll_rx, intent_tx.clone(), view.clone(), &cfg);

    let poll = cfg.status_poll;
    tokio::spawn(async move {
        let mut epoch = 0u64;
        loop {
            let answer = tokio::select! {
                maybe = intent_rx.recv() => {
                    match maybe {
                        Some(intent) => handle_intent(&mut ctl, intent, &api, &done_tx, poll),
                        None => {
                            debug!("intent channel closed; exiting controller loop");
                            break;
                        }
                    }
                }
                Some(done) = done_rx.recv() => handle_completion(&mut ctl, done, &api, &done_tx),
            };
            epoch = epoch.saturating_add(1);
            snap.store(Arc::new(ctl.snapshot(epoch)));
            let _ = epoch_tx.send(epoch);
            answer.send();
        }
        info!("controller loop stopped");
    });

    ControllerHandle { intents: intent_tx, scroll: scroll_tx, view }
}

/// Reply held back until the snapshot reflecting it has been published.
enum Answer {
    None,
    Fetch(Reply, Result<FetchOutcome, FetchError>),
    Fields(oneshot::Sender<Result<usize, FetchError>>, Result<usize, FetchError>),
    Engine(oneshot::Sender<Result<EngineStatus, FetchError>>, Result<EngineStatus, FetchError>),
    Done(oneshot::Sender<()>),
}

impl Answer {
    fn send(self) {
        match self {
            Answer::None => {}
            Answer::Fetch(tx, out) => { let _ = tx.send(out); }
            Answer::Fields(tx, out) => { let _ = tx.send(out); }
            Answer::Engine(tx, out) => { let _ = tx.send(out); }
            Answer::Done(tx) => { let _ = tx.send(()); }
        }
    }
}

fn handle_intent(
    ctl: &mut Controller,
    intent: Intent,
    api: &Arc<dyn InventoryApi>,
    done: &mpsc::UnboundedSender<Completion>,
    poll: Duration,
) -> Answer {
    match intent {
        Intent::ApplyFilter { tags, sort, reply } => issue(ctl.begin_apply_filter(&tags, sort), Some(reply), api, done),
        Intent::Toggle { key, value, checked, reply } => issue(ctl.toggle(&key, &value, checked), Some(reply), api, done),
        Intent::SelectOnly { key, value, reply } => issue(ctl.select_only(&key, &value), Some(reply), api, done),
        Intent::SelectAll { key, reply } => issue(ctl.select_all(&key), Some(reply), api, done),
        Intent::ChangeSort { sort, reply } => issue(ctl.change_sort(sort), Some(reply), api, done),
        Intent::SortClicked { field, reply } => issue(ctl.sort_clicked(&field), Some(reply), api, done),
        Intent::NextPage { reply } => match ctl.begin_next_page() {
            Some(ticket) => issue(ticket, reply, api, done),
            None => match reply {
                Some(r) => Answer::Fetch(r, Ok(FetchOutcome::Skipped)),
                None => Answer::None,
            },
        },
        Intent::SelectResource { resource, reply } => {
            ctl.select_resource(resource);
            Answer::Done(reply)
        }
        Intent::CloseDetail { reply } => {
            ctl.close_detail();
            Answer::Done(reply)
        }
        Intent::LoadFields { reply } => {
            load_fields(Some(reply), api, done);
            Answer::None
        }
        Intent::Refresh { reply } => {
            let api = Arc::clone(api);
            let done = done.clone();
            tokio::spawn(async move {
                let result = refresh_and_wait(api.as_ref(), poll).await;
                let _ = done.send(Completion::Engine { result, reply });
            });
            Answer::None
        }
    }
}

fn load_fields(
    reply: Option<oneshot::Sender<Result<usize, FetchError>>>,
    api: &Arc<dyn InventoryApi>,
    done: &mpsc::UnboundedSender<Completion>,
) {
    let api = Arc::clone(api);
    let done = done.clone();
    tokio::spawn(async move {
        let result = api.fields().await;
        let _ = done.send(Completion::Fields { result, reply });
    });
}

/// Run a ticket's request on its own task; the response comes back through `done`.
fn issue(
    ticket: FetchTicket,
    reply: Option<Reply>,
    api: &Arc<dyn InventoryApi>,
    done: &mpsc::UnboundedSender<Completion>,
) -> Answer {
    let api = Arc::clone(api);
    let done = done.clone();
    tokio::spawn(async move {
        let t0 = Instant::now();
        let result = api.query(&ticket.query).await;
        histogram!("controller_fetch_ms", t0.elapsed().as_secs_f64() * 1000.0, "kind" => ticket.kind.as_str());
        let _ = done.send(Completion::Page { generation: ticket.generation, kind: ticket.kind, result, reply });
    });
    Answer::None
}

fn handle_completion(
    ctl: &mut Controller,
    done: Completion,
    api: &Arc<dyn InventoryApi>,
    tx: &mpsc::UnboundedSender<Completion>,
) -> Answer {
    match done {
        Completion::Page { generation, kind, result, reply } => {
            let outcome = match kind {
                FetchKind::Fresh => ctl.complete_fresh(generation, result),
                FetchKind::NextPage => ctl.complete_next_page(generation, result),
            };
            match reply {
                Some(r) => Answer::Fetch(r, outcome),
                None => Answer::None,
            }
        }
        Completion::Fields { result, reply } => {
            let out = match result {
                Ok(groups) => {
                    let n = groups.len();
                    ctl.set_fields(groups);
                    Ok(n)
                }
                Err(e) => Err(ctl.fields_failed(e)),
            };
            match reply {
                Some(r) => Answer::Fields(r, out),
                None => Answer::None,
            }
        }
        Completion::Engine { result, reply } => {
            ctl.set_engine(&result);
            if result.is_ok() {
                // Re-ingested inventory: reload fields and re-run the current selection.
                load_fields(None, api, tx);
                let ticket = ctl.begin_reload();
                info!(generation = ticket.generation, "refresh settled; reloading");
                issue(ticket, None, api, tx);
            }
            Answer::Engine(reply, result.map_err(FetchError::from))
        }
    }
}

/// Debounce raw scroll positions and turn qualifying ones into next-page intents.
fn spawn_scroll_adapter(
    rx: mpsc::Receiver<ScrollPosition>,
    intents: mpsc::Sender<Intent>,
    view: ViewHandle,
    cfg: &ControllerConfig,
) {
    let threshold = cfg.scroll_threshold;
    let mut debouncer = Debouncer::new(rx, cfg.scroll_debounce);
    tokio::spawn(async move {
        while let Some(pos) = debouncer.next().await {
            if !pos.past(threshold) {
                continue;
            }
            let snap = view.current();
            if snap.pagination.is_fetching_next || snap.pagination.fresh_pending {
                debug!(fresh_pending = snap.pagination.fresh_pending, "scroll: next page not ready");
                continue;
            }
            if intents.send(Intent::NextPage { reply: None }).await.is_err() {
                break;
            }
        }
        debug!("scroll adapter stopped");
    });
}
