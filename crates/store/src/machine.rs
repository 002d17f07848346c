#![forbid(unsafe_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vitrine_api::{ApiError, ApiResult, ResourceRepository};
use vitrine_core::draft::{to_draft, Draft, Payload};
use vitrine_core::gate::{AccessDenied, RoleGate};
use vitrine_core::ownership::filter_owned;
use vitrine_core::resource::Resource;
use vitrine_core::session::SessionContext;
use vitrine_core::{ResourceId, UiState};

use crate::{CompletionOrder, Event, Rejected, RequestId, Slot, SubmitOutcome, Submitted, Ticket};

/// Last read operation, replayed by `retry`.
#[derive(Debug, Clone, PartialEq)]
enum ReadOp {
    List,
    One(ResourceId),
}

/// Last mutation that reached the repository, replayed by `retry_submission`.
#[derive(Debug, Clone, PartialEq)]
enum WriteOp {
    Create(Payload),
    Update(ResourceId, Payload),
    Delete(ResourceId),
}

impl WriteOp {
    fn name(&self) -> &'static str {
        match self {
            WriteOp::Create(_) => "create",
            WriteOp::Update(..) => "update",
            WriteOp::Delete(_) => "delete",
        }
    }
}

enum Outcome<R> {
    List(ApiResult<Vec<R>>),
    One(ApiResult<R>),
    Submitted(ApiResult<Submitted<R>>),
}

impl<R> Outcome<R> {
    fn failed(slot: Slot, err: ApiError) -> Self {
        match slot {
            Slot::List => Outcome::List(Err(err)),
            Slot::Current => Outcome::One(Err(err)),
            Slot::Submission => Outcome::Submitted(Err(err)),
        }
    }

    fn slot(&self) -> Slot {
        match self {
            Outcome::List(_) => Slot::List,
            Outcome::One(_) => Slot::Current,
            Outcome::Submitted(_) => Slot::Submission,
        }
    }
}

struct Completion<R> {
    req: RequestId,
    op: &'static str,
    started: Instant,
    outcome: Outcome<R>,
}

/// Sends a failure completion if the task ends without disarming it, so a
/// panicking repository call still settles its container.
struct Unfinished<R> {
    tx: Option<mpsc::UnboundedSender<Completion<R>>>,
    req: RequestId,
    op: &'static str,
    slot: Slot,
    started: Instant,
}

impl<R> Unfinished<R> {
    fn disarm(mut self) -> Option<mpsc::UnboundedSender<Completion<R>>> { self.tx.take() }
}

impl<R> Drop for Unfinished<R> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let err = ApiError::Network(format!("{} ended without a result", self.op));
            let _ = tx.send(Completion {
                req: self.req,
                op: self.op,
                started: self.started,
                outcome: Outcome::failed(self.slot, err),
            });
        }
    }
}

/// Async load/create/update/delete contract for one resource kind, owned by one screen.
///
/// The owner is the only writer of the containers: tasks never touch them, they
/// send a completion that `poll`/`next_event` applies. Mutations are gated by the
/// [`RoleGate`] and validated locally before anything is spawned. Dropping the
/// machine (or `close`) cancels in-flight work.
pub struct ResourceStateMachine<R: Resource> {
    repo: Arc<dyn ResourceRepository<R>>,
    session: SessionContext,
    gate: RoleGate,
    order: CompletionOrder,
    list: UiState<Vec<R>>,
    current: UiState<R>,
    submission: UiState<Submitted<R>>,
    next_req: RequestId,
    latest: [RequestId; 3],
    last_read: Option<ReadOp>,
    last_write: Option<WriteOp>,
    in_flight: usize,
    tx: mpsc::UnboundedSender<Completion<R>>,
    rx: mpsc::UnboundedReceiver<Completion<R>>,
    cancel: CancellationToken,
}

impl<R: Resource> ResourceStateMachine<R> {
    pub fn new(repo: Arc<dyn ResourceRepository<R>>, session: SessionContext) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            repo,
            session,
            gate: RoleGate::default(),
            order: CompletionOrder::default(),
            list: UiState::Idle,
            current: UiState::Idle,
            submission: UiState::Idle,
            next_req: 0,
            latest: [0; 3],
            last_read: None,
            last_write: None,
            in_flight: 0,
            tx,
            rx,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_gate(mut self, gate: RoleGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_order(mut self, order: CompletionOrder) -> Self {
        self.order = order;
        self
    }

    /// Tie in-flight work to a screen-level token: cancelling `parent` tears this machine down.
    pub fn with_parent(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    pub fn list(&self) -> &UiState<Vec<R>> { &self.list }

    pub fn current(&self) -> &UiState<R> { &self.current }

    pub fn submission(&self) -> &UiState<Submitted<R>> { &self.submission }

    pub fn session(&self) -> &SessionContext { &self.session }

    pub fn order(&self) -> CompletionOrder { self.order }

    /// Operations started whose completion has not been applied yet.
    pub fn in_flight(&self) -> usize { self.in_flight }

    pub fn is_closed(&self) -> bool { self.cancel.is_cancelled() }

    /// Loaded items owned by the signed-in user; empty until the list has loaded.
    pub fn owned(&self) -> Vec<R> {
        match self.list.data() {
            Some(items) => filter_owned(items, &self.session),
            None => Vec::new(),
        }
    }

    /// Draft for the form: prefilled from the loaded entity, blank otherwise.
    pub fn edit_draft(&self) -> R::Draft { to_draft(self.current.data()) }

    /// Whether the creation/edit form may be opened at all.
    pub fn authorize_form(&self) -> Result<(), AccessDenied> { self.gate.authorize_form(&self.session) }

    pub fn load(&mut self) -> RequestId {
        self.last_read = Some(ReadOp::List);
        let req = self.begin(Slot::List);
        let repo = self.repo.clone();
        self.spawn(req, "load", Slot::List, async move { Outcome::List(repo.list().await) });
        req
    }

    pub fn load_one(&mut self, id: ResourceId) -> RequestId {
        self.last_read = Some(ReadOp::One(id.clone()));
        let req = self.begin(Slot::Current);
        let repo = self.repo.clone();
        self.spawn(req, "load_one", Slot::Current, async move { Outcome::One(repo.get(&id).await) });
        req
    }

    /// Re-issue the last read. `None` if nothing was read yet.
    /// Failed mutations are replayed with [`Self::retry_submission`].
    pub fn retry(&mut self) -> Option<RequestId> {
        let op = self.last_read.clone()?;
        info!(kind = R::KIND, op = ?op, "store: retry");
        Some(match op {
            ReadOp::List => self.load(),
            ReadOp::One(id) => self.load_one(id),
        })
    }

    pub fn create(&mut self, draft: &R::Draft) -> Result<Ticket, Rejected> {
        self.gate.authorize_mutation(&self.session)?;
        draft.validate()?;
        Ok(self.dispatch(WriteOp::Create(draft.to_payload())))
    }

    pub fn update(&mut self, id: Option<&ResourceId>, draft: &R::Draft) -> Result<Ticket, Rejected> {
        self.gate.authorize_mutation(&self.session)?;
        let id = id.cloned().ok_or(Rejected::MissingId)?;
        draft.validate()?;
        Ok(self.dispatch(WriteOp::Update(id, draft.to_payload())))
    }

    /// On success the list is left as is; callers `load` again to observe the removal.
    pub fn delete(&mut self, id: Option<&ResourceId>) -> Result<Ticket, Rejected> {
        self.gate.authorize_mutation(&self.session)?;
        let id = id.cloned().ok_or(Rejected::MissingId)?;
        Ok(self.dispatch(WriteOp::Delete(id)))
    }

    /// Replay the last mutation with the same payload, if the submission container
    /// holds its failure. `Ok(None)` when there is nothing to retry.
    pub fn retry_submission(&mut self) -> Result<Option<Ticket>, Rejected> {
        self.gate.authorize_mutation(&self.session)?;
        if self.submission.error().is_none() {
            return Ok(None);
        }
        let Some(op) = self.last_write.clone() else { return Ok(None) };
        info!(kind = R::KIND, op = op.name(), "store: retry submission");
        Ok(Some(self.dispatch(op)))
    }

    /// Update when the draft was bound to an existing entity, create otherwise.
    pub fn submit(&mut self, draft: &R::Draft) -> Result<Ticket, Rejected> {
        match draft.source_id().cloned() {
            Some(id) => self.update(Some(&id), draft),
            None => self.create(draft),
        }
    }

    /// Apply every completion already delivered, without waiting.
    pub fn poll(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(c) = self.rx.try_recv() {
            if self.cancel.is_cancelled() {
                continue;
            }
            events.push(self.apply(c));
        }
        events
    }

    /// Wait for and apply the next completion. `None` when nothing is in flight
    /// or the machine was torn down.
    pub async fn next_event(&mut self) -> Option<Event> {
        if self.in_flight == 0 || self.cancel.is_cancelled() {
            return None;
        }
        let next = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            c = self.rx.recv() => c,
        };
        match next {
            Some(c) => Some(self.apply(c)),
            None => {
                self.in_flight = 0;
                None
            }
        }
    }

    /// Drive until every started operation has been applied.
    pub async fn settle(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(e) = self.next_event().await {
            events.push(e);
        }
        events
    }

    /// Screen teardown.
    pub fn close(self) {
        debug!(kind = R::KIND, in_flight = self.in_flight, "store: close");
    }

    fn begin(&mut self, slot: Slot) -> RequestId {
        self.next_req += 1;
        let req = self.next_req;
        self.latest[slot.idx()] = req;
        match slot {
            Slot::List => self.list = UiState::Loading,
            Slot::Current => self.current = UiState::Loading,
            Slot::Submission => self.submission = UiState::Loading,
        }
        self.in_flight += 1;
        req
    }

    fn dispatch(&mut self, op: WriteOp) -> Ticket {
        self.last_write = Some(op.clone());
        let name = op.name();
        let repo = self.repo.clone();
        let req = self.begin(Slot::Submission);
        let (done_tx, done_rx) = oneshot::channel();
        self.spawn(req, name, Slot::Submission, async move {
            let result = match op {
                WriteOp::Create(payload) => repo.create(payload).await.map(Submitted::Created),
                WriteOp::Update(id, payload) => repo.update(&id, payload).await.map(Submitted::Updated),
                WriteOp::Delete(id) => repo.delete(&id).await.map(|ack| Submitted::Deleted(ack.id)),
            };
            let _ = done_tx.send(SubmitOutcome::from_result(&result));
            Outcome::Submitted(result)
        });
        Ticket::new(req, done_rx)
    }

    fn spawn<F>(&self, req: RequestId, op: &'static str, slot: Slot, fut: F)
    where
        F: Future<Output = Outcome<R>> + Send + 'static,
    {
        let token = self.cancel.clone();
        let started = Instant::now();
        let guard = Unfinished { tx: Some(self.tx.clone()), req, op, slot, started };
        debug!(kind = R::KIND, op, req, "store: start");
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    guard.disarm();
                    debug!(kind = R::KIND, op, req, "store: cancelled");
                }
                outcome = fut => {
                    if let Some(tx) = guard.disarm() {
                        let _ = tx.send(Completion { req, op, started, outcome });
                    }
                }
            }
        });
    }

    fn apply(&mut self, c: Completion<R>) -> Event {
        self.in_flight = self.in_flight.saturating_sub(1);
        let slot = c.outcome.slot();
        let (req, op) = (c.req, c.op);
        let took = c.started.elapsed();
        histogram!("vitrine_store_op_ms", took.as_secs_f64() * 1000.0, "kind" => R::KIND, "op" => op);
        let latest = self.latest[slot.idx()];
        if self.order == CompletionOrder::LatestRequest && req != latest {
            counter!("vitrine_store_stale_total", 1u64, "kind" => R::KIND);
            debug!(kind = R::KIND, op, req, latest, "store: stale completion discarded");
            return Event::Discarded { slot, req };
        }
        match c.outcome {
            Outcome::List(r) => {
                match &r {
                    Ok(items) => info!(kind = R::KIND, op, req, items = items.len(), took_ms = %took.as_millis(), "store: list ok"),
                    Err(e) => warn!(kind = R::KIND, op, req, error = %e, took_ms = %took.as_millis(), "store: list failed"),
                }
                self.list = UiState::settle(r);
            }
            Outcome::One(r) => {
                match &r {
                    Ok(item) => info!(kind = R::KIND, op, req, label = %item.label(), took_ms = %took.as_millis(), "store: entity ok"),
                    Err(e) => warn!(kind = R::KIND, op, req, error = %e, took_ms = %took.as_millis(), "store: entity failed"),
                }
                self.current = UiState::settle(r);
            }
            Outcome::Submitted(r) => {
                match &r {
                    Ok(_) => info!(kind = R::KIND, op, req, took_ms = %took.as_millis(), "store: submission ok"),
                    Err(e) => warn!(kind = R::KIND, op, req, error = %e, took_ms = %took.as_millis(), "store: submission failed"),
                }
                self.submission = UiState::settle(r);
            }
        }
        Event::Applied { slot, req }
    }
}

impl<R: Resource> Drop for ResourceStateMachine<R> {
    fn drop(&mut self) { self.cancel.cancel(); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitrine_api::MockRepository;
    use vitrine_core::session::{Role, Session};
    use vitrine_core::resource::Advertisement;

    fn machine(role: Role) -> ResourceStateMachine<Advertisement> {
        let repo: Arc<dyn ResourceRepository<Advertisement>> = Arc::new(MockRepository::new());
        ResourceStateMachine::new(repo, SessionContext::signed_in(Session::new("u-1", role)))
    }

    #[tokio::test]
    async fn load_transitions_through_loading() {
        let mut m = machine(Role::Member);
        assert!(m.list().is_idle());
        let req = m.load();
        assert!(m.list().is_loading());
        assert_eq!(m.in_flight(), 1);
        let ev = m.next_event().await.unwrap();
        assert_eq!(ev, Event::Applied { slot: Slot::List, req });
        assert_eq!(m.list().data().map(Vec::len), Some(0));
        assert!(m.next_event().await.is_none());
    }

    #[tokio::test]
    async fn request_ids_increase_across_slots() {
        let mut m = machine(Role::Privileged);
        let a = m.load();
        let b = m.load_one("1".into());
        assert!(b > a);
        assert!(m.current().is_loading());
        m.settle().await;
        assert!(m.current().error().is_some());
        assert!(m.list().is_success());
    }

    #[tokio::test]
    async fn update_without_id_is_rejected_before_validation() {
        let mut m = machine(Role::Privileged);
        let blank = <Advertisement as Resource>::Draft::default();
        assert_eq!(m.update(None, &blank).unwrap_err(), Rejected::MissingId);
        assert_eq!(m.delete(None).unwrap_err(), Rejected::MissingId);
        assert!(matches!(m.create(&blank), Err(Rejected::Invalid(_))));
        assert!(m.submission().is_idle());
        assert_eq!(m.in_flight(), 0);
    }

    #[tokio::test]
    async fn retry_without_prior_read_is_none() {
        let mut m = machine(Role::Member);
        assert!(m.retry().is_none());
    }
}
