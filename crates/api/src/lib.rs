//! Vitrine repository boundary.
//!
//! This crate defines the per-kind [`ResourceRepository`] trait the state machine
//! depends on, the error taxonomy of remote calls, and two implementations:
//! [`RestRepository`] against the remote service and [`MockRepository`] for tests.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use vitrine_core::draft::Payload;
use vitrine_core::resource::Resource;
use vitrine_core::{OwnerId, ResourceId};

pub mod config;
pub mod rest;
pub mod wire;

pub use config::ApiConfig;
pub use rest::RestRepository;

/// Classified failure of a remote call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ApiError {
    /// Rejected by the service as invalid input.
    #[error("validation: {0}")]
    Validation(String),
    #[error("not_found: {0}")]
    NotFound(String),
    /// Transport or server failure. Recoverable by an explicit retry.
    #[error("network: {0}")]
    Network(String),
}

impl ApiError {
    pub fn is_retryable(&self) -> bool { matches!(self, ApiError::Network(_)) }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Acknowledgement of a delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub id: ResourceId,
}

/// Remote CRUD surface for one resource kind.
#[async_trait::async_trait]
pub trait ResourceRepository<R: Resource>: Send + Sync {
    async fn list(&self) -> ApiResult<Vec<R>>;

    async fn get(&self, id: &ResourceId) -> ApiResult<R>;

    /// The returned resource carries the id assigned by the service.
    async fn create(&self, payload: Payload) -> ApiResult<R>;

    async fn update(&self, id: &ResourceId, payload: Payload) -> ApiResult<R>;

    async fn delete(&self, id: &ResourceId) -> ApiResult<Ack>;
}

// ----------------- Mock implementation -----------------

/// A recorded repository call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    List,
    Get(ResourceId),
    Create(Payload),
    Update(ResourceId, Payload),
    Delete(ResourceId),
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(self, Call::Create(_) | Call::Update(..) | Call::Delete(_))
    }
}

/// Scripted behaviour for the next mock call: optional latency, optional failure.
#[derive(Debug, Clone, Default)]
pub struct Step {
    pub delay: Option<Duration>,
    pub fail: Option<ApiError>,
}

impl Step {
    pub fn ok() -> Self { Self::default() }
    pub fn fail(err: ApiError) -> Self { Self { delay: None, fail: Some(err) } }
    pub fn delayed(mut self, delay: Duration) -> Self { self.delay = Some(delay); self }
}

/// In-memory repository for tests and demos.
///
/// Records every call before doing anything else, then consumes the next scripted
/// [`Step`] (if any). Created resources get sequential numeric ids and the
/// configured owner, the way the service assigns them from the caller's token.
pub struct MockRepository<R> {
    items: Mutex<Vec<R>>,
    owner: Option<OwnerId>,
    next_id: AtomicU64,
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Call>>,
    _kind: PhantomData<fn() -> R>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<R: Resource> Default for MockRepository<R> {
    fn default() -> Self { Self::new() }
}

impl<R: Resource> MockRepository<R> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            owner: None,
            next_id: AtomicU64::new(1),
            steps: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            _kind: PhantomData,
        }
    }

    pub fn with_items(mut self, items: Vec<R>) -> Self {
        let max = items
            .iter()
            .filter_map(|r| r.id().and_then(|id| id.as_str().parse::<u64>().ok()))
            .max()
            .unwrap_or(0);
        self.next_id = AtomicU64::new(max + 1);
        self.items = Mutex::new(items);
        self
    }

    /// Owner stamped on created resources.
    pub fn owned_by(mut self, owner: impl Into<OwnerId>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn push_step(&self, step: Step) { lock(&self.steps).push_back(step); }

    pub fn calls(&self) -> Vec<Call> { lock(&self.calls).clone() }

    pub fn mutation_count(&self) -> usize { lock(&self.calls).iter().filter(|c| c.is_mutation()).count() }

    pub fn clear_calls(&self) { lock(&self.calls).clear(); }

    pub fn items(&self) -> Vec<R> { lock(&self.items).clone() }

    /// Add a resource as if another client had created it.
    pub fn insert(&self, item: R) { lock(&self.items).push(item); }

    async fn begin(&self, call: Call) -> ApiResult<()> {
        debug!(kind = R::KIND, call = ?call, "mock: call");
        lock(&self.calls).push(call);
        let step = lock(&self.steps).pop_front().unwrap_or_default();
        if let Some(d) = step.delay {
            tokio::time::sleep(d).await;
        }
        match step.fail {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn not_found(id: &ResourceId) -> ApiError {
        ApiError::NotFound(format!("{} {} does not exist", R::KIND, id))
    }
}

#[async_trait::async_trait]
impl<R: Resource> ResourceRepository<R> for MockRepository<R> {
    async fn list(&self) -> ApiResult<Vec<R>> {
        self.begin(Call::List).await?;
        Ok(self.items())
    }

    async fn get(&self, id: &ResourceId) -> ApiResult<R> {
        self.begin(Call::Get(id.clone())).await?;
        lock(&self.items)
            .iter()
            .find(|r| r.id() == Some(id))
            .cloned()
            .ok_or_else(|| Self::not_found(id))
    }

    async fn create(&self, payload: Payload) -> ApiResult<R> {
        self.begin(Call::Create(payload.clone())).await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut obj = payload;
        obj.insert("id".into(), Value::String(id.to_string()));
        if let Some(owner) = &self.owner {
            obj.insert("ownerId".into(), Value::String(owner.to_string()));
        }
        let item: R = wire::decode(Value::Object(obj))?;
        lock(&self.items).push(item.clone());
        Ok(item)
    }

    async fn update(&self, id: &ResourceId, payload: Payload) -> ApiResult<R> {
        self.begin(Call::Update(id.clone(), payload.clone())).await?;
        let mut items = lock(&self.items);
        let idx = items.iter().position(|r| r.id() == Some(id)).ok_or_else(|| Self::not_found(id))?;
        let mut merged = match serde_json::to_value(&items[idx]) {
            Ok(Value::Object(m)) => m,
            _ => Payload::new(),
        };
        merged.extend(payload);
        merged.insert("id".into(), Value::String(id.to_string()));
        let item: R = wire::decode(Value::Object(merged))?;
        items[idx] = item.clone();
        Ok(item)
    }

    async fn delete(&self, id: &ResourceId) -> ApiResult<Ack> {
        self.begin(Call::Delete(id.clone())).await?;
        let mut items = lock(&self.items);
        let idx = items.iter().position(|r| r.id() == Some(id)).ok_or_else(|| Self::not_found(id))?;
        items.remove(idx);
        Ok(Ack { id: id.clone() })
    }
}
