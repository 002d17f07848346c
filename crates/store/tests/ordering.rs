use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use vitrine_api::{Ack, ApiResult, MockRepository, ResourceRepository, Step};
use vitrine_core::draft::{AdvertisementDraft, Draft, Payload};
use vitrine_core::resource::Advertisement;
use vitrine_core::ResourceId;
use vitrine_core::session::{Role, Session, SessionContext};
use vitrine_store::{CompletionOrder, Event, ResourceStateMachine, Slot};

fn seeded() -> Arc<MockRepository<Advertisement>> {
    let items: Vec<Advertisement> = serde_json::from_value(json!([{ "id": "1", "titre": "A" }])).unwrap();
    Arc::new(MockRepository::new().with_items(items))
}

fn machine(repo: &Arc<MockRepository<Advertisement>>, order: CompletionOrder) -> ResourceStateMachine<Advertisement> {
    let dyn_repo: Arc<dyn ResourceRepository<Advertisement>> = repo.clone();
    ResourceStateMachine::new(dyn_repo, SessionContext::signed_in(Session::new("u-1", Role::Privileged)))
        .with_order(order)
}

fn late_ad() -> Advertisement {
    serde_json::from_value(json!({ "id": "2", "titre": "B" })).unwrap()
}

/// Starts a slow load, waits until its task has taken the scripted delay, then a fast one.
async fn overlapping_loads(
    repo: &Arc<MockRepository<Advertisement>>,
    m: &mut ResourceStateMachine<Advertisement>,
) -> (u64, u64) {
    repo.push_step(Step::ok().delayed(Duration::from_millis(150)));
    let slow = m.load();
    while repo.calls().is_empty() {
        tokio::task::yield_now().await;
    }
    let fast = m.load();
    (slow, fast)
}

#[tokio::test]
async fn stale_list_completion_is_discarded() {
    let repo = seeded();
    let mut m = machine(&repo, CompletionOrder::LatestRequest);
    let (slow, fast) = overlapping_loads(&repo, &mut m).await;
    assert!(fast > slow);

    assert_eq!(m.next_event().await, Some(Event::Applied { slot: Slot::List, req: fast }));
    assert_eq!(m.list().data().map(Vec::len), Some(1));

    // The slow call now reads a list that changed in the meantime.
    repo.insert(late_ad());
    assert_eq!(m.next_event().await, Some(Event::Discarded { slot: Slot::List, req: slow }));
    assert_eq!(m.list().data().map(Vec::len), Some(1));
    assert_eq!(m.in_flight(), 0);
}

#[tokio::test]
async fn last_completion_wins_when_selected() {
    let repo = seeded();
    let mut m = machine(&repo, CompletionOrder::LastCompletion);
    let (slow, fast) = overlapping_loads(&repo, &mut m).await;

    assert_eq!(m.next_event().await, Some(Event::Applied { slot: Slot::List, req: fast }));
    repo.insert(late_ad());
    assert_eq!(m.next_event().await, Some(Event::Applied { slot: Slot::List, req: slow }));
    assert_eq!(m.list().data().map(Vec::len), Some(2));
}

#[tokio::test]
async fn loading_persists_until_latest_request_settles() {
    let repo = seeded();
    let mut m = machine(&repo, CompletionOrder::LatestRequest);
    repo.push_step(Step::ok());
    repo.push_step(Step::ok().delayed(Duration::from_millis(100)));
    m.load();
    while repo.calls().is_empty() {
        tokio::task::yield_now().await;
    }
    m.load();
    let first = m.next_event().await.unwrap();
    assert!(!first.is_applied());
    assert!(m.list().is_loading());
    m.settle().await;
    assert!(m.list().is_success());
}

#[tokio::test]
async fn containers_settle_independently() {
    let repo = seeded();
    let mut m = machine(&repo, CompletionOrder::LatestRequest);
    m.load();
    m.load_one("1".into());
    let events = m.settle().await;
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(Event::is_applied));
    assert!(m.list().is_success());
    assert_eq!(m.current().data().map(|ad| ad.titre.as_str()), Some("A"));
    assert!(m.submission().is_idle());
}

#[tokio::test]
async fn back_to_back_loads_yield_equal_data() {
    let repo = seeded();
    let mut m = machine(&repo, CompletionOrder::LatestRequest);
    m.load();
    m.settle().await;
    let first = m.list().data().cloned();
    m.load();
    m.settle().await;
    assert_eq!(m.list().data().cloned(), first);
    assert!(first.is_some());
}

#[tokio::test]
async fn poll_applies_delivered_completions() {
    let repo = seeded();
    let mut m = machine(&repo, CompletionOrder::LatestRequest);
    assert!(m.poll().is_empty());
    m.load();
    let mut events = Vec::new();
    while events.is_empty() {
        tokio::task::yield_now().await;
        events = m.poll();
    }
    assert_eq!(events.len(), 1);
    assert!(m.list().is_success());
}

#[tokio::test]
async fn close_cancels_pending_mutation() {
    let repo = seeded();
    let mut m = machine(&repo, CompletionOrder::LatestRequest);
    repo.push_step(Step::ok().delayed(Duration::from_millis(200)));
    let mut draft = AdvertisementDraft::default();
    draft.set("titre", "Promo").unwrap();
    draft.set("description", "desc").unwrap();
    let ticket = m.create(&draft).unwrap();
    while repo.calls().is_empty() {
        tokio::task::yield_now().await;
    }
    m.close();

    let out = ticket.outcome().await;
    assert!(!out.ok);
    assert_eq!(out.message.as_deref(), Some("operation cancelled"));
    assert_eq!(repo.items().len(), 1);
}

#[tokio::test]
async fn parent_token_tears_the_machine_down() {
    let repo = seeded();
    let screen = CancellationToken::new();
    let mut m = machine(&repo, CompletionOrder::LatestRequest).with_parent(&screen);
    repo.push_step(Step::ok().delayed(Duration::from_millis(200)));
    m.load();
    screen.cancel();
    assert!(m.is_closed());
    assert!(m.next_event().await.is_none());
    assert!(m.poll().is_empty());
    assert!(m.list().is_loading());
}

/// Repository whose every call panics.
struct Broken;

#[async_trait::async_trait]
impl ResourceRepository<Advertisement> for Broken {
    async fn list(&self) -> ApiResult<Vec<Advertisement>> { panic!("list exploded") }
    async fn get(&self, _id: &ResourceId) -> ApiResult<Advertisement> { panic!("get exploded") }
    async fn create(&self, _payload: Payload) -> ApiResult<Advertisement> { panic!("create exploded") }
    async fn update(&self, _id: &ResourceId, _payload: Payload) -> ApiResult<Advertisement> {
        panic!("update exploded")
    }
    async fn delete(&self, _id: &ResourceId) -> ApiResult<Ack> { panic!("delete exploded") }
}

#[tokio::test]
async fn panicking_repository_still_settles() {
    let repo: Arc<dyn ResourceRepository<Advertisement>> = Arc::new(Broken);
    let mut m = ResourceStateMachine::new(repo, SessionContext::signed_in(Session::new("u-1", Role::Privileged)));
    m.load();
    m.load_one("1".into());
    let mut draft = AdvertisementDraft::default();
    draft.set("titre", "Promo").unwrap();
    let ticket = m.create(&draft).unwrap();

    let events = tokio::time::timeout(Duration::from_secs(5), m.settle()).await.expect("settle returned");
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(Event::is_applied));
    assert_eq!(m.in_flight(), 0);
    assert_eq!(m.list().error(), Some("network: load ended without a result"));
    assert_eq!(m.current().error(), Some("network: load_one ended without a result"));
    assert_eq!(m.submission().error(), Some("network: create ended without a result"));
    assert!(!ticket.outcome().await.ok);
}
