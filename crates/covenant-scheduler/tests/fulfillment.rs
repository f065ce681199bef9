// End-to-end tick behaviour against real stores.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use covenant_scheduler::{
    EventSink, FailureStage, FulfillmentEvent, Scheduler, SchedulerOptions, SinkError,
};
use covenant_subscriptions::{
    MemoryStore, NewSubscription, Page, SqliteStore, StoreError, StoreResult, Subscription,
    SubscriptionId, SubscriptionRegistry, SubscriptionStore,
};

#[derive(Default)]
struct Collect(Mutex<Vec<FulfillmentEvent>>);

#[async_trait]
impl EventSink for Collect {
    async fn emit(&self, event: &FulfillmentEvent) -> Result<(), SinkError> {
        self.0.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Delegates to a `MemoryStore` but fails writes for one poisoned id.
struct FlakyStore {
    inner: MemoryStore,
    poisoned: Mutex<Option<SubscriptionId>>,
}

impl SubscriptionStore for FlakyStore {
    fn insert(&self, sub: &Subscription) -> StoreResult<()> {
        self.inner.insert(sub)
    }
    fn get_by_id(&self, id: &SubscriptionId) -> StoreResult<Option<Subscription>> {
        self.inner.get_by_id(id)
    }
    fn get_all(&self, page: Page) -> StoreResult<Vec<Subscription>> {
        self.inner.get_all(page)
    }
    fn get_by_vendor(&self, vendor_id: &str, page: Page) -> StoreResult<Vec<Subscription>> {
        self.inner.get_by_vendor(vendor_id, page)
    }
    fn get_by_user(&self, user_id: &str, page: Page) -> StoreResult<Vec<Subscription>> {
        self.inner.get_by_user(user_id, page)
    }
    fn update(&self, id: &SubscriptionId, sub: &Subscription) -> StoreResult<bool> {
        if self.poisoned.lock().unwrap().as_ref() == Some(id) {
            return Err(StoreError::Unavailable("disk on fire".into()));
        }
        self.inner.update(id, sub)
    }
    fn delete(&self, id: &SubscriptionId) -> StoreResult<bool> {
        self.inner.delete(id)
    }
    fn select_due(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Subscription>> {
        self.inner.select_due(now, limit)
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 7, 10, 0, 0).unwrap()
}

fn weekly(user: &str) -> NewSubscription {
    NewSubscription {
        user_id: user.into(),
        vendor_id: "roaster-7".into(),
        item_id: "house-blend".into(),
        frequency: "weekly".into(),
    }
}

#[tokio::test]
async fn weekly_subscription_lifecycle() {
    let registry = Arc::new(SubscriptionRegistry::new(Arc::new(
        SqliteStore::open_in_memory().unwrap(),
    )));
    let sink = Arc::new(Collect::default());
    let scheduler = Scheduler::new(Arc::clone(&registry), sink.clone(), SchedulerOptions::default());

    let s = registry.insert(weekly("alice"), t0()).unwrap();
    assert_eq!(s.next_due_at, t0() + Duration::days(7));

    let fire_at = t0() + Duration::days(8);
    let report = scheduler.tick(fire_at).await.unwrap();
    assert_eq!(report.fired, vec![s.id.clone()]);

    {
        let events = sink.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subscription_id, s.id);
        assert_eq!(events[0].user_id, "alice");
        assert_eq!(events[0].vendor_id, "roaster-7");
        assert_eq!(events[0].item_id, "house-blend");
        assert_eq!(events[0].fired_at, fire_at);
    }

    let stored = registry.get_by_id(&s.id).unwrap().unwrap();
    assert_eq!(stored.last_fulfilled_at, Some(fire_at));
    assert_eq!(stored.next_due_at, t0() + Duration::days(15));

    let again = scheduler.tick(fire_at + Duration::seconds(1)).await.unwrap();
    assert!(again.is_empty());
    assert_eq!(sink.0.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_ticks_fire_each_subscription_once() {
    let registry = Arc::new(SubscriptionRegistry::new(Arc::new(
        SqliteStore::open_in_memory().unwrap(),
    )));
    let sink = Arc::new(Collect::default());
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&registry),
        sink.clone(),
        SchedulerOptions::default(),
    ));
    for i in 0..20 {
        registry
            .insert(weekly(&format!("user-{i}")), t0() + Duration::seconds(i))
            .unwrap();
    }

    let now = t0() + Duration::days(8);
    let ticks: Vec<_> = (0..4)
        .map(|_| {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.tick(now).await.unwrap() })
        })
        .collect();

    let mut fired = 0;
    for t in ticks {
        let report = t.await.unwrap();
        assert!(report.failures.is_empty());
        fired += report.fired.len();
    }
    assert_eq!(fired, 20);

    let mut ids: Vec<_> = sink.0.lock().unwrap().iter().map(|e| e.subscription_id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 20);
    assert_eq!(registry.claims_in_flight(), 0);
}

#[tokio::test]
async fn store_failure_is_isolated_to_one_candidate() {
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        poisoned: Mutex::new(None),
    });
    let registry = Arc::new(SubscriptionRegistry::new(store.clone()));
    let sink = Arc::new(Collect::default());
    let scheduler = Scheduler::new(Arc::clone(&registry), sink.clone(), SchedulerOptions::default());

    let bad = registry.insert(weekly("bad"), t0()).unwrap();
    let good = registry.insert(weekly("good"), t0() + Duration::seconds(1)).unwrap();
    *store.poisoned.lock().unwrap() = Some(bad.id.clone());

    let now = t0() + Duration::days(8);
    let report = scheduler.tick(now).await.unwrap();
    assert_eq!(report.fired, vec![good.id.clone()]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, FailureStage::Release);
    assert_eq!(registry.claims_in_flight(), 0);

    // nothing was recorded for the failed one, so it is picked up next time
    *store.poisoned.lock().unwrap() = None;
    let retry = scheduler.tick(now + Duration::minutes(1)).await.unwrap();
    assert_eq!(retry.fired, vec![bad.id.clone()]);
}

#[tokio::test]
async fn paused_and_deleted_subscriptions_never_fire() {
    let registry = Arc::new(SubscriptionRegistry::new(Arc::new(MemoryStore::new())));
    let sink = Arc::new(Collect::default());
    let scheduler = Scheduler::new(Arc::clone(&registry), sink.clone(), SchedulerOptions::default());

    let paused = registry.insert(weekly("p"), t0()).unwrap();
    let deleted = registry.insert(weekly("d"), t0()).unwrap();
    registry.pause(&paused.id).unwrap();
    assert!(registry.delete(&deleted.id).unwrap());

    let report = scheduler.tick(t0() + Duration::days(60)).await.unwrap();
    assert!(report.is_empty());
    assert!(sink.0.lock().unwrap().is_empty());
}
