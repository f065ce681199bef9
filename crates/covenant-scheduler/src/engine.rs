use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use covenant_core::config::SchedulerConfig;
use covenant_subscriptions::{Subscription, SubscriptionRegistry};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SinkError};
use crate::sink::EventSink;
use crate::types::{FailureStage, FulfillmentEvent, TickFailure, TickReport};

/// Tuning knobs for [`Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum candidates pulled per tick.
    pub batch_limit: usize,
    /// Wall-clock budget per tick.
    pub tick_deadline: Duration,
    /// Period of the background loop; zero disables it.
    pub tick_interval: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for SchedulerOptions {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            batch_limit: config.batch_limit.max(1),
            tick_deadline: Duration::from_millis(config.tick_deadline_ms),
            tick_interval: Duration::from_secs(config.tick_interval_secs),
        }
    }
}

enum Outcome {
    Fired,
    Skipped,
    Failed(TickFailure),
}

/// Drives fulfillment: each tick selects due subscriptions, claims them one
/// at a time, advances their schedule and emits an event.
///
/// `tick` takes `&self` and may overlap with itself (e.g. the background
/// loop and a manual trigger); the registry's claims keep a subscription
/// from firing twice. Clones share the registry and sink.
#[derive(Clone)]
pub struct Scheduler {
    registry: Arc<SubscriptionRegistry>,
    sink: Arc<dyn EventSink>,
    options: SchedulerOptions,
}

impl Scheduler {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        sink: Arc<dyn EventSink>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            registry,
            sink,
            options,
        }
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Run one fulfillment pass at `now`.
    ///
    /// Only a failing due-selection query aborts the tick. Failures on
    /// individual subscriptions are logged, collected in the report, and
    /// processing moves on to the next candidate.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let deadline = Instant::now() + self.options.tick_deadline;
        let candidates = self.registry.select_due(now, self.options.batch_limit)?;
        let mut report = TickReport::new(now, candidates.len());
        if candidates.is_empty() {
            return Ok(report);
        }
        debug!(count = candidates.len(), %now, "tick: candidates selected");

        for (idx, candidate) in candidates.iter().enumerate() {
            if Instant::now() >= deadline {
                report.deferred = candidates.len() - idx;
                warn!(deferred = report.deferred, "tick deadline reached; remaining candidates deferred");
                break;
            }

            match self.fulfil(candidate, now, deadline).await {
                Outcome::Fired => report.fired.push(candidate.id.clone()),
                Outcome::Skipped => report.skipped += 1,
                Outcome::Failed(failure) => {
                    warn!(
                        subscription_id = %failure.subscription_id,
                        stage = ?failure.stage,
                        error = %failure.error,
                        "fulfillment failed"
                    );
                    report.failures.push(failure);
                }
            }
        }

        Ok(report)
    }

    async fn fulfil(&self, candidate: &Subscription, now: DateTime<Utc>, deadline: Instant) -> Outcome {
        let id = &candidate.id;
        let failed = |stage, error: String| {
            Outcome::Failed(TickFailure {
                subscription_id: id.clone(),
                stage,
                error,
            })
        };

        let claim = match self.registry.claim(id, now) {
            Ok(Some(claim)) => claim,
            // Another tick holds it, or it stopped being due since selection.
            Ok(None) => return Outcome::Skipped,
            Err(e) => return failed(FailureStage::Claim, e.to_string()),
        };

        let advanced = match claim.release(now) {
            Ok(Some(sub)) => sub,
            Ok(None) => return Outcome::Skipped,
            Err(e) => return failed(FailureStage::Release, e.to_string()),
        };

        let event = FulfillmentEvent::new(&advanced, now);
        let emitted = tokio::time::timeout_at(deadline, self.sink.emit(&event))
            .await
            .unwrap_or(Err(SinkError::Timeout));
        match emitted {
            Ok(()) => {
                info!(subscription_id = %id, next_due_at = %advanced.next_due_at, "subscription fulfilled");
                Outcome::Fired
            }
            Err(e) => failed(FailureStage::Emit, e.to_string()),
        }
    }

    /// Background loop. Ticks every `tick_interval` until `shutdown`
    /// broadcasts `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if self.options.tick_interval.is_zero() {
            info!("scheduler loop disabled (tick interval is zero)");
            return;
        }
        info!(interval = ?self.options.tick_interval, "scheduler started");

        let mut interval = tokio::time::interval(self.options.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick(Utc::now()).await {
                        Ok(report) if !report.is_empty() => info!(
                            selected = report.selected,
                            fired = report.fired.len(),
                            skipped = report.skipped,
                            deferred = report.deferred,
                            failed = report.failures.len(),
                            "tick complete"
                        ),
                        Ok(_) => {}
                        Err(e) => error!("scheduler tick error: {e}"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use covenant_subscriptions::{MemoryStore, NewSubscription, Page};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<FulfillmentEvent>>,
    }

    #[async_trait]
    impl EventSink for Recording {
        async fn emit(&self, event: &FulfillmentEvent) -> std::result::Result<(), SinkError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    /// Rejects events for one user, accepts everything else.
    struct RejectUser(&'static str, Recording);

    #[async_trait]
    impl EventSink for RejectUser {
        async fn emit(&self, event: &FulfillmentEvent) -> std::result::Result<(), SinkError> {
            if event.user_id == self.0 {
                return Err(SinkError::Rejected("blocked".into()));
            }
            self.1.emit(event).await
        }
    }

    struct Slow;

    #[async_trait]
    impl EventSink for Slow {
        async fn emit(&self, _event: &FulfillmentEvent) -> std::result::Result<(), SinkError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
    }

    fn new_sub(user: &str) -> NewSubscription {
        NewSubscription {
            user_id: user.into(),
            vendor_id: "roaster".into(),
            item_id: "beans".into(),
            frequency: "weekly".into(),
        }
    }

    fn setup(sink: Arc<dyn EventSink>, options: SchedulerOptions) -> (Arc<SubscriptionRegistry>, Scheduler) {
        let registry = Arc::new(SubscriptionRegistry::new(Arc::new(MemoryStore::new())));
        let scheduler = Scheduler::new(Arc::clone(&registry), sink, options);
        (registry, scheduler)
    }

    #[tokio::test]
    async fn empty_tick_is_a_no_op() {
        let sink = Arc::new(Recording::default());
        let (_registry, scheduler) = setup(sink.clone(), SchedulerOptions::default());
        let report = scheduler.tick(t0()).await.unwrap();
        assert!(report.is_empty());
        assert!(report.fired.is_empty());
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn due_subscriptions_fire_oldest_first() {
        let sink = Arc::new(Recording::default());
        let (registry, scheduler) = setup(sink.clone(), SchedulerOptions::default());
        let late = registry.insert(new_sub("late"), t0() + ChronoDuration::hours(1)).unwrap();
        let early = registry.insert(new_sub("early"), t0()).unwrap();
        let now = t0() + ChronoDuration::days(8);

        let report = scheduler.tick(now).await.unwrap();
        assert_eq!(report.fired, vec![early.id.clone(), late.id.clone()]);

        let events = sink.events.lock().unwrap();
        assert_eq!(events[0].user_id, "early");
        assert!(events.iter().all(|e| e.fired_at == now));
    }

    #[tokio::test]
    async fn sink_failure_does_not_stop_the_batch() {
        let sink = Arc::new(RejectUser("bob", Recording::default()));
        let (registry, scheduler) = setup(sink.clone(), SchedulerOptions::default());
        let bob = registry.insert(new_sub("bob"), t0()).unwrap();
        registry.insert(new_sub("carol"), t0() + ChronoDuration::seconds(1)).unwrap();

        let report = scheduler.tick(t0() + ChronoDuration::days(8)).await.unwrap();
        assert_eq!(report.fired.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].subscription_id, bob.id);
        assert_eq!(report.failures[0].stage, FailureStage::Emit);
        assert_eq!(sink.1.events.lock().unwrap()[0].user_id, "carol");

        // the schedule still advanced; sink retries are not the core's job
        let stored = registry.get_by_id(&bob.id).unwrap().unwrap();
        assert_eq!(stored.last_fulfilled_at, Some(t0() + ChronoDuration::days(8)));
        assert_eq!(registry.claims_in_flight(), 0);
    }

    #[tokio::test]
    async fn zero_deadline_defers_everything() {
        let sink = Arc::new(Recording::default());
        let options = SchedulerOptions {
            tick_deadline: Duration::ZERO,
            ..SchedulerOptions::default()
        };
        let (registry, scheduler) = setup(sink.clone(), options);
        registry.insert(new_sub("a"), t0()).unwrap();
        registry.insert(new_sub("b"), t0()).unwrap();

        let report = scheduler.tick(t0() + ChronoDuration::days(8)).await.unwrap();
        assert_eq!(report.deferred, 2);
        assert!(report.fired.is_empty());
        assert_eq!(registry.claims_in_flight(), 0);
        assert_eq!(registry.select_due(t0() + ChronoDuration::days(8), 10).unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sink_times_out_and_rest_roll_over() {
        let options = SchedulerOptions {
            tick_deadline: Duration::from_millis(100),
            ..SchedulerOptions::default()
        };
        let (registry, scheduler) = setup(Arc::new(Slow), options);
        registry.insert(new_sub("a"), t0()).unwrap();
        registry.insert(new_sub("b"), t0() + ChronoDuration::seconds(1)).unwrap();

        let report = scheduler.tick(t0() + ChronoDuration::days(8)).await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, FailureStage::Emit);
        assert_eq!(report.deferred, 1);
        assert_eq!(registry.claims_in_flight(), 0);
    }

    #[tokio::test]
    async fn batch_limit_caps_candidates() {
        let sink = Arc::new(Recording::default());
        let options = SchedulerOptions {
            batch_limit: 2,
            ..SchedulerOptions::default()
        };
        let (registry, scheduler) = setup(sink, options);
        for user in ["a", "b", "c"] {
            registry.insert(new_sub(user), t0()).unwrap();
        }
        let now = t0() + ChronoDuration::days(8);
        assert_eq!(scheduler.tick(now).await.unwrap().fired.len(), 2);
        assert_eq!(scheduler.tick(now).await.unwrap().fired.len(), 1);
        assert!(scheduler.tick(now).await.unwrap().is_empty());
        assert_eq!(registry.get_all(Page::default()).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let options = SchedulerOptions {
            tick_interval: Duration::from_millis(10),
            ..SchedulerOptions::default()
        };
        let (_registry, scheduler) = setup(Arc::new(Recording::default()), options);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
