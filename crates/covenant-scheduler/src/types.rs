use chrono::{DateTime, Utc};
use covenant_subscriptions::{Subscription, SubscriptionId};
use serde::{Deserialize, Serialize};

/// Signal that a subscription's recurring delivery should happen now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentEvent {
    pub subscription_id: SubscriptionId,
    pub user_id: String,
    pub vendor_id: String,
    pub item_id: String,
    /// The tick time the fulfillment was recorded at.
    pub fired_at: DateTime<Utc>,
}

impl FulfillmentEvent {
    pub fn new(sub: &Subscription, fired_at: DateTime<Utc>) -> Self {
        Self {
            subscription_id: sub.id.clone(),
            user_id: sub.user_id.clone(),
            vendor_id: sub.vendor_id.clone(),
            item_id: sub.item_id.clone(),
            fired_at,
        }
    }
}

/// Which step of a candidate's processing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Claim,
    Release,
    Emit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickFailure {
    pub subscription_id: SubscriptionId,
    pub stage: FailureStage,
    pub error: String,
}

/// Outcome of one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickReport {
    pub now: DateTime<Utc>,
    /// Candidates returned by due-selection.
    pub selected: usize,
    /// Subscriptions advanced and emitted, in processing order.
    pub fired: Vec<SubscriptionId>,
    /// Lost the claim race or were no longer due.
    pub skipped: usize,
    /// Left untouched because the tick deadline passed.
    pub deferred: usize,
    pub failures: Vec<TickFailure>,
}

impl TickReport {
    pub fn new(now: DateTime<Utc>, selected: usize) -> Self {
        Self {
            now,
            selected,
            fired: Vec::new(),
            skipped: 0,
            deferred: 0,
            failures: Vec::new(),
        }
    }

    /// True when the tick found nothing to do.
    pub fn is_empty(&self) -> bool {
        self.selected == 0
    }
}
