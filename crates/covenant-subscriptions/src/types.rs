use chrono::{DateTime, Utc};
use covenant_core::config::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Result, SubscriptionError};

/// Opaque subscription identifier (UUIDv7, so ids sort by creation time).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse an id received from outside the core (path params, DB rows).
    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| SubscriptionError::InvalidId(s.to_string()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SubscriptionId {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Fixed recurrence classes. Interval arithmetic lives in [`crate::policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Weekly,
    Biweekly,
    Monthly,
}

impl Frequency {
    pub const ALL: [Frequency; 3] = [Frequency::Weekly, Frequency::Biweekly, Frequency::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Weekly => "weekly",
            Frequency::Biweekly => "biweekly",
            Frequency::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Frequency {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weekly" => Ok(Frequency::Weekly),
            "biweekly" => Ok(Frequency::Biweekly),
            "monthly" => Ok(Frequency::Monthly),
            _ => Err(SubscriptionError::InvalidFrequency(s.to_string())),
        }
    }
}

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Eligible for due-selection.
    Active,
    /// Kept, but skipped by the scheduler until resumed.
    Paused,
    /// Tombstoned. The row stays so the id is never reused.
    Deleted,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "paused" => Ok(SubscriptionStatus::Paused),
            "deleted" => Ok(SubscriptionStatus::Deleted),
            other => Err(format!("unknown subscription status: {other}")),
        }
    }
}

/// A persisted subscription record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: String,
    pub vendor_id: String,
    pub item_id: String,
    pub frequency: Frequency,
    pub status: SubscriptionStatus,
    /// `None` until the first fulfillment.
    pub last_fulfilled_at: Option<DateTime<Utc>>,
    /// Cached `next_due(frequency, schedule_anchor())`.
    pub next_due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// The instant the schedule counts from: the last fulfillment, or
    /// creation time for a subscription that has never been fulfilled.
    pub fn schedule_anchor(&self) -> DateTime<Utc> {
        self.last_fulfilled_at.unwrap_or(self.created_at)
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// Active and `next_due_at` has elapsed relative to `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.next_due_at <= now
    }
}

/// Input for [`crate::registry::SubscriptionRegistry::insert`].
///
/// Frequency arrives as text so unknown classes surface as
/// `InvalidFrequency` instead of a deserialisation failure upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscription {
    pub user_id: String,
    #[serde(alias = "roaster_id")]
    pub vendor_id: String,
    pub item_id: String,
    pub frequency: String,
}

/// Field changes for an update. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionChanges {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default, alias = "roaster_id")]
    pub vendor_id: Option<String>,
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
}

impl SubscriptionChanges {
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none()
            && self.vendor_id.is_none()
            && self.item_id.is_none()
            && self.frequency.is_none()
    }
}

/// Offset/limit window for listing queries.
///
/// A zero limit means "use the default"; limits above the cap are clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    offset: usize,
    limit: usize,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self::bounded(offset, limit, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT)
    }

    /// Like [`Page::new`] with caller-supplied default and cap.
    pub fn bounded(offset: usize, limit: usize, default_limit: usize, max_limit: usize) -> Self {
        let max_limit = max_limit.max(1);
        let limit = if limit == 0 { default_limit } else { limit };
        Self {
            offset,
            limit: limit.clamp(1, max_limit),
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, 0)
    }
}
