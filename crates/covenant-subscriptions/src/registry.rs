use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SubscriptionError};
use crate::policy::next_due;
use crate::store::SubscriptionStore;
use crate::types::{
    Frequency, NewSubscription, Page, Subscription, SubscriptionChanges, SubscriptionId,
    SubscriptionStatus,
};

/// Coordinating layer over a [`SubscriptionStore`].
///
/// Validates input, keeps `next_due_at` in step with the frequency policy,
/// and serializes every mutation of a given id through a per-id lock. Locks
/// for different ids are independent, so a slow write on one subscription
/// never stalls another.
///
/// Claims mark a subscription as being fulfilled. While a claim is held a
/// second claim returns `Ok(None)` and `delete` fails with
/// [`SubscriptionError::Claimed`]; updates and pause/resume still go
/// through, and the release re-reads the record so it sees them.
pub struct SubscriptionRegistry {
    store: Arc<dyn SubscriptionStore>,
    locks: DashMap<SubscriptionId, Arc<Mutex<()>>>,
    /// id -> token of the claim currently held.
    claims: DashMap<SubscriptionId, u64>,
    next_token: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
            claims: DashMap::new(),
            next_token: AtomicU64::new(1),
        }
    }

    /// Validate and persist a new active subscription created at `now`.
    #[instrument(skip(self, new), fields(user_id = %new.user_id, vendor_id = %new.vendor_id))]
    pub fn insert(&self, new: NewSubscription, now: DateTime<Utc>) -> Result<Subscription> {
        let user_id = required("user_id", &new.user_id)?;
        let vendor_id = required("vendor_id", &new.vendor_id)?;
        let item_id = required("item_id", &new.item_id)?;
        let frequency: Frequency = new.frequency.parse()?;

        let sub = Subscription {
            id: SubscriptionId::new(),
            user_id,
            vendor_id,
            item_id,
            frequency,
            status: SubscriptionStatus::Active,
            last_fulfilled_at: None,
            next_due_at: next_due(frequency, now)?,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(&sub)?;

        info!(subscription_id = %sub.id, %frequency, next_due_at = %sub.next_due_at, "subscription created");
        Ok(sub)
    }

    /// `None` when the id is unknown or deleted.
    pub fn get_by_id(&self, id: &SubscriptionId) -> Result<Option<Subscription>> {
        Ok(self.store.get_by_id(id)?)
    }

    pub fn get_all(&self, page: Page) -> Result<Vec<Subscription>> {
        Ok(self.store.get_all(page)?)
    }

    pub fn get_by_vendor(&self, vendor_id: &str, page: Page) -> Result<Vec<Subscription>> {
        Ok(self.store.get_by_vendor(vendor_id, page)?)
    }

    pub fn get_by_user(&self, user_id: &str, page: Page) -> Result<Vec<Subscription>> {
        Ok(self.store.get_by_user(user_id, page)?)
    }

    /// Apply `changes` and recompute `next_due_at`. `None` when the id is
    /// unknown or deleted.
    #[instrument(skip(self, changes), fields(subscription_id = %id))]
    pub fn update(
        &self,
        id: &SubscriptionId,
        changes: SubscriptionChanges,
    ) -> Result<Option<Subscription>> {
        // Validate before taking the lock; bad input never touches the store.
        let user_id = changes.user_id.as_deref().map(|v| required("user_id", v)).transpose()?;
        let vendor_id = changes.vendor_id.as_deref().map(|v| required("vendor_id", v)).transpose()?;
        let item_id = changes.item_id.as_deref().map(|v| required("item_id", v)).transpose()?;
        let frequency = changes
            .frequency
            .as_deref()
            .map(str::parse::<Frequency>)
            .transpose()?;

        self.with_lock(id, || -> Result<Option<Subscription>> {
            let Some(mut sub) = self.store.get_by_id(id)? else {
                return Ok(None);
            };
            if let Some(v) = user_id {
                sub.user_id = v;
            }
            if let Some(v) = vendor_id {
                sub.vendor_id = v;
            }
            if let Some(v) = item_id {
                sub.item_id = v;
            }
            if let Some(f) = frequency {
                sub.frequency = f;
            }
            sub.next_due_at = next_due(sub.frequency, sub.schedule_anchor())?;
            sub.updated_at = Utc::now();

            if !self.store.update(id, &sub)? {
                return Ok(None);
            }
            debug!(next_due_at = %sub.next_due_at, "subscription updated");
            Ok(Some(sub))
        })
    }

    /// Tombstone the subscription. `Ok(false)` when it is unknown or
    /// already deleted; `Err(Claimed)` while a fulfillment holds it.
    #[instrument(skip(self), fields(subscription_id = %id))]
    pub fn delete(&self, id: &SubscriptionId) -> Result<bool> {
        let deleted = self.with_lock(id, || -> Result<bool> {
            if self.claims.contains_key(id) {
                warn!("delete rejected: subscription is claimed");
                return Err(SubscriptionError::Claimed { id: id.to_string() });
            }
            Ok(self.store.delete(id)?)
        })?;

        if deleted {
            info!("subscription deleted");
        }
        Ok(deleted)
    }

    /// Stop scheduling the subscription without deleting it.
    pub fn pause(&self, id: &SubscriptionId) -> Result<Option<Subscription>> {
        self.set_status(id, SubscriptionStatus::Paused)
    }

    /// Re-activate a paused subscription. `next_due_at` is recomputed from
    /// the schedule anchor, so a long pause makes it due straight away.
    pub fn resume(&self, id: &SubscriptionId) -> Result<Option<Subscription>> {
        self.set_status(id, SubscriptionStatus::Active)
    }

    #[instrument(skip(self), fields(subscription_id = %id))]
    fn set_status(
        &self,
        id: &SubscriptionId,
        status: SubscriptionStatus,
    ) -> Result<Option<Subscription>> {
        self.with_lock(id, || -> Result<Option<Subscription>> {
            let Some(mut sub) = self.store.get_by_id(id)? else {
                return Ok(None);
            };
            if sub.status == status {
                return Ok(Some(sub));
            }
            sub.status = status;
            sub.next_due_at = next_due(sub.frequency, sub.schedule_anchor())?;
            sub.updated_at = Utc::now();

            if !self.store.update(id, &sub)? {
                return Ok(None);
            }
            info!(%status, "subscription status changed");
            Ok(Some(sub))
        })
    }

    /// Active subscriptions due at `now`, oldest-due first.
    pub fn select_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Subscription>> {
        Ok(self.store.select_due(now, limit)?)
    }

    /// Try to take the fulfillment claim on `id`.
    ///
    /// Returns `Ok(None)` without waiting when another claim is held or the
    /// subscription is missing, inactive, or not yet due at `now`. The
    /// returned guard holds the pre-claim snapshot; dropping it without
    /// calling [`Claim::release`] aborts the claim.
    #[instrument(skip(self), fields(subscription_id = %id))]
    pub fn claim(&self, id: &SubscriptionId, now: DateTime<Utc>) -> Result<Option<Claim<'_>>> {
        let claimed = self.with_lock(id, || -> Result<Option<(u64, Subscription)>> {
            if self.claims.contains_key(id) {
                debug!("claim conflict");
                return Ok(None);
            }
            let Some(snapshot) = self.store.get_by_id(id)? else {
                return Ok(None);
            };
            if !snapshot.is_due(now) {
                debug!(status = %snapshot.status, next_due_at = %snapshot.next_due_at, "not due; claim skipped");
                return Ok(None);
            }

            let token = self.next_token.fetch_add(1, Ordering::Relaxed);
            self.claims.insert(id.clone(), token);
            debug!(token, "claimed");
            Ok(Some((token, snapshot)))
        })?;

        Ok(claimed.map(|(token, snapshot)| Claim {
            registry: self,
            token,
            snapshot,
            settled: false,
        }))
    }

    /// Number of claims currently held.
    pub fn claims_in_flight(&self) -> usize {
        self.claims.len()
    }

    pub fn is_claimed(&self, id: &SubscriptionId) -> bool {
        self.claims.contains_key(id)
    }

    fn release(
        &self,
        id: &SubscriptionId,
        token: u64,
        fulfilled_at: DateTime<Utc>,
    ) -> Result<Option<Subscription>> {
        let result = self.with_lock(id, || self.advance(id, fulfilled_at));
        // Cleared even when persisting failed; the next tick retries.
        self.clear_claim(id, token);
        result
    }

    fn advance(&self, id: &SubscriptionId, fulfilled_at: DateTime<Utc>) -> Result<Option<Subscription>> {
        let Some(mut sub) = self.store.get_by_id(id)? else {
            return Ok(None);
        };
        sub.last_fulfilled_at = Some(fulfilled_at);
        sub.next_due_at = next_due(sub.frequency, fulfilled_at)?;
        sub.updated_at = Utc::now();

        if !self.store.update(id, &sub)? {
            return Ok(None);
        }
        debug!(subscription_id = %id, next_due_at = %sub.next_due_at, "schedule advanced");
        Ok(Some(sub))
    }

    fn clear_claim(&self, id: &SubscriptionId, token: u64) {
        self.claims.remove_if(id, |_, held| *held == token);
    }

    /// Run `f` while holding the per-id lock for `id`.
    ///
    /// The map entry is dropped again once no other caller holds or waits
    /// on it, so the map only tracks ids with work in progress.
    fn with_lock<T>(&self, id: &SubscriptionId, f: impl FnOnce() -> T) -> T {
        // Clone out of the map so the shard guard is released before we block.
        let lock = self.locks.entry(id.clone()).or_default().clone();
        let out = {
            let _held = acquire(&lock);
            f()
        };
        drop(lock);
        // Cloning happens under the shard lock, so a count of one means
        // nobody else can reach this mutex.
        self.locks.remove_if(id, |_, l| Arc::strong_count(l) == 1);
        out
    }

    /// Ids with a per-id lock entry currently allocated.
    pub fn tracked_locks(&self) -> usize {
        self.locks.len()
    }
}

/// The per-id lock only guards `()`, so a panic elsewhere cannot leave
/// anything inconsistent behind it; poisoning is ignored.
fn acquire(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

fn required(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SubscriptionError::Validation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

/// Exclusive fulfillment claim on one subscription.
///
/// Obtained from [`SubscriptionRegistry::claim`]. Either [`release`] it to
/// record the fulfillment or [`abort`] it; dropping it aborts.
///
/// [`release`]: Claim::release
/// [`abort`]: Claim::abort
#[must_use = "dropping a claim aborts it"]
pub struct Claim<'a> {
    registry: &'a SubscriptionRegistry,
    token: u64,
    snapshot: Subscription,
    settled: bool,
}

impl Claim<'_> {
    /// The record as it was when the claim was taken.
    pub fn snapshot(&self) -> &Subscription {
        &self.snapshot
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.snapshot.id
    }

    /// Record a fulfillment at `fulfilled_at` and clear the claim.
    ///
    /// `next_due_at` becomes `next_due(frequency, fulfilled_at)` using the
    /// record's current frequency. Returns `None` if the record vanished
    /// underneath the claim.
    pub fn release(mut self, fulfilled_at: DateTime<Utc>) -> Result<Option<Subscription>> {
        self.settled = true;
        self.registry.release(&self.snapshot.id, self.token, fulfilled_at)
    }

    /// Give the claim back without touching the record.
    pub fn abort(mut self) {
        self.settled = true;
        self.registry.clear_claim(&self.snapshot.id, self.token);
        debug!(subscription_id = %self.snapshot.id, "claim aborted");
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.registry.clear_claim(&self.snapshot.id, self.token);
            debug!(subscription_id = %self.snapshot.id, "unreleased claim dropped");
        }
    }
}
