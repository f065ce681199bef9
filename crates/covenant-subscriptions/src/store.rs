use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::error::{StoreError, StoreResult};
use crate::types::{Page, Subscription, SubscriptionId, SubscriptionStatus};

/// Persistence boundary for subscription records.
///
/// Implementations only need atomic single-record writes: every mutation is
/// already serialized per id by the registry. Deleted records are
/// tombstoned and invisible to every read except the duplicate-id check on
/// insert. A missing record is `Ok(None)` / `Ok(false)`, never an error.
pub trait SubscriptionStore: Send + Sync {
    /// Persist a new record. Fails with [`StoreError::Duplicate`] if the id
    /// was ever used before.
    fn insert(&self, sub: &Subscription) -> StoreResult<()>;

    fn get_by_id(&self, id: &SubscriptionId) -> StoreResult<Option<Subscription>>;

    /// Non-deleted records in creation order.
    fn get_all(&self, page: Page) -> StoreResult<Vec<Subscription>>;

    fn get_by_vendor(&self, vendor_id: &str, page: Page) -> StoreResult<Vec<Subscription>>;

    fn get_by_user(&self, user_id: &str, page: Page) -> StoreResult<Vec<Subscription>>;

    /// Overwrite the record with `id`. Returns `false` when it is absent or
    /// tombstoned.
    fn update(&self, id: &SubscriptionId, sub: &Subscription) -> StoreResult<bool>;

    /// Tombstone the record. Returns `false` when it is absent or already
    /// deleted.
    fn delete(&self, id: &SubscriptionId) -> StoreResult<bool>;

    /// Active records with `next_due_at <= now`, oldest-due first.
    fn select_due(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Subscription>>;
}

/// Process-local store backed by a `BTreeMap`. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<SubscriptionId, Subscription>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn list<F>(&self, page: Page, keep: F) -> StoreResult<Vec<Subscription>>
    where
        F: Fn(&Subscription) -> bool,
    {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        let mut matched: Vec<&Subscription> = rows
            .values()
            .filter(|s| s.status != SubscriptionStatus::Deleted && keep(s))
            .collect();
        matched.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(matched
            .into_iter()
            .skip(page.offset())
            .take(page.limit())
            .cloned()
            .collect())
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("memory store lock poisoned".to_string())
}

impl SubscriptionStore for MemoryStore {
    fn insert(&self, sub: &Subscription) -> StoreResult<()> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        if rows.contains_key(&sub.id) {
            return Err(StoreError::Duplicate { id: sub.id.to_string() });
        }
        rows.insert(sub.id.clone(), sub.clone());
        Ok(())
    }

    fn get_by_id(&self, id: &SubscriptionId) -> StoreResult<Option<Subscription>> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows
            .get(id)
            .filter(|s| s.status != SubscriptionStatus::Deleted)
            .cloned())
    }

    fn get_all(&self, page: Page) -> StoreResult<Vec<Subscription>> {
        self.list(page, |_| true)
    }

    fn get_by_vendor(&self, vendor_id: &str, page: Page) -> StoreResult<Vec<Subscription>> {
        self.list(page, |s| s.vendor_id == vendor_id)
    }

    fn get_by_user(&self, user_id: &str, page: Page) -> StoreResult<Vec<Subscription>> {
        self.list(page, |s| s.user_id == user_id)
    }

    fn update(&self, id: &SubscriptionId, sub: &Subscription) -> StoreResult<bool> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        match rows.get_mut(id) {
            Some(row) if row.status != SubscriptionStatus::Deleted => {
                *row = Subscription {
                    id: id.clone(),
                    ..sub.clone()
                };
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete(&self, id: &SubscriptionId) -> StoreResult<bool> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        match rows.get_mut(id) {
            Some(row) if row.status != SubscriptionStatus::Deleted => {
                row.status = SubscriptionStatus::Deleted;
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn select_due(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Subscription>> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        let mut due: Vec<&Subscription> = rows.values().filter(|s| s.is_due(now)).collect();
        due.sort_by(|a, b| (a.next_due_at, &a.id).cmp(&(b.next_due_at, &b.id)));
        Ok(due.into_iter().take(limit).cloned().collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::Frequency;
    use chrono::{Duration, TimeZone};

    pub(crate) fn sample(user: &str, vendor: &str, created_at: DateTime<Utc>) -> Subscription {
        Subscription {
            id: SubscriptionId::new(),
            user_id: user.to_string(),
            vendor_id: vendor.to_string(),
            item_id: "beans-1kg".to_string(),
            frequency: Frequency::Weekly,
            status: SubscriptionStatus::Active,
            last_fulfilled_at: None,
            next_due_at: created_at + Duration::days(7),
            created_at,
            updated_at: created_at,
        }
    }

    pub(crate) fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    /// Shared behaviour every store implementation must exhibit.
    pub(crate) fn exercise_contract(store: &dyn SubscriptionStore) {
        let t0 = t0();

        assert!(store.get_all(Page::new(0, 10)).unwrap().is_empty());

        let a = sample("alice", "roaster-1", t0);
        let b = sample("bob", "roaster-1", t0 + Duration::seconds(1));
        let mut c = sample("alice", "roaster-2", t0 + Duration::seconds(2));
        c.next_due_at = t0 + Duration::days(1);
        for s in [&a, &b, &c] {
            store.insert(s).unwrap();
        }

        // duplicate ids are rejected
        assert!(matches!(store.insert(&a), Err(StoreError::Duplicate { .. })));

        assert_eq!(store.get_by_id(&a.id).unwrap(), Some(a.clone()));
        assert_eq!(store.get_by_id(&SubscriptionId::new()).unwrap(), None);

        let all = store.get_all(Page::new(0, 10)).unwrap();
        assert_eq!(all.iter().map(|s| s.id.clone()).collect::<Vec<_>>(), vec![
            a.id.clone(),
            b.id.clone(),
            c.id.clone()
        ]);
        assert_eq!(store.get_all(Page::new(1, 1)).unwrap(), vec![b.clone()]);
        assert!(store.get_all(Page::new(50, 10)).unwrap().is_empty());

        assert_eq!(store.get_by_vendor("roaster-1", Page::default()).unwrap().len(), 2);
        assert_eq!(store.get_by_user("alice", Page::default()).unwrap().len(), 2);
        assert!(store.get_by_user("nobody", Page::default()).unwrap().is_empty());

        // oldest-due first
        let due = store.select_due(t0 + Duration::days(8), 10).unwrap();
        assert_eq!(due.first().map(|s| s.id.clone()), Some(c.id.clone()));
        assert_eq!(due.len(), 3);
        assert_eq!(store.select_due(t0 + Duration::days(8), 1).unwrap().len(), 1);

        // paused and deleted rows drop out of due-selection
        let mut paused = b.clone();
        paused.status = SubscriptionStatus::Paused;
        assert!(store.update(&b.id, &paused).unwrap());
        assert!(store.delete(&c.id).unwrap());
        let due = store.select_due(t0 + Duration::days(8), 10).unwrap();
        assert_eq!(due, vec![a.clone()]);

        // tombstones are invisible but still occupy the id
        assert_eq!(store.get_by_id(&c.id).unwrap(), None);
        assert!(!store.delete(&c.id).unwrap());
        assert!(!store.update(&c.id, &c).unwrap());
        assert!(matches!(store.insert(&c), Err(StoreError::Duplicate { .. })));
        assert_eq!(store.get_all(Page::default()).unwrap().len(), 2);
    }

    #[test]
    fn memory_store_honours_contract() {
        exercise_contract(&MemoryStore::new());
    }
}
