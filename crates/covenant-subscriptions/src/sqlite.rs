use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode};
use tracing::{debug, instrument};

use crate::db::init_db;
use crate::error::{StoreError, StoreResult};
use crate::store::SubscriptionStore;
use crate::types::{Frequency, Page, Subscription, SubscriptionId, SubscriptionStatus};

/// Column order shared by every SELECT in this module; see `row_to_subscription`.
const SELECT_COLUMNS: &str = "SELECT id, user_id, vendor_id, item_id, frequency, status,
                                     last_fulfilled_at, next_due_at, created_at, updated_at
                              FROM subscriptions";

/// SQLite-backed [`SubscriptionStore`].
///
/// Wraps a single connection in a `Mutex`, which also gives every write the
/// single-record atomicity the registry relies on.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> StoreResult<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Fresh private in-memory database; handy for tests and demos.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".to_string()))
    }

    fn query_list(
        &self,
        filter_sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> StoreResult<Vec<Subscription>> {
        let db = self.conn()?;
        let sql = format!("{SELECT_COLUMNS} {filter_sql}");
        let mut stmt = db.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params, row_to_subscription)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(classify)?;
        Ok(rows)
    }
}

impl SubscriptionStore for SqliteStore {
    #[instrument(skip(self, sub), fields(subscription_id = %sub.id))]
    fn insert(&self, sub: &Subscription) -> StoreResult<()> {
        let db = self.conn()?;
        let result = db.execute(
            "INSERT INTO subscriptions
             (id, user_id, vendor_id, item_id, frequency, status,
              last_fulfilled_at, next_due_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                sub.id.to_string(),
                sub.user_id,
                sub.vendor_id,
                sub.item_id,
                sub.frequency.as_str(),
                sub.status.to_string(),
                sub.last_fulfilled_at.map(ts),
                ts(sub.next_due_at),
                ts(sub.created_at),
                ts(sub.updated_at),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::Duplicate {
                    id: sub.id.to_string(),
                })
            }
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    fn get_by_id(&self, id: &SubscriptionId) -> StoreResult<Option<Subscription>> {
        let db = self.conn()?;
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1 AND status != 'deleted'");
        match db.query_row(&sql, [id.to_string()], row_to_subscription) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(classify(e)),
        }
    }

    fn get_all(&self, page: Page) -> StoreResult<Vec<Subscription>> {
        self.query_list(
            "WHERE status != 'deleted'
             ORDER BY created_at, id
             LIMIT ?1 OFFSET ?2",
            rusqlite::params![page.limit() as i64, page.offset() as i64],
        )
    }

    fn get_by_vendor(&self, vendor_id: &str, page: Page) -> StoreResult<Vec<Subscription>> {
        self.query_list(
            "WHERE vendor_id = ?1 AND status != 'deleted'
             ORDER BY created_at, id
             LIMIT ?2 OFFSET ?3",
            rusqlite::params![vendor_id, page.limit() as i64, page.offset() as i64],
        )
    }

    fn get_by_user(&self, user_id: &str, page: Page) -> StoreResult<Vec<Subscription>> {
        self.query_list(
            "WHERE user_id = ?1 AND status != 'deleted'
             ORDER BY created_at, id
             LIMIT ?2 OFFSET ?3",
            rusqlite::params![user_id, page.limit() as i64, page.offset() as i64],
        )
    }

    #[instrument(skip(self, sub), fields(subscription_id = %id))]
    fn update(&self, id: &SubscriptionId, sub: &Subscription) -> StoreResult<bool> {
        let db = self.conn()?;
        let n = db.execute(
            "UPDATE subscriptions
             SET user_id = ?1, vendor_id = ?2, item_id = ?3, frequency = ?4,
                 status = ?5, last_fulfilled_at = ?6, next_due_at = ?7, updated_at = ?8
             WHERE id = ?9 AND status != 'deleted'",
            rusqlite::params![
                sub.user_id,
                sub.vendor_id,
                sub.item_id,
                sub.frequency.as_str(),
                sub.status.to_string(),
                sub.last_fulfilled_at.map(ts),
                ts(sub.next_due_at),
                ts(sub.updated_at),
                id.to_string(),
            ],
        )?;
        Ok(n > 0)
    }

    #[instrument(skip(self), fields(subscription_id = %id))]
    fn delete(&self, id: &SubscriptionId) -> StoreResult<bool> {
        let db = self.conn()?;
        let n = db.execute(
            "UPDATE subscriptions SET status = 'deleted', updated_at = ?1
             WHERE id = ?2 AND status != 'deleted'",
            rusqlite::params![ts(Utc::now()), id.to_string()],
        )?;
        Ok(n > 0)
    }

    fn select_due(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Subscription>> {
        let due = self.query_list(
            "WHERE status = 'active' AND next_due_at <= ?1
             ORDER BY next_due_at, id
             LIMIT ?2",
            rusqlite::params![ts(now), limit as i64],
        )?;
        debug!(count = due.len(), "selected due subscriptions");
        Ok(due)
    }
}

/// Fixed-width UTC timestamp: nanosecond precision with a `Z` suffix, so
/// text order equals time order and values round-trip exactly.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Decoding failures mean the row itself is bad, not the connection.
fn classify(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::FromSqlConversionFailure(idx, _, cause) => {
            StoreError::Corrupt(format!("column {idx}: {cause}"))
        }
        other => StoreError::Database(other),
    }
}

fn conversion(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion(idx, format!("bad timestamp {raw:?}: {e}")))
}

/// Map a row (column order from `SELECT_COLUMNS`) to a `Subscription`.
fn row_to_subscription(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subscription> {
    let id_str: String = row.get(0)?;
    let id = SubscriptionId::parse(&id_str).map_err(|e| conversion(0, e.to_string()))?;
    let frequency = row
        .get::<_, String>(4)?
        .parse::<Frequency>()
        .map_err(|e| conversion(4, e.to_string()))?;
    let status = row
        .get::<_, String>(5)?
        .parse::<SubscriptionStatus>()
        .map_err(|e| conversion(5, e))?;
    let last_fulfilled_at = row
        .get::<_, Option<String>>(6)?
        .map(|raw| parse_ts(6, &raw))
        .transpose()?;

    Ok(Subscription {
        id,
        user_id: row.get(1)?,
        vendor_id: row.get(2)?,
        item_id: row.get(3)?,
        frequency,
        status,
        last_fulfilled_at,
        next_due_at: parse_ts(7, &row.get::<_, String>(7)?)?,
        created_at: parse_ts(8, &row.get::<_, String>(8)?)?,
        updated_at: parse_ts(9, &row.get::<_, String>(9)?)?,
    })
}
