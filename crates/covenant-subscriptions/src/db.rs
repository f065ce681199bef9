use rusqlite::Connection;

use crate::error::StoreResult;

/// Initialise the subscriptions table and its indexes.
///
/// Safe to call on every startup; uses `IF NOT EXISTS` throughout.
/// Timestamps are fixed-width RFC3339 UTC strings, so text comparison in
/// `WHERE next_due_at <= ?` orders chronologically.
pub fn init_db(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS subscriptions (
            id                 TEXT NOT NULL PRIMARY KEY,
            user_id            TEXT NOT NULL,
            vendor_id          TEXT NOT NULL,
            item_id            TEXT NOT NULL,
            frequency          TEXT NOT NULL,
            status             TEXT NOT NULL DEFAULT 'active',
            last_fulfilled_at  TEXT,            -- NULL until first fulfillment
            next_due_at        TEXT NOT NULL,
            created_at         TEXT NOT NULL,
            updated_at         TEXT NOT NULL
        ) STRICT;

        -- Due polling: WHERE status = 'active' AND next_due_at <= ? ORDER BY next_due_at
        CREATE INDEX IF NOT EXISTS idx_subscriptions_due
            ON subscriptions (status, next_due_at);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_user
            ON subscriptions (user_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_vendor
            ON subscriptions (vendor_id, created_at);",
    )?;
    Ok(())
}
