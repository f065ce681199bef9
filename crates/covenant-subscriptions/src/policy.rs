use chrono::{DateTime, Datelike, Duration, Months, Utc};

use crate::error::{Result, SubscriptionError};
use crate::types::Frequency;

/// Stored timestamps are four-digit-year RFC3339; later instants would
/// neither sort nor parse back.
const LAST_STORABLE_YEAR: i32 = 9999;

/// Compute when a subscription next falls due, counting from `from`.
///
/// Weekly and biweekly are fixed 7/14 day intervals. Monthly adds one
/// calendar month, clamping the day to the end of a shorter month
/// (Jan 31 → Feb 28/29). The result is always strictly after `from`.
/// Results outside years 0..=9999 are a `ScheduleOverflow`.
pub fn next_due(frequency: Frequency, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let next = match frequency {
        Frequency::Weekly => from.checked_add_signed(Duration::days(7)),
        Frequency::Biweekly => from.checked_add_signed(Duration::days(14)),
        Frequency::Monthly => from.checked_add_months(Months::new(1)),
    }
    .filter(|due| (0..=LAST_STORABLE_YEAR).contains(&due.year()));

    next.ok_or_else(|| SubscriptionError::ScheduleOverflow {
        frequency: frequency.to_string(),
        from: from.to_rfc3339(),
    })
}

/// Text-level entry point: parses the frequency class first so unknown
/// values fail with `InvalidFrequency`.
pub fn next_due_str(frequency: &str, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
    next_due(frequency.parse()?, from)
}
