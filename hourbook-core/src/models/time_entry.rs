use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::billing::{ledger, rate};
use crate::error::BillingError;

/// Time entry model: hours worked for one client on one day.
///
/// Maps to the `time_entries` table. There is at most one row per
/// (client, week start, day of week); writes to an existing key overwrite it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TimeEntry {
    /// Unique identifier for the entry
    pub id: Uuid,

    /// Monotonic creation sequence, used to order entries that share a date
    pub seq: i64,

    /// ID of the client the time is billed to
    pub client_id: Uuid,

    /// Monday of the week the entry belongs to
    pub week_start: NaiveDate,

    /// 1 = Monday ... 7 = Sunday
    pub day_of_week: i16,

    /// Hours worked, between 0 and 24
    pub hours: Decimal,

    /// Hourly rate captured when the entry was written
    pub rate: Decimal,

    pub notes: Option<String>,

    /// Line item billing this entry, if any
    pub line_item_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TimeEntry {
    /// Calendar date the hours were worked.
    pub fn work_date(&self) -> NaiveDate {
        ledger::entry_date(self.week_start, self.day_of_week)
    }

    /// Billable amount at the entry's own rate, rounded to cents.
    pub fn amount(&self) -> Result<Decimal, BillingError> {
        rate::line_amount(self.hours, self.rate)
    }

    pub fn is_billed(&self) -> bool {
        self.line_item_id.is_some()
    }
}

/// Hours cell submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryInput {
    pub client_id: Uuid,
    pub week_start: NaiveDate,
    pub day_of_week: i16,
    pub hours: Decimal,
    /// Explicit rate; the client's default applies when absent
    pub rate_override: Option<Decimal>,
    pub notes: Option<String>,
}

/// One day of a bulk week save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeekCell {
    pub day_of_week: i16,
    pub hours: Decimal,
    pub rate_override: Option<Decimal>,
    pub notes: Option<String>,
}

/// Unique key of a time entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub client_id: Uuid,
    pub week_start: NaiveDate,
    pub day_of_week: i16,
}

/// Validated values written to a ledger cell.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryWrite {
    pub hours: Decimal,
    pub rate: Decimal,
    pub notes: Option<String>,
}
