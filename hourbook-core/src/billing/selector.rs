use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::billing::{ledger, rate};
use crate::error::BillingError;
use crate::models::TimeEntry;

/// An unbilled entry together with its date and billable amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedEntry {
    #[serde(flatten)]
    pub entry: TimeEntry,
    pub work_date: NaiveDate,
    pub amount: Decimal,
}

/// Unbilled time inside a billing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnbilledSelection {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub entries: Vec<SelectedEntry>,
    pub total_hours: Decimal,
    pub total_amount: Decimal,
}

impl UnbilledSelection {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry_ids(&self) -> Vec<uuid::Uuid> {
        self.entries.iter().map(|s| s.entry.id).collect()
    }
}

pub fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<(), BillingError> {
    if start > end {
        return Err(BillingError::InvalidRange { start, end });
    }
    Ok(())
}

/// Week-start bounds a store can use to prefetch candidate rows.
///
/// Any entry dated inside `[start, end]` has its week start inside the
/// returned range, so stores may over-fetch and leave the exact filtering to
/// [`select_unbilled`].
pub fn candidate_weeks(start: NaiveDate, end: NaiveDate) -> (NaiveDate, NaiveDate) {
    (ledger::week_start_of(start), ledger::week_start_of(end))
}

/// Filters candidate rows down to the unbilled entries dated inside the
/// inclusive window, ordered by date then creation sequence.
///
/// Amounts use each entry's captured rate, never the client's current default.
pub fn select_unbilled(
    candidates: impl IntoIterator<Item = TimeEntry>,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<UnbilledSelection, BillingError> {
    validate_range(start, end)?;

    let mut entries = Vec::new();
    for entry in candidates.into_iter().filter(|entry| !entry.is_billed()) {
        let work_date = entry.work_date();
        if start <= work_date && work_date <= end {
            entries.push(SelectedEntry {
                amount: entry.amount()?,
                work_date,
                entry,
            });
        }
    }
    entries.sort_by(|a, b| a.work_date.cmp(&b.work_date).then(a.entry.seq.cmp(&b.entry.seq)));

    let total_hours = rate::checked_total(
        entries.iter().map(|s| s.entry.hours),
        Decimal::MAX,
        "unbilled hours",
    )?;
    let total_amount = rate::checked_total(
        entries.iter().map(|s| s.amount),
        Decimal::MAX,
        "unbilled amount",
    )?;

    Ok(UnbilledSelection {
        start_date: start,
        end_date: end,
        entries,
        total_hours,
        total_amount,
    })
}
