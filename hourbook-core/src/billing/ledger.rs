//! Time ledger rules: cell validation, calendar helpers and weekly aggregation.

use chrono::{Datelike, Days, Duration, NaiveDate, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::billing::rate;
use crate::error::BillingError;
use crate::models::{Client, TimeEntry};

pub const DAYS_PER_WEEK: usize = 7;

/// Hours per weekday, Monday first.
pub type DayTotals = [Decimal; DAYS_PER_WEEK];

pub fn max_hours_per_day() -> Decimal {
    Decimal::from(24)
}

/// Checks a ledger cell before anything is written.
///
/// Hours must lie in `0..=24` with at most two decimal places, the
/// precision the ledger stores.
pub fn validate_cell(
    week_start: NaiveDate,
    day_of_week: i16,
    hours: Decimal,
) -> Result<(), BillingError> {
    ensure_week_start(week_start)?;
    if !(1..=7).contains(&day_of_week) {
        return Err(BillingError::InvalidDay(day_of_week));
    }
    if hours < Decimal::ZERO || hours > max_hours_per_day() || !rate::fits_money_scale(hours) {
        return Err(BillingError::InvalidHours(hours));
    }
    Ok(())
}

/// A week start must be a Monday whose Sunday is still a representable date.
pub fn ensure_week_start(week_start: NaiveDate) -> Result<(), BillingError> {
    let has_sunday = week_start.checked_add_days(Days::new(6)).is_some();
    if week_start.weekday() != Weekday::Mon || !has_sunday {
        return Err(BillingError::InvalidWeekStart(week_start));
    }
    Ok(())
}

/// Calendar date of `day_of_week` (1 = Monday) in the week starting `week_start`.
pub fn entry_date(week_start: NaiveDate, day_of_week: i16) -> NaiveDate {
    week_start + Duration::days(i64::from(day_of_week) - 1)
}

/// Monday of the ISO week containing `date`, clamped to the earliest
/// representable date.
pub fn week_start_of(date: NaiveDate) -> NaiveDate {
    date.checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
        .unwrap_or(NaiveDate::MIN)
}

pub fn week_dates(week_start: NaiveDate) -> [NaiveDate; DAYS_PER_WEEK] {
    std::array::from_fn(|offset| week_start + Duration::days(offset as i64))
}

/// Sums hours per weekday. Entries from other weeks are the caller's problem.
pub fn day_totals<'a>(entries: impl IntoIterator<Item = &'a TimeEntry>) -> DayTotals {
    let mut days = [Decimal::ZERO; DAYS_PER_WEEK];
    for entry in entries {
        if let Some(slot) = usize::try_from(entry.day_of_week - 1)
            .ok()
            .and_then(|index| days.get_mut(index))
        {
            *slot += entry.hours;
        }
    }
    days
}

/// One client's row in the weekly grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientWeek {
    pub client_id: Uuid,
    pub client_name: String,
    pub days: DayTotals,
    pub total: Decimal,
}

/// Weekly hours across every client, for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekSummary {
    pub week_start: NaiveDate,
    pub clients: Vec<ClientWeek>,
    pub per_day: DayTotals,
    pub grand_total: Decimal,
}

/// Builds the weekly grid.
///
/// Every active client gets a row, even with no hours; inactive clients only
/// appear when they still have time recorded that week. Rows are ordered by
/// client name.
pub fn summarize_week(
    week_start: NaiveDate,
    clients: &[Client],
    entries: &[TimeEntry],
) -> WeekSummary {
    let mut by_client: HashMap<Uuid, Vec<&TimeEntry>> = HashMap::new();
    for entry in entries.iter().filter(|e| e.week_start == week_start) {
        by_client.entry(entry.client_id).or_default().push(entry);
    }

    let mut ordered: Vec<&Client> = clients
        .iter()
        .filter(|c| c.active || by_client.contains_key(&c.id))
        .collect();
    ordered.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

    let mut rows = Vec::with_capacity(ordered.len());
    let mut per_day = [Decimal::ZERO; DAYS_PER_WEEK];

    for client in ordered {
        let days = day_totals(by_client.get(&client.id).into_iter().flatten().copied());
        for (total, hours) in per_day.iter_mut().zip(days.iter()) {
            *total += *hours;
        }
        rows.push(ClientWeek {
            client_id: client.id,
            client_name: client.name.clone(),
            total: days.iter().copied().sum(),
            days,
        });
    }

    WeekSummary {
        week_start,
        grand_total: per_day.iter().copied().sum(),
        clients: rows,
        per_day,
    }
}
