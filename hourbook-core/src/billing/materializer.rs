//! Invoice materialization: turning a selected entry set into an invoice plan.
//!
//! Stores call [`plan_invoice`] *inside* their transaction, after re-reading
//! the requested entries under lock, so the plan always reflects the state
//! that is about to be committed.

use chrono::{Datelike, Days, NaiveDate};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::billing::rate;
use crate::error::BillingError;
use crate::models::{Client, ManualLine, NewInvoice, TimeEntry};

/// How many consecutive sequence values are tried before giving up on
/// allocating an invoice number.
pub const MAX_NUMBER_ATTEMPTS: u32 = 16;

/// Largest hours value a line item's `NUMERIC(8,2)` column holds.
pub fn max_line_hours() -> Decimal {
    Decimal::new(99_999_999, rate::MONEY_SCALE)
}

/// Largest total an invoice's `NUMERIC(10,2)` hours column holds.
pub fn max_invoice_hours() -> Decimal {
    Decimal::new(9_999_999_999, rate::MONEY_SCALE)
}

/// A line ready to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedLine {
    pub time_entry_id: Option<Uuid>,
    pub description: String,
    pub hours: Decimal,
    pub rate: Decimal,
    pub amount: Decimal,
}

/// Everything needed to insert an invoice and its lines.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoicePlan {
    pub client_id: Uuid,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub total_hours: Decimal,
    pub total_amount: Decimal,
    pub notes: Option<String>,
    pub lines: Vec<PlannedLine>,
}

impl InvoicePlan {
    pub fn billed_entry_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.lines.iter().filter_map(|line| line.time_entry_id)
    }
}

/// Normalizes a creation request before any store access.
///
/// Duplicate entry ids collapse to their first occurrence; manual lines are
/// trimmed and bounds-checked.
pub fn prepare_request(mut request: NewInvoice) -> Result<NewInvoice, BillingError> {
    let mut seen = HashSet::new();
    request.entry_ids.retain(|id| seen.insert(*id));

    for line in &mut request.manual_lines {
        line.description = line.description.trim().to_string();
        validate_manual_line(line)?;
    }

    if request.entry_ids.is_empty() && request.manual_lines.is_empty() {
        return Err(BillingError::EmptyInvoice);
    }

    request.notes = request
        .notes
        .map(|notes| notes.trim().to_string())
        .filter(|notes| !notes.is_empty());

    Ok(request)
}

fn validate_manual_line(line: &ManualLine) -> Result<(), BillingError> {
    if line.description.is_empty() {
        return Err(BillingError::InvalidLine(
            "manual line needs a description".to_string(),
        ));
    }
    if line.hours < Decimal::ZERO
        || line.hours > max_line_hours()
        || !rate::fits_money_scale(line.hours)
    {
        return Err(BillingError::InvalidHours(line.hours));
    }
    rate::validate_rate(line.rate)?;
    Ok(())
}

/// Builds the invoice plan from freshly re-fetched entries.
///
/// Every requested entry must be present in `fetched`, belong to the client
/// and still be unbilled. Missing or billed entries are reported together as
/// [`BillingError::StaleSelection`]: the caller's selection no longer matches
/// the ledger and must be redone.
pub fn plan_invoice(
    client: &Client,
    request: &NewInvoice,
    fetched: &[TimeEntry],
) -> Result<InvoicePlan, BillingError> {
    let by_id: HashMap<Uuid, &TimeEntry> = fetched.iter().map(|e| (e.id, e)).collect();

    let mut stale = Vec::new();
    let mut entries = Vec::with_capacity(request.entry_ids.len());
    for id in &request.entry_ids {
        match by_id.get(id) {
            Some(entry) if entry.client_id != client.id => {
                return Err(BillingError::EntryNotOwned {
                    entry_id: *id,
                    client_id: client.id,
                });
            }
            Some(entry) if entry.is_billed() => stale.push(*id),
            Some(entry) => entries.push(*entry),
            None => stale.push(*id),
        }
    }
    if !stale.is_empty() {
        return Err(BillingError::StaleSelection(stale));
    }

    entries.sort_by(|a, b| a.work_date().cmp(&b.work_date()).then(a.seq.cmp(&b.seq)));

    let mut lines = Vec::with_capacity(entries.len() + request.manual_lines.len());
    for entry in entries {
        lines.push(PlannedLine {
            time_entry_id: Some(entry.id),
            description: entry_description(entry),
            hours: entry.hours,
            rate: entry.rate,
            amount: entry.amount()?,
        });
    }
    for line in &request.manual_lines {
        lines.push(PlannedLine {
            time_entry_id: None,
            description: line.description.clone(),
            hours: line.hours,
            rate: line.rate,
            amount: rate::line_amount(line.hours, line.rate)?,
        });
    }

    let total_hours = rate::checked_total(
        lines.iter().map(|line| line.hours),
        max_invoice_hours(),
        "invoice hours",
    )?;
    let total_amount = rate::round_money(rate::checked_total(
        lines.iter().map(|line| line.amount),
        rate::max_amount(),
        "invoice total",
    )?);

    Ok(InvoicePlan {
        client_id: client.id,
        invoice_date: request.invoice_date,
        due_date: due_date(request.invoice_date, client.payment_terms)?,
        total_hours,
        total_amount,
        notes: request.notes.clone(),
        lines,
    })
}

/// `invoice_date` plus the client's payment terms; negative terms count as zero.
///
/// # Errors
///
/// [`BillingError::DueDateOutOfRange`] when the sum is past the last
/// representable date.
pub fn due_date(invoice_date: NaiveDate, payment_terms: i32) -> Result<NaiveDate, BillingError> {
    let days = u64::try_from(payment_terms).unwrap_or(0);
    invoice_date
        .checked_add_days(Days::new(days))
        .ok_or(BillingError::DueDateOutOfRange {
            invoice_date,
            payment_terms,
        })
}

fn entry_description(entry: &TimeEntry) -> String {
    match entry.notes.as_deref().map(str::trim) {
        Some(notes) if !notes.is_empty() => notes.to_string(),
        _ => format!("Services rendered {}", entry.work_date().format("%Y-%m-%d")),
    }
}

/// `INV-<year>-<sequence>` with the sequence zero-padded to four digits.
pub fn format_invoice_number(invoice_date: NaiveDate, sequence: u32) -> String {
    format!("INV-{}-{:04}", invoice_date.year(), sequence)
}

/// Prefix shared by every invoice number of the invoice date's year.
pub fn invoice_number_prefix(invoice_date: NaiveDate) -> String {
    format!("INV-{}-", invoice_date.year())
}

/// Sequence part of an invoice number issued in the same year as `invoice_date`.
pub fn parse_invoice_sequence(number: &str, invoice_date: NaiveDate) -> Option<u32> {
    number
        .strip_prefix(&invoice_number_prefix(invoice_date))
        .and_then(|seq| seq.parse().ok())
}

/// First sequence value to try: one past the highest already issued this year.
pub fn next_invoice_sequence<'a>(
    existing: impl IntoIterator<Item = &'a str>,
    invoice_date: NaiveDate,
) -> u32 {
    existing
        .into_iter()
        .filter_map(|number| parse_invoice_sequence(number, invoice_date))
        .max()
        .map_or(1, |max| max.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn acme() -> Client {
        let now = Utc::now();
        Client {
            id: Uuid::new_v4(),
            name: "Acme".to_string(),
            default_rate: dec!(150),
            payment_terms: 30,
            active: true,
            contact_name: None,
            contact_email: None,
            contact_phone: None,
            billing_address: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn entry(client_id: Uuid, seq: i64, day: i16, hours: Decimal) -> TimeEntry {
        let now = Utc::now();
        TimeEntry {
            id: Uuid::new_v4(),
            seq,
            client_id,
            week_start: date(2024, 12, 9),
            day_of_week: day,
            hours,
            rate: dec!(150),
            notes: None,
            line_item_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn request(client: &Client, entry_ids: Vec<Uuid>) -> NewInvoice {
        NewInvoice {
            client_id: client.id,
            invoice_date: date(2024, 12, 16),
            entry_ids,
            manual_lines: Vec::new(),
            notes: None,
        }
    }

    #[test]
    fn test_plan_orders_lines_and_snapshots_totals() {
        let client = acme();
        let tue = entry(client.id, 2, 2, dec!(6.5));
        let mon = entry(client.id, 1, 1, dec!(8));
        let mut req = request(&client, vec![tue.id, mon.id]);
        req.manual_lines.push(ManualLine {
            description: "Setup fee".to_string(),
            hours: dec!(1),
            rate: dec!(50),
        });

        let plan = plan_invoice(&client, &req, &[tue.clone(), mon.clone()]).unwrap();

        assert_eq!(plan.lines.len(), 3);
        assert_eq!(plan.lines[0].time_entry_id, Some(mon.id));
        assert_eq!(plan.lines[0].description, "Services rendered 2024-12-09");
        assert_eq!(plan.lines[1].time_entry_id, Some(tue.id));
        assert_eq!(plan.lines[2].time_entry_id, None);
        assert_eq!(plan.total_hours, dec!(15.5));
        assert_eq!(plan.total_amount, dec!(2225.00));
        assert_eq!(plan.due_date, date(2025, 1, 15));
        assert_eq!(plan.billed_entry_ids().count(), 2);
    }

    #[test]
    fn test_plan_reports_every_stale_entry() {
        let client = acme();
        let mut billed = entry(client.id, 1, 1, dec!(8));
        billed.line_item_id = Some(Uuid::new_v4());
        let fresh = entry(client.id, 2, 2, dec!(2));
        let missing = Uuid::new_v4();
        let req = request(&client, vec![billed.id, fresh.id, missing]);

        match plan_invoice(&client, &req, &[billed.clone(), fresh]) {
            Err(BillingError::StaleSelection(ids)) => assert_eq!(ids, vec![billed.id, missing]),
            other => panic!("expected stale selection, got {other:?}"),
        }
    }

    #[test]
    fn test_plan_rejects_foreign_entries() {
        let client = acme();
        let foreign = entry(Uuid::new_v4(), 1, 1, dec!(3));
        let req = request(&client, vec![foreign.id]);

        assert!(matches!(
            plan_invoice(&client, &req, &[foreign]),
            Err(BillingError::EntryNotOwned { .. })
        ));
    }

    #[test]
    fn test_prepare_request_normalizes_input() {
        let client = acme();
        let id = Uuid::new_v4();
        let mut req = request(&client, vec![id, id]);
        req.notes = Some("   ".to_string());

        let req = prepare_request(req).unwrap();

        assert_eq!(req.entry_ids, vec![id]);
        assert_eq!(req.notes, None);
    }

    #[test]
    fn test_prepare_request_rejects_empty_and_bad_lines() {
        let client = acme();
        assert!(matches!(
            prepare_request(request(&client, Vec::new())),
            Err(BillingError::EmptyInvoice)
        ));

        let mut req = request(&client, Vec::new());
        req.manual_lines.push(ManualLine {
            description: "  ".to_string(),
            hours: dec!(1),
            rate: dec!(1),
        });
        assert!(matches!(prepare_request(req), Err(BillingError::InvalidLine(_))));

        let mut req = request(&client, Vec::new());
        req.manual_lines.push(ManualLine {
            description: "Discount".to_string(),
            hours: dec!(1),
            rate: dec!(-10),
        });
        assert!(matches!(prepare_request(req), Err(BillingError::InvalidRate(_))));
    }

    #[test]
    fn test_due_date_overflow_is_an_error() {
        let mut client = acme();
        client.payment_terms = 100_000_000;
        let mon = entry(client.id, 1, 1, dec!(8));
        let req = request(&client, vec![mon.id]);

        assert!(matches!(
            plan_invoice(&client, &req, &[mon]),
            Err(BillingError::DueDateOutOfRange { payment_terms: 100_000_000, .. })
        ));
        assert!(matches!(
            due_date(NaiveDate::MAX, 1),
            Err(BillingError::DueDateOutOfRange { .. })
        ));
        assert_eq!(due_date(date(2024, 12, 16), -3).unwrap(), date(2024, 12, 16));
    }

    #[test]
    fn test_manual_lines_must_fit_line_columns() {
        let client = acme();
        let huge = Decimal::from_i128_with_scale(100_000_000_000_000_000_000, 0);
        let line = |hours: Decimal, rate: Decimal| {
            let mut req = request(&client, Vec::new());
            req.manual_lines.push(ManualLine {
                description: "Consulting".to_string(),
                hours,
                rate,
            });
            req
        };

        assert!(matches!(
            prepare_request(line(huge, huge)),
            Err(BillingError::InvalidHours(_))
        ));
        assert!(matches!(
            prepare_request(line(dec!(1), huge)),
            Err(BillingError::InvalidRate(_))
        ));
        assert!(matches!(
            prepare_request(line(dec!(1.005), dec!(10))),
            Err(BillingError::InvalidHours(_))
        ));

        // Each factor fits its column but the product does not.
        let req = prepare_request(line(max_line_hours(), rate::max_rate())).unwrap();
        assert!(matches!(
            plan_invoice(&client, &req, &[]),
            Err(BillingError::AmountOutOfRange(_))
        ));
    }

    #[test]
    fn test_invoice_total_must_fit_total_column() {
        let client = acme();
        let mut req = request(&client, Vec::new());
        for _ in 0..2 {
            req.manual_lines.push(ManualLine {
                description: "Milestone".to_string(),
                hours: dec!(100000),
                rate: dec!(9000000),
            });
        }

        assert!(matches!(
            plan_invoice(&client, &req, &[]),
            Err(BillingError::AmountOutOfRange(what)) if what == "invoice total"
        ));
    }

    #[test]
    fn test_invoice_numbers() {
        let day = date(2024, 12, 16);
        assert_eq!(format_invoice_number(day, 7), "INV-2024-0007");
        assert_eq!(parse_invoice_sequence("INV-2024-0042", day), Some(42));
        assert_eq!(parse_invoice_sequence("INV-2023-0042", day), None);
        assert_eq!(
            next_invoice_sequence(["INV-2024-0001", "INV-2024-0009", "INV-2023-0100"], day),
            10
        );
        assert_eq!(next_invoice_sequence(std::iter::empty(), day), 1);
    }
}
