use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

use crate::billing::BillingEngine;
use crate::error::BillingError;
use crate::models::{
    Client, ClientUpdate, EntryInput, InvoiceStatus, ManualLine, NewClient, NewInvoice, TimeEntry,
    WeekCell,
};
use crate::store::{BillingStore, MemoryStore};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn engine() -> BillingEngine {
    BillingEngine::new(Arc::new(MemoryStore::new()))
}

async fn acme(engine: &BillingEngine) -> Client {
    engine
        .create_client(NewClient::new("Acme", dec!(150)))
        .await
        .expect("client should be created")
}

fn hours(client: &Client, day: i16, hours: Decimal) -> EntryInput {
    EntryInput {
        client_id: client.id,
        week_start: date(2024, 12, 9),
        day_of_week: day,
        hours,
        rate_override: None,
        notes: None,
    }
}

fn invoice(client: &Client, entry_ids: Vec<Uuid>) -> NewInvoice {
    NewInvoice {
        client_id: client.id,
        invoice_date: date(2024, 12, 16),
        entry_ids,
        manual_lines: Vec::new(),
        notes: None,
    }
}

/// Records Monday and Tuesday for Acme in the week of 2024-12-09.
async fn acme_week(engine: &BillingEngine) -> (Client, TimeEntry, TimeEntry) {
    let client = acme(engine).await;
    let mon = engine.upsert_entry(hours(&client, 1, dec!(8))).await.unwrap();
    let tue = engine.upsert_entry(hours(&client, 2, dec!(6.5))).await.unwrap();
    (client, mon, tue)
}

fn cell(day: i16, hours: Decimal) -> WeekCell {
    WeekCell {
        day_of_week: day,
        hours,
        rate_override: None,
        notes: None,
    }
}

/// Test the full select-then-invoice flow.
///
/// This test verifies that:
/// 1. The week's unbilled time is selected with the entry rates
/// 2. The invoice snapshots the selection's totals and gets one line per entry
/// 3. Selecting the same window again finds nothing
#[tokio::test]
async fn test_select_and_invoice_week() {
    let engine = engine();
    let (client, mon, tue) = acme_week(&engine).await;

    let selection = engine
        .select_unbilled(client.id, date(2024, 12, 9), date(2024, 12, 15))
        .await
        .unwrap();
    assert_eq!(selection.entry_ids(), vec![mon.id, tue.id]);
    assert_eq!(selection.total_hours, dec!(14.5));
    assert_eq!(selection.total_amount, dec!(2175.00));

    let detail = engine
        .create_invoice_detail(invoice(&client, selection.entry_ids()))
        .await
        .unwrap();
    assert_eq!(detail.invoice.invoice_number, "INV-2024-0001");
    assert_eq!(detail.invoice.status, InvoiceStatus::Draft);
    assert_eq!(detail.invoice.total_hours, selection.total_hours);
    assert_eq!(detail.invoice.total_amount, selection.total_amount);
    assert_eq!(detail.invoice.due_date, date(2025, 1, 15));
    assert_eq!(detail.lines.len(), 2);
    assert_eq!(detail.lines[0].amount, dec!(1200.00));
    assert_eq!(detail.lines[1].amount, dec!(975.00));

    let again = engine
        .select_unbilled(client.id, date(2024, 12, 9), date(2024, 12, 15))
        .await
        .unwrap();
    assert!(again.is_empty());
    assert_eq!(again.total_amount, Decimal::ZERO);
}

#[tokio::test]
async fn test_invoice_totals_ignore_later_rate_changes() {
    let engine = engine();
    let (client, mon, tue) = acme_week(&engine).await;

    engine
        .update_client(
            client.id,
            ClientUpdate {
                default_rate: Some(dec!(200)),
                ..ClientUpdate::default()
            },
        )
        .await
        .unwrap();

    let created = engine
        .create_invoice(invoice(&client, vec![mon.id, tue.id]))
        .await
        .unwrap();
    assert_eq!(created.total_amount, dec!(2175.00));
}

#[tokio::test]
async fn test_select_unbilled_is_idempotent() {
    let engine = engine();
    let (client, _, _) = acme_week(&engine).await;

    let first = engine
        .select_unbilled(client.id, date(2024, 12, 1), date(2024, 12, 31))
        .await
        .unwrap();
    let second = engine
        .select_unbilled(client.id, date(2024, 12, 1), date(2024, 12, 31))
        .await
        .unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_upsert_is_unique_per_cell() {
    let engine = engine();
    let client = acme(&engine).await;

    let first = engine.upsert_entry(hours(&client, 3, dec!(2))).await.unwrap();
    let mut overwrite = hours(&client, 3, dec!(5));
    overwrite.rate_override = Some(dec!(175));
    let second = engine.upsert_entry(overwrite).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.hours, dec!(5));
    assert_eq!(second.rate, dec!(175));
    let totals = engine.weekly_totals(client.id, date(2024, 12, 9)).await.unwrap();
    assert_eq!(totals[2], dec!(5));
    assert_eq!(totals.iter().copied().sum::<Decimal>(), dec!(5));
}

#[tokio::test]
async fn test_upsert_validates_before_store_access() {
    let engine = engine();
    let unknown = Uuid::new_v4();

    let mut bad_day = EntryInput {
        client_id: unknown,
        week_start: date(2024, 12, 9),
        day_of_week: 8,
        hours: dec!(1),
        rate_override: None,
        notes: None,
    };
    assert!(matches!(
        engine.upsert_entry(bad_day.clone()).await,
        Err(BillingError::InvalidDay(8))
    ));

    bad_day.day_of_week = 1;
    bad_day.week_start = date(2024, 12, 10);
    assert!(matches!(
        engine.upsert_entry(bad_day.clone()).await,
        Err(BillingError::InvalidWeekStart(_))
    ));

    bad_day.week_start = date(2024, 12, 9);
    assert!(matches!(
        engine.upsert_entry(bad_day).await,
        Err(BillingError::ClientNotFound(id)) if id == unknown
    ));
}

#[tokio::test]
async fn test_inactive_client_accepts_no_time() {
    let engine = engine();
    let (client, mon, _) = acme_week(&engine).await;

    engine.deactivate_client(client.id).await.unwrap();

    assert!(matches!(
        engine.upsert_entry(hours(&client, 4, dec!(1))).await,
        Err(BillingError::ClientInactive(_))
    ));
    // Existing time can still be invoiced.
    assert!(engine.create_invoice(invoice(&client, vec![mon.id])).await.is_ok());
}

#[tokio::test]
async fn test_billed_entries_are_frozen() {
    let engine = engine();
    let (client, mon, _) = acme_week(&engine).await;
    engine
        .create_invoice(invoice(&client, vec![mon.id]))
        .await
        .unwrap();

    let result = engine.upsert_entry(hours(&client, 1, dec!(1))).await;
    assert!(matches!(result, Err(BillingError::EntryAlreadyBilled(id)) if id == mon.id));
    assert!(matches!(
        engine.delete_entry(mon.id).await,
        Err(BillingError::EntryAlreadyBilled(_))
    ));
}

#[tokio::test]
async fn test_reinvoicing_billed_entries_is_stale() {
    let engine = engine();
    let (client, mon, tue) = acme_week(&engine).await;
    engine
        .create_invoice(invoice(&client, vec![mon.id]))
        .await
        .unwrap();

    let result = engine
        .create_invoice(invoice(&client, vec![mon.id, tue.id]))
        .await;

    assert!(matches!(result, Err(BillingError::StaleSelection(ids)) if ids == vec![mon.id]));
    // No partial write: Tuesday is still unbilled.
    let selection = engine
        .select_unbilled(client.id, date(2024, 12, 9), date(2024, 12, 15))
        .await
        .unwrap();
    assert_eq!(selection.entry_ids(), vec![tue.id]);
    assert_eq!(engine.list_invoices(Some(client.id)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_foreign_entries_are_rejected() {
    let engine = engine();
    let (_, mon, _) = acme_week(&engine).await;
    let other = engine
        .create_client(NewClient::new("Globex", dec!(90)))
        .await
        .unwrap();

    let result = engine.create_invoice(invoice(&other, vec![mon.id])).await;

    assert!(matches!(result, Err(BillingError::EntryNotOwned { .. })));
}

#[tokio::test]
async fn test_deleting_invoice_unbills_entries() {
    let engine = engine();
    let (client, mon, tue) = acme_week(&engine).await;
    let created = engine
        .create_invoice(invoice(&client, vec![mon.id, tue.id]))
        .await
        .unwrap();

    engine.delete_invoice(created.id).await.unwrap();

    let selection = engine
        .select_unbilled(client.id, date(2024, 12, 9), date(2024, 12, 15))
        .await
        .unwrap();
    assert_eq!(selection.entry_ids(), vec![mon.id, tue.id]);
    assert!(matches!(
        engine.invoice_detail(created.id).await,
        Err(BillingError::InvoiceNotFound(_))
    ));
}

#[tokio::test]
async fn test_status_lifecycle_and_paid_guard() {
    let engine = engine();
    let (client, mon, _) = acme_week(&engine).await;
    let created = engine
        .create_invoice(invoice(&client, vec![mon.id]))
        .await
        .unwrap();

    assert!(matches!(
        engine.update_status(created.id, InvoiceStatus::Paid).await,
        Err(BillingError::InvalidTransition { .. })
    ));

    engine.update_status(created.id, InvoiceStatus::Sent).await.unwrap();
    engine.update_status(created.id, InvoiceStatus::Overdue).await.unwrap();
    let paid = engine.update_status(created.id, InvoiceStatus::Paid).await.unwrap();
    assert_eq!(paid.status, InvoiceStatus::Paid);
    assert_eq!(paid.total_amount, created.total_amount);

    assert!(matches!(
        engine.delete_invoice(created.id).await,
        Err(BillingError::CannotDeletePaidInvoice(_))
    ));
    assert!(engine.get_invoice(created.id).await.is_ok());
}

#[tokio::test]
async fn test_manual_lines_follow_entry_lines() {
    let engine = engine();
    let (client, mon, _) = acme_week(&engine).await;
    let mut request = invoice(&client, vec![mon.id]);
    request.manual_lines.push(ManualLine {
        description: " Travel ".to_string(),
        hours: dec!(2),
        rate: dec!(40),
    });

    let detail = engine.create_invoice_detail(request).await.unwrap();

    assert_eq!(detail.lines.len(), 2);
    assert_eq!(detail.lines[1].time_entry_id, None);
    assert_eq!(detail.lines[1].description, "Travel");
    assert_eq!(detail.lines[1].line_number, 2);
    assert_eq!(detail.invoice.total_amount, dec!(1280.00));
}

#[tokio::test]
async fn test_invoice_numbers_are_sequential_per_year() {
    let engine = engine();
    let (client, mon, tue) = acme_week(&engine).await;

    let first = engine.create_invoice(invoice(&client, vec![mon.id])).await.unwrap();
    let second = engine.create_invoice(invoice(&client, vec![tue.id])).await.unwrap();
    let mut next_year = invoice(&client, Vec::new());
    next_year.invoice_date = date(2025, 1, 2);
    next_year.manual_lines.push(ManualLine {
        description: "Retainer".to_string(),
        hours: dec!(1),
        rate: dec!(500),
    });
    let third = engine.create_invoice(next_year).await.unwrap();

    assert_eq!(first.invoice_number, "INV-2024-0001");
    assert_eq!(second.invoice_number, "INV-2024-0002");
    assert_eq!(third.invoice_number, "INV-2025-0001");

    let listed: Vec<String> = engine
        .list_invoices(None)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.invoice_number)
        .collect();
    assert_eq!(listed, vec!["INV-2025-0001", "INV-2024-0002", "INV-2024-0001"]);
}

#[tokio::test]
async fn test_weekly_total_across_clients() {
    let engine = engine();
    let (acme, _, _) = acme_week(&engine).await;
    let idle = engine
        .create_client(NewClient::new("Bluth", dec!(80)))
        .await
        .unwrap();
    let gone = engine
        .create_client(NewClient::new("Contoso", dec!(120)))
        .await
        .unwrap();
    engine.upsert_entry(hours(&gone, 1, dec!(3))).await.unwrap();
    engine.deactivate_client(gone.id).await.unwrap();

    let summary = engine
        .weekly_total_across_clients(date(2024, 12, 9))
        .await
        .unwrap();

    let names: Vec<&str> = summary.clients.iter().map(|c| c.client_name.as_str()).collect();
    assert_eq!(names, vec!["Acme", "Bluth", "Contoso"]);
    assert_eq!(summary.clients[0].client_id, acme.id);
    assert_eq!(summary.clients[1].client_id, idle.id);
    assert_eq!(summary.clients[1].total, Decimal::ZERO);
    assert_eq!(summary.per_day[0], dec!(11));
    assert_eq!(summary.per_day[1], dec!(6.5));
    assert_eq!(summary.grand_total, dec!(17.5));
}

#[tokio::test]
async fn test_empty_and_bad_requests() {
    let engine = engine();
    let client = acme(&engine).await;

    assert!(matches!(
        engine.create_invoice(invoice(&client, Vec::new())).await,
        Err(BillingError::EmptyInvoice)
    ));
    assert!(matches!(
        engine
            .select_unbilled(client.id, date(2024, 12, 15), date(2024, 12, 9))
            .await,
        Err(BillingError::InvalidRange { .. })
    ));
    assert!(matches!(
        engine.weekly_totals(client.id, date(2024, 12, 11)).await,
        Err(BillingError::InvalidWeekStart(_))
    ));
}

/// Concurrent invoice requests for the same entries.
///
/// Exactly one request wins; every other one sees a stale selection and the
/// entries end up on a single invoice.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_invoicing_bills_once() {
    let engine = engine();
    let (client, mon, tue) = acme_week(&engine).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let request = invoice(&client, vec![mon.id, tue.id]);
        handles.push(tokio::spawn(async move { engine.create_invoice(request).await }));
    }

    let mut created = 0;
    let mut stale = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(BillingError::StaleSelection(_)) => stale += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(stale, 7);
    let invoices = engine.list_invoices(Some(client.id)).await.unwrap();
    assert_eq!(invoices.len(), 1);
    assert_eq!(engine.invoice_lines(invoices[0].id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_far_due_date_is_rejected_not_panicking() {
    assert!(matches!(
        engine()
            .create_client(NewClient::new("Acme", dec!(150)).with_payment_terms(100_000_000))
            .await,
        Err(BillingError::InvalidClient(_))
    ));

    // A record written around the engine's validation still cannot panic invoicing.
    let store = Arc::new(MemoryStore::new());
    let client = store
        .insert_client(&NewClient::new("Acme", dec!(150)).with_payment_terms(100_000_000))
        .await
        .unwrap();
    let engine = BillingEngine::new(store);
    let entry = engine.upsert_entry(hours(&client, 1, dec!(8))).await.unwrap();

    assert!(matches!(
        engine.create_invoice(invoice(&client, vec![entry.id])).await,
        Err(BillingError::DueDateOutOfRange { .. })
    ));
    assert!(engine.list_invoices(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_huge_amounts_are_rejected_not_panicking() {
    let engine = engine();
    let client = acme(&engine).await;
    let huge = Decimal::from_i128_with_scale(100_000_000_000_000_000_000, 0);

    let mut request = invoice(&client, Vec::new());
    request.manual_lines.push(ManualLine {
        description: "Consulting".to_string(),
        hours: huge,
        rate: huge,
    });
    assert!(matches!(
        engine.create_invoice(request).await,
        Err(BillingError::InvalidHours(_))
    ));

    let mut entry = hours(&client, 1, dec!(8));
    entry.rate_override = Some(huge);
    assert!(matches!(
        engine.upsert_entry(entry).await,
        Err(BillingError::InvalidRate(_))
    ));

    let update = ClientUpdate {
        default_rate: Some(huge),
        ..ClientUpdate::default()
    };
    assert!(matches!(
        engine.update_client(client.id, update).await,
        Err(BillingError::InvalidRate(_))
    ));
    assert!(engine.list_invoices(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_values_finer_than_cents_are_rejected() {
    let engine = engine();
    let client = acme(&engine).await;

    assert!(matches!(
        engine.upsert_entry(hours(&client, 1, dec!(7.125))).await,
        Err(BillingError::InvalidHours(_))
    ));
    let mut entry = hours(&client, 1, dec!(8));
    entry.rate_override = Some(dec!(99.995));
    assert!(matches!(
        engine.upsert_entry(entry).await,
        Err(BillingError::InvalidRate(_))
    ));
    assert!(engine
        .week_entries(client.id, date(2024, 12, 9))
        .await
        .unwrap()
        .is_empty());
}

/// Test saving a whole week at once.
///
/// This test verifies that:
/// 1. Every cell is written with the resolved rate
/// 2. A repeated day or a bad cell rejects the batch before any write
/// 3. A billed day rejects the batch and leaves the other days untouched
#[tokio::test]
async fn test_save_week_is_all_or_nothing() {
    let engine = engine();
    let client = acme(&engine).await;
    let week = date(2024, 12, 9);

    let mut review = cell(3, dec!(2.5));
    review.rate_override = Some(dec!(120));
    review.notes = Some("  Review  ".to_string());
    let written = engine
        .save_week(client.id, week, vec![cell(1, dec!(8)), review])
        .await
        .unwrap();
    assert_eq!(written.len(), 2);
    assert_eq!(written[0].rate, dec!(150));
    assert_eq!(written[1].rate, dec!(120));
    assert_eq!(written[1].notes.as_deref(), Some("Review"));

    assert!(matches!(
        engine
            .save_week(client.id, week, vec![cell(2, dec!(1)), cell(2, dec!(3))])
            .await,
        Err(BillingError::InvalidDay(2))
    ));
    assert!(matches!(
        engine
            .save_week(client.id, week, vec![cell(2, dec!(1)), cell(4, dec!(25))])
            .await,
        Err(BillingError::InvalidHours(_))
    ));
    assert!(matches!(
        engine.save_week(client.id, date(2024, 12, 10), Vec::new()).await,
        Err(BillingError::InvalidWeekStart(_))
    ));

    engine
        .create_invoice(invoice(&client, vec![written[0].id]))
        .await
        .unwrap();
    assert!(matches!(
        engine
            .save_week(client.id, week, vec![cell(2, dec!(4)), cell(1, dec!(1))])
            .await,
        Err(BillingError::EntryAlreadyBilled(id)) if id == written[0].id
    ));

    let totals = engine.weekly_totals(client.id, week).await.unwrap();
    assert_eq!(totals[0], dec!(8));
    assert_eq!(totals[1], Decimal::ZERO);
    assert_eq!(totals[2], dec!(2.5));
}
