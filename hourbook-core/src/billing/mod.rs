//! Billing aggregation engine.
//!
//! Pure rules live in the submodules and never touch storage:
//!
//! - [`rate`]: hourly rate resolution and money rounding
//! - [`ledger`]: ledger cell validation, calendar helpers, weekly totals
//! - [`selector`]: unbilled-time selection over a date window
//! - [`materializer`]: invoice planning and invoice numbering
//! - [`lifecycle`]: invoice status graph
//!
//! [`BillingEngine`] validates input with those rules and drives a
//! [`BillingStore`] for everything that needs persisted state.

pub mod ledger;
pub mod lifecycle;
pub mod materializer;
pub mod rate;
pub mod selector;

#[cfg(test)]
mod tests;

use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::BillingError;
use crate::models::{
    Client, ClientUpdate, EntryInput, EntryKey, EntryWrite, Invoice, InvoiceDetail,
    InvoiceLineItem, InvoiceStatus, NewClient, NewInvoice, TimeEntry, WeekCell,
};
use crate::store::BillingStore;

use ledger::{DayTotals, WeekSummary};
use selector::UnbilledSelection;

/// Entry point for every billing operation.
///
/// Cloning shares the underlying store.
#[derive(Clone)]
pub struct BillingEngine {
    store: Arc<dyn BillingStore>,
}

impl BillingEngine {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    pub async fn ping(&self) -> Result<(), BillingError> {
        self.store.ping().await
    }

    // Clients

    pub async fn create_client(&self, client: NewClient) -> Result<Client, BillingError> {
        let client = client.validate()?;
        self.store.insert_client(&client).await
    }

    pub async fn update_client(
        &self,
        client_id: Uuid,
        update: ClientUpdate,
    ) -> Result<Client, BillingError> {
        let update = update.validate()?;
        self.store.update_client(client_id, &update).await
    }

    /// Soft-deactivates a client. Its history stays intact.
    pub async fn deactivate_client(&self, client_id: Uuid) -> Result<Client, BillingError> {
        self.store
            .update_client(client_id, &ClientUpdate::deactivate())
            .await
    }

    pub async fn get_client(&self, client_id: Uuid) -> Result<Client, BillingError> {
        self.store
            .get_client(client_id)
            .await?
            .ok_or(BillingError::ClientNotFound(client_id))
    }

    pub async fn list_clients(&self, active_only: bool) -> Result<Vec<Client>, BillingError> {
        self.store.list_clients(active_only).await
    }

    async fn active_client(&self, client_id: Uuid) -> Result<Client, BillingError> {
        let client = self.get_client(client_id).await?;
        if !client.active {
            return Err(BillingError::ClientInactive(client.id));
        }
        Ok(client)
    }

    // Time ledger

    /// Records hours for one client on one day, overwriting an unbilled cell.
    ///
    /// Cell bounds are checked before the store is touched. The rate is
    /// resolved against the client's current default and captured on the
    /// entry.
    ///
    /// # Arguments
    ///
    /// * `input` - Client, week start, day, hours and an optional rate override
    ///
    /// # Returns
    ///
    /// The entry as stored, with its captured rate.
    ///
    /// # Errors
    ///
    /// Validation errors for a bad cell or rate, `ClientNotFound` or
    /// `ClientInactive` for the client, and `EntryAlreadyBilled` when the cell
    /// is already on an invoice.
    pub async fn upsert_entry(&self, input: EntryInput) -> Result<TimeEntry, BillingError> {
        ledger::validate_cell(input.week_start, input.day_of_week, input.hours)?;

        let client = self.active_client(input.client_id).await?;
        let rate = rate::resolve_rate(&client, input.rate_override)?;

        let key = EntryKey {
            client_id: client.id,
            week_start: input.week_start,
            day_of_week: input.day_of_week,
        };
        let write = EntryWrite {
            hours: input.hours,
            rate,
            notes: clean_notes(input.notes),
        };
        self.store.upsert_entry(key, &write).await
    }

    /// Records several days of one client's week in a single all-or-nothing
    /// write.
    ///
    /// # Arguments
    ///
    /// * `client_id` - Client the hours are billed to
    /// * `week_start` - Monday of the week
    /// * `cells` - At most one cell per day of the week
    ///
    /// # Returns
    ///
    /// The written entries in the order the cells were given.
    ///
    /// # Errors
    ///
    /// Every cell is validated before the store is touched; a repeated day is
    /// rejected as [`BillingError::InvalidDay`]. When any cell is already
    /// billed the store fails with `EntryAlreadyBilled` and writes nothing.
    pub async fn save_week(
        &self,
        client_id: Uuid,
        week_start: NaiveDate,
        cells: Vec<WeekCell>,
    ) -> Result<Vec<TimeEntry>, BillingError> {
        ledger::ensure_week_start(week_start)?;
        let mut days = HashSet::new();
        for cell in &cells {
            ledger::validate_cell(week_start, cell.day_of_week, cell.hours)?;
            if !days.insert(cell.day_of_week) {
                return Err(BillingError::InvalidDay(cell.day_of_week));
            }
        }

        let client = self.active_client(client_id).await?;
        let writes = cells
            .into_iter()
            .map(|cell| {
                let key = EntryKey {
                    client_id: client.id,
                    week_start,
                    day_of_week: cell.day_of_week,
                };
                let write = EntryWrite {
                    hours: cell.hours,
                    rate: rate::resolve_rate(&client, cell.rate_override)?,
                    notes: clean_notes(cell.notes),
                };
                Ok((key, write))
            })
            .collect::<Result<Vec<_>, BillingError>>()?;

        if writes.is_empty() {
            return Ok(Vec::new());
        }
        self.store.upsert_entries(&writes).await
    }

    pub async fn delete_entry(&self, entry_id: Uuid) -> Result<(), BillingError> {
        self.store.delete_entry(entry_id).await
    }

    /// Raw cells of one client's week.
    pub async fn week_entries(
        &self,
        client_id: Uuid,
        week_start: NaiveDate,
    ) -> Result<Vec<TimeEntry>, BillingError> {
        ledger::ensure_week_start(week_start)?;
        self.get_client(client_id).await?;
        self.store.week_entries(Some(client_id), week_start).await
    }

    /// Hours per weekday for one client, Monday first.
    pub async fn weekly_totals(
        &self,
        client_id: Uuid,
        week_start: NaiveDate,
    ) -> Result<DayTotals, BillingError> {
        let entries = self.week_entries(client_id, week_start).await?;
        Ok(ledger::day_totals(&entries))
    }

    pub async fn weekly_total_across_clients(
        &self,
        week_start: NaiveDate,
    ) -> Result<WeekSummary, BillingError> {
        ledger::ensure_week_start(week_start)?;
        let clients = self.store.list_clients(false).await?;
        let entries = self.store.week_entries(None, week_start).await?;
        Ok(ledger::summarize_week(week_start, &clients, &entries))
    }

    // Selection and invoicing

    /// Unbilled entries of a client dated inside `[start, end]`.
    ///
    /// # Arguments
    ///
    /// * `client_id` - Client whose ledger is read
    /// * `start` - First day of the window, inclusive
    /// * `end` - Last day of the window, inclusive
    ///
    /// # Returns
    ///
    /// The entries ordered by work date, with hours and amount totals.
    /// Selecting writes nothing, so repeating it gives the same result.
    ///
    /// # Errors
    ///
    /// `InvalidRange` when `start` is after `end`, `ClientNotFound` for an
    /// unknown client.
    pub async fn select_unbilled(
        &self,
        client_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<UnbilledSelection, BillingError> {
        selector::validate_range(start, end)?;
        self.get_client(client_id).await?;

        let (first_week, last_week) = selector::candidate_weeks(start, end);
        let candidates = self
            .store
            .entries_between(client_id, first_week, last_week)
            .await?;
        selector::select_unbilled(candidates, start, end)
    }

    /// Materializes an invoice from previously selected entries and manual
    /// lines.
    ///
    /// # Arguments
    ///
    /// * `request` - Client, invoice date, entry ids and manual lines
    ///
    /// # Returns
    ///
    /// The new draft invoice with its allocated number and snapshotted totals.
    ///
    /// # Errors
    ///
    /// Fails with [`BillingError::StaleSelection`] when any entry has been
    /// billed or deleted since it was selected; nothing is written then.
    /// Amounts or a due date that cannot be stored are validation errors.
    pub async fn create_invoice(&self, request: NewInvoice) -> Result<Invoice, BillingError> {
        Ok(self.create_invoice_detail(request).await?.invoice)
    }

    /// Like [`BillingEngine::create_invoice`], also returning the new lines.
    pub async fn create_invoice_detail(
        &self,
        request: NewInvoice,
    ) -> Result<InvoiceDetail, BillingError> {
        let request = materializer::prepare_request(request)?;
        let (invoice, lines) = self.store.materialize_invoice(&request).await?;
        Ok(InvoiceDetail { invoice, lines })
    }

    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Invoice, BillingError> {
        self.store
            .get_invoice(invoice_id)
            .await?
            .ok_or(BillingError::InvoiceNotFound(invoice_id))
    }

    pub async fn invoice_detail(&self, invoice_id: Uuid) -> Result<InvoiceDetail, BillingError> {
        let invoice = self.get_invoice(invoice_id).await?;
        let lines = self.store.invoice_lines(invoice_id).await?;
        Ok(InvoiceDetail { invoice, lines })
    }

    pub async fn invoice_lines(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceLineItem>, BillingError> {
        self.get_invoice(invoice_id).await?;
        self.store.invoice_lines(invoice_id).await
    }

    pub async fn list_invoices(
        &self,
        client_id: Option<Uuid>,
    ) -> Result<Vec<Invoice>, BillingError> {
        self.store.list_invoices(client_id).await
    }

    /// Moves an invoice along its status graph.
    ///
    /// # Errors
    ///
    /// `InvoiceNotFound` for an unknown id and `InvalidTransition` when the
    /// graph has no edge from the current status to `status`.
    pub async fn update_status(
        &self,
        invoice_id: Uuid,
        status: InvoiceStatus,
    ) -> Result<Invoice, BillingError> {
        self.store.update_status(invoice_id, status).await
    }

    /// Deletes a non-paid invoice; its time entries become unbilled again.
    ///
    /// # Errors
    ///
    /// [`BillingError::CannotDeletePaidInvoice`] for a paid invoice.
    pub async fn delete_invoice(&self, invoice_id: Uuid) -> Result<Invoice, BillingError> {
        self.store.delete_invoice(invoice_id).await
    }
}

fn clean_notes(notes: Option<String>) -> Option<String> {
    notes
        .map(|notes| notes.trim().to_string())
        .filter(|notes| !notes.is_empty())
}
