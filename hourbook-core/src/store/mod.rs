//! Persistence seam for the billing engine.
//!
//! The engine never talks to a database directly; it goes through
//! [`BillingStore`]. Two implementations exist:
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`, with the uniqueness constraints and
//!   row locks that make invoice materialization race-free across processes
//! - [`MemoryStore`]: a single-process store behind an async `RwLock`, used by
//!   tests and for running the service without a database

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::BillingError;
use crate::models::{
    Client, ClientUpdate, EntryKey, EntryWrite, Invoice, InvoiceLineItem, InvoiceStatus,
    NewClient, NewInvoice, TimeEntry,
};

/// Transactional CRUD over clients, time entries, invoices and line items.
///
/// Every mutating method is all-or-nothing. Inputs arrive already validated
/// by the engine; stores enforce the invariants that need a consistent view
/// of persisted state (uniqueness, billed-ness, status).
#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Verifies the backing store is reachable.
    async fn ping(&self) -> Result<(), BillingError>;

    async fn insert_client(&self, client: &NewClient) -> Result<Client, BillingError>;

    /// Fails with [`BillingError::ClientNotFound`] for an unknown id.
    async fn update_client(
        &self,
        client_id: Uuid,
        update: &ClientUpdate,
    ) -> Result<Client, BillingError>;

    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, BillingError>;

    /// Clients ordered by name.
    async fn list_clients(&self, active_only: bool) -> Result<Vec<Client>, BillingError>;

    /// Writes a ledger cell, creating it or overwriting an unbilled one.
    ///
    /// Fails with [`BillingError::EntryAlreadyBilled`] when the existing entry
    /// is referenced by a line item.
    async fn upsert_entry(
        &self,
        key: EntryKey,
        write: &EntryWrite,
    ) -> Result<TimeEntry, BillingError>;

    /// Writes several cells in one transaction.
    ///
    /// # Arguments
    ///
    /// * `cells` - Keys with their validated values; keys are distinct
    ///
    /// # Returns
    ///
    /// The stored entries, in the order of `cells`.
    ///
    /// # Errors
    ///
    /// [`BillingError::EntryAlreadyBilled`] for the first billed cell found,
    /// in which case no cell is written.
    async fn upsert_entries(
        &self,
        cells: &[(EntryKey, EntryWrite)],
    ) -> Result<Vec<TimeEntry>, BillingError>;

    /// Removes an unbilled entry.
    async fn delete_entry(&self, entry_id: Uuid) -> Result<(), BillingError>;

    /// Entries of one week, for one client or all of them.
    async fn week_entries(
        &self,
        client_id: Option<Uuid>,
        week_start: NaiveDate,
    ) -> Result<Vec<TimeEntry>, BillingError>;

    /// A client's entries whose week start lies in `[first_week, last_week]`,
    /// billed or not.
    async fn entries_between(
        &self,
        client_id: Uuid,
        first_week: NaiveDate,
        last_week: NaiveDate,
    ) -> Result<Vec<TimeEntry>, BillingError>;

    /// Atomically re-verifies the requested entries, allocates an invoice
    /// number, and inserts the invoice with its line items.
    ///
    /// Implementations must call [`crate::billing::materializer::plan_invoice`]
    /// on entries read under the same lock or transaction that performs the
    /// writes.
    ///
    /// # Errors
    ///
    /// [`BillingError::StaleSelection`] when any requested entry is missing or
    /// already billed, including by a concurrent call that committed first.
    /// Nothing is written on any error.
    async fn materialize_invoice(
        &self,
        request: &NewInvoice,
    ) -> Result<(Invoice, Vec<InvoiceLineItem>), BillingError>;

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, BillingError>;

    /// Line items ordered by line number.
    async fn invoice_lines(&self, invoice_id: Uuid) -> Result<Vec<InvoiceLineItem>, BillingError>;

    /// Invoices newest first, optionally for one client.
    async fn list_invoices(&self, client_id: Option<Uuid>) -> Result<Vec<Invoice>, BillingError>;

    /// Checks the transition against the current status and applies it.
    async fn update_status(
        &self,
        invoice_id: Uuid,
        status: InvoiceStatus,
    ) -> Result<Invoice, BillingError>;

    /// Deletes a non-paid invoice and its lines, un-billing their entries.
    async fn delete_invoice(&self, invoice_id: Uuid) -> Result<Invoice, BillingError>;
}
