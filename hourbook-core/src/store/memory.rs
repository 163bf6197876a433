//! In-process billing store.
//!
//! All state lives behind one `tokio::sync::RwLock`. Reads share the lock;
//! every mutation holds the write guard for its whole duration, which gives
//! the same all-or-nothing behaviour as a database transaction. The uniqueness
//! rules the Postgres schema enforces with indexes are mirrored by the
//! `entry_keys`, `billed_entries` and `invoice_numbers` maps.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::billing::{lifecycle, materializer};
use crate::error::BillingError;
use crate::models::{
    Client, ClientUpdate, EntryKey, EntryWrite, Invoice, InvoiceLineItem, InvoiceStatus,
    NewClient, NewInvoice, TimeEntry,
};
use crate::store::BillingStore;

#[derive(Default)]
struct MemoryState {
    clients: HashMap<Uuid, Client>,
    entries: HashMap<Uuid, TimeEntry>,
    entry_keys: HashMap<EntryKey, Uuid>,
    invoices: HashMap<Uuid, Invoice>,
    lines: HashMap<Uuid, Vec<InvoiceLineItem>>,
    /// time entry id -> line item id
    billed_entries: HashMap<Uuid, Uuid>,
    invoice_numbers: HashSet<String>,
    next_seq: i64,
}

impl MemoryState {
    /// Fails unless `key` can be written: the client exists and any entry
    /// already at the key is unbilled.
    fn check_writable(&self, key: &EntryKey) -> Result<(), BillingError> {
        if !self.clients.contains_key(&key.client_id) {
            return Err(BillingError::ClientNotFound(key.client_id));
        }
        if let Some(entry_id) = self.entry_keys.get(key) {
            if self.entries.get(entry_id).map_or(false, TimeEntry::is_billed) {
                return Err(BillingError::EntryAlreadyBilled(*entry_id));
            }
        }
        Ok(())
    }

    /// Writes a cell already passed by [`MemoryState::check_writable`].
    fn write_cell(&mut self, key: EntryKey, write: &EntryWrite, now: DateTime<Utc>) -> TimeEntry {
        let existing = self.entry_keys.get(&key).copied();
        if let Some(entry) = existing.and_then(|entry_id| self.entries.get_mut(&entry_id)) {
            entry.hours = write.hours;
            entry.rate = write.rate;
            entry.notes = write.notes.clone();
            entry.updated_at = now;
            return entry.clone();
        }

        self.next_seq += 1;
        let entry = TimeEntry {
            id: Uuid::new_v4(),
            seq: self.next_seq,
            client_id: key.client_id,
            week_start: key.week_start,
            day_of_week: key.day_of_week,
            hours: write.hours,
            rate: write.rate,
            notes: write.notes.clone(),
            line_item_id: None,
            created_at: now,
            updated_at: now,
        };
        self.entry_keys.insert(key, entry.id);
        self.entries.insert(entry.id, entry.clone());
        entry
    }

    fn allocate_invoice_number(&self, invoice_date: NaiveDate) -> Result<String, BillingError> {
        let mut sequence = materializer::next_invoice_sequence(
            self.invoice_numbers.iter().map(String::as_str),
            invoice_date,
        );
        let mut candidate = materializer::format_invoice_number(invoice_date, sequence);
        for _ in 0..materializer::MAX_NUMBER_ATTEMPTS {
            if !self.invoice_numbers.contains(&candidate) {
                return Ok(candidate);
            }
            sequence = sequence.saturating_add(1);
            candidate = materializer::format_invoice_number(invoice_date, sequence);
        }
        Err(BillingError::DuplicateInvoiceNumber(candidate))
    }
}

/// Thread-safe in-memory [`BillingStore`].
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn ping(&self) -> Result<(), BillingError> {
        Ok(())
    }

    async fn insert_client(&self, client: &NewClient) -> Result<Client, BillingError> {
        let now = Utc::now();
        let record = Client {
            id: Uuid::new_v4(),
            name: client.name.clone(),
            default_rate: client.default_rate,
            payment_terms: client.terms(),
            active: true,
            contact_name: client.contact_name.clone(),
            contact_email: client.contact_email.clone(),
            contact_phone: client.contact_phone.clone(),
            billing_address: client.billing_address.clone(),
            created_at: now,
            updated_at: now,
        };

        let mut state = self.state.write().await;
        state.clients.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_client(
        &self,
        client_id: Uuid,
        update: &ClientUpdate,
    ) -> Result<Client, BillingError> {
        let mut state = self.state.write().await;
        let client = state
            .clients
            .get_mut(&client_id)
            .ok_or(BillingError::ClientNotFound(client_id))?;
        update.apply_to(client);
        client.updated_at = Utc::now();
        Ok(client.clone())
    }

    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, BillingError> {
        Ok(self.state.read().await.clients.get(&client_id).cloned())
    }

    async fn list_clients(&self, active_only: bool) -> Result<Vec<Client>, BillingError> {
        let state = self.state.read().await;
        let mut clients: Vec<Client> = state
            .clients
            .values()
            .filter(|c| c.active || !active_only)
            .cloned()
            .collect();
        clients.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(clients)
    }

    async fn upsert_entry(
        &self,
        key: EntryKey,
        write: &EntryWrite,
    ) -> Result<TimeEntry, BillingError> {
        let mut state = self.state.write().await;
        state.check_writable(&key)?;
        Ok(state.write_cell(key, write, Utc::now()))
    }

    async fn upsert_entries(
        &self,
        cells: &[(EntryKey, EntryWrite)],
    ) -> Result<Vec<TimeEntry>, BillingError> {
        let mut state = self.state.write().await;
        for (key, _) in cells {
            state.check_writable(key)?;
        }

        let now = Utc::now();
        Ok(cells
            .iter()
            .map(|(key, write)| state.write_cell(*key, write, now))
            .collect())
    }

    async fn delete_entry(&self, entry_id: Uuid) -> Result<(), BillingError> {
        let mut state = self.state.write().await;
        let entry = state
            .entries
            .get(&entry_id)
            .ok_or(BillingError::EntryNotFound(entry_id))?;
        if entry.is_billed() {
            return Err(BillingError::EntryAlreadyBilled(entry_id));
        }
        let key = EntryKey {
            client_id: entry.client_id,
            week_start: entry.week_start,
            day_of_week: entry.day_of_week,
        };
        state.entry_keys.remove(&key);
        state.entries.remove(&entry_id);
        Ok(())
    }

    async fn week_entries(
        &self,
        client_id: Option<Uuid>,
        week_start: NaiveDate,
    ) -> Result<Vec<TimeEntry>, BillingError> {
        let state = self.state.read().await;
        let mut entries: Vec<TimeEntry> = state
            .entries
            .values()
            .filter(|e| e.week_start == week_start)
            .filter(|e| client_id.map_or(true, |id| e.client_id == id))
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.client_id, e.day_of_week, e.seq));
        Ok(entries)
    }

    async fn entries_between(
        &self,
        client_id: Uuid,
        first_week: NaiveDate,
        last_week: NaiveDate,
    ) -> Result<Vec<TimeEntry>, BillingError> {
        let state = self.state.read().await;
        let mut entries: Vec<TimeEntry> = state
            .entries
            .values()
            .filter(|e| e.client_id == client_id)
            .filter(|e| first_week <= e.week_start && e.week_start <= last_week)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.week_start, e.day_of_week, e.seq));
        Ok(entries)
    }

    async fn materialize_invoice(
        &self,
        request: &NewInvoice,
    ) -> Result<(Invoice, Vec<InvoiceLineItem>), BillingError> {
        let mut state = self.state.write().await;

        let client = state
            .clients
            .get(&request.client_id)
            .cloned()
            .ok_or(BillingError::ClientNotFound(request.client_id))?;
        let fetched: Vec<TimeEntry> = request
            .entry_ids
            .iter()
            .filter_map(|id| state.entries.get(id).cloned())
            .collect();

        let plan = materializer::plan_invoice(&client, request, &fetched)?;
        let invoice_number = state.allocate_invoice_number(plan.invoice_date)?;

        let now = Utc::now();
        let invoice = Invoice {
            id: Uuid::new_v4(),
            client_id: plan.client_id,
            invoice_number,
            invoice_date: plan.invoice_date,
            due_date: plan.due_date,
            total_hours: plan.total_hours,
            total_amount: plan.total_amount,
            status: InvoiceStatus::Draft,
            notes: plan.notes.clone(),
            created_at: now,
            updated_at: now,
        };
        let lines: Vec<InvoiceLineItem> = plan
            .lines
            .iter()
            .zip(1_i32..)
            .map(|(line, line_number)| InvoiceLineItem {
                id: Uuid::new_v4(),
                invoice_id: invoice.id,
                time_entry_id: line.time_entry_id,
                line_number,
                description: line.description.clone(),
                hours: line.hours,
                rate: line.rate,
                amount: line.amount,
                created_at: now,
            })
            .collect();

        let conflicts: Vec<Uuid> = plan
            .billed_entry_ids()
            .filter(|id| state.billed_entries.contains_key(id))
            .collect();
        if !conflicts.is_empty() {
            return Err(BillingError::StaleSelection(conflicts));
        }

        for line in &lines {
            if let Some(entry_id) = line.time_entry_id {
                state.billed_entries.insert(entry_id, line.id);
                if let Some(entry) = state.entries.get_mut(&entry_id) {
                    entry.line_item_id = Some(line.id);
                }
            }
        }
        state.invoice_numbers.insert(invoice.invoice_number.clone());
        state.invoices.insert(invoice.id, invoice.clone());
        state.lines.insert(invoice.id, lines.clone());

        Ok((invoice, lines))
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, BillingError> {
        Ok(self.state.read().await.invoices.get(&invoice_id).cloned())
    }

    async fn invoice_lines(&self, invoice_id: Uuid) -> Result<Vec<InvoiceLineItem>, BillingError> {
        let state = self.state.read().await;
        let mut lines = state.lines.get(&invoice_id).cloned().unwrap_or_default();
        lines.sort_by_key(|line| line.line_number);
        Ok(lines)
    }

    async fn list_invoices(&self, client_id: Option<Uuid>) -> Result<Vec<Invoice>, BillingError> {
        let state = self.state.read().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| client_id.map_or(true, |id| i.client_id == id))
            .cloned()
            .collect();
        invoices.sort_by(|a, b| {
            b.invoice_date
                .cmp(&a.invoice_date)
                .then_with(|| b.invoice_number.cmp(&a.invoice_number))
        });
        Ok(invoices)
    }

    async fn update_status(
        &self,
        invoice_id: Uuid,
        status: InvoiceStatus,
    ) -> Result<Invoice, BillingError> {
        let mut state = self.state.write().await;
        let invoice = state
            .invoices
            .get_mut(&invoice_id)
            .ok_or(BillingError::InvoiceNotFound(invoice_id))?;
        lifecycle::ensure_transition(invoice.status, status)?;
        invoice.status = status;
        invoice.updated_at = Utc::now();
        Ok(invoice.clone())
    }

    async fn delete_invoice(&self, invoice_id: Uuid) -> Result<Invoice, BillingError> {
        let mut state = self.state.write().await;
        let invoice = state
            .invoices
            .get(&invoice_id)
            .cloned()
            .ok_or(BillingError::InvoiceNotFound(invoice_id))?;
        lifecycle::ensure_deletable(&invoice)?;

        state.invoices.remove(&invoice_id);
        state.invoice_numbers.remove(&invoice.invoice_number);
        for line in state.lines.remove(&invoice_id).unwrap_or_default() {
            if let Some(entry_id) = line.time_entry_id {
                state.billed_entries.remove(&entry_id);
                if let Some(entry) = state.entries.get_mut(&entry_id) {
                    entry.line_item_id = None;
                }
            }
        }
        Ok(invoice)
    }
}
