//! PostgreSQL billing store.
//!
//! Race freedom comes from the schema and from row locks, not from the
//! process: the unique constraints on `(client_id, week_start, day_of_week)`,
//! `invoice_number` and `invoice_line_items.time_entry_id` back every check the
//! engine makes, and mutations lock the rows they validate with
//! `SELECT ... FOR UPDATE` inside one transaction.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::billing::{lifecycle, materializer};
use crate::error::BillingError;
use crate::models::{
    Client, ClientUpdate, EntryKey, EntryWrite, Invoice, InvoiceLineItem, InvoiceStatus,
    NewClient, NewInvoice, TimeEntry,
};
use crate::store::BillingStore;

const CLIENT_COLUMNS: &str = "id, name, default_rate, payment_terms, active, contact_name, \
     contact_email, contact_phone, billing_address, created_at, updated_at";

const INVOICE_COLUMNS: &str = "id, client_id, invoice_number, invoice_date, due_date, \
     total_hours, total_amount, status, notes, created_at, updated_at";

const LINE_COLUMNS: &str =
    "id, invoice_id, time_entry_id, line_number, description, hours, rate, amount, created_at";

/// Entry rows joined with the line item billing them, if any.
const ENTRY_SELECT: &str = "SELECT t.id, t.seq, t.client_id, t.week_start, t.day_of_week, \
     t.hours, t.rate, t.notes, li.id AS line_item_id, t.created_at, t.updated_at \
     FROM time_entries AS t \
     LEFT JOIN invoice_line_items AS li ON li.time_entry_id = t.id";

/// [`BillingStore`] backed by a `sqlx` Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map_or(false, |db| db.is_foreign_key_violation())
}

async fn entry_is_billed(
    tx: &mut Transaction<'_, Postgres>,
    entry_id: Uuid,
) -> Result<bool, BillingError> {
    let billed = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM invoice_line_items WHERE time_entry_id = $1)",
    )
    .bind(entry_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(billed)
}

async fn lock_entry_by_key(
    tx: &mut Transaction<'_, Postgres>,
    key: &EntryKey,
) -> Result<Option<Uuid>, BillingError> {
    let id = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM time_entries \
         WHERE client_id = $1 AND week_start = $2 AND day_of_week = $3 \
         FOR UPDATE",
    )
    .bind(key.client_id)
    .bind(key.week_start)
    .bind(key.day_of_week)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(id)
}

/// Creates or overwrites one cell inside `tx`.
async fn write_cell(
    tx: &mut Transaction<'_, Postgres>,
    key: &EntryKey,
    write: &EntryWrite,
) -> Result<TimeEntry, BillingError> {
    let entry_id = match lock_entry_by_key(tx, key).await? {
        Some(entry_id) => {
            if entry_is_billed(tx, entry_id).await? {
                return Err(BillingError::EntryAlreadyBilled(entry_id));
            }
            sqlx::query(
                "UPDATE time_entries SET hours = $2, rate = $3, notes = $4, updated_at = NOW() \
                 WHERE id = $1",
            )
            .bind(entry_id)
            .bind(write.hours)
            .bind(write.rate)
            .bind(&write.notes)
            .execute(&mut **tx)
            .await?;
            entry_id
        }
        None => {
            // A concurrent writer may have created the cell since the lookup.
            let inserted = sqlx::query_scalar::<_, Uuid>(
                "INSERT INTO time_entries \
                     (id, client_id, week_start, day_of_week, hours, rate, notes) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT ON CONSTRAINT time_entries_cell_key DO UPDATE \
                 SET hours = EXCLUDED.hours, rate = EXCLUDED.rate, notes = EXCLUDED.notes, \
                     updated_at = NOW() \
                 WHERE NOT EXISTS ( \
                     SELECT 1 FROM invoice_line_items AS li \
                     WHERE li.time_entry_id = time_entries.id) \
                 RETURNING id",
            )
            .bind(Uuid::new_v4())
            .bind(key.client_id)
            .bind(key.week_start)
            .bind(key.day_of_week)
            .bind(write.hours)
            .bind(write.rate)
            .bind(&write.notes)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|err| {
                if is_foreign_key_violation(&err) {
                    BillingError::ClientNotFound(key.client_id)
                } else {
                    BillingError::Database(err)
                }
            })?;

            match inserted {
                Some(entry_id) => entry_id,
                None => {
                    let billed_id = lock_entry_by_key(tx, key).await?.unwrap_or_default();
                    return Err(BillingError::EntryAlreadyBilled(billed_id));
                }
            }
        }
    };

    let sql = format!("{ENTRY_SELECT} WHERE t.id = $1");
    let entry = sqlx::query_as::<_, TimeEntry>(&sql)
        .bind(entry_id)
        .fetch_one(&mut **tx)
        .await?;
    Ok(entry)
}

async fn allocate_invoice_number(
    tx: &mut Transaction<'_, Postgres>,
    invoice: &Invoice,
) -> Result<Invoice, BillingError> {
    let prefix = materializer::invoice_number_prefix(invoice.invoice_date);
    let existing: Vec<String> =
        sqlx::query_scalar("SELECT invoice_number FROM invoices WHERE invoice_number LIKE $1")
            .bind(format!("{prefix}%"))
            .fetch_all(&mut **tx)
            .await?;

    let mut sequence = materializer::next_invoice_sequence(
        existing.iter().map(String::as_str),
        invoice.invoice_date,
    );
    let mut candidate = materializer::format_invoice_number(invoice.invoice_date, sequence);

    let sql = format!(
        "INSERT INTO invoices ({INVOICE_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW()) \
         ON CONFLICT (invoice_number) DO NOTHING \
         RETURNING {INVOICE_COLUMNS}"
    );
    for attempt in 0..materializer::MAX_NUMBER_ATTEMPTS {
        let inserted = sqlx::query_as::<_, Invoice>(&sql)
            .bind(invoice.id)
            .bind(invoice.client_id)
            .bind(&candidate)
            .bind(invoice.invoice_date)
            .bind(invoice.due_date)
            .bind(invoice.total_hours)
            .bind(invoice.total_amount)
            .bind(invoice.status)
            .bind(&invoice.notes)
            .fetch_optional(&mut **tx)
            .await?;
        if let Some(inserted) = inserted {
            return Ok(inserted);
        }
        debug!("Invoice number {} taken (attempt {})", candidate, attempt + 1);
        sequence = sequence.saturating_add(1);
        candidate = materializer::format_invoice_number(invoice.invoice_date, sequence);
    }

    warn!("Giving up on invoice number allocation at {}", candidate);
    Err(BillingError::DuplicateInvoiceNumber(candidate))
}

#[async_trait]
impl BillingStore for PgStore {
    async fn ping(&self) -> Result<(), BillingError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_client(&self, client: &NewClient) -> Result<Client, BillingError> {
        let sql = format!(
            "INSERT INTO clients ({CLIENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, TRUE, $5, $6, $7, $8, NOW(), NOW()) \
             RETURNING {CLIENT_COLUMNS}"
        );
        let created = sqlx::query_as::<_, Client>(&sql)
            .bind(Uuid::new_v4())
            .bind(&client.name)
            .bind(client.default_rate)
            .bind(client.terms())
            .bind(&client.contact_name)
            .bind(&client.contact_email)
            .bind(&client.contact_phone)
            .bind(&client.billing_address)
            .fetch_one(&self.pool)
            .await?;

        info!("Created client {} ({})", created.name, created.id);
        Ok(created)
    }

    async fn update_client(
        &self,
        client_id: Uuid,
        update: &ClientUpdate,
    ) -> Result<Client, BillingError> {
        let mut tx = self.pool.begin().await?;

        let select = format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = $1 FOR UPDATE");
        let mut client = sqlx::query_as::<_, Client>(&select)
            .bind(client_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(BillingError::ClientNotFound(client_id))?;
        update.apply_to(&mut client);

        let sql = format!(
            "UPDATE clients SET name = $2, default_rate = $3, payment_terms = $4, active = $5, \
             contact_name = $6, contact_email = $7, contact_phone = $8, billing_address = $9, \
             updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {CLIENT_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, Client>(&sql)
            .bind(client.id)
            .bind(&client.name)
            .bind(client.default_rate)
            .bind(client.payment_terms)
            .bind(client.active)
            .bind(&client.contact_name)
            .bind(&client.contact_email)
            .bind(&client.contact_phone)
            .bind(&client.billing_address)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!("Updated client {}", client_id);
        Ok(updated)
    }

    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, BillingError> {
        let sql = format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = $1");
        let client = sqlx::query_as::<_, Client>(&sql)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(client)
    }

    async fn list_clients(&self, active_only: bool) -> Result<Vec<Client>, BillingError> {
        let sql = format!(
            "SELECT {CLIENT_COLUMNS} FROM clients \
             WHERE ($1 = FALSE OR active) \
             ORDER BY name, id"
        );
        let clients = sqlx::query_as::<_, Client>(&sql)
            .bind(active_only)
            .fetch_all(&self.pool)
            .await?;
        Ok(clients)
    }

    async fn upsert_entry(
        &self,
        key: EntryKey,
        write: &EntryWrite,
    ) -> Result<TimeEntry, BillingError> {
        let mut tx = self.pool.begin().await?;
        let entry = write_cell(&mut tx, &key, write).await?;
        tx.commit().await?;

        debug!(
            "Wrote {} hours for client {} on {} day {}",
            entry.hours, entry.client_id, entry.week_start, entry.day_of_week
        );
        Ok(entry)
    }

    async fn upsert_entries(
        &self,
        cells: &[(EntryKey, EntryWrite)],
    ) -> Result<Vec<TimeEntry>, BillingError> {
        // Write in key order so overlapping bulk saves lock rows in the same order.
        let mut order: Vec<usize> = (0..cells.len()).collect();
        order.sort_by_key(|&index| {
            let (key, _) = &cells[index];
            (key.client_id, key.week_start, key.day_of_week)
        });

        let mut tx = self.pool.begin().await?;
        let mut written: Vec<Option<TimeEntry>> = vec![None; cells.len()];
        for index in order {
            let (key, write) = &cells[index];
            written[index] = Some(write_cell(&mut tx, key, write).await?);
        }
        tx.commit().await?;

        let entries: Vec<TimeEntry> = written.into_iter().flatten().collect();
        debug!("Wrote {} cells in one transaction", entries.len());
        Ok(entries)
    }

    async fn delete_entry(&self, entry_id: Uuid) -> Result<(), BillingError> {
        let mut tx = self.pool.begin().await?;

        let locked =
            sqlx::query_scalar::<_, Uuid>("SELECT id FROM time_entries WHERE id = $1 FOR UPDATE")
                .bind(entry_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(BillingError::EntryNotFound(entry_id));
        }
        if entry_is_billed(&mut tx, entry_id).await? {
            return Err(BillingError::EntryAlreadyBilled(entry_id));
        }

        sqlx::query("DELETE FROM time_entries WHERE id = $1")
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!("Deleted time entry {}", entry_id);
        Ok(())
    }

    async fn week_entries(
        &self,
        client_id: Option<Uuid>,
        week_start: NaiveDate,
    ) -> Result<Vec<TimeEntry>, BillingError> {
        let sql = format!(
            "{ENTRY_SELECT} \
             WHERE t.week_start = $1 AND ($2::uuid IS NULL OR t.client_id = $2) \
             ORDER BY t.client_id, t.day_of_week, t.seq"
        );
        let entries = sqlx::query_as::<_, TimeEntry>(&sql)
            .bind(week_start)
            .bind(client_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(entries)
    }

    async fn entries_between(
        &self,
        client_id: Uuid,
        first_week: NaiveDate,
        last_week: NaiveDate,
    ) -> Result<Vec<TimeEntry>, BillingError> {
        let sql = format!(
            "{ENTRY_SELECT} \
             WHERE t.client_id = $1 AND t.week_start BETWEEN $2 AND $3 \
             ORDER BY t.week_start, t.day_of_week, t.seq"
        );
        let entries = sqlx::query_as::<_, TimeEntry>(&sql)
            .bind(client_id)
            .bind(first_week)
            .bind(last_week)
            .fetch_all(&self.pool)
            .await?;
        Ok(entries)
    }

    async fn materialize_invoice(
        &self,
        request: &NewInvoice,
    ) -> Result<(Invoice, Vec<InvoiceLineItem>), BillingError> {
        let mut tx = self.pool.begin().await?;

        let select_client = format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = $1");
        let client = sqlx::query_as::<_, Client>(&select_client)
            .bind(request.client_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(BillingError::ClientNotFound(request.client_id))?;

        // Lock in id order so concurrent materializations cannot deadlock.
        sqlx::query("SELECT id FROM time_entries WHERE id = ANY($1) ORDER BY id FOR UPDATE")
            .bind(&request.entry_ids)
            .execute(&mut *tx)
            .await?;

        // Separate statement: it sees line items committed while we waited on the locks.
        let select_entries = format!("{ENTRY_SELECT} WHERE t.id = ANY($1)");
        let fetched = sqlx::query_as::<_, TimeEntry>(&select_entries)
            .bind(&request.entry_ids)
            .fetch_all(&mut *tx)
            .await?;

        let plan = match materializer::plan_invoice(&client, request, &fetched) {
            Ok(plan) => plan,
            Err(err) => {
                warn!("Invoice for client {} rejected: {}", client.id, err);
                return Err(err);
            }
        };

        let now = chrono::Utc::now();
        let draft = Invoice {
            id: Uuid::new_v4(),
            client_id: plan.client_id,
            invoice_number: String::new(),
            invoice_date: plan.invoice_date,
            due_date: plan.due_date,
            total_hours: plan.total_hours,
            total_amount: plan.total_amount,
            status: InvoiceStatus::Draft,
            notes: plan.notes.clone(),
            created_at: now,
            updated_at: now,
        };
        let invoice = allocate_invoice_number(&mut tx, &draft).await?;

        let insert_line = format!(
            "INSERT INTO invoice_line_items ({LINE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW()) \
             ON CONFLICT (time_entry_id) DO NOTHING \
             RETURNING {LINE_COLUMNS}"
        );
        let mut lines = Vec::with_capacity(plan.lines.len());
        for (line, line_number) in plan.lines.iter().zip(1_i32..) {
            let inserted = sqlx::query_as::<_, InvoiceLineItem>(&insert_line)
                .bind(Uuid::new_v4())
                .bind(invoice.id)
                .bind(line.time_entry_id)
                .bind(line_number)
                .bind(&line.description)
                .bind(line.hours)
                .bind(line.rate)
                .bind(line.amount)
                .fetch_optional(&mut *tx)
                .await?;

            match inserted {
                Some(inserted) => lines.push(inserted),
                None => {
                    // Dropping the transaction rolls back the invoice row.
                    let entry_ids: Vec<Uuid> = line.time_entry_id.into_iter().collect();
                    warn!("Time entry {:?} was billed concurrently", entry_ids);
                    return Err(BillingError::StaleSelection(entry_ids));
                }
            }
        }

        tx.commit().await?;
        info!(
            "Created invoice {} for client {}: {} lines, {} hours, {}",
            invoice.invoice_number,
            invoice.client_id,
            lines.len(),
            invoice.total_hours,
            invoice.total_amount
        );
        Ok((invoice, lines))
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, BillingError> {
        let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1");
        let invoice = sqlx::query_as::<_, Invoice>(&sql)
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(invoice)
    }

    async fn invoice_lines(&self, invoice_id: Uuid) -> Result<Vec<InvoiceLineItem>, BillingError> {
        let sql = format!(
            "SELECT {LINE_COLUMNS} FROM invoice_line_items \
             WHERE invoice_id = $1 \
             ORDER BY line_number"
        );
        let lines = sqlx::query_as::<_, InvoiceLineItem>(&sql)
            .bind(invoice_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(lines)
    }

    async fn list_invoices(&self, client_id: Option<Uuid>) -> Result<Vec<Invoice>, BillingError> {
        let sql = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices \
             WHERE ($1::uuid IS NULL OR client_id = $1) \
             ORDER BY invoice_date DESC, invoice_number DESC"
        );
        let invoices = sqlx::query_as::<_, Invoice>(&sql)
            .bind(client_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(invoices)
    }

    async fn update_status(
        &self,
        invoice_id: Uuid,
        status: InvoiceStatus,
    ) -> Result<Invoice, BillingError> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_scalar::<_, InvoiceStatus>(
            "SELECT status FROM invoices WHERE id = $1 FOR UPDATE",
        )
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(BillingError::InvoiceNotFound(invoice_id))?;
        lifecycle::ensure_transition(current, status)?;

        let sql = format!(
            "UPDATE invoices SET status = $2, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {INVOICE_COLUMNS}"
        );
        let invoice = sqlx::query_as::<_, Invoice>(&sql)
            .bind(invoice_id)
            .bind(status)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        info!("Invoice {} moved from {} to {}", invoice.invoice_number, current, status);
        Ok(invoice)
    }

    async fn delete_invoice(&self, invoice_id: Uuid) -> Result<Invoice, BillingError> {
        let mut tx = self.pool.begin().await?;

        let select = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1 FOR UPDATE");
        let invoice = sqlx::query_as::<_, Invoice>(&select)
            .bind(invoice_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(BillingError::InvoiceNotFound(invoice_id))?;
        lifecycle::ensure_deletable(&invoice)?;

        // Line items cascade, which releases their time entries.
        sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!("Deleted invoice {}", invoice.invoice_number);
        Ok(invoice)
    }
}
