use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Invoice status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar")]
pub enum InvoiceStatus {
    #[sqlx(rename = "draft")]
    Draft,
    #[sqlx(rename = "sent")]
    Sent,
    #[sqlx(rename = "paid")]
    Paid,
    #[sqlx(rename = "overdue")]
    Overdue,
    #[sqlx(rename = "cancelled")]
    Cancelled,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 5] = [
        InvoiceStatus::Draft,
        InvoiceStatus::Sent,
        InvoiceStatus::Paid,
        InvoiceStatus::Overdue,
        InvoiceStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice model representing an invoice in the system.
///
/// Maps to the `invoices` table. Totals are a snapshot taken when the invoice
/// was materialized; they are never recomputed from line items or from the
/// client's current rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    /// Unique identifier for the invoice
    pub id: Uuid,

    /// ID of the client being billed
    pub client_id: Uuid,

    /// Human-readable number, unique across all invoices (`INV-2024-0001`)
    pub invoice_number: String,

    /// Date the invoice was issued
    pub invoice_date: NaiveDate,

    /// Invoice date plus the client's payment terms
    pub due_date: NaiveDate,

    pub total_hours: Decimal,
    pub total_amount: Decimal,

    /// Invoice status
    pub status: InvoiceStatus,

    pub notes: Option<String>,

    /// Timestamp when the invoice was created
    pub created_at: DateTime<Utc>,

    /// Timestamp when the invoice was last updated
    pub updated_at: DateTime<Utc>,
}

/// One billable line on an invoice.
///
/// Lines built from time entries keep a reference to their entry; manual
/// adjustment lines have none. A time entry is referenced by at most one line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct InvoiceLineItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub time_entry_id: Option<Uuid>,

    /// Position of the line on the invoice, starting at 1
    pub line_number: i32,

    pub description: String,
    pub hours: Decimal,
    pub rate: Decimal,

    /// `hours * rate`, rounded to cents
    pub amount: Decimal,

    pub created_at: DateTime<Utc>,
}

/// Manually entered line with no time entry behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualLine {
    pub description: String,
    pub hours: Decimal,
    pub rate: Decimal,
}

/// Invoice creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvoice {
    pub client_id: Uuid,
    pub invoice_date: NaiveDate,
    #[serde(default)]
    pub entry_ids: Vec<Uuid>,
    #[serde(default)]
    pub manual_lines: Vec<ManualLine>,
    pub notes: Option<String>,
}

/// Invoice together with its line items, as returned to readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub lines: Vec<InvoiceLineItem>,
}
