use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::invoice::InvoiceStatus;

/// Broad category of a [`BillingError`].
///
/// Callers use the category to decide what to do next: validation and
/// integrity failures are final, conflicts mean the caller's view of the
/// ledger is out of date and the higher-level operation may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Integrity,
    NotFound,
    Storage,
}

/// Errors produced by the billing engine and its store adapters.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("week start {0} is not a Monday")]
    InvalidWeekStart(NaiveDate),

    #[error("day of week {0} is outside 1..=7")]
    InvalidDay(i16),

    #[error("hours {0} are out of range or finer than hundredths")]
    InvalidHours(Decimal),

    #[error("rate {0} is out of range or finer than cents")]
    InvalidRate(Decimal),

    #[error("start date {start} is after end date {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("invoice cannot move from {from} to {to}")]
    InvalidTransition {
        from: InvoiceStatus,
        to: InvoiceStatus,
    },

    #[error("invalid client: {0}")]
    InvalidClient(String),

    #[error("invoice has no time entries and no manual lines")]
    EmptyInvoice,

    #[error("invalid manual line: {0}")]
    InvalidLine(String),

    #[error("{0} exceeds the largest storable amount")]
    AmountOutOfRange(String),

    #[error("due date {payment_terms} days after {invoice_date} is out of range")]
    DueDateOutOfRange {
        invoice_date: NaiveDate,
        payment_terms: i32,
    },

    #[error("time entry {entry_id} does not belong to client {client_id}")]
    EntryNotOwned { entry_id: Uuid, client_id: Uuid },

    #[error("time entry {0} is already billed")]
    EntryAlreadyBilled(Uuid),

    #[error("selection is stale, entries missing or already billed: {0:?}")]
    StaleSelection(Vec<Uuid>),

    #[error("could not allocate a unique invoice number after {0}")]
    DuplicateInvoiceNumber(String),

    #[error("invoice {0} is paid and cannot be deleted")]
    CannotDeletePaidInvoice(Uuid),

    #[error("client {0} not found")]
    ClientNotFound(Uuid),

    #[error("client {0} is inactive")]
    ClientInactive(Uuid),

    #[error("time entry {0} not found")]
    EntryNotFound(Uuid),

    #[error("invoice {0} not found")]
    InvoiceNotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl BillingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::InvalidWeekStart(_)
            | BillingError::InvalidDay(_)
            | BillingError::InvalidHours(_)
            | BillingError::InvalidRate(_)
            | BillingError::InvalidRange { .. }
            | BillingError::InvalidTransition { .. }
            | BillingError::InvalidClient(_)
            | BillingError::EmptyInvoice
            | BillingError::InvalidLine(_)
            | BillingError::AmountOutOfRange(_)
            | BillingError::DueDateOutOfRange { .. }
            | BillingError::EntryNotOwned { .. } => ErrorKind::Validation,
            BillingError::EntryAlreadyBilled(_)
            | BillingError::StaleSelection(_)
            | BillingError::DuplicateInvoiceNumber(_) => ErrorKind::Conflict,
            BillingError::CannotDeletePaidInvoice(_) => ErrorKind::Integrity,
            BillingError::ClientNotFound(_)
            | BillingError::ClientInactive(_)
            | BillingError::EntryNotFound(_)
            | BillingError::InvoiceNotFound(_) => ErrorKind::NotFound,
            BillingError::Database(_) | BillingError::Migration(_) => ErrorKind::Storage,
        }
    }

    /// Whether re-reading current state and retrying the higher-level
    /// operation can succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Stable machine-readable code used in transport payloads.
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::InvalidWeekStart(_) => "invalid_week_start",
            BillingError::InvalidDay(_) => "invalid_day",
            BillingError::InvalidHours(_) => "invalid_hours",
            BillingError::InvalidRate(_) => "invalid_rate",
            BillingError::InvalidRange { .. } => "invalid_range",
            BillingError::InvalidTransition { .. } => "invalid_transition",
            BillingError::InvalidClient(_) => "invalid_client",
            BillingError::EmptyInvoice => "empty_invoice",
            BillingError::InvalidLine(_) => "invalid_line",
            BillingError::AmountOutOfRange(_) => "amount_out_of_range",
            BillingError::DueDateOutOfRange { .. } => "due_date_out_of_range",
            BillingError::EntryNotOwned { .. } => "entry_not_owned",
            BillingError::EntryAlreadyBilled(_) => "entry_already_billed",
            BillingError::StaleSelection(_) => "stale_selection",
            BillingError::DuplicateInvoiceNumber(_) => "duplicate_invoice_number",
            BillingError::CannotDeletePaidInvoice(_) => "cannot_delete_paid_invoice",
            BillingError::ClientNotFound(_) => "client_not_found",
            BillingError::ClientInactive(_) => "client_inactive",
            BillingError::EntryNotFound(_) => "entry_not_found",
            BillingError::InvoiceNotFound(_) => "invoice_not_found",
            BillingError::Database(_) => "database_error",
            BillingError::Migration(_) => "migration_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicts_are_retryable() {
        assert!(BillingError::StaleSelection(vec![Uuid::new_v4()]).is_retryable());
        assert!(BillingError::EntryAlreadyBilled(Uuid::new_v4()).is_retryable());
        assert!(BillingError::DuplicateInvoiceNumber("INV-2024-0001".into()).is_retryable());
    }

    #[test]
    fn test_policy_and_validation_errors_are_final() {
        assert!(!BillingError::CannotDeletePaidInvoice(Uuid::new_v4()).is_retryable());
        assert!(!BillingError::InvalidDay(9).is_retryable());
        assert_eq!(
            BillingError::AmountOutOfRange("invoice total".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            BillingError::InvalidTransition {
                from: InvoiceStatus::Draft,
                to: InvoiceStatus::Paid,
            }
            .kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_transition_message_names_both_states() {
        let err = BillingError::InvalidTransition {
            from: InvoiceStatus::Draft,
            to: InvoiceStatus::Paid,
        };
        assert_eq!(err.to_string(), "invoice cannot move from draft to paid");
    }
}
