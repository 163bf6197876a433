use crate::error::BillingError;
use crate::models::{Invoice, InvoiceStatus};

/// Invoice status graph.
///
/// The lifecycle progresses through these edges:
/// - Draft -> Sent | Cancelled
/// - Sent -> Paid | Overdue | Cancelled
/// - Overdue -> Paid | Cancelled
/// - Paid and Cancelled are terminal
impl InvoiceStatus {
    /// Statuses reachable in one step from `self`.
    pub fn next_states(self) -> &'static [InvoiceStatus] {
        match self {
            InvoiceStatus::Draft => &[InvoiceStatus::Sent, InvoiceStatus::Cancelled],
            InvoiceStatus::Sent => &[
                InvoiceStatus::Paid,
                InvoiceStatus::Overdue,
                InvoiceStatus::Cancelled,
            ],
            InvoiceStatus::Overdue => &[InvoiceStatus::Paid, InvoiceStatus::Cancelled],
            InvoiceStatus::Paid | InvoiceStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: InvoiceStatus) -> bool {
        self.next_states().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.next_states().is_empty()
    }
}

pub fn ensure_transition(from: InvoiceStatus, to: InvoiceStatus) -> Result<(), BillingError> {
    if !from.can_transition_to(to) {
        return Err(BillingError::InvalidTransition { from, to });
    }
    Ok(())
}

/// Paid invoices are financial history and stay put; anything else may be
/// deleted, which un-bills its time entries.
pub fn ensure_deletable(invoice: &Invoice) -> Result<(), BillingError> {
    if invoice.status == InvoiceStatus::Paid {
        return Err(BillingError::CannotDeletePaidInvoice(invoice.id));
    }
    Ok(())
}
