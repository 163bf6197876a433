pub mod client;
pub mod invoice;
pub mod time_entry;

pub use client::{Client, ClientUpdate, NewClient};
pub use invoice::{Invoice, InvoiceDetail, InvoiceLineItem, InvoiceStatus, ManualLine, NewInvoice};
pub use time_entry::{EntryInput, EntryKey, EntryWrite, TimeEntry, WeekCell};
