//! Hourbook: weekly time tracking and invoice generation.
//!
//! The [`billing`] engine records hours per client and day, selects unbilled
//! time over a date window, and turns it into invoices without ever billing
//! an entry twice. Persistence sits behind [`store::BillingStore`]; [`api`]
//! exposes the engine over HTTP.

pub mod api;
pub mod billing;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod store;

pub use billing::BillingEngine;
pub use error::{BillingError, ErrorKind};
