use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::billing::rate;
use crate::error::BillingError;

/// Payment terms applied when a new client does not specify any.
pub const DEFAULT_PAYMENT_TERMS: i32 = 30;

/// Longest payment terms accepted, ten years.
pub const MAX_PAYMENT_TERMS: i32 = 3650;

/// Client model representing a billable customer.
///
/// Maps to the `clients` table. Clients are soft-deactivated through the
/// `active` flag and never deleted while time entries reference them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Client {
    /// Unique identifier for the client
    pub id: Uuid,

    /// Display name
    pub name: String,

    /// Hourly rate applied when a time entry has no explicit override
    pub default_rate: Decimal,

    /// Days between invoice date and due date
    pub payment_terms: i32,

    /// Whether the client accepts new time entries
    pub active: bool,

    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub billing_address: Option<String>,

    /// Timestamp when the client was created
    pub created_at: DateTime<Utc>,

    /// Timestamp when the client was last updated
    pub updated_at: DateTime<Utc>,
}

/// Client creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClient {
    pub name: String,
    pub default_rate: Decimal,
    pub payment_terms: Option<i32>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub billing_address: Option<String>,
}

impl NewClient {
    pub fn new(name: impl Into<String>, default_rate: Decimal) -> Self {
        Self {
            name: name.into(),
            default_rate,
            payment_terms: None,
            contact_name: None,
            contact_email: None,
            contact_phone: None,
            billing_address: None,
        }
    }

    pub fn with_payment_terms(mut self, days: i32) -> Self {
        self.payment_terms = Some(days);
        self
    }

    /// Trims the name and checks rate and terms bounds.
    pub fn validate(mut self) -> Result<Self, BillingError> {
        self.name = validate_name(&self.name)?;
        validate_default_rate(self.default_rate)?;
        if let Some(days) = self.payment_terms {
            validate_payment_terms(days)?;
        }
        Ok(self)
    }

    pub fn terms(&self) -> i32 {
        self.payment_terms.unwrap_or(DEFAULT_PAYMENT_TERMS)
    }
}

/// Client update request; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientUpdate {
    pub name: Option<String>,
    pub default_rate: Option<Decimal>,
    pub payment_terms: Option<i32>,
    pub active: Option<bool>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub billing_address: Option<String>,
}

impl ClientUpdate {
    pub fn deactivate() -> Self {
        Self {
            active: Some(false),
            ..Self::default()
        }
    }

    pub fn validate(mut self) -> Result<Self, BillingError> {
        if let Some(name) = self.name.as_deref() {
            self.name = Some(validate_name(name)?);
        }
        if let Some(rate) = self.default_rate {
            validate_default_rate(rate)?;
        }
        if let Some(days) = self.payment_terms {
            validate_payment_terms(days)?;
        }
        Ok(self)
    }

    /// Applies the update onto an existing client record.
    pub fn apply_to(&self, client: &mut Client) {
        if let Some(name) = &self.name {
            client.name = name.clone();
        }
        if let Some(rate) = self.default_rate {
            client.default_rate = rate;
        }
        if let Some(days) = self.payment_terms {
            client.payment_terms = days;
        }
        if let Some(active) = self.active {
            client.active = active;
        }
        if self.contact_name.is_some() {
            client.contact_name = self.contact_name.clone();
        }
        if self.contact_email.is_some() {
            client.contact_email = self.contact_email.clone();
        }
        if self.contact_phone.is_some() {
            client.contact_phone = self.contact_phone.clone();
        }
        if self.billing_address.is_some() {
            client.billing_address = self.billing_address.clone();
        }
    }
}

fn validate_name(name: &str) -> Result<String, BillingError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(BillingError::InvalidClient("name cannot be empty".to_string()));
    }
    if name.chars().count() > 200 {
        return Err(BillingError::InvalidClient(
            "name cannot exceed 200 characters".to_string(),
        ));
    }
    Ok(name.to_string())
}

fn validate_default_rate(default_rate: Decimal) -> Result<(), BillingError> {
    rate::validate_rate(default_rate).map(|_| ())
}

fn validate_payment_terms(days: i32) -> Result<(), BillingError> {
    if !(0..=MAX_PAYMENT_TERMS).contains(&days) {
        return Err(BillingError::InvalidClient(format!(
            "payment terms must be between 0 and {MAX_PAYMENT_TERMS} days, got {days}"
        )));
    }
    Ok(())
}
