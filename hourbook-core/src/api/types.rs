use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};
use uuid::Uuid;

use crate::billing::ledger::DayTotals;
use crate::error::{BillingError, ErrorKind};
use crate::models::{InvoiceStatus, TimeEntry, WeekCell};

/// Query for `GET /api/clients`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientListQuery {
    /// Include deactivated clients
    #[serde(default)]
    pub include_inactive: bool,
}

/// Query for `GET /api/clients/:client_id/unbilled`.
///
/// Both bounds are inclusive calendar dates.
#[derive(Debug, Clone, Deserialize)]
pub struct UnbilledQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceListQuery {
    pub client_id: Option<Uuid>,
}

/// Body of `PUT /api/invoices/:invoice_id/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: InvoiceStatus,
}

/// Body of `PUT /api/clients/:client_id/weeks/:week_start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeekSave {
    pub cells: Vec<WeekCell>,
}

/// One client's week: the grid cells plus per-day totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientWeekResponse {
    pub client_id: Uuid,
    pub week_start: NaiveDate,
    pub dates: [NaiveDate; 7],
    pub days: DayTotals,
    pub total: Decimal,
    pub entries: Vec<TimeEntry>,
}

/// Transport wrapper around [`BillingError`].
///
/// Renders as `{ "error": <code>, "message": <text> }` with a status picked
/// from the error's kind.
#[derive(Debug)]
pub struct ApiError(pub BillingError);

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match (&self.0, self.0.kind()) {
            (BillingError::InvalidTransition { .. }, _) => StatusCode::UNPROCESSABLE_ENTITY,
            (_, ErrorKind::Validation) => StatusCode::BAD_REQUEST,
            (_, ErrorKind::NotFound) => StatusCode::NOT_FOUND,
            (_, ErrorKind::Conflict) => StatusCode::CONFLICT,
            (_, ErrorKind::Integrity) => StatusCode::FORBIDDEN,
            (_, ErrorKind::Storage) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self.0.kind() {
            ErrorKind::Storage => {
                error!("Request failed: {}", self.0);
                "internal storage error".to_string()
            }
            ErrorKind::Conflict => {
                warn!("Request conflicted: {}", self.0);
                self.0.to_string()
            }
            _ => self.0.to_string(),
        };

        let body = Json(json!({
            "error": self.0.code(),
            "message": message,
        }));
        (status, body).into_response()
    }
}
