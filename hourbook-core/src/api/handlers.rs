use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::NaiveDate;
use tracing::{error, info};
use uuid::Uuid;

use crate::api::types::{
    ApiError, ClientListQuery, ClientWeekResponse, InvoiceListQuery, StatusUpdate, UnbilledQuery,
    WeekSave,
};
use crate::api::AppState;
use crate::billing::ledger::{self, WeekSummary};
use crate::billing::selector::UnbilledSelection;
use crate::models::{
    Client, ClientUpdate, EntryInput, Invoice, InvoiceDetail, NewClient, NewInvoice, TimeEntry,
};

type ApiResult<T> = Result<T, ApiError>;

/// Health check endpoint.
///
/// Returns a simple JSON response indicating the server is running.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "hourbook",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Store health check endpoint.
///
/// Verifies the billing store is reachable.
pub async fn db_health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state.engine.ping().await.map_err(|e| {
        error!("Store health check failed: {}", e);
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "database": "connected"
    })))
}

pub async fn list_clients(
    State(state): State<AppState>,
    Query(query): Query<ClientListQuery>,
) -> ApiResult<Json<Vec<Client>>> {
    let clients = state.engine.list_clients(!query.include_inactive).await?;
    Ok(Json(clients))
}

pub async fn create_client(
    State(state): State<AppState>,
    Json(client): Json<NewClient>,
) -> ApiResult<(StatusCode, Json<Client>)> {
    let client = state.engine.create_client(client).await?;
    info!("Client {} created", client.id);
    Ok((StatusCode::CREATED, Json(client)))
}

pub async fn get_client(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
) -> ApiResult<Json<Client>> {
    Ok(Json(state.engine.get_client(client_id).await?))
}

pub async fn update_client(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
    Json(update): Json<ClientUpdate>,
) -> ApiResult<Json<Client>> {
    Ok(Json(state.engine.update_client(client_id, update).await?))
}

/// Deactivates rather than deletes; the client's history stays.
pub async fn deactivate_client(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
) -> ApiResult<Json<Client>> {
    let client = state.engine.deactivate_client(client_id).await?;
    info!("Client {} deactivated", client_id);
    Ok(Json(client))
}

fn week_response(
    client_id: Uuid,
    week_start: NaiveDate,
    entries: Vec<TimeEntry>,
) -> ClientWeekResponse {
    let days = ledger::day_totals(&entries);
    ClientWeekResponse {
        client_id,
        week_start,
        dates: ledger::week_dates(week_start),
        total: days.iter().copied().sum(),
        days,
        entries,
    }
}

pub async fn client_week(
    State(state): State<AppState>,
    Path((client_id, week_start)): Path<(Uuid, NaiveDate)>,
) -> ApiResult<Json<ClientWeekResponse>> {
    let entries = state.engine.week_entries(client_id, week_start).await?;
    Ok(Json(week_response(client_id, week_start, entries)))
}

/// Saves several days of a client's week at once and returns the whole week.
pub async fn save_week(
    State(state): State<AppState>,
    Path((client_id, week_start)): Path<(Uuid, NaiveDate)>,
    Json(body): Json<WeekSave>,
) -> ApiResult<Json<ClientWeekResponse>> {
    let written = state
        .engine
        .save_week(client_id, week_start, body.cells)
        .await?;
    info!(
        "Saved {} cells for client {} in week {}",
        written.len(),
        client_id,
        week_start
    );

    let entries = state.engine.week_entries(client_id, week_start).await?;
    Ok(Json(week_response(client_id, week_start, entries)))
}

pub async fn unbilled(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
    Query(query): Query<UnbilledQuery>,
) -> ApiResult<Json<UnbilledSelection>> {
    let selection = state
        .engine
        .select_unbilled(client_id, query.start, query.end)
        .await?;
    Ok(Json(selection))
}

pub async fn upsert_entry(
    State(state): State<AppState>,
    Json(input): Json<EntryInput>,
) -> ApiResult<Json<TimeEntry>> {
    Ok(Json(state.engine.upsert_entry(input).await?))
}

pub async fn delete_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.engine.delete_entry(entry_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn week_summary(
    State(state): State<AppState>,
    Path(week_start): Path<NaiveDate>,
) -> ApiResult<Json<WeekSummary>> {
    Ok(Json(state.engine.weekly_total_across_clients(week_start).await?))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    Query(query): Query<InvoiceListQuery>,
) -> ApiResult<Json<Vec<Invoice>>> {
    Ok(Json(state.engine.list_invoices(query.client_id).await?))
}

pub async fn create_invoice(
    State(state): State<AppState>,
    Json(request): Json<NewInvoice>,
) -> ApiResult<(StatusCode, Json<InvoiceDetail>)> {
    info!(
        "Invoice requested for client {} with {} entries",
        request.client_id,
        request.entry_ids.len()
    );
    let detail = state.engine.create_invoice_detail(request).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> ApiResult<Json<InvoiceDetail>> {
    Ok(Json(state.engine.invoice_detail(invoice_id).await?))
}

pub async fn delete_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> ApiResult<Json<Invoice>> {
    Ok(Json(state.engine.delete_invoice(invoice_id).await?))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(update): Json<StatusUpdate>,
) -> ApiResult<Json<Invoice>> {
    Ok(Json(state.engine.update_status(invoice_id, update.status).await?))
}
