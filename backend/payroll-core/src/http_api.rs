// src/http_api.rs
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::account_ledger::{AccountLedger, AccountTransaction, LedgerError};
use crate::clock::parse_timestamp;
use crate::employee_directory::EmployeeDirectory;
use crate::payroll::{NewReceipt, PayrollService, ReceiptPatch};
use crate::AppError;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<AccountLedger>,
    pub payroll: Arc<PayrollService>,
    pub directory: Arc<dyn EmployeeDirectory>,
}

pub fn build_router(state: AppState) -> Router {
    let account_routes = Router::new()
        .route("/_ping", get(handle_account_ping))
        .route("/employee/{employee_id}", get(handle_get_account))
        .route(
            "/employee/{employee_id}/transactions.csv",
            get(handle_export_transactions),
        )
        .route(
            "/employee/{employee_id}/weekly-deduction",
            put(handle_update_weekly_deduction),
        )
        .route("/purchase", post(handle_add_purchase))
        .route("/payment", post(handle_add_payment));

    let payroll_routes = Router::new()
        .route("/", post(handle_create_receipt).get(handle_list_receipts))
        .route("/employee/{employee_id}", get(handle_receipts_for_employee))
        .route("/employee/{employee_id}/weekly", get(handle_weekly_breakdown))
        .route(
            "/{id}",
            get(handle_get_receipt)
                .put(handle_update_receipt)
                .delete(handle_delete_receipt),
        );

    let api_routes = Router::new()
        .nest("/account", account_routes)
        .nest("/payroll", payroll_routes);

    Router::new()
        .route("/health", get(handle_health))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Lenient body parsing ---

/// Accepts a JSON number or a numeric string.
pub fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            let raw = n.to_string();
            Decimal::from_str(&raw)
                .or_else(|_| Decimal::from_scientific(&raw))
                .ok()
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            Decimal::from_str(trimmed)
                .or_else(|_| Decimal::from_scientific(trimmed))
                .ok()
        }
        _ => None,
    }
}

/// `true` or `"true"`; anything else is false.
pub fn parse_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true",
        _ => false,
    }
}

fn field<'a>(body: &'a Value, name: &str) -> Option<&'a Value> {
    body.get(name).filter(|v| !v.is_null())
}

fn string_field(body: &Value, name: &str) -> Option<String> {
    match field(body, name)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn decimal_or_zero(body: &Value, name: &str) -> Decimal {
    field(body, name).and_then(parse_decimal).unwrap_or(Decimal::ZERO)
}

fn date_field(body: &Value, name: &str) -> Option<DateTime<Utc>> {
    string_field(body, name).as_deref().and_then(parse_timestamp)
}

fn required_amount(body: &Value) -> Result<Decimal, AppError> {
    let raw = field(body, "amount");
    match raw.and_then(parse_decimal) {
        Some(amount) if amount > Decimal::ZERO => Ok(amount),
        _ => Err(AppError::Ledger(LedgerError::InvalidAmount {
            raw: raw.map(|v| v.to_string()).unwrap_or_default(),
        })),
    }
}

async fn require_employee(state: &AppState, employee_id: &str) -> Result<(), AppError> {
    match state.directory.find_employee(employee_id).await? {
        Some(_) => Ok(()),
        None => Err(AppError::EmployeeNotFound(employee_id.to_string())),
    }
}

// --- Handlers ---

async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn handle_account_ping() -> Json<Value> {
    Json(json!({ "ok": true, "scope": "account" }))
}

async fn handle_get_account(
    State(state): State<AppState>,
    Path(employee_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    require_employee(&state, &employee_id).await?;
    let account = state.ledger.get_or_create(&employee_id).await?;
    let transactions = state.ledger.get_transaction_history(&employee_id).await?;
    Ok(Json(json!({ "account": account, "transactions": transactions })))
}

async fn handle_export_transactions(
    State(state): State<AppState>,
    Path(employee_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    require_employee(&state, &employee_id).await?;
    let transactions = state.ledger.get_transaction_history(&employee_id).await?;
    let body = transactions_to_csv(&transactions)?;
    info!(
        "Exported {} transactions for employee {} as CSV",
        transactions.len(),
        employee_id
    );
    Ok((
        [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        body,
    ))
}

pub fn transactions_to_csv(transactions: &[AccountTransaction]) -> Result<String, AppError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(["id", "date", "type", "amount", "description"])
        .map_err(|e| AppError::Export(e.to_string()))?;
    for tx in transactions {
        let date = tx.date.to_rfc3339();
        let amount = tx.amount.to_string();
        writer
            .write_record([
                tx.id.as_str(),
                date.as_str(),
                tx.kind.as_str(),
                amount.as_str(),
                tx.description.as_deref().unwrap_or(""),
            ])
            .map_err(|e| AppError::Export(e.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| AppError::Export(e.to_string()))
}

async fn handle_update_weekly_deduction(
    State(state): State<AppState>,
    Path(employee_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    require_employee(&state, &employee_id).await?;
    // Non-numeric input counts as zero.
    let amount = decimal_or_zero(&body, "weeklyDeductionAmount");
    let account = state
        .ledger
        .set_weekly_deduction_amount(&employee_id, amount)
        .await?;
    Ok(Json(json!({ "msg": "Weekly deduction updated", "account": account })))
}

async fn handle_add_purchase(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let employee_id = string_field(&body, "employeeId").unwrap_or_default();
    require_employee(&state, &employee_id).await?;
    let amount = required_amount(&body)?;

    let entry = state
        .ledger
        .record_purchase(
            &employee_id,
            amount,
            string_field(&body, "description"),
            string_field(&body, "date").as_deref(),
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "msg": "Purchase recorded",
            "account": entry.account,
            "transaction": entry.transaction,
        })),
    ))
}

async fn handle_add_payment(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let employee_id = string_field(&body, "employeeId").unwrap_or_default();
    require_employee(&state, &employee_id).await?;
    let amount = required_amount(&body)?;

    let entry = state
        .ledger
        .record_payment(
            &employee_id,
            amount,
            string_field(&body, "description"),
            string_field(&body, "date").as_deref(),
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "msg": "Payment recorded",
            "account": entry.account,
            "transaction": entry.transaction,
        })),
    ))
}

async fn handle_create_receipt(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let input = NewReceipt {
        employee_id: string_field(&body, "employeeId").unwrap_or_default(),
        period: string_field(&body, "period").unwrap_or_default(),
        payment_date: date_field(&body, "paymentDate"),
        signed: field(&body, "signed").map(parse_flag).unwrap_or(false),
        signed_date: date_field(&body, "signedDate"),
        has_presentismo: field(&body, "hasPresentismo").map(parse_flag).unwrap_or(false),
        extra_hours: decimal_or_zero(&body, "extraHours"),
        other_additions: decimal_or_zero(&body, "otherAdditions"),
        discounts: decimal_or_zero(&body, "discounts"),
        advance_requested: field(&body, "advanceRequested").map(parse_flag).unwrap_or(false),
        advance_date: date_field(&body, "advanceDate"),
        advance_amount: decimal_or_zero(&body, "advanceAmount"),
        net_amount: decimal_or_zero(&body, "netAmount"),
    };

    let receipt = state.payroll.create_receipt(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "msg": "Receipt created", "receipt": receipt })),
    ))
}

async fn handle_list_receipts(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let receipts = state.payroll.list_receipts().await?;
    Ok(Json(json!(receipts)))
}

async fn handle_receipts_for_employee(
    State(state): State<AppState>,
    Path(employee_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let receipts = state.payroll.receipts_for_employee(&employee_id).await?;
    Ok(Json(json!(receipts)))
}

#[derive(Debug, Deserialize)]
struct WeeklyQuery {
    period: Option<String>,
    weeks: Option<String>,
}

async fn handle_weekly_breakdown(
    State(state): State<AppState>,
    Path(employee_id): Path<String>,
    Query(query): Query<WeeklyQuery>,
) -> Result<Json<Value>, AppError> {
    // Unparsable week counts fall back to the default.
    let weeks = query
        .weeks
        .as_deref()
        .and_then(|w| w.trim().parse::<i64>().ok());
    let schedule = state
        .payroll
        .weekly_breakdown_for(&employee_id, query.period.as_deref(), weeks)
        .await?;
    Ok(Json(json!(schedule)))
}

async fn handle_get_receipt(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let receipt = state.payroll.get_receipt(&id).await?;
    Ok(Json(json!(receipt)))
}

async fn handle_update_receipt(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    // A present but non-numeric amount is stored as zero.
    let amount = |name: &str| field(&body, name).map(|v| parse_decimal(v).unwrap_or(Decimal::ZERO));
    let patch = ReceiptPatch {
        period: string_field(&body, "period"),
        payment_date: date_field(&body, "paymentDate"),
        signed: field(&body, "signed").map(parse_flag),
        signed_date: date_field(&body, "signedDate"),
        has_presentismo: field(&body, "hasPresentismo").map(parse_flag),
        extra_hours: amount("extraHours"),
        other_additions: amount("otherAdditions"),
        discounts: amount("discounts"),
        advance_requested: field(&body, "advanceRequested").map(parse_flag),
        advance_date: date_field(&body, "advanceDate"),
        advance_amount: amount("advanceAmount"),
        net_amount: amount("netAmount"),
    };

    let receipt = state.payroll.update_receipt(&id, patch).await?;
    Ok(Json(json!({ "msg": "Receipt updated", "receipt": receipt })))
}

async fn handle_delete_receipt(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.payroll.delete_receipt(&id).await?;
    Ok(Json(json!({ "msg": "Receipt deleted" })))
}
