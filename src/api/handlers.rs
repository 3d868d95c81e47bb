//! HTTP handlers for the payment surface.
//!
//! Handlers stay thin: extract, delegate to an orchestrator, map the result.
//! The webhook endpoint is the one place errors do not round-trip to the
//! caller: signature and payload problems are logged and acknowledged with
//! 200 so the provider does not retry a delivery we will never accept.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::api::AppState;
use crate::domain::{Payment, Refund};
use crate::error::{AppError, AppResult};
use crate::orchestrator::{
    CreateSessionRequest, PaymentReceipt, ProcessPaymentRequest, RefundReceipt, RefundRequest,
    SessionCreated,
};
use crate::store::payments::PaymentAnalytics;

const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> AppResult<(StatusCode, Json<SessionCreated>)> {
    let created = state.payments.create_session(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn process_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ProcessPaymentRequest>,
) -> AppResult<Json<PaymentReceipt>> {
    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    let receipt = state
        .payments
        .process_payment(request, idempotency_key)
        .await?;
    Ok(Json(receipt))
}

pub async fn payment_status(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> AppResult<Json<Payment>> {
    let payment = state.payments.get_payment_status(payment_id).await?;
    Ok(Json(payment))
}

pub async fn create_refund(
    State(state): State<AppState>,
    Json(request): Json<RefundRequest>,
) -> AppResult<(StatusCode, Json<RefundReceipt>)> {
    let receipt = state.refunds.refund(request).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn refund_status(
    State(state): State<AppState>,
    Path(refund_id): Path<Uuid>,
) -> AppResult<Json<Refund>> {
    let refund = state
        .store
        .refund_by_id(refund_id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::not_found("refund", refund_id))?;
    Ok(Json(refund))
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Inclusive date range to half-open UTC instants. The exclusive end bound
/// is the day after `end_date`, which can overflow the calendar and must be
/// rejected rather than panicking.
fn analytics_range(
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> AppResult<(DateTime<Utc>, DateTime<Utc>)> {
    if start_date > end_date {
        return Err(AppError::validation("start_date must not be after end_date"));
    }
    let start = Utc.from_utc_datetime(
        &start_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AppError::validation("invalid start_date"))?,
    );
    let end_day = end_date
        .checked_add_days(chrono::Days::new(1))
        .ok_or_else(|| AppError::validation("end_date is out of range"))?;
    let end = Utc.from_utc_datetime(
        &end_day
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AppError::validation("invalid end_date"))?,
    );
    Ok((start, end))
}

pub async fn analytics(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsQuery>,
) -> AppResult<Json<PaymentAnalytics>> {
    let (start, end) = analytics_range(query.start_date, query.end_date)?;

    let analytics = state
        .store
        .analytics(start, end)
        .await
        .map_err(AppError::from)?;
    Ok(Json(analytics))
}

/// Webhook intake for a provider.
///
/// Verification and parse failures are acknowledged with 200: the delivery
/// will never become acceptable on retry, and an error status would only
/// drive the provider's redelivery loop. Database failures return 500 so
/// the provider retries once the store recovers.
pub async fn webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<serde_json::Value>> {
    match state.reconciler.handle(&provider, &headers, &body).await {
        Ok(outcome) => Ok(Json(json!({
            "received": true,
            "outcome": format!("{:?}", outcome),
        }))),
        Err(
            e @ (AppError::WebhookVerificationFailed
            | AppError::UnknownProvider(_)
            | AppError::Validation(_)),
        ) => {
            warn!(provider = %provider, error = %e, "webhook dropped");
            Ok(Json(json!({ "received": true })))
        }
        Err(e) => Err(e),
    }
}
