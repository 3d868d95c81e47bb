pub mod handlers;
pub mod health;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::orchestrator::{PaymentOrchestrator, RefundOrchestrator};
use crate::reconciler::WebhookReconciler;
use crate::store::payments::PaymentStore;

#[derive(Clone)]
pub struct AppState {
    pub payments: Arc<PaymentOrchestrator>,
    pub refunds: Arc<RefundOrchestrator>,
    pub reconciler: Arc<WebhookReconciler>,
    pub store: Arc<dyn PaymentStore>,
    pub environment: String,
    pub provider_names: Vec<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/payments/session", post(handlers::create_session))
        .route("/payments/process", post(handlers::process_payment))
        .route(
            "/payments/:payment_id/status",
            get(handlers::payment_status),
        )
        .route("/payments/refund", post(handlers::create_refund))
        .route("/payments/refund/:refund_id", get(handlers::refund_status))
        .route("/payments/analytics", get(handlers::analytics))
        .route("/webhooks/:provider", post(handlers::webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
