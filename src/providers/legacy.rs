//! Legacy capture-only gateway.
//!
//! An older acquirer integration that knows nothing about hosted checkout
//! pages or webhooks: capture, status query and refund only, over a
//! form-encoded API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::providers::registry::ProviderName;
use crate::providers::retry::{with_retry, CallError, RetryPolicy};
use crate::providers::traits::PaymentProvider;
use crate::providers::types::{
    CaptureOutcome, CaptureRequest, ProviderSession, RefundCall, RefundOutcome, RemoteStatus,
    SessionRequest, WebhookEvent,
};

#[derive(Debug, Clone)]
pub struct LegacyGatewayConfig {
    pub merchant_id: String,
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

pub struct LegacyGatewayProvider {
    config: LegacyGatewayConfig,
    client: Client,
    policy: RetryPolicy,
}

impl LegacyGatewayProvider {
    pub fn new(config: LegacyGatewayConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::ProviderUnavailable {
                provider: ProviderName::LegacyGateway.to_string(),
                message: format!("failed to build HTTP client: {}", e),
            })?;
        let policy = RetryPolicy {
            max_attempts: config.max_attempts,
            ..RetryPolicy::default()
        };
        Ok(Self {
            config,
            client,
            policy,
        })
    }

    async fn post_form(
        &self,
        path: &str,
        form: &HashMap<&'static str, String>,
    ) -> Result<GatewayResponse, CallError> {
        let url = format!("{}{}", self.config.base_url, path);
        let response = self
            .client
            .post(&url)
            .form(form)
            .send()
            .await
            .map_err(|e| CallError::transient(format!("request to {} failed: {}", path, e)))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            serde_json::from_str::<GatewayResponse>(&text)
                .map_err(|e| CallError::rejected(format!("invalid response from {}: {}", path, e)))
        } else if status.is_server_error() {
            Err(CallError::transient(format!("HTTP {} from {}", status, path)))
        } else {
            Err(CallError::rejected(format!(
                "HTTP {} from {}: {}",
                status, path, text
            )))
        }
    }

    fn base_form(&self) -> HashMap<&'static str, String> {
        let mut form = HashMap::new();
        form.insert("merchant_id", self.config.merchant_id.clone());
        form.insert("api_key", self.config.api_key.clone());
        form
    }
}

/// Results outside the gateway's documented vocabulary are treated as still
/// pending; the gateway has no webhooks, so the next status poll retries.
fn map_remote_status(result: &str) -> RemoteStatus {
    match result {
        "approved" | "settled" => RemoteStatus::Completed,
        "pending" => RemoteStatus::Pending,
        "refunded" => RemoteStatus::Refunded,
        "declined" | "failed" | "voided" => RemoteStatus::Failed,
        other => {
            warn!(result = other, "unrecognized gateway result, keeping pending");
            RemoteStatus::Pending
        }
    }
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    result: String,
    #[serde(default)]
    transaction: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[async_trait]
impl PaymentProvider for LegacyGatewayProvider {
    fn name(&self) -> ProviderName {
        ProviderName::LegacyGateway
    }

    async fn create_session(&self, _request: SessionRequest) -> AppResult<ProviderSession> {
        Err(AppError::validation(
            "legacy gateway is capture-only and does not support checkout sessions",
        ))
    }

    async fn capture(&self, request: CaptureRequest) -> AppResult<CaptureOutcome> {
        let mut form = self.base_form();
        form.insert("reference", format!("resv-{}", request.reservation_id));
        form.insert("amount", request.amount.to_string());
        form.insert("currency", request.currency.clone());
        form.insert("card_token", request.payment_method_ref.clone());

        let response = with_retry(&self.policy, self.name(), "capture", || {
            self.post_form("/gateway/capture", &form)
        })
        .await?;

        info!(result = %response.result, "legacy gateway capture answered");

        match response.result.as_str() {
            "approved" => {
                let transaction_id = response.transaction.ok_or_else(|| {
                    AppError::ProviderUnavailable {
                        provider: self.name().to_string(),
                        message: "approved capture without a transaction reference".to_string(),
                    }
                })?;
                Ok(CaptureOutcome::Approved { transaction_id })
            }
            _ => Ok(CaptureOutcome::Declined {
                transaction_id: response.transaction,
                reason: response
                    .message
                    .unwrap_or_else(|| response.result.clone()),
            }),
        }
    }

    async fn fetch_status(&self, transaction_id: &str) -> AppResult<Option<RemoteStatus>> {
        let mut form = self.base_form();
        form.insert("transaction", transaction_id.to_string());

        let response = with_retry(&self.policy, self.name(), "fetch_status", || {
            self.post_form("/gateway/status", &form)
        })
        .await?;

        Ok(Some(map_remote_status(&response.result)))
    }

    async fn refund(&self, call: RefundCall) -> AppResult<RefundOutcome> {
        let mut form = self.base_form();
        form.insert("transaction", call.transaction_id.clone());
        form.insert("amount", call.amount.to_string());
        form.insert("reason", call.reason.clone());

        let response = with_retry(&self.policy, self.name(), "refund", || {
            self.post_form("/gateway/refund", &form)
        })
        .await?;

        match response.result.as_str() {
            "approved" => {
                let external_refund_id = response.transaction.ok_or_else(|| {
                    AppError::ProviderUnavailable {
                        provider: self.name().to_string(),
                        message: "approved refund without a refund reference".to_string(),
                    }
                })?;
                Ok(RefundOutcome::Processed { external_refund_id })
            }
            "pending" => Ok(RefundOutcome::Pending {
                external_refund_id: response
                    .transaction
                    .unwrap_or_else(|| call.transaction_id.clone()),
            }),
            _ => Ok(RefundOutcome::Declined {
                reason: response
                    .message
                    .unwrap_or_else(|| response.result.clone()),
            }),
        }
    }

    async fn verify_webhook(&self, _headers: &HeaderMap, _payload: &[u8]) -> AppResult<bool> {
        // The legacy network has no webhook channel; reconciliation happens
        // through the read-through status query instead.
        Ok(false)
    }

    fn parse_event(&self, _payload: &[u8]) -> AppResult<WebhookEvent> {
        Err(AppError::validation(
            "legacy gateway does not emit webhook events",
        ))
    }
}
