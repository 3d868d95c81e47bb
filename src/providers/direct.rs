//! Direct card capture provider.
//!
//! Captures against a tokenized payment method in one call, no hosted page.
//! Webhook deliveries carry an HMAC-SHA256 signature over the raw payload,
//! verified locally against the shared webhook secret.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::providers::registry::ProviderName;
use crate::providers::retry::{with_retry, CallError, RetryPolicy};
use crate::providers::traits::PaymentProvider;
use crate::providers::types::{
    CaptureOutcome, CaptureRequest, EventKind, ProviderSession, RefundCall, RefundOutcome,
    RemoteStatus, SessionRequest, SignatureHeaders, WebhookEvent,
};

type HmacSha256 = Hmac<Sha256>;

/// Unknown charge statuses stay PENDING rather than settling the payment;
/// only the documented final vocabulary maps to FAILED.
fn map_remote_status(status: &str) -> RemoteStatus {
    match status {
        "succeeded" => RemoteStatus::Completed,
        "pending" | "processing" => RemoteStatus::Pending,
        "refunded" => RemoteStatus::Refunded,
        "failed" | "canceled" => RemoteStatus::Failed,
        other => {
            warn!(status = other, "unrecognized charge status, keeping pending");
            RemoteStatus::Pending
        }
    }
}

#[derive(Debug, Clone)]
pub struct CardDirectConfig {
    pub api_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

pub struct CardDirectProvider {
    config: CardDirectConfig,
    client: Client,
    policy: RetryPolicy,
}

impl CardDirectProvider {
    pub fn new(config: CardDirectConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::ProviderUnavailable {
                provider: ProviderName::CardDirect.to_string(),
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

    async fn request_json<T>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, CallError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.config.base_url, path);
        let mut request = self
            .client
            .request(method, &url)
            .header("Authorization", format!("Bearer {}", self.config.api_key));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CallError::transient(format!("request to {} failed: {}", path, e)))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            serde_json::from_str::<T>(&text)
                .map_err(|e| CallError::rejected(format!("invalid response from {}: {}", path, e)))
        } else if status.as_u16() == 429 || status.is_server_error() {
            Err(CallError::transient(format!("HTTP {} from {}", status, path)))
        } else {
            Err(CallError::rejected(format!(
                "HTTP {} from {}: {}",
                status, path, text
            )))
        }
    }

    fn signature_matches(&self, payload: &[u8], provided: &str) -> bool {
        let mut mac = match HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(payload);
        let computed = hex::encode(mac.finalize().into_bytes());
        let provided = provided.trim();

        // Constant-time comparison to prevent timing attacks.
        if computed.len() != provided.len() {
            return false;
        }
        computed
            .as_bytes()
            .iter()
            .zip(provided.as_bytes().iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    charge_id: String,
    status: String,
    #[serde(default)]
    failure_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChargeStatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    refund_id: String,
    status: String,
    #[serde(default)]
    failure_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventPayload {
    #[serde(rename = "type")]
    event_type: String,
    charge_id: String,
    #[serde(default)]
    refund_id: Option<String>,
}

#[async_trait]
impl PaymentProvider for CardDirectProvider {
    fn name(&self) -> ProviderName {
        ProviderName::CardDirect
    }

    async fn create_session(&self, request: SessionRequest) -> AppResult<ProviderSession> {
        // Direct capture still opens a provider-side intent so the webhook
        // stream has a stable transaction reference from the start.
        let body = serde_json::json!({
            "reference": format!("resv-{}", request.reservation_id),
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "return_url": request.success_url.clone(),
        });

        let response: ChargeResponse = with_retry(
            &self.policy,
            self.name(),
            "create_session",
            || self.request_json(reqwest::Method::POST, "/v1/intents", Some(&body)),
        )
        .await?;

        Ok(ProviderSession {
            session_id: response.charge_id,
            checkout_url: request.success_url,
        })
    }

    async fn capture(&self, request: CaptureRequest) -> AppResult<CaptureOutcome> {
        let body = serde_json::json!({
            "reference": format!("resv-{}", request.reservation_id),
            "intent_id": request.transaction_id,
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "source": request.payment_method_ref,
        });

        let response: ChargeResponse =
            with_retry(&self.policy, self.name(), "capture", || {
                self.request_json(reqwest::Method::POST, "/v1/charges", Some(&body))
            })
            .await?;

        info!(
            charge_id = %response.charge_id,
            status = %response.status,
            "card capture answered"
        );

        match response.status.as_str() {
            "succeeded" => Ok(CaptureOutcome::Approved {
                transaction_id: response.charge_id,
            }),
            _ => Ok(CaptureOutcome::Declined {
                transaction_id: Some(response.charge_id),
                reason: response
                    .failure_message
                    .unwrap_or_else(|| response.status.clone()),
            }),
        }
    }

    async fn fetch_status(&self, transaction_id: &str) -> AppResult<Option<RemoteStatus>> {
        let path = format!("/v1/charges/{}", transaction_id);
        let response: ChargeStatusResponse =
            with_retry(&self.policy, self.name(), "fetch_status", || {
                self.request_json(reqwest::Method::GET, &path, None)
            })
            .await?;

        Ok(Some(map_remote_status(&response.status)))
    }

    async fn refund(&self, call: RefundCall) -> AppResult<RefundOutcome> {
        let body = serde_json::json!({
            "charge_id": call.transaction_id,
            "amount": call.amount.to_string(),
            "currency": call.currency,
            "reason": call.reason,
        });

        let response: RefundResponse =
            with_retry(&self.policy, self.name(), "refund", || {
                self.request_json(reqwest::Method::POST, "/v1/refunds", Some(&body))
            })
            .await?;

        match response.status.as_str() {
            "succeeded" => Ok(RefundOutcome::Processed {
                external_refund_id: response.refund_id,
            }),
            "pending" => Ok(RefundOutcome::Pending {
                external_refund_id: response.refund_id,
            }),
            _ => Ok(RefundOutcome::Declined {
                reason: response
                    .failure_message
                    .unwrap_or_else(|| response.status.clone()),
            }),
        }
    }

    async fn verify_webhook(&self, headers: &HeaderMap, payload: &[u8]) -> AppResult<bool> {
        let sig = SignatureHeaders::from_header_map(headers);
        match sig.signature {
            Some(provided) => Ok(self.signature_matches(payload, &provided)),
            None => Ok(false),
        }
    }

    fn parse_event(&self, payload: &[u8]) -> AppResult<WebhookEvent> {
        let event: EventPayload = serde_json::from_slice(payload)
            .map_err(|e| AppError::validation(format!("unparseable webhook payload: {}", e)))?;

        let kind = match event.event_type.as_str() {
            "charge.succeeded" => EventKind::PaymentCompleted,
            "charge.failed" => EventKind::PaymentFailed,
            "refund.succeeded" => EventKind::RefundProcessed,
            "refund.failed" => EventKind::RefundFailed,
            other => {
                return Err(AppError::validation(format!(
                    "unsupported event type '{}'",
                    other
                )))
            }
        };

        Ok(WebhookEvent {
            kind,
            transaction_id: event.charge_id,
            external_refund_id: event.refund_id,
        })
    }
}
