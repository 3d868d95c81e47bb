//! Redirect-based hosted-checkout provider.
//!
//! The customer is sent to a provider-hosted page via `checkout_url`; capture
//! and refunds go through the provider's JSON API. Webhook deliveries are
//! authenticated by calling the provider's own signature-verification
//! endpoint with the original payload and signature headers.

use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult};
use crate::providers::registry::ProviderName;
use crate::providers::retry::{with_retry, CallError, RetryPolicy};
use crate::providers::traits::PaymentProvider;
use crate::providers::types::{
    CaptureOutcome, CaptureRequest, EventKind, ProviderSession, RefundCall, RefundOutcome,
    RemoteStatus, SessionRequest, SignatureHeaders, WebhookEvent,
};

#[derive(Debug, Clone)]
pub struct HostedCheckoutConfig {
    pub secret_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

pub struct HostedCheckoutProvider {
    config: HostedCheckoutConfig,
    client: Client,
    policy: RetryPolicy,
}

impl HostedCheckoutProvider {
    pub fn new(config: HostedCheckoutConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::ProviderUnavailable {
                provider: ProviderName::HostedCheckout.to_string(),
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

    /// One authenticated POST attempt; retry classification only, no looping.
    async fn post_json<T>(&self, path: &str, body: &serde_json::Value) -> Result<T, CallError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.config.base_url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.secret_key)
            .json(body)
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

    async fn get_json<T>(&self, path: &str) -> Result<T, CallError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.config.base_url, path);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.secret_key)
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
}

/// Only statuses the provider documents as final may settle a payment.
/// Anything outside the known vocabulary stays PENDING so a later poll or
/// webhook can resolve it.
fn map_remote_status(status: &str) -> RemoteStatus {
    match status {
        "approved" | "completed" => RemoteStatus::Completed,
        "pending" | "requires_approval" => RemoteStatus::Pending,
        "refunded" => RemoteStatus::Refunded,
        "failed" | "declined" | "cancelled" | "expired" => RemoteStatus::Failed,
        other => {
            warn!(status = other, "unrecognized hosted checkout status, keeping pending");
            RemoteStatus::Pending
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    checkout_url: String,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    id: String,
    status: String,
    #[serde(default)]
    approval_url: Option<String>,
    #[serde(default)]
    decline_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
    status: String,
    #[serde(default)]
    decline_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    verification_status: String,
}

#[derive(Debug, Deserialize)]
struct EventPayload {
    event_type: String,
    resource: EventResource,
}

#[derive(Debug, Deserialize)]
struct EventResource {
    #[serde(rename = "transaction_id")]
    transaction_id: String,
    #[serde(default)]
    refund_id: Option<String>,
}

#[async_trait]
impl PaymentProvider for HostedCheckoutProvider {
    fn name(&self) -> ProviderName {
        ProviderName::HostedCheckout
    }

    async fn create_session(&self, request: SessionRequest) -> AppResult<ProviderSession> {
        info!(
            reservation_id = request.reservation_id,
            amount = %request.amount,
            currency = %request.currency,
            "opening hosted checkout session"
        );

        let body = serde_json::json!({
            "reference": format!("resv-{}", request.reservation_id),
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "success_url": request.success_url,
            "cancel_url": request.cancel_url,
        });

        let response: SessionResponse = with_retry(
            &self.policy,
            self.name(),
            "create_session",
            || self.post_json("/v1/checkout/sessions", &body),
        )
        .await?;

        Ok(ProviderSession {
            session_id: response.id,
            checkout_url: response.checkout_url,
        })
    }

    async fn capture(&self, request: CaptureRequest) -> AppResult<CaptureOutcome> {
        let body = serde_json::json!({
            "reference": format!("resv-{}", request.reservation_id),
            "session_id": request.transaction_id,
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "payment_method": request.payment_method_ref,
        });

        let response: PaymentResponse =
            with_retry(&self.policy, self.name(), "capture", || {
                self.post_json("/v1/payments", &body)
            })
            .await?;

        info!(
            transaction_id = %response.id,
            status = %response.status,
            "hosted checkout capture answered"
        );

        match response.status.as_str() {
            "approved" | "completed" => Ok(CaptureOutcome::Approved {
                transaction_id: response.id,
            }),
            "requires_approval" => {
                let approval_url = response.approval_url.ok_or_else(|| {
                    AppError::ProviderUnavailable {
                        provider: self.name().to_string(),
                        message: "requires_approval response without approval_url".to_string(),
                    }
                })?;
                Ok(CaptureOutcome::PendingApproval {
                    transaction_id: response.id,
                    approval_url,
                })
            }
            _ => Ok(CaptureOutcome::Declined {
                transaction_id: Some(response.id),
                reason: response
                    .decline_reason
                    .unwrap_or_else(|| response.status.clone()),
            }),
        }
    }

    async fn fetch_status(&self, transaction_id: &str) -> AppResult<Option<RemoteStatus>> {
        let path = format!("/v1/payments/{}", transaction_id);
        let response: StatusResponse =
            with_retry(&self.policy, self.name(), "fetch_status", || {
                self.get_json(&path)
            })
            .await?;

        Ok(Some(map_remote_status(&response.status)))
    }

    async fn refund(&self, call: RefundCall) -> AppResult<RefundOutcome> {
        let path = format!("/v1/payments/{}/refunds", call.transaction_id);
        let body = serde_json::json!({
            "amount": call.amount.to_string(),
            "currency": call.currency,
            "reason": call.reason,
        });

        let response: RefundResponse =
            with_retry(&self.policy, self.name(), "refund", || {
                self.post_json(&path, &body)
            })
            .await?;

        match response.status.as_str() {
            "processed" => Ok(RefundOutcome::Processed {
                external_refund_id: response.id,
            }),
            "pending" => Ok(RefundOutcome::Pending {
                external_refund_id: response.id,
            }),
            _ => Ok(RefundOutcome::Declined {
                reason: response
                    .decline_reason
                    .unwrap_or_else(|| response.status.clone()),
            }),
        }
    }

    async fn verify_webhook(&self, headers: &HeaderMap, payload: &[u8]) -> AppResult<bool> {
        let sig = SignatureHeaders::from_header_map(headers);
        if sig.signature.is_none() || sig.transmission_id.is_none() {
            return Ok(false);
        }

        let event: serde_json::Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(_) => return Ok(false),
        };

        let body = serde_json::json!({
            "transmission_id": sig.transmission_id,
            "transmission_time": sig.timestamp,
            "cert_url": sig.cert_url,
            "auth_algo": sig.auth_algo,
            "transmission_sig": sig.signature,
            "webhook_event": event,
        });

        let response: VerifyResponse = with_retry(
            &self.policy,
            self.name(),
            "verify_webhook",
            || self.post_json("/v1/notifications/verify-webhook-signature", &body),
        )
        .await?;

        if response.verification_status != "SUCCESS" {
            error!(
                status = %response.verification_status,
                "hosted checkout rejected webhook signature"
            );
            return Ok(false);
        }
        Ok(true)
    }

    fn parse_event(&self, payload: &[u8]) -> AppResult<WebhookEvent> {
        let event: EventPayload = serde_json::from_slice(payload)
            .map_err(|e| AppError::validation(format!("unparseable webhook payload: {}", e)))?;

        let kind = match event.event_type.as_str() {
            "payment.completed" => EventKind::PaymentCompleted,
            "payment.failed" => EventKind::PaymentFailed,
            "payment.cancelled" => EventKind::PaymentCancelled,
            "refund.processed" => EventKind::RefundProcessed,
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
            transaction_id: event.resource.transaction_id,
            external_refund_id: event.resource.refund_id,
        })
    }
}
