//! Types shared across all payment provider adapters.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Request to open a provider-hosted checkout session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub reservation_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// A provider-hosted checkout flow, opened before capture.
#[derive(Debug, Clone)]
pub struct ProviderSession {
    pub session_id: String,
    pub checkout_url: String,
}

/// Request to capture a payment against the provider.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub reservation_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method_ref: String,
    /// Session/transaction reference if a checkout session was opened first.
    pub transaction_id: Option<String>,
}

/// Outcome of a capture attempt.
///
/// A decline is a business outcome, not an error; transport failures never
/// reach this type (they surface as `ProviderUnavailable`).
#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    Approved {
        transaction_id: String,
    },
    /// Provider needs the customer to approve the payment out of band.
    PendingApproval {
        transaction_id: String,
        approval_url: String,
    },
    Declined {
        transaction_id: Option<String>,
        reason: String,
    },
}

/// Status the provider reports for a transaction; the authoritative remote
/// view used by the read-through status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

/// Request to refund part or all of a captured transaction.
#[derive(Debug, Clone)]
pub struct RefundCall {
    pub transaction_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub reason: String,
}

/// Outcome of a refund attempt; declines are business outcomes.
#[derive(Debug, Clone)]
pub enum RefundOutcome {
    Processed { external_refund_id: String },
    Pending { external_refund_id: String },
    Declined { reason: String },
}

/// Event classes the reconciler understands, mapped from the provider's
/// own event vocabulary by each adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PaymentCompleted,
    PaymentFailed,
    /// Checkout abandoned or voided before capture.
    PaymentCancelled,
    RefundProcessed,
    RefundFailed,
}

/// A verified, parsed webhook notification.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub kind: EventKind,
    /// Provider-side transaction identifier the event refers to.
    pub transaction_id: String,
    /// Provider-side refund identifier, present on refund events.
    pub external_refund_id: Option<String>,
}

/// Signature metadata carried on webhook deliveries. Header names follow the
/// provider-neutral `webhook-*` scheme; adapters pick out what they need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureHeaders {
    pub transmission_id: Option<String>,
    pub timestamp: Option<String>,
    pub signature: Option<String>,
    pub cert_url: Option<String>,
    pub auth_algo: Option<String>,
}

impl SignatureHeaders {
    pub fn from_header_map(headers: &http::HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        };
        Self {
            transmission_id: get("webhook-transmission-id"),
            timestamp: get("webhook-timestamp"),
            signature: get("webhook-signature"),
            cert_url: get("webhook-cert-url"),
            auth_algo: get("webhook-auth-algo"),
        }
    }
}
