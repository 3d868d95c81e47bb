//! Payment provider trait definition.
//!
//! Every external payment network is integrated through this one contract so
//! the orchestrators stay provider-agnostic. Adapters are stateless, never
//! persist anything, and own their own retry policy for network calls.

use async_trait::async_trait;
use http::HeaderMap;

use crate::error::AppResult;
use crate::providers::registry::ProviderName;
use crate::providers::types::{
    CaptureOutcome, CaptureRequest, ProviderSession, RefundCall, RefundOutcome, RemoteStatus,
    SessionRequest, WebhookEvent,
};

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Registry name this adapter is registered under.
    fn name(&self) -> ProviderName;

    /// Open a provider-hosted checkout flow for a reservation.
    ///
    /// Capture-only processors reject this with a validation error.
    async fn create_session(&self, request: SessionRequest) -> AppResult<ProviderSession>;

    /// Capture a payment. Business declines come back as
    /// [`CaptureOutcome::Declined`]; only transport exhaustion is an error.
    async fn capture(&self, request: CaptureRequest) -> AppResult<CaptureOutcome>;

    /// Query the provider for the authoritative status of a transaction.
    ///
    /// `None` means the provider has no remote view to offer (manual/on-site
    /// processing) and the local record stands.
    async fn fetch_status(&self, transaction_id: &str) -> AppResult<Option<RemoteStatus>>;

    /// Refund part or all of a captured transaction.
    async fn refund(&self, call: RefundCall) -> AppResult<RefundOutcome>;

    /// Verify the authenticity of a webhook delivery.
    ///
    /// Returns `Ok(false)` when the provider rejects the signature or emits
    /// no webhooks at all; the event must not be applied in that case.
    async fn verify_webhook(&self, headers: &HeaderMap, payload: &[u8]) -> AppResult<bool>;

    /// Parse a verified payload into an event the reconciler can apply.
    fn parse_event(&self, payload: &[u8]) -> AppResult<WebhookEvent>;
}
