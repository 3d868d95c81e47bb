//! On-site/manual payment processing (cash or card at the rental desk).
//!
//! There is no external network behind this adapter. Capture and refund are
//! acknowledged immediately with locally generated references, there is no
//! authoritative remote status, and no webhooks are ever emitted.

use async_trait::async_trait;
use http::HeaderMap;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::providers::registry::ProviderName;
use crate::providers::traits::PaymentProvider;
use crate::providers::types::{
    CaptureOutcome, CaptureRequest, ProviderSession, RefundCall, RefundOutcome, RemoteStatus,
    SessionRequest, WebhookEvent,
};

#[derive(Default)]
pub struct OnSiteProvider;

impl OnSiteProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PaymentProvider for OnSiteProvider {
    fn name(&self) -> ProviderName {
        ProviderName::OnSite
    }

    async fn create_session(&self, request: SessionRequest) -> AppResult<ProviderSession> {
        // The "session" is just a desk reference; the customer pays at pickup.
        let session_id = format!("onsite-{}", Uuid::new_v4());
        info!(
            reservation_id = request.reservation_id,
            session_id = %session_id,
            "registered on-site payment session"
        );
        Ok(ProviderSession {
            session_id,
            checkout_url: request.success_url,
        })
    }

    async fn capture(&self, request: CaptureRequest) -> AppResult<CaptureOutcome> {
        let transaction_id = request
            .transaction_id
            .unwrap_or_else(|| format!("onsite-{}", Uuid::new_v4()));
        info!(
            reservation_id = request.reservation_id,
            transaction_id = %transaction_id,
            amount = %request.amount,
            "recorded on-site payment"
        );
        Ok(CaptureOutcome::Approved { transaction_id })
    }

    async fn fetch_status(&self, _transaction_id: &str) -> AppResult<Option<RemoteStatus>> {
        // No remote authority; the local record stands.
        Ok(None)
    }

    async fn refund(&self, call: RefundCall) -> AppResult<RefundOutcome> {
        let external_refund_id = format!("onsite-ref-{}", Uuid::new_v4());
        info!(
            transaction_id = %call.transaction_id,
            refund_id = %external_refund_id,
            amount = %call.amount,
            "recorded on-site cash refund"
        );
        Ok(RefundOutcome::Processed { external_refund_id })
    }

    async fn verify_webhook(&self, _headers: &HeaderMap, _payload: &[u8]) -> AppResult<bool> {
        // On-site processing emits no webhooks; anything arriving is bogus.
        Ok(false)
    }

    fn parse_event(&self, _payload: &[u8]) -> AppResult<WebhookEvent> {
        Err(AppError::validation(
            "on-site provider does not emit webhook events",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn capture_approves_immediately() {
        let provider = OnSiteProvider::new();
        let outcome = provider
            .capture(CaptureRequest {
                reservation_id: 42,
                amount: dec!(150.00),
                currency: "MAD".to_string(),
                payment_method_ref: "cash".to_string(),
                transaction_id: None,
            })
            .await
            .unwrap();
        assert!(matches!(outcome, CaptureOutcome::Approved { .. }));
    }

    #[tokio::test]
    async fn capture_keeps_an_existing_session_reference() {
        let provider = OnSiteProvider::new();
        let outcome = provider
            .capture(CaptureRequest {
                reservation_id: 42,
                amount: dec!(150.00),
                currency: "MAD".to_string(),
                payment_method_ref: "cash".to_string(),
                transaction_id: Some("onsite-abc".to_string()),
            })
            .await
            .unwrap();
        match outcome {
            CaptureOutcome::Approved { transaction_id } => {
                assert_eq!(transaction_id, "onsite-abc")
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn webhooks_never_verify() {
        let provider = OnSiteProvider::new();
        assert!(!provider
            .verify_webhook(&HeaderMap::new(), b"{}")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn no_remote_status_is_reported() {
        let provider = OnSiteProvider::new();
        assert_eq!(provider.fetch_status("onsite-x").await.unwrap(), None);
    }
}
