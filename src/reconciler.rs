//! Webhook reconciliation.
//!
//! Providers notify us of settlement asynchronously. The reconciler verifies
//! each delivery with the adapter that owns the provider's signature scheme,
//! parses it into a neutral event, and converges the local record towards
//! the provider's view. Events are applied at most once: duplicates and
//! out-of-order deliveries that would walk an illegal or backwards edge are
//! acknowledged and dropped.

use std::sync::Arc;

use http::HeaderMap;
use tracing::{info, warn};

use crate::domain::{PaymentStatus, RefundStatus};
use crate::error::{AppError, AppResult};
use crate::providers::registry::ProviderRegistry;
use crate::providers::types::{EventKind, WebhookEvent};
use crate::store::payments::PaymentStore;

/// What applying a verified event did to the local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The local record was advanced to match the event.
    Applied,
    /// The record already reflects the event (duplicate delivery).
    AlreadyCurrent,
    /// No local record references the event's transaction. Logged and
    /// acknowledged so the provider stops redelivering.
    UnknownTransaction,
    /// Applying the event would walk an illegal or backwards edge
    /// (late delivery after the record settled). Dropped.
    StaleIgnored,
    /// Settling the refund would push the processed total past the captured
    /// amount. The refund is marked FAILED instead of settled.
    OverRefundRejected,
}

pub struct WebhookReconciler {
    store: Arc<dyn PaymentStore>,
    registry: Arc<ProviderRegistry>,
}

impl WebhookReconciler {
    pub fn new(store: Arc<dyn PaymentStore>, registry: Arc<ProviderRegistry>) -> Self {
        Self { store, registry }
    }

    /// Verify and apply one webhook delivery.
    ///
    /// A failed signature check surfaces as
    /// [`AppError::WebhookVerificationFailed`] without touching any record.
    pub async fn handle(
        &self,
        provider_name: &str,
        headers: &HeaderMap,
        payload: &[u8],
    ) -> AppResult<ReconcileOutcome> {
        let provider = self.registry.resolve_str(provider_name)?;

        if !provider.verify_webhook(headers, payload).await? {
            warn!(provider = provider_name, "webhook signature rejected");
            return Err(AppError::WebhookVerificationFailed);
        }

        let event = provider.parse_event(payload)?;
        let outcome = self.apply(&event).await?;
        info!(
            provider = provider_name,
            transaction_id = %event.transaction_id,
            kind = ?event.kind,
            outcome = ?outcome,
            "webhook reconciled"
        );
        Ok(outcome)
    }

    async fn apply(&self, event: &WebhookEvent) -> AppResult<ReconcileOutcome> {
        match event.kind {
            EventKind::PaymentCompleted => {
                self.apply_payment(&event.transaction_id, PaymentStatus::Completed)
                    .await
            }
            EventKind::PaymentFailed => {
                self.apply_payment(&event.transaction_id, PaymentStatus::Failed)
                    .await
            }
            EventKind::PaymentCancelled => {
                self.apply_payment(&event.transaction_id, PaymentStatus::Cancelled)
                    .await
            }
            EventKind::RefundProcessed => self.apply_refund(event, RefundStatus::Processed).await,
            EventKind::RefundFailed => self.apply_refund(event, RefundStatus::Failed).await,
        }
    }

    async fn apply_payment(
        &self,
        transaction_id: &str,
        target: PaymentStatus,
    ) -> AppResult<ReconcileOutcome> {
        let Some(payment) = self.store.payment_by_transaction(transaction_id).await? else {
            warn!(transaction_id, "webhook references unknown transaction");
            return Ok(ReconcileOutcome::UnknownTransaction);
        };

        if payment.status == target {
            return Ok(ReconcileOutcome::AlreadyCurrent);
        }
        if !payment.status.can_transition_to(target) {
            warn!(
                payment_id = %payment.id,
                current = %payment.status,
                target = %target,
                "stale webhook dropped"
            );
            return Ok(ReconcileOutcome::StaleIgnored);
        }

        match self
            .store
            .transition_payment(payment.id, &[payment.status], target)
            .await?
        {
            Some(_) => Ok(ReconcileOutcome::Applied),
            // Lost the race; whoever won reflects a newer provider view.
            None => Ok(ReconcileOutcome::StaleIgnored),
        }
    }

    async fn apply_refund(
        &self,
        event: &WebhookEvent,
        target: RefundStatus,
    ) -> AppResult<ReconcileOutcome> {
        let Some(external_refund_id) = event.external_refund_id.as_deref() else {
            return Err(AppError::validation(
                "refund event is missing its refund identifier",
            ));
        };
        let Some(refund) = self.store.refund_by_external_id(external_refund_id).await? else {
            warn!(external_refund_id, "webhook references unknown refund");
            return Ok(ReconcileOutcome::UnknownTransaction);
        };

        if refund.status == target {
            return Ok(ReconcileOutcome::AlreadyCurrent);
        }
        if !refund.status.can_transition_to(target) {
            warn!(
                refund_id = %refund.id,
                current = %refund.status,
                target = %target,
                "stale refund webhook dropped"
            );
            return Ok(ReconcileOutcome::StaleIgnored);
        }

        // The request-time cap only sees refunds recorded locally, so a
        // settlement that would overshoot the captured amount is re-checked
        // here and failed rather than applied.
        if target == RefundStatus::Processed {
            if let Some(payment) = self.store.payment_by_id(refund.payment_id).await? {
                let settled = self.store.processed_refund_total(payment.id).await?;
                if settled + refund.amount > payment.amount {
                    warn!(
                        refund_id = %refund.id,
                        payment_id = %payment.id,
                        refund_amount = %refund.amount,
                        settled_total = %settled,
                        captured = %payment.amount,
                        "refund settlement would exceed captured amount, marking failed"
                    );
                    self.store
                        .transition_refund(refund.id, &[refund.status], RefundStatus::Failed)
                        .await?;
                    return Ok(ReconcileOutcome::OverRefundRejected);
                }
            }
        }

        let updated = self
            .store
            .transition_refund(refund.id, &[refund.status], target)
            .await?;
        if updated.is_none() {
            return Ok(ReconcileOutcome::StaleIgnored);
        }

        if target == RefundStatus::Processed {
            self.advance_payment_aggregate(refund.payment_id).await?;
        }
        Ok(ReconcileOutcome::Applied)
    }

    /// After a refund settles asynchronously, bring the owning payment's
    /// refund aggregate status in line with the processed total.
    async fn advance_payment_aggregate(&self, payment_id: uuid::Uuid) -> AppResult<()> {
        let Some(payment) = self.store.payment_by_id(payment_id).await? else {
            warn!(%payment_id, "refund settled for a missing payment");
            return Ok(());
        };
        let total = self.store.processed_refund_total(payment_id).await?;
        let target = if total >= payment.amount {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        if payment.status == target || !payment.status.can_transition_to(target) {
            return Ok(());
        }
        self.store
            .transition_payment(payment_id, &[payment.status], target)
            .await?;
        Ok(())
    }
}
