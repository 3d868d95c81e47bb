//! Payment and refund orchestration.
//!
//! The orchestrators own the business rules around the payment lifecycle:
//! validation before any external call, provider routing through the
//! registry, guarded status transitions through the store, and the
//! cumulative refund cap. Provider declines are normal outcomes recorded on
//! the entity, never errors.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Payment, PaymentStatus, RefundStatus};
use crate::error::{AppError, AppResult};
use crate::idempotency::IdempotencyGuard;
use crate::providers::registry::{ProviderName, ProviderRegistry};
use crate::providers::types::{
    CaptureOutcome, CaptureRequest, RefundCall, RefundOutcome, RemoteStatus, SessionRequest,
};
use crate::reservations::ReservationDirectory;
use crate::store::payments::{NewPayment, NewRefund, PaymentStore};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    pub reservation_id: i64,
    pub provider: ProviderName,
    pub amount: Decimal,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionCreated {
    pub payment_id: Uuid,
    pub session_id: String,
    pub checkout_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessPaymentRequest {
    pub reservation_id: i64,
    pub provider: ProviderName,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method_ref: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    /// Set when the provider needs out-of-band customer approval.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundRequest {
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundReceipt {
    pub refund_id: Uuid,
    pub payment_id: Uuid,
    pub status: RefundStatus,
    pub external_refund_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_reason: Option<String>,
}

pub struct PaymentOrchestrator {
    store: Arc<dyn PaymentStore>,
    registry: Arc<ProviderRegistry>,
    reservations: Arc<dyn ReservationDirectory>,
    idempotency: Arc<IdempotencyGuard<PaymentReceipt>>,
}

impl PaymentOrchestrator {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        registry: Arc<ProviderRegistry>,
        reservations: Arc<dyn ReservationDirectory>,
        idempotency: Arc<IdempotencyGuard<PaymentReceipt>>,
    ) -> Self {
        Self {
            store,
            registry,
            reservations,
            idempotency,
        }
    }

    /// Open a provider-hosted checkout session for a reservation.
    ///
    /// The PENDING payment row is written before the provider is contacted,
    /// so a crash mid-call leaves a local record to reconcile against. An
    /// existing unclaimed PENDING row for the reservation is reused instead
    /// of inserted again.
    pub async fn create_session(&self, request: CreateSessionRequest) -> AppResult<SessionCreated> {
        validate_money(request.amount, &request.currency)?;

        let reservation = self
            .reservations
            .find(request.reservation_id)
            .await?
            .ok_or_else(|| AppError::not_found("reservation", request.reservation_id))?;
        if reservation.total_amount != request.amount {
            return Err(AppError::validation(format!(
                "amount {} does not match reservation total {}",
                request.amount, reservation.total_amount
            )));
        }
        if !reservation.currency.eq_ignore_ascii_case(&request.currency) {
            return Err(AppError::validation(format!(
                "currency {} does not match reservation currency {}",
                request.currency, reservation.currency
            )));
        }

        let provider = self.registry.resolve(request.provider)?;
        let payment = self.claim_or_create_payment(&request).await?;

        let session = provider
            .create_session(SessionRequest {
                reservation_id: request.reservation_id,
                amount: request.amount,
                currency: request.currency.to_uppercase(),
                success_url: request.success_url,
                cancel_url: request.cancel_url,
            })
            .await?;

        let payment = self
            .store
            .attach_transaction(payment.id, &session.session_id)
            .await?;

        info!(
            payment_id = %payment.id,
            reservation_id = request.reservation_id,
            provider = %request.provider,
            session_id = %session.session_id,
            "checkout session created"
        );

        Ok(SessionCreated {
            payment_id: payment.id,
            session_id: session.session_id,
            checkout_url: session.checkout_url,
        })
    }

    async fn claim_or_create_payment(
        &self,
        request: &CreateSessionRequest,
    ) -> AppResult<Payment> {
        if let Some(existing) = self
            .store
            .payment_by_reservation(request.reservation_id)
            .await?
        {
            if existing.status == PaymentStatus::Pending
                && existing.transaction_id.is_none()
                && existing.provider == request.provider
            {
                return Ok(existing);
            }
            return Err(AppError::InvalidState {
                entity: "payment",
                current: existing.status.to_string(),
                operation: "create_session",
            });
        }

        match self
            .store
            .create_payment(NewPayment {
                reservation_id: request.reservation_id,
                amount: request.amount,
                currency: request.currency.to_uppercase(),
                provider: request.provider,
            })
            .await
        {
            Ok(payment) => Ok(payment),
            // Concurrent session creation for the same reservation.
            Err(e) if e.is_unique_violation() => Err(AppError::InvalidState {
                entity: "payment",
                current: PaymentStatus::Pending.to_string(),
                operation: "create_session",
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Capture a payment for a reservation.
    ///
    /// When an idempotency key is supplied the whole capture runs under the
    /// key's slot, so a duplicate submission replays the stored receipt
    /// instead of charging twice.
    pub async fn process_payment(
        &self,
        request: ProcessPaymentRequest,
        idempotency_key: Option<&str>,
    ) -> AppResult<PaymentReceipt> {
        match idempotency_key {
            Some(key) if !key.trim().is_empty() => {
                self.idempotency
                    .run(key.trim(), || self.capture_once(request))
                    .await
            }
            _ => self.capture_once(request).await,
        }
    }

    async fn capture_once(&self, request: ProcessPaymentRequest) -> AppResult<PaymentReceipt> {
        validate_money(request.amount, &request.currency)?;
        if request.payment_method_ref.trim().is_empty() {
            return Err(AppError::validation("payment_method_ref must not be empty"));
        }

        let payment = self
            .store
            .payment_by_reservation(request.reservation_id)
            .await?
            .ok_or_else(|| AppError::not_found("payment", request.reservation_id))?;

        if payment.status != PaymentStatus::Pending {
            return Err(AppError::InvalidState {
                entity: "payment",
                current: payment.status.to_string(),
                operation: "capture",
            });
        }
        if payment.provider != request.provider {
            return Err(AppError::validation(format!(
                "payment is bound to provider {}, not {}",
                payment.provider, request.provider
            )));
        }
        if payment.amount != request.amount
            || !payment.currency.eq_ignore_ascii_case(&request.currency)
        {
            return Err(AppError::validation(
                "amount or currency does not match the pending payment",
            ));
        }

        let provider = self.registry.resolve(payment.provider)?;
        let outcome = provider
            .capture(CaptureRequest {
                reservation_id: request.reservation_id,
                amount: request.amount,
                currency: payment.currency.clone(),
                payment_method_ref: request.payment_method_ref,
                transaction_id: payment.transaction_id.clone(),
            })
            .await?;

        match outcome {
            CaptureOutcome::Approved { transaction_id } => {
                if payment.transaction_id.as_deref() != Some(transaction_id.as_str()) {
                    self.store
                        .attach_transaction(payment.id, &transaction_id)
                        .await?;
                }
                let updated = self
                    .store
                    .transition_payment(
                        payment.id,
                        &[PaymentStatus::Pending],
                        PaymentStatus::Completed,
                    )
                    .await?;
                let current = match updated {
                    Some(p) => p,
                    // A webhook got there first; the row is authoritative.
                    None => self.require_payment(payment.id).await?,
                };
                info!(
                    payment_id = %current.id,
                    transaction_id = %transaction_id,
                    "payment captured"
                );
                Ok(PaymentReceipt {
                    payment_id: current.id,
                    status: current.status,
                    transaction_id: Some(transaction_id),
                    approval_url: None,
                    decline_reason: None,
                })
            }
            CaptureOutcome::PendingApproval {
                transaction_id,
                approval_url,
            } => {
                if payment.transaction_id.as_deref() != Some(transaction_id.as_str()) {
                    self.store
                        .attach_transaction(payment.id, &transaction_id)
                        .await?;
                }
                info!(
                    payment_id = %payment.id,
                    transaction_id = %transaction_id,
                    "capture pending customer approval"
                );
                Ok(PaymentReceipt {
                    payment_id: payment.id,
                    status: PaymentStatus::Pending,
                    transaction_id: Some(transaction_id),
                    approval_url: Some(approval_url),
                    decline_reason: None,
                })
            }
            CaptureOutcome::Declined {
                transaction_id,
                reason,
            } => {
                let updated = self
                    .store
                    .transition_payment(
                        payment.id,
                        &[PaymentStatus::Pending],
                        PaymentStatus::Failed,
                    )
                    .await?;
                let current = match updated {
                    Some(p) => p,
                    None => self.require_payment(payment.id).await?,
                };
                warn!(payment_id = %payment.id, reason = %reason, "capture declined");
                Ok(PaymentReceipt {
                    payment_id: current.id,
                    status: current.status,
                    transaction_id,
                    approval_url: None,
                    decline_reason: Some(reason),
                })
            }
        }
    }

    /// Current status of a payment.
    ///
    /// While the payment is still PENDING with a known transaction the
    /// provider is asked for the authoritative view and the local row is
    /// advanced to match. Settled payments never trigger a provider call.
    pub async fn get_payment_status(&self, payment_id: Uuid) -> AppResult<Payment> {
        let payment = self.require_payment(payment_id).await?;
        if payment.status != PaymentStatus::Pending {
            return Ok(payment);
        }
        let Some(transaction_id) = payment.transaction_id.clone() else {
            return Ok(payment);
        };

        let provider = self.registry.resolve(payment.provider)?;
        let remote = match provider.fetch_status(&transaction_id).await {
            Ok(remote) => remote,
            Err(e) => {
                // The local record stands when the provider is unreachable.
                warn!(payment_id = %payment_id, error = %e, "status refresh failed");
                return Ok(payment);
            }
        };

        let target = match remote {
            Some(RemoteStatus::Completed) => PaymentStatus::Completed,
            Some(RemoteStatus::Failed) => PaymentStatus::Failed,
            Some(RemoteStatus::Refunded) => {
                warn!(
                    payment_id = %payment_id,
                    "provider reports refunded for a pending payment; keeping local status"
                );
                return Ok(payment);
            }
            Some(RemoteStatus::Pending) | None => return Ok(payment),
        };

        match self
            .store
            .transition_payment(payment_id, &[PaymentStatus::Pending], target)
            .await?
        {
            Some(updated) => Ok(updated),
            None => self.require_payment(payment_id).await,
        }
    }

    async fn require_payment(&self, payment_id: Uuid) -> AppResult<Payment> {
        self.store
            .payment_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::not_found("payment", payment_id))
    }
}

pub struct RefundOrchestrator {
    store: Arc<dyn PaymentStore>,
    registry: Arc<ProviderRegistry>,
}

impl RefundOrchestrator {
    pub fn new(store: Arc<dyn PaymentStore>, registry: Arc<ProviderRegistry>) -> Self {
        Self { store, registry }
    }

    /// Refund part or all of a captured payment.
    ///
    /// The cumulative cap is enforced before the provider is contacted: the
    /// sum of PROCESSED refunds plus this request may never exceed the
    /// captured amount. The refund is routed to the provider that captured
    /// the payment.
    pub async fn refund(&self, request: RefundRequest) -> AppResult<RefundReceipt> {
        if request.amount <= Decimal::ZERO {
            return Err(AppError::validation("refund amount must be positive"));
        }
        if request.reason.trim().is_empty() {
            return Err(AppError::validation("refund reason must not be empty"));
        }

        let payment = self
            .store
            .payment_by_id(request.payment_id)
            .await?
            .ok_or_else(|| AppError::not_found("payment", request.payment_id))?;

        if !matches!(
            payment.status,
            PaymentStatus::Completed | PaymentStatus::PartiallyRefunded
        ) {
            return Err(AppError::InvalidState {
                entity: "payment",
                current: payment.status.to_string(),
                operation: "refund",
            });
        }
        let transaction_id = payment.transaction_id.clone().ok_or_else(|| {
            AppError::InvalidState {
                entity: "payment",
                current: payment.status.to_string(),
                operation: "refund",
            }
        })?;

        // In-flight refunds reserve their amount until the provider settles or
        // declines them, so a second full refund cannot slip through while the
        // first is still pending.
        let already_reserved = self.store.reserved_refund_total(payment.id).await?;
        if already_reserved + request.amount > payment.amount {
            return Err(AppError::validation(format!(
                "refund of {} exceeds remaining refundable amount {}",
                request.amount,
                payment.amount - already_reserved
            )));
        }

        let provider = self.registry.resolve(payment.provider)?;
        let outcome = provider
            .refund(RefundCall {
                transaction_id,
                amount: request.amount,
                currency: payment.currency.clone(),
                reason: request.reason.clone(),
            })
            .await?;

        match outcome {
            RefundOutcome::Processed { external_refund_id } => {
                let refund = self
                    .store
                    .insert_refund(NewRefund {
                        payment_id: payment.id,
                        external_refund_id: Some(external_refund_id.clone()),
                        amount: request.amount,
                        currency: payment.currency.clone(),
                        reason: request.reason,
                        status: RefundStatus::Processed,
                        processed_at: Some(chrono::Utc::now()),
                    })
                    .await?;
                self.advance_payment_after_refund(&payment).await?;
                info!(
                    payment_id = %payment.id,
                    refund_id = %refund.id,
                    external_refund_id = %external_refund_id,
                    "refund processed"
                );
                Ok(RefundReceipt {
                    refund_id: refund.id,
                    payment_id: payment.id,
                    status: refund.status,
                    external_refund_id: refund.external_refund_id,
                    decline_reason: None,
                })
            }
            RefundOutcome::Pending { external_refund_id } => {
                let refund = self
                    .store
                    .insert_refund(NewRefund {
                        payment_id: payment.id,
                        external_refund_id: Some(external_refund_id),
                        amount: request.amount,
                        currency: payment.currency.clone(),
                        reason: request.reason,
                        status: RefundStatus::Pending,
                        processed_at: None,
                    })
                    .await?;
                info!(payment_id = %payment.id, refund_id = %refund.id, "refund pending");
                Ok(RefundReceipt {
                    refund_id: refund.id,
                    payment_id: payment.id,
                    status: refund.status,
                    external_refund_id: refund.external_refund_id,
                    decline_reason: None,
                })
            }
            RefundOutcome::Declined { reason } => {
                let refund = self
                    .store
                    .insert_refund(NewRefund {
                        payment_id: payment.id,
                        external_refund_id: None,
                        amount: request.amount,
                        currency: payment.currency.clone(),
                        reason: request.reason,
                        status: RefundStatus::Declined,
                        processed_at: None,
                    })
                    .await?;
                warn!(payment_id = %payment.id, reason = %reason, "refund declined");
                Ok(RefundReceipt {
                    refund_id: refund.id,
                    payment_id: payment.id,
                    status: refund.status,
                    external_refund_id: None,
                    decline_reason: Some(reason),
                })
            }
        }
    }

    /// Recompute the payment's refund aggregate after a processed refund and
    /// move it to PARTIALLY_REFUNDED or REFUNDED accordingly.
    async fn advance_payment_after_refund(&self, payment: &Payment) -> AppResult<()> {
        let total = self.store.processed_refund_total(payment.id).await?;
        let target = if total >= payment.amount {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        let updated = self
            .store
            .transition_payment(
                payment.id,
                &[PaymentStatus::Completed, PaymentStatus::PartiallyRefunded],
                target,
            )
            .await?;
        if updated.is_none() {
            warn!(
                payment_id = %payment.id,
                "payment moved concurrently while applying refund aggregate"
            );
        }
        Ok(())
    }
}

fn validate_money(amount: Decimal, currency: &str) -> AppResult<()> {
    if amount <= Decimal::ZERO {
        return Err(AppError::validation("amount must be positive"));
    }
    let currency = currency.trim();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::validation(
            "currency must be a three-letter ISO code",
        ));
    }
    Ok(())
}
