//! In-memory [`PaymentStore`] used by integration tests. Mirrors the
//! Postgres schema constraints (unique reservation, unique transaction id)
//! so orchestrator behavior under conflict can be exercised without a
//! database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{Payment, PaymentStatus, Refund, RefundStatus};
use crate::store::error::{DatabaseError, DatabaseErrorKind};
use crate::store::payments::{NewPayment, NewRefund, PaymentAnalytics, PaymentStore};

#[derive(Default)]
struct Inner {
    payments: HashMap<Uuid, Payment>,
    refunds: HashMap<Uuid, Refund>,
}

#[derive(Default)]
pub struct InMemoryPaymentStore {
    inner: RwLock<Inner>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn unique_violation(constraint: &str) -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::UniqueConstraintViolation {
        constraint: constraint.to_string(),
    })
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn ping(&self) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn create_payment(&self, new: NewPayment) -> Result<Payment, DatabaseError> {
        let mut inner = self.inner.write().await;
        if inner
            .payments
            .values()
            .any(|p| p.reservation_id == new.reservation_id)
        {
            return Err(unique_violation("payments_reservation_id_key"));
        }
        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            reservation_id: new.reservation_id,
            amount: new.amount,
            currency: new.currency,
            status: PaymentStatus::Pending,
            transaction_id: None,
            provider: new.provider,
            created_at: now,
            updated_at: now,
        };
        inner.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn payment_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        Ok(self.inner.read().await.payments.get(&id).cloned())
    }

    async fn payment_by_reservation(
        &self,
        reservation_id: i64,
    ) -> Result<Option<Payment>, DatabaseError> {
        Ok(self
            .inner
            .read()
            .await
            .payments
            .values()
            .find(|p| p.reservation_id == reservation_id)
            .cloned())
    }

    async fn payment_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        Ok(self
            .inner
            .read()
            .await
            .payments
            .values()
            .find(|p| p.transaction_id.as_deref() == Some(transaction_id))
            .cloned())
    }

    async fn attach_transaction(
        &self,
        id: Uuid,
        transaction_id: &str,
    ) -> Result<Payment, DatabaseError> {
        let mut inner = self.inner.write().await;
        if inner
            .payments
            .values()
            .any(|p| p.id != id && p.transaction_id.as_deref() == Some(transaction_id))
        {
            return Err(unique_violation("payments_transaction_id_key"));
        }
        let payment = inner.payments.get_mut(&id).ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "payment".to_string(),
                id: id.to_string(),
            })
        })?;
        payment.transaction_id = Some(transaction_id.to_string());
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn transition_payment(
        &self,
        id: Uuid,
        from: &[PaymentStatus],
        to: PaymentStatus,
    ) -> Result<Option<Payment>, DatabaseError> {
        let mut inner = self.inner.write().await;
        match inner.payments.get_mut(&id) {
            Some(payment) if from.contains(&payment.status) => {
                payment.status = to;
                payment.updated_at = Utc::now();
                Ok(Some(payment.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn insert_refund(&self, new: NewRefund) -> Result<Refund, DatabaseError> {
        let mut inner = self.inner.write().await;
        if let Some(ext) = new.external_refund_id.as_deref() {
            if inner
                .refunds
                .values()
                .any(|r| r.external_refund_id.as_deref() == Some(ext))
            {
                return Err(unique_violation("refunds_external_refund_id_key"));
            }
        }
        let refund = Refund {
            id: Uuid::new_v4(),
            payment_id: new.payment_id,
            external_refund_id: new.external_refund_id,
            amount: new.amount,
            currency: new.currency,
            reason: new.reason,
            status: new.status,
            requested_at: Utc::now(),
            processed_at: new.processed_at,
        };
        inner.refunds.insert(refund.id, refund.clone());
        Ok(refund)
    }

    async fn refund_by_id(&self, id: Uuid) -> Result<Option<Refund>, DatabaseError> {
        Ok(self.inner.read().await.refunds.get(&id).cloned())
    }

    async fn refund_by_external_id(
        &self,
        external_refund_id: &str,
    ) -> Result<Option<Refund>, DatabaseError> {
        Ok(self
            .inner
            .read()
            .await
            .refunds
            .values()
            .find(|r| r.external_refund_id.as_deref() == Some(external_refund_id))
            .cloned())
    }

    async fn transition_refund(
        &self,
        id: Uuid,
        from: &[RefundStatus],
        to: RefundStatus,
    ) -> Result<Option<Refund>, DatabaseError> {
        let mut inner = self.inner.write().await;
        match inner.refunds.get_mut(&id) {
            Some(refund) if from.contains(&refund.status) => {
                refund.status = to;
                if to == RefundStatus::Processed {
                    refund.processed_at = Some(Utc::now());
                }
                Ok(Some(refund.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn processed_refund_total(&self, payment_id: Uuid) -> Result<Decimal, DatabaseError> {
        Ok(self
            .inner
            .read()
            .await
            .refunds
            .values()
            .filter(|r| r.payment_id == payment_id && r.status == RefundStatus::Processed)
            .map(|r| r.amount)
            .sum())
    }

    async fn reserved_refund_total(&self, payment_id: Uuid) -> Result<Decimal, DatabaseError> {
        Ok(self
            .inner
            .read()
            .await
            .refunds
            .values()
            .filter(|r| {
                r.payment_id == payment_id
                    && matches!(
                        r.status,
                        RefundStatus::Requested | RefundStatus::Pending | RefundStatus::Processed
                    )
            })
            .map(|r| r.amount)
            .sum())
    }

    async fn analytics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PaymentAnalytics, DatabaseError> {
        let inner = self.inner.read().await;
        let in_range: Vec<&Payment> = inner
            .payments
            .values()
            .filter(|p| p.created_at >= start && p.created_at < end)
            .collect();
        let captured = |s: PaymentStatus| {
            matches!(
                s,
                PaymentStatus::Completed
                    | PaymentStatus::PartiallyRefunded
                    | PaymentStatus::Refunded
            )
        };
        let refunded_total = inner
            .refunds
            .values()
            .filter(|r| r.status == RefundStatus::Processed)
            .filter(|r| {
                in_range.iter().any(|p| p.id == r.payment_id)
            })
            .map(|r| r.amount)
            .sum();
        Ok(PaymentAnalytics {
            total_payments: in_range.len() as i64,
            completed_payments: in_range.iter().filter(|p| captured(p.status)).count() as i64,
            failed_payments: in_range
                .iter()
                .filter(|p| p.status == PaymentStatus::Failed)
                .count() as i64,
            refunded_payments: in_range
                .iter()
                .filter(|p| {
                    matches!(
                        p.status,
                        PaymentStatus::PartiallyRefunded | PaymentStatus::Refunded
                    )
                })
                .count() as i64,
            captured_total: in_range.iter().filter(|p| captured(p.status)).map(|p| p.amount).sum(),
            refunded_total,
        })
    }
}
