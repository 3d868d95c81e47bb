//! Payment Record Store: the single authoritative owner of Payment and
//! Refund rows.
//!
//! Status writes go through conditional updates (`status = ANY(..)`) so a
//! concurrent webhook-driven update and a client-driven update cannot clobber
//! one another; a failed guard comes back as `None` and the caller re-reads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::domain::{Payment, PaymentStatus, Refund, RefundStatus};
use crate::providers::registry::ProviderName;
use crate::store::error::DatabaseError;

/// Fields for a new PENDING payment row.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub reservation_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub provider: ProviderName,
}

/// Fields for a new refund row; status is whatever the provider answered.
#[derive(Debug, Clone)]
pub struct NewRefund {
    pub payment_id: Uuid,
    pub external_refund_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub reason: String,
    pub status: RefundStatus,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Date-range aggregate backing the read-only analytics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentAnalytics {
    pub total_payments: i64,
    pub completed_payments: i64,
    pub failed_payments: i64,
    pub refunded_payments: i64,
    pub captured_total: Decimal,
    pub refunded_total: Decimal,
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Backing-store liveness probe for the health endpoint.
    async fn ping(&self) -> Result<(), DatabaseError>;

    async fn create_payment(&self, new: NewPayment) -> Result<Payment, DatabaseError>;

    async fn payment_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError>;

    async fn payment_by_reservation(
        &self,
        reservation_id: i64,
    ) -> Result<Option<Payment>, DatabaseError>;

    async fn payment_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>, DatabaseError>;

    /// Store the provider-assigned transaction identifier.
    async fn attach_transaction(
        &self,
        id: Uuid,
        transaction_id: &str,
    ) -> Result<Payment, DatabaseError>;

    /// Conditionally move a payment to `to` if its current status is one of
    /// `from`. `Ok(None)` means the guard did not match (row gone or a
    /// concurrent writer got there first) and nothing was written.
    async fn transition_payment(
        &self,
        id: Uuid,
        from: &[PaymentStatus],
        to: PaymentStatus,
    ) -> Result<Option<Payment>, DatabaseError>;

    async fn insert_refund(&self, new: NewRefund) -> Result<Refund, DatabaseError>;

    async fn refund_by_id(&self, id: Uuid) -> Result<Option<Refund>, DatabaseError>;

    async fn refund_by_external_id(
        &self,
        external_refund_id: &str,
    ) -> Result<Option<Refund>, DatabaseError>;

    /// Guarded refund status transition, same contract as
    /// [`transition_payment`](Self::transition_payment).
    async fn transition_refund(
        &self,
        id: Uuid,
        from: &[RefundStatus],
        to: RefundStatus,
    ) -> Result<Option<Refund>, DatabaseError>;

    /// Sum of PROCESSED refund amounts for a payment.
    async fn processed_refund_total(&self, payment_id: Uuid) -> Result<Decimal, DatabaseError>;

    /// Sum of refund amounts that are settled or still in flight
    /// (REQUESTED, PENDING, PROCESSED). Failed and declined refunds do not
    /// reserve any of the captured amount.
    async fn reserved_refund_total(&self, payment_id: Uuid) -> Result<Decimal, DatabaseError>;

    async fn analytics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PaymentAnalytics, DatabaseError>;
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: Uuid,
    reservation_id: i64,
    amount: Decimal,
    currency: String,
    status: String,
    transaction_id: Option<String>,
    provider: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let status = PaymentStatus::parse(&row.status).ok_or_else(|| {
            DatabaseError::corrupt(format!("unknown payment status '{}'", row.status))
        })?;
        let provider = row.provider.parse::<ProviderName>().map_err(|_| {
            DatabaseError::corrupt(format!("unknown provider '{}'", row.provider))
        })?;
        Ok(Payment {
            id: row.id,
            reservation_id: row.reservation_id,
            amount: row.amount,
            currency: row.currency,
            status,
            transaction_id: row.transaction_id,
            provider,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RefundRow {
    id: Uuid,
    payment_id: Uuid,
    external_refund_id: Option<String>,
    amount: Decimal,
    currency: String,
    reason: String,
    status: String,
    requested_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<RefundRow> for Refund {
    type Error = DatabaseError;

    fn try_from(row: RefundRow) -> Result<Self, Self::Error> {
        let status = RefundStatus::parse(&row.status).ok_or_else(|| {
            DatabaseError::corrupt(format!("unknown refund status '{}'", row.status))
        })?;
        Ok(Refund {
            id: row.id,
            payment_id: row.payment_id,
            external_refund_id: row.external_refund_id,
            amount: row.amount,
            currency: row.currency,
            reason: row.reason,
            status,
            requested_at: row.requested_at,
            processed_at: row.processed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PaymentAggregateRow {
    total_payments: i64,
    completed_payments: i64,
    failed_payments: i64,
    refunded_payments: i64,
    captured_total: Decimal,
}

const PAYMENT_COLUMNS: &str = "id, reservation_id, amount, currency, status, transaction_id, \
     provider, created_at, updated_at";

const REFUND_COLUMNS: &str = "id, payment_id, external_refund_id, amount, currency, reason, \
     status, requested_at, processed_at";

/// Postgres-backed payment store.
pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn ping(&self) -> Result<(), DatabaseError> {
        crate::store::health_check(&self.pool).await
    }

    async fn create_payment(&self, new: NewPayment) -> Result<Payment, DatabaseError> {
        let sql = format!(
            "INSERT INTO payments (id, reservation_id, amount, currency, status, provider) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.reservation_id)
            .bind(new.amount)
            .bind(&new.currency)
            .bind(PaymentStatus::Pending.as_str())
            .bind(new.provider.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.try_into()
    }

    async fn payment_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        let sql = format!("SELECT {} FROM payments WHERE id = $1", PAYMENT_COLUMNS);
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn payment_by_reservation(
        &self,
        reservation_id: i64,
    ) -> Result<Option<Payment>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE reservation_id = $1",
            PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(reservation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn payment_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE transaction_id = $1",
            PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn attach_transaction(
        &self,
        id: Uuid,
        transaction_id: &str,
    ) -> Result<Payment, DatabaseError> {
        let sql = format!(
            "UPDATE payments SET transaction_id = $2, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .bind(transaction_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.try_into()
    }

    async fn transition_payment(
        &self,
        id: Uuid,
        from: &[PaymentStatus],
        to: PaymentStatus,
    ) -> Result<Option<Payment>, DatabaseError> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let sql = format!(
            "UPDATE payments SET status = $2, updated_at = NOW() \
             WHERE id = $1 AND status = ANY($3) RETURNING {}",
            PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .bind(to.as_str())
            .bind(from)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn insert_refund(&self, new: NewRefund) -> Result<Refund, DatabaseError> {
        let sql = format!(
            "INSERT INTO refunds (id, payment_id, external_refund_id, amount, currency, reason, \
             status, processed_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
            REFUND_COLUMNS
        );
        let row = sqlx::query_as::<_, RefundRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.payment_id)
            .bind(&new.external_refund_id)
            .bind(new.amount)
            .bind(&new.currency)
            .bind(&new.reason)
            .bind(new.status.as_str())
            .bind(new.processed_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.try_into()
    }

    async fn refund_by_id(&self, id: Uuid) -> Result<Option<Refund>, DatabaseError> {
        let sql = format!("SELECT {} FROM refunds WHERE id = $1", REFUND_COLUMNS);
        sqlx::query_as::<_, RefundRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn refund_by_external_id(
        &self,
        external_refund_id: &str,
    ) -> Result<Option<Refund>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM refunds WHERE external_refund_id = $1",
            REFUND_COLUMNS
        );
        sqlx::query_as::<_, RefundRow>(&sql)
            .bind(external_refund_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn transition_refund(
        &self,
        id: Uuid,
        from: &[RefundStatus],
        to: RefundStatus,
    ) -> Result<Option<Refund>, DatabaseError> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let processed_at_clause = if to == RefundStatus::Processed {
            ", processed_at = NOW()"
        } else {
            ""
        };
        let sql = format!(
            "UPDATE refunds SET status = $2{} WHERE id = $1 AND status = ANY($3) RETURNING {}",
            processed_at_clause, REFUND_COLUMNS
        );
        sqlx::query_as::<_, RefundRow>(&sql)
            .bind(id)
            .bind(to.as_str())
            .bind(from)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn processed_refund_total(&self, payment_id: Uuid) -> Result<Decimal, DatabaseError> {
        sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(amount), 0) FROM refunds \
             WHERE payment_id = $1 AND status = 'processed'",
        )
        .bind(payment_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn reserved_refund_total(&self, payment_id: Uuid) -> Result<Decimal, DatabaseError> {
        sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(amount), 0) FROM refunds \
             WHERE payment_id = $1 AND status IN ('requested', 'pending', 'processed')",
        )
        .bind(payment_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn analytics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PaymentAnalytics, DatabaseError> {
        let aggregates = sqlx::query_as::<_, PaymentAggregateRow>(
            "SELECT COUNT(*) AS total_payments, \
             COUNT(*) FILTER (WHERE status IN ('completed', 'partially_refunded', 'refunded')) \
                 AS completed_payments, \
             COUNT(*) FILTER (WHERE status = 'failed') AS failed_payments, \
             COUNT(*) FILTER (WHERE status IN ('partially_refunded', 'refunded')) \
                 AS refunded_payments, \
             COALESCE(SUM(amount) FILTER \
                 (WHERE status IN ('completed', 'partially_refunded', 'refunded')), 0) \
                 AS captured_total \
             FROM payments WHERE created_at >= $1 AND created_at < $2",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let refunded_total = sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(r.amount), 0) FROM refunds r \
             JOIN payments p ON p.id = r.payment_id \
             WHERE r.status = 'processed' AND p.created_at >= $1 AND p.created_at < $2",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(PaymentAnalytics {
            total_payments: aggregates.total_payments,
            completed_payments: aggregates.completed_payments,
            failed_payments: aggregates.failed_payments,
            refunded_payments: aggregates.refunded_payments,
            captured_total: aggregates.captured_total,
            refunded_total,
        })
    }
}
