//! Payment and refund entities with their status state machines.
//!
//! Payments and refunds are mutated only by the orchestrators (synchronous
//! path) and the webhook reconciler (asynchronous path), and both paths go
//! through the same guarded-transition rules defined here: a status may only
//! move along the declared edges, and terminal statuses never regress.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::providers::registry::ProviderName;

/// Payment lifecycle status.
///
/// ```text
/// PENDING -> COMPLETED -> PARTIALLY_REFUNDED -> REFUNDED
/// PENDING -> FAILED | CANCELLED
/// COMPLETED -> REFUNDED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    PartiallyRefunded,
    Refunded,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::PartiallyRefunded => "partially_refunded",
            Self::Refunded => "refunded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "partially_refunded" => Some(Self::PartiallyRefunded),
            "refunded" => Some(Self::Refunded),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Statuses reachable from this one.
    pub fn valid_transitions(&self) -> &'static [PaymentStatus] {
        match self {
            Self::Pending => &[Self::Completed, Self::Failed, Self::Cancelled],
            Self::Completed => &[Self::PartiallyRefunded, Self::Refunded],
            Self::PartiallyRefunded => &[Self::Refunded],
            Self::Refunded | Self::Failed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: PaymentStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Refunded | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Refund lifecycle status.
///
/// ```text
/// REQUESTED -> PENDING -> PROCESSED
/// PENDING -> FAILED | DECLINED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Requested,
    Pending,
    Processed,
    Failed,
    Declined,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::Declined => "declined",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "requested" => Some(Self::Requested),
            "pending" => Some(Self::Pending),
            "processed" => Some(Self::Processed),
            "failed" => Some(Self::Failed),
            "declined" => Some(Self::Declined),
            _ => None,
        }
    }

    pub fn valid_transitions(&self) -> &'static [RefundStatus] {
        match self {
            Self::Requested => &[Self::Pending],
            Self::Pending => &[Self::Processed, Self::Failed, Self::Declined],
            Self::Processed | Self::Failed | Self::Declined => &[],
        }
    }

    pub fn can_transition_to(&self, target: RefundStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Failed | Self::Declined)
    }
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One payment, bound one-to-one to a reservation.
#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub reservation_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    /// Provider-assigned transaction identifier, unique once set.
    pub transaction_id: Option<String>,
    /// Which adapter owns this payment; refunds always route back to it.
    pub provider: ProviderName,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A refund against a payment; a payment may carry multiple partial refunds.
#[derive(Debug, Clone, Serialize)]
pub struct Refund {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub external_refund_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub reason: String,
    pub status: RefundStatus,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}
