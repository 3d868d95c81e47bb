//! Lookup of the reservation a payment settles. The directory is a trait so
//! the orchestrators can be exercised against a fixed in-memory directory in
//! tests while production resolves reservations over HTTP.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
pub struct Reservation {
    pub id: i64,
    pub total_amount: Decimal,
    pub currency: String,
    pub customer_email: Option<String>,
}

#[async_trait]
pub trait ReservationDirectory: Send + Sync {
    async fn find(&self, reservation_id: i64) -> AppResult<Option<Reservation>>;
}

/// Resolves reservations from the booking service over HTTP.
pub struct HttpReservationDirectory {
    base_url: String,
    client: reqwest::Client,
}

impl HttpReservationDirectory {
    pub fn new(base_url: String, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self { base_url, client }
    }
}

#[async_trait]
impl ReservationDirectory for HttpReservationDirectory {
    async fn find(&self, reservation_id: i64) -> AppResult<Option<Reservation>> {
        let url = format!("{}/reservations/{}", self.base_url, reservation_id);
        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(reservation_id, error = %e, "reservation lookup failed");
            AppError::ProviderUnavailable {
                provider: "reservations".to_string(),
                message: e.to_string(),
            }
        })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::ProviderUnavailable {
                provider: "reservations".to_string(),
                message: format!("booking service returned {}", response.status()),
            });
        }

        let reservation = response.json::<Reservation>().await.map_err(|e| {
            AppError::validation(format!("malformed reservation payload: {}", e))
        })?;
        Ok(Some(reservation))
    }
}
