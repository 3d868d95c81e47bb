use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub providers: ProvidersConfig,
    pub idempotency: IdempotencyConfig,
    pub reservations: ReservationsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    pub hosted: HostedConfig,
    pub card: CardConfig,
    pub legacy: LegacyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostedConfig {
    pub secret_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardConfig {
    pub api_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyConfig {
    pub merchant_id: String,
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencyConfig {
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReservationsConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let server = ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .context("PORT not set")?
                .parse()
                .context("PORT must be a valid number")?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").context("DATABASE_URL not set")?,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
        };

        let hosted = HostedConfig {
            secret_key: env::var("HOSTED_CHECKOUT_SECRET_KEY")
                .context("HOSTED_CHECKOUT_SECRET_KEY not set")?,
            base_url: env::var("HOSTED_CHECKOUT_BASE_URL")
                .context("HOSTED_CHECKOUT_BASE_URL not set")?,
            timeout_secs: env::var("HOSTED_CHECKOUT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("HOSTED_CHECKOUT_TIMEOUT_SECS must be a valid number")?,
            max_attempts: env::var("HOSTED_CHECKOUT_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("HOSTED_CHECKOUT_MAX_ATTEMPTS must be a valid number")?,
        };

        let card = CardConfig {
            api_key: env::var("CARD_DIRECT_API_KEY").context("CARD_DIRECT_API_KEY not set")?,
            webhook_secret: env::var("CARD_DIRECT_WEBHOOK_SECRET")
                .context("CARD_DIRECT_WEBHOOK_SECRET not set")?,
            base_url: env::var("CARD_DIRECT_BASE_URL").context("CARD_DIRECT_BASE_URL not set")?,
            timeout_secs: env::var("CARD_DIRECT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("CARD_DIRECT_TIMEOUT_SECS must be a valid number")?,
            max_attempts: env::var("CARD_DIRECT_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("CARD_DIRECT_MAX_ATTEMPTS must be a valid number")?,
        };

        let legacy = LegacyConfig {
            merchant_id: env::var("LEGACY_GATEWAY_MERCHANT_ID")
                .context("LEGACY_GATEWAY_MERCHANT_ID not set")?,
            api_key: env::var("LEGACY_GATEWAY_API_KEY")
                .context("LEGACY_GATEWAY_API_KEY not set")?,
            base_url: env::var("LEGACY_GATEWAY_BASE_URL")
                .context("LEGACY_GATEWAY_BASE_URL not set")?,
            timeout_secs: env::var("LEGACY_GATEWAY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("LEGACY_GATEWAY_TIMEOUT_SECS must be a valid number")?,
            max_attempts: env::var("LEGACY_GATEWAY_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("LEGACY_GATEWAY_MAX_ATTEMPTS must be a valid number")?,
        };

        let idempotency = IdempotencyConfig {
            ttl_secs: env::var("IDEMPOTENCY_TTL_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .context("IDEMPOTENCY_TTL_SECS must be a valid number")?,
        };

        let reservations = ReservationsConfig {
            base_url: env::var("RESERVATIONS_BASE_URL")
                .context("RESERVATIONS_BASE_URL not set")?,
            timeout_secs: env::var("RESERVATIONS_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("RESERVATIONS_TIMEOUT_SECS must be a valid number")?,
        };

        let config = Config {
            server,
            database,
            providers: ProvidersConfig {
                hosted,
                card,
                legacy,
            },
            idempotency,
            reservations,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Validate port range
        if self.server.port < 1024 {
            return Err(anyhow!(
                "Port must be at least 1024, got {}",
                self.server.port
            ));
        }

        // Validate environment
        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        // Validate URLs are not empty
        if self.database.url.trim().is_empty() {
            return Err(anyhow!("DATABASE_URL cannot be empty"));
        }

        if self.providers.hosted.base_url.trim().is_empty() {
            return Err(anyhow!("HOSTED_CHECKOUT_BASE_URL cannot be empty"));
        }

        if self.providers.card.base_url.trim().is_empty() {
            return Err(anyhow!("CARD_DIRECT_BASE_URL cannot be empty"));
        }

        if self.providers.legacy.base_url.trim().is_empty() {
            return Err(anyhow!("LEGACY_GATEWAY_BASE_URL cannot be empty"));
        }

        if self.reservations.base_url.trim().is_empty() {
            return Err(anyhow!("RESERVATIONS_BASE_URL cannot be empty"));
        }

        // Validate secrets are not empty
        if self.providers.hosted.secret_key.trim().is_empty() {
            return Err(anyhow!("HOSTED_CHECKOUT_SECRET_KEY cannot be empty"));
        }

        if self.providers.card.webhook_secret.trim().is_empty() {
            return Err(anyhow!("CARD_DIRECT_WEBHOOK_SECRET cannot be empty"));
        }

        if self.idempotency.ttl_secs == 0 {
            return Err(anyhow!("IDEMPOTENCY_TTL_SECS must be greater than 0"));
        }

        // Validate database max connections
        if self.database.max_connections == 0 {
            return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }

        Ok(())
    }
}
