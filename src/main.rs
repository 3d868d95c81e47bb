use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rentpay_backend::api::{self, AppState};
use rentpay_backend::config::Config;
use rentpay_backend::idempotency::IdempotencyGuard;
use rentpay_backend::orchestrator::{PaymentOrchestrator, RefundOrchestrator};
use rentpay_backend::providers::direct::{CardDirectConfig, CardDirectProvider};
use rentpay_backend::providers::hosted::{HostedCheckoutConfig, HostedCheckoutProvider};
use rentpay_backend::providers::legacy::{LegacyGatewayConfig, LegacyGatewayProvider};
use rentpay_backend::providers::onsite::OnSiteProvider;
use rentpay_backend::providers::ProviderRegistry;
use rentpay_backend::reconciler::WebhookReconciler;
use rentpay_backend::reservations::HttpReservationDirectory;
use rentpay_backend::store::{self, PaymentStore, PgPaymentStore, PoolConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Starting rental payment service");
    tracing::info!("Environment: {}", config.server.environment);

    let pool = store::init_pool(
        &config.database.url,
        Some(PoolConfig {
            max_connections: config.database.max_connections,
            ..PoolConfig::default()
        }),
    )
    .await?;
    let payment_store: Arc<dyn PaymentStore> = Arc::new(PgPaymentStore::new(pool));

    let registry = Arc::new(
        ProviderRegistry::new()
            .register(Arc::new(HostedCheckoutProvider::new(HostedCheckoutConfig {
                secret_key: config.providers.hosted.secret_key.clone(),
                base_url: config.providers.hosted.base_url.clone(),
                timeout_secs: config.providers.hosted.timeout_secs,
                max_attempts: config.providers.hosted.max_attempts,
            })?))
            .register(Arc::new(CardDirectProvider::new(CardDirectConfig {
                api_key: config.providers.card.api_key.clone(),
                webhook_secret: config.providers.card.webhook_secret.clone(),
                base_url: config.providers.card.base_url.clone(),
                timeout_secs: config.providers.card.timeout_secs,
                max_attempts: config.providers.card.max_attempts,
            })?))
            .register(Arc::new(LegacyGatewayProvider::new(LegacyGatewayConfig {
                merchant_id: config.providers.legacy.merchant_id.clone(),
                api_key: config.providers.legacy.api_key.clone(),
                base_url: config.providers.legacy.base_url.clone(),
                timeout_secs: config.providers.legacy.timeout_secs,
                max_attempts: config.providers.legacy.max_attempts,
            })?))
            .register(Arc::new(OnSiteProvider::new())),
    );

    let reservations = Arc::new(HttpReservationDirectory::new(
        config.reservations.base_url.clone(),
        config.reservations.timeout_secs,
    ));

    let idempotency = Arc::new(IdempotencyGuard::new(Duration::from_secs(
        config.idempotency.ttl_secs,
    )));

    // Background sweep of expired idempotency entries.
    {
        let guard = idempotency.clone();
        let ttl = config.idempotency.ttl_secs;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(ttl.max(60) / 2));
            loop {
                interval.tick().await;
                guard.purge_expired().await;
            }
        });
    }

    let payments = Arc::new(PaymentOrchestrator::new(
        payment_store.clone(),
        registry.clone(),
        reservations,
        idempotency,
    ));
    let refunds = Arc::new(RefundOrchestrator::new(
        payment_store.clone(),
        registry.clone(),
    ));
    let reconciler = Arc::new(WebhookReconciler::new(
        payment_store.clone(),
        registry.clone(),
    ));

    let state = AppState {
        payments,
        refunds,
        reconciler,
        store: payment_store,
        environment: config.server.environment.clone(),
        provider_names: registry.registered_names(),
    };

    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
