use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_stream::cache::OrderCache;
use order_stream::config::AppConfig;
use order_stream::db::{OrderRepository, PgOrderRepository};
use order_stream::health::HealthMonitor;
use order_stream::http::{self, AppState};
use order_stream::messaging::{KafkaDeadLetterSink, MessageProcessor, OrderConsumer};
use order_stream::metrics::Metrics;
use order_stream::service::OrderService;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine, the environment may already be set
    let _ = dotenvy::dotenv();

    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_stream=debug")),
        )
        .init();

    tracing::info!("🚀 Starting order stream service");

    let config = AppConfig::from_env()?;

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!(
        "📊 Metrics registry created with {} metrics",
        metrics.registry().gather().len()
    );

    // === 2. PostgreSQL ===
    tracing::info!("Connecting to PostgreSQL...");
    let repository = PgOrderRepository::connect(&config.database).await?;
    if config.database.ensure_schema {
        repository.ensure_schema().await?;
    }
    repository.ping().await?;
    let repository: Arc<dyn OrderRepository> = Arc::new(repository);

    // === 3. Cache + service, cache restored from storage ===
    let cache = Arc::new(OrderCache::new());
    let service = Arc::new(
        OrderService::new(cache, repository, metrics.clone())
            .with_retry_policy(config.retry.clone())
            .with_backfill_on_miss(config.cache.backfill_on_miss),
    );

    match service.restore_cache().await {
        Ok(restored) => tracing::info!(restored, "✅ Cache restored"),
        Err(e) => tracing::error!(error = %e, "Cache restore failed, starting with an empty cache"),
    }

    // === 4. Ingestion loop ===
    let health = Arc::new(HealthMonitor::new());
    let dead_letters = Arc::new(KafkaDeadLetterSink::new(&config.kafka, config.retry.clone())?);
    let dead_letter_breaker = dead_letters.circuit_breaker().clone();

    let processor = MessageProcessor::new(
        service.clone(),
        dead_letters,
        config.kafka.ack_policy,
        metrics.clone(),
    );
    let consumer = OrderConsumer::new(&config.kafka, processor, health.clone())?;
    let ingestion = tokio::spawn(consumer.run());

    // === 5. HTTP (runs until SIGINT/SIGTERM) ===
    let state = AppState {
        service,
        health,
        metrics,
        dead_letter_breaker: Some(dead_letter_breaker),
    };
    let served = http::serve(state, &config.http).await;

    ingestion.abort();
    tracing::info!("👋 Order stream service stopped");

    served?;
    Ok(())
}
