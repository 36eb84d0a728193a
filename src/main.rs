use settlement_backend::api;
use settlement_backend::config::AppConfig;
use settlement_backend::database::{self, Stores};
use settlement_backend::logging::init_tracing_with;
use settlement_backend::payments::provider::PaymentProcessor;
use settlement_backend::payments::providers::{ConnectProcessor, OnboardingUrls};
use settlement_backend::services::notification::{EventPublisher, LoggingPublisher};
use settlement_backend::services::orders::{HttpOrderGateway, InMemoryOrderGateway, OrderGateway};
use settlement_backend::workers::{SessionReconciler, WebhookRetryWorker};
use settlement_backend::SettlementServices;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let skip_externals = std::env::var("SKIP_EXTERNALS")
        .unwrap_or_else(|_| "false".to_string())
        .to_lowercase()
        == "true";

    let mut config = AppConfig::from_env()?;
    init_tracing_with(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        "🚀 Starting settlement backend"
    );

    if skip_externals {
        // In-memory stores need no database
        if config.database.url.is_empty() {
            config.database.url = "postgres://unused".to_string();
        }
    }
    config.validate().map_err(|e| {
        error!(error = %e, "❌ Invalid configuration");
        e
    })?;

    let (stores, db_pool, orders, publisher): (
        Stores,
        Option<sqlx::PgPool>,
        Arc<dyn OrderGateway>,
        Arc<dyn EventPublisher>,
    ) = if skip_externals {
        info!("⏭️  Using in-memory stores and order book (SKIP_EXTERNALS=true)");
        (
            Stores::in_memory(),
            None,
            Arc::new(InMemoryOrderGateway::accepting_unknown_orders()),
            Arc::new(LoggingPublisher),
        )
    } else {
        info!("📊 Initializing database connection pool...");
        let pool = database::init_pool_from_config(&config.database).await?;
        database::run_migrations(&pool).await?;
        info!(
            max_connections = pool.options().get_max_connections(),
            "✅ Database connection pool initialized"
        );

        let orders: Arc<dyn OrderGateway> = match &config.settlement.order_service_url {
            Some(url) => Arc::new(HttpOrderGateway::new(
                url,
                Duration::from_secs(config.processor.timeout_secs),
            )?),
            None => {
                warn!("ORDER_SERVICE_URL not set; order statuses are kept in memory only");
                Arc::new(InMemoryOrderGateway::accepting_unknown_orders())
            }
        };
        (Stores::postgres(pool.clone()), Some(pool), orders, Arc::new(LoggingPublisher))
    };

    let processor: Arc<dyn PaymentProcessor> = Arc::new(ConnectProcessor::new(
        &config.processor,
        OnboardingUrls {
            return_url: config.settlement.onboarding_return_url.clone(),
            refresh_url: config.settlement.onboarding_refresh_url.clone(),
        },
    )?);
    info!(
        processor = processor.name(),
        base_url = %config.processor.base_url,
        timeout_secs = config.processor.timeout_secs,
        "✅ Payment processor client initialized"
    );

    let services = SettlementServices::new(
        &config,
        stores,
        processor,
        orders,
        publisher,
        db_pool,
    );

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let retry_handle = tokio::spawn(
        WebhookRetryWorker::new(
            services.webhooks.clone(),
            config.reconciler.webhook_retry_interval_secs,
            config.reconciler.webhook_max_retries,
        )
        .run(worker_shutdown_rx.clone()),
    );
    let reconciler_handle = tokio::spawn(
        SessionReconciler::new(services.checkout.clone(), config.reconciler.clone())
            .run(worker_shutdown_rx),
    );
    info!("✅ Background workers started");

    let app = api::router(services);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(address = %addr, error = %e, "❌ Failed to bind server address");
        e
    })?;
    info!("🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    for (name, handle) in [("webhook retry", retry_handle), ("session reconciler", reconciler_handle)] {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            error!(worker = name, "Timed out waiting for worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");
    Ok(())
}
