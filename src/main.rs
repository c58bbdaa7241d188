use axum::{
    routing::{get, post},
    Json, Router,
};
use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

use indowater_backend::api;
use indowater_backend::config::AppConfig;
use indowater_backend::database::gateway_credential_repository::GatewayCredentialRepository;
use indowater_backend::database::init_pool_from_config;
use indowater_backend::database::payment_repository::PaymentRepository;
use indowater_backend::database::webhook_retry_repository::WebhookRetryRepository;
use indowater_backend::gateways::factory::{GatewayFactory, GatewayFactoryConfig};
use indowater_backend::health::{HealthChecker, HealthState, HealthStatus};
use indowater_backend::logging::init_tracing;
use indowater_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use indowater_backend::services::payment_service::PaymentService;
use indowater_backend::services::webhook_processor::WebhookProcessor;
use indowater_backend::services::webhook_retry::{RetryConfig, WebhookRetryService};
use indowater_backend::workers::webhook_retry::WebhookRetryWorker;

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
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
    init_tracing();
    dotenv().ok();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting IndoWater backend service"
    );

    let config = AppConfig::from_env().map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;

    info!("Initializing database connection pool");
    let db_pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        anyhow::anyhow!("{e}")
    })?;
    info!(
        max_connections = config.database.max_connections,
        "Database connection pool initialized"
    );

    let payments = Arc::new(PaymentRepository::new(db_pool.clone()));
    let retry_store = Arc::new(WebhookRetryRepository::new(db_pool.clone()));
    let credentials = GatewayCredentialRepository::new(db_pool.clone());

    let mut factory_config = GatewayFactoryConfig::from_env()
        .map_err(|e| anyhow::anyhow!("gateway configuration error: {e}"))?;
    credentials.resolve_factory_config(&mut factory_config).await;
    let factory = Arc::new(GatewayFactory::with_config(factory_config));
    info!(
        gateways = ?factory.list_available_gateways(),
        environment = %config.payment_environment,
        "Payment gateways configured"
    );

    let processor = Arc::new(WebhookProcessor::new(payments.clone(), factory.clone()));
    let retry_service = Arc::new(WebhookRetryService::new(
        processor.clone(),
        retry_store,
        RetryConfig::from_env(),
    ));
    let payment_service = Arc::new(PaymentService::new(payments.clone(), factory.clone()));

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let retry_worker_enabled = std::env::var("WEBHOOK_RETRY_ENABLED")
        .unwrap_or_else(|_| "true".to_string())
        .to_lowercase()
        != "false";
    if retry_worker_enabled {
        let worker = WebhookRetryWorker::new(
            retry_service.clone(),
            WebhookRetryWorker::interval_from_env(),
        );
        tokio::spawn(worker.run(worker_shutdown_rx));
        info!("Webhook retry worker started");
    } else {
        info!("Webhook retry worker disabled (WEBHOOK_RETRY_ENABLED=false)");
    }

    let webhook_state = Arc::new(api::webhooks::WebhookState {
        processor,
        retry: retry_service,
    });
    let payments_state = Arc::new(api::payments::PaymentsState {
        payments: payment_service,
    });
    let health_checker = HealthChecker::new(db_pool);

    let webhook_routes = Router::new()
        .route(
            "/webhooks/payment/{method}",
            post(api::webhooks::handle_payment_webhook),
        )
        .with_state(webhook_state);

    let payment_routes = Router::new()
        .route("/api/payments", post(api::payments::initiate_payment))
        .route(
            "/api/payments/gateways",
            get(api::payments::list_gateways),
        )
        .route(
            "/api/payments/{order_id}",
            get(api::payments::get_payment_status),
        )
        .route(
            "/api/payments/{order_id}/cancel",
            post(api::payments::cancel_payment),
        )
        .with_state(payments_state);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .with_state(health_checker)
        .merge(webhook_routes)
        .merge(payment_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .layer(axum::middleware::from_fn(request_logging_middleware));

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        anyhow::anyhow!("{e}")
    })?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx))
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn root() -> &'static str {
    "IndoWater Backend API"
}

async fn health(
    axum::extract::State(checker): axum::extract::State<HealthChecker>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    let health_status = checker.check_health().await;

    if matches!(health_status.status, HealthState::Unhealthy) {
        error!("Health check failed - service unhealthy");
        Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    } else {
        Ok(Json(health_status))
    }
}

/// Readiness probe - checks all dependencies like `/health`
async fn readiness(
    state: axum::extract::State<HealthChecker>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    health(state).await
}

/// Liveness probe - checks if the service is alive (basic check)
async fn liveness() -> &'static str {
    "OK"
}
