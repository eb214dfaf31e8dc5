//! Winback Engine - cart abandonment lifecycle and reminder dispatch.
//!
//! This binary serves the engine HTTP API and runs the periodic reminder
//! scheduler in the same process.
//!
//! # Architecture
//!
//! - Axum HTTP API for cart sync, status, identity linkage, recovery links,
//!   and the conversion webhook
//! - `PostgreSQL` for cart state and the append-only reminder ledger
//! - A background scheduler loop that re-derives its work from storage on
//!   every pass, so any number of replicas can run side by side
//! - SMTP (lettre) for reminder delivery, with consent and pricing resolved
//!   from collaborator HTTP APIs

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use sentry::integrations::tracing as sentry_tracing;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use winback_engine::clock::SystemClock;
use winback_engine::config::EngineConfig;
use winback_engine::db::{self, PgCartRepository, PgEventLedger};
use winback_engine::routes;
use winback_engine::services::dispatcher::ReminderDispatcher;
use winback_engine::services::merge::CartMergeService;
use winback_engine::services::providers::{HttpConsentProvider, HttpPricingProvider};
use winback_engine::services::recovery::RecoveryTokenSigner;
use winback_engine::services::scheduler::ReminderScheduler;
use winback_engine::services::transport::SmtpReminderTransport;
use winback_engine::state::AppState;

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &EngineConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = EngineConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    // Initialize tracing with EnvFilter and Sentry integration
    // Defaults to info level for our crate if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "winback_engine=info,tower_http=debug".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    // Initialize database connection pool
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");
    tracing::info!("Database pool created");

    // NOTE: Migrations are NOT run automatically on startup.
    // Run them explicitly via: cargo run -p winback-cli -- migrate

    let clock = Arc::new(SystemClock);
    let carts = Arc::new(PgCartRepository::new(pool.clone()));
    let ledger = Arc::new(PgEventLedger::new(pool.clone()));

    let transport = Arc::new(
        SmtpReminderTransport::new(&config.smtp).expect("Failed to configure SMTP transport"),
    );
    let consent = Arc::new(
        HttpConsentProvider::new(&config.consent).expect("Failed to build consent client"),
    );
    let pricing = Arc::new(
        HttpPricingProvider::new(&config.catalog).expect("Failed to build catalog client"),
    );

    let tokens = RecoveryTokenSigner::new(config.recovery_secret.clone());
    let dispatcher = Arc::new(ReminderDispatcher::new(
        transport,
        tokens.clone(),
        clock.clone(),
        &config.base_url,
        config.recovery_token_ttl,
        config.dispatch_timeout,
    ));

    let scheduler = Arc::new(ReminderScheduler::new(
        carts.clone(),
        ledger.clone(),
        consent,
        dispatcher,
        clock.clone(),
        config.schedule.clone(),
        config.thresholds,
        config.dispatch_concurrency,
    ));
    let merge = CartMergeService::new(carts.clone(), pricing, clock.clone());

    let scheduler_handle = scheduler.clone().start(config.scheduler_interval);

    // Build application state
    let state = AppState::new(
        config.clone(),
        pool,
        carts,
        ledger,
        merge,
        scheduler,
        tokens,
        clock,
    );

    // Build router
    let app = routes::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    // Start server
    let addr = config.socket_addr();
    tracing::info!("winback engine listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // Let an in-flight reminder pass finish before exiting
    scheduler_handle.stop().await;
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
