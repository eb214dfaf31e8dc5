//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::db::{CartRepository, EventLedger};
use crate::services::merge::CartMergeService;
use crate::services::recovery::RecoveryTokenSigner;
use crate::services::scheduler::ReminderScheduler;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like repositories and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: EngineConfig,
    pool: PgPool,
    carts: Arc<dyn CartRepository>,
    ledger: Arc<dyn EventLedger>,
    merge: CartMergeService,
    scheduler: Arc<ReminderScheduler>,
    tokens: RecoveryTokenSigner,
    clock: Arc<dyn Clock>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        pool: PgPool,
        carts: Arc<dyn CartRepository>,
        ledger: Arc<dyn EventLedger>,
        merge: CartMergeService,
        scheduler: Arc<ReminderScheduler>,
        tokens: RecoveryTokenSigner,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                carts,
                ledger,
                merge,
                scheduler,
                tokens,
                clock,
            }),
        }
    }

    /// Get a reference to the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    /// Get a reference to the cart repository.
    #[must_use]
    pub fn carts(&self) -> &Arc<dyn CartRepository> {
        &self.inner.carts
    }

    /// Get a reference to the event ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn EventLedger> {
        &self.inner.ledger
    }

    /// Get a reference to the cart merge service.
    #[must_use]
    pub fn merge(&self) -> &CartMergeService {
        &self.inner.merge
    }

    /// Get a reference to the reminder scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<ReminderScheduler> {
        &self.inner.scheduler
    }

    /// Get a reference to the recovery token signer.
    #[must_use]
    pub fn tokens(&self) -> &RecoveryTokenSigner {
        &self.inner.tokens
    }

    /// Get a reference to the clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }
}
