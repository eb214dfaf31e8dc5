//! Database operations for the recovery engine.
//!
//! # Tables
//!
//! - `carts` - cart identity, contents, totals, and activity timestamp,
//!   keyed by `id` with a unique `session_key`
//! - `email_events` - the idempotency ledger; `(reminder_type, cart_id)`
//!   unique, append-only
//!
//! # Migrations
//!
//! Migrations are stored in `crates/engine/migrations/` and run via:
//! ```bash
//! cargo run -p winback-cli -- migrate
//! ```
//!
//! The engine is deliberately split into two narrow repositories - carts and
//! the event ledger - which are the only shared mutable resources. All
//! mutations are single-row upserts/inserts keyed by natural uniqueness
//! (`session_key` for carts, `(reminder_type, cart_id)` for ledger rows), so
//! no multi-row transactions are needed and multiple engine processes may
//! run against the same store.

pub mod carts;
pub mod email_events;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use winback_core::{CartId, OwnerId, ReminderType, SessionKey};

use crate::models::{Cart, CartSync, EmailEvent, LineItem, NewEmailEvent};

pub use carts::PgCartRepository;
pub use email_events::PgEventLedger;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., currency change on a non-empty cart).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// How the conversion signal identifies its cart.
#[derive(Debug, Clone)]
pub enum ConversionTarget {
    /// By the anonymous session key.
    SessionKey(SessionKey),
    /// By the cart id.
    CartId(CartId),
}

/// Outcome of applying a conversion signal.
#[derive(Debug, Clone)]
pub enum Conversion {
    /// The cart transitioned to converted.
    Converted(Cart),
    /// The cart was already converted; the signal is acknowledged, not an error.
    AlreadyConverted(Cart),
}

/// Outcome of a ledger insert.
#[derive(Debug, Clone)]
pub enum LedgerInsert {
    /// A new row was written.
    Recorded(EmailEvent),
    /// A row for this `(reminder_type, cart_id)` pair already existed -
    /// a concurrent writer handled the pair first.
    AlreadySent,
}

/// Persistent record of carts.
#[async_trait]
pub trait CartRepository: Send + Sync {
    /// Upsert a cart by session key from a full-state sync.
    ///
    /// Bumps `last_activity_at` to `now` and recomputes `total_amount`
    /// server-side. Refuses to mutate a converted cart and refuses currency
    /// changes on a non-empty cart.
    async fn upsert_sync(&self, sync: CartSync, now: DateTime<Utc>)
    -> Result<Cart, RepositoryError>;

    /// Fetch a cart by its session key.
    async fn get_by_session_key(
        &self,
        session_key: &SessionKey,
    ) -> Result<Option<Cart>, RepositoryError>;

    /// Fetch the live (not converted, not merged) cart owned by an identity.
    async fn get_live_by_owner(
        &self,
        owner_id: &OwnerId,
    ) -> Result<Option<Cart>, RepositoryError>;

    /// Scan live, non-empty carts idle since before `idle_since`.
    ///
    /// Corrupt rows are logged and excluded rather than failing the scan;
    /// one bad row must never halt processing of the other candidates.
    async fn find_reminder_candidates(
        &self,
        idle_since: DateTime<Utc>,
    ) -> Result<Vec<Cart>, RepositoryError>;

    /// Apply the external checkout-completion signal. Idempotent.
    async fn mark_converted(
        &self,
        target: &ConversionTarget,
        order_ref: &str,
    ) -> Result<Conversion, RepositoryError>;

    /// Link an identity to a cart, bumping the activity clock.
    async fn assign_owner(
        &self,
        cart_id: CartId,
        owner_id: &OwnerId,
        now: DateTime<Utc>,
    ) -> Result<Cart, RepositoryError>;

    /// Replace a cart's lines with a merged set, recomputed total included.
    /// Bumps the activity clock: merging counts as activity.
    async fn replace_lines(
        &self,
        cart_id: CartId,
        line_items: Vec<LineItem>,
        total_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Cart, RepositoryError>;

    /// Retire a cart that was folded into another. The row is kept for
    /// audit; it never independently re-enters scheduling.
    async fn retire_merged(
        &self,
        cart_id: CartId,
        merged_into: CartId,
    ) -> Result<(), RepositoryError>;
}

/// Append-only record of confirmed reminder sends.
///
/// The sole source of idempotency truth. The `(reminder_type, cart_id)`
/// uniqueness is enforced at the storage layer - not merely in application
/// logic - because the scheduler may run as multiple concurrent instances.
#[async_trait]
pub trait EventLedger: Send + Sync {
    /// Record a confirmed send. A unique-constraint conflict maps to
    /// [`LedgerInsert::AlreadySent`], never an error.
    async fn record(&self, event: NewEmailEvent) -> Result<LedgerInsert, RepositoryError>;

    /// Whether a row exists for this tier and cart.
    async fn has_sent(
        &self,
        reminder_type: ReminderType,
        cart_id: CartId,
    ) -> Result<bool, RepositoryError>;

    /// Total reminder rows recorded for a cart, across all tiers.
    async fn sent_count(&self, cart_id: CartId) -> Result<u64, RepositoryError>;

    /// All ledger rows for a cart, oldest first (audit trail).
    async fn events_for_cart(&self, cart_id: CartId) -> Result<Vec<EmailEvent>, RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
