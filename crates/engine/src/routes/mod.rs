//! HTTP route handlers for the recovery engine.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                    - Liveness check
//! GET  /health/ready              - Readiness check (verifies database)
//!
//! # Cart
//! POST /cart/sync                 - Full-state cart sync (upsert by session key)
//! GET  /cart/{session_key}        - Cart status: contents, derived state, reminder audit trail
//! POST /cart/link                 - Link an identity to a session, merging carts if needed
//!
//! # Recovery
//! GET  /recovery/{token}          - Resolve a signed recovery link to the live cart
//!
//! # Webhooks
//! POST /webhooks/conversion       - Checkout-completed signal (idempotent)
//!
//! # Admin
//! POST /admin/scheduler/run       - Trigger one reminder pass, returns the tick summary
//! ```

pub mod admin;
pub mod cart;
pub mod health;
pub mod recovery;
pub mod webhooks;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// Create the full application router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/cart/sync", post(cart::sync))
        .route("/cart/link", post(cart::link))
        .route("/cart/{session_key}", get(cart::status))
        .route("/recovery/{token}", get(recovery::recover))
        .route("/webhooks/conversion", post(webhooks::conversion))
        .route("/admin/scheduler/run", post(admin::run_scheduler))
}
