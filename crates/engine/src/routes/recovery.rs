//! Recovery link handler.
//!
//! A recovery token authenticates a session key, nothing more. The cart it
//! resolves to is whatever that session's cart looks like right now - the
//! token carries no contents, so a cart edited since the reminder went out
//! recovers to its current state.

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::instrument;

use crate::error::{AppError, Result};
use crate::lifecycle::classify;
use crate::routes::cart::CartResponse;
use crate::state::AppState;

/// Handle `GET /recovery/{token}`.
///
/// Token validity is checked before cart existence: an expired token is
/// reported as expired even when the cart is long gone, and a valid token
/// for a vanished cart is a plain not-found.
#[instrument(skip(state, token))]
pub async fn recover(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<CartResponse>> {
    let now = state.clock().now();
    let claims = state.tokens().verify(&token, now)?;

    let cart = state
        .carts()
        .get_by_session_key(&claims.session_key)
        .await?
        .ok_or_else(|| AppError::NotFound("cart not found".to_string()))?;

    let lifecycle = classify(&cart, now, &state.config().thresholds);

    Ok(Json(CartResponse {
        cart,
        state: lifecycle,
    }))
}
