//! Cart route handlers.
//!
//! The client owns cart contents and pushes full state; the engine owns
//! lifecycle. Sync is an upsert by session key, status is read-only and
//! returns the derived lifecycle state alongside the reminder audit trail.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use winback_core::{LifecycleState, OwnerId, SessionKey};

use crate::error::{AppError, Result};
use crate::lifecycle::classify;
use crate::models::{Cart, CartSync, EmailEvent};
use crate::services::merge::LinkOutcome;
use crate::state::AppState;

/// A cart plus its derived lifecycle state.
#[derive(Debug, Serialize)]
pub struct CartResponse {
    #[serde(flatten)]
    pub cart: Cart,
    pub state: LifecycleState,
}

/// Full status view: contents, state, and the reminder audit trail.
#[derive(Debug, Serialize)]
pub struct CartStatusResponse {
    #[serde(flatten)]
    pub cart: Cart,
    pub state: LifecycleState,
    pub reminders: Vec<EmailEvent>,
}

/// Handle `POST /cart/sync`.
#[instrument(skip(state, sync), fields(session_key = %sync.session_key))]
pub async fn sync(
    State(state): State<AppState>,
    Json(sync): Json<CartSync>,
) -> Result<Json<CartResponse>> {
    for line in &sync.line_items {
        line.validate()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
    }

    let now = state.clock().now();
    let cart = state.carts().upsert_sync(sync, now).await?;
    let lifecycle = classify(&cart, now, &state.config().thresholds);

    Ok(Json(CartResponse {
        cart,
        state: lifecycle,
    }))
}

/// Handle `GET /cart/{session_key}`.
#[instrument(skip(state))]
pub async fn status(
    State(state): State<AppState>,
    Path(session_key): Path<SessionKey>,
) -> Result<Json<CartStatusResponse>> {
    let cart = state
        .carts()
        .get_by_session_key(&session_key)
        .await?
        .ok_or_else(|| AppError::NotFound("cart not found".to_string()))?;

    let now = state.clock().now();
    let lifecycle = classify(&cart, now, &state.config().thresholds);
    let reminders = state.ledger().events_for_cart(cart.id).await?;

    Ok(Json(CartStatusResponse {
        cart,
        state: lifecycle,
        reminders,
    }))
}

/// Request body for `POST /cart/link`.
#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub session_key: SessionKey,
    pub owner_id: OwnerId,
}

/// Response body for `POST /cart/link`.
#[derive(Debug, Serialize)]
pub struct LinkResponse {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cart: Option<Cart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retired_cart_id: Option<winback_core::CartId>,
}

/// Handle `POST /cart/link`.
#[instrument(skip(state, request), fields(session_key = %request.session_key, owner_id = %request.owner_id))]
pub async fn link(
    State(state): State<AppState>,
    Json(request): Json<LinkRequest>,
) -> Result<Json<LinkResponse>> {
    let outcome = state
        .merge()
        .link_identity(&request.session_key, &request.owner_id)
        .await?;

    let response = match outcome {
        LinkOutcome::Claimed(cart) => LinkResponse {
            outcome: "claimed",
            cart: Some(cart),
            retired_cart_id: None,
        },
        LinkOutcome::Merged { cart, retired } => LinkResponse {
            outcome: "merged",
            cart: Some(cart),
            retired_cart_id: Some(retired),
        },
        LinkOutcome::AlreadyLinked(cart) => LinkResponse {
            outcome: "already_linked",
            cart: Some(cart),
            retired_cart_id: None,
        },
        LinkOutcome::NoGuestCart(cart) => LinkResponse {
            outcome: "no_guest_cart",
            cart,
            retired_cart_id: None,
        },
    };

    Ok(Json(response))
}
