//! Conversion webhook handler.
//!
//! The checkout system fires this when an order completes. The signal is
//! idempotent: replays acknowledge with `already_converted` and change
//! nothing. Conversion is terminal and wins over any concurrent reminder
//! pass - once the flag is set, the cart never re-enters scheduling.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use winback_core::{CartId, LifecycleState, SessionKey};

use crate::db::{Conversion, ConversionTarget};
use crate::error::{AppError, Result};
use crate::models::Cart;
use crate::state::AppState;

/// Checkout-completed payload. Identifies the cart by session key or id.
#[derive(Debug, Deserialize)]
pub struct ConversionSignal {
    pub session_key: Option<SessionKey>,
    pub cart_id: Option<CartId>,
    pub order_ref: String,
}

/// Response body for a conversion signal.
#[derive(Debug, Serialize)]
pub struct ConversionResponse {
    pub outcome: &'static str,
    #[serde(flatten)]
    pub cart: Cart,
    pub state: LifecycleState,
}

/// Handle `POST /webhooks/conversion`.
#[instrument(skip(state, signal), fields(order_ref = %signal.order_ref))]
pub async fn conversion(
    State(state): State<AppState>,
    Json(signal): Json<ConversionSignal>,
) -> Result<Json<ConversionResponse>> {
    let target = match (&signal.session_key, signal.cart_id) {
        (Some(session_key), _) => ConversionTarget::SessionKey(session_key.clone()),
        (None, Some(cart_id)) => ConversionTarget::CartId(cart_id),
        (None, None) => {
            return Err(AppError::BadRequest(
                "conversion signal needs a session_key or cart_id".to_string(),
            ));
        }
    };

    let (outcome, cart) = match state
        .carts()
        .mark_converted(&target, &signal.order_ref)
        .await?
    {
        Conversion::Converted(cart) => {
            info!(cart_id = %cart.id, "Cart converted");
            ("converted", cart)
        }
        Conversion::AlreadyConverted(cart) => ("already_converted", cart),
    };

    Ok(Json(ConversionResponse {
        outcome,
        cart,
        state: LifecycleState::Converted,
    }))
}
