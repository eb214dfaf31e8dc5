//! Identity linkage and cart merging.
//!
//! When an anonymous session authenticates, its guest cart meets whatever
//! live cart the identity already owns. The owner's cart always survives;
//! the guest cart is folded in and retired. Merged quantities are summed
//! per `(product, variant)` and every line is re-priced at the current
//! catalog price, so a merge never resurrects stale prices.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use winback_core::{CartId, OwnerId, SessionKey};

use crate::clock::Clock;
use crate::db::{CartRepository, RepositoryError};
use crate::models::{Cart, LineItem, total_of};
use crate::services::providers::{PricingProvider, ProviderError};

/// Errors from identity linkage.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Storage failure.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Catalog re-pricing failed; the merge is aborted, both carts untouched.
    #[error("re-pricing failed: {0}")]
    Pricing(#[from] ProviderError),
}

/// What linking an identity to a session did.
#[derive(Debug, Clone)]
pub enum LinkOutcome {
    /// The guest cart had no owner counterpart and was claimed as-is.
    Claimed(Cart),
    /// Guest and owner carts were folded together; the guest cart retired.
    Merged { cart: Cart, retired: CartId },
    /// The session's cart already belongs to this identity.
    AlreadyLinked(Cart),
    /// The session had no live cart; the identity's own cart (if any) stands.
    NoGuestCart(Option<Cart>),
}

/// Reconciles guest carts with owner carts at login.
pub struct CartMergeService {
    carts: Arc<dyn CartRepository>,
    pricing: Arc<dyn PricingProvider>,
    clock: Arc<dyn Clock>,
}

impl CartMergeService {
    #[must_use]
    pub fn new(
        carts: Arc<dyn CartRepository>,
        pricing: Arc<dyn PricingProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            carts,
            pricing,
            clock,
        }
    }

    /// Link `owner_id` to the session's cart, merging with the identity's
    /// existing live cart when both exist.
    ///
    /// # Errors
    ///
    /// Propagates storage errors, and [`MergeError::Pricing`] when the
    /// catalog cannot re-price the merged lines. On a pricing failure
    /// nothing has been written; both carts remain as they were.
    pub async fn link_identity(
        &self,
        session_key: &SessionKey,
        owner_id: &OwnerId,
    ) -> Result<LinkOutcome, MergeError> {
        let now = self.clock.now();

        let guest = self
            .carts
            .get_by_session_key(session_key)
            .await?
            .filter(Cart::is_live);
        let owned = self.carts.get_live_by_owner(owner_id).await?;

        let (guest, owned) = match (guest, owned) {
            (None, owned) => return Ok(LinkOutcome::NoGuestCart(owned)),
            (Some(guest), None) => {
                if guest.owner_id.as_ref() == Some(owner_id) {
                    return Ok(LinkOutcome::AlreadyLinked(guest));
                }
                let claimed = self.carts.assign_owner(guest.id, owner_id, now).await?;
                info!(cart_id = %claimed.id, owner_id = %owner_id, "Guest cart claimed");
                return Ok(LinkOutcome::Claimed(claimed));
            }
            (Some(guest), Some(owned)) if guest.id == owned.id => {
                return Ok(LinkOutcome::AlreadyLinked(owned));
            }
            (Some(guest), Some(owned)) => (guest, owned),
        };

        // Re-price before any write so a catalog failure leaves both carts
        // untouched.
        let merged = self.merge_lines(&owned, &guest).await?;
        let total = total_of(&merged);

        let cart = self
            .carts
            .replace_lines(owned.id, merged, total, now)
            .await?;
        self.carts.retire_merged(guest.id, owned.id).await?;

        info!(
            survivor = %cart.id,
            retired = %guest.id,
            owner_id = %owner_id,
            "Guest cart merged into owner cart"
        );

        Ok(LinkOutcome::Merged {
            cart,
            retired: guest.id,
        })
    }

    /// Union of both carts' lines: owner lines first in their original
    /// order, guest-only lines appended, quantities summed per
    /// `(product, variant)`, every line at the current catalog price.
    async fn merge_lines(
        &self,
        owned: &Cart,
        guest: &Cart,
    ) -> Result<Vec<LineItem>, MergeError> {
        let mut merged: Vec<LineItem> = owned.line_items.clone();
        let mut index: HashMap<(String, Option<String>), usize> = merged
            .iter()
            .enumerate()
            .map(|(i, line)| (owned_key(line), i))
            .collect();

        for line in &guest.line_items {
            match index.get(&owned_key(line)) {
                Some(&i) => {
                    merged[i].quantity = merged[i].quantity.saturating_add(line.quantity);
                }
                None => {
                    index.insert(owned_key(line), merged.len());
                    merged.push(line.clone());
                }
            }
        }

        for line in &mut merged {
            line.unit_price = self
                .pricing
                .unit_price(&line.product, line.variant.as_ref())
                .await?;
        }

        Ok(merged)
    }
}

fn owned_key(line: &LineItem) -> (String, Option<String>) {
    (
        line.product.as_str().to_owned(),
        line.variant.as_ref().map(|v| v.as_str().to_owned()),
    )
}
