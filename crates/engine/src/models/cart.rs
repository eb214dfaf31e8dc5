//! Cart aggregate and line items.

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use winback_core::{CartId, CurrencyCode, OwnerId, ProductRef, SessionKey, VariantRef};

/// A single line in a cart.
///
/// Order of lines is preserved for display only; it is irrelevant to
/// correctness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Catalog product reference.
    pub product: ProductRef,
    /// Catalog variant reference, if the product has variants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<VariantRef>,
    /// Positive quantity.
    pub quantity: u32,
    /// Non-negative unit price captured at the time of the last sync.
    pub unit_price: Decimal,
}

/// Validation errors for a line item.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LineItemError {
    /// Quantity must be a positive integer.
    #[error("quantity must be positive")]
    ZeroQuantity,
    /// Unit price must not be negative.
    #[error("unit price must not be negative")]
    NegativePrice,
}

impl LineItem {
    /// Validate the quantity/price constraints.
    ///
    /// # Errors
    ///
    /// Returns an error if the quantity is zero or the unit price negative.
    pub fn validate(&self) -> Result<(), LineItemError> {
        if self.quantity == 0 {
            return Err(LineItemError::ZeroQuantity);
        }
        if self.unit_price.is_sign_negative() {
            return Err(LineItemError::NegativePrice);
        }
        Ok(())
    }

    /// Extended price for this line.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    /// Merge key: lines with the same product and variant are the same item.
    #[must_use]
    pub fn merge_key(&self) -> (&ProductRef, Option<&VariantRef>) {
        (&self.product, self.variant.as_ref())
    }
}

/// Compute a cart total from a set of lines.
///
/// The store recomputes this on every mutating write; `total_amount` is
/// derived, never client-supplied.
#[must_use]
pub fn total_of(lines: &[LineItem]) -> Decimal {
    lines.iter().map(LineItem::line_total).sum()
}

/// A shopping cart tracked by the recovery engine.
#[derive(Debug, Clone, Serialize)]
pub struct Cart {
    /// Stable identifier for the cart's lifetime.
    pub id: CartId,
    /// Anonymous session key; unique.
    pub session_key: SessionKey,
    /// Linked identity, once the session has authenticated.
    pub owner_id: Option<OwnerId>,
    /// Ordered line items.
    pub line_items: Vec<LineItem>,
    /// Derived total, recomputed by the store on every mutating write.
    pub total_amount: Decimal,
    /// ISO currency code, immutable once set on a non-empty cart.
    pub currency: CurrencyCode,
    /// Bumped on every sync or merge that represents genuine user activity.
    /// Reminder sends do not touch it.
    pub last_activity_at: DateTime<Utc>,
    /// Terminal marker, set exactly once by the checkout-completion signal.
    pub converted: bool,
    /// External order reference recorded at conversion time.
    pub conversion_ref: Option<String>,
    /// Set when this cart was folded into another at identity linkage.
    /// Retired carts never re-enter scheduling.
    pub merged_into: Option<CartId>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Whether the cart has no line items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.line_items.is_empty()
    }

    /// Elapsed inactivity relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.last_activity_at
    }

    /// Whether the cart is still a live scheduling candidate.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.converted && self.merged_into.is_none()
    }
}

/// Full-state activity sync payload (last-write-wins per call).
#[derive(Debug, Clone, Deserialize)]
pub struct CartSync {
    /// Session this cart belongs to.
    pub session_key: SessionKey,
    /// Linked identity, if the session is authenticated.
    pub owner_id: Option<OwnerId>,
    /// Cart currency.
    pub currency: CurrencyCode,
    /// Complete replacement set of line items.
    pub line_items: Vec<LineItem>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rust_decimal::dec;

    fn line(product: &str, qty: u32, price: Decimal) -> LineItem {
        LineItem {
            product: ProductRef::new(product),
            variant: None,
            quantity: qty,
            unit_price: price,
        }
    }

    #[test]
    fn test_line_total() {
        let l = line("sku-1", 3, dec!(4.50));
        assert_eq!(l.line_total(), dec!(13.50));
    }

    #[test]
    fn test_total_of_sums_lines() {
        let lines = vec![line("sku-1", 2, dec!(10.00)), line("sku-2", 1, dec!(0.99))];
        assert_eq!(total_of(&lines), dec!(20.99));
    }

    #[test]
    fn test_total_of_empty_is_zero() {
        assert_eq!(total_of(&[]), Decimal::ZERO);
    }

    #[test]
    fn test_validate_rejects_zero_quantity() {
        let l = line("sku-1", 0, dec!(1.00));
        assert!(matches!(l.validate(), Err(LineItemError::ZeroQuantity)));
    }

    #[test]
    fn test_validate_rejects_negative_price() {
        let l = line("sku-1", 1, dec!(-0.01));
        assert!(matches!(l.validate(), Err(LineItemError::NegativePrice)));
    }

    #[test]
    fn test_validate_allows_free_items() {
        let l = line("sku-1", 1, Decimal::ZERO);
        assert!(l.validate().is_ok());
    }

    #[test]
    fn test_merge_key_distinguishes_variants() {
        let a = line("sku-1", 1, dec!(1.00));
        let mut b = a.clone();
        b.variant = Some(VariantRef::new("v-1"));
        assert_ne!(a.merge_key(), b.merge_key());
    }
}
