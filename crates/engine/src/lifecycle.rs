//! Lifecycle classification.
//!
//! Pure function mapping a cart snapshot and the current time to a lifecycle
//! state. No side effects; called by the scheduler on each tick per candidate
//! cart and exposed read-only by the status endpoint.

use chrono::{DateTime, TimeDelta, Utc};

use winback_core::LifecycleState;

use crate::models::Cart;

/// Inactivity thresholds for stale/abandoned classification.
///
/// `stale < abandoned` is validated at construction; violating the ordering
/// is a configuration error and fails fast at startup rather than silently
/// misclassifying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleThresholds {
    stale_after: TimeDelta,
    abandoned_after: TimeDelta,
}

/// Invalid threshold configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ThresholdError {
    /// Thresholds must be positive durations.
    #[error("lifecycle thresholds must be positive durations")]
    NonPositive,
    /// The stale threshold must be strictly below the abandoned threshold.
    #[error("stale threshold ({stale}) must be below abandoned threshold ({abandoned})")]
    OutOfOrder {
        stale: TimeDelta,
        abandoned: TimeDelta,
    },
}

impl LifecycleThresholds {
    /// Create a validated threshold pair.
    ///
    /// # Errors
    ///
    /// Returns an error if either duration is non-positive or if
    /// `stale_after >= abandoned_after`.
    pub fn new(stale_after: TimeDelta, abandoned_after: TimeDelta) -> Result<Self, ThresholdError> {
        if stale_after <= TimeDelta::zero() || abandoned_after <= TimeDelta::zero() {
            return Err(ThresholdError::NonPositive);
        }
        if stale_after >= abandoned_after {
            return Err(ThresholdError::OutOfOrder {
                stale: stale_after,
                abandoned: abandoned_after,
            });
        }
        Ok(Self {
            stale_after,
            abandoned_after,
        })
    }

    /// Inactivity after which a cart is considered stale.
    #[must_use]
    pub const fn stale_after(&self) -> TimeDelta {
        self.stale_after
    }

    /// Inactivity after which a cart is considered abandoned.
    #[must_use]
    pub const fn abandoned_after(&self) -> TimeDelta {
        self.abandoned_after
    }
}

/// Classify a cart's lifecycle state at `now`.
///
/// Precedence: converted first (terminal), then empty, then age-based
/// classification against the thresholds.
#[must_use]
pub fn classify(cart: &Cart, now: DateTime<Utc>, thresholds: &LifecycleThresholds) -> LifecycleState {
    if cart.converted {
        return LifecycleState::Converted;
    }
    if cart.is_empty() {
        return LifecycleState::Empty;
    }

    let age = cart.age(now);
    if age < thresholds.stale_after {
        LifecycleState::Active
    } else if age < thresholds.abandoned_after {
        LifecycleState::Stale
    } else {
        LifecycleState::Abandoned
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::dec;

    use winback_core::{CartId, CurrencyCode, ProductRef, SessionKey};

    use crate::models::LineItem;

    fn thresholds() -> LifecycleThresholds {
        LifecycleThresholds::new(TimeDelta::minutes(30), TimeDelta::minutes(60)).unwrap()
    }

    fn cart_idle_for(idle: TimeDelta) -> Cart {
        let now = Utc::now();
        Cart {
            id: CartId::new(1),
            session_key: SessionKey::new("sess-1"),
            owner_id: None,
            line_items: vec![LineItem {
                product: ProductRef::new("sku-1"),
                variant: None,
                quantity: 1,
                unit_price: dec!(9.99),
            }],
            total_amount: dec!(9.99),
            currency: CurrencyCode::USD,
            last_activity_at: now - idle,
            converted: false,
            conversion_ref: None,
            merged_into: None,
            created_at: now - idle,
            updated_at: now - idle,
        }
    }

    #[test]
    fn test_active_below_stale_threshold() {
        let cart = cart_idle_for(TimeDelta::minutes(29));
        assert_eq!(
            classify(&cart, Utc::now(), &thresholds()),
            LifecycleState::Active
        );
    }

    #[test]
    fn test_stale_at_exact_boundary() {
        let now = Utc::now();
        let mut cart = cart_idle_for(TimeDelta::zero());
        cart.last_activity_at = now - TimeDelta::minutes(30);
        assert_eq!(classify(&cart, now, &thresholds()), LifecycleState::Stale);
    }

    #[test]
    fn test_abandoned_at_exact_boundary() {
        let now = Utc::now();
        let mut cart = cart_idle_for(TimeDelta::zero());
        cart.last_activity_at = now - TimeDelta::minutes(60);
        assert_eq!(
            classify(&cart, now, &thresholds()),
            LifecycleState::Abandoned
        );
    }

    #[test]
    fn test_empty_cart_never_abandoned() {
        let mut cart = cart_idle_for(TimeDelta::days(30));
        cart.line_items.clear();
        assert_eq!(
            classify(&cart, Utc::now(), &thresholds()),
            LifecycleState::Empty
        );
    }

    #[test]
    fn test_converted_overrides_everything() {
        let mut cart = cart_idle_for(TimeDelta::days(30));
        cart.converted = true;
        assert_eq!(
            classify(&cart, Utc::now(), &thresholds()),
            LifecycleState::Converted
        );

        // Even an empty converted cart reports converted, not empty
        cart.line_items.clear();
        assert_eq!(
            classify(&cart, Utc::now(), &thresholds()),
            LifecycleState::Converted
        );
    }

    #[test]
    fn test_threshold_ordering_enforced() {
        assert!(matches!(
            LifecycleThresholds::new(TimeDelta::minutes(60), TimeDelta::minutes(60)),
            Err(ThresholdError::OutOfOrder { .. })
        ));
        assert!(matches!(
            LifecycleThresholds::new(TimeDelta::minutes(90), TimeDelta::minutes(60)),
            Err(ThresholdError::OutOfOrder { .. })
        ));
        assert!(matches!(
            LifecycleThresholds::new(TimeDelta::zero(), TimeDelta::minutes(60)),
            Err(ThresholdError::NonPositive)
        ));
    }
}
