//! Cart lifecycle states.

use serde::{Deserialize, Serialize};

/// Derived lifecycle state of a cart.
///
/// Never persisted. Always computed from `converted`, `line_items`, and
/// `last_activity_at` so it cannot drift from the data that implies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Checkout completed. Terminal; overrides all other checks.
    Converted,
    /// No line items. Never progresses toward reminders, regardless of age.
    Empty,
    /// Recent activity, below the stale threshold.
    Active,
    /// Idle past the stale threshold but not yet abandoned.
    Stale,
    /// Idle past the abandoned threshold; eligible for reminders.
    Abandoned,
}

impl LifecycleState {
    /// Whether this state is terminal for scheduling purposes.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Converted)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Converted => "converted",
            Self::Empty => "empty",
            Self::Active => "active",
            Self::Stale => "stale",
            Self::Abandoned => "abandoned",
        };
        write!(f, "{s}")
    }
}
