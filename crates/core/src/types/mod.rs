//! Shared type definitions.

pub mod currency;
pub mod email;
pub mod id;
pub mod keys;
pub mod lifecycle;
pub mod reminder;

pub use currency::{CurrencyCode, CurrencyParseError};
pub use email::{Email, EmailError};
pub use id::{CartId, EmailEventId};
pub use keys::{OwnerId, ProductRef, SessionKey, VariantRef};
pub use lifecycle::LifecycleState;
pub use reminder::ReminderType;
