//! Idempotency ledger entries.

use chrono::{DateTime, Utc};
use serde::Serialize;

use winback_core::{CartId, Email, EmailEventId, ReminderType};

/// A confirmed reminder send, recorded once and never mutated.
///
/// The `(reminder_type, cart_id)` pair is unique for the cart's entire
/// lifetime, enforced by the storage layer. Rows persist indefinitely as an
/// audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct EmailEvent {
    /// Ledger row id.
    pub id: EmailEventId,
    /// Reminder tier this send belongs to.
    pub reminder_type: ReminderType,
    /// Cart the reminder concerned.
    pub cart_id: CartId,
    /// Destination address used at send time (denormalized for audit).
    pub recipient: Email,
    /// Timestamp of the confirmed dispatch.
    pub sent_at: DateTime<Utc>,
}

/// Ledger entry to record after a confirmed send.
#[derive(Debug, Clone)]
pub struct NewEmailEvent {
    /// Reminder tier that was sent.
    pub reminder_type: ReminderType,
    /// Cart the reminder concerned.
    pub cart_id: CartId,
    /// Destination address used at send time.
    pub recipient: Email,
    /// Timestamp of the confirmed dispatch.
    pub sent_at: DateTime<Utc>,
}
