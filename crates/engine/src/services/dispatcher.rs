//! Reminder dispatch.
//!
//! Turns a cart plus a reminder tier into a concrete message: mints the
//! recovery token, builds the recovery URL, formats the subject and totals,
//! and hands the message to the transport under a hard timeout. A timeout
//! is a failure like any other; the ledger row is only written by the
//! caller after a confirmed send.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

use winback_core::{Email, ReminderType};

use crate::clock::Clock;
use crate::models::Cart;
use crate::services::recovery::RecoveryTokenSigner;
use crate::services::transport::{NotificationTransport, ReminderMessage, TransportError};

/// Why a dispatch attempt did not complete.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The transport reported a failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The transport did not confirm within the deadline.
    #[error("dispatch timed out after {0:?}")]
    TimedOut(Duration),
}

/// Proof of a confirmed send, used to write the ledger row.
#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    pub recipient: Email,
    pub sent_at: DateTime<Utc>,
}

/// Formats and delivers individual reminders.
pub struct ReminderDispatcher {
    transport: Arc<dyn NotificationTransport>,
    signer: RecoveryTokenSigner,
    clock: Arc<dyn Clock>,
    base_url: String,
    token_ttl: TimeDelta,
    timeout: Duration,
}

impl ReminderDispatcher {
    #[must_use]
    pub fn new(
        transport: Arc<dyn NotificationTransport>,
        signer: RecoveryTokenSigner,
        clock: Arc<dyn Clock>,
        base_url: &str,
        token_ttl: TimeDelta,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            signer,
            clock,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token_ttl,
            timeout,
        }
    }

    /// Send one reminder for `cart` to `recipient`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::TimedOut`] if the transport does not confirm
    /// within the configured deadline, or forwards the transport's own error.
    pub async fn dispatch(
        &self,
        cart: &Cart,
        reminder_type: ReminderType,
        final_reminder: bool,
        recipient: &Email,
        now: DateTime<Utc>,
    ) -> Result<DispatchReceipt, DispatchError> {
        let token = self.signer.issue(&cart.session_key, now + self.token_ttl);

        let message = ReminderMessage {
            recipient: recipient.clone(),
            reminder_type,
            subject: subject_for(final_reminder).to_owned(),
            recovery_url: format!("{}/recovery/{token}", self.base_url),
            item_count: cart.line_items.len(),
            total: format!("{} {}", cart.currency, cart.total_amount),
            final_reminder,
        };

        match tokio::time::timeout(self.timeout, self.transport.send(&message)).await {
            // Stamped after confirmation; the receipt records when the
            // transport accepted the message, not when we started trying.
            Ok(Ok(())) => Ok(DispatchReceipt {
                recipient: recipient.clone(),
                sent_at: self.clock.now(),
            }),
            Ok(Err(e)) => Err(DispatchError::Transport(e)),
            Err(_) => Err(DispatchError::TimedOut(self.timeout)),
        }
    }
}

const fn subject_for(final_reminder: bool) -> &'static str {
    if final_reminder {
        "Last chance to finish your order"
    } else {
        "You left something behind"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_escalates_on_final_reminder() {
        assert_eq!(subject_for(false), "You left something behind");
        assert_eq!(subject_for(true), "Last chance to finish your order");
    }
}
