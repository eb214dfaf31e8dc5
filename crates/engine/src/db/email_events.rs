//! Postgres event ledger.
//!
//! Rows are inserted once and never updated or deleted. The table carries
//! `UNIQUE (reminder_type, cart_id)`; a violation on insert means another
//! scheduler instance already recorded the pair and maps to
//! [`LedgerInsert::AlreadySent`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use winback_core::{CartId, Email, EmailEventId, ReminderType};

use super::{EventLedger, LedgerInsert, RepositoryError};
use crate::models::{EmailEvent, NewEmailEvent};

/// Raw ledger row as stored.
#[derive(Debug, sqlx::FromRow)]
struct EmailEventRow {
    id: EmailEventId,
    reminder_type: ReminderType,
    cart_id: CartId,
    recipient: Email,
    sent_at: DateTime<Utc>,
}

impl From<EmailEventRow> for EmailEvent {
    fn from(row: EmailEventRow) -> Self {
        Self {
            id: row.id,
            reminder_type: row.reminder_type,
            cart_id: row.cart_id,
            recipient: row.recipient,
            sent_at: row.sent_at,
        }
    }
}

/// Repository for the idempotency ledger.
#[derive(Clone)]
pub struct PgEventLedger {
    pool: PgPool,
}

impl PgEventLedger {
    /// Create a new event ledger repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLedger for PgEventLedger {
    async fn record(&self, event: NewEmailEvent) -> Result<LedgerInsert, RepositoryError> {
        let result = sqlx::query_as::<_, EmailEventRow>(
            "INSERT INTO email_events (reminder_type, cart_id, recipient, sent_at)
             VALUES ($1, $2, $3, $4)
             RETURNING id, reminder_type, cart_id, recipient, sent_at",
        )
        .bind(event.reminder_type)
        .bind(event.cart_id)
        .bind(&event.recipient)
        .bind(event.sent_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(LedgerInsert::Recorded(row.into())),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                // A concurrent writer already handled this (tier, cart) pair
                Ok(LedgerInsert::AlreadySent)
            }
            Err(e) => Err(RepositoryError::Database(e)),
        }
    }

    async fn has_sent(
        &self,
        reminder_type: ReminderType,
        cart_id: CartId,
    ) -> Result<bool, RepositoryError> {
        let exists: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM email_events WHERE reminder_type = $1 AND cart_id = $2",
        )
        .bind(reminder_type)
        .bind(cart_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(exists.is_some())
    }

    async fn sent_count(&self, cart_id: CartId) -> Result<u64, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM email_events WHERE cart_id = $1")
                .bind(cart_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn events_for_cart(&self, cart_id: CartId) -> Result<Vec<EmailEvent>, RepositoryError> {
        let rows = sqlx::query_as::<_, EmailEventRow>(
            "SELECT id, reminder_type, cart_id, recipient, sent_at
             FROM email_events
             WHERE cart_id = $1
             ORDER BY sent_at ASC",
        )
        .bind(cart_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EmailEvent::from).collect())
    }
}
