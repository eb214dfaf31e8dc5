//! Postgres cart repository.
//!
//! Line items are stored as a typed JSONB array, decoded defensively: a cart
//! whose payload fails to decode is reported as `DataCorruption` on single
//! reads and skipped with a warning during candidate scans.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::warn;

use winback_core::{CartId, CurrencyCode, OwnerId, SessionKey};

use super::{CartRepository, Conversion, ConversionTarget, RepositoryError};
use crate::models::{Cart, CartSync, LineItem, cart::total_of};

const CART_COLUMNS: &str = "id, session_key, owner_id, line_items, total_amount, currency, \
     last_activity_at, converted, conversion_ref, merged_into, created_at, updated_at";

/// Raw cart row as stored.
#[derive(Debug, sqlx::FromRow)]
struct CartRow {
    id: CartId,
    session_key: SessionKey,
    owner_id: Option<OwnerId>,
    line_items: serde_json::Value,
    total_amount: Decimal,
    currency: String,
    last_activity_at: DateTime<Utc>,
    converted: bool,
    conversion_ref: Option<String>,
    merged_into: Option<CartId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CartRow> for Cart {
    type Error = RepositoryError;

    fn try_from(row: CartRow) -> Result<Self, Self::Error> {
        let currency: CurrencyCode = row.currency.parse().map_err(|e| {
            RepositoryError::DataCorruption(format!("cart {}: {e}", row.id))
        })?;
        let line_items: Vec<LineItem> = serde_json::from_value(row.line_items).map_err(|e| {
            RepositoryError::DataCorruption(format!("cart {}: invalid line items: {e}", row.id))
        })?;

        Ok(Self {
            id: row.id,
            session_key: row.session_key,
            owner_id: row.owner_id,
            line_items,
            total_amount: row.total_amount,
            currency,
            last_activity_at: row.last_activity_at,
            converted: row.converted,
            conversion_ref: row.conversion_ref,
            merged_into: row.merged_into,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for cart database operations.
#[derive(Clone)]
pub struct PgCartRepository {
    pool: PgPool,
}

impl PgCartRepository {
    /// Create a new cart repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_optional(
        &self,
        query: &str,
        bind: &str,
    ) -> Result<Option<Cart>, RepositoryError> {
        let row = sqlx::query_as::<_, CartRow>(query)
            .bind(bind)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Cart::try_from).transpose()
    }
}

#[async_trait]
impl CartRepository for PgCartRepository {
    async fn upsert_sync(
        &self,
        sync: CartSync,
        now: DateTime<Utc>,
    ) -> Result<Cart, RepositoryError> {
        for line in &sync.line_items {
            line.validate()
                .map_err(|e| RepositoryError::Conflict(format!("invalid line item: {e}")))?;
        }

        // Immutability pre-checks against the current row, for precise error
        // messages. The converted guard is also enforced atomically below:
        // the `DO UPDATE ... WHERE NOT carts.converted` clause refuses to
        // touch a cart that converted between this read and the upsert.
        if let Some(existing) = self.get_by_session_key(&sync.session_key).await? {
            if existing.converted {
                return Err(RepositoryError::Conflict(
                    "cart is converted and no longer accepts syncs".to_owned(),
                ));
            }
            if !existing.is_empty() && existing.currency != sync.currency {
                return Err(RepositoryError::Conflict(format!(
                    "currency is immutable once set (cart is {}, sync is {})",
                    existing.currency, sync.currency
                )));
            }
        }

        let total = total_of(&sync.line_items);
        let line_items = serde_json::to_value(&sync.line_items)
            .map_err(|e| RepositoryError::DataCorruption(format!("encode line items: {e}")))?;

        let sql = format!(
            "INSERT INTO carts (session_key, owner_id, line_items, total_amount, currency, \
                                last_activity_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $6, $6)
             ON CONFLICT (session_key) DO UPDATE SET
                 owner_id = COALESCE(EXCLUDED.owner_id, carts.owner_id),
                 line_items = EXCLUDED.line_items,
                 total_amount = EXCLUDED.total_amount,
                 currency = EXCLUDED.currency,
                 last_activity_at = EXCLUDED.last_activity_at,
                 updated_at = EXCLUDED.updated_at
             WHERE NOT carts.converted
             RETURNING {CART_COLUMNS}"
        );

        let row = sqlx::query_as::<_, CartRow>(&sql)
            .bind(&sync.session_key)
            .bind(&sync.owner_id)
            .bind(line_items)
            .bind(total)
            .bind(sync.currency.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                RepositoryError::Conflict(
                    "cart is converted and no longer accepts syncs".to_owned(),
                )
            })?;

        Cart::try_from(row)
    }

    async fn get_by_session_key(
        &self,
        session_key: &SessionKey,
    ) -> Result<Option<Cart>, RepositoryError> {
        let sql = format!("SELECT {CART_COLUMNS} FROM carts WHERE session_key = $1");
        self.fetch_optional(&sql, session_key.as_str()).await
    }

    async fn get_live_by_owner(
        &self,
        owner_id: &OwnerId,
    ) -> Result<Option<Cart>, RepositoryError> {
        let sql = format!(
            "SELECT {CART_COLUMNS} FROM carts
             WHERE owner_id = $1 AND NOT converted AND merged_into IS NULL
             ORDER BY last_activity_at DESC
             LIMIT 1"
        );
        self.fetch_optional(&sql, owner_id.as_str()).await
    }

    async fn find_reminder_candidates(
        &self,
        idle_since: DateTime<Utc>,
    ) -> Result<Vec<Cart>, RepositoryError> {
        let sql = format!(
            "SELECT {CART_COLUMNS} FROM carts
             WHERE NOT converted
               AND merged_into IS NULL
               AND jsonb_array_length(line_items) > 0
               AND last_activity_at <= $1
             ORDER BY last_activity_at ASC"
        );

        let rows = sqlx::query_as::<_, CartRow>(&sql)
            .bind(idle_since)
            .fetch_all(&self.pool)
            .await?;

        // One corrupt row must not halt the whole scan
        let carts = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                match Cart::try_from(row) {
                    Ok(cart) => Some(cart),
                    Err(e) => {
                        warn!(cart_id = %id, error = %e, "Skipping corrupt cart row in candidate scan");
                        None
                    }
                }
            })
            .collect();

        Ok(carts)
    }

    async fn mark_converted(
        &self,
        target: &ConversionTarget,
        order_ref: &str,
    ) -> Result<Conversion, RepositoryError> {
        let (update_sql, select_sql) = match target {
            ConversionTarget::SessionKey(_) => (
                format!(
                    "UPDATE carts SET converted = TRUE, conversion_ref = $2, updated_at = NOW()
                     WHERE session_key = $1 AND NOT converted
                     RETURNING {CART_COLUMNS}"
                ),
                format!("SELECT {CART_COLUMNS} FROM carts WHERE session_key = $1"),
            ),
            ConversionTarget::CartId(_) => (
                format!(
                    "UPDATE carts SET converted = TRUE, conversion_ref = $2, updated_at = NOW()
                     WHERE id = $1 AND NOT converted
                     RETURNING {CART_COLUMNS}"
                ),
                format!("SELECT {CART_COLUMNS} FROM carts WHERE id = $1"),
            ),
        };

        let mut update = sqlx::query_as::<_, CartRow>(&update_sql);
        let mut select = sqlx::query_as::<_, CartRow>(&select_sql);
        match target {
            ConversionTarget::SessionKey(sk) => {
                update = update.bind(sk.as_str().to_owned());
                select = select.bind(sk.as_str().to_owned());
            }
            ConversionTarget::CartId(id) => {
                update = update.bind(*id);
                select = select.bind(*id);
            }
        }

        if let Some(row) = update.bind(order_ref).fetch_optional(&self.pool).await? {
            return Ok(Conversion::Converted(Cart::try_from(row)?));
        }

        // No row updated: either already converted (idempotent ack) or absent
        match select.fetch_optional(&self.pool).await? {
            Some(row) => {
                let cart = Cart::try_from(row)?;
                if cart.converted {
                    Ok(Conversion::AlreadyConverted(cart))
                } else {
                    // Lost a race with a concurrent conversion writer; re-read
                    // said not-converted, which cannot persist. Report conflict.
                    Err(RepositoryError::Conflict(
                        "conversion raced with another writer".to_owned(),
                    ))
                }
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn assign_owner(
        &self,
        cart_id: CartId,
        owner_id: &OwnerId,
        now: DateTime<Utc>,
    ) -> Result<Cart, RepositoryError> {
        let sql = format!(
            "UPDATE carts SET owner_id = $2, last_activity_at = $3, updated_at = $3
             WHERE id = $1 AND NOT converted
             RETURNING {CART_COLUMNS}"
        );

        let row = sqlx::query_as::<_, CartRow>(&sql)
            .bind(cart_id)
            .bind(owner_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        Cart::try_from(row)
    }

    async fn replace_lines(
        &self,
        cart_id: CartId,
        line_items: Vec<LineItem>,
        total_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Cart, RepositoryError> {
        let encoded = serde_json::to_value(&line_items)
            .map_err(|e| RepositoryError::DataCorruption(format!("encode line items: {e}")))?;

        let sql = format!(
            "UPDATE carts SET line_items = $2, total_amount = $3, last_activity_at = $4, updated_at = $4
             WHERE id = $1 AND NOT converted
             RETURNING {CART_COLUMNS}"
        );

        let row = sqlx::query_as::<_, CartRow>(&sql)
            .bind(cart_id)
            .bind(encoded)
            .bind(total_amount)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        Cart::try_from(row)
    }

    async fn retire_merged(
        &self,
        cart_id: CartId,
        merged_into: CartId,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE carts SET merged_into = $2, updated_at = NOW()
             WHERE id = $1 AND merged_into IS NULL",
        )
        .bind(cart_id)
        .bind(merged_into)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }
}
