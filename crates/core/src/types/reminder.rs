//! Reminder tier identifiers.

use serde::{Deserialize, Serialize};

/// Identifier for a reminder tier in the configured schedule.
///
/// Tiers are numbered from 1 in ascending inactivity-threshold order. The
/// pair `(ReminderType, CartId)` is unique in the event ledger for a cart's
/// entire lifetime - this is the idempotency key that prevents duplicate
/// sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReminderType(i16);

impl ReminderType {
    /// The first reminder tier.
    pub const FIRST: Self = Self(1);

    /// Create a tier identifier from its 1-based position in the schedule.
    #[must_use]
    pub const fn tier(n: i16) -> Self {
        Self(n)
    }

    /// Get the underlying tier number.
    #[must_use]
    pub const fn as_i16(&self) -> i16 {
        self.0
    }
}

impl std::fmt::Display for ReminderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tier-{}", self.0)
    }
}

impl From<i16> for ReminderType {
    fn from(n: i16) -> Self {
        Self(n)
    }
}

impl From<ReminderType> for i16 {
    fn from(rt: ReminderType) -> Self {
        rt.0
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for ReminderType {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <i16 as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <i16 as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for ReminderType {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let n = <i16 as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self(n))
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for ReminderType {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <i16 as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(ReminderType::tier(1) < ReminderType::tier(2));
        assert_eq!(ReminderType::FIRST, ReminderType::tier(1));
    }

    #[test]
    fn test_display() {
        assert_eq!(ReminderType::tier(2).to_string(), "tier-2");
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&ReminderType::tier(1)).expect("serialize");
        assert_eq!(json, "1");
    }
}
