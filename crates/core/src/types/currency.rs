//! ISO 4217 currency codes.

use serde::{Deserialize, Serialize};

/// Error returned when a currency code is not recognized.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unsupported currency code: {0}")]
pub struct CurrencyParseError(pub String);

/// ISO 4217 currency codes supported by the store.
///
/// A cart's currency is set on its first non-empty sync and is immutable
/// afterwards; the store rejects syncs that try to change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    USD,
    EUR,
    GBP,
    CAD,
    AUD,
}

impl CurrencyCode {
    /// The three-letter ISO code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::USD => "USD",
            Self::EUR => "EUR",
            Self::GBP => "GBP",
            Self::CAD => "CAD",
            Self::AUD => "AUD",
        }
    }
}

impl std::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CurrencyCode {
    type Err = CurrencyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USD" => Ok(Self::USD),
            "EUR" => Ok(Self::EUR),
            "GBP" => Ok(Self::GBP),
            "CAD" => Ok(Self::CAD),
            "AUD" => Ok(Self::AUD),
            other => Err(CurrencyParseError(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        for code in [
            CurrencyCode::USD,
            CurrencyCode::EUR,
            CurrencyCode::GBP,
            CurrencyCode::CAD,
            CurrencyCode::AUD,
        ] {
            let parsed: CurrencyCode = code.as_str().parse().expect("valid code");
            assert_eq!(parsed, code);
        }
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!("JPY".parse::<CurrencyCode>().is_err());
        assert!("usd".parse::<CurrencyCode>().is_err());
    }
}
