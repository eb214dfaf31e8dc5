//! Signed recovery tokens.
//!
//! A token is `base64url(claims_json) + "." + base64url(hmac_sha256(claims))`.
//! The signature binds a session key to an expiry instant; nothing about the
//! cart's contents is embedded, so a recovered cart always reflects current
//! state. Verification checks the signature before it looks at the expiry,
//! so a forged token can never learn whether its expiry would have passed.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use winback_core::SessionKey;

type HmacSha256 = Hmac<Sha256>;

/// Why a recovery token was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecoveryTokenError {
    /// Malformed token or signature mismatch.
    #[error("recovery token is invalid")]
    Invalid,

    /// Authentic token past its expiry.
    #[error("recovery token has expired")]
    Expired,
}

/// The authenticated content of a recovery token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryClaims {
    /// Session key of the cart the token points at.
    pub session_key: SessionKey,
    /// Expiry as a unix timestamp in seconds.
    pub expires_at: i64,
}

/// Issues and verifies HMAC-SHA256 recovery tokens.
#[derive(Clone)]
pub struct RecoveryTokenSigner {
    secret: SecretString,
}

impl RecoveryTokenSigner {
    #[must_use]
    pub const fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"))
    }

    /// Issue a token for `session_key` that expires at `expires_at`.
    #[must_use]
    pub fn issue(&self, session_key: &SessionKey, expires_at: DateTime<Utc>) -> String {
        let claims = RecoveryClaims {
            session_key: session_key.clone(),
            expires_at: expires_at.timestamp(),
        };
        let payload = serde_json::to_vec(&claims)
            .unwrap_or_else(|_| unreachable!("claims serialization is infallible"));

        let mut mac = self.mac();
        mac.update(&payload);
        let signature = mac.finalize().into_bytes();

        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    /// Verify a token and return its claims.
    ///
    /// # Errors
    ///
    /// [`RecoveryTokenError::Invalid`] for anything malformed or not signed
    /// by us; [`RecoveryTokenError::Expired`] for an authentic token whose
    /// expiry has passed at `now`.
    pub fn verify(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<RecoveryClaims, RecoveryTokenError> {
        let (payload_b64, signature_b64) =
            token.split_once('.').ok_or(RecoveryTokenError::Invalid)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| RecoveryTokenError::Invalid)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| RecoveryTokenError::Invalid)?;

        let mut mac = self.mac();
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| RecoveryTokenError::Invalid)?;

        let claims: RecoveryClaims =
            serde_json::from_slice(&payload).map_err(|_| RecoveryTokenError::Invalid)?;

        if now.timestamp() >= claims.expires_at {
            return Err(RecoveryTokenError::Expired);
        }

        Ok(claims)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn signer() -> RecoveryTokenSigner {
        RecoveryTokenSigner::new(SecretString::from("k9#mP2$vL8@qR5!wX3^zA7&bN4*cD6(e"))
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn roundtrip_returns_original_session_key() {
        let signer = signer();
        let key = SessionKey::from("sess-roundtrip");
        let token = signer.issue(&key, at(10_000));

        let claims = signer.verify(&token, at(5_000)).unwrap();
        assert_eq!(claims.session_key, key);
        assert_eq!(claims.expires_at, 10_000);
    }

    #[test]
    fn expired_token_is_rejected() {
        let signer = signer();
        let token = signer.issue(&SessionKey::from("sess-old"), at(10_000));

        let err = signer.verify(&token, at(10_000)).unwrap_err();
        assert_eq!(err, RecoveryTokenError::Expired);
    }

    #[test]
    fn tampered_payload_is_invalid_not_expired() {
        let signer = signer();
        let token = signer.issue(&SessionKey::from("sess-a"), at(1));

        // Swap in a different payload while keeping the signature
        let (_, signature) = token.split_once('.').unwrap();
        let forged_claims = RecoveryClaims {
            session_key: SessionKey::from("sess-b"),
            expires_at: i64::MAX,
        };
        let forged_payload =
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        let forged = format!("{forged_payload}.{signature}");

        assert_eq!(
            signer.verify(&forged, at(5_000)).unwrap_err(),
            RecoveryTokenError::Invalid
        );
    }

    #[test]
    fn token_from_other_secret_is_invalid() {
        let signer_a = signer();
        let signer_b =
            RecoveryTokenSigner::new(SecretString::from("f7!jQ4$xT9@wE2#rY6^uI8&oP3*aS5(d"));
        let token = signer_b.issue(&SessionKey::from("sess-x"), at(10_000));

        assert_eq!(
            signer_a.verify(&token, at(5_000)).unwrap_err(),
            RecoveryTokenError::Invalid
        );
    }

    #[test]
    fn garbage_is_invalid() {
        let signer = signer();
        for token in ["", "no-dot-here", "a.b", "!!!.???"] {
            assert_eq!(
                signer.verify(token, at(0)).unwrap_err(),
                RecoveryTokenError::Invalid,
                "token {token:?} should be invalid"
            );
        }
    }
}
