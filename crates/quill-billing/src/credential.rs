//! Credential Codec
//!
//! Bearer tokens binding an identity to an expiry:
//! `v1.<hex(claims json)>.<hex(hmac-sha256)>`. Stateless; any process holding
//! the same secret can verify.

use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::account::Identity;
use crate::error::{BillingError, Result};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION: &str = "v1";

/// Issuance policy: tokens live at least this long
pub const MIN_TTL_DAYS: i64 = 30;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// A freshly issued token
#[derive(Clone, Debug, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// HMAC-signed credential issuer/verifier
#[derive(Clone)]
pub struct CredentialCodec {
    secret: Vec<u8>,
    ttl: Duration,
}

impl CredentialCodec {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(BillingError::Config("token secret must not be empty".into()));
        }
        if ttl < Duration::days(MIN_TTL_DAYS) {
            return Err(BillingError::Config(format!(
                "token lifetime must be at least {MIN_TTL_DAYS} days"
            )));
        }
        Ok(Self { secret, ttl })
    }

    /// Codec with a random per-process secret. Tokens do not survive a restart.
    pub fn random(ttl: Duration) -> Result<Self> {
        let mut secret = vec![0u8; 32];
        OsRng.fill_bytes(&mut secret);
        tracing::warn!("No token secret configured, using an ephemeral key");
        Self::new(secret, ttl)
    }

    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, identity: &Identity) -> Result<IssuedToken> {
        self.issue_at(identity, Utc::now())
    }

    pub fn issue_at(&self, identity: &Identity, now: DateTime<Utc>) -> Result<IssuedToken> {
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: identity.as_str().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let payload = hex::encode(
            serde_json::to_vec(&claims).map_err(|e| BillingError::Storage(e.to_string()))?,
        );
        let signature = hex::encode(self.mac(&payload)?.finalize().into_bytes());

        Ok(IssuedToken {
            token: format!("{TOKEN_VERSION}.{payload}.{signature}"),
            expires_at,
        })
    }

    /// Verify a token and return the identity it carries
    pub fn verify(&self, token: &str) -> Result<Identity> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Identity> {
        let mut parts = token.trim().split('.');
        let (Some(TOKEN_VERSION), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(BillingError::Unauthorized("malformed token".into()));
        };

        let signature =
            hex::decode(signature).map_err(|_| BillingError::Unauthorized("malformed token".into()))?;
        self.mac(payload)?
            .verify_slice(&signature)
            .map_err(|_| BillingError::Unauthorized("bad signature".into()))?;

        let claims: Claims = hex::decode(payload)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(|| BillingError::Unauthorized("malformed claims".into()))?;

        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| BillingError::Unauthorized("malformed claims".into()))?;
        if now >= expires_at {
            return Err(BillingError::CredentialExpired);
        }

        Ok(Identity::new(claims.sub))
    }

    fn mac(&self, payload: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| BillingError::Config(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }
}

impl std::fmt::Debug for CredentialCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCodec")
            .field("secret", &"[redacted]")
            .field("ttl", &self.ttl)
            .finish()
    }
}
