use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by the access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject: the local user's id
    pub sub: String,
    #[serde(default)]
    pub role: Option<String>,
    /// Expiry, unix seconds
    pub exp: i64,
}

/// An access credential: the raw token plus its decoded claims.
///
/// Replaced wholesale on every refresh, never mutated in place. A token
/// whose claims cannot be decoded is still stored (the server may accept
/// it even if we cannot read it), but claim-dependent readers return
/// `None`.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
    pub claims: Option<Claims>,
}

impl Credential {
    /// Build a credential from a raw token, decoding claims without
    /// verifying the signature (the client holds tokens, it never
    /// verifies them).
    pub fn from_token(token: impl Into<String>) -> Self {
        let token = token.into();
        let claims = match decode_claims(&token) {
            Ok(claims) => Some(claims),
            Err(err) => {
                tracing::warn!("failed to decode credential claims: {err}");
                None
            }
        };
        Self { token, claims }
    }

    pub fn subject(&self) -> Option<&str> {
        self.claims.as_ref().map(|c| c.sub.as_str())
    }

    pub fn role(&self) -> Option<&str> {
        self.claims.as_ref().and_then(|c| c.role.as_deref())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let exp = self.claims.as_ref()?.exp;
        Utc.timestamp_opt(exp, 0).single()
    }

    /// A credential with unreadable claims counts as expired: we cannot
    /// prove it valid, and the refresh path will sort it out.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expires_at) => expires_at <= now,
            None => true,
        }
    }
}

fn decode_claims(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let header = decode_header(token)?;
    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    let data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}
