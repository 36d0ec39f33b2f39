//! Access session claims carried by the access cookie after a completed login.

use alloc::{string::String, vec::Vec};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{TokenError, constant_time_eq, sign, verify};

/// The intended recipients of a token.
///
/// Serialized as a bare string when it holds exactly one entry and as a list
/// otherwise. Both forms, as well as an absent or `null` value, are accepted when
/// decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Audience(pub Vec<String>);

impl Audience {
    #[must_use]
    pub fn single(value: impl Into<String>) -> Self {
        Self(vec![value.into()])
    }

    /// Whether `expected` is one of the entries. Each entry is compared in constant time.
    #[must_use]
    pub fn contains(&self, expected: &str) -> bool {
        self.0
            .iter()
            .fold(false, |found, entry| {
                found | constant_time_eq(entry.as_bytes(), expected.as_bytes())
            })
    }
}

impl Serialize for Audience {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.as_slice() {
            [single] => serializer.serialize_str(single),
            all => all.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Audience {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
            None => Self::default(),
            Some(OneOrMany::One(value)) => Self(vec![value]),
            Some(OneOrMany::Many(values)) => Self(values),
        })
    }
}

/// Claims of an access session token.
///
/// Issuer and audience are both the configured base URL; the subject is the
/// identity provider's subject for the signed-in user. Times are seconds since
/// the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[expect(
    clippy::module_name_repetitions,
    reason = "Re-exported at the crate root, where the prefix carries the meaning"
)]
pub struct AccessClaims {
    pub iss: String,
    pub exp: i64,
    #[serde(default)]
    pub aud: Audience,
    pub sub: String,
    pub iat: i64,
}

impl AccessClaims {
    /// Builds claims for `subject` valid from `now` for `ttl_secs` seconds.
    #[must_use]
    pub fn issue(subject: impl Into<String>, base_url: &str, now: i64, ttl_secs: i64) -> Self {
        Self {
            iss: base_url.to_owned(),
            exp: now.saturating_add(ttl_secs),
            aud: Audience::single(base_url),
            sub: subject.into(),
            iat: now,
        }
    }

    /// Checks expiry, audience membership and issuer, in that order.
    ///
    /// A token is still valid strictly before `exp`.
    pub fn validate(&self, issuer: &str, audience: &str, now: i64) -> Result<(), TokenError> {
        if now >= self.exp {
            return Err(TokenError::Expired);
        }
        if !self.aud.contains(audience) {
            return Err(TokenError::AudienceMismatch);
        }
        if !constant_time_eq(self.iss.as_bytes(), issuer.as_bytes()) {
            return Err(TokenError::IssuerMismatch);
        }
        Ok(())
    }

    /// Signs these claims into a compact token.
    pub fn sign(&self, secret: &[u8]) -> Result<String, TokenError> {
        sign(self, secret)
    }
}

/// Verifies an access token's signature and then its expiry, audience and issuer
/// against `base_url`.
pub fn verify_access_token(
    token: &str,
    secret: &[u8],
    base_url: &str,
    now: i64,
) -> Result<AccessClaims, TokenError> {
    let claims: AccessClaims = verify(token, secret)?;
    claims.validate(base_url, base_url, now)?;
    Ok(claims)
}
