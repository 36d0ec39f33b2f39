//! Compact signed tokens (JWS compact serialization, HS256 only).
//!
//! A token is `base64url(header).base64url(claims).base64url(signature)` where the
//! signature is HMAC-SHA256 over the first two segments joined by a dot. The codec
//! is claim-agnostic: it checks structure, algorithm and signature, while expiry,
//! audience and issuer are checked by the claim types layered on top.

use alloc::string::String;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::Sha256;

/// The only signing algorithm accepted by [`verify`].
pub const ALGORITHM: &str = "HS256";

/// Reasons a token can be rejected or fail to be produced.
#[derive(Debug, thiserror::Error)]
#[expect(
    clippy::module_name_repetitions,
    reason = "Re-exported at the crate root, where the prefix carries the meaning"
)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("unsupported signing algorithm `{0}`")]
    UnsupportedAlgorithm(String),
    #[error("token signature does not match")]
    BadSignature,
    #[error("token has expired")]
    Expired,
    #[error("token audience does not include the expected audience")]
    AudienceMismatch,
    #[error("token issuer does not match")]
    IssuerMismatch,
    #[error("failed to encode token claims")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

impl Header {
    fn hs256() -> Self {
        Self {
            alg: ALGORITHM.to_owned(),
            typ: Some("JWT".to_owned()),
        }
    }
}

#[expect(
    clippy::missing_panics_doc,
    reason = "Expectation should never be false"
)]
fn keyed_mac(secret: &[u8]) -> Hmac<Sha256> {
    Hmac::<Sha256>::new_from_slice(secret).expect("HMAC can take a key of any size")
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value).map_err(TokenError::Encode)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T, TokenError> {
    let raw = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&raw).map_err(|_| TokenError::Malformed)
}

/// Signs `claims` with `secret` and returns the compact token.
///
/// The output only depends on the claims and the secret, so signing the same
/// claims twice yields the same token.
pub fn sign<C: Serialize>(claims: &C, secret: &[u8]) -> Result<String, TokenError> {
    let header = encode_segment(&Header::hs256())?;
    let payload = encode_segment(claims)?;
    let signing_input = format!("{header}.{payload}");

    let mut mac = keyed_mac(secret);
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{signing_input}.{signature}"))
}

/// Verifies `token` against `secret` and decodes its claims.
///
/// Rejects tokens that do not have exactly three segments, that declare any
/// algorithm other than [`ALGORITHM`], or whose signature does not match. The
/// signature comparison is constant-time.
pub fn verify<C: DeserializeOwned>(token: &str, secret: &[u8]) -> Result<C, TokenError> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(TokenError::Malformed);
    };

    let Header { alg, .. } = decode_segment(header)?;
    if alg != ALGORITHM {
        return Err(TokenError::UnsupportedAlgorithm(alg));
    }

    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| TokenError::Malformed)?;
    let mut mac = keyed_mac(secret);
    mac.update(header.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| TokenError::BadSignature)?;

    decode_segment(payload)
}
