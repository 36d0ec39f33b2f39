//! HTTP Basic credential check.

use axum::http::HeaderMap;
use axum_extra::headers::{Authorization, HeaderMapExt as _, authorization::Basic};
use gcsproxy_common::constant_time_eq;
use secrecy::{ExposeSecret as _, SecretString};

/// Challenge sent along with 401 responses.
pub(crate) const BASIC_CHALLENGE: &str = r#"Basic realm="GCS Proxy""#;

/// Whether `headers` carry Basic credentials matching `user` and `password`.
///
/// Both parts are always compared, each in constant time.
pub(crate) fn credentials_match(headers: &HeaderMap, user: &str, password: &SecretString) -> bool {
    let Some(Authorization(basic)) = headers.typed_get::<Authorization<Basic>>() else {
        return false;
    };
    let user_ok = constant_time_eq(basic.username().as_bytes(), user.as_bytes());
    let password_ok = constant_time_eq(
        basic.password().as_bytes(),
        password.expose_secret().as_bytes(),
    );
    user_ok & password_ok
}
