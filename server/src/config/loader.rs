//! Turns the flat command-line arguments into a validated [`ProxyConfig`].

use alloc::sync::Arc;
use core::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use eyre::{WrapErr as _, bail, eyre};
use secrecy::{ExposeSecret as _, SecretString};
use url::Url;

use crate::{
    cli::{AuthType, CredentialSource, ServeArgs},
    config::{
        AuthMode, BasicAuthConfig, DEFAULT_STORAGE_ENDPOINT, OidcConfig, ProxyConfig,
        StorageConfig, StorageCredentials, TlsConfig,
    },
};

/// Environment variables are frequently set to empty strings instead of being unset.
fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).cloned()
}

fn non_empty_secret(value: Option<&SecretString>) -> Option<Arc<SecretString>> {
    value
        .filter(|v| !v.expose_secret().is_empty())
        .map(|v| Arc::new(v.clone()))
}

fn listen_addr(listen: &str, port: u16) -> eyre::Result<SocketAddr> {
    let ip = match listen.trim() {
        "" => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        other => other
            .parse()
            .wrap_err(format!("Invalid listen address: {other}"))?,
    };
    Ok(SocketAddr::from((ip, port)))
}

fn base_url(args: &ServeArgs) -> eyre::Result<String> {
    let raw = non_empty(args.base_url.as_ref())
        .ok_or_else(|| eyre!("BASE_URL is required when AUTH_TYPE is oidc"))?;
    let parsed = Url::parse(&raw).wrap_err(format!("Invalid BASE_URL: {raw}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("BASE_URL must be an http(s) URL: {raw}");
    }
    Ok(raw.trim_end_matches('/').to_owned())
}

fn oidc_config(args: &ServeArgs) -> eyre::Result<OidcConfig> {
    let client_id = non_empty(args.oidc_client_id.as_ref())
        .ok_or_else(|| eyre!("OIDC_CLIENT_ID is required when AUTH_TYPE is oidc"))?;
    let client_secret = non_empty_secret(args.oidc_client_secret.as_ref())
        .ok_or_else(|| eyre!("OIDC_CLIENT_SECRET is required when AUTH_TYPE is oidc"))?;
    let jwt_secret = non_empty_secret(args.jwt_secret.as_ref())
        .ok_or_else(|| eyre!("JWT_SECRET is required when AUTH_TYPE is oidc"))?;
    let base_url = base_url(args)?;

    if args.jwt_expiration == 0 {
        bail!("JWT_EXPIRATION must be positive");
    }
    // Token timestamps are signed seconds.
    if i64::try_from(args.jwt_expiration).is_err() {
        bail!("JWT_EXPIRATION is too large: {}", args.jwt_expiration);
    }

    Url::parse(&args.oidc_provider)
        .wrap_err(format!("Invalid OIDC_PROVIDER: {}", args.oidc_provider))?;

    let authorize_url = non_empty(args.oidc_authorize_url.as_ref());
    let token_url = non_empty(args.oidc_token_url.as_ref());
    for url in authorize_url.iter().chain(token_url.iter()) {
        Url::parse(url).wrap_err(format!("Invalid OIDC endpoint override: {url}"))?;
    }
    if authorize_url.is_some() != token_url.is_some() {
        tracing::warn!(
            "Only one of OIDC_AUTHORIZE_URL and OIDC_TOKEN_URL is set; both are ignored and the discovered endpoints are used"
        );
    }

    let scopes = args
        .oidc_scopes
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();

    Ok(OidcConfig {
        // Discovery compares the issuer string exactly, so it is kept verbatim.
        provider: args.oidc_provider.clone(),
        authorize_url,
        token_url,
        client_id,
        client_secret,
        scopes,
        google_hosted_domain: non_empty(args.oidc_google_hosted_domain.as_ref()),
        base_url,
        jwt_secret,
        jwt_expiration: Duration::from_secs(args.jwt_expiration),
    })
}

fn basic_config(args: &ServeArgs) -> eyre::Result<BasicAuthConfig> {
    let user = non_empty(args.basic_auth_user.as_ref())
        .ok_or_else(|| eyre!("BASIC_AUTH_USER is required when AUTH_TYPE is basic"))?;
    let password = non_empty_secret(args.basic_auth_password.as_ref())
        .ok_or_else(|| eyre!("BASIC_AUTH_PASSWORD is required when AUTH_TYPE is basic"))?;
    Ok(BasicAuthConfig { user, password })
}

fn tls_config(args: &ServeArgs) -> eyre::Result<Option<TlsConfig>> {
    match (args.tls_cert_path.clone(), args.tls_key_path.clone()) {
        (Some(cert_path), Some(key_path)) => Ok(Some(TlsConfig {
            cert_path,
            key_path,
        })),
        (None, None) => Ok(None),
        _ => bail!("TLS_CERT_PATH and TLS_KEY_PATH must be set together"),
    }
}

fn storage_config(args: &ServeArgs) -> StorageConfig {
    let emulator = non_empty(args.storage_emulator_host.as_ref());
    let endpoint = match emulator {
        Some(ref host) if host.contains("://") => host.clone(),
        Some(ref host) => format!("http://{host}"),
        None => DEFAULT_STORAGE_ENDPOINT.to_owned(),
    };

    let credentials = match non_empty_secret(args.google_oauth_access_token.as_ref()) {
        Some(token) => StorageCredentials::Static(token),
        // Emulators do not check credentials.
        None if emulator.is_some() => StorageCredentials::Anonymous,
        None => match args.gcs_credentials {
            CredentialSource::Metadata => StorageCredentials::MetadataServer,
            CredentialSource::Anonymous => StorageCredentials::Anonymous,
        },
    };

    StorageConfig {
        endpoint: endpoint.trim_end_matches('/').to_owned(),
        credentials,
    }
}

/// Validates `args` and builds the process configuration.
///
/// # Errors
///
/// Returns an error if the bucket is missing, the listen address does not parse,
/// only one TLS file is given, or the selected auth mode lacks required settings.
pub fn from_args(args: &ServeArgs) -> eyre::Result<ProxyConfig> {
    let bucket = non_empty(Some(&args.bucket))
        .ok_or_else(|| eyre!("GOOGLE_CLOUD_STORAGE_BUCKET is required"))?;

    let auth = match args.auth_type {
        AuthType::None => AuthMode::None,
        AuthType::Basic => {
            AuthMode::Basic(basic_config(args).wrap_err("Invalid Basic Auth config")?)
        }
        AuthType::Oidc => {
            AuthMode::Oidc(Box::new(oidc_config(args).wrap_err("Invalid OIDC config")?))
        }
    };

    Ok(ProxyConfig {
        listen: listen_addr(&args.listen, args.port)?,
        bucket,
        main_page_suffix: non_empty(Some(&args.main_page_suffix)),
        not_found_page: non_empty(args.not_found_page.as_ref()),
        auth,
        tls: tls_config(args)?,
        storage: storage_config(args),
        shutdown_grace: Duration::from_secs(args.shutdown_grace_seconds),
    })
}

#[cfg(test)]
mod tests {
    use clap::Parser as _;

    use super::*;
    use crate::cli::{Cli, Command};

    fn parse(extra: &[&str]) -> ServeArgs {
        let mut argv = vec!["gcsproxy", "serve", "--bucket", "assets"];
        argv.extend_from_slice(extra);
        let Command::Serve(args) = Cli::try_parse_from(argv).unwrap().command;
        *args
    }

    #[test]
    fn none_mode_needs_only_a_bucket() {
        let cfg = from_args(&parse(&["--listen", "127.0.0.1", "--port", "9000"])).unwrap();
        assert!(matches!(cfg.auth, AuthMode::None));
        assert_eq!(cfg.listen, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(cfg.main_page_suffix.as_deref(), Some("index.html"));
        assert_eq!(cfg.not_found_page, None);
        assert_eq!(cfg.storage.endpoint, DEFAULT_STORAGE_ENDPOINT);
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(10));
    }

    #[test]
    fn empty_listen_binds_all_interfaces() {
        let cfg = from_args(&parse(&["--listen", ""])).unwrap();
        assert_eq!(cfg.listen, "0.0.0.0:8080".parse().unwrap());
    }

    #[test]
    fn empty_suffix_disables_main_page() {
        let cfg = from_args(&parse(&["--main-page-suffix", ""])).unwrap();
        assert_eq!(cfg.main_page_suffix, None);
    }

    #[test]
    fn basic_mode_requires_credentials() {
        let err = from_args(&parse(&["--auth-type", "basic", "--basic-auth-user", "u"]))
            .unwrap_err();
        assert!(format!("{err:?}").contains("BASIC_AUTH_PASSWORD"), "{err:?}");

        let cfg = from_args(&parse(&[
            "--auth-type",
            "basic",
            "--basic-auth-user",
            "u",
            "--basic-auth-password",
            "p",
        ]))
        .unwrap();
        match cfg.auth {
            AuthMode::Basic(basic) => {
                assert_eq!(basic.user, "u");
                assert_eq!(basic.password.expose_secret(), "p");
            }
            other => panic!("expected basic mode, got {}", other.name()),
        }
    }

    #[test]
    fn oidc_mode_requires_all_settings() {
        let complete = [
            "--auth-type",
            "oidc",
            "--oidc-client-id",
            "client",
            "--oidc-client-secret",
            "secret",
            "--jwt-secret",
            "jwt",
            "--base-url",
            "https://files.example.com/",
        ];
        let cfg = from_args(&parse(&complete)).unwrap();
        let AuthMode::Oidc(oidc) = cfg.auth else {
            panic!("expected oidc mode");
        };
        assert_eq!(oidc.base_url, "https://files.example.com");
        assert_eq!(oidc.jwt_expiration, Duration::from_secs(3600));
        assert_eq!(oidc.scopes, ["openid"]);

        for (flag, name) in [
            ("--oidc-client-id", "OIDC_CLIENT_ID"),
            ("--oidc-client-secret", "OIDC_CLIENT_SECRET"),
            ("--jwt-secret", "JWT_SECRET"),
            ("--base-url", "BASE_URL"),
        ] {
            let position = complete.iter().position(|a| *a == flag).unwrap();
            let mut partial = complete.to_vec();
            partial.drain(position..position + 2);
            let err = from_args(&parse(&partial)).unwrap_err();
            assert!(format!("{err:?}").contains(name), "{flag}: {err:?}");
        }
    }

    #[test]
    fn hosted_domain_only_applies_to_google() {
        let base = [
            "--auth-type",
            "oidc",
            "--oidc-client-id",
            "client",
            "--oidc-client-secret",
            "secret",
            "--jwt-secret",
            "jwt",
            "--base-url",
            "https://files.example.com",
            "--oidc-google-hosted-domain",
            "example.com",
        ];
        let AuthMode::Oidc(google) = from_args(&parse(&base)).unwrap().auth else {
            panic!("expected oidc mode");
        };
        assert_eq!(google.hosted_domain(), Some("example.com"));

        let mut other = base.to_vec();
        other.extend(["--oidc-provider", "https://idp.example.com"]);
        let AuthMode::Oidc(other) = from_args(&parse(&other)).unwrap().auth else {
            panic!("expected oidc mode");
        };
        assert_eq!(other.hosted_domain(), None);
    }

    #[test]
    fn provider_is_kept_verbatim() {
        let args = [
            "--auth-type",
            "oidc",
            "--oidc-client-id",
            "client",
            "--oidc-client-secret",
            "secret",
            "--jwt-secret",
            "jwt",
            "--base-url",
            "https://files.example.com",
            "--oidc-google-hosted-domain",
            "example.com",
            "--oidc-provider",
            "https://accounts.google.com/",
        ];
        let AuthMode::Oidc(oidc) = from_args(&parse(&args)).unwrap().auth else {
            panic!("expected oidc mode");
        };
        assert_eq!(oidc.provider, "https://accounts.google.com/");
        assert_eq!(
            oidc.hosted_domain(),
            Some("example.com"),
            "a trailing slash still names Google"
        );
    }

    #[test]
    fn tls_needs_both_files() {
        let err = from_args(&parse(&["--tls-cert-path", "cert.pem"])).unwrap_err();
        assert!(format!("{err:?}").contains("TLS_KEY_PATH"));

        let cfg = from_args(&parse(&[
            "--tls-cert-path",
            "cert.pem",
            "--tls-key-path",
            "key.pem",
        ]))
        .unwrap();
        assert!(cfg.tls.is_some());
    }

    #[test]
    fn emulator_host_switches_endpoint_and_drops_credentials() {
        let cfg = from_args(&parse(&["--storage-emulator-host", "localhost:4443"])).unwrap();
        assert_eq!(cfg.storage.endpoint, "http://localhost:4443");
        assert!(matches!(
            cfg.storage.credentials,
            StorageCredentials::Anonymous
        ));

        let cfg = from_args(&parse(&["--google-oauth-access-token", "ya29.token"])).unwrap();
        assert!(matches!(
            cfg.storage.credentials,
            StorageCredentials::Static(_)
        ));
    }
}
