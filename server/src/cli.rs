//! Command-line interface definitions for the proxy.
//!
//! Every option can also be supplied through the environment, which is how the
//! proxy is usually configured when deployed as a container.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;

/// Top-level command-line interface definition.
#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Serve objects from the configured bucket.
    Serve(Box<ServeArgs>),
}

/// Output format of the log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
    Pretty,
}

/// Which authentication strategy guards the bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum AuthType {
    #[default]
    None,
    Basic,
    Oidc,
}

/// Where the storage backend obtains its bearer token from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum CredentialSource {
    /// The GCE/Cloud Run metadata server.
    #[default]
    Metadata,
    /// No credentials, for public buckets and emulators.
    Anonymous,
}

/// Arguments for the serve command.
///
/// Secrets are held as [`SecretString`], so this type deliberately has no `Debug`.
#[derive(Parser)]
pub struct ServeArgs {
    /// Address to bind to.
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0")]
    pub listen: String,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Name of the bucket to serve.
    #[arg(long, env = "GOOGLE_CLOUD_STORAGE_BUCKET")]
    pub bucket: String,

    /// Object name appended to paths ending in `/`. Empty disables it.
    #[arg(long, env = "MAIN_PAGE_SUFFIX", default_value = "index.html")]
    pub main_page_suffix: String,

    /// Object served when the requested one does not exist.
    #[arg(long, env = "NOT_FOUND_PAGE")]
    pub not_found_page: Option<String>,

    /// Externally visible URL of the proxy, without a trailing slash.
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    #[arg(long, env = "AUTH_TYPE", value_enum, default_value_t)]
    pub auth_type: AuthType,

    /// Issuer URL of the OpenID Connect provider.
    #[arg(long, env = "OIDC_PROVIDER", default_value = "https://accounts.google.com")]
    pub oidc_provider: String,

    /// Overrides the discovered authorization endpoint; only used together with `--oidc-token-url`.
    #[arg(long, env = "OIDC_AUTHORIZE_URL")]
    pub oidc_authorize_url: Option<String>,

    /// Overrides the discovered token endpoint; only used together with `--oidc-authorize-url`.
    #[arg(long, env = "OIDC_TOKEN_URL")]
    pub oidc_token_url: Option<String>,

    #[arg(long, env = "OIDC_CLIENT_ID")]
    pub oidc_client_id: Option<String>,

    #[arg(long, env = "OIDC_CLIENT_SECRET", hide_env_values = true)]
    pub oidc_client_secret: Option<SecretString>,

    #[arg(
        long,
        env = "OIDC_SCOPES",
        value_delimiter = ',',
        default_value = "openid"
    )]
    pub oidc_scopes: Vec<String>,

    /// Restricts Google sign-in to one Workspace domain.
    #[arg(long, env = "OIDC_GOOGLE_HOSTED_DOMAIN")]
    pub oidc_google_hosted_domain: Option<String>,

    /// Secret used to sign session cookies.
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<SecretString>,

    /// Lifetime of the access session in seconds.
    #[arg(long, env = "JWT_EXPIRATION", default_value_t = 3600)]
    pub jwt_expiration: u64,

    #[arg(long, env = "BASIC_AUTH_USER")]
    pub basic_auth_user: Option<String>,

    #[arg(long, env = "BASIC_AUTH_PASSWORD", hide_env_values = true)]
    pub basic_auth_password: Option<SecretString>,

    /// PEM certificate chain; enables TLS together with `--tls-key-path`.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<PathBuf>,

    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<PathBuf>,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t)]
    pub log_format: LogFormat,

    /// Host of a storage emulator to use instead of Google Cloud Storage.
    #[arg(long, env = "STORAGE_EMULATOR_HOST")]
    pub storage_emulator_host: Option<String>,

    #[arg(long, env = "GCS_CREDENTIALS", value_enum, default_value_t)]
    pub gcs_credentials: CredentialSource,

    /// Static bearer token for the storage API. Takes precedence over `--gcs-credentials`.
    #[arg(long, env = "GOOGLE_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    pub google_oauth_access_token: Option<SecretString>,

    /// How long in-flight requests may take to finish after a shutdown signal.
    #[arg(long, env = "SHUTDOWN_GRACE_SECONDS", default_value_t = 10)]
    pub shutdown_grace_seconds: u64,
}
