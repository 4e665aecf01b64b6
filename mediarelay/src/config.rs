//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `MEDIARELAY_CONFIG`
//! environment variable. A missing file is not an error; every field has a default.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `MEDIARELAY_` override YAML values
//! 3. **Cloudinary variables** - `CLOUDINARY_CLOUD_NAME` (or `NEXT_PUBLIC_CLOUDINARY_CLOUD_NAME`),
//!    `CLOUDINARY_API_KEY` and `CLOUDINARY_API_SECRET` fill the `asset_host` credentials
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `MEDIARELAY_LIMITS__MAX_FILE_SIZE=5242880` sets the `limits.max_file_size` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use mediarelay::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Relay will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port`, `environment`
//! - **Asset host**: `asset_host.cloud_name`, `asset_host.api_key`, `asset_host.api_secret`,
//!   `asset_host.api_base_url`, `asset_host.timeout`
//! - **Categories**: `categories.<name>.folder`, `.accept`, `.preview`, plus `default_category`
//! - **CORS**: `cors.allowed_origins`, `cors.allow_credentials`, `cors.max_age`
//! - **Limits**: `limits.max_file_size`
//! - **Telemetry**: `enable_otel_export`
//!
//! ```yaml
//! environment: development
//! asset_host:
//!   cloud_name: demo
//!   timeout: 60s
//! categories:
//!   banners:
//!     folder: banners
//!     accept: { prefix: "image/" }
//! cors:
//!   allowed_origins: ["https://admin.example.com"]
//! ```
//!
//! Missing asset-host credentials do not stop the relay from starting. They are reported at
//! start-up and on every upload request (`400` listing the missing settings), and make
//! `--validate` fail.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, time::Duration};
use url::Url;

use crate::errors::Error;
use crate::types::FileFilter;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "MEDIARELAY_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    /// Also fails when asset host credentials are missing.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Deployment environment. Outside production, upload failures carry credential presence flags.
    pub environment: Environment,
    /// Asset host account and API settings
    pub asset_host: AssetHostConfig,
    /// Upload categories by name, addressed as `/upload/{name}`
    pub categories: BTreeMap<String, CategoryConfig>,
    /// Category served by `POST /upload`
    pub default_category: String,
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
    /// Request size limits
    pub limits: LimitsConfig,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

/// Asset host (Cloudinary) settings.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssetHostConfig {
    /// Account identifier, part of every API path
    #[serde(deserialize_with = "parse_credential")]
    pub cloud_name: Option<String>,
    /// Numeric in practice, so env providers hand it over as a number
    #[serde(deserialize_with = "parse_credential")]
    pub api_key: Option<String>,
    #[serde(deserialize_with = "parse_credential")]
    pub api_secret: Option<String>,
    /// Base URL of the upload API
    pub api_base_url: Url,
    /// Upper bound on a single upload call to the host
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// Complete set of asset host credentials.
#[derive(Clone)]
pub struct HostCredentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

/// Which asset host settings are present, without their values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CredentialPresence {
    pub cloud_name: bool,
    pub api_key: bool,
    pub api_secret: bool,
}

impl AssetHostConfig {
    pub fn presence(&self) -> CredentialPresence {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        CredentialPresence {
            cloud_name: present(&self.cloud_name),
            api_key: present(&self.api_key),
            api_secret: present(&self.api_secret),
        }
    }

    /// Names of the settings that are absent or blank, in a fixed order.
    pub fn missing(&self) -> Vec<&'static str> {
        let presence = self.presence();
        [
            ("cloud_name", presence.cloud_name),
            ("api_key", presence.api_key),
            ("api_secret", presence.api_secret),
        ]
        .into_iter()
        .filter_map(|(name, present)| (!present).then_some(name))
        .collect()
    }

    /// Resolve the credentials, or list every missing setting.
    pub fn credentials(&self) -> Result<HostCredentials, Error> {
        match (&self.cloud_name, &self.api_key, &self.api_secret) {
            (Some(cloud_name), Some(api_key), Some(api_secret)) if self.missing().is_empty() => Ok(HostCredentials {
                cloud_name: cloud_name.trim().to_string(),
                api_key: api_key.trim().to_string(),
                api_secret: api_secret.trim().to_string(),
            }),
            _ => Err(Error::MissingConfiguration { missing: self.missing() }),
        }
    }
}

fn mask(value: &Option<String>) -> Option<&'static str> {
    value.as_ref().map(|_| "****")
}

impl fmt::Debug for AssetHostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetHostConfig")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &mask(&self.api_key))
            .field("api_secret", &mask(&self.api_secret))
            .field("api_base_url", &self.api_base_url.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl fmt::Debug for HostCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCredentials")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &"****")
            .field("api_secret", &"****")
            .finish()
    }
}

/// One upload category: where its assets go and what it accepts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryConfig {
    /// Folder (namespace) at the asset host
    pub folder: String,
    /// MIME types accepted for this category
    #[serde(default)]
    pub accept: FileFilter,
    /// Generate a first-page preview URL for paginated documents
    #[serde(default)]
    pub preview: bool,
}

/// CORS (Cross-Origin Resource Sharing) configuration.
///
/// The relay echoes the requesting origin rather than sending `*`, so a wildcard entry stays
/// compatible with `allow_credentials`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Origins whose requests get CORS headers
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies, authorization headers) in CORS requests
    pub allow_credentials: bool,
    /// Methods advertised in `Access-Control-Allow-Methods`
    pub allowed_methods: Vec<String>,
    /// Headers advertised in `Access-Control-Allow-Headers`
    pub allowed_headers: Vec<String>,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

/// An allowed CORS origin.
///
/// Can be either a wildcard (`*`) to echo any origin, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Echo any origin (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://admin.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

impl CorsOrigin {
    /// Whether a request origin (as sent in `Origin`, or the origin part of `Referer`) matches.
    pub fn matches(&self, origin: &str) -> bool {
        match self {
            CorsOrigin::Wildcard => true,
            CorsOrigin::Url(url) => Url::parse(origin).is_ok_and(|candidate| candidate.origin() == url.origin()),
        }
    }
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

/// Accept a credential written as text or, after env parsing, as a number.
fn parse_credential<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Credential {
        Text(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
    }

    let value: Option<Credential> = Deserialize::deserialize(deserializer)?;
    Ok(value.map(|credential| match credential {
        Credential::Text(s) => s,
        Credential::Unsigned(n) => n.to_string(),
        Credential::Signed(n) => n.to_string(),
        Credential::Float(n) => n.to_string(),
    }))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Largest accepted file part in bytes
    pub max_file_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        let categories = [
            (
                "products",
                CategoryConfig {
                    folder: "products".to_string(),
                    accept: FileFilter::images_or_pdf(),
                    preview: true,
                },
            ),
            (
                "stock_attachments",
                CategoryConfig {
                    folder: "stock_attachments".to_string(),
                    accept: FileFilter::Any,
                    preview: false,
                },
            ),
            (
                "banners",
                CategoryConfig {
                    folder: "banners".to_string(),
                    accept: FileFilter::images(),
                    preview: false,
                },
            ),
        ]
        .into_iter()
        .map(|(name, category)| (name.to_string(), category))
        .collect();

        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            environment: Environment::default(),
            asset_host: AssetHostConfig::default(),
            categories,
            default_category: "products".to_string(),
            cors: CorsConfig::default(),
            limits: LimitsConfig::default(),
            enable_otel_export: false,
        }
    }
}

impl Default for AssetHostConfig {
    fn default() -> Self {
        Self {
            cloud_name: None,
            api_key: None,
            api_secret: None,
            api_base_url: Url::parse("https://api.cloudinary.com").expect("static URL is valid"),
            timeout: Duration::from_secs(60),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            allow_credentials: true,
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS"].map(String::from).to_vec(),
            allowed_headers: ["Content-Type", "Authorization"].map(String::from).to_vec(),
            max_age: None,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size: 20 * 1024 * 1024,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.categories.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: at least one upload category must be configured".to_string(),
            });
        }

        if !self.categories.contains_key(&self.default_category) {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: default_category '{}' is not one of the configured categories ({})",
                    self.default_category,
                    self.categories.keys().cloned().collect::<Vec<_>>().join(", ")
                ),
            });
        }

        for (name, category) in &self.categories {
            let folder = category.folder.trim();
            if folder.is_empty() || folder.starts_with('/') || folder.ends_with('/') {
                return Err(Error::Internal {
                    operation: format!(
                        "Config validation: category '{name}' has invalid folder '{}'. Use a non-empty path without leading or trailing '/'.",
                        category.folder
                    ),
                });
            }
        }

        if self.limits.max_file_size == 0 {
            return Err(Error::Internal {
                operation: "Config validation: limits.max_file_size must be greater than 0".to_string(),
            });
        }

        if !matches!(self.asset_host.api_base_url.scheme(), "http" | "https") {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: asset_host.api_base_url must be an http(s) URL, got '{}'",
                    self.asset_host.api_base_url
                ),
            });
        }

        if self.asset_host.timeout.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: asset_host.timeout must be greater than 0".to_string(),
            });
        }

        if self.cors.allowed_origins.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: CORS allowed_origins cannot be empty. Add at least one allowed origin.".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("MEDIARELAY_").ignore(&["CONFIG"]).split("__"))
            // Conventional Cloudinary variables
            .merge(
                Env::raw()
                    .only(&["NEXT_PUBLIC_CLOUDINARY_CLOUD_NAME"])
                    .map(|_| "asset_host.cloud_name".into()),
            )
            .merge(Env::raw().only(&["CLOUDINARY_CLOUD_NAME"]).map(|_| "asset_host.cloud_name".into()))
            .merge(Env::raw().only(&["CLOUDINARY_API_KEY"]).map(|_| "asset_host.api_key".into()))
            .merge(Env::raw().only(&["CLOUDINARY_API_SECRET"]).map(|_| "asset_host.api_secret".into()))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Look up a category by the name used in the request path.
    pub fn category(&self, name: &str) -> Option<&CategoryConfig> {
        self.categories.get(name)
    }
}
