//! Application configuration management.
//!
//! Configuration is loaded from an optional YAML file with environment variable overrides. The
//! configuration file path defaults to `config.yaml` but can be specified via `-f` flag or
//! `FILEDROP_CONFIG` environment variable. A missing file is not an error: every field has a
//! default that reproduces the stock behavior (uploads land in `./uploads`, any origin may call).
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `FILEDROP_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `FILEDROP_CORS__ALLOW_CREDENTIALS=false` sets the `cors.allow_credentials` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use filedrop::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Uploads are written to {}", config.upload_dir.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! FILEDROP_PORT=9000
//! FILEDROP_UPLOAD_DIR=/var/lib/filedrop
//! FILEDROP_ON_COLLISION=rename
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "FILEDROP_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
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
    /// Directory attachments are written into. Relative paths resolve against the working directory.
    pub upload_dir: PathBuf,
    /// What to do when an attachment's destination already exists
    pub on_collision: CollisionPolicy,
    /// Directory for attachments too large to hold in memory while the form is read.
    /// Defaults to the system temp directory.
    pub spool_dir: Option<PathBuf>,
    /// Cross-origin policy for browser clients
    pub cors: CorsConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// Policy applied when an attachment's destination path already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Truncate and rewrite the existing file; the last writer wins
    #[default]
    Overwrite,
    /// Fail the request with 409 Conflict without writing anything
    Reject,
    /// Write to `name (1).ext`, `name (2).ext`, ... instead
    Rename,
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

/// A single allowed CORS origin.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
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

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            upload_dir: PathBuf::from("uploads"),
            on_collision: CollisionPolicy::default(),
            spool_dir: None,
            cors: CorsConfig::default(),
            enable_metrics: false,
            enable_otel_export: false,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            allow_credentials: true,
            max_age: None,
        }
    }
}

impl CorsConfig {
    /// Whether any origin may call the service
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard))
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
        if self.upload_dir.as_os_str().is_empty() {
            return Err(Error::Internal {
                operation: "validate config: upload_dir must not be empty".to_string(),
            });
        }

        if self.cors.allowed_origins.is_empty() {
            return Err(Error::Internal {
                operation: "validate config: cors.allowed_origins must list at least one origin (use '*' for any)".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            // FILEDROP_CONFIG names the file itself and is not a config key
            .merge(Env::prefixed("FILEDROP_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_defaults_without_config_file() {
        Jail::expect_with(|_jail| {
            let config = Config::load(&args("missing.yaml"))?;

            assert_eq!(config.host, "0.0.0.0");
            assert_eq!(config.port, 8000);
            assert_eq!(config.upload_dir, PathBuf::from("uploads"));
            assert_eq!(config.on_collision, CollisionPolicy::Overwrite);
            assert_eq!(config.spool_dir, None);
            assert!(config.cors.allows_any_origin());
            assert!(config.cors.allow_credentials);
            assert!(!config.enable_metrics);

            Ok(())
        });
    }

    #[test]
    fn test_yaml_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
upload_dir: /srv/drop
on_collision: rename
spool_dir: /var/tmp/filedrop
cors:
  allowed_origins:
    - https://app.example.com
  allow_credentials: false
  max_age: 600
"#,
            )?;

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.upload_dir, PathBuf::from("/srv/drop"));
            assert_eq!(config.on_collision, CollisionPolicy::Rename);
            assert_eq!(config.spool_dir, Some(PathBuf::from("/var/tmp/filedrop")));
            assert!(!config.cors.allows_any_origin());
            assert!(matches!(
                &config.cors.allowed_origins[0],
                CorsOrigin::Url(url) if url.as_str() == "https://app.example.com/"
            ));
            assert!(!config.cors.allow_credentials);
            assert_eq!(config.cors.max_age, Some(600));

            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
port: 9000
upload_dir: from-yaml
"#,
            )?;

            jail.set_env("FILEDROP_HOST", "127.0.0.1");
            jail.set_env("FILEDROP_UPLOAD_DIR", "from-env");
            jail.set_env("FILEDROP_ON_COLLISION", "reject");
            jail.set_env("FILEDROP_CORS__ALLOW_CREDENTIALS", "false");

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.port, 9000);
            assert_eq!(config.upload_dir, PathBuf::from("from-env"));
            assert_eq!(config.on_collision, CollisionPolicy::Reject);
            assert!(!config.cors.allow_credentials);
            assert_eq!(config.bind_address(), "127.0.0.1:9000");

            Ok(())
        });
    }

    #[test]
    fn test_unknown_fields_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "max_file_size: 1024\n")?;
            assert!(Config::load(&args("test.yaml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_invalid_cors_origin_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
cors:
  allowed_origins:
    - not a url
"#,
            )?;
            assert!(Config::load(&args("test.yaml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_config_validation_empty_upload_dir() {
        let config = Config {
            upload_dir: PathBuf::new(),
            ..Default::default()
        };

        let result = config.validate();
        assert_eq!(
            result.unwrap_err().to_string(),
            "Failed to validate config: upload_dir must not be empty"
        );
    }

    #[test]
    fn test_config_validation_no_cors_origins() {
        let mut config = Config::default();
        config.cors.allowed_origins.clear();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("allowed_origins"));
    }

    #[test]
    fn test_config_validation_valid_config() {
        assert!(Config::default().validate().is_ok());
    }
}
