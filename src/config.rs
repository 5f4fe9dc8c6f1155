//! Configuration loading and types for blobfs.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  The storage section carries the connection
//! descriptor, which is resolved into [`Credentials`] before any request
//! is made.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{BlobError, Result};

/// Environment variable that overrides `storage.connection_string`.
pub const CONNECTION_STRING_ENV: &str = "AZURE_STORAGE_CONNECTION_STRING";

/// Well-known account name of the local storage emulator.
const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";

/// Well-known (public) account key of the local storage emulator.
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Blob service connection settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Blob service connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Connection descriptor (`AccountName=...;AccountKey=...`).
    #[serde(default)]
    pub connection_string: Option<String>,

    /// Container every operation is bound to.
    #[serde(default = "default_container")]
    pub container: String,

    /// Per-request deadline in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            container: default_container(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl StorageConfig {
    /// Per-request deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolve credentials, preferring [`CONNECTION_STRING_ENV`] over the
    /// configured value.
    pub fn credentials(&self) -> Result<Credentials> {
        self.credentials_with_override(std::env::var(CONNECTION_STRING_ENV).ok())
    }

    /// Resolve credentials with an explicit override in place of the
    /// environment lookup.
    pub fn credentials_with_override(&self, env_value: Option<String>) -> Result<Credentials> {
        let connection_string = env_value
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.connection_string.clone())
            .ok_or_else(|| BlobError::InvalidConnectionString {
                message: format!(
                    "no connection string configured; set storage.connection_string or {CONNECTION_STRING_ENV}"
                ),
            })?;
        Credentials::from_connection_string(&connection_string)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Resolved account identity and endpoint.  Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Storage account name.
    pub account_name: String,
    /// Base64-encoded shared key.
    pub account_key: String,
    /// Blob service endpoint, without trailing slash.
    pub blob_endpoint: String,
    /// `http` or `https`.
    pub protocol: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("account_name", &self.account_name)
            .field("account_key", &"<redacted>")
            .field("blob_endpoint", &self.blob_endpoint)
            .field("protocol", &self.protocol)
            .finish()
    }
}

impl Credentials {
    /// Parse a `;`-delimited `Key=Value` connection descriptor.
    ///
    /// Required keys: `AccountName`, `AccountKey`.  Optional:
    /// `DefaultEndpointsProtocol` (default `https`) and `BlobEndpoint`
    /// (default `{protocol}://{account}.blob.core.windows.net`).
    /// `UseDevelopmentStorage=true` resolves to the local emulator account.
    pub fn from_connection_string(input: &str) -> Result<Self> {
        let mut parts: HashMap<&str, &str> = HashMap::new();
        for segment in input.split(';') {
            if segment.trim().is_empty() {
                continue;
            }
            let (key, value) =
                segment
                    .split_once('=')
                    .ok_or_else(|| BlobError::InvalidConnectionString {
                        message: format!("segment '{}' is not a Key=Value pair", segment.trim()),
                    })?;
            parts.insert(key.trim(), value.trim());
        }

        if parts
            .get("UseDevelopmentStorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            return Ok(Self::development_storage());
        }

        let account_name = required(&parts, "AccountName")?;
        let account_key = required(&parts, "AccountKey")?;
        let protocol = parts
            .get("DefaultEndpointsProtocol")
            .filter(|v| !v.is_empty())
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_else(|| "https".to_string());
        let blob_endpoint = parts
            .get("BlobEndpoint")
            .filter(|v| !v.is_empty())
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("{protocol}://{account_name}.blob.core.windows.net"));

        Ok(Self {
            account_name,
            account_key,
            blob_endpoint,
            protocol,
        })
    }

    /// Credentials of the local storage emulator (Azurite).
    pub fn development_storage() -> Self {
        Self {
            account_name: DEV_ACCOUNT_NAME.to_string(),
            account_key: DEV_ACCOUNT_KEY.to_string(),
            blob_endpoint: format!("http://127.0.0.1:10000/{DEV_ACCOUNT_NAME}"),
            protocol: "http".to_string(),
        }
    }

    /// Path component of the blob endpoint, without surrounding slashes.
    ///
    /// Empty for host-style endpoints; `devstoreaccount1` for the emulator.
    pub fn endpoint_path(&self) -> String {
        reqwest::Url::parse(&self.blob_endpoint)
            .map(|url| url.path().trim_matches('/').to_string())
            .unwrap_or_default()
    }
}

impl FromStr for Credentials {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_connection_string(s)
    }
}

fn required(parts: &HashMap<&str, &str>, key: &str) -> Result<String> {
    parts
        .get(key)
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .ok_or_else(|| BlobError::InvalidConnectionString {
            message: format!("{key} is required in connection string"),
        })
}

// -- Defaults ----------------------------------------------------------------

fn default_container() -> String {
    "default".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_connection_string() {
        let c = Credentials::from_connection_string("AccountName=acct;AccountKey=a2V5").unwrap();
        assert_eq!(c.account_name, "acct");
        assert_eq!(c.account_key, "a2V5");
        assert_eq!(c.protocol, "https");
        assert_eq!(c.blob_endpoint, "https://acct.blob.core.windows.net");
        assert_eq!(c.endpoint_path(), "");
    }

    #[test]
    fn test_parse_full_connection_string() {
        let c: Credentials = "DefaultEndpointsProtocol=http; AccountName = acct ;AccountKey=a2V5==;\
                              BlobEndpoint=http://127.0.0.1:10000/acct/;"
            .parse()
            .unwrap();
        assert_eq!(c.protocol, "http");
        assert_eq!(c.account_key, "a2V5==");
        assert_eq!(c.blob_endpoint, "http://127.0.0.1:10000/acct");
        assert_eq!(c.endpoint_path(), "acct");
    }

    #[test]
    fn test_protocol_drives_default_endpoint() {
        let c = Credentials::from_connection_string(
            "DefaultEndpointsProtocol=http;AccountName=acct;AccountKey=a2V5",
        )
        .unwrap();
        assert_eq!(c.blob_endpoint, "http://acct.blob.core.windows.net");
    }

    #[test]
    fn test_missing_account_key_fails() {
        let err = Credentials::from_connection_string("AccountName=acct").unwrap_err();
        match err {
            BlobError::InvalidConnectionString { message } => {
                assert!(message.contains("AccountKey"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_account_name_fails() {
        let err = Credentials::from_connection_string("AccountKey=a2V5").unwrap_err();
        assert!(matches!(err, BlobError::InvalidConnectionString { .. }));
    }

    #[test]
    fn test_segment_without_equals_fails() {
        let err =
            Credentials::from_connection_string("AccountName=acct;garbage;AccountKey=a2V5").unwrap_err();
        assert!(matches!(err, BlobError::InvalidConnectionString { .. }));
    }

    #[test]
    fn test_development_storage_shortcut() {
        let c = Credentials::from_connection_string("UseDevelopmentStorage=true").unwrap();
        assert_eq!(c.account_name, "devstoreaccount1");
        assert_eq!(c.endpoint_path(), "devstoreaccount1");
        assert_eq!(c.protocol, "http");
    }

    #[test]
    fn test_debug_redacts_account_key() {
        let c = Credentials::from_connection_string("AccountName=acct;AccountKey=c2VjcmV0").unwrap();
        let rendered = format!("{c:?}");
        assert!(!rendered.contains("c2VjcmV0"));
    }

    #[test]
    fn test_override_wins_over_config_value() {
        let storage = StorageConfig {
            connection_string: Some("AccountName=fromfile;AccountKey=a2V5".to_string()),
            ..StorageConfig::default()
        };
        let c = storage
            .credentials_with_override(Some("AccountName=fromenv;AccountKey=a2V5".to_string()))
            .unwrap();
        assert_eq!(c.account_name, "fromenv");

        let c = storage.credentials_with_override(None).unwrap();
        assert_eq!(c.account_name, "fromfile");
    }

    #[test]
    fn test_no_connection_string_anywhere_fails() {
        let err = StorageConfig::default()
            .credentials_with_override(None)
            .unwrap_err();
        assert!(matches!(err, BlobError::InvalidConnectionString { .. }));
    }

    #[test]
    fn test_load_config_from_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "storage:\n  connection_string: \"AccountName=acct;AccountKey=a2V5\"\n  container: docs\n  timeout_secs: 5\nlogging:\n  level: debug"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.storage.container, "docs");
        assert_eq!(config.storage.timeout(), Duration::from_secs(5));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn test_defaults_for_empty_yaml() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.storage.container, "default");
        assert_eq!(config.storage.timeout_secs, 30);
        assert!(config.storage.connection_string.is_none());
    }
}
