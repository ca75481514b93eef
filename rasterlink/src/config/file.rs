//! INI configuration file loading.
//!
//! A configuration file carries the same settings as [`SessionConfig`]:
//!
//! ```ini
//! [session]
//! metadata_url = https://service/images/42/metadata
//! block_size = 1024
//! pixel_encoding = png
//! masks = yes
//! target_srs = EPSG:4326
//!
//! [auth]
//! client_id = my-client
//! api_key = my-key
//!
//! [network]
//! server_byte_limit = 52428800
//! initial_retry_delay = 0.5
//! request_timeout = 600
//! ```
//!
//! Every key is optional; missing keys keep the [`SessionConfig::default`]
//! values.

use std::path::Path;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use super::{parse_bool, PixelEncoding, SessionConfig};

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read or parse the file.
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// A key holds a value that cannot be used.
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Load a [`SessionConfig`] from an INI file.
pub fn load_config(path: &Path) -> Result<SessionConfig, ConfigFileError> {
    let ini = Ini::load_from_file(path)?;
    parse_ini(&ini)
}

/// Parse a [`SessionConfig`] from INI text.
pub fn parse_config_str(content: &str) -> Result<SessionConfig, ConfigFileError> {
    let ini = Ini::load_from_str(content)
        .map_err(|e| ConfigFileError::ReadError(ini::Error::Parse(e)))?;
    parse_ini(&ini)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let v = value.trim();
    (!v.is_empty()).then(|| v.to_string())
}

fn parse_ini(ini: &Ini) -> Result<SessionConfig, ConfigFileError> {
    let mut config = SessionConfig::default();

    // [session] section
    if let Some(section) = ini.section(Some("session")) {
        if let Some(v) = section.get("metadata_url") {
            config.metadata_url = v.trim().to_string();
        }
        if let Some(v) = section.get("block_size") {
            let size: u32 = v
                .trim()
                .parse()
                .map_err(|_| invalid("session", "block_size", v, "must be a positive integer"))?;
            config = config.with_block_size(size);
        }
        if let Some(v) = section.get("pixel_encoding") {
            config.pixel_encoding = v.parse::<PixelEncoding>().map_err(|_| {
                invalid(
                    "session",
                    "pixel_encoding",
                    v,
                    "must be one of: auto, raw, png, jpeg, jpeg2000",
                )
            })?;
        }
        if let Some(v) = section.get("masks") {
            config.expose_masks = parse_bool(v)
                .ok_or_else(|| invalid("session", "masks", v, "must be yes or no"))?;
        }
        if let Some(v) = section.get("target_srs") {
            config.target_srs = non_empty(v);
        }
        if let Some(v) = section.get("get_buffer_url") {
            config.get_buffer_url = non_empty(v);
        }
    }

    // [auth] section
    if let Some(section) = ini.section(Some("auth")) {
        if let Some(v) = section.get("client_id") {
            config.client_id = non_empty(v);
        }
        if let Some(v) = section.get("api_key") {
            config.api_key = non_empty(v);
        }
        if let Some(v) = section.get("access_token") {
            config.access_token = non_empty(v);
        }
        if let Some(v) = section.get("forwarded_user") {
            config.forwarded_user = non_empty(v);
        }
        if let Some(v) = section.get("authorization") {
            config.authorization_header = non_empty(v);
        }
        if let Some(v) = section.get("auth_url") {
            if let Some(url) = non_empty(v) {
                config.auth_url = url;
            }
        }
        if let Some(v) = section.get("enabled") {
            config.perform_auth =
                parse_bool(v).ok_or_else(|| invalid("auth", "enabled", v, "must be yes or no"))?;
        }
    }

    // [network] section
    if let Some(section) = ini.section(Some("network")) {
        if let Some(v) = section.get("server_byte_limit") {
            config.server_byte_limit = v
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    invalid(
                        "network",
                        "server_byte_limit",
                        v,
                        "must be a positive integer (bytes)",
                    )
                })?;
        }
        if let Some(v) = section.get("initial_retry_delay") {
            let secs = v
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite() && *d >= 0.0)
                .ok_or_else(|| {
                    invalid(
                        "network",
                        "initial_retry_delay",
                        v,
                        "must be a non-negative number (seconds)",
                    )
                })?;
            config.initial_retry_delay = Duration::from_secs_f64(secs);
        }
        if let Some(v) = section.get("request_timeout") {
            let secs: u64 = v.trim().parse().map_err(|_| {
                invalid(
                    "network",
                    "request_timeout",
                    v,
                    "must be a positive integer (seconds)",
                )
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = section.get("resident_coverage_threshold") {
            config.resident_coverage_threshold = v
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|t| (0.0..=1.0).contains(t))
                .ok_or_else(|| {
                    invalid(
                        "network",
                        "resident_coverage_threshold",
                        v,
                        "must be a number between 0 and 1",
                    )
                })?;
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = parse_config_str("").unwrap();
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn test_full_file() {
        let config = parse_config_str(
            r#"
[session]
metadata_url = https://svc/images/1
block_size = 1024
pixel_encoding = jpeg
masks = no
target_srs = EPSG:4326

[auth]
client_id = cid
api_key = key

[network]
server_byte_limit = 2048
initial_retry_delay = 0.25
request_timeout = 60
"#,
        )
        .unwrap();

        assert_eq!(config.metadata_url, "https://svc/images/1");
        assert_eq!(config.block_size, 1024);
        assert_eq!(config.pixel_encoding, PixelEncoding::Jpeg);
        assert!(!config.expose_masks);
        assert_eq!(config.target_srs.as_deref(), Some("EPSG:4326"));
        assert_eq!(config.client_id.as_deref(), Some("cid"));
        assert_eq!(config.api_key.as_deref(), Some("key"));
        assert_eq!(config.server_byte_limit, 2048);
        assert_eq!(config.initial_retry_delay, Duration::from_millis(250));
        assert_eq!(config.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_encoding() {
        let err = parse_config_str("[session]\npixel_encoding = webp\n").unwrap_err();
        match err {
            ConfigFileError::InvalidValue { section, key, .. } => {
                assert_eq!(section, "session");
                assert_eq!(key, "pixel_encoding");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_byte_limit() {
        assert!(parse_config_str("[network]\nserver_byte_limit = 0\n").is_err());
        assert!(parse_config_str("[network]\nserver_byte_limit = lots\n").is_err());
    }

    #[test]
    fn test_block_size_clamped_from_file() {
        let config = parse_config_str("[session]\nblock_size = 32\n").unwrap();
        assert_eq!(config.block_size, 64);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[session]\nmetadata_url = https://svc/m").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.metadata_url, "https://svc/m");
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = load_config(Path::new("/nonexistent/rasterlink.ini")).unwrap_err();
        assert!(matches!(err, ConfigFileError::ReadError(_)));
    }
}
