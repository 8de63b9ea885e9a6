pub mod retry;

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::models::common::Config;

/// Parses a `0x`-prefixed (or bare) hex quantity.
pub fn hex_to_u64(hex: &str) -> Option<u64> {
    let digits = hex.trim_start_matches("0x");
    if digits.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Loads configuration from an optional YAML file, then `TX_TRACE__*`
/// environment variables (e.g. `TX_TRACE__RPC_URL`, `TX_TRACE__RETRY__MAX_ATTEMPTS`).
pub fn load_config<P: AsRef<Path>>(file_name: P) -> Result<Config> {
    let config_path = file_name.as_ref();
    info!("Config path: {}", config_path.display());

    let settings = config::Config::builder()
        .add_source(config::File::from(config_path).required(false))
        .add_source(
            config::Environment::with_prefix("TX_TRACE")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to read config")?;

    settings
        .try_deserialize::<Config>()
        .context("failed to parse config")
}

/// Reduces an HTML error page (as returned by some RPC gateways) to its first
/// line of text.
pub(crate) fn strip_html(error: &str) -> String {
    let lower = error.to_lowercase();
    if !lower.contains("<!doctype html>") && !lower.contains("<html") {
        return error.to_string();
    }
    error
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('<') && !line.ends_with('>'))
        .unwrap_or(error)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::TracerKind;
    use std::fs;

    #[test]
    fn test_hex_to_u64() {
        assert_eq!(hex_to_u64("0x5208"), Some(21_000));
        assert_eq!(hex_to_u64("ff"), Some(255));
        assert_eq!(hex_to_u64("0x"), Some(0));
        assert_eq!(hex_to_u64("0xnope"), None);
    }

    #[test]
    fn test_strip_html() {
        let page = "<!DOCTYPE html>\n<html>\n<body>\n502 Bad Gateway\n</body>\n</html>";
        assert_eq!(strip_html(page), "502 Bad Gateway");
        assert_eq!(strip_html("connection refused"), "connection refused");
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let config = load_config("does-not-exist.yml").unwrap();
        assert_eq!(config.tracer, TracerKind::Custom);
        assert!(config.compact);
        assert_eq!(config.retry.max_attempts, 4);
    }

    #[test]
    fn test_config_file_with_profile() {
        let path = std::env::temp_dir().join(format!("tx-trace-config-{}.yml", std::process::id()));
        fs::write(
            &path,
            "rpc_url: http://localhost:8545\n\
             tracer: opcode\n\
             retry:\n  max_attempts: 2\n\
             profiles:\n  mainnet:\n    rpc_url: https://eth.example.org\n    network_id: 1\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(config.tracer, TracerKind::Opcode);
        assert_eq!(config.retry.max_attempts, 2);
        // unset retry fields keep their defaults
        assert_eq!(config.retry.base_delay_ms, 500);

        let config = config.with_profile(Some("mainnet")).unwrap();
        assert_eq!(config.rpc_url, "https://eth.example.org");
        assert!(config.clone().with_profile(Some("goerli")).is_err());
    }
}
