// CertFlux configuration
//
// YAML-backed settings for the scanner supervisor and the CA-owner catalog.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Canonical CT log directory (Google log list, v3 format)
pub const DEFAULT_LOG_LIST_URL: &str = "https://www.gstatic.com/ct/log_list/v3/log_list.json";

/// CCADB roster of trusted CAs, CSV format v2
pub const DEFAULT_CCADB_URL: &str =
    "https://ccadb.my.salesforce-sites.com/ccadb/AllCertificateRecordsCSVFormatv2";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub ct_logs: CtLogConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// CT log scanning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtLogConfig {
    /// URL of the CT log directory
    #[serde(default = "default_log_list_url")]
    pub log_list_url: String,
    /// Hours between log-directory rediscovery sweeps
    #[serde(default = "default_recheck_interval_hours")]
    pub recheck_interval_hours: u64,
    /// Per-log start-index overrides, `"<url-substring> <absolute-index>"`
    #[serde(default)]
    pub start_index: Vec<String>,
}

/// CA-owner catalog settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// URL of the CCADB CSV roster
    #[serde(default = "default_ccadb_url")]
    pub url: String,
    /// Column holding the base64-encoded Subject Key Identifier
    #[serde(default = "default_key_column")]
    pub key_column: usize,
    /// Column holding the CA owner name
    #[serde(default)]
    pub value_column: usize,
    /// Whether the first CSV row is a header
    #[serde(default = "default_skip_header")]
    pub skip_header: bool,
}

fn default_log_list_url() -> String {
    DEFAULT_LOG_LIST_URL.to_string()
}

fn default_ccadb_url() -> String {
    DEFAULT_CCADB_URL.to_string()
}

fn default_recheck_interval_hours() -> u64 {
    6
}

fn default_key_column() -> usize {
    18
}

fn default_skip_header() -> bool {
    true
}

impl Default for CtLogConfig {
    fn default() -> Self {
        Self {
            log_list_url: default_log_list_url(),
            recheck_interval_hours: default_recheck_interval_hours(),
            start_index: Vec::new(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: default_ccadb_url(),
            key_column: default_key_column(),
            value_column: 0,
            skip_header: default_skip_header(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file. A missing file yields defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: AppConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.ct_logs.log_list_url, DEFAULT_LOG_LIST_URL);
        assert_eq!(config.ct_logs.recheck_interval_hours, 6);
        assert!(config.ct_logs.start_index.is_empty());
        assert_eq!(config.catalog.url, DEFAULT_CCADB_URL);
        assert_eq!(config.catalog.key_column, 18);
        assert_eq!(config.catalog.value_column, 0);
        assert!(config.catalog.skip_header);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
ct_logs:
  start_index:
    - "ct.googleapis.com/logs/argon 12345"
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.ct_logs.start_index.len(), 1);
        assert_eq!(config.ct_logs.log_list_url, DEFAULT_LOG_LIST_URL);
        assert_eq!(config.catalog.key_column, 18);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = AppConfig::from_file("/nonexistent/certflux.yaml").unwrap();
        assert_eq!(config.ct_logs.recheck_interval_hours, 6);
    }
}
