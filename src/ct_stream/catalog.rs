// CA-Owner Catalog
//
// Periodically refreshed side table mapping Subject Key Identifiers
// (lowercase hex) to CA owner names, sourced from the CCADB roster CSV.
// Readers capture an immutable snapshot; the refresher replaces the whole
// map so a parse never observes a partially loaded catalog.

use super::Result;
use crate::config::CatalogConfig;
use crate::error::CtError;
use base64::Engine;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

/// Maximum download attempts per refresh
const MAX_ATTEMPTS: u32 = 3;

/// Initial delay between attempts (doubled each retry)
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Shared SKI → CA owner lookup table.
pub struct CaOwnerCatalog {
    map: RwLock<Arc<HashMap<String, String>>>,
    config: CatalogConfig,
    client: reqwest::Client,
}

impl CaOwnerCatalog {
    pub fn new(config: CatalogConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CtError::ClientConstruction {
                details: e.to_string(),
            })?;

        Ok(Self {
            map: RwLock::new(Arc::new(HashMap::new())),
            config,
            client,
        })
    }

    /// Download and parse the roster, then atomically publish the new map.
    /// On failure the previous catalog stays in place.
    pub async fn refresh(&self) -> Result<usize> {
        let body = self.download_with_retry().await?;
        let parsed = parse_roster_csv(
            &body,
            self.config.key_column,
            self.config.value_column,
            self.config.skip_header,
        )?;

        let owners: HashSet<&String> = parsed.values().collect();
        info!(
            "CCADB: loaded {} entries for {} distinct CA owners",
            parsed.len(),
            owners.len()
        );

        let count = parsed.len();
        let snapshot = Arc::new(parsed);
        if let Ok(mut guard) = self.map.write() {
            *guard = snapshot;
        }

        Ok(count)
    }

    async fn download_with_retry(&self) -> Result<Vec<u8>> {
        let mut delay = INITIAL_RETRY_DELAY;
        let mut last_error: Option<CtError> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.try_download().await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    warn!(
                        "CCADB download failed (attempt {}/{}): {}",
                        attempt, MAX_ATTEMPTS, e
                    );
                    last_error = Some(e);
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            CtError::Other(format!(
                "failed to download CSV after {} attempts",
                MAX_ATTEMPTS
            ))
        }))
    }

    async fn try_download(&self) -> Result<Vec<u8>> {
        let response = self.client.get(&self.config.url).send().await?;
        if !response.status().is_success() {
            return Err(CtError::Http {
                status: response.status().as_u16(),
                details: format!("CSV download failed with status: {}", response.status()),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Capture the current catalog. The returned map stays valid for the
    /// duration of a parse even if a refresh lands meanwhile.
    pub fn snapshot(&self) -> Arc<HashMap<String, String>> {
        self.map
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_default()
    }

    /// Number of entries currently loaded.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse the CCADB CSV body. The key column holds a base64-encoded raw SKI
/// which becomes a lowercase-hex lookup key; the value column is the CA
/// owner name.
pub fn parse_roster_csv(
    body: &[u8],
    key_column: usize,
    value_column: usize,
    skip_header: bool,
) -> Result<HashMap<String, String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(body);

    let mut records = reader.records();
    let first_row = match records.next() {
        Some(row) => row?,
        None => return Err(CtError::parse("empty CSV body")),
    };

    if key_column >= first_row.len() {
        return Err(CtError::Config {
            message: format!(
                "key column index {} is out of range (0-{})",
                key_column,
                first_row.len() - 1
            ),
        });
    }
    if value_column >= first_row.len() {
        return Err(CtError::Config {
            message: format!(
                "value column index {} is out of range (0-{})",
                value_column,
                first_row.len() - 1
            ),
        });
    }

    let mut result = HashMap::new();

    if !skip_header {
        if let (Some(key), Some(value)) = (first_row.get(key_column), first_row.get(value_column)) {
            result.insert(decode_ski_key(key), value.to_string());
        }
    }

    for row in records {
        let row = row?;
        if let (Some(key), Some(value)) = (row.get(key_column), row.get(value_column)) {
            result.insert(decode_ski_key(key), value.to_string());
        }
    }

    Ok(result)
}

/// Base64-decode a raw SKI and render it as lowercase hex without
/// separators. Undecodable input yields an empty key, matching the
/// tolerant roster handling of malformed rows.
fn decode_ski_key(encoded: &str) -> String {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .unwrap_or_default();
    decoded.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // "Gis8" is base64 of 0x1A 0x2B 0x3C
    fn sample_csv() -> String {
        let mut header: Vec<String> = (0..19).map(|i| format!("col{}", i)).collect();
        header[0] = "CA Owner".to_string();
        header[18] = "Subject Key Identifier".to_string();

        let mut row_a: Vec<String> = (0..19).map(|_| String::new()).collect();
        row_a[0] = "Example CA".to_string();
        row_a[18] = "Gis8".to_string();

        let mut row_b: Vec<String> = (0..19).map(|_| String::new()).collect();
        row_b[0] = "Other CA".to_string();
        row_b[18] = base64::engine::general_purpose::STANDARD.encode([0xDE, 0xAD, 0xBE, 0xEF]);

        format!(
            "{}\n{}\n{}\n",
            header.join(","),
            row_a.join(","),
            row_b.join(",")
        )
    }

    #[test]
    fn test_parse_roster_csv() {
        let map = parse_roster_csv(sample_csv().as_bytes(), 18, 0, true).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("1a2b3c").map(String::as_str), Some("Example CA"));
        assert_eq!(map.get("deadbeef").map(String::as_str), Some("Other CA"));
    }

    #[test]
    fn test_header_kept_when_not_skipping() {
        let map = parse_roster_csv(sample_csv().as_bytes(), 18, 0, false).unwrap();
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_same_csv_yields_equal_map() {
        let csv = sample_csv();
        let first = parse_roster_csv(csv.as_bytes(), 18, 0, true).unwrap();
        let second = parse_roster_csv(csv.as_bytes(), 18, 0, true).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_out_of_range_column_rejected() {
        let result = parse_roster_csv(sample_csv().as_bytes(), 40, 0, true);
        assert!(matches!(result, Err(CtError::Config { .. })));
    }

    #[test]
    fn test_undecodable_key_becomes_empty() {
        let csv = "owner,ski\nExample CA,!!!not-base64!!!\n";
        let map = parse_roster_csv(csv.as_bytes(), 1, 0, true).unwrap();
        assert_eq!(map.get("").map(String::as_str), Some("Example CA"));
    }

    #[test]
    fn test_snapshot_survives_refresh_failure() {
        let catalog = CaOwnerCatalog::new(CatalogConfig {
            url: "http://127.0.0.1:1/unreachable".to_string(),
            ..CatalogConfig::default()
        })
        .unwrap();

        // Seed the catalog directly, then observe it is kept after a failed
        // refresh.
        {
            let mut guard = catalog.map.write().unwrap();
            let mut seeded = HashMap::new();
            seeded.insert("1a2b3c".to_string(), "Example CA".to_string());
            *guard = Arc::new(seeded);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = runtime.block_on(catalog.refresh());
        assert!(result.is_err());
        assert_eq!(
            catalog.snapshot().get("1a2b3c").map(String::as_str),
            Some("Example CA")
        );
    }
}
