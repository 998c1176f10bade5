// CT Log API Client
//
// HTTP communication with CT log servers plus RFC 6962 wire decoding of
// the returned entries.

use super::Result;
use crate::error::CtError;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// User agent sent with every CT log request
pub const USER_AGENT: &str = concat!(
    "certflux/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com/certflux/certflux)"
);

/// Send attempts per request before giving up
const REQUEST_ATTEMPTS: u32 = 5;

/// Delay before the first retry; each further retry doubles it
const BACKOFF_BASE_MS: u64 = 250;

/// HTTP timeout for all CT log operations
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// CT Log API Client
pub struct CtClient {
    client: reqwest::Client,
}

impl CtClient {
    /// Create a new CT log API client. Construction failure is terminal for
    /// the worker that requested it.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| CtError::ClientConstruction {
                details: e.to_string(),
            })?;

        Ok(Self { client })
    }

    /// Get the current Signed Tree Head of a log.
    pub async fn get_sth(&self, log_url: &str) -> Result<SignedTreeHead> {
        let url = format!("{}/ct/v1/get-sth", log_url.trim_end_matches('/'));

        let response = self.send_with_retry(&url).await?;

        let sth: SignedTreeHead = response
            .json()
            .await
            .map_err(|e| CtError::parse(format!("Failed to parse STH response: {}", e)))?;

        Ok(sth)
    }

    /// Get raw entries `start..=end` from a log.
    pub async fn get_entries(
        &self,
        log_url: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<LogEntryResponse>> {
        let url = format!(
            "{}/ct/v1/get-entries?start={}&end={}",
            log_url.trim_end_matches('/'),
            start,
            end
        );

        debug!("Fetching entries {} to {} from {}", start, end, log_url);

        let response = self.send_with_retry(&url).await?;

        let entries: EntriesResponse = response
            .json()
            .await
            .map_err(|e| CtError::parse(format!("Failed to parse entries response: {}", e)))?;

        Ok(entries.entries)
    }

    /// GET a URL, retrying transient failures. Rate limiting, server errors
    /// and network errors back off and retry; any other HTTP status fails
    /// the request immediately.
    async fn send_with_retry(&self, url: &str) -> Result<reqwest::Response> {
        let mut failure = None;

        for attempt in 1..=REQUEST_ATTEMPTS {
            if attempt > 1 {
                let wait = backoff_delay(attempt);
                debug!("Retrying {} in {:?} (attempt {}/{})", url, wait, attempt, REQUEST_ATTEMPTS);
                tokio::time::sleep(wait).await;
            }

            match classify(self.client.get(url).send().await) {
                Outcome::Ready(response) => return Ok(response),
                Outcome::Transient(e) => {
                    warn!("Request to {} failed: {}", url, e);
                    failure = Some(e);
                }
                Outcome::Fatal(e) => return Err(e),
            }
        }

        Err(failure.unwrap_or_else(|| {
            CtError::Other(format!(
                "request to {} failed after {} attempts",
                url, REQUEST_ATTEMPTS
            ))
        }))
    }
}

/// How one send attempt ended.
enum Outcome {
    Ready(reqwest::Response),
    Transient(CtError),
    Fatal(CtError),
}

fn classify(result: std::result::Result<reqwest::Response, reqwest::Error>) -> Outcome {
    let response = match result {
        Ok(response) => response,
        Err(e) => return Outcome::Transient(CtError::Request(e)),
    };

    let status = response.status();
    if status.is_success() {
        return Outcome::Ready(response);
    }

    let err = CtError::Http {
        status: status.as_u16(),
        details: format!("Request failed with status: {}", status),
    };
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Outcome::Transient(err)
    } else {
        Outcome::Fatal(err)
    }
}

/// Delay before the given attempt (attempt 2 waits the base, each later
/// attempt doubles it).
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(BACKOFF_BASE_MS << (attempt - 2))
}

/// Signed Tree Head response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignedTreeHead {
    pub tree_size: u64,
    pub timestamp: u64,
    pub sha256_root_hash: String,
    pub tree_head_signature: String,
}

/// Get-entries API response
#[derive(Debug, Deserialize, Serialize)]
struct EntriesResponse {
    entries: Vec<LogEntryResponse>,
}

/// Individual CT log entry as returned by the API
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogEntryResponse {
    pub leaf_input: String,
    pub extra_data: String,
}

/// Kind of a CT log leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    X509,
    Precert,
}

/// Decoded raw log entry, before certificate enrichment.
///
/// For X.509 leaves `cert` is the full certificate DER; for precert leaves
/// it is the TBSCertificate from the Merkle tree leaf and `submitted` holds
/// the full precertificate DER from the extra data.
#[derive(Debug, Clone)]
pub struct RawLogEntry {
    pub index: u64,
    pub kind: LeafKind,
    /// Milliseconds since epoch, from the timestamped entry
    pub timestamp: u64,
    pub cert: Vec<u8>,
    pub submitted: Option<Vec<u8>>,
    pub chain: Vec<Vec<u8>>,
}

impl RawLogEntry {
    /// Decode a get-entries response element into its wire components.
    pub fn decode(response: &LogEntryResponse, index: u64) -> Result<Self> {
        let leaf_bytes = base64::engine::general_purpose::STANDARD.decode(&response.leaf_input)?;
        let extra_bytes = base64::engine::general_purpose::STANDARD.decode(&response.extra_data)?;

        let mut leaf = ByteReader::new(&leaf_bytes);

        let version = leaf.read_u8()?;
        if version != 0 {
            return Err(CtError::parse(format!("Unsupported CT version: {}", version)));
        }

        let leaf_type = leaf.read_u8()?;
        if leaf_type != 0 {
            return Err(CtError::parse(format!("Unsupported leaf type: {}", leaf_type)));
        }

        let timestamp = leaf.read_u64()?;
        let entry_type = leaf.read_u16()?;

        match entry_type {
            0 => {
                // ASN.1Cert, then leaf extensions (ignored)
                let cert = leaf.read_u24_prefixed()?.to_vec();
                let chain = decode_chain(&mut ByteReader::new(&extra_bytes))?;

                Ok(Self {
                    index,
                    kind: LeafKind::X509,
                    timestamp,
                    cert,
                    submitted: None,
                    chain,
                })
            }
            1 => {
                // PreCert: issuer_key_hash[32], then the TBSCertificate
                leaf.read_bytes(32)?;
                let tbs = leaf.read_u24_prefixed()?.to_vec();

                // PrecertChainEntry: the submitted precertificate, then the chain
                let mut extra = ByteReader::new(&extra_bytes);
                let submitted = extra.read_u24_prefixed()?.to_vec();
                let chain = decode_chain(&mut extra)?;

                Ok(Self {
                    index,
                    kind: LeafKind::Precert,
                    timestamp,
                    cert: tbs,
                    submitted: Some(submitted),
                    chain,
                })
            }
            other => Err(CtError::parse(format!("Unknown entry type: {}", other))),
        }
    }
}

/// Decode a TLS-style certificate chain: a u24 total length followed by
/// u24-length-prefixed DER elements.
fn decode_chain(reader: &mut ByteReader<'_>) -> Result<Vec<Vec<u8>>> {
    if reader.remaining() == 0 {
        return Ok(Vec::new());
    }

    let total = reader.read_u24()? as usize;
    let mut chain_reader = ByteReader::new(reader.read_bytes(total)?);

    let mut chain = Vec::new();
    while chain_reader.remaining() > 0 {
        chain.push(chain_reader.read_u24_prefixed()?.to_vec());
    }

    Ok(chain)
}

/// Cursor over a byte slice with big-endian reads.
struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(CtError::parse(format!(
                "Truncated CT structure: wanted {} bytes, {} left",
                len,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u24(&mut self) -> Result<u32> {
        let b = self.read_bytes(3)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_u24_prefixed(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u24()? as usize;
        self.read_bytes(len)
    }
}
