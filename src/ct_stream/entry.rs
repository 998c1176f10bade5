// Enriched event model
//
// The JSON shape published for every certificate observed in a CT log.
// Optional distinguished-name fields are omitted entirely when the DN has
// no such attribute.

use serde::{Deserialize, Serialize};

/// A single certificate-update event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub message_type: String,
    pub data: EntryData,
}

impl Entry {
    pub fn new(data: EntryData) -> Self {
        Self {
            message_type: "certificate_update".to_string(),
            data,
        }
    }
}

/// Event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryData {
    pub cert_index: u64,
    pub cert_link: String,
    /// Unix seconds with millisecond precision
    pub seen: f64,
    pub source: LogSourceInfo,
    /// "X509LogEntry" or "PrecertLogEntry"
    pub update_type: String,
    pub leaf_cert: LeafCert,
    pub chain: Vec<LeafCert>,
}

/// The CT log an event was observed in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSourceInfo {
    pub name: String,
    pub url: String,
    pub normalized_url: String,
    pub operator: String,
}

/// Parsed certificate record, used for both the leaf and each chain element.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeafCert {
    pub subject: DnRecord,
    pub issuer: DnRecord,
    pub all_domains: Vec<String>,
    pub all_reg_domains: Vec<String>,
    pub not_before: i64,
    pub not_after: i64,
    pub serial_number: String,
    pub signature_algorithm: String,
    pub key_type: String,
    pub fingerprint: String,
    pub sha1: String,
    pub sha256: String,
    pub as_der: String,
    pub is_ca: bool,
    pub extensions: Extensions,
    pub validation_type: String,
    pub cert_type: String,
    pub cert_type_ext: CertTypeExt,
    pub ca_owner: String,
}

/// Distinguished name attributes. `aggregated` is a JSON-encoded dictionary
/// of the full DN including every attribute OID with its string value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnRecord {
    #[serde(rename = "C", skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(rename = "CN", skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    #[serde(rename = "L", skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
    #[serde(rename = "O", skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(rename = "OU", skip_serializing_if = "Option::is_none")]
    pub organizational_unit: Option<String>,
    /// Street address attributes (2.5.4.9), published under the `ST` key
    #[serde(rename = "ST", skip_serializing_if = "Option::is_none")]
    pub st: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregated: Option<String>,
}

/// Recognised X.509 extension values, rendered as display strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extensions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority_key_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_key_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_usage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basic_constraints: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_alt_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority_info_access: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub ctl_poison_byte: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// SAN census: total, wildcard and plain counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CertTypeExt {
    pub san_count: usize,
    pub wildcard_san_count: usize,
    pub single_san_count: usize,
}

/// Canonical single-entry query link for a tree index.
pub fn cert_link_for(ct_url: &str, index: u64) -> String {
    format!("{}/ct/v1/get-entries?start={}&end={}", ct_url, index, index)
}
