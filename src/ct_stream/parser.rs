// CT Log Entry Parser
//
// Converts a decoded raw log entry into the enriched certificate-update
// event: DN decomposition, SAN census, registrable domains, validation-type
// heuristic and CA-owner attribution.

use super::client::{LeafKind, RawLogEntry};
use super::entry::{
    cert_link_for, CertTypeExt, DnRecord, Entry, EntryData, Extensions, LeafCert, LogSourceInfo,
};
use super::{normalize_ctlog_url, Result};
use crate::error::CtError;
use base64::Engine;
use chrono::Utc;
use openssl::hash::{hash, MessageDigest};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use asn1_rs::{oid, Oid};
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;
use x509_parser::signature_algorithm::SignatureAlgorithm;

const OID_CT_POISON: Oid<'static> = oid!(1.3.6.1.4.1.11129.2.4.3);
const OID_AD_OCSP: Oid<'static> = oid!(1.3.6.1.5.5.7.48.1);
const OID_AD_CA_ISSUERS: Oid<'static> = oid!(1.3.6.1.5.5.7.48.2);
const OID_DN_SERIAL_NUMBER: Oid<'static> = oid!(2.5.4.5);
const OID_DN_STREET_ADDRESS: Oid<'static> = oid!(2.5.4.9);
const OID_DN_POSTAL_CODE: Oid<'static> = oid!(2.5.4.17);

/// Parse a raw log entry into a certificate-update event.
pub fn parse_log_entry(
    raw_entry: &RawLogEntry,
    operator_name: &str,
    log_name: &str,
    ct_url: &str,
    ca_owners: &HashMap<String, String>,
) -> Result<Entry> {
    let (leaf_cert, update_type) = match raw_entry.kind {
        LeafKind::X509 => {
            let (_, cert) = X509Certificate::from_der(&raw_entry.cert)
                .map_err(|e| CtError::parse(format!("Failed to parse X.509 certificate: {}", e)))?;
            let leaf = leaf_cert_record(&cert.tbs_certificate, &raw_entry.cert, ca_owners)?;
            (leaf, "X509LogEntry")
        }
        LeafKind::Precert => {
            // Certificate fields come from the TBS in the leaf; hashes and
            // the DER transport use the submitted precertificate.
            let submitted = raw_entry
                .submitted
                .as_deref()
                .ok_or_else(|| CtError::parse("precert entry without submitted certificate"))?;
            let (_, tbs) = TbsCertificate::from_der(&raw_entry.cert)
                .map_err(|e| CtError::parse(format!("Failed to parse precert TBS: {}", e)))?;
            let leaf = leaf_cert_record(&tbs, submitted, ca_owners)?;
            (leaf, "PrecertLogEntry")
        }
    };

    let mut chain = Vec::with_capacity(raw_entry.chain.len());
    for der in &raw_entry.chain {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| CtError::parse(format!("Failed to parse chain certificate: {}", e)))?;
        chain.push(leaf_cert_record(&cert.tbs_certificate, der, ca_owners)?);
    }

    let data = EntryData {
        cert_index: raw_entry.index,
        cert_link: cert_link_for(ct_url, raw_entry.index),
        seen: Utc::now().timestamp_millis() as f64 / 1_000.0,
        source: LogSourceInfo {
            name: log_name.to_string(),
            url: ct_url.to_string(),
            normalized_url: normalize_ctlog_url(ct_url),
            operator: operator_name.to_string(),
        },
        update_type: update_type.to_string(),
        leaf_cert,
        chain,
    };

    Ok(Entry::new(data))
}

/// Everything the extension walk collects in one pass.
#[derive(Default)]
struct ExtensionScan {
    extensions: Extensions,
    is_ca: bool,
    policy_oids: Vec<String>,
    aki_hex: Option<String>,
    dns_names: Vec<String>,
}

/// Build the certificate record shared by the leaf and each chain element.
/// `raw` is the DER the hashes and `as_der` are computed over.
fn leaf_cert_record(
    tbs: &TbsCertificate,
    raw: &[u8],
    ca_owners: &HashMap<String, String>,
) -> Result<LeafCert> {
    let scan = scan_extensions(tbs);

    let subject = build_dn_record(&tbs.subject);
    let issuer = build_dn_record(&tbs.issuer);

    let domains = derive_domains(
        &scan.dns_names,
        subject.common_name.as_deref(),
        scan.is_ca,
    );

    let sha1 = hash_fingerprint(raw, MessageDigest::sha1())?;
    let sha256 = hash_fingerprint(raw, MessageDigest::sha256())?;

    let validation_type = derive_validation_type(
        &scan.policy_oids,
        subject.organization.is_some(),
        subject.aggregated.as_deref().unwrap_or(""),
    );

    let cert_type = cert_type_for(domains.wildcard_count, domains.all_domains.len());
    let cert_type_ext = CertTypeExt {
        san_count: domains.all_domains.len(),
        wildcard_san_count: domains.wildcard_count,
        single_san_count: domains.all_domains.len() - domains.wildcard_count,
    };

    let ca_owner = ca_owners
        .get(scan.aki_hex.as_deref().unwrap_or(""))
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());

    Ok(LeafCert {
        subject,
        issuer,
        all_domains: domains.all_domains,
        all_reg_domains: domains.all_reg_domains,
        not_before: tbs.validity.not_before.timestamp(),
        not_after: tbs.validity.not_after.timestamp(),
        serial_number: format_serial(tbs.raw_serial()),
        signature_algorithm: signature_algorithm_name(&tbs.signature),
        key_type: key_type_for(&tbs.subject_pki),
        fingerprint: sha1.clone(),
        sha1,
        sha256,
        as_der: base64::engine::general_purpose::STANDARD.encode(raw),
        is_ca: scan.is_ca,
        extensions: scan.extensions,
        validation_type: validation_type.to_string(),
        cert_type: cert_type.to_string(),
        cert_type_ext,
        ca_owner,
    })
}

/// Walk the certificate extensions once, collecting display strings and the
/// attributes later derivations depend on.
fn scan_extensions(tbs: &TbsCertificate) -> ExtensionScan {
    let mut scan = ExtensionScan::default();

    for ext in tbs.extensions() {
        if ext.oid == OID_CT_POISON {
            scan.extensions.ctl_poison_byte = true;
            continue;
        }

        match ext.parsed_extension() {
            ParsedExtension::AuthorityKeyIdentifier(aki) => {
                let key_id = aki
                    .key_identifier
                    .as_ref()
                    .map(|id| format_key_id_short(id.0))
                    .unwrap_or_default();
                scan.extensions.authority_key_identifier = Some(key_id.clone());
                scan.aki_hex = Some(key_id);
            }
            ParsedExtension::SubjectKeyIdentifier(ski) => {
                scan.extensions.subject_key_identifier = Some(format_key_id(ski.0));
            }
            ParsedExtension::KeyUsage(ku) => {
                scan.extensions.key_usage = Some(key_usage_to_string(ku));
            }
            ParsedExtension::BasicConstraints(bc) => {
                scan.is_ca = bc.ca;
                scan.extensions.basic_constraints =
                    Some(if bc.ca { "CA:TRUE" } else { "CA:FALSE" }.to_string());
            }
            ParsedExtension::SubjectAlternativeName(san) => {
                let mut emails = Vec::new();
                let mut ips = Vec::new();
                for name in &san.general_names {
                    match name {
                        GeneralName::DNSName(dns) => scan.dns_names.push(dns.to_string()),
                        GeneralName::RFC822Name(email) => emails.push(email.to_string()),
                        GeneralName::IPAddress(bytes) => {
                            if let Some(ip) = format_ip(bytes) {
                                ips.push(ip);
                            }
                        }
                        _ => {}
                    }
                }

                let mut parts: Vec<String> =
                    scan.dns_names.iter().map(|d| format!("DNS:{}", d)).collect();
                parts.extend(emails.iter().map(|e| format!("email:{}", e)));
                parts.extend(ips.iter().map(|ip| format!("IP Address:{}", ip)));
                scan.extensions.subject_alt_name = Some(parts.join(", "));
            }
            ParsedExtension::AuthorityInfoAccess(aia) => {
                let mut issuers = Vec::new();
                let mut ocsp = Vec::new();
                for desc in &aia.accessdescs {
                    if let GeneralName::URI(uri) = &desc.access_location {
                        if desc.access_method == OID_AD_CA_ISSUERS {
                            issuers.push(format!("URI:{}", uri));
                        } else if desc.access_method == OID_AD_OCSP {
                            ocsp.push(format!("URI:{}", uri));
                        }
                    }
                }
                issuers.extend(ocsp);
                scan.extensions.authority_info_access = Some(issuers.join(", "));
            }
            ParsedExtension::CertificatePolicies(policies) => {
                scan.policy_oids = policies
                    .iter()
                    .map(|policy| policy.policy_id.to_id_string())
                    .collect();
            }
            _ => {}
        }
    }

    scan
}

/// Registrable domains and wildcard census for a certificate.
#[derive(Debug, Default, PartialEq, Eq)]
struct DomainInfo {
    all_domains: Vec<String>,
    all_reg_domains: Vec<String>,
    wildcard_count: usize,
}

/// Derive the domain lists from the DNS SANs and the subject CN. The
/// wildcard census and registrable-domain extraction only run for non-CA
/// certificates with a present CN; the CN is appended when no SAN already
/// carries it.
fn derive_domains(dns_sans: &[String], common_name: Option<&str>, is_ca: bool) -> DomainInfo {
    let mut all_domains: Vec<String> = dns_sans.to_vec();
    let mut wildcard_count = 0;
    let mut reg_domains = Vec::new();

    if let Some(cn) = common_name.filter(|cn| !cn.is_empty()) {
        if !is_ca {
            let mut cn_already_present = false;
            for domain in &all_domains {
                if domain.contains('*') {
                    wildcard_count += 1;
                }
                reg_domains.push(registrable_domain(domain));
                if domain == cn {
                    cn_already_present = true;
                }
            }
            if !cn_already_present {
                all_domains.push(cn.to_string());
            }
        }
    }

    let mut seen = HashSet::new();
    let all_reg_domains = reg_domains
        .into_iter()
        .filter(|domain| seen.insert(domain.clone()))
        .collect();

    DomainInfo {
        all_domains,
        all_reg_domains,
        wildcard_count,
    }
}

/// Public-suffix + 1 for a SAN entry. IP literals and names the suffix list
/// cannot resolve pass through unchanged.
fn registrable_domain(domain: &str) -> String {
    if domain.parse::<IpAddr>().is_ok() {
        return domain.to_string();
    }

    psl::domain_str(domain)
        .map(|reg| reg.to_string())
        .unwrap_or_else(|| domain.to_string())
}

/// Derive the validation tier. Rule order is load-bearing: the policy-OID
/// switch runs before the missing-Organization downgrade, and the
/// jurisdictionCountry marker upgrades last.
fn derive_validation_type(policy_oids: &[String], has_org: bool, aggregated: &str) -> &'static str {
    let mut validation_type = "OV";

    if policy_oids.iter().any(|o| o == "2.23.140.1.2.1") {
        validation_type = "DV";
    } else if policy_oids.iter().any(|o| o == "2.23.140.1.2.2") {
        validation_type = "OV";
    } else if policy_oids.iter().any(|o| o == "2.23.140.1.2.3") {
        validation_type = "IV";
    } else if policy_oids.iter().any(|o| o == "2.23.140.1.1") {
        validation_type = "EV";
    }

    if !has_org {
        validation_type = "DV";
    }

    if aggregated.contains("1.3.6.1.4.1.311.60.2.1.3") {
        validation_type = "EV";
    }

    validation_type
}

/// Wildcard beats Multi beats Single.
fn cert_type_for(wildcard_count: usize, domain_count: usize) -> &'static str {
    if wildcard_count > 0 {
        "Wildcard"
    } else if domain_count > 2 {
        "Multi"
    } else {
        "Single"
    }
}

/// JSON rendering of the full DN, embedded in the `aggregated` field.
#[derive(Serialize)]
struct AggregatedDn {
    #[serde(skip_serializing_if = "String::is_empty")]
    common_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    serial_number: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    country: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    organization: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    organizational_unit: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    locality: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    province: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    street_address: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    postal_code: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    names: Vec<DnAttribute>,
}

/// One DN attribute with its dotted-decimal OID, so downstream marker
/// detection can match on the OID itself.
#[derive(Serialize)]
struct DnAttribute {
    oid: String,
    value: String,
}

fn build_dn_record(name: &X509Name) -> DnRecord {
    let common_name = name
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(|s| s.to_string());

    DnRecord {
        country: join_attrs(name.iter_country()),
        common_name,
        locality: join_attrs(name.iter_locality()),
        organization: join_attrs(name.iter_organization()),
        organizational_unit: join_attrs(name.iter_organizational_unit()),
        st: join_attrs_by_oid(name, &OID_DN_STREET_ADDRESS),
        aggregated: Some(build_aggregated(name)),
    }
}

fn build_aggregated(name: &X509Name) -> String {
    let names = name
        .iter_attributes()
        .map(|attr| DnAttribute {
            oid: attr.attr_type().to_id_string(),
            value: attr.as_str().unwrap_or_default().to_string(),
        })
        .collect();

    let aggregated = AggregatedDn {
        common_name: name
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default()
            .to_string(),
        serial_number: join_attrs_by_oid(name, &OID_DN_SERIAL_NUMBER).unwrap_or_default(),
        country: join_attrs(name.iter_country()).unwrap_or_default(),
        organization: join_attrs(name.iter_organization()).unwrap_or_default(),
        organizational_unit: join_attrs(name.iter_organizational_unit()).unwrap_or_default(),
        locality: join_attrs(name.iter_locality()).unwrap_or_default(),
        province: join_attrs(name.iter_state_or_province()).unwrap_or_default(),
        street_address: join_attrs_by_oid(name, &OID_DN_STREET_ADDRESS).unwrap_or_default(),
        postal_code: join_attrs_by_oid(name, &OID_DN_POSTAL_CODE).unwrap_or_default(),
        names,
    };

    serde_json::to_string(&aggregated).unwrap_or_default()
}

/// Join all values of an attribute iterator with commas; `None` when the DN
/// has no such attribute.
fn join_attrs<'a>(iter: impl Iterator<Item = &'a AttributeTypeAndValue<'a>>) -> Option<String> {
    let values: Vec<&str> = iter.filter_map(|attr| attr.as_str().ok()).collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(","))
    }
}

fn join_attrs_by_oid(name: &X509Name, oid: &Oid) -> Option<String> {
    let values: Vec<&str> = name
        .iter_attributes()
        .filter(|attr| attr.attr_type() == oid)
        .filter_map(|attr| attr.as_str().ok())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(","))
    }
}

/// Colon-separated uppercase hex digest of `data`.
fn hash_fingerprint(data: &[u8], digest: MessageDigest) -> Result<String> {
    let bytes = hash(digest, data)?;
    Ok(colon_hex_upper(&bytes))
}

fn colon_hex_upper(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Uppercase hex serial, minimal digits, left-padded to even length.
fn format_serial(raw_serial: &[u8]) -> String {
    let hex: String = raw_serial.iter().map(|b| format!("{:02X}", b)).collect();
    let trimmed = hex.trim_start_matches('0');
    let serial = if trimmed.is_empty() { "0" } else { trimmed };

    if serial.len() % 2 == 1 {
        format!("0{}", serial)
    } else {
        serial.to_string()
    }
}

/// `keyid:` prefixed colon-separated lowercase hex, used for the Subject
/// Key Identifier.
fn format_key_id(key_id: &[u8]) -> String {
    let pairs: Vec<String> = key_id.iter().map(|b| format!("{:02x}", b)).collect();
    format!("keyid:{}", pairs.join(":"))
}

/// Plain lowercase hex without separators, used for the Authority Key
/// Identifier and as the CA-owner lookup key.
fn format_key_id_short(key_id: &[u8]) -> String {
    key_id.iter().map(|b| format!("{:02x}", b)).collect()
}

fn key_usage_to_string(ku: &KeyUsage) -> String {
    let mut parts = Vec::new();

    if ku.digital_signature() {
        parts.push("Digital Signature");
    }
    if ku.non_repudiation() {
        parts.push("Content Commitment");
    }
    if ku.key_encipherment() {
        parts.push("Key Encipherment");
    }
    if ku.data_encipherment() {
        parts.push("Data Encipherment");
    }
    if ku.key_agreement() {
        parts.push("Key Agreement");
    }
    if ku.key_cert_sign() {
        parts.push("Certificate Signing");
    }
    if ku.crl_sign() {
        parts.push("CRL Signing");
    }
    if ku.encipher_only() {
        parts.push("Encipher Only");
    }
    if ku.decipher_only() {
        parts.push("Decipher Only");
    }

    parts.join(", ")
}

fn format_ip(bytes: &[u8]) -> Option<String> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(Ipv4Addr::from(octets).to_string())
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(Ipv6Addr::from(octets).to_string())
        }
        _ => None,
    }
}

/// Canonical signature algorithm name for a non-PSS algorithm OID.
fn signature_name_for(oid: &str) -> Option<&'static str> {
    let name = match oid {
        "1.2.840.113549.1.1.2" => "MD2WithRSA",
        "1.2.840.113549.1.1.4" => "MD5WithRSA",
        "1.2.840.113549.1.1.5" | "1.3.14.3.2.29" => "SHA1WithRSA",
        "1.2.840.113549.1.1.11" => "SHA256WithRSA",
        "1.2.840.113549.1.1.12" => "SHA384WithRSA",
        "1.2.840.113549.1.1.13" => "SHA512WithRSA",
        "1.2.840.10040.4.3" => "DSAWithSHA1",
        "2.16.840.1.101.3.4.3.2" => "DSAWithSHA256",
        "1.2.840.10045.4.1" => "ECDSAWithSHA1",
        "1.2.840.10045.4.3.2" => "ECDSAWithSHA256",
        "1.2.840.10045.4.3.3" => "ECDSAWithSHA384",
        "1.2.840.10045.4.3.4" => "ECDSAWithSHA512",
        "1.3.101.112" => "PureEd25519",
        _ => return None,
    };
    Some(name)
}

fn signature_algorithm_name(alg: &AlgorithmIdentifier) -> String {
    let oid_str = alg.algorithm.to_id_string();

    if oid_str == "1.2.840.113549.1.1.10" {
        // RSASSA-PSS carries the digest in its parameters
        if let Ok(SignatureAlgorithm::RSASSA_PSS(params)) = SignatureAlgorithm::try_from(alg) {
            return match params.hash_algorithm_oid().to_id_string().as_str() {
                "2.16.840.1.101.3.4.2.1" => "SHA256WithRSAPSS",
                "2.16.840.1.101.3.4.2.2" => "SHA384WithRSAPSS",
                "2.16.840.1.101.3.4.2.3" => "SHA512WithRSAPSS",
                _ => "unknown",
            }
            .to_string();
        }
        return "unknown".to_string();
    }

    signature_name_for(&oid_str).unwrap_or("unknown").to_string()
}

/// Public key algorithm and size, e.g. "RSA2048", "ECDSA256".
fn key_type_for(spki: &SubjectPublicKeyInfo) -> String {
    match spki.parsed() {
        Ok(PublicKey::RSA(rsa)) => format!("RSA{}", big_int_bit_len(rsa.modulus)),
        Ok(PublicKey::DSA(y)) => format!("DSA{}", big_int_bit_len(y)),
        Ok(PublicKey::EC(point)) => format!("ECDSA{}", ec_x_bit_len(point.data())),
        _ => "Unknown".to_string(),
    }
}

/// Bit length of a big-endian unsigned integer.
fn big_int_bit_len(bytes: &[u8]) -> usize {
    let mut idx = 0;
    while idx < bytes.len() && bytes[idx] == 0 {
        idx += 1;
    }
    if idx == bytes.len() {
        return 0;
    }
    (bytes.len() - idx - 1) * 8 + (8 - bytes[idx].leading_zeros() as usize)
}

/// Bit length of the X coordinate of an uncompressed EC point.
fn ec_x_bit_len(point: &[u8]) -> usize {
    if point.len() > 1 && point[0] == 0x04 {
        let coord_len = (point.len() - 1) / 2;
        big_int_bit_len(&point[1..1 + coord_len])
    } else {
        big_int_bit_len(point)
    }
}
