// CT Log Directory Client
//
// Fetches the canonical CT log list and yields one descriptor per
// operator/log pair.

use super::{normalize_ctlog_url, Result};
use crate::error::CtError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// A single CT log as listed in the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogDescriptor {
    pub operator: String,
    pub name: String,
    pub url: String,
    pub normalized_url: String,
}

/// CT log directory client
pub struct LogListClient {
    client: reqwest::Client,
    log_list_url: String,
}

impl LogListClient {
    pub fn new(log_list_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(super::client::USER_AGENT)
            .build()
            .map_err(|e| CtError::ClientConstruction {
                details: e.to_string(),
            })?;

        Ok(Self {
            client,
            log_list_url: log_list_url.into(),
        })
    }

    /// Fetch the log list and flatten it into descriptors. Any fetch or
    /// decode failure is returned to the caller; the discovery sweep logs
    /// it and retries on its next tick.
    pub async fn fetch_logs(&self) -> Result<Vec<LogDescriptor>> {
        let response = self.client.get(&self.log_list_url).send().await?;

        if !response.status().is_success() {
            return Err(CtError::Http {
                status: response.status().as_u16(),
                details: format!(
                    "Log list request failed with status: {}",
                    response.status()
                ),
            });
        }

        let log_list: LogList = response
            .json()
            .await
            .map_err(|e| CtError::parse(format!("Failed to parse log list: {}", e)))?;

        debug!("Fetched {} operators from log list", log_list.operators.len());

        let mut descriptors = Vec::new();
        for operator in &log_list.operators {
            for log in &operator.logs {
                descriptors.push(LogDescriptor {
                    operator: operator.name.clone(),
                    name: log
                        .description
                        .clone()
                        .unwrap_or_else(|| format!("{} CT Log", operator.name)),
                    url: log.url.clone(),
                    normalized_url: normalize_ctlog_url(&log.url),
                });
            }
        }

        Ok(descriptors)
    }
}

// Log list JSON structures (v3 format)
#[derive(Debug, Deserialize)]
struct LogList {
    operators: Vec<Operator>,
}

#[derive(Debug, Deserialize)]
struct Operator {
    name: String,
    #[serde(default)]
    logs: Vec<Log>,
}

#[derive(Debug, Deserialize)]
struct Log {
    description: Option<String>,
    url: String,
}
