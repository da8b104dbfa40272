//! Geo/ISP enrichment for system info displays.
//!
//! Strictly best-effort: the lookup has a short timeout and degrades
//! to "unknown" values rather than failing or stalling its caller.

use crate::config::IpInfoConfig;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    #[serde(default)]
    city: String,
    #[serde(default)]
    isp: String,
    #[serde(default)]
    query: String,
}

/// Enrichment result; fields fall back to "unknown".
#[derive(Debug, Clone)]
pub struct IpInfo {
    pub public_ip: String,
    pub city: String,
    pub isp: String,
}

impl Default for IpInfo {
    fn default() -> Self {
        Self {
            public_ip: "unknown".to_string(),
            city: "unknown".to_string(),
            isp: "unknown".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct IpInfoClient {
    http: Client,
    url: String,
}

impl IpInfoClient {
    pub fn new(config: &IpInfoConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            url: config.url.clone(),
        }
    }

    /// Look up the public address, city and ISP of this host.
    pub async fn lookup(&self) -> IpInfo {
        let response = match self.http.get(&self.url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("IP enrichment lookup failed: {}", e);
                return IpInfo::default();
            }
        };

        match response.json::<IpApiResponse>().await {
            Ok(body) => IpInfo {
                public_ip: non_empty_or_unknown(body.query),
                city: non_empty_or_unknown(body.city),
                isp: non_empty_or_unknown(body.isp),
            },
            Err(e) => {
                warn!("IP enrichment response unreadable: {}", e);
                IpInfo::default()
            }
        }
    }
}

fn non_empty_or_unknown(value: String) -> String {
    if value.trim().is_empty() {
        "unknown".to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fields_fall_back_to_unknown() {
        assert_eq!(non_empty_or_unknown(String::new()), "unknown");
        assert_eq!(non_empty_or_unknown("  ".to_string()), "unknown");
        assert_eq!(non_empty_or_unknown("Jakarta".to_string()), "Jakarta");
    }
}
