//! HTTP client for the external payment provider.
//!
//! The provider exposes two form-encoded endpoints: transaction
//! create (returns a payable reference the actor scans) and status
//! query (pending / paid / failed). Both calls carry a bounded
//! timeout; the poller treats transport errors as retryable, never
//! terminal.

use crate::config::PaymentConfig;
use crate::error::{AppError, AppResult};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

/// Terminal and non-terminal provider states, reduced from the
/// provider's string vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Pending,
    Paid,
    Failed,
}

/// What the provider hands back on transaction create.
#[derive(Debug, Clone)]
pub struct PaymentRef {
    /// Payable reference the adapter renders (e.g. as a QR code).
    pub payable_reference: String,
    /// Provider-side deadline, passed through verbatim for display.
    pub provider_expires_at: String,
}

#[derive(Debug, Deserialize)]
struct ProviderEnvelope {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

pub struct ProviderClient {
    http: Client,
    base_url: String,
    slug: String,
    api_key: String,
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("base_url", &self.base_url)
            .field("slug", &self.slug)
            .finish_non_exhaustive()
    }
}

impl ProviderClient {
    pub fn new(config: &PaymentConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            slug: config.slug.clone(),
            api_key: config.api_key.clone(),
        }
    }

    /// Create a payment transaction for `amount`, keyed by our order
    /// id. Returns the payable reference.
    pub async fn create_transaction(
        &self,
        order_id: &str,
        amount: u64,
    ) -> AppResult<PaymentRef> {
        let url = format!("{}/transaction/create/{}", self.base_url, self.slug);
        debug!(order_id, amount, "creating provider transaction");

        let amount = amount.to_string();
        let form = [
            ("api_key", self.api_key.as_str()),
            ("order_id", order_id),
            ("amount", amount.as_str()),
            ("payment_method", "qris"),
        ];

        let envelope: ProviderEnvelope = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                error!("provider create request failed: {}", e);
                AppError::provider(e.to_string())
            })?
            .json()
            .await
            .map_err(|e| AppError::provider(format!("unreadable create response: {}", e)))?;

        if !envelope.success {
            return Err(AppError::provider(
                envelope.message.unwrap_or_else(|| "create rejected".into()),
            ));
        }

        let data = envelope
            .data
            .ok_or_else(|| AppError::provider("create response missing data"))?;
        let payable_reference = data
            .get("payment_number")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::provider("create response missing payment_number"))?
            .to_string();
        let provider_expires_at = data
            .get("expired_at")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(PaymentRef {
            payable_reference,
            provider_expires_at,
        })
    }

    /// Query the provider for the current status of an order.
    pub async fn check_status(&self, order_id: &str) -> AppResult<ProviderStatus> {
        let url = format!("{}/transaction/status/{}", self.base_url, self.slug);

        let form = [
            ("api_key", self.api_key.as_str()),
            ("order_id", order_id),
        ];

        let envelope: ProviderEnvelope = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::provider(e.to_string()))?
            .json()
            .await
            .map_err(|e| AppError::provider(format!("unreadable status response: {}", e)))?;

        if !envelope.success {
            return Err(AppError::provider(
                envelope.message.unwrap_or_else(|| "status rejected".into()),
            ));
        }

        let status = envelope
            .data
            .as_ref()
            .and_then(|d| d.get("status"))
            .and_then(|v| v.as_str())
            .unwrap_or("pending")
            .to_string();

        Ok(Self::reduce_status(&status))
    }

    fn reduce_status(raw: &str) -> ProviderStatus {
        match raw {
            "paid" | "completed" => ProviderStatus::Paid,
            "failed" | "expired" | "canceled" | "cancelled" => ProviderStatus::Failed,
            _ => ProviderStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_vocabulary_reduces_to_three_states() {
        assert_eq!(ProviderClient::reduce_status("paid"), ProviderStatus::Paid);
        assert_eq!(
            ProviderClient::reduce_status("completed"),
            ProviderStatus::Paid
        );
        assert_eq!(
            ProviderClient::reduce_status("expired"),
            ProviderStatus::Failed
        );
        assert_eq!(
            ProviderClient::reduce_status("processing"),
            ProviderStatus::Pending
        );
    }
}
