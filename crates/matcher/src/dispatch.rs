//! Webhook channel dispatch
//!
//! POSTs the canonical event JSON to the subscription's URL. Retries are
//! bounded and only cover conditions where a retry can help: server errors,
//! connect failures, 408 and 429. Other 4xx answers are final.

use std::time::Duration;

use langhook_protocol::CanonicalEvent;

/// Retry schedule and timeouts for webhook delivery
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Waits before each retry; length bounds the retry count
    pub retry_delays: Vec<Duration>,
    /// Per-attempt request timeout
    pub request_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(4),
                Duration::from_secs(16),
            ],
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl DispatchConfig {
    /// Zero-wait retries, for tests
    pub fn immediate() -> Self {
        Self {
            retry_delays: vec![Duration::ZERO; 3],
            request_timeout: Duration::from_secs(2),
        }
    }
}

/// Final result of a dispatch including retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// True when a 2xx was received
    pub sent: bool,
    /// Last HTTP status observed, if any response arrived
    pub status: Option<u16>,
}

/// Webhook POST client with bounded retries
pub struct WebhookDispatcher {
    client: reqwest::Client,
    config: DispatchConfig,
}

impl WebhookDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    /// Deliver one canonical event
    pub async fn dispatch(&self, url: &str, event: &CanonicalEvent) -> DispatchOutcome {
        let attempts = self.config.retry_delays.len() + 1;
        let mut last_status = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delays[attempt - 1]).await;
            }

            match self.client.post(url).json(event).send().await {
                Ok(response) => {
                    let status = response.status();
                    last_status = Some(status.as_u16());

                    if status.is_success() {
                        return DispatchOutcome {
                            sent: true,
                            status: last_status,
                        };
                    }

                    if !retryable_status(status.as_u16()) {
                        tracing::warn!(
                            url = %url,
                            status = status.as_u16(),
                            "webhook rejected, not retrying"
                        );
                        return DispatchOutcome {
                            sent: false,
                            status: last_status,
                        };
                    }

                    tracing::debug!(
                        url = %url,
                        status = status.as_u16(),
                        attempt = attempt + 1,
                        "webhook attempt failed"
                    );
                }
                Err(e) => {
                    tracing::debug!(
                        url = %url,
                        attempt = attempt + 1,
                        error = %e,
                        "webhook attempt failed to connect"
                    );
                }
            }
        }

        DispatchOutcome {
            sent: false,
            status: last_status,
        }
    }
}

/// 5xx plus the two retry-inviting 4xx codes
fn retryable_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}
