//! IP Intelligence Client (spec.md §4.3 S2, §6): a thin `reqwest` wrapper
//! over the IP2Location-shaped provider. The rule evaluation itself is pure
//! and lives in `cloakgate_core::ip_intel`; this module only does the
//! network call, the timeout, and the fail-open fallback.

use std::time::Duration;

use cloakgate_core::ip_intel::IpIntelResponse;
use cloakgate_core::Decision;

#[derive(Clone)]
pub struct IpIntelClient {
    http: reqwest::Client,
    api_host: &'static str,
    api_key: String,
    timeout: Duration,
}

impl IpIntelClient {
    pub fn new(api_host: &'static str, api_key: String, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_host,
            api_key,
            timeout,
        }
    }

    /// Resolve `ip`'s classification. Never returns an error: a transport
    /// failure, a non-2xx response, a deadline miss, or an unparsable body
    /// all collapse to the fail-open `IP_LOOKUP_FAILED` decision (spec.md
    /// §4.3 S3, §5, §7 — the system prioritises not losing human traffic
    /// over provider reliability).
    pub async fn classify(&self, ip: &str) -> Decision {
        match tokio::time::timeout(self.timeout, self.fetch(ip)).await {
            Ok(Ok(response)) => cloakgate_core::ip_intel::evaluate(&response),
            Ok(Err(e)) => {
                tracing::warn!(ip, error = %e, "ip intelligence lookup failed");
                cloakgate_core::ip_intel::lookup_failed()
            }
            Err(_elapsed) => {
                tracing::warn!(ip, timeout_ms = self.timeout.as_millis() as u64, "ip intelligence lookup timed out");
                cloakgate_core::ip_intel::lookup_failed()
            }
        }
    }

    async fn fetch(&self, ip: &str) -> anyhow::Result<IpIntelResponse> {
        let url = format!("https://{}/", self.api_host);
        let response = self
            .http
            .get(url)
            .query(&[("key", self.api_key.as_str()), ("ip", ip), ("format", "json")])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<IpIntelResponse>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_host_fails_open_to_human_low_trust() {
        let client = IpIntelClient::new(
            "127.0.0.1:1", // nothing listens here
            "test-key".to_string(),
            Duration::from_millis(200),
        );
        let decision = client.classify("203.0.113.7").await;
        assert!(!decision.classification.is_bot());
        assert_eq!(decision.reason, "IP_LOOKUP_FAILED");
    }
}
