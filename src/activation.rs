//! Activation gate: is this installation allowed to submit jobs?
//!
//! A deliberately thin collaborator. The embedding layer (web handler,
//! CLI) asks it a yes/no question before accepting an upload; the
//! orchestration core itself never consults it. The allow-list lives
//! behind an HTTP endpoint as newline-separated hardware ids; any failure
//! to fetch or read it answers "not activated" — the gate fails closed.

use std::time::Duration;
use tracing::warn;

/// Checks a hardware id against a remotely hosted allow-list.
pub struct ActivationClient {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl ActivationClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Whether `hardware_id` appears in the allow-list. Fetch or transport
    /// failures log a warning and answer `false`.
    pub async fn is_activated(&self, hardware_id: &str) -> bool {
        let response = match self
            .http
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Activation list unreachable");
                return false;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "Activation list fetch failed");
            return false;
        }

        match response.text().await {
            Ok(body) => list_contains(&body, hardware_id),
            Err(e) => {
                warn!(error = %e, "Activation list unreadable");
                false
            }
        }
    }
}

/// Membership test over a newline-separated id list.
fn list_contains(body: &str, hardware_id: &str) -> bool {
    body.lines().any(|line| line.trim() == hardware_id)
}
