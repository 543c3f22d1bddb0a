//! Cloudflare Turnstile siteverify client

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const SITEVERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";

/// Always-pass keys published for testing
pub const TEST_SITE_KEY: &str = "1x00000000000000000000AA";
pub const TEST_SECRET: &str = "1x0000000000000000000000000000000AA";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SiteVerifyResponse {
    pub success: bool,
    #[serde(rename = "error-codes", default)]
    pub error_codes: Vec<String>,
    #[serde(default)]
    pub challenge_ts: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub cdata: Option<String>,
}

/// The provider could not give a verdict
#[derive(Error, Debug)]
pub enum ChallengeError {
    #[error("siteverify request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("siteverify response unreadable: {0}")]
    Decode(#[source] reqwest::Error),
}

#[derive(Clone)]
pub struct TurnstileClient {
    http: reqwest::Client,
    secret: String,
    verify_url: String,
}

impl TurnstileClient {
    pub fn new(secret: &str) -> Self {
        Self::with_url(secret, SITEVERIFY_URL)
    }

    pub fn with_url(secret: &str, verify_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            secret: secret.to_string(),
            verify_url: verify_url.to_string(),
        }
    }

    /// Ask the provider whether `token` is a solved challenge
    pub async fn verify(
        &self,
        token: &str,
        remote_ip: Option<&str>,
    ) -> Result<SiteVerifyResponse, ChallengeError> {
        let mut form = vec![("secret", self.secret.as_str()), ("response", token)];
        if let Some(ip) = remote_ip {
            form.push(("remoteip", ip));
        }

        let response = self
            .http
            .post(&self.verify_url)
            .form(&form)
            .send()
            .await
            .map_err(ChallengeError::Transport)?;

        let verdict: SiteVerifyResponse = response.json().await.map_err(ChallengeError::Decode)?;
        debug!(
            "Turnstile verdict: success={} errors={:?}",
            verdict.success, verdict.error_codes
        );
        Ok(verdict)
    }
}
