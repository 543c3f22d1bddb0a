//! Process configuration, read from flags or the environment

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::error::{BotError, Result};
use crate::verification::TransitionPolicy;
use crate::web::turnstile::{TEST_SECRET, TEST_SITE_KEY};

/// Telegram bot that admits users to groups after a human check
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Bot API token
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    pub bot_token: String,

    /// Skip the Telegram identity check on the verification endpoint
    #[arg(long, env = "TESTING")]
    pub testing: bool,

    /// Bot API base address
    #[arg(long, env = "API_ADDR", default_value = "https://api.telegram.org")]
    pub api_addr: String,

    /// SQLite database file
    #[arg(long, env = "DATABASE_PATH", default_value = "./data.sqlite")]
    pub database_path: PathBuf,

    /// Address the verification page listens on
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8532")]
    pub listen_addr: SocketAddr,

    /// TLS certificate chain (PEM); requires --tls-key
    #[arg(long, env = "TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key (PEM); requires --tls-cert
    #[arg(long, env = "TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    #[arg(long, env = "TURNSTILE_SITE_KEY")]
    pub turnstile_site_key: Option<String>,

    #[arg(long, env = "TURNSTILE_SECRET", hide_env_values = true)]
    pub turnstile_secret: Option<String>,

    /// Whether a resolved verification can change outcome again
    #[arg(long, env = "TRANSITION_POLICY", value_enum, default_value_t = TransitionPolicy::TerminalIsFinal)]
    pub transition_policy: TransitionPolicy,
}

/// Paths of the PEM files used to serve HTTPS
#[derive(Debug, Clone, PartialEq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl Config {
    /// Check cross-field rules and fill in the Turnstile test keys when unset
    pub fn validate(mut self) -> Result<Self> {
        if self.bot_token.trim().is_empty() {
            return Err(BotError::ConfigValidation {
                message: "BOT_TOKEN must not be empty".to_string(),
            });
        }

        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(BotError::ConfigValidation {
                message: "TLS_CERT and TLS_KEY must be set together".to_string(),
            });
        }

        let site_key = self.turnstile_site_key.as_deref().unwrap_or_default();
        let secret = self.turnstile_secret.as_deref().unwrap_or_default();
        if site_key.is_empty() || secret.is_empty() {
            warn!("Turnstile keys not configured, using the always-pass test keys");
            self.turnstile_site_key = Some(TEST_SITE_KEY.to_string());
            self.turnstile_secret = Some(TEST_SECRET.to_string());
        }

        Ok(self)
    }

    pub fn tls(&self) -> Option<TlsPaths> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.clone(),
                key: key.clone(),
            }),
            _ => None,
        }
    }

    pub fn site_key(&self) -> &str {
        self.turnstile_site_key.as_deref().unwrap_or(TEST_SITE_KEY)
    }

    pub fn turnstile_secret(&self) -> &str {
        self.turnstile_secret.as_deref().unwrap_or(TEST_SECRET)
    }

    /// Log the effective configuration with secrets masked
    pub fn log_summary(&self) {
        info!("Config:");
        info!("  bot token:        {}", mask_secret(&self.bot_token));
        info!("  testing:          {}", self.testing);
        info!("  api address:      {}", self.api_addr);
        info!("  database:         {}", self.database_path.display());
        info!("  listen address:   {}", self.listen_addr);
        info!("  tls:              {}", if self.tls().is_some() { "enabled" } else { "disabled" });
        info!("  turnstile site:   {}", self.site_key());
        info!("  turnstile secret: {}", mask_secret(self.turnstile_secret()));
        info!("  transitions:      {:?}", self.transition_policy);
        if self.testing {
            warn!("Testing mode: identity checks on /verify are disabled");
        }
    }
}

/// Keep the first and last four characters of long secrets
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() < 12 {
        return "*****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}*****{}", head, tail)
}
