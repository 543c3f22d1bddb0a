//! Web server for the verification mini app
//!
//! Serves the challenge page and checks solved challenges for users whose
//! Telegram identity is proven by signed init data.

pub mod auth;
mod server;
pub mod turnstile;

pub use server::{start_web_server, AppState, WebServerConfig};
pub use turnstile::TurnstileClient;
