use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    // Configuration errors
    #[error("Invalid config: {message}")]
    ConfigValidation { message: String },

    // Store errors
    #[error("Failed to open store at '{path}': {source}")]
    StoreOpen {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    // Telegram errors
    #[error("Telegram API error in {method}: {description}")]
    Telegram { method: String, description: String },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    // Generic errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<std::io::Error> for BotError {
    fn from(err: std::io::Error) -> Self {
        BotError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        BotError::Internal {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
