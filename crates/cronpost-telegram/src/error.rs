use cronpost_scheduler::GatewayError;

/// Errors produced by the Telegram Bot API client.
#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// `ok: false` from the Bot API.
    #[error("Bot API error ({status}): {description}")]
    Api { status: u16, description: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("no bot token configured")]
    NoToken,
}

impl From<TelegramError> for GatewayError {
    fn from(err: TelegramError) -> Self {
        match err {
            TelegramError::Http(e) if e.is_timeout() => GatewayError::timeout(e.to_string()),
            TelegramError::Http(e) => match e.status() {
                Some(status) => GatewayError::api(status.as_u16(), e.to_string()),
                None => GatewayError::network(e.to_string()),
            },
            TelegramError::Api {
                status,
                description,
            } => GatewayError::api(status, description),
            TelegramError::Parse(msg) => GatewayError::decode(msg),
            TelegramError::NoToken => GatewayError::api(401, "no bot token configured"),
        }
    }
}
