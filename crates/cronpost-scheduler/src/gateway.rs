//! Messaging Gateway seam: the chat-platform calls the dispatcher needs.

use async_trait::async_trait;

use crate::types::PollContent;

/// Where (and as whom) a message is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendTarget {
    pub chat_id: i64,
    pub message_thread_id: Option<i64>,
    /// Alternate sender identity; `None` uses the gateway's default.
    pub bot_token: Option<String>,
}

/// One photo in a grouped send. Only the first item of a group carries a caption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoItem {
    pub photo_id: String,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// The platform answered with a non-success status.
    Api,
    /// Connection, DNS or TLS failure; no status available.
    Network,
    /// The call did not finish within its deadline.
    Timeout,
    /// The platform answered but the body could not be understood.
    Decode,
}

/// Failure reported by a [`MessagingGateway`] call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", self.render())]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    /// HTTP status (or the platform's `error_code`) when the platform answered.
    pub status: Option<u16>,
    pub description: String,
}

impl GatewayError {
    pub fn api(status: u16, description: impl Into<String>) -> Self {
        Self {
            kind: GatewayErrorKind::Api,
            status: Some(status),
            description: description.into(),
        }
    }

    pub fn network(description: impl Into<String>) -> Self {
        Self {
            kind: GatewayErrorKind::Network,
            status: None,
            description: description.into(),
        }
    }

    pub fn timeout(description: impl Into<String>) -> Self {
        Self {
            kind: GatewayErrorKind::Timeout,
            status: None,
            description: description.into(),
        }
    }

    pub fn decode(description: impl Into<String>) -> Self {
        Self {
            kind: GatewayErrorKind::Decode,
            status: None,
            description: description.into(),
        }
    }

    /// 5xx answers, network failures and timeouts are worth retrying;
    /// every 4xx (429 included) is final for this cycle.
    pub fn is_transient(&self) -> bool {
        match self.kind {
            GatewayErrorKind::Api => self.status.is_some_and(|s| s >= 500),
            GatewayErrorKind::Network | GatewayErrorKind::Timeout => true,
            GatewayErrorKind::Decode => false,
        }
    }

    fn render(&self) -> String {
        match (self.kind, self.status) {
            (_, Some(status)) => format!("status {status}: {}", self.description),
            (GatewayErrorKind::Network, None) => format!("network error: {}", self.description),
            (GatewayErrorKind::Timeout, None) => format!("timeout: {}", self.description),
            (_, None) => self.description.clone(),
        }
    }
}


/// Chat platform operations used by the content dispatcher.
///
/// Every call returns the platform message id(s) of what was delivered.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Send HTML-formatted text.
    async fn send_text(&self, target: &SendTarget, text: &str) -> Result<String, GatewayError>;

    /// Send one photo with an HTML caption.
    async fn send_photo(
        &self,
        target: &SendTarget,
        photo_id: &str,
        caption: &str,
    ) -> Result<String, GatewayError>;

    /// Send several photos as one album. Returns one id per item, in order.
    async fn send_photo_group(
        &self,
        target: &SendTarget,
        items: &[PhotoItem],
    ) -> Result<Vec<String>, GatewayError>;

    async fn send_poll(&self, target: &SendTarget, poll: &PollContent)
        -> Result<String, GatewayError>;

    async fn delete_message(&self, target: &SendTarget, message_id: &str)
        -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_status() {
        assert!(GatewayError::api(500, "Internal").is_transient());
        assert!(GatewayError::api(502, "Bad Gateway").is_transient());
        assert!(!GatewayError::api(403, "Forbidden: bot was blocked by the user").is_transient());
        assert!(!GatewayError::api(429, "Too Many Requests").is_transient());
        assert!(GatewayError::network("connection reset").is_transient());
        assert!(GatewayError::timeout("30s").is_transient());
        assert!(!GatewayError::decode("not json").is_transient());
    }

    #[test]
    fn display_includes_status() {
        let err = GatewayError::api(400, "Bad Request: chat not found");
        assert_eq!(err.to_string(), "status 400: Bad Request: chat not found");
        assert_eq!(
            GatewayError::timeout("no answer within 30s").to_string(),
            "timeout: no answer within 30s"
        );
        assert_eq!(GatewayError::decode("not json").to_string(), "not json");
    }
}
