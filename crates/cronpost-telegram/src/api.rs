//! Minimal Telegram Bot API client: JSON and multipart method calls plus file download.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::TelegramError;

/// The `{ok, result, error_code, description}` envelope every method answers with.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub error_code: Option<u16>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileInfo {
    pub file_id: String,
    pub file_path: Option<String>,
    pub file_size: Option<u64>,
}

/// Decode a method answer. `http_status` is used when the body carries no `error_code`.
pub fn decode_envelope<T: DeserializeOwned>(http_status: u16, body: &str) -> Result<T, TelegramError> {
    let envelope: ApiResponse<T> = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        // proxies and outages answer with HTML; keep the status so 5xx stays retryable
        Err(_) if !(200..300).contains(&http_status) => {
            return Err(TelegramError::Api {
                status: http_status,
                description: truncate(body, 200),
            })
        }
        Err(e) => return Err(TelegramError::Parse(e.to_string())),
    };

    if !envelope.ok {
        return Err(TelegramError::Api {
            status: envelope.error_code.unwrap_or(http_status),
            description: envelope.description.unwrap_or_default(),
        });
    }
    envelope
        .result
        .ok_or_else(|| TelegramError::Parse("ok response without result".to_string()))
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

pub struct BotApi {
    client: reqwest::Client,
    base_url: String,
}

impl BotApi {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn method_url(&self, token: &str, method: &str) -> String {
        format!("{}/bot{token}/{method}", self.base_url)
    }

    /// POST `body` as JSON to `method`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        token: &str,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T, TelegramError> {
        debug!(method, "calling Bot API");
        let resp = self
            .client
            .post(self.method_url(token, method))
            .json(body)
            .send()
            .await?;
        Self::decode(method, resp).await
    }

    /// POST a multipart form to `method` (used to upload photo bytes).
    pub async fn call_multipart<T: DeserializeOwned>(
        &self,
        token: &str,
        method: &str,
        form: reqwest::multipart::Form,
    ) -> Result<T, TelegramError> {
        debug!(method, "calling Bot API with upload");
        let resp = self
            .client
            .post(self.method_url(token, method))
            .multipart(form)
            .send()
            .await?;
        Self::decode(method, resp).await
    }

    /// Fetch the bytes of a file known to the bot owning `token`.
    pub async fn download(&self, token: &str, file_id: &str) -> Result<Vec<u8>, TelegramError> {
        let info: FileInfo = self
            .call(token, "getFile", &serde_json::json!({ "file_id": file_id }))
            .await?;
        let path = info
            .file_path
            .ok_or_else(|| TelegramError::Parse(format!("getFile returned no path for {file_id}")))?;

        let resp = self
            .client
            .get(format!("{}/file/bot{token}/{path}", self.base_url))
            .send()
            .await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            warn!(status, file_id, "file download failed");
            return Err(TelegramError::Api {
                status,
                description: format!("download of {file_id} failed"),
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn decode<T: DeserializeOwned>(
        method: &str,
        resp: reqwest::Response,
    ) -> Result<T, TelegramError> {
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        let decoded = decode_envelope(status, &text);
        if let Err(TelegramError::Api {
            status,
            description,
        }) = &decoded
        {
            warn!(method, status, %description, "Bot API error");
        }
        decoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_yields_result() {
        let msg: SentMessage =
            decode_envelope(200, r#"{"ok":true,"result":{"message_id":812,"chat":{"id":-1}}}"#).unwrap();
        assert_eq!(msg.message_id, 812);
    }

    #[test]
    fn error_envelope_uses_error_code() {
        let err = decode_envelope::<SentMessage>(
            403,
            r#"{"ok":false,"error_code":403,"description":"Forbidden: bot was blocked by the user"}"#,
        )
        .unwrap_err();
        match err {
            TelegramError::Api { status, description } => {
                assert_eq!(status, 403);
                assert!(description.starts_with("Forbidden"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn html_error_page_keeps_http_status() {
        let err = decode_envelope::<SentMessage>(502, "<html>Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, TelegramError::Api { status: 502, .. }));
    }

    #[test]
    fn garbage_on_success_is_a_parse_error() {
        let err = decode_envelope::<SentMessage>(200, "not json").unwrap_err();
        assert!(matches!(err, TelegramError::Parse(_)));
    }

    #[test]
    fn media_group_result_is_a_list() {
        let msgs: Vec<SentMessage> = decode_envelope(
            200,
            r#"{"ok":true,"result":[{"message_id":1},{"message_id":2}]}"#,
        )
        .unwrap();
        assert_eq!(msgs.iter().map(|m| m.message_id).collect::<Vec<_>>(), [1, 2]);
    }

    #[test]
    fn method_url_strips_trailing_slash() {
        let api = BotApi::new(reqwest::Client::new(), "https://api.telegram.org/");
        assert_eq!(
            api.method_url("123:abc", "sendMessage"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }
}
