//! [`MessagingGateway`] over the Telegram Bot API.
//!
//! Content is sent with `parse_mode = HTML`. A job may carry its own bot token
//! (`SendTarget::bot_token`); photo ids belong to the bot that received them,
//! so photos sent under another identity are downloaded with the default bot
//! and re-uploaded.

use async_trait::async_trait;
use cronpost_core::config::TelegramConfig;
use cronpost_scheduler::{GatewayError, MessagingGateway, PhotoItem, PollContent, SendTarget};
use reqwest::multipart::{Form, Part};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::api::{BotApi, SentMessage};
use crate::error::TelegramError;

const PARSE_MODE: &str = "HTML";

pub struct TelegramGateway {
    api: BotApi,
    default_token: String,
}

impl TelegramGateway {
    pub fn new(config: &TelegramConfig) -> Result<Self, TelegramError> {
        if config.bot_token.is_empty() {
            return Err(TelegramError::NoToken);
        }
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            api: BotApi::new(client, &config.api_base),
            default_token: config.bot_token.clone(),
        })
    }

    fn token<'a>(&'a self, target: &'a SendTarget) -> &'a str {
        target.bot_token.as_deref().unwrap_or(&self.default_token)
    }

    fn needs_reupload(&self, target: &SendTarget) -> bool {
        target
            .bot_token
            .as_deref()
            .is_some_and(|token| token != self.default_token)
    }

    async fn photo_part(&self, photo_id: &str, index: usize) -> Result<Part, TelegramError> {
        let bytes = self.api.download(&self.default_token, photo_id).await?;
        debug!(photo_id, size = bytes.len(), "re-uploading photo");
        Ok(Part::bytes(bytes).file_name(format!("photo{index}.jpg")))
    }

    async fn upload_photo(
        &self,
        target: &SendTarget,
        photo_id: &str,
        caption: &str,
    ) -> Result<SentMessage, TelegramError> {
        let mut form = target_form(target).part("photo", self.photo_part(photo_id, 0).await?);
        if !caption.is_empty() {
            form = form.text("caption", caption.to_string()).text("parse_mode", PARSE_MODE);
        }
        self.api
            .call_multipart(self.token(target), "sendPhoto", form)
            .await
    }

    async fn upload_photo_group(
        &self,
        target: &SendTarget,
        items: &[PhotoItem],
    ) -> Result<Vec<SentMessage>, TelegramError> {
        let attached: Vec<PhotoItem> = items
            .iter()
            .enumerate()
            .map(|(i, item)| PhotoItem {
                photo_id: format!("attach://photo{i}"),
                caption: item.caption.clone(),
            })
            .collect();

        let mut form = target_form(target).text("media", media_json(&attached).to_string());
        for (i, item) in items.iter().enumerate() {
            form = form.part(format!("photo{i}"), self.photo_part(&item.photo_id, i).await?);
        }
        self.api
            .call_multipart(self.token(target), "sendMediaGroup", form)
            .await
    }
}

fn target_body(target: &SendTarget) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("chat_id".into(), json!(target.chat_id));
    if let Some(thread) = target.message_thread_id {
        body.insert("message_thread_id".into(), json!(thread));
    }
    body
}

fn target_form(target: &SendTarget) -> Form {
    let form = Form::new().text("chat_id", target.chat_id.to_string());
    match target.message_thread_id {
        Some(thread) => form.text("message_thread_id", thread.to_string()),
        None => form,
    }
}

pub fn text_body(target: &SendTarget, text: &str) -> Value {
    let mut body = target_body(target);
    body.insert("text".into(), json!(text));
    body.insert("parse_mode".into(), json!(PARSE_MODE));
    Value::Object(body)
}

pub fn photo_body(target: &SendTarget, photo_id: &str, caption: &str) -> Value {
    let mut body = target_body(target);
    body.insert("photo".into(), json!(photo_id));
    if !caption.is_empty() {
        body.insert("caption".into(), json!(caption));
        body.insert("parse_mode".into(), json!(PARSE_MODE));
    }
    Value::Object(body)
}

fn media_json(items: &[PhotoItem]) -> Value {
    let media: Vec<Value> = items
        .iter()
        .map(|item| {
            let mut m = json!({ "type": "photo", "media": item.photo_id });
            if let Some(caption) = item.caption.as_deref().filter(|c| !c.is_empty()) {
                m["caption"] = json!(caption);
                m["parse_mode"] = json!(PARSE_MODE);
            }
            m
        })
        .collect();
    Value::Array(media)
}

pub fn media_group_body(target: &SendTarget, items: &[PhotoItem]) -> Value {
    let mut body = target_body(target);
    body.insert("media".into(), media_json(items));
    Value::Object(body)
}

pub fn poll_body(target: &SendTarget, poll: &PollContent) -> Value {
    let mut body = target_body(target);
    let options: Vec<Value> = poll
        .options
        .iter()
        .map(|o| json!({ "text": o.text() }))
        .collect();
    body.insert("question".into(), json!(poll.question));
    body.insert("options".into(), Value::Array(options));
    body.insert("is_anonymous".into(), json!(poll.is_anonymous));
    body.insert("type".into(), json!(poll.poll_type));
    body.insert("allows_multiple_answers".into(), json!(poll.allows_multiple_answers));
    if let Some(id) = poll.correct_option_id {
        body.insert("correct_option_id".into(), json!(id));
    }
    if let Some(explanation) = &poll.explanation {
        body.insert("explanation".into(), json!(explanation));
        body.insert("explanation_parse_mode".into(), json!(PARSE_MODE));
    }
    if let Some(period) = poll.open_period {
        body.insert("open_period".into(), json!(period));
    }
    if let Some(close) = poll.close_date {
        body.insert("close_date".into(), json!(close));
    }
    if poll.is_closed {
        body.insert("is_closed".into(), json!(true));
    }
    Value::Object(body)
}

#[async_trait]
impl MessagingGateway for TelegramGateway {
    async fn send_text(&self, target: &SendTarget, text: &str) -> Result<String, GatewayError> {
        let sent: SentMessage = self
            .api
            .call(self.token(target), "sendMessage", &text_body(target, text))
            .await?;
        Ok(sent.message_id.to_string())
    }

    async fn send_photo(
        &self,
        target: &SendTarget,
        photo_id: &str,
        caption: &str,
    ) -> Result<String, GatewayError> {
        let sent = if self.needs_reupload(target) {
            self.upload_photo(target, photo_id, caption).await?
        } else {
            self.api
                .call(self.token(target), "sendPhoto", &photo_body(target, photo_id, caption))
                .await?
        };
        Ok(sent.message_id.to_string())
    }

    async fn send_photo_group(
        &self,
        target: &SendTarget,
        items: &[PhotoItem],
    ) -> Result<Vec<String>, GatewayError> {
        let sent: Vec<SentMessage> = if self.needs_reupload(target) {
            self.upload_photo_group(target, items).await?
        } else {
            self.api
                .call(self.token(target), "sendMediaGroup", &media_group_body(target, items))
                .await?
        };
        Ok(sent.iter().map(|m| m.message_id.to_string()).collect())
    }

    async fn send_poll(&self, target: &SendTarget, poll: &PollContent) -> Result<String, GatewayError> {
        let sent: SentMessage = self
            .api
            .call(self.token(target), "sendPoll", &poll_body(target, poll))
            .await?;
        Ok(sent.message_id.to_string())
    }

    async fn delete_message(&self, target: &SendTarget, message_id: &str) -> Result<(), GatewayError> {
        let message_id: i64 = message_id
            .parse()
            .map_err(|_| GatewayError::decode(format!("not a message id: {message_id}")))?;
        let _: bool = self
            .api
            .call(
                self.token(target),
                "deleteMessage",
                &json!({ "chat_id": target.chat_id, "message_id": message_id }),
            )
            .await?;
        Ok(())
    }
}
