//! Content Dispatcher: turns a job's stored content into exactly one gateway send.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::{
    gateway::{GatewayError, MessagingGateway, PhotoItem, SendTarget},
    types::{ContentType, Job, PollContent},
};

/// Decoded job content. The set of variants is closed; one arm per content type.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Text { text: String },
    SinglePhoto { photo_id: String, caption: String },
    PhotoGroup { items: Vec<PhotoItem> },
    Poll(PollContent),
}

impl Content {
    pub fn from_job(job: &Job) -> Result<Self, DispatchError> {
        let invalid = |reason: String| DispatchError::Content {
            content_type: job.content_type,
            reason,
        };

        match job.content_type {
            ContentType::Text => Ok(Content::Text {
                text: job.content.clone(),
            }),
            ContentType::SinglePhoto => {
                let photo_id = job.photo_id.trim();
                if photo_id.is_empty() {
                    return Err(invalid("no photo id".to_string()));
                }
                Ok(Content::SinglePhoto {
                    photo_id: photo_id.to_string(),
                    caption: job.content.clone(),
                })
            }
            ContentType::PhotoGroup => {
                let ids = job.photo_ids();
                if ids.is_empty() {
                    return Err(invalid("no photo ids".to_string()));
                }
                let items = ids
                    .into_iter()
                    .enumerate()
                    .map(|(i, id)| PhotoItem {
                        photo_id: id.to_string(),
                        caption: (i == 0).then(|| job.content.clone()),
                    })
                    .collect();
                Ok(Content::PhotoGroup { items })
            }
            ContentType::Poll => serde_json::from_str(&job.content)
                .map(Content::Poll)
                .map_err(|e| invalid(format!("poll does not deserialize: {e}"))),
        }
    }
}

/// Why a dispatch attempt failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Stored content cannot be sent as its declared type. Never retried.
    #[error("invalid {content_type} content: {reason}")]
    Content {
        content_type: ContentType,
        reason: String,
    },
}

impl DispatchError {
    pub fn is_transient(&self) -> bool {
        match self {
            DispatchError::Gateway(e) => e.is_transient(),
            DispatchError::Content { .. } => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            DispatchError::Gateway(e) => e.status,
            DispatchError::Content { .. } => None,
        }
    }
}

/// Chat, thread and sender identity for `job`.
pub fn target_for(job: &Job) -> SendTarget {
    SendTarget {
        chat_id: job.target_chat_id(),
        message_thread_id: job.message_thread_id,
        bot_token: job
            .user_bot_token
            .as_ref()
            .filter(|token| !token.is_empty())
            .cloned(),
    }
}

#[derive(Clone)]
pub struct ContentDispatcher {
    gateway: Arc<dyn MessagingGateway>,
    call_timeout: Duration,
}

impl ContentDispatcher {
    pub fn new(gateway: Arc<dyn MessagingGateway>, call_timeout: Duration) -> Self {
        Self {
            gateway,
            call_timeout,
        }
    }

    /// One send of `job`'s content. Returns the delivered message id, or the
    /// `;`-joined ids of a photo group in item order. Does not retry.
    pub async fn send(&self, job: &Job) -> Result<String, DispatchError> {
        let content = Content::from_job(job)?;
        let target = target_for(job);
        debug!(job_id = %job.id, content_type = %job.content_type, chat_id = target.chat_id, "dispatching");

        let gateway = &self.gateway;
        let delivered = match &content {
            Content::Text { text } => self.bounded(gateway.send_text(&target, text)).await?,
            Content::SinglePhoto { photo_id, caption } => {
                self.bounded(gateway.send_photo(&target, photo_id, caption))
                    .await?
            }
            // albums need at least two items on the platform side
            Content::PhotoGroup { items } if items.len() == 1 => {
                let only = &items[0];
                let caption = only.caption.as_deref().unwrap_or_default();
                self.bounded(gateway.send_photo(&target, &only.photo_id, caption))
                    .await?
            }
            Content::PhotoGroup { items } => self
                .bounded(gateway.send_photo_group(&target, items))
                .await?
                .join(";"),
            Content::Poll(poll) => self.bounded(gateway.send_poll(&target, poll)).await?,
        };
        Ok(delivered)
    }

    /// Best-effort removal of the previous delivery when the job asks for it.
    ///
    /// Failures are logged and swallowed; they never turn a successful send
    /// into a failed one. Returns how many messages were deleted.
    pub async fn delete_previous(&self, job: &Job) -> usize {
        if !job.option_delete_previous {
            return 0;
        }
        let target = target_for(job);
        let mut deleted = 0;
        for message_id in job.previous_message_ids() {
            match self
                .bounded(self.gateway.delete_message(&target, message_id))
                .await
            {
                Ok(()) => deleted += 1,
                Err(e) => warn!(
                    job_id = %job.id,
                    message_id,
                    error = %e,
                    "failed to delete previous message"
                ),
            }
        }
        deleted
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::timeout(format!(
                "no answer within {}s",
                self.call_timeout.as_secs()
            ))),
        }
    }
}
