use serde::{Deserialize, Serialize};

/// How `Job::content` is to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// `content` is HTML text.
    Text,
    /// `photo_id` is one photo handle; `content` is its HTML caption.
    SinglePhoto,
    /// `photo_id` is `;`-joined photo handles; `content` captions the first.
    PhotoGroup,
    /// `content` is a serialized [`PollContent`].
    Poll,
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContentType::Text => "text",
            ContentType::SinglePhoto => "single_photo",
            ContentType::PhotoGroup => "photo_group",
            ContentType::Poll => "poll",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(ContentType::Text),
            "single_photo" => Ok(ContentType::SinglePhoto),
            "photo_group" => Ok(ContentType::PhotoGroup),
            "poll" => Ok(ContentType::Poll),
            other => Err(format!("unknown content type: {other}")),
        }
    }
}

/// One entry of a job's append-only delivery error history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error: String,
    pub timestamp: String,
}

/// A persisted scheduled message.
///
/// Empty strings mean "unset" for the `*_ts` lifecycle fields, matching the
/// due-job predicate: `removed_ts == "" AND paused_ts == "" AND crontab != ""`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Store-assigned identifier (UUID v4 in the SQLite store).
    pub id: String,
    pub chat_id: i64,
    /// When set, messages go to this channel on behalf of `chat_id`.
    pub channel_id: Option<i64>,
    /// Unique within a chat, case-sensitive.
    pub jobname: String,

    /// 5-field crontab; `""` until the owner attaches a schedule.
    pub crontab: String,
    /// Next fire time in the canonical timezone.
    pub nextrun_ts: String,
    /// Same instant as `nextrun_ts`, in the chat's timezone. Display only.
    pub user_nextrun_ts: String,
    pub paused_ts: String,
    /// IANA timezone of the owning chat.
    pub timezone: String,

    pub content: String,
    pub content_type: ContentType,
    pub photo_id: String,
    pub photo_group_id: String,

    /// `;`-joined when the last delivery was a photo group.
    pub previous_message_id: String,
    pub option_delete_previous: bool,
    /// Alternate sender identity.
    pub user_bot_token: Option<String>,
    pub message_thread_id: Option<i64>,

    /// Lease marker; `""` when no dispatch attempt is in flight.
    pub pending_ts: String,
    pub removed_ts: String,
    pub errors: Vec<ErrorRecord>,

    pub created_by: i64,
    pub last_updated_by: i64,
    pub created_ts: String,
    pub last_update_ts: String,
}

impl Job {
    /// Chat or channel the message is posted to.
    pub fn target_chat_id(&self) -> i64 {
        self.channel_id.unwrap_or(self.chat_id)
    }

    /// Ids of the previous delivery, split on `;`.
    pub fn previous_message_ids(&self) -> Vec<&str> {
        split_ids(&self.previous_message_id)
    }

    /// Photo handles, split on `;`.
    pub fn photo_ids(&self) -> Vec<&str> {
        split_ids(&self.photo_id)
    }
}

/// Fields supplied by the job-creation flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub chat_id: i64,
    pub channel_id: Option<i64>,
    pub jobname: String,
    pub content: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub photo_id: String,
    #[serde(default)]
    pub photo_group_id: String,
    #[serde(default)]
    pub option_delete_previous: bool,
    pub user_bot_token: Option<String>,
    pub message_thread_id: Option<i64>,
    pub created_by: i64,
}

/// Structured poll description stored (as JSON) in `Job::content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollContent {
    pub question: String,
    pub options: Vec<PollOption>,
    #[serde(default = "default_true")]
    pub is_anonymous: bool,
    /// `"regular"` or `"quiz"`.
    #[serde(rename = "type", default = "default_poll_type")]
    pub poll_type: String,
    #[serde(default)]
    pub allows_multiple_answers: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_option_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_period: Option<u32>,
    /// Unix timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_date: Option<i64>,
    #[serde(default)]
    pub is_closed: bool,
}

/// Poll options are stored either as bare strings or as platform option
/// objects (`{"text": "...", "voter_count": 0}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PollOption {
    Text(String),
    Object { text: String },
}

impl PollOption {
    pub fn text(&self) -> &str {
        match self {
            PollOption::Text(text) | PollOption::Object { text } => text,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_type() -> String {
    "regular".to_string()
}

pub(crate) fn split_ids(joined: &str) -> Vec<&str> {
    joined
        .split(';')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .collect()
}
