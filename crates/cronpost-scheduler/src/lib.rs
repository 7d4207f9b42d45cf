//! `cronpost-scheduler` — dispatch engine for recurring chat messages.
//!
//! # Overview
//!
//! Jobs live in a [`store::JobStore`] (SQLite in [`db`]). Each call to
//! [`engine::DispatchEngine::run_dispatch_cycle`] selects the jobs whose
//! `nextrun_ts` has arrived, claims a lease on each, sends its content through
//! a [`gateway::MessagingGateway`], and writes the next run back in the same
//! update that releases the lease.
//!
//! # Content types
//!
//! | Type           | Gateway call                                      |
//! |----------------|---------------------------------------------------|
//! | `text`         | `send_text` with HTML parse mode                  |
//! | `single_photo` | `send_photo`, `content` as caption                |
//! | `photo_group`  | one `send_photo_group`, caption on the first item |
//! | `poll`         | `send_poll` from the JSON in `content`            |

pub mod crontab;
pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod lease;
pub mod reschedule;
pub mod retry;
pub mod store;
pub mod types;

pub use db::SqliteJobStore;
pub use engine::{CycleSummary, DispatchEngine, EngineConfig};
pub use error::{Result, SchedulerError};
pub use gateway::{GatewayError, MessagingGateway, PhotoItem, SendTarget};
pub use store::JobStore;
pub use types::{ContentType, ErrorRecord, Job, NewJob, PollContent, PollOption};
