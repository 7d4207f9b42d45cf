//! Telegram Bot API implementation of the cronpost messaging gateway.

pub mod api;
pub mod error;
pub mod gateway;

pub use error::TelegramError;
pub use gateway::TelegramGateway;
