//! # Nudge Core
//!
//! Shared foundation for the Nudge engine: configuration, the error type,
//! domain types (users, questions, correlation records), and the outbound
//! messaging boundary trait.

pub mod channel;
pub mod config;
pub mod error;
pub mod types;

pub use channel::MessageChannel;
pub use config::NudgeConfig;
pub use error::{NudgeError, Result};
pub use types::{
    ActionClass, Activity, BroadcastProgress, BroadcastResult, Inbound, NewQuestion,
    NotificationRecord, Question, SendError, SendOutcome, User,
};
