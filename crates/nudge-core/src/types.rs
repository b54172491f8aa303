//! Domain types — users, questions, correlation records, send outcomes.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{NudgeError, Result};

/// Minimum allowed prompt interval. Anything shorter is rejected at write
/// time and never persisted.
pub const MIN_INTERVAL_MINUTES: i64 = 30;

/// A registered end user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Telegram chat/user id — the primary key.
    pub tg_id: i64,
    /// Disabled users are skipped by every scheduler tick.
    pub enabled: bool,
    /// Daily notification window start (time of day).
    pub window_start: NaiveTime,
    /// Daily notification window end (exclusive).
    pub window_end: NaiveTime,
    /// Minimum minutes between prompts for this user's default schedule.
    pub interval_minutes: i64,
    /// Last prompt sent on the user's own schedule, if any.
    pub last_notification_sent: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        tg_id: i64,
        window_start: NaiveTime,
        window_end: NaiveTime,
        interval_minutes: i64,
    ) -> Result<Self> {
        validate_schedule(window_start, window_end, interval_minutes)?;
        Ok(Self {
            tg_id,
            enabled: true,
            window_start,
            window_end,
            interval_minutes,
            last_notification_sent: None,
            created_at: Utc::now(),
        })
    }
}

/// A personalized question belonging to one user.
///
/// Edits never mutate a row: a new version is inserted with
/// `parent_question_id` pointing at its predecessor and the predecessor is
/// deactivated. History stays intact for correlation and reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub user_id: i64,
    /// Unique among the user's *active* questions.
    pub name: String,
    pub text: String,
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
    pub interval_minutes: i64,
    /// At most one active default question per user.
    pub is_default: bool,
    pub active: bool,
    /// Predecessor in the version chain, if this row came from an edit.
    pub parent_question_id: Option<i64>,
    /// Tracked per question, not per user — a user may have several
    /// independently scheduled questions.
    pub last_notification_sent: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Payload for creating (or versioning) a question. Validated before any
/// store write.
#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub user_id: i64,
    pub name: String,
    pub text: String,
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
    pub interval_minutes: i64,
    pub is_default: bool,
}

impl NewQuestion {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(NudgeError::Validation("question name is empty".into()));
        }
        if self.text.trim().is_empty() {
            return Err(NudgeError::Validation("question text is empty".into()));
        }
        validate_schedule(self.window_start, self.window_end, self.interval_minutes)
    }
}

/// Shared schedule validation: interval floor and a non-degenerate window.
pub fn validate_schedule(
    window_start: NaiveTime,
    window_end: NaiveTime,
    interval_minutes: i64,
) -> Result<()> {
    if interval_minutes < MIN_INTERVAL_MINUTES {
        return Err(NudgeError::Validation(format!(
            "interval_minutes must be >= {MIN_INTERVAL_MINUTES}, got {interval_minutes}"
        )));
    }
    if window_start == window_end {
        return Err(NudgeError::Validation(
            "window_start and window_end must differ".into(),
        ));
    }
    Ok(())
}

/// Reply-correlation entry: "a prompt for question Q was sent to user U as
/// outbound message M at time T, valid until T+TTL".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: i64,
    pub user_id: i64,
    pub question_id: i64,
    pub outbound_message_id: i64,
    pub sent_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Append-only reply log entry. `question_id` is None when the reply could
/// not be attributed (expired or unknown correlation) — it is still logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub user_id: i64,
    pub question_id: Option<i64>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// An inbound message from the platform boundary.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub user_id: i64,
    pub text: String,
    pub in_reply_to_message_id: Option<i64>,
}

/// Categorized delivery failure from the messaging platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum SendError {
    /// The user blocked the bot. Terminal for this user.
    #[error("user blocked the bot")]
    Blocked,
    /// Chat no longer exists. Terminal for this user.
    #[error("chat not found")]
    ChatNotFound,
    /// The platform throttled us. Retryable by caller policy.
    #[error("rate limited by the platform")]
    RateLimited,
    /// Network or server-side failure. Retryable by caller policy.
    #[error("transient send failure: {0}")]
    Transient(String),
    /// The platform call exceeded the bounded wait.
    #[error("send timed out")]
    Timeout,
}

impl SendError {
    /// Permanent failures should not be retried for this user at all.
    pub fn is_permanent(&self) -> bool {
        matches!(self, SendError::Blocked | SendError::ChatNotFound)
    }
}

/// Result of one logical "send a prompt" operation. Failure is data, not an
/// exception: callers inspect the outcome and move on.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub success: bool,
    pub outbound_message_id: Option<i64>,
    pub error: Option<SendError>,
}

impl SendOutcome {
    pub fn ok(message_id: i64) -> Self {
        Self {
            success: true,
            outbound_message_id: Some(message_id),
            error: None,
        }
    }

    pub fn failed(error: SendError) -> Self {
        Self {
            success: false,
            outbound_message_id: None,
            error: Some(error),
        }
    }
}

/// Aggregate accounting for one broadcast run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// successful / total, 0.0 when total == 0.
    pub delivery_rate: f64,
}

impl BroadcastResult {
    pub fn new(total: usize, successful: usize, failed: usize) -> Self {
        let delivery_rate = if total == 0 {
            0.0
        } else {
            successful as f64 / total as f64
        };
        Self {
            total,
            successful,
            failed,
            delivery_rate,
        }
    }
}

/// Cumulative counts reported to the progress callback after each batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastProgress {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Admission-control class for user-triggered actions. Scheduler-driven
/// sends are system-triggered and bypass the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionClass {
    General,
    FriendRequest,
    Discovery,
    Admin,
}

impl ActionClass {
    /// `(max_requests, window_seconds)` for the sliding window.
    pub fn limit(&self) -> (usize, u64) {
        match self {
            ActionClass::General => (20, 60),
            ActionClass::FriendRequest => (5, 3600),
            ActionClass::Discovery => (3, 60),
            ActionClass::Admin => (50, 60),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionClass::General => "general",
            ActionClass::FriendRequest => "friend_request",
            ActionClass::Discovery => "discovery",
            ActionClass::Admin => "admin",
        }
    }
}
