use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::filter::{Category, Classification, PolicyDecision};
use crate::usage::LimitsInfo;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentFilterMode {
    #[default]
    Normal,
    Strict,
}

impl ContentFilterMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentFilterMode::Normal => "normal",
            ContentFilterMode::Strict => "strict",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "strict" => ContentFilterMode::Strict,
            _ => ContentFilterMode::Normal,
        }
    }
}

/// Whitelisted student. `None` limits are unbounded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Student {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub daily_token_limit: Option<i64>,
    #[serde(default)]
    pub monthly_cost_limit: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GlobalSettings {
    #[serde(default)]
    pub content_filter_mode: ContentFilterMode,
    #[serde(default)]
    pub global_daily_token_limit: Option<i64>,
    #[serde(default)]
    pub global_monthly_cost_limit: Option<Decimal>,
}

/// One metered model call. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageEntry {
    pub student_email: String,
    pub session_id: String,
    pub tokens_used: i64,
    pub cost: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationCategory {
    /// Question judged off-topic for the literature class.
    NonEnglish,
    RateLimit,
    Auth,
}

impl ViolationCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationCategory::NonEnglish => "non-english",
            ViolationCategory::RateLimit => "rate-limit",
            ViolationCategory::Auth => "auth",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "rate-limit" => ViolationCategory::RateLimit,
            "auth" => ViolationCategory::Auth,
            _ => ViolationCategory::NonEnglish,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationStatus {
    Flagged,
    Proceeded,
    Blocked,
}

impl ViolationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationStatus::Flagged => "flagged",
            ViolationStatus::Proceeded => "proceeded",
            ViolationStatus::Blocked => "blocked",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "proceeded" => ViolationStatus::Proceeded,
            "blocked" => ViolationStatus::Blocked,
            _ => ViolationStatus::Flagged,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewViolation {
    pub student_email: String,
    pub session_id: String,
    pub category: ViolationCategory,
    pub detail: String,
    pub question: String,
    pub status: ViolationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViolationEvent {
    pub id: String,
    pub student_email: String,
    pub session_id: String,
    pub category: ViolationCategory,
    pub detail: String,
    pub question: String,
    pub status: ViolationStatus,
    pub timestamp: DateTime<Utc>,
    pub bypassed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub student_email: String,
    pub character_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub student_email: String,
    pub session_id: String,
    pub question: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProceedRequest {
    pub student_email: String,
    pub violation_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AskStatus {
    Answered,
    Blocked,
    LimitReached,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub status: AskStatus,
    pub answer: Option<String>,
    /// User-facing explanation when the question was not answered.
    pub reason: Option<String>,
    /// Event the student can pass to the proceed endpoint after a content block.
    pub violation_id: Option<String>,
    pub category: Option<Category>,
    pub tokens_used: i64,
    pub limits: LimitsInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub student_email: String,
    pub character_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub classification: Classification,
    pub decision: PolicyDecision,
    /// `None` when the settings store could not be read; nothing is blocked then.
    pub mode: Option<ContentFilterMode>,
}

fn default_true() -> bool {
    true
}
