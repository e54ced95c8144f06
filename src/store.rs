use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    ChatTurn, GlobalSettings, NewViolation, Role, Session, Student, UsageEntry, ViolationEvent,
};
use crate::usage::UsageTotals;

/// Persistence used by the accounting and chat pipeline. `Database` is the
/// production implementation; tests substitute their own.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_student(&self, email: &str) -> Result<Option<Student>>;
    async fn upsert_student(&self, student: &Student) -> Result<()>;
    async fn list_students(&self) -> Result<Vec<Student>>;

    async fn get_settings(&self) -> Result<GlobalSettings>;
    async fn update_settings(&self, settings: &GlobalSettings) -> Result<()>;

    async fn append_usage(&self, entry: &UsageEntry) -> Result<()>;
    /// Token and cost sums over `[since, until)`. `None` means every student.
    async fn usage_totals(
        &self,
        student_email: Option<&str>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<UsageTotals>;

    async fn append_violation(&self, violation: &NewViolation) -> Result<ViolationEvent>;
    async fn get_violation(&self, id: &str) -> Result<Option<ViolationEvent>>;
    /// Moves a flagged event to proceeded. Returns `None` when no flagged
    /// event with that id exists.
    async fn mark_violation_proceeded(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ViolationEvent>>;
    async fn list_violations(&self, limit: i64) -> Result<Vec<ViolationEvent>>;

    async fn create_session(&self, student_email: &str, character_id: &str) -> Result<Session>;
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>>;
    async fn save_message(&self, session_id: &str, role: Role, content: &str) -> Result<()>;
    async fn latest_messages(&self, session_id: &str, limit: i64) -> Result<Vec<ChatTurn>>;
}
