use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::characters::Persona;
use crate::models::{
    ChatTurn, GlobalSettings, NewViolation, Role, Session, Student, UsageEntry, ViolationEvent,
};
use crate::ollama::{Generation, TextGenerator};
use crate::store::RecordStore;
use crate::usage::UsageTotals;

/// Store whose every call fails, as if the database were unreachable.
pub struct FailingStore;

#[async_trait]
impl RecordStore for FailingStore {
    async fn get_student(&self, _email: &str) -> Result<Option<Student>> {
        bail!("store unreachable")
    }
    async fn upsert_student(&self, _student: &Student) -> Result<()> {
        bail!("store unreachable")
    }
    async fn list_students(&self) -> Result<Vec<Student>> {
        bail!("store unreachable")
    }
    async fn get_settings(&self) -> Result<GlobalSettings> {
        bail!("store unreachable")
    }
    async fn update_settings(&self, _settings: &GlobalSettings) -> Result<()> {
        bail!("store unreachable")
    }
    async fn append_usage(&self, _entry: &UsageEntry) -> Result<()> {
        bail!("store unreachable")
    }
    async fn usage_totals(
        &self,
        _student_email: Option<&str>,
        _since: DateTime<Utc>,
        _until: DateTime<Utc>,
    ) -> Result<UsageTotals> {
        bail!("store unreachable")
    }
    async fn append_violation(&self, _violation: &NewViolation) -> Result<ViolationEvent> {
        bail!("store unreachable")
    }
    async fn get_violation(&self, _id: &str) -> Result<Option<ViolationEvent>> {
        bail!("store unreachable")
    }
    async fn mark_violation_proceeded(
        &self,
        _id: &str,
        _at: DateTime<Utc>,
    ) -> Result<Option<ViolationEvent>> {
        bail!("store unreachable")
    }
    async fn list_violations(&self, _limit: i64) -> Result<Vec<ViolationEvent>> {
        bail!("store unreachable")
    }
    async fn create_session(&self, _student_email: &str, _character_id: &str) -> Result<Session> {
        bail!("store unreachable")
    }
    async fn get_session(&self, _session_id: &str) -> Result<Option<Session>> {
        bail!("store unreachable")
    }
    async fn save_message(&self, _session_id: &str, _role: Role, _content: &str) -> Result<()> {
        bail!("store unreachable")
    }
    async fn latest_messages(&self, _session_id: &str, _limit: i64) -> Result<Vec<ChatTurn>> {
        bail!("store unreachable")
    }
}

/// Canned generator that records how often it was called.
pub struct FakeGenerator {
    pub tokens_used: i64,
    pub cost: Decimal,
    pub calls: AtomicUsize,
    pub last_history: Mutex<Vec<ChatTurn>>,
}

impl FakeGenerator {
    pub fn new(tokens_used: i64, cost: Decimal) -> Self {
        Self {
            tokens_used,
            cost,
            calls: AtomicUsize::new(0),
            last_history: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn generate(
        &self,
        persona: &Persona,
        history: &[ChatTurn],
        question: &str,
    ) -> Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_history.lock() {
            *last = history.to_vec();
        }
        Ok(Generation {
            content: format!("{} answers: {question}", persona.name),
            tokens_used: self.tokens_used,
            cost: self.cost,
        })
    }
}

/// Generator that always fails, as if the model server were down.
pub struct FailingGenerator;

#[async_trait]
impl TextGenerator for FailingGenerator {
    async fn generate(
        &self,
        _persona: &Persona,
        _history: &[ChatTurn],
        _question: &str,
    ) -> Result<Generation> {
        bail!("connection refused")
    }
}
