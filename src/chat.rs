use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::characters::{find_persona, Persona};
use crate::db::normalize_email;
use crate::filter::{evaluate_blocking_policy, Classifier, PolicyDecision};
use crate::models::{
    AskRequest, AskResponse, AskStatus, ClassifyResponse, NewViolation, ProceedRequest, Role,
    Session, SessionRequest, SessionResponse, UsageEntry, ViolationCategory, ViolationStatus,
};
use crate::ollama::TextGenerator;
use crate::store::RecordStore;
use crate::usage::{LimitCheck, LimitDenial, LimitsInfo, UsageAccountant};
use crate::violations::ViolationRecorder;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("question is empty")]
    EmptyQuestion,
    #[error("unknown character: {0}")]
    UnknownCharacter(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("session {0} belongs to another student")]
    SessionMismatch(String),
    #[error("violation not found: {0}")]
    ViolationNotFound(String),
    #[error("violation {0} cannot be overridden")]
    NotBypassable(String),
    #[error("the character could not answer right now, please try again")]
    GenerationUnavailable,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn RecordStore>,
    generator: Arc<dyn TextGenerator>,
    accountant: UsageAccountant,
    recorder: ViolationRecorder,
    classifier: Classifier,
    history_turns: i64,
    generation_limit: Arc<Semaphore>,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        generator: Arc<dyn TextGenerator>,
        classifier: Classifier,
        history_turns: i64,
        generation_limit: Arc<Semaphore>,
    ) -> Self {
        Self {
            accountant: UsageAccountant::new(store.clone()),
            recorder: ViolationRecorder::new(store.clone()),
            store,
            generator,
            classifier,
            history_turns,
            generation_limit,
        }
    }

    pub fn accountant(&self) -> &UsageAccountant {
        &self.accountant
    }

    pub fn recorder(&self) -> &ViolationRecorder {
        &self.recorder
    }

    pub async fn create_session(
        &self,
        request: SessionRequest,
    ) -> Result<SessionResponse, ChatError> {
        let persona = find_persona(&request.character_id)
            .ok_or_else(|| ChatError::UnknownCharacter(request.character_id.clone()))?;
        let session = self
            .store
            .create_session(&request.student_email, persona.id)
            .await?;
        Ok(SessionResponse {
            session_id: session.id,
        })
    }

    /// Classifies a question and applies the configured blocking policy.
    /// When the filter mode cannot be read the question is let through.
    pub async fn screen(&self, question: &str) -> ClassifyResponse {
        let classification = self.classifier.classify(question);
        let mode = match self.store.get_settings().await {
            Ok(settings) => Some(settings.content_filter_mode),
            Err(err) => {
                tracing::warn!("content filter mode unavailable, not blocking: {err:#}");
                None
            }
        };
        let decision = match mode {
            Some(mode) => evaluate_blocking_policy(&classification, mode),
            None => PolicyDecision::allow(),
        };

        ClassifyResponse {
            classification,
            decision,
            mode,
        }
    }

    pub async fn ask(&self, request: AskRequest) -> Result<AskResponse, ChatError> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(ChatError::EmptyQuestion);
        }

        let (session, persona) = self
            .resolve_session(&request.session_id, &request.student_email)
            .await?;

        let limits = self.accountant.check_limits(&session.student_email).await;
        if !limits.can_proceed {
            return Ok(self.deny_for_limits(&session, question, limits).await);
        }

        let screened = self.screen(question).await;
        let classification = screened.classification;
        if screened.decision.block {
            let event = self
                .recorder
                .record(NewViolation {
                    student_email: session.student_email.clone(),
                    session_id: session.id.clone(),
                    category: ViolationCategory::NonEnglish,
                    detail: classification.details.clone(),
                    question: question.to_string(),
                    status: ViolationStatus::Flagged,
                })
                .await;

            return Ok(AskResponse {
                status: AskStatus::Blocked,
                answer: None,
                reason: screened.decision.reason,
                violation_id: event.map(|event| event.id),
                category: classification.category,
                tokens_used: 0,
                limits: limits.limits_info,
            });
        }

        if classification.is_violation {
            tracing::info!(
                student = %session.student_email,
                confidence = classification.confidence,
                "off-topic question below blocking threshold: {}",
                classification.details
            );
        }

        self.answer(&session, persona, question, limits.limits_info, None)
            .await
    }

    /// Answers a previously blocked question after the student chose to
    /// continue anyway. Usage ceilings still apply.
    pub async fn proceed(&self, request: ProceedRequest) -> Result<AskResponse, ChatError> {
        let event = self
            .recorder
            .get(&request.violation_id)
            .await?
            .filter(|event| event.student_email == normalize_email(&request.student_email))
            .ok_or_else(|| ChatError::ViolationNotFound(request.violation_id.clone()))?;

        if event.category != ViolationCategory::NonEnglish
            || event.status != ViolationStatus::Flagged
        {
            return Err(ChatError::NotBypassable(event.id));
        }

        let (session, persona) = self
            .resolve_session(&event.session_id, &request.student_email)
            .await?;

        let limits = self.accountant.check_limits(&session.student_email).await;
        if !limits.can_proceed {
            return Ok(self.deny_for_limits(&session, &event.question, limits).await);
        }

        self.answer(
            &session,
            persona,
            &event.question,
            limits.limits_info,
            Some(&event.id),
        )
        .await
    }

    async fn resolve_session(
        &self,
        session_id: &str,
        student_email: &str,
    ) -> Result<(Session, &'static Persona), ChatError> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| ChatError::SessionNotFound(session_id.to_string()))?;

        if session.student_email != normalize_email(student_email) {
            return Err(ChatError::SessionMismatch(session.id));
        }

        let persona = find_persona(&session.character_id)
            .ok_or_else(|| ChatError::UnknownCharacter(session.character_id.clone()))?;

        Ok((session, persona))
    }

    async fn deny_for_limits(
        &self,
        session: &Session,
        question: &str,
        limits: LimitCheck,
    ) -> AskResponse {
        let denial = limits.denial.unwrap_or(LimitDenial::VerificationFailed);
        self.recorder
            .record(NewViolation {
                student_email: session.student_email.clone(),
                session_id: session.id.clone(),
                category: denial.violation_category(),
                detail: limits.reason.clone().unwrap_or_default(),
                question: question.to_string(),
                status: ViolationStatus::Blocked,
            })
            .await;

        AskResponse {
            status: AskStatus::LimitReached,
            answer: None,
            reason: limits.reason,
            violation_id: None,
            category: None,
            tokens_used: 0,
            limits: limits.limits_info,
        }
    }

    /// Generates, then meters and stores the exchange. An override is only
    /// spent once a reply exists; losing the race to another request for the
    /// same override discards the reply.
    async fn answer(
        &self,
        session: &Session,
        persona: &Persona,
        question: &str,
        before: LimitsInfo,
        overriding: Option<&str>,
    ) -> Result<AskResponse, ChatError> {
        let history = self
            .store
            .latest_messages(&session.id, self.history_turns)
            .await?;

        let generation = {
            let _permit = self
                .generation_limit
                .acquire()
                .await
                .map_err(|_| ChatError::GenerationUnavailable)?;
            self.generator
                .generate(persona, &history, question)
                .await
                .map_err(|err| {
                    tracing::error!(
                        session = %session.id,
                        character = persona.id,
                        "generation failed: {err:#}"
                    );
                    ChatError::GenerationUnavailable
                })?
        };

        if let Some(violation_id) = overriding {
            if self.recorder.proceed(violation_id).await?.is_none() {
                tracing::warn!(
                    violation = violation_id,
                    "override already used, discarding generated reply"
                );
                return Err(ChatError::NotBypassable(violation_id.to_string()));
            }
        }

        let entry = UsageEntry {
            student_email: session.student_email.clone(),
            session_id: session.id.clone(),
            tokens_used: generation.tokens_used.max(0),
            cost: generation.cost.max(Decimal::ZERO),
            timestamp: Utc::now(),
        };
        self.accountant.record_usage(&entry).await?;

        self.store
            .save_message(&session.id, Role::User, question)
            .await?;
        self.store
            .save_message(&session.id, Role::Assistant, &generation.content)
            .await?;

        Ok(AskResponse {
            status: AskStatus::Answered,
            answer: Some(generation.content),
            reason: None,
            violation_id: None,
            category: None,
            tokens_used: entry.tokens_used,
            limits: LimitsInfo {
                daily_tokens: before.daily_tokens + entry.tokens_used,
                monthly_tokens: before.monthly_tokens + entry.tokens_used,
                daily_cost: before.daily_cost + entry.cost,
                monthly_cost: before.monthly_cost + entry.cost,
            },
        })
    }
}
