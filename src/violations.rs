use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use crate::models::{NewViolation, ViolationEvent};
use crate::store::RecordStore;

/// Audit trail for denied, blocked and overridden questions.
#[derive(Clone)]
pub struct ViolationRecorder {
    store: Arc<dyn RecordStore>,
}

impl ViolationRecorder {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Writes one event. A failed write is logged and yields `None`; the
    /// caller's allow/deny decision stands either way.
    pub async fn record(&self, violation: NewViolation) -> Option<ViolationEvent> {
        match self.store.append_violation(&violation).await {
            Ok(event) => {
                tracing::info!(
                    id = %event.id,
                    student = %event.student_email,
                    category = event.category.as_str(),
                    status = event.status.as_str(),
                    "recorded violation: {}",
                    event.detail
                );
                Some(event)
            }
            Err(err) => {
                tracing::error!(
                    student = %violation.student_email,
                    category = violation.category.as_str(),
                    "failed to record violation: {err:#}"
                );
                None
            }
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<ViolationEvent>> {
        self.store.get_violation(id).await
    }

    /// Flagged → proceeded, stamping `bypassed_at`. `None` when the event is
    /// missing or was not flagged.
    pub async fn proceed(&self, id: &str) -> Result<Option<ViolationEvent>> {
        let updated = self.store.mark_violation_proceeded(id, Utc::now()).await?;
        if let Some(event) = &updated {
            tracing::info!(id = %event.id, student = %event.student_email, "violation overridden");
        }
        Ok(updated)
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<ViolationEvent>> {
        self.store.list_violations(limit).await
    }
}
