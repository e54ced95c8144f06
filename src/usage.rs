//! Token and cost metering over calendar day and month windows, and the
//! per-student / class-wide ceilings enforced before every model call.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{UsageEntry, ViolationCategory};
use crate::store::RecordStore;

const UNVERIFIED_REASON: &str = "Unable to verify usage limits right now. Please try again later.";
const UNAVAILABLE_REASON: &str =
    "Student account not found or inactive. Ask your instructor to add you to the class list.";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageTotals {
    pub total_tokens: i64,
    pub total_cost: Decimal,
}

/// The student's own usage, attached to every check for display.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LimitsInfo {
    pub daily_tokens: i64,
    pub monthly_tokens: i64,
    pub daily_cost: Decimal,
    pub monthly_cost: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LimitDenial {
    StudentUnavailable,
    StudentDailyTokens,
    StudentMonthlyCost,
    GlobalDailyTokens,
    GlobalMonthlyCost,
    VerificationFailed,
}

impl LimitDenial {
    pub fn violation_category(self) -> ViolationCategory {
        match self {
            LimitDenial::StudentUnavailable => ViolationCategory::Auth,
            _ => ViolationCategory::RateLimit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitCheck {
    pub can_proceed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial: Option<LimitDenial>,
    pub limits_info: LimitsInfo,
}

impl LimitCheck {
    fn allow(limits_info: LimitsInfo) -> Self {
        Self {
            can_proceed: true,
            reason: None,
            denial: None,
            limits_info,
        }
    }

    fn deny(denial: LimitDenial, reason: impl Into<String>, limits_info: LimitsInfo) -> Self {
        Self {
            can_proceed: false,
            reason: Some(reason.into()),
            denial: Some(denial),
            limits_info,
        }
    }

    fn unverified() -> Self {
        Self::deny(
            LimitDenial::VerificationFailed,
            UNVERIFIED_REASON,
            LimitsInfo::default(),
        )
    }
}

/// Half-open `[start, now)` windows in the server's local time zone.
#[derive(Debug, Clone, Copy)]
struct UsageWindows {
    day_start: DateTime<Utc>,
    month_start: DateTime<Utc>,
    now: DateTime<Utc>,
}

impl UsageWindows {
    fn at(now: DateTime<Local>) -> Self {
        let today = now.date_naive();
        let first_of_month = today.with_day(1).unwrap_or(today);
        Self {
            day_start: local_midnight(today),
            month_start: local_midnight(first_of_month),
            now: now.with_timezone(&Utc),
        }
    }

    /// Returns (day, month) totals, for one student or for everyone.
    async fn totals(
        &self,
        store: &dyn RecordStore,
        student_email: Option<&str>,
    ) -> Result<(UsageTotals, UsageTotals)> {
        let day = store
            .usage_totals(student_email, self.day_start, self.now)
            .await?;
        let month = store
            .usage_totals(student_email, self.month_start, self.now)
            .await?;
        Ok((day, month))
    }
}

fn local_midnight(date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_time(chrono::NaiveTime::MIN);
    match Local.from_local_datetime(&naive).earliest() {
        Some(local) => local.with_timezone(&Utc),
        // Midnight skipped by a DST change; the UTC reading is close enough.
        None => Utc.from_utc_datetime(&naive),
    }
}

#[derive(Clone)]
pub struct UsageAccountant {
    store: Arc<dyn RecordStore>,
}

impl UsageAccountant {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn check_limits(&self, student_email: &str) -> LimitCheck {
        self.check_limits_at(student_email, Local::now()).await
    }

    /// Never errors: any storage failure denies the request.
    pub async fn check_limits_at(&self, student_email: &str, now: DateTime<Local>) -> LimitCheck {
        match self.evaluate(student_email, now).await {
            Ok(check) => {
                if let Some(denial) = check.denial {
                    tracing::info!(student = student_email, ?denial, "usage check denied");
                }
                check
            }
            Err(err) => {
                tracing::error!(
                    student = student_email,
                    "usage limits could not be verified: {err:#}"
                );
                LimitCheck::unverified()
            }
        }
    }

    pub async fn record_usage(&self, entry: &UsageEntry) -> Result<()> {
        self.store.append_usage(entry).await?;
        tracing::debug!(
            student = %entry.student_email,
            session = %entry.session_id,
            tokens = entry.tokens_used,
            cost = %entry.cost,
            "recorded usage"
        );
        Ok(())
    }

    async fn evaluate(&self, student_email: &str, now: DateTime<Local>) -> Result<LimitCheck> {
        let student = match self.store.get_student(student_email).await? {
            Some(student) if student.active => student,
            _ => {
                return Ok(LimitCheck::deny(
                    LimitDenial::StudentUnavailable,
                    UNAVAILABLE_REASON,
                    LimitsInfo::default(),
                ))
            }
        };

        let settings = self.store.get_settings().await?;
        let windows = UsageWindows::at(now);

        let (own_day, own_month) = windows
            .totals(self.store.as_ref(), Some(student.email.as_str()))
            .await?;
        let info = LimitsInfo {
            daily_tokens: own_day.total_tokens,
            monthly_tokens: own_month.total_tokens,
            daily_cost: own_day.total_cost,
            monthly_cost: own_month.total_cost,
        };

        if let Some(limit) = student.daily_token_limit {
            if own_day.total_tokens >= limit {
                return Ok(LimitCheck::deny(
                    LimitDenial::StudentDailyTokens,
                    format!(
                        "You have reached your daily limit of {limit} tokens ({} used today). \
                         Your allowance resets at midnight.",
                        own_day.total_tokens
                    ),
                    info,
                ));
            }
        }

        if let Some(limit) = student.monthly_cost_limit {
            if own_month.total_cost >= limit {
                return Ok(LimitCheck::deny(
                    LimitDenial::StudentMonthlyCost,
                    format!(
                        "You have reached your monthly usage budget (${} of ${limit}). \
                         Your allowance resets at the start of next month.",
                        own_month.total_cost
                    ),
                    info,
                ));
            }
        }

        if settings.global_daily_token_limit.is_none()
            && settings.global_monthly_cost_limit.is_none()
        {
            return Ok(LimitCheck::allow(info));
        }

        let (class_day, class_month) = windows.totals(self.store.as_ref(), None).await?;

        if let Some(limit) = settings.global_daily_token_limit {
            if class_day.total_tokens >= limit {
                return Ok(LimitCheck::deny(
                    LimitDenial::GlobalDailyTokens,
                    "The class has reached its shared daily usage limit. Please try again tomorrow.",
                    info,
                ));
            }
        }

        if let Some(limit) = settings.global_monthly_cost_limit {
            if class_month.total_cost >= limit {
                return Ok(LimitCheck::deny(
                    LimitDenial::GlobalMonthlyCost,
                    "The class has reached its shared monthly budget. Please check with your instructor.",
                    info,
                ));
            }
        }

        Ok(LimitCheck::allow(info))
    }
}

/// Checks a student's ceilings against the given store.
pub async fn check_usage_limits(store: Arc<dyn RecordStore>, student_email: &str) -> LimitCheck {
    UsageAccountant::new(store).check_limits(student_email).await
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::Duration;

    use super::*;
    use crate::db::Database;
    use crate::models::{GlobalSettings, Student};
    use crate::testing::FailingStore;

    fn noon() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 3, 15, 12, 0, 0)
            .single()
            .unwrap()
    }

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn student(email: &str) -> Student {
        Student {
            email: email.to_string(),
            name: None,
            active: true,
            daily_token_limit: None,
            monthly_cost_limit: None,
        }
    }

    async fn spend(db: &Database, email: &str, tokens: i64, cost: &str, at: DateTime<Local>) {
        db.append_usage(&UsageEntry {
            student_email: email.to_string(),
            session_id: "s1".to_string(),
            tokens_used: tokens,
            cost: dec(cost),
            timestamp: at.with_timezone(&Utc),
        })
        .await
        .unwrap();
    }

    async fn setup() -> (Database, UsageAccountant) {
        let db = Database::in_memory().await.unwrap();
        let accountant = UsageAccountant::new(Arc::new(db.clone()));
        (db, accountant)
    }

    #[tokio::test]
    async fn unknown_student_is_denied() {
        let (_db, accountant) = setup().await;
        let check = accountant.check_limits_at("ghost@x.edu", noon()).await;
        assert!(!check.can_proceed);
        assert_eq!(check.denial, Some(LimitDenial::StudentUnavailable));
        assert!(check.reason.unwrap().contains("not found or inactive"));
    }

    #[tokio::test]
    async fn inactive_student_is_denied_before_any_limit() {
        let (db, accountant) = setup().await;
        let mut inactive = student("a@x.edu");
        inactive.active = false;
        db.upsert_student(&inactive).await.unwrap();

        let check = accountant.check_limits_at("a@x.edu", noon()).await;
        assert_eq!(check.denial, Some(LimitDenial::StudentUnavailable));
        assert_eq!(
            check.denial.map(LimitDenial::violation_category),
            Some(ViolationCategory::Auth)
        );
    }

    #[tokio::test]
    async fn daily_token_limit_blocks_at_the_boundary() {
        let (db, accountant) = setup().await;
        let mut capped = student("a@x.edu");
        capped.daily_token_limit = Some(1000);
        db.upsert_student(&capped).await.unwrap();

        spend(&db, "a@x.edu", 600, "0.01", noon() - Duration::hours(2)).await;
        spend(&db, "a@x.edu", 399, "0.01", noon() - Duration::hours(1)).await;
        let check = accountant.check_limits_at("a@x.edu", noon()).await;
        assert!(check.can_proceed);
        assert_eq!(check.limits_info.daily_tokens, 999);

        spend(&db, "a@x.edu", 1, "0.00", noon() - Duration::minutes(5)).await;
        let check = accountant.check_limits_at("a@x.edu", noon()).await;
        assert!(!check.can_proceed);
        assert_eq!(check.denial, Some(LimitDenial::StudentDailyTokens));
        assert!(check.reason.unwrap().contains("daily limit"));
        assert_eq!(check.limits_info.daily_tokens, 1000);
    }

    #[tokio::test]
    async fn yesterday_does_not_count_toward_today() {
        let (db, accountant) = setup().await;
        let mut capped = student("a@x.edu");
        capped.daily_token_limit = Some(1000);
        db.upsert_student(&capped).await.unwrap();

        spend(&db, "a@x.edu", 5000, "0.10", noon() - Duration::days(1)).await;
        spend(&db, "a@x.edu", 10, "0.01", noon() - Duration::days(40)).await;
        let check = accountant.check_limits_at("a@x.edu", noon()).await;
        assert!(check.can_proceed);
        assert_eq!(check.limits_info.daily_tokens, 0);
        assert_eq!(check.limits_info.monthly_tokens, 5000);
        assert_eq!(check.limits_info.monthly_cost, dec("0.10"));
    }

    #[tokio::test]
    async fn entries_after_now_are_outside_the_window() {
        let (db, accountant) = setup().await;
        db.upsert_student(&student("a@x.edu")).await.unwrap();
        spend(&db, "a@x.edu", 50, "0.01", noon() + Duration::hours(1)).await;

        let check = accountant.check_limits_at("a@x.edu", noon()).await;
        assert_eq!(check.limits_info.daily_tokens, 0);
    }

    #[tokio::test]
    async fn monthly_cost_sums_exactly() {
        let (db, accountant) = setup().await;
        let mut capped = student("a@x.edu");
        capped.monthly_cost_limit = Some(dec("0.3"));
        db.upsert_student(&capped).await.unwrap();

        // 0.1 + 0.1 + 0.1 drifts in binary floating point.
        for day in 1..=3 {
            spend(&db, "a@x.edu", 10, "0.1", noon() - Duration::days(day)).await;
        }
        let check = accountant.check_limits_at("a@x.edu", noon()).await;
        assert!(!check.can_proceed);
        assert_eq!(check.denial, Some(LimitDenial::StudentMonthlyCost));
        assert_eq!(check.limits_info.monthly_cost, dec("0.3"));
    }

    #[tokio::test]
    async fn many_small_costs_accumulate_without_drift() {
        let (db, accountant) = setup().await;
        db.upsert_student(&student("a@x.edu")).await.unwrap();
        for minute in 1..=100 {
            spend(
                &db,
                "a@x.edu",
                3,
                "0.000015",
                noon() - Duration::minutes(minute),
            )
            .await;
        }
        let check = accountant.check_limits_at("a@x.edu", noon()).await;
        assert_eq!(check.limits_info.daily_cost, dec("0.0015"));
        assert_eq!(check.limits_info.daily_tokens, 300);
    }

    #[tokio::test]
    async fn student_limits_are_checked_before_global_limits() {
        let (db, accountant) = setup().await;
        let mut capped = student("a@x.edu");
        capped.daily_token_limit = Some(100);
        db.upsert_student(&capped).await.unwrap();
        db.update_settings(&GlobalSettings {
            global_daily_token_limit: Some(100),
            ..GlobalSettings::default()
        })
        .await
        .unwrap();

        spend(&db, "a@x.edu", 100, "0.01", noon() - Duration::hours(1)).await;
        let check = accountant.check_limits_at("a@x.edu", noon()).await;
        assert_eq!(check.denial, Some(LimitDenial::StudentDailyTokens));
    }

    #[tokio::test]
    async fn global_daily_limit_counts_every_student() {
        let (db, accountant) = setup().await;
        db.upsert_student(&student("a@x.edu")).await.unwrap();
        db.update_settings(&GlobalSettings {
            global_daily_token_limit: Some(500),
            ..GlobalSettings::default()
        })
        .await
        .unwrap();

        spend(&db, "a@x.edu", 200, "0.01", noon() - Duration::hours(1)).await;
        spend(&db, "b@x.edu", 300, "0.01", noon() - Duration::hours(1)).await;
        let check = accountant.check_limits_at("a@x.edu", noon()).await;
        assert!(!check.can_proceed);
        assert_eq!(check.denial, Some(LimitDenial::GlobalDailyTokens));
        assert_eq!(check.limits_info.daily_tokens, 200);
        assert_eq!(
            check.denial.map(LimitDenial::violation_category),
            Some(ViolationCategory::RateLimit)
        );
    }

    #[tokio::test]
    async fn global_monthly_cost_limit_denies() {
        let (db, accountant) = setup().await;
        db.upsert_student(&student("a@x.edu")).await.unwrap();
        db.update_settings(&GlobalSettings {
            global_monthly_cost_limit: Some(dec("1.00")),
            ..GlobalSettings::default()
        })
        .await
        .unwrap();

        spend(&db, "b@x.edu", 10, "0.99", noon() - Duration::days(3)).await;
        let check = accountant.check_limits_at("a@x.edu", noon()).await;
        assert!(check.can_proceed);

        spend(&db, "c@x.edu", 10, "0.01", noon() - Duration::days(2)).await;
        let check = accountant.check_limits_at("a@x.edu", noon()).await;
        assert_eq!(check.denial, Some(LimitDenial::GlobalMonthlyCost));
    }

    #[tokio::test]
    async fn storage_failure_fails_closed() {
        let accountant = UsageAccountant::new(Arc::new(FailingStore));
        let check = accountant.check_limits("a@x.edu").await;
        assert!(!check.can_proceed);
        assert_eq!(check.denial, Some(LimitDenial::VerificationFailed));
        assert!(check.reason.unwrap().starts_with("Unable to verify"));
    }

    #[tokio::test]
    async fn free_function_uses_the_given_store() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_student(&student("a@x.edu")).await.unwrap();
        let check = check_usage_limits(Arc::new(db), "a@x.edu").await;
        assert!(check.can_proceed);
        assert_eq!(check.limits_info, LimitsInfo::default());
    }
}
