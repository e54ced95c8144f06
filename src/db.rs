use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::{
    ChatTurn, ContentFilterMode, GlobalSettings, NewViolation, Role, Session, Student, UsageEntry,
    ViolationCategory, ViolationEvent, ViolationStatus,
};
use crate::store::RecordStore;
use crate::usage::UsageTotals;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        Self::connect(&config.sqlite_dsn()).await
    }

    pub async fn connect(dsn: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(dsn)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Private in-memory database. A single connection that never expires,
    /// so the schema survives for the life of the pool.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS students (
                email TEXT PRIMARY KEY,
                name TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                daily_token_limit INTEGER,
                monthly_cost_limit TEXT
            );

            CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                content_filter_mode TEXT NOT NULL,
                global_daily_token_limit INTEGER,
                global_monthly_cost_limit TEXT
            );

            INSERT OR IGNORE INTO settings (id, content_filter_mode) VALUES (1, 'normal');

            CREATE TABLE IF NOT EXISTS usage_ledger (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                student_email TEXT NOT NULL,
                session_id TEXT NOT NULL,
                tokens_used INTEGER NOT NULL,
                cost TEXT NOT NULL,
                cost_units INTEGER NOT NULL,
                recorded_at TEXT NOT NULL,
                recorded_at_us INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS usage_ledger_student_time
                ON usage_ledger (student_email, recorded_at_us);
            CREATE INDEX IF NOT EXISTS usage_ledger_time
                ON usage_ledger (recorded_at_us);

            CREATE TABLE IF NOT EXISTS violations (
                id TEXT PRIMARY KEY,
                student_email TEXT NOT NULL,
                session_id TEXT NOT NULL,
                category TEXT NOT NULL,
                detail TEXT NOT NULL,
                question TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                bypassed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                student_email TEXT NOT NULL,
                character_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl RecordStore for Database {
    async fn get_student(&self, email: &str) -> Result<Option<Student>> {
        let row = sqlx::query(
            r#"
            SELECT email, name, active, daily_token_limit, monthly_cost_limit
            FROM students
            WHERE email = ?
            "#,
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_student).transpose()
    }

    async fn upsert_student(&self, student: &Student) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO students (email, name, active, daily_token_limit, monthly_cost_limit)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(email) DO UPDATE SET
                name = excluded.name,
                active = excluded.active,
                daily_token_limit = excluded.daily_token_limit,
                monthly_cost_limit = excluded.monthly_cost_limit
            "#,
        )
        .bind(normalize_email(&student.email))
        .bind(&student.name)
        .bind(student.active)
        .bind(student.daily_token_limit)
        .bind(student.monthly_cost_limit.map(|limit| limit.to_string()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_students(&self) -> Result<Vec<Student>> {
        let rows = sqlx::query(
            r#"
            SELECT email, name, active, daily_token_limit, monthly_cost_limit
            FROM students
            ORDER BY email ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_student).collect()
    }

    async fn get_settings(&self) -> Result<GlobalSettings> {
        let row = sqlx::query(
            r#"
            SELECT content_filter_mode, global_daily_token_limit, global_monthly_cost_limit
            FROM settings
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(GlobalSettings::default());
        };

        Ok(GlobalSettings {
            content_filter_mode: ContentFilterMode::from_db(
                &row.get::<String, _>("content_filter_mode"),
            ),
            global_daily_token_limit: row.get("global_daily_token_limit"),
            global_monthly_cost_limit: parse_optional_decimal(
                row.get("global_monthly_cost_limit"),
            )?,
        })
    }

    async fn update_settings(&self, settings: &GlobalSettings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (id, content_filter_mode, global_daily_token_limit, global_monthly_cost_limit)
            VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                content_filter_mode = excluded.content_filter_mode,
                global_daily_token_limit = excluded.global_daily_token_limit,
                global_monthly_cost_limit = excluded.global_monthly_cost_limit
            "#,
        )
        .bind(settings.content_filter_mode.as_str())
        .bind(settings.global_daily_token_limit)
        .bind(settings.global_monthly_cost_limit.map(|limit| limit.to_string()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_usage(&self, entry: &UsageEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_ledger (student_email, session_id, tokens_used, cost, cost_units, recorded_at, recorded_at_us)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(normalize_email(&entry.student_email))
        .bind(&entry.session_id)
        .bind(entry.tokens_used)
        .bind(entry.cost.to_string())
        .bind(cost_to_units(entry.cost)?)
        .bind(entry.timestamp.to_rfc3339())
        .bind(entry.timestamp.timestamp_micros())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn usage_totals(
        &self,
        student_email: Option<&str>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<UsageTotals> {
        let row = match student_email {
            Some(email) => {
                sqlx::query(
                    r#"
                    SELECT COALESCE(SUM(tokens_used), 0) AS tokens, COALESCE(SUM(cost_units), 0) AS cost_units
                    FROM usage_ledger
                    WHERE student_email = ? AND recorded_at_us >= ? AND recorded_at_us < ?
                    "#,
                )
                .bind(normalize_email(email))
                .bind(since.timestamp_micros())
                .bind(until.timestamp_micros())
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT COALESCE(SUM(tokens_used), 0) AS tokens, COALESCE(SUM(cost_units), 0) AS cost_units
                    FROM usage_ledger
                    WHERE recorded_at_us >= ? AND recorded_at_us < ?
                    "#,
                )
                .bind(since.timestamp_micros())
                .bind(until.timestamp_micros())
                .fetch_one(&self.pool)
                .await?
            }
        };

        Ok(UsageTotals {
            total_tokens: row.get("tokens"),
            total_cost: units_to_cost(row.get("cost_units")),
        })
    }

    async fn append_violation(&self, violation: &NewViolation) -> Result<ViolationEvent> {
        let event = ViolationEvent {
            id: Uuid::new_v4().to_string(),
            student_email: normalize_email(&violation.student_email),
            session_id: violation.session_id.clone(),
            category: violation.category,
            detail: violation.detail.clone(),
            question: violation.question.clone(),
            status: violation.status,
            timestamp: Utc::now(),
            bypassed_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO violations (id, student_email, session_id, category, detail, question, status, created_at, bypassed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL)
            "#,
        )
        .bind(&event.id)
        .bind(&event.student_email)
        .bind(&event.session_id)
        .bind(event.category.as_str())
        .bind(&event.detail)
        .bind(&event.question)
        .bind(event.status.as_str())
        .bind(event.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(event)
    }

    async fn get_violation(&self, id: &str) -> Result<Option<ViolationEvent>> {
        let row = sqlx::query(
            r#"
            SELECT id, student_email, session_id, category, detail, question, status, created_at, bypassed_at
            FROM violations
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_violation).transpose()
    }

    async fn mark_violation_proceeded(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ViolationEvent>> {
        let updated = sqlx::query(
            r#"
            UPDATE violations
            SET status = ?, bypassed_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(ViolationStatus::Proceeded.as_str())
        .bind(at.to_rfc3339())
        .bind(id)
        .bind(ViolationStatus::Flagged.as_str())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_violation(id).await
    }

    async fn list_violations(&self, limit: i64) -> Result<Vec<ViolationEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, student_email, session_id, category, detail, question, status, created_at, bypassed_at
            FROM violations
            ORDER BY rowid DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_violation).collect()
    }

    async fn create_session(&self, student_email: &str, character_id: &str) -> Result<Session> {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            student_email: normalize_email(student_email),
            character_id: character_id.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO sessions (id, student_email, character_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.student_email)
        .bind(&session.character_id)
        .bind(session.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            "SELECT id, student_email, character_id, created_at FROM sessions WHERE id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<Session> {
            Ok(Session {
                id: r.get("id"),
                student_email: r.get("student_email"),
                character_id: r.get("character_id"),
                created_at: parse_timestamp(&r.get::<String, _>("created_at"))?,
            })
        })
        .transpose()
    }

    async fn save_message(&self, session_id: &str, role: Role, content: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages (session_id, role, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_messages(&self, session_id: &str, limit: i64) -> Result<Vec<ChatTurn>> {
        let rows = sqlx::query(
            r#"
            SELECT role, content
            FROM messages
            WHERE session_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut out: Vec<ChatTurn> = rows
            .into_iter()
            .map(|r| ChatTurn {
                role: Role::from_db(&r.get::<String, _>("role")),
                content: r.get("content"),
            })
            .collect();
        out.reverse();
        Ok(out)
    }
}

/// Decimal places kept by the integer cost column that SQL sums over.
const COST_SCALE: u32 = 12;

fn cost_to_units(cost: Decimal) -> Result<i64> {
    let mut scaled = cost.round_dp(COST_SCALE);
    scaled.rescale(COST_SCALE);
    i64::try_from(scaled.mantissa()).with_context(|| format!("cost out of range: {cost}"))
}

fn units_to_cost(units: i64) -> Decimal {
    Decimal::new(units, COST_SCALE).normalize()
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn row_to_student(row: SqliteRow) -> Result<Student> {
    Ok(Student {
        email: row.get("email"),
        name: row.get("name"),
        active: row.get("active"),
        daily_token_limit: row.get("daily_token_limit"),
        monthly_cost_limit: parse_optional_decimal(row.get("monthly_cost_limit"))?,
    })
}

fn row_to_violation(row: SqliteRow) -> Result<ViolationEvent> {
    let bypassed_at: Option<String> = row.get("bypassed_at");
    Ok(ViolationEvent {
        id: row.get("id"),
        student_email: row.get("student_email"),
        session_id: row.get("session_id"),
        category: ViolationCategory::from_db(&row.get::<String, _>("category")),
        detail: row.get("detail"),
        question: row.get("question"),
        status: ViolationStatus::from_db(&row.get::<String, _>("status")),
        timestamp: parse_timestamp(&row.get::<String, _>("created_at"))?,
        bypassed_at: bypassed_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn parse_optional_decimal(value: Option<String>) -> Result<Option<Decimal>> {
    value
        .map(|v| Decimal::from_str(&v).with_context(|| format!("invalid decimal value: {v}")))
        .transpose()
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("invalid timestamp: {value}"))?
        .with_timezone(&Utc))
}
