//! Postgres-backed session store.
//!
//! Every write is one statement against the session's row, so Postgres' row
//! lock gives the per-session single-writer guarantee: `events || $n` never
//! interleaves with another append for the same id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use replay_core::{AnalysisResult, Event, RecordingSession, SessionMetadata, SessionSummary};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::store::{IngestAck, SessionStore, StoreError};

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct AckRow {
    session_id: String,
    event_count: i32,
    duration_ms: i64,
    created: bool,
}

impl AckRow {
    fn into_ack(self, appended: usize) -> IngestAck {
        IngestAck {
            session_id: self.session_id,
            created: self.created,
            appended,
            event_count: self.event_count.max(0) as usize,
            duration_ms: self.duration_ms,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    session_id: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    duration_ms: i64,
    page_url: Option<String>,
    user_agent: Option<String>,
    device_type: Option<String>,
    browser: Option<String>,
    os: Option<String>,
    screen_width: Option<i32>,
    screen_height: Option<i32>,
    events: Json<Vec<Event>>,
    analysis: Option<Json<AnalysisResult>>,
    analyzed: bool,
}

impl From<SessionRow> for RecordingSession {
    fn from(row: SessionRow) -> Self {
        RecordingSession {
            session_id: row.session_id,
            start_time: row.start_time,
            end_time: row.end_time,
            duration_ms: row.duration_ms,
            page_url: row.page_url,
            user_agent: row.user_agent,
            device_type: row.device_type,
            browser: row.browser,
            os: row.os,
            screen_width: row.screen_width.map(|w| w.max(0) as u32),
            screen_height: row.screen_height.map(|h| h.max(0) as u32),
            events: row.events.0,
            analysis: row.analysis.map(|a| a.0),
            analyzed: row.analyzed,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    session_id: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    duration_ms: i64,
    page_url: Option<String>,
    device_type: Option<String>,
    browser: Option<String>,
    os: Option<String>,
    screen_width: Option<i32>,
    screen_height: Option<i32>,
    event_count: i32,
    analyzed: bool,
}

impl From<SummaryRow> for SessionSummary {
    fn from(row: SummaryRow) -> Self {
        SessionSummary {
            session_id: row.session_id,
            start_time: row.start_time,
            end_time: row.end_time,
            duration_ms: row.duration_ms,
            page_url: row.page_url,
            device_type: row.device_type,
            browser: row.browser,
            os: row.os,
            screen_width: row.screen_width.map(|w| w.max(0) as u32),
            screen_height: row.screen_height.map(|h| h.max(0) as u32),
            event_count: row.event_count.max(0) as usize,
            analyzed: row.analyzed,
        }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(
        &self,
        session_id: &str,
        events: Vec<Event>,
        metadata: &SessionMetadata,
    ) -> Result<IngestAck, StoreError> {
        let appended = events.len();
        let seed = RecordingSession::new(session_id, events, metadata, Utc::now());

        let row: AckRow = sqlx::query_as(
            r#"
            INSERT INTO recording_sessions
                (session_id, start_time, end_time, duration_ms, page_url, user_agent,
                 device_type, browser, os, screen_width, screen_height, events, event_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (session_id) DO UPDATE SET
                events = recording_sessions.events || EXCLUDED.events,
                event_count = recording_sessions.event_count + EXCLUDED.event_count,
                end_time = EXCLUDED.end_time,
                duration_ms = GREATEST(0, (EXTRACT(EPOCH FROM
                    (EXCLUDED.end_time - recording_sessions.start_time)) * 1000)::BIGINT)
            RETURNING session_id, event_count, duration_ms, (xmax = 0) AS created
            "#,
        )
        .bind(&seed.session_id)
        .bind(seed.start_time)
        .bind(seed.end_time)
        .bind(seed.duration_ms)
        .bind(&seed.page_url)
        .bind(&seed.user_agent)
        .bind(&seed.device_type)
        .bind(&seed.browser)
        .bind(&seed.os)
        .bind(seed.screen_width.map(|w| w as i32))
        .bind(seed.screen_height.map(|h| h as i32))
        .bind(Json(&seed.events))
        .bind(appended as i32)
        .fetch_one(&self.pool)
        .await?;

        if row.created {
            tracing::info!(session_id = %session_id, events = appended, "Created recording session");
        }
        Ok(row.into_ack(appended))
    }

    async fn append(&self, session_id: &str, events: Vec<Event>) -> Result<IngestAck, StoreError> {
        let appended = events.len();

        let row: Option<AckRow> = sqlx::query_as(
            r#"
            UPDATE recording_sessions SET
                events = events || $2,
                event_count = event_count + $3,
                end_time = $4::timestamptz,
                duration_ms = GREATEST(0, (EXTRACT(EPOCH FROM
                    ($4::timestamptz - start_time)) * 1000)::BIGINT)
            WHERE session_id = $1
            RETURNING session_id, event_count, duration_ms, FALSE AS created
            "#,
        )
        .bind(session_id)
        .bind(Json(&events))
        .bind(appended as i32)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_ack(appended))
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }

    async fn get_by_session_id(
        &self,
        session_id: &str,
    ) -> Result<Option<RecordingSession>, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT session_id, start_time, end_time, duration_ms, page_url, user_agent,
                   device_type, browser, os, screen_width, screen_height, events,
                   analysis, analyzed
            FROM recording_sessions
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(RecordingSession::from))
    }

    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<SessionSummary>, StoreError> {
        let rows: Vec<SummaryRow> = sqlx::query_as(
            r#"
            SELECT session_id, start_time, end_time, duration_ms, page_url, device_type,
                   browser, os, screen_width, screen_height, event_count, analyzed
            FROM recording_sessions
            ORDER BY start_time DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SessionSummary::from).collect())
    }

    async fn save_analysis(
        &self,
        session_id: &str,
        analysis: &AnalysisResult,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE recording_sessions SET analysis = $2 WHERE session_id = $1")
            .bind(session_id)
            .bind(Json(analysis))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(session_id.to_string()));
        }
        Ok(())
    }

    async fn mark_analyzed(&self, session_id: &str) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE recording_sessions SET analyzed = TRUE WHERE session_id = $1")
                .bind(session_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(session_id.to_string()));
        }
        Ok(())
    }

    async fn health(&self) -> Result<String, StoreError> {
        Ok(replay_core::db::health_check(&self.pool).await?)
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
