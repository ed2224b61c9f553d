use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS recording_sessions (
    session_id    TEXT PRIMARY KEY,
    start_time    TIMESTAMPTZ NOT NULL,
    end_time      TIMESTAMPTZ NOT NULL,
    duration_ms   BIGINT NOT NULL DEFAULT 0,
    page_url      TEXT,
    user_agent    TEXT,
    device_type   TEXT,
    browser       TEXT,
    os            TEXT,
    screen_width  INTEGER,
    screen_height INTEGER,
    events        JSONB NOT NULL DEFAULT '[]'::jsonb,
    event_count   INTEGER NOT NULL DEFAULT 0,
    analysis      JSONB,
    analyzed      BOOLEAN NOT NULL DEFAULT FALSE,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS recording_sessions_start_time_idx
    ON recording_sessions (start_time DESC);
"#;

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Create the recording tables if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}
