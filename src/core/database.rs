// src/core/database.rs
//! Job storage: connection management, schema and the upsert gateway.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{debug, info};

use crate::error::ScrapeError;
use crate::types::{JobRecord, CAPTCHA_BLOCKED, NOT_AVAILABLE};
use crate::utils::ensure_dir_exists;

// ===== Connection Management =====

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database file and run migrations.
    pub async fn new(database_path: &Path) -> Result<Self> {
        if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir_exists(parent).await?;
        }

        let database_url = format!("sqlite:{}?mode=rwc", database_path.display());
        let pool = SqlitePool::connect(&database_url).await.with_context(|| {
            format!("Failed to connect to database: {}", database_path.display())
        })?;

        info!("Database connection established: {}", database_path.display());

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Private in-memory database; one connection so every query sees the
    /// same data.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn jobs(&self) -> JobRepository<'_> {
        JobRepository::new(&self.pool)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                company TEXT NOT NULL,
                location TEXT NOT NULL,
                link TEXT NOT NULL UNIQUE,
                source TEXT NOT NULL,
                date_posted TEXT,
                work_type TEXT NOT NULL DEFAULT 'N/A',
                employment_type TEXT NOT NULL DEFAULT 'N/A',
                description TEXT NOT NULL DEFAULT 'N/A',
                first_seen_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create jobs table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_title ON jobs(title);")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_date_posted ON jobs(date_posted);")
            .execute(&self.pool)
            .await?;

        debug!("Database migrations completed");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database health check failed")?;
        Ok(())
    }
}

// ===== Job Models =====

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredJob {
    pub id: i64,
    pub title: String,
    pub company: String,
    pub location: String,
    pub link: String,
    pub source: String,
    pub date_posted: Option<NaiveDate>,
    pub work_type: String,
    pub employment_type: String,
    pub description: String,
    pub first_seen_at: DateTime<Utc>,
}

/// What an upsert did to the row for a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

// ===== Job Repository =====

// On conflict only the detail-derived columns are refreshed, and a sentinel
// never replaces real content already stored.
const UPSERT_SQL: &str = r#"
    INSERT INTO jobs (title, company, location, link, source, date_posted,
                      work_type, employment_type, description, first_seen_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
    ON CONFLICT(link) DO UPDATE SET
        description = CASE
            WHEN excluded.description IN (?11, ?12) AND jobs.description NOT IN (?11, ?12)
            THEN jobs.description ELSE excluded.description END,
        work_type = CASE
            WHEN excluded.work_type = ?11 AND jobs.work_type <> ?11
            THEN jobs.work_type ELSE excluded.work_type END,
        employment_type = CASE
            WHEN excluded.employment_type = ?11 AND jobs.employment_type <> ?11
            THEN jobs.employment_type ELSE excluded.employment_type END
"#;

const SELECT_COLUMNS: &str = "SELECT id, title, company, location, link, source, date_posted, \
     work_type, employment_type, description, first_seen_at FROM jobs";

pub struct JobRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> JobRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the record, or refresh the existing row for its link.
    /// Applying the same record twice leaves one unchanged row.
    pub async fn upsert(&self, record: &JobRecord) -> Result<UpsertOutcome, ScrapeError> {
        let link = record.detail_url.as_str();
        let persistence = |source: sqlx::Error| ScrapeError::Persistence {
            link: link.to_string(),
            source,
        };

        let mut tx = self.pool.begin().await.map_err(persistence)?;

        let before = sqlx::query_as::<_, (String, String, String)>(
            "SELECT description, work_type, employment_type FROM jobs WHERE link = ?",
        )
        .bind(link)
        .fetch_optional(&mut *tx)
        .await
        .map_err(persistence)?;

        sqlx::query(UPSERT_SQL)
            .bind(&record.title)
            .bind(&record.company)
            .bind(&record.location)
            .bind(link)
            .bind(record.source.as_str())
            .bind(record.posted_date)
            .bind(&record.work_type)
            .bind(&record.employment_type)
            .bind(record.description_or_sentinel())
            .bind(Utc::now())
            .bind(NOT_AVAILABLE)
            .bind(CAPTCHA_BLOCKED)
            .execute(&mut *tx)
            .await
            .map_err(persistence)?;

        let outcome = match before {
            None => UpsertOutcome::Inserted,
            Some(before) => {
                let after = sqlx::query_as::<_, (String, String, String)>(
                    "SELECT description, work_type, employment_type FROM jobs WHERE link = ?",
                )
                .bind(link)
                .fetch_one(&mut *tx)
                .await
                .map_err(persistence)?;

                if after == before {
                    UpsertOutcome::Unchanged
                } else {
                    UpsertOutcome::Updated
                }
            }
        };

        tx.commit().await.map_err(persistence)?;

        debug!(link = %link, ?outcome, "Upserted job");
        Ok(outcome)
    }

    pub async fn find_by_link(&self, link: &str) -> Result<Option<StoredJob>> {
        let job = sqlx::query_as::<_, StoredJob>(&format!("{} WHERE link = ?", SELECT_COLUMNS))
            .bind(link)
            .fetch_optional(self.pool)
            .await?;
        Ok(job)
    }

    /// Jobs whose title contains `role`, ignoring ASCII case, newest first.
    pub async fn search_by_title(&self, role: &str) -> Result<Vec<StoredJob>> {
        let jobs = sqlx::query_as::<_, StoredJob>(&format!(
            "{} WHERE title LIKE '%' || ? || '%' ORDER BY date_posted DESC, id DESC",
            SELECT_COLUMNS
        ))
        .bind(role.trim())
        .fetch_all(self.pool)
        .await?;
        Ok(jobs)
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs")
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }
}
