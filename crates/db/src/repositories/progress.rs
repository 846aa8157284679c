use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use orderly_core::domain::account::UserId;
use orderly_core::domain::progress::{ProgressEntry, ProgressEntryId, RunId};

use super::{format_timestamp, parse_timestamp, ProgressRepository, RepositoryError};
use crate::DbPool;

pub struct SqlProgressRepository {
    pool: DbPool,
}

impl SqlProgressRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProgressRepository for SqlProgressRepository {
    async fn append(&self, entry: ProgressEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO progress_entries (id, run_id, user_id, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entry.id.0)
        .bind(&entry.run_id.0)
        .bind(entry.user_id.as_str())
        .bind(&entry.content)
        .bind(format_timestamp(&entry.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_for_run(
        &self,
        run_id: &RunId,
    ) -> Result<Option<ProgressEntry>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, run_id, user_id, content, created_at
             FROM progress_entries
             WHERE run_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1",
        )
        .bind(&run_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(entry_from_row).transpose()
    }

    async fn list_for_run(&self, run_id: &RunId) -> Result<Vec<ProgressEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, run_id, user_id, content, created_at
             FROM progress_entries
             WHERE run_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&run_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn latest_for_user_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Option<ProgressEntry>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, run_id, user_id, content, created_at
             FROM progress_entries
             WHERE user_id = ? AND created_at > ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1",
        )
        .bind(user_id.as_str())
        .bind(format_timestamp(&since))
        .fetch_optional(&self.pool)
        .await?;

        row.map(entry_from_row).transpose()
    }
}

fn entry_from_row(row: SqliteRow) -> Result<ProgressEntry, RepositoryError> {
    Ok(ProgressEntry {
        id: ProgressEntryId(row.try_get("id")?),
        run_id: RunId(row.try_get("run_id")?),
        user_id: UserId(row.try_get("user_id")?),
        content: row.try_get("content")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
