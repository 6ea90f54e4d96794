// src/backfill/checkpoint.rs
//
// Single-row maintenance table recording how far the core backfill has
// advanced. Any process may read it to observe progress; only the engine
// writes it.

use anyhow::{Context, Result};
use log::{info, warn};

use crate::utils::db_connect::PgPool;
use crate::utils::schema_map::RegistrySchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillStatus {
    NotStarted,
    InProgress,
    Paused,
    Completed,
}

impl BackfillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackfillStatus::NotStarted => "not_started",
            BackfillStatus::InProgress => "in_progress",
            BackfillStatus::Paused => "paused",
            BackfillStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "not_started" => Some(BackfillStatus::NotStarted),
            "in_progress" => Some(BackfillStatus::InProgress),
            "paused" => Some(BackfillStatus::Paused),
            "completed" => Some(BackfillStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackfillCheckpoint {
    pub last_processed_row_id: i64,
    pub rows_processed_count: i64,
    pub status: BackfillStatus,
}

impl Default for BackfillCheckpoint {
    fn default() -> Self {
        Self {
            last_processed_row_id: 0,
            rows_processed_count: 0,
            status: BackfillStatus::NotStarted,
        }
    }
}

/// Repository over the checkpoint table. A malformed or incompatible table
/// (older runs used looser shapes) is dropped and recreated via [`reset`],
/// never treated as fatal.
///
/// [`reset`]: CheckpointStore::reset
pub struct CheckpointStore {
    pool: PgPool,
    table: String,
}

impl CheckpointStore {
    pub fn new(pool: PgPool, schema: &RegistrySchema) -> Self {
        Self {
            pool,
            table: schema.checkpoint_table.clone(),
        }
    }

    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_processed_row_id BIGINT NOT NULL,
                rows_processed_count BIGINT NOT NULL,
                status TEXT NOT NULL,
                started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            self.table
        )
    }

    /// Loads the checkpoint, creating table and row as needed. A table that
    /// cannot answer the canonical select, or that carries an unknown status
    /// value, is reset to a fresh zero checkpoint.
    pub async fn load_or_init(&self) -> Result<BackfillCheckpoint> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for checkpoint load")?;

        conn.execute(&self.create_table_sql(), &[])
            .await
            .context("Failed to ensure checkpoint table")?;

        let select = format!(
            "SELECT last_processed_row_id, rows_processed_count, status FROM {} WHERE id = 1",
            self.table
        );
        match conn.query_opt(&select, &[]).await {
            Ok(Some(row)) => {
                let status_str: String = row.get("status");
                match BackfillStatus::parse(&status_str) {
                    Some(status) => Ok(BackfillCheckpoint {
                        last_processed_row_id: row.get("last_processed_row_id"),
                        rows_processed_count: row.get("rows_processed_count"),
                        status,
                    }),
                    None => {
                        warn!(
                            "Checkpoint has unknown status '{}'; resetting to start over",
                            status_str
                        );
                        drop(conn);
                        self.reset().await
                    }
                }
            }
            Ok(None) => {
                let insert = format!(
                    "INSERT INTO {} (id, last_processed_row_id, rows_processed_count, status)
                     VALUES (1, 0, 0, $1)
                     ON CONFLICT (id) DO NOTHING",
                    self.table
                );
                conn.execute(&insert, &[&BackfillStatus::NotStarted.as_str()])
                    .await
                    .context("Failed to insert initial checkpoint row")?;
                Ok(BackfillCheckpoint::default())
            }
            Err(e) => {
                warn!(
                    "Checkpoint table '{}' is incompatible ({}); resetting it",
                    self.table, e
                );
                drop(conn);
                self.reset().await
            }
        }
    }

    /// Advances the checkpoint after a committed batch. Runs as its own
    /// statement, outside the batch's data transaction: a crash between the
    /// two re-derives at most one batch on resume instead of losing progress.
    pub async fn advance(&self, last_processed_row_id: i64, rows_processed_count: i64) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for checkpoint advance")?;
        let update = format!(
            "UPDATE {} SET last_processed_row_id = $1, rows_processed_count = $2,
                    status = $3, updated_at = now()
             WHERE id = 1",
            self.table
        );
        conn.execute(
            &update,
            &[
                &last_processed_row_id,
                &rows_processed_count,
                &BackfillStatus::InProgress.as_str(),
            ],
        )
        .await
        .context("Failed to advance checkpoint")?;
        Ok(())
    }

    pub async fn set_status(&self, status: BackfillStatus) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for checkpoint status update")?;
        let update = format!(
            "UPDATE {} SET status = $1, updated_at = now() WHERE id = 1",
            self.table
        );
        conn.execute(&update, &[&status.as_str()])
            .await
            .context("Failed to update checkpoint status")?;
        Ok(())
    }

    /// Drops and recreates the checkpoint, returning a fresh zero record.
    /// The explicit way to start the backfill over from the first row.
    pub async fn reset(&self) -> Result<BackfillCheckpoint> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for checkpoint reset")?;
        conn.execute(&format!("DROP TABLE IF EXISTS {}", self.table), &[])
            .await
            .context("Failed to drop checkpoint table")?;
        conn.execute(&self.create_table_sql(), &[])
            .await
            .context("Failed to recreate checkpoint table")?;
        let insert = format!(
            "INSERT INTO {} (id, last_processed_row_id, rows_processed_count, status)
             VALUES (1, 0, 0, $1)",
            self.table
        );
        conn.execute(&insert, &[&BackfillStatus::NotStarted.as_str()])
            .await
            .context("Failed to insert fresh checkpoint row")?;
        info!("Checkpoint reset; backfill will start from the first row");
        Ok(BackfillCheckpoint::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            BackfillStatus::NotStarted,
            BackfillStatus::InProgress,
            BackfillStatus::Paused,
            BackfillStatus::Completed,
        ] {
            assert_eq!(BackfillStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert_eq!(BackfillStatus::parse("em_andamento"), None);
        assert_eq!(BackfillStatus::parse(""), None);
    }

    #[test]
    fn test_default_checkpoint_is_zeroed() {
        let ckpt = BackfillCheckpoint::default();
        assert_eq!(ckpt.last_processed_row_id, 0);
        assert_eq!(ckpt.rows_processed_count, 0);
        assert_eq!(ckpt.status, BackfillStatus::NotStarted);
    }
}
