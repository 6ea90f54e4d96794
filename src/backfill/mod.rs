// src/backfill/mod.rs
//
// Resumable batch recomputation of the derived CPF-core column. Each batch
// is one committed transaction; the checkpoint advances in a separate
// statement afterwards, so an interruption at any point loses no progress
// and re-derives at most one batch of rows on resume.

pub mod checkpoint;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::time::Instant;

use crate::matching::identifier::derive_core_or_sentinel;
use crate::utils::db_connect::PgPool;
use crate::utils::get_memory_usage;
use crate::utils::schema_map::RegistrySchema;

pub use checkpoint::{BackfillCheckpoint, BackfillStatus, CheckpointStore};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug)]
pub struct BackfillSummary {
    /// Rows rewritten during this invocation.
    pub rows_processed: u64,
    pub batches: usize,
    /// Cumulative rows across all invocations, from the checkpoint.
    pub total_rows_processed: i64,
    pub status: BackfillStatus,
}

pub struct BackfillEngine {
    pool: PgPool,
    schema: RegistrySchema,
    store: CheckpointStore,
}

/// Predicate selecting rows whose derived core still needs (re)computation.
fn qualifying_predicate(schema: &RegistrySchema) -> String {
    let core = &schema.partner_core_col;
    format!(
        "({core} IS NULL OR {core} = '' OR char_length({core}) <> 6 OR {core} !~ '^[0-9]{{6}}$')",
        core = core
    )
}

impl BackfillEngine {
    pub fn new(pool: PgPool, schema: RegistrySchema) -> Self {
        let store = CheckpointStore::new(pool.clone(), &schema);
        Self { pool, schema, store }
    }

    pub fn checkpoint_store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Runs the backfill until the qualifying set is exhausted or
    /// `max_batches` is reached (cooperative pause). Safe to interrupt and
    /// re-invoke at any time.
    pub async fn run(&self, batch_size: usize, max_batches: Option<usize>) -> Result<BackfillSummary> {
        let batch_size = batch_size.max(1);
        let ckpt = self.store.load_or_init().await?;
        let mut last_id = ckpt.last_processed_row_id;
        let mut total_processed = ckpt.rows_processed_count;

        if ckpt.status != BackfillStatus::NotStarted {
            info!(
                "Resuming backfill from row id {} ({} rows processed so far, status {})",
                last_id,
                total_processed,
                ckpt.status.as_str()
            );
        }

        let remaining = self.count_remaining(last_id).await?;
        info!("{} rows need a recomputed core", remaining);
        if remaining == 0 {
            if ckpt.status != BackfillStatus::Completed {
                self.store.set_status(BackfillStatus::Completed).await?;
            }
            return Ok(BackfillSummary {
                rows_processed: 0,
                batches: 0,
                total_rows_processed: total_processed,
                status: BackfillStatus::Completed,
            });
        }

        info!("Memory usage at start: {} MB", get_memory_usage().await);

        let pb = ProgressBar::new(remaining as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_message("Recomputing cores...");

        let started = Instant::now();
        let mut rows_this_run: u64 = 0;
        let mut batches: usize = 0;
        let mut exhausted = false;

        let loop_result: Result<()> = async {
            loop {
                let batch = self.fetch_batch(last_id, batch_size).await?;
                if batch.is_empty() {
                    exhausted = true;
                    break;
                }

                let ids: Vec<i64> = batch.iter().map(|(id, _)| *id).collect();
                let cores: Vec<String> = batch
                    .iter()
                    .map(|(_, raw)| derive_core_or_sentinel(raw.as_deref().unwrap_or_default()))
                    .collect();

                self.apply_batch(&ids, &cores).await?;

                last_id = *ids.iter().max().unwrap_or(&last_id);
                rows_this_run += batch.len() as u64;
                total_processed += batch.len() as i64;
                batches += 1;
                pb.inc(batch.len() as u64);

                // Checkpoint in its own statement, after the batch commit.
                self.store.advance(last_id, total_processed).await?;

                if batches % 5 == 0 {
                    let elapsed = started.elapsed().as_secs_f64();
                    let rate = if elapsed > 0.0 {
                        rows_this_run as f64 / elapsed
                    } else {
                        0.0
                    };
                    pb.set_message(format!("{:.0} rows/s", rate));
                }

                if let Some(max) = max_batches {
                    if batches >= max {
                        info!("Reached the {} batch limit; pausing", max);
                        break;
                    }
                }
            }
            Ok(())
        }
        .await;

        pb.finish_with_message("Core backfill batch loop finished");

        if let Err(e) = loop_result {
            // The failed batch rolled back; the checkpoint still points at
            // the last committed batch, so a re-invocation resumes cleanly.
            warn!("Backfill stopped on error after {} committed batches: {}", batches, e);
            if let Err(status_err) = self.store.set_status(BackfillStatus::Paused).await {
                warn!("Also failed to mark checkpoint paused: {}", status_err);
            }
            return Err(e);
        }

        let final_status = if exhausted {
            self.store.set_status(BackfillStatus::Completed).await?;
            info!("All qualifying rows processed; rebuilding the core index");
            self.rebuild_core_index().await?;
            BackfillStatus::Completed
        } else {
            self.store.set_status(BackfillStatus::Paused).await?;
            BackfillStatus::Paused
        };

        info!(
            "Backfill run finished: {} rows in {} batches ({:.1?}), status {}. Memory: {} MB",
            rows_this_run,
            batches,
            started.elapsed(),
            final_status.as_str(),
            get_memory_usage().await
        );

        Ok(BackfillSummary {
            rows_processed: rows_this_run,
            batches,
            total_rows_processed: total_processed,
            status: final_status,
        })
    }

    /// Drop-if-exists then create: rebuilding is idempotent and is the only
    /// way the index is ever created.
    pub async fn rebuild_core_index(&self) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for index rebuild")?;
        conn.execute(
            &format!("DROP INDEX IF EXISTS {}", self.schema.core_index_name),
            &[],
        )
        .await
        .context("Failed to drop existing core index")?;
        conn.execute(
            &format!(
                "CREATE INDEX {} ON {} ({})",
                self.schema.core_index_name, self.schema.partner_table, self.schema.partner_core_col
            ),
            &[],
        )
        .await
        .context("Failed to create core index")?;
        info!("Core index {} rebuilt", self.schema.core_index_name);
        Ok(())
    }

    async fn count_remaining(&self, after_id: i64) -> Result<i64> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for remaining count")?;
        let sql = format!(
            "SELECT COUNT(*) FROM {table} WHERE {id} > $1 AND {predicate}",
            table = self.schema.partner_table,
            id = self.schema.partner_id_col,
            predicate = qualifying_predicate(&self.schema),
        );
        let row = conn
            .query_one(&sql, &[&after_id])
            .await
            .context("Failed to count rows needing a recomputed core")?;
        Ok(row.get(0))
    }

    async fn fetch_batch(
        &self,
        after_id: i64,
        batch_size: usize,
    ) -> Result<Vec<(i64, Option<String>)>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for batch fetch")?;
        let sql = format!(
            "SELECT {id}, {raw} FROM {table}
             WHERE {id} > $1 AND {predicate}
             ORDER BY {id}
             LIMIT {limit}",
            id = self.schema.partner_id_col,
            raw = self.schema.partner_identifier_col,
            table = self.schema.partner_table,
            predicate = qualifying_predicate(&self.schema),
            limit = batch_size,
        );
        let rows = conn
            .query(&sql, &[&after_id])
            .await
            .context("Failed to fetch next backfill batch")?;
        Ok(rows.iter().map(|row| (row.get(0), row.get(1))).collect())
    }

    /// Writes one batch of recomputed cores inside a single transaction.
    /// Either the whole batch lands or none of it does.
    async fn apply_batch(&self, ids: &[i64], cores: &[String]) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for batch update")?;
        let tx = conn
            .transaction()
            .await
            .context("Failed to open batch transaction")?;
        let sql = format!(
            "UPDATE {table} AS t SET {core} = d.core
             FROM (SELECT unnest($1::bigint[]) AS id, unnest($2::text[]) AS core) AS d
             WHERE t.{id} = d.id",
            table = self.schema.partner_table,
            core = self.schema.partner_core_col,
            id = self.schema.partner_id_col,
        );
        tx.execute(&sql, &[&ids, &cores])
            .await
            .context("Failed to apply batch core updates")?;
        tx.commit().await.context("Failed to commit batch")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualifying_predicate_covers_all_invalid_shapes() {
        let predicate = qualifying_predicate(&RegistrySchema::default());
        assert!(predicate.contains("cpf_miolo IS NULL"));
        assert!(predicate.contains("cpf_miolo = ''"));
        assert!(predicate.contains("char_length(cpf_miolo) <> 6"));
        assert!(predicate.contains("!~ '^[0-9]{6}$'"));
    }

    #[test]
    fn test_sentinel_rows_leave_the_qualifying_set() {
        // A row rewritten with the sentinel must not match the predicate
        // again: six digits, all zeroes.
        let sentinel = derive_core_or_sentinel("x");
        assert_eq!(sentinel.len(), 6);
        assert!(sentinel.chars().all(|c| c.is_ascii_digit()));
    }
}
