// src/bin/backfill_cpf_cores.rs
//
// Standalone runner for the derived-core backfill, for cron/maintenance use.
// Batch sizing comes from the environment:
//   BACKFILL_BATCH_SIZE   rows per committed batch (default 1000)
//   BACKFILL_MAX_BATCHES  pause after this many batches (default: run to end)
// Pass --reset to discard the checkpoint and start from the first row.

use anyhow::{Context, Result};
use cnpj_lookup_lib::backfill::{BackfillEngine, DEFAULT_BATCH_SIZE};
use cnpj_lookup_lib::utils::db_connect::connect;
use cnpj_lookup_lib::utils::env::load_env;
use cnpj_lookup_lib::utils::schema_map::RegistrySchema;
use log::info;
use std::env;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    load_env();

    let args: Vec<String> = env::args().collect();
    let reset = args.contains(&"--reset".to_string());

    let batch_size = env::var("BACKFILL_BATCH_SIZE")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_BATCH_SIZE);
    let max_batches = env::var("BACKFILL_MAX_BATCHES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok());

    let schema = RegistrySchema::from_env();
    schema.log_config();

    let pool = connect().await.context("Failed to create database pool")?;
    schema
        .validate(&pool)
        .await
        .context("Registry schema validation failed")?;

    let engine = BackfillEngine::new(pool, schema);
    if reset {
        info!("--reset given; discarding the existing checkpoint");
        engine.checkpoint_store().reset().await?;
    }

    let summary = engine
        .run(batch_size, max_batches)
        .await
        .context("Backfill run failed")?;

    info!("--- BACKFILL SUMMARY ---");
    info!("Rows processed this run: {}", summary.rows_processed);
    info!("Batches committed: {}", summary.batches);
    info!("Rows processed in total: {}", summary.total_rows_processed);
    info!("Status: {}", summary.status.as_str());
    info!("------------------------");

    Ok(())
}
