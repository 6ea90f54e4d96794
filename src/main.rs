use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cnpj_lookup_lib::backfill::{BackfillEngine, DEFAULT_BATCH_SIZE};
use cnpj_lookup_lib::io::input::{read_company_list, read_partner_queries};
use cnpj_lookup_lib::io::report::{
    sibling_output_path, write_company_csv_summary, write_json, write_partner_csv_summary,
    CompanyQueryReport, PartnerQueryReport,
};
use cnpj_lookup_lib::matching::resolver::{
    resolve_company, resolve_partner, DEFAULT_SIMILARITY_THRESHOLD,
};
use cnpj_lookup_lib::utils::db_connect::{connect, get_pool_status, PgPool};
use cnpj_lookup_lib::utils::env::load_env;
use cnpj_lookup_lib::utils::schema_map::RegistrySchema;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(
    name = "cnpj_lookup",
    about = "Fuzzy partner and company lookup over the CNPJ registry"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a partner by raw identifier and optional name
    Partner {
        /// Raw identifier (masked, formatted or bare digits)
        #[arg(long)]
        identifier: Option<String>,
        /// Free-text partner name to score candidates against
        #[arg(long)]
        name: Option<String>,
        /// CSV/TXT file with one name + identifier per record
        #[arg(long)]
        input: Option<PathBuf>,
        /// Similarity acceptance threshold
        #[arg(long, default_value_t = DEFAULT_SIMILARITY_THRESHOLD)]
        threshold: f64,
        /// Cap on bulk-listing size when no name is given
        #[arg(long, default_value_t = 100)]
        limit: usize,
        /// Output path for the JSON report (file inputs only)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Look up a company and its partners by CNPJ
    Company {
        #[arg(long)]
        cnpj: Option<String>,
        /// CSV/TXT file with one CNPJ per record
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Recompute the derived core column in resumable batches
    Backfill {
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        /// Stop (pause) after this many batches
        #[arg(long)]
        max_batches: Option<usize>,
        /// Discard the checkpoint and start from the first row
        #[arg(long)]
        reset: bool,
    },
    /// Rebuild the index over the derived core column
    Index,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    load_env();

    let cli = Cli::parse();

    let schema = RegistrySchema::from_env();
    schema.log_config();

    let pool = connect().await.context("Failed to connect to database")?;
    schema
        .validate(&pool)
        .await
        .context("Registry schema validation failed")?;

    match cli.command {
        Command::Partner {
            identifier,
            name,
            input,
            threshold,
            limit,
            output,
        } => {
            if let Some(path) = input {
                run_partner_file(&pool, &schema, &path, threshold, limit, output).await?;
            } else if let Some(identifier) = identifier {
                let report =
                    partner_query(&pool, &schema, &identifier, name.as_deref(), threshold, limit)
                        .await;
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                bail!("Provide --identifier or --input");
            }
        }
        Command::Company { cnpj, input, output } => {
            if let Some(path) = input {
                run_company_file(&pool, &schema, &path, output).await?;
            } else if let Some(cnpj) = cnpj {
                let report = company_query(&pool, &schema, &cnpj).await;
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                bail!("Provide --cnpj or --input");
            }
        }
        Command::Backfill {
            batch_size,
            max_batches,
            reset,
        } => {
            let engine = BackfillEngine::new(pool.clone(), schema.clone());
            if reset {
                engine.checkpoint_store().reset().await?;
            }
            let summary = engine.run(batch_size, max_batches).await?;
            info!(
                "Backfill summary: {} rows in {} batches this run, {} total, status {}",
                summary.rows_processed,
                summary.batches,
                summary.total_rows_processed,
                summary.status.as_str()
            );
        }
        Command::Index => {
            let engine = BackfillEngine::new(pool.clone(), schema.clone());
            engine.rebuild_core_index().await?;
        }
    }

    let (pool_size, available, in_use) = get_pool_status(&pool);
    info!(
        "Final DB Connection Pool Status: Total: {}, Available: {}, In Use: {}",
        pool_size, available, in_use
    );
    Ok(())
}

/// One partner lookup, always reduced to a structured report.
async fn partner_query(
    pool: &PgPool,
    schema: &RegistrySchema,
    identifier: &str,
    name: Option<&str>,
    threshold: f64,
    limit: usize,
) -> PartnerQueryReport {
    let started = Instant::now();
    match resolve_partner(pool, schema, identifier, name, threshold, limit).await {
        Ok(outcome) => PartnerQueryReport::from_outcome(
            identifier,
            name,
            &outcome,
            started.elapsed().as_millis() as u64,
        ),
        Err(e) => PartnerQueryReport::from_error(
            identifier,
            name,
            &format!("{:#}", e),
            started.elapsed().as_millis() as u64,
        ),
    }
}

async fn company_query(pool: &PgPool, schema: &RegistrySchema, cnpj: &str) -> CompanyQueryReport {
    let started = Instant::now();
    match resolve_company(pool, schema, cnpj).await {
        Ok(resolution) => CompanyQueryReport::from_resolution(
            cnpj,
            &resolution,
            started.elapsed().as_millis() as u64,
        ),
        Err(e) => CompanyQueryReport::from_error(
            cnpj,
            &format!("{:#}", e),
            started.elapsed().as_millis() as u64,
        ),
    }
}

async fn run_partner_file(
    pool: &PgPool,
    schema: &RegistrySchema,
    path: &PathBuf,
    threshold: f64,
    limit: usize,
    output: Option<PathBuf>,
) -> Result<()> {
    let queries = read_partner_queries(path)?;
    info!("Resolving {} partner queries from {}", queries.len(), path.display());

    let pb = ProgressBar::new(queries.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_message("Resolving partners...");

    let mut reports = Vec::with_capacity(queries.len());
    for query in &queries {
        let report =
            partner_query(pool, schema, &query.cpf, Some(query.name.as_str()), threshold, limit)
                .await;
        pb.set_message(format!("{}: {}", query.name, report.status));
        reports.push(report);
        pb.inc(1);
    }
    pb.finish_with_message("Partner resolution complete");

    let found = reports.iter().filter(|r| r.status == "found").count();
    info!("{}/{} queries found a partner", found, reports.len());

    let json_path = output.unwrap_or_else(|| sibling_output_path(path, "json"));
    write_json(&json_path, &reports)?;
    write_partner_csv_summary(&sibling_output_path(path, "csv"), &reports)?;
    Ok(())
}

async fn run_company_file(
    pool: &PgPool,
    schema: &RegistrySchema,
    path: &PathBuf,
    output: Option<PathBuf>,
) -> Result<()> {
    let cnpjs = read_company_list(path)?;
    info!("Checking {} CNPJ entries from {}", cnpjs.len(), path.display());

    let pb = ProgressBar::new(cnpjs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_message("Checking CNPJs...");

    let mut reports = Vec::with_capacity(cnpjs.len());
    for cnpj in &cnpjs {
        let report = company_query(pool, schema, cnpj).await;
        pb.set_message(format!("{}: {}", cnpj, report.status));
        reports.push(report);
        pb.inc(1);
    }
    pb.finish_with_message("CNPJ checks complete");

    let json_path = output.unwrap_or_else(|| sibling_output_path(path, "json"));
    write_json(&json_path, &reports)?;
    write_company_csv_summary(&sibling_output_path(path, "csv"), &reports)?;
    Ok(())
}
