// src/bin/download_registry.rs
//
// Fetches the public registry archives (companies, establishments, partners
// and the auxiliary code tables) into a local directory. Files already on
// disk are skipped, so the job can be re-run until everything is present.
// Failed downloads retry a bounded number of times with a fixed backoff.

use anyhow::{Context, Result};
use clap::Parser;
use cnpj_lookup_lib::utils::env::load_env;
use futures::stream::{self, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://dadosabertos.rfb.gov.br/CNPJ/";
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(5);

const COMPANY_FILE_COUNT: usize = 10;
const ESTABLISHMENT_FILE_COUNT: usize = 10;
const PARTNER_FILE_COUNT: usize = 9;
const AUX_FILES: [&str; 6] = [
    "Cnaes.zip",
    "Motivos.zip",
    "Municipios.zip",
    "Naturezas.zip",
    "Paises.zip",
    "Qualificacoes.zip",
];

#[derive(Parser)]
#[command(name = "download_registry", about = "Download the full registry dataset")]
struct Args {
    /// Output directory for the archives
    #[arg(long, default_value = "base_completa")]
    dir: PathBuf,
    /// Concurrent downloads
    #[arg(long, default_value_t = 3)]
    workers: usize,
    /// Only fetch the partner archives
    #[arg(long)]
    socios_only: bool,
    /// Registry mirror to download from
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,
}

#[derive(Debug, Clone)]
struct DownloadTask {
    url: Url,
    output: PathBuf,
}

fn build_tasks(args: &Args) -> Result<Vec<DownloadTask>> {
    let base = Url::parse(&args.base_url).context("Invalid base URL")?;
    let mut tasks = Vec::new();
    let mut push = |name: String, tasks: &mut Vec<DownloadTask>| -> Result<()> {
        tasks.push(DownloadTask {
            url: base
                .join(&name)
                .with_context(|| format!("Failed to build URL for {}", name))?,
            output: args.dir.join(name.to_lowercase()),
        });
        Ok(())
    };

    if !args.socios_only {
        for i in 0..COMPANY_FILE_COUNT {
            push(format!("Empresas{}.zip", i), &mut tasks)?;
        }
        for i in 0..ESTABLISHMENT_FILE_COUNT {
            push(format!("Estabelecimentos{}.zip", i), &mut tasks)?;
        }
    }
    for i in 0..PARTNER_FILE_COUNT {
        push(format!("Socios{}.zip", i), &mut tasks)?;
    }
    if !args.socios_only {
        for name in AUX_FILES {
            push(name.to_string(), &mut tasks)?;
        }
    }
    Ok(tasks)
}

/// Downloads one archive with a bounded attempt loop. Returns false when the
/// file was already on disk.
async fn download_file(
    client: &reqwest::Client,
    task: &DownloadTask,
    multi: &MultiProgress,
) -> Result<bool> {
    if task.output.exists() {
        let size = tokio::fs::metadata(&task.output).await.map(|m| m.len()).unwrap_or(0);
        info!(
            "Already present: {} ({:.1} MB)",
            task.output.display(),
            size as f64 / 1024.0 / 1024.0
        );
        return Ok(false);
    }
    if let Some(parent) = task.output.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create output directory")?;
    }

    let mut attempt = 1;
    loop {
        match try_download(client, task, multi).await {
            Ok(()) => return Ok(true),
            Err(e) if attempt < MAX_ATTEMPTS => {
                warn!(
                    "Download of {} failed (attempt {}/{}): {:#}. Retrying in {:?}",
                    task.url, attempt, MAX_ATTEMPTS, e, RETRY_BACKOFF
                );
                tokio::time::sleep(RETRY_BACKOFF).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(e.context(format!(
                    "Giving up on {} after {} attempts",
                    task.url, MAX_ATTEMPTS
                )))
            }
        }
    }
}

async fn try_download(
    client: &reqwest::Client,
    task: &DownloadTask,
    multi: &MultiProgress,
) -> Result<()> {
    let response = client
        .get(task.url.clone())
        .send()
        .await
        .context("Request failed")?
        .error_for_status()
        .context("Server returned an error status")?;

    let total = response.content_length().unwrap_or(0);
    let pb = multi.add(ProgressBar::new(total));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg:>22} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_message(file_label(&task.output));

    // Stream into a .part file; only a completed download gets the real
    // name, so skip-if-exists never trusts a truncated file.
    let part_path = task.output.with_extension("zip.part");
    let mut file = tokio::fs::File::create(&part_path)
        .await
        .with_context(|| format!("Failed to create {}", part_path.display()))?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Failed while streaming response body")?;
        file.write_all(&chunk)
            .await
            .context("Failed to write chunk to disk")?;
        pb.inc(chunk.len() as u64);
    }
    file.flush().await.context("Failed to flush downloaded file")?;
    drop(file);

    tokio::fs::rename(&part_path, &task.output)
        .await
        .context("Failed to move completed download into place")?;
    pb.finish_with_message(format!("{} done", file_label(&task.output)));
    Ok(())
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("archive")
        .to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    load_env();

    let args = Args::parse();
    let workers = args.workers.clamp(1, num_cpus::get());
    let tasks = build_tasks(&args)?;
    info!(
        "Downloading {} archives to {} with {} workers",
        tasks.len(),
        args.dir.display(),
        workers
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(600))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;

    let multi = MultiProgress::new();
    let downloaded = Arc::new(AtomicUsize::new(0));
    let skipped = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    stream::iter(tasks)
        .map(|task| {
            let client = client.clone();
            let multi = multi.clone();
            let downloaded = downloaded.clone();
            let skipped = skipped.clone();
            let failed = failed.clone();
            async move {
                match download_file(&client, &task, &multi).await {
                    Ok(true) => downloaded.fetch_add(1, Ordering::SeqCst),
                    Ok(false) => skipped.fetch_add(1, Ordering::SeqCst),
                    Err(e) => {
                        warn!("{:#}", e);
                        failed.fetch_add(1, Ordering::SeqCst)
                    }
                };
            }
        })
        .buffer_unordered(workers)
        .collect::<Vec<_>>()
        .await;

    info!("--- DOWNLOAD SUMMARY ---");
    info!("Downloaded: {}", downloaded.load(Ordering::SeqCst));
    info!("Already present: {}", skipped.load(Ordering::SeqCst));
    info!("Failed: {}", failed.load(Ordering::SeqCst));
    info!("------------------------");

    Ok(())
}
