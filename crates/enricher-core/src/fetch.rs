//! Concurrent download of scan PDFs, plus the missing-scan report.
//!
//! Architecture: a fixed number of worker tasks share one job queue. Each job
//! owns one output file and reports back on its own oneshot channel, so a
//! failing download never affects its siblings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::sanitize_key;
use crate::catalog::Catalog;

static BOOKS_EDITION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/books/edition/([^/]+)/([^/?]+)").unwrap());

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Settings for a fetch run.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub output_dir: PathBuf,
    pub num_workers: usize,
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("pdf/docs"),
            num_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            timeout_secs: 30,
        }
    }
}

/// One entry with a scan to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    pub key: String,
    pub scan_url: String,
}

impl FetchTask {
    /// The first URL of a `;`-separated list.
    pub fn primary_url(&self) -> &str {
        self.scan_url.split(';').next().unwrap_or("").trim()
    }
}

/// Entries with both a key and a scan URL, in catalog order.
pub fn tasks_from_catalog(catalog: &Catalog) -> Vec<FetchTask> {
    catalog
        .entries()
        .iter()
        .filter_map(|e| {
            let key = e.key().trim();
            let scan_url = e.scan_url().trim();
            if key.is_empty() || scan_url.is_empty() {
                None
            } else {
                Some(FetchTask {
                    key: key.to_string(),
                    scan_url: scan_url.to_string(),
                })
            }
        })
        .collect()
}

/// Output file for `key`.
pub fn pdf_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.pdf", sanitize_key(key)))
}

/// Direct PDF download URL for a supported scan URL.
///
/// Only Google Books edition pages are supported:
/// `https://www.google.com/books/edition/<name>/<id>` becomes
/// `https://www.google.com/books/download/<name>.pdf?id=<id>&output=pdf`.
pub fn download_url(scan_url: &str) -> Option<String> {
    let parsed = Url::parse(scan_url).ok()?;
    let host = parsed.host_str()?;
    if !host.contains("google") {
        return None;
    }
    let caps = BOOKS_EDITION_RE.captures(scan_url)?;
    Some(format!(
        "https://{}/books/download/{}.pdf?id={}&output=pdf",
        host, &caps[1], &caps[2]
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    Downloaded { bytes: usize },
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub key: String,
    pub status: FetchStatus,
}

/// Counts over a set of outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl FetchStats {
    pub fn from_outcomes(outcomes: &[FetchOutcome]) -> Self {
        let mut stats = Self::default();
        for o in outcomes {
            match o.status {
                FetchStatus::Downloaded { .. } => stats.downloaded += 1,
                FetchStatus::Skipped(_) => stats.skipped += 1,
                FetchStatus::Failed(_) => stats.failed += 1,
            }
        }
        stats
    }
}

/// A download job submitted to the pool.
pub struct FetchJob {
    pub task: FetchTask,
    pub result_tx: oneshot::Sender<FetchOutcome>,
}

/// A pool of worker tasks downloading scans.
///
/// Submit jobs via [`submit()`](FetchPool::submit) and receive each result on
/// the job's oneshot channel.
pub struct FetchPool {
    job_tx: async_channel::Sender<FetchJob>,
    pool_handle: JoinHandle<()>,
}

impl FetchPool {
    pub fn new(config: Arc<FetchConfig>, cancel: CancellationToken, num_workers: usize) -> Self {
        let (job_tx, job_rx) = async_channel::unbounded::<FetchJob>();
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let pool_handle = tokio::spawn(async move {
            let mut handles = Vec::with_capacity(num_workers.max(1));
            for _ in 0..num_workers.max(1) {
                handles.push(tokio::spawn(worker_loop(
                    job_rx.clone(),
                    config.clone(),
                    client.clone(),
                    cancel.clone(),
                )));
            }

            // Drop our clone so workers are the last holders
            drop(job_rx);

            for h in handles {
                let _ = h.await;
            }
        });

        Self {
            job_tx,
            pool_handle,
        }
    }

    pub async fn submit(&self, job: FetchJob) {
        let _ = self.job_tx.send(job).await;
    }

    /// Close the queue and wait for the workers to drain it.
    pub async fn shutdown(self) {
        self.job_tx.close();
        let _ = self.pool_handle.await;
    }
}

async fn worker_loop(
    rx: async_channel::Receiver<FetchJob>,
    config: Arc<FetchConfig>,
    client: reqwest::Client,
    cancel: CancellationToken,
) {
    while let Ok(FetchJob { task, result_tx }) = rx.recv().await {
        let outcome = if cancel.is_cancelled() {
            tracing::debug!(key = %task.key, "skipping: cancelled");
            FetchOutcome {
                key: task.key,
                status: FetchStatus::Skipped("cancelled".to_string()),
            }
        } else {
            fetch_one(&task, &config, &client).await
        };
        let _ = result_tx.send(outcome);
    }
}

/// Download one task's scan unless it is already on disk.
pub async fn fetch_one(
    task: &FetchTask,
    config: &FetchConfig,
    client: &reqwest::Client,
) -> FetchOutcome {
    let path = pdf_path(&config.output_dir, &task.key);
    let status = if path.exists() {
        FetchStatus::Skipped("already exists".to_string())
    } else {
        match download_url(task.primary_url()) {
            None => FetchStatus::Skipped("unsupported URL or invalid format".to_string()),
            Some(url) => {
                let timeout = Duration::from_secs(config.timeout_secs);
                match download_pdf(client, &url, &path, timeout).await {
                    Ok(bytes) => FetchStatus::Downloaded { bytes },
                    Err(e) => {
                        tracing::debug!(key = %task.key, url = %url, error = %e, "download failed");
                        FetchStatus::Failed(e.to_string())
                    }
                }
            }
        }
    };
    FetchOutcome {
        key: task.key.clone(),
        status,
    }
}

/// GET `url` into `path`. A partially written file is removed on error.
pub async fn download_pdf(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
    timeout: Duration,
) -> Result<usize, FetchError> {
    let result = async {
        let bytes = client
            .get(url)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &bytes).await?;
        Ok::<usize, FetchError>(bytes.len())
    }
    .await;

    if result.is_err() && path.exists() {
        let _ = tokio::fs::remove_file(path).await;
    }
    result
}

/// Download every task with a pool of `config.num_workers` workers.
///
/// Outcomes are returned in task order. `on_done` is called as each job
/// finishes.
pub async fn fetch_all(
    tasks: Vec<FetchTask>,
    config: FetchConfig,
    on_done: impl Fn(&FetchOutcome),
    cancel: CancellationToken,
) -> Result<Vec<FetchOutcome>, FetchError> {
    if tasks.is_empty() {
        return Ok(Vec::new());
    }
    tokio::fs::create_dir_all(&config.output_dir).await?;

    let num_workers = config.num_workers.max(1);
    let pool = FetchPool::new(Arc::new(config), cancel, num_workers);

    let mut receivers = Vec::with_capacity(tasks.len());
    for task in tasks {
        let (result_tx, result_rx) = oneshot::channel();
        receivers.push((task.key.clone(), result_rx));
        pool.submit(FetchJob { task, result_tx }).await;
    }

    let mut outcomes = Vec::with_capacity(receivers.len());
    for (key, rx) in receivers {
        let outcome = rx.await.unwrap_or(FetchOutcome {
            key,
            status: FetchStatus::Failed("worker exited".to_string()),
        });
        on_done(&outcome);
        outcomes.push(outcome);
    }

    pool.shutdown().await;
    Ok(outcomes)
}

/// Registrable domain of a scan URL: the last two host labels, the whole
/// host if it has only one, or `"unknown"`.
pub fn domain_of(scan_url: &str) -> String {
    let clean = scan_url.split(';').next().unwrap_or("").trim();
    let Some(host) = Url::parse(clean)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
    else {
        return "unknown".to_string();
    };
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() >= 2 {
        labels[labels.len() - 2..].join(".")
    } else {
        host
    }
}

/// Entries whose scan has not been downloaded, grouped by domain.
/// Domains are sorted; tasks keep catalog order within a domain.
pub fn missing_by_domain(tasks: &[FetchTask], dir: &Path) -> BTreeMap<String, Vec<FetchTask>> {
    let mut missing: BTreeMap<String, Vec<FetchTask>> = BTreeMap::new();
    for task in tasks {
        if !pdf_path(dir, &task.key).exists() {
            missing
                .entry(domain_of(&task.scan_url))
                .or_default()
                .push(task.clone());
        }
    }
    missing
}
