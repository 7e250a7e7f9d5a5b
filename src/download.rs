//! Download scheduler (C9)
//!
//! Bounded-concurrency retrying fetcher with cooperative cancellation.
//! Grounded on the `HttpTransport`/`SyncTransport` pattern in
//! `other_examples/d7b7b851_WushuDan-AcornDB-binding__rust-acorn-sync-src-lib.rs.rs`
//! (a `reqwest::Client` wrapped behind a small transport trait), and on
//! `szilu-syncr/src/progress/mod.rs`'s progress-callback shape, combined
//! with `tokio::sync::Semaphore` + `tokio_util::sync::CancellationToken`
//! for the bounded-worker-pool-with-cancellation model §9 calls for.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::TryStreamExt;
use tokio::sync::Semaphore;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use urlencoding::encode;

use crate::error::{DownloadError, SyncError};
use crate::progress::AtomicProgress;

const RETRY_DELAYS_SECS: [u64; 5] = [1, 2, 3, 4, 5];

/// One file to fetch: its wire-relative path and the local destination
/// to write it to (already resolved to either the live install root or
/// the staging directory by the caller).
#[derive(Debug, Clone)]
pub struct DownloadTask {
	pub wire_path: String,
	pub destination: PathBuf,
}

pub struct DownloadScheduler {
	client: reqwest::Client,
	base_url: String,
	semaphore: Arc<Semaphore>,
	cancel: CancellationToken,
}

impl DownloadScheduler {
	pub fn new(base_url: impl Into<String>, concurrency: usize, cancel: CancellationToken) -> Self {
		Self {
			client: reqwest::Client::new(),
			base_url: base_url.into(),
			semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
			cancel,
		}
	}

	/// Run every task concurrently, bounded by the configured
	/// semaphore, reporting `(completed, total)` after each completion.
	/// Returns the first error encountered, if any; regardless of
	/// success, all tasks are awaited to completion or cancellation.
	pub async fn run(&self, tasks: Vec<DownloadTask>, progress: Arc<AtomicProgress>) -> Result<(), SyncError> {
		let futures = tasks.into_iter().map(|task| {
			let client = self.client.clone();
			let base_url = self.base_url.clone();
			let semaphore = self.semaphore.clone();
			let cancel = self.cancel.clone();
			let progress = progress.clone();
			async move {
				let _permit = semaphore.acquire().await.expect("semaphore never closed");
				let result = fetch_one(&client, &base_url, &task, &cancel).await;
				progress.complete_one();
				result
			}
		});

		let results = join_all(futures).await;
		for result in results {
			result?;
		}
		Ok(())
	}
}

async fn fetch_one(
	client: &reqwest::Client,
	base_url: &str,
	task: &DownloadTask,
	cancel: &CancellationToken,
) -> Result<(), SyncError> {
	let url = format!("{}/narconet/fetch/{}", base_url.trim_end_matches('/'), encode(&task.wire_path));

	for (attempt_index, delay_secs) in RETRY_DELAYS_SECS.iter().enumerate() {
		if cancel.is_cancelled() {
			cleanup_partial(&task.destination).await;
			return Err(DownloadError::Cancelled { path: task.wire_path.clone() }.into());
		}

		let attempt = attempt_index as u32 + 1;
		match try_fetch(client, &url, &task.destination, cancel).await {
			Ok(()) => return Ok(()),
			Err(FetchAttemptError::Terminal(status)) => {
				cleanup_partial(&task.destination).await;
				return Err(DownloadError::Terminal { path: task.wire_path.clone(), status }.into());
			}
			Err(FetchAttemptError::Cancelled) => {
				cleanup_partial(&task.destination).await;
				return Err(DownloadError::Cancelled { path: task.wire_path.clone() }.into());
			}
			Err(FetchAttemptError::Transient(message)) => {
				if attempt == RETRY_DELAYS_SECS.len() as u32 {
					cleanup_partial(&task.destination).await;
					return Err(DownloadError::RetriesExhausted {
						path: task.wire_path.clone(),
						attempts: attempt,
						source: message,
					}
					.into());
				}
				tokio::select! {
					_ = tokio::time::sleep(Duration::from_secs(*delay_secs)) => {}
					_ = cancel.cancelled() => {
						cleanup_partial(&task.destination).await;
						return Err(DownloadError::Cancelled { path: task.wire_path.clone() }.into());
					}
				}
			}
		}
	}

	unreachable!("retry loop always returns")
}

enum FetchAttemptError {
	Transient(String),
	Terminal(u16),
	Cancelled,
}

async fn try_fetch(
	client: &reqwest::Client,
	url: &str,
	destination: &Path,
	cancel: &CancellationToken,
) -> Result<(), FetchAttemptError> {
	let response = tokio::select! {
		r = client.get(url).send() => r.map_err(|e| FetchAttemptError::Transient(e.to_string()))?,
		_ = cancel.cancelled() => return Err(FetchAttemptError::Cancelled),
	};

	let status = response.status();
	if status.is_server_error() || status.as_u16() == 408 || status.as_u16() == 429 {
		return Err(FetchAttemptError::Transient(format!("status {status}")));
	}
	if !status.is_success() {
		return Err(FetchAttemptError::Terminal(status.as_u16()));
	}

	if let Some(parent) = destination.parent() {
		tokio::fs::create_dir_all(parent)
			.await
			.map_err(|e| FetchAttemptError::Transient(e.to_string()))?;
	}

	let mut out_file = tokio::fs::File::create(destination).await.map_err(|e| FetchAttemptError::Transient(e.to_string()))?;
	let byte_stream = response.bytes_stream().map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
	let mut body = StreamReader::new(byte_stream);

	let copied = tokio::select! {
		r = tokio::io::copy(&mut body, &mut out_file) => r,
		_ = cancel.cancelled() => return Err(FetchAttemptError::Cancelled),
	};
	copied.map_err(|e| FetchAttemptError::Transient(e.to_string()))?;

	Ok(())
}

async fn cleanup_partial(destination: &Path) {
	let _ = tokio::fs::remove_file(destination).await;
}
