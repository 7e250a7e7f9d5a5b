//! Progress reporting (ambient/supplemented feature)
//!
//! A callback trait the download scheduler reports `(completed, total)`
//! through. Grounded on `szilu-syncr/src/progress/mod.rs`'s
//! `SyncProgressCallback` trait and `CliProgressCallback` impl,
//! narrowed to the single counter pair §4.9 specifies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Receives progress updates as the download scheduler completes
/// transfers. `total` is only meaningful once all tasks are enqueued.
pub trait ProgressCallback: Send + Sync {
	fn on_progress(&self, completed: usize, total: usize);
}

/// A no-op callback for headless or test runs.
pub struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
	fn on_progress(&self, _completed: usize, _total: usize) {}
}

/// Logs progress via `tracing` at debug level. Default for
/// `narconet-client`.
pub struct LoggingProgress;

impl ProgressCallback for LoggingProgress {
	fn on_progress(&self, completed: usize, total: usize) {
		crate::logging::debug!(completed, total, "download progress");
	}
}

/// Decides, for a sync run with pending non-enforced changes, whether to
/// proceed with them or skip and apply enforced updates only (§4.12 step
/// 10). Mirrors `ProgressCallback`'s shape.
pub trait SyncDecision: Send + Sync {
	/// `optional` and `enforced` name the sync paths with pending changes
	/// in each category. Returns `true` to apply optional updates too,
	/// `false` to apply `enforced` only.
	fn decide(&self, optional: &[String], enforced: &[String]) -> bool;
}

/// Always proceeds without prompting. Used for headless runs and for
/// sync paths where every pending optional change is marked `silent`.
pub struct AlwaysAccept;

impl SyncDecision for AlwaysAccept {
	fn decide(&self, _optional: &[String], _enforced: &[String]) -> bool {
		true
	}
}

/// Prompts on stdin for accept/skip, grounded on `szilu-syncr`'s
/// `ConflictPrompt` read-line loop (`sync_impl/mod.rs`).
pub struct CliSyncDecision;

impl SyncDecision for CliSyncDecision {
	fn decide(&self, optional: &[String], enforced: &[String]) -> bool {
		use std::io::Write;

		if !enforced.is_empty() {
			eprintln!("Enforced updates (always applied): {}", enforced.join(", "));
		}
		eprintln!("Optional updates available: {}", optional.join(", "));
		loop {
			print!("Apply optional updates too? [y/n]: ");
			let _ = std::io::stdout().flush();
			let mut input = String::new();
			match std::io::stdin().read_line(&mut input) {
				Ok(0) => return false,
				Ok(_) => match input.trim().to_lowercase().as_str() {
					"y" | "yes" => return true,
					"n" | "no" => return false,
					_ => continue,
				},
				Err(_) => return false,
			}
		}
	}
}

/// An atomic counter pair, handed to concurrent download tasks; each
/// completion increments `completed` and forwards to an inner callback.
pub struct AtomicProgress {
	completed: AtomicUsize,
	total: usize,
	inner: Arc<dyn ProgressCallback>,
}

impl AtomicProgress {
	pub fn new(total: usize, inner: Arc<dyn ProgressCallback>) -> Self {
		Self { completed: AtomicUsize::new(0), total, inner }
	}

	pub fn complete_one(&self) {
		let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
		self.inner.on_progress(completed, self.total);
	}
}
