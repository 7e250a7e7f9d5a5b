//! Updater (C11)
//!
//! Runs as a separate process: waits for the host PID to exit, applies
//! the staged manifest (or falls back to a legacy copy-everything mode
//! when no manifest exists), and removes the staging area. Grounded on
//! `szilu-syncr/src/state.rs`'s load-or-default JSON pattern for
//! reading the manifest, with host-liveness polling added via
//! `sysinfo` (a teacher dependency otherwise unused in its own src/).

use std::path::Path;
use std::time::Duration;

use sysinfo::{Pid, System};

use crate::error::{ManifestError, SyncError};
use crate::logging::{error, info, warn};
use crate::stage::{apply_manifest, cleanup_after_apply, MANIFEST_PATH, PENDING_UPDATES_DIR};
use crate::types::UpdateManifest;

const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Poll the host process at 1 Hz until it is absent or exited (§4.11
/// step 1).
pub async fn wait_for_host_exit(host_pid: u32) {
	let pid = Pid::from_u32(host_pid);
	let mut system = System::new();
	loop {
		system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
		if system.process(pid).is_none() {
			return;
		}
		tokio::time::sleep(Duration::from_secs(1)).await;
	}
}

/// Read the manifest at `<install_root>/NarcoNet_Data/UpdateManifest.json`.
/// Absence means "run legacy mode"; a malformed file is a hard error
/// (§4.11 step 2, §7 `IOTerminal`).
pub async fn read_manifest(install_root: &Path) -> Result<Option<UpdateManifest>, SyncError> {
	let path = install_root.join(MANIFEST_PATH);
	match tokio::fs::read(&path).await {
		Ok(bytes) => {
			let manifest = serde_json::from_slice(&bytes)
				.map_err(|e| ManifestError::Corrupted { message: e.to_string() })?;
			Ok(Some(manifest))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(e.into()),
	}
}

/// Copy every file found under `PendingUpdates` to the same relative
/// path under the install root (§4.11 step 2 legacy fallback, for
/// installations predating the manifest protocol).
pub async fn apply_legacy(install_root: &Path) -> Result<(), SyncError> {
	let staging = install_root.join(PENDING_UPDATES_DIR);
	if !staging.exists() {
		return Ok(());
	}
	copy_tree(&staging, &staging, install_root).await
}

fn copy_tree<'a>(
	staging_root: &'a Path,
	dir: &'a Path,
	install_root: &'a Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), SyncError>> + Send + 'a>> {
	Box::pin(async move {
		let mut entries = tokio::fs::read_dir(dir).await?;
		while let Some(entry) = entries.next_entry().await? {
			let path = entry.path();
			let file_type = entry.file_type().await?;
			if file_type.is_dir() {
				copy_tree(staging_root, &path, install_root).await?;
			} else {
				let relative = path.strip_prefix(staging_root).expect("within staging root");
				let destination = install_root.join(relative);
				if let Some(parent) = destination.parent() {
					tokio::fs::create_dir_all(parent).await?;
				}
				tokio::fs::copy(&path, &destination).await?;
			}
		}
		Ok(())
	})
}

/// Apply with up to `MAX_RETRY_ATTEMPTS` retries on I/O-shaped errors
/// (§4.11 step 4).
pub async fn apply_with_retry(install_root: &Path, manifest: &UpdateManifest) -> Result<(), ManifestError> {
	let mut last_error = None;
	for attempt in 1..=MAX_RETRY_ATTEMPTS {
		match apply_manifest(install_root, manifest).await {
			Ok(()) => return Ok(()),
			Err(e) => {
				warn!(attempt, error = %e, "manifest apply attempt failed, retrying");
				last_error = Some(e);
				tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
			}
		}
	}
	Err(last_error.expect("loop runs at least once"))
}

/// The full updater entry point: wait, apply, clean up (§4.11). Returns
/// the process exit code (0 success, non-zero failure).
pub async fn run(install_root: &Path, host_pid: u32) -> i32 {
	wait_for_host_exit(host_pid).await;

	let manifest = match read_manifest(install_root).await {
		Ok(m) => m,
		Err(e) => {
			error!(error = %e, "failed to read update manifest");
			return 1;
		}
	};

	let apply_result = match &manifest {
		Some(manifest) => apply_with_retry(install_root, manifest).await,
		None => apply_legacy(install_root).await.map_err(|e| ManifestError::Corrupted { message: e.to_string() }),
	};

	match apply_result {
		Ok(()) => {
			cleanup_after_apply(install_root).await;
			info!("update applied successfully");
			0
		}
		Err(e) => {
			error!(error = %e, "update apply failed, staging preserved for diagnosis");
			1
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[tokio::test]
	async fn read_manifest_returns_none_when_absent() {
		let dir = TempDir::new().unwrap();
		let result = read_manifest(dir.path()).await.unwrap();
		assert!(result.is_none());
	}

	#[tokio::test]
	async fn read_manifest_round_trips() {
		let dir = TempDir::new().unwrap();
		let manifest = UpdateManifest {
			remote_sync_data: Default::default(),
			operations: vec![crate::types::ManifestOp::CreateDirectory { destination: "x".to_string() }],
		};
		crate::stage::write_manifest(dir.path(), &manifest).await.unwrap();
		let loaded = read_manifest(dir.path()).await.unwrap().unwrap();
		assert_eq!(loaded.operations.len(), 1);
	}

	#[tokio::test]
	async fn legacy_apply_copies_staged_tree() {
		let dir = TempDir::new().unwrap();
		let staging = dir.path().join(PENDING_UPDATES_DIR);
		tokio::fs::create_dir_all(staging.join("plugins")).await.unwrap();
		tokio::fs::write(staging.join("plugins/a.dll"), b"payload").await.unwrap();

		apply_legacy(dir.path()).await.unwrap();
		let content = tokio::fs::read(dir.path().join("plugins/a.dll")).await.unwrap();
		assert_eq!(content, b"payload");
	}
}
