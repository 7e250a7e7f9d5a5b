//! Staging & apply (C10)
//!
//! Writes the update manifest and applies it, either live (non-restart
//! paths) or left for the updater (restart-required paths). Grounded
//! on `szilu-syncr/src/state.rs`'s atomic JSON persistence pattern for
//! the manifest write, and `szilu-syncr/src/delete.rs`'s careful
//! ordering of destructive filesystem operations for the apply loop.

use std::path::{Path, PathBuf};

use crate::error::{ManifestError, SyncError};
use crate::path::{safe_join, validate_install_relative};
use crate::snapshot::write_atomic;
use crate::types::{ManifestOp, UpdateManifest};

/// Directory, relative to the installation root, holding downloaded
/// files awaiting apply by the updater (§4.9, §6).
pub const PENDING_UPDATES_DIR: &str = "NarcoNet_Data/PendingUpdates";

/// Path, relative to the installation root, of the manifest handed to
/// the updater (§4.10, §6).
pub const MANIFEST_PATH: &str = "NarcoNet_Data/UpdateManifest.json";

/// Strip a leading `..\` or `../` from a wire path, per §4.9: sources
/// that point above the server directory are staged without the
/// prefix, and the manifest destination matches.
pub fn strip_parent_prefix(wire_path: &str) -> String {
	let forward = crate::path::to_forward_slash(wire_path);
	forward.strip_prefix("../").unwrap_or(&forward).to_string()
}

/// Where a downloaded file should land: staging (when its sync path is
/// `restartRequired`) or directly in the install root.
pub fn staged_destination(install_root: &Path, wire_path: &str) -> PathBuf {
	install_root.join(PENDING_UPDATES_DIR).join(strip_parent_prefix(wire_path))
}

pub fn live_destination(install_root: &Path, wire_path: &str) -> PathBuf {
	install_root.join(strip_parent_prefix(wire_path))
}

/// Write the manifest atomically (§4.10: "the manifest is written last").
pub async fn write_manifest(install_root: &Path, manifest: &UpdateManifest) -> Result<(), SyncError> {
	let path = install_root.join(MANIFEST_PATH);
	if let Some(parent) = path.parent() {
		tokio::fs::create_dir_all(parent).await?;
	}
	let json = serde_json::to_vec_pretty(manifest)?;
	write_atomic(&path, &json).await?;
	Ok(())
}

/// Apply a manifest's operations in order, validating every destination
/// stays inside `install_root` (§4.10 steps 1-5). Shared by the live
/// in-place apply path and the updater (C11).
pub async fn apply_manifest(install_root: &Path, manifest: &UpdateManifest) -> Result<(), ManifestError> {
	for op in &manifest.operations {
		apply_op(install_root, op).await?;
	}
	Ok(())
}

async fn apply_op(install_root: &Path, op: &ManifestOp) -> Result<(), ManifestError> {
	match op {
		ManifestOp::CreateDirectory { destination } => {
			let target = resolve(install_root, destination)?;
			tokio::fs::create_dir_all(&target)
				.await
				.map_err(|e| op_failed("CreateDirectory", destination, e))
		}
		ManifestOp::CopyFile { source, destination } => {
			let source_path = resolve(install_root, source)?;
			let dest_path = resolve(install_root, destination)?;
			if let Some(parent) = dest_path.parent() {
				tokio::fs::create_dir_all(parent).await.map_err(|e| op_failed("CopyFile", destination, e))?;
			}
			tokio::fs::copy(&source_path, &dest_path)
				.await
				.map(|_| ())
				.map_err(|e| op_failed("CopyFile", destination, e))
		}
		ManifestOp::MoveFile { source, destination } => {
			let source_path = resolve(install_root, source)?;
			let dest_path = resolve(install_root, destination)?;
			if let Some(parent) = dest_path.parent() {
				tokio::fs::create_dir_all(parent).await.map_err(|e| op_failed("MoveFile", destination, e))?;
			}
			tokio::fs::copy(&source_path, &dest_path)
				.await
				.map_err(|e| op_failed("MoveFile", destination, e))?;
			tokio::fs::remove_file(&source_path)
				.await
				.map_err(|e| op_failed("MoveFile", destination, e))
		}
		ManifestOp::DeleteFile { destination } => {
			let target = resolve(install_root, destination)?;
			match tokio::fs::remove_file(&target).await {
				Ok(()) => {
					if let Some(parent) = target.parent() {
						// Best-effort: remove the containing directory if now
						// empty, not beyond the installation root. Errors here
						// are not fatal (§4.10 step 5).
						let _ = tokio::fs::remove_dir(parent).await;
					}
					Ok(())
				}
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
				Err(e) => Err(op_failed("DeleteFile", destination, e)),
			}
		}
	}
}

fn resolve(install_root: &Path, destination: &str) -> Result<PathBuf, ManifestError> {
	validate_install_relative(destination)
		.map_err(|_| ManifestError::UnsafeDestination { destination: destination.to_string() })?;
	safe_join(install_root, destination)
		.map_err(|_| ManifestError::UnsafeDestination { destination: destination.to_string() })
}

fn op_failed(op: &str, destination: &str, source: std::io::Error) -> ManifestError {
	ManifestError::OperationFailed { op: op.to_string(), destination: destination.to_string(), source: source.to_string() }
}

/// Delete the manifest and the staging directory after a successful
/// apply (§4.10 step 6). Errors are logged, not fatal.
pub async fn cleanup_after_apply(install_root: &Path) {
	let manifest_path = install_root.join(MANIFEST_PATH);
	if let Err(e) = tokio::fs::remove_file(&manifest_path).await {
		if e.kind() != std::io::ErrorKind::NotFound {
			crate::logging::warn!(error = %e, "failed to remove manifest after apply");
		}
	}
	let staging = install_root.join(PENDING_UPDATES_DIR);
	if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
		if e.kind() != std::io::ErrorKind::NotFound {
			crate::logging::warn!(error = %e, "failed to remove staging directory after apply");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn strips_parent_prefix() {
		assert_eq!(strip_parent_prefix("../Sibling/Data/a.txt"), "Sibling/Data/a.txt");
		assert_eq!(strip_parent_prefix("BepInEx/plugins/A.dll"), "BepInEx/plugins/A.dll");
	}

	#[tokio::test]
	async fn apply_manifest_runs_operations_in_order() {
		let dir = TempDir::new().unwrap();
		tokio::fs::write(dir.path().join("source.txt"), b"payload").await.unwrap();

		let manifest = UpdateManifest {
			remote_sync_data: Default::default(),
			operations: vec![
				ManifestOp::CreateDirectory { destination: "plugins".to_string() },
				ManifestOp::CopyFile { source: "source.txt".to_string(), destination: "plugins/a.txt".to_string() },
			],
		};

		apply_manifest(dir.path(), &manifest).await.unwrap();
		let content = tokio::fs::read(dir.path().join("plugins/a.txt")).await.unwrap();
		assert_eq!(content, b"payload");
	}

	#[tokio::test]
	async fn apply_manifest_is_idempotent_on_rerun() {
		let dir = TempDir::new().unwrap();
		tokio::fs::write(dir.path().join("source.txt"), b"payload").await.unwrap();
		let manifest = UpdateManifest {
			remote_sync_data: Default::default(),
			operations: vec![ManifestOp::CopyFile { source: "source.txt".to_string(), destination: "dest.txt".to_string() }],
		};
		apply_manifest(dir.path(), &manifest).await.unwrap();
		apply_manifest(dir.path(), &manifest).await.unwrap();
		let content = tokio::fs::read(dir.path().join("dest.txt")).await.unwrap();
		assert_eq!(content, b"payload");
	}

	#[tokio::test]
	async fn delete_file_removes_empty_parent_directory() {
		let dir = TempDir::new().unwrap();
		tokio::fs::create_dir_all(dir.path().join("emptyme")).await.unwrap();
		tokio::fs::write(dir.path().join("emptyme/a.txt"), b"x").await.unwrap();

		let manifest = UpdateManifest {
			remote_sync_data: Default::default(),
			operations: vec![ManifestOp::DeleteFile { destination: "emptyme/a.txt".to_string() }],
		};
		apply_manifest(dir.path(), &manifest).await.unwrap();
		assert!(!dir.path().join("emptyme").exists());
	}

	#[tokio::test]
	async fn rejects_escaping_destination() {
		let dir = TempDir::new().unwrap();
		let manifest = UpdateManifest {
			remote_sync_data: Default::default(),
			operations: vec![ManifestOp::CreateDirectory { destination: "../escape".to_string() }],
		};
		assert!(apply_manifest(dir.path(), &manifest).await.is_err());
	}
}
