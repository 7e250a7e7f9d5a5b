//! Snapshot store (C5)
//!
//! Persists the server's last full scan as JSON. Grounded on
//! `szilu-syncr/src/state.rs`'s `StateManager::load`/`save`, extended
//! with the write-temp-then-rename atomicity the spec requires (the
//! teacher writes directly; we don't, since a torn write here would
//! corrupt the server's only record of its own last-known tree).

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::logging::warn;
use crate::types::Snapshot;

pub struct SnapshotStore {
	path: PathBuf,
}

impl SnapshotStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	/// Load the snapshot. Absent or malformed files yield an empty
	/// snapshot with a logged warning; this never fails startup (§4.5).
	pub async fn load(&self) -> Snapshot {
		match fs::read(&self.path).await {
			Ok(bytes) => match serde_json::from_slice(&bytes) {
				Ok(snapshot) => snapshot,
				Err(e) => {
					warn!(path = %self.path.display(), error = %e, "snapshot.json malformed, starting fresh");
					Snapshot::default()
				}
			},
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
			Err(e) => {
				warn!(path = %self.path.display(), error = %e, "snapshot.json unreadable, starting fresh");
				Snapshot::default()
			}
		}
	}

	/// Persist the snapshot atomically: write to a sibling temp file,
	/// then rename over the destination.
	pub async fn save(&self, snapshot: &Snapshot) -> std::io::Result<()> {
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent).await?;
		}
		let json = serde_json::to_vec_pretty(snapshot)?;
		write_atomic(&self.path, &json).await
	}
}

/// Write `bytes` to `path` via a sibling temp file and rename,
/// guaranteeing readers never observe a partial write. Shared by every
/// JSON-persisted file in the system (snapshot, change log, previous-
/// remote, manifest, client sync state).
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
	let tmp_path = tmp_path_for(path);
	fs::write(&tmp_path, bytes).await?;
	fs::rename(&tmp_path, path).await?;
	Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
	let mut os = path.as_os_str().to_owned();
	os.push(".tmp");
	PathBuf::from(os)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::SnapshotEntry;
	use std::collections::HashMap;
	use tempfile::TempDir;

	#[tokio::test]
	async fn load_absent_snapshot_returns_empty() {
		let dir = TempDir::new().unwrap();
		let store = SnapshotStore::new(dir.path().join("snapshot.json"));
		let snapshot = store.load().await;
		assert!(snapshot.files.is_empty());
		assert_eq!(snapshot.sequence, 0);
	}

	#[tokio::test]
	async fn load_malformed_snapshot_returns_empty_with_warning() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("snapshot.json");
		tokio::fs::write(&path, b"not json").await.unwrap();
		let store = SnapshotStore::new(path);
		let snapshot = store.load().await;
		assert!(snapshot.files.is_empty());
	}

	#[tokio::test]
	async fn round_trips_through_save_and_load() {
		let dir = TempDir::new().unwrap();
		let store = SnapshotStore::new(dir.path().join("snapshot.json"));

		let mut files = HashMap::new();
		files.insert(
			"a.txt".to_string(),
			SnapshotEntry { hash: "abc".to_string(), size: 5, mtime_utc: 100, is_directory: false },
		);
		let snapshot = Snapshot { files, sequence: 3, timestamp: 200 };

		store.save(&snapshot).await.unwrap();
		let loaded = store.load().await;
		assert_eq!(loaded.sequence, 3);
		assert_eq!(loaded.files.get("a.txt").unwrap().hash, "abc");
	}

	#[tokio::test]
	async fn save_leaves_no_temp_file_behind() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("snapshot.json");
		let store = SnapshotStore::new(path.clone());
		store.save(&Snapshot::default()).await.unwrap();
		assert!(!tmp_path_for(&path).exists());
		assert!(path.exists());
	}
}
