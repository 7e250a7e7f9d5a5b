//! Core data types for NarcoNet (§3)
//!
//! Grounded on `szilu-syncr/src/types.rs`'s role as the crate's shared
//! data-model module, narrowed to the one-way mirror model the spec
//! describes instead of the teacher's n-way chunked sync model.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::path::canonical_key;

/// A configured tree to mirror (§3 `SyncPath`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncPath {
	/// Relative path segment; validated via `crate::path::validate_sync_path`.
	pub path: String,
	/// Human label; defaults to `path` when absent on the wire.
	pub name: String,
	/// Whether the client syncs this tree when not enforced.
	pub enabled: bool,
	/// Server mandates sync; client toggle is read-only, deletions revert.
	pub enforced: bool,
	/// Suppress interactive prompts for this tree.
	pub silent: bool,
	/// Updates must be staged and applied by the updater, not live-patched.
	pub restart_required: bool,
}

impl SyncPath {
	/// The canonical, case-insensitive key used to address this tree in
	/// a `TreeMap`.
	pub fn key(&self) -> String {
		canonical_key(&self.path)
	}

	/// Whether this tree is synced given only the client's local state:
	/// enforced paths are always synced; otherwise `enabled` governs.
	pub fn is_active(&self) -> bool {
		self.enforced || self.enabled
	}
}

/// One entry in a tree (§3 `FileRecord`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
	/// Canonical forward-slash relative path within its sync path.
	pub relative_path: String,
	/// Fingerprint hex string; empty for directory entries.
	pub hash: String,
	/// True only for empty directories that must be materialized.
	pub is_directory: bool,
}

impl FileRecord {
	pub fn file(relative_path: impl Into<String>, hash: impl Into<String>) -> Self {
		Self { relative_path: relative_path.into(), hash: hash.into(), is_directory: false }
	}

	pub fn directory(relative_path: impl Into<String>) -> Self {
		Self { relative_path: relative_path.into(), hash: String::new(), is_directory: true }
	}
}

/// `relativePath → FileRecord`, keyed case-insensitively.
pub type FileMap = HashMap<String, FileRecord>;

/// `syncPath → FileMap` (§3 `TreeMap`). Three instances exist at diff
/// time: local, remote, previous-remote.
pub type TreeMap = HashMap<String, FileMap>;

/// Insert `record` into `map` under its sync path, keyed
/// case-insensitively by its relative path.
pub fn insert_record(map: &mut TreeMap, sync_path_key: &str, record: FileRecord) {
	let file_map = map.entry(sync_path_key.to_string()).or_default();
	file_map.insert(canonical_key(&record.relative_path), record);
}

/// One entry in the server's persisted scan (§3 `Snapshot`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotEntry {
	pub hash: String,
	pub size: u64,
	pub mtime_utc: i64,
	pub is_directory: bool,
}

/// The server's last full scan, per configured sync path.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Snapshot {
	/// `syncPathKey/relativePath → SnapshotEntry`, flattened for simple
	/// JSON persistence.
	pub files: HashMap<String, SnapshotEntry>,
	pub sequence: u64,
	pub timestamp: i64,
}

/// The kind of mutation a `ChangeEntry` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOp {
	Add,
	Modify,
	Delete,
}

/// One append-only change-log record (§3 `ChangeEntry`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeEntry {
	pub sequence: u64,
	pub op: ChangeOp,
	pub relative_path: String,
	/// Empty for `Delete` entries.
	pub hash: String,
	pub size: u64,
	pub mtime_utc: i64,
	pub timestamp: i64,
}

/// The append-only record of server-side mutations (§3 `ChangeLog`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChangeLog {
	pub current_sequence: u64,
	pub entries: Vec<ChangeEntry>,
	pub last_updated: i64,
}

/// One operation in an update manifest (§3 `UpdateManifest`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ManifestOp {
	CreateDirectory { destination: String },
	CopyFile { source: String, destination: String },
	MoveFile { source: String, destination: String },
	DeleteFile { destination: String },
}

/// The ordered list of operations handed to the updater, plus the
/// remote snapshot the client will promote once applied.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateManifest {
	pub remote_sync_data: TreeMap,
	pub operations: Vec<ManifestOp>,
}

/// The client's incremental-fetch bookmark (§3 `ClientSyncState`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientSyncState {
	pub last_sequence: u64,
	pub last_sync_time: i64,
}

/// Summary of one orchestrator run (ambient observability, not wire
/// protocol — grounded on `szilu-syncr/src/types.rs`'s `SyncResult`).
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
	pub files_added: usize,
	pub files_updated: usize,
	pub files_removed: usize,
	pub directories_created: usize,
	pub bytes_transferred: u64,
	pub duration: Duration,
	pub restart_required: bool,
	pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sync_path_key_is_case_insensitive() {
		let a = SyncPath {
			path: "BepInEx/Plugins".to_string(),
			name: "Plugins".to_string(),
			enabled: true,
			enforced: false,
			silent: false,
			restart_required: false,
		};
		assert_eq!(a.key(), "bepinex/plugins");
	}

	#[test]
	fn enforced_path_is_always_active() {
		let p = SyncPath {
			path: "x".into(),
			name: "x".into(),
			enabled: false,
			enforced: true,
			silent: false,
			restart_required: false,
		};
		assert!(p.is_active());
	}

	#[test]
	fn insert_record_is_case_insensitive_key() {
		let mut tm: TreeMap = TreeMap::new();
		insert_record(&mut tm, "plugins", FileRecord::file("A/B.dll", "abc"));
		insert_record(&mut tm, "plugins", FileRecord::file("a/b.dll", "def"));
		assert_eq!(tm.get("plugins").unwrap().len(), 1);
		assert_eq!(tm.get("plugins").unwrap().get("a/b.dll").unwrap().hash, "def");
	}
}
