//! Diff engine (C8)
//!
//! Pure functions producing added/updated/removed/created-directory
//! sets from the three `TreeMap` instances. Grounded on
//! `szilu-syncr/src/sync_impl.rs`'s role as the module that compares
//! scanned trees to decide what to transfer, reworked into the spec's
//! one-way three-map comparison (local × remote × previous-remote)
//! instead of the teacher's bidirectional reconciliation.

use std::collections::HashSet;
use std::path::Path;

use crate::types::{FileMap, SyncPath};

/// The four disjoint sets produced for one sync path (§4.8).
#[derive(Debug, Clone, Default)]
pub struct SyncPathDiff {
	pub added: HashSet<String>,
	pub updated: HashSet<String>,
	pub removed: HashSet<String>,
	pub created_directories: HashSet<String>,
}

impl SyncPathDiff {
	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty() && self.created_directories.is_empty()
	}

	pub fn total_transfers(&self) -> usize {
		self.added.len() + self.updated.len()
	}
}

/// Compute the diff for a single sync path given its three file maps
/// (keys already canonical/case-insensitive per `crate::types`) and the
/// local install root, used to test whether a directory genuinely needs
/// creating.
pub fn diff_sync_path(
	sync_path: &SyncPath,
	local: &FileMap,
	remote: &FileMap,
	previous_remote: &FileMap,
	install_root: &Path,
) -> SyncPathDiff {
	let empty = FileMap::new();
	let local = local;
	let remote = remote;
	let previous_remote = previous_remote;
	let _ = &empty;

	let mut diff = SyncPathDiff::default();

	for (key, record) in remote {
		if record.is_directory {
			continue;
		}
		if !local.contains_key(key) {
			diff.added.insert(key.clone());
			continue;
		}
		let local_record = &local[key];
		if local_record.hash != record.hash {
			if !sync_path.enforced {
				if let Some(prev) = previous_remote.get(key) {
					if prev.hash == record.hash {
						// Deliberately removed/hidden by the user; exclusions now
						// suppress re-download (§4.8 "updated" suppression rule).
						continue;
					}
				}
			}
			diff.updated.insert(key.clone());
		}
	}

	// removed: files the server itself deleted (present in previous and
	// local, absent from current remote). Identical for enforced and
	// non-enforced; enforced paths additionally surface the file again
	// via `added` because it is expected to still exist once downloaded.
	for key in previous_remote.keys() {
		if local.contains_key(key) && !remote.contains_key(key) {
			diff.removed.insert(key.clone());
		}
	}

	for (key, record) in remote {
		if !record.is_directory {
			continue;
		}
		if local.contains_key(key) {
			continue;
		}
		let candidate = install_root.join(&record.relative_path);
		if !candidate.exists() {
			diff.created_directories.insert(key.clone());
		}
	}

	diff
}
