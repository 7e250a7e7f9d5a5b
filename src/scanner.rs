//! Tree scanner (C4)
//!
//! Recursively walks a configured sync path, applying exclusions and
//! producing `FileRecord`s. Grounded on `szilu-syncr/src/util.rs` and
//! `src/sync.rs`'s directory-walking style, generalized to the spec's
//! enforced/non-enforced exclusion layering and symlink-cycle bound
//! instead of the teacher's chunk-tracking walk.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SyncError;
use crate::fingerprint::fingerprint_file;
use crate::glob::GlobMatcher;
use crate::logging::warn;
use crate::types::FileRecord;

/// The two exclusion layers a scan may apply.
pub struct Exclusions<'a> {
	/// Server-configured exclusions; always applied.
	pub server: &'a GlobMatcher,
	/// Client-local exclusions; skipped for enforced sync paths.
	pub client: &'a GlobMatcher,
}

/// Recursively scan `root` (the sync path's resolved directory on
/// disk), returning one `FileRecord` per file and per empty directory,
/// keyed by path relative to `root` in forward-slash form.
///
/// `enforced` paths ignore the client-local exclusion layer (§4.4).
pub fn scan_tree(root: &Path, exclusions: &Exclusions<'_>, enforced: bool) -> Result<Vec<FileRecord>, SyncError> {
	let mut records = Vec::new();
	let mut visited = HashSet::new();

	if root.is_dir() {
		walk(root, root, exclusions, enforced, &mut visited, &mut records)?;
	}

	Ok(records)
}

fn walk(
	install_root: &Path,
	dir: &Path,
	exclusions: &Exclusions<'_>,
	enforced: bool,
	visited: &mut HashSet<PathBuf>,
	records: &mut Vec<FileRecord>,
) -> Result<(), SyncError> {
	let canonical = match fs::canonicalize(dir) {
		Ok(c) => c,
		Err(e) => {
			warn!(path = %dir.display(), error = %e, "failed to canonicalize directory during scan");
			return Ok(());
		}
	};
	if !visited.insert(canonical) {
		return Ok(());
	}

	let entries = match fs::read_dir(dir) {
		Ok(e) => e,
		Err(e) => {
			warn!(path = %dir.display(), error = %e, "failed to read directory during scan");
			return Ok(());
		}
	};

	let mut saw_child = false;

	for entry in entries {
		let entry = match entry {
			Ok(e) => e,
			Err(e) => {
				warn!(error = %e, "failed to read directory entry during scan");
				continue;
			}
		};
		let path = entry.path();

		let metadata = match fs::symlink_metadata(&path) {
			Ok(m) => m,
			Err(e) => {
				warn!(path = %path.display(), error = %e, "failed to stat entry during scan");
				continue;
			}
		};

		let relative = match path.strip_prefix(install_root) {
			Ok(r) => r.to_string_lossy().replace('\\', "/"),
			Err(_) => continue,
		};

		if is_excluded(&relative, exclusions, enforced) {
			continue;
		}

		let resolved_path = if metadata.file_type().is_symlink() {
			match fs::canonicalize(&path) {
				Ok(target) if target.starts_with(install_root) => target,
				Ok(_) => {
					// Resolves outside the installation root; not followed (§4.4).
					continue;
				}
				Err(e) => {
					warn!(path = %path.display(), error = %e, "unresolvable symlink during scan");
					continue;
				}
			}
		} else {
			path.clone()
		};

		let is_dir = if metadata.file_type().is_symlink() {
			resolved_path.is_dir()
		} else {
			metadata.is_dir()
		};

		if is_dir {
			saw_child = true;
			let before = records.len();
			walk(install_root, &resolved_path, exclusions, enforced, visited, records)?;
			if records.len() == before {
				records.push(FileRecord::directory(relative));
			}
		} else {
			saw_child = true;
			match fingerprint_file(&resolved_path) {
				Ok(hash) => records.push(FileRecord::file(relative, hash)),
				Err(e) => {
					warn!(path = %path.display(), error = %e, "failed to fingerprint file, omitting from scan");
				}
			}
		}
	}

	let _ = saw_child;
	Ok(())
}

fn is_excluded(relative: &str, exclusions: &Exclusions<'_>, enforced: bool) -> bool {
	if exclusions.server.is_excluded_prefix(relative) {
		return true;
	}
	if !enforced && exclusions.client.is_excluded_prefix(relative) {
		return true;
	}
	false
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs::{self, File};
	use std::io::Write;
	use tempfile::TempDir;

	fn write_file(path: &Path, content: &[u8]) {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent).unwrap();
		}
		let mut f = File::create(path).unwrap();
		f.write_all(content).unwrap();
	}

	#[test]
	fn scans_files_and_empty_directories() {
		let dir = TempDir::new().unwrap();
		write_file(&dir.path().join("a.txt"), b"hello");
		fs::create_dir_all(dir.path().join("empty")).unwrap();

		let server = GlobMatcher::empty();
		let client = GlobMatcher::empty();
		let exclusions = Exclusions { server: &server, client: &client };

		let records = scan_tree(dir.path(), &exclusions, false).unwrap();
		let paths: Vec<_> = records.iter().map(|r| r.relative_path.as_str()).collect();
		assert!(paths.contains(&"a.txt"));
		assert!(paths.contains(&"empty"));
		assert!(records.iter().find(|r| r.relative_path == "empty").unwrap().is_directory);
	}

	#[test]
	fn server_exclusions_always_apply() {
		let dir = TempDir::new().unwrap();
		write_file(&dir.path().join("secret.log"), b"x");

		let server = GlobMatcher::new(&["*.log".to_string()]).unwrap();
		let client = GlobMatcher::empty();
		let exclusions = Exclusions { server: &server, client: &client };

		let records = scan_tree(dir.path(), &exclusions, true).unwrap();
		assert!(records.is_empty());
	}

	#[test]
	fn enforced_paths_ignore_client_exclusions() {
		let dir = TempDir::new().unwrap();
		write_file(&dir.path().join("keep.dll"), b"x");

		let server = GlobMatcher::empty();
		let client = GlobMatcher::new(&["*.dll".to_string()]).unwrap();
		let exclusions = Exclusions { server: &server, client: &client };

		let enforced = scan_tree(dir.path(), &exclusions, true).unwrap();
		assert_eq!(enforced.len(), 1);

		let non_enforced = scan_tree(dir.path(), &exclusions, false).unwrap();
		assert!(non_enforced.is_empty());
	}

	#[test]
	fn directory_with_only_excluded_children_reports_as_empty() {
		let dir = TempDir::new().unwrap();
		write_file(&dir.path().join("logs/app.log"), b"x");

		let server = GlobMatcher::new(&["**/*.log".to_string()]).unwrap();
		let client = GlobMatcher::empty();
		let exclusions = Exclusions { server: &server, client: &client };

		let records = scan_tree(dir.path(), &exclusions, false).unwrap();
		assert_eq!(records.len(), 1);
		assert_eq!(records[0].relative_path, "logs");
		assert!(records[0].is_directory);
	}
}
