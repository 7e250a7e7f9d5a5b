//! Glob matcher (C2)
//!
//! Compiles exclusion patterns and tests relative paths against them.
//! Grounded on `szilu-syncr/src/exclusion/patterns.rs`'s `PatternMatcher`,
//! narrowed to the two matching modes the spec requires: anchored
//! (`^pattern$`, the default) and prefix (anchored only at the start,
//! so a match also excludes everything beneath it).

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::SyncError;

/// A compiled set of exclusion patterns.
pub struct GlobMatcher {
	anchored: GlobSet,
	prefix: GlobSet,
}

fn compile(pattern: &str) -> Result<globset::Glob, SyncError> {
	// `literal_separator(true)` gives the spec's semantics: `*`/`?` never
	// cross a `/`, while `**` keeps matching across path components.
	GlobBuilder::new(pattern)
		.literal_separator(true)
		.build()
		.map_err(|e| SyncError::ConfigInvalid { message: format!("{pattern}: {e}") })
}

impl GlobMatcher {
	/// Compile `patterns` for anchored (`is_excluded`) matching and
	/// derive a prefix-mode set (`is_excluded_prefix`) from the same
	/// patterns, each extended with `/**` so a match on a directory
	/// also covers everything beneath it.
	pub fn new(patterns: &[String]) -> Result<Self, SyncError> {
		let mut anchored_builder = GlobSetBuilder::new();
		let mut prefix_builder = GlobSetBuilder::new();

		for pattern in patterns {
			let glob = compile(pattern)?;
			anchored_builder.add(glob.clone());
			prefix_builder.add(glob);

			let nested = format!("{}/**", pattern.trim_end_matches('/'));
			prefix_builder.add(compile(&nested)?);
		}

		let anchored = anchored_builder
			.build()
			.map_err(|e| SyncError::ConfigInvalid { message: e.to_string() })?;
		let prefix = prefix_builder
			.build()
			.map_err(|e| SyncError::ConfigInvalid { message: e.to_string() })?;

		Ok(Self { anchored, prefix })
	}

	/// Empty matcher that excludes nothing.
	pub fn empty() -> Self {
		Self::new(&[]).expect("empty pattern list always compiles")
	}

	/// Anchored match: the full relative path, forward-slash form,
	/// must match a pattern exactly.
	pub fn is_excluded(&self, relative_path: &str) -> bool {
		self.anchored.is_match(relative_path)
	}

	/// Prefix match: excludes the path itself, or anything beneath a
	/// directory the pattern matched.
	pub fn is_excluded_prefix(&self, relative_path: &str) -> bool {
		self.prefix.is_match(relative_path)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn double_star_matches_nested_files() {
		let m = GlobMatcher::new(&["**/*.log".to_string()]).unwrap();
		assert!(m.is_excluded("a/b/c.log"));
	}

	#[test]
	fn single_star_does_not_cross_separators() {
		let m = GlobMatcher::new(&["*.log".to_string()]).unwrap();
		assert!(!m.is_excluded("a/b/c.log"));
		assert!(m.is_excluded("c.log"));
	}

	#[test]
	fn brace_alternation() {
		let m = GlobMatcher::new(&["{a,b}/x".to_string()]).unwrap();
		assert!(m.is_excluded("a/x"));
		assert!(m.is_excluded("b/x"));
		assert!(!m.is_excluded("c/x"));
	}

	#[test]
	fn question_mark_matches_one_non_separator_char() {
		let m = GlobMatcher::new(&["fil?.txt".to_string()]).unwrap();
		assert!(m.is_excluded("file.txt"));
		assert!(!m.is_excluded("fil/.txt"));
		assert!(!m.is_excluded("fi.txt"));
	}

	#[test]
	fn character_class() {
		let m = GlobMatcher::new(&["[a-c].txt".to_string()]).unwrap();
		assert!(m.is_excluded("a.txt"));
		assert!(m.is_excluded("b.txt"));
		assert!(!m.is_excluded("d.txt"));
	}

	#[test]
	fn prefix_mode_excludes_beneath_matched_directory() {
		let m = GlobMatcher::new(&["node_modules".to_string()]).unwrap();
		assert!(!m.is_excluded("node_modules/pkg/index.js"));
		assert!(m.is_excluded_prefix("node_modules/pkg/index.js"));
		assert!(m.is_excluded_prefix("node_modules"));
	}
}
