//! Configuration (ambient stack)
//!
//! Server and client configuration, loaded from TOML with environment
//! variable overrides. Grounded on `szilu-syncr/src/config.rs`'s single
//! consolidated `Config` struct with `#[serde(default, rename_all =
//! "camelCase")]`, narrowed to the fields this system actually needs,
//! plus the `RawSyncPath` tagged/untagged variant §9 calls for
//! ("Dynamic typing / polymorphic YAML node shapes... represent as a
//! tagged variant at parse time, then normalize").

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::path::validate_sync_path;
use crate::types::SyncPath;

/// A sync-path entry as it may appear in the configuration file: either
/// a bare string (the common case) or a full object overriding
/// `enabled`/`enforced`/`silent`/`restartRequired`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawSyncPath {
	Bare(String),
	Entry {
		path: String,
		#[serde(default)]
		name: Option<String>,
		#[serde(default = "default_true")]
		enabled: bool,
		#[serde(default)]
		enforced: bool,
		#[serde(default)]
		silent: bool,
		#[serde(default, rename = "restartRequired")]
		restart_required: bool,
	},
}

fn default_true() -> bool {
	true
}

impl RawSyncPath {
	/// Normalize to a uniform `SyncPath`, validating the path segment
	/// (§4.1). The tagged variant is not carried further than this call
	/// (§9).
	pub fn normalize(self) -> Result<SyncPath, SyncError> {
		match self {
			RawSyncPath::Bare(path) => {
				let normalized = validate_sync_path(&path)?;
				Ok(SyncPath {
					name: normalized.clone(),
					path: normalized,
					enabled: true,
					enforced: false,
					silent: false,
					restart_required: false,
				})
			}
			RawSyncPath::Entry { path, name, enabled, enforced, silent, restart_required } => {
				let normalized = validate_sync_path(&path)?;
				Ok(SyncPath {
					name: name.unwrap_or_else(|| normalized.clone()),
					path: normalized,
					enabled,
					enforced,
					silent,
					restart_required,
				})
			}
		}
	}
}

/// Configuration for `narconet-server`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
	/// Address the HTTP surface binds to.
	pub listen_addr: String,
	/// Directory under which `syncPaths` are resolved.
	pub install_root: PathBuf,
	/// Directory holding `snapshot.json` and `changelog.json`.
	pub data_dir: PathBuf,
	/// Trees this server offers to clients.
	pub sync_paths: Vec<RawSyncPath>,
	/// Server-side exclusion globs, always applied.
	pub exclusions: Vec<String>,
	/// Reported via `/version`.
	pub version: String,
	/// Drop change-log entries older than this many days; 0 disables pruning.
	pub changelog_retention_days: i64,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			listen_addr: "0.0.0.0:7890".to_string(),
			install_root: PathBuf::from("."),
			data_dir: PathBuf::from("NarcoNet_Data"),
			sync_paths: Vec::new(),
			exclusions: default_exclusions(),
			version: env!("CARGO_PKG_VERSION").to_string(),
			changelog_retention_days: 30,
		}
	}
}

/// Configuration for `narconet-client`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
	/// Base URL of the server's HTTP surface, e.g. `http://host:7890`.
	pub server_url: String,
	/// Directory the client mirrors into.
	pub install_root: PathBuf,
	/// Directory holding `PreviousSync.json`, `SyncState.json`, etc.
	pub data_dir: PathBuf,
	/// Client-local exclusion globs, skipped for enforced paths.
	pub local_exclusions: Vec<String>,
	/// Reported via the `narconet-version` request header.
	pub client_version: String,
	/// Bounded concurrency for downloads (§4.9 default 8).
	pub download_concurrency: usize,
	/// Run without prompting; non-enforced updates are skipped unless
	/// `silent` is also set per sync path.
	pub headless: bool,
	/// Plan changes without applying them.
	pub dry_run: bool,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			server_url: "http://localhost:7890".to_string(),
			install_root: PathBuf::from("."),
			data_dir: PathBuf::from("NarcoNet_Data"),
			local_exclusions: Vec::new(),
			client_version: env!("CARGO_PKG_VERSION").to_string(),
			download_concurrency: 8,
			headless: false,
			dry_run: false,
		}
	}
}

fn default_exclusions() -> Vec<String> {
	vec![
		"NarcoNet_Data/**".to_string(),
		"**/*.tmp".to_string(),
		"**/.DS_Store".to_string(),
	]
}

/// Load a `ServerConfig` from a TOML file at `path`, falling back to
/// defaults if absent, then applying `NARCONET_*` environment overrides.
pub fn load_server_config(path: &std::path::Path) -> Result<ServerConfig, SyncError> {
	let mut config: ServerConfig = match std::fs::read_to_string(path) {
		Ok(text) => toml::from_str(&text)
			.map_err(|e| SyncError::ConfigInvalid { message: format!("{}: {e}", path.display()) })?,
		Err(_) => ServerConfig::default(),
	};

	if let Ok(addr) = std::env::var("NARCONET_LISTEN_ADDR") {
		config.listen_addr = addr;
	}
	if let Ok(root) = std::env::var("NARCONET_INSTALL_ROOT") {
		config.install_root = PathBuf::from(root);
	}

	Ok(config)
}

/// Load a `ClientConfig` from a TOML file at `path`, falling back to
/// defaults if absent, then applying `NARCONET_*` environment overrides.
pub fn load_client_config(path: &std::path::Path) -> Result<ClientConfig, SyncError> {
	let mut config: ClientConfig = match std::fs::read_to_string(path) {
		Ok(text) => toml::from_str(&text)
			.map_err(|e| SyncError::ConfigInvalid { message: format!("{}: {e}", path.display()) })?,
		Err(_) => ClientConfig::default(),
	};

	if let Ok(url) = std::env::var("NARCONET_SERVER_URL") {
		config.server_url = url;
	}
	if let Ok(root) = std::env::var("NARCONET_INSTALL_ROOT") {
		config.install_root = PathBuf::from(root);
	}

	Ok(config)
}

/// Normalize and validate every configured sync path, rejecting the
/// whole configuration if any fails (§4.1, §7 `ConfigInvalid`).
pub fn normalize_sync_paths(raw: Vec<RawSyncPath>) -> Result<Vec<SyncPath>, SyncError> {
	let mut seen = std::collections::HashSet::new();
	let mut out = Vec::with_capacity(raw.len());
	for entry in raw {
		let sync_path = entry.normalize()?;
		let key = sync_path.key();
		if !seen.insert(key.clone()) {
			return Err(SyncError::ConfigInvalid { message: format!("duplicate sync path: {key}") });
		}
		out.push(sync_path);
	}
	Ok(out)
}
