//! Client orchestrator (C12)
//!
//! Sequences one sync run end-to-end (§4.12). Grounded on
//! `szilu-syncr/src/sync.rs`'s top-level `sync()` entry point and
//! `SyncBuilder`, reworked from the teacher's bidirectional push/pull
//! into the one-way fetch-and-apply sequence the spec describes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::diff::{diff_sync_path, SyncPathDiff};
use crate::download::{DownloadScheduler, DownloadTask};
use crate::error::SyncError;
use crate::glob::GlobMatcher;
use crate::logging::{info, warn};
use crate::path::to_backslash;
use crate::progress::{AtomicProgress, ProgressCallback, SyncDecision};
use crate::scanner::{self, Exclusions};
use crate::server::is_legacy_client;
use crate::stage::{live_destination, staged_destination, strip_parent_prefix, write_manifest};
use crate::types::{ClientSyncState, FileMap, ManifestOp, SyncPath, SyncResult, TreeMap, UpdateManifest};

const PREVIOUS_SYNC_FILE: &str = "PreviousSync.json";
const SYNC_STATE_FILE: &str = "SyncState.json";

/// HTTP calls the orchestrator needs from the server; narrowed to the
/// subset C12 actually drives (§4.12 steps 1,2,5,7).
pub struct ServerClient {
	client: reqwest::Client,
	base_url: String,
	client_version: String,
}

impl ServerClient {
	pub fn new(base_url: impl Into<String>, client_version: impl Into<String>) -> Self {
		Self { client: reqwest::Client::new(), base_url: base_url.into(), client_version: client_version.into() }
	}

	fn url(&self, path: &str) -> String {
		format!("{}/narconet{}", self.base_url.trim_end_matches('/'), path)
	}

	pub async fn version(&self) -> Result<String, SyncError> {
		let response = self.client.get(self.url("/version")).send().await.map_err(to_sync_error)?;
		response.json().await.map_err(to_sync_error)
	}

	pub async fn sync_paths(&self) -> Result<Vec<SyncPath>, SyncError> {
		#[derive(serde::Deserialize)]
		#[serde(rename_all = "camelCase")]
		struct Wire {
			name: String,
			path: String,
			enabled: bool,
			enforced: bool,
			silent: bool,
			restart_required: bool,
		}
		let response = self
			.client
			.get(self.url("/syncpaths"))
			.header("narconet-version", &self.client_version)
			.send()
			.await
			.map_err(to_sync_error)?;
		let wire: Vec<Wire> = response.json().await.map_err(to_sync_error)?;
		wire.into_iter()
			.map(|w| {
				let path = crate::path::to_forward_slash(&w.path);
				Ok(SyncPath {
					path,
					name: w.name,
					enabled: w.enabled,
					enforced: w.enforced,
					silent: w.silent,
					restart_required: w.restart_required,
				})
			})
			.collect()
	}

	pub async fn exclusions(&self) -> Result<Vec<String>, SyncError> {
		let response = self.client.get(self.url("/exclusions")).send().await.map_err(to_sync_error)?;
		response.json().await.map_err(to_sync_error)
	}

	pub async fn hashes(&self, sync_path_keys: &[String]) -> Result<TreeMap, SyncError> {
		#[derive(serde::Deserialize)]
		struct Entry {
			hash: String,
			directory: bool,
		}
		let mut request = self.client.get(self.url("/hashes"));
		for key in sync_path_keys {
			request = request.query(&[("path", key)]);
		}
		let response = request
			.header("narconet-version", &self.client_version)
			.send()
			.await
			.map_err(to_sync_error)?;
		let wire: HashMap<String, HashMap<String, Entry>> = response.json().await.map_err(to_sync_error)?;

		let mut tree = TreeMap::new();
		for (sync_path_key, files) in wire {
			let mut file_map = FileMap::new();
			for (relative_path, entry) in files {
				let forward = crate::path::to_forward_slash(&relative_path);
				let key = forward.to_lowercase();
				file_map.insert(
					key,
					crate::types::FileRecord { relative_path: forward, hash: entry.hash, is_directory: entry.directory },
				);
			}
			tree.insert(sync_path_key, file_map);
		}
		Ok(tree)
	}
}

fn to_sync_error(e: reqwest::Error) -> SyncError {
	SyncError::Protocol { status: e.status().map(|s| s.as_u16()).unwrap_or(0), message: e.to_string() }
}

async fn load_json_or_default<T: Default + serde::de::DeserializeOwned>(path: &Path) -> T {
	match tokio::fs::read(path).await {
		Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
		Err(_) => T::default(),
	}
}

/// Run one full sync per §4.12. `progress` reports download progress;
/// `decision` decides, for non-enforced updates, whether to proceed once
/// `config.headless` is false and at least one pending optional change is
/// not itself marked `silent` (step 10). On skip, only enforced sync
/// paths are applied and the declined ones keep their prior baseline so
/// the same optional changes are offered again next run (step 11).
pub async fn run_sync(
	config: &ClientConfig,
	server: &ServerClient,
	progress: Arc<dyn ProgressCallback>,
	decision: Arc<dyn SyncDecision>,
	cancel: CancellationToken,
) -> Result<SyncResult, SyncError> {
	let started = Instant::now();
	let mut result = SyncResult::default();

	// Step 1: version check, warning only.
	match server.version().await {
		Ok(server_version) if server_version != config.client_version => {
			warn!(server_version, client_version = %config.client_version, "server/client version mismatch");
		}
		Err(e) => warn!(error = %e, "could not reach server for version check"),
		_ => {}
	}

	// Step 2: fetch and validate sync paths.
	let sync_paths = server.sync_paths().await?;
	for sp in &sync_paths {
		crate::path::validate_sync_path(&sp.path)?;
	}

	// Step 4: load previous-remote and local exclusions.
	let data_dir = &config.data_dir;
	let previous_remote: TreeMap = load_json_or_default(&data_dir.join(PREVIOUS_SYNC_FILE)).await;
	let sync_state: ClientSyncState = load_json_or_default(&data_dir.join(SYNC_STATE_FILE)).await;
	let _ = sync_state;

	// Step 5: server exclusions; local exclusions come from config.
	let server_exclusion_patterns = server.exclusions().await?;
	let server_exclusions = GlobMatcher::new(&server_exclusion_patterns)?;
	let client_exclusions = GlobMatcher::new(&config.local_exclusions)?;

	let active_paths: Vec<&SyncPath> = sync_paths.iter().filter(|sp| sp.is_active()).collect();

	// Step 6: local scan.
	let mut local: TreeMap = TreeMap::new();
	for sp in &active_paths {
		let root = config.install_root.join(&sp.path);
		let exclusions = Exclusions { server: &server_exclusions, client: &client_exclusions };
		let records = scanner::scan_tree(&root, &exclusions, sp.enforced)?;
		let mut file_map = FileMap::new();
		for record in records {
			file_map.insert(record.relative_path.to_lowercase(), record);
		}
		local.insert(sp.key(), file_map);
	}

	// Step 7: remote hashes.
	let sync_path_keys: Vec<String> = active_paths.iter().map(|sp| sp.key()).collect();
	let remote = server.hashes(&sync_path_keys).await?;

	// Step 8: diff each active sync path.
	struct PathPlan {
		sp: SyncPath,
		diff: SyncPathDiff,
		local_map: FileMap,
		remote_map: FileMap,
	}

	let mut plans = Vec::new();
	for sp in &active_paths {
		let empty = FileMap::new();
		let local_map = local.get(&sp.key()).cloned().unwrap_or_default();
		let remote_map = remote.get(&sp.key()).cloned().unwrap_or_default();
		let previous_map = previous_remote.get(&sp.key()).unwrap_or(&empty);

		let diff = diff_sync_path(sp, &local_map, &remote_map, previous_map, &config.install_root.join(&sp.path));
		plans.push(PathPlan { sp: (*sp).clone(), diff, local_map, remote_map });
	}

	// Step 10: decide whether non-enforced ("optional") changes proceed.
	// Headless configs, and runs where every pending optional change is
	// itself marked `silent`, proceed without prompting.
	let enforced_with_changes: Vec<String> =
		plans.iter().filter(|p| p.sp.enforced && !p.diff.is_empty()).map(|p| p.sp.name.clone()).collect();
	let optional_with_changes: Vec<&PathPlan> = plans.iter().filter(|p| !p.sp.enforced && !p.diff.is_empty()).collect();
	let optional_names: Vec<String> = optional_with_changes.iter().map(|p| p.sp.name.clone()).collect();

	let needs_prompt = !config.headless && optional_with_changes.iter().any(|p| !p.sp.silent);
	let accept_optional = if optional_names.is_empty() {
		true
	} else if needs_prompt {
		decision.decide(&optional_names, &enforced_with_changes)
	} else {
		true
	};

	if !optional_names.is_empty() && !accept_optional {
		info!(skipped = ?optional_names, "optional updates declined; applying enforced paths only");
	}

	let mut manifest_ops = Vec::new();
	let mut download_tasks = Vec::new();
	let mut remote_snapshot_for_manifest = TreeMap::new();
	let mut any_restart_required = false;

	for plan in &plans {
		let PathPlan { sp, diff, local_map, remote_map } = plan;

		if !accept_optional && !sp.enforced {
			// Step 11: declined optional path. Keep its prior baseline so
			// the same changes are offered again on the next run.
			let fallback = previous_remote.get(&sp.key()).cloned().unwrap_or_default();
			remote_snapshot_for_manifest.insert(sp.key(), fallback);
			continue;
		}

		for dir_key in &diff.created_directories {
			if let Some(record) = remote_map.get(dir_key) {
				let destination = strip_parent_prefix(&format!("{}/{}", sp.path, record.relative_path));
				manifest_ops.push(ManifestOp::CreateDirectory { destination: to_backslash(&destination) });
				result.directories_created += 1;
			}
		}

		for key in diff.added.iter().chain(diff.updated.iter()) {
			if let Some(record) = remote_map.get(key) {
				let wire_path = format!("{}/{}", sp.path, record.relative_path);
				let destination = if sp.restart_required {
					any_restart_required = true;
					staged_destination(&config.install_root, &wire_path)
				} else {
					live_destination(&config.install_root, &wire_path)
				};
				download_tasks.push(DownloadTask { wire_path: to_backslash(&wire_path), destination: destination.clone() });

				let staging_relative = strip_root(&config.install_root, &destination);
				manifest_ops.push(ManifestOp::CopyFile {
					source: to_backslash(&staging_relative),
					destination: to_backslash(&strip_parent_prefix(&wire_path)),
				});

				if diff.added.contains(key) {
					result.files_added += 1;
				} else {
					result.files_updated += 1;
				}
			}
		}

		for key in &diff.removed {
			if let Some(record) = local_map.get(key) {
				let destination = strip_parent_prefix(&format!("{}/{}", sp.path, record.relative_path));
				manifest_ops.push(ManifestOp::DeleteFile { destination: to_backslash(&destination) });
				result.files_removed += 1;
			}
		}

		remote_snapshot_for_manifest.insert(sp.key(), remote_map.clone());
	}

	result.restart_required = any_restart_required;

	// Step 9: nothing to do.
	if download_tasks.is_empty() && manifest_ops.is_empty() {
		persist_previous_remote(data_dir, &remote_snapshot_for_manifest).await?;
		result.duration = started.elapsed();
		return Ok(result);
	}

	if config.dry_run {
		info!(
			added = result.files_added,
			updated = result.files_updated,
			removed = result.files_removed,
			"dry run: no files transferred"
		);
		result.duration = started.elapsed();
		return Ok(result);
	}

	// Step 12: download, then stage or apply live.
	let scheduler = DownloadScheduler::new(&config.server_url, config.download_concurrency, cancel.clone());
	let total = download_tasks.len();
	let atomic_progress = Arc::new(AtomicProgress::new(total, progress));

	let download_outcome = scheduler.run(download_tasks, atomic_progress).await;

	if cancel.is_cancelled() || download_outcome.is_err() {
		cleanup_cancelled_staging(&config.install_root).await;
		if let Err(e) = download_outcome {
			result.errors.push(e.to_string());
			return Err(e);
		}
		return Err(SyncError::Cancelled);
	}

	let manifest = UpdateManifest { remote_sync_data: remote_snapshot_for_manifest.clone(), operations: manifest_ops };

	if any_restart_required {
		write_manifest(&config.install_root, &manifest).await?;
		info!("restart-required updates staged; updater will apply after host exit");
	} else {
		crate::stage::apply_manifest(&config.install_root, &manifest)
			.await
			.map_err(SyncError::from)?;
		persist_previous_remote(data_dir, &remote_snapshot_for_manifest).await?;
	}

	result.duration = started.elapsed();
	Ok(result)
}

fn strip_root(install_root: &Path, destination: &Path) -> String {
	destination
		.strip_prefix(install_root)
		.unwrap_or(destination)
		.to_string_lossy()
		.replace('\\', "/")
}

async fn persist_previous_remote(data_dir: &Path, remote: &TreeMap) -> Result<(), SyncError> {
	tokio::fs::create_dir_all(data_dir).await?;
	let json = serde_json::to_vec_pretty(remote)?;
	crate::snapshot::write_atomic(&data_dir.join(PREVIOUS_SYNC_FILE), &json).await?;
	Ok(())
}

async fn cleanup_cancelled_staging(install_root: &Path) {
	let staging = install_root.join(crate::stage::PENDING_UPDATES_DIR);
	let _ = tokio::fs::remove_dir_all(&staging).await;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn legacy_header_check_is_reused_from_server_module() {
		assert!(is_legacy_client(Some("undefined")));
	}

	#[test]
	fn strip_root_produces_relative_forward_slash_path() {
		let root = Path::new("/srv/install");
		let dest = root.join("plugins/a.dll");
		assert_eq!(strip_root(root, &dest), "plugins/a.dll");
	}
}
