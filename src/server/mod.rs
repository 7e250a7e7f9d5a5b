//! Server HTTP surface (C7)
//!
//! Grounded on `stencila-stencila/rust/server`'s axum + tower-http
//! stack (the teacher repo has no HTTP server of its own — this is the
//! one subsystem enriched from the rest of the example pack) and on
//! `szilu-syncr/src/serve.rs`'s role as "the process that answers a
//! peer's requests for tree state", reworked from a line-oriented
//! stdin/stdout protocol into a router of `/narconet/*` routes.

mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::changelog::{detect_changes, ChangeLogStore};
use crate::config::{normalize_sync_paths, ServerConfig};
use crate::error::SyncError;
use crate::glob::GlobMatcher;
use crate::logging::info;
use crate::snapshot::SnapshotStore;
use crate::types::{Snapshot, SyncPath};

/// Shared state every handler reads; immutable after startup except
/// for the change-log store and the in-memory snapshot, both mutated
/// only by startup detection and `/recheck` (§5).
pub struct AppState {
	pub config: ServerConfig,
	pub sync_paths: Vec<SyncPath>,
	pub exclusions: GlobMatcher,
	pub exclusion_patterns: Vec<String>,
	pub changelog: ChangeLogStore,
	pub snapshot_store: SnapshotStore,
	pub snapshot: RwLock<Snapshot>,
	/// The in-flight `/recheck`, if any. A new request cancels the
	/// previous one's token; the superseded request observes it once its
	/// scan completes and returns `ApiError::Cancelled` (499) instead of
	/// committing stale results (§4.7 status table).
	pub recheck: Mutex<Option<RecheckSlot>>,
}

/// Tracks one in-flight `/recheck`: a monotonic generation so the
/// request that started it can tell, after its scan completes, whether
/// a newer request has since taken over the slot.
pub struct RecheckSlot {
	pub generation: u64,
	pub token: CancellationToken,
}

/// Legacy `narconet-version` header tokens that trigger the fixed
/// fallback payloads on `/syncpaths` and `/hashes` (§4.7, §6).
pub fn is_legacy_client(header_value: Option<&str>) -> bool {
	matches!(header_value, Some("undefined") | Some("0.8.0"))
}

/// Build the shared application state: normalize sync paths, compile
/// exclusions, run the C4→C3→C5/C6 startup baseline (§2 control flow).
pub async fn build_state(config: ServerConfig) -> Result<Arc<AppState>, SyncError> {
	let sync_paths = normalize_sync_paths(config.sync_paths.clone())?;
	let exclusions = GlobMatcher::new(&config.exclusions)?;

	let snapshot_store = SnapshotStore::new(config.data_dir.join("snapshot.json"));
	let changelog_path = config.data_dir.join("changelog.json");

	let previous_snapshot = snapshot_store.load().await;
	let changelog = ChangeLogStore::load(changelog_path).await;
	let starting_sequence = changelog.current_sequence().await;

	let (snapshot, entries) = detect_changes(&config.install_root, &exclusions, &sync_paths, &previous_snapshot, starting_sequence)
		.map_err(SyncError::from)?;

	snapshot_store.save(&snapshot).await.map_err(SyncError::from)?;
	changelog.append_changes(entries.clone()).await.map_err(SyncError::from)?;

	info!(
		sync_paths = sync_paths.len(),
		startup_entries = entries.len(),
		sequence = snapshot.sequence,
		"server baseline established"
	);

	Ok(Arc::new(AppState {
		exclusion_patterns: config.exclusions.clone(),
		sync_paths,
		exclusions,
		changelog,
		snapshot_store,
		snapshot: RwLock::new(snapshot),
		recheck: Mutex::new(None),
		config,
	}))
}

pub fn build_router(state: Arc<AppState>) -> Router {
	Router::new()
		.nest(
			"/narconet",
			Router::new()
				.route("/version", get(handlers::get_version))
				.route("/syncpaths", get(handlers::get_syncpaths))
				.route("/exclusions", get(handlers::get_exclusions))
				.route("/hashes", get(handlers::get_hashes))
				.route("/sequence", get(handlers::get_sequence))
				.route("/changes", get(handlers::get_changes))
				.route("/recheck", post(handlers::post_recheck))
				.route("/fetch/*path", get(handlers::get_fetch)),
		)
		.with_state(state)
		.layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn legacy_tokens_are_recognized() {
		assert!(is_legacy_client(Some("undefined")));
		assert!(is_legacy_client(Some("0.8.0")));
		assert!(!is_legacy_client(Some("1.2.3")));
		assert!(!is_legacy_client(None));
	}
}
