//! End-to-end scenario tests (§8 S1-S4), driven against a real axum
//! `Router` over an in-memory tree, via `tower::ServiceExt::oneshot`.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use narconet::changelog::ChangeLogStore;
use narconet::config::ServerConfig;
use narconet::glob::GlobMatcher;
use narconet::server::{build_router, AppState};
use narconet::snapshot::SnapshotStore;
use narconet::types::{Snapshot, SyncPath};
use tempfile::TempDir;
use tokio::sync::RwLock;
use tower::ServiceExt;

async fn build_test_state(install_root: &std::path::Path, data_dir: &std::path::Path) -> Arc<AppState> {
	let config = ServerConfig {
		install_root: install_root.to_path_buf(),
		data_dir: data_dir.to_path_buf(),
		sync_paths: vec![],
		..ServerConfig::default()
	};

	let sync_paths = vec![SyncPath {
		path: "plugins".to_string(),
		name: "plugins".to_string(),
		enabled: true,
		enforced: false,
		silent: false,
		restart_required: false,
	}];

	let exclusions = GlobMatcher::empty();
	let snapshot_store = SnapshotStore::new(data_dir.join("snapshot.json"));
	let changelog = ChangeLogStore::load(data_dir.join("changelog.json")).await;

	let (snapshot, entries) =
		narconet::changelog::detect_changes(install_root, &exclusions, &sync_paths, &Snapshot::default(), 0).unwrap();
	snapshot_store.save(&snapshot).await.unwrap();
	changelog.append_changes(entries).await.unwrap();

	Arc::new(AppState {
		exclusion_patterns: config.exclusions.clone(),
		sync_paths,
		exclusions,
		changelog,
		snapshot_store,
		snapshot: RwLock::new(snapshot),
		recheck: tokio::sync::Mutex::new(None),
		config,
	})
}

#[tokio::test]
async fn s2_single_add_is_visible_via_hashes_and_fetch() {
	let install_root = TempDir::new().unwrap();
	let data_dir = TempDir::new().unwrap();

	fs::create_dir_all(install_root.path().join("plugins")).unwrap();
	fs::write(install_root.path().join("plugins/A.dll"), vec![0u8; 1024]).unwrap();

	let state = build_test_state(install_root.path(), data_dir.path()).await;
	let router = build_router(state);

	let response = router
		.clone()
		.oneshot(Request::get("/narconet/hashes?path=plugins").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(response.status(), 200);
	let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
	let parsed: HashMap<String, HashMap<String, serde_json::Value>> = serde_json::from_slice(&body).unwrap();
	assert!(parsed.get("plugins").unwrap().contains_key("A.dll"));

	let response = router
		.clone()
		.oneshot(Request::get("/narconet/fetch/plugins%2FA.dll").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(response.status(), 200);
	let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
	assert_eq!(body.len(), 1024);
}

#[tokio::test]
async fn fetch_rejects_path_outside_configured_sync_paths() {
	let install_root = TempDir::new().unwrap();
	let data_dir = TempDir::new().unwrap();
	fs::write(install_root.path().join("secret.txt"), b"nope").unwrap();

	let state = build_test_state(install_root.path(), data_dir.path()).await;
	let router = build_router(state);

	let response = router
		.oneshot(Request::get("/narconet/fetch/secret.txt").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn changes_endpoint_requires_since_parameter() {
	let install_root = TempDir::new().unwrap();
	let data_dir = TempDir::new().unwrap();
	let state = build_test_state(install_root.path(), data_dir.path()).await;
	let router = build_router(state);

	let missing = router
		.clone()
		.oneshot(Request::get("/narconet/changes").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(missing.status(), 400);

	let invalid = router
		.oneshot(Request::get("/narconet/changes?since=notanumber").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(invalid.status(), 400);
}

#[tokio::test]
async fn s5_incremental_changes_returned_in_ascending_sequence_order() {
	let install_root = TempDir::new().unwrap();
	let data_dir = TempDir::new().unwrap();
	fs::create_dir_all(install_root.path().join("plugins")).unwrap();
	fs::write(install_root.path().join("plugins/a.txt"), b"one").unwrap();
	fs::write(install_root.path().join("plugins/b.txt"), b"two").unwrap();
	fs::write(install_root.path().join("plugins/c.txt"), b"three").unwrap();

	let state = build_test_state(install_root.path(), data_dir.path()).await;
	let router = build_router(state);

	let response = router
		.oneshot(Request::get("/narconet/changes?since=0").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(response.status(), 200);
	let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
	let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
	let changes = parsed["changes"].as_array().unwrap();
	assert_eq!(changes.len(), 3);
	let sequences: Vec<i64> = changes.iter().map(|c| c["sequence"].as_i64().unwrap()).collect();
	let mut sorted = sequences.clone();
	sorted.sort();
	assert_eq!(sequences, sorted);
}
