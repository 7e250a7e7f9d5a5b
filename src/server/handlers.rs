//! Route handlers for the `/narconet/*` surface (§4.7).

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use super::{is_legacy_client, AppState, RecheckSlot};
use crate::changelog::detect_changes;
use crate::logging::{error, info};
use crate::path::{to_backslash, to_forward_slash};

/// The uniform error shape for non-2xx responses (§4.7, §7).
pub enum ApiError {
	BadRequest(String),
	NotFound(String),
	Cancelled,
	Internal(String),
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let (status, body) = match self {
			ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
			ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
			ApiError::Cancelled => (StatusCode::from_u16(499).unwrap(), "cancelled".to_string()),
			ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
		};
		(status, body).into_response()
	}
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
	headers.get(name).and_then(|v| v.to_str().ok())
}

pub async fn get_version(State(state): State<Arc<AppState>>) -> Json<String> {
	Json(state.config.version.clone())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncPathWire {
	name: String,
	path: String,
	enabled: bool,
	enforced: bool,
	silent: bool,
	restart_required: bool,
}

pub async fn get_syncpaths(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Json<Vec<SyncPathWire>> {
	if is_legacy_client(header_str(&headers, "narconet-version")) {
		// Legacy clients predate this surface; the documented-safe
		// fallback is an empty list rather than a guessed legacy shape.
		return Json(Vec::new());
	}

	let mut wire: Vec<SyncPathWire> = state
		.sync_paths
		.iter()
		.map(|sp| SyncPathWire {
			name: sp.name.clone(),
			path: to_backslash(&sp.path),
			enabled: sp.enabled,
			enforced: sp.enforced,
			silent: sp.silent,
			restart_required: sp.restart_required,
		})
		.collect();

	wire.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
	Json(wire)
}

pub async fn get_exclusions(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
	Json(state.exclusion_patterns.clone())
}

#[derive(Serialize)]
struct HashEntry {
	hash: String,
	directory: bool,
}

/// `path=` may repeat; `serde_urlencoded` (which axum's `Query`
/// extractor uses) does not collect repeated keys into a `Vec`, so the
/// raw query string is parsed by hand instead.
fn parse_repeated_path_params(raw_query: &str) -> Vec<String> {
	raw_query
		.split('&')
		.filter_map(|pair| pair.split_once('='))
		.filter(|(key, _)| *key == "path")
		.map(|(_, value)| urlencoding::decode(value).map(|s| s.into_owned()).unwrap_or_else(|_| value.to_string()))
		.collect()
}

pub async fn get_hashes(
	State(state): State<Arc<AppState>>,
	axum::extract::RawQuery(raw_query): axum::extract::RawQuery,
	headers: HeaderMap,
) -> Result<Json<HashMap<String, HashMap<String, HashEntry>>>, ApiError> {
	if is_legacy_client(header_str(&headers, "narconet-version")) {
		return Ok(Json(HashMap::new()));
	}

	let requested_paths = raw_query.as_deref().map(parse_repeated_path_params).unwrap_or_default();
	let active: Vec<_> = state.sync_paths.iter().filter(|sp| sp.enforced || sp.enabled).collect();

	let requested: Vec<_> = if requested_paths.is_empty() {
		active
	} else {
		let wanted: std::collections::HashSet<String> =
			requested_paths.iter().map(|p| to_forward_slash(p).to_lowercase()).collect();
		active.into_iter().filter(|sp| wanted.contains(&sp.key())).collect()
	};

	let snapshot = state.snapshot.read().await;
	let mut out = HashMap::new();

	for sp in requested {
		let prefix = format!("{}/", sp.key());
		let mut file_map = HashMap::new();
		for (key, entry) in &snapshot.files {
			let relative = if sp.key().is_empty() {
				Some(key.as_str())
			} else {
				key.strip_prefix(&prefix)
			};
			if let Some(relative) = relative {
				file_map.insert(
					to_backslash(relative),
					HashEntry { hash: entry.hash.clone(), directory: entry.is_directory },
				);
			}
		}
		out.insert(sp.key(), file_map);
	}

	Ok(Json(out))
}

#[derive(Serialize)]
struct SequenceResponse {
	current_sequence: u64,
}

pub async fn get_sequence(State(state): State<Arc<AppState>>) -> Json<SequenceResponse> {
	Json(SequenceResponse { current_sequence: state.changelog.current_sequence().await })
}

#[derive(serde::Deserialize)]
pub struct ChangesQuery {
	since: Option<String>,
}

#[derive(Serialize)]
struct ChangesResponse {
	current_sequence: u64,
	changes: Vec<crate::types::ChangeEntry>,
}

pub async fn get_changes(
	State(state): State<Arc<AppState>>,
	Query(params): Query<ChangesQuery>,
) -> Result<Json<ChangesResponse>, ApiError> {
	let since: u64 = params
		.since
		.ok_or_else(|| ApiError::BadRequest("missing required query parameter: since".to_string()))?
		.parse()
		.map_err(|_| ApiError::BadRequest("invalid since parameter".to_string()))?;

	let changes = state.changelog.changes_since(since).await;
	let current_sequence = state.changelog.current_sequence().await;
	Ok(Json(ChangesResponse { current_sequence, changes }))
}

#[derive(Serialize)]
struct RecheckResponse {
	before_sequence: u64,
	after_sequence: u64,
	changes: Vec<crate::types::ChangeEntry>,
}

/// A `/recheck` in progress is superseded by the next one that arrives:
/// the previous request's token is cancelled and, once its scan
/// finishes, it observes the cancellation and returns 499 instead of
/// committing results a newer request has already made stale.
pub async fn post_recheck(State(state): State<Arc<AppState>>) -> Result<Json<RecheckResponse>, ApiError> {
	let own_token = CancellationToken::new();
	let own_generation = {
		let mut slot = state.recheck.lock().await;
		let generation = slot.as_ref().map(|s| s.generation + 1).unwrap_or(1);
		if let Some(previous) = slot.take() {
			previous.token.cancel();
		}
		*slot = Some(RecheckSlot { generation, token: own_token.clone() });
		generation
	};

	let before_sequence = state.changelog.current_sequence().await;
	let mut guard = state.snapshot.write().await;

	let (new_snapshot, entries) =
		detect_changes(&state.config.install_root, &state.exclusions, &state.sync_paths, &guard, before_sequence).map_err(
			|e| {
				error!(error = %e, "recheck scan failed");
				ApiError::Internal(e.to_string())
			},
		)?;

	if own_token.is_cancelled() {
		drop(guard);
		info!(generation = own_generation, "recheck superseded by a newer request, discarding scan");
		return Err(ApiError::Cancelled);
	}

	*guard = new_snapshot.clone();
	drop(guard);

	state
		.snapshot_store
		.save(&new_snapshot)
		.await
		.map_err(|e| ApiError::Internal(e.to_string()))?;
	state
		.changelog
		.append_changes(entries.clone())
		.await
		.map_err(|e| ApiError::Internal(e.to_string()))?;

	let after_sequence = state.changelog.current_sequence().await;
	info!(before_sequence, after_sequence, new_entries = entries.len(), "recheck complete");

	{
		let mut slot = state.recheck.lock().await;
		if slot.as_ref().map(|s| s.generation) == Some(own_generation) {
			*slot = None;
		}
	}

	Ok(Json(RecheckResponse { before_sequence, after_sequence, changes: entries }))
}

const MIME_TABLE: &[(&str, &str)] = &[
	(".dll", "application/octet-stream"),
	(".json", "application/json"),
	(".txt", "text/plain"),
	(".png", "image/png"),
	(".jpg", "image/jpeg"),
	(".xml", "application/xml"),
	(".wav", "audio/wav"),
	(".ogg", "audio/ogg"),
];

fn guess_mime(path: &str) -> &'static str {
	let lower = path.to_lowercase();
	MIME_TABLE
		.iter()
		.find(|(ext, _)| lower.ends_with(ext))
		.map(|(_, mime)| *mime)
		.unwrap_or("application/octet-stream")
}

pub async fn get_fetch(State(state): State<Arc<AppState>>, AxumPath(raw_path): AxumPath<String>) -> Result<Response, ApiError> {
	let relative = to_forward_slash(&raw_path);

	let owning_path = state
		.sync_paths
		.iter()
		.find(|sp| relative.to_lowercase().starts_with(&format!("{}/", sp.key())) || relative.to_lowercase() == sp.key())
		.ok_or_else(|| ApiError::BadRequest(format!("path outside any configured sync path: {relative}")))?;
	let _ = owning_path;

	let full_path = crate::path::safe_join(&state.config.install_root, &relative)
		.map_err(|_| ApiError::BadRequest(format!("unsafe fetch path: {relative}")))?;

	let file = tokio::fs::File::open(&full_path)
		.await
		.map_err(|_| ApiError::NotFound(format!("not found: {relative}")))?;

	let metadata = file
		.metadata()
		.await
		.map_err(|e| ApiError::Internal(e.to_string()))?;

	let mime = guess_mime(&relative);
	let body = Body::from_stream(ReaderStream::new(file));
	Ok((
		StatusCode::OK,
		[
			(axum::http::header::CONTENT_TYPE, mime.to_string()),
			(axum::http::header::CONTENT_LENGTH, metadata.len().to_string()),
			(axum::http::header::ACCEPT_RANGES, "bytes".to_string()),
		],
		body,
	)
		.into_response())
}
