//! Error types for NarcoNet sync operations

use std::fmt;
use std::io;

/// Unified error type for library operations.
///
/// Follows the error kinds laid out for the system: `ConfigInvalid`,
/// `IOTransient`/`IOTerminal` (folded into `Io`), `ProtocolViolation`
/// (`Protocol`), `Cancelled`, and nested domain errors for the
/// download and manifest-apply subsystems.
#[derive(Debug)]
pub enum SyncError {
	/// A configured sync path is absolute, escapes the installation
	/// root, is duplicated, or collides with an exclusion.
	ConfigInvalid { message: String },

	/// A path failed the §4.1 safety check (absolute or traversal).
	PathUnsafe { path: String },

	/// I/O error underlying most file and network operations.
	Io(io::Error),

	/// The server answered with a non-2xx status and a diagnostic body.
	Protocol { status: u16, message: String },

	/// A JSON payload could not be parsed.
	Json(serde_json::Error),

	/// Download subsystem error (§4.9).
	Download(DownloadError),

	/// Manifest apply error (§4.10/§4.11).
	Manifest(ManifestError),

	/// The operation was cancelled cooperatively; not a hard failure.
	Cancelled,

	/// Catch-all for conditions with no dedicated variant.
	Other { message: String },
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::ConfigInvalid { message } => write!(f, "invalid configuration: {message}"),
			SyncError::PathUnsafe { path } => write!(f, "unsafe path: {path}"),
			SyncError::Io(e) => write!(f, "I/O error: {e}"),
			SyncError::Protocol { status, message } => {
				write!(f, "protocol error ({status}): {message}")
			}
			SyncError::Json(e) => write!(f, "JSON error: {e}"),
			SyncError::Download(e) => write!(f, "download error: {e}"),
			SyncError::Manifest(e) => write!(f, "manifest error: {e}"),
			SyncError::Cancelled => write!(f, "operation cancelled"),
			SyncError::Other { message } => write!(f, "{message}"),
		}
	}
}

impl std::error::Error for SyncError {}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<serde_json::Error> for SyncError {
	fn from(e: serde_json::Error) -> Self {
		SyncError::Json(e)
	}
}

impl From<DownloadError> for SyncError {
	fn from(e: DownloadError) -> Self {
		SyncError::Download(e)
	}
}

impl From<ManifestError> for SyncError {
	fn from(e: ManifestError) -> Self {
		SyncError::Manifest(e)
	}
}

impl From<String> for SyncError {
	fn from(message: String) -> Self {
		SyncError::Other { message }
	}
}

/// Errors raised by the bounded-concurrency download scheduler (C9).
#[derive(Debug)]
pub enum DownloadError {
	/// A transient error (connection reset, timeout, 5xx) survived every retry.
	RetriesExhausted { path: String, attempts: u32, source: String },

	/// A terminal HTTP status (4xx other than 408/429) or not-found.
	Terminal { path: String, status: u16 },

	/// The in-flight transfer was aborted via the cancellation token.
	Cancelled { path: String },

	/// Local I/O failure while writing the downloaded file.
	Io { path: String, source: String },
}

impl fmt::Display for DownloadError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DownloadError::RetriesExhausted { path, attempts, source } => {
				write!(f, "{path}: failed after {attempts} attempts: {source}")
			}
			DownloadError::Terminal { path, status } => {
				write!(f, "{path}: terminal HTTP status {status}")
			}
			DownloadError::Cancelled { path } => write!(f, "{path}: cancelled"),
			DownloadError::Io { path, source } => write!(f, "{path}: I/O error: {source}"),
		}
	}
}

impl std::error::Error for DownloadError {}

/// Errors raised while writing or applying an update manifest (C10/C11).
#[derive(Debug)]
pub enum ManifestError {
	/// A manifest operation's destination escapes the installation root.
	UnsafeDestination { destination: String },

	/// A CreateDirectory/CopyFile/MoveFile/DeleteFile operation failed.
	OperationFailed { op: String, destination: String, source: String },

	/// The manifest file itself could not be read or parsed.
	Corrupted { message: String },
}

impl fmt::Display for ManifestError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ManifestError::UnsafeDestination { destination } => {
				write!(f, "destination escapes installation root: {destination}")
			}
			ManifestError::OperationFailed { op, destination, source } => {
				write!(f, "{op} {destination} failed: {source}")
			}
			ManifestError::Corrupted { message } => write!(f, "manifest corrupted: {message}"),
		}
	}
}

impl std::error::Error for ManifestError {}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_messages_are_informative() {
		let err = SyncError::PathUnsafe { path: "../etc".to_string() };
		assert!(err.to_string().contains("../etc"));

		let err = SyncError::Protocol { status: 404, message: "not found".to_string() };
		assert!(err.to_string().contains("404"));
	}

	#[test]
	fn io_error_converts() {
		let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
		let err: SyncError = io_err.into();
		assert!(matches!(err, SyncError::Io(_)));
	}
}
