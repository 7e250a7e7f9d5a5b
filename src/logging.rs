//! Logging prelude module for convenient access to tracing macros.
//!
//! Re-exports the common `tracing` macros so the rest of the crate can
//! `use crate::logging::*;` instead of depending on `tracing` directly
//! everywhere, and centralizes subscriber setup.

pub use tracing::{debug, error, info, trace, warn};

/// Initialize the tracing subscriber with environment filter support.
///
/// Logs at INFO level and above by default. Control verbosity with
/// `RUST_LOG`, e.g. `RUST_LOG=narconet=debug`.
pub fn init_tracing() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.with_writer(std::io::stderr)
		.init();
}
