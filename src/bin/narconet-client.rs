//! `narconet-client`: runs one sync pass against a configured server
//! (C12, driving C7-consumer calls and C8-C10).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use narconet::config::load_client_config;
use narconet::logging::{info, init_tracing};
use narconet::orchestrator::{run_sync, ServerClient};
use narconet::progress::{AlwaysAccept, CliSyncDecision, LoggingProgress};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "narconet-client", about = "Sync configured file trees from a NarcoNet server")]
struct Args {
	/// Path to a TOML configuration file.
	#[arg(long, default_value = "narconet-client.toml")]
	config: PathBuf,

	/// Plan changes without applying them.
	#[arg(long)]
	dry_run: bool,

	/// Run without interactive prompts.
	#[arg(long)]
	headless: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	init_tracing();
	let args = Args::parse();

	let mut config = load_client_config(&args.config)?;
	config.dry_run |= args.dry_run;
	config.headless |= args.headless;

	let server = ServerClient::new(&config.server_url, &config.client_version);
	let cancel = CancellationToken::new();

	let ctrl_c_cancel = cancel.clone();
	tokio::spawn(async move {
		let _ = tokio::signal::ctrl_c().await;
		ctrl_c_cancel.cancel();
	});

	let decision: Arc<dyn narconet::progress::SyncDecision> =
		if config.headless { Arc::new(AlwaysAccept) } else { Arc::new(CliSyncDecision) };

	let result = run_sync(&config, &server, Arc::new(LoggingProgress), decision, cancel).await?;

	info!(
		added = result.files_added,
		updated = result.files_updated,
		removed = result.files_removed,
		directories_created = result.directories_created,
		restart_required = result.restart_required,
		duration_ms = result.duration.as_millis() as u64,
		"sync complete"
	);

	Ok(())
}
