//! `narconet-server`: hosts the HTTP surface over a configured set of
//! sync paths (C7, driven by startup baseline detection in C4-C6).

use std::path::PathBuf;

use clap::Parser;
use narconet::config::load_server_config;
use narconet::logging::{info, init_tracing};
use narconet::server::{build_router, build_state};

#[derive(Parser, Debug)]
#[command(name = "narconet-server", about = "Serve configured file trees over HTTP")]
struct Args {
	/// Path to a TOML configuration file.
	#[arg(long, default_value = "narconet-server.toml")]
	config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	init_tracing();
	let args = Args::parse();

	let config = load_server_config(&args.config)?;
	let listen_addr = config.listen_addr.clone();
	let state = build_state(config).await?;
	let router = build_router(state);

	info!(listen_addr = %listen_addr, "narconet-server starting");
	let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
	axum::serve(listener, router).await?;
	Ok(())
}
