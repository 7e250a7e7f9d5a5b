//! `narconet-updater`: applies a staged manifest once the host process
//! exits (C11). Command line: `[--silent] <host-pid>`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use narconet::logging::init_tracing;
use narconet::updater::run;

#[derive(Parser, Debug)]
#[command(name = "narconet-updater", about = "Apply a staged NarcoNet update after the host process exits")]
struct Args {
	/// PID of the host process to wait for.
	host_pid: u32,

	/// Suppress interactive prompts.
	#[arg(long)]
	silent: bool,

	/// Installation root to apply the manifest against.
	#[arg(long, default_value = ".")]
	install_root: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
	init_tracing();
	let args = Args::parse();
	let _ = args.silent;

	let code = run(&args.install_root, args.host_pid).await;
	ExitCode::from(code as u8)
}
