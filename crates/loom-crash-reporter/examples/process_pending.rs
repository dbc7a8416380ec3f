// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Example: Process pending crash reports from the default data directory.
//!
//! Run with:
//!   cargo run --example process_pending -p loom-crash-reporter -- --database fred
//!
//! Pass `--capture <file>` to treat a file as a crash captured by the previous
//! run, and `--auto` to send without asking.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use loom_crash_reporter::{
	Collaborators, CrashPrompt, CrashReporter, FileCrashStorage, FilePreferences,
	MemoryCrashTrapper, PromptRequest, PromptResponse, ReportOutcome, ReporterConfig,
	ReporterDelegate, StaticBundle, UserAction,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Send crash reports left behind by a previous run")]
struct Args {
	/// Crash database to report into.
	#[arg(long, env = "LOOM_CRASH_DATABASE")]
	database: Option<String>,

	/// Config file (defaults to the XDG config location).
	#[arg(long)]
	config: Option<PathBuf>,

	/// Directory holding pending reports.
	#[arg(long)]
	storage_dir: Option<PathBuf>,

	/// Raw crash capture to ingest before processing.
	#[arg(long)]
	capture: Option<PathBuf>,

	/// Send every report without prompting.
	#[arg(long)]
	auto: bool,
}

/// Asks on the terminal.
struct ConsolePrompt;

#[async_trait]
impl CrashPrompt for ConsolePrompt {
	async fn show(&self, request: PromptRequest) -> PromptResponse {
		let answer = tokio::task::spawn_blocking(move || ask(&request)).await;
		answer.unwrap_or_else(|_| PromptResponse::new(UserAction::Cancel))
	}
}

fn ask(request: &PromptRequest) -> PromptResponse {
	let stdin = std::io::stdin();
	let mut read = |label: &str| -> Option<String> {
		print!("{label}");
		std::io::stdout().flush().ok()?;
		let mut line = String::new();
		stdin.lock().read_line(&mut line).ok()?;
		let line = line.trim().to_string();
		(!line.is_empty()).then_some(line)
	};

	println!("{} quit unexpectedly last time.", request.application_name);
	println!("--- report ---");
	println!("{}", request.report_text.chars().take(2000).collect::<String>());
	println!("--------------");

	let action = match read("Send report? [y]es / [n]o / [a]lways: ").as_deref() {
		Some("a") | Some("always") => UserAction::AlwaysSend,
		Some("y") | Some("yes") | None => UserAction::Send,
		_ => UserAction::Cancel,
	};

	let mut response = PromptResponse::new(action);
	if action != UserAction::Cancel && request.ask_user_details {
		response.name = read(&format!(
			"Name [{}]: ",
			request.prefill_name.as_deref().unwrap_or("")
		))
		.or_else(|| request.prefill_name.clone());
		response.email = read(&format!(
			"Email [{}]: ",
			request.prefill_email.as_deref().unwrap_or("")
		))
		.or_else(|| request.prefill_email.clone());
		response.comments = read("What were you doing? ");
	}
	response
}

struct PrintingDelegate;

impl ReporterDelegate for PrintingDelegate {
	fn did_finish_sending(&self, outcome: &ReportOutcome) {
		match outcome.outcome.info_url() {
			Some(url) => println!("{}: sent, see {url}", outcome.crash_filename),
			None if outcome.outcome.is_success() => println!("{}: sent", outcome.crash_filename),
			None => println!("{}: failed, will retry next launch", outcome.crash_filename),
		}
	}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let args = Args::parse();

	let mut config = ReporterConfig::load(args.config.as_deref())?;
	if args.database.is_some() {
		config.database = args.database;
	}
	if args.auto {
		config.auto_submit = true;
	}

	let storage = match args.storage_dir {
		Some(dir) => FileCrashStorage::new(dir),
		None => FileCrashStorage::from_xdg()?,
	};
	println!("Pending reports in {}", storage.dir().display());

	let mut trapper = MemoryCrashTrapper::new();
	if let Some(path) = args.capture {
		trapper = trapper.with_pending(std::fs::read(path)?);
	}

	let bundle = StaticBundle::new()
		.with(loom_crash_reporter::ports::BUNDLE_KEY_APPLICATION_NAME, "process-pending")
		.with(
			loom_crash_reporter::ports::BUNDLE_KEY_APPLICATION_VERSION,
			env!("CARGO_PKG_VERSION"),
		);

	let reporter = CrashReporter::new(
		config,
		Collaborators {
			trapper: Arc::new(trapper),
			storage: Arc::new(storage),
			bundle: Arc::new(bundle),
			preferences: Arc::new(FilePreferences::from_xdg()?),
		},
	)
	.with_prompt(Arc::new(ConsolePrompt))
	.with_delegate(Arc::new(PrintingDelegate));

	let summary = reporter.start().await?;
	println!(
		"Done: {} sent, {} discarded, {} failed",
		summary.sent(),
		summary.discarded(),
		summary.failed()
	);

	Ok(())
}
