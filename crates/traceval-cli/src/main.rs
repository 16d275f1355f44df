use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::json;
use tracing::{debug, info, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use traceval_core::items::build_items;
use traceval_core::validation::validate_items;
use traceval_core::{
	extract_all_spans, extract_resource_metadata, run_evaluation_batch, EvalPack, FileTraceSource,
	OpenAiJudgeClient, ScorerRegistry, TraceSource,
};

#[derive(Debug, Parser)]
#[command(name = "traceval", about = "Evaluate agent traces against eval packs")]
struct Cli {
	/// Debug-level logging (RUST_LOG takes precedence)
	#[arg(long, short, global = true, action = ArgAction::SetTrue)]
	verbose: bool,

	/// Emit logs as JSON lines
	#[arg(long, global = true, action = ArgAction::SetTrue)]
	json: bool,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Run an eval pack over every trace in a file
	Run(RunArgs),
	/// Show the items a pack would score, without calling any scorer
	Items(ItemsArgs),
}

#[derive(Debug, Clone, Parser)]
struct RunArgs {
	/// OTLP/JSON trace file: one object, an array, or newline-delimited objects
	#[arg(long)]
	trace: PathBuf,

	/// Eval pack YAML
	#[arg(long)]
	pack: PathBuf,

	/// Output the evaluation batches as JSON to a file
	#[arg(long)]
	json_out: Option<PathBuf>,
}

#[derive(Debug, Clone, Parser)]
struct ItemsArgs {
	#[arg(long)]
	trace: PathBuf,

	#[arg(long)]
	pack: PathBuf,
}

/// Global subscriber writing to stderr so stdout stays clean for results.
fn init_tracing(json: bool, level: Level) {
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

	if json {
		tracing_subscriber::registry()
			.with(env_filter)
			.with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
			.try_init()
			.ok();
	} else {
		tracing_subscriber::registry()
			.with(env_filter)
			.with(fmt::layer().with_target(false).with_writer(std::io::stderr))
			.try_init()
			.ok();
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	init_tracing(cli.json, if cli.verbose { Level::DEBUG } else { Level::INFO });

	match cli.command {
		Commands::Run(args) => run(args).await?,
		Commands::Items(args) => items(args).await?,
	}
	Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
	let pack = EvalPack::from_path(&args.pack)?;
	let traces = FileTraceSource::new(&args.trace).load().await?;
	info!(pack = %pack.name, traces = traces.len(), "loaded inputs");

	let mut registry = ScorerRegistry::new();
	match OpenAiJudgeClient::from_env() {
		Ok(client) => registry = registry.with_judge_client(Arc::new(client)),
		Err(err) => debug!(error = %err, "no judge client configured"),
	}

	let mut batches = Vec::with_capacity(traces.len());
	for (index, trace) in traces.iter().enumerate() {
		let batch = run_evaluation_batch(trace, &pack, &registry)
			.await
			.with_context(|| format!("evaluating trace #{index}"))?;
		println!("{}", batch.summary_table());
		batches.push(batch);
	}

	if let Some(path) = args.json_out {
		let json = serde_json::to_string_pretty(&batches)?;
		tokio::fs::write(&path, json)
			.await
			.with_context(|| format!("writing {}", path.display()))?;
	}

	Ok(())
}

async fn items(args: ItemsArgs) -> Result<()> {
	let pack = EvalPack::from_path(&args.pack)?;
	let traces = FileTraceSource::new(&args.trace).load().await?;

	let mut out = Vec::with_capacity(traces.len());
	for trace in &traces {
		let resource = extract_resource_metadata(trace);
		let spans = extract_all_spans(trace);
		let items = build_items(&spans, &resource, &pack.ingestion.config)?;
		let validation = match validate_items(&items, &pack.identity()) {
			Ok(()) => json!({"valid": true}),
			Err(failure) => json!({
				"valid": false,
				"item": items[failure.item_index].id(),
				"missing_fields": failure.missing,
			}),
		};
		out.push(json!({"items": items, "validation": validation}));
	}

	println!("{}", serde_json::to_string_pretty(&out)?);
	Ok(())
}
