use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use dageval_core::report::generate_html_report;
use dageval_core::store::Store;
use dageval_core::{DagConfig, DagMetric, Eval, EvalConfig, JsonlDataSource, ModelConfig, OllamaModel, Scorer};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dageval", about = "Score LLM outputs with evaluation DAGs")]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Score every test case in a JSONL dataset with a DAG metric
	Run(RunArgs),
	/// Check that a DAG file describes a well-formed graph
	Validate {
		#[arg(long)]
		dag: PathBuf,
	},
	/// List runs recorded in a SQLite store
	History {
		#[arg(long)]
		db: PathBuf,
	},
}

#[derive(Debug, Clone, Parser)]
struct RunArgs {
	/// YAML/JSON file bundling the DAG, data and model settings
	#[arg(long, conflicts_with_all = ["dag", "data", "model"])]
	config: Option<PathBuf>,

	/// DAG definition (YAML or JSON)
	#[arg(long, required_unless_present = "config")]
	dag: Option<PathBuf>,

	/// JSONL file, one test case per line: { "id"?, "input", "actual_output"?, ... }
	#[arg(long, required_unless_present = "config")]
	data: Option<PathBuf>,

	/// Ollama model used as the judge
	#[arg(long, required_unless_present = "config")]
	model: Option<String>,

	/// Ollama server (default: http://localhost:11434)
	#[arg(long)]
	base_url: Option<String>,

	#[arg(long)]
	temperature: Option<f64>,

	/// Metric name shown in logs and reports (default: DAG)
	#[arg(long)]
	name: Option<String>,

	/// Minimum score (0.0..=1.0) for a case to pass (default: 0.5)
	#[arg(long)]
	threshold: Option<f64>,

	/// Skip the final reason prompt
	#[arg(long, action = ArgAction::SetTrue)]
	no_reason: bool,

	/// Walk the DAG one node at a time instead of fanning out siblings
	#[arg(long, action = ArgAction::SetTrue)]
	sync: bool,

	/// Only a perfect score passes
	#[arg(long, action = ArgAction::SetTrue)]
	strict: bool,

	/// Concurrency (cases in-flight, default: 8)
	#[arg(long)]
	concurrency: Option<usize>,

	/// Output JSON result to a file
	#[arg(long)]
	json_out: Option<PathBuf>,

	/// Output an HTML report to a file
	#[arg(long)]
	html_out: Option<PathBuf>,

	/// Record the run in a SQLite database
	#[arg(long)]
	db: Option<PathBuf>,
}

impl RunArgs {
	/// Loads `--config` or assembles a config from flags; flags given next to
	/// `--config` override what the file says.
	fn into_config(self) -> Result<EvalConfig> {
		let mut config = match &self.config {
			Some(path) => EvalConfig::from_path(path)?,
			None => EvalConfig::new(
				self.dag.context("--dag is required")?,
				self.data.context("--data is required")?,
				self.model.context("--model is required")?,
			),
		};
		if let Some(base_url) = self.base_url {
			config.model.base_url = base_url;
		}
		if let Some(temperature) = self.temperature {
			config.model.temperature = temperature;
		}
		if let Some(name) = self.name {
			config.name = name;
		}
		if let Some(threshold) = self.threshold {
			config.threshold = threshold;
		}
		if let Some(concurrency) = self.concurrency {
			config.concurrency = concurrency;
		}
		config.include_reason &= !self.no_reason;
		config.async_mode &= !self.sync;
		config.strict_mode |= self.strict;
		Ok(config)
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with_target(false)
		.init();

	let cli = Cli::parse();
	match cli.command {
		Commands::Run(args) => run(args).await?,
		Commands::Validate { dag } => validate(dag)?,
		Commands::History { db } => history(db)?,
	}
	Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
	let json_out = args.json_out.clone();
	let html_out = args.html_out.clone();
	let db = args.db.clone();
	let config = args.into_config()?;

	let dag = DagConfig::from_path(&config.dag)?
		.build()
		.with_context(|| format!("Invalid DAG in {:?}", config.dag))?;
	let model = OllamaModel::new(config.model.name.clone())
		.base_url(config.model.base_url.clone())
		.temperature(config.model.temperature)?;
	info!(model = %config.model.name, nodes = dag.len(), "loaded DAG");

	let metric = DagMetric::new(config.name.clone(), dag, Arc::new(model))
		.threshold(config.threshold)
		.include_reason(config.include_reason)
		.async_mode(config.async_mode)
		.strict_mode(config.strict_mode);
	let scorers: Vec<Arc<dyn Scorer>> = vec![Arc::new(metric)];

	let eval = Eval::builder()
		.data_source(Arc::new(JsonlDataSource::new(&config.data)))
		.scorers(scorers)
		.concurrency(config.concurrency)
		.build()?;

	let result = eval.run().await?;
	println!("{}", result.summary_table());

	if let Some(path) = json_out {
		let json = serde_json::to_string_pretty(&result)?;
		tokio::fs::write(path, json).await?;
	}

	if let Some(path) = html_out {
		tokio::fs::write(path, generate_html_report(&result)).await?;
	}

	if let Some(path) = db {
		let store = Store::open(&path)?;
		let run_id = store.create_run(Some(json!({
			"model": config.model.name,
			"dag": config.dag,
			"data": config.data,
			"threshold": config.threshold,
			"strict_mode": config.strict_mode,
		})))?;
		let eval_id = store.save_eval(run_id, &config.name, &result)?;
		info!(run_id, eval_id, db = ?path, "saved run");
	}

	Ok(())
}

fn validate(path: PathBuf) -> Result<()> {
	let dag = DagConfig::from_path(&path)?
		.build()
		.with_context(|| format!("Invalid DAG in {:?}", path))?;
	let root = dag.root();
	let root_kind = dag.kind(root).map(|k| k.as_str()).unwrap_or("unknown");
	println!("{:?}: {} nodes, root {} ({})", path, dag.len(), root, root_kind);
	Ok(())
}

fn history(db: PathBuf) -> Result<()> {
	let store = Store::open(&db)?;
	for run in store.list_runs()? {
		println!("run {} at {}", run.id, run.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
		for eval in store.list_evals(run.id)? {
			match eval.summary {
				Some(s) => println!(
					"  {}: {}/{} passed, avg {:.3}, cost {:.4}",
					eval.name, s.passed, s.total, s.avg_score, s.evaluation_cost
				),
				None => println!("  {}", eval.name),
			}
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	fn run_args(argv: &[&str]) -> RunArgs {
		let cli = Cli::try_parse_from(argv).unwrap();
		match cli.command {
			Commands::Run(args) => args,
			other => panic!("expected run, got {other:?}"),
		}
	}

	#[test]
	fn flags_alone_use_defaults() {
		let config = run_args(&["dageval", "run", "--dag", "d.yaml", "--data", "c.jsonl", "--model", "llama3"])
			.into_config()
			.unwrap();
		assert_eq!(config.name, "DAG");
		assert_eq!(config.model.base_url, "http://localhost:11434");
		assert_eq!(config.threshold, 0.5);
		assert!(config.async_mode);
		assert!(config.include_reason);
	}

	#[test]
	fn flags_override_config_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("eval.yaml");
		let mut file = std::fs::File::create(&path).unwrap();
		writeln!(
			file,
			"name: Tone\ndag: dag.yaml\ndata: cases.jsonl\nmodel:\n  name: llama3\nthreshold: 0.9\nconcurrency: 2"
		)
		.unwrap();

		let path = path.to_string_lossy().into_owned();
		let argv = ["dageval", "run", "--config", path.as_str(), "--threshold", "0.2", "--sync", "--strict", "--no-reason"];
		let config = run_args(&argv).into_config().unwrap();
		assert_eq!(config.name, "Tone");
		assert_eq!(config.threshold, 0.2);
		assert_eq!(config.concurrency, 2);
		assert!(!config.async_mode);
		assert!(config.strict_mode);
		assert!(!config.include_reason);
		assert_eq!(config.dag, dir.path().join("dag.yaml"));
	}

	#[test]
	fn config_conflicts_with_dag_flag() {
		assert!(Cli::try_parse_from(["dageval", "run", "--config", "e.yaml", "--dag", "d.yaml"]).is_err());
	}
}
