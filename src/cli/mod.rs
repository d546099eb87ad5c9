//! Command-line interface
//!
//! One subcommand per workflow stage plus `run` for the whole thing.

use clap::{Parser, Subcommand};
use colored::*;
use polars::prelude::DataFrame;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::data::{rows_to_frame, sample_input, CsvTableSource, TableSource};
use crate::deploy::{CliDeployer, DeploymentRequest, ProvisionSettings, ScoringEntry, ServiceDeployer, ServiceId};
use crate::persistence::DirectoryStore;
use crate::schema::generate_schema;
use crate::scoring::{ResponseMode, ScoreOutcome, ScoringContext};
use crate::server::{run_server, ServiceConfig};
use crate::training::{GradientBoostingConfig, PipelineSpec};
use crate::workflow::{DeploySettings, Workflow, WorkflowConfig};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn kv(key: &str, val: impl std::fmt::Display) {
    println!("  {:<16} {}", muted(key), val.to_string().white());
}

fn print_outcome(outcome: &ScoreOutcome) {
    match outcome {
        ScoreOutcome::Predictions(s) => kv("Predictions", s),
        ScoreOutcome::Failed(e) => println!("  {:<16} {}", muted("Error"), e.red()),
    }
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "kolosal-deploy")]
#[command(author = "KolosalAI")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Train, package and deploy a regression scoring service")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the whole workflow: train, persist, score a sample, write schema, deploy
    Run {
        /// Workflow config file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Input data file (CSV or TSV)
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Target column name
        #[arg(short, long)]
        target: Option<String>,

        /// Model formula, e.g. "price ~ . - id"
        #[arg(short, long)]
        formula: Option<String>,

        /// Directory the pipeline is saved to
        #[arg(long)]
        model_dir: Option<PathBuf>,

        /// Schema output file
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Deploy as a realtime service with this name
        #[arg(long)]
        deploy_as: Option<String>,
    },

    /// Fit, evaluate and persist a pipeline
    Train {
        #[arg(short, long)]
        data: PathBuf,

        #[arg(short, long)]
        target: String,

        /// Model formula; defaults to "<target> ~ ."
        #[arg(short, long)]
        formula: Option<String>,

        #[arg(long, default_value = "./model")]
        model_dir: PathBuf,

        #[arg(long, default_value = "20")]
        n_estimators: usize,

        #[arg(long, default_value = "5")]
        max_depth: usize,

        #[arg(long, default_value = "0.1")]
        learning_rate: f64,
    },

    /// Generate the input schema from sample rows of a dataset
    Schema {
        #[arg(short, long)]
        data: PathBuf,

        /// Target column, excluded from the schema
        #[arg(short, long)]
        target: String,

        #[arg(short, long, default_value = "./schema.json")]
        output: PathBuf,

        #[arg(long, default_value = "input_df")]
        input_param: String,

        #[arg(long, default_value = "3")]
        rows: usize,
    },

    /// Score rows with a persisted pipeline
    Score {
        #[arg(long, default_value = "./model")]
        model_dir: PathBuf,

        /// Rows to score: a CSV/TSV file or a JSON array of row objects
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Serve a persisted pipeline over HTTP
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        model_dir: Option<PathBuf>,

        #[arg(long)]
        schema: Option<PathBuf>,

        #[arg(long)]
        input_param: Option<String>,

        /// compatible or discriminated
        #[arg(long)]
        response_mode: Option<ResponseMode>,
    },

    /// Create a realtime service from a persisted pipeline and schema
    Deploy {
        #[arg(short, long)]
        name: String,

        #[arg(long, default_value = "./model")]
        model_dir: PathBuf,

        #[arg(long, default_value = "./schema.json")]
        schema: PathBuf,

        #[arg(long, default_value = "./score.json")]
        scoring_entry: PathBuf,

        #[arg(long, default_value = "input_df")]
        input_param: String,

        #[arg(short, long, default_value = "rust")]
        runtime: String,

        /// Deployment CLI executable
        #[arg(long)]
        program: Option<String>,
    },

    /// Show a deployed service
    Status {
        #[arg(short, long)]
        id: String,

        #[arg(long)]
        program: Option<String>,
    },

    /// Call a deployed service with a JSON payload file
    Invoke {
        #[arg(short, long)]
        id: String,

        #[arg(short, long)]
        payload: PathBuf,

        #[arg(long)]
        program: Option<String>,
    },

    /// Set up the deployment environment and model management account
    Provision {
        #[arg(short, long)]
        cluster: String,

        #[arg(short, long)]
        location: String,

        #[arg(short = 'g', long)]
        resource_group: String,

        #[arg(short, long)]
        account: String,

        #[arg(long)]
        program: Option<String>,
    },
}

fn deployer(program: Option<String>) -> CliDeployer {
    match program {
        Some(p) => CliDeployer::new().with_program(p),
        None => CliDeployer::new(),
    }
}

/// CSV/TSV through the table reader, anything ending in `.json` as row objects
fn load_rows(path: &Path) -> anyhow::Result<DataFrame> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("json"));
    if is_json {
        let rows: Vec<Value> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        Ok(rows_to_frame(&rows)?)
    } else {
        Ok(CsvTableSource::new().load_table(path)?)
    }
}

// ─── Commands ──────────────────────────────────────────────────────────────────

/// Workflow config from `--config` and/or the command-line overrides.
///
/// `--target` on top of a config file resets the formula to `<target> ~ .`;
/// an explicit `--formula` still wins.
pub fn resolve_run_config(
    config_path: Option<&Path>,
    data: Option<PathBuf>,
    target: Option<String>,
    formula: Option<String>,
    model_dir: Option<PathBuf>,
    schema: Option<PathBuf>,
    deploy_as: Option<String>,
) -> anyhow::Result<WorkflowConfig> {
    let mut config = match (config_path, data, target) {
        (Some(path), data, target) => {
            let mut config = WorkflowConfig::from_file(path)?;
            if let Some(data) = data {
                config.data_path = data;
            }
            if let Some(target) = target {
                config.pipeline.formula = PipelineSpec::for_target(&target).formula;
            }
            config
        }
        (None, Some(data), Some(target)) => WorkflowConfig::new(data, &target),
        (None, _, _) => anyhow::bail!("Either --config or both --data and --target are required"),
    };
    if let Some(formula) = formula {
        config.pipeline.formula = formula;
    }
    if let Some(dir) = model_dir {
        config.model_dir = dir;
    }
    if let Some(path) = schema {
        config.schema_path = path;
    }
    if let Some(name) = deploy_as {
        config.deployment = Some(DeploySettings::new(name));
    }
    Ok(config)
}

pub fn cmd_run(
    config_path: Option<&Path>,
    data: Option<PathBuf>,
    target: Option<String>,
    formula: Option<String>,
    model_dir: Option<PathBuf>,
    schema: Option<PathBuf>,
    deploy_as: Option<String>,
) -> anyhow::Result<()> {
    section("Run");

    let config = resolve_run_config(config_path, data, target, formula, model_dir, schema, deploy_as)?;

    step_run(&format!("Running workflow on {}", config.data_path.display()));
    let start = Instant::now();
    let report = Workflow::new(config).run()?;
    step_done(&format!("{:?}", start.elapsed()));

    println!();
    kv("Rows", report.rows);
    kv("R²", format!("{:.4}", report.metrics.r2));
    kv("RMSE", format!("{:.4}", report.metrics.rmse));
    kv("Model", report.model_dir.display());
    kv("Schema", report.schema_path.display());
    if report.sample_failed {
        print_outcome(&ScoreOutcome::Failed(report.sample_response));
    } else {
        print_outcome(&ScoreOutcome::Predictions(report.sample_response));
    }
    if let Some(id) = report.service_id {
        kv("Service ID", id);
    }
    println!();
    Ok(())
}

pub fn cmd_train(
    data: &Path,
    target: &str,
    formula: Option<String>,
    model_dir: &Path,
    booster: GradientBoostingConfig,
) -> anyhow::Result<()> {
    section("Train");

    let mut config = WorkflowConfig::new(data, target);
    if let Some(formula) = formula {
        config.pipeline.formula = formula;
    }
    config.pipeline.booster = booster;
    config.model_dir = model_dir.to_path_buf();
    config.validate()?;
    let workflow = Workflow::new(config);

    step_run("Loading data");
    let start = Instant::now();
    let df = workflow.ingest()?;
    step_done(&format!("{} rows × {} cols in {:?}", df.height(), df.width(), start.elapsed()));

    step_run(&format!("Fitting {}", workflow.config().pipeline.formula.cyan()));
    let start = Instant::now();
    let (pipeline, metrics) = workflow.train(&df)?;
    step_done(&format!("{:?}", start.elapsed()));

    step_run(&format!("Saving → {}", model_dir.display()));
    workflow.persist(&pipeline)?;
    step_done("");

    println!();
    kv("R²", format!("{:.4}", metrics.r2).bold());
    kv("RMSE", format!("{:.4}", metrics.rmse));
    kv("MAE", format!("{:.4}", metrics.mae));

    section("Top features");
    for (name, importance) in pipeline.feature_importances().into_iter().take(5) {
        println!("  {:<24} {:>8.4}", name, importance);
    }
    println!();
    Ok(())
}

pub fn cmd_schema(data: &Path, target: &str, output: &Path, input_param: &str, rows: usize) -> anyhow::Result<()> {
    section("Schema");

    step_run("Loading data");
    let df = CsvTableSource::new().load_table(data)?;
    step_done(&format!("{} rows × {} cols", df.height(), df.width()));

    let sample = sample_input(&df, target, rows)?;
    let schema = generate_schema(input_param, &sample)?;
    schema.write(output)?;

    println!();
    kv("Parameter", input_param);
    kv("Fields", sample.width());
    kv("Examples", sample.height());
    kv("Written", output.display());
    println!();
    Ok(())
}

pub fn cmd_score(model_dir: &Path, input: &Path) -> anyhow::Result<()> {
    section("Score");

    step_run("Initializing");
    let context = ScoringContext::init(&DirectoryStore::new(), model_dir)?;
    step_done(&format!("{} input columns", context.input_columns().len()));

    let df = load_rows(input)?;
    print_outcome(&context.run(&df));
    println!();
    Ok(())
}

pub async fn cmd_serve(
    host: Option<String>,
    port: Option<u16>,
    model_dir: Option<PathBuf>,
    schema: Option<PathBuf>,
    input_param: Option<String>,
    response_mode: Option<ResponseMode>,
) -> anyhow::Result<()> {
    let mut config = ServiceConfig::default();
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(dir) = model_dir {
        config.model_dir = dir;
    }
    if let Some(path) = schema {
        config.schema_path = Some(path);
    }
    if let Some(param) = input_param {
        config.input_param = param;
    }
    if let Some(mode) = response_mode {
        config.response_mode = mode;
    }

    section("Serve");
    kv("Score", format!("http://{}:{}/score", config.host, config.port));
    kv("Swagger", format!("http://{}:{}/swagger.json", config.host, config.port));
    kv("Health", format!("http://{}:{}/health", config.host, config.port));
    println!("  {}", dim("ctrl+c to stop"));
    println!();

    run_server(config).await
}

pub fn cmd_deploy(
    name: &str,
    model_dir: &Path,
    schema: &Path,
    scoring_entry: &Path,
    input_param: &str,
    runtime: &str,
    program: Option<String>,
) -> anyhow::Result<()> {
    section("Deploy");

    ScoringEntry::new(model_dir, schema, input_param).write(scoring_entry)?;
    let request = DeploymentRequest {
        service_name: name.to_string(),
        model_path: model_dir.to_path_buf(),
        scoring_entry: scoring_entry.to_path_buf(),
        schema_path: schema.to_path_buf(),
        runtime: runtime.to_string(),
    };

    step_run(&format!("Creating service {}", name.cyan()));
    let id = deployer(program).deploy(&request)?;
    step_done("");
    kv("Service ID", id);
    println!();
    Ok(())
}

pub fn cmd_status(id: &str, program: Option<String>) -> anyhow::Result<()> {
    section("Status");
    let status = deployer(program).status(&ServiceId(id.to_string()))?;
    kv("Service ID", &status.id);
    kv("State", status.state.as_deref().unwrap_or("unknown"));
    if let Some(url) = &status.scoring_url {
        kv("Scoring URL", url);
    }
    println!();
    Ok(())
}

pub fn cmd_invoke(id: &str, payload: &Path, program: Option<String>) -> anyhow::Result<()> {
    section("Invoke");
    let body: Value = serde_json::from_str(&std::fs::read_to_string(payload)?)?;
    let response = deployer(program).invoke(&ServiceId(id.to_string()), &body)?;
    println!("  {}", serde_json::to_string_pretty(&response)?);
    println!();
    Ok(())
}

pub fn cmd_provision(settings: &ProvisionSettings, program: Option<String>) -> anyhow::Result<()> {
    section("Provision");
    step_run(&format!("Setting up {} in {}", settings.cluster_name.cyan(), settings.location));
    deployer(program).provision(settings)?;
    step_done("");
    println!();
    Ok(())
}
