mod pipeline;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use income_learning::{LearningTelemetry, PipelineConfig};
use income_tracking::{is_valid_run_id, RunInfo, TrackingClient, TrackingSettings};
use serde::Serialize;
use serde_json::json;
use shared_logging::{LogFormat, LogLevel};
use tokio::runtime::Runtime;

use crate::pipeline::{evaluate_saved, read_run_id, run_pipeline};

#[derive(Parser, Debug)]
#[command(name = "trn", version, about = "Adult-income training with experiment tracking")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Trains, evaluates and records one tracked run.
    Run(RunArgs),
    /// Scores saved artifacts against a labelled file.
    Evaluate {
        #[arg(long, default_value = "models")]
        model_dir: PathBuf,
        #[arg(long, default_value = "data/raw/adult.test")]
        data: PathBuf,
        #[arg(long)]
        has_header: bool,
        /// Keep rows with `?` cells.
        #[arg(long)]
        keep_missing: bool,
        #[arg(long, default_value = "training.log")]
        log_file: PathBuf,
    },
    /// Shows a recorded run (defaults to the id in `run_id.txt`).
    Status {
        run_id: Option<String>,
        #[arg(long, default_value = "run_id.txt")]
        run_id_file: PathBuf,
        #[command(flatten)]
        tracking: TrackingArgs,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// TOML pipeline config; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long)]
    model_dir: Option<PathBuf>,
    #[arg(long)]
    log_file: Option<PathBuf>,
    #[arg(long)]
    run_id_file: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    epochs: Option<usize>,
    #[arg(long)]
    learning_rate: Option<f64>,
    /// Write JSON lines instead of text to the log file.
    #[arg(long)]
    json_log: bool,
    #[command(flatten)]
    tracking: TrackingArgs,
}

#[derive(Args, Debug)]
struct TrackingArgs {
    /// Overrides `MLFLOW_URL`.
    #[arg(long)]
    tracking_uri: Option<String>,
    /// Overrides `EXPERIMENT_NAME`.
    #[arg(long)]
    experiment: Option<String>,
    /// Overrides `RUN_NAME`.
    #[arg(long)]
    run_name: Option<String>,
}

impl TrackingArgs {
    fn settings(self) -> TrackingSettings {
        TrackingSettings::from_env().with_overrides(self.tracking_uri, self.experiment, self.run_name)
    }
}

#[derive(Debug, Serialize)]
struct RunView {
    #[serde(flatten)]
    info: RunInfo,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl From<RunInfo> for RunView {
    fn from(info: RunInfo) -> Self {
        Self {
            started_at: DateTime::<Utc>::from_timestamp_millis(info.start_time),
            ended_at: info.end_time.and_then(DateTime::<Utc>::from_timestamp_millis),
            info,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => handle_run(args),
        Commands::Evaluate {
            model_dir,
            data,
            has_header,
            keep_missing,
            log_file,
        } => {
            let telemetry = telemetry(log_file, LogFormat::Text)?;
            let options = income_learning::ReadOptions { has_header };
            let report = evaluate_saved(&model_dir, &data, options, !keep_missing, &telemetry)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Status {
            run_id,
            run_id_file,
            tracking,
        } => {
            let run_id = match run_id {
                Some(id) => id,
                None => read_run_id(&run_id_file)?,
            };
            anyhow::ensure!(is_valid_run_id(&run_id), "`{run_id}` is not a run id");
            let client = TrackingClient::connect(tracking.settings())?;
            let info = Runtime::new()?.block_on(client.get_run(&run_id))?;
            println!("{}", serde_json::to_string_pretty(&RunView::from(info))?);
            Ok(())
        }
    }
}

fn handle_run(args: RunArgs) -> Result<()> {
    let config = resolve_config(&args)?;
    let format = if args.json_log {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    let telemetry = telemetry(config.log_path.clone(), format)?;
    let settings = args.tracking.settings();
    let _ = telemetry.log(
        LogLevel::Info,
        "Tracking configured",
        json!({
            "tracking_uri": settings.redacted_uri(),
            "experiment": settings.experiment_name,
            "run_name": settings.run_name,
        }),
    );
    let client = TrackingClient::connect(settings).context("connecting to tracking backend")?;

    let runtime = Runtime::new()?;
    let outcome = runtime.block_on(run_pipeline(&config, &client, &telemetry))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "run_id": outcome.run_id,
            "model": outcome.artifacts.model,
            "scaler": outcome.artifacts.scaler,
            "encoders": outcome.artifacts.encoders,
            "training": outcome.training,
            "evaluation": outcome.evaluation,
        }))?
    );
    Ok(())
}

fn resolve_config(args: &RunArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.data_dir.clone_from(dir);
    }
    if let Some(dir) = &args.model_dir {
        config.model_dir.clone_from(dir);
    }
    if let Some(path) = &args.log_file {
        config.log_path.clone_from(path);
    }
    if let Some(path) = &args.run_id_file {
        config.run_id_path.clone_from(path);
    }
    if let Some(seed) = args.seed {
        config.training.seed = seed;
    }
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(rate) = args.learning_rate {
        config.training.learning_rate = rate;
    }
    Ok(config)
}

fn telemetry(log_path: PathBuf, format: LogFormat) -> Result<LearningTelemetry> {
    LearningTelemetry::builder("trn")
        .log_path(log_path)
        .format(format)
        .console(true)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "model_dir = \"out\"\n[training]\nepochs = 20\nseed = 1\n").unwrap();
        let cli = Cli::try_parse_from([
            "trn",
            "run",
            "--config",
            path.to_str().unwrap(),
            "--seed",
            "7",
            "--data-dir",
            "inputs",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.model_dir, PathBuf::from("out"));
        assert_eq!(config.data_dir, PathBuf::from("inputs"));
        assert_eq!(config.training.epochs, 20);
        assert_eq!(config.training.seed, 7);
    }

    #[test]
    fn status_accepts_tracking_overrides() {
        let cli = Cli::try_parse_from(["trn", "status", "--tracking-uri", "file:mlruns"]).unwrap();
        match cli.command {
            Commands::Status {
                run_id, tracking, ..
            } => {
                assert!(run_id.is_none());
                assert_eq!(tracking.tracking_uri.as_deref(), Some("file:mlruns"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
