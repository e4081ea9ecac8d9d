use std::{
    env::consts,
    fs,
    path::Path,
    time::Instant,
};

use anyhow::{ensure, Context, Result};
use income_learning::{
    evaluate, load_data, preprocess_data, read_table, ArtifactStore, ClassicalMlPipeline,
    EvaluationReport, FittedPreprocessor, LearningTelemetry, LogisticRegressionModel,
    PipelineConfig, PreprocessedData, ReadOptions, SavedArtifacts, TabularSchema, TrainingReport,
};
use income_tracking::{ActiveRun, TrackingClient};
use serde_json::{json, Value};
use shared_logging::LogLevel;

/// Result of a completed tracked run.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub run_id: String,
    pub artifacts: SavedArtifacts,
    pub training: TrainingReport,
    pub evaluation: EvaluationReport,
}

/// Loads, preprocesses, trains, evaluates and records one run.
///
/// Data is loaded before the run is opened, so unreadable inputs leave no run
/// and no artifacts behind. Once opened, the run ends `FINISHED` or `FAILED`.
pub async fn run_pipeline(
    config: &PipelineConfig,
    client: &TrackingClient,
    telemetry: &LearningTelemetry,
) -> Result<PipelineOutcome> {
    let started = Instant::now();
    log_system_info(telemetry);

    let schema = TabularSchema::adult();
    let (train, test) = load_data(
        config.train_path(),
        config.test_path(),
        &schema,
        config.read_options(),
    )
    .context("loading data")?;
    log(
        telemetry,
        LogLevel::Info,
        "Data loaded",
        json!({ "train_rows": train.len(), "test_rows": test.len() }),
    );

    let data = preprocess_data(&train, &test, &schema, config.preprocess_options())
        .context("preprocessing data")?;

    let run = client
        .start_run(&[])
        .await
        .context("starting tracking run")?;
    let run_id = run.run_id().to_string();
    log(
        telemetry,
        LogLevel::Info,
        &format!("Started run {run_id}"),
        json!({ "experiment_id": run.info().experiment_id }),
    );

    let outcome = tracked(&run, config, &data, telemetry).await;
    let (artifacts, training, evaluation) = run.close(outcome).await?;

    log(
        telemetry,
        LogLevel::Info,
        &format!(
            "Script completed in {:.2} seconds.",
            started.elapsed().as_secs_f64()
        ),
        Value::Null,
    );
    Ok(PipelineOutcome {
        run_id,
        artifacts,
        training,
        evaluation,
    })
}

async fn tracked(
    run: &ActiveRun,
    config: &PipelineConfig,
    data: &PreprocessedData,
    telemetry: &LearningTelemetry,
) -> Result<(SavedArtifacts, TrainingReport, EvaluationReport)> {
    let pipeline = ClassicalMlPipeline::new(config.training.clone()).with_telemetry(telemetry.clone());
    let (model, training) = pipeline
        .train(&data.x_train, &data.y_train)
        .context("training model")?;
    let evaluation = pipeline
        .evaluate(&model, &data.x_test, &data.y_test)
        .context("evaluating model")?;

    run.log_params(&run_params(config, data)?)
        .await
        .context("logging params")?;
    run.log_metrics(&run_metrics(&training, &evaluation))
        .await
        .context("logging metrics")?;

    let store = ArtifactStore::open(&config.model_dir)?;
    let artifacts = store.save_all(&model, &data.scaler, &data.encoders)?;
    run.log_artifact(&artifacts.model, None)
        .await
        .context("uploading model")?;
    for path in [&artifacts.scaler, &artifacts.encoders] {
        run.log_artifact(path, Some("preprocessing"))
            .await
            .with_context(|| format!("uploading {}", path.display()))?;
    }

    write_run_id(&config.run_id_path, run.run_id())?;
    log(
        telemetry,
        LogLevel::Info,
        &format!("Run id written to {}", config.run_id_path.display()),
        json!({ "run_id": run.run_id() }),
    );
    Ok((artifacts, training, evaluation))
}

fn run_params(config: &PipelineConfig, data: &PreprocessedData) -> Result<Vec<(String, String)>> {
    let mut params = Vec::new();
    if let Value::Object(map) = serde_json::to_value(&config.training)? {
        for (key, value) in map {
            let value = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
            params.push((key, value));
        }
    }
    params.extend([
        (
            "model_class".to_string(),
            LogisticRegressionModel::CLASS_NAME.to_string(),
        ),
        ("n_features".to_string(), data.feature_names.len().to_string()),
        ("n_train_samples".to_string(), data.y_train.len().to_string()),
        ("n_test_samples".to_string(), data.y_test.len().to_string()),
    ]);
    Ok(params)
}

fn run_metrics(training: &TrainingReport, evaluation: &EvaluationReport) -> Vec<(String, f64)> {
    let mut metrics = vec![
        (
            "training_accuracy_score".to_string(),
            training.fit.training_accuracy,
        ),
        ("training_log_loss".to_string(), training.fit.training_log_loss),
        ("training_time_seconds".to_string(), training.elapsed_seconds),
    ];
    metrics.extend(evaluation.metrics.named("test_"));
    metrics
}

fn write_run_id(path: &Path, run_id: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, run_id).with_context(|| format!("writing run id to {}", path.display()))
}

/// Scores previously saved artifacts against a labelled file.
pub fn evaluate_saved(
    model_dir: &Path,
    data_path: &Path,
    options: ReadOptions,
    drop_missing: bool,
    telemetry: &LearningTelemetry,
) -> Result<EvaluationReport> {
    ensure!(
        model_dir.is_dir(),
        "model directory {} not found",
        model_dir.display()
    );
    let store = ArtifactStore::open(model_dir)?;
    let model = store.load_model()?;
    let schema = TabularSchema::adult();
    let preprocessor =
        FittedPreprocessor::from_parts(schema.clone(), store.load_scaler()?, store.load_encoders()?)?;

    let dataset = read_table(data_path, &schema, options)?;
    let dataset = if drop_missing {
        dataset.without_missing()
    } else {
        dataset
    };
    let (features, labels) = preprocessor
        .transform(&dataset, "evaluation")
        .context("transforming evaluation data")?;
    evaluate(&model, &features, &labels, Some(telemetry))
}

/// Reads the run id left by the last run.
pub fn read_run_id(path: &Path) -> Result<String> {
    let id = fs::read_to_string(path)
        .with_context(|| format!("reading run id from {}", path.display()))?;
    Ok(id.trim().to_string())
}

fn log_system_info(telemetry: &LearningTelemetry) {
    log(
        telemetry,
        LogLevel::Info,
        &format!("System: {} {} ({})", consts::OS, consts::ARCH, consts::FAMILY),
        json!({ "os": consts::OS, "arch": consts::ARCH, "family": consts::FAMILY }),
    );
}

fn log(telemetry: &LearningTelemetry, level: LogLevel, message: &str, metadata: Value) {
    let _ = telemetry.log(level, message, metadata);
}

#[cfg(test)]
mod tests {
    use super::*;
    use income_learning::{ENCODERS_FILE, MODEL_FILE, SCALER_FILE};
    use income_tracking::{is_valid_run_id, RunStatus, TrackingSettings};
    use tempfile::{tempdir, TempDir};
    use tokio::runtime::Runtime;

    const TRAIN: &str = "\
39, State-gov, 77516, Bachelors, 13, Never-married, Adm-clerical, Not-in-family, White, Male, 2174, 0, 40, United-States, <=50K
50, Self-emp-not-inc, 83311, Bachelors, 13, Married-civ-spouse, Exec-managerial, Husband, White, Male, 0, 0, 13, United-States, <=50K
38, Private, 215646, HS-grad, 9, Divorced, Handlers-cleaners, Not-in-family, White, Male, 0, 0, 40, United-States, <=50K
53, Private, 234721, 11th, 7, Married-civ-spouse, Handlers-cleaners, Husband, Black, Male, 0, 0, 40, United-States, <=50K
28, Private, 338409, Bachelors, 13, Married-civ-spouse, Prof-specialty, Wife, Black, Female, 0, 0, 40, Cuba, <=50K
37, Private, 284582, Masters, 14, Married-civ-spouse, Exec-managerial, Wife, White, Female, 0, 0, 40, United-States, <=50K
52, Self-emp-not-inc, 209642, HS-grad, 9, Married-civ-spouse, Exec-managerial, Husband, White, Male, 0, 0, 45, United-States, >50K
31, Private, 45781, Masters, 14, Never-married, Prof-specialty, Not-in-family, White, Female, 14084, 0, 50, United-States, >50K
42, Private, 159449, Bachelors, 13, Married-civ-spouse, Exec-managerial, Husband, White, Male, 5178, 0, 40, United-States, >50K
37, Private, 280464, Some-college, 10, Married-civ-spouse, Exec-managerial, Husband, Black, Male, 0, 0, 80, United-States, >50K
";

    const TEST: &str = "\
|1x3 Cross validator
25, Private, 226802, 11th, 7, Never-married, Machine-op-inspct, Own-child, Black, Male, 0, 0, 40, United-States, <=50K.
38, Private, 89814, HS-grad, 9, Married-civ-spouse, Farming-fishing, Husband, White, Male, 0, 0, 50, United-States, <=50K.
28, Local-gov, 336951, Assoc-acdm, 12, Married-civ-spouse, Protective-serv, Husband, White, Male, 0, 0, 40, United-States, >50K.
44, Private, 160323, Some-college, 10, Married-civ-spouse, Machine-op-inspct, Husband, Black, Male, 7688, 0, 40, United-States, >50K.
18, ?, 103497, Some-college, 10, Never-married, ?, Own-child, White, Female, 0, 0, 30, United-States, <=50K.
34, Private, 198693, 10th, 6, Never-married, Other-service, Not-in-family, White, Male, 0, 0, 30, United-States, <=50K.
";

    struct Fixture {
        dir: TempDir,
        config: PipelineConfig,
        client: TrackingClient,
        telemetry: LearningTelemetry,
    }

    fn fixture(write_inputs: bool) -> Fixture {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("data/raw");
        fs::create_dir_all(&data_dir).unwrap();
        if write_inputs {
            fs::write(data_dir.join("adult.data"), TRAIN).unwrap();
            fs::write(data_dir.join("adult.test"), TEST).unwrap();
        }
        let mut config = PipelineConfig {
            data_dir,
            model_dir: dir.path().join("models"),
            log_path: dir.path().join("training.log"),
            run_id_path: dir.path().join("run_id.txt"),
            ..PipelineConfig::default()
        };
        config.training.epochs = 50;

        let settings = TrackingSettings::from_lookup(|_| None).with_overrides(
            Some(format!("file:{}", dir.path().join("mlruns").display())),
            Some("adult-income".into()),
            Some("e2e".into()),
        );
        let client = TrackingClient::connect(settings).unwrap();
        let telemetry = LearningTelemetry::builder("trn")
            .log_path(&config.log_path)
            .build()
            .unwrap();
        Fixture {
            dir,
            config,
            client,
            telemetry,
        }
    }

    #[test]
    fn end_to_end_run_writes_artifacts_and_run_id() {
        let fx = fixture(true);
        let rt = Runtime::new().unwrap();
        let outcome = rt
            .block_on(run_pipeline(&fx.config, &fx.client, &fx.telemetry))
            .unwrap();

        for name in [MODEL_FILE, SCALER_FILE, ENCODERS_FILE] {
            assert!(fx.config.model_dir.join(name).is_file(), "{name} missing");
        }
        let run_id = read_run_id(&fx.config.run_id_path).unwrap();
        assert!(is_valid_run_id(&run_id));
        assert_eq!(run_id, outcome.run_id);
        assert_eq!(outcome.evaluation.samples, 5);

        let info = rt.block_on(fx.client.get_run(&run_id)).unwrap();
        assert_eq!(info.status, RunStatus::Finished);
        let artifacts = fx
            .dir
            .path()
            .join("mlruns")
            .join(&info.experiment_id)
            .join(&run_id)
            .join("artifacts");
        assert!(artifacts.join(MODEL_FILE).is_file());
        assert!(artifacts.join("preprocessing").join(SCALER_FILE).is_file());
        assert!(artifacts.join("preprocessing").join(ENCODERS_FILE).is_file());
        let run_dir = artifacts.parent().unwrap();
        assert!(run_dir.join("params/n_features").is_file());
        assert!(run_dir.join("metrics/test_accuracy").is_file());

        let log = fs::read_to_string(&fx.config.log_path).unwrap();
        assert!(log.contains("Model training complete. Time taken:"));
        assert!(log.contains("Script completed in"));
    }

    #[test]
    fn missing_input_fails_before_any_artifact() {
        let fx = fixture(false);
        let rt = Runtime::new().unwrap();
        let err = rt
            .block_on(run_pipeline(&fx.config, &fx.client, &fx.telemetry))
            .unwrap_err();
        assert!(format!("{err:#}").contains("loading data"));
        assert!(!fx.config.model_dir.exists());
        assert!(!fx.config.run_id_path.exists());
    }

    #[test]
    fn fixed_seed_reproduces_metrics() {
        let rt = Runtime::new().unwrap();
        let first = fixture(true);
        let second = fixture(true);
        let a = rt
            .block_on(run_pipeline(&first.config, &first.client, &first.telemetry))
            .unwrap();
        let b = rt
            .block_on(run_pipeline(&second.config, &second.client, &second.telemetry))
            .unwrap();
        assert_eq!(a.evaluation.metrics, b.evaluation.metrics);
        assert_eq!(a.training.fit, b.training.fit);
        assert_ne!(a.run_id, b.run_id);

        // Recorded for seed 42, 50 epochs, 10 training rows and 5 scored test rows.
        let m = &a.evaluation.metrics;
        assert!((m.accuracy - 0.6).abs() < 1e-9, "accuracy {}", m.accuracy);
        assert!(
            (m.log_loss - 0.699_351_446_771_117_8).abs() < 1e-9,
            "log_loss {}",
            m.log_loss
        );
        assert!((m.roc_auc - 2.0 / 3.0).abs() < 1e-9, "roc_auc {}", m.roc_auc);
        assert_eq!((m.tp, m.fp, m.tn, m.fn_count), (1, 1, 2, 1));
        assert!((a.training.fit.training_accuracy - 1.0).abs() < 1e-9);
        assert!((a.training.fit.training_log_loss - 0.279_585_795_816_654_9).abs() < 1e-9);
    }

    #[test]
    fn saved_artifacts_can_be_rescored() {
        let fx = fixture(true);
        let rt = Runtime::new().unwrap();
        let outcome = rt
            .block_on(run_pipeline(&fx.config, &fx.client, &fx.telemetry))
            .unwrap();
        let report = evaluate_saved(
            &fx.config.model_dir,
            &fx.config.test_path(),
            fx.config.read_options(),
            true,
            &fx.telemetry,
        )
        .unwrap();
        assert_eq!(report.metrics, outcome.evaluation.metrics);

        let missing = evaluate_saved(
            &fx.dir.path().join("nowhere"),
            &fx.config.test_path(),
            fx.config.read_options(),
            true,
            &fx.telemetry,
        );
        assert!(missing.is_err());
    }
}
