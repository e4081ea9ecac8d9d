use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    classical_ml::{editor::PreprocessOptions, ml::TrainingConfig},
    dataloader::ReadOptions,
};

/// File locations and hyperparameters for one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding the raw splits.
    pub data_dir: PathBuf,
    /// Training split file name.
    pub train_file: String,
    /// Test split file name.
    pub test_file: String,
    /// Whether the split files start with a header line.
    pub has_header: bool,
    /// Drop rows with missing (`?`) cells.
    pub drop_missing: bool,
    /// Directory receiving the model and preprocessing artifacts.
    pub model_dir: PathBuf,
    /// Append-mode run log.
    pub log_path: PathBuf,
    /// File receiving the tracking run id.
    pub run_id_path: PathBuf,
    /// Model hyperparameters.
    pub training: TrainingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/raw"),
            train_file: "adult.data".into(),
            test_file: "adult.test".into(),
            has_header: false,
            drop_missing: true,
            model_dir: PathBuf::from("models"),
            log_path: PathBuf::from("training.log"),
            run_id_path: PathBuf::from("run_id.txt"),
            training: TrainingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads a TOML file; absent keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading config {path:?}"))?;
        toml::from_str(&contents).with_context(|| format!("parsing config {path:?}"))
    }

    /// Path of the training split.
    #[must_use]
    pub fn train_path(&self) -> PathBuf {
        self.data_dir.join(&self.train_file)
    }

    /// Path of the test split.
    #[must_use]
    pub fn test_path(&self) -> PathBuf {
        self.data_dir.join(&self.test_file)
    }

    /// Loader options.
    #[must_use]
    pub const fn read_options(&self) -> ReadOptions {
        ReadOptions {
            has_header: self.has_header,
        }
    }

    /// Preprocessing options.
    #[must_use]
    pub const fn preprocess_options(&self) -> PreprocessOptions {
        PreprocessOptions {
            drop_missing: self.drop_missing,
        }
    }
}
