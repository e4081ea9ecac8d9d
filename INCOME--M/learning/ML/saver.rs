use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use super::{
    editor::{Encoders, StandardScaler},
    ml::LogisticRegressionModel,
};

/// File name of the persisted model.
pub const MODEL_FILE: &str = "model.pkl";
/// File name of the persisted scaler.
pub const SCALER_FILE: &str = "scaler.pkl";
/// File name of the persisted encoders.
pub const ENCODERS_FILE: &str = "encoders.pkl";

/// Paths written by [`ArtifactStore::save_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArtifacts {
    /// Model file.
    pub model: PathBuf,
    /// Scaler file.
    pub scaler: PathBuf,
    /// Encoders file.
    pub encoders: PathBuf,
}

/// Directory holding the model and its preprocessing transforms (JSON encoded).
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Opens the store, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| ArtifactError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Store directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persists the model.
    pub fn save_model(&self, model: &LogisticRegressionModel) -> Result<PathBuf, ArtifactError> {
        self.write(MODEL_FILE, model)
    }

    /// Persists the scaler.
    pub fn save_scaler(&self, scaler: &StandardScaler) -> Result<PathBuf, ArtifactError> {
        self.write(SCALER_FILE, scaler)
    }

    /// Persists the encoders.
    pub fn save_encoders(&self, encoders: &Encoders) -> Result<PathBuf, ArtifactError> {
        self.write(ENCODERS_FILE, encoders)
    }

    /// Persists all three artifacts.
    pub fn save_all(
        &self,
        model: &LogisticRegressionModel,
        scaler: &StandardScaler,
        encoders: &Encoders,
    ) -> Result<SavedArtifacts, ArtifactError> {
        Ok(SavedArtifacts {
            model: self.save_model(model)?,
            scaler: self.save_scaler(scaler)?,
            encoders: self.save_encoders(encoders)?,
        })
    }

    /// Loads the model.
    pub fn load_model(&self) -> Result<LogisticRegressionModel, ArtifactError> {
        self.read(MODEL_FILE)
    }

    /// Loads the scaler.
    pub fn load_scaler(&self) -> Result<StandardScaler, ArtifactError> {
        self.read(SCALER_FILE)
    }

    /// Loads the encoders.
    pub fn load_encoders(&self) -> Result<Encoders, ArtifactError> {
        self.read(ENCODERS_FILE)
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, ArtifactError> {
        let path = self.root.join(name);
        let data = serde_json::to_vec_pretty(value).map_err(|source| ArtifactError::Encode {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, data).map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<T, ArtifactError> {
        let path = self.root.join(name);
        let data = fs::read(&path).map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|source| ArtifactError::Encode { path, source })
    }
}

/// Errors raised while persisting or loading artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Filesystem failure.
    #[error("artifact io {path:?}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// (De)serialization failure.
    #[error("artifact encoding {path:?}: {source}")]
    Encode {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classical_ml::{editor::CategoryEncoder, ml::TrainingConfig};
    use tempfile::tempdir;

    #[test]
    fn writes_three_named_files_and_reads_them_back() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("models")).unwrap();
        let model = LogisticRegressionModel::new(2, &TrainingConfig::default());
        let scaler = StandardScaler::fit(vec!["age".into()], &[vec![1.0, 3.0]]);
        let mut encoders = Encoders::new();
        encoders.insert("sex".into(), CategoryEncoder::fit(["Male", "Female"]));

        let saved = store.save_all(&model, &scaler, &encoders).unwrap();
        assert!(saved.model.ends_with(MODEL_FILE));
        assert!(saved.scaler.exists() && saved.encoders.exists());

        assert_eq!(store.load_model().unwrap(), model);
        assert_eq!(store.load_scaler().unwrap(), scaler);
        assert_eq!(store.load_encoders().unwrap(), encoders);
    }

    #[test]
    fn loading_absent_artifact_is_io_error() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        assert!(matches!(store.load_model(), Err(ArtifactError::Io { .. })));
    }
}
