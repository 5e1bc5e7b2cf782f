//! Risk model persistence.
//!
//! Models are stored as JSON blobs keyed by model name. Loading never fails:
//! a missing or unreadable blob yields the pretrained default model.

use crate::error::ModelError;
use crate::feature_extractor::{FeatureName, FEATURE_SCHEMA_VERSION};
use crate::models::risk_model::RiskModel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Durable blob storage for serialized models.
pub trait ModelStorage: Send + Sync {
    /// Read the blob stored under `name`, `None` if there is none.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, ModelError>;

    /// Replace the blob stored under `name`.
    fn write(&self, name: &str, blob: &[u8]) -> Result<(), ModelError>;
}

/// Stores each model as `<dir>/<name>.json`.
pub struct FileModelStorage {
    dir: PathBuf,
}

impl FileModelStorage {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }
}

impl ModelStorage for FileModelStorage {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, ModelError> {
        match fs::read(self.path_for(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, name: &str, blob: &[u8]) -> Result<(), ModelError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(name);
        // write-then-rename so readers never see a partial blob
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, blob)?;
        fs::rename(&staging, &path)?;
        Ok(())
    }
}

/// Process-local storage, mostly for tests.
#[derive(Default)]
pub struct InMemoryModelStorage {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryModelStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelStorage for InMemoryModelStorage {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, ModelError> {
        let blobs = self
            .blobs
            .read()
            .map_err(|_| ModelError::Storage(std::io::Error::other("storage lock poisoned")))?;
        Ok(blobs.get(name).cloned())
    }

    fn write(&self, name: &str, blob: &[u8]) -> Result<(), ModelError> {
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| ModelError::Storage(std::io::Error::other("storage lock poisoned")))?;
        blobs.insert(name.to_string(), blob.to_vec());
        Ok(())
    }
}

/// On-disk representation of a model.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedModel {
    weights: BTreeMap<FeatureName, f64>,
    bias: f64,
    learning_rate: f64,
    trained: bool,
    version: String,
    #[serde(default = "default_schema")]
    feature_schema: String,
    saved_at: DateTime<Utc>,
}

fn default_schema() -> String {
    FEATURE_SCHEMA_VERSION.to_string()
}

impl RiskModel {
    /// Serialize the model with a save timestamp.
    pub fn to_blob(&self) -> Result<Vec<u8>, ModelError> {
        let persisted = PersistedModel {
            weights: FeatureName::ALL
                .iter()
                .map(|&name| (name, self.weight(name)))
                .collect(),
            bias: self.bias(),
            learning_rate: self.learning_rate(),
            trained: self.is_trained(),
            version: self.version().to_string(),
            feature_schema: FEATURE_SCHEMA_VERSION.to_string(),
            saved_at: Utc::now(),
        };
        Ok(serde_json::to_vec_pretty(&persisted)?)
    }

    /// Parse a blob written by [`RiskModel::to_blob`].
    ///
    /// Rejects blobs from another feature schema, with missing weights or
    /// with non-finite parameters.
    pub fn from_blob(blob: &[u8]) -> Result<Self, ModelError> {
        let persisted: PersistedModel = serde_json::from_slice(blob)?;

        if persisted.feature_schema != FEATURE_SCHEMA_VERSION {
            return Err(ModelError::Corrupt(format!(
                "feature schema {} does not match {}",
                persisted.feature_schema, FEATURE_SCHEMA_VERSION
            )));
        }

        let mut weights = [0.0; FeatureName::COUNT];
        for name in FeatureName::ALL {
            let weight = persisted.weights.get(&name).copied().ok_or_else(|| {
                ModelError::Corrupt(format!("missing weight for {}", name))
            })?;
            weights[name.index()] = weight;
        }

        let finite = weights.iter().all(|w| w.is_finite())
            && persisted.bias.is_finite()
            && persisted.learning_rate.is_finite();
        if !finite {
            return Err(ModelError::Corrupt(
                "non-finite model parameters".to_string(),
            ));
        }

        Ok(RiskModel::from_parts(
            weights,
            persisted.bias,
            persisted.learning_rate,
            persisted.trained,
            persisted.version,
        ))
    }
}

/// Loads and saves models through a [`ModelStorage`].
#[derive(Clone)]
pub struct ModelLoader {
    storage: Arc<dyn ModelStorage>,
}

impl ModelLoader {
    pub fn new(storage: Arc<dyn ModelStorage>) -> Self {
        Self { storage }
    }

    /// Loader over `<dir>/<name>.json` files.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self::new(Arc::new(FileModelStorage::new(dir)))
    }

    /// Load the model stored under `name`, or the pretrained default.
    pub fn load(&self, name: &str) -> RiskModel {
        match self.try_load(name) {
            Ok(Some(model)) => {
                info!(
                    model = %name,
                    version = %model.version(),
                    trained = model.is_trained(),
                    "Model loaded successfully"
                );
                model
            }
            Ok(None) => {
                info!(model = %name, "No saved model found, using pretrained model");
                RiskModel::pretrained()
            }
            Err(e) => {
                warn!(model = %name, error = %e, "Saved model unreadable, using pretrained model");
                RiskModel::pretrained()
            }
        }
    }

    /// Load the model stored under `name`, surfacing storage and format errors.
    pub fn try_load(&self, name: &str) -> Result<Option<RiskModel>, ModelError> {
        match self.storage.read(name)? {
            Some(blob) => RiskModel::from_blob(&blob).map(Some),
            None => Ok(None),
        }
    }

    pub fn save(&self, name: &str, model: &RiskModel) -> Result<(), ModelError> {
        let blob = model.to_blob()?;
        self.storage.write(name, &blob)?;
        info!(model = %name, version = %model.version(), "Model saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom_model() -> RiskModel {
        RiskModel::from_parts([0.1, -0.2, 0.3333333333, 1e-9, 2.5], -0.75, 0.05, true, "2.0.1")
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ModelLoader::from_dir(dir.path());
        let model = custom_model();

        loader.save("fraud", &model).unwrap();
        let loaded = loader.try_load("fraud").unwrap().unwrap();

        for name in FeatureName::ALL {
            assert!((loaded.weight(name) - model.weight(name)).abs() < 1e-12);
        }
        assert!((loaded.bias() - model.bias()).abs() < 1e-12);
        assert_eq!(loaded.version(), "2.0.1");
        assert!(loaded.is_trained());
        assert!(dir.path().join("fraud.json").exists());
        assert!(!dir.path().join("fraud.json.tmp").exists());
    }

    #[test]
    fn test_missing_blob_falls_back_to_pretrained() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ModelLoader::from_dir(dir.path().join("does-not-exist"));

        assert_eq!(loader.load("fraud"), RiskModel::pretrained());
    }

    #[test]
    fn test_corrupt_blob_falls_back_to_pretrained() {
        let storage = Arc::new(InMemoryModelStorage::new());
        storage.write("fraud", b"{ not json").unwrap();
        let loader = ModelLoader::new(storage.clone());

        assert!(loader.try_load("fraud").is_err());
        assert_eq!(loader.load("fraud"), RiskModel::pretrained());
    }

    #[test]
    fn test_unknown_feature_is_corrupt() {
        let blob = br#"{
            "weights": {"amount": 0.1, "velocity": 0.1, "new_location": 0.1,
                        "unusual_hour": 0.1, "new_device": 0.1, "merchant": 0.4},
            "bias": 0.0, "learning_rate": 0.01, "trained": true,
            "version": "1.0.0", "saved_at": "2024-01-01T00:00:00Z"
        }"#;
        assert!(RiskModel::from_blob(blob).is_err());
    }

    #[test]
    fn test_missing_weight_is_corrupt() {
        let blob = br#"{
            "weights": {"amount": 0.1, "velocity": 0.1},
            "bias": 0.0, "learning_rate": 0.01, "trained": true,
            "version": "1.0.0", "saved_at": "2024-01-01T00:00:00Z"
        }"#;
        assert!(RiskModel::from_blob(blob).is_err());
    }

    #[test]
    fn test_blob_is_readable_json() {
        let blob = RiskModel::pretrained().to_blob().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&blob).unwrap();

        assert_eq!(value["weights"]["amount"], 0.35);
        assert_eq!(value["bias"], -0.45);
        assert_eq!(value["feature_schema"], "1");
        assert!(value["saved_at"].is_string());
    }
}
