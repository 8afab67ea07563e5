//! Training job configuration.

use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Identifier for a training job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrainingJobId(pub String);

impl TrainingJobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TrainingJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TrainingJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Full configuration of one fine-tuning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJobConfig {
    /// Base model identifier resolved by the model loader.
    pub base_model: String,
    pub train_data_dir: PathBuf,
    pub val_data_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Merge `thinking` side-channel fields into assistant turns.
    #[serde(default)]
    pub use_thinking: bool,
    #[serde(default)]
    pub hyperparams: HyperParams,
    #[serde(default)]
    pub adapter: AdapterConfig,
}

impl TrainingJobConfig {
    #[must_use]
    pub fn new(
        base_model: impl Into<String>,
        train_data_dir: impl Into<PathBuf>,
        val_data_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            base_model: base_model.into(),
            train_data_dir: train_data_dir.into(),
            val_data_dir: val_data_dir.into(),
            output_dir: output_dir.into(),
            use_thinking: false,
            hyperparams: HyperParams::default(),
            adapter: AdapterConfig::default(),
        }
    }

    pub fn from_toml_file(path: &Path) -> TrainingResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents).map_err(|e| {
            TrainingError::InvalidConfig(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.base_model.trim().is_empty() {
            return Err(TrainingError::InvalidConfig(
                "base_model is required".to_string(),
            ));
        }
        self.hyperparams.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperParams {
    pub epochs: u32,
    pub batch_size: u32,
    pub learning_rate: f64,
    pub gradient_accumulation_steps: u32,
    pub max_grad_norm: f64,
}

impl Default for HyperParams {
    fn default() -> Self {
        Self {
            epochs: 3,
            batch_size: 1,
            learning_rate: 2e-4,
            gradient_accumulation_steps: 4,
            max_grad_norm: 1.0,
        }
    }
}

impl HyperParams {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.epochs == 0 {
            return Err(TrainingError::InvalidConfig(
                "epochs must be >= 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidConfig(
                "batch_size must be >= 1".to_string(),
            ));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidConfig(
                "learning_rate must be > 0".to_string(),
            ));
        }
        if self.gradient_accumulation_steps == 0 {
            return Err(TrainingError::InvalidConfig(
                "gradient_accumulation_steps must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Low-rank adapter configuration injected into the base model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub rank: u32,
    pub alpha: u32,
    pub dropout: f64,
    pub target_modules: Vec<String>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            rank: 16,
            alpha: 32,
            dropout: 0.05,
            target_modules: [
                "q_proj", "v_proj", "k_proj", "o_proj", "gate_proj", "up_proj", "down_proj",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

/// Arguments handed to the external trainer backend. The engine only
/// transports these; scheduling and optimization are the backend's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerArgs {
    pub output_dir: PathBuf,
    pub run_name: String,
    pub epochs: u32,
    pub batch_size: u32,
    pub learning_rate: f64,
    pub gradient_accumulation_steps: u32,
    pub max_grad_norm: f64,
    /// Log every N steps; 1 keeps progress granular enough for live ETR.
    pub logging_steps: u32,
    pub optimizer: String,
}

impl TrainerArgs {
    #[must_use]
    pub fn for_run(config: &TrainingJobConfig, run_dir: PathBuf, run_name: String) -> Self {
        Self {
            output_dir: run_dir,
            run_name,
            epochs: config.hyperparams.epochs,
            batch_size: config.hyperparams.batch_size,
            learning_rate: config.hyperparams.learning_rate,
            gradient_accumulation_steps: config.hyperparams.gradient_accumulation_steps,
            max_grad_norm: config.hyperparams.max_grad_norm,
            logging_steps: 1,
            optimizer: "adamw_8bit".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_validate_requires_base_model() {
        let config = TrainingJobConfig::new("", "train", "val", "out");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hyperparams_validate() {
        let mut params = HyperParams::default();
        assert!(params.validate().is_ok());

        params.epochs = 0;
        assert!(params.validate().is_err());

        params = HyperParams { learning_rate: f64::NAN, ..HyperParams::default() };
        assert!(params.validate().is_err());

        params = HyperParams { batch_size: 0, ..HyperParams::default() };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_adapter_defaults_match_qwen_projections() {
        let adapter = AdapterConfig::default();
        assert_eq!(adapter.rank, 16);
        assert_eq!(adapter.alpha, 32);
        assert_eq!(adapter.target_modules.len(), 7);
    }

    #[test]
    fn test_from_toml_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("job.toml");
        std::fs::write(
            &path,
            r#"
base_model = "qwen3-vl-2b"
train_data_dir = "uploads/train"
val_data_dir = "uploads/val"
output_dir = "outputs"
use_thinking = true

[hyperparams]
epochs = 1
batch_size = 2
learning_rate = 1e-4
gradient_accumulation_steps = 2
max_grad_norm = 1.0
"#,
        )
        .unwrap();

        let config = TrainingJobConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.base_model, "qwen3-vl-2b");
        assert!(config.use_thinking);
        assert_eq!(config.hyperparams.batch_size, 2);
        assert_eq!(config.adapter.rank, 16);
    }

    #[test]
    fn test_from_toml_file_rejects_invalid() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("job.toml");
        std::fs::write(&path, "base_model = 3").unwrap();
        assert!(TrainingJobConfig::from_toml_file(&path).is_err());
    }
}
