//! Run artifacts: validation results, the run manifest, and packaging.

use crate::error::{TrainingError, TrainingResult};
use crate::job::{HyperParams, TrainingJobId};
use crate::layout::RunLayout;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Adapter,
    ProcessorConfig,
    Metrics,
    Archive,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub sha256: String,
}

/// Metadata record written alongside a finished (or interrupted) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub job_id: TrainingJobId,
    pub created_at: DateTime<Utc>,
    pub run_name: String,
    pub base_model: String,
    pub hyperparams: HyperParams,
    #[serde(default)]
    pub val_metrics: Option<BTreeMap<String, f64>>,
    pub artifacts: Vec<RunArtifact>,
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

pub fn make_artifact(kind: ArtifactKind, path: PathBuf) -> TrainingResult<RunArtifact> {
    if !path.exists() {
        return Err(TrainingError::Artifact(format!(
            "artifact path does not exist: {}",
            path.display()
        )));
    }

    let hash = sha256_file(&path)?;
    Ok(RunArtifact { kind, path, sha256: hash })
}

/// Persists evaluation metrics as structured JSON plus a human-readable
/// mirror.
pub fn write_validation_results(
    layout: &RunLayout,
    metrics: &BTreeMap<String, f64>,
) -> TrainingResult<()> {
    let json = serde_json::to_string_pretty(metrics)?;
    std::fs::write(layout.validation_results_path(), json)?;

    let mut text = String::from("VALIDATION RESULTS\n==================\n");
    for (key, value) in metrics {
        text.push_str(&format!("{key}: {value}\n"));
    }
    std::fs::write(layout.validation_log_path(), text)?;
    Ok(())
}

pub fn write_manifest(layout: &RunLayout, manifest: &RunManifest) -> TrainingResult<()> {
    let json = serde_json::to_string_pretty(manifest)?;
    std::fs::write(layout.manifest_path(), json)?;
    Ok(())
}

/// Packages the run's `final_adapter` directory into a single compressed
/// archive at the layout's deterministic archive path.
pub fn package_run(layout: &RunLayout) -> TrainingResult<PathBuf> {
    use flate2::Compression;
    use flate2::write::GzEncoder;

    let adapter_dir = layout.final_adapter_dir();
    if !adapter_dir.is_dir() {
        return Err(TrainingError::Artifact(format!(
            "adapter directory does not exist: {}",
            adapter_dir.display()
        )));
    }

    let archive_path = layout.archive_path();
    let file = std::fs::File::create(&archive_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut tar = tar::Builder::new(encoder);
    tar.append_dir_all(".", &adapter_dir)?;
    let mut encoder = tar.into_inner()?;
    encoder.flush()?;
    encoder.finish()?;

    Ok(archive_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sha256_file_is_stable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.bin");
        std::fs::write(&path, b"adapter bytes").unwrap();

        let first = sha256_file(&path).unwrap();
        let second = sha256_file(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_make_artifact_requires_existing_path() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing.bin");
        assert!(make_artifact(ArtifactKind::Adapter, missing).is_err());
    }

    #[test]
    fn test_write_validation_results_mirror() {
        let temp = TempDir::new().unwrap();
        let layout = RunLayout::new(temp.path(), "lora_1");
        layout.ensure_dirs().unwrap();

        let mut metrics = BTreeMap::new();
        metrics.insert("eval_loss".to_string(), 0.4321);
        metrics.insert("eval_runtime".to_string(), 12.5);
        write_validation_results(&layout, &metrics).unwrap();

        let parsed: BTreeMap<String, f64> = serde_json::from_str(
            &std::fs::read_to_string(layout.validation_results_path()).unwrap(),
        )
        .unwrap();
        assert_eq!(parsed, metrics);

        let text = std::fs::read_to_string(layout.validation_log_path()).unwrap();
        assert!(text.starts_with("VALIDATION RESULTS\n==================\n"));
        assert!(text.contains("eval_loss: 0.4321"));
    }

    #[test]
    fn test_package_run_creates_archive() {
        let temp = TempDir::new().unwrap();
        let layout = RunLayout::new(temp.path(), "lora_2");
        layout.ensure_dirs().unwrap();
        std::fs::write(layout.final_adapter_dir().join("adapter.bin"), b"weights").unwrap();

        let archive = package_run(&layout).unwrap();
        assert_eq!(archive, layout.archive_path());
        assert!(archive.exists());
        assert!(std::fs::metadata(&archive).unwrap().len() > 0);
    }

    #[test]
    fn test_package_run_fails_without_adapter_dir() {
        let temp = TempDir::new().unwrap();
        let layout = RunLayout::new(temp.path(), "lora_3");
        assert!(package_run(&layout).is_err());
    }

    #[test]
    fn test_manifest_round_trip() {
        let temp = TempDir::new().unwrap();
        let layout = RunLayout::new(temp.path(), "lora_4");
        layout.ensure_dirs().unwrap();

        let manifest = RunManifest {
            job_id: TrainingJobId::new(),
            created_at: Utc::now(),
            run_name: "lora_4".to_string(),
            base_model: "qwen3-vl-2b".to_string(),
            hyperparams: HyperParams::default(),
            val_metrics: None,
            artifacts: Vec::new(),
        };
        write_manifest(&layout, &manifest).unwrap();

        let parsed: RunManifest = serde_json::from_str(
            &std::fs::read_to_string(layout.manifest_path()).unwrap(),
        )
        .unwrap();
        assert_eq!(parsed.run_name, "lora_4");
        assert_eq!(parsed.job_id, manifest.job_id);
    }
}
