//! Filesystem layout for one training run's outputs.
//!
//! Layout under the output root:
//! `<output>/<run_name>/final_adapter/...` plus run-level metadata files,
//! with the packaged archive at `<output>/<run_name>.tar.gz`.

use crate::error::TrainingResult;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct RunLayout {
    output_root: PathBuf,
    run_name: String,
}

impl RunLayout {
    #[must_use]
    pub fn new(output_root: impl Into<PathBuf>, run_name: impl Into<String>) -> Self {
        Self { output_root: output_root.into(), run_name: run_name.into() }
    }

    #[must_use]
    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    #[must_use]
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    #[must_use]
    pub fn run_dir(&self) -> PathBuf {
        self.output_root.join(&self.run_name)
    }

    #[must_use]
    pub fn final_adapter_dir(&self) -> PathBuf {
        self.run_dir().join("final_adapter")
    }

    #[must_use]
    pub fn validation_results_path(&self) -> PathBuf {
        self.run_dir().join("validation_results.json")
    }

    #[must_use]
    pub fn validation_log_path(&self) -> PathBuf {
        self.run_dir().join("validation_log.txt")
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.run_dir().join("run_manifest.json")
    }

    #[must_use]
    pub fn archive_path(&self) -> PathBuf {
        self.output_root.join(format!("{}.tar.gz", self.run_name))
    }

    pub fn ensure_dirs(&self) -> TrainingResult<()> {
        std::fs::create_dir_all(self.run_dir())?;
        std::fs::create_dir_all(self.final_adapter_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let layout = RunLayout::new("outputs", "lora_1700000000");

        assert_eq!(layout.run_dir(), PathBuf::from("outputs/lora_1700000000"));
        assert_eq!(
            layout.final_adapter_dir(),
            PathBuf::from("outputs/lora_1700000000/final_adapter")
        );
        assert_eq!(
            layout.archive_path(),
            PathBuf::from("outputs/lora_1700000000.tar.gz")
        );
        assert!(
            layout
                .validation_log_path()
                .to_string_lossy()
                .ends_with("validation_log.txt")
        );
    }

    #[test]
    fn test_ensure_dirs_creates_tree() {
        let temp = TempDir::new().unwrap();
        let layout = RunLayout::new(temp.path(), "lora_1");
        layout.ensure_dirs().unwrap();
        assert!(layout.final_adapter_dir().is_dir());
    }
}
