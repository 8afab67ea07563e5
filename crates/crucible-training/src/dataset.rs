//! Dataset loading: folder scan, lenient parsing, transform, validation.

use crate::error::{TrainingError, TrainingResult};
use crate::sample::{NormalizedSample, merge_reasoning_fields, normalize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub type NormalizedDataset = Vec<NormalizedSample>;

/// Collects `.json` / `.jsonl` files under a folder, sorted for determinism.
/// A missing folder yields an empty list.
pub fn collect_data_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if !folder.exists() {
        return files;
    }

    for entry in WalkDir::new(folder)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json" | "jsonl") => files.push(path.to_path_buf()),
            _ => {}
        }
    }

    files.sort();
    files
}

/// Parses one dataset file into raw JSON samples. `.jsonl` files hold one
/// object per line; `.json` files hold a single object or a top-level array.
/// Malformed lines and files are skipped with a warning.
fn parse_data_file(path: &Path) -> TrainingResult<Vec<Value>> {
    let contents = std::fs::read_to_string(path)?;
    let mut samples = Vec::new();

    if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
        for (idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(value) => samples.push(value),
                Err(e) => {
                    warn!(
                        file = %path.display(),
                        line = idx + 1,
                        error = %e,
                        "skipping malformed jsonl line"
                    );
                }
            }
        }
        return Ok(samples);
    }

    match serde_json::from_str::<Value>(&contents) {
        Ok(Value::Array(values)) => samples.extend(values),
        Ok(value) => samples.push(value),
        Err(e) => {
            warn!(file = %path.display(), error = %e, "skipping malformed json file");
        }
    }
    Ok(samples)
}

/// Loads every sample under `folder`, merges reasoning side-channels, and
/// keeps only structurally valid samples.
///
/// Returns `Ok(None)` when `allow_empty` is set and the folder yields nothing
/// usable; otherwise zero usable samples is an error.
pub fn load_and_normalize(
    folder: &Path,
    allow_empty: bool,
    use_thinking: bool,
) -> TrainingResult<Option<NormalizedDataset>> {
    let files = collect_data_files(folder);
    if files.is_empty() {
        if allow_empty {
            return Ok(None);
        }
        return Err(TrainingError::Dataset(format!(
            "no dataset files found in {}",
            folder.display()
        )));
    }

    let mut raw = Vec::new();
    for file in &files {
        raw.extend(parse_data_file(file)?);
    }

    let total = raw.len();
    let dataset: NormalizedDataset = raw
        .into_iter()
        .map(|sample| merge_reasoning_fields(sample, use_thinking))
        .filter_map(|sample| normalize(&sample))
        .collect();

    debug!(
        folder = %folder.display(),
        parsed = total,
        valid = dataset.len(),
        "dataset normalized"
    );

    if dataset.is_empty() {
        if allow_empty {
            return Ok(None);
        }
        return Err(TrainingError::Dataset(
            "no valid training samples found after validation".to_string(),
        ));
    }
    Ok(Some(dataset))
}
