//! Collaborator contracts at the training boundary.
//!
//! The engine drives external components through these traits: a model loader
//! that resolves a base model plus adapter configuration, a content processor
//! that templates and tokenizes multimodal chat, and a trainer backend whose
//! blocking run loop pulls batches through the collator and fires callbacks
//! at step boundaries.

use crate::dataset::NormalizedDataset;
use crate::error::TrainingResult;
use crate::images::DecodedImage;
use crate::job::{AdapterConfig, TrainerArgs};
use ndarray::{Array2, ArrayD};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// A chat message as handed to the content processor, with images already
/// decoded and undecodable items filtered out.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: Vec<ChatContent>,
}

#[derive(Debug, Clone)]
pub enum ChatContent {
    Text(String),
    Image(DecodedImage),
}

/// Per-sample output of the content processor.
#[derive(Debug, Clone)]
pub struct EncodedSample {
    pub token_ids: Vec<i64>,
    /// Absent or mismatched masks are replaced with all-ones at collation.
    pub attention_mask: Option<Vec<i64>>,
    pub pixel_values: Option<Array2<f32>>,
    /// Per-image grid descriptor; may arrive 1-D for a single image.
    pub image_grid: Option<ArrayD<i64>>,
}

/// Resolves a base model and injects the adapter configuration.
pub trait ModelLoader: Send + Sync {
    fn load(
        &self,
        model_id: &str,
        adapter: &AdapterConfig,
    ) -> TrainingResult<(Box<dyn TrainableModel>, Arc<dyn ContentProcessor>)>;
}

/// A loaded model with trainable adapter parameters.
pub trait TrainableModel: Send {
    fn save_adapter(&self, dir: &Path) -> TrainingResult<()>;
}

/// Joint chat-template expansion and tokenizer/vision encoding.
pub trait ContentProcessor: Send + Sync {
    fn apply_chat_template(
        &self,
        messages: &[ChatMessage],
        add_generation_prompt: bool,
    ) -> TrainingResult<String>;

    fn encode(&self, text: &str, images: &[DecodedImage]) -> TrainingResult<EncodedSample>;

    fn save_config(&self, dir: &Path) -> TrainingResult<()>;
}

/// Step position reported by the backend's run loop.
#[derive(Debug, Clone, Copy)]
pub struct StepState {
    pub global_step: u64,
}

/// Control surface the backend checks after each callback round. Setting
/// `stop_requested` from a callback ends training at the current step
/// boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrainerControl {
    pub stop_requested: bool,
}

/// Event interface invoked synchronously by the backend's training loop.
pub trait TrainerCallback {
    fn on_step_begin(&mut self, step: &StepState);
    fn on_step_end(&mut self, step: &StepState, control: &mut TrainerControl);
    fn on_log(&mut self, step: &StepState, record: &serde_json::Value);
}

/// Constructs a training run from a model, configuration, datasets, and the
/// batch collator.
pub trait TrainerBackend: Send + Sync {
    fn build(
        &self,
        model: Box<dyn TrainableModel>,
        args: &TrainerArgs,
        train: NormalizedDataset,
        eval: Option<NormalizedDataset>,
        collator: crate::collator::MultimodalCollator,
    ) -> TrainingResult<Box<dyn TrainRun>>;
}

/// A constructed training run.
///
/// `train` blocks until the run completes or a callback requests a stop; it
/// may return early on stop, and the caller distinguishes the two by
/// consulting the shared state afterwards.
pub trait TrainRun {
    fn train(&mut self, callback: &mut dyn TrainerCallback) -> TrainingResult<()>;

    fn evaluate(&mut self) -> TrainingResult<BTreeMap<String, f64>>;

    fn save_adapter(&self, dir: &Path) -> TrainingResult<()>;
}
