//! Shared fakes for orchestrator integration tests: an in-process trainer
//! backend that drives the collator and callback protocol the way a real
//! training loop would, plus stub model/processor collaborators.

use crucible_training::{
    AdapterConfig, ChatContent, ChatMessage, ContentProcessor, DecodedImage, EncodedSample,
    ModelLoader, MultimodalCollator, NormalizedDataset, StepState, TrainRun, TrainableModel,
    TrainerArgs, TrainerBackend, TrainerCallback, TrainerControl, TrainingError,
    TrainingJobConfig, TrainingResult,
};
use ndarray::{Array2, ArrayD, IxDyn};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 1x1 transparent PNG.
pub const TINY_PNG: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

pub struct StubLoader;

impl ModelLoader for StubLoader {
    fn load(
        &self,
        model_id: &str,
        _adapter: &AdapterConfig,
    ) -> TrainingResult<(Box<dyn TrainableModel>, Arc<dyn ContentProcessor>)> {
        if model_id == "missing-model" {
            return Err(TrainingError::Model(format!(
                "weights not found for {model_id}"
            )));
        }
        Ok((Box::new(StubModel), Arc::new(EchoProcessor)))
    }
}

pub struct StubModel;

impl TrainableModel for StubModel {
    fn save_adapter(&self, dir: &Path) -> TrainingResult<()> {
        std::fs::write(dir.join("adapter_model.json"), "{}")?;
        Ok(())
    }
}

/// Tokenizes the templated text by word; one pixel row per image.
pub struct EchoProcessor;

impl ContentProcessor for EchoProcessor {
    fn apply_chat_template(
        &self,
        messages: &[ChatMessage],
        _add_generation_prompt: bool,
    ) -> TrainingResult<String> {
        let mut parts = Vec::new();
        for message in messages {
            for item in &message.content {
                match item {
                    ChatContent::Text(text) => parts.push(text.clone()),
                    ChatContent::Image(_) => parts.push("<image>".to_string()),
                }
            }
        }
        Ok(parts.join(" "))
    }

    fn encode(&self, text: &str, images: &[DecodedImage]) -> TrainingResult<EncodedSample> {
        let token_ids: Vec<i64> = text.split_whitespace().map(|w| w.len() as i64).collect();
        let pixel_values =
            (!images.is_empty()).then(|| Array2::from_elem((images.len(), 4), 0.5f32));
        let image_grid = (!images.is_empty()).then(|| {
            ArrayD::from_shape_vec(IxDyn(&[3]), vec![images.len() as i64, 2, 2]).unwrap()
        });
        Ok(EncodedSample { token_ids, attention_mask: None, pixel_values, image_grid })
    }

    fn save_config(&self, dir: &Path) -> TrainingResult<()> {
        std::fs::write(dir.join("processor_config.json"), "{}")?;
        Ok(())
    }
}

/// Backend whose run loop mimics a step-synchronous trainer: it pulls batches
/// through the collator, sleeps per step, fires callbacks, and honors the
/// control stop flag at step boundaries.
#[derive(Default)]
pub struct ScriptedBackend {
    pub step_ms: u64,
    pub fail_training: bool,
    pub fail_eval: bool,
}

impl TrainerBackend for ScriptedBackend {
    fn build(
        &self,
        model: Box<dyn TrainableModel>,
        args: &TrainerArgs,
        train: NormalizedDataset,
        eval: Option<NormalizedDataset>,
        collator: MultimodalCollator,
    ) -> TrainingResult<Box<dyn TrainRun>> {
        Ok(Box::new(ScriptedRun {
            model,
            args: args.clone(),
            train,
            eval,
            collator,
            step_ms: self.step_ms,
            fail_training: self.fail_training,
            fail_eval: self.fail_eval,
        }))
    }
}

pub struct ScriptedRun {
    model: Box<dyn TrainableModel>,
    args: TrainerArgs,
    train: NormalizedDataset,
    eval: Option<NormalizedDataset>,
    collator: MultimodalCollator,
    step_ms: u64,
    fail_training: bool,
    fail_eval: bool,
}

impl TrainRun for ScriptedRun {
    fn train(&mut self, callback: &mut dyn TrainerCallback) -> TrainingResult<()> {
        if self.fail_training {
            return Err(TrainingError::Trainer("loss exploded".to_string()));
        }

        let batch = self.args.batch_size.max(1) as usize;
        let steps_per_epoch = (self.train.len() / batch).max(1) as u64;
        let total_steps = steps_per_epoch * u64::from(self.args.epochs.max(1));
        let started = Instant::now();
        let mut last_loss = 1.0;

        for step in 1..=total_steps {
            let step_state = StepState { global_step: step };
            callback.on_step_begin(&step_state);

            let start = ((step - 1) as usize * batch) % self.train.len();
            let end = (start + batch).min(self.train.len());
            let batch_out = self.collator.collate(&self.train[start..end]);
            assert_eq!(batch_out.token_ids.dim(), batch_out.attention_mask.dim());

            std::thread::sleep(Duration::from_millis(self.step_ms));

            let mut control = TrainerControl::default();
            callback.on_step_end(&step_state, &mut control);

            last_loss = 1.0 / step as f64;
            callback.on_log(
                &step_state,
                &json!({
                    "loss": last_loss,
                    "learning_rate": self.args.learning_rate,
                    "grad_norm": 1.0,
                }),
            );

            if control.stop_requested {
                return Ok(());
            }
        }

        callback.on_log(
            &StepState { global_step: total_steps },
            &json!({
                "train_loss": last_loss,
                "train_runtime": started.elapsed().as_secs_f64(),
            }),
        );
        Ok(())
    }

    fn evaluate(&mut self) -> TrainingResult<BTreeMap<String, f64>> {
        if self.fail_eval {
            return Err(TrainingError::Trainer("eval dataloader crashed".to_string()));
        }
        let mut metrics = BTreeMap::new();
        metrics.insert("eval_loss".to_string(), 0.4321);
        metrics.insert(
            "eval_samples".to_string(),
            self.eval.as_ref().map_or(0.0, |e| e.len() as f64),
        );
        Ok(metrics)
    }

    fn save_adapter(&self, dir: &Path) -> TrainingResult<()> {
        self.model.save_adapter(dir)
    }
}

/// Writes `count` valid multimodal samples as one jsonl file under `dir`.
pub fn write_samples(dir: &Path, count: usize) {
    std::fs::create_dir_all(dir).unwrap();
    let mut lines = Vec::new();
    for i in 0..count {
        let line = json!({
            "messages": [
                {"role": "user", "content": [
                    {"type": "text", "text": format!("describe sample {i}")},
                    {"type": "image", "image": format!("data:image/png;base64,{TINY_PNG}")},
                ]},
            ],
            "response": "a tiny square",
        });
        lines.push(line.to_string());
    }
    std::fs::write(dir.join("train.jsonl"), lines.join("\n")).unwrap();
}

/// Standard job config rooted in a temp directory: `train/`, `val/`, `outputs/`.
pub fn job_config(root: &Path) -> TrainingJobConfig {
    let mut config = TrainingJobConfig::new(
        "qwen3-vl-2b-test",
        root.join("train"),
        root.join("val"),
        root.join("outputs"),
    );
    std::fs::create_dir_all(&config.train_data_dir).unwrap();
    std::fs::create_dir_all(&config.val_data_dir).unwrap();
    std::fs::create_dir_all(&config.output_dir).unwrap();
    config.hyperparams.epochs = 1;
    config.hyperparams.batch_size = 2;
    config
}
