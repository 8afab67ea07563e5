//! The training lifecycle orchestrator.
//!
//! Runs the full fine-tuning sequence exactly once per invocation on a
//! background worker thread, mutating the shared run state as it goes. The
//! orchestrator is the sole exception boundary: every failure below it is
//! caught here and funneled into terminal state, never re-raised to the
//! caller.

use crate::artifacts::{
    ArtifactKind, RunManifest, make_artifact, package_run, write_manifest,
    write_validation_results,
};
use crate::collator::MultimodalCollator;
use crate::dataset::load_and_normalize;
use crate::error::{TrainingError, TrainingResult};
use crate::job::{TrainerArgs, TrainingJobConfig, TrainingJobId};
use crate::layout::RunLayout;
use crate::progress::ProgressTracker;
use crate::state::{RunStatus, SharedRunState};
use crate::trainer::{ModelLoader, TrainerBackend};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};

pub struct TrainingOrchestrator {
    config: TrainingJobConfig,
    state: SharedRunState,
    loader: Arc<dyn ModelLoader>,
    backend: Arc<dyn TrainerBackend>,
}

impl TrainingOrchestrator {
    #[must_use]
    pub fn new(
        config: TrainingJobConfig,
        state: SharedRunState,
        loader: Arc<dyn ModelLoader>,
        backend: Arc<dyn TrainerBackend>,
    ) -> Self {
        Self { config, state, loader, backend }
    }

    pub fn state(&self) -> &SharedRunState {
        &self.state
    }

    /// Admits the run and executes it on a background worker thread. Fails
    /// only at admission (another run is training); once spawned, every
    /// outcome is reported through the shared state.
    pub fn start(self) -> TrainingResult<JoinHandle<RunStatus>> {
        self.state.begin_run()?;
        Ok(std::thread::spawn(move || self.drive()))
    }

    /// Admits the run and executes it on the calling thread.
    pub fn run(self) -> TrainingResult<RunStatus> {
        self.state.begin_run()?;
        Ok(self.drive())
    }

    fn drive(self) -> RunStatus {
        match self.execute() {
            Ok(status) => status,
            Err(e) => {
                self.record_failure(&e);
                RunStatus::Error
            }
        }
    }

    fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        self.state.push_log(message);
    }

    fn record_failure(&self, e: &TrainingError) {
        self.state.set_status(RunStatus::Error);
        self.state.set_error_msg(e.to_string());
        self.state.push_log(format!("CRITICAL ERROR: {e}"));
        let mut source = std::error::Error::source(e);
        while let Some(cause) = source {
            self.state.push_log(format!("caused by: {cause}"));
            source = cause.source();
        }
        error!(error = %e, "training run failed");
    }

    /// The fallible lifecycle. Returns the terminal status on success;
    /// any error propagating out of here flips the run to `Error`.
    fn execute(&self) -> TrainingResult<RunStatus> {
        let config = &self.config;
        config.validate()?;

        self.log("Initializing training environment...");
        self.log(format!(
            "Dataset strategy: {}",
            if config.use_thinking {
                "including thinking fields"
            } else {
                "standard messages only"
            }
        ));

        // 1. Model and processor.
        let (model, processor) = self.loader.load(&config.base_model, &config.adapter)?;
        self.log(format!("Model loaded: {}", config.base_model));

        // 2. Training dataset; zero valid samples is fatal.
        self.log("Loading training dataset...");
        let train = load_and_normalize(&config.train_data_dir, false, config.use_thinking)?
            .ok_or_else(|| {
                TrainingError::Dataset("no valid training samples found".to_string())
            })?;
        self.log(format!("Training set ready: {} samples.", train.len()));

        // 3. Validation dataset; tolerated empty.
        self.log("Loading validation dataset...");
        let eval = load_and_normalize(&config.val_data_dir, true, config.use_thinking)?;
        match &eval {
            Some(eval) => self.log(format!("Validation set ready: {} samples.", eval.len())),
            None => {
                warn!("no validation data found; evaluation will be skipped");
                self.log("No validation data found. Skipping evaluation phase.");
            }
        }
        let has_eval = eval.is_some();

        // 4. Run naming and layout.
        let run_name = format!("lora_{}", Utc::now().timestamp());
        let layout = RunLayout::new(config.output_dir.clone(), run_name.clone());
        layout.ensure_dirs()?;
        let args = TrainerArgs::for_run(config, layout.run_dir(), run_name.clone());

        // Progress/ETR denominator only; the backend owns real scheduling.
        let batch_size = u64::from(config.hyperparams.batch_size.max(1));
        let steps_per_epoch = (train.len() as u64 / batch_size).max(1);
        let total_steps = steps_per_epoch * u64::from(config.hyperparams.epochs.max(1));

        self.log(format!(
            "Starting run '{run_name}'. Total steps: {total_steps}"
        ));

        // 5. Collator + tracker handed to the backend.
        let collator = MultimodalCollator::new(processor.clone());
        let mut tracker = ProgressTracker::new(self.state.clone(), total_steps);
        let mut run = self.backend.build(model, &args, train, eval, collator)?;

        // 6. Blocking training call; may return early on cooperative stop.
        run.train(&mut tracker)?;

        // 7. Terminal status from the stop flag.
        if self.state.stop_requested() {
            self.log("Training was manually interrupted by user.");
            self.state.set_status(RunStatus::Interrupted);
        } else {
            self.log("Training loop finished successfully.");
            self.state.set_status(RunStatus::Finished);
            self.state.set_progress(100.0);
        }

        // 8. Evaluation; failures are contained and do not change the
        // terminal status.
        let mut val_metrics: Option<BTreeMap<String, f64>> = None;
        if has_eval && !self.state.stop_requested() {
            self.log("Running final validation...");
            match self.run_evaluation(&mut *run, &layout) {
                Ok(metrics) => val_metrics = Some(metrics),
                Err(e) => {
                    warn!(error = %e, "evaluation failed");
                    self.log(format!("Error during validation: {e}"));
                }
            }
        }

        // 9. Artifacts are saved and packaged even after an interruption.
        self.log("Saving adapter and processor...");
        let adapter_dir = layout.final_adapter_dir();
        std::fs::create_dir_all(&adapter_dir)?;
        run.save_adapter(&adapter_dir)?;
        processor.save_config(&adapter_dir)?;

        self.log("Creating archive package...");
        let archive = package_run(&layout)?;

        let manifest = RunManifest {
            job_id: TrainingJobId::new(),
            created_at: Utc::now(),
            run_name: run_name.clone(),
            base_model: config.base_model.clone(),
            hyperparams: config.hyperparams.clone(),
            val_metrics,
            artifacts: vec![make_artifact(ArtifactKind::Archive, archive.clone())?],
        };
        write_manifest(&layout, &manifest)?;

        self.state.set_output_archive(archive.clone());
        self.log(format!("Adapter packaged at: {}", archive.display()));

        Ok(self.state.status())
    }

    fn run_evaluation(
        &self,
        run: &mut dyn crate::trainer::TrainRun,
        layout: &RunLayout,
    ) -> TrainingResult<BTreeMap<String, f64>> {
        let metrics = run.evaluate()?;
        match metrics.get("eval_loss") {
            Some(loss) => self.log(format!("Validation Loss: {loss}")),
            None => self.log("Validation Loss: N/A"),
        }
        self.state.set_val_metrics(metrics.clone());
        write_validation_results(layout, &metrics)?;
        Ok(metrics)
    }
}
