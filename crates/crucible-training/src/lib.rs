//! Crucible Training
//!
//! Engine for long-running, cancellable multimodal fine-tuning jobs:
//! - Orchestrating the training lifecycle (`TrainingOrchestrator`)
//! - Sharing live run status with an observer (`SharedRunState`)
//! - Collating heterogeneous text+image samples into padded batches
//!   (`MultimodalCollator`)
//! - Step-synchronous progress/ETR telemetry (`ProgressTracker`)
//! - Driving external model/trainer backends (`ModelLoader`, `TrainerBackend`)

pub mod artifacts;
pub mod collator;
pub mod dataset;
pub mod error;
pub mod images;
pub mod job;
pub mod layout;
pub mod orchestrator;
pub mod progress;
pub mod sample;
pub mod state;
pub mod trainer;

pub use artifacts::{ArtifactKind, RunArtifact, RunManifest, package_run, sha256_file};
pub use collator::{Batch, CollationFault, IGNORE_INDEX, MultimodalCollator};
pub use dataset::{NormalizedDataset, collect_data_files, load_and_normalize};
pub use error::{TrainingError, TrainingResult};
pub use images::{DecodedImage, ImageDecodeError, ImageFormat};
pub use job::{AdapterConfig, HyperParams, TrainerArgs, TrainingJobConfig, TrainingJobId};
pub use layout::RunLayout;
pub use orchestrator::TrainingOrchestrator;
pub use progress::ProgressTracker;
pub use sample::{ContentItem, Message, NormalizedSample};
pub use state::{LOG_CAPACITY, RunStatus, SharedRunState, StatusSnapshot};
pub use trainer::{
    ChatContent, ChatMessage, ContentProcessor, EncodedSample, ModelLoader, StepState,
    TrainRun, TrainableModel, TrainerBackend, TrainerCallback, TrainerControl,
};
