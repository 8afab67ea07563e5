//! Multimodal batch collation.
//!
//! Turns a list of normalized samples into one right-padded numeric batch.
//! Every sample is processed independently; a sample that fails is counted
//! and skipped rather than failing the batch, and a batch where every sample
//! failed degrades to a minimal 1x1 placeholder so the training loop always
//! receives a well-formed shape.

use crate::images::DecodedImage;
use crate::sample::{ContentItem, NormalizedSample};
use crate::trainer::{ChatContent, ChatMessage, ContentProcessor, EncodedSample};
use ndarray::{Array2, Axis, Ix2, concatenate};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

/// Label value excluded from loss computation at padded positions.
pub const IGNORE_INDEX: i64 = -100;

/// A padded training batch. All sequence tensors share one shape; labels
/// mirror the token ids except at padded positions, which hold
/// [`IGNORE_INDEX`].
#[derive(Debug, Clone)]
pub struct Batch {
    pub token_ids: Array2<i64>,
    pub attention_mask: Array2<i64>,
    pub labels: Array2<i64>,
    pub pixel_values: Option<Array2<f32>>,
    pub image_grid: Option<Array2<i64>>,
}

impl Batch {
    /// Minimal placeholder batch: a single pad token with an active mask.
    fn degenerate() -> Self {
        Self {
            token_ids: Array2::zeros((1, 1)),
            attention_mask: Array2::ones((1, 1)),
            labels: Array2::zeros((1, 1)),
            pixel_values: None,
            image_grid: None,
        }
    }
}

/// Why a single sample was dropped from a batch.
#[derive(Debug, Error)]
pub enum CollationFault {
    #[error("sample has no text content")]
    NoText,
    #[error("sample has no decodable images")]
    NoImages,
    #[error("no messages with usable content after image decoding")]
    EmptyMessages,
    #[error("processor produced an empty encoding")]
    EmptyEncoding,
    #[error("processor error: {0}")]
    Processor(String),
}

/// Stateless-per-call collator with running success/failure counters.
pub struct MultimodalCollator {
    processor: Arc<dyn ContentProcessor>,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl MultimodalCollator {
    #[must_use]
    pub fn new(processor: Arc<dyn ContentProcessor>) -> Self {
        Self { processor, succeeded: AtomicU64::new(0), failed: AtomicU64::new(0) }
    }

    pub fn success_count(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Encodes one sample through the content processor.
    ///
    /// An image item that fails to decode is dropped from its message; a
    /// message left without content is dropped entirely. The sample survives
    /// as long as it still carries text and at least one decodable image.
    fn encode_sample(&self, sample: &NormalizedSample) -> Result<EncodedSample, CollationFault> {
        let mut has_text = false;
        let mut chat_messages: Vec<ChatMessage> = Vec::new();

        for message in &sample.messages {
            let mut content = Vec::new();
            for item in &message.content {
                match item {
                    ContentItem::Text { text } => {
                        if !text.is_empty() {
                            has_text = true;
                        }
                        content.push(ChatContent::Text(text.clone()));
                    }
                    ContentItem::Image { image } => match DecodedImage::from_payload(image) {
                        Ok(decoded) => content.push(ChatContent::Image(decoded)),
                        Err(e) => {
                            debug!(error = %e, "dropping undecodable image item");
                        }
                    },
                }
            }
            if !content.is_empty() {
                chat_messages.push(ChatMessage { role: message.role.clone(), content });
            }
        }

        if !has_text {
            return Err(CollationFault::NoText);
        }
        let images: Vec<DecodedImage> = chat_messages
            .iter()
            .flat_map(|m| &m.content)
            .filter_map(|c| match c {
                ChatContent::Image(image) => Some(image.clone()),
                ChatContent::Text(_) => None,
            })
            .collect();
        if images.is_empty() {
            return Err(CollationFault::NoImages);
        }
        if chat_messages.is_empty() {
            return Err(CollationFault::EmptyMessages);
        }

        let text = self
            .processor
            .apply_chat_template(&chat_messages, false)
            .map_err(|e| CollationFault::Processor(e.to_string()))?;
        let encoded = self
            .processor
            .encode(&text, &images)
            .map_err(|e| CollationFault::Processor(e.to_string()))?;

        if encoded.token_ids.is_empty() {
            return Err(CollationFault::EmptyEncoding);
        }
        Ok(encoded)
    }

    /// Builds one batch, skipping failed samples. Never fails: if no sample
    /// survives, the degenerate 1x1 batch is returned.
    pub fn collate(&self, samples: &[NormalizedSample]) -> Batch {
        let mut encoded = Vec::new();
        for sample in samples {
            if sample.messages.is_empty() {
                continue;
            }
            match self.encode_sample(sample) {
                Ok(enc) => {
                    self.succeeded.fetch_add(1, Ordering::Relaxed);
                    encoded.push(enc);
                }
                Err(fault) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    debug!(fault = %fault, "sample dropped from batch");
                }
            }
        }

        if encoded.is_empty() {
            return Batch::degenerate();
        }

        let rows = encoded.len();
        let max_len = encoded.iter().map(|e| e.token_ids.len()).max().unwrap_or(1);

        let mut token_ids = Array2::<i64>::zeros((rows, max_len));
        let mut attention_mask = Array2::<i64>::zeros((rows, max_len));
        for (row, enc) in encoded.iter().enumerate() {
            let len = enc.token_ids.len();
            for (col, &token) in enc.token_ids.iter().enumerate() {
                token_ids[[row, col]] = token;
            }
            match &enc.attention_mask {
                Some(mask) if mask.len() == len => {
                    for (col, &m) in mask.iter().enumerate() {
                        attention_mask[[row, col]] = m;
                    }
                }
                _ => {
                    for col in 0..len {
                        attention_mask[[row, col]] = 1;
                    }
                }
            }
        }

        let mut labels = token_ids.clone();
        for ((row, col), &m) in attention_mask.indexed_iter() {
            if m == 0 {
                labels[[row, col]] = IGNORE_INDEX;
            }
        }

        let pixels: Vec<&Array2<f32>> =
            encoded.iter().filter_map(|e| e.pixel_values.as_ref()).collect();
        let pixel_values = if pixels.is_empty() {
            None
        } else {
            let views: Vec<_> = pixels.iter().map(|p| p.view()).collect();
            match concatenate(Axis(0), &views) {
                Ok(stacked) => Some(stacked),
                Err(e) => {
                    warn!(error = %e, "pixel tensors not stackable; keeping first");
                    Some(pixels[0].clone())
                }
            }
        };

        let mut grids: Vec<Array2<i64>> = Vec::new();
        for grid in encoded.iter().filter_map(|e| e.image_grid.as_ref()) {
            let two_d = match grid.ndim() {
                1 => grid.clone().insert_axis(Axis(0)).into_dimensionality::<Ix2>().ok(),
                2 => grid.clone().into_dimensionality::<Ix2>().ok(),
                _ => None,
            };
            if let Some(g) = two_d {
                grids.push(g);
            }
        }
        let image_grid = if grids.is_empty() {
            None
        } else {
            let views: Vec<_> = grids.iter().map(|g| g.view()).collect();
            concatenate(Axis(0), &views).ok()
        };

        Batch { token_ids, attention_mask, labels, pixel_values, image_grid }
    }
}
