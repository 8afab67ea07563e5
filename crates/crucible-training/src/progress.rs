//! Step-synchronous progress telemetry.
//!
//! The tracker bridges the trainer backend's step/log events into shared run
//! state: smoothed step timing, estimated time remaining, live progress, and
//! the cooperative stop check. The stop flag is polled once per step boundary,
//! so cancellation latency is bounded by one training step.

use crate::state::SharedRunState;
use crate::trainer::{StepState, TrainerCallback, TrainerControl};
use serde_json::Value;
use std::time::Instant;
use tracing::info;

/// Smoothing factor for the step-duration moving average.
const EMA_ALPHA: f64 = 0.1;

pub struct ProgressTracker {
    state: SharedRunState,
    total_steps: u64,
    run_started: Instant,
    step_started: Option<Instant>,
    /// EMA of step duration in seconds, seeded with the first observation.
    avg_step_secs: Option<f64>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(state: SharedRunState, total_steps: u64) -> Self {
        Self {
            state,
            total_steps: total_steps.max(1),
            run_started: Instant::now(),
            step_started: None,
            avg_step_secs: None,
        }
    }

    fn update_timing(&mut self, completed: u64) {
        if let Some(started) = self.step_started.take() {
            let step_secs = started.elapsed().as_secs_f64();
            self.avg_step_secs = Some(match self.avg_step_secs {
                None => step_secs,
                Some(avg) => EMA_ALPHA * step_secs + (1.0 - EMA_ALPHA) * avg,
            });
        }

        if let Some(avg) = self.avg_step_secs {
            let remaining = self.total_steps.saturating_sub(completed);
            self.state.set_etr(format_clock(remaining as f64 * avg));
        }
        self.state
            .set_duration(format_clock(self.run_started.elapsed().as_secs_f64()));
    }

    fn update_progress(&self, completed: u64) {
        let percent = 100.0 * completed as f64 / self.total_steps as f64;
        self.state.set_progress(round1(percent).min(100.0));
    }

    fn render_log_record(&self, step: &StepState, record: &Value) -> Option<String> {
        let obj = record.as_object()?;

        if let Some(loss) = obj.get("loss").and_then(Value::as_f64) {
            let mut line = format!(
                "step {}/{} | loss {:.4}",
                step.global_step, self.total_steps, loss
            );
            if let Some(lr) = obj.get("learning_rate").and_then(Value::as_f64) {
                line.push_str(&format!(" | lr {:.1e}", lr));
            }
            if let Some(grad_norm) = obj.get("grad_norm").and_then(Value::as_f64) {
                line.push_str(&format!(" | grad_norm {:.2}", grad_norm));
            }
            if let Some(acc) = obj.get("mean_token_accuracy").and_then(Value::as_f64) {
                line.push_str(&format!(" | token_acc {:.2}%", acc * 100.0));
            }
            return Some(line);
        }

        if let Some(final_loss) = obj.get("train_loss").and_then(Value::as_f64) {
            let runtime = obj.get("train_runtime").and_then(Value::as_f64).unwrap_or(0.0);
            return Some(format!(
                "training complete | final loss {:.4} | runtime {}",
                final_loss,
                format_clock(runtime)
            ));
        }

        None
    }
}

impl TrainerCallback for ProgressTracker {
    fn on_step_begin(&mut self, _step: &StepState) {
        self.step_started = Some(Instant::now());
    }

    fn on_step_end(&mut self, step: &StepState, control: &mut TrainerControl) {
        if self.state.stop_requested() {
            control.stop_requested = true;
            self.state
                .push_log("Stop signal received. Finishing current step...".to_string());
            info!(step = step.global_step, "stop requested; ending training run");
        }

        self.update_timing(step.global_step);
        self.update_progress(step.global_step);
    }

    fn on_log(&mut self, step: &StepState, record: &Value) {
        // Unrecognized record shapes are ignored without a log line.
        if let Some(line) = self.render_log_record(step, record) {
            self.state.push_log(line);
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Formats seconds as `MM:SS`, or `HH:MM:SS` past one hour. Negative and
/// non-finite inputs collapse to `00:00`.
fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() { seconds.max(0.0) as u64 } else { 0 };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}
