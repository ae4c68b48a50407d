//! Warm-up cosine decay learning-rate schedule.
//!
//! ```text
//! g < warmup                    lr = warmup_lr + g * (base - warmup_lr) / warmup
//! g <= warmup + hold (hold > 0) lr = base
//! g <= total                    lr = 0.5 * base * (1 + cos(pi * (g - warmup - hold) / (total - warmup - hold)))
//! g > total                     lr = 0
//! ```

use crate::config::WarmupConfig;
use crate::error::FitError;
use serde::{Deserialize, Serialize};

/// Learning rate as a function of the global batch step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmupCosineSchedule {
    pub learning_rate_base: f64,
    pub total_steps: usize,
    pub warmup_learning_rate: f64,
    pub warmup_steps: usize,
    pub hold_base_rate_steps: usize,
}

impl WarmupCosineSchedule {
    pub fn new(
        learning_rate_base: f64,
        total_steps: usize,
        warmup_learning_rate: f64,
        warmup_steps: usize,
        hold_base_rate_steps: usize,
    ) -> Result<Self, FitError> {
        if total_steps < warmup_steps {
            return Err(FitError::schedule(format!(
                "total_steps ({total_steps}) must be larger or equal to warmup_steps ({warmup_steps})"
            )));
        }
        if warmup_steps > 0 && learning_rate_base < warmup_learning_rate {
            return Err(FitError::schedule(format!(
                "learning_rate_base ({learning_rate_base}) must be larger or equal to warmup_learning_rate ({warmup_learning_rate})"
            )));
        }
        Ok(Self {
            learning_rate_base,
            total_steps,
            warmup_learning_rate,
            warmup_steps,
            hold_base_rate_steps,
        })
    }

    /// Schedule for a run of `epochs` epochs of `steps_per_epoch` batches:
    /// `total = steps * epochs`, `warmup = steps * min(max_warmup_epochs, epochs - 1)`.
    pub fn for_run(
        learning_rate_base: f64,
        steps_per_epoch: usize,
        epochs: usize,
        warmup: &WarmupConfig,
    ) -> Result<Self, FitError> {
        if epochs == 0 {
            return Err(FitError::schedule("epochs must be at least 1"));
        }
        let warmup_epochs = warmup.max_warmup_epochs.min(epochs - 1);
        Self::new(
            learning_rate_base,
            steps_per_epoch * epochs,
            warmup.warmup_learning_rate,
            steps_per_epoch * warmup_epochs,
            warmup.hold_base_rate_steps,
        )
    }

    /// Learning rate for batch `global_step` (0-based).
    pub fn rate(&self, global_step: usize) -> f64 {
        if global_step > self.total_steps {
            return 0.0;
        }
        if self.warmup_steps > 0 && global_step < self.warmup_steps {
            let slope =
                (self.learning_rate_base - self.warmup_learning_rate) / self.warmup_steps as f64;
            return slope * global_step as f64 + self.warmup_learning_rate;
        }
        let plateau_end = self.warmup_steps + self.hold_base_rate_steps;
        if self.hold_base_rate_steps > 0 && global_step <= plateau_end {
            return self.learning_rate_base;
        }

        let decay_span = self.total_steps.saturating_sub(plateau_end);
        if decay_span == 0 {
            return self.learning_rate_base;
        }
        let progress = global_step.saturating_sub(plateau_end) as f64 / decay_span as f64;
        0.5 * self.learning_rate_base * (1.0 + (std::f64::consts::PI * progress).cos())
    }

    /// Rates at every `every`-th step from 0 through `total_steps`.
    pub fn sample(&self, every: usize) -> Vec<(usize, f64)> {
        let every = every.max(1);
        (0..=self.total_steps)
            .step_by(every)
            .map(|step| (step, self.rate(step)))
            .collect()
    }
}
