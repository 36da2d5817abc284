//! Learning-rate schedules.

/// Maps a 1-based optimizer step to a learning rate.
pub trait LearningRateSchedule: Send + Sync {
    /// Rate for `step`. Step 0 means "no update has happened yet".
    fn rate(&self, step: u64) -> f32;
}

/// The inverse-square-root warmup schedule used for transformer training:
///
/// ```text
/// rate(step) = model_dim^-0.5 * min(step^-0.5, step * warmup_steps^-1.5)
/// ```
///
/// The rate rises linearly for `warmup_steps` steps and then decays with
/// `1 / sqrt(step)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarmupInverseSqrt {
    model_dim: usize,
    warmup_steps: u64,
}

impl WarmupInverseSqrt {
    /// Creates the schedule. A zero `warmup_steps` is treated as 1.
    pub fn new(model_dim: usize, warmup_steps: u64) -> Self {
        Self {
            model_dim,
            warmup_steps: warmup_steps.max(1),
        }
    }

    /// Step at which the rate peaks.
    pub fn warmup_steps(&self) -> u64 {
        self.warmup_steps
    }
}

impl LearningRateSchedule for WarmupInverseSqrt {
    fn rate(&self, step: u64) -> f32 {
        if step == 0 || self.model_dim == 0 {
            return 0.0;
        }
        let step = step as f64;
        let warmup = self.warmup_steps as f64;
        let rate = (self.model_dim as f64).powf(-0.5) * step.powf(-0.5).min(step * warmup.powf(-1.5));
        rate as f32
    }
}

/// A fixed rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantRate(pub f32);

impl LearningRateSchedule for ConstantRate {
    fn rate(&self, _step: u64) -> f32 {
        self.0
    }
}
