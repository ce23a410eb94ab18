use std::f64::consts::PI;

use candle_nn::Optimizer;

/// Multiplicative factor applied to the base learning rate at a given epoch.
pub trait LrSchedule {
    fn factor(&self, epoch: usize) -> f64;

    fn lr(&self, base_lr: f64, epoch: usize) -> f64 {
        base_lr * self.factor(epoch)
    }

    /// Sets the optimizer's learning rate for `epoch` and returns it.
    fn apply<O: Optimizer>(&self, optimizer: &mut O, base_lr: f64, epoch: usize) -> f64
    where
        Self: Sized,
    {
        let lr = self.lr(base_lr, epoch);
        optimizer.set_learning_rate(lr);
        lr
    }
}

pub struct Constant;

impl LrSchedule for Constant {
    fn factor(&self, _epoch: usize) -> f64 {
        1.0
    }
}

/// `(1 + cos(pi * t / T)) / 2`, optionally preceded by a linear warmup.
pub struct CosineAnnealing {
    pub total_epochs: usize,
    pub warmup_epochs: usize,
}

impl CosineAnnealing {
    pub fn new(total_epochs: usize) -> Self {
        Self {
            total_epochs,
            warmup_epochs: 0,
        }
    }

    pub fn with_warmup(total_epochs: usize, warmup_epochs: usize) -> Self {
        Self {
            total_epochs,
            warmup_epochs,
        }
    }
}

impl LrSchedule for CosineAnnealing {
    fn factor(&self, epoch: usize) -> f64 {
        if epoch < self.warmup_epochs {
            return epoch as f64 / self.warmup_epochs as f64;
        }
        let span = self.total_epochs.saturating_sub(self.warmup_epochs).max(1) as f64;
        let t = (epoch - self.warmup_epochs) as f64;
        (1.0 + (t * PI / span).cos()) * 0.5
    }
}

/// Schedule picked from configuration.
pub enum Schedule {
    Constant(Constant),
    Cosine(CosineAnnealing),
}

impl Schedule {
    pub fn from_config(enabled: bool, total_epochs: usize, warmup_epochs: usize) -> Self {
        if enabled {
            Self::Cosine(CosineAnnealing::with_warmup(total_epochs, warmup_epochs))
        } else {
            Self::Constant(Constant)
        }
    }
}

impl LrSchedule for Schedule {
    fn factor(&self, epoch: usize) -> f64 {
        match self {
            Self::Constant(s) => s.factor(epoch),
            Self::Cosine(s) => s.factor(epoch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_endpoints() {
        let s = CosineAnnealing::new(100);
        assert!((s.factor(0) - 1.0).abs() < 1e-12);
        assert!((s.factor(50) - 0.5).abs() < 1e-12);
        assert!(s.factor(100).abs() < 1e-12);
    }

    #[test]
    fn cosine_is_monotone() {
        let s = CosineAnnealing::new(40);
        for epoch in 1..=40 {
            assert!(s.factor(epoch) <= s.factor(epoch - 1));
        }
    }

    #[test]
    fn warmup_ramps_linearly() {
        let s = CosineAnnealing::with_warmup(110, 10);
        assert_eq!(s.factor(0), 0.0);
        assert!((s.factor(5) - 0.5).abs() < 1e-12);
        assert!((s.factor(10) - 1.0).abs() < 1e-12);
        assert!((s.factor(60) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn disabled_schedule_is_constant() {
        let s = Schedule::from_config(false, 10, 0);
        assert_eq!(s.lr(0.01, 0), 0.01);
        assert_eq!(s.lr(0.01, 9), 0.01);
    }
}
