use std::collections::BTreeSet;

use candle_core::{Result, Tensor, D};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClassificationScore {
    pub accuracy: f64,
    pub micro_f1: f64,
    pub macro_f1: f64,
}

impl std::fmt::Display for ClassificationScore {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Accuracy:{:.4} Macro-F1:{:.4} Micro-F1:{:.4}",
            self.accuracy, self.macro_f1, self.micro_f1
        )
    }
}

/// Scores `logits` (n, num_classes) against `labels` (n,).
pub fn score(logits: &Tensor, labels: &Tensor) -> Result<ClassificationScore> {
    let pred = logits.argmax(D::Minus1)?.to_vec1::<u32>()?;
    let truth = labels.to_dtype(candle_core::DType::U32)?.to_vec1::<u32>()?;
    Ok(score_labels(&truth, &pred))
}

pub fn score_labels(truth: &[u32], pred: &[u32]) -> ClassificationScore {
    ClassificationScore {
        accuracy: accuracy(truth, pred),
        micro_f1: micro_f1(truth, pred),
        macro_f1: macro_f1(truth, pred),
    }
}

pub fn accuracy(truth: &[u32], pred: &[u32]) -> f64 {
    assert_eq!(truth.len(), pred.len());
    if truth.is_empty() {
        return 0.0;
    }
    let correct = truth.iter().zip(pred).filter(|(t, p)| t == p).count();
    correct as f64 / truth.len() as f64
}

/// Micro-averaged F1. With one label per node every false positive is
/// someone else's false negative, so this collapses to accuracy.
pub fn micro_f1(truth: &[u32], pred: &[u32]) -> f64 {
    let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
    for class in classes(truth, pred) {
        let (t, p, n) = confusion(truth, pred, class);
        tp += t;
        fp += p;
        fn_ += n;
    }
    f1(tp, fp, fn_)
}

/// Unweighted mean of per-class F1 over every class seen in `truth` or `pred`.
pub fn macro_f1(truth: &[u32], pred: &[u32]) -> f64 {
    let classes = classes(truth, pred);
    if classes.is_empty() {
        return 0.0;
    }
    let total: f64 = classes
        .iter()
        .map(|&class| {
            let (tp, fp, fn_) = confusion(truth, pred, class);
            f1(tp, fp, fn_)
        })
        .sum();
    total / classes.len() as f64
}

fn classes(truth: &[u32], pred: &[u32]) -> BTreeSet<u32> {
    truth.iter().chain(pred).copied().collect()
}

fn confusion(truth: &[u32], pred: &[u32], class: u32) -> (usize, usize, usize) {
    let (mut tp, mut fp, mut fn_) = (0, 0, 0);
    for (&t, &p) in truth.iter().zip(pred) {
        match (t == class, p == class) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
    }
    (tp, fp, fn_)
}

fn f1(tp: usize, fp: usize, fn_: usize) -> f64 {
    let denom = 2 * tp + fp + fn_;
    if denom == 0 {
        0.0
    } else {
        2.0 * tp as f64 / denom as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn perfect_prediction() {
        let s = score_labels(&[0, 1, 2, 1], &[0, 1, 2, 1]);
        assert_eq!(s.accuracy, 1.0);
        assert_eq!(s.micro_f1, 1.0);
        assert_eq!(s.macro_f1, 1.0);
    }

    #[test]
    fn macro_differs_from_micro_on_imbalance() {
        // class 0: tp=3 fp=1 fn=0 -> f1 = 6/7
        // class 1: tp=0 fp=0 fn=1 -> f1 = 0
        let truth = [0, 0, 0, 1];
        let pred = [0, 0, 0, 0];
        let s = score_labels(&truth, &pred);
        assert!((s.accuracy - 0.75).abs() < 1e-12);
        assert!((s.micro_f1 - 0.75).abs() < 1e-12);
        assert!((s.macro_f1 - 3.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn predicted_only_class_counts_for_macro() {
        // class 2 never appears in truth but is predicted once
        let truth = [0, 1];
        let pred = [0, 2];
        let s = score_labels(&truth, &pred);
        assert!((s.macro_f1 - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn empty_inputs() {
        let s = score_labels(&[], &[]);
        assert_eq!(s, ClassificationScore::default());
    }

    #[test]
    fn score_from_logits() -> Result<()> {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[2f32, 0.0], [0.0, 1.0], [3.0, 1.0]], &device)?;
        let labels = Tensor::new(&[0u32, 1, 1], &device)?;
        let s = score(&logits, &labels)?;
        assert!((s.accuracy - 2.0 / 3.0).abs() < 1e-12);
        Ok(())
    }
}
