use std::str::FromStr;

use candle_core::{Result, Tensor};
use candle_nn::{Activation, Dropout, Linear, Module, ModuleT, VarBuilder};
use serde::{Deserialize, Serialize};

use super::utils::linear;

/// Downstream probe trained on frozen embeddings.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    #[default]
    Mlp,
    Logreg,
}
impl ClassifierKind {
    pub fn build(
        &self,
        in_dim: usize,
        num_classes: usize,
        vs: VarBuilder,
    ) -> Result<Box<dyn ModuleT>> {
        let classifier: Box<dyn ModuleT> = match self {
            Self::Mlp => Box::new(Mlp::new(in_dim, in_dim, num_classes, 0.2, vs)?),
            Self::Logreg => Box::new(LogisticRegression::new(in_dim, num_classes, vs)?),
        };
        Ok(classifier)
    }
}
impl std::fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Mlp => write!(f, "mlp"),
            Self::Logreg => write!(f, "logreg"),
        }
    }
}
impl FromStr for ClassifierKind {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mlp" => Ok(Self::Mlp),
            "logreg" => Ok(Self::Logreg),
            _ => anyhow::bail!("unknown classifier {s}; expected mlp or logreg"),
        }
    }
}

pub struct LogisticRegression {
    fc: Linear,
}
impl LogisticRegression {
    pub fn new(in_dim: usize, num_classes: usize, vs: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc: linear(in_dim, num_classes, vs.pp("fc"))?,
        })
    }
}
impl ModuleT for LogisticRegression {
    fn forward_t(&self, xs: &Tensor, _train: bool) -> Result<Tensor> {
        self.fc.forward(xs)
    }
}

pub struct Mlp {
    fc1: Linear,
    activation_fn: Activation,
    dropout: Dropout,
    fc2: Linear,
}
impl Mlp {
    pub fn new(
        in_dim: usize,
        hidden_dim: usize,
        num_classes: usize,
        dropout_rate: f32,
        vs: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            fc1: linear(in_dim, hidden_dim, vs.pp("fc1"))?,
            activation_fn: Activation::Relu,
            dropout: Dropout::new(dropout_rate),
            fc2: linear(hidden_dim, num_classes, vs.pp("fc2"))?,
        })
    }
}
impl ModuleT for Mlp {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let h = xs.apply(&self.fc1)?.apply(&self.activation_fn)?;
        self.dropout.forward(&h, train)?.apply(&self.fc2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn classifiers_emit_logits_per_class() -> Result<()> {
        let device = Device::Cpu;
        let xs = Tensor::randn(0f32, 1.0, (7, 16), &device)?;
        for kind in [ClassifierKind::Mlp, ClassifierKind::Logreg] {
            let varmap = VarMap::new();
            let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let classifier = kind.build(16, 3, vs)?;
            assert_eq!(classifier.forward_t(&xs, true)?.dims(), &[7, 3]);
        }
        Ok(())
    }

    #[test]
    fn parse_classifier() -> anyhow::Result<()> {
        assert_eq!("LogReg".parse::<ClassifierKind>()?, ClassifierKind::Logreg);
        assert_eq!(ClassifierKind::default().to_string(), "mlp");
        Ok(())
    }
}
