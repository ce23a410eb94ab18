use candle_core::{Result, Tensor};
use candle_nn::{ops, Linear, Module, VarBuilder};

use super::utils::{linear, linear_no_bias};

/// Attention across views of the same nodes (HAN semantic-level attention,
/// https://arxiv.org/abs/1903.07293).
///
/// Each view `z_m` is scored by `mean_nodes(q · tanh(W z_m + b))`; the
/// output is the softmax-weighted sum of the views.
pub struct SemanticAttention {
    project: Linear,
    query: Linear,
}
impl SemanticAttention {
    pub const HIDDEN_DIM: usize = 128;

    pub fn new(in_dim: usize, vs: VarBuilder) -> Result<Self> {
        Self::with_hidden(in_dim, Self::HIDDEN_DIM, vs)
    }

    pub fn with_hidden(in_dim: usize, hidden_dim: usize, vs: VarBuilder) -> Result<Self> {
        Ok(Self {
            project: linear(in_dim, hidden_dim, vs.pp("project"))?,
            query: linear_no_bias(hidden_dim, 1, vs.pp("query"))?,
        })
    }

    /// Returns the fused `(num_nodes, dim)` tensor and the `(num_views,)`
    /// view weights.
    pub fn forward_with_weights(&self, views: &[Tensor]) -> Result<(Tensor, Tensor)> {
        if views.is_empty() {
            candle_core::bail!("semantic attention needs at least one view");
        }
        let z = Tensor::stack(views, 1)?; // (n, m, d)
        let scores = self
            .query
            .forward(&self.project.forward(&z)?.tanh()?)?
            .mean(0)?; // (m, 1)
        let beta = ops::softmax(&scores, 0)?;
        let fused = z.broadcast_mul(&beta.unsqueeze(0)?)?.sum(1)?;
        Ok((fused, beta.flatten_all()?))
    }

    pub fn forward(&self, views: &[Tensor]) -> Result<Tensor> {
        self.forward_with_weights(views).map(|(fused, _)| fused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn weights_form_a_distribution() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let attention = SemanticAttention::with_hidden(4, 8, vs)?;
        let views: Vec<Tensor> = (0..3)
            .map(|_| Tensor::randn(0f32, 1.0, (5, 4), &device))
            .collect::<Result<_>>()?;
        let (fused, beta) = attention.forward_with_weights(&views)?;
        assert_eq!(fused.dims(), &[5, 4]);
        let beta = beta.to_vec1::<f32>()?;
        assert_eq!(beta.len(), 3);
        assert!((beta.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn single_view_passes_through() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let attention = SemanticAttention::new(3, vs)?;
        let view = Tensor::randn(0f32, 1.0, (4, 3), &device)?;
        let fused = attention.forward(&[view.clone()])?;
        let diff = (fused - view)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert!(diff < 1e-6);
        Ok(())
    }
}
