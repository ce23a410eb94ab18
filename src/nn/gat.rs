use candle_core::{Result, Tensor, D};
use candle_nn::{Activation, Dropout, Init, Module, VarBuilder};

use super::traits::GnnModule;
use super::utils::{edge_softmax_aggregate, xavier_weight};

#[derive(Clone, Debug)]
pub struct GatParams {
    pub feat_drop: f32,
    pub attn_drop: f32,
    pub negative_slope: f64,
    pub activation: Option<Activation>,
}
impl Default for GatParams {
    fn default() -> Self {
        Self {
            feat_drop: 0.0,
            attn_drop: 0.0,
            negative_slope: 0.2,
            activation: Some(Activation::Elu(1.0)),
        }
    }
}

/// Multi-head graph attention (https://arxiv.org/abs/1710.10903); heads are
/// concatenated, so `out_dim` must be divisible by `num_heads`.
pub struct GatConv {
    in_dim: usize,
    out_dim: usize,
    num_heads: usize,
    weight: Tensor,
    att_src: Tensor,
    att_dst: Tensor,
    bias: Tensor,
    feat_drop: Dropout,
    params: GatParams,
}
impl GatConv {
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        num_heads: usize,
        params: GatParams,
        vs: VarBuilder,
    ) -> Result<Self> {
        if num_heads == 0 || out_dim % num_heads != 0 {
            candle_core::bail!("out_dim {out_dim} is not divisible by {num_heads} heads");
        }
        let hidden_dim = out_dim / num_heads;
        let init_att = candle_nn::init::DEFAULT_KAIMING_NORMAL;
        Ok(Self {
            in_dim,
            out_dim,
            num_heads,
            weight: xavier_weight(in_dim, out_dim, "weight", &vs)?,
            att_src: vs.get_with_hints((1, num_heads, hidden_dim), "att_src", init_att)?,
            att_dst: vs.get_with_hints((1, num_heads, hidden_dim), "att_dst", init_att)?,
            bias: vs.get_with_hints((1, out_dim), "bias", Init::Const(0.0))?,
            feat_drop: Dropout::new(params.feat_drop),
            params,
        })
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }
}
impl GnnModule for GatConv {
    fn forward_t(&self, x: &Tensor, edge_index: &Tensor, train: bool) -> Result<Tensor> {
        let (num_nodes, in_dim) = x.dims2()?;
        if in_dim != self.in_dim {
            candle_core::bail!("GatConv expects {} features, got {in_dim}", self.in_dim);
        }
        let hidden_dim = self.out_dim / self.num_heads;

        let x = self.feat_drop.forward(x, train)?;
        let h = x
            .matmul(&self.weight)?
            .reshape((num_nodes, self.num_heads, hidden_dim))?;

        let a_src = h.broadcast_mul(&self.att_src)?.sum_keepdim(D::Minus1)?;
        let a_dst = h.broadcast_mul(&self.att_dst)?.sum_keepdim(D::Minus1)?;
        let h = edge_softmax_aggregate(
            &h,
            &a_dst,
            &a_src,
            edge_index,
            num_nodes,
            self.params.negative_slope,
            self.params.attn_drop,
            train,
        )?
        .reshape((num_nodes, self.out_dim))?
        .broadcast_add(&self.bias)?;
        match &self.params.activation {
            Some(activation) => activation.forward(&h),
            None => Ok(h),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn output_shape_and_isolated_nodes() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let params = GatParams {
            activation: None,
            ..Default::default()
        };
        let conv = GatConv::new(3, 8, 4, params, vs)?;
        let x = Tensor::randn(0f32, 1.0, (5, 3), &device)?;
        let edge_index = Tensor::new(&[[0u32, 0, 1, 2], [1, 2, 0, 0]], &device)?;
        let h = conv.forward(&x, &edge_index)?;
        assert_eq!(h.dims(), &[5, 8]);
        // nodes 3 and 4 receive nothing: only the (zero) bias remains
        let isolated = h.narrow(0, 3, 2)?.abs()?.sum_all()?.to_scalar::<f32>()?;
        assert_eq!(isolated, 0.0);
        assert_eq!(varmap.all_vars().len(), 4);
        Ok(())
    }

    #[test]
    fn rejects_indivisible_heads() {
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(GatConv::new(3, 10, 4, GatParams::default(), vs).is_err());
    }
}
