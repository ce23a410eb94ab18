use candle_core::{Result, Tensor, D};
use candle_nn::{Dropout, Init, VarBuilder};

use super::gat::GatParams;
use super::utils::{edge_softmax_aggregate, xavier_weight};

/// Graph attention across one relation of a bipartite graph: target nodes
/// attend over their neighbours of another type. Target and neighbour
/// features are projected with separate weights into the same space.
///
/// No activation is applied; the caller fuses several relations first.
pub struct RelationConv {
    dst_dim: usize,
    src_dim: usize,
    out_dim: usize,
    num_heads: usize,
    w_dst: Tensor,
    w_src: Tensor,
    att_src: Tensor,
    att_dst: Tensor,
    bias: Tensor,
    feat_drop: Dropout,
    negative_slope: f64,
    attn_drop: f32,
}
impl RelationConv {
    pub fn new(
        dst_dim: usize,
        src_dim: usize,
        out_dim: usize,
        num_heads: usize,
        params: &GatParams,
        vs: VarBuilder,
    ) -> Result<Self> {
        if num_heads == 0 || out_dim % num_heads != 0 {
            candle_core::bail!("out_dim {out_dim} is not divisible by {num_heads} heads");
        }
        let hidden_dim = out_dim / num_heads;
        let init_att = candle_nn::init::DEFAULT_KAIMING_NORMAL;
        Ok(Self {
            dst_dim,
            src_dim,
            out_dim,
            num_heads,
            w_dst: xavier_weight(dst_dim, out_dim, "w_dst", &vs)?,
            w_src: xavier_weight(src_dim, out_dim, "w_src", &vs)?,
            att_src: vs.get_with_hints((1, num_heads, hidden_dim), "att_src", init_att)?,
            att_dst: vs.get_with_hints((1, num_heads, hidden_dim), "att_dst", init_att)?,
            bias: vs.get_with_hints((1, out_dim), "bias", Init::Const(0.0))?,
            feat_drop: Dropout::new(params.feat_drop),
            negative_slope: params.negative_slope,
            attn_drop: params.attn_drop,
        })
    }

    /// `x_dst`: `(num_dst, dst_dim)`, `x_src`: `(num_src, src_dim)`;
    /// `edge_index` row 0 indexes `x_dst`, row 1 indexes `x_src`.
    pub fn forward_t(
        &self,
        x_dst: &Tensor,
        x_src: &Tensor,
        edge_index: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let (num_dst, dst_dim) = x_dst.dims2()?;
        let (num_src, src_dim) = x_src.dims2()?;
        if dst_dim != self.dst_dim || src_dim != self.src_dim {
            candle_core::bail!(
                "RelationConv expects ({}, {}) features, got ({dst_dim}, {src_dim})",
                self.dst_dim,
                self.src_dim
            );
        }
        let hidden_dim = self.out_dim / self.num_heads;

        let h_dst = self
            .feat_drop
            .forward(x_dst, train)?
            .matmul(&self.w_dst)?
            .reshape((num_dst, self.num_heads, hidden_dim))?;
        let h_src = self
            .feat_drop
            .forward(x_src, train)?
            .matmul(&self.w_src)?
            .reshape((num_src, self.num_heads, hidden_dim))?;

        let a_src = h_src.broadcast_mul(&self.att_src)?.sum_keepdim(D::Minus1)?;
        let a_dst = h_dst.broadcast_mul(&self.att_dst)?.sum_keepdim(D::Minus1)?;
        edge_softmax_aggregate(
            &h_src,
            &a_dst,
            &a_src,
            edge_index,
            num_dst,
            self.negative_slope,
            self.attn_drop,
            train,
        )?
        .reshape((num_dst, self.out_dim))?
        .broadcast_add(&self.bias)
    }
}
