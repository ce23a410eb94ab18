use candle_core::{DType, Result, Tensor, D};
use candle_nn::{ops, Init, Linear, VarBuilder};

//
// Linear layer with torch-equivalent initialisation
//
//   torch.nn.Linear is initialised by Uniform(-1/sqrt(fan_in), 1/sqrt(fan_in)).
//   see https://github.com/pytorch/pytorch/issues/57109
//
pub fn linear(in_dim: usize, out_dim: usize, vs: VarBuilder) -> Result<Linear> {
    let bound = 1.0 / (in_dim as f64).sqrt();
    let init_ws = Init::Uniform { lo: -bound, up: bound };
    let init_bs = Init::Uniform { lo: -bound, up: bound };
    let ws = vs.get_with_hints((out_dim, in_dim), "weight", init_ws)?;
    let bs = vs.get_with_hints(out_dim, "bias", init_bs)?;
    Ok(Linear::new(ws, Some(bs)))
}

pub fn linear_no_bias(in_dim: usize, out_dim: usize, vs: VarBuilder) -> Result<Linear> {
    let bound = 1.0 / (in_dim as f64).sqrt();
    let init_ws = Init::Uniform { lo: -bound, up: bound };
    let ws = vs.get_with_hints((out_dim, in_dim), "weight", init_ws)?;
    Ok(Linear::new(ws, None))
}

/// `(in_dim, out_dim)` weight with Xavier-uniform initialisation.
pub fn xavier_weight(in_dim: usize, out_dim: usize, name: &str, vs: &VarBuilder) -> Result<Tensor> {
    let bound = (6.0 / (in_dim + out_dim) as f64).sqrt();
    vs.get_with_hints(
        (in_dim, out_dim),
        name,
        Init::Uniform {
            lo: -bound,
            up: bound,
        },
    )
}

/// Softmax-weighted neighbourhood sum.
///
/// - `h_src`: `(num_src, heads, dim)` sender features
/// - `score_dst`: `(num_dst, heads, 1)` receiver half of the attention logit
/// - `score_src`: `(num_src, heads, 1)` sender half of the attention logit
///
/// The logit of edge `(v <- u)` is `leaky_relu(score_dst[v] + score_src[u])`,
/// normalised over the incoming edges of `v`. Nodes without incoming edges
/// get zeros.
#[allow(clippy::too_many_arguments)]
pub fn edge_softmax_aggregate(
    h_src: &Tensor,
    score_dst: &Tensor,
    score_src: &Tensor,
    edge_index: &Tensor,
    num_dst: usize,
    negative_slope: f64,
    attn_drop: f32,
    train: bool,
) -> Result<Tensor> {
    let (_, num_heads, dim) = h_src.dims3()?;
    let out = Tensor::zeros((num_dst, num_heads, dim), h_src.dtype(), h_src.device())?;
    let (_, num_edges) = edge_index.dims2()?;
    if num_edges == 0 {
        return Ok(out);
    }
    let receivers = edge_index.get(0)?;
    let senders = edge_index.get(1)?;

    let logits = ops::leaky_relu(
        &(score_dst.index_select(&receivers, 0)? + score_src.index_select(&senders, 0)?)?,
        negative_slope,
    )?;
    let shift =
        segment_max(&logits.detach(), &receivers, num_dst)?.index_select(&receivers, 0)?;
    let weights = (logits - shift)?.exp()?;
    let denom = Tensor::zeros((num_dst, num_heads, 1), weights.dtype(), weights.device())?
        .index_add(&receivers, &weights, 0)?;
    let mut alpha = weights.broadcast_div(&(denom.index_select(&receivers, 0)? + 1e-16)?)?;
    if train && attn_drop > 0.0 {
        alpha = ops::dropout(&alpha, attn_drop)?;
    }
    out.index_add(
        &receivers,
        &h_src.index_select(&senders, 0)?.broadcast_mul(&alpha)?,
        0,
    )
}

/// Per-segment, per-head maximum of `values` `(E, heads, 1)`, where row `e`
/// belongs to segment `segments[e]`. Empty segments get 0.
fn segment_max(values: &Tensor, segments: &Tensor, num_segments: usize) -> Result<Tensor> {
    let (_, num_heads, _) = values.dims3()?;
    let (dtype, device) = (values.dtype(), values.device().clone());
    let values = values.to_dtype(DType::F32)?.to_vec3::<f32>()?;
    let segments = segments.to_vec1::<u32>()?;
    let mut max = vec![f32::NEG_INFINITY; num_segments * num_heads];
    for (row, &s) in values.iter().zip(&segments) {
        let Some(slots) = max.get_mut(s as usize * num_heads..(s as usize + 1) * num_heads) else {
            candle_core::bail!("receiver {s} out of range for {num_segments} nodes");
        };
        for (m, v) in slots.iter_mut().zip(row) {
            *m = m.max(v[0]);
        }
    }
    for m in max.iter_mut().filter(|m| m.is_infinite()) {
        *m = 0.0;
    }
    Tensor::from_vec(max, (num_segments, num_heads, 1), &device)?.to_dtype(dtype)
}

/// Rows scaled to unit L2 norm.
pub fn l2_normalize(x: &Tensor) -> Result<Tensor> {
    let norm = (x.sqr()?.sum_keepdim(D::Minus1)? + 1e-12)?.sqrt()?;
    x.broadcast_div(&norm)
}

/// Scaled cosine error: `mean((1 - cos(x, y))^gamma)` over rows.
pub fn sce_loss(x: &Tensor, y: &Tensor, gamma: f64) -> Result<Tensor> {
    let cos = (l2_normalize(x)? * l2_normalize(y)?)?.sum(D::Minus1)?;
    cos.affine(-1.0, 1.0)?.relu()?.powf(gamma)?.mean_all()
}
