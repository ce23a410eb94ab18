use std::collections::HashMap;

use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use super::gat::{GatConv, GatParams};
use super::semantic::SemanticAttention;
use super::traits::{GnnModule, HeteroGnnModule, HeteroViews};
use super::LayerSizes;

/// One GAT per metapath graph, fused by semantic attention.
pub struct HanLayer {
    convs: Vec<GatConv>,
    semantic: SemanticAttention,
}
impl HanLayer {
    pub fn new(
        num_metapaths: usize,
        in_dim: usize,
        out_dim: usize,
        num_heads: usize,
        params: &GatParams,
        vs: VarBuilder,
    ) -> Result<Self> {
        let convs = (0..num_metapaths)
            .map(|i| {
                GatConv::new(
                    in_dim,
                    out_dim,
                    num_heads,
                    params.clone(),
                    vs.pp(format!("gat_{i}")),
                )
            })
            .collect::<Result<_>>()?;
        Ok(Self {
            convs,
            semantic: SemanticAttention::new(out_dim, vs.pp("semantic"))?,
        })
    }

    pub fn forward_t(&self, x: &Tensor, graphs: &[Tensor], train: bool) -> Result<Tensor> {
        if graphs.len() != self.convs.len() {
            candle_core::bail!(
                "HAN layer built for {} metapaths, got {}",
                self.convs.len(),
                graphs.len()
            );
        }
        let views = self
            .convs
            .iter()
            .zip(graphs)
            .map(|(conv, edge_index)| conv.forward_t(x, edge_index, train))
            .collect::<Result<Vec<_>>>()?;
        self.semantic.forward(&views)
    }
}

/// Heterogeneous graph attention network over metapath graphs.
pub struct Han {
    layers: Vec<HanLayer>,
}
impl Han {
    pub fn new(
        num_metapaths: usize,
        sizes: &LayerSizes,
        params: &GatParams,
        vs: VarBuilder,
    ) -> Result<Self> {
        if num_metapaths == 0 {
            candle_core::bail!("HAN needs at least one metapath");
        }
        let mut layers = Vec::new();
        for (i, (in_dim, out_dim, heads)) in sizes.layers().enumerate() {
            let params = sizes.layer_params(i, params);
            layers.push(HanLayer::new(
                num_metapaths,
                in_dim,
                out_dim,
                heads,
                &params,
                vs.pp(format!("layer_{i}")),
            )?);
        }
        Ok(Self { layers })
    }
}
impl HeteroGnnModule for Han {
    fn forward_t(
        &self,
        views: &HeteroViews,
        x: &Tensor,
        _features: &HashMap<String, Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let mut h = x.clone();
        for layer in &self.layers {
            h = layer.forward_t(&h, &views.metapaths, train)?;
        }
        Ok(h)
    }
}
