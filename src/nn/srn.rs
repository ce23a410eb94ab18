use std::collections::HashMap;

use candle_core::{Result, Tensor};
use candle_nn::{Activation, Dropout, Linear, Module, VarBuilder};

use super::gat::GatParams;
use super::relation::RelationConv;
use super::semantic::SemanticAttention;
use super::traits::{HeteroGnnModule, HeteroViews};
use super::utils::linear;
use super::LayerSizes;

/// One layer of relation attention: the target's own projection plus one
/// [`RelationConv`] per relation, fused by semantic attention.
pub struct SrnLayer {
    self_proj: Linear,
    convs: Vec<RelationConv>,
    semantic: SemanticAttention,
    feat_drop: Dropout,
    activation: Option<Activation>,
}
impl SrnLayer {
    pub fn new(
        in_dim: usize,
        neighbor_dims: &[usize],
        out_dim: usize,
        num_heads: usize,
        params: &GatParams,
        vs: VarBuilder,
    ) -> Result<Self> {
        let convs = neighbor_dims
            .iter()
            .enumerate()
            .map(|(i, &src_dim)| {
                RelationConv::new(
                    in_dim,
                    src_dim,
                    out_dim,
                    num_heads,
                    params,
                    vs.pp(format!("relation_{i}")),
                )
            })
            .collect::<Result<_>>()?;
        Ok(Self {
            self_proj: linear(in_dim, out_dim, vs.pp("self"))?,
            convs,
            semantic: SemanticAttention::new(out_dim, vs.pp("semantic"))?,
            feat_drop: Dropout::new(params.feat_drop),
            activation: params.activation.clone(),
        })
    }

    pub fn forward_t(
        &self,
        x: &Tensor,
        views: &HeteroViews,
        features: &HashMap<String, Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        if views.relations.len() != self.convs.len() {
            candle_core::bail!(
                "SRN layer built for {} relations, got {}",
                self.convs.len(),
                views.relations.len()
            );
        }
        let mut outputs = vec![self.self_proj.forward(&self.feat_drop.forward(x, train)?)?];
        for (conv, relation) in self.convs.iter().zip(&views.relations) {
            let x_src = features.get(&relation.neighbor_type).ok_or_else(|| {
                candle_core::Error::Msg(format!(
                    "no features for neighbour type {}",
                    relation.neighbor_type
                ))
            })?;
            outputs.push(conv.forward_t(x, x_src, &relation.edge_index, train)?);
        }
        let h = self.semantic.forward(&outputs)?;
        match &self.activation {
            Some(activation) => activation.forward(&h),
            None => Ok(h),
        }
    }
}

/// Relation attention network: target nodes attend directly over their
/// typed neighbours, one relation at a time. Neighbour features stay raw
/// across layers; only the target representation is refined.
pub struct Srn {
    layers: Vec<SrnLayer>,
}
impl Srn {
    pub fn new(
        neighbor_dims: &[usize],
        sizes: &LayerSizes,
        params: &GatParams,
        vs: VarBuilder,
    ) -> Result<Self> {
        if neighbor_dims.is_empty() {
            candle_core::bail!("SRN needs at least one relation");
        }
        let mut layers = Vec::new();
        for (i, (in_dim, out_dim, heads)) in sizes.layers().enumerate() {
            let params = sizes.layer_params(i, params);
            layers.push(SrnLayer::new(
                in_dim,
                neighbor_dims,
                out_dim,
                heads,
                &params,
                vs.pp(format!("layer_{i}")),
            )?);
        }
        Ok(Self { layers })
    }
}
impl HeteroGnnModule for Srn {
    fn forward_t(
        &self,
        views: &HeteroViews,
        x: &Tensor,
        features: &HashMap<String, Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let mut h = x.clone();
        for layer in &self.layers {
            h = layer.forward_t(&h, views, features, train)?;
        }
        Ok(h)
    }
}
