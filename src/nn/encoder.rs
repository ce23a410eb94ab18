use std::collections::HashMap;
use std::str::FromStr;

use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};

use super::gat::GatParams;
use super::han::Han;
use super::semantic::SemanticAttention;
use super::srn::Srn;
use super::traits::{HeteroGnnModule, HeteroViews};

/// Width and head count of every layer of a stacked encoder/decoder.
#[derive(Clone, Debug)]
pub struct LayerSizes {
    pub in_dim: usize,
    pub hidden_dim: usize,
    pub out_dim: usize,
    pub num_layers: usize,
    pub num_heads: usize,
    pub num_out_heads: usize,
    /// Apply the activation after the last layer too.
    pub last_activation: bool,
}
impl LayerSizes {
    /// `(in_dim, out_dim, heads)` per layer.
    pub fn layers(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        (0..self.num_layers).map(move |i| {
            let last = i + 1 == self.num_layers;
            (
                if i == 0 { self.in_dim } else { self.hidden_dim },
                if last { self.out_dim } else { self.hidden_dim },
                if last { self.num_out_heads } else { self.num_heads },
            )
        })
    }

    pub fn layer_params(&self, i: usize, params: &GatParams) -> GatParams {
        let mut params = params.clone();
        if i + 1 == self.num_layers && !self.last_activation {
            params.activation = None;
        }
        params
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleKind {
    /// Metapath attention.
    Han,
    /// Relation attention.
    Srn,
    /// Both, fused by semantic attention.
    HanSrn,
}
impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Han => write!(f, "HAN"),
            Self::Srn => write!(f, "SRN"),
            Self::HanSrn => write!(f, "HAN_SRN"),
        }
    }
}
impl FromStr for ModuleKind {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "HAN" => Ok(Self::Han),
            "SRN" => Ok(Self::Srn),
            "HAN_SRN" => Ok(Self::HanSrn),
            _ => anyhow::bail!("unknown module {s}; expected HAN, SRN or HAN_SRN"),
        }
    }
}

/// Metapath and relation branches side by side.
pub struct HanSrn {
    han: Han,
    srn: Srn,
    fusion: SemanticAttention,
}
impl HeteroGnnModule for HanSrn {
    fn forward_t(
        &self,
        views: &HeteroViews,
        x: &Tensor,
        features: &HashMap<String, Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let h_mp = self.han.forward_t(views, x, features, train)?;
        let h_rel = self.srn.forward_t(views, x, features, train)?;
        self.fusion.forward(&[h_mp, h_rel])
    }
}

/// Everything needed to instantiate a heterogeneous module.
#[derive(Clone, Debug)]
pub struct HeteroModuleConfig {
    pub kind: ModuleKind,
    pub num_metapaths: usize,
    /// Feature width of each relation's neighbour type, in relation order.
    pub neighbor_dims: Vec<usize>,
    pub sizes: LayerSizes,
    pub params: GatParams,
}

pub fn build_module(
    config: &HeteroModuleConfig,
    vs: VarBuilder,
) -> Result<Box<dyn HeteroGnnModule>> {
    let han = || Han::new(config.num_metapaths, &config.sizes, &config.params, vs.pp("han"));
    let srn = || Srn::new(&config.neighbor_dims, &config.sizes, &config.params, vs.pp("srn"));
    let module: Box<dyn HeteroGnnModule> = match config.kind {
        ModuleKind::Han => Box::new(han()?),
        ModuleKind::Srn => Box::new(srn()?),
        ModuleKind::HanSrn => Box::new(HanSrn {
            han: han()?,
            srn: srn()?,
            fusion: SemanticAttention::new(config.sizes.out_dim, vs.pp("fusion"))?,
        }),
    };
    Ok(module)
}
