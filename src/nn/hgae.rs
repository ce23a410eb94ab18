use std::collections::HashMap;

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{Init, Linear, Module, VarBuilder};
use rand::Rng;

use super::encoder::{build_module, HeteroModuleConfig};
use super::traits::{HeteroGnnModule, HeteroViews};
use super::utils::{linear_no_bias, sce_loss};
use crate::utils::{index_tensor, index_to_mask};

#[derive(Clone, Copy, Debug)]
pub struct HgaeParams {
    /// Fraction of target nodes whose features are hidden each step.
    pub mask_rate: f64,
    /// Sharpening exponent of the scaled cosine error.
    pub gamma: f64,
}
impl Default for HgaeParams {
    fn default() -> Self {
        Self {
            mask_rate: 0.5,
            gamma: 3.0,
        }
    }
}

/// Masked feature autoencoder over a heterogeneous graph.
///
/// A random subset of target nodes has its features replaced by a learnable
/// mask token. The encoder embeds the corrupted input, the embedding of the
/// masked nodes is zeroed again, and the decoder reconstructs the original
/// features of the masked nodes from their neighbourhood.
pub struct Hgae {
    encoder: Box<dyn HeteroGnnModule>,
    decoder: Box<dyn HeteroGnnModule>,
    encoder_to_decoder: Linear,
    mask_token: Tensor,
    params: HgaeParams,
}
impl Hgae {
    /// `in_dim` is the target feature width, `hidden_dim` the embedding
    /// width; the decoder maps `hidden_dim` back to `in_dim`.
    pub fn new(
        in_dim: usize,
        hidden_dim: usize,
        encoder: &HeteroModuleConfig,
        decoder: &HeteroModuleConfig,
        params: HgaeParams,
        vs: VarBuilder,
    ) -> Result<Self> {
        if !(params.mask_rate > 0.0 && params.mask_rate < 1.0) {
            candle_core::bail!("mask rate must be in (0, 1), got {}", params.mask_rate);
        }
        if encoder.sizes.in_dim != in_dim || encoder.sizes.out_dim != hidden_dim {
            candle_core::bail!("encoder must map {in_dim} -> {hidden_dim}");
        }
        if decoder.sizes.in_dim != hidden_dim || decoder.sizes.out_dim != in_dim {
            candle_core::bail!("decoder must map {hidden_dim} -> {in_dim}");
        }
        Ok(Self {
            encoder: build_module(encoder, vs.pp("encoder"))?,
            decoder: build_module(decoder, vs.pp("decoder"))?,
            encoder_to_decoder: linear_no_bias(
                hidden_dim,
                hidden_dim,
                vs.pp("encoder_to_decoder"),
            )?,
            mask_token: vs.get_with_hints((1, in_dim), "mask_token", Init::Const(0.0))?,
            params,
        })
    }

    pub fn num_masked(&self, num_nodes: usize) -> usize {
        if num_nodes == 0 {
            return 0;
        }
        ((self.params.mask_rate * num_nodes as f64) as usize).clamp(1, num_nodes)
    }

    /// Distinct target nodes to hide, drawn uniformly.
    pub fn sample_mask<R: Rng>(&self, num_nodes: usize, rng: &mut R) -> Vec<u32> {
        rand::seq::index::sample(rng, num_nodes, self.num_masked(num_nodes))
            .into_iter()
            .map(|i| i as u32)
            .collect()
    }

    /// Reconstruction loss for one training step.
    pub fn loss<R: Rng>(
        &self,
        views: &HeteroViews,
        features: &HashMap<String, Tensor>,
        target: &str,
        rng: &mut R,
    ) -> Result<Tensor> {
        let x = target_features(features, target)?;
        let mask_nodes = self.sample_mask(x.dims2()?.0, rng);
        self.loss_with_mask(views, features, target, &mask_nodes)
    }

    pub fn loss_with_mask(
        &self,
        views: &HeteroViews,
        features: &HashMap<String, Tensor>,
        target: &str,
        mask_nodes: &[u32],
    ) -> Result<Tensor> {
        let x = target_features(features, target)?;
        let num_nodes = x.dims2()?.0;
        let device = x.device();

        let mask = NodeMask::new(mask_nodes, num_nodes, device)?;
        let x_masked = mask.corrupt(x, &self.mask_token)?;

        let h = self.encoder.forward_t(views, &x_masked, features, true)?;
        let h = mask.remask(&self.encoder_to_decoder.forward(&h)?)?;
        let recon = self.decoder.forward_t(views, &h, features, true)?;

        let idx = index_tensor(mask_nodes, device)?;
        sce_loss(
            &recon.index_select(&idx, 0)?,
            &x.index_select(&idx, 0)?,
            self.params.gamma,
        )
    }

    /// Frozen embeddings of all target nodes.
    pub fn embed(
        &self,
        views: &HeteroViews,
        features: &HashMap<String, Tensor>,
        target: &str,
    ) -> Result<Tensor> {
        let x = target_features(features, target)?;
        Ok(self.encoder.forward(views, x, features)?.detach())
    }
}

/// `(n, 1)` indicator columns of the masked nodes and of the rest.
struct NodeMask {
    masked: Tensor,
    keep: Tensor,
}

impl NodeMask {
    fn new(mask_nodes: &[u32], num_nodes: usize, device: &Device) -> Result<Self> {
        let masked = index_to_mask(mask_nodes, num_nodes, device)?
            .to_dtype(DType::F32)?
            .unsqueeze(1)?;
        let keep = masked.affine(-1.0, 1.0)?;
        Ok(Self { masked, keep })
    }

    /// Masked rows of `x` replaced by `token` `(1, d)`.
    fn corrupt(&self, x: &Tensor, token: &Tensor) -> Result<Tensor> {
        x.broadcast_mul(&self.keep)? + self.masked.broadcast_mul(token)?
    }

    /// Masked rows of `h` zeroed.
    fn remask(&self, h: &Tensor) -> Result<Tensor> {
        h.broadcast_mul(&self.keep)
    }
}

fn target_features<'a>(features: &'a HashMap<String, Tensor>, target: &str) -> Result<&'a Tensor> {
    features
        .get(target)
        .ok_or_else(|| candle_core::Error::Msg(format!("no features for target type {target}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{GatParams, LayerSizes, ModuleKind, RelationIndex};
    use candle_core::Device;
    use candle_nn::{Optimizer, VarMap};
    use rand::{rngs::StdRng, SeedableRng};

    fn module(
        kind: ModuleKind,
        in_dim: usize,
        out_dim: usize,
        decoder: bool,
    ) -> HeteroModuleConfig {
        HeteroModuleConfig {
            kind,
            num_metapaths: 1,
            neighbor_dims: vec![3],
            sizes: LayerSizes {
                in_dim,
                hidden_dim: out_dim,
                out_dim,
                num_layers: if decoder { 1 } else { 2 },
                num_heads: 2,
                num_out_heads: if decoder { 1 } else { 2 },
                last_activation: !decoder,
            },
            params: GatParams::default(),
        }
    }

    fn toy() -> Result<(HeteroViews, HashMap<String, Tensor>)> {
        let device = Device::Cpu;
        let views = HeteroViews {
            metapaths: vec![Tensor::new(
                &[[0u32, 0, 1, 1, 2, 2, 3, 3, 4, 5], [0, 1, 1, 0, 2, 3, 3, 2, 5, 4]],
                &device,
            )?],
            relations: vec![RelationIndex {
                name: "ap".to_owned(),
                neighbor_type: "paper".to_owned(),
                edge_index: Tensor::new(&[[0u32, 1, 2, 3, 4, 5], [0, 0, 1, 1, 2, 2]], &device)?,
            }],
        };
        let features = HashMap::from([
            ("author".to_owned(), Tensor::randn(0f32, 1.0, (6, 4), &device)?),
            ("paper".to_owned(), Tensor::randn(0f32, 1.0, (3, 3), &device)?),
        ]);
        Ok((views, features))
    }

    #[test]
    fn corrupt_swaps_masked_rows_for_token() -> Result<()> {
        let device = Device::Cpu;
        let x = Tensor::arange(0f32, 12.0, &device)?.reshape((4, 3))?;
        let token = Tensor::new(&[[9f32, 8.0, 7.0]], &device)?;
        let mask = NodeMask::new(&[1, 3], 4, &device)?;
        let rows = mask.corrupt(&x, &token)?.to_vec2::<f32>()?;
        assert_eq!(rows[0], vec![0.0, 1.0, 2.0]);
        assert_eq!(rows[1], vec![9.0, 8.0, 7.0]);
        assert_eq!(rows[2], vec![6.0, 7.0, 8.0]);
        assert_eq!(rows[3], vec![9.0, 8.0, 7.0]);
        Ok(())
    }

    #[test]
    fn remask_zeroes_masked_rows_only() -> Result<()> {
        let device = Device::Cpu;
        let h = Tensor::arange(1f32, 9.0, &device)?.reshape((4, 2))?;
        let mask = NodeMask::new(&[0, 2], 4, &device)?;
        let rows = mask.remask(&h)?.to_vec2::<f32>()?;
        assert_eq!(
            rows,
            vec![vec![0.0, 0.0], vec![3.0, 4.0], vec![0.0, 0.0], vec![7.0, 8.0]]
        );
        assert!(NodeMask::new(&[4], 4, &device).is_err());
        Ok(())
    }

    #[test]
    fn mask_sampling() -> Result<()> {
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = Hgae::new(
            4,
            8,
            &module(ModuleKind::Han, 4, 8, false),
            &module(ModuleKind::Han, 8, 4, true),
            HgaeParams::default(),
            vs,
        )?;
        let mut rng = StdRng::seed_from_u64(0);
        let mut mask = model.sample_mask(10, &mut rng);
        assert_eq!(mask.len(), 5);
        mask.sort_unstable();
        mask.dedup();
        assert_eq!(mask.len(), 5);
        assert!(mask.iter().all(|&i| i < 10));
        assert_eq!(model.num_masked(1), 1);
        Ok(())
    }

    #[test]
    fn rejects_bad_mask_rate() {
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let params = HgaeParams {
            mask_rate: 1.0,
            gamma: 2.0,
        };
        assert!(Hgae::new(
            4,
            8,
            &module(ModuleKind::Han, 4, 8, false),
            &module(ModuleKind::Han, 8, 4, true),
            params,
            vs,
        )
        .is_err());
    }

    #[test]
    fn training_reduces_reconstruction_loss() -> Result<()> {
        let (views, features) = toy()?;
        for (enc, dec) in [
            (ModuleKind::Han, ModuleKind::Han),
            (ModuleKind::Srn, ModuleKind::Srn),
            (ModuleKind::HanSrn, ModuleKind::Han),
        ] {
            let varmap = VarMap::new();
            let vs = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
            let model = Hgae::new(
                4,
                8,
                &module(enc, 4, 8, false),
                &module(dec, 8, 4, true),
                HgaeParams::default(),
                vs,
            )?;
            let mut optimizer = candle_nn::AdamW::new(
                varmap.all_vars(),
                candle_nn::ParamsAdamW {
                    lr: 0.01,
                    weight_decay: 0.0,
                    ..Default::default()
                },
            )?;
            let mask = [0u32, 2, 4];
            let first = model.loss_with_mask(&views, &features, "author", &mask)?;
            let first_value = first.to_scalar::<f32>()?;
            assert!(first_value.is_finite());
            optimizer.backward_step(&first)?;
            for _ in 0..50 {
                let loss = model.loss_with_mask(&views, &features, "author", &mask)?;
                optimizer.backward_step(&loss)?;
            }
            let last = model
                .loss_with_mask(&views, &features, "author", &mask)?
                .to_scalar::<f32>()?;
            assert!(last < first_value, "{enc}+{dec}: {last} >= {first_value}");

            let emb = model.embed(&views, &features, "author")?;
            assert_eq!(emb.dims(), &[6, 8]);
        }
        Ok(())
    }
}
