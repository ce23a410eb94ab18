use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Activation, Optimizer, VarBuilder, VarMap};
use chrono::Local;
use rand::{rngs::StdRng, SeedableRng};

use crate::config::Config;
use crate::datasets::{build_views, DatasetSchema, HeteroGraph};
use crate::evaluate::{node_classification_evaluate, EvalParams};
use crate::metrics::ClassificationScore;
use crate::nn::{GatParams, HeteroModuleConfig, HeteroViews, Hgae, HgaeParams, LayerSizes};
use crate::report::{PerformanceHistory, RunLog};
use crate::scheduler::{LrSchedule, Schedule};

/// A loaded graph together with the autoencoder being pretrained on it.
pub struct Experiment {
    config: Config,
    graph: HeteroGraph,
    views: HeteroViews,
    varmap: VarMap,
    model: Hgae,
}

impl Experiment {
    /// Loads the configured dataset and builds the model.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let device = config.device()?;
        let schema = config.dataset_kind()?.schema();
        log::info!("loading {} from {}", schema.name, config.data_root.display());
        let graph = HeteroGraph::new(
            &config.data_root,
            &schema,
            config.download_url.as_deref(),
            &device,
        )?;
        Self::from_graph(config, &schema, graph, &device)
    }

    pub fn from_graph(
        config: Config,
        schema: &DatasetSchema,
        mut graph: HeteroGraph,
        device: &Device,
    ) -> Result<Self> {
        schema.validate()?;
        graph.ensure_splits(&config.label_ratios, config.seed)?;
        let views = build_views(&graph, schema, device)?;

        let in_dim = graph.target_features()?.dims2()?.1;
        let neighbor_dims = views
            .relations
            .iter()
            .map(|relation| {
                let x = graph
                    .features
                    .get(&relation.neighbor_type)
                    .with_context(|| format!("no features for {}", relation.neighbor_type))?;
                Ok(x.dims2()?.1)
            })
            .collect::<Result<Vec<_>>>()?;
        let params = GatParams {
            feat_drop: config.dropout,
            attn_drop: config.attn_drop,
            negative_slope: config.negative_slope,
            activation: Some(Activation::Elu(1.0)),
        };
        let encoder = HeteroModuleConfig {
            kind: config.encoder,
            num_metapaths: views.metapaths.len(),
            neighbor_dims: neighbor_dims.clone(),
            sizes: LayerSizes {
                in_dim,
                hidden_dim: config.num_hidden,
                out_dim: config.num_hidden,
                num_layers: config.num_layer,
                num_heads: config.num_heads,
                num_out_heads: config.num_heads,
                last_activation: true,
            },
            params: params.clone(),
        };
        let decoder = HeteroModuleConfig {
            kind: config.decoder,
            num_metapaths: views.metapaths.len(),
            neighbor_dims,
            sizes: LayerSizes {
                in_dim: config.num_hidden,
                hidden_dim: config.num_hidden,
                out_dim: in_dim,
                num_layers: 1,
                num_heads: config.num_heads,
                num_out_heads: config.num_out_heads,
                last_activation: false,
            },
            params,
        };

        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Hgae::new(
            in_dim,
            config.num_hidden,
            &encoder,
            &decoder,
            HgaeParams {
                mask_rate: config.mask_rate,
                gamma: config.gamma,
            },
            vs,
        )?;
        log::info!(
            "{} with {} parameters over {} target nodes",
            config.run_name(),
            varmap.all_vars().iter().map(|v| v.elem_count()).sum::<usize>(),
            graph.num_nodes(&graph.target)?
        );
        Ok(Self {
            config,
            graph,
            views,
            varmap,
            model,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn graph(&self) -> &HeteroGraph {
        &self.graph
    }

    /// Frozen embeddings of the target nodes.
    pub fn embed(&self) -> Result<Tensor> {
        Ok(self
            .model
            .embed(&self.views, &self.graph.features, &self.graph.target)?)
    }

    /// Scores the current embeddings at every configured label ratio.
    pub fn evaluate(&self) -> Result<Vec<(u32, ClassificationScore)>> {
        let embeddings = self.embed()?;
        let params = EvalParams {
            epochs: self.config.eva_epoches,
            lr: self.config.eva_lr,
            weight_decay: self.config.eva_wd,
            classifier: self.config.eva_classifier,
            progress: log::log_enabled!(log::Level::Info),
        };
        self.config
            .label_ratios
            .iter()
            .map(|&ratio| {
                let split = self
                    .graph
                    .splits
                    .get(&ratio)
                    .with_context(|| format!("no split for label ratio {ratio}%"))?;
                let outcome = node_classification_evaluate(
                    &embeddings,
                    &self.graph.labels,
                    self.graph.num_classes,
                    split,
                    &params,
                )?;
                log::info!("Label Rate:{ratio}% [{} ]", outcome.test);
                Ok((ratio, outcome.test))
            })
            .collect()
    }

    /// Pretrains for the configured number of epochs, evaluating every
    /// `eval_interval` epochs, then writes the plot and the parquet history.
    pub fn run(&self) -> Result<PerformanceHistory> {
        let config = &self.config;
        let mut optimizer = candle_nn::AdamW::new(
            self.varmap.all_vars(),
            candle_nn::ParamsAdamW {
                lr: config.lr,
                weight_decay: config.weight_decay,
                ..Default::default()
            },
        )?;
        let schedule =
            Schedule::from_config(config.scheduler, config.epoches, config.warmup_epoches);
        let mut rng = StdRng::seed_from_u64(config.seed);

        let stamp = Local::now().format("[%Y-%m-%d_%H:%M:%S]");
        let stem = format!("{}_{stamp}", config.run_name());
        let run_log = RunLog::create(&config.log_dir, &stem)?;
        let mut history = PerformanceHistory::new();

        for epoch in 0..config.epoches {
            let lr = schedule.apply(&mut optimizer, config.lr, epoch);
            let loss = self
                .model
                .loss(&self.views, &self.graph.features, &self.graph.target, &mut rng)?;
            optimizer.backward_step(&loss)?;
            log::info!(
                "Epoch:{epoch} Training Loss:{:.6} learning_rate={lr:.6}",
                loss.to_scalar::<f32>()?
            );

            if (epoch + 1) % config.eval_interval == 0 {
                let scores = self.evaluate()?;
                run_log.write_epoch(epoch, &scores)?;
                for (ratio, score) in scores {
                    history.record(epoch + 1, ratio, score);
                }
            }
        }

        if history.is_empty() {
            log::warn!("no evaluation ran; eval_interval exceeds epoches");
            return Ok(history);
        }
        for ratio in history.ratios() {
            if let Some((epoch, best)) = history.best(ratio) {
                log::info!("best at label rate {ratio}%: epoch {epoch} [{best} ]");
            }
        }
        history.write_parquet(config.log_dir.join(format!("{stem}.parquet")))?;
        let image = config.img_dir.join(format!("{stem}.png"));
        if let Err(e) = history.plot(&image) {
            log::warn!("failed to plot {}: {e}", image.display());
        }
        log::info!("evaluation log written to {}", run_log.path().display());
        Ok(history)
    }
}
