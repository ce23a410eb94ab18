use std::{
    fs::File,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use candle_core::Device;
use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::datasets::DatasetKind;
use crate::nn::{ClassifierKind, ModuleKind};

/// Heterogeneous graph masked autoencoder.
#[derive(Clone, Debug, Parser, Serialize, Deserialize)]
#[command(author, version, about)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// CUDA ordinal; falls back to the CPU when CUDA is unavailable.
    #[arg(long, default_value_t = 0)]
    pub devices: usize,

    #[arg(long, default_value = "dblp")]
    pub dataset: String,

    /// Directory holding `<dataset>.npz`.
    #[arg(long, default_value = "data")]
    pub data_root: PathBuf,

    #[arg(long, default_value_t = 200)]
    pub epoches: usize,

    /// Epochs of the downstream classifier.
    #[arg(long, default_value_t = 50)]
    pub eva_epoches: usize,

    #[arg(long, default_value_t = 3)]
    pub num_layer: usize,

    #[arg(long, default_value_t = 8)]
    pub num_heads: usize,

    /// Heads of the decoder.
    #[arg(long, default_value_t = 1)]
    pub num_out_heads: usize,

    #[arg(long, default_value_t = 256)]
    pub num_hidden: usize,

    /// Feature dropout.
    #[arg(long, default_value_t = 0.4)]
    pub dropout: f32,

    /// Attention dropout.
    #[arg(long, default_value_t = 0.1)]
    pub attn_drop: f32,

    #[arg(long, default_value_t = 0.2)]
    pub negative_slope: f64,

    #[arg(long, default_value_t = 0.001)]
    pub lr: f64,

    #[arg(long, default_value_t = 0.5)]
    pub mask_rate: f64,

    #[arg(long, default_value_t = ModuleKind::Han)]
    pub encoder: ModuleKind,

    #[arg(long, default_value_t = ModuleKind::Han)]
    pub decoder: ModuleKind,

    #[arg(long, default_value_t = 1e-4)]
    pub weight_decay: f64,

    /// Exponent of the scaled cosine error.
    #[arg(long, default_value_t = 3.0)]
    pub gamma: f64,

    /// Cosine learning-rate annealing.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub scheduler: bool,

    #[arg(long, default_value_t = 0)]
    pub warmup_epoches: usize,

    /// Override arguments with the dataset's section of `--config`.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub use_config: bool,

    #[arg(long, default_value = "config.yaml")]
    pub config: PathBuf,

    #[arg(long, default_value_t = 0.01)]
    pub eva_lr: f64,

    #[arg(long, default_value_t = 0.0)]
    pub eva_wd: f64,

    #[arg(long, default_value_t = ClassifierKind::Mlp)]
    pub eva_classifier: ClassifierKind,

    /// Evaluate after every `eval_interval` epochs.
    #[arg(long, default_value_t = 20)]
    pub eval_interval: usize,

    /// Label ratios (percent of labelled nodes used for training).
    #[arg(long, value_delimiter = ',', default_values_t = [20, 40, 60])]
    pub label_ratios: Vec<u32>,

    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    #[arg(long, default_value = "log")]
    pub log_dir: PathBuf,

    #[arg(long, default_value = "img")]
    pub img_dir: PathBuf,

    /// Where to fetch the dataset archive from when it is missing.
    #[arg(long)]
    pub download_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_from(["hgae"])
    }
}

impl Config {
    /// Applies the dataset's section of the YAML file at `self.config`, if
    /// `use_config` is set and the file exists.
    pub fn load_overrides(self) -> Result<Self> {
        if !self.use_config {
            return Ok(self);
        }
        if !self.config.exists() {
            log::warn!(
                "{} not found; using command line arguments",
                self.config.display()
            );
            return Ok(self);
        }
        let path = self.config.clone();
        let file = File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
        let document: Value = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        self.with_overrides(&document, &path)
    }

    /// Overlays `document[self.dataset]` on top of `self`.
    pub fn with_overrides(self, document: &Value, origin: &Path) -> Result<Self> {
        let Some(section) = document.get(self.dataset.as_str()) else {
            log::warn!("{} has no section for {}", origin.display(), self.dataset);
            return Ok(self);
        };
        let Value::Mapping(section) = section else {
            bail!("section {} of {} is not a mapping", self.dataset, origin.display());
        };
        let mut merged = serde_yaml::to_value(&self)?;
        let Value::Mapping(fields) = &mut merged else {
            bail!("configuration did not serialize to a mapping");
        };
        for (key, value) in section {
            log::info!(
                "config override {}: {}",
                key.as_str().unwrap_or("?"),
                serde_yaml::to_string(value)?.trim()
            );
            fields.insert(key.clone(), value.clone());
        }
        serde_yaml::from_value(merged)
            .with_context(|| format!("invalid section {} in {}", self.dataset, origin.display()))
    }

    pub fn validate(&self) -> Result<()> {
        self.dataset_kind()?;
        if self.epoches == 0 {
            bail!("epoches must be positive");
        }
        if self.eva_epoches == 0 {
            bail!("eva_epoches must be positive");
        }
        if self.num_layer == 0 {
            bail!("num_layer must be positive");
        }
        if !(self.mask_rate > 0.0 && self.mask_rate < 1.0) {
            bail!("mask_rate must be in (0, 1), got {}", self.mask_rate);
        }
        if self.num_heads == 0 || self.num_hidden % self.num_heads != 0 {
            bail!(
                "num_hidden {} is not divisible by num_heads {}",
                self.num_hidden,
                self.num_heads
            );
        }
        if self.num_out_heads == 0 {
            bail!("num_out_heads must be positive");
        }
        if !(self.lr > 0.0) || !(self.eva_lr > 0.0) {
            bail!("learning rates must be positive");
        }
        if self.eval_interval == 0 {
            bail!("eval_interval must be positive");
        }
        if !(0.0..1.0).contains(&self.dropout) || !(0.0..1.0).contains(&self.attn_drop) {
            bail!("dropout probabilities must be in [0, 1)");
        }
        if self.label_ratios.is_empty() {
            bail!("at least one label ratio is required");
        }
        if let Some(r) = self.label_ratios.iter().find(|&&r| r == 0 || r >= 100) {
            bail!("label ratio {r}% is out of range");
        }
        Ok(())
    }

    pub fn dataset_kind(&self) -> Result<DatasetKind> {
        self.dataset.parse()
    }

    pub fn device(&self) -> Result<Device> {
        Device::cuda_if_available(self.devices)
            .map_err(|e| anyhow!("failed to open device {}: {e}", self.devices))
    }

    /// `<encoder>+<decoder>_<dataset>`, the stem of every run artifact.
    pub fn run_name(&self) -> String {
        format!("{}+{}_{}", self.encoder, self.decoder, self.dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cli_defaults() -> Result<()> {
        let config = Config::default();
        assert_eq!(config.dataset, "dblp");
        assert_eq!(config.epoches, 200);
        assert_eq!(config.num_hidden, 256);
        assert_eq!(config.encoder, ModuleKind::Han);
        assert_eq!(config.label_ratios, vec![20, 40, 60]);
        assert!(config.scheduler && config.use_config);
        config.validate()?;
        assert_eq!(config.run_name(), "HAN+HAN_dblp");
        Ok(())
    }

    #[test]
    fn cli_flags() -> Result<()> {
        let config = Config::try_parse_from([
            "hgae",
            "--dataset",
            "heco_acm",
            "--encoder",
            "han_srn",
            "--decoder",
            "SRN",
            "--scheduler",
            "false",
            "--label-ratios",
            "20,60",
            "--eva-classifier",
            "logreg",
        ])?;
        assert_eq!(config.encoder, ModuleKind::HanSrn);
        assert_eq!(config.decoder, ModuleKind::Srn);
        assert!(!config.scheduler);
        assert_eq!(config.label_ratios, vec![20, 60]);
        assert_eq!(config.eva_classifier, ClassifierKind::Logreg);
        assert_eq!(config.dataset_kind()?, DatasetKind::HecoAcm);
        Ok(())
    }

    #[test]
    fn yaml_section_overrides_arguments() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yaml");
        let mut file = File::create(&path)?;
        writeln!(
            file,
            "acm:\n  lr: 0.0005\n  num_hidden: 512\n  encoder: SRN\n  scheduler: false\n\
             dblp:\n  lr: 0.1\n"
        )?;
        let config = Config {
            dataset: "acm".to_owned(),
            config: path,
            ..Config::default()
        }
        .load_overrides()?;
        assert_eq!(config.lr, 0.0005);
        assert_eq!(config.num_hidden, 512);
        assert_eq!(config.encoder, ModuleKind::Srn);
        assert!(!config.scheduler);
        assert_eq!(config.epoches, 200);
        Ok(())
    }

    #[test]
    fn yaml_rejects_unknown_keys() -> Result<()> {
        let document: Value = serde_yaml::from_str("dblp:\n  learning_rate: 0.1\n")?;
        assert!(Config::default()
            .with_overrides(&document, Path::new("config.yaml"))
            .is_err());
        Ok(())
    }

    #[test]
    fn overrides_skipped_when_disabled_or_missing() -> Result<()> {
        let config = Config {
            config: PathBuf::from("/nonexistent/config.yaml"),
            ..Config::default()
        };
        assert_eq!(config.clone().load_overrides()?.lr, config.lr);
        let document: Value = serde_yaml::from_str("acm:\n  lr: 0.1\n")?;
        let config = config.with_overrides(&document, Path::new("config.yaml"))?;
        assert_eq!(config.lr, 0.001);
        Ok(())
    }

    #[test]
    fn validation() {
        let bad = [
            Config {
                epoches: 0,
                ..Config::default()
            },
            Config {
                mask_rate: 1.0,
                ..Config::default()
            },
            Config {
                num_hidden: 100,
                num_heads: 8,
                ..Config::default()
            },
            Config {
                eval_interval: 0,
                ..Config::default()
            },
            Config {
                dataset: "imdb".to_owned(),
                ..Config::default()
            },
            Config {
                label_ratios: vec![100],
                ..Config::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }
}
