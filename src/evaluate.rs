use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};
use candle_core::{DType, Tensor};
use candle_nn::{loss, ModuleT, Optimizer, VarBuilder, VarMap};
use indicatif::{ProgressBar, ProgressStyle};

use crate::datasets::Split;
use crate::metrics::{score, ClassificationScore};
use crate::nn::ClassifierKind;

#[derive(Clone, Debug)]
pub struct EvalParams {
    pub epochs: usize,
    pub lr: f64,
    pub weight_decay: f64,
    pub classifier: ClassifierKind,
    pub progress: bool,
}
impl Default for EvalParams {
    fn default() -> Self {
        Self {
            epochs: 50,
            lr: 0.01,
            weight_decay: 0.0,
            classifier: ClassifierKind::Mlp,
            progress: false,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EvalOutcome {
    pub test: ClassificationScore,
    pub best_val: ClassificationScore,
    /// `None` when validation accuracy never rose above zero; the final
    /// weights are then used for the test split.
    pub best_epoch: Option<usize>,
}

fn snapshot(varmap: &VarMap) -> Result<HashMap<String, Tensor>> {
    let vars = varmap
        .data()
        .lock()
        .map_err(|_| anyhow!("classifier parameters poisoned"))?;
    vars.iter()
        .map(|(name, var)| Ok((name.clone(), var.as_tensor().copy()?)))
        .collect()
}

fn restore(varmap: &VarMap, state: &HashMap<String, Tensor>) -> Result<()> {
    let vars = varmap
        .data()
        .lock()
        .map_err(|_| anyhow!("classifier parameters poisoned"))?;
    for (name, var) in vars.iter() {
        let value = state
            .get(name)
            .ok_or_else(|| anyhow!("snapshot lacks {name}"))?;
        var.set(value)?;
    }
    Ok(())
}

/// Runs `epochs` calls of `step`, copying the parameters in `varmap` whenever
/// `validate` beats the best accuracy so far, and loads the best copy back at
/// the end. Without any improvement the final parameters stay.
fn fit_with_checkpoint(
    varmap: &VarMap,
    epochs: usize,
    mut step: impl FnMut() -> Result<()>,
    mut validate: impl FnMut() -> Result<ClassificationScore>,
    pbar: &ProgressBar,
) -> Result<(ClassificationScore, Option<usize>)> {
    let mut best_val = ClassificationScore::default();
    let mut best_epoch = None;
    let mut best_state = None;
    for epoch in 0..epochs {
        step()?;
        let val = validate()?;
        if val.accuracy > best_val.accuracy {
            best_val = val;
            best_epoch = Some(epoch);
            best_state = Some(snapshot(varmap)?);
        }
        pbar.inc(1);
    }
    if let Some(state) = &best_state {
        restore(varmap, state)?;
    }
    Ok((best_val, best_epoch))
}

/// Trains a fresh probe on the frozen `embeddings` of the training nodes and
/// scores the test nodes with the weights that did best on validation.
pub fn node_classification_evaluate(
    embeddings: &Tensor,
    labels: &Tensor,
    num_classes: usize,
    split: &Split,
    params: &EvalParams,
) -> Result<EvalOutcome> {
    if split.train.dims1()? == 0 {
        bail!("empty training split");
    }
    let embeddings = embeddings.detach();
    let labels = labels.to_dtype(DType::U32)?;
    let (_, dim) = embeddings.dims2()?;
    let device = embeddings.device();

    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let classifier = params.classifier.build(dim, num_classes, vs.pp("classifier"))?;
    let mut optimizer = candle_nn::AdamW::new(
        varmap.all_vars(),
        candle_nn::ParamsAdamW {
            lr: params.lr,
            weight_decay: params.weight_decay,
            ..Default::default()
        },
    )?;

    let select = |index: &Tensor| -> Result<(Tensor, Tensor)> {
        Ok((
            embeddings.index_select(index, 0)?,
            labels.index_select(index, 0)?,
        ))
    };
    let (train_x, train_y) = select(&split.train)?;
    let (val_x, val_y) = select(&split.val)?;
    let (test_x, test_y) = select(&split.test)?;

    let pbar = if params.progress {
        let pbar = ProgressBar::new(params.epochs as u64);
        pbar.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})")?
                .progress_chars("#>-"),
        );
        pbar.set_message("probe");
        pbar
    } else {
        ProgressBar::hidden()
    };

    let (best_val, best_epoch) = fit_with_checkpoint(
        &varmap,
        params.epochs,
        || {
            let logits = classifier.forward_t(&train_x, true)?;
            let loss = loss::cross_entropy(&logits, &train_y)?;
            optimizer.backward_step(&loss)?;
            Ok(())
        },
        || Ok(score(&classifier.forward_t(&val_x, false)?, &val_y)?),
        &pbar,
    )?;
    pbar.finish_and_clear();

    let test = score(&classifier.forward_t(&test_x, false)?, &test_y)?;
    log::debug!("probe: best val {best_val} at {best_epoch:?}, test {test}");
    Ok(EvalOutcome {
        test,
        best_val,
        best_epoch,
    })
}
