use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
};

use anyhow::{anyhow, bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use itertools::Itertools;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use regex::Regex;

use super::schema::DatasetSchema;
use super::traits::{EdgeType, RandomSplit};
use super::utils::{download_and_extract, CompressionFormat};
use crate::utils::{index_tensor, mask_to_index};

/// Edge list of one canonical edge type; `src[i] -> dst[i]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EdgeList {
    pub src: Vec<u32>,
    pub dst: Vec<u32>,
}

impl EdgeList {
    pub fn from_pairs(pairs: &[(u32, u32)]) -> Self {
        Self {
            src: pairs.iter().map(|p| p.0).collect(),
            dst: pairs.iter().map(|p| p.1).collect(),
        }
    }

    /// Reads a `(2, E)` integer tensor whose rows are sources and destinations.
    pub fn from_tensor(edge_index: &Tensor) -> Result<Self> {
        let (rows, _) = edge_index.dims2()?;
        if rows != 2 {
            bail!("edge index must have 2 rows, got {:?}", edge_index.shape());
        }
        let edge_index = edge_index.to_dtype(DType::U32)?;
        Ok(Self {
            src: edge_index.get(0)?.to_vec1::<u32>()?,
            dst: edge_index.get(1)?.to_vec1::<u32>()?,
        })
    }

    pub fn len(&self) -> usize {
        self.src.len()
    }

    pub fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    pub fn reversed(&self) -> Self {
        Self {
            src: self.dst.clone(),
            dst: self.src.clone(),
        }
    }

    /// Fails when a source id is not below `num_src` or a destination id is
    /// not below `num_dst`.
    pub fn check_bounds(&self, num_src: usize, num_dst: usize) -> Result<()> {
        if let Some(&s) = self.src.iter().find(|&&s| s as usize >= num_src) {
            bail!("source id {s} out of range ({num_src} nodes)");
        }
        if let Some(&d) = self.dst.iter().find(|&&d| d as usize >= num_dst) {
            bail!("destination id {d} out of range ({num_dst} nodes)");
        }
        Ok(())
    }

    /// `(2, E)` tensor with the receiving node (`dst`) in row 0 and the
    /// sending node (`src`) in row 1.
    pub fn to_pull_index(&self, device: &Device) -> Result<Tensor> {
        let receivers = index_tensor(&self.dst, device)?;
        let senders = index_tensor(&self.src, device)?;
        Ok(Tensor::stack(&[receivers, senders], 0)?)
    }
}

/// Node indices of one label-ratio split.
#[derive(Clone, Debug)]
pub struct Split {
    pub train: Tensor,
    pub val: Tensor,
    pub test: Tensor,
}

#[derive(Clone, Copy, Debug)]
pub struct SplitRatio {
    pub train_percent: u32,
    pub seed: u64,
}

/// A heterogeneous graph with features for every node type and labels on
/// the target type.
///
/// Archive layout (`.npz`):
/// - `<ntype>_x`: node features, optional; missing types get one-hot rows
/// - `<ntype>_num_nodes`: node count, optional
/// - `<src>__<rel>__<dst>`: `(2, E)` edge list
/// - `<target>_y`: labels
/// - `<target>_{train,val,test}_mask_<ratio>`: split masks
#[derive(Clone, Debug)]
pub struct HeteroGraph {
    pub target: String,
    pub num_nodes: HashMap<String, usize>,
    pub features: HashMap<String, Tensor>,
    pub edges: HashMap<EdgeType, EdgeList>,
    pub labels: Tensor,
    pub num_classes: usize,
    pub splits: BTreeMap<u32, Split>,
}

impl HeteroGraph {
    /// Loads `<root>/<name>.npz`, downloading it first when it is missing
    /// and a URL is given.
    pub fn new<P: AsRef<Path>>(
        root: P,
        schema: &DatasetSchema,
        download_url: Option<&str>,
        device: &Device,
    ) -> Result<Self> {
        let file_name = format!("{}.npz", schema.name);
        let path = root.as_ref().join(&file_name);
        if !path.exists() {
            let url = download_url.ok_or_else(|| {
                anyhow!(
                    "{} not found and no download url configured",
                    path.display()
                )
            })?;
            download_and_extract(url, root.as_ref(), &file_name, CompressionFormat::from_url(url))?;
        }
        Self::from_npz(&path, schema, device)
    }

    pub fn from_npz<P: AsRef<Path>>(
        path: P,
        schema: &DatasetSchema,
        device: &Device,
    ) -> Result<Self> {
        let path = path.as_ref();
        let arrays: BTreeMap<String, Tensor> = Tensor::read_npz(path)
            .with_context(|| format!("failed to read {}", path.display()))?
            .into_iter()
            .collect();

        let edge_re = Regex::new(r"^([[:alnum:]]+)__([[:alnum:]]+)__([[:alnum:]]+)$")?;
        let feat_re = Regex::new(r"^([[:alnum:]]+)_x$")?;
        let count_re = Regex::new(r"^([[:alnum:]]+)_num_nodes$")?;
        let mask_re = Regex::new(r"^([[:alnum:]]+)_(train|val|test)_mask_(\d+)$")?;
        let target = schema.target;

        let mut edges = HashMap::new();
        let mut features = HashMap::new();
        let mut counts = HashMap::new();
        let mut masks: BTreeMap<u32, HashMap<String, Tensor>> = BTreeMap::new();
        let mut labels = None;
        for (key, array) in arrays {
            if let Some(c) = edge_re.captures(&key) {
                let ety = (c[1].to_owned(), c[2].to_owned(), c[3].to_owned());
                let list = EdgeList::from_tensor(&array)
                    .with_context(|| format!("bad edge array {key}"))?;
                edges.insert(ety, list);
            } else if let Some(c) = feat_re.captures(&key) {
                array.dims2().with_context(|| format!("{key} must be 2-d"))?;
                let x = array.to_dtype(DType::F32)?.to_device(device)?;
                features.insert(c[1].to_owned(), x);
            } else if let Some(c) = count_re.captures(&key) {
                let n = array.flatten_all()?.to_dtype(DType::U32)?.to_vec1::<u32>()?;
                let n = *n.first().ok_or_else(|| anyhow!("{key} is empty"))?;
                counts.insert(c[1].to_owned(), n as usize);
            } else if let Some(c) = mask_re.captures(&key) {
                if &c[1] != target {
                    continue;
                }
                let ratio: u32 = c[3].parse()?;
                masks
                    .entry(ratio)
                    .or_default()
                    .insert(c[2].to_owned(), array);
            } else if key == format!("{target}_y") {
                labels = Some(array.flatten_all()?.to_dtype(DType::U32)?);
            } else {
                log::debug!("ignoring array {key}");
            }
        }

        let labels = labels.ok_or_else(|| anyhow!("{} has no {target}_y array", path.display()))?;
        let max_label = labels.max(0)?.to_scalar::<u32>()?;

        let mut num_nodes = HashMap::new();
        for &ntype in schema.node_types {
            let n = if let Some(&n) = counts.get(ntype) {
                if let Some(x) = features.get(ntype) {
                    let rows = x.dims2()?.0;
                    if rows != n {
                        bail!("{ntype}_num_nodes is {n} but {ntype}_x has {rows} rows");
                    }
                }
                n
            } else if let Some(x) = features.get(ntype) {
                x.dims2()?.0
            } else if ntype == target {
                labels.dims1()?
            } else {
                edges
                    .iter()
                    .flat_map(|((s, _, d), list)| {
                        let from_src = (s == ntype).then(|| list.src.iter().max()).flatten();
                        let from_dst = (d == ntype).then(|| list.dst.iter().max()).flatten();
                        from_src.into_iter().chain(from_dst)
                    })
                    .max()
                    .map(|&m| m as usize + 1)
                    .ok_or_else(|| anyhow!("cannot infer the number of {ntype} nodes"))?
            };
            num_nodes.insert(ntype.to_owned(), n);
        }
        if num_nodes[target] != labels.dims1()? {
            bail!(
                "{target}: {} nodes but {} labels",
                num_nodes[target],
                labels.dims1()?
            );
        }

        for ((src, rel, dst), list) in &edges {
            if let (Some(&num_src), Some(&num_dst)) = (num_nodes.get(src), num_nodes.get(dst)) {
                list.check_bounds(num_src, num_dst)
                    .with_context(|| format!("edge array {src}__{rel}__{dst}"))?;
            }
        }

        for &ntype in schema.node_types {
            if !features.contains_key(ntype) {
                log::info!("{ntype} has no features; using one-hot identity");
                let eye = Tensor::eye(num_nodes[ntype], DType::F32, device)?;
                features.insert(ntype.to_owned(), eye);
            }
        }

        for ety in schema.required_edge_types() {
            if !edges.contains_key(&ety) {
                bail!(
                    "{}: missing edge type {:?}; available: {}",
                    schema.name,
                    ety,
                    edges.keys().map(|(s, r, d)| format!("{s}__{r}__{d}")).sorted().join(", ")
                );
            }
        }

        let mut splits = BTreeMap::new();
        for (ratio, mut parts) in masks {
            let mut take = |name: &str| -> Result<Tensor> {
                let mask = parts
                    .remove(name)
                    .ok_or_else(|| anyhow!("ratio {ratio}: missing {name} mask"))?;
                Ok(mask_to_index(&mask)?.to_device(device)?)
            };
            let split = Split {
                train: take("train")?,
                val: take("val")?,
                test: take("test")?,
            };
            splits.insert(ratio, split);
        }

        Ok(Self {
            target: target.to_owned(),
            num_nodes,
            features,
            edges,
            labels: labels.to_device(device)?,
            num_classes: max_label as usize + 1,
            splits,
        })
    }

    pub fn num_nodes(&self, ntype: &str) -> Result<usize> {
        self.num_nodes
            .get(ntype)
            .copied()
            .ok_or_else(|| anyhow!("unknown node type {ntype}"))
    }

    pub fn edges(&self, ety: &EdgeType) -> Result<&EdgeList> {
        self.edges
            .get(ety)
            .ok_or_else(|| anyhow!("missing edge type {:?}", ety))
    }

    pub fn target_features(&self) -> Result<&Tensor> {
        self.features
            .get(&self.target)
            .ok_or_else(|| anyhow!("no features for {}", self.target))
    }

    /// Generates random splits for every requested ratio the archive did not
    /// ship masks for.
    pub fn ensure_splits(&mut self, ratios: &[u32], seed: u64) -> Result<()> {
        for &ratio in ratios {
            if !self.splits.contains_key(&ratio) {
                log::warn!("no masks for label ratio {ratio}%; drawing a random split");
                let split = self.random_split(SplitRatio {
                    train_percent: ratio,
                    seed: seed.wrapping_add(ratio as u64),
                })?;
                self.splits.insert(ratio, split);
            }
        }
        Ok(())
    }
}

impl RandomSplit<SplitRatio> for HeteroGraph {
    type Output = Split;

    /// `train_percent` of the target nodes for training, the rest halved
    /// between validation and test.
    fn random_split(&self, ratio: SplitRatio) -> Result<Split> {
        if ratio.train_percent == 0 || ratio.train_percent >= 100 {
            bail!("train percentage must be in 1..100, got {}", ratio.train_percent);
        }
        let n = self.labels.dims1()?;
        let mut order: Vec<u32> = (0..n as u32).collect();
        order.shuffle(&mut StdRng::seed_from_u64(ratio.seed));

        let num_train = (n * ratio.train_percent as usize + 50) / 100;
        let num_val = (n - num_train) / 2;
        let device = self.labels.device();
        let part = |range: &[u32]| -> Result<Tensor> {
            let sorted: Vec<u32> = range.iter().copied().sorted().collect();
            Ok(index_tensor(&sorted, device)?)
        };
        Ok(Split {
            train: part(&order[..num_train])?,
            val: part(&order[num_train..num_train + num_val])?,
            test: part(&order[num_train + num_val..])?,
        })
    }
}
