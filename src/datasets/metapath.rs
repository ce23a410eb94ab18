use anyhow::{anyhow, bail, Context, Result};
use candle_core::Device;
use itertools::Itertools;

use super::hetero_graph::{EdgeList, HeteroGraph};
use super::schema::DatasetSchema;
use super::traits::{edge_type, EdgeType};
use crate::nn::{HeteroViews, RelationIndex};

/// A typed walk template such as paper -> author -> paper.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metapath {
    pub name: String,
    pub edge_types: Vec<EdgeType>,
}

impl Metapath {
    pub fn new(name: &str, edge_types: &[(&str, &str, &str)]) -> Self {
        Self {
            name: name.to_owned(),
            edge_types: edge_types
                .iter()
                .map(|(s, r, d)| edge_type(s, r, d))
                .collect(),
        }
    }

    pub fn start_type(&self) -> Option<&str> {
        self.edge_types.first().map(|(src, _, _)| src.as_str())
    }

    pub fn end_type(&self) -> Option<&str> {
        self.edge_types.last().map(|(_, _, dst)| dst.as_str())
    }

    /// Checks that the edge types chain and that the walk starts and ends at
    /// `target`.
    pub fn validate(&self, target: &str) -> Result<()> {
        if self.edge_types.is_empty() {
            bail!("metapath {} is empty", self.name);
        }
        for ((_, r1, d1), (s2, r2, _)) in self.edge_types.iter().tuple_windows() {
            if d1 != s2 {
                bail!(
                    "metapath {}: {r1} ends at {d1} but {r2} starts at {s2}",
                    self.name
                );
            }
        }
        if self.start_type() != Some(target) || self.end_type() != Some(target) {
            bail!(
                "metapath {} must start and end at {target}, got {}..{}",
                self.name,
                self.start_type().unwrap_or_default(),
                self.end_type().unwrap_or_default()
            );
        }
        Ok(())
    }
}

impl std::fmt::Display for Metapath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}[{}]",
            self.name,
            self.edge_types.iter().map(|(_, rel, _)| rel).join("-")
        )
    }
}

/// Compressed adjacency of one edge type, indexed by source node.
struct Csr {
    offsets: Vec<usize>,
    targets: Vec<u32>,
}

impl Csr {
    fn new(edges: &EdgeList, num_src: usize) -> Result<Self> {
        let mut offsets = vec![0usize; num_src + 1];
        for &s in &edges.src {
            let s = s as usize;
            if s >= num_src {
                bail!("edge source {s} out of range ({num_src} nodes)");
            }
            offsets[s + 1] += 1;
        }
        for i in 0..num_src {
            offsets[i + 1] += offsets[i];
        }
        let mut cursor = offsets.clone();
        let mut targets = vec![0u32; edges.len()];
        for (&s, &d) in edges.src.iter().zip(&edges.dst) {
            targets[cursor[s as usize]] = d;
            cursor[s as usize] += 1;
        }
        Ok(Self { offsets, targets })
    }

    fn neighbors(&self, node: u32) -> &[u32] {
        let node = node as usize;
        &self.targets[self.offsets[node]..self.offsets[node + 1]]
    }
}

/// Homogeneous graph over the metapath's end type: `(u, v)` is an edge when
/// `v` can be reached from `u` by walking the metapath. Parallel walks
/// collapse to a single edge. Edges are sorted by `(u, v)`.
pub fn metapath_reachable(graph: &HeteroGraph, metapath: &Metapath) -> Result<EdgeList> {
    let start = metapath
        .start_type()
        .ok_or_else(|| anyhow!("metapath {} is empty", metapath.name))?;

    let mut steps = Vec::with_capacity(metapath.edge_types.len());
    for ety in &metapath.edge_types {
        let edges = graph.edges(ety)?;
        let num_src = graph.num_nodes(&ety.0)?;
        let num_dst = graph.num_nodes(&ety.2)?;
        edges
            .check_bounds(num_src, num_dst)
            .with_context(|| format!("metapath {} at {:?}", metapath.name, ety))?;
        steps.push((Csr::new(edges, num_src)?, num_dst));
    }

    // marks[k][v] == u + 1 once v was reached from u at step k
    let mut marks: Vec<Vec<u32>> = steps.iter().map(|(_, n)| vec![0u32; *n]).collect();
    let mut result = EdgeList::default();
    let mut frontier = Vec::new();
    let mut next = Vec::new();
    for u in 0..graph.num_nodes(start)? as u32 {
        frontier.clear();
        frontier.push(u);
        for (k, (csr, _)) in steps.iter().enumerate() {
            next.clear();
            for &v in &frontier {
                for &w in csr.neighbors(v) {
                    let mark = &mut marks[k][w as usize];
                    if *mark != u + 1 {
                        *mark = u + 1;
                        next.push(w);
                    }
                }
            }
            std::mem::swap(&mut frontier, &mut next);
        }
        frontier.sort_unstable();
        for &v in &frontier {
            result.src.push(u);
            result.dst.push(v);
        }
    }
    Ok(result)
}

/// Edges of `relation` oriented so that messages flow from the non-target
/// end into the `target` nodes. Returns the neighbour type with the edges
/// (`src` = neighbour, `dst` = target).
pub fn relation_view(
    graph: &HeteroGraph,
    relation: &EdgeType,
    target: &str,
) -> Result<(String, EdgeList)> {
    let (src, rel, dst) = relation;
    let edges = graph.edges(relation)?;
    edges
        .check_bounds(graph.num_nodes(src)?, graph.num_nodes(dst)?)
        .with_context(|| format!("relation ({src}, {rel}, {dst})"))?;
    if dst == target {
        Ok((src.clone(), edges.clone()))
    } else if src == target {
        Ok((dst.clone(), edges.reversed()))
    } else {
        bail!("relation ({src}, {rel}, {dst}) does not touch {target}")
    }
}

/// Materialises the metapath graphs and relation views a schema asks for.
pub fn build_views(
    graph: &HeteroGraph,
    schema: &DatasetSchema,
    device: &Device,
) -> Result<HeteroViews> {
    let mut metapaths = Vec::with_capacity(schema.metapaths.len());
    for metapath in &schema.metapaths {
        metapath.validate(schema.target)?;
        let edges = metapath_reachable(graph, metapath)?;
        log::info!("metapath {metapath}: {} edges", edges.len());
        metapaths.push(edges.to_pull_index(device)?);
    }
    let mut relations = Vec::with_capacity(schema.relations.len());
    for relation in &schema.relations {
        let (neighbor_type, edges) = relation_view(graph, relation, schema.target)?;
        log::info!(
            "relation {} ({neighbor_type} -> {}): {} edges",
            relation.1,
            schema.target,
            edges.len()
        );
        relations.push(RelationIndex {
            name: relation.1.clone(),
            neighbor_type,
            edge_index: edges.to_pull_index(device)?,
        });
    }
    Ok(HeteroViews {
        metapaths,
        relations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::hetero_graph::tests::toy_graph;

    #[test]
    fn rejects_broken_chain() {
        let mp = Metapath::new(
            "bad",
            &[("author", "ap", "paper"), ("term", "tp", "paper")],
        );
        assert!(mp.validate("author").is_err());
    }

    #[test]
    fn rejects_wrong_endpoints() {
        let mp = Metapath::new("AP", &[("author", "ap", "paper")]);
        assert!(mp.validate("author").is_err());
        let mp = Metapath::new(
            "APA",
            &[("author", "ap", "paper"), ("paper", "pa", "author")],
        );
        assert!(mp.validate("author").is_ok());
        assert_eq!(mp.to_string(), "APA[ap-pa]");
    }

    #[test]
    fn reachable_graph_collapses_parallel_walks() -> Result<()> {
        // author 0 wrote papers 0,1; author 1 wrote papers 1,2; author 2 wrote paper 3
        let graph = toy_graph(&Device::Cpu)?;
        let apa = Metapath::new(
            "APA",
            &[("author", "ap", "paper"), ("paper", "pa", "author")],
        );
        let edges = metapath_reachable(&graph, &apa)?;
        let pairs: Vec<(u32, u32)> = edges.src.iter().copied().zip(edges.dst.clone()).collect();
        assert_eq!(pairs, vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 2)]);
        Ok(())
    }

    #[test]
    fn longer_metapath_through_conferences() -> Result<()> {
        // papers 0,1 at conference 0; papers 2,3 at conference 1
        let graph = toy_graph(&Device::Cpu)?;
        let apcpa = Metapath::new(
            "APCPA",
            &[
                ("author", "ap", "paper"),
                ("paper", "pc", "conference"),
                ("conference", "cp", "paper"),
                ("paper", "pa", "author"),
            ],
        );
        let edges = metapath_reachable(&graph, &apcpa)?;
        let pairs: Vec<(u32, u32)> = edges.src.iter().copied().zip(edges.dst.clone()).collect();
        assert_eq!(
            pairs,
            vec![
                (0, 0),
                (0, 1),
                (1, 0),
                (1, 1),
                (1, 2),
                (2, 1),
                (2, 2)
            ]
        );
        Ok(())
    }

    #[test]
    fn relation_view_orients_towards_target() -> Result<()> {
        let graph = toy_graph(&Device::Cpu)?;
        let pa = edge_type("paper", "pa", "author");
        let (neighbor, edges) = relation_view(&graph, &pa, "author")?;
        assert_eq!(neighbor, "paper");
        assert_eq!(edges.dst, graph.edges(&edge_type("paper", "pa", "author"))?.dst);

        let ap = edge_type("author", "ap", "paper");
        let (neighbor, edges) = relation_view(&graph, &ap, "author")?;
        assert_eq!(neighbor, "paper");
        // reversed: destinations are now the authors
        assert_eq!(edges.dst, graph.edges(&edge_type("author", "ap", "paper"))?.src);

        assert!(relation_view(&graph, &edge_type("paper", "pc", "conference"), "author").is_err());
        Ok(())
    }

    #[test]
    fn out_of_range_ids_are_rejected() -> Result<()> {
        let mut graph = toy_graph(&Device::Cpu)?;
        let ap = edge_type("author", "ap", "paper");
        // paper 4 does not exist
        graph.edges.insert(ap.clone(), EdgeList::from_pairs(&[(0, 0), (2, 4)]));
        let err = relation_view(&graph, &ap, "author").unwrap_err();
        assert!(format!("{err:#}").contains("destination id 4"), "{err:#}");

        let apa = Metapath::new(
            "APA",
            &[("author", "ap", "paper"), ("paper", "pa", "author")],
        );
        assert!(metapath_reachable(&graph, &apa).is_err());
        Ok(())
    }

    #[test]
    fn views_follow_pull_convention() -> Result<()> {
        let device = Device::Cpu;
        let graph = toy_graph(&device)?;
        let schema = crate::datasets::DatasetKind::Dblp.schema();
        let mut schema = schema;
        schema.metapaths.truncate(1); // APA only; the toy graph has no terms
        let views = build_views(&graph, &schema, &device)?;
        assert_eq!(views.metapaths.len(), 1);
        assert_eq!(views.metapaths[0].dims(), &[2, 5]);
        let rel = &views.relations[0];
        assert_eq!(rel.neighbor_type, "paper");
        // row 0 receives: author ids
        let receivers = rel.edge_index.get(0)?.to_vec1::<u32>()?;
        assert!(receivers.iter().all(|&a| a < 3));
        Ok(())
    }
}
