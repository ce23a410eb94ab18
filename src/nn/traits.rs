use std::collections::HashMap;

use candle_core::{Result, Tensor};

/// Message passing over one homogeneous graph.
///
/// `edge_index` is a `(2, E)` `u32` tensor: row 0 holds the node receiving
/// the message, row 1 the node sending it.
pub trait GnnModule {
    fn forward_t(&self, x: &Tensor, edge_index: &Tensor, train: bool) -> Result<Tensor>;

    fn forward(&self, x: &Tensor, edge_index: &Tensor) -> Result<Tensor> {
        self.forward_t(x, edge_index, false)
    }
}

/// Bipartite edges bringing messages from `neighbor_type` nodes to the
/// target nodes. Same row layout as [`GnnModule`].
#[derive(Clone, Debug)]
pub struct RelationIndex {
    pub name: String,
    pub neighbor_type: String,
    pub edge_index: Tensor,
}

/// Everything a heterogeneous encoder sees of the graph structure.
#[derive(Clone, Debug)]
pub struct HeteroViews {
    /// One metapath-reachable graph over the target nodes per metapath.
    pub metapaths: Vec<Tensor>,
    pub relations: Vec<RelationIndex>,
}

/// Heterogeneous encoder/decoder interface.
///
/// `x` is the (possibly masked) representation of the target nodes;
/// `features` holds the raw features of every node type and is read for
/// neighbour types only.
pub trait HeteroGnnModule {
    fn forward_t(
        &self,
        views: &HeteroViews,
        x: &Tensor,
        features: &HashMap<String, Tensor>,
        train: bool,
    ) -> Result<Tensor>;

    fn forward(
        &self,
        views: &HeteroViews,
        x: &Tensor,
        features: &HashMap<String, Tensor>,
    ) -> Result<Tensor> {
        self.forward_t(views, x, features, false)
    }
}
