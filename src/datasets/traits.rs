use anyhow::Result;

pub trait RandomSplit<Ratio> {
    type Output;
    fn random_split(&self, ratio: Ratio) -> Result<Self::Output>;
}

/// Canonical edge type `(source node type, relation, destination node type)`.
pub type EdgeType = (String, String, String);

pub fn edge_type(src: &str, rel: &str, dst: &str) -> EdgeType {
    (src.to_owned(), rel.to_owned(), dst.to_owned())
}
