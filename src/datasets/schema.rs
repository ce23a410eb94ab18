use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use itertools::Itertools;

use super::metapath::Metapath;
use super::traits::{edge_type, EdgeType};
use super::{acm, dblp, heco};

/// Static description of a heterogeneous dataset: which node type is
/// classified, which metapaths feed the metapath encoder and which
/// relations feed the relation encoder.
#[derive(Clone, Debug)]
pub struct DatasetSchema {
    pub name: &'static str,
    pub target: &'static str,
    pub node_types: &'static [&'static str],
    pub metapaths: Vec<Metapath>,
    pub relations: Vec<EdgeType>,
}

impl DatasetSchema {
    pub fn new(
        name: &'static str,
        target: &'static str,
        node_types: &'static [&'static str],
        metapaths: Vec<Metapath>,
        relations: &[(&str, &str, &str)],
    ) -> Self {
        Self {
            name,
            target,
            node_types,
            metapaths,
            relations: relations
                .iter()
                .map(|(s, r, d)| edge_type(s, r, d))
                .collect(),
        }
    }

    /// Every edge type some metapath or relation walks over.
    pub fn required_edge_types(&self) -> Vec<EdgeType> {
        self.metapaths
            .iter()
            .flat_map(|mp| mp.edge_types.iter().cloned())
            .chain(self.relations.iter().cloned())
            .unique()
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.node_types.contains(&self.target) {
            bail!("{}: target type {} is not a node type", self.name, self.target);
        }
        for metapath in &self.metapaths {
            metapath.validate(self.target)?;
        }
        for (src, rel, dst) in &self.relations {
            if src != self.target && dst != self.target {
                bail!(
                    "{}: relation ({src}, {rel}, {dst}) does not touch target type {}",
                    self.name,
                    self.target
                );
            }
        }
        for (src, _, dst) in self.required_edge_types() {
            for ty in [&src, &dst] {
                if !self.node_types.contains(&ty.as_str()) {
                    bail!("{}: unknown node type {ty}", self.name);
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DatasetKind {
    Dblp,
    Acm,
    HecoAcm,
    HecoDblp,
    HecoFreebase,
    HecoAminer,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 6] = [
        Self::Dblp,
        Self::Acm,
        Self::HecoAcm,
        Self::HecoDblp,
        Self::HecoFreebase,
        Self::HecoAminer,
    ];

    pub fn schema(&self) -> DatasetSchema {
        match self {
            Self::Dblp => dblp::schema(),
            Self::Acm => acm::schema(),
            Self::HecoAcm => heco::acm_schema(),
            Self::HecoDblp => heco::dblp_schema(),
            Self::HecoFreebase => heco::freebase_schema(),
            Self::HecoAminer => heco::aminer_schema(),
        }
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Dblp => write!(f, "dblp"),
            Self::Acm => write!(f, "acm"),
            Self::HecoAcm => write!(f, "heco_acm"),
            Self::HecoDblp => write!(f, "heco_dblp"),
            Self::HecoFreebase => write!(f, "heco_freebase"),
            Self::HecoAminer => write!(f, "heco_aminer"),
        }
    }
}

impl FromStr for DatasetKind {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.to_string() == s)
            .ok_or_else(|| {
                anyhow!(
                    "unknown dataset {s}; expected one of {}",
                    Self::ALL.iter().join(", ")
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_schemas_are_consistent() -> Result<()> {
        for kind in DatasetKind::ALL {
            let schema = kind.schema();
            assert_eq!(schema.name, kind.to_string());
            schema.validate()?;
            assert!(!schema.metapaths.is_empty());
            assert!(!schema.relations.is_empty());
        }
        Ok(())
    }

    #[test]
    fn parse_dataset_names() -> Result<()> {
        assert_eq!("heco_aminer".parse::<DatasetKind>()?, DatasetKind::HecoAminer);
        assert!("imdb".parse::<DatasetKind>().is_err());
        Ok(())
    }

    #[test]
    fn required_edge_types_are_unique() {
        let schema = DatasetKind::HecoDblp.schema();
        let required = schema.required_edge_types();
        assert_eq!(required.len(), required.iter().unique().count());
        assert!(required.contains(&edge_type("paper", "pa", "author")));
    }
}
