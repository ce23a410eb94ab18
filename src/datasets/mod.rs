mod acm;
mod dblp;
mod heco;

mod hetero_graph;
pub use hetero_graph::*;

pub mod metapath;
pub use metapath::{build_views, metapath_reachable, relation_view, Metapath};

mod schema;
pub use schema::*;

mod traits;
pub use traits::*;

mod utils;
pub use utils::*;
