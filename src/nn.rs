mod traits;
pub use traits::*;
pub mod utils;

mod gat;
pub use gat::{GatConv, GatParams};
mod relation;
pub use relation::RelationConv;
mod semantic;
pub use semantic::SemanticAttention;

mod han;
pub use han::{Han, HanLayer};
mod srn;
pub use srn::{Srn, SrnLayer};
mod encoder;
pub use encoder::{build_module, HanSrn, HeteroModuleConfig, LayerSizes, ModuleKind};

mod hgae;
pub use hgae::{Hgae, HgaeParams};

mod mlp;
pub use mlp::{ClassifierKind, LogisticRegression, Mlp};
