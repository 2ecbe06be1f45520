//! FRBR entity model: clusters, expressions, manifestations and items.

pub mod counter;
pub mod items;
pub mod model;

pub use counter::Counter;
pub use items::{FrbrItem, HoldingsRule, ItemConversionTable, ItemUrl};
pub use model::{
    ExpressionData, ExpressionTuple, FrbrCluster, FrbrExpression, FrbrManifestation,
    ManifestationRef, MatchFingerprints, RawRecordContribution,
};
