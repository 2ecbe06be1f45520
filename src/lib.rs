#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

//! # frbrizer: FRBR clustering for MARC catalogs
//!
//! Groups bibliographic records describing the same intellectual work into
//! clusters (FRBR Works), with Expressions per language, translator set and
//! content type, Manifestations per raw record and Items per holding
//! institution. Clusters persist in a match index and are emitted as search
//! documents with batched reference resolution.
//!
//! ## Quick Start
//!
//! ```
//! use frbrizer::{derive_fingerprint, ClusterMatchEngine, InMemoryMatchIndex};
//! use frbrizer::{Field, ItemConversionTable, Leader, Record, Stub};
//!
//! # fn main() -> frbrizer::Result<()> {
//! let mut engine = ClusterMatchEngine::new(InMemoryMatchIndex::new(), ItemConversionTable::default());
//!
//! let mut clusters = Vec::new();
//! for id in ["b1", "b2"] {
//!     let record = Record::builder(Leader::with_type('a', 'm'))
//!         .control_field_str("001", id)
//!         .control_field_str("008", "010101s2001    pl            000 0 pol d")
//!         .field(
//!             Field::builder("100".to_string(), '1', ' ')
//!                 .subfield_str('a', "Gombrowicz, Witold")
//!                 .build(),
//!         )
//!         .field(
//!             Field::builder("245".to_string(), '1', '0')
//!                 .subfield_str('a', "Ferdydurke /")
//!                 .build(),
//!         )
//!         .build();
//!     let outcome = engine.match_and_index(Stub::new(derive_fingerprint(&record)?), &record)?;
//!     clusters.push(outcome.survivor());
//! }
//! assert_eq!(clusters[0], clusters[1]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`record`] — Parsed record shape (`Record`, `Field`, `Subfield`)
//! - [`leader`] — Record leader (24-byte header)
//! - [`normalize`] — Name, title and edition normalization
//! - [`admission`] — Record filters applied before clustering
//! - [`fingerprint`] — Match data and change-detection fingerprints
//! - [`cluster`] — Work, Expression, Manifestation and Item model
//! - [`index`] — Match index trait with in-memory and key-value implementations
//! - [`engine`] — Cluster matching, merging and withdrawal
//! - [`manifestation_matcher`] — Cross-catalog manifestation linkage
//! - [`resolver`] — Batched foreign-reference resolution
//! - [`convert`] — Final search documents and bulk actions
//! - [`frbrizer`](mod@frbrizer) — Batch message processing
//! - [`worker`] — Single-writer worker loop and sharding
//! - [`config`] — TOML configuration
//! - [`logging`] — Tracing subscriber setup
//! - [`error`] — Error types and result type

pub mod admission;
pub mod cluster;
pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod frbrizer;
pub mod index;
pub mod leader;
pub mod logging;
pub mod manifestation_matcher;
pub mod normalize;
/// Parsed record structures (`Record`, `Field`, `Subfield`)
pub mod record;
pub mod resolver;
pub mod worker;

pub use admission::WorkClass;
pub use cluster::items::{FrbrItem, ItemConversionTable};
pub use cluster::{
    Counter, ExpressionTuple, FrbrCluster, FrbrExpression, FrbrManifestation, MatchFingerprints,
};
pub use config::FrbrizerConfig;
pub use convert::{BulkAction, BulkEntry, ConversionRequest, FinalConverter};
pub use engine::{ClusterMatchEngine, MatchOutcome, Stub, Withdrawal};
pub use error::{ErrorKind, FrbrError, Result};
pub use fingerprint::{derive_fingerprint, ClusterMatchData};
pub use frbrizer::{BatchMessage, BatchReport, Frbrizer, JobMetadata, SourceRole};
pub use index::{AnyMatchIndex, InMemoryMatchIndex, KeyValueStore, KvMatchIndex, MatchIndex};
pub use leader::Leader;
pub use manifestation_matcher::{ManifestationIndex, ManifestationMatchData};
pub use record::{Field, FieldBuilder, Record, RecordBuilder, Subfield};
pub use resolver::{ResolvedCache, ResolverCache, ResolverCategory};
pub use worker::{Delivery, ShardRouter, WorkerHandle};
