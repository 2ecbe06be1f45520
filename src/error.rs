//! Error types for FRBRization operations.
//!
//! This module provides the [`FrbrError`] type for all library operations
//! and the [`Result`] convenience type. Errors are grouped by [`ErrorKind`] so
//! the batch processor can decide whether a failure skips one record or aborts
//! the whole message.

use thiserror::Error;
use uuid::Uuid;

/// Error type for all FRBRization operations.
#[derive(Error, Debug)]
pub enum FrbrError {
    /// The record carries more than one main-creator (1XX) field group.
    #[error("Invalid record: more than one 1XX field")]
    TooManyPrimaryCreators,

    /// The record has no canonical title field or more than one.
    #[error("Invalid record: {0}")]
    TitleFieldInvalid(String),

    /// The record leader is malformed.
    #[error("Invalid leader: {0}")]
    InvalidLeader(String),

    /// A control field required for derivation is missing or too short.
    #[error("Invalid record: missing control field {0}")]
    MissingControlField(String),

    /// A cluster expected in the by-UUID store was not found.
    #[error("Index inconsistency: cluster {0} not found")]
    ClusterNotFound(Uuid),

    /// An expression referenced by a cluster lookup is missing.
    #[error("Index inconsistency: expression {expression} not found in cluster {cluster}")]
    ExpressionNotFound {
        /// Owning cluster
        cluster: Uuid,
        /// Missing expression
        expression: Uuid,
    },

    /// A manifestation referenced by a cluster is missing from the store.
    #[error("Index inconsistency: manifestation {0} not found")]
    ManifestationNotFound(Uuid),

    /// A cluster referenced by the raw-record index does not hold the record.
    #[error("Index inconsistency: raw record {raw_record_id} not held by cluster {cluster}")]
    RawRecordNotInCluster {
        /// Raw record id from the source catalog
        raw_record_id: String,
        /// Cluster named by the raw-record index
        cluster: Uuid,
    },

    /// The backing key-value store or search index failed.
    #[error("Store error: {0}")]
    Store(String),

    /// A value could not be encoded for the backing store.
    #[error("Encode error: {0}")]
    Encode(String),

    /// A value read from the backing store could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error from the underlying source/destination.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Coarse classification of a [`FrbrError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Record-level validation failure: skip the record, keep the batch.
    Validation,
    /// Index-consistency failure: abort the record, requeue for inspection.
    Consistency,
    /// Backing store unavailable or corrupt: abort the message, do not ack.
    Store,
    /// Configuration problem.
    Config,
}

impl FrbrError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TooManyPrimaryCreators
            | Self::TitleFieldInvalid(_)
            | Self::InvalidLeader(_)
            | Self::MissingControlField(_) => ErrorKind::Validation,
            Self::ClusterNotFound(_)
            | Self::ExpressionNotFound { .. }
            | Self::ManifestationNotFound(_)
            | Self::RawRecordNotInCluster { .. } => ErrorKind::Consistency,
            Self::Store(_) | Self::Encode(_) | Self::Decode(_) | Self::IoError(_) => {
                ErrorKind::Store
            },
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// True for errors that only invalidate the record being processed.
    #[must_use]
    pub fn is_record_level(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

impl From<rmp_serde::encode::Error> for FrbrError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        FrbrError::Encode(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for FrbrError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        FrbrError::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for FrbrError {
    fn from(err: serde_json::Error) -> Self {
        FrbrError::Encode(err.to_string())
    }
}

/// Convenience type alias for [`std::result::Result`] with [`FrbrError`].
pub type Result<T> = std::result::Result<T, FrbrError>;
