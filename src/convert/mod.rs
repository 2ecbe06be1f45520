//! Conversion of touched clusters into search-index bulk actions.
//!
//! A [`ConversionRequest`] names clusters to (re)emit and clusters and
//! expressions to delete. [`FinalConverter::convert`] loads every cluster and
//! its manifestations from the match index, builds the final documents, runs
//! the three resolver phases over the whole batch and emits one versioned
//! index action per document, works first and items last, followed by the
//! delete actions.

pub mod documents;

pub use documents::{
    build_documents, DocumentSet, FinalDocument, FinalExpression, FinalItem, FinalManifestation,
    FinalWork,
};

use crate::error::{FrbrError, Result};
use crate::index::MatchIndex;
use crate::resolver::{CodeTableStore, DocumentSearch, ResolverCache};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Clusters and expressions whose search documents must change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRequest {
    /// Clusters to emit
    pub clusters_to_convert: Vec<Uuid>,
    /// Clusters whose work documents must be deleted
    pub clusters_to_delete: Vec<Uuid>,
    /// Expressions whose documents must be deleted
    pub expressions_to_delete: Vec<Uuid>,
    /// External version for every action in the batch (nanoseconds)
    pub timestamp: i64,
}

impl ConversionRequest {
    /// Nothing to convert or delete.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clusters_to_convert.is_empty()
            && self.clusters_to_delete.is_empty()
            && self.expressions_to_delete.is_empty()
    }
}

/// Metadata of one bulk action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMeta {
    /// Target index
    #[serde(rename = "_index")]
    pub index: String,
    /// Document id
    #[serde(rename = "_id")]
    pub id: Uuid,
    /// External version
    pub version: i64,
    /// Always `"external"`
    pub version_type: String,
}

/// Bulk action line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    /// Create or replace a document
    Index(ActionMeta),
    /// Delete a document
    Delete(ActionMeta),
}

/// One bulk action with its body, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkEntry {
    /// Action line
    pub action: BulkAction,
    /// Document body, only for index actions
    pub body: Option<Value>,
}

impl BulkEntry {
    fn meta(index: &str, id: Uuid, version: i64) -> ActionMeta {
        ActionMeta {
            index: index.to_string(),
            id,
            version,
            version_type: "external".to_string(),
        }
    }

    /// Index action.
    #[must_use]
    pub fn index(index: &str, id: Uuid, version: i64, body: Value) -> Self {
        BulkEntry {
            action: BulkAction::Index(Self::meta(index, id, version)),
            body: Some(body),
        }
    }

    /// Delete action.
    #[must_use]
    pub fn delete(index: &str, id: Uuid, version: i64) -> Self {
        BulkEntry {
            action: BulkAction::Delete(Self::meta(index, id, version)),
            body: None,
        }
    }

    /// Action metadata.
    #[must_use]
    pub fn meta_ref(&self) -> &ActionMeta {
        match &self.action {
            BulkAction::Index(meta) | BulkAction::Delete(meta) => meta,
        }
    }

    /// True for delete actions.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        matches!(self.action, BulkAction::Delete(_))
    }
}

/// Render entries as newline-delimited JSON for a bulk endpoint.
///
/// # Errors
///
/// Returns [`FrbrError::Encode`] if a body cannot be serialized.
pub fn to_ndjson(entries: &[BulkEntry]) -> Result<String> {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&serde_json::to_string(&entry.action)?);
        out.push('\n');
        if let Some(body) = &entry.body {
            out.push_str(&serde_json::to_string(body)?);
            out.push('\n');
        }
    }
    Ok(out)
}

/// Builds bulk actions from the match index.
pub struct FinalConverter<'a, I: MatchIndex> {
    index: &'a I,
    search: &'a dyn DocumentSearch,
    codes: &'a dyn CodeTableStore,
}

impl<I: MatchIndex> std::fmt::Debug for FinalConverter<'_, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalConverter").finish_non_exhaustive()
    }
}

impl<'a, I: MatchIndex> FinalConverter<'a, I> {
    /// Converter reading clusters from `index` and resolving references
    /// through `search` and `codes`.
    pub fn new(index: &'a I, search: &'a dyn DocumentSearch, codes: &'a dyn CodeTableStore) -> Self {
        FinalConverter {
            index,
            search,
            codes,
        }
    }

    /// Load clusters and build their documents. Clusters gone from the index
    /// are skipped.
    ///
    /// # Errors
    ///
    /// Store errors, or [`FrbrError::ManifestationNotFound`] when a cluster
    /// refers to a manifestation the index does not hold.
    pub fn documents(&self, clusters: &[Uuid]) -> Result<DocumentSet> {
        let mut set = DocumentSet::default();
        let unique: BTreeSet<Uuid> = clusters.iter().copied().collect();
        for uuid in unique {
            let Some(cluster) = self.index.get(uuid)? else {
                warn!(cluster = %uuid, "cluster to convert not found, skipping");
                continue;
            };
            let manifestation_ids: Vec<Uuid> = cluster
                .expressions
                .values()
                .flat_map(|expression| expression.manifestations.keys().copied())
                .collect();
            let loaded = self.index.get_manifestations(&manifestation_ids)?;
            let mut manifestations = Vec::with_capacity(loaded.len());
            for (id, manifestation) in manifestation_ids.iter().zip(loaded) {
                match manifestation {
                    Some(manifestation) => manifestations.push(manifestation),
                    None => return Err(FrbrError::ManifestationNotFound(*id)),
                }
            }
            set.extend(build_documents(&cluster, &manifestations));
        }
        Ok(set)
    }

    /// Convert a request into bulk actions.
    ///
    /// # Errors
    ///
    /// See [`FinalConverter::documents`]; resolver store errors are returned
    /// as well. Unknown references are not errors.
    #[instrument(skip(self, request), fields(clusters = request.clusters_to_convert.len()))]
    pub fn convert(&self, request: &ConversionRequest) -> Result<Vec<BulkEntry>> {
        let documents = self.documents(&request.clusters_to_convert)?;

        let mut cache = ResolverCache::new();
        for document in documents.iter() {
            document.collect(&mut cache);
        }
        let resolved = cache.resolve(self.search, self.codes)?;

        let mut entries: Vec<BulkEntry> = documents
            .iter()
            .map(|document| document.to_bulk(&resolved, request.timestamp))
            .collect();
        debug!(documents = entries.len(), "documents rendered");

        entries.extend(
            request
                .clusters_to_delete
                .iter()
                .map(|uuid| BulkEntry::delete("work", *uuid, request.timestamp)),
        );
        entries.extend(
            request
                .expressions_to_delete
                .iter()
                .map(|uuid| BulkEntry::delete("expression", *uuid, request.timestamp)),
        );
        info!(
            works = documents.works.len(),
            expressions = documents.expressions.len(),
            manifestations = documents.manifestations.len(),
            items = documents.items.len(),
            deletes = request.clusters_to_delete.len() + request.expressions_to_delete.len(),
            "conversion finished"
        );
        Ok(entries)
    }
}
