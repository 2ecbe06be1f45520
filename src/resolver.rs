//! Batched resolution of descriptor, institution and code references.
//!
//! Resolution runs in three phases over one conversion batch:
//!
//! 1. every document registers the references it carries with
//!    [`ResolverCache::collect`]; nothing is looked up yet
//! 2. [`ResolverCache::resolve`] issues one bulk query per category that has
//!    pending keys and returns a read-only [`ResolvedCache`]
//! 3. documents read their values from the [`ResolvedCache`] synchronously
//!
//! The phases are separate types, so a lookup can never see a partially
//! resolved cache. A key the backing store does not know resolves to `None`.
//!
//! # Examples
//!
//! ```
//! use frbrizer::resolver::{
//!     CodeValue, InMemoryCodeTables, InMemoryDocumentSearch, ResolverCache, ResolverCategory,
//! };
//!
//! let mut codes = InMemoryCodeTables::new();
//! codes.insert(ResolverCategory::Language, "pol", CodeValue::named("polski"));
//! let search = InMemoryDocumentSearch::new();
//!
//! let mut cache = ResolverCache::new();
//! cache.collect(ResolverCategory::Language, "pol");
//! cache.collect(ResolverCategory::Language, "xxx");
//! let resolved = cache.resolve(&search, &codes).unwrap();
//!
//! assert_eq!(resolved.code_name(ResolverCategory::Language, "pol"), Some("polski"));
//! assert_eq!(resolved.code_name(ResolverCategory::Language, "xxx"), None);
//! assert_eq!(resolved.stats().queries, 1);
//! ```

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Kind of foreign reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverCategory {
    /// Subject/genre descriptor (search index)
    Descriptor,
    /// Holding institution profile (search index)
    Institution,
    /// Language code
    Language,
    /// Contribution (role) code
    Contribution,
    /// Bibliography code
    Bibliography,
    /// Carrier type code
    CarrierType,
    /// Content type code
    ContentType,
    /// Country code
    Country,
    /// Media type code
    MediaType,
    /// Publishing statistics code
    PublishingStatistics,
}

/// Which store answers a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Document search index, multi-query
    SearchIndex,
    /// Key-value code table, multi-get
    CodeTable,
}

impl ResolverCategory {
    /// Backing store of this category.
    #[must_use]
    pub fn backend(self) -> Backend {
        match self {
            ResolverCategory::Descriptor | ResolverCategory::Institution => Backend::SearchIndex,
            _ => Backend::CodeTable,
        }
    }

    /// Code table (or search index) name.
    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            ResolverCategory::Descriptor => "descriptor",
            ResolverCategory::Institution => "library",
            ResolverCategory::Language => "language_code",
            ResolverCategory::Contribution => "contribution_code",
            ResolverCategory::Bibliography => "bibliography_code",
            ResolverCategory::CarrierType => "carrier_type_code",
            ResolverCategory::ContentType => "content_type_code",
            ResolverCategory::Country => "country_code",
            ResolverCategory::MediaType => "media_type_code",
            ResolverCategory::PublishingStatistics => "publishing_statistics_code",
        }
    }
}

/// Resolved descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Descriptor id
    pub id: String,
    /// Descriptor type (subject, genre, ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Display value
    pub value: String,
}

/// Resolved institution profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Institution {
    /// Institution id
    pub id: String,
    /// Display name
    pub name: String,
    /// Digital library
    pub digital: bool,
    /// Geographic location ("lat,lon")
    pub localization: Option<String>,
    /// Country
    pub country: Option<String>,
    /// Province
    pub province: Option<String>,
    /// City
    pub city: Option<String>,
}

/// Resolved code table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeValue {
    /// Display name
    pub name: String,
    /// Numeric id, for tables that have one
    pub id: Option<i64>,
}

impl CodeValue {
    /// Entry with only a display name.
    #[must_use]
    pub fn named(name: &str) -> Self {
        CodeValue {
            name: name.to_string(),
            id: None,
        }
    }
}

/// Any resolved value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// From the descriptor index
    Descriptor(Descriptor),
    /// From the institution index
    Institution(Institution),
    /// From a code table
    Code(CodeValue),
}

/// Search index client: one multi-query per call.
pub trait DocumentSearch {
    /// Descriptors by key; unknown keys are absent from the result.
    fn find_descriptors(&self, keys: &[String]) -> Result<HashMap<String, Descriptor>>;

    /// Institutions by code; unknown codes are absent from the result.
    fn find_institutions(&self, codes: &[String]) -> Result<HashMap<String, Institution>>;
}

/// Code table client: one multi-get per call.
pub trait CodeTableStore {
    /// Values for `codes`, positionally; unknown codes are `None`.
    fn multi_get(&self, table: &str, codes: &[String]) -> Result<Vec<Option<CodeValue>>>;
}

/// In-process [`DocumentSearch`] that counts its queries.
#[derive(Debug, Default)]
pub struct InMemoryDocumentSearch {
    descriptors: HashMap<String, Descriptor>,
    institutions: HashMap<String, Institution>,
    queries: AtomicUsize,
}

impl InMemoryDocumentSearch {
    /// Empty index.
    #[must_use]
    pub fn new() -> Self {
        InMemoryDocumentSearch::default()
    }

    /// Add a descriptor under `key`.
    pub fn insert_descriptor(&mut self, key: &str, descriptor: Descriptor) {
        self.descriptors.insert(key.to_string(), descriptor);
    }

    /// Add an institution under `code`.
    pub fn insert_institution(&mut self, code: &str, institution: Institution) {
        self.institutions.insert(code.to_string(), institution);
    }

    /// Multi-queries served so far.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }
}

fn pick<T: Clone>(source: &HashMap<String, T>, keys: &[String]) -> HashMap<String, T> {
    keys.iter()
        .filter_map(|key| source.get(key).map(|value| (key.clone(), value.clone())))
        .collect()
}

impl DocumentSearch for InMemoryDocumentSearch {
    fn find_descriptors(&self, keys: &[String]) -> Result<HashMap<String, Descriptor>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        Ok(pick(&self.descriptors, keys))
    }

    fn find_institutions(&self, codes: &[String]) -> Result<HashMap<String, Institution>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        Ok(pick(&self.institutions, codes))
    }
}

/// In-process [`CodeTableStore`] that counts its queries.
#[derive(Debug, Default)]
pub struct InMemoryCodeTables {
    tables: HashMap<&'static str, HashMap<String, CodeValue>>,
    queries: AtomicUsize,
}

impl InMemoryCodeTables {
    /// Empty tables.
    #[must_use]
    pub fn new() -> Self {
        InMemoryCodeTables::default()
    }

    /// Add a code to the table of `category`.
    pub fn insert(&mut self, category: ResolverCategory, code: &str, value: CodeValue) {
        self.tables
            .entry(category.table())
            .or_default()
            .insert(code.to_string(), value);
    }

    /// Multi-gets served so far.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }
}

impl CodeTableStore for InMemoryCodeTables {
    fn multi_get(&self, table: &str, codes: &[String]) -> Result<Vec<Option<CodeValue>>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let entries = self.tables.get(table);
        Ok(codes
            .iter()
            .map(|code| entries.and_then(|t| t.get(code)).cloned())
            .collect())
    }
}

/// Counters from one resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    /// Bulk queries issued
    pub queries: usize,
    /// Distinct keys resolved or missed
    pub keys: usize,
    /// Keys the stores did not know
    pub misses: usize,
}

/// Phase 1: placeholders collected across a batch.
#[derive(Debug, Clone, Default)]
pub struct ResolverCache {
    pending: BTreeMap<ResolverCategory, BTreeSet<String>>,
}

impl ResolverCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        ResolverCache::default()
    }

    /// Register a reference. Empty keys are ignored; repeated keys are kept once.
    pub fn collect(&mut self, category: ResolverCategory, key: &str) {
        let key = key.trim();
        if key.is_empty() {
            return;
        }
        self.pending
            .entry(category)
            .or_default()
            .insert(key.to_string());
    }

    /// Register several references of one category.
    pub fn collect_all<'a>(&mut self, category: ResolverCategory, keys: impl IntoIterator<Item = &'a str>) {
        for key in keys {
            self.collect(category, key);
        }
    }

    /// Placeholders registered for a category.
    #[must_use]
    pub fn pending(&self, category: ResolverCategory) -> usize {
        self.pending.get(&category).map_or(0, BTreeSet::len)
    }

    /// Phase 2: one bulk query per category with placeholders.
    ///
    /// # Errors
    ///
    /// Store errors from either backend. Unknown keys are not errors.
    pub fn resolve(
        self,
        search: &dyn DocumentSearch,
        codes: &dyn CodeTableStore,
    ) -> Result<ResolvedCache> {
        let mut entries = BTreeMap::new();
        let mut stats = ResolveStats::default();
        for (category, keys) in self.pending {
            let keys: Vec<String> = keys.into_iter().collect();
            let resolved: HashMap<String, Option<Resolved>> = match category {
                ResolverCategory::Descriptor => {
                    let mut found = search.find_descriptors(&keys)?;
                    keys.iter()
                        .map(|key| (key.clone(), found.remove(key).map(Resolved::Descriptor)))
                        .collect()
                },
                ResolverCategory::Institution => {
                    let mut found = search.find_institutions(&keys)?;
                    keys.iter()
                        .map(|key| (key.clone(), found.remove(key).map(Resolved::Institution)))
                        .collect()
                },
                _ => {
                    let found = codes.multi_get(category.table(), &keys)?;
                    keys.iter()
                        .cloned()
                        .zip(
                            found
                                .into_iter()
                                .chain(std::iter::repeat(None))
                                .map(|value| value.map(Resolved::Code)),
                        )
                        .collect()
                },
            };
            let misses = resolved.values().filter(|value| value.is_none()).count();
            debug!(
                category = category.table(),
                keys = keys.len(),
                misses,
                "resolved category"
            );
            stats.queries += 1;
            stats.keys += keys.len();
            stats.misses += misses;
            entries.insert(category, resolved);
        }
        info!(
            queries = stats.queries,
            keys = stats.keys,
            misses = stats.misses,
            "resolver cache filled"
        );
        Ok(ResolvedCache { entries, stats })
    }
}

/// Phase 3: read-only resolved references.
#[derive(Debug, Clone, Default)]
pub struct ResolvedCache {
    entries: BTreeMap<ResolverCategory, HashMap<String, Option<Resolved>>>,
    stats: ResolveStats,
}

impl ResolvedCache {
    fn lookup(&self, category: ResolverCategory, key: &str) -> Option<&Resolved> {
        self.entries
            .get(&category)
            .and_then(|values| values.get(key.trim()))
            .and_then(Option::as_ref)
    }

    /// Descriptor for `key`.
    #[must_use]
    pub fn descriptor(&self, key: &str) -> Option<&Descriptor> {
        match self.lookup(ResolverCategory::Descriptor, key) {
            Some(Resolved::Descriptor(descriptor)) => Some(descriptor),
            _ => None,
        }
    }

    /// Institution for `code`.
    #[must_use]
    pub fn institution(&self, code: &str) -> Option<&Institution> {
        match self.lookup(ResolverCategory::Institution, code) {
            Some(Resolved::Institution(institution)) => Some(institution),
            _ => None,
        }
    }

    /// Code table entry.
    #[must_use]
    pub fn code(&self, category: ResolverCategory, code: &str) -> Option<&CodeValue> {
        match self.lookup(category, code) {
            Some(Resolved::Code(value)) => Some(value),
            _ => None,
        }
    }

    /// Display name of a code table entry.
    #[must_use]
    pub fn code_name(&self, category: ResolverCategory, code: &str) -> Option<&str> {
        self.code(category, code).map(|value| value.name.as_str())
    }

    /// Statistics of the resolution that built this cache.
    #[must_use]
    pub fn stats(&self) -> ResolveStats {
        self.stats
    }
}
