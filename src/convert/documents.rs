//! Final Work, Expression, Manifestation and Item search documents.
//!
//! Documents are built by joining one cluster with its manifestations. Counts
//! and library sets roll up from items to manifestations, expressions and
//! the work. Reference-valued attributes are resolved only when a document is
//! serialized, from a [`ResolvedCache`].

use crate::cluster::{FrbrCluster, FrbrManifestation};
use crate::convert::BulkEntry;
use crate::resolver::{ResolvedCache, ResolverCache, ResolverCategory};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

/// A document that takes part in batched resolution and bulk emission.
pub trait FinalDocument {
    /// Search index the document goes to.
    fn index_name(&self) -> &'static str;

    /// Document id.
    fn id(&self) -> Uuid;

    /// Phase 1: register every reference the document carries.
    fn collect(&self, cache: &mut ResolverCache);

    /// Phase 3: document body with references resolved.
    fn to_body(&self, resolved: &ResolvedCache) -> Value;

    /// Index action plus body, versioned with `version`.
    fn to_bulk(&self, resolved: &ResolvedCache, version: i64) -> BulkEntry {
        BulkEntry::index(self.index_name(), self.id(), version, self.to_body(resolved))
    }
}

fn library(resolved: &ResolvedCache, code: &str) -> Value {
    match resolved.institution(code) {
        Some(institution) => json!({
            "id": institution.id,
            "name": institution.name,
            "code": code,
            "digital": institution.digital,
            "localization": institution.localization,
            "country": institution.country,
            "province": institution.province,
            "city": institution.city,
        }),
        None => json!({ "code": code }),
    }
}

fn code_names(resolved: &ResolvedCache, category: ResolverCategory, codes: &BTreeSet<String>) -> Vec<String> {
    codes
        .iter()
        .filter_map(|code| resolved.code_name(category, code))
        .map(str::to_string)
        .collect()
}

/// Final Work document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalWork {
    /// Cluster UUID
    pub id: Uuid,
    /// Title keys, most frequent first
    pub titles: Vec<String>,
    /// Main creator keys
    pub main_creators: Vec<String>,
    /// Other creator keys
    pub other_creators: Vec<String>,
    /// Work match fingerprint
    pub match_fingerprint: String,
    /// Expression ids
    pub expression_ids: BTreeSet<Uuid>,
    /// Manifestation ids
    pub manifestation_ids: BTreeSet<Uuid>,
    /// Item ids
    pub item_ids: BTreeSet<Uuid>,
    /// Copies across all items
    pub item_count: u32,
    /// Institution codes holding copies
    pub libraries: BTreeSet<String>,
    /// Expression language codes
    pub languages: BTreeSet<String>,
}

impl FinalDocument for FinalWork {
    fn index_name(&self) -> &'static str {
        "work"
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn collect(&self, cache: &mut ResolverCache) {
        cache.collect_all(ResolverCategory::Language, self.languages.iter().map(String::as_str));
        cache.collect_all(ResolverCategory::Institution, self.libraries.iter().map(String::as_str));
    }

    fn to_body(&self, resolved: &ResolvedCache) -> Value {
        json!({
            "id": self.id,
            "titles": self.titles,
            "main_creators": self.main_creators,
            "other_creators": self.other_creators,
            "match_fingerprint": self.match_fingerprint,
            "expression_ids": self.expression_ids,
            "manifestation_ids": self.manifestation_ids,
            "item_ids": self.item_ids,
            "item_count": self.item_count,
            "libraries": self.libraries.iter().map(|code| library(resolved, code)).collect::<Vec<_>>(),
            "languages": code_names(resolved, ResolverCategory::Language, &self.languages),
        })
    }
}

/// Final Expression document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalExpression {
    /// Expression UUID
    pub id: Uuid,
    /// Owning cluster
    pub work_id: Uuid,
    /// Language code
    pub language: String,
    /// Translator keys
    pub translators: Vec<String>,
    /// Leader/06
    pub leader_type: char,
    /// Forms of work from all manifestations
    pub forms: BTreeSet<String>,
    /// Titles from all manifestations
    pub titles: BTreeSet<String>,
    /// Manifestation ids
    pub manifestation_ids: BTreeSet<Uuid>,
    /// Item ids
    pub item_ids: BTreeSet<Uuid>,
    /// Copies across all items
    pub item_count: u32,
    /// Institution codes holding copies
    pub libraries: BTreeSet<String>,
}

impl FinalDocument for FinalExpression {
    fn index_name(&self) -> &'static str {
        "expression"
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn collect(&self, cache: &mut ResolverCache) {
        cache.collect(ResolverCategory::Language, &self.language);
        cache.collect_all(ResolverCategory::Institution, self.libraries.iter().map(String::as_str));
    }

    fn to_body(&self, resolved: &ResolvedCache) -> Value {
        json!({
            "id": self.id,
            "work_ids": [self.work_id],
            "language": resolved.code_name(ResolverCategory::Language, &self.language),
            "language_code": self.language,
            "translators": self.translators,
            "leader_type": self.leader_type.to_string(),
            "forms": self.forms,
            "titles": self.titles,
            "manifestation_ids": self.manifestation_ids,
            "item_ids": self.item_ids,
            "item_count": self.item_count,
            "libraries": self.libraries.iter().map(|code| library(resolved, code)).collect::<Vec<_>>(),
        })
    }
}

/// Final Manifestation document.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalManifestation {
    /// Owning cluster
    pub work_id: Uuid,
    /// Owning expression
    pub expression_id: Uuid,
    /// Stored manifestation
    pub manifestation: FrbrManifestation,
    /// Item ids
    pub item_ids: BTreeSet<Uuid>,
    /// Copies across all items
    pub item_count: u32,
    /// Institution codes holding copies
    pub libraries: BTreeSet<String>,
}

impl FinalManifestation {
    fn codes(values: &[String]) -> BTreeSet<String> {
        values.iter().cloned().collect()
    }
}

impl FinalDocument for FinalManifestation {
    fn index_name(&self) -> &'static str {
        "manifestation"
    }

    fn id(&self) -> Uuid {
        self.manifestation.uuid
    }

    fn collect(&self, cache: &mut ResolverCache) {
        let m = &self.manifestation;
        if let Some(country) = &m.country {
            cache.collect(ResolverCategory::Country, country);
        }
        cache.collect_all(ResolverCategory::CarrierType, m.carrier_types.iter().map(String::as_str));
        cache.collect_all(ResolverCategory::MediaType, m.media_types.iter().map(String::as_str));
        cache.collect_all(ResolverCategory::ContentType, m.content_types.iter().map(String::as_str));
        cache.collect_all(ResolverCategory::Language, m.languages.iter().map(String::as_str));
        cache.collect_all(ResolverCategory::Descriptor, m.descriptor_ids.iter().map(String::as_str));
        cache.collect_all(ResolverCategory::Institution, self.libraries.iter().map(String::as_str));
    }

    fn to_body(&self, resolved: &ResolvedCache) -> Value {
        let m = &self.manifestation;
        let descriptors: Vec<Value> = m
            .descriptor_ids
            .iter()
            .filter_map(|key| resolved.descriptor(key))
            .map(|d| json!({ "id": d.id, "type": d.kind, "value": d.value }))
            .collect();
        json!({
            "id": m.uuid,
            "work_ids": [self.work_id],
            "expression_ids": [self.expression_id],
            "raw_record_id": m.raw_record_id,
            "title": m.title,
            "responsibility": m.responsibility,
            "publication": m.publication,
            "physical_description": m.physical_description,
            "isbn": m.descriptor.isbns,
            "edition": m.descriptor.editions,
            "country": m.country.as_deref().and_then(|c| resolved.code_name(ResolverCategory::Country, c)),
            "carrier_types": code_names(resolved, ResolverCategory::CarrierType, &Self::codes(&m.carrier_types)),
            "media_types": code_names(resolved, ResolverCategory::MediaType, &Self::codes(&m.media_types)),
            "content_types": code_names(resolved, ResolverCategory::ContentType, &Self::codes(&m.content_types)),
            "languages": code_names(resolved, ResolverCategory::Language, &Self::codes(&m.languages)),
            "descriptors": descriptors,
            "item_ids": self.item_ids,
            "item_count": self.item_count,
            "libraries": self.libraries.iter().map(|code| library(resolved, code)).collect::<Vec<_>>(),
        })
    }
}

/// Final Item document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalItem {
    /// Item UUID
    pub id: Uuid,
    /// Owning cluster
    pub work_id: Uuid,
    /// Owning expression
    pub expression_id: Uuid,
    /// Owning manifestation
    pub manifestation_id: Uuid,
    /// Holding institution
    pub institution_code: String,
    /// Copies
    pub count: u32,
    /// Item URL
    pub url: Option<String>,
}

impl FinalDocument for FinalItem {
    fn index_name(&self) -> &'static str {
        "item"
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn collect(&self, cache: &mut ResolverCache) {
        cache.collect(ResolverCategory::Institution, &self.institution_code);
    }

    fn to_body(&self, resolved: &ResolvedCache) -> Value {
        json!({
            "work_ids": [self.work_id],
            "expression_ids": [self.expression_id],
            "item_mat_id": self.manifestation_id,
            "item_count": self.count,
            "item_url": self.url,
            "library": library(resolved, &self.institution_code),
        })
    }
}

/// All documents of one cluster.
#[derive(Debug, Clone, Default)]
pub struct DocumentSet {
    /// Work documents
    pub works: Vec<FinalWork>,
    /// Expression documents
    pub expressions: Vec<FinalExpression>,
    /// Manifestation documents
    pub manifestations: Vec<FinalManifestation>,
    /// Item documents
    pub items: Vec<FinalItem>,
}

impl DocumentSet {
    /// Append another set.
    pub fn extend(&mut self, other: DocumentSet) {
        self.works.extend(other.works);
        self.expressions.extend(other.expressions);
        self.manifestations.extend(other.manifestations);
        self.items.extend(other.items);
    }

    /// Every document, works first and items last.
    pub fn iter(&self) -> impl Iterator<Item = &dyn FinalDocument> {
        self.works
            .iter()
            .map(|d| d as &dyn FinalDocument)
            .chain(self.expressions.iter().map(|d| d as &dyn FinalDocument))
            .chain(self.manifestations.iter().map(|d| d as &dyn FinalDocument))
            .chain(self.items.iter().map(|d| d as &dyn FinalDocument))
    }

    /// Number of documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.works.len() + self.expressions.len() + self.manifestations.len() + self.items.len()
    }

    /// True when there are no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Join a cluster with its manifestations into final documents.
///
/// Manifestations referenced by an expression but absent from
/// `manifestations` are skipped.
#[must_use]
pub fn build_documents(cluster: &FrbrCluster, manifestations: &[FrbrManifestation]) -> DocumentSet {
    let by_uuid: HashMap<Uuid, &FrbrManifestation> =
        manifestations.iter().map(|m| (m.uuid, m)).collect();
    let mut set = DocumentSet::default();

    let mut titles: Vec<(&String, u32)> = cluster
        .titles
        .iter()
        .map(|(title, counter)| (title, counter.count))
        .collect();
    titles.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let mut work = FinalWork {
        id: cluster.uuid,
        titles: titles.into_iter().map(|(title, _)| title.clone()).collect(),
        main_creators: cluster.main_creator.keys().cloned().collect(),
        other_creators: cluster.other_creator.keys().cloned().collect(),
        match_fingerprint: cluster.work_match_fingerprint.clone(),
        expression_ids: BTreeSet::new(),
        manifestation_ids: BTreeSet::new(),
        item_ids: BTreeSet::new(),
        item_count: 0,
        libraries: BTreeSet::new(),
        languages: BTreeSet::new(),
    };

    for expression in cluster.expressions.values() {
        let mut final_expression = FinalExpression {
            id: expression.uuid,
            work_id: cluster.uuid,
            language: expression.distinctive_tuple.language.clone(),
            translators: expression.distinctive_tuple.translators.iter().cloned().collect(),
            leader_type: expression.distinctive_tuple.leader_type,
            forms: expression
                .expression_data
                .values()
                .flat_map(|data| data.forms.iter().cloned())
                .collect(),
            titles: expression
                .expression_data
                .values()
                .map(|data| data.title.clone())
                .filter(|title| !title.is_empty())
                .collect(),
            manifestation_ids: BTreeSet::new(),
            item_ids: BTreeSet::new(),
            item_count: 0,
            libraries: BTreeSet::new(),
        };

        for manifestation_uuid in expression.manifestations.keys() {
            let Some(manifestation) = by_uuid.get(manifestation_uuid) else {
                continue;
            };
            let mut final_manifestation = FinalManifestation {
                work_id: cluster.uuid,
                expression_id: expression.uuid,
                manifestation: (*manifestation).clone(),
                item_ids: BTreeSet::new(),
                item_count: 0,
                libraries: BTreeSet::new(),
            };
            for item in manifestation.items_by_institution_code.values() {
                final_manifestation.item_ids.insert(item.uuid);
                final_manifestation.item_count += item.count.count;
                final_manifestation
                    .libraries
                    .insert(item.institution_code.clone());
                set.items.push(FinalItem {
                    id: item.uuid,
                    work_id: cluster.uuid,
                    expression_id: expression.uuid,
                    manifestation_id: manifestation.uuid,
                    institution_code: item.institution_code.clone(),
                    count: item.count.count,
                    url: item.url.clone(),
                });
            }
            final_expression
                .manifestation_ids
                .insert(manifestation.uuid);
            final_expression
                .item_ids
                .extend(final_manifestation.item_ids.iter().copied());
            final_expression.item_count += final_manifestation.item_count;
            final_expression
                .libraries
                .extend(final_manifestation.libraries.iter().cloned());
            set.manifestations.push(final_manifestation);
        }

        work.expression_ids.insert(expression.uuid);
        work.manifestation_ids
            .extend(final_expression.manifestation_ids.iter().copied());
        work.item_ids
            .extend(final_expression.item_ids.iter().copied());
        work.item_count += final_expression.item_count;
        work.libraries
            .extend(final_expression.libraries.iter().cloned());
        work.languages.insert(final_expression.language.clone());
        set.expressions.push(final_expression);
    }
    set.works.push(work);
    set
}

/// Group manifestations by UUID for lookups during conversion.
#[must_use]
pub fn index_manifestations(manifestations: Vec<FrbrManifestation>) -> BTreeMap<Uuid, FrbrManifestation> {
    manifestations.into_iter().map(|m| (m.uuid, m)).collect()
}
