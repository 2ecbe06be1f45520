//! FRBR entities as they are stored in the match index.
//!
//! A [`FrbrCluster`] is the work-level group. It owns its expressions inline
//! and refers to manifestations by UUID; manifestations live in their own
//! store namespace because they carry holdings and are rewritten far more
//! often than the cluster around them.

use crate::cluster::counter::Counter;
use crate::cluster::items::FrbrItem;
use crate::fingerprint::{self, ClusterMatchData};
use crate::manifestation_matcher::ManifestationMatchData;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Properties that make two manifestations realizations of the same
/// expression: language, translators and leader/06 type of record.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExpressionTuple {
    /// 008/35-37 language code
    pub language: String,
    /// Normalized translator names, sorted
    pub translators: BTreeSet<String>,
    /// Leader/06
    pub leader_type: char,
}

/// Descriptive expression data contributed by one raw record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpressionData {
    /// 008/35-37 language code
    pub language: String,
    /// 380 $a forms of work
    pub forms: Vec<String>,
    /// Leader/06
    pub leader_type: char,
    /// 245 $ab as catalogued
    pub title: String,
}

/// What one raw record contributed to its cluster.
///
/// Kept so the contribution can be withdrawn when the record is re-delivered
/// with different match data or deleted at the source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecordContribution {
    /// Main creator keys
    pub main_creator: BTreeSet<String>,
    /// Other creator keys
    pub other_creator: BTreeSet<String>,
    /// Title keys
    pub titles: BTreeSet<String>,
    /// Expression the record's manifestation belongs to
    pub expression_tuple: ExpressionTuple,
}

/// Manifestation reference held by a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestationRef {
    /// Manifestation UUID in the manifestation store
    pub uuid: Uuid,
    /// Manifestation match fingerprint
    pub fingerprint: String,
}

/// Current match fingerprints of one raw record, plus where it landed.
///
/// The fingerprints are the raw record's own; they are compared on
/// re-delivery to decide between an in-place refresh and a re-match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFingerprints {
    /// Hash over the record's own creators and titles
    pub work_fingerprint: String,
    /// Owning cluster
    pub cluster: Uuid,
    /// Hash over the record's expression tuple
    pub expression_fingerprint: String,
    /// Owning expression
    pub expression: Uuid,
    /// Hash over the manifestation descriptor
    pub manifestation_fingerprint: String,
    /// The record's manifestation
    pub manifestation: Uuid,
}

/// Expression-level group inside a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrbrExpression {
    /// Stable identity
    pub uuid: Uuid,
    /// Distinctive tuple this expression stands for
    pub distinctive_tuple: ExpressionTuple,
    /// Hash over the distinctive tuple
    pub match_fingerprint: String,
    /// Manifestation UUID -> raw record id
    pub manifestations: BTreeMap<Uuid, String>,
    /// Raw record id -> descriptive data
    pub expression_data: BTreeMap<String, ExpressionData>,
}

impl FrbrExpression {
    /// New expression with a fresh UUID and no manifestations.
    #[must_use]
    pub fn new(distinctive_tuple: ExpressionTuple) -> Self {
        let match_fingerprint = fingerprint::expression_fingerprint(&distinctive_tuple);
        FrbrExpression {
            uuid: Uuid::new_v4(),
            distinctive_tuple,
            match_fingerprint,
            manifestations: BTreeMap::new(),
            expression_data: BTreeMap::new(),
        }
    }

    /// Attach a raw record's manifestation and descriptive data.
    pub fn add_manifestation(&mut self, manifestation: Uuid, raw_record_id: &str, data: ExpressionData) {
        self.manifestations
            .insert(manifestation, raw_record_id.to_string());
        self.expression_data.insert(raw_record_id.to_string(), data);
    }

    /// Move every manifestation of `other` into this expression.
    pub fn absorb(&mut self, other: FrbrExpression) {
        self.manifestations.extend(other.manifestations);
        self.expression_data.extend(other.expression_data);
    }
}

/// Manifestation record, stored by UUID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrbrManifestation {
    /// Stable identity, preserved across in-place refreshes
    pub uuid: Uuid,
    /// Raw record this manifestation was built from
    pub raw_record_id: String,
    /// Hash over the descriptor
    pub match_fingerprint: String,
    /// Match descriptor
    pub descriptor: ManifestationMatchData,
    /// Title proper (245 $abnp)
    pub title: String,
    /// Statement of responsibility (245 $c)
    pub responsibility: Option<String>,
    /// Publication statements (260/264 $abc)
    pub publication: Vec<String>,
    /// Physical description (300)
    pub physical_description: Option<String>,
    /// 008/15-17 country of publication
    pub country: Option<String>,
    /// 338 $b carrier type codes
    pub carrier_types: Vec<String>,
    /// 337 $b media type codes
    pub media_types: Vec<String>,
    /// 336 $b content type codes
    pub content_types: Vec<String>,
    /// 041 $a languages of text and translations
    pub languages: Vec<String>,
    /// 650/655 $0 subject and genre descriptor ids
    pub descriptor_ids: Vec<String>,
    /// Institution code -> item
    pub items_by_institution_code: BTreeMap<String, FrbrItem>,
}

impl FrbrManifestation {
    /// Total copy count across all institutions.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.items_by_institution_code
            .values()
            .map(|item| item.count.count)
            .sum()
    }
}

/// Work-level cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrbrCluster {
    /// Stable identity
    pub uuid: Uuid,
    /// Not yet persisted or indexed
    pub stub: bool,
    /// Main creator key -> counter
    pub main_creator: BTreeMap<String, Counter>,
    /// Other creator key -> counter (only when no main creator)
    pub other_creator: BTreeMap<String, Counter>,
    /// Title key -> counter
    pub titles: BTreeMap<String, Counter>,
    /// Hash over sorted creator and title keys
    pub work_match_fingerprint: String,
    /// Expression UUID -> expression
    pub expressions: BTreeMap<Uuid, FrbrExpression>,
    /// Distinctive tuple -> expression UUID
    pub expressions_by_distinctive_tuple: BTreeMap<ExpressionTuple, Uuid>,
    /// Raw record id -> manifestation reference
    pub manifestations_by_raw_record_id: BTreeMap<String, ManifestationRef>,
    /// Raw record id -> what it contributed
    pub raw_records: BTreeMap<String, RawRecordContribution>,
}

fn counters(keys: &BTreeSet<String>) -> BTreeMap<String, Counter> {
    keys.iter()
        .map(|key| (key.clone(), Counter::with_count(1)))
        .collect()
}

fn add_counts(target: &mut BTreeMap<String, Counter>, source: &BTreeMap<String, Counter>) {
    for (key, counter) in source {
        target.entry(key.clone()).or_default().add(counter.count);
    }
}

impl FrbrCluster {
    /// Transient stub for one raw record.
    ///
    /// Titles and creators start at count 1; the stub has no expressions or
    /// manifestations until it is promoted or merged.
    #[must_use]
    pub fn stub(data: &ClusterMatchData) -> Self {
        let mut cluster = FrbrCluster {
            uuid: Uuid::new_v4(),
            stub: true,
            main_creator: counters(&data.main_creator),
            other_creator: counters(&data.other_creator),
            titles: counters(&data.titles),
            raw_records: BTreeMap::from([(
                data.raw_record_id.clone(),
                RawRecordContribution {
                    main_creator: data.main_creator.clone(),
                    other_creator: data.other_creator.clone(),
                    titles: data.titles.clone(),
                    expression_tuple: data.expression_tuple.clone(),
                },
            )]),
            ..FrbrCluster::default()
        };
        cluster.refresh_work_fingerprint();
        cluster
    }

    /// Title keys in sorted order.
    pub fn title_keys(&self) -> impl Iterator<Item = &str> {
        self.titles.keys().map(String::as_str)
    }

    /// Titles whose counter was created by the last merge step.
    pub fn new_title_keys(&self) -> impl Iterator<Item = &str> {
        self.titles
            .iter()
            .filter(|(_, counter)| counter.is_new())
            .map(|(key, _)| key.as_str())
    }

    /// Same main creators (when the candidate has any), same other creators
    /// (when the candidate has any), or neither side has creators at all.
    #[must_use]
    pub fn creators_match(&self, other: &FrbrCluster) -> bool {
        let same_keys = |a: &BTreeMap<String, Counter>, b: &BTreeMap<String, Counter>| {
            a.keys().eq(b.keys())
        };
        if !self.main_creator.is_empty() && same_keys(&self.main_creator, &other.main_creator) {
            return true;
        }
        if !self.other_creator.is_empty() && same_keys(&self.other_creator, &other.other_creator) {
            return true;
        }
        self.main_creator.is_empty()
            && self.other_creator.is_empty()
            && other.main_creator.is_empty()
            && other.other_creator.is_empty()
    }

    /// Add the counters and record bookkeeping of `source` to this cluster.
    ///
    /// Expressions are not touched; callers move them separately.
    pub fn absorb_counts(&mut self, source: &FrbrCluster) {
        add_counts(&mut self.titles, &source.titles);
        add_counts(&mut self.main_creator, &source.main_creator);
        add_counts(&mut self.other_creator, &source.other_creator);
        self.manifestations_by_raw_record_id.extend(
            source
                .manifestations_by_raw_record_id
                .iter()
                .map(|(id, reference)| (id.clone(), reference.clone())),
        );
        self.raw_records.extend(
            source
                .raw_records
                .iter()
                .map(|(id, contribution)| (id.clone(), contribution.clone())),
        );
    }

    /// Insert an expression and its tuple lookup entry.
    pub fn insert_expression(&mut self, expression: FrbrExpression) {
        self.expressions_by_distinctive_tuple
            .insert(expression.distinctive_tuple.clone(), expression.uuid);
        self.expressions.insert(expression.uuid, expression);
    }

    /// Expression holding the given raw record's manifestation.
    #[must_use]
    pub fn expression_of(&self, raw_record_id: &str) -> Option<&FrbrExpression> {
        self.expressions
            .values()
            .find(|expression| expression.expression_data.contains_key(raw_record_id))
    }

    /// Recompute the work match fingerprint from the current keys.
    pub fn refresh_work_fingerprint(&mut self) {
        let creators: BTreeSet<&str> = self
            .main_creator
            .keys()
            .chain(self.other_creator.keys())
            .map(String::as_str)
            .collect();
        let titles: BTreeSet<&str> = self.title_keys().collect();
        self.work_match_fingerprint = fingerprint::work_fingerprint(&creators, &titles);
    }

    /// Total number of raw records in the cluster.
    #[must_use]
    pub fn raw_record_count(&self) -> usize {
        self.raw_records.len()
    }
}
