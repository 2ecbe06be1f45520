//! Cross-catalog manifestation linkage.
//!
//! A secondary catalog describes some of the same manifestations as the
//! primary one, but with independent cataloguing. To attach its holdings onto
//! the primary manifestation, a candidate description is looked up in title
//! buckets (the 245 title truncated to 25 characters, with and without the
//! non-filing article, then the 490 series titles) and every bucket member
//! is put through a cascade of confirming predicates:
//!
//! 1. same leader type/level and 008/06-14 date block
//! 2. ISBN compatibility
//! 3. same last five characters of the title
//! 4. same digit sequence in the title
//! 5. same first word of the place of publication
//! 6. page count within ±1
//! 7. format (height in cm) within ±12.5%
//! 8. same normalized edition statements
//!
//! A confirmation with equal editions beats one without. The first confirmed
//! candidate wins; ties are not broken further.

use crate::error::{FrbrError, Result};
use crate::normalize::{
    char_slice, digits_of, first_number, last_chars, max_number, normalize_edition, truncate_chars,
};
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Characters of the 245 title used for bucket keys.
pub const TITLE_BUCKET_LEN: usize = 25;

/// Relative tolerance on the format (height) comparison.
pub const FORMAT_TOLERANCE: f64 = 0.125;

/// Manifestation descriptor used for matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestationMatchData {
    /// Leader 06-07
    pub leader_type_level: String,
    /// 008/06-14 with `+` read as blank
    pub era: String,
    /// 020 $a and $z, as catalogued
    pub isbns: Vec<String>,
    /// 245 $ab
    pub title_245: String,
    /// 245 $ab, first 25 characters
    pub title_245_no_offset: String,
    /// 245 $ab without the non-filing article, up to character 25
    pub title_245_with_offset: String,
    /// 490 $a series titles
    pub titles_490: Vec<String>,
    /// Digits of the 245 title
    pub title_numbers: String,
    /// First word of 260/264 $a
    pub place_first_word: Option<String>,
    /// Largest number in 300 $a
    pub pages: Option<u32>,
    /// First number in 300 $c
    pub format: Option<u32>,
    /// Normalized 250 statements
    pub editions: Vec<String>,
}

impl ManifestationMatchData {
    /// Derive the descriptor from a parsed record.
    ///
    /// # Errors
    ///
    /// `MissingControlField("008")` without an 008, `TitleFieldInvalid`
    /// without a 245.
    pub fn from_record(record: &Record) -> Result<Self> {
        let field_008 = record
            .get_control_field("008")
            .ok_or_else(|| FrbrError::MissingControlField("008".to_string()))?;
        let title_field = record
            .get_field("245")
            .ok_or_else(|| FrbrError::TitleFieldInvalid("no 245 field".to_string()))?;
        let title_245 = title_field.joined(&['a', 'b']);
        let offset = title_field.non_filing_offset().unwrap_or(0);

        let isbns = record
            .fields_by_tag("020")
            .flat_map(|field| field.get_subfields(&['a', 'z']))
            .map(|isbn| isbn.trim().to_string())
            .filter(|isbn| !isbn.is_empty())
            .collect();

        let place_first_word = record
            .first_value("260", &['a'])
            .or_else(|| record.first_value("264", &['a']))
            .and_then(|place| place.split_whitespace().next().map(str::to_string));

        Ok(ManifestationMatchData {
            leader_type_level: record.leader.type_and_level(),
            era: char_slice(field_008, 6, 15).replace('+', " "),
            isbns,
            title_245_no_offset: truncate_chars(&title_245, TITLE_BUCKET_LEN),
            title_245_with_offset: char_slice(&title_245, offset, TITLE_BUCKET_LEN),
            titles_490: record.values("490", &['a']),
            title_numbers: digits_of(&title_245),
            place_first_word,
            pages: record
                .first_value("300", &['a'])
                .and_then(|extent| max_number(&extent)),
            format: record
                .first_value("300", &['c'])
                .and_then(|dimensions| first_number(&dimensions)),
            editions: record
                .fields_by_tag("250")
                .map(|field| normalize_edition(&field.joined(&['a', 'b'])))
                .collect(),
            title_245,
        })
    }

    /// Both 245 bucket keys of this descriptor.
    #[must_use]
    pub fn title_buckets(&self) -> BTreeSet<&str> {
        [
            self.title_245_no_offset.as_str(),
            self.title_245_with_offset.as_str(),
        ]
        .into_iter()
        .filter(|key| !key.is_empty())
        .collect()
    }

    /// 490 bucket keys of this descriptor.
    #[must_use]
    pub fn series_buckets(&self) -> BTreeSet<String> {
        self.titles_490
            .iter()
            .map(|title| truncate_chars(title, TITLE_BUCKET_LEN))
            .filter(|key| !key.is_empty())
            .collect()
    }
}

/// How two ISBN lists relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsbnRelation {
    /// Same non-empty list, in catalogued order
    Identical,
    /// Missing on at least one side, or overlapping sets
    Compatible,
    /// Both present and disjoint
    Conflicting,
}

/// Classify two ISBN lists.
#[must_use]
pub fn isbn_relation(primary: &[String], candidate: &[String]) -> IsbnRelation {
    if primary.is_empty() || candidate.is_empty() {
        return IsbnRelation::Compatible;
    }
    if primary == candidate {
        return IsbnRelation::Identical;
    }
    let primary: BTreeSet<&String> = primary.iter().collect();
    let candidate: BTreeSet<&String> = candidate.iter().collect();
    if primary.is_disjoint(&candidate) {
        IsbnRelation::Conflicting
    } else {
        IsbnRelation::Compatible
    }
}

fn pages_agree(primary: Option<u32>, candidate: Option<u32>) -> bool {
    match (primary, candidate) {
        (Some(a), Some(b)) => a.abs_diff(b) <= 1,
        (None, None) => true,
        _ => false,
    }
}

fn format_agrees(primary: Option<u32>, candidate: Option<u32>) -> bool {
    match (primary, candidate) {
        (Some(a), Some(b)) => {
            let reference = f64::from(b);
            (f64::from(a) - reference).abs() <= reference * FORMAT_TOLERANCE
        },
        (None, None) => true,
        _ => false,
    }
}

/// Which bucket family produced the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Title245,
    Series490,
}

/// Outcome of the predicate cascade for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Confirmation {
    WithEdition,
    WithoutEdition,
}

fn confirm(
    primary: &ManifestationMatchData,
    candidate: &ManifestationMatchData,
    pass: Pass,
) -> Option<Confirmation> {
    if primary.leader_type_level != candidate.leader_type_level || primary.era != candidate.era {
        return None;
    }
    let isbns = isbn_relation(&primary.isbns, &candidate.isbns);
    if isbns == IsbnRelation::Conflicting {
        return None;
    }

    let title_end = last_chars(&primary.title_245, 5) == last_chars(&candidate.title_245, 5);
    let numbers = primary.title_numbers == candidate.title_numbers;
    let place = primary.place_first_word == candidate.place_first_word;
    let physical = pages_agree(primary.pages, candidate.pages)
        && format_agrees(primary.format, candidate.format);
    let edition = primary.editions == candidate.editions;

    // The series pass does not compare titles.
    let (title_end, numbers) = match pass {
        Pass::Title245 => (title_end, numbers),
        Pass::Series490 => (true, true),
    };
    let failed_textual = [title_end, numbers, place]
        .iter()
        .filter(|holds| !**holds)
        .count();

    if !physical {
        return None;
    }
    match (isbns, edition) {
        (IsbnRelation::Identical, true) if failed_textual <= 1 => Some(Confirmation::WithEdition),
        (_, true) if failed_textual == 0 => Some(Confirmation::WithEdition),
        (_, false) if failed_textual == 0 => Some(Confirmation::WithoutEdition),
        _ => None,
    }
}

/// Title buckets and descriptors of the primary catalog's manifestations.
#[derive(Debug, Clone, Default)]
pub struct ManifestationIndex {
    title_245: HashMap<String, BTreeSet<String>>,
    title_490: HashMap<String, BTreeSet<String>>,
    by_record_id: HashMap<String, ManifestationMatchData>,
}

impl ManifestationIndex {
    /// Empty index.
    #[must_use]
    pub fn new() -> Self {
        ManifestationIndex::default()
    }

    /// Index a primary-catalog manifestation, replacing any earlier entry for
    /// the same raw record.
    pub fn insert(&mut self, raw_record_id: &str, data: ManifestationMatchData) {
        self.remove(raw_record_id);
        for key in data.title_buckets() {
            self.title_245
                .entry(key.to_string())
                .or_default()
                .insert(raw_record_id.to_string());
        }
        for key in data.series_buckets() {
            self.title_490
                .entry(key)
                .or_default()
                .insert(raw_record_id.to_string());
        }
        self.by_record_id.insert(raw_record_id.to_string(), data);
    }

    /// Drop a primary-catalog manifestation from every bucket.
    pub fn remove(&mut self, raw_record_id: &str) -> Option<ManifestationMatchData> {
        let data = self.by_record_id.remove(raw_record_id)?;
        for key in data.title_buckets() {
            remove_from_bucket(&mut self.title_245, key, raw_record_id);
        }
        for key in data.series_buckets() {
            remove_from_bucket(&mut self.title_490, &key, raw_record_id);
        }
        Some(data)
    }

    /// Number of indexed manifestations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_record_id.len()
    }

    /// True when nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_record_id.is_empty()
    }

    /// Match a secondary-catalog descriptor against the index.
    #[must_use]
    pub fn match_manifestation(&self, candidate: &ManifestationMatchData) -> Option<String> {
        match_manifestation(candidate, &self.title_245, &self.title_490, &self.by_record_id)
    }
}

fn remove_from_bucket(buckets: &mut HashMap<String, BTreeSet<String>>, key: &str, raw_record_id: &str) {
    if let Some(members) = buckets.get_mut(key) {
        members.remove(raw_record_id);
        if members.is_empty() {
            buckets.remove(key);
        }
    }
}

fn bucket_members(
    buckets: &HashMap<String, BTreeSet<String>>,
    candidate: &ManifestationMatchData,
) -> BTreeSet<String> {
    candidate
        .title_buckets()
        .into_iter()
        .filter_map(|key| buckets.get(key))
        .flatten()
        .cloned()
        .collect()
}

fn run_pass(
    pass: Pass,
    members: &BTreeSet<String>,
    candidate: &ManifestationMatchData,
    by_record_id: &HashMap<String, ManifestationMatchData>,
) -> Option<String> {
    let mut without_edition = None;
    for raw_record_id in members {
        let Some(primary) = by_record_id.get(raw_record_id) else {
            debug!(raw_record_id = %raw_record_id, "bucket member without descriptor");
            continue;
        };
        match confirm(primary, candidate, pass) {
            Some(Confirmation::WithEdition) => return Some(raw_record_id.clone()),
            Some(Confirmation::WithoutEdition) if without_edition.is_none() => {
                without_edition = Some(raw_record_id.clone());
            },
            _ => {},
        }
    }
    without_edition
}

/// Find the primary-catalog raw record a secondary descriptor describes.
///
/// `index_245` and `index_490` map bucket keys to primary raw record ids;
/// `by_record_id` holds the primary descriptors. Both bucket families are
/// probed with the candidate's 245 keys.
#[must_use]
pub fn match_manifestation(
    candidate: &ManifestationMatchData,
    index_245: &HashMap<String, BTreeSet<String>>,
    index_490: &HashMap<String, BTreeSet<String>>,
    by_record_id: &HashMap<String, ManifestationMatchData>,
) -> Option<String> {
    let from_245 = bucket_members(index_245, candidate);
    if let Some(found) = run_pass(Pass::Title245, &from_245, candidate, by_record_id) {
        debug!(raw_record_id = %found, "manifestation matched on 245 title");
        return Some(found);
    }
    let from_490 = bucket_members(index_490, candidate);
    let found = run_pass(Pass::Series490, &from_490, candidate, by_record_id);
    if let Some(found) = &found {
        debug!(raw_record_id = %found, "manifestation matched on 490 series title");
    }
    found
}
