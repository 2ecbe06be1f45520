//! Match keys and change-detection fingerprints derived from one record.
//!
//! [`derive_fingerprint`] is a pure function over a parsed record. It yields
//! the creator and title keys the match engine compares, the expression
//! tuple used to group manifestations inside a cluster, the manifestation
//! descriptor, and three SHA-256 fingerprints. The fingerprints are opaque
//! tokens: they only tell whether a re-delivered record changed.
//!
//! # Examples
//!
//! ```
//! use frbrizer::fingerprint::derive_fingerprint;
//! use frbrizer::{Field, Leader, Record};
//!
//! let record = Record::builder(Leader::default())
//!     .control_field_str("001", "b0000001")
//!     .control_field_str("008", "010101s2001    pl            000 0 pol d")
//!     .field(
//!         Field::builder("100".to_string(), '1', ' ')
//!             .subfield_str('a', "Gombrowicz, Witold")
//!             .build(),
//!     )
//!     .field(
//!         Field::builder("245".to_string(), '1', '0')
//!             .subfield_str('a', "Ferdydurke /")
//!             .build(),
//!     )
//!     .build();
//!
//! let data = derive_fingerprint(&record).unwrap();
//! assert!(data.main_creator.contains("GOMBROWICZ WITOLD"));
//! assert!(data.titles.contains("FERDYDURKE"));
//! assert_eq!(data.expression_tuple.language, "pol");
//! ```

use crate::cluster::model::{ExpressionData, ExpressionTuple};
use crate::error::{FrbrError, Result};
use crate::manifestation_matcher::ManifestationMatchData;
use crate::normalize::{char_slice, normalize_title, prepare_name_for_indexing, strip_non_filing};
use crate::record::{Field, Record};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

const MAIN_ROLES: [&str; 3] = ["Autor", "Autor domniemany", "Wywiad"];
const OTHER_ROLE_MARKERS: [&str; 3] = ["Red", "Oprac", "Wybór"];
const TRANSLATOR_ROLES: [&str; 3] = ["Tł.", "Tł", "Tłumaczenie"];

const PERSONAL_NAME: [char; 4] = ['a', 'b', 'c', 'd'];
const CORPORATE_NAME: [char; 5] = ['a', 'b', 'c', 'd', 'n'];

const UNIT_SEPARATOR: u8 = 0x1f;
const GROUP_SEPARATOR: u8 = 0x1e;

/// Everything the match engine needs to know about one raw record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMatchData {
    /// Source-assigned id (001)
    pub raw_record_id: String,
    /// Normalized main creator keys
    pub main_creator: BTreeSet<String>,
    /// Normalized other creator keys (empty when there is a main creator)
    pub other_creator: BTreeSet<String>,
    /// Normalized title keys, each once
    pub titles: BTreeSet<String>,
    /// Expression grouping key
    pub expression_tuple: ExpressionTuple,
    /// Descriptive data kept on the expression
    pub expression_data: ExpressionData,
    /// Manifestation descriptor
    pub manifestation: ManifestationMatchData,
    /// Hash over creators and titles
    pub work_fingerprint: String,
    /// Hash over the expression tuple
    pub expression_fingerprint: String,
    /// Hash over the manifestation descriptor
    pub manifestation_fingerprint: String,
}

/// Derive match data from a parsed record.
///
/// # Errors
///
/// - `MissingControlField` when 001 or 008 is absent
/// - `TitleFieldInvalid` when there is not exactly one 245, or it lacks `$a`
/// - `TooManyPrimaryCreators` when a 1XX tag repeats or 100, 110 and 111 are
///   all present
pub fn derive_fingerprint(record: &Record) -> Result<ClusterMatchData> {
    let raw_record_id = record
        .control_number()
        .map(str::to_string)
        .ok_or_else(|| FrbrError::MissingControlField("001".to_string()))?;
    let main_creator = main_creators(record)?;
    let other_creator = if main_creator.is_empty() {
        other_creators(record)
    } else {
        BTreeSet::new()
    };
    let titles = titles(record)?;
    let (expression_tuple, expression_data) = expression(record)?;
    let manifestation = ManifestationMatchData::from_record(record)?;

    let creators: BTreeSet<&str> = main_creator
        .iter()
        .chain(other_creator.iter())
        .map(String::as_str)
        .collect();
    let title_refs: BTreeSet<&str> = titles.iter().map(String::as_str).collect();

    Ok(ClusterMatchData {
        work_fingerprint: work_fingerprint(&creators, &title_refs),
        expression_fingerprint: expression_fingerprint(&expression_tuple),
        manifestation_fingerprint: manifestation_fingerprint(&manifestation),
        raw_record_id,
        main_creator,
        other_creator,
        titles,
        expression_tuple,
        expression_data,
        manifestation,
    })
}

fn name_key(field: &Field, codes: &[char]) -> Option<String> {
    let key = prepare_name_for_indexing(&field.joined(codes));
    (!key.is_empty()).then_some(key)
}

fn has_main_role(roles: &[&str]) -> bool {
    roles
        .iter()
        .any(|role| MAIN_ROLES.contains(&role.trim()))
}

fn main_creators(record: &Record) -> Result<BTreeSet<String>> {
    let primary: [(&str, &[char]); 3] = [
        ("100", &PERSONAL_NAME),
        ("110", &CORPORATE_NAME),
        ("111", &CORPORATE_NAME),
    ];
    let counts: Vec<usize> = primary
        .iter()
        .map(|(tag, _)| record.get_fields(tag).len())
        .collect();
    if counts.iter().any(|n| *n > 1) || counts.iter().all(|n| *n == 1) {
        return Err(FrbrError::TooManyPrimaryCreators);
    }

    let from_1xx: BTreeSet<String> = primary
        .iter()
        .filter_map(|(tag, codes)| record.get_field(tag).and_then(|f| name_key(f, codes)))
        .collect();
    if !from_1xx.is_empty() {
        return Ok(from_1xx);
    }

    let mut creators = BTreeSet::new();
    for field in record.fields_by_tag("700") {
        let roles = field.get_subfields(&['e']);
        if roles.is_empty() || has_main_role(&roles) {
            creators.extend(name_key(field, &PERSONAL_NAME));
        }
    }
    for (tag, role_code) in [("710", 'e'), ("711", 'j')] {
        for field in record.fields_by_tag(tag) {
            let roles = field.get_subfields(&[role_code]);
            let unqualified = roles.is_empty() && field.get_subfield('4').is_none();
            if unqualified || has_main_role(&roles) {
                creators.extend(name_key(field, &CORPORATE_NAME));
            }
        }
    }
    Ok(creators)
}

fn other_creators(record: &Record) -> BTreeSet<String> {
    let mut creators = BTreeSet::new();
    for (tag, role_code, codes) in [
        ("700", 'e', &PERSONAL_NAME[..]),
        ("710", 'e', &CORPORATE_NAME[..]),
        ("711", 'j', &CORPORATE_NAME[..]),
    ] {
        for field in record.fields_by_tag(tag) {
            let roles = field.joined(&[role_code]);
            if OTHER_ROLE_MARKERS.iter().any(|marker| roles.contains(marker)) {
                creators.extend(name_key(field, codes));
            }
        }
    }
    creators
}

/// Key in full plus, when the offset strips a leading article, the key
/// without it.
fn title_variants(raw: &str, offset: Option<usize>) -> Vec<String> {
    let key = prepare_name_for_indexing(&normalize_title(raw));
    if key.is_empty() {
        return Vec::new();
    }
    let stripped = offset
        .and_then(|n| strip_non_filing(&key, n))
        .map(|rest| rest.trim().to_string());
    std::iter::once(key).chain(stripped).collect()
}

fn titles(record: &Record) -> Result<BTreeSet<String>> {
    let fields_245 = record.get_fields("245");
    let field_245 = match fields_245 {
        [single] => single,
        [] => return Err(FrbrError::TitleFieldInvalid("no 245 field".to_string())),
        _ => {
            return Err(FrbrError::TitleFieldInvalid(format!(
                "{} 245 fields",
                fields_245.len()
            )))
        },
    };
    let title_a = field_245
        .get_subfield('a')
        .ok_or_else(|| FrbrError::TitleFieldInvalid("245 without $a".to_string()))?;
    let offset = field_245.non_filing_offset();
    let mut titles = BTreeSet::new();

    let parts: Vec<&str> = field_245.subfields_by_code('p').collect();
    if let Some(last_part) = parts.last() {
        titles.extend(title_variants(last_part, None));
    } else {
        if title_a.trim_end().ends_with('=') {
            titles.extend(title_variants(title_a, offset));
        }
        titles.extend(title_variants(&field_245.joined(&['a', 'b']), offset));
    }

    for field in record.fields_by_tag("246") {
        titles.extend(title_variants(&field.joined(&['a', 'b']), None));
    }
    if let Some(field_240) = record.get_field("240") {
        titles.extend(title_variants(
            &field_240.joined(&['a', 'b']),
            field_240.non_filing_offset(),
        ));
    }
    Ok(titles)
}

fn expression(record: &Record) -> Result<(ExpressionTuple, ExpressionData)> {
    let field_008 = record
        .get_control_field("008")
        .ok_or_else(|| FrbrError::MissingControlField("008".to_string()))?;
    let language = char_slice(field_008, 35, 38);

    let translators = record
        .fields_by_tag("700")
        .filter(|field| {
            field
                .get_subfield('e')
                .is_some_and(|role| TRANSLATOR_ROLES.contains(&role.trim()))
        })
        .filter_map(|field| name_key(field, &PERSONAL_NAME))
        .collect();

    let leader_type = record.leader.record_type;
    let tuple = ExpressionTuple {
        language: language.clone(),
        translators,
        leader_type,
    };
    let data = ExpressionData {
        language,
        forms: record.values("380", &['a']),
        leader_type,
        title: record.first_value("245", &['a', 'b']).unwrap_or_default(),
    };
    Ok((tuple, data))
}

fn digest<'a>(groups: impl IntoIterator<Item = Vec<&'a str>>) -> String {
    let mut hasher = Sha256::new();
    for group in groups {
        for value in group {
            hasher.update(value.as_bytes());
            hasher.update([UNIT_SEPARATOR]);
        }
        hasher.update([GROUP_SEPARATOR]);
    }
    hex::encode(hasher.finalize())
}

/// Work fingerprint over sorted creator and title keys.
#[must_use]
pub fn work_fingerprint(creators: &BTreeSet<&str>, titles: &BTreeSet<&str>) -> String {
    digest([
        creators.iter().copied().collect(),
        titles.iter().copied().collect(),
    ])
}

/// Expression fingerprint over the distinctive tuple.
#[must_use]
pub fn expression_fingerprint(tuple: &ExpressionTuple) -> String {
    let leader_type = tuple.leader_type.to_string();
    digest([
        vec![tuple.language.as_str()],
        tuple.translators.iter().map(String::as_str).collect(),
        vec![leader_type.as_str()],
    ])
}

/// Manifestation fingerprint over the match descriptor.
#[must_use]
pub fn manifestation_fingerprint(data: &ManifestationMatchData) -> String {
    let optional = |value: Option<u32>| value.map(|n| n.to_string()).unwrap_or_default();
    let pages = optional(data.pages);
    let format = optional(data.format);
    digest([
        vec![data.leader_type_level.as_str(), data.era.as_str()],
        data.isbns.iter().map(String::as_str).collect(),
        vec![
            data.title_245.as_str(),
            data.title_245_no_offset.as_str(),
            data.title_245_with_offset.as_str(),
        ],
        data.titles_490.iter().map(String::as_str).collect(),
        vec![
            data.title_numbers.as_str(),
            data.place_first_word.as_deref().unwrap_or_default(),
            pages.as_str(),
            format.as_str(),
        ],
        data.editions.iter().map(String::as_str).collect(),
    ])
}
