//! Record admission filters.
//!
//! Only records that pass every filter reach fingerprinting: an accepted
//! document type, a single-work description, at least one holdings field and
//! a usable non-filing indicator on the title.

use crate::cluster::items::ItemConversionTable;
use crate::config::AdmissionConfig;
use crate::record::Record;

/// How many works a bibliographic record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkClass {
    /// One work; the record can be clustered.
    SingleWork,
    /// Several works bound together (ISBD multi-work punctuation plus
    /// analytic added entries or contents notes).
    MultiWork,
    /// Signals disagree; not clustered.
    Undetermined,
    /// Record lacks 245 $a.
    Invalid,
}

/// Leader 06-07 and 380 $a both name an accepted document type.
#[must_use]
pub fn is_document_type(record: &Record, config: &AdmissionConfig) -> bool {
    if !config
        .leader_types
        .iter()
        .any(|accepted| *accepted == record.leader.type_and_level())
    {
        return false;
    }
    let forms = record.values("380", &['a']);
    config
        .document_types
        .iter()
        .any(|accepted| forms.iter().any(|form| form == accepted))
}

/// Classify a record as single- or multi-work.
#[must_use]
pub fn classify_work(record: &Record) -> WorkClass {
    let Some(title_a) = record.first_value("245", &['a']) else {
        return WorkClass::Invalid;
    };
    let title_b = record.first_value("245", &['b']).unwrap_or_default();
    let responsibility = record.first_value("245", &['c']).unwrap_or_default();

    let no_multiwork_punctuation = !title_a.trim_end().ends_with(';')
        && !title_a.contains(" ; ")
        && !title_b.contains(" ; ")
        && !responsibility.contains(" / ");

    let uniform_titles = record.values("730", &['a', 'b', 'c', 'd', 'n', 'p', 't']);
    let no_other_uniform_title = uniform_titles.is_empty()
        || (uniform_titles.len() == 1 && uniform_titles[0].contains("Katalog wystawy"));

    let no_contents_notes =
        !record.has_field("501") && !record.has_field("505") && !record.has_field("740");

    let no_analytic_entries = ["700", "710", "711"]
        .iter()
        .all(|tag| record.values(tag, &['t']).is_empty());

    let original_title_notes = record
        .values("246", &['i'])
        .iter()
        .filter(|note| note.contains("Tyt. oryg.") || note.contains("Tytuł oryginału"))
        .count();

    if no_multiwork_punctuation
        && no_other_uniform_title
        && no_contents_notes
        && no_analytic_entries
        && original_title_notes < 2
    {
        return WorkClass::SingleWork;
    }
    if !no_multiwork_punctuation && (!no_analytic_entries || !no_contents_notes) {
        return WorkClass::MultiWork;
    }
    WorkClass::Undetermined
}

/// At least one holdings field named by the item conversion table.
#[must_use]
pub fn has_items(record: &Record, items: &ItemConversionTable) -> bool {
    items
        .rules()
        .any(|rule| record.has_field(&rule.field_tag))
}

/// The 245 second indicator is a digit (a usable non-filing count).
#[must_use]
pub fn is_title_indicator_valid(record: &Record) -> bool {
    record
        .get_field("245")
        .is_some_and(|field| field.non_filing_offset().is_some())
}

/// Every admission filter at once.
#[must_use]
pub fn admit(record: &Record, config: &AdmissionConfig, items: &ItemConversionTable) -> bool {
    is_document_type(record, config)
        && classify_work(record) == WorkClass::SingleWork
        && has_items(record, items)
        && is_title_indicator_valid(record)
}
