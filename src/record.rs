//! Parsed bibliographic record structures.
//!
//! Records arrive already parsed from the upstream record reader. This module
//! provides the shape they arrive in and the field accessors every derivation
//! in the crate is built on:
//! - [`Record`] — leader, control fields (001-009) and data fields (010+)
//! - [`Field`] — a data field with indicators and subfields
//! - [`Subfield`] — a coded data element within a field
//!
//! # Examples
//!
//! ```
//! use frbrizer::{Field, Leader, Record};
//!
//! let record = Record::builder(Leader::default())
//!     .control_field_str("001", "b0000001234")
//!     .field(
//!         Field::builder("245".to_string(), '1', '0')
//!             .subfield_str('a', "Ferdydurke /")
//!             .subfield_str('c', "Witold Gombrowicz.")
//!             .build(),
//!     )
//!     .build();
//!
//! assert_eq!(record.values("245", &['a']), vec!["Ferdydurke /"]);
//! ```

use crate::leader::Leader;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A parsed MARC bibliographic record.
///
/// Fields are stored in insertion order using `IndexMap`, so values derived
/// from repeated fields come out in cataloguing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Record leader
    pub leader: Leader,
    /// Control fields (001-009) - tag -> value
    pub control_fields: IndexMap<String, String>,
    /// Data fields (010+) - tag -> fields
    pub fields: IndexMap<String, Vec<Field>>,
}

/// A data field in a MARC record (fields 010 and higher)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field tag (3 digits)
    pub tag: String,
    /// First indicator
    pub indicator1: char,
    /// Second indicator
    pub indicator2: char,
    /// Subfields (stored in `SmallVec` to avoid allocation for typical fields with 4 or fewer subfields)
    pub subfields: SmallVec<[Subfield; 4]>,
}

/// A subfield within a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subfield {
    /// Subfield code (single character)
    pub code: char,
    /// Subfield value
    pub value: String,
}

impl Record {
    /// Create a new record with the given leader
    #[must_use]
    pub fn new(leader: Leader) -> Self {
        Record {
            leader,
            control_fields: IndexMap::new(),
            fields: IndexMap::new(),
        }
    }

    /// Create a builder for fluently constructing records
    #[must_use]
    pub fn builder(leader: Leader) -> RecordBuilder {
        RecordBuilder {
            record: Record::new(leader),
        }
    }

    /// Add a control field (001-009)
    pub fn add_control_field(&mut self, tag: String, value: String) {
        self.control_fields.insert(tag, value);
    }

    /// Add a control field using string slices
    pub fn add_control_field_str(&mut self, tag: &str, value: &str) {
        self.add_control_field(tag.to_string(), value.to_string());
    }

    /// Get a control field value
    #[must_use]
    pub fn get_control_field(&self, tag: &str) -> Option<&str> {
        self.control_fields
            .get(tag)
            .map(std::string::String::as_str)
    }

    /// Add a data field
    pub fn add_field(&mut self, field: Field) {
        self.fields
            .entry(field.tag.clone())
            .or_default()
            .push(field);
    }

    /// Get all fields with a given tag
    #[must_use]
    pub fn get_fields(&self, tag: &str) -> &[Field] {
        self.fields.get(tag).map_or(&[], std::vec::Vec::as_slice)
    }

    /// Get first field with a given tag
    #[must_use]
    pub fn get_field(&self, tag: &str) -> Option<&Field> {
        self.fields.get(tag).and_then(|v| v.first())
    }

    /// True if at least one field with the tag is present
    #[must_use]
    pub fn has_field(&self, tag: &str) -> bool {
        !self.get_fields(tag).is_empty()
    }

    /// Iterate over fields matching a specific tag
    pub fn fields_by_tag(&self, tag: &str) -> impl Iterator<Item = &Field> {
        self.fields.get(tag).map(|v| v.iter()).into_iter().flatten()
    }

    /// Selected subfields of every field with `tag`, joined with a single space.
    ///
    /// Fields contributing none of the requested codes are skipped, so the
    /// result never contains empty strings.
    #[must_use]
    pub fn values(&self, tag: &str, codes: &[char]) -> Vec<String> {
        self.fields_by_tag(tag)
            .map(|field| field.joined(codes))
            .filter(|value| !value.is_empty())
            .collect()
    }

    /// First value of [`Record::values`], if any.
    #[must_use]
    pub fn first_value(&self, tag: &str, codes: &[char]) -> Option<String> {
        self.fields_by_tag(tag)
            .map(|field| field.joined(codes))
            .find(|value| !value.is_empty())
    }

    /// Source-assigned raw record id (001)
    #[must_use]
    pub fn control_number(&self) -> Option<&str> {
        self.get_control_field("001")
    }
}

/// Builder for fluently constructing records
#[derive(Debug)]
pub struct RecordBuilder {
    record: Record,
}

impl RecordBuilder {
    /// Add a control field
    #[must_use]
    pub fn control_field_str(mut self, tag: &str, value: &str) -> Self {
        self.record.add_control_field_str(tag, value);
        self
    }

    /// Add a data field
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.record.add_field(field);
        self
    }

    /// Build the record
    #[must_use]
    pub fn build(self) -> Record {
        self.record
    }
}

impl Field {
    /// Create a new field
    #[must_use]
    pub fn new(tag: String, indicator1: char, indicator2: char) -> Self {
        Field {
            tag,
            indicator1,
            indicator2,
            subfields: SmallVec::new(),
        }
    }

    /// Create a builder for fluently constructing fields
    #[must_use]
    pub fn builder(tag: String, indicator1: char, indicator2: char) -> FieldBuilder {
        FieldBuilder {
            field: Field::new(tag, indicator1, indicator2),
        }
    }

    /// Add a subfield
    pub fn add_subfield(&mut self, code: char, value: String) {
        self.subfields.push(Subfield { code, value });
    }

    /// Add a subfield using a string slice
    pub fn add_subfield_str(&mut self, code: char, value: &str) {
        self.add_subfield(code, value.to_string());
    }

    /// Get first subfield value by code
    #[must_use]
    pub fn get_subfield(&self, code: char) -> Option<&str> {
        self.subfields
            .iter()
            .find(|sf| sf.code == code)
            .map(|sf| sf.value.as_str())
    }

    /// Iterate over all values for a subfield code
    pub fn subfields_by_code(&self, code: char) -> impl Iterator<Item = &str> {
        self.subfields
            .iter()
            .filter(move |sf| sf.code == code)
            .map(|sf| sf.value.as_str())
    }

    /// Values of every subfield whose code is in `codes`, in field order
    #[must_use]
    pub fn get_subfields(&self, codes: &[char]) -> Vec<&str> {
        self.subfields
            .iter()
            .filter(|sf| codes.contains(&sf.code))
            .map(|sf| sf.value.as_str())
            .collect()
    }

    /// Subfields whose code is in `codes`, joined with a single space
    #[must_use]
    pub fn joined(&self, codes: &[char]) -> String {
        self.get_subfields(codes).join(" ")
    }

    /// Second indicator read as a non-filing character count.
    ///
    /// Returns `None` when the indicator is not a digit.
    #[must_use]
    pub fn non_filing_offset(&self) -> Option<usize> {
        self.indicator2.to_digit(10).map(|d| d as usize)
    }
}

/// Builder for fluently constructing fields
#[derive(Debug)]
pub struct FieldBuilder {
    field: Field,
}

impl FieldBuilder {
    /// Add a subfield
    #[must_use]
    pub fn subfield_str(mut self, code: char, value: &str) -> Self {
        self.field.add_subfield_str(code, value);
        self
    }

    /// Build the field
    #[must_use]
    pub fn build(self) -> Field {
        self.field
    }
}
