//! MARC record leader as seen by FRBRization.
//!
//! The leader is a 24-character fixed-length header. Clustering only reads a
//! handful of positions from it:
//!
//! - Position 6: Type of record (a = language material, i = nonmusical sound recording, ...)
//! - Position 7: Bibliographic level (m = monograph, s = serial, ...)
//!
//! The remaining positions are carried so a leader survives a round trip
//! through the cluster store unchanged.

use crate::error::{FrbrError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// MARC Leader - 24 characters at the start of every MARC record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leader {
    /// Record length (5 digits) - positions 0-4
    pub record_length: u32,
    /// Record status (1 char) - position 5
    pub record_status: char,
    /// Type of record (1 char) - position 6
    pub record_type: char,
    /// Bibliographic level (1 char) - position 7
    pub bibliographic_level: char,
    /// Type of control record (1 char) - position 8
    pub control_record_type: char,
    /// Character coding scheme (1 char) - position 9
    pub character_coding: char,
    /// Base address of data (5 digits) - positions 12-16
    pub data_base_address: u32,
    /// Encoding level (1 char) - position 17
    pub encoding_level: char,
    /// Cataloging form (1 char) - position 18
    pub cataloging_form: char,
    /// Multipart resource record level (1 char) - position 19
    pub multipart_level: char,
}

impl Default for Leader {
    fn default() -> Self {
        Leader {
            record_length: 0,
            record_status: 'n',
            record_type: 'a',
            bibliographic_level: 'm',
            control_record_type: ' ',
            character_coding: 'a',
            data_base_address: 0,
            encoding_level: ' ',
            cataloging_form: 'i',
            multipart_level: ' ',
        }
    }
}

impl Leader {
    /// Leader positions 06-07 as a two-character string (e.g. `"am"`).
    #[must_use]
    pub fn type_and_level(&self) -> String {
        let mut out = String::with_capacity(2);
        out.push(self.record_type);
        out.push(self.bibliographic_level);
        out
    }

    /// Leader with the given type of record and bibliographic level.
    #[must_use]
    pub fn with_type(record_type: char, bibliographic_level: char) -> Self {
        Leader {
            record_type,
            bibliographic_level,
            ..Leader::default()
        }
    }
}

impl FromStr for Leader {
    type Err = FrbrError;

    fn from_str(s: &str) -> Result<Self> {
        let chars: Vec<char> = s.chars().collect();
        if chars.len() < 24 {
            return Err(FrbrError::InvalidLeader(format!(
                "Leader must be 24 characters, got {}",
                chars.len()
            )));
        }

        Ok(Leader {
            record_length: parse_digits(&chars[0..5])?,
            record_status: chars[5],
            record_type: chars[6],
            bibliographic_level: chars[7],
            control_record_type: chars[8],
            character_coding: chars[9],
            data_base_address: parse_digits(&chars[12..17])?,
            encoding_level: chars[17],
            cataloging_form: chars[18],
            multipart_level: chars[19],
        })
    }
}

impl fmt::Display for Leader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:05}{}{}{}{}{}22{:05}{}{}{}4500",
            self.record_length,
            self.record_status,
            self.record_type,
            self.bibliographic_level,
            self.control_record_type,
            self.character_coding,
            self.data_base_address,
            self.encoding_level,
            self.cataloging_form,
            self.multipart_level
        )
    }
}

/// Parse a 5-digit number; blanks are read as zero.
fn parse_digits(chars: &[char]) -> Result<u32> {
    let s: String = chars.iter().collect();
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed
        .parse::<u32>()
        .map_err(|_| FrbrError::InvalidLeader(format!("Invalid numeric field: '{s}'")))
}
