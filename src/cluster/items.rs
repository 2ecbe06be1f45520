//! Item-level (holdings) construction and folding.
//!
//! Holdings fields are turned into [`FrbrItem`]s through an
//! [`ItemConversionTable`]: one rule per holdings field tag naming the
//! institution and how the item URL is built. Repeated holdings for the same
//! institution fold into one item with a running copy count and a per-source
//! breakdown, so one source record's copies can later be detached without
//! disturbing the others.

use crate::cluster::counter::Counter;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// How the URL of an item is derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemUrl {
    /// `prefix` + value of a control field + `suffix`
    Template {
        /// Text before the control field value
        prefix: String,
        /// Control field whose value is inserted
        control_field: String,
        /// Text after the control field value
        suffix: String,
    },
    /// First value of a subfield of the holdings field
    Subfield {
        /// Subfield code
        code: char,
    },
}

/// One holdings field tag and the institution it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingsRule {
    /// Holdings field tag (e.g. `852`)
    pub field_tag: String,
    /// Institution code assigned to items built from the field
    pub institution_code: String,
    /// URL derivation
    pub url: ItemUrl,
}

impl HoldingsRule {
    fn item_url(&self, record: &Record, field_index: usize) -> Option<String> {
        match &self.url {
            ItemUrl::Template {
                prefix,
                control_field,
                suffix,
            } => record
                .get_control_field(control_field)
                .map(|value| format!("{prefix}{value}{suffix}")),
            ItemUrl::Subfield { code } => record
                .get_fields(&self.field_tag)
                .get(field_index)
                .and_then(|field| field.get_subfield(*code))
                .map(str::to_string),
        }
    }
}

/// Holdings conversion rules, keyed by field tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemConversionTable {
    rules: Vec<HoldingsRule>,
}

impl Default for ItemConversionTable {
    fn default() -> Self {
        ItemConversionTable {
            rules: vec![
                HoldingsRule {
                    field_tag: "852".to_string(),
                    institution_code: "BN".to_string(),
                    url: ItemUrl::Template {
                        prefix: "https://katalogi.bn.org.pl/discovery/fulldisplay?docid=alma"
                            .to_string(),
                        control_field: "009".to_string(),
                        suffix: "&context=L&vid=48OMNIS_NLOP:48OMNIS_NLOP".to_string(),
                    },
                },
                HoldingsRule {
                    field_tag: "856".to_string(),
                    institution_code: "POLONA".to_string(),
                    url: ItemUrl::Subfield { code: 'u' },
                },
            ],
        }
    }
}

impl ItemConversionTable {
    /// Table with the given rules.
    #[must_use]
    pub fn new(rules: Vec<HoldingsRule>) -> Self {
        ItemConversionTable { rules }
    }

    /// Iterate over the rules.
    pub fn rules(&self) -> impl Iterator<Item = &HoldingsRule> {
        self.rules.iter()
    }

    /// Build the items of one raw record, folded per institution code.
    ///
    /// Each holdings field counts as one copy; the URL is taken from the first
    /// field of an institution that yields one.
    #[must_use]
    pub fn build_items(&self, record: &Record, raw_record_id: &str) -> BTreeMap<String, FrbrItem> {
        let mut items: BTreeMap<String, FrbrItem> = BTreeMap::new();
        for rule in &self.rules {
            for (index, _) in record.fields_by_tag(&rule.field_tag).enumerate() {
                let item = FrbrItem::new(
                    &rule.institution_code,
                    raw_record_id,
                    1,
                    rule.item_url(record, index),
                );
                merge_item(&mut items, item);
            }
        }
        items
    }
}

/// Item: all copies one institution holds of a manifestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrbrItem {
    /// Stable identity
    pub uuid: Uuid,
    /// Holding institution
    pub institution_code: String,
    /// Item URL
    pub url: Option<String>,
    /// Running copy count
    pub count: Counter,
    /// Raw record id -> copies it contributed
    pub count_by_raw_record_id: BTreeMap<String, u32>,
}

impl FrbrItem {
    /// Item with a fresh UUID.
    #[must_use]
    pub fn new(institution_code: &str, raw_record_id: &str, copies: u32, url: Option<String>) -> Self {
        FrbrItem {
            uuid: Uuid::new_v4(),
            institution_code: institution_code.to_string(),
            url,
            count: Counter::with_count(copies),
            count_by_raw_record_id: BTreeMap::from([(raw_record_id.to_string(), copies)]),
        }
    }

    /// Fold another item of the same institution into this one.
    pub fn merge(&mut self, other: FrbrItem) {
        self.count.add(other.count.count);
        for (raw_record_id, copies) in other.count_by_raw_record_id {
            *self.count_by_raw_record_id.entry(raw_record_id).or_insert(0) += copies;
        }
        if self.url.is_none() {
            self.url = other.url;
        }
    }

    /// Remove the copies a raw record contributed. Returns the copies removed.
    pub fn detach(&mut self, raw_record_id: &str) -> u32 {
        let copies = self
            .count_by_raw_record_id
            .remove(raw_record_id)
            .unwrap_or(0);
        if copies > 0 {
            self.count.subtract(copies);
        }
        copies
    }
}

/// Fold `item` into the map, by institution code.
pub fn merge_item(items: &mut BTreeMap<String, FrbrItem>, item: FrbrItem) {
    match items.get_mut(&item.institution_code) {
        Some(existing) => existing.merge(item),
        None => {
            items.insert(item.institution_code.clone(), item);
        },
    }
}

/// Fold every item of `incoming` into `items`.
pub fn merge_items(items: &mut BTreeMap<String, FrbrItem>, incoming: BTreeMap<String, FrbrItem>) {
    for item in incoming.into_values() {
        merge_item(items, item);
    }
}

/// Detach a raw record's copies from every item, dropping items left empty.
///
/// Returns the UUIDs of the dropped items.
pub fn detach_raw_record(items: &mut BTreeMap<String, FrbrItem>, raw_record_id: &str) -> Vec<Uuid> {
    for item in items.values_mut() {
        item.detach(raw_record_id);
    }
    let emptied: Vec<String> = items
        .iter()
        .filter(|(_, item)| item.count.is_zero())
        .map(|(code, _)| code.clone())
        .collect();
    emptied
        .into_iter()
        .filter_map(|code| items.remove(&code))
        .map(|item| item.uuid)
        .collect()
}
