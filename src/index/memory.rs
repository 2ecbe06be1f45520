//! In-process match index.

use crate::cluster::{FrbrCluster, FrbrManifestation, MatchFingerprints};
use crate::error::Result;
use crate::index::MatchIndex;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Match index held in plain maps.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMatchIndex {
    clusters: HashMap<Uuid, FrbrCluster>,
    titles: HashMap<String, BTreeSet<Uuid>>,
    fingerprints: HashMap<String, MatchFingerprints>,
    manifestations: HashMap<Uuid, FrbrManifestation>,
}

impl InMemoryMatchIndex {
    /// Empty index.
    #[must_use]
    pub fn new() -> Self {
        InMemoryMatchIndex::default()
    }

    /// Every stored cluster, in no particular order.
    pub fn clusters(&self) -> impl Iterator<Item = &FrbrCluster> {
        self.clusters.values()
    }

    /// Number of stored clusters.
    #[must_use]
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Every title -> cluster entry.
    pub fn title_entries(&self) -> impl Iterator<Item = (&str, &BTreeSet<Uuid>)> {
        self.titles
            .iter()
            .map(|(title, members)| (title.as_str(), members))
    }

    /// Number of stored manifestations.
    #[must_use]
    pub fn manifestation_count(&self) -> usize {
        self.manifestations.len()
    }
}

impl MatchIndex for InMemoryMatchIndex {
    fn candidates_by_title(&self, titles: &[&str]) -> Result<BTreeSet<Uuid>> {
        Ok(titles
            .iter()
            .filter_map(|title| self.titles.get(*title))
            .flatten()
            .copied()
            .collect())
    }

    fn get(&self, uuid: Uuid) -> Result<Option<FrbrCluster>> {
        Ok(self.clusters.get(&uuid).cloned())
    }

    fn put(&mut self, cluster: &FrbrCluster) -> Result<()> {
        self.clusters.insert(cluster.uuid, cluster.clone());
        Ok(())
    }

    fn delete(&mut self, uuid: Uuid) -> Result<()> {
        self.clusters.remove(&uuid);
        Ok(())
    }

    fn index_title(&mut self, title: &str, uuid: Uuid) -> Result<()> {
        self.titles.entry(title.to_string()).or_default().insert(uuid);
        Ok(())
    }

    fn unindex_title(&mut self, title: &str, uuid: Uuid) -> Result<()> {
        if let Some(members) = self.titles.get_mut(title) {
            members.remove(&uuid);
            if members.is_empty() {
                self.titles.remove(title);
            }
        }
        Ok(())
    }

    fn get_match_fingerprints_by_raw_record_id(
        &self,
        raw_record_id: &str,
    ) -> Result<Option<MatchFingerprints>> {
        Ok(self.fingerprints.get(raw_record_id).cloned())
    }

    fn set_match_fingerprints_by_raw_record_id(
        &mut self,
        raw_record_id: &str,
        fingerprints: &MatchFingerprints,
    ) -> Result<()> {
        self.fingerprints
            .insert(raw_record_id.to_string(), fingerprints.clone());
        Ok(())
    }

    fn delete_match_fingerprints_by_raw_record_id(&mut self, raw_record_id: &str) -> Result<()> {
        self.fingerprints.remove(raw_record_id);
        Ok(())
    }

    fn get_manifestation(&self, uuid: Uuid) -> Result<Option<FrbrManifestation>> {
        Ok(self.manifestations.get(&uuid).cloned())
    }

    fn put_manifestation(&mut self, manifestation: &FrbrManifestation) -> Result<()> {
        self.manifestations
            .insert(manifestation.uuid, manifestation.clone());
        Ok(())
    }

    fn delete_manifestation(&mut self, uuid: Uuid) -> Result<()> {
        self.manifestations.remove(&uuid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Counter;

    #[test]
    fn test_index_titles_only_adds_new_counters() {
        let mut index = InMemoryMatchIndex::new();
        let mut cluster = FrbrCluster {
            uuid: Uuid::new_v4(),
            ..FrbrCluster::default()
        };
        cluster.titles.insert("NEW".into(), Counter::with_count(1));
        let mut seen = Counter::with_count(1);
        seen.add(1);
        cluster.titles.insert("SEEN".into(), seen);

        index.index_titles(&cluster).unwrap();

        assert_eq!(
            index.candidates_by_title(&["NEW"]).unwrap(),
            BTreeSet::from([cluster.uuid])
        );
        assert!(index.candidates_by_title(&["SEEN"]).unwrap().is_empty());
    }

    #[test]
    fn test_unindex_removes_empty_buckets() {
        let mut index = InMemoryMatchIndex::new();
        let uuid = Uuid::new_v4();
        index.index_title("T", uuid).unwrap();
        index.unindex_title("T", uuid).unwrap();
        assert_eq!(index.title_entries().count(), 0);
        index.unindex_title("MISSING", uuid).unwrap();
    }

    #[test]
    fn test_missing_lookups_are_not_errors() {
        let index = InMemoryMatchIndex::new();
        assert!(index.get(Uuid::new_v4()).unwrap().is_none());
        assert!(index
            .get_match_fingerprints_by_raw_record_id("nope")
            .unwrap()
            .is_none());
        assert!(index.candidates_by_title(&["X"]).unwrap().is_empty());
    }
}
