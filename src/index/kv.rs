//! Match index over a key-value store.
//!
//! Values are MessagePack (`rmp-serde`) encoded. Keys are prefixed by
//! [`Namespace`]; the title namespace holds sets of cluster UUIDs.

use crate::cluster::{FrbrCluster, FrbrManifestation, MatchFingerprints};
use crate::error::{FrbrError, Result};
use crate::index::MatchIndex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::trace;
use uuid::Uuid;

/// Logical key spaces of the match index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Cluster UUID -> encoded cluster
    ClusterByUuid,
    /// Normalized title -> set of cluster UUIDs
    TitleToClusters,
    /// Raw record id -> encoded match fingerprints
    RawRecordFingerprints,
    /// Manifestation UUID -> encoded manifestation
    ManifestationByUuid,
}

impl Namespace {
    /// Key prefix.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Namespace::ClusterByUuid => "frbr:cluster:",
            Namespace::TitleToClusters => "frbr:title:",
            Namespace::RawRecordFingerprints => "frbr:raw:",
            Namespace::ManifestationByUuid => "frbr:manifestation:",
        }
    }

    /// Full key for `id` in this namespace.
    #[must_use]
    pub fn key(self, id: &str) -> String {
        format!("{}{id}", self.prefix())
    }
}

/// Minimal client contract of the backing store: byte values plus string
/// sets, the subset of a Redis-style API the index uses.
pub trait KeyValueStore {
    /// Read a value.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Read several values in one round trip.
    fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    /// Write a value.
    fn set(&mut self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove a value or set.
    fn delete(&mut self, key: &str) -> Result<()>;

    /// Add a member to a set.
    fn sadd(&mut self, key: &str, member: &str) -> Result<()>;

    /// Remove a member from a set; an emptied set disappears.
    fn srem(&mut self, key: &str, member: &str) -> Result<()>;

    /// Union of several sets in one round trip.
    fn sunion(&self, keys: &[String]) -> Result<BTreeSet<String>>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Box<S> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        (**self).mget(keys)
    }

    fn set(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        (**self).set(key, value)
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn sadd(&mut self, key: &str, member: &str) -> Result<()> {
        (**self).sadd(key, member)
    }

    fn srem(&mut self, key: &str, member: &str) -> Result<()> {
        (**self).srem(key, member)
    }

    fn sunion(&self, keys: &[String]) -> Result<BTreeSet<String>> {
        (**self).sunion(keys)
    }
}

/// In-process [`KeyValueStore`], with a switch that makes every call fail.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    values: HashMap<String, Vec<u8>>,
    sets: HashMap<String, BTreeSet<String>>,
    unavailable: bool,
}

impl MemoryKeyValueStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        MemoryKeyValueStore::default()
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_unavailable(&mut self, unavailable: bool) {
        self.unavailable = unavailable;
    }

    /// Number of plain values held.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    fn check(&self) -> Result<()> {
        if self.unavailable {
            Err(FrbrError::Store("key-value store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        Ok(self.values.get(key).cloned())
    }

    fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.check()?;
        Ok(keys.iter().map(|key| self.values.get(key).cloned()).collect())
    }

    fn set(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        self.check()?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.check()?;
        self.values.remove(key);
        self.sets.remove(key);
        Ok(())
    }

    fn sadd(&mut self, key: &str, member: &str) -> Result<()> {
        self.check()?;
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    fn srem(&mut self, key: &str, member: &str) -> Result<()> {
        self.check()?;
        if let Some(members) = self.sets.get_mut(key) {
            members.remove(member);
            if members.is_empty() {
                self.sets.remove(key);
            }
        }
        Ok(())
    }

    fn sunion(&self, keys: &[String]) -> Result<BTreeSet<String>> {
        self.check()?;
        Ok(keys
            .iter()
            .filter_map(|key| self.sets.get(key))
            .flatten()
            .cloned()
            .collect())
    }
}

/// [`MatchIndex`] stored in a [`KeyValueStore`].
#[derive(Debug, Clone, Default)]
pub struct KvMatchIndex<S> {
    store: S,
}

impl<S: KeyValueStore> KvMatchIndex<S> {
    /// Index over `store`.
    pub fn new(store: S) -> Self {
        KvMatchIndex { store }
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The backing store, mutably.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    fn read<T: DeserializeOwned>(&self, namespace: Namespace, id: &str) -> Result<Option<T>> {
        self.store
            .get(&namespace.key(id))?
            .map(|bytes| rmp_serde::from_slice(&bytes).map_err(FrbrError::from))
            .transpose()
    }

    fn read_many<T: DeserializeOwned>(&self, namespace: Namespace, ids: &[String]) -> Result<Vec<Option<T>>> {
        let keys: Vec<String> = ids.iter().map(|id| namespace.key(id)).collect();
        self.store
            .mget(&keys)?
            .into_iter()
            .map(|value| {
                value
                    .map(|bytes| rmp_serde::from_slice(&bytes).map_err(FrbrError::from))
                    .transpose()
            })
            .collect()
    }

    fn write<T: Serialize>(&mut self, namespace: Namespace, id: &str, value: &T) -> Result<()> {
        let bytes = rmp_serde::to_vec_named(value)?;
        trace!(namespace = namespace.prefix(), id, bytes = bytes.len(), "store write");
        self.store.set(&namespace.key(id), bytes)
    }
}

impl<S: KeyValueStore> MatchIndex for KvMatchIndex<S> {
    fn candidates_by_title(&self, titles: &[&str]) -> Result<BTreeSet<Uuid>> {
        let keys: Vec<String> = titles
            .iter()
            .map(|title| Namespace::TitleToClusters.key(title))
            .collect();
        self.store
            .sunion(&keys)?
            .iter()
            .map(|member| {
                Uuid::parse_str(member)
                    .map_err(|err| FrbrError::Decode(format!("title member {member}: {err}")))
            })
            .collect()
    }

    fn get(&self, uuid: Uuid) -> Result<Option<FrbrCluster>> {
        self.read(Namespace::ClusterByUuid, &uuid.to_string())
    }

    fn put(&mut self, cluster: &FrbrCluster) -> Result<()> {
        self.write(Namespace::ClusterByUuid, &cluster.uuid.to_string(), cluster)
    }

    fn delete(&mut self, uuid: Uuid) -> Result<()> {
        self.store
            .delete(&Namespace::ClusterByUuid.key(&uuid.to_string()))
    }

    fn index_title(&mut self, title: &str, uuid: Uuid) -> Result<()> {
        self.store
            .sadd(&Namespace::TitleToClusters.key(title), &uuid.to_string())
    }

    fn unindex_title(&mut self, title: &str, uuid: Uuid) -> Result<()> {
        self.store
            .srem(&Namespace::TitleToClusters.key(title), &uuid.to_string())
    }

    fn get_match_fingerprints_by_raw_record_id(
        &self,
        raw_record_id: &str,
    ) -> Result<Option<MatchFingerprints>> {
        self.read(Namespace::RawRecordFingerprints, raw_record_id)
    }

    fn set_match_fingerprints_by_raw_record_id(
        &mut self,
        raw_record_id: &str,
        fingerprints: &MatchFingerprints,
    ) -> Result<()> {
        self.write(Namespace::RawRecordFingerprints, raw_record_id, fingerprints)
    }

    fn delete_match_fingerprints_by_raw_record_id(&mut self, raw_record_id: &str) -> Result<()> {
        self.store
            .delete(&Namespace::RawRecordFingerprints.key(raw_record_id))
    }

    fn get_manifestation(&self, uuid: Uuid) -> Result<Option<FrbrManifestation>> {
        self.read(Namespace::ManifestationByUuid, &uuid.to_string())
    }

    fn put_manifestation(&mut self, manifestation: &FrbrManifestation) -> Result<()> {
        self.write(
            Namespace::ManifestationByUuid,
            &manifestation.uuid.to_string(),
            manifestation,
        )
    }

    fn delete_manifestation(&mut self, uuid: Uuid) -> Result<()> {
        self.store
            .delete(&Namespace::ManifestationByUuid.key(&uuid.to_string()))
    }

    fn get_many(&self, uuids: &[Uuid]) -> Result<Vec<Option<FrbrCluster>>> {
        let ids: Vec<String> = uuids.iter().map(Uuid::to_string).collect();
        self.read_many(Namespace::ClusterByUuid, &ids)
    }

    fn get_manifestations(&self, uuids: &[Uuid]) -> Result<Vec<Option<FrbrManifestation>>> {
        let ids: Vec<String> = uuids.iter().map(Uuid::to_string).collect();
        self.read_many(Namespace::ManifestationByUuid, &ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Counter, ExpressionTuple, FrbrExpression};

    fn sample_cluster() -> FrbrCluster {
        let mut cluster = FrbrCluster {
            uuid: Uuid::new_v4(),
            ..FrbrCluster::default()
        };
        cluster
            .titles
            .insert("FERDYDURKE".into(), Counter::with_count(1));
        cluster.insert_expression(FrbrExpression::new(ExpressionTuple {
            language: "pol".into(),
            translators: BTreeSet::from(["KOT EWA".to_string()]),
            leader_type: 'a',
        }));
        cluster.refresh_work_fingerprint();
        cluster
    }

    #[test]
    fn test_cluster_survives_encoding() {
        let mut index = KvMatchIndex::new(MemoryKeyValueStore::new());
        let cluster = sample_cluster();
        index.put(&cluster).unwrap();
        assert_eq!(index.get(cluster.uuid).unwrap(), Some(cluster.clone()));
        assert_eq!(index.get_many(&[cluster.uuid, Uuid::nil()]).unwrap()[1], None);
    }

    #[test]
    fn test_title_sets() {
        let mut index = KvMatchIndex::new(MemoryKeyValueStore::new());
        let cluster = sample_cluster();
        index.index_titles(&cluster).unwrap();
        assert_eq!(
            index.candidates_by_title(&["FERDYDURKE", "OTHER"]).unwrap(),
            BTreeSet::from([cluster.uuid])
        );
        index.unindex_titles_before_merge(&cluster).unwrap();
        assert!(index.candidates_by_title(&["FERDYDURKE"]).unwrap().is_empty());
    }

    #[test]
    fn test_unavailable_store_fails() {
        let mut index = KvMatchIndex::new(MemoryKeyValueStore::new());
        index.store_mut().set_unavailable(true);
        assert!(matches!(
            index.get(Uuid::new_v4()),
            Err(FrbrError::Store(_))
        ));
    }

    #[test]
    fn test_corrupt_value_is_decode_error() {
        let mut index = KvMatchIndex::new(MemoryKeyValueStore::new());
        let uuid = Uuid::new_v4();
        index
            .store_mut()
            .set(&Namespace::ClusterByUuid.key(&uuid.to_string()), vec![0xc1])
            .unwrap();
        assert!(matches!(index.get(uuid), Err(FrbrError::Decode(_))));
    }
}
