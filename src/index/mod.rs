//! The match index: clusters by UUID, titles to cluster UUIDs, raw record ids
//! to match fingerprints, and manifestations by UUID.
//!
//! [`MatchIndex`] is the only way the match engine touches persistent state.
//! Two implementations exist: [`InMemoryMatchIndex`] for tests and initial
//! imports, and [`KvMatchIndex`] over any [`KeyValueStore`]. [`AnyMatchIndex`]
//! picks one from configuration.

pub mod kv;
pub mod memory;

pub use kv::{KeyValueStore, KvMatchIndex, MemoryKeyValueStore, Namespace};
pub use memory::InMemoryMatchIndex;

use crate::cluster::{FrbrCluster, FrbrManifestation, MatchFingerprints};
use crate::config::{IndexBackend, IndexConfig};
use crate::error::{FrbrError, Result};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Persistent indexes the match engine reads and writes.
///
/// Implementations must give read-your-writes consistency within one
/// record's processing. A lookup that finds nothing returns `Ok(None)` or an
/// empty set; only backing-store failures are errors.
pub trait MatchIndex {
    /// Union of the cluster UUIDs indexed under any of `titles`.
    fn candidates_by_title(&self, titles: &[&str]) -> Result<BTreeSet<Uuid>>;

    /// Load a cluster.
    fn get(&self, uuid: Uuid) -> Result<Option<FrbrCluster>>;

    /// Store a cluster under its UUID.
    fn put(&mut self, cluster: &FrbrCluster) -> Result<()>;

    /// Remove a cluster record.
    fn delete(&mut self, uuid: Uuid) -> Result<()>;

    /// Add the cluster's UUID under every title whose counter is new.
    fn index_titles(&mut self, cluster: &FrbrCluster) -> Result<()> {
        for title in cluster.new_title_keys() {
            self.index_title(title, cluster.uuid)?;
        }
        Ok(())
    }

    /// Remove the cluster's UUID from every title it holds.
    fn unindex_titles_before_merge(&mut self, cluster: &FrbrCluster) -> Result<()> {
        for title in cluster.title_keys() {
            self.unindex_title(title, cluster.uuid)?;
        }
        Ok(())
    }

    /// Add one title -> cluster entry.
    fn index_title(&mut self, title: &str, uuid: Uuid) -> Result<()>;

    /// Remove one title -> cluster entry.
    fn unindex_title(&mut self, title: &str, uuid: Uuid) -> Result<()>;

    /// Current fingerprints of a raw record.
    fn get_match_fingerprints_by_raw_record_id(
        &self,
        raw_record_id: &str,
    ) -> Result<Option<MatchFingerprints>>;

    /// Point a raw record at its fingerprints and owners.
    fn set_match_fingerprints_by_raw_record_id(
        &mut self,
        raw_record_id: &str,
        fingerprints: &MatchFingerprints,
    ) -> Result<()>;

    /// Forget a raw record.
    fn delete_match_fingerprints_by_raw_record_id(&mut self, raw_record_id: &str) -> Result<()>;

    /// Load a manifestation.
    fn get_manifestation(&self, uuid: Uuid) -> Result<Option<FrbrManifestation>>;

    /// Store a manifestation under its UUID.
    fn put_manifestation(&mut self, manifestation: &FrbrManifestation) -> Result<()>;

    /// Remove a manifestation record.
    fn delete_manifestation(&mut self, uuid: Uuid) -> Result<()>;

    /// Load several clusters; missing ones come back as `None`.
    fn get_many(&self, uuids: &[Uuid]) -> Result<Vec<Option<FrbrCluster>>> {
        uuids.iter().map(|uuid| self.get(*uuid)).collect()
    }

    /// Load several manifestations; missing ones come back as `None`.
    fn get_manifestations(&self, uuids: &[Uuid]) -> Result<Vec<Option<FrbrManifestation>>> {
        uuids
            .iter()
            .map(|uuid| self.get_manifestation(*uuid))
            .collect()
    }
}

/// Index backend chosen by configuration.
pub enum AnyMatchIndex {
    /// In-process maps
    Memory(InMemoryMatchIndex),
    /// Key-value store client
    KeyValue(KvMatchIndex<Box<dyn KeyValueStore + Send>>),
}

impl std::fmt::Debug for AnyMatchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnyMatchIndex::Memory(_) => f.write_str("AnyMatchIndex::Memory"),
            AnyMatchIndex::KeyValue(_) => f.write_str("AnyMatchIndex::KeyValue"),
        }
    }
}

impl AnyMatchIndex {
    /// Build the configured backend.
    ///
    /// # Errors
    ///
    /// `Config` when the key-value backend is selected without a store.
    pub fn from_config(
        config: &IndexConfig,
        store: Option<Box<dyn KeyValueStore + Send>>,
    ) -> Result<Self> {
        match (config.backend, store) {
            (IndexBackend::Memory, _) => Ok(AnyMatchIndex::Memory(InMemoryMatchIndex::new())),
            (IndexBackend::KeyValue, Some(store)) => Ok(AnyMatchIndex::KeyValue(KvMatchIndex::new(store))),
            (IndexBackend::KeyValue, None) => Err(FrbrError::Config(
                "index.backend = \"key_value\" requires a store client".to_string(),
            )),
        }
    }

    fn inner(&self) -> &dyn MatchIndex {
        match self {
            AnyMatchIndex::Memory(index) => index,
            AnyMatchIndex::KeyValue(index) => index,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn MatchIndex {
        match self {
            AnyMatchIndex::Memory(index) => index,
            AnyMatchIndex::KeyValue(index) => index,
        }
    }
}

impl MatchIndex for AnyMatchIndex {
    fn candidates_by_title(&self, titles: &[&str]) -> Result<BTreeSet<Uuid>> {
        self.inner().candidates_by_title(titles)
    }

    fn get(&self, uuid: Uuid) -> Result<Option<FrbrCluster>> {
        self.inner().get(uuid)
    }

    fn put(&mut self, cluster: &FrbrCluster) -> Result<()> {
        self.inner_mut().put(cluster)
    }

    fn delete(&mut self, uuid: Uuid) -> Result<()> {
        self.inner_mut().delete(uuid)
    }

    fn index_title(&mut self, title: &str, uuid: Uuid) -> Result<()> {
        self.inner_mut().index_title(title, uuid)
    }

    fn unindex_title(&mut self, title: &str, uuid: Uuid) -> Result<()> {
        self.inner_mut().unindex_title(title, uuid)
    }

    fn get_match_fingerprints_by_raw_record_id(
        &self,
        raw_record_id: &str,
    ) -> Result<Option<MatchFingerprints>> {
        self.inner()
            .get_match_fingerprints_by_raw_record_id(raw_record_id)
    }

    fn set_match_fingerprints_by_raw_record_id(
        &mut self,
        raw_record_id: &str,
        fingerprints: &MatchFingerprints,
    ) -> Result<()> {
        self.inner_mut()
            .set_match_fingerprints_by_raw_record_id(raw_record_id, fingerprints)
    }

    fn delete_match_fingerprints_by_raw_record_id(&mut self, raw_record_id: &str) -> Result<()> {
        self.inner_mut()
            .delete_match_fingerprints_by_raw_record_id(raw_record_id)
    }

    fn get_manifestation(&self, uuid: Uuid) -> Result<Option<FrbrManifestation>> {
        self.inner().get_manifestation(uuid)
    }

    fn put_manifestation(&mut self, manifestation: &FrbrManifestation) -> Result<()> {
        self.inner_mut().put_manifestation(manifestation)
    }

    fn delete_manifestation(&mut self, uuid: Uuid) -> Result<()> {
        self.inner_mut().delete_manifestation(uuid)
    }
}
