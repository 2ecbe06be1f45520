//! Cluster matching, merging and re-indexing.
//!
//! [`ClusterMatchEngine::match_and_index`] takes the stub built from one raw
//! record and either promotes it to a new cluster or folds it into every
//! cluster it matches. Matching is by title-index candidates whose creator
//! sets equal the stub's, or where neither side has any creator.
//!
//! With several matches the fold is left to right over the candidates in
//! UUID order: the stub goes into the first match, that cluster into the
//! second, and so on. The last cluster survives; the others are deleted and
//! expressions that lose their identity in the process are reported so their
//! search documents can be removed.
//!
//! Every step is computed in memory and written to the index at commit
//! points: the end of a promotion and the end of each merge step.

use crate::cluster::items::{detach_raw_record, merge_items, FrbrItem, ItemConversionTable};
use crate::cluster::{
    Counter, FrbrCluster, FrbrExpression, FrbrManifestation, ManifestationRef, MatchFingerprints,
};
use crate::error::{FrbrError, Result};
use crate::fingerprint::ClusterMatchData;
use crate::index::MatchIndex;
use crate::normalize::char_slice;
use crate::record::Record;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// A not yet indexed cluster for one raw record, with its match data.
#[derive(Debug, Clone)]
pub struct Stub {
    /// Stub cluster (`stub == true`, counters at 1, no expressions)
    pub cluster: FrbrCluster,
    /// Match data the stub was built from
    pub data: ClusterMatchData,
}

impl Stub {
    /// Build a stub from derived match data.
    #[must_use]
    pub fn new(data: ClusterMatchData) -> Self {
        Stub {
            cluster: FrbrCluster::stub(&data),
            data,
        }
    }

    /// Raw record id of the stub's only record.
    #[must_use]
    pub fn raw_record_id(&self) -> &str {
        &self.data.raw_record_id
    }
}

/// What withdrawing a raw record changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Withdrawal {
    /// Cluster that held the record
    pub cluster: Uuid,
    /// The cluster had no other records and was deleted
    pub cluster_removed: bool,
    /// Expressions left empty and removed
    pub deleted_expressions: Vec<Uuid>,
    /// The record's manifestation, already removed from the store
    pub manifestation: FrbrManifestation,
}

/// Result of [`ClusterMatchEngine::match_and_index`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    /// Clusters written, in fold order; the last one survives
    pub touched_clusters: Vec<Uuid>,
    /// Expressions whose identity did not survive a merge
    pub deleted_expressions: Vec<Uuid>,
    /// Earlier contribution of the same raw record, withdrawn before matching
    pub withdrawal: Option<Withdrawal>,
}

impl MatchOutcome {
    /// Cluster holding the record after processing.
    #[must_use]
    pub fn survivor(&self) -> Option<Uuid> {
        self.touched_clusters.last().copied()
    }

    /// Clusters folded into the survivor and deleted.
    #[must_use]
    pub fn merged_away(&self) -> &[Uuid] {
        match self.touched_clusters.split_last() {
            Some((_, rest)) => rest,
            None => &[],
        }
    }
}

/// Matches stubs against a [`MatchIndex`] and keeps it consistent.
#[derive(Debug)]
pub struct ClusterMatchEngine<I> {
    index: I,
    items: ItemConversionTable,
    initial_import: bool,
}

impl<I: MatchIndex> ClusterMatchEngine<I> {
    /// Engine over `index`, building items with `items`.
    pub fn new(index: I, items: ItemConversionTable) -> Self {
        ClusterMatchEngine {
            index,
            items,
            initial_import: false,
        }
    }

    /// Skip the re-delivery check (every raw record is assumed new).
    #[must_use]
    pub fn with_initial_import(mut self, initial_import: bool) -> Self {
        self.initial_import = initial_import;
        self
    }

    /// The underlying index.
    pub fn index(&self) -> &I {
        &self.index
    }

    /// The underlying index, mutably.
    pub fn index_mut(&mut self) -> &mut I {
        &mut self.index
    }

    /// Give back the index.
    pub fn into_index(self) -> I {
        self.index
    }

    /// The item conversion table.
    pub fn items(&self) -> &ItemConversionTable {
        &self.items
    }

    /// Match a stub and write the result to the index.
    ///
    /// A raw record already in the index with unchanged work and expression
    /// fingerprints is refreshed in place. With changed fingerprints its old
    /// contribution is withdrawn first and it is matched like a new record.
    ///
    /// # Errors
    ///
    /// Consistency errors when the index references missing clusters,
    /// expressions or manifestations; store errors from the backend.
    #[instrument(level = "debug", skip_all, fields(raw_record_id = %stub.data.raw_record_id))]
    pub fn match_and_index(&mut self, stub: Stub, record: &Record) -> Result<MatchOutcome> {
        let mut withdrawal = None;
        if !self.initial_import {
            if let Some(previous) = self
                .index
                .get_match_fingerprints_by_raw_record_id(&stub.data.raw_record_id)?
            {
                if previous.work_fingerprint == stub.data.work_fingerprint
                    && previous.expression_fingerprint == stub.data.expression_fingerprint
                {
                    return self.refresh_in_place(&previous, &stub.data, record);
                }
                debug!(cluster = %previous.cluster, "match data changed, withdrawing");
                withdrawal = self.withdraw_raw_record(&stub.data.raw_record_id)?;
            }
        }

        let previous_manifestation = withdrawal.as_ref().map(|w| &w.manifestation);
        let manifestation = self.build_manifestation(&stub.data, record, previous_manifestation);
        let matches = self.find_matches(&stub.cluster)?;
        let mut outcome = if matches.is_empty() {
            self.promote(stub, manifestation)?
        } else {
            self.merge_stub(stub, manifestation, matches)?
        };
        outcome.withdrawal = withdrawal;
        Ok(outcome)
    }

    /// Candidate clusters sharing a title with `stub` whose creators match.
    fn find_matches(&self, stub: &FrbrCluster) -> Result<Vec<FrbrCluster>> {
        let titles: Vec<&str> = stub.title_keys().collect();
        let candidates: Vec<Uuid> = self
            .index
            .candidates_by_title(&titles)?
            .into_iter()
            .filter(|uuid| *uuid != stub.uuid)
            .collect();
        let loaded = self.index.get_many(&candidates)?;

        let mut matches = Vec::new();
        for (uuid, candidate) in candidates.iter().zip(loaded) {
            match candidate {
                Some(candidate) if candidate.creators_match(stub) => matches.push(candidate),
                Some(_) => {},
                None => debug!(cluster = %uuid, "title index names a missing cluster"),
            }
        }
        debug!(
            candidates = candidates.len(),
            matches = matches.len(),
            "candidate generation"
        );
        Ok(matches)
    }

    fn promote(&mut self, stub: Stub, manifestation: FrbrManifestation) -> Result<MatchOutcome> {
        let Stub { mut cluster, data } = stub;
        let mut expression = FrbrExpression::new(data.expression_tuple.clone());
        expression.add_manifestation(
            manifestation.uuid,
            &data.raw_record_id,
            data.expression_data.clone(),
        );
        let expression_uuid = expression.uuid;
        cluster.insert_expression(expression);
        cluster.manifestations_by_raw_record_id.insert(
            data.raw_record_id.clone(),
            ManifestationRef {
                uuid: manifestation.uuid,
                fingerprint: data.manifestation_fingerprint.clone(),
            },
        );
        cluster.stub = false;
        cluster.refresh_work_fingerprint();

        self.index.put_manifestation(&manifestation)?;
        self.index.put(&cluster)?;
        self.index.index_titles(&cluster)?;
        self.index.set_match_fingerprints_by_raw_record_id(
            &data.raw_record_id,
            &fingerprints(&data, cluster.uuid, expression_uuid, manifestation.uuid),
        )?;
        info!(cluster = %cluster.uuid, raw_record_id = %data.raw_record_id, "new cluster");
        Ok(MatchOutcome {
            touched_clusters: vec![cluster.uuid],
            ..MatchOutcome::default()
        })
    }

    fn merge_stub(
        &mut self,
        stub: Stub,
        manifestation: FrbrManifestation,
        matches: Vec<FrbrCluster>,
    ) -> Result<MatchOutcome> {
        let mut matches = matches.into_iter();
        let Some(mut target) = matches.next() else {
            return self.promote(stub, manifestation);
        };
        self.merge_stub_into(stub, manifestation, &mut target)?;

        let mut touched = Vec::new();
        let mut orphaned = Vec::new();
        for mut next in matches {
            touched.push(target.uuid);
            orphaned.extend(self.merge_indexed_into(target, &mut next)?);
            target = next;
        }
        touched.push(target.uuid);
        if touched.len() > 1 {
            info!(
                survivor = %target.uuid,
                merged = touched.len() - 1,
                orphaned_expressions = orphaned.len(),
                "multi-way merge"
            );
        }
        Ok(MatchOutcome {
            touched_clusters: touched,
            deleted_expressions: orphaned,
            withdrawal: None,
        })
    }

    /// Fold a stub into an indexed cluster and commit.
    fn merge_stub_into(
        &mut self,
        stub: Stub,
        manifestation: FrbrManifestation,
        target: &mut FrbrCluster,
    ) -> Result<()> {
        let Stub { cluster: source, data } = stub;
        target.absorb_counts(&source);
        target.manifestations_by_raw_record_id.insert(
            data.raw_record_id.clone(),
            ManifestationRef {
                uuid: manifestation.uuid,
                fingerprint: data.manifestation_fingerprint.clone(),
            },
        );

        let expression_uuid = match target
            .expressions_by_distinctive_tuple
            .get(&data.expression_tuple)
            .copied()
        {
            Some(uuid) => {
                let expression = target.expressions.get_mut(&uuid).ok_or(
                    FrbrError::ExpressionNotFound {
                        cluster: target.uuid,
                        expression: uuid,
                    },
                )?;
                expression.add_manifestation(
                    manifestation.uuid,
                    &data.raw_record_id,
                    data.expression_data.clone(),
                );
                uuid
            },
            None => {
                let mut expression = FrbrExpression::new(data.expression_tuple.clone());
                expression.add_manifestation(
                    manifestation.uuid,
                    &data.raw_record_id,
                    data.expression_data.clone(),
                );
                let uuid = expression.uuid;
                target.insert_expression(expression);
                uuid
            },
        };
        target.refresh_work_fingerprint();

        self.index.put_manifestation(&manifestation)?;
        self.index.put(target)?;
        self.index.index_titles(target)?;
        self.index.set_match_fingerprints_by_raw_record_id(
            &data.raw_record_id,
            &fingerprints(&data, target.uuid, expression_uuid, manifestation.uuid),
        )?;
        debug!(cluster = %target.uuid, raw_record_id = %data.raw_record_id, "stub merged");
        Ok(())
    }

    /// Fold an indexed cluster into another and commit, deleting the source.
    ///
    /// Returns the source expressions absorbed into same-tuple expressions of
    /// the target.
    fn merge_indexed_into(&mut self, source: FrbrCluster, target: &mut FrbrCluster) -> Result<Vec<Uuid>> {
        self.index.unindex_titles_before_merge(&source)?;
        target.absorb_counts(&source);
        let moved_records: Vec<String> = source.raw_records.keys().cloned().collect();

        let FrbrCluster {
            uuid: source_uuid,
            mut expressions,
            expressions_by_distinctive_tuple,
            ..
        } = source;

        let mut orphaned = Vec::new();
        for (tuple, expression_uuid) in expressions_by_distinctive_tuple {
            let expression = expressions
                .remove(&expression_uuid)
                .ok_or(FrbrError::ExpressionNotFound {
                    cluster: source_uuid,
                    expression: expression_uuid,
                })?;
            match target.expressions_by_distinctive_tuple.get(&tuple).copied() {
                Some(existing) => {
                    target
                        .expressions
                        .get_mut(&existing)
                        .ok_or(FrbrError::ExpressionNotFound {
                            cluster: target.uuid,
                            expression: existing,
                        })?
                        .absorb(expression);
                    orphaned.push(expression_uuid);
                },
                None => target.insert_expression(expression),
            }
        }
        target.refresh_work_fingerprint();

        self.index.put(target)?;
        self.index.index_titles(target)?;
        for raw_record_id in &moved_records {
            self.repoint_raw_record(raw_record_id, target)?;
        }
        self.index.delete(source_uuid)?;
        debug!(source = %source_uuid, target = %target.uuid, "cluster merged");
        Ok(orphaned)
    }

    fn repoint_raw_record(&mut self, raw_record_id: &str, owner: &FrbrCluster) -> Result<()> {
        let Some(mut current) = self
            .index
            .get_match_fingerprints_by_raw_record_id(raw_record_id)?
        else {
            warn!(raw_record_id, cluster = %owner.uuid, "moved raw record has no fingerprints");
            return Ok(());
        };
        current.cluster = owner.uuid;
        if let Some(expression) = owner.expression_of(raw_record_id) {
            current.expression = expression.uuid;
        }
        self.index
            .set_match_fingerprints_by_raw_record_id(raw_record_id, &current)
    }

    /// Re-delivery with unchanged match data: rebuild the manifestation (same
    /// UUID) and the record's expression data inside the owning cluster.
    fn refresh_in_place(
        &mut self,
        previous: &MatchFingerprints,
        data: &ClusterMatchData,
        record: &Record,
    ) -> Result<MatchOutcome> {
        let mut cluster = self
            .index
            .get(previous.cluster)?
            .ok_or(FrbrError::ClusterNotFound(previous.cluster))?;
        let old = self
            .index
            .get_manifestation(previous.manifestation)?
            .ok_or(FrbrError::ManifestationNotFound(previous.manifestation))?;
        let manifestation = self.build_manifestation(data, record, Some(&old));

        let cluster_uuid = cluster.uuid;
        cluster
            .expressions
            .get_mut(&previous.expression)
            .ok_or(FrbrError::ExpressionNotFound {
                cluster: cluster_uuid,
                expression: previous.expression,
            })?
            .expression_data
            .insert(data.raw_record_id.clone(), data.expression_data.clone());
        cluster.manifestations_by_raw_record_id.insert(
            data.raw_record_id.clone(),
            ManifestationRef {
                uuid: manifestation.uuid,
                fingerprint: data.manifestation_fingerprint.clone(),
            },
        );

        self.index.put_manifestation(&manifestation)?;
        self.index.put(&cluster)?;
        self.index.set_match_fingerprints_by_raw_record_id(
            &data.raw_record_id,
            &MatchFingerprints {
                manifestation_fingerprint: data.manifestation_fingerprint.clone(),
                ..previous.clone()
            },
        )?;
        debug!(cluster = %cluster.uuid, "refreshed in place");
        Ok(MatchOutcome {
            touched_clusters: vec![cluster.uuid],
            ..MatchOutcome::default()
        })
    }

    /// Remove everything a raw record contributed.
    ///
    /// Returns `None` when the record is not indexed.
    ///
    /// # Errors
    ///
    /// Consistency errors when the owning cluster, its expression or the
    /// manifestation are missing; store errors from the backend.
    pub fn withdraw_raw_record(&mut self, raw_record_id: &str) -> Result<Option<Withdrawal>> {
        let Some(current) = self
            .index
            .get_match_fingerprints_by_raw_record_id(raw_record_id)?
        else {
            return Ok(None);
        };
        let mut cluster = self
            .index
            .get(current.cluster)?
            .ok_or(FrbrError::ClusterNotFound(current.cluster))?;
        let contribution =
            cluster
                .raw_records
                .remove(raw_record_id)
                .ok_or_else(|| FrbrError::RawRecordNotInCluster {
                    raw_record_id: raw_record_id.to_string(),
                    cluster: cluster.uuid,
                })?;

        let manifestation_ref = cluster.manifestations_by_raw_record_id.remove(raw_record_id);
        let manifestation_uuid = manifestation_ref.map_or(current.manifestation, |r| r.uuid);
        let cluster_uuid = cluster.uuid;
        let expression = cluster
            .expressions
            .get_mut(&current.expression)
            .ok_or(FrbrError::ExpressionNotFound {
                cluster: cluster_uuid,
                expression: current.expression,
            })?;
        let manifestation = self
            .index
            .get_manifestation(manifestation_uuid)?
            .ok_or(FrbrError::ManifestationNotFound(manifestation_uuid))?;

        let mut deleted_expressions = Vec::new();
        expression.manifestations.remove(&manifestation_uuid);
        expression.expression_data.remove(raw_record_id);
        if expression.manifestations.is_empty() {
            let tuple = expression.distinctive_tuple.clone();
            cluster.expressions.remove(&current.expression);
            cluster.expressions_by_distinctive_tuple.remove(&tuple);
            deleted_expressions.push(current.expression);
        }
        // no index writes above this point
        for title in &contribution.titles {
            if subtract_one(&mut cluster.titles, title) {
                self.index.unindex_title(title, cluster_uuid)?;
            }
        }
        for creator in &contribution.main_creator {
            subtract_one(&mut cluster.main_creator, creator);
        }
        for creator in &contribution.other_creator {
            subtract_one(&mut cluster.other_creator, creator);
        }

        self.index.delete_manifestation(manifestation_uuid)?;
        self.index
            .delete_match_fingerprints_by_raw_record_id(raw_record_id)?;

        let cluster_removed = cluster.raw_records.is_empty();
        if cluster_removed {
            self.index.unindex_titles_before_merge(&cluster)?;
            self.index.delete(cluster.uuid)?;
        } else {
            cluster.refresh_work_fingerprint();
            self.index.put(&cluster)?;
        }
        info!(
            cluster = %cluster.uuid,
            raw_record_id,
            cluster_removed,
            "raw record withdrawn"
        );
        Ok(Some(Withdrawal {
            cluster: cluster.uuid,
            cluster_removed,
            deleted_expressions,
            manifestation,
        }))
    }

    /// Attach items from a secondary source onto the manifestation of a
    /// primary raw record. Returns the owning cluster, or `None` when the
    /// primary record is not indexed.
    ///
    /// # Errors
    ///
    /// `ManifestationNotFound` when the index points at a missing
    /// manifestation; store errors from the backend.
    pub fn attach_items(
        &mut self,
        primary_raw_record_id: &str,
        items: BTreeMap<String, FrbrItem>,
    ) -> Result<Option<Uuid>> {
        self.update_items(primary_raw_record_id, |held| merge_items(held, items))
    }

    /// Remove the items a secondary source raw record attached to a primary
    /// record's manifestation.
    ///
    /// # Errors
    ///
    /// As [`ClusterMatchEngine::attach_items`].
    pub fn detach_items(
        &mut self,
        primary_raw_record_id: &str,
        source_raw_record_id: &str,
    ) -> Result<Option<Uuid>> {
        self.update_items(primary_raw_record_id, |held| {
            detach_raw_record(held, source_raw_record_id);
        })
    }

    fn update_items(
        &mut self,
        primary_raw_record_id: &str,
        change: impl FnOnce(&mut BTreeMap<String, FrbrItem>),
    ) -> Result<Option<Uuid>> {
        let Some(current) = self
            .index
            .get_match_fingerprints_by_raw_record_id(primary_raw_record_id)?
        else {
            debug!(primary_raw_record_id, "item target not indexed");
            return Ok(None);
        };
        let mut manifestation = self
            .index
            .get_manifestation(current.manifestation)?
            .ok_or(FrbrError::ManifestationNotFound(current.manifestation))?;
        change(&mut manifestation.items_by_institution_code);
        self.index.put_manifestation(&manifestation)?;
        Ok(Some(current.cluster))
    }

    /// Manifestation for a raw record. When the record had a manifestation
    /// before, its UUID, its item UUIDs and the items other sources attached
    /// to it carry over.
    fn build_manifestation(
        &self,
        data: &ClusterMatchData,
        record: &Record,
        previous: Option<&FrbrManifestation>,
    ) -> FrbrManifestation {
        let mut items = self.items.build_items(record, &data.raw_record_id);
        let mut uuid = Uuid::new_v4();
        if let Some(previous) = previous {
            uuid = previous.uuid;
            let mut carried = previous.items_by_institution_code.clone();
            detach_raw_record(&mut carried, &data.raw_record_id);
            for (code, item) in &mut items {
                if let Some(old) = previous.items_by_institution_code.get(code) {
                    item.uuid = old.uuid;
                }
            }
            merge_items(&mut items, carried);
        }

        let country = record
            .get_control_field("008")
            .map(|fixed| char_slice(fixed, 15, 18).trim().to_string())
            .filter(|code| !code.is_empty());
        FrbrManifestation {
            uuid,
            raw_record_id: data.raw_record_id.clone(),
            match_fingerprint: data.manifestation_fingerprint.clone(),
            descriptor: data.manifestation.clone(),
            title: record
                .first_value("245", &['a', 'b', 'n', 'p'])
                .unwrap_or_default(),
            responsibility: record.first_value("245", &['c']),
            publication: record
                .values("260", &['a', 'b', 'c'])
                .into_iter()
                .chain(record.values("264", &['a', 'b', 'c']))
                .collect(),
            physical_description: record.first_value("300", &['a', 'b', 'c', 'e']),
            country,
            carrier_types: record.values("338", &['b']),
            media_types: record.values("337", &['b']),
            content_types: record.values("336", &['b']),
            languages: record
                .fields_by_tag("041")
                .flat_map(|field| field.subfields_by_code('a'))
                .map(str::to_string)
                .collect(),
            descriptor_ids: ["650", "651", "655"]
                .iter()
                .flat_map(|tag| record.fields_by_tag(tag))
                .flat_map(|field| field.subfields_by_code('0'))
                .map(str::to_string)
                .collect(),
            items_by_institution_code: items,
        }
    }
}

/// Decrement a counter, removing it at zero. Returns true when removed.
fn subtract_one(counters: &mut BTreeMap<String, Counter>, key: &str) -> bool {
    let Some(counter) = counters.get_mut(key) else {
        return false;
    };
    counter.subtract(1);
    if counter.is_zero() {
        counters.remove(key);
        true
    } else {
        false
    }
}

fn fingerprints(
    data: &ClusterMatchData,
    cluster: Uuid,
    expression: Uuid,
    manifestation: Uuid,
) -> MatchFingerprints {
    MatchFingerprints {
        work_fingerprint: data.work_fingerprint.clone(),
        cluster,
        expression_fingerprint: data.expression_fingerprint.clone(),
        expression,
        manifestation_fingerprint: data.manifestation_fingerprint.clone(),
        manifestation,
    }
}
