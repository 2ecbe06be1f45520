//! Batch message processing.
//!
//! A [`BatchMessage`] carries parsed records and the job they belong to.
//! [`Frbrizer::frbrize_message`] admits records, fingerprints them in
//! parallel and then matches them one at a time. Records from a primary
//! catalog become clusters; records from a secondary source are linked to a
//! primary manifestation and contribute only their items.
//!
//! Changed clusters and expressions accumulate until
//! [`Frbrizer::take_conversion_request`] hands them off with a version
//! timestamp.

use crate::admission::{classify_work, has_items, is_document_type, is_title_indicator_valid, WorkClass};
use crate::config::AdmissionConfig;
use crate::convert::ConversionRequest;
use crate::engine::{ClusterMatchEngine, MatchOutcome, Stub, Withdrawal};
use crate::error::{ErrorKind, FrbrError, Result};
use crate::fingerprint::derive_fingerprint;
use crate::index::MatchIndex;
use crate::manifestation_matcher::{ManifestationIndex, ManifestationMatchData};
use crate::record::Record;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Role of the catalog a job's records come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    /// Records are clustered
    #[default]
    Primary,
    /// Records only attach items to primary manifestations
    Secondary,
}

/// Job metadata delivered with every batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobMetadata {
    /// Source catalog id
    pub data_source_id: String,
    /// Accepted 380 $a values for this job; `None` uses the configured list
    pub document_types: Option<Vec<String>>,
    /// Only single-work records are admitted
    pub single_work_only: bool,
    /// Primary or secondary source
    pub source_role: SourceRole,
}

impl Default for JobMetadata {
    fn default() -> Self {
        JobMetadata {
            data_source_id: String::new(),
            document_types: None,
            single_work_only: true,
            source_role: SourceRole::Primary,
        }
    }
}

/// Records plus job metadata, as delivered by the broker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMessage {
    /// Parsed records
    pub records: Vec<Record>,
    /// Job the records belong to
    pub job: JobMetadata,
}

/// What happened to one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Records that passed admission
    pub admitted: usize,
    /// Records rejected by admission
    pub rejected: usize,
    /// Records skipped on validation errors
    pub skipped: usize,
    /// Primary records matched and indexed
    pub matched: usize,
    /// Secondary records linked to a primary manifestation
    pub linked: usize,
    /// Secondary records without a matching primary manifestation
    pub unlinked: usize,
    /// Raw records withdrawn
    pub withdrawn: usize,
    /// Raw record ids that hit an index inconsistency
    pub requeue: Vec<String>,
}

/// Batch processor owning one match engine.
#[derive(Debug)]
pub struct Frbrizer<I> {
    engine: ClusterMatchEngine<I>,
    admission: AdmissionConfig,
    manifestations: ManifestationIndex,
    secondary_links: BTreeMap<String, String>,
    clusters_to_convert: BTreeSet<Uuid>,
    clusters_to_delete: BTreeSet<Uuid>,
    expressions_to_delete: BTreeSet<Uuid>,
    last_timestamp: i64,
}

impl<I: MatchIndex> Frbrizer<I> {
    /// Processor over `engine`, admitting records per `admission`.
    pub fn new(engine: ClusterMatchEngine<I>, admission: AdmissionConfig) -> Self {
        Frbrizer {
            engine,
            admission,
            manifestations: ManifestationIndex::new(),
            secondary_links: BTreeMap::new(),
            clusters_to_convert: BTreeSet::new(),
            clusters_to_delete: BTreeSet::new(),
            expressions_to_delete: BTreeSet::new(),
            last_timestamp: 0,
        }
    }

    /// The match engine.
    pub fn engine(&self) -> &ClusterMatchEngine<I> {
        &self.engine
    }

    /// The match engine, mutably.
    pub fn engine_mut(&mut self) -> &mut ClusterMatchEngine<I> {
        &mut self.engine
    }

    /// Match data of the primary manifestations seen so far.
    pub fn manifestation_index(&self) -> &ManifestationIndex {
        &self.manifestations
    }

    /// Clusters waiting for conversion.
    pub fn pending_clusters(&self) -> &BTreeSet<Uuid> {
        &self.clusters_to_convert
    }

    fn admit(&self, record: &Record, job: &JobMetadata) -> bool {
        let config;
        let admission = match &job.document_types {
            Some(document_types) => {
                config = AdmissionConfig {
                    leader_types: self.admission.leader_types.clone(),
                    document_types: document_types.clone(),
                };
                &config
            },
            None => &self.admission,
        };
        is_document_type(record, admission)
            && (!job.single_work_only || classify_work(record) == WorkClass::SingleWork)
            && has_items(record, self.engine.items())
            && is_title_indicator_valid(record)
    }

    /// Process one message.
    ///
    /// # Errors
    ///
    /// Store errors abort the message; the caller must not acknowledge it.
    /// Changes already written for earlier records stay pending and go out
    /// with the next conversion request. Validation and
    /// consistency errors are per record and reported in the
    /// [`BatchReport`].
    #[instrument(skip_all, fields(data_source_id = %message.job.data_source_id, records = message.records.len()))]
    pub fn frbrize_message(&mut self, message: &BatchMessage) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        let admitted: Vec<&Record> = message
            .records
            .iter()
            .filter(|record| self.admit(record, &message.job))
            .collect();
        report.admitted = admitted.len();
        report.rejected = message.records.len() - admitted.len();

        match message.job.source_role {
            SourceRole::Primary => self.process_primary(&admitted, &mut report)?,
            SourceRole::Secondary => self.process_secondary(&admitted, &mut report)?,
        }
        info!(
            admitted = report.admitted,
            rejected = report.rejected,
            skipped = report.skipped,
            matched = report.matched,
            linked = report.linked,
            requeue = report.requeue.len(),
            "message frbrized"
        );
        Ok(report)
    }

    fn process_primary(&mut self, records: &[&Record], report: &mut BatchReport) -> Result<()> {
        let derived: Vec<_> = records
            .par_iter()
            .map(|record| derive_fingerprint(record))
            .collect();

        for (record, data) in records.iter().zip(derived) {
            let data = match data {
                Ok(data) => data,
                Err(err) => {
                    self.record_failure(record.control_number().unwrap_or_default(), err, report)?;
                    continue;
                },
            };
            let raw_record_id = data.raw_record_id.clone();
            let descriptor = data.manifestation.clone();
            match self.engine.match_and_index(Stub::new(data), record) {
                Ok(outcome) => {
                    debug!(raw_record_id = %raw_record_id, cluster = ?outcome.survivor(), "record matched");
                    self.apply_outcome(outcome);
                    self.manifestations.insert(&raw_record_id, descriptor);
                    report.matched += 1;
                },
                Err(err) => self.record_failure(&raw_record_id, err, report)?,
            }
        }
        Ok(())
    }

    fn process_secondary(&mut self, records: &[&Record], report: &mut BatchReport) -> Result<()> {
        let derived: Vec<_> = records
            .par_iter()
            .map(|record| ManifestationMatchData::from_record(record))
            .collect();

        for (record, data) in records.iter().zip(derived) {
            let Some(raw_record_id) = record.control_number().map(str::to_string) else {
                self.record_failure("", FrbrError::MissingControlField("001".to_string()), report)?;
                continue;
            };
            let data = match data {
                Ok(data) => data,
                Err(err) => {
                    self.record_failure(&raw_record_id, err, report)?;
                    continue;
                },
            };
            if let Err(err) = self.link_secondary(&raw_record_id, &data, record, report) {
                self.record_failure(&raw_record_id, err, report)?;
            }
        }
        Ok(())
    }

    fn link_secondary(
        &mut self,
        raw_record_id: &str,
        data: &ManifestationMatchData,
        record: &Record,
        report: &mut BatchReport,
    ) -> Result<()> {
        self.unlink_secondary(raw_record_id)?;
        let Some(primary) = self.manifestations.match_manifestation(data) else {
            debug!(raw_record_id, "no primary manifestation for secondary record");
            report.unlinked += 1;
            return Ok(());
        };
        let items = self.engine.items().build_items(record, raw_record_id);
        if let Some(cluster) = self.engine.attach_items(&primary, items)? {
            self.mark_convert(cluster);
            self.secondary_links
                .insert(raw_record_id.to_string(), primary.clone());
            debug!(raw_record_id, primary = %primary, cluster = %cluster, "secondary record linked");
            report.linked += 1;
        } else {
            report.unlinked += 1;
        }
        Ok(())
    }

    fn unlink_secondary(&mut self, raw_record_id: &str) -> Result<bool> {
        let Some(primary) = self.secondary_links.remove(raw_record_id) else {
            return Ok(false);
        };
        if let Some(cluster) = self.engine.detach_items(&primary, raw_record_id)? {
            self.mark_convert(cluster);
        }
        Ok(true)
    }

    /// Withdraw raw records, primary or secondary.
    ///
    /// # Errors
    ///
    /// Store errors abort; consistency errors are reported per record.
    pub fn delete_records(&mut self, raw_record_ids: &[String]) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for raw_record_id in raw_record_ids {
            match self.delete_record(raw_record_id) {
                Ok(true) => report.withdrawn += 1,
                Ok(false) => debug!(raw_record_id = %raw_record_id, "record to delete not indexed"),
                Err(err) => self.record_failure(raw_record_id, err, &mut report)?,
            }
        }
        Ok(report)
    }

    fn delete_record(&mut self, raw_record_id: &str) -> Result<bool> {
        if self.unlink_secondary(raw_record_id)? {
            return Ok(true);
        }
        let Some(withdrawal) = self.engine.withdraw_raw_record(raw_record_id)? else {
            return Ok(false);
        };
        self.apply_withdrawal(withdrawal);
        self.manifestations.remove(raw_record_id);
        Ok(true)
    }

    fn record_failure(&self, raw_record_id: &str, err: FrbrError, report: &mut BatchReport) -> Result<()> {
        match err.kind() {
            ErrorKind::Validation => {
                warn!(raw_record_id, error = %err, "record skipped");
                report.skipped += 1;
                Ok(())
            },
            ErrorKind::Consistency => {
                error!(raw_record_id, error = %err, "index inconsistency, record requeued");
                report.requeue.push(raw_record_id.to_string());
                Ok(())
            },
            ErrorKind::Store | ErrorKind::Config => Err(err),
        }
    }

    fn mark_convert(&mut self, cluster: Uuid) {
        self.clusters_to_delete.remove(&cluster);
        self.clusters_to_convert.insert(cluster);
    }

    fn mark_delete(&mut self, cluster: Uuid) {
        self.clusters_to_convert.remove(&cluster);
        self.clusters_to_delete.insert(cluster);
    }

    fn apply_withdrawal(&mut self, withdrawal: Withdrawal) {
        if withdrawal.cluster_removed {
            self.mark_delete(withdrawal.cluster);
        } else {
            self.mark_convert(withdrawal.cluster);
        }
        self.expressions_to_delete
            .extend(withdrawal.deleted_expressions);
    }

    fn apply_outcome(&mut self, outcome: MatchOutcome) {
        if let Some(withdrawal) = outcome.withdrawal.clone() {
            self.apply_withdrawal(withdrawal);
        }
        for merged in outcome.merged_away() {
            self.mark_delete(*merged);
        }
        if let Some(survivor) = outcome.survivor() {
            self.mark_convert(survivor);
        }
        self.expressions_to_delete
            .extend(outcome.deleted_expressions);
    }

    /// Hand off accumulated changes, or `None` when nothing changed.
    ///
    /// Timestamps are nanoseconds since the epoch and strictly increase
    /// across calls, even if the clock does not.
    pub fn take_conversion_request(&mut self) -> Option<ConversionRequest> {
        if self.clusters_to_convert.is_empty()
            && self.clusters_to_delete.is_empty()
            && self.expressions_to_delete.is_empty()
        {
            return None;
        }
        let now = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or(self.last_timestamp);
        self.last_timestamp = now.max(self.last_timestamp + 1);
        Some(ConversionRequest {
            clusters_to_convert: std::mem::take(&mut self.clusters_to_convert)
                .into_iter()
                .collect(),
            clusters_to_delete: std::mem::take(&mut self.clusters_to_delete)
                .into_iter()
                .collect(),
            expressions_to_delete: std::mem::take(&mut self.expressions_to_delete)
                .into_iter()
                .collect(),
            timestamp: self.last_timestamp,
        })
    }

    /// Put back a request that could not be handed off. Changes recorded
    /// since it was taken take precedence.
    pub fn restore_conversion_request(&mut self, request: ConversionRequest) {
        for cluster in request.clusters_to_convert {
            if !self.clusters_to_delete.contains(&cluster) {
                self.clusters_to_convert.insert(cluster);
            }
        }
        for cluster in request.clusters_to_delete {
            if !self.clusters_to_convert.contains(&cluster) {
                self.clusters_to_delete.insert(cluster);
            }
        }
        self.expressions_to_delete
            .extend(request.expressions_to_delete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::items::ItemConversionTable;
    use crate::index::InMemoryMatchIndex;
    use crate::leader::Leader;
    use crate::record::Field;

    fn book(id: &str, title: &str, author: Option<&str>) -> Record {
        let mut builder = Record::builder(Leader::with_type('a', 'm'))
            .control_field_str("001", id)
            .control_field_str("008", "010101s2001    pl            000 0 pol d")
            .control_field_str("009", id);
        if let Some(author) = author {
            builder = builder.field(
                Field::builder("100".to_string(), '1', ' ')
                    .subfield_str('a', author)
                    .build(),
            );
        }
        builder
            .field(
                Field::builder("245".to_string(), '1', '0')
                    .subfield_str('a', title)
                    .build(),
            )
            .field(
                Field::builder("380".to_string(), ' ', ' ')
                    .subfield_str('a', "Książki")
                    .build(),
            )
            .field(
                Field::builder("852".to_string(), ' ', ' ')
                    .subfield_str('a', "BN")
                    .build(),
            )
            .build()
    }

    fn frbrizer() -> Frbrizer<InMemoryMatchIndex> {
        let engine = ClusterMatchEngine::new(InMemoryMatchIndex::new(), ItemConversionTable::default());
        Frbrizer::new(engine, AdmissionConfig::default())
    }

    #[test]
    fn test_message_produces_conversion_request() {
        let mut frbrizer = frbrizer();
        let message = BatchMessage {
            records: vec![
                book("r1", "Ferdydurke /", Some("Gombrowicz, Witold")),
                book("r2", "Ferdydurke /", Some("Gombrowicz, Witold")),
            ],
            job: JobMetadata::default(),
        };
        let report = frbrizer.frbrize_message(&message).unwrap();
        assert_eq!(report.admitted, 2);
        assert_eq!(report.matched, 2);

        let request = frbrizer.take_conversion_request().unwrap();
        assert_eq!(request.clusters_to_convert.len(), 1);
        assert!(request.clusters_to_delete.is_empty());
        assert!(frbrizer.take_conversion_request().is_none());
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let mut frbrizer = frbrizer();
        let message = BatchMessage {
            records: vec![book("r1", "Ferdydurke /", None)],
            job: JobMetadata::default(),
        };
        frbrizer.frbrize_message(&message).unwrap();
        let first = frbrizer.take_conversion_request().unwrap();
        frbrizer.frbrize_message(&message).unwrap();
        let second = frbrizer.take_conversion_request().unwrap();
        assert!(second.timestamp > first.timestamp);
    }

    #[test]
    fn test_job_document_types_override() {
        let mut frbrizer = frbrizer();
        let message = BatchMessage {
            records: vec![book("r1", "Ferdydurke /", None)],
            job: JobMetadata {
                document_types: Some(vec!["Audiobooki".to_string()]),
                ..JobMetadata::default()
            },
        };
        let report = frbrizer.frbrize_message(&message).unwrap();
        assert_eq!(report.rejected, 1);
        assert!(frbrizer.take_conversion_request().is_none());
    }

    #[test]
    fn test_delete_removes_cluster() {
        let mut frbrizer = frbrizer();
        let message = BatchMessage {
            records: vec![book("r1", "Ferdydurke /", None)],
            job: JobMetadata::default(),
        };
        frbrizer.frbrize_message(&message).unwrap();
        let created = frbrizer.take_conversion_request().unwrap();

        let report = frbrizer.delete_records(&["r1".to_string()]).unwrap();
        assert_eq!(report.withdrawn, 1);
        let request = frbrizer.take_conversion_request().unwrap();
        assert_eq!(request.clusters_to_delete, created.clusters_to_convert);
        assert_eq!(request.expressions_to_delete.len(), 1);
        assert!(frbrizer.manifestation_index().is_empty());
    }

    #[test]
    fn test_restored_request_yields_to_newer_changes() {
        let mut frbrizer = frbrizer();
        let message = BatchMessage {
            records: vec![book("r1", "Ferdydurke /", None)],
            job: JobMetadata::default(),
        };
        frbrizer.frbrize_message(&message).unwrap();
        let refused = frbrizer.take_conversion_request().unwrap();

        frbrizer.delete_records(&["r1".to_string()]).unwrap();
        frbrizer.restore_conversion_request(refused.clone());
        let request = frbrizer.take_conversion_request().unwrap();
        assert!(request.clusters_to_convert.is_empty());
        assert_eq!(request.clusters_to_delete, refused.clusters_to_convert);
        assert!(request.timestamp > refused.timestamp);
    }
}
