//! From batch messages to bulk actions, through the worker loop.

mod common;

use common::{memory_engine, Book, BOOK_008_ENG};
use crossbeam_channel::{bounded, unbounded};
use frbrizer::cluster::items::ItemConversionTable;
use frbrizer::config::{AdmissionConfig, FrbrizerConfig, WorkerConfig};
use frbrizer::convert::to_ndjson;
use frbrizer::index::{KeyValueStore, MemoryKeyValueStore};
use frbrizer::resolver::{CodeValue, InMemoryCodeTables, InMemoryDocumentSearch, Institution};
use frbrizer::worker::{run, AckKind, Acknowledgement, ConversionSink, Payload};
use frbrizer::{
    BatchMessage, BulkAction, ClusterMatchEngine, ConversionRequest, Delivery, FinalConverter,
    FrbrError, Frbrizer, InMemoryMatchIndex, JobMetadata, KvMatchIndex, MatchIndex, Result,
    ResolverCategory, WorkerHandle,
};
use std::collections::BTreeSet;
use serde_json::Value;
use std::io::Write;

fn gombrowicz() -> BatchMessage {
    BatchMessage {
        records: vec![
            Book::new("p1", "Ferdydurke /")
                .author("Gombrowicz, Witold")
                .build(),
            Book::new("p2", "Ferdydurke /")
                .author("Gombrowicz, Witold")
                .fixed(BOOK_008_ENG)
                .translator("Borchardt, Danuta")
                .digital("https://polona.pl/item/7")
                .build(),
        ],
        job: JobMetadata::default(),
    }
}

fn resolvers() -> (InMemoryDocumentSearch, InMemoryCodeTables) {
    let mut search = InMemoryDocumentSearch::new();
    search.insert_institution(
        "BN",
        Institution {
            id: "1".to_string(),
            name: "Biblioteka Narodowa".to_string(),
            city: Some("Warszawa".to_string()),
            ..Institution::default()
        },
    );
    let mut codes = InMemoryCodeTables::new();
    codes.insert(ResolverCategory::Language, "pol", CodeValue::named("polski"));
    codes.insert(ResolverCategory::Country, "pl", CodeValue::named("Polska"));
    (search, codes)
}

fn converted() -> (Frbrizer<InMemoryMatchIndex>, ConversionRequest) {
    let mut frbrizer = Frbrizer::new(memory_engine(), AdmissionConfig::default());
    frbrizer.frbrize_message(&gombrowicz()).unwrap();
    let request = frbrizer.take_conversion_request().unwrap();
    (frbrizer, request)
}

#[test]
fn test_conversion_emits_every_level_with_one_query_per_category() {
    let (frbrizer, request) = converted();
    let (search, codes) = resolvers();
    let converter = FinalConverter::new(frbrizer.engine().index(), &search, &codes);

    let entries = converter.convert(&request).unwrap();
    let indexes: Vec<&str> = entries
        .iter()
        .map(|entry| entry.meta_ref().index.as_str())
        .collect();
    assert_eq!(
        indexes,
        vec!["work", "expression", "expression", "manifestation", "manifestation", "item", "item"]
    );
    assert!(entries
        .iter()
        .all(|entry| entry.meta_ref().version == request.timestamp
            && entry.meta_ref().version_type == "external"));

    assert_eq!(search.query_count(), 1);
    assert_eq!(codes.query_count(), 2);

    let work = entries[0].body.as_ref().unwrap();
    assert_eq!(work["item_count"], 2);
    assert_eq!(work["titles"], serde_json::json!(["FERDYDURKE"]));
    // "eng" is not in the language table and is left out
    assert_eq!(work["languages"], serde_json::json!(["polski"]));
    let libraries = work["libraries"].as_array().unwrap();
    assert!(libraries
        .iter()
        .any(|library| library["name"] == "Biblioteka Narodowa"));
    assert!(libraries
        .iter()
        .any(|library| library == &serde_json::json!({"code": "POLONA"})));

    let manifestation = entries[3].body.as_ref().unwrap();
    assert_eq!(manifestation["country"], "Polska");
    assert_eq!(manifestation["work_ids"][0], work["id"]);
}

#[test]
fn test_missing_references_resolve_to_empty_values() {
    let (frbrizer, request) = converted();
    let search = InMemoryDocumentSearch::new();
    let codes = InMemoryCodeTables::new();
    let converter = FinalConverter::new(frbrizer.engine().index(), &search, &codes);

    let entries = converter.convert(&request).unwrap();
    let work = entries[0].body.as_ref().unwrap();
    assert_eq!(work["languages"], serde_json::json!([]));
    let item = entries.last().unwrap().body.as_ref().unwrap();
    assert!(item["library"].get("code").is_some());
    assert!(item["library"].get("name").is_none());
}

#[test]
fn test_deleted_clusters_and_expressions_become_delete_actions() {
    let (mut frbrizer, _) = converted();
    frbrizer
        .delete_records(&["p1".to_string(), "p2".to_string()])
        .unwrap();
    let request = frbrizer.take_conversion_request().unwrap();
    assert!(request.clusters_to_convert.is_empty());

    let (search, codes) = resolvers();
    let converter = FinalConverter::new(frbrizer.engine().index(), &search, &codes);
    let entries = converter.convert(&request).unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|entry| entry.is_delete()));
    assert!(matches!(&entries[0].action, BulkAction::Delete(meta) if meta.index == "work"));
    assert_eq!(search.query_count(), 0);

    let text = to_ndjson(&entries).unwrap();
    assert_eq!(text.lines().count(), 3);
    let first: Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!(first["delete"]["_index"], "work");
}

#[test]
fn test_worker_acks_after_handoff_and_nacks_on_store_failure() {
    let index = KvMatchIndex::new(MemoryKeyValueStore::new());
    let engine = ClusterMatchEngine::new(index, ItemConversionTable::default());
    let mut frbrizer = Frbrizer::new(engine, AdmissionConfig::default());

    let (delivery_tx, delivery_rx) = bounded(4);
    let (ack_tx, ack_rx) = unbounded();
    let mut sink: Vec<ConversionRequest> = Vec::new();

    delivery_tx
        .send(Delivery {
            tag: 1,
            payload: Payload::Records(gombrowicz()),
        })
        .unwrap();
    drop(delivery_tx);
    let stats = run(&mut frbrizer, &delivery_rx, &ack_tx, &mut sink);
    assert_eq!(stats.acked, 1);
    assert_eq!(sink.len(), 1);
    assert_eq!(
        ack_rx.try_recv().unwrap(),
        Acknowledgement {
            tag: 1,
            kind: AckKind::Ack
        }
    );

    frbrizer
        .engine_mut()
        .index_mut()
        .store_mut()
        .set_unavailable(true);
    let (delivery_tx, delivery_rx) = bounded(4);
    delivery_tx
        .send(Delivery {
            tag: 2,
            payload: Payload::Delete(vec!["p1".to_string()]),
        })
        .unwrap();
    drop(delivery_tx);
    let stats = run(&mut frbrizer, &delivery_rx, &ack_tx, &mut sink);
    assert_eq!(stats.nacked, 1);
    assert_eq!(sink.len(), 1);
    assert_eq!(ack_rx.try_recv().unwrap().kind, AckKind::Nack);
    assert!(frbrizer.pending_clusters().is_empty());
}

/// Memory store whose set unions fail for keys containing `fail_on`.
#[derive(Debug, Default)]
struct FailingUnionStore {
    inner: MemoryKeyValueStore,
    fail_on: Option<String>,
}

impl KeyValueStore for FailingUnionStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.inner.mget(keys)
    }

    fn set(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        self.inner.set(key, value)
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }

    fn sadd(&mut self, key: &str, member: &str) -> Result<()> {
        self.inner.sadd(key, member)
    }

    fn srem(&mut self, key: &str, member: &str) -> Result<()> {
        self.inner.srem(key, member)
    }

    fn sunion(&self, keys: &[String]) -> Result<BTreeSet<String>> {
        if let Some(marker) = &self.fail_on {
            if keys.iter().any(|key| key.contains(marker.as_str())) {
                return Err(FrbrError::Store(format!("union failed on {marker}")));
            }
        }
        self.inner.sunion(keys)
    }
}

fn records(records: Vec<frbrizer::Record>) -> Payload {
    Payload::Records(BatchMessage {
        records,
        job: JobMetadata::default(),
    })
}

#[test]
fn test_aborted_message_keeps_deletes_of_earlier_records() {
    let store = FailingUnionStore {
        fail_on: Some("BOOM".to_string()),
        ..FailingUnionStore::default()
    };
    let engine = ClusterMatchEngine::new(KvMatchIndex::new(store), ItemConversionTable::default());
    let mut frbrizer = Frbrizer::new(engine, AdmissionConfig::default());
    let (ack_tx, ack_rx) = unbounded();
    let mut sink: Vec<ConversionRequest> = Vec::new();

    let (delivery_tx, delivery_rx) = bounded(4);
    delivery_tx
        .send(Delivery {
            tag: 1,
            payload: records(vec![
                Book::new("r1", "Alpha").build(),
                Book::new("r2", "Beta").build(),
            ]),
        })
        .unwrap();
    // r3 bridges both clusters; r4 fails at candidate lookup
    let bridge = records(vec![
        Book::new("r3", "Alpha").variant("Beta").build(),
        Book::new("r4", "Boom").build(),
    ]);
    delivery_tx
        .send(Delivery {
            tag: 2,
            payload: bridge.clone(),
        })
        .unwrap();
    drop(delivery_tx);
    let stats = run(&mut frbrizer, &delivery_rx, &ack_tx, &mut sink);
    assert_eq!((stats.acked, stats.nacked), (1, 1));
    assert_eq!(sink.len(), 1);
    let first: BTreeSet<_> = sink[0].clusters_to_convert.iter().copied().collect();
    assert_eq!(first.len(), 2);
    let live: Vec<_> = first
        .iter()
        .filter(|uuid| frbrizer.engine().index().get(**uuid).unwrap().is_some())
        .collect();
    assert_eq!(live.len(), 1);

    frbrizer.engine_mut().index_mut().store_mut().fail_on = None;
    let (delivery_tx, delivery_rx) = bounded(4);
    delivery_tx
        .send(Delivery {
            tag: 3,
            payload: bridge,
        })
        .unwrap();
    drop(delivery_tx);
    let stats = run(&mut frbrizer, &delivery_rx, &ack_tx, &mut sink);
    assert_eq!(stats.acked, 1);
    assert_eq!(sink.len(), 2);

    let redelivered = &sink[1];
    assert_eq!(redelivered.clusters_to_delete.len(), 1);
    let merged_away = redelivered.clusters_to_delete[0];
    assert!(first.contains(&merged_away));
    assert!(frbrizer.engine().index().get(merged_away).unwrap().is_none());
    assert_eq!(redelivered.expressions_to_delete.len(), 1);
    assert!(redelivered.clusters_to_convert.contains(live[0]));

    let kinds: Vec<AckKind> = ack_rx.try_iter().map(|ack| ack.kind).collect();
    assert_eq!(kinds, vec![AckKind::Ack, AckKind::Nack, AckKind::Ack]);
}

/// Sink that refuses every request.
struct RefusingSink;

impl ConversionSink for RefusingSink {
    fn send_request(&mut self, _request: ConversionRequest) -> Result<()> {
        Err(FrbrError::Store("conversion queue down".to_string()))
    }
}

#[test]
fn test_refused_request_is_restored() {
    let mut frbrizer = Frbrizer::new(memory_engine(), AdmissionConfig::default());
    let (delivery_tx, delivery_rx) = bounded(1);
    let (ack_tx, ack_rx) = unbounded();
    delivery_tx
        .send(Delivery {
            tag: 7,
            payload: Payload::Records(gombrowicz()),
        })
        .unwrap();
    drop(delivery_tx);

    let stats = run(&mut frbrizer, &delivery_rx, &ack_tx, &mut RefusingSink);
    assert_eq!(stats.nacked, 1);
    assert_eq!(ack_rx.try_recv().unwrap().kind, AckKind::Nack);
    assert_eq!(frbrizer.pending_clusters().len(), 1);
    let request = frbrizer.take_conversion_request().unwrap();
    assert_eq!(request.clusters_to_convert.len(), 1);
}

#[test]
fn test_spawned_worker_processes_in_order() {
    let frbrizer = Frbrizer::new(memory_engine(), AdmissionConfig::default());
    let (request_tx, request_rx) = unbounded();
    let worker = WorkerHandle::spawn(frbrizer, &WorkerConfig::default(), request_tx);

    for tag in 1..=3 {
        worker
            .deliver(Delivery {
                tag,
                payload: Payload::Records(gombrowicz()),
            })
            .unwrap();
    }
    let tags: Vec<u64> = (0..3)
        .map(|_| worker.acknowledgements().recv().unwrap().tag)
        .collect();
    assert_eq!(tags, vec![1, 2, 3]);

    let (frbrizer, stats) = worker.join().unwrap();
    assert_eq!(stats.acked, 3);
    assert_eq!(frbrizer.engine().index().cluster_count(), 1);

    let timestamps: Vec<i64> = request_rx.try_iter().map(|r| r.timestamp).collect();
    assert_eq!(timestamps.len(), 3);
    assert!(timestamps.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_config_file_round_trip() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[index]\nbackend = \"key_value\"\n\n[worker]\nshards = 4\n\n[logging]\njson = true"
    )
    .unwrap();
    let config = FrbrizerConfig::load(file.path()).unwrap();
    assert_eq!(config.worker.shards, 4);
    assert_eq!(config.worker.channel_capacity, 64);
    assert!(config.logging.json);
    assert_eq!(config.admission, AdmissionConfig::default());
}
