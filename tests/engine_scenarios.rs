//! Cluster matching scenarios against the in-memory index.

mod common;

use common::{ingest, memory_engine, Book, BOOK_008_ENG};
use frbrizer::{derive_fingerprint, FrbrCluster, MatchIndex, Stub};
use std::collections::BTreeMap;

fn title_counts(cluster: &FrbrCluster) -> BTreeMap<String, u32> {
    cluster
        .titles
        .iter()
        .map(|(title, counter)| (title.clone(), counter.count))
        .collect()
}

#[test]
fn test_same_title_and_creator_join_one_cluster() {
    let mut engine = memory_engine();
    let r1 = Book::new("r1", "Ferdydurke /")
        .author("Gombrowicz, Witold")
        .build();
    let r2 = Book::new("r2", "Ferdydurke /")
        .author("Gombrowicz, Witold")
        .build();

    let u1 = ingest(&mut engine, &r1);
    let outcome = engine
        .match_and_index(Stub::new(derive_fingerprint(&r2).unwrap()), &r2)
        .unwrap();

    assert_eq!(outcome.touched_clusters, vec![u1]);
    assert!(outcome.deleted_expressions.is_empty());

    let cluster = engine.index().get(u1).unwrap().unwrap();
    assert_eq!(cluster.titles["FERDYDURKE"].count, 2);
    assert_eq!(cluster.expressions.len(), 1);
    assert_eq!(cluster.manifestations_by_raw_record_id.len(), 2);
    assert_eq!(engine.index().manifestation_count(), 2);
    assert!(cluster.main_creator.contains_key("GOMBROWICZ WITOLD"));
}

#[test]
fn test_creatorless_record_does_not_join_authored_cluster() {
    let mut engine = memory_engine();
    let u1 = ingest(
        &mut engine,
        &Book::new("r1", "Ferdydurke /")
            .author("Gombrowicz, Witold")
            .build(),
    );
    let u2 = ingest(&mut engine, &Book::new("r3", "Ferdydurke").build());

    assert_ne!(u1, u2);
    assert_eq!(engine.index().cluster_count(), 2);
    let candidates = engine.index().candidates_by_title(&["FERDYDURKE"]).unwrap();
    assert!(candidates.contains(&u1) && candidates.contains(&u2));
}

#[test]
fn test_creatorless_records_match_on_title_alone() {
    let mut engine = memory_engine();
    let first = ingest(&mut engine, &Book::new("a1", "Kordian.").build());
    let second = ingest(&mut engine, &Book::new("a2", "Kordian /").build());
    assert_eq!(first, second);
}

#[test]
fn test_different_creators_never_merge() {
    let mut engine = memory_engine();
    let first = ingest(
        &mut engine,
        &Book::new("b1", "Wiersze").author("Tuwim, Julian").build(),
    );
    let second = ingest(
        &mut engine,
        &Book::new("b2", "Wiersze").author("Leśmian, Bolesław").build(),
    );
    assert_ne!(first, second);
}

#[test]
fn test_language_and_translator_split_expressions() {
    let mut engine = memory_engine();
    let uuid = ingest(
        &mut engine,
        &Book::new("c1", "Ferdydurke").author("Gombrowicz, Witold").build(),
    );
    ingest(
        &mut engine,
        &Book::new("c2", "Ferdydurke")
            .author("Gombrowicz, Witold")
            .fixed(BOOK_008_ENG)
            .translator("Borchardt, Danuta")
            .build(),
    );
    ingest(
        &mut engine,
        &Book::new("c3", "Ferdydurke")
            .author("Gombrowicz, Witold")
            .fixed(BOOK_008_ENG)
            .translator("Borchardt, Danuta")
            .build(),
    );

    let cluster = engine.index().get(uuid).unwrap().unwrap();
    assert_eq!(cluster.expressions.len(), 2);
    let english = cluster.expression_of("c2").unwrap();
    assert_eq!(english.distinctive_tuple.language, "eng");
    assert_eq!(english.manifestations.len(), 2);
    assert_eq!(cluster.expression_of("c3").unwrap().uuid, english.uuid);
}

fn three_way(order: [&str; 2]) -> (FrbrCluster, usize) {
    let mut engine = memory_engine();
    for id in order {
        let title = if id == "lalka" { "Lalka" } else { "Emancypantki" };
        ingest(&mut engine, &Book::new(id, title).build());
    }
    let bridge = Book::new("bridge", "Lalka").variant("Emancypantki").build();
    let outcome = engine
        .match_and_index(Stub::new(derive_fingerprint(&bridge).unwrap()), &bridge)
        .unwrap();
    assert_eq!(outcome.touched_clusters.len(), 2);
    assert_eq!(outcome.deleted_expressions.len(), 1);

    let survivor = outcome.survivor().unwrap();
    let merged = outcome.merged_away()[0];
    assert!(engine.index().get(merged).unwrap().is_none());
    assert_eq!(engine.index().cluster_count(), 1);
    for title in ["LALKA", "EMANCYPANTKI"] {
        let holders = engine.index().candidates_by_title(&[title]).unwrap();
        assert_eq!(holders.into_iter().collect::<Vec<_>>(), vec![survivor]);
    }
    let fingerprints = engine
        .index()
        .get_match_fingerprints_by_raw_record_id("lalka")
        .unwrap()
        .unwrap();
    assert_eq!(fingerprints.cluster, survivor);

    let cluster = engine.index().get(survivor).unwrap().unwrap();
    (cluster, engine.index().manifestation_count())
}

#[test]
fn test_three_way_merge_content_is_order_independent() {
    let (forward, forward_manifestations) = three_way(["lalka", "emancypantki"]);
    let (backward, backward_manifestations) = three_way(["emancypantki", "lalka"]);

    assert_eq!(title_counts(&forward), title_counts(&backward));
    assert_eq!(title_counts(&forward)["LALKA"], 2);
    assert_eq!(title_counts(&forward)["EMANCYPANTKI"], 2);
    assert_eq!(
        forward.raw_records.keys().collect::<Vec<_>>(),
        backward.raw_records.keys().collect::<Vec<_>>()
    );
    assert_eq!(forward.expressions.len(), 1);
    assert_eq!(backward.expressions.len(), 1);
    assert_eq!(
        forward.manifestations_by_raw_record_id.len(),
        backward.manifestations_by_raw_record_id.len()
    );
    assert_eq!(forward_manifestations, 3);
    assert_eq!(backward_manifestations, 3);
}

#[test]
fn test_unchanged_redelivery_refreshes_in_place() {
    let mut engine = memory_engine();
    let record = Book::new("r1", "Ferdydurke").author("Gombrowicz, Witold").build();
    let uuid = ingest(&mut engine, &record);
    let before = engine
        .index()
        .get_match_fingerprints_by_raw_record_id("r1")
        .unwrap()
        .unwrap();

    let again = Book::new("r1", "Ferdydurke")
        .author("Gombrowicz, Witold")
        .extra_copy()
        .build();
    let outcome = engine
        .match_and_index(Stub::new(derive_fingerprint(&again).unwrap()), &again)
        .unwrap();
    assert_eq!(outcome.touched_clusters, vec![uuid]);
    assert!(outcome.withdrawal.is_none());

    let cluster = engine.index().get(uuid).unwrap().unwrap();
    assert_eq!(cluster.titles["FERDYDURKE"].count, 1);
    assert_eq!(cluster.raw_record_count(), 1);

    let after = engine
        .index()
        .get_match_fingerprints_by_raw_record_id("r1")
        .unwrap()
        .unwrap();
    assert_eq!(after.manifestation, before.manifestation);
    let manifestation = engine
        .index()
        .get_manifestation(after.manifestation)
        .unwrap()
        .unwrap();
    assert_eq!(manifestation.item_count(), 2);
}

#[test]
fn test_changed_redelivery_moves_record() {
    let mut engine = memory_engine();
    let original = ingest(&mut engine, &Book::new("r1", "Ferdydurke").build());
    let partner = ingest(&mut engine, &Book::new("r2", "Ferdydurke").build());
    assert_eq!(original, partner);
    let manifestation_before = engine
        .index()
        .get_match_fingerprints_by_raw_record_id("r1")
        .unwrap()
        .unwrap()
        .manifestation;

    let retitled = Book::new("r1", "Trans-Atlantyk").build();
    let outcome = engine
        .match_and_index(Stub::new(derive_fingerprint(&retitled).unwrap()), &retitled)
        .unwrap();
    let withdrawal = outcome.withdrawal.clone().unwrap();
    assert_eq!(withdrawal.cluster, original);
    assert!(!withdrawal.cluster_removed);

    let moved_to = outcome.survivor().unwrap();
    assert_ne!(moved_to, original);
    let old = engine.index().get(original).unwrap().unwrap();
    assert!(!old.titles.contains_key("TRANS ATLANTYK"));
    assert_eq!(old.titles["FERDYDURKE"].count, 1);

    let fingerprints = engine
        .index()
        .get_match_fingerprints_by_raw_record_id("r1")
        .unwrap()
        .unwrap();
    assert_eq!(fingerprints.cluster, moved_to);
    assert_eq!(fingerprints.manifestation, manifestation_before);
}

#[test]
fn test_withdraw_last_record_removes_cluster() {
    let mut engine = memory_engine();
    let uuid = ingest(&mut engine, &Book::new("r1", "Ferdydurke").build());

    let withdrawal = engine.withdraw_raw_record("r1").unwrap().unwrap();
    assert!(withdrawal.cluster_removed);
    assert_eq!(withdrawal.deleted_expressions.len(), 1);
    assert!(engine.index().get(uuid).unwrap().is_none());
    assert!(engine
        .index()
        .candidates_by_title(&["FERDYDURKE"])
        .unwrap()
        .is_empty());
    assert_eq!(engine.index().manifestation_count(), 0);
    assert!(engine.withdraw_raw_record("r1").unwrap().is_none());
}

#[test]
fn test_initial_import_skips_redelivery_check() {
    let mut engine = memory_engine().with_initial_import(true);
    let record = Book::new("r1", "Ferdydurke").build();
    let first = ingest(&mut engine, &record);
    let second = ingest(&mut engine, &record);
    assert_eq!(first, second);
    let cluster = engine.index().get(first).unwrap().unwrap();
    assert_eq!(cluster.titles["FERDYDURKE"].count, 2);
}
