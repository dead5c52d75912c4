use chrono::Duration;
use variant_store::store::{PartitionState, RankLease, RankLeases};
use variant_store::{
    Case, Partition, SqliteStore, StoreConfig, StoreError, Variant, VariantHandler, VariantType,
};

fn file_config(dir: &tempfile::TempDir) -> StoreConfig {
    StoreConfig {
        database: Some(dir.path().join("variants.sqlite")),
        busy_timeout_ms: 200,
        ..StoreConfig::default()
    }
}

#[test]
fn handlers_on_one_database_see_each_others_writes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let writer = VariantHandler::open(file_config(&dir)).expect("writer");
    let reader = VariantHandler::open(file_config(&dir)).expect("reader");

    let variant = Variant::new("case-1", "cust000", VariantType::Clinical, "12", 4242, "T", "G");
    writer.save(&variant).expect("save");
    writer
        .assign_ranks(&Case::new("case-1", "cust000"), VariantType::Clinical)
        .expect("assign");

    let seen = reader
        .get_variant(&variant.document_id)
        .expect("lookup")
        .expect("visible to reader");
    assert_eq!(seen.variant_rank, Some(1));
    assert!(!reader
        .needs_rank_assignment("case-1", VariantType::Clinical)
        .expect("state"));
}

#[test]
fn rank_lease_excludes_assigners_on_other_connections() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = file_config(&dir);
    let handler = VariantHandler::open(config.clone()).expect("handler");
    handler
        .save(&Variant::new("case-1", "cust000", VariantType::Research, "1", 1, "A", "C"))
        .expect("save");

    let other = SqliteStore::open_with_config(&config).expect("second connection");
    let partition = Partition::new("case-1", VariantType::Research);
    let lease = RankLease::acquire(&other, &partition, Duration::seconds(300)).expect("lease");

    let err = handler
        .assign_ranks(&Case::new("case-1", "cust000"), VariantType::Research)
        .expect_err("lease held elsewhere");
    assert!(matches!(err, StoreError::PartitionLocked { .. }));

    drop(lease);
    assert_eq!(
        handler
            .assign_ranks(&Case::new("case-1", "cust000"), VariantType::Research)
            .expect("assign after release"),
        1
    );
    assert_eq!(
        other.partition_state(&partition).expect("state"),
        Some(PartitionState::Ranked)
    );
}
