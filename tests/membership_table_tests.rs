//! End-to-end membership table scenarios over an on-disk store

use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::{tempdir, TempDir};

use wolfmembership::prelude::*;
use wolfmembership::registry;

fn config_in(dir: &TempDir, cluster_id: &str) -> MembershipConfig {
    let path = dir.path().join("membership.db");
    MembershipConfig::new(cluster_id, format!("Filename={};Timeout=2000", path.display()))
}

fn entry(ip: &str, port: u16, generation: i32) -> MembershipEntry {
    MembershipEntry::new(
        SiloAddress::new(ip.parse().unwrap(), port, generation),
        format!("silo-{}-{}", port, generation),
        "host-a",
        30000,
    )
}

#[tokio::test]
async fn test_insert_then_read_row() {
    let dir = tempdir().unwrap();
    let table = registry::membership_table(&config_in(&dir, "c1")).unwrap();
    table.initialize_membership_table(true).await.unwrap();

    let e = entry("10.0.0.1", 11111, 1);
    assert_eq!(e.status, SiloStatus::Joining);
    assert!(table.insert_row(&e, Some(&TableVersion::new(0))).await.unwrap());

    let data = table.read_row(&e.silo_address).await.unwrap();
    assert_eq!(data.members.len(), 1);
    assert_eq!(data.members[0].0.status, SiloStatus::Joining);
    assert_eq!(data.version.version, 1);
}

#[tokio::test]
async fn test_empty_table_read() {
    let dir = tempdir().unwrap();
    let table = registry::membership_table(&config_in(&dir, "c1")).unwrap();
    table.initialize_membership_table(true).await.unwrap();

    let data = table.read_all().await.unwrap();
    assert!(data.members.is_empty());
    assert_eq!(data.version.version, 0);
}

#[tokio::test]
async fn test_version_increases_once_per_mutation() {
    let dir = tempdir().unwrap();
    let table = registry::membership_table(&config_in(&dir, "c1")).unwrap();
    table.initialize_membership_table(true).await.unwrap();

    let mut entries: Vec<_> = (1..=4).map(|g| entry("10.0.0.1", 11111, g)).collect();
    for e in &entries {
        assert!(table.insert_row(e, Some(&TableVersion::new(0))).await.unwrap());
    }
    for e in entries.iter_mut() {
        e.status = SiloStatus::Active;
        assert!(table.update_row(e, "", Some(&TableVersion::new(0))).await.unwrap());
    }
    // Heartbeats are not membership changes
    for e in &entries {
        table.update_i_am_alive(e).await.unwrap();
    }

    assert_eq!(table.read_all().await.unwrap().version.version, 8);
}

#[tokio::test]
async fn test_heartbeat_keeps_version() {
    let dir = tempdir().unwrap();
    let table = registry::membership_table(&config_in(&dir, "c1")).unwrap();
    table.initialize_membership_table(true).await.unwrap();

    let mut e = entry("10.0.0.1", 11111, 1);
    table.insert_row(&e, Some(&TableVersion::new(0))).await.unwrap();
    let before = table.read_row(&e.silo_address).await.unwrap();

    e.i_am_alive_time = Utc::now() + Duration::seconds(10);
    e.proxy_port = 1;
    table.update_i_am_alive(&e).await.unwrap();

    let after = table.read_row(&e.silo_address).await.unwrap();
    assert_eq!(after.version, before.version);
    assert_eq!(after.members[0].0.i_am_alive_time, e.i_am_alive_time);
    assert_eq!(after.members[0].0.proxy_port, 30000);
}

#[tokio::test]
async fn test_cleanup_leaves_other_clusters() {
    let dir = tempdir().unwrap();
    let providers_c1 = registry::clustering(&config_in(&dir, "c1")).unwrap();
    let c1 = providers_c1.membership_table;
    let c2 = registry::membership_table(&config_in(&dir, "c2")).unwrap();
    c1.initialize_membership_table(true).await.unwrap();
    c2.initialize_membership_table(true).await.unwrap();

    let cutoff = Utc::now() - Duration::minutes(30);

    let mut stale = entry("10.0.0.1", 11111, 1);
    stale.i_am_alive_time = cutoff - Duration::minutes(1);
    let mut at_cutoff = entry("10.0.0.2", 11111, 1);
    at_cutoff.i_am_alive_time = cutoff;
    c1.insert_row(&stale, Some(&TableVersion::new(0))).await.unwrap();
    c1.insert_row(&at_cutoff, Some(&TableVersion::new(0))).await.unwrap();
    c2.insert_row(&stale, Some(&TableVersion::new(0))).await.unwrap();

    c1.cleanup_defunct_silo_entries(cutoff).await.unwrap();

    let remaining: Vec<_> = c1
        .read_all()
        .await
        .unwrap()
        .members
        .into_iter()
        .map(|(e, _)| e.silo_address)
        .collect();
    assert_eq!(remaining, vec![at_cutoff.silo_address]);
    assert_eq!(c2.read_all().await.unwrap().members.len(), 1);
}

#[tokio::test]
async fn test_racing_initializers() {
    let dir = tempdir().unwrap();
    let store = MembershipStore::open(&config_in(&dir, "c1").storage.connection_string).unwrap();
    let tables: Vec<_> = (0..8)
        .map(|_| Arc::new(SqliteMembershipTable::with_store("c1", store.clone())))
        .collect();

    let results = futures::future::join_all(
        tables.iter().map(|t| t.initialize_membership_table(true)),
    )
    .await;
    assert!(results.iter().all(|r| r.is_ok()));

    // Independent handles on the same file
    for _ in 0..3 {
        let table = registry::membership_table(&config_in(&dir, "c1")).unwrap();
        table.initialize_membership_table(true).await.unwrap();
    }

    let versions = store.find_all_versions().await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version, 0);
}

#[tokio::test]
async fn test_concurrent_writers_lose_no_increment() {
    let dir = tempdir().unwrap();
    let table = Arc::new(SqliteMembershipTable::new(&config_in(&dir, "c1")).unwrap());
    table.initialize_membership_table(true).await.unwrap();

    let mut handles = Vec::new();
    for g in 1..=16 {
        let table = Arc::clone(&table);
        handles.push(tokio::spawn(async move {
            let mut e = entry("10.0.0.1", 11111, g);
            assert!(table.insert_row(&e, Some(&TableVersion::new(0))).await.unwrap());
            e.status = SiloStatus::Active;
            assert!(table.update_row(&e, "", Some(&TableVersion::new(0))).await.unwrap());
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let data = table.read_all().await.unwrap();
    assert_eq!(data.members.len(), 16);
    assert_eq!(data.version.version, 32);
    assert!(data.members.iter().all(|(_, etag)| etag == "32"));
}

#[tokio::test]
async fn test_teardown() {
    let dir = tempdir().unwrap();
    let table = registry::membership_table(&config_in(&dir, "c1")).unwrap();
    table.initialize_membership_table(true).await.unwrap();
    table
        .insert_row(&entry("10.0.0.1", 11111, 1), Some(&TableVersion::new(0)))
        .await
        .unwrap();

    table.delete_membership_table_entries("c1").await.unwrap();
    assert!(table.read_all().await.unwrap().is_empty());

    // A fresh initialization starts over at version 0
    table.initialize_membership_table(true).await.unwrap();
    table
        .insert_row(&entry("10.0.0.1", 11111, 2), Some(&TableVersion::new(0)))
        .await
        .unwrap();
    assert_eq!(table.read_all().await.unwrap().version.version, 1);
}
