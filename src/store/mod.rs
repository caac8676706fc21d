//! Membership Store
//!
//! Embedded SQLite storage for the `membership` and `membership_version`
//! tables. One handle is opened per process and shared by cloning; the
//! connection is serialized behind an async mutex.

mod connection;
mod filter;
mod row;

pub use connection::{ConnectionString, StoreLocation, DEFAULT_BUSY_TIMEOUT};
pub use filter::MembershipFilter;
pub use row::{MembershipRow, MembershipVersionRow};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use tokio::sync::Mutex;

use crate::address::{check_timestamp, format_timestamp, parse_timestamp, SiloAddress};
use crate::error::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS membership (
    cluster_id TEXT NOT NULL,
    address TEXT NOT NULL,
    port INTEGER NOT NULL,
    generation INTEGER NOT NULL,
    silo_name TEXT NOT NULL,
    host_name TEXT NOT NULL,
    status INTEGER NOT NULL,
    proxy_port INTEGER NOT NULL,
    suspect_times TEXT NOT NULL DEFAULT '',
    start_time TEXT NOT NULL,
    i_am_alive_time TEXT NOT NULL,
    PRIMARY KEY (cluster_id, address, port, generation)
);

CREATE INDEX IF NOT EXISTS idx_membership_alive
    ON membership(cluster_id, i_am_alive_time);

CREATE TABLE IF NOT EXISTS membership_version (
    cluster_id TEXT PRIMARY KEY,
    version INTEGER NOT NULL,
    last_update TEXT NOT NULL
);
"#;

const MEMBER_COLUMNS: &str = "cluster_id, address, port, generation, silo_name, host_name, \
     status, proxy_port, suspect_times, start_time, i_am_alive_time";

/// Outcome of a version-guarded row update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionedUpdate {
    /// Version bumped and row written
    Updated,
    /// No version row for the cluster; nothing changed
    VersionMissing,
    /// No row to update; the version bump was rolled back
    RowMissing,
}

/// Shared handle to the membership database
#[derive(Clone)]
pub struct MembershipStore {
    conn: Arc<Mutex<Connection>>,
    location: StoreLocation,
}

impl MembershipStore {
    /// Open (creating if needed) the store named by a connection string
    pub fn open(connection_string: &str) -> Result<Self> {
        Self::open_with(&ConnectionString::parse(connection_string)?)
    }

    /// Open a private in-memory store
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Open the store described by a parsed connection string
    pub fn open_with(cs: &ConnectionString) -> Result<Self> {
        let conn = match &cs.location {
            StoreLocation::Memory => Connection::open_in_memory()?,
            StoreLocation::File(path) => {
                if cs.read_only {
                    Connection::open_with_flags(
                        path,
                        OpenFlags::SQLITE_OPEN_READ_ONLY
                            | OpenFlags::SQLITE_OPEN_URI
                            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                    )?
                } else {
                    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                        std::fs::create_dir_all(parent)?;
                    }
                    Connection::open(path)?
                }
            }
        };

        conn.busy_timeout(cs.busy_timeout)?;

        // A read-only handle relies on a writer having created the schema
        if !cs.read_only {
            conn.execute_batch(SCHEMA)?;
        }

        tracing::debug!("Opened membership store at {}", cs.location);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location: cs.location.clone(),
        })
    }

    /// Where this store lives
    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    // ---- membership table ----

    pub async fn find_all_members(&self) -> Result<Vec<MembershipRow>> {
        self.find_members(&MembershipFilter::all()).await
    }

    /// Rows matching a filter, in insertion order
    pub async fn find_members(&self, filter: &MembershipFilter) -> Result<Vec<MembershipRow>> {
        let conn = self.conn.lock().await;
        select_members(&conn, filter, None)
    }

    pub async fn find_member(&self, filter: &MembershipFilter) -> Result<Option<MembershipRow>> {
        let conn = self.conn.lock().await;
        Ok(select_members(&conn, filter, Some(1))?.into_iter().next())
    }

    pub async fn member_exists(&self, filter: &MembershipFilter) -> Result<bool> {
        let conn = self.conn.lock().await;
        let (clause, values) = filter.to_sql();
        let exists: bool = conn.query_row(
            &format!("SELECT EXISTS(SELECT 1 FROM membership{})", clause),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Insert a row; a duplicate identity fails with [`crate::Error::Conflict`]
    pub async fn insert_member(&self, row: &MembershipRow) -> Result<()> {
        let conn = self.conn.lock().await;
        insert_member_row(&conn, row)
    }

    /// Overwrite the row with the same identity; false if it no longer exists
    pub async fn update_member(&self, row: &MembershipRow) -> Result<bool> {
        let conn = self.conn.lock().await;
        update_member_row(&conn, row)
    }

    /// Delete matching rows, returning how many were removed
    pub async fn delete_members(&self, filter: &MembershipFilter) -> Result<usize> {
        let conn = self.conn.lock().await;
        let (clause, values) = filter.to_sql();
        let deleted = conn.execute(
            &format!("DELETE FROM membership{}", clause),
            params_from_iter(values.iter()),
        )?;
        Ok(deleted)
    }

    // ---- version table ----

    pub async fn find_all_versions(&self) -> Result<Vec<MembershipVersionRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT cluster_id, version, last_update FROM membership_version ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], version_from_row)?;

        let mut versions = Vec::new();
        for result in rows {
            versions.push(result?);
        }

        Ok(versions)
    }

    pub async fn find_version(&self, cluster_id: &str) -> Result<Option<MembershipVersionRow>> {
        let conn = self.conn.lock().await;
        select_version(&conn, cluster_id)
    }

    pub async fn version_exists(&self, cluster_id: &str) -> Result<bool> {
        Ok(self.find_version(cluster_id).await?.is_some())
    }

    /// Insert a version row; a second row for the cluster fails with [`crate::Error::Conflict`]
    pub async fn insert_version(&self, row: &MembershipVersionRow) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO membership_version (cluster_id, version, last_update) VALUES (?1, ?2, ?3)",
            params![row.cluster_id, row.version, format_timestamp(&row.last_update)],
        )?;
        Ok(())
    }

    pub async fn update_version(&self, row: &MembershipVersionRow) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE membership_version SET version = ?2, last_update = ?3 WHERE cluster_id = ?1",
            params![row.cluster_id, row.version, format_timestamp(&row.last_update)],
        )?;
        Ok(changed > 0)
    }

    /// Add one to the cluster's version; false if the cluster has no version row
    pub async fn increment_version(&self, cluster_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        increment_version_row(&conn, cluster_id, Utc::now())
    }

    pub async fn delete_versions(&self, cluster_id: &str) -> Result<usize> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM membership_version WHERE cluster_id = ?1",
            params![cluster_id],
        )?;
        Ok(deleted)
    }

    // ---- compound operations ----

    /// Insert a row and bump its cluster's version in one transaction
    ///
    /// Returns false, leaving the table untouched, when the cluster has no
    /// version row.
    pub async fn insert_member_and_increment(&self, row: &MembershipRow) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        insert_member_row(&tx, row)?;
        if !increment_version_row(&tx, &row.cluster_id, Utc::now())? {
            return Ok(false);
        }

        tx.commit()?;
        Ok(true)
    }

    /// Bump the cluster's version, then apply `update` to one silo's row,
    /// in one transaction
    pub async fn update_member_versioned<F>(
        &self,
        cluster_id: &str,
        address: &SiloAddress,
        update: F,
    ) -> Result<VersionedUpdate>
    where
        F: FnOnce(&mut MembershipRow) + Send,
    {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        if !increment_version_row(&tx, cluster_id, Utc::now())? {
            return Ok(VersionedUpdate::VersionMissing);
        }

        let filter = MembershipFilter::silo(cluster_id, address);
        let mut row = match select_members(&tx, &filter, Some(1))?.into_iter().next() {
            Some(row) => row,
            None => return Ok(VersionedUpdate::RowMissing),
        };

        update(&mut row);
        if !update_member_row(&tx, &row)? {
            return Ok(VersionedUpdate::RowMissing);
        }

        tx.commit()?;
        Ok(VersionedUpdate::Updated)
    }

    /// Matching rows plus the cluster's version row, read in one transaction
    pub async fn snapshot(
        &self,
        cluster_id: &str,
        filter: &MembershipFilter,
    ) -> Result<(Vec<MembershipRow>, Option<MembershipVersionRow>)> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let rows = select_members(&tx, filter, None)?;
        let version = select_version(&tx, cluster_id)?;

        tx.commit()?;
        Ok((rows, version))
    }

    /// Delete a cluster's rows and version row, returning the number of membership rows removed
    pub async fn delete_cluster(&self, cluster_id: &str) -> Result<usize> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let removed = tx.execute("DELETE FROM membership WHERE cluster_id = ?1", params![cluster_id])?;
        tx.execute("DELETE FROM membership_version WHERE cluster_id = ?1", params![cluster_id])?;

        tx.commit()?;
        Ok(removed)
    }
}

fn select_members(
    conn: &Connection,
    filter: &MembershipFilter,
    limit: Option<usize>,
) -> Result<Vec<MembershipRow>> {
    let (clause, values) = filter.to_sql();
    let mut sql = format!("SELECT {} FROM membership{} ORDER BY rowid", MEMBER_COLUMNS, clause);
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), member_from_row)?;

    let mut members = Vec::new();
    for result in rows {
        members.push(result?);
    }

    Ok(members)
}

fn insert_member_row(conn: &Connection, row: &MembershipRow) -> Result<()> {
    check_row_times(row)?;
    conn.execute(
        &format!(
            "INSERT INTO membership ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            MEMBER_COLUMNS
        ),
        params![
            row.cluster_id,
            row.address,
            row.port,
            row.generation,
            row.silo_name,
            row.host_name,
            row.status,
            row.proxy_port,
            row.suspect_times,
            format_timestamp(&row.start_time),
            format_timestamp(&row.i_am_alive_time),
        ],
    )?;
    Ok(())
}

fn update_member_row(conn: &Connection, row: &MembershipRow) -> Result<bool> {
    check_row_times(row)?;
    let changed = conn.execute(
        r#"
        UPDATE membership SET
            silo_name = ?5,
            host_name = ?6,
            status = ?7,
            proxy_port = ?8,
            suspect_times = ?9,
            start_time = ?10,
            i_am_alive_time = ?11
        WHERE cluster_id = ?1 AND address = ?2 AND port = ?3 AND generation = ?4
        "#,
        params![
            row.cluster_id,
            row.address,
            row.port,
            row.generation,
            row.silo_name,
            row.host_name,
            row.status,
            row.proxy_port,
            row.suspect_times,
            format_timestamp(&row.start_time),
            format_timestamp(&row.i_am_alive_time),
        ],
    )?;
    Ok(changed > 0)
}

// Stored as text; only four-digit years compare chronologically
fn check_row_times(row: &MembershipRow) -> Result<()> {
    check_timestamp(&row.start_time)?;
    check_timestamp(&row.i_am_alive_time)
}

fn increment_version_row(conn: &Connection, cluster_id: &str, at: DateTime<Utc>) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE membership_version SET version = version + 1, last_update = ?2 WHERE cluster_id = ?1",
        params![cluster_id, format_timestamp(&at)],
    )?;
    Ok(changed > 0)
}

fn select_version(conn: &Connection, cluster_id: &str) -> Result<Option<MembershipVersionRow>> {
    let version = conn
        .query_row(
            "SELECT cluster_id, version, last_update FROM membership_version WHERE cluster_id = ?1",
            params![cluster_id],
            version_from_row,
        )
        .optional()?;
    Ok(version)
}

fn member_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MembershipRow> {
    Ok(MembershipRow {
        cluster_id: row.get(0)?,
        address: row.get(1)?,
        port: row.get(2)?,
        generation: row.get(3)?,
        silo_name: row.get(4)?,
        host_name: row.get(5)?,
        status: row.get(6)?,
        proxy_port: row.get(7)?,
        suspect_times: row.get(8)?,
        start_time: timestamp_column(row, 9)?,
        i_am_alive_time: timestamp_column(row, 10)?,
    })
}

fn version_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MembershipVersionRow> {
    Ok(MembershipVersionRow {
        cluster_id: row.get(0)?,
        version: row.get(1)?,
        last_update: timestamp_column(row, 2)?,
    })
}

fn timestamp_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_timestamp(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::membership::{MembershipEntry, SiloStatus};
    use chrono::Duration;
    use tempfile::tempdir;

    fn addr(ip: &str, port: u16, generation: i32) -> SiloAddress {
        SiloAddress::new(ip.parse().unwrap(), port, generation)
    }

    fn row(cluster_id: &str, address: SiloAddress) -> MembershipRow {
        MembershipRow::from_entry(
            &MembershipEntry::new(address, "silo", "host", 30000),
            cluster_id,
        )
    }

    #[tokio::test]
    async fn test_member_crud() {
        let store = MembershipStore::open_in_memory().unwrap();
        let a = addr("10.0.0.1", 11111, 1);
        let b = addr("10.0.0.2", 11111, 1);

        store.insert_member(&row("c1", a)).await.unwrap();
        store.insert_member(&row("c1", b)).await.unwrap();
        store.insert_member(&row("c2", a)).await.unwrap();

        assert_eq!(store.find_all_members().await.unwrap().len(), 3);
        assert_eq!(store.find_members(&MembershipFilter::cluster("c1")).await.unwrap().len(), 2);
        assert!(store.member_exists(&MembershipFilter::silo("c2", &a)).await.unwrap());
        assert!(!store.member_exists(&MembershipFilter::silo("c2", &b)).await.unwrap());

        let mut found = store
            .find_member(&MembershipFilter::silo("c1", &b))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.address, "10.0.0.2");

        found.status = SiloStatus::Dead.code();
        assert!(store.update_member(&found).await.unwrap());
        let reread = store
            .find_member(&MembershipFilter::silo("c1", &b))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reread, found);

        assert_eq!(store.delete_members(&MembershipFilter::cluster("c1")).await.unwrap(), 2);
        assert!(!store.update_member(&found).await.unwrap());
        assert_eq!(store.find_all_members().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insertion_order() {
        let store = MembershipStore::open_in_memory().unwrap();
        for port in [30003, 30001, 30002] {
            store.insert_member(&row("c1", addr("10.0.0.1", port, 1))).await.unwrap();
        }
        let ports: Vec<u16> = store
            .find_all_members()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.port)
            .collect();
        assert_eq!(ports, vec![30003, 30001, 30002]);
    }

    #[tokio::test]
    async fn test_duplicate_member_conflicts() {
        let store = MembershipStore::open_in_memory().unwrap();
        let r = row("c1", addr("10.0.0.1", 11111, 1));
        store.insert_member(&r).await.unwrap();

        let err = store.insert_member(&r).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.find_all_members().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_version_rows() {
        let store = MembershipStore::open_in_memory().unwrap();
        assert!(!store.version_exists("c1").await.unwrap());
        assert!(!store.increment_version("c1").await.unwrap());

        store.insert_version(&MembershipVersionRow::new("c1", 0)).await.unwrap();
        assert!(matches!(
            store.insert_version(&MembershipVersionRow::new("c1", 0)).await,
            Err(Error::Conflict(_))
        ));

        assert!(store.increment_version("c1").await.unwrap());
        assert!(store.increment_version("c1").await.unwrap());
        assert_eq!(store.find_version("c1").await.unwrap().unwrap().version, 2);

        assert!(store.update_version(&MembershipVersionRow::new("c1", 10)).await.unwrap());
        assert_eq!(store.find_version("c1").await.unwrap().unwrap().version, 10);
        assert!(!store.update_version(&MembershipVersionRow::new("c9", 1)).await.unwrap());

        assert_eq!(store.find_all_versions().await.unwrap().len(), 1);
        assert_eq!(store.delete_versions("c1").await.unwrap(), 1);
        assert!(store.find_version("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_without_version_row_rolls_back() {
        let store = MembershipStore::open_in_memory().unwrap();
        let r = row("c1", addr("10.0.0.1", 11111, 1));

        assert!(!store.insert_member_and_increment(&r).await.unwrap());
        assert!(store.find_all_members().await.unwrap().is_empty());

        store.insert_version(&MembershipVersionRow::new("c1", 0)).await.unwrap();
        assert!(store.insert_member_and_increment(&r).await.unwrap());
        assert_eq!(store.find_version("c1").await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_versioned_update() {
        let store = MembershipStore::open_in_memory().unwrap();
        let a = addr("10.0.0.1", 11111, 1);

        let outcome = store.update_member_versioned("c1", &a, |_| {}).await.unwrap();
        assert_eq!(outcome, VersionedUpdate::VersionMissing);

        store.insert_version(&MembershipVersionRow::new("c1", 0)).await.unwrap();
        let outcome = store.update_member_versioned("c1", &a, |_| {}).await.unwrap();
        assert_eq!(outcome, VersionedUpdate::RowMissing);
        assert_eq!(store.find_version("c1").await.unwrap().unwrap().version, 0);

        store.insert_member(&row("c1", a)).await.unwrap();
        let outcome = store
            .update_member_versioned("c1", &a, |r| r.status = SiloStatus::Active.code())
            .await
            .unwrap();
        assert_eq!(outcome, VersionedUpdate::Updated);
        assert_eq!(store.find_version("c1").await.unwrap().unwrap().version, 1);
        let updated = store.find_member(&MembershipFilter::silo("c1", &a)).await.unwrap().unwrap();
        assert_eq!(updated.status, SiloStatus::Active.code());
    }

    #[tokio::test]
    async fn test_alive_before_filter() {
        let store = MembershipStore::open_in_memory().unwrap();
        let now = Utc::now();

        let mut stale = row("c1", addr("10.0.0.1", 11111, 1));
        stale.i_am_alive_time = now - Duration::minutes(10);
        let mut fresh = row("c1", addr("10.0.0.2", 11111, 1));
        fresh.i_am_alive_time = now;
        store.insert_member(&stale).await.unwrap();
        store.insert_member(&fresh).await.unwrap();

        let cutoff = now - Duration::minutes(5);
        let old = store
            .find_members(&MembershipFilter::cluster("c1").alive_before(cutoff))
            .await
            .unwrap();
        assert_eq!(old, vec![stale]);
    }

    #[tokio::test]
    async fn test_rejects_unsortable_timestamps() {
        use chrono::TimeZone;

        let store = MembershipStore::open_in_memory().unwrap();
        let mut far = row("c1", addr("10.0.0.1", 11111, 1));
        far.i_am_alive_time = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();

        assert!(matches!(store.insert_member(&far).await, Err(Error::Format(_))));
        assert!(store.find_all_members().await.unwrap().is_empty());

        let mut ok = row("c1", addr("10.0.0.1", 11111, 1));
        store.insert_member(&ok).await.unwrap();
        ok.start_time = Utc.with_ymd_and_hms(-5, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(store.update_member(&ok).await, Err(Error::Format(_))));
    }

    #[tokio::test]
    async fn test_file_store_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("membership.db");
        let cs = format!("Filename={};Timeout=1000", path.display());

        {
            let store = MembershipStore::open(&cs).unwrap();
            store.insert_version(&MembershipVersionRow::new("c1", 3)).await.unwrap();
            store.insert_member(&row("c1", addr("10.0.0.1", 11111, 1))).await.unwrap();
        }

        let store = MembershipStore::open(&cs).unwrap();
        assert_eq!(store.location(), &StoreLocation::File(path.clone()));
        assert_eq!(store.find_version("c1").await.unwrap().unwrap().version, 3);
        assert_eq!(store.find_all_members().await.unwrap().len(), 1);

        let reader = MembershipStore::open(&format!("Filename={};ReadOnly=true", path.display())).unwrap();
        assert_eq!(reader.find_all_members().await.unwrap().len(), 1);
        assert!(reader.increment_version("c1").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_cluster() {
        let store = MembershipStore::open_in_memory().unwrap();
        store.insert_version(&MembershipVersionRow::new("c1", 0)).await.unwrap();
        store.insert_version(&MembershipVersionRow::new("c2", 0)).await.unwrap();
        store.insert_member(&row("c1", addr("10.0.0.1", 11111, 1))).await.unwrap();
        store.insert_member(&row("c2", addr("10.0.0.1", 11111, 1))).await.unwrap();

        assert_eq!(store.delete_cluster("c1").await.unwrap(), 1);
        assert!(store.find_version("c1").await.unwrap().is_none());
        assert!(store.find_version("c2").await.unwrap().is_some());
        assert_eq!(store.find_all_members().await.unwrap().len(), 1);
    }
}
