//! SQLite-backed membership table

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace};

use crate::address::{check_timestamp, SiloAddress};
use crate::config::MembershipConfig;
use crate::error::{Error, Result};
use crate::membership::{MembershipEntry, MembershipTable, MembershipTableData, TableVersion};
use crate::store::{MembershipFilter, MembershipRow, MembershipStore, MembershipVersionRow, VersionedUpdate};

/// Membership table scoped to one cluster
pub struct SqliteMembershipTable {
    cluster_id: String,
    store: MembershipStore,
}

impl SqliteMembershipTable {
    /// Validate the silo options and open the store they name
    pub fn new(config: &MembershipConfig) -> Result<Self> {
        let options = config.silo_options();
        options.validate("membership table")?;
        let store = MembershipStore::open(&options.connection_string)?;
        Ok(Self::with_store(config.cluster_id(), store))
    }

    /// Use an already opened store handle
    pub fn with_store(cluster_id: impl Into<String>, store: MembershipStore) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            store,
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn store(&self) -> &MembershipStore {
        &self.store
    }

    /// Insert the version row; true if this call created it
    async fn init_table_version(&self) -> Result<bool> {
        if self.store.version_exists(&self.cluster_id).await? {
            return Ok(false);
        }

        match self
            .store
            .insert_version(&MembershipVersionRow::new(&self.cluster_id, 0))
            .await
        {
            Ok(()) => Ok(true),
            // Another initializer got there first
            Err(e) if e.is_conflict() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn try_insert_row(&self, row: &MembershipRow, address: &SiloAddress) -> Result<bool> {
        let filter = MembershipFilter::silo(&self.cluster_id, address);
        if self.store.member_exists(&filter).await? {
            trace!("Row for {} already present in cluster {}", address, self.cluster_id);
            return Ok(true);
        }

        match self.store.insert_member_and_increment(row).await {
            Err(e) if e.is_conflict() => Ok(true),
            other => other,
        }
    }

    async fn try_update_i_am_alive(&self, entry: &MembershipEntry) -> Result<()> {
        let filter = MembershipFilter::silo(&self.cluster_id, &entry.silo_address);
        let mut row = self
            .store
            .find_member(&filter)
            .await?
            .ok_or_else(|| Error::NotFound(entry.silo_address.to_string()))?;

        row.i_am_alive_time = entry.i_am_alive_time;

        if !self.store.update_member(&row).await? {
            return Err(Error::NotFound(entry.silo_address.to_string()));
        }
        Ok(())
    }

    async fn read(&self, filter: MembershipFilter) -> Result<MembershipTableData> {
        let (rows, version) = self.store.snapshot(&self.cluster_id, &filter).await?;
        if rows.is_empty() {
            return Ok(MembershipTableData::empty());
        }

        let version = TableVersion::new(version.map(|v| v.version).unwrap_or(0));
        let members = rows
            .iter()
            .map(|row| Ok((row.to_entry()?, version.version_etag.clone())))
            .collect::<Result<Vec<_>>>()?;

        Ok(MembershipTableData { members, version })
    }
}

fn require_entry(entry: &MembershipEntry, operation: &str) -> Result<()> {
    if entry.silo_address.is_zero() {
        debug!("{} aborted: membership entry has no silo address", operation);
        return Err(Error::Argument("entry".into()));
    }
    Ok(())
}

fn require_storable_times(entry: &MembershipEntry, operation: &str) -> Result<()> {
    let times = [entry.start_time, entry.i_am_alive_time]
        .into_iter()
        .chain(entry.suspect_times.iter().map(|(_, at)| *at));

    for ts in times {
        if let Err(e) = check_timestamp(&ts) {
            debug!("{} aborted: {}", operation, e);
            return Err(e);
        }
    }
    Ok(())
}

fn require_version<'a>(table_version: Option<&'a TableVersion>, operation: &str) -> Result<&'a TableVersion> {
    table_version.ok_or_else(|| {
        debug!("{} aborted: table version is missing", operation);
        Error::Argument("table_version".into())
    })
}

#[async_trait::async_trait]
impl MembershipTable for SqliteMembershipTable {
    async fn initialize_membership_table(&self, try_init_table_version: bool) -> Result<()> {
        trace!(
            "InitializeMembershipTable called for cluster {} (try_init_table_version={})",
            self.cluster_id, try_init_table_version
        );

        // Every silo may try: the first writer creates the row, the rest see it present
        if try_init_table_version {
            match self.init_table_version().await {
                Ok(true) => info!("Created new table version row for cluster {}", self.cluster_id),
                Ok(false) => {}
                Err(e) => {
                    debug!("InitializeMembershipTable failed: {}", e);
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    async fn delete_membership_table_entries(&self, cluster_id: &str) -> Result<()> {
        trace!("DeleteMembershipTableEntries called for cluster {}", cluster_id);

        match self.store.delete_cluster(cluster_id).await {
            Ok(removed) => {
                debug!("Deleted {} membership rows of cluster {}", removed, cluster_id);
                Ok(())
            }
            Err(e) => {
                debug!("DeleteMembershipTableEntries failed: {}", e);
                Err(e)
            }
        }
    }

    async fn cleanup_defunct_silo_entries(&self, before: DateTime<Utc>) -> Result<()> {
        trace!(
            "CleanupDefunctSiloEntries called for cluster {} with cutoff {}",
            self.cluster_id, before
        );

        let filter = MembershipFilter::cluster(&self.cluster_id).alive_before(before);
        match self.store.delete_members(&filter).await {
            Ok(removed) => debug!("Removed {} defunct silo entries", removed),
            // Hygiene sweep: never fail the caller
            Err(e) => debug!("CleanupDefunctSiloEntries failed: {}", e),
        }

        Ok(())
    }

    async fn read_row(&self, key: &SiloAddress) -> Result<MembershipTableData> {
        trace!("ReadRow called with key {}", key);

        self.read(MembershipFilter::silo(&self.cluster_id, key))
            .await
            .map_err(|e| {
                debug!("ReadRow failed: {}", e);
                e
            })
    }

    async fn read_all(&self) -> Result<MembershipTableData> {
        trace!("ReadAll called for cluster {}", self.cluster_id);

        self.read(MembershipFilter::cluster(&self.cluster_id))
            .await
            .map_err(|e| {
                debug!("ReadAll failed: {}", e);
                e
            })
    }

    async fn insert_row(
        &self,
        entry: &MembershipEntry,
        table_version: Option<&TableVersion>,
    ) -> Result<bool> {
        trace!(
            "InsertRow called with entry {} ({}) and table version {:?}",
            entry.silo_address, entry.status, table_version
        );

        require_entry(entry, "InsertRow")?;
        require_version(table_version, "InsertRow")?;
        require_storable_times(entry, "InsertRow")?;

        let row = MembershipRow::from_entry(entry, &self.cluster_id);
        self.try_insert_row(&row, &entry.silo_address)
            .await
            .map_err(|e| {
                debug!("InsertRow failed: {}", e);
                e
            })
    }

    async fn update_row(
        &self,
        entry: &MembershipEntry,
        etag: &str,
        table_version: Option<&TableVersion>,
    ) -> Result<bool> {
        trace!(
            "UpdateRow called with entry {} ({}), etag {:?} and table version {:?}",
            entry.silo_address, entry.status, etag, table_version
        );

        require_entry(entry, "UpdateRow")?;
        require_version(table_version, "UpdateRow")?;
        require_storable_times(entry, "UpdateRow")?;

        let new_row = MembershipRow::from_entry(entry, &self.cluster_id);
        let outcome = self
            .store
            .update_member_versioned(&self.cluster_id, &entry.silo_address, move |row| {
                row.status = new_row.status;
                row.suspect_times = new_row.suspect_times;
                row.i_am_alive_time = new_row.i_am_alive_time;
            })
            .await
            .map_err(|e| {
                debug!("UpdateRow failed: {}", e);
                e
            })?;

        match outcome {
            VersionedUpdate::Updated => Ok(true),
            VersionedUpdate::VersionMissing => {
                debug!("UpdateRow: no table version row for cluster {}", self.cluster_id);
                Ok(false)
            }
            VersionedUpdate::RowMissing => {
                debug!("UpdateRow failed: no row for {}", entry.silo_address);
                Err(Error::NotFound(entry.silo_address.to_string()))
            }
        }
    }

    async fn update_i_am_alive(&self, entry: &MembershipEntry) -> Result<()> {
        trace!("UpdateIAmAlive called with entry {}", entry.silo_address);

        require_entry(entry, "UpdateIAmAlive")?;
        require_storable_times(entry, "UpdateIAmAlive")?;

        self.try_update_i_am_alive(entry).await.map_err(|e| {
            debug!("UpdateIAmAlive failed: {}", e);
            e
        })
    }
}
