//! Membership Table
//!
//! The versioned, clusterwide table of silo liveness consumed by the
//! host runtime's membership protocol.

mod entry;
mod table;

pub use entry::{MembershipEntry, MembershipTableData, SiloStatus, TableVersion};
pub use table::SqliteMembershipTable;

use chrono::{DateTime, Utc};

use crate::address::SiloAddress;
use crate::error::Result;

/// Membership table contract
#[async_trait::async_trait]
pub trait MembershipTable: Send + Sync {
    /// Create the cluster's version row (version 0) if asked and absent
    async fn initialize_membership_table(&self, try_init_table_version: bool) -> Result<()>;

    /// Remove every row and the version row of `cluster_id`
    async fn delete_membership_table_entries(&self, cluster_id: &str) -> Result<()>;

    /// Best-effort removal of this cluster's rows whose heartbeat is before `before`
    async fn cleanup_defunct_silo_entries(&self, before: DateTime<Utc>) -> Result<()>;

    /// Snapshot holding the row for one silo (or none)
    async fn read_row(&self, key: &SiloAddress) -> Result<MembershipTableData>;

    /// Snapshot holding every row of this cluster
    async fn read_all(&self) -> Result<MembershipTableData>;

    /// Insert a silo's row and bump the table version
    async fn insert_row(
        &self,
        entry: &MembershipEntry,
        table_version: Option<&TableVersion>,
    ) -> Result<bool>;

    /// Bump the table version and overwrite a silo's status, suspicions and heartbeat
    async fn update_row(
        &self,
        entry: &MembershipEntry,
        etag: &str,
        table_version: Option<&TableVersion>,
    ) -> Result<bool>;

    /// Overwrite only the heartbeat; the table version is untouched
    async fn update_i_am_alive(&self, entry: &MembershipEntry) -> Result<()>;
}
