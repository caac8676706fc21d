//! Membership Entries
//!
//! The values exchanged with the host runtime's membership protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::SiloAddress;
use crate::error::{Error, Result};

/// Silo status as driven by the host runtime
///
/// Transitions (`Joining -> Active -> ShuttingDown | Stopping -> Dead`) are
/// decided by the caller; the table persists whatever it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SiloStatus {
    /// Silo is joining the cluster
    Joining,
    /// Silo is active and serving
    Active,
    /// Silo is shutting down gracefully
    ShuttingDown,
    /// Silo is stopping without a graceful shutdown
    Stopping,
    /// Silo is dead
    Dead,
}

impl SiloStatus {
    /// Persisted status code
    pub fn code(self) -> i32 {
        match self {
            SiloStatus::Joining => 2,
            SiloStatus::Active => 3,
            SiloStatus::ShuttingDown => 4,
            SiloStatus::Stopping => 5,
            SiloStatus::Dead => 6,
        }
    }

    /// Map a persisted status code back to a status
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            2 => Ok(SiloStatus::Joining),
            3 => Ok(SiloStatus::Active),
            4 => Ok(SiloStatus::ShuttingDown),
            5 => Ok(SiloStatus::Stopping),
            6 => Ok(SiloStatus::Dead),
            other => Err(Error::Format(format!("unknown silo status code {}", other))),
        }
    }

    /// Check if the silo is shutting down, stopping or dead
    pub fn is_terminating(self) -> bool {
        matches!(self, SiloStatus::ShuttingDown | SiloStatus::Stopping | SiloStatus::Dead)
    }
}

impl std::fmt::Display for SiloStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SiloStatus::Joining => write!(f, "JOINING"),
            SiloStatus::Active => write!(f, "ACTIVE"),
            SiloStatus::ShuttingDown => write!(f, "SHUTTING_DOWN"),
            SiloStatus::Stopping => write!(f, "STOPPING"),
            SiloStatus::Dead => write!(f, "DEAD"),
        }
    }
}

/// One silo's membership record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipEntry {
    /// Silo address (endpoint + generation)
    pub silo_address: SiloAddress,
    /// Silo name
    pub silo_name: String,
    /// Host the silo runs on
    pub host_name: String,
    /// Current status
    pub status: SiloStatus,
    /// Gateway (proxy) port; 0 if the silo is not a gateway
    pub proxy_port: u16,
    /// Who suspected this silo, and when
    pub suspect_times: Vec<(SiloAddress, DateTime<Utc>)>,
    /// When the silo process started
    pub start_time: DateTime<Utc>,
    /// Last heartbeat
    pub i_am_alive_time: DateTime<Utc>,
}

impl MembershipEntry {
    /// Create a joining entry with no suspicions, started and alive now
    pub fn new(
        silo_address: SiloAddress,
        silo_name: impl Into<String>,
        host_name: impl Into<String>,
        proxy_port: u16,
    ) -> Self {
        let now = Utc::now();
        Self {
            silo_address,
            silo_name: silo_name.into(),
            host_name: host_name.into(),
            status: SiloStatus::Joining,
            proxy_port,
            suspect_times: Vec::new(),
            start_time: now,
            i_am_alive_time: now,
        }
    }

    /// Record a suspicion raised by another silo
    pub fn add_suspector(&mut self, suspecting_silo: SiloAddress, at: DateTime<Utc>) {
        self.suspect_times.push((suspecting_silo, at));
    }
}

/// Table version: the per-cluster optimistic-concurrency token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableVersion {
    pub version: i32,
    pub version_etag: String,
}

impl TableVersion {
    pub fn new(version: i32) -> Self {
        Self {
            version,
            version_etag: version.to_string(),
        }
    }
}

impl std::fmt::Display for TableVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}, {}>", self.version, self.version_etag)
    }
}

/// Snapshot of the membership table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipTableData {
    /// `(entry, etag)` pairs
    pub members: Vec<(MembershipEntry, String)>,
    pub version: TableVersion,
}

impl MembershipTableData {
    /// A snapshot with no rows at version 0
    pub fn empty() -> Self {
        Self {
            members: Vec::new(),
            version: TableVersion::new(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
