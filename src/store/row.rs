//! Persisted rows
//!
//! Flat rows as stored in the `membership` and `membership_version`
//! tables, plus the explicit mapping to and from [`MembershipEntry`].

use std::net::IpAddr;

use chrono::{DateTime, Utc};

use crate::address::{decode_suspect_times, encode_suspect_times, SiloAddress};
use crate::error::{Error, Result};
use crate::membership::{MembershipEntry, SiloStatus};

/// One row per (cluster, address, port, generation)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipRow {
    pub cluster_id: String,
    pub address: String,
    pub port: u16,
    pub generation: i32,
    pub silo_name: String,
    pub host_name: String,
    pub status: i32,
    pub proxy_port: u16,
    pub suspect_times: String,
    pub start_time: DateTime<Utc>,
    pub i_am_alive_time: DateTime<Utc>,
}

impl MembershipRow {
    /// Flatten an entry into a row owned by `cluster_id`
    pub fn from_entry(entry: &MembershipEntry, cluster_id: &str) -> Self {
        Self {
            cluster_id: cluster_id.to_string(),
            address: entry.silo_address.ip().to_string(),
            port: entry.silo_address.port(),
            generation: entry.silo_address.generation(),
            silo_name: entry.silo_name.clone(),
            host_name: entry.host_name.clone(),
            status: entry.status.code(),
            proxy_port: entry.proxy_port,
            suspect_times: encode_suspect_times(&entry.suspect_times),
            start_time: entry.start_time,
            i_am_alive_time: entry.i_am_alive_time,
        }
    }

    /// Rebuild the entry; fails with a format error on a corrupt column
    pub fn to_entry(&self) -> Result<MembershipEntry> {
        Ok(MembershipEntry {
            silo_address: self.silo_address()?,
            silo_name: self.silo_name.clone(),
            host_name: self.host_name.clone(),
            status: SiloStatus::from_code(self.status)?,
            proxy_port: self.proxy_port,
            suspect_times: decode_suspect_times(&self.suspect_times)?,
            start_time: self.start_time,
            i_am_alive_time: self.i_am_alive_time,
        })
    }

    /// Silo address of this row
    pub fn silo_address(&self) -> Result<SiloAddress> {
        Ok(SiloAddress::new(self.ip()?, self.port, self.generation))
    }

    /// Address of this silo's gateway endpoint
    pub fn gateway_address(&self) -> Result<SiloAddress> {
        Ok(SiloAddress::new(self.ip()?, self.proxy_port, self.generation))
    }

    fn ip(&self) -> Result<IpAddr> {
        self.address
            .parse()
            .map_err(|e| Error::Format(format!("stored address '{}': {}", self.address, e)))
    }
}

/// One row per cluster holding the table version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipVersionRow {
    pub cluster_id: String,
    pub version: i32,
    pub last_update: DateTime<Utc>,
}

impl MembershipVersionRow {
    pub fn new(cluster_id: &str, version: i32) -> Self {
        Self {
            cluster_id: cluster_id.to_string(),
            version,
            last_update: Utc::now(),
        }
    }
}
