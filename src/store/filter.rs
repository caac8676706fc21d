//! Membership row filters
//!
//! Conjunctions of equality and range conditions over membership columns.
//! Every condition left unset matches all rows.

use chrono::{DateTime, Datelike, Utc};
use rusqlite::types::Value;

use crate::address::{format_timestamp, SiloAddress, TIMESTAMP_MAX_YEAR, TIMESTAMP_MIN_YEAR};
use crate::membership::SiloStatus;

/// Filter over the `membership` table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipFilter {
    cluster_id: Option<String>,
    silo: Option<(String, u16, i32)>,
    status: Option<SiloStatus>,
    gateways_only: bool,
    alive_before: Option<DateTime<Utc>>,
}

impl MembershipFilter {
    /// Match every row
    pub fn all() -> Self {
        Self::default()
    }

    /// Match every row of one cluster
    pub fn cluster(cluster_id: &str) -> Self {
        Self {
            cluster_id: Some(cluster_id.to_string()),
            ..Self::default()
        }
    }

    /// Match one silo's row within a cluster
    pub fn silo(cluster_id: &str, address: &SiloAddress) -> Self {
        Self::cluster(cluster_id).with_silo(address)
    }

    pub fn with_silo(mut self, address: &SiloAddress) -> Self {
        self.silo = Some((address.ip().to_string(), address.port(), address.generation()));
        self
    }

    pub fn with_status(mut self, status: SiloStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Only rows with a gateway port
    pub fn gateways(mut self) -> Self {
        self.gateways_only = true;
        self
    }

    /// Only rows whose last heartbeat is strictly before `cutoff`
    pub fn alive_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.alive_before = Some(cutoff);
        self
    }

    /// Render as a `WHERE` clause (empty when unconditional) and its parameters
    pub(crate) fn to_sql(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        if let Some(cluster_id) = &self.cluster_id {
            params.push(Value::Text(cluster_id.clone()));
            clauses.push(format!("cluster_id = ?{}", params.len()));
        }

        if let Some((address, port, generation)) = &self.silo {
            params.push(Value::Text(address.clone()));
            clauses.push(format!("address = ?{}", params.len()));
            params.push(Value::Integer(i64::from(*port)));
            clauses.push(format!("port = ?{}", params.len()));
            params.push(Value::Integer(i64::from(*generation)));
            clauses.push(format!("generation = ?{}", params.len()));
        }

        if let Some(status) = self.status {
            params.push(Value::Integer(i64::from(status.code())));
            clauses.push(format!("status = ?{}", params.len()));
        }

        if self.gateways_only {
            clauses.push("proxy_port > 0".to_string());
        }

        if let Some(cutoff) = &self.alive_before {
            // Stored heartbeats all have four-digit years; a cutoff outside
            // that range is either after or before every one of them
            match cutoff.year() {
                year if year > TIMESTAMP_MAX_YEAR => {}
                year if year < TIMESTAMP_MIN_YEAR => clauses.push("1 = 0".to_string()),
                _ => {
                    // Fixed-width UTC text compares chronologically
                    params.push(Value::Text(format_timestamp(cutoff)));
                    clauses.push(format!("i_am_alive_time < ?{}", params.len()));
                }
            }
        }

        if clauses.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), params)
        }
    }
}
