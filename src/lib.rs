//! WolfMembership - Embedded Cluster Membership Provider
//!
//! Keeps an actor cluster's membership table and gateway list in a
//! local SQLite file instead of a cloud table or relational server.
//!
//! # Architecture
//!
//! The host runtime drives everything: it calls the
//! [`membership::MembershipTable`] contract on its gossip and heartbeat
//! schedule, and the [`gateway::GatewayListProvider`] contract on its
//! gateway refresh timer. Nothing here runs in the background.
//!
//! # Features
//!
//! - Versioned membership table with an atomic per-cluster version counter
//! - Idempotent table initialization across racing silos
//! - Gateway discovery of active, gateway-capable silos
//! - Best-effort cleanup of silos that stopped heartbeating
//! - Name-based provider registry for startup wiring

pub mod address;
pub mod config;
pub mod error;
pub mod gateway;
pub mod membership;
pub mod registry;
pub mod store;

pub use config::MembershipConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::address::{GatewayUri, SiloAddress};
    pub use crate::config::MembershipConfig;
    pub use crate::error::{Error, Result};
    pub use crate::gateway::{GatewayListProvider, SqliteGatewayListProvider};
    pub use crate::membership::{
        MembershipEntry, MembershipTable, MembershipTableData, SiloStatus, SqliteMembershipTable,
        TableVersion,
    };
    pub use crate::registry::ClusteringProviders;
    pub use crate::store::MembershipStore;
}
