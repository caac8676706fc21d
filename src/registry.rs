//! Provider Registry
//!
//! Static table of clustering providers resolved by name at startup.
//! The embedding application picks a provider through
//! `storage.provider` and asks the registry to build it.

use std::sync::Arc;

use crate::config::MembershipConfig;
use crate::error::{Error, Result};
use crate::gateway::{GatewayListProvider, SqliteGatewayListProvider};
use crate::membership::{MembershipTable, SqliteMembershipTable};
use crate::store::MembershipStore;

/// Name of the built-in embedded provider
pub const DEFAULT_PROVIDER: &str = "sqlite";

/// Constructor for a silo-side membership table
pub type MembershipTableFactory = fn(&MembershipConfig) -> Result<Arc<dyn MembershipTable>>;

/// Constructor for a client-side gateway list provider
pub type GatewayListProviderFactory = fn(&MembershipConfig) -> Result<Arc<dyn GatewayListProvider>>;

/// Constructor for both halves sharing one store handle
pub type ClusteringFactory = fn(&MembershipConfig) -> Result<ClusteringProviders>;

/// A registered provider
pub struct ProviderRegistration {
    pub name: &'static str,
    pub membership_table: MembershipTableFactory,
    pub gateway_list_provider: GatewayListProviderFactory,
    pub clustering: ClusteringFactory,
}

/// Membership table and gateway list provider built together
#[derive(Clone)]
pub struct ClusteringProviders {
    pub membership_table: Arc<dyn MembershipTable>,
    pub gateway_list_provider: Arc<dyn GatewayListProvider>,
}

static PROVIDERS: &[ProviderRegistration] = &[ProviderRegistration {
    name: DEFAULT_PROVIDER,
    membership_table: sqlite_membership_table,
    gateway_list_provider: sqlite_gateway_list_provider,
    clustering: sqlite_clustering,
}];

/// Names of all registered providers
pub fn provider_names() -> impl Iterator<Item = &'static str> {
    PROVIDERS.iter().map(|p| p.name)
}

/// Look up a provider by name (case-insensitive)
pub fn lookup(name: &str) -> Result<&'static ProviderRegistration> {
    PROVIDERS
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name.trim()))
        .ok_or_else(|| {
            Error::Config(format!(
                "unknown clustering provider '{}' (registered: {})",
                name,
                provider_names().collect::<Vec<_>>().join(", ")
            ))
        })
}

/// Build the membership table named by `storage.provider`
pub fn membership_table(config: &MembershipConfig) -> Result<Arc<dyn MembershipTable>> {
    (lookup(&config.storage.provider)?.membership_table)(config)
}

/// Build the gateway list provider named by `storage.provider`
pub fn gateway_list_provider(config: &MembershipConfig) -> Result<Arc<dyn GatewayListProvider>> {
    (lookup(&config.storage.provider)?.gateway_list_provider)(config)
}

/// Build both providers named by `storage.provider`
pub fn clustering(config: &MembershipConfig) -> Result<ClusteringProviders> {
    (lookup(&config.storage.provider)?.clustering)(config)
}

fn sqlite_membership_table(config: &MembershipConfig) -> Result<Arc<dyn MembershipTable>> {
    Ok(Arc::new(SqliteMembershipTable::new(config)?))
}

fn sqlite_gateway_list_provider(config: &MembershipConfig) -> Result<Arc<dyn GatewayListProvider>> {
    Ok(Arc::new(SqliteGatewayListProvider::new(config)?))
}

fn sqlite_clustering(config: &MembershipConfig) -> Result<ClusteringProviders> {
    config.validate()?;

    let silo = config.silo_options();
    let client = config.client_options();
    let store = MembershipStore::open(&silo.connection_string)?;

    // One handle per file: only split when the client points elsewhere
    let gateway_list_provider: Arc<dyn GatewayListProvider> = if client == silo {
        Arc::new(SqliteGatewayListProvider::with_store(
            config.cluster_id(),
            store.clone(),
            config.gateway_refresh_period(),
        ))
    } else {
        Arc::new(SqliteGatewayListProvider::new(config)?)
    };

    Ok(ClusteringProviders {
        membership_table: Arc::new(SqliteMembershipTable::with_store(config.cluster_id(), store)),
        gateway_list_provider,
    })
}
