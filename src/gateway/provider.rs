//! SQLite-backed gateway list provider

use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, trace};

use crate::address::GatewayUri;
use crate::config::{MembershipConfig, StorageOptions};
use crate::error::{Error, Result};
use crate::gateway::GatewayListProvider;
use crate::membership::SiloStatus;
use crate::store::{MembershipFilter, MembershipStore};

/// Gateway list provider scoped to one cluster
pub struct SqliteGatewayListProvider {
    cluster_id: String,
    options: StorageOptions,
    max_staleness: Duration,
    store: OnceCell<MembershipStore>,
}

impl SqliteGatewayListProvider {
    /// Validate the client options; the store is opened on initialization
    pub fn new(config: &MembershipConfig) -> Result<Self> {
        let options = config.client_options();
        options.validate("gateway list provider")?;
        Ok(Self {
            cluster_id: config.cluster_id().to_string(),
            options,
            max_staleness: config.gateway_refresh_period(),
            store: OnceCell::new(),
        })
    }

    /// Use an already opened store handle; no initialization needed
    pub fn with_store(cluster_id: impl Into<String>, store: MembershipStore, max_staleness: Duration) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            options: StorageOptions {
                connection_string: store.location().to_string(),
            },
            max_staleness,
            store: OnceCell::new_with(Some(store)),
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    async fn query_gateways(&self, store: &MembershipStore) -> Result<Vec<GatewayUri>> {
        let filter = MembershipFilter::cluster(&self.cluster_id)
            .with_status(SiloStatus::Active)
            .gateways();

        store
            .find_members(&filter)
            .await?
            .iter()
            .map(|row| Ok(row.gateway_address()?.to_gateway_uri()))
            .collect()
    }
}

#[async_trait::async_trait]
impl GatewayListProvider for SqliteGatewayListProvider {
    async fn initialize_gateway_list_provider(&self) -> Result<()> {
        trace!("InitializeGatewayListProvider called for cluster {}", self.cluster_id);

        self.store
            .get_or_try_init(|| async { MembershipStore::open(&self.options.connection_string) })
            .await
            .map_err(|e| {
                debug!("InitializeGatewayListProvider failed: {}", e);
                e
            })?;

        Ok(())
    }

    async fn get_gateways(&self) -> Result<Vec<GatewayUri>> {
        trace!("GetGateways called for cluster {}", self.cluster_id);

        let store = self.store.get().ok_or_else(|| {
            Error::NotInitialized("gateway list provider: call initialize_gateway_list_provider first".into())
        })?;

        self.query_gateways(store).await.map_err(|e| {
            debug!("GetGateways failed: {}", e);
            e
        })
    }

    fn max_staleness(&self) -> Duration {
        self.max_staleness
    }

    fn is_updatable(&self) -> bool {
        true
    }
}
