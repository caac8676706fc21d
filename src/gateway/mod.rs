//! Gateway Discovery
//!
//! Client-side list of reachable gateway endpoints, read from the
//! membership table. Refresh cadence belongs to the caller, guided by
//! [`GatewayListProvider::max_staleness`].

mod provider;

pub use provider::SqliteGatewayListProvider;

use std::time::Duration;

use crate::address::GatewayUri;
use crate::error::Result;

/// Gateway discovery contract
#[async_trait::async_trait]
pub trait GatewayListProvider: Send + Sync {
    /// Open the backing store; must precede [`GatewayListProvider::get_gateways`]
    async fn initialize_gateway_list_provider(&self) -> Result<()>;

    /// Gateways of active silos, in store order
    async fn get_gateways(&self) -> Result<Vec<GatewayUri>>;

    /// How long a fetched list may be used before it should be refreshed
    fn max_staleness(&self) -> Duration;

    /// Whether the list can change while the client runs
    fn is_updatable(&self) -> bool;
}
