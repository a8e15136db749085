//! Service discovery for finding and advertising remote stashes on the LAN

pub mod address;
pub mod advertiser;
pub mod browser;
pub mod registry;
pub mod types;


use anyhow::Result;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

pub use address::{
    available_addresses, available_port, default_interface, lan_ipv4_addresses, AddressFamily,
    PeerAddress,
};
pub use advertiser::{Advertisement, ServiceAdvertiser};
pub use browser::{ServiceBrowser, ShouldAdd, RESOLVE_TIMEOUT};
pub use registry::Registry;
pub use types::{AddOutcome, DiscoveryEvent, PeerRecord, SERVICE_TYPE, SERVICE_TYPE_DOMAIN};

/// Browsing and advertising combined around one registry
pub struct DiscoveryService {
    registry: Registry,
    browser: ServiceBrowser,
    advertiser: ServiceAdvertiser,
}

impl DiscoveryService {
    /// Create a discovery service; records carrying `own_id` are never registered
    pub fn new(own_id: Option<Uuid>, resolve_timeout: Duration) -> Self {
        let registry = Registry::new();
        let browser = ServiceBrowser::with_should_add(registry.clone(), move |record| {
            own_id.is_none() || record.id != own_id
        })
        .with_resolve_timeout(resolve_timeout);

        Self {
            registry,
            browser,
            advertiser: ServiceAdvertiser::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.registry.subscribe()
    }

    /// Run a resolved record through this service's completion path
    pub async fn complete(&self, record: PeerRecord) -> AddOutcome {
        ServiceBrowser::complete(record, &self.registry, self.browser.should_add()).await
    }

    pub async fn start_browsing(&self) -> Result<()> {
        self.browser.start().await
    }

    pub async fn announce(&self, advertisement: &Advertisement) -> Result<()> {
        self.advertiser.publish(advertisement).await
    }

    pub async fn withdraw(&self) -> Result<()> {
        self.advertiser.unpublish().await
    }

    /// Wait until a peer matching `name` (or any peer) is registered
    pub async fn wait_for_peer(&self, name: Option<&str>, timeout: Duration) -> Option<PeerRecord> {
        let mut events = self.registry.subscribe();

        let lookup = || async {
            match name {
                Some(needle) => self.registry.find_by_name(needle).await,
                None => self.registry.current().await,
            }
        };

        if let Some(peer) = lookup().await {
            return Some(peer);
        }

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(DiscoveryEvent::PeerAdded(peer)) => {
                        if name.map_or(true, |needle| peer.display_name.contains(needle)) {
                            return Some(peer);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Some(peer) = lookup().await {
                            return Some(peer);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };

        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }

    /// Stop browsing and withdraw our record
    pub async fn stop(&self) -> Result<()> {
        self.browser.stop().await?;
        self.advertiser.shutdown().await
    }
}
