//! Publishing this device's stash on the local domain

use crate::discovery::address::{lan_ipv4_addresses, PeerAddress};
use crate::discovery::types::{SERVICE_TYPE_DOMAIN, TXT_TEMPORARY, TXT_UUID};
use anyhow::{anyhow, Result};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What gets published for one running server
#[derive(Debug, Clone)]
pub struct Advertisement {
    /// Server instance id, published as the `uuid` TXT property
    pub id: Uuid,
    /// Instance name shown to browsing peers
    pub name: String,
    pub port: u16,
    /// Addresses of the designated interface; without an ipv4 one every LAN
    /// ipv4 address is published
    pub addresses: Vec<PeerAddress>,
    pub temporary: bool,
}

impl Advertisement {
    pub fn txt_properties(&self) -> HashMap<String, String> {
        let mut properties = HashMap::new();
        properties.insert(TXT_UUID.to_string(), self.id.to_string());
        properties.insert(
            TXT_TEMPORARY.to_string(),
            if self.temporary { "yes" } else { "no" }.to_string(),
        );
        properties
    }

    /// Build the mDNS service record.
    ///
    /// Only ipv4 addresses are published since the server listens on ipv4.
    pub fn service_info(&self) -> Result<ServiceInfo> {
        let ips = advertised_ips(&self.addresses, || lan_ipv4_addresses(Some(self.port)));
        if ips.is_empty() {
            return Err(anyhow!("No ipv4 address to advertise '{}' on", self.name));
        }

        ServiceInfo::new(
            SERVICE_TYPE_DOMAIN,
            &self.name,
            &local_host_name(),
            &ips[..],
            self.port,
            Some(self.txt_properties()),
        )
        .map_err(|e| anyhow!("Invalid service record for '{}': {}", self.name, e))
    }
}

/// Ipv4 addresses of the designated interface, else those from `fallback`
fn advertised_ips<F>(designated: &[PeerAddress], fallback: F) -> Vec<IpAddr>
where
    F: FnOnce() -> Vec<PeerAddress>,
{
    let ipv4 = |addresses: &[PeerAddress]| -> Vec<IpAddr> {
        addresses
            .iter()
            .filter(|addr| addr.is_ipv4())
            .map(|addr| addr.ip)
            .collect()
    };

    let ips = ipv4(designated);
    if !ips.is_empty() {
        return ips;
    }

    warn!("No ipv4 address on the designated interface, publishing every LAN ipv4 address");
    ipv4(&fallback())
}

/// `<hostname>.local.` for the machine we run on
fn local_host_name() -> String {
    let host = gethostname::gethostname().to_string_lossy().into_owned();
    let host = host.trim_end_matches('.').trim_end_matches(".local");
    let host = if host.is_empty() { "remotestash" } else { host };
    format!("{}.local.", host)
}

/// Registers and unregisters the discovery record
pub struct ServiceAdvertiser {
    daemon: Mutex<Option<ServiceDaemon>>,
    registered: Mutex<Option<String>>,
}

impl Default for ServiceAdvertiser {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceAdvertiser {
    pub fn new() -> Self {
        Self {
            daemon: Mutex::new(None),
            registered: Mutex::new(None),
        }
    }

    /// Publish a record, replacing any record we published before
    pub async fn publish(&self, advertisement: &Advertisement) -> Result<()> {
        self.unpublish().await?;

        let info = advertisement.service_info()?;
        let fullname = info.get_fullname().to_string();

        let mut daemon = self.daemon.lock().await;
        if daemon.is_none() {
            *daemon = Some(ServiceDaemon::new()?);
        }
        let daemon = daemon
            .as_ref()
            .ok_or_else(|| anyhow!("mDNS daemon not started"))?;

        daemon.register(info)?;
        info!(
            "Published {} on port {} as {}",
            advertisement.name, advertisement.port, advertisement.id
        );

        *self.registered.lock().await = Some(fullname);
        Ok(())
    }

    /// Withdraw the published record; no-op when nothing is published
    pub async fn unpublish(&self) -> Result<()> {
        let Some(fullname) = self.registered.lock().await.take() else {
            return Ok(());
        };

        if let Some(daemon) = self.daemon.lock().await.as_ref() {
            daemon.unregister(&fullname)?;
            debug!("Unpublished {}", fullname);
        }
        Ok(())
    }

    pub async fn is_published(&self) -> bool {
        self.registered.lock().await.is_some()
    }

    /// Unpublish and release the daemon
    pub async fn shutdown(&self) -> Result<()> {
        self.unpublish().await?;
        if let Some(daemon) = self.daemon.lock().await.take() {
            daemon.shutdown()?;
        }
        Ok(())
    }
}
