//! mDNS/DNS-SD browsing for remote stashes

use crate::discovery::registry::Registry;
use crate::discovery::types::{AddOutcome, PeerRecord, SERVICE_TYPE_DOMAIN};
use anyhow::{anyhow, Result};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo, TxtProperties};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Default time allowed for one record to resolve
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Predicate deciding whether a resolved peer should be registered
pub type ShouldAdd = Arc<dyn Fn(&PeerRecord) -> bool + Send + Sync>;

/// Continuously browses for stash records and feeds resolved peers into a [`Registry`]
pub struct ServiceBrowser {
    daemon: Arc<Mutex<Option<ServiceDaemon>>>,
    registry: Registry,
    should_add: ShouldAdd,
    resolve_timeout: Duration,
    browse_handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

/// State shared by the browse loop and its resolution tasks
#[derive(Clone)]
struct BrowseContext {
    registry: Registry,
    should_add: ShouldAdd,
    resolve_timeout: Duration,
}

impl ServiceBrowser {
    /// Browser that accepts every resolved peer
    pub fn new(registry: Registry) -> Self {
        Self::with_should_add(registry, |_| true)
    }

    /// Browser with a custom should-add predicate (e.g. to skip our own server)
    pub fn with_should_add<F>(registry: Registry, should_add: F) -> Self
    where
        F: Fn(&PeerRecord) -> bool + Send + Sync + 'static,
    {
        Self {
            daemon: Arc::new(Mutex::new(None)),
            registry,
            should_add: Arc::new(should_add),
            resolve_timeout: RESOLVE_TIMEOUT,
            browse_handle: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn should_add(&self) -> &ShouldAdd {
        &self.should_add
    }

    /// Start browsing on the local domain
    pub async fn start(&self) -> Result<()> {
        let mut daemon_slot = self.daemon.lock().await;
        if daemon_slot.is_some() {
            return Ok(());
        }

        let daemon = ServiceDaemon::new()?;
        let receiver = daemon
            .browse(SERVICE_TYPE_DOMAIN)
            .map_err(|e| anyhow!("Failed to browse {}: {}", SERVICE_TYPE_DOMAIN, e))?;
        *daemon_slot = Some(daemon);
        drop(daemon_slot);

        let context = BrowseContext {
            registry: self.registry.clone(),
            should_add: self.should_add.clone(),
            resolve_timeout: self.resolve_timeout,
        };

        let handle = tokio::spawn(async move {
            Self::browse_loop(receiver, context).await;
        });
        *self.browse_handle.write().await = Some(handle);

        info!("Browsing for {}", SERVICE_TYPE_DOMAIN);
        Ok(())
    }

    /// Stop browsing and shut the daemon down
    pub async fn stop(&self) -> Result<()> {
        if let Some(handle) = self.browse_handle.write().await.take() {
            handle.abort();
        }

        if let Some(daemon) = self.daemon.lock().await.take() {
            let _ = daemon.stop_browse(SERVICE_TYPE_DOMAIN);
            daemon.shutdown()?;
        }

        Ok(())
    }

    async fn browse_loop(receiver: mdns_sd::Receiver<ServiceEvent>, context: BrowseContext) {
        let mut pending: HashMap<String, oneshot::Sender<ServiceInfo>> = HashMap::new();

        while let Ok(event) = receiver.recv_async().await {
            match event {
                ServiceEvent::ServiceFound(_, fullname) => {
                    if pending.get(&fullname).is_some_and(|tx| !tx.is_closed()) {
                        continue;
                    }
                    debug!("Found {}", fullname);
                    let (tx, rx) = oneshot::channel();
                    pending.insert(fullname.clone(), tx);
                    Self::spawn_resolution(fullname, rx, context.clone());
                }
                ServiceEvent::ServiceResolved(info) => {
                    let fullname = info.get_fullname().to_string();
                    let unclaimed = match pending.remove(&fullname) {
                        Some(tx) => tx.send(info).err(),
                        None => Some(info),
                    };

                    // Resolved outside a pending window (late answer or a
                    // re-announcement): run the completion path directly.
                    if let Some(info) = unclaimed {
                        let record = Self::record_from_service(&info);
                        let context = context.clone();
                        tokio::spawn(async move {
                            Self::complete(record, &context.registry, &context.should_add).await;
                        });
                    }
                }
                ServiceEvent::ServiceRemoved(_, fullname) => {
                    // Removal policy belongs to the application
                    debug!("Service {} removed", fullname);
                    pending.remove(&fullname);
                }
                _ => {}
            }
        }

        debug!("Browse loop finished");
    }

    fn spawn_resolution(
        fullname: String,
        resolved: oneshot::Receiver<ServiceInfo>,
        context: BrowseContext,
    ) {
        tokio::spawn(async move {
            let record = match tokio::time::timeout(context.resolve_timeout, resolved).await {
                Ok(Ok(info)) => Self::record_from_service(&info),
                _ => PeerRecord::new(instance_name(&fullname)),
            };
            Self::complete(record, &context.registry, &context.should_add).await;
        });
    }

    /// Completion path for one resolution attempt.
    ///
    /// Only a ready record that is not already registered and passes the
    /// predicate reaches the registry; everything else is logged and dropped.
    pub async fn complete(
        record: PeerRecord,
        registry: &Registry,
        should_add: &ShouldAdd,
    ) -> AddOutcome {
        if !record.ready() {
            error!("Failed to resolve {}", record.display_name);
            return AddOutcome::NotReady;
        }

        if registry.contains(&record).await {
            info!("Discovered {}, but already added", record);
            return AddOutcome::Duplicate;
        }

        if !should_add(&record) {
            info!("Discovered {}, but should not add", record);
            return AddOutcome::Rejected;
        }

        let outcome = registry.add(record.clone()).await;
        if outcome == AddOutcome::Added {
            info!("Discovered {}, added", record);
        }
        outcome
    }

    /// Build a peer record from resolved mDNS service data
    pub fn record_from_service(info: &ServiceInfo) -> PeerRecord {
        let mut record = PeerRecord::new(instance_name(info.get_fullname()));
        record.host_name = Some(info.get_hostname().to_string());
        record.add_ips(info.get_addresses().iter().copied(), info.get_port());
        record.apply_txt(&parse_txt_records(info.get_properties()));
        record
    }
}

/// Strip the service type and domain from a full instance name
pub fn instance_name(fullname: &str) -> String {
    fullname
        .strip_suffix(SERVICE_TYPE_DOMAIN)
        .map(|name| name.trim_end_matches('.'))
        .unwrap_or(fullname)
        .to_string()
}

/// Parse TXT records into key-value pairs; non-UTF-8 values are skipped
fn parse_txt_records(properties: &TxtProperties) -> Vec<(String, String)> {
    properties
        .iter()
        .filter_map(|prop| {
            let value = match prop.val() {
                Some(val) => std::str::from_utf8(val).ok()?.to_string(),
                None => String::new(),
            };
            Some((prop.key().to_string(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ready_peer(id: Uuid, name: &str) -> PeerRecord {
        let mut record = PeerRecord::new(name);
        record.apply_txt(&[("uuid".to_string(), id.to_string())]);
        record.add_ips(["10.0.0.4".parse().unwrap()], 4000);
        record
    }

    #[test]
    fn test_instance_name() {
        assert_eq!(
            instance_name("Desk RemoteStash._remotestash._tcp.local."),
            "Desk RemoteStash"
        );
        assert_eq!(instance_name("bare"), "bare");
    }

    #[test]
    fn test_record_from_service() {
        let id = Uuid::new_v4();
        let mut properties = HashMap::new();
        properties.insert("uuid".to_string(), id.to_string());
        properties.insert("temporary".to_string(), "yes".to_string());

        let info = ServiceInfo::new(
            SERVICE_TYPE_DOMAIN,
            "Desk RemoteStash",
            "desk.local.",
            "192.168.1.30",
            5555,
            Some(properties),
        )
        .unwrap();

        let record = ServiceBrowser::record_from_service(&info);
        assert_eq!(record.display_name, "Desk RemoteStash");
        assert_eq!(record.id, Some(id));
        assert!(record.temporary);
        assert!(record.ready());
        assert_eq!(record.addresses[0].port, 5555);
        assert!(record.addresses[0].is_ipv4());
    }

    #[tokio::test]
    async fn test_complete_dedups_by_id() {
        let registry = Registry::new();
        let should_add: ShouldAdd = Arc::new(|_| true);
        let id = Uuid::new_v4();

        let first = ServiceBrowser::complete(ready_peer(id, "a"), &registry, &should_add).await;
        let second = ServiceBrowser::complete(ready_peer(id, "a"), &registry, &should_add).await;

        assert_eq!(first, AddOutcome::Added);
        assert_eq!(second, AddOutcome::Duplicate);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_complete_honours_should_add() {
        let registry = Registry::new();
        let own_id = Uuid::new_v4();
        let should_add: ShouldAdd = Arc::new(move |record| record.id != Some(own_id));

        let outcome =
            ServiceBrowser::complete(ready_peer(own_id, "self"), &registry, &should_add).await;
        assert_eq!(outcome, AddOutcome::Rejected);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_complete_drops_unresolved() {
        let registry = Registry::new();
        let should_add: ShouldAdd = Arc::new(|_| true);

        let outcome =
            ServiceBrowser::complete(PeerRecord::new("timed out"), &registry, &should_add).await;
        assert_eq!(outcome, AddOutcome::NotReady);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_resolution_timeout_yields_not_ready() {
        let registry = Registry::new();
        let context = BrowseContext {
            registry: registry.clone(),
            should_add: Arc::new(|_| true),
            resolve_timeout: Duration::from_millis(20),
        };

        let (_tx, rx) = oneshot::channel::<ServiceInfo>();
        ServiceBrowser::spawn_resolution(
            "Slow._remotestash._tcp.local.".to_string(),
            rx,
            context,
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.is_empty().await);
    }
}
