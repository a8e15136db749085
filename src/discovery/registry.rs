//! Registry of discovered peers

use crate::discovery::types::{AddOutcome, DiscoveryEvent, PeerRecord};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 100;

/// Ordered, deduplicated collection of ready peers with a current selection
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    state: RwLock<RegistryState>,
    event_tx: broadcast::Sender<DiscoveryEvent>,
}

#[derive(Default)]
struct RegistryState {
    peers: Vec<PeerRecord>,
    /// Index of the selected peer; None until the first add
    current: Option<usize>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(RegistryInner {
                state: RwLock::new(RegistryState::default()),
                event_tx,
            }),
        }
    }

    /// Whether a record with the same id is already registered
    pub async fn contains(&self, record: &PeerRecord) -> bool {
        let state = self.inner.state.read().await;
        state.peers.iter().any(|peer| peer.same_as(record))
    }

    /// Append a ready record unless its id is already present.
    ///
    /// The first record ever added becomes the current selection.
    pub async fn add(&self, record: PeerRecord) -> AddOutcome {
        if !record.ready() {
            return AddOutcome::NotReady;
        }

        let mut state = self.inner.state.write().await;
        if state.peers.iter().any(|peer| peer.same_as(&record)) {
            debug!("Peer {} already registered", record);
            return AddOutcome::Duplicate;
        }

        if state.current.is_none() {
            state.current = Some(state.peers.len());
        }
        state.peers.push(record.clone());
        drop(state);

        info!("Registered peer {}", record);
        // No subscribers is fine
        let _ = self.inner.event_tx.send(DiscoveryEvent::PeerAdded(record));

        AddOutcome::Added
    }

    /// All registered peers in discovery order
    pub async fn peers(&self) -> Vec<PeerRecord> {
        self.inner.state.read().await.peers.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.state.read().await.peers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.state.read().await.peers.is_empty()
    }

    /// The selected peer; an out-of-range selection means the last added
    pub async fn current(&self) -> Option<PeerRecord> {
        let state = self.inner.state.read().await;
        match state.current {
            Some(index) if index < state.peers.len() => state.peers.get(index).cloned(),
            _ => state.peers.last().cloned(),
        }
    }

    /// Change the current selection
    pub async fn select(&self, index: usize) {
        self.inner.state.write().await.current = Some(index);
    }

    /// Find a peer whose display name contains `needle`
    pub async fn find_by_name(&self, needle: &str) -> Option<PeerRecord> {
        let state = self.inner.state.read().await;
        state
            .peers
            .iter()
            .find(|peer| peer.display_name.contains(needle))
            .cloned()
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.inner.event_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    fn create_test_peer(id: Uuid, name: &str) -> PeerRecord {
        let mut record = PeerRecord::new(name);
        record.id = Some(id);
        record.add_ips(["192.168.1.100".parse().unwrap()], 9090);
        record
    }

    #[tokio::test]
    async fn test_add_and_list() {
        let registry = Registry::new();
        let peer = create_test_peer(Uuid::new_v4(), "test-peer");

        assert_eq!(registry.add(peer.clone()).await, AddOutcome::Added);
        let peers = registry.peers().await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].display_name, "test-peer");
    }

    #[tokio::test]
    async fn test_duplicate_id_is_dropped() {
        let registry = Registry::new();
        let id = Uuid::new_v4();

        assert_eq!(registry.add(create_test_peer(id, "first")).await, AddOutcome::Added);
        assert_eq!(
            registry.add(create_test_peer(id, "second")).await,
            AddOutcome::Duplicate
        );
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.peers().await[0].display_name, "first");
    }

    #[tokio::test]
    async fn test_not_ready_is_never_added() {
        let registry = Registry::new();
        assert_eq!(
            registry.add(PeerRecord::new("shell")).await,
            AddOutcome::NotReady
        );
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_current_defaults_to_first_added() {
        let registry = Registry::new();
        assert!(registry.current().await.is_none());

        registry.add(create_test_peer(Uuid::new_v4(), "one")).await;
        registry.add(create_test_peer(Uuid::new_v4(), "two")).await;

        assert_eq!(registry.current().await.unwrap().display_name, "one");

        registry.select(1).await;
        assert_eq!(registry.current().await.unwrap().display_name, "two");
    }

    #[tokio::test]
    async fn test_out_of_range_selection_means_last() {
        let registry = Registry::new();
        registry.add(create_test_peer(Uuid::new_v4(), "one")).await;
        registry.add(create_test_peer(Uuid::new_v4(), "two")).await;
        registry.add(create_test_peer(Uuid::new_v4(), "three")).await;

        registry.select(42).await;
        assert_eq!(registry.current().await.unwrap().display_name, "three");
    }

    #[tokio::test]
    async fn test_peer_added_event() {
        let registry = Registry::new();
        let mut receiver = registry.subscribe();

        let id = Uuid::new_v4();
        registry.add(create_test_peer(id, "evented")).await;

        let event = tokio::time::timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap()
            .unwrap();

        match event {
            DiscoveryEvent::PeerAdded(peer) => assert_eq!(peer.id, Some(id)),
        }
    }
}
