//! The application-side "current item" slot served by the exchange server

use crate::item::Item;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

/// Supplies and receives the current item on behalf of the exchange server.
///
/// Handlers may run concurrently; implementations serialize their own state.
#[async_trait]
pub trait StashDelegate: Send + Sync {
    /// The item served by `/status`, `/pull` and `/last`
    async fn current_item(&self) -> Option<Item>;

    /// An item pushed by a peer
    async fn received_item(&self, item: Item);

    /// The listener is up on `port`
    async fn server_started(&self, _port: u16) {}
}

/// In-memory single-slot stash
#[derive(Debug, Default)]
pub struct MemoryStash {
    slot: RwLock<Option<Item>>,
}

impl MemoryStash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(item: Item) -> Self {
        Self {
            slot: RwLock::new(Some(item)),
        }
    }

    pub async fn set(&self, item: Item) {
        let mut slot = self.slot.write().await;
        match slot.as_mut() {
            Some(current) => current.update(item),
            None => *slot = Some(item),
        }
    }

    pub async fn clear(&self) {
        self.slot.write().await.take();
    }
}

#[async_trait]
impl StashDelegate for MemoryStash {
    async fn current_item(&self) -> Option<Item> {
        self.slot.read().await.clone()
    }

    async fn received_item(&self, item: Item) {
        info!("Stashed {} ({} bytes)", item, item.size());
        self.set(item).await;
    }

    async fn server_started(&self, port: u16) {
        info!("Stash available on port {}", port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::UTF_8;

    #[tokio::test]
    async fn test_received_item_supersedes() {
        let stash = MemoryStash::new();
        assert!(stash.current_item().await.is_none());

        stash.received_item(Item::text("one", "text/plain", UTF_8)).await;
        stash.received_item(Item::text("two", "text/plain", UTF_8)).await;

        let current = stash.current_item().await.unwrap();
        assert_eq!(current.as_text(), Some("two"));
    }

    #[tokio::test]
    async fn test_clear() {
        let stash = MemoryStash::with_item(Item::empty());
        stash.clear().await;
        assert!(stash.current_item().await.is_none());
    }
}
