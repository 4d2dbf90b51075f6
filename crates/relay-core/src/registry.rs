//! Connection registry.
//!
//! The registry is the only state shared between handler invocations. Every
//! operation touches a single key and is atomic on its own; there are no
//! multi-key transactions.
//!
//! Connections live in one table keyed by connection id with the partition
//! stored as an attribute, so a disconnect that does not know the partition
//! still deletes with a single lookup.

use crate::connection::Connection;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relay_protocol::Partition;
use relay_transport::ConnectionId;
use std::collections::BTreeSet;
use std::ops::Bound;
use thiserror::Error;
use tracing::{debug, trace};

/// Default number of ids returned per page by `list_all`.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The backing store could not be reached.
    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

/// One page of connection ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryPage {
    /// Ids in this page.
    pub ids: Vec<ConnectionId>,
    /// Cursor for the next page, `None` on the last page.
    pub next: Option<ConnectionId>,
}

/// Keyed store of active connections.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Upsert a connection by id.
    async fn put(&self, connection: Connection) -> Result<(), RegistryError>;

    /// Get a connection registered under `partition`.
    ///
    /// Returns `None` if the id is absent or registered under another partition.
    async fn get(
        &self,
        partition: Partition,
        connection_id: &ConnectionId,
    ) -> Result<Option<Connection>, RegistryError>;

    /// Delete a connection whatever its partition.
    ///
    /// Deleting an absent id succeeds. Returns `true` if something was removed.
    async fn delete(&self, connection_id: &ConnectionId) -> Result<bool, RegistryError>;

    /// One page of ids registered under `partition`, starting after `cursor`.
    async fn list_page(
        &self,
        partition: Partition,
        cursor: Option<&ConnectionId>,
        limit: usize,
    ) -> Result<RegistryPage, RegistryError>;

    /// Page size used by `list_all`.
    fn page_size(&self) -> usize {
        DEFAULT_PAGE_SIZE
    }

    /// Every id registered under `partition`.
    ///
    /// No ordering guarantee; pages are read one after another, so the result
    /// may mix ids added or removed while listing.
    async fn list_all(&self, partition: Partition) -> Result<Vec<ConnectionId>, RegistryError> {
        let mut ids = Vec::new();
        let mut cursor: Option<ConnectionId> = None;

        loop {
            let page = self
                .list_page(partition, cursor.as_ref(), self.page_size())
                .await?;
            ids.extend(page.ids);
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        trace!(partition = %partition, count = ids.len(), "Listed connections");
        Ok(ids)
    }
}

/// In-process registry backed by a concurrent map.
///
/// Each partition keeps an ordered index of its ids, so a page is a range
/// read and listing a partition never scans other partitions.
#[derive(Debug)]
pub struct MemoryRegistry {
    connections: DashMap<ConnectionId, Connection>,
    /// Ordered ids per partition, updated under the connection's entry lock.
    partitions: DashMap<Partition, BTreeSet<ConnectionId>>,
    page_size: usize,
}

impl MemoryRegistry {
    /// Create an empty registry with the default page size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create an empty registry with a specific page size.
    #[must_use]
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            connections: DashMap::new(),
            partitions: DashMap::new(),
            page_size: page_size.max(1),
        }
    }

    /// Total number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of connections registered under `partition`.
    #[must_use]
    pub fn count(&self, partition: Partition) -> usize {
        self.partitions.get(&partition).map_or(0, |ids| ids.len())
    }

    fn index(&self, partition: Partition, connection_id: ConnectionId) {
        self.partitions
            .entry(partition)
            .or_default()
            .insert(connection_id);
    }

    fn unindex(&self, partition: Partition, connection_id: &ConnectionId) {
        if let Some(mut ids) = self.partitions.get_mut(&partition) {
            ids.remove(connection_id);
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionRegistry for MemoryRegistry {
    async fn put(&self, connection: Connection) -> Result<(), RegistryError> {
        let id = connection.id();
        let partition = connection.resource_partition;
        debug!(
            connection = %id,
            partition = %partition,
            principal = %connection.principal_id,
            "Registered connection"
        );

        match self.connections.entry(id.clone()) {
            Entry::Occupied(mut entry) => {
                let previous = entry.get().resource_partition;
                if previous != partition {
                    self.unindex(previous, &id);
                }
                self.index(partition, id);
                entry.insert(connection);
            }
            Entry::Vacant(entry) => {
                self.index(partition, id);
                entry.insert(connection);
            }
        }
        Ok(())
    }

    async fn get(
        &self,
        partition: Partition,
        connection_id: &ConnectionId,
    ) -> Result<Option<Connection>, RegistryError> {
        Ok(self
            .connections
            .get(connection_id)
            .filter(|e| e.value().resource_partition == partition)
            .map(|e| e.value().clone()))
    }

    async fn delete(&self, connection_id: &ConnectionId) -> Result<bool, RegistryError> {
        let removed = match self.connections.entry(connection_id.clone()) {
            Entry::Occupied(entry) => {
                self.unindex(entry.get().resource_partition, connection_id);
                entry.remove();
                true
            }
            Entry::Vacant(_) => false,
        };
        if removed {
            debug!(connection = %connection_id, "Deregistered connection");
        }
        Ok(removed)
    }

    async fn list_page(
        &self,
        partition: Partition,
        cursor: Option<&ConnectionId>,
        limit: usize,
    ) -> Result<RegistryPage, RegistryError> {
        let limit = limit.max(1);
        let Some(index) = self.partitions.get(&partition) else {
            return Ok(RegistryPage::default());
        };

        let lower = match cursor {
            Some(c) => Bound::Excluded(c.clone()),
            None => Bound::Unbounded,
        };
        let mut ids: Vec<ConnectionId> = index
            .range((lower, Bound::Unbounded))
            .take(limit + 1)
            .cloned()
            .collect();
        drop(index);

        let next = if ids.len() > limit {
            ids.truncate(limit);
            ids.last().cloned()
        } else {
            None
        };

        Ok(RegistryPage { ids, next })
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::claims_for;
    use std::collections::HashSet;

    fn conn(id: &str, partition: Partition) -> Connection {
        Connection::from_claims(&id.into(), partition, &claims_for("user-1", 0), 0)
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let registry = MemoryRegistry::new();
        let id = ConnectionId::new("conn-1");

        registry.put(conn("conn-1", Partition::WorkOrders)).await.unwrap();
        let stored = registry.get(Partition::WorkOrders, &id).await.unwrap();
        assert_eq!(stored.unwrap().connection_id, "conn-1");

        assert!(registry.delete(&id).await.unwrap());
        assert!(registry.get(Partition::WorkOrders, &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_is_partition_scoped() {
        let registry = MemoryRegistry::new();
        registry.put(conn("conn-1", Partition::Students)).await.unwrap();

        let id = ConnectionId::new("conn-1");
        assert!(registry.get(Partition::WorkOrders, &id).await.unwrap().is_none());
        assert!(registry.get(Partition::Students, &id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_absent_is_ok() {
        let registry = MemoryRegistry::new();
        assert!(!registry.delete(&"missing".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_student_leaves_work_orders_untouched() {
        let registry = MemoryRegistry::new();
        registry.put(conn("student-conn", Partition::Students)).await.unwrap();
        registry.put(conn("wo-1", Partition::WorkOrders)).await.unwrap();
        registry.put(conn("wo-2", Partition::WorkOrders)).await.unwrap();

        assert!(registry.delete(&"student-conn".into()).await.unwrap());

        let work_orders: HashSet<_> = registry
            .list_all(Partition::WorkOrders)
            .await
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(
            work_orders,
            HashSet::from([ConnectionId::new("wo-1"), ConnectionId::new("wo-2")])
        );
        assert!(registry.list_all(Partition::Students).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_upserts() {
        let registry = MemoryRegistry::new();
        registry.put(conn("conn-1", Partition::WorkOrders)).await.unwrap();
        registry.put(conn("conn-1", Partition::Students)).await.unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.count(Partition::Students), 1);
        assert_eq!(registry.count(Partition::WorkOrders), 0);
    }

    #[tokio::test]
    async fn test_list_all_pages_through_everything() {
        let registry = MemoryRegistry::with_page_size(3);
        for i in 0..10 {
            registry
                .put(conn(&format!("conn-{i:02}"), Partition::WorkOrders))
                .await
                .unwrap();
        }
        registry.put(conn("other", Partition::Students)).await.unwrap();

        let first = registry
            .list_page(Partition::WorkOrders, None, 3)
            .await
            .unwrap();
        assert_eq!(first.ids.len(), 3);
        assert!(first.next.is_some());

        let all = registry.list_all(Partition::WorkOrders).await.unwrap();
        let unique: HashSet<_> = all.iter().cloned().collect();
        assert_eq!(all.len(), 10);
        assert_eq!(unique.len(), 10);
        assert!(!unique.contains(&ConnectionId::new("other")));
    }

    #[tokio::test]
    async fn test_list_page_cursor_walks_ids_in_order() {
        let registry = MemoryRegistry::new();
        for id in ["e", "a", "d", "b", "c"] {
            registry.put(conn(id, Partition::Students)).await.unwrap();
        }
        registry.put(conn("bb", Partition::WorkOrders)).await.unwrap();

        let first = registry
            .list_page(Partition::Students, None, 2)
            .await
            .unwrap();
        assert_eq!(first.ids, vec![ConnectionId::new("a"), ConnectionId::new("b")]);
        assert_eq!(first.next, Some(ConnectionId::new("b")));

        // The cursor is exclusive and need not still be registered
        registry.delete(&"b".into()).await.unwrap();
        let second = registry
            .list_page(Partition::Students, first.next.as_ref(), 2)
            .await
            .unwrap();
        assert_eq!(second.ids, vec![ConnectionId::new("c"), ConnectionId::new("d")]);
        assert_eq!(second.next, Some(ConnectionId::new("d")));

        let last = registry
            .list_page(Partition::Students, second.next.as_ref(), 2)
            .await
            .unwrap();
        assert_eq!(last.ids, vec![ConnectionId::new("e")]);
        assert!(last.next.is_none());

        let empty = registry
            .list_page(Partition::Students, Some(&"e".into()), 2)
            .await
            .unwrap();
        assert_eq!(empty, RegistryPage::default());
    }

    #[tokio::test]
    async fn test_index_follows_upsert_and_delete() {
        let registry = MemoryRegistry::with_page_size(2);
        registry.put(conn("x", Partition::WorkOrders)).await.unwrap();
        registry.put(conn("x", Partition::Students)).await.unwrap();
        registry.put(conn("x", Partition::Students)).await.unwrap();

        assert!(registry.list_all(Partition::WorkOrders).await.unwrap().is_empty());
        assert_eq!(
            registry.list_all(Partition::Students).await.unwrap(),
            vec![ConnectionId::new("x")]
        );

        registry.delete(&"x".into()).await.unwrap();
        assert_eq!(registry.count(Partition::Students), 0);
        assert!(registry.list_all(Partition::Students).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_all_large_partition() {
        let registry = MemoryRegistry::with_page_size(100);
        for i in 0..5_000 {
            let partition = if i % 2 == 0 {
                Partition::WorkOrders
            } else {
                Partition::Students
            };
            registry
                .put(conn(&format!("conn-{i:05}"), partition))
                .await
                .unwrap();
        }

        let all = registry.list_all(Partition::WorkOrders).await.unwrap();
        assert_eq!(all.len(), 2_500);
        assert!(all.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_list_page_last_page_has_no_cursor() {
        let registry = MemoryRegistry::new();
        registry.put(conn("a", Partition::WorkOrders)).await.unwrap();
        registry.put(conn("b", Partition::WorkOrders)).await.unwrap();

        let page = registry
            .list_page(Partition::WorkOrders, None, 2)
            .await
            .unwrap();
        assert_eq!(page.ids.len(), 2);
        assert!(page.next.is_none());
    }
}
