//! Registry of live clients.
//!
//! Maps each client id to the handle of its live connection. One registry
//! belongs to one server instance; nothing here is global.
use dashmap::{mapref::entry::Entry, DashMap};

use crate::{
    handle::ConnectionHandle,
    types::{ClientId, ClientInfo, MessengerError},
};

/// Concurrent table of connected clients.
///
/// Backed by a sharded map, so lookups and mutations for different clients
/// do not serialize behind a single lock.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: DashMap<ClientId, ConnectionHandle>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    /// Registers the connection behind `handle` under its client id.
    ///
    /// Fails with [`MessengerError::DuplicateClient`] when the id is already
    /// taken by a live connection.
    pub fn register(&self, handle: ConnectionHandle) -> Result<(), MessengerError> {
        match self.clients.entry(handle.client_id().to_string()) {
            Entry::Occupied(entry) => Err(MessengerError::DuplicateClient(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(handle);
                Ok(())
            }
        }
    }

    /// Returns the handle registered for `client_id`.
    pub fn find_client(&self, client_id: &str) -> Option<ConnectionHandle> {
        self.clients.get(client_id).map(|h| h.value().clone())
    }

    /// Resolves the metadata of the client behind `handle`.
    ///
    /// Returns `None` when the connection is no longer the one registered
    /// under its id, which is the normal outcome of a disconnect racing the
    /// caller.
    pub fn resolve_client_info(&self, handle: &ConnectionHandle) -> Option<ClientInfo> {
        self.clients
            .get(handle.client_id())
            .filter(|registered| registered.same_connection(handle))
            .map(|registered| registered.info().clone())
    }

    /// Removes `client_id`. Removing an absent id is a no-op.
    pub fn remove(&self, client_id: &str) -> Option<ConnectionHandle> {
        self.clients.remove(client_id).map(|(_, handle)| handle)
    }

    /// Removes the entry for `handle` only if it is still the registered
    /// connection for its id.
    pub fn remove_handle(&self, handle: &ConnectionHandle) -> Option<ClientInfo> {
        self.clients
            .remove_if(handle.client_id(), |_, registered| {
                registered.same_connection(handle)
            })
            .map(|(_, registered)| registered.info().clone())
    }

    /// Returns true if `client_id` is registered.
    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    /// Number of live clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no client is registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Snapshot of the registered client ids.
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot of the registered handles.
    ///
    /// The snapshot is taken before returning so callers can send without
    /// holding any shard lock.
    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.clients.iter().map(|e| e.value().clone()).collect()
    }

    /// Removes every client, returning the removed handles.
    pub fn clear(&self) -> Vec<ConnectionHandle> {
        let ids = self.client_ids();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }
}
