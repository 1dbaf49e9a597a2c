//! Client contract for the shared coordination registry.
//!
//! Every coordination decision in the cluster goes through this trait: job
//! ownership records, node liveness markers, and monitor commands are all
//! plain paths with byte payloads. The contract is deliberately small so a
//! backend can be swapped without touching scheduling code. Reads may lag
//! writes from other nodes; callers must tolerate stale views.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{RegistryError, RegistryResult};

/// Abstract registry operations — injected for testability.
///
/// Paths are slash-separated, absolute, and rooted at `/`. Nodes form a
/// tree: a node must have an existing parent before it can be created.
/// Ephemeral nodes belong to the client session that created them and are
/// removed when that session closes.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Whether a node exists at `path`.
    async fn exists(&self, path: &str) -> RegistryResult<bool>;

    /// Create a persistent node. Fails with [`RegistryError::AlreadyExists`]
    /// when the path is taken and [`RegistryError::NotFound`] when the
    /// parent is missing.
    async fn create(&self, path: &str, data: &[u8]) -> RegistryResult<()>;

    /// Create a node tied to this client session; it disappears on
    /// [`RegistryClient::close`]. Same failure modes as `create`.
    async fn create_ephemeral(&self, path: &str, data: &[u8]) -> RegistryResult<()>;

    /// Read a node's payload. `Ok(None)` when the node is absent or holds
    /// an empty payload.
    async fn read_data(&self, path: &str) -> RegistryResult<Option<Vec<u8>>>;

    /// Overwrite a node's payload. Fails with [`RegistryError::NotFound`]
    /// when the node does not exist.
    async fn write_data(&self, path: &str, data: &[u8]) -> RegistryResult<()>;

    /// Names (not full paths) of the direct children of `path`, sorted.
    async fn get_children(&self, path: &str) -> RegistryResult<Vec<String>>;

    /// Remove a node. Fails with [`RegistryError::NotFound`] when absent.
    async fn delete(&self, path: &str) -> RegistryResult<()>;

    /// End the session: ephemeral nodes created by this client are removed.
    /// Further calls on a closed client are backend errors.
    async fn close(&self) -> RegistryResult<()>;
}

/// Read a node and decode its JSON payload, `Ok(None)` when absent.
pub async fn read_json<T: DeserializeOwned>(
    client: &dyn RegistryClient,
    path: &str,
) -> RegistryResult<Option<T>> {
    match client.read_data(path).await? {
        Some(raw) => {
            let value = serde_json::from_slice(&raw)
                .map_err(|e| RegistryError::Payload(path.to_string(), e.to_string()))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Encode `value` as JSON and overwrite the node at `path`.
pub async fn write_json<T: Serialize>(
    client: &dyn RegistryClient,
    path: &str,
    value: &T,
) -> RegistryResult<()> {
    let raw = serde_json::to_vec(value)
        .map_err(|e| RegistryError::Payload(path.to_string(), e.to_string()))?;
    client.write_data(path, &raw).await
}
