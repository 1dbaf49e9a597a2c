//! Path layout and recursive creation helpers.
//!
//! All coordination state lives under one root:
//!
//! ```text
//! /cronmesh/{group}/{jobName}        job state document (JSON)
//! /cronmesh/{group}/nodes/{nodeId}   ephemeral liveness marker
//! ```
//!
//! `nodes` is a reserved child name inside a group and never a job name.

use crate::client::RegistryClient;
use crate::error::{RegistryError, RegistryResult};

/// Default root for all coordination paths.
pub const DEFAULT_ROOT: &str = "/cronmesh";

/// Reserved child of a group path holding per-node liveness markers.
pub const NODES_DIR: &str = "nodes";

/// Check path shape: absolute, no empty segments, no trailing slash.
pub fn validate(path: &str) -> RegistryResult<()> {
    if !path.starts_with('/') {
        return Err(RegistryError::InvalidPath(path.to_string()));
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') || path.contains("//") {
        return Err(RegistryError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Split a path into its segments, e.g. `/a/b` into `["a", "b"]`.
pub fn path_parts(path: &str) -> Vec<&str> {
    path.split('/').filter(|p| !p.is_empty()).collect()
}

/// Parent path, `None` for the root itself.
pub fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Append a child name to a base path.
pub fn join(base: &str, child: &str) -> String {
    if base == "/" {
        format!("/{child}")
    } else {
        format!("{base}/{child}")
    }
}

/// Path of a job group directory.
pub fn group_path(root: &str, group: &str) -> String {
    join(root, group)
}

/// Path of a job's state document.
pub fn job_path(root: &str, group: &str, job_name: &str) -> String {
    join(&group_path(root, group), job_name)
}

/// Path of a group's node-marker directory.
pub fn nodes_path(root: &str, group: &str) -> String {
    join(&group_path(root, group), NODES_DIR)
}

/// Path of one node's liveness marker.
pub fn node_path(root: &str, group: &str, node_id: &str) -> String {
    join(&nodes_path(root, group), node_id)
}

/// Create `path` and any missing ancestors, top down.
///
/// Segments that already exist are left untouched. Another node can win the
/// create between our exists check and our create; that still leaves the
/// segment present, so the conflict is swallowed.
pub async fn mkdirp(client: &dyn RegistryClient, path: &str) -> RegistryResult<()> {
    validate(path)?;
    let mut prefix = String::new();
    for part in path_parts(path) {
        prefix.push('/');
        prefix.push_str(part);
        if client.exists(&prefix).await? {
            continue;
        }
        match client.create(&prefix, &[]).await {
            Ok(()) => {}
            Err(RegistryError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[test]
    fn validate_accepts_absolute_paths() {
        assert!(validate("/").is_ok());
        assert!(validate("/cronmesh").is_ok());
        assert!(validate("/cronmesh/etl/nightly-sync").is_ok());
    }

    #[test]
    fn validate_rejects_malformed_paths() {
        assert!(validate("relative/path").is_err());
        assert!(validate("/a//b").is_err());
        assert!(validate("/a/").is_err());
        assert!(validate("").is_err());
    }

    #[test]
    fn parent_walks_up_to_root() {
        assert_eq!(parent_of("/a/b/c"), Some("/a/b"));
        assert_eq!(parent_of("/a"), Some("/"));
        assert_eq!(parent_of("/"), None);
    }

    #[test]
    fn join_handles_root_base() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }

    #[test]
    fn layout_paths_compose() {
        assert_eq!(job_path(DEFAULT_ROOT, "etl", "sync"), "/cronmesh/etl/sync");
        assert_eq!(nodes_path(DEFAULT_ROOT, "etl"), "/cronmesh/etl/nodes");
        assert_eq!(
            node_path(DEFAULT_ROOT, "etl", "node-1"),
            "/cronmesh/etl/nodes/node-1"
        );
    }

    /// Tracks which paths exist and records every create call.
    struct MockClient {
        nodes: Mutex<HashSet<String>>,
        creates: Mutex<Vec<String>>,
        conflict_on: Option<String>,
    }

    impl MockClient {
        fn with_nodes(paths: &[&str]) -> Self {
            let mut nodes: HashSet<String> = paths.iter().map(|p| p.to_string()).collect();
            nodes.insert("/".to_string());
            Self {
                nodes: Mutex::new(nodes),
                creates: Mutex::new(Vec::new()),
                conflict_on: None,
            }
        }

        fn create_count(&self) -> usize {
            self.creates.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RegistryClient for MockClient {
        async fn exists(&self, path: &str) -> RegistryResult<bool> {
            Ok(self.nodes.lock().unwrap().contains(path))
        }

        async fn create(&self, path: &str, _data: &[u8]) -> RegistryResult<()> {
            self.creates.lock().unwrap().push(path.to_string());
            if self.conflict_on.as_deref() == Some(path) {
                return Err(RegistryError::AlreadyExists(path.to_string()));
            }
            self.nodes.lock().unwrap().insert(path.to_string());
            Ok(())
        }

        async fn create_ephemeral(&self, path: &str, data: &[u8]) -> RegistryResult<()> {
            self.create(path, data).await
        }

        async fn read_data(&self, _path: &str) -> RegistryResult<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn write_data(&self, _path: &str, _data: &[u8]) -> RegistryResult<()> {
            Ok(())
        }

        async fn get_children(&self, _path: &str) -> RegistryResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn delete(&self, _path: &str) -> RegistryResult<()> {
            Ok(())
        }

        async fn close(&self) -> RegistryResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn mkdirp_creates_missing_chain() {
        let client = MockClient::with_nodes(&[]);
        mkdirp(&client, "/cronmesh/etl/nodes").await.unwrap();
        assert_eq!(
            *client.creates.lock().unwrap(),
            vec!["/cronmesh", "/cronmesh/etl", "/cronmesh/etl/nodes"]
        );
    }

    #[tokio::test]
    async fn mkdirp_skips_existing_prefix() {
        let client = MockClient::with_nodes(&["/cronmesh", "/cronmesh/etl"]);
        mkdirp(&client, "/cronmesh/etl/nodes").await.unwrap();
        assert_eq!(*client.creates.lock().unwrap(), vec!["/cronmesh/etl/nodes"]);
    }

    #[tokio::test]
    async fn mkdirp_is_noop_when_fully_present() {
        let client = MockClient::with_nodes(&["/cronmesh", "/cronmesh/etl", "/cronmesh/etl/nodes"]);
        mkdirp(&client, "/cronmesh/etl/nodes").await.unwrap();
        assert_eq!(client.create_count(), 0);
    }

    #[tokio::test]
    async fn mkdirp_tolerates_create_race() {
        let mut client = MockClient::with_nodes(&[]);
        client.conflict_on = Some("/cronmesh/etl".to_string());
        mkdirp(&client, "/cronmesh/etl/nodes").await.unwrap();
    }

    #[tokio::test]
    async fn mkdirp_rejects_relative_path() {
        let client = MockClient::with_nodes(&[]);
        assert!(matches!(
            mkdirp(&client, "cronmesh/etl").await,
            Err(RegistryError::InvalidPath(_))
        ));
    }
}
