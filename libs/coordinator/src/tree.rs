//! The node tree and its transaction log
use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::Path,
};

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};

/// identifies the connection that owns ephemeral nodes
pub type ConnId = u64;

/// file name of the transaction log inside the data directory
pub const TXLOG_FILE: &str = "txlog";

const ROOT: &str = "/";

/// Failures applying an operation to the tree
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// a node already exists at this path
    #[error("node already exists: {0}")]
    NodeExists(String),

    /// the path is not a valid absolute node path
    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        /// offending path
        path: String,
        /// what is wrong with it
        reason: &'static str,
    },

    /// a node with children cannot be deleted
    #[error("node has children: {0}")]
    NotEmpty(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: Bytes,
    owner: Option<ConnId>,
}

/// Nodes keyed by absolute path. The root always exists.
#[derive(Debug)]
pub struct NodeTree {
    nodes: BTreeMap<String, Node>,
    txlog: Option<File>,
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTree {
    /// A tree that is not backed by a transaction log
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            ROOT.to_owned(),
            Node {
                data: Bytes::new(),
                owner: None,
            },
        );
        Self { nodes, txlog: None }
    }

    /// A tree appending every mutation to `<data_dir>/txlog`. The directory is
    /// created if needed.
    pub fn with_txlog(data_dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(data_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(data_dir.join(TXLOG_FILE))?;
        Ok(Self {
            txlog: Some(file),
            ..Self::new()
        })
    }

    /// number of nodes, including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// true if only the root exists
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Create a node. Missing parents are created as empty persistent nodes.
    /// `owner` makes the node ephemeral.
    pub fn create(
        &mut self,
        path: &str,
        data: Bytes,
        owner: Option<ConnId>,
    ) -> Result<(), TreeError> {
        validate(path)?;
        if path == ROOT || self.nodes.contains_key(path) {
            return Err(TreeError::NodeExists(path.to_owned()));
        }
        let parents = ancestors(path);
        if let Some(parent) = parents.iter().find(|p| {
            self.nodes
                .get(p.as_str())
                .is_some_and(|node| node.owner.is_some())
        }) {
            debug!(%parent, "refusing child of ephemeral node");
            return Err(TreeError::InvalidPath {
                path: path.to_owned(),
                reason: "ephemeral nodes cannot have children",
            });
        }
        for parent in parents {
            if !self.nodes.contains_key(&parent) {
                self.log(format_args!("create {parent} persistent"));
                self.nodes.insert(
                    parent,
                    Node {
                        data: Bytes::new(),
                        owner: None,
                    },
                );
            }
        }
        let kind = if owner.is_some() { "ephemeral" } else { "persistent" };
        self.log(format_args!("create {path} {kind}"));
        self.nodes.insert(path.to_owned(), Node { data, owner });
        Ok(())
    }

    /// Data stored at `path`, `None` if there is no such node
    pub fn get(&self, path: &str) -> Result<Option<Bytes>, TreeError> {
        validate(path)?;
        Ok(self.nodes.get(path).map(|node| node.data.clone()))
    }

    /// Names of the direct children of `path`, sorted
    pub fn children(&self, path: &str) -> Result<Vec<String>, TreeError> {
        validate(path)?;
        let prefix = child_prefix(path);
        Ok(self
            .nodes
            .range(prefix.clone()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(&prefix))
            .filter_map(|key| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_owned())
            })
            .collect())
    }

    /// Delete the node at `path`, returning whether it existed
    pub fn delete(&mut self, path: &str) -> Result<bool, TreeError> {
        validate(path)?;
        if path == ROOT {
            return Err(TreeError::InvalidPath {
                path: path.to_owned(),
                reason: "the root cannot be deleted",
            });
        }
        if !self.nodes.contains_key(path) {
            return Ok(false);
        }
        if !self.children(path)?.is_empty() {
            return Err(TreeError::NotEmpty(path.to_owned()));
        }
        self.nodes.remove(path);
        self.log(format_args!("delete {path}"));
        Ok(true)
    }

    /// Remove every ephemeral node owned by `owner`, returning their paths
    pub fn expire(&mut self, owner: ConnId) -> Vec<String> {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(owner))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &owned {
            self.nodes.remove(path);
            self.log(format_args!("expire {path}"));
        }
        owned
    }

    fn log(&mut self, entry: std::fmt::Arguments<'_>) {
        if let Some(file) = self.txlog.as_mut() {
            if let Err(err) = writeln!(file, "{entry}") {
                warn!(?err, "failed to append to transaction log");
            }
        }
    }
}

fn validate(path: &str) -> Result<(), TreeError> {
    let invalid = |reason: &'static str| {
        Err(TreeError::InvalidPath {
            path: path.to_owned(),
            reason,
        })
    };
    if !path.starts_with('/') {
        return invalid("must start with '/'");
    }
    if path == ROOT {
        return Ok(());
    }
    if path.ends_with('/') {
        return invalid("must not end with '/'");
    }
    if path[1..].split('/').any(str::is_empty) {
        return invalid("empty path segment");
    }
    Ok(())
}

fn child_prefix(path: &str) -> String {
    if path == ROOT {
        ROOT.to_owned()
    } else {
        format!("{path}/")
    }
}

/// `/a/b/c` -> `["/a", "/a/b"]`
fn ancestors(path: &str) -> Vec<String> {
    path.match_indices('/')
        .skip(1)
        .map(|(idx, _)| path[..idx].to_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_get_children() -> Result<(), TreeError> {
        let mut tree = NodeTree::new();
        tree.create("/brokers/ids/0", Bytes::from_static(b"127.0.0.1:9092"), Some(1))?;
        tree.create("/brokers/ids/1", Bytes::new(), Some(2))?;
        tree.create("/brokers/topics", Bytes::new(), None)?;

        assert_eq!(
            tree.get("/brokers/ids/0")?,
            Some(Bytes::from_static(b"127.0.0.1:9092"))
        );
        assert_eq!(tree.get("/nope")?, None);
        assert_eq!(tree.children("/brokers/ids")?, vec!["0", "1"]);
        assert_eq!(tree.children("/brokers")?, vec!["ids", "topics"]);
        assert_eq!(tree.children("/")?, vec!["brokers"]);
        Ok(())
    }

    #[test]
    fn test_duplicate_create() -> Result<(), TreeError> {
        let mut tree = NodeTree::new();
        tree.create("/a", Bytes::new(), None)?;
        assert_eq!(
            tree.create("/a", Bytes::new(), None),
            Err(TreeError::NodeExists("/a".into()))
        );
        assert!(matches!(
            tree.create("/", Bytes::new(), None),
            Err(TreeError::NodeExists(_))
        ));
        Ok(())
    }

    #[test]
    fn test_invalid_paths() {
        let tree = NodeTree::new();
        for path in ["", "a", "/a/", "/a//b"] {
            assert!(
                matches!(tree.get(path), Err(TreeError::InvalidPath { .. })),
                "{path} should be invalid"
            );
        }
    }

    #[test]
    fn test_ephemeral_cannot_have_children() -> Result<(), TreeError> {
        let mut tree = NodeTree::new();
        tree.create("/session", Bytes::new(), Some(9))?;
        assert!(matches!(
            tree.create("/session/child", Bytes::new(), None),
            Err(TreeError::InvalidPath { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_delete() -> Result<(), TreeError> {
        let mut tree = NodeTree::new();
        tree.create("/a/b", Bytes::new(), None)?;
        assert_eq!(tree.delete("/a"), Err(TreeError::NotEmpty("/a".into())));
        assert!(tree.delete("/a/b")?);
        assert!(!tree.delete("/a/b")?);
        assert!(tree.delete("/a")?);
        assert!(tree.is_empty());
        assert!(tree.delete("/").is_err());
        Ok(())
    }

    #[test]
    fn test_expire_only_removes_owned() -> Result<(), TreeError> {
        let mut tree = NodeTree::new();
        tree.create("/brokers/ids/0", Bytes::new(), Some(1))?;
        tree.create("/brokers/ids/1", Bytes::new(), Some(2))?;

        assert_eq!(tree.expire(1), vec!["/brokers/ids/0".to_owned()]);
        assert_eq!(tree.children("/brokers/ids")?, vec!["1"]);
        assert!(tree.expire(1).is_empty());
        Ok(())
    }

    #[test]
    fn test_txlog_records_mutations() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut tree = NodeTree::with_txlog(dir.path())?;
        tree.create("/a/b", Bytes::new(), Some(3))?;
        tree.expire(3);
        drop(tree);

        let log = fs::read_to_string(dir.path().join(TXLOG_FILE))?;
        assert_eq!(
            log.lines().collect::<Vec<_>>(),
            vec!["create /a persistent", "create /a/b ephemeral", "expire /a/b"]
        );
        Ok(())
    }
}
