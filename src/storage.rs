use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::dag::{DagClient, DagNode};
use crate::errors::{ChainError, ChainResult};
use crate::types::Hash;

/// Suffix marking a link-valued entry in a tree: a link named `<key>_link`
/// holds a reference to another root instead of inline bytes.
pub const LINK_SUFFIX: &str = "_link";

/// A value inside a logical storage tree, as written by [`Storage::put_all`]
/// and read back by [`Storage::get_all`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Bytes(Vec<u8>),
    Link(Hash),
    Tree(BTreeMap<String, Value>),
    Empty,
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Value::Bytes(value.into().into_bytes())
    }

    pub fn as_bytes(&self) -> ChainResult<&[u8]> {
        match self {
            Value::Bytes(bytes) => Ok(bytes),
            other => Err(ChainError::Protocol(format!(
                "expected bytes, found {}",
                other.kind()
            ))),
        }
    }

    pub fn as_str(&self) -> ChainResult<&str> {
        std::str::from_utf8(self.as_bytes()?)
            .map_err(|err| ChainError::Protocol(format!("malformed utf-8 value: {err}")))
    }

    pub fn as_link(&self) -> ChainResult<&str> {
        match self {
            Value::Link(hash) => Ok(hash),
            other => Err(ChainError::Protocol(format!(
                "expected link, found {}",
                other.kind()
            ))),
        }
    }

    pub fn as_tree(&self) -> ChainResult<&BTreeMap<String, Value>> {
        match self {
            Value::Tree(tree) => Ok(tree),
            other => Err(ChainError::Protocol(format!(
                "expected tree, found {}",
                other.kind()
            ))),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Bytes(_) => "bytes",
            Value::Link(_) => "link",
            Value::Tree(_) => "tree",
            Value::Empty => "empty",
        }
    }
}

/// Result of greedily descending a root by link names.
pub struct Walk {
    /// Path segments that could not be matched, in order.
    pub remaining: Vec<String>,
    /// Segments that were matched, in order.
    pub matched: Vec<String>,
    /// The traversed nodes, root first, one per matched level plus the root.
    pub nodes: Vec<DagNode>,
    /// The hash at each traversed level, parallel to `nodes`.
    pub hashes: Vec<Hash>,
}

impl Walk {
    pub fn reached(&self) -> (&DagNode, &Hash) {
        // nodes and hashes always contain at least the root
        (
            self.nodes.last().expect("walk holds the root"),
            self.hashes.last().expect("walk holds the root"),
        )
    }

    pub fn complete(&self) -> bool {
        self.remaining.is_empty()
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.trim_start_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

enum FlatWrite {
    Bytes(String, Vec<u8>),
    Link(String, Hash),
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}/{key}")
    }
}

fn flatten(prefix: &str, tree: &BTreeMap<String, Value>, out: &mut Vec<FlatWrite>) {
    for (key, value) in tree {
        match value {
            Value::Bytes(bytes) => out.push(FlatWrite::Bytes(join(prefix, key), bytes.clone())),
            Value::Link(hash) => out.push(FlatWrite::Link(
                format!("{}{LINK_SUFFIX}", join(prefix, key)),
                hash.clone(),
            )),
            Value::Tree(sub) => flatten(&join(prefix, key), sub, out),
            Value::Empty => {}
        }
    }
}

/// Path-addressed view over the MerkleDAG. Stateless given a root: every
/// write returns a new root and never mutates an existing node.
#[derive(Clone)]
pub struct Storage {
    dag: Arc<dyn DagClient>,
}

impl Storage {
    pub fn new(dag: Arc<dyn DagClient>) -> Self {
        Self { dag }
    }

    pub fn dag(&self) -> &Arc<dyn DagClient> {
        &self.dag
    }

    /// Empty root: a tree with no links and sentinel data.
    pub async fn new_root(&self) -> ChainResult<Hash> {
        self.dag.object_new().await
    }

    pub async fn walk(&self, root: &str, path: &str) -> ChainResult<Walk> {
        let segments = split_path(path);
        let mut nodes = vec![self.dag.object_get(root).await?];
        let mut hashes = vec![root.to_string()];
        let mut matched = Vec::new();
        let mut remaining = Vec::new();
        for (index, segment) in segments.iter().enumerate() {
            let current = nodes.last().expect("walk holds the root");
            match current.link(segment) {
                Some(link) => {
                    let hash = link.hash.clone();
                    nodes.push(self.dag.object_get(&hash).await?);
                    hashes.push(hash);
                    matched.push(segment.clone());
                }
                None => {
                    remaining = segments[index..].to_vec();
                    break;
                }
            }
        }
        Ok(Walk {
            remaining,
            matched,
            nodes,
            hashes,
        })
    }

    pub async fn get(&self, root: &str, path: &str) -> ChainResult<Vec<u8>> {
        let walk = self.walk(root, path).await?;
        if !walk.complete() {
            return Err(ChainError::NotFound);
        }
        let (node, _) = walk.reached();
        if node.links.is_empty() {
            Ok(node.data.clone())
        } else if node.has_value_data() {
            Err(ChainError::Protocol(
                "node carries both data and links".into(),
            ))
        } else {
            // a branch holds no value of its own
            Err(ChainError::NotFound)
        }
    }

    pub async fn put(&self, root: &str, path: &str, bytes: &[u8]) -> ChainResult<Hash> {
        if split_path(path).is_empty() {
            return Err(ChainError::Config("cannot put at the root path".into()));
        }
        let leaf = self.dag.object_put(&DagNode::leaf(bytes.to_vec())).await?;
        self.dag.object_patch_add_link(root, path, &leaf).await
    }

    pub async fn put_new(&self, root: &str, path: &str, bytes: &[u8]) -> ChainResult<Hash> {
        let walk = self.walk(root, path).await?;
        if walk.complete() {
            return Err(ChainError::FileExists);
        }
        self.put(root, path, bytes).await
    }

    /// Unlink the value or subtree at `path`, returning the new root.
    /// Absent paths are [`ChainError::NotFound`].
    pub async fn remove(&self, root: &str, path: &str) -> ChainResult<Hash> {
        if split_path(path).is_empty() {
            return Err(ChainError::Config("cannot remove the root path".into()));
        }
        self.dag.object_patch_rm_link(root, path).await
    }

    /// Apply `f` to the value at `path`, or store a default when absent.
    pub async fn update<F>(
        &self,
        root: &str,
        path: &str,
        f: F,
        default: Vec<u8>,
        apply_f_on_default: bool,
    ) -> ChainResult<Hash>
    where
        F: FnOnce(Vec<u8>) -> Vec<u8>,
    {
        match self.get(root, path).await {
            Ok(existing) => self.put(root, path, &f(existing)).await,
            Err(ChainError::NotFound) => {
                let seed = if apply_f_on_default {
                    f(default)
                } else {
                    default
                };
                self.put(root, path, &seed).await
            }
            Err(err) => Err(err),
        }
    }

    /// Direct children of the node at `path`; empty when the path is absent.
    pub async fn ls(&self, root: &str, path: &str) -> ChainResult<Vec<(String, Hash)>> {
        let walk = self.walk(root, path).await?;
        if !walk.complete() {
            return Ok(Vec::new());
        }
        let (node, _) = walk.reached();
        Ok(node
            .links
            .iter()
            .map(|link| (link.name.clone(), link.hash.clone()))
            .collect())
    }

    /// Recursive bulk write. Keys are written in lexicographic order so that
    /// identical logical trees produce identical roots.
    pub async fn put_all(&self, root: &str, values: &BTreeMap<String, Value>) -> ChainResult<Hash> {
        let mut writes = Vec::new();
        flatten("", values, &mut writes);
        let mut current = root.to_string();
        for write in writes {
            current = match write {
                FlatWrite::Bytes(path, bytes) => self.put(&current, &path, &bytes).await?,
                FlatWrite::Link(path, hash) => {
                    self.dag
                        .object_patch_add_link(&current, &path, &hash)
                        .await?
                }
            };
        }
        Ok(current)
    }

    /// Inverse of [`Storage::put_all`]. `_link`-suffixed names come back as
    /// [`Value::Link`] and are not recursed into.
    pub async fn get_all(&self, root: &str, path: &str) -> ChainResult<Value> {
        let walk = self.walk(root, path).await?;
        if !walk.complete() {
            return Err(ChainError::NotFound);
        }
        let (_, hash) = walk.reached();
        self.read_value(hash.clone()).await
    }

    fn read_value(
        &self,
        hash: Hash,
    ) -> Pin<Box<dyn Future<Output = ChainResult<Value>> + Send + '_>> {
        Box::pin(async move {
            let node = self.dag.object_get(&hash).await?;
            if node.links.is_empty() {
                return Ok(Value::Bytes(node.data));
            }
            if node.has_value_data() {
                return Err(ChainError::Protocol(
                    "node carries both data and links".into(),
                ));
            }
            let mut tree = BTreeMap::new();
            for link in &node.links {
                match link.name.strip_suffix(LINK_SUFFIX) {
                    Some(key) if !key.is_empty() => {
                        tree.insert(key.to_string(), Value::Link(link.hash.clone()));
                    }
                    _ => {
                        tree.insert(link.name.clone(), self.read_value(link.hash.clone()).await?);
                    }
                }
            }
            Ok(Value::Tree(tree))
        })
    }

    pub async fn get_hash(&self, root: &str, path: &str) -> ChainResult<Hash> {
        let walk = self.walk(root, path).await?;
        if !walk.complete() {
            return Err(ChainError::NotFound);
        }
        let (_, hash) = walk.reached();
        Ok(hash.clone())
    }

    pub async fn save(&self, bytes: &[u8]) -> ChainResult<Hash> {
        self.dag.object_put(&DagNode::leaf(bytes.to_vec())).await
    }

    pub async fn retrieve(&self, hash: &str) -> ChainResult<Vec<u8>> {
        let node = self.dag.object_get(hash).await?;
        if !node.links.is_empty() && node.has_value_data() {
            return Err(ChainError::Protocol(
                "node carries both data and links".into(),
            ));
        }
        Ok(node.data)
    }

    /// Merkle inclusion proof for `path`: the raw protobuf bytes of every
    /// node on the walk, leaf first, root last.
    pub async fn proof(&self, root: &str, path: &str) -> ChainResult<Vec<Vec<u8>>> {
        let walk = self.walk(root, path).await?;
        if !walk.complete() {
            return Err(ChainError::NotFound);
        }
        let mut chain = Vec::with_capacity(walk.hashes.len());
        for hash in walk.hashes.iter().rev() {
            chain.push(self.dag.object_get_protobuf(hash).await?);
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::MemoryDagStore;

    fn storage() -> Storage {
        Storage::new(MemoryDagStore::shared())
    }

    #[tokio::test]
    async fn put_then_get_returns_the_value() {
        let storage = storage();
        let root = storage.new_root().await.unwrap();
        let root = storage.put(&root, "players/5/name", b"thomas").await.unwrap();
        assert_eq!(
            storage.get(&root, "players/5/name").await.unwrap(),
            b"thomas"
        );
    }

    #[tokio::test]
    async fn leading_slash_is_stripped() {
        let storage = storage();
        let root = storage.new_root().await.unwrap();
        let root = storage.put(&root, "/a/b", b"v").await.unwrap();
        assert_eq!(storage.get(&root, "a/b").await.unwrap(), b"v");
        assert_eq!(storage.get(&root, "/a/b").await.unwrap(), b"v");
    }

    #[tokio::test]
    async fn absent_path_is_not_found() {
        let storage = storage();
        let root = storage.new_root().await.unwrap();
        let root = storage.put(&root, "players/5/name", b"thomas").await.unwrap();
        assert!(matches!(
            storage.get(&root, "players/7/name").await,
            Err(ChainError::NotFound)
        ));
    }

    #[tokio::test]
    async fn writes_produce_new_roots() {
        let storage = storage();
        let r0 = storage.new_root().await.unwrap();
        let r1 = storage.put(&r0, "k", b"a").await.unwrap();
        let r2 = storage.put(&r1, "k", b"b").await.unwrap();
        assert_ne!(r0, r1);
        assert_ne!(r1, r2);
        // the old root still reads the old value
        assert_eq!(storage.get(&r1, "k").await.unwrap(), b"a");
        assert_eq!(storage.get(&r2, "k").await.unwrap(), b"b");
    }

    #[tokio::test]
    async fn put_new_refuses_occupied_paths() {
        let storage = storage();
        let root = storage.new_root().await.unwrap();
        let root = storage.put(&root, "players/5/name", b"thomas").await.unwrap();
        assert!(matches!(
            storage.put_new(&root, "players/5/name", b"x").await,
            Err(ChainError::FileExists)
        ));
        // a branch also counts as occupied
        assert!(matches!(
            storage.put_new(&root, "players/5", b"x").await,
            Err(ChainError::FileExists)
        ));
        storage.put_new(&root, "players/6/name", b"y").await.unwrap();
    }

    #[tokio::test]
    async fn remove_unlinks_a_value() {
        let storage = storage();
        let root = storage.new_root().await.unwrap();
        let root = storage.put(&root, "players/5/name", b"thomas").await.unwrap();
        let root = storage.put(&root, "players/5/age", b"55").await.unwrap();

        let root = storage.remove(&root, "players/5/name").await.unwrap();
        assert!(matches!(
            storage.get(&root, "players/5/name").await,
            Err(ChainError::NotFound)
        ));
        assert_eq!(storage.get(&root, "players/5/age").await.unwrap(), b"55");
    }

    #[tokio::test]
    async fn remove_restores_the_prior_root() {
        let storage = storage();
        let base = storage.new_root().await.unwrap();
        let base = storage.put(&base, "a", b"1").await.unwrap();
        // adding and removing a sibling link lands back on the same hash
        let extended = storage.put(&base, "b", b"2").await.unwrap();
        let removed = storage.remove(&extended, "b").await.unwrap();
        assert_eq!(removed, base);
    }

    #[tokio::test]
    async fn remove_of_an_absent_path_is_not_found() {
        let storage = storage();
        let root = storage.new_root().await.unwrap();
        let root = storage.put(&root, "a", b"1").await.unwrap();
        assert!(matches!(
            storage.remove(&root, "missing").await,
            Err(ChainError::NotFound)
        ));
        assert!(matches!(
            storage.remove(&root, "").await,
            Err(ChainError::Config(_))
        ));
    }

    #[tokio::test]
    async fn update_applies_f_or_seeds_default() {
        let storage = storage();
        let root = storage.new_root().await.unwrap();

        let root = storage
            .update(&root, "counter", |_| unreachable!(), b"0".to_vec(), false)
            .await
            .unwrap();
        assert_eq!(storage.get(&root, "counter").await.unwrap(), b"0");

        let bump = |bytes: Vec<u8>| {
            let n: u64 = String::from_utf8(bytes).unwrap().parse().unwrap();
            (n + 1).to_string().into_bytes()
        };
        let root = storage
            .update(&root, "counter", bump, b"0".to_vec(), false)
            .await
            .unwrap();
        assert_eq!(storage.get(&root, "counter").await.unwrap(), b"1");

        let root = storage
            .update(&root, "other", bump, b"10".to_vec(), true)
            .await
            .unwrap();
        assert_eq!(storage.get(&root, "other").await.unwrap(), b"11");
    }

    #[tokio::test]
    async fn ls_lists_direct_children() {
        let storage = storage();
        let root = storage.new_root().await.unwrap();
        let root = storage.put(&root, "players/5/name", b"thomas").await.unwrap();
        let root = storage.put(&root, "players/5/age", b"55").await.unwrap();
        let children = storage.ls(&root, "players/5").await.unwrap();
        let names: Vec<&str> = children.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["age", "name"]);
        assert!(storage.ls(&root, "missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn walk_reports_remaining_segments() {
        let storage = storage();
        let root = storage.new_root().await.unwrap();
        let root = storage.put(&root, "a/b", b"v").await.unwrap();
        let walk = storage.walk(&root, "a/x/y").await.unwrap();
        assert_eq!(walk.matched, vec!["a".to_string()]);
        assert_eq!(walk.remaining, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(walk.nodes.len(), 2);
        assert_eq!(walk.hashes.len(), 2);
        assert_eq!(walk.hashes[0], root);
    }

    #[tokio::test]
    async fn put_all_and_get_all_round_trip() {
        let storage = storage();
        let referenced = storage.new_root().await.unwrap();
        let referenced = storage.put(&referenced, "inner", b"deep").await.unwrap();

        let mut player = BTreeMap::new();
        player.insert("name".to_string(), Value::string("johnny"));
        player.insert("age".to_string(), Value::string("33"));
        let mut players = BTreeMap::new();
        players.insert("id42".to_string(), Value::Tree(player));
        let mut tree = BTreeMap::new();
        tree.insert("players".to_string(), Value::Tree(players));
        tree.insert("season".to_string(), Value::string("2024"));
        tree.insert("history".to_string(), Value::Link(referenced.clone()));
        tree.insert("unused".to_string(), Value::Empty);

        let root = storage.new_root().await.unwrap();
        let root = storage.put_all(&root, &tree).await.unwrap();

        assert_eq!(
            storage.get(&root, "players/id42/name").await.unwrap(),
            b"johnny"
        );
        // the reference is stored under the suffixed link name and not recursed
        assert_eq!(
            storage.get_hash(&root, "history_link").await.unwrap(),
            referenced
        );

        let read = storage.get_all(&root, "").await.unwrap();
        let top = read.as_tree().unwrap();
        assert_eq!(top.get("season").unwrap().as_str().unwrap(), "2024");
        assert_eq!(top.get("history").unwrap().as_link().unwrap(), referenced);
        let players = top.get("players").unwrap().as_tree().unwrap();
        let player = players.get("id42").unwrap().as_tree().unwrap();
        assert_eq!(player.get("age").unwrap().as_str().unwrap(), "33");
        assert!(!top.contains_key("unused"));
    }

    #[tokio::test]
    async fn put_all_is_canonical_over_key_order() {
        let storage = storage();
        let mut forward = BTreeMap::new();
        forward.insert("a".to_string(), Value::string("1"));
        forward.insert("b".to_string(), Value::string("2"));
        // BTreeMap iteration is sorted regardless of insertion order
        let mut backward = BTreeMap::new();
        backward.insert("b".to_string(), Value::string("2"));
        backward.insert("a".to_string(), Value::string("1"));

        let empty = storage.new_root().await.unwrap();
        let first = storage.put_all(&empty, &forward).await.unwrap();
        let second = storage.put_all(&empty, &backward).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn save_and_retrieve_raw_bytes() {
        let storage = storage();
        let hash = storage.save(b"blob").await.unwrap();
        assert_eq!(storage.retrieve(&hash).await.unwrap(), b"blob");
    }
}
