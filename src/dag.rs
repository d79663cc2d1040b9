//! MerkleDAG and mutable-name adapters.
//!
//! `DagClient` is the object-store contract the rest of the crate is written
//! against: put objects, add named links, fetch nodes and their raw protobuf
//! bytes. `HttpDagClient` speaks the daemon's HTTP API; `MemoryDagStore` is a
//! faithful in-process implementation used by tests and local tooling. Both
//! address objects by sha256 of the protobuf encoding, printed as a base58
//! multihash.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::errors::{ChainError, ChainResult};
use crate::types::Hash;
use crate::wire;

/// Two-byte placeholder carried by intermediate tree nodes. Empty data is
/// also accepted on read.
pub const BRANCH_SENTINEL: [u8; 2] = [0x08, 0x01];

const SHA256_CODE: u8 = 0x12;
const SHA256_LEN: u8 = 0x20;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DagLink {
    pub name: String,
    pub hash: Hash,
    pub size: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DagNode {
    pub data: Vec<u8>,
    pub links: Vec<DagLink>,
}

impl DagNode {
    pub fn leaf(data: Vec<u8>) -> Self {
        Self {
            data,
            links: Vec::new(),
        }
    }

    pub fn branch() -> Self {
        Self {
            data: BRANCH_SENTINEL.to_vec(),
            links: Vec::new(),
        }
    }

    /// True when the node carries a real value rather than the directory
    /// placeholder.
    pub fn has_value_data(&self) -> bool {
        !self.data.is_empty() && self.data != BRANCH_SENTINEL
    }

    pub fn link(&self, name: &str) -> Option<&DagLink> {
        self.links.iter().find(|link| link.name == name)
    }
}

/// sha256 multihash of raw node bytes: `0x12 0x20` followed by the digest.
pub fn multihash_bytes(bytes: &[u8]) -> Vec<u8> {
    let digest = Sha256::digest(bytes);
    let mut out = Vec::with_capacity(34);
    out.push(SHA256_CODE);
    out.push(SHA256_LEN);
    out.extend_from_slice(&digest);
    out
}

pub fn multihash_b58(bytes: &[u8]) -> Hash {
    bs58::encode(multihash_bytes(bytes)).into_string()
}

#[async_trait]
pub trait DagClient: Send + Sync {
    /// Store an empty branch node and return its hash.
    async fn object_new(&self) -> ChainResult<Hash>;
    /// Store a node and return its hash.
    async fn object_put(&self, node: &DagNode) -> ChainResult<Hash>;
    /// Return a new root whose link path points at `child`, creating
    /// intermediate branch nodes as needed.
    async fn object_patch_add_link(&self, root: &str, path: &str, child: &str)
        -> ChainResult<Hash>;
    /// Return a new root with the link at `path` removed. Intermediate
    /// branch nodes stay in place even when they end up empty.
    async fn object_patch_rm_link(&self, root: &str, path: &str) -> ChainResult<Hash>;
    async fn object_get(&self, hash: &str) -> ChainResult<DagNode>;
    /// Raw protobuf encoding of a node, as hashed by the store.
    async fn object_get_protobuf(&self, hash: &str) -> ChainResult<Vec<u8>>;
}

/// Mutable-name service: the only long-lived mutable anchor in the system.
#[async_trait]
pub trait NameStore: Send + Sync {
    async fn publish(&self, hash: &str, key: &str) -> ChainResult<()>;
    async fn resolve(&self, key: &str, nocache: bool) -> ChainResult<Hash>;
}

/// In-process content-addressed store. Links are kept name-sorted so that
/// identical logical trees always produce identical roots.
#[derive(Default)]
pub struct MemoryDagStore {
    nodes: RwLock<HashMap<Hash, DagNode>>,
}

impl MemoryDagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn insert(nodes: &mut HashMap<Hash, DagNode>, node: DagNode) -> ChainResult<Hash> {
        let encoded = wire::encode_node(&node)?;
        let hash = multihash_b58(&encoded);
        nodes.insert(hash.clone(), node);
        Ok(hash)
    }

    fn encoded_size(nodes: &HashMap<Hash, DagNode>, hash: &str) -> u64 {
        nodes
            .get(hash)
            .and_then(|node| wire::encode_node(node).ok())
            .map(|bytes| bytes.len() as u64)
            .unwrap_or(0)
    }

    fn add_link(
        nodes: &mut HashMap<Hash, DagNode>,
        node_hash: &str,
        segments: &[&str],
        child: &str,
    ) -> ChainResult<Hash> {
        let mut node = nodes
            .get(node_hash)
            .cloned()
            .ok_or(ChainError::NotFound)?;
        if node.has_value_data() {
            return Err(ChainError::Protocol(
                "cannot add a link to a node carrying data".into(),
            ));
        }
        let (segment, rest) = segments
            .split_first()
            .ok_or_else(|| ChainError::Protocol("empty link path".into()))?;
        let target = if rest.is_empty() {
            child.to_string()
        } else {
            let next = match node.link(segment) {
                Some(link) => link.hash.clone(),
                None => Self::insert(nodes, DagNode::branch())?,
            };
            Self::add_link(nodes, &next, rest, child)?
        };
        let size = Self::encoded_size(nodes, &target);
        node.links.retain(|link| link.name != *segment);
        node.links.push(DagLink {
            name: segment.to_string(),
            hash: target,
            size,
        });
        node.links.sort_by(|a, b| a.name.cmp(&b.name));
        Self::insert(nodes, node)
    }

    fn rm_link(
        nodes: &mut HashMap<Hash, DagNode>,
        node_hash: &str,
        segments: &[&str],
    ) -> ChainResult<Hash> {
        let mut node = nodes
            .get(node_hash)
            .cloned()
            .ok_or(ChainError::NotFound)?;
        let (segment, rest) = segments
            .split_first()
            .ok_or_else(|| ChainError::Protocol("empty link path".into()))?;
        let link = node.link(segment).ok_or(ChainError::NotFound)?;
        if rest.is_empty() {
            node.links.retain(|link| link.name != *segment);
        } else {
            let next = link.hash.clone();
            let target = Self::rm_link(nodes, &next, rest)?;
            let size = Self::encoded_size(nodes, &target);
            node.links.retain(|link| link.name != *segment);
            node.links.push(DagLink {
                name: segment.to_string(),
                hash: target,
                size,
            });
            node.links.sort_by(|a, b| a.name.cmp(&b.name));
        }
        Self::insert(nodes, node)
    }
}

#[async_trait]
impl DagClient for MemoryDagStore {
    async fn object_new(&self) -> ChainResult<Hash> {
        let mut nodes = self.nodes.write();
        Self::insert(&mut nodes, DagNode::branch())
    }

    async fn object_put(&self, node: &DagNode) -> ChainResult<Hash> {
        let mut nodes = self.nodes.write();
        Self::insert(&mut nodes, node.clone())
    }

    async fn object_patch_add_link(
        &self,
        root: &str,
        path: &str,
        child: &str,
    ) -> ChainResult<Hash> {
        let segments: Vec<&str> = path
            .trim_start_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        if segments.is_empty() {
            return Err(ChainError::Protocol("empty link path".into()));
        }
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(child) {
            return Err(ChainError::NotFound);
        }
        Self::add_link(&mut nodes, root, &segments, child)
    }

    async fn object_patch_rm_link(&self, root: &str, path: &str) -> ChainResult<Hash> {
        let segments: Vec<&str> = path
            .trim_start_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        if segments.is_empty() {
            return Err(ChainError::Protocol("empty link path".into()));
        }
        let mut nodes = self.nodes.write();
        Self::rm_link(&mut nodes, root, &segments)
    }

    async fn object_get(&self, hash: &str) -> ChainResult<DagNode> {
        self.nodes
            .read()
            .get(hash)
            .cloned()
            .ok_or(ChainError::NotFound)
    }

    async fn object_get_protobuf(&self, hash: &str) -> ChainResult<Vec<u8>> {
        let node = self.object_get(hash).await?;
        wire::encode_node(&node)
    }
}

/// Name mapping for tests and local single-process runs.
#[derive(Default)]
pub struct MemoryNameStore {
    names: RwLock<HashMap<String, Hash>>,
}

impl MemoryNameStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl NameStore for MemoryNameStore {
    async fn publish(&self, hash: &str, key: &str) -> ChainResult<()> {
        self.names
            .write()
            .insert(key.to_string(), hash.to_string());
        Ok(())
    }

    async fn resolve(&self, key: &str, _nocache: bool) -> ChainResult<Hash> {
        self.names
            .read()
            .get(key)
            .cloned()
            .ok_or(ChainError::NotFound)
    }
}

#[derive(Deserialize)]
struct HashResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Deserialize)]
struct KeyResponse {
    #[serde(rename = "Key")]
    key: String,
}

#[derive(Deserialize)]
struct LinkJson {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Hash")]
    hash: String,
    #[serde(rename = "Size", default)]
    size: u64,
}

#[derive(Deserialize)]
struct ObjectJson {
    #[serde(rename = "Data", default)]
    data: String,
    #[serde(rename = "Links", default)]
    links: Vec<LinkJson>,
}

#[derive(Deserialize)]
struct PathResponse {
    #[serde(rename = "Path")]
    path: String,
}

#[derive(Deserialize)]
struct DaemonError {
    #[serde(rename = "Message", default)]
    message: String,
}

/// Client for the daemon's HTTP object API. Only this adapter keeps a
/// connection pool; everything above it works with immutable hashes.
pub struct HttpDagClient {
    base: String,
    client: reqwest::Client,
}

impl HttpDagClient {
    pub fn new(base: &str) -> ChainResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|err| ChainError::Transport(err.to_string()))?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post(&self, path_and_query: &str) -> ChainResult<reqwest::Response> {
        let url = format!("{}/api/v0/{path_and_query}", self.base);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|err| ChainError::Transport(err.to_string()))?;
        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> ChainResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if let Ok(err) = serde_json::from_str::<DaemonError>(&body) {
        if err.message.contains("could not resolve name") {
            return Err(ChainError::NotFound);
        }
        return Err(ChainError::Transport(format!("{status}: {}", err.message)));
    }
    Err(ChainError::Transport(format!("{status}: {body}")))
}

async fn json_body<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> ChainResult<T> {
    response
        .json()
        .await
        .map_err(|err| ChainError::Transport(err.to_string()))
}

#[async_trait]
impl DagClient for HttpDagClient {
    async fn object_new(&self) -> ChainResult<Hash> {
        let response: HashResponse = json_body(self.post("object/new").await?).await?;
        Ok(response.hash)
    }

    async fn object_put(&self, node: &DagNode) -> ChainResult<Hash> {
        let encoded = wire::encode_node(node)?;
        let part = reqwest::multipart::Part::bytes(encoded).file_name("node");
        let form = reqwest::multipart::Form::new().part("data", part);
        let url = format!("{}/api/v0/block/put?format=v0", self.base);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|err| ChainError::Transport(err.to_string()))?;
        let response: KeyResponse = json_body(check_status(response).await?).await?;
        Ok(response.key)
    }

    async fn object_patch_add_link(
        &self,
        root: &str,
        path: &str,
        child: &str,
    ) -> ChainResult<Hash> {
        let query =
            format!("object/patch/add-link?arg={root}&arg={path}&arg={child}&create=true");
        let response: HashResponse = json_body(self.post(&query).await?).await?;
        Ok(response.hash)
    }

    async fn object_patch_rm_link(&self, root: &str, path: &str) -> ChainResult<Hash> {
        let query = format!("object/patch/rm-link?arg={root}&arg={path}");
        let response: HashResponse = json_body(self.post(&query).await?).await?;
        Ok(response.hash)
    }

    async fn object_get(&self, hash: &str) -> ChainResult<DagNode> {
        use base64::Engine;

        let query = format!("object/get?arg={hash}&data-encoding=base64");
        let object: ObjectJson = json_body(self.post(&query).await?).await?;
        let data = if object.data.is_empty() {
            Vec::new()
        } else {
            base64::engine::general_purpose::STANDARD
                .decode(&object.data)
                .map_err(|err| ChainError::Protocol(format!("malformed node data: {err}")))?
        };
        Ok(DagNode {
            data,
            links: object
                .links
                .into_iter()
                .map(|link| DagLink {
                    name: link.name,
                    hash: link.hash,
                    size: link.size,
                })
                .collect(),
        })
    }

    async fn object_get_protobuf(&self, hash: &str) -> ChainResult<Vec<u8>> {
        let response = self.post(&format!("block/get?arg={hash}")).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ChainError::Transport(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Name API client; publish is the single slow call of the system and gets a
/// wider timeout than the rest of the adapter.
pub struct HttpNameStore {
    base: String,
    client: reqwest::Client,
}

impl HttpNameStore {
    pub fn new(base: &str) -> ChainResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(PUBLISH_TIMEOUT)
            .build()
            .map_err(|err| ChainError::Transport(err.to_string()))?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl NameStore for HttpNameStore {
    async fn publish(&self, hash: &str, key: &str) -> ChainResult<()> {
        let url = format!(
            "{}/api/v0/name/publish?arg=/ipfs/{hash}&key={key}",
            self.base
        );
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|err| ChainError::Transport(err.to_string()))?;
        check_status(response).await?;
        Ok(())
    }

    async fn resolve(&self, key: &str, nocache: bool) -> ChainResult<Hash> {
        let url = format!(
            "{}/api/v0/name/resolve?arg={key}&nocache={nocache}",
            self.base
        );
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|err| ChainError::Transport(err.to_string()))?;
        let resolved: PathResponse = json_body(check_status(response).await?).await?;
        resolved
            .path
            .rsplit('/')
            .next()
            .filter(|hash| !hash.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ChainError::Protocol(format!("malformed path {}", resolved.path)))
    }
}
