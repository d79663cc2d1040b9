//! Bijective mapping between blocks and storage trees.
//!
//! The tree scheme is the one wire format of the chain: block fields live at
//! the tree root, hashes are stored as `_link` references, and ordered lists
//! serialize as decimal-indexed mappings. The serializer is a strategy
//! object so an alternative scheme can be selected from configuration.

use std::collections::BTreeMap;

use crate::errors::{ChainError, ChainResult};
use crate::storage::Value;
use crate::types::{Block, Invocation, Receipt, Transaction, TransactionAuth};

pub trait BlockSerializer: Send + Sync {
    fn serialize(&self, block: &Block) -> ChainResult<Value>;
    fn deserialize(&self, tree: &Value) -> ChainResult<Block>;
}

pub fn from_name(name: &str) -> ChainResult<std::sync::Arc<dyn BlockSerializer>> {
    match name {
        "tree" => Ok(std::sync::Arc::new(TreeSerializer)),
        other => Err(ChainError::Config(format!("unknown serializer {other}"))),
    }
}

/// The canonical decimal-indexed tree scheme.
pub struct TreeSerializer;

impl BlockSerializer for TreeSerializer {
    fn serialize(&self, block: &Block) -> ChainResult<Value> {
        let mut root = BTreeMap::new();
        root.insert(
            "block_number".to_string(),
            Value::string(block.block_number.to_string()),
        );
        match &block.parent_block_hash {
            Some(parent) => {
                root.insert(
                    "parent_block_hash".to_string(),
                    Value::Link(parent.clone()),
                );
            }
            None => {
                root.insert("parent_block_hash".to_string(), Value::Empty);
            }
        }
        root.insert(
            "initial_storage".to_string(),
            Value::Link(block.initial_storage.clone()),
        );
        root.insert(
            "final_storage".to_string(),
            Value::Link(block.final_storage.clone()),
        );
        root.insert(
            "transactions".to_string(),
            indexed(block.transactions.iter().map(serialize_transaction)),
        );
        root.insert(
            "receipts".to_string(),
            indexed(block.receipts.iter().map(serialize_receipt)),
        );
        Ok(Value::Tree(root))
    }

    fn deserialize(&self, tree: &Value) -> ChainResult<Block> {
        let root = tree.as_tree()?;
        let block_number = required_str(root, "block_number")?
            .parse()
            .map_err(|err| ChainError::Protocol(format!("malformed block_number: {err}")))?;
        let parent_block_hash = match root.get("parent_block_hash") {
            Some(Value::Empty) | None => None,
            Some(value) => Some(value.as_link()?.to_string()),
        };
        let initial_storage = required(root, "initial_storage")?.as_link()?.to_string();
        let final_storage = required(root, "final_storage")?.as_link()?.to_string();
        let transactions = sorted_items(root.get("transactions"))?
            .into_iter()
            .map(deserialize_transaction)
            .collect::<ChainResult<Vec<_>>>()?;
        let receipts = sorted_items(root.get("receipts"))?
            .into_iter()
            .map(deserialize_receipt)
            .collect::<ChainResult<Vec<_>>>()?;
        Ok(Block {
            block_number,
            parent_block_hash,
            initial_storage,
            final_storage,
            transactions,
            receipts,
        })
    }
}

fn serialize_transaction(transaction: &Transaction) -> Value {
    let mut tree = BTreeMap::new();
    tree.insert(
        "function".to_string(),
        Value::string(transaction.invocation.function.clone()),
    );
    tree.insert(
        "args".to_string(),
        indexed(
            transaction
                .invocation
                .args
                .iter()
                .map(|arg| Value::string(arg.clone())),
        ),
    );
    match &transaction.auth {
        TransactionAuth::Signed {
            signature,
            public_key,
        } => {
            tree.insert(
                "signature".to_string(),
                Value::string(bs58::encode(signature).into_string()),
            );
            tree.insert(
                "public_key".to_string(),
                Value::string(bs58::encode(public_key).into_string()),
            );
        }
        TransactionAuth::Owned { owner } => {
            tree.insert(
                "owner".to_string(),
                Value::string(bs58::encode(owner).into_string()),
            );
        }
    }
    Value::Tree(tree)
}

fn deserialize_transaction(value: &Value) -> ChainResult<Transaction> {
    let tree = value.as_tree()?;
    let function = required_str(tree, "function")?.to_string();
    let args = sorted_items(tree.get("args"))?
        .into_iter()
        .map(|arg| arg.as_str().map(str::to_string))
        .collect::<ChainResult<Vec<_>>>()?;
    let signature = tree.get("signature");
    let owner = tree.get("owner");
    let auth = match (signature, owner) {
        (Some(signature), None) => TransactionAuth::Signed {
            signature: base58_field(signature, "signature")?,
            public_key: base58_field(required(tree, "public_key")?, "public_key")?,
        },
        (None, Some(owner)) => TransactionAuth::Owned {
            owner: base58_field(owner, "owner")?,
        },
        (Some(_), Some(_)) => {
            return Err(ChainError::Protocol(
                "transaction carries both signature and owner".into(),
            ));
        }
        (None, None) => {
            return Err(ChainError::Protocol(
                "transaction carries neither signature nor owner".into(),
            ));
        }
    };
    Ok(Transaction {
        invocation: Invocation { function, args },
        auth,
    })
}

fn serialize_receipt(receipt: &Receipt) -> Value {
    let mut tree = BTreeMap::new();
    tree.insert(
        "status".to_string(),
        Value::string(receipt.status.to_string()),
    );
    tree.insert(
        "initial_storage".to_string(),
        Value::Link(receipt.initial_storage.clone()),
    );
    tree.insert(
        "final_storage".to_string(),
        Value::Link(receipt.final_storage.clone()),
    );
    tree.insert(
        "logs".to_string(),
        indexed(receipt.logs.iter().map(|log| Value::string(log.clone()))),
    );
    match &receipt.debug {
        Some(debug) => {
            tree.insert("debug".to_string(), Value::string(debug.clone()));
        }
        None => {
            tree.insert("debug".to_string(), Value::Empty);
        }
    }
    Value::Tree(tree)
}

fn deserialize_receipt(value: &Value) -> ChainResult<Receipt> {
    let tree = value.as_tree()?;
    let status = required_str(tree, "status")?
        .parse()
        .map_err(|err| ChainError::Protocol(format!("malformed status: {err}")))?;
    let initial_storage = required(tree, "initial_storage")?.as_link()?.to_string();
    let final_storage = required(tree, "final_storage")?.as_link()?.to_string();
    let logs = sorted_items(tree.get("logs"))?
        .into_iter()
        .map(|log| log.as_str().map(str::to_string))
        .collect::<ChainResult<Vec<_>>>()?;
    let debug = match tree.get("debug") {
        Some(Value::Empty) | None => None,
        Some(value) => Some(value.as_str()?.to_string()),
    };
    Ok(Receipt {
        status,
        initial_storage,
        final_storage,
        logs,
        debug,
    })
}

/// `[v0, v1, …]` serializes to `{"0": v0, "1": v1, …}`.
fn indexed(items: impl Iterator<Item = Value>) -> Value {
    let tree: BTreeMap<String, Value> = items
        .enumerate()
        .map(|(index, value)| (index.to_string(), value))
        .collect();
    Value::Tree(tree)
}

/// Inverse of [`indexed`]: sort keys by integer value, not lexicographically.
fn sorted_items(value: Option<&Value>) -> ChainResult<Vec<&Value>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let tree = value.as_tree()?;
    let mut entries: Vec<(u64, &Value)> = Vec::with_capacity(tree.len());
    for (key, value) in tree {
        let index = key
            .parse()
            .map_err(|err| ChainError::Protocol(format!("malformed index {key}: {err}")))?;
        entries.push((index, value));
    }
    entries.sort_by_key(|(index, _)| *index);
    Ok(entries.into_iter().map(|(_, value)| value).collect())
}

fn required<'a>(tree: &'a BTreeMap<String, Value>, key: &str) -> ChainResult<&'a Value> {
    tree.get(key)
        .ok_or_else(|| ChainError::Protocol(format!("missing field {key}")))
}

fn required_str<'a>(tree: &'a BTreeMap<String, Value>, key: &str) -> ChainResult<&'a str> {
    required(tree, key)?.as_str()
}

fn base58_field(value: &Value, what: &str) -> ChainResult<Vec<u8>> {
    bs58::decode(value.as_str()?)
        .into_vec()
        .map_err(|err| ChainError::Protocol(format!("malformed {what}: {err}")))
}
