//! Deferred transactions, persisted inside the state tree itself.
//!
//! A transaction queued for block N lives at `/transaction_queue/N/<seq>`
//! with a 1-based sequence local to that block number. Because the queue is
//! part of the storage tree, enqueueing is as atomic as any other root-hash
//! swap, and the block with number N drains exactly the queue its parent
//! state carried.

use crate::errors::{ChainError, ChainResult};
use crate::storage::Storage;
use crate::types::{Hash, Invocation, Transaction};

const QUEUE_PREFIX: &str = "transaction_queue";

fn queue_path(block_number: u64) -> String {
    format!("{QUEUE_PREFIX}/{block_number}")
}

/// Persist an owner-authorised transaction for execution at `block_number`.
pub async fn enqueue(
    storage: &Storage,
    root: &str,
    block_number: u64,
    owner: &[u8],
    invocation: Invocation,
) -> ChainResult<Hash> {
    let entries = storage.ls(root, &queue_path(block_number)).await?;
    let mut last_seq = 0u64;
    for (name, _) in &entries {
        let seq: u64 = name
            .parse()
            .map_err(|err| ChainError::Protocol(format!("malformed queue entry {name}: {err}")))?;
        last_seq = last_seq.max(seq);
    }
    let transaction = Transaction::owned(invocation, owner.to_vec());
    let encoded = bincode::serialize(&transaction)?;
    let path = format!("{}/{}", queue_path(block_number), last_seq + 1);
    storage.put(root, &path, &encoded).await
}

/// All transactions queued for `block_number`, ascending by enqueue order.
pub async fn drain_for_block(
    storage: &Storage,
    root: &str,
    block_number: u64,
) -> ChainResult<Vec<Transaction>> {
    let tree = match storage.get_all(root, &queue_path(block_number)).await {
        Ok(tree) => tree,
        Err(ChainError::NotFound) => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let mut entries: Vec<(u64, Transaction)> = Vec::new();
    for (name, value) in tree.as_tree()? {
        let seq: u64 = name
            .parse()
            .map_err(|err| ChainError::Protocol(format!("malformed queue entry {name}: {err}")))?;
        let transaction = bincode::deserialize(value.as_bytes()?)?;
        entries.push((seq, transaction));
    }
    entries.sort_by_key(|(seq, _)| *seq);
    Ok(entries.into_iter().map(|(_, tx)| tx).collect())
}
