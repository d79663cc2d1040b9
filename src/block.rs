//! Block construction, execution, and persistence.
//!
//! A saved block is just a storage tree; the primitives here read individual
//! fields back from a block hash without deserializing the whole tree, the
//! builder assembles genesis and successor drafts, and the processor folds
//! transactions left to right so every receipt's final root seeds the next
//! transaction's initial root.

use tracing::info;

use crate::errors::{ChainError, ChainResult};
use crate::queue;
use crate::runner::{self, Runner};
use crate::serializer::BlockSerializer;
use crate::storage::Storage;
use crate::types::{Block, Hash, Transaction};

pub async fn read_block_number(storage: &Storage, block_hash: &str) -> ChainResult<u64> {
    let bytes = storage.get(block_hash, "block_number").await?;
    String::from_utf8(bytes)
        .map_err(|err| ChainError::Protocol(format!("malformed block_number: {err}")))?
        .parse()
        .map_err(|err| ChainError::Protocol(format!("malformed block_number: {err}")))
}

pub async fn read_final_storage(storage: &Storage, block_hash: &str) -> ChainResult<Hash> {
    storage.get_hash(block_hash, "final_storage_link").await
}

pub async fn read_parent(storage: &Storage, block_hash: &str) -> ChainResult<Option<Hash>> {
    match storage.get_hash(block_hash, "parent_block_hash_link").await {
        Ok(hash) => Ok(Some(hash)),
        Err(ChainError::NotFound) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Block 0: no parent, no transactions, empty-root state on both sides.
pub async fn genesis(storage: &Storage) -> ChainResult<Block> {
    let empty = storage.new_root().await?;
    Ok(Block {
        block_number: 0,
        parent_block_hash: None,
        initial_storage: empty.clone(),
        final_storage: empty,
        transactions: Vec::new(),
        receipts: Vec::new(),
    })
}

/// Draft the successor of a saved block: number N+1, initial state at the
/// parent's final state, and the parent-state queue for N+1 drained ahead of
/// any leader-accepted extras.
pub async fn new_block(
    storage: &Storage,
    parent_hash: &str,
    extra: Vec<Transaction>,
) -> ChainResult<Block> {
    let parent_number = read_block_number(storage, parent_hash).await?;
    let initial = read_final_storage(storage, parent_hash).await?;
    let number = parent_number + 1;
    let mut transactions = queue::drain_for_block(storage, &initial, number).await?;
    transactions.extend(extra);
    Ok(Block {
        block_number: number,
        parent_block_hash: Some(parent_hash.to_string()),
        initial_storage: initial.clone(),
        final_storage: initial,
        transactions,
        receipts: Vec::new(),
    })
}

/// Execute every transaction in order, accumulating receipts. Any runner or
/// signature error aborts the whole run and leaves the caller's draft as it
/// was.
pub async fn process(block: &Block, storage: &Storage, runner: &dyn Runner) -> ChainResult<Block> {
    let mut processed = block.clone();
    processed.receipts = Vec::with_capacity(block.transactions.len());
    let mut current = block.initial_storage.clone();
    for transaction in &block.transactions {
        let receipt = runner::execute_transaction(
            runner,
            storage,
            transaction,
            &current,
            block.block_number,
        )
        .await?;
        current = receipt.final_storage.clone();
        processed.receipts.push(receipt);
    }
    processed.final_storage = current;
    Ok(processed)
}

/// Serialize the block into a fresh tree and return its root: the block hash.
pub async fn save(
    block: &Block,
    storage: &Storage,
    serializer: &dyn BlockSerializer,
) -> ChainResult<Hash> {
    let tree = serializer.serialize(block)?;
    let root = storage.new_root().await?;
    let hash = storage.put_all(&root, tree.as_tree()?).await?;
    info!(block_number = block.block_number, hash = %hash, "saved block");
    Ok(hash)
}

pub async fn load(
    storage: &Storage,
    block_hash: &str,
    serializer: &dyn BlockSerializer,
) -> ChainResult<Block> {
    let tree = storage.get_all(block_hash, "").await?;
    serializer.deserialize(&tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::MemoryDagStore;
    use crate::runner::StateRunner;
    use crate::serializer::TreeSerializer;
    use crate::types::Invocation;

    fn storage() -> Storage {
        Storage::new(MemoryDagStore::shared())
    }

    #[tokio::test]
    async fn genesis_round_trips_through_its_hash() {
        let storage = storage();
        let block = genesis(&storage).await.unwrap();
        let hash = save(&block, &storage, &TreeSerializer).await.unwrap();
        assert_eq!(read_block_number(&storage, &hash).await.unwrap(), 0);
        assert_eq!(
            read_final_storage(&storage, &hash).await.unwrap(),
            block.final_storage
        );
        assert_eq!(read_parent(&storage, &hash).await.unwrap(), None);
        assert_eq!(load(&storage, &hash, &TreeSerializer).await.unwrap(), block);
    }

    #[tokio::test]
    async fn successor_links_to_its_parent() {
        let storage = storage();
        let parent = genesis(&storage).await.unwrap();
        let parent_hash = save(&parent, &storage, &TreeSerializer).await.unwrap();
        let block = new_block(&storage, &parent_hash, Vec::new()).await.unwrap();
        assert_eq!(block.block_number, 1);
        assert_eq!(block.parent_block_hash.as_deref(), Some(parent_hash.as_str()));
        assert_eq!(block.initial_storage, parent.final_storage);
        assert!(block.transactions.is_empty());

        let hash = save(&block, &storage, &TreeSerializer).await.unwrap();
        assert_eq!(
            read_parent(&storage, &hash).await.unwrap().as_deref(),
            Some(parent_hash.as_str())
        );
    }

    #[tokio::test]
    async fn processing_chains_receipts() {
        let storage = storage();
        let mut block = genesis(&storage).await.unwrap();
        block.transactions = vec![
            Transaction::owned(
                Invocation::new("set", vec!["a".into(), "1".into()]),
                vec![0x01],
            ),
            Transaction::owned(
                Invocation::new("set", vec!["b".into(), "2".into()]),
                vec![0x01],
            ),
        ];
        let processed = process(&block, &storage, &StateRunner).await.unwrap();
        assert_eq!(processed.receipts.len(), 2);
        assert_eq!(
            processed.receipts[0].initial_storage,
            processed.initial_storage
        );
        assert_eq!(
            processed.receipts[0].final_storage,
            processed.receipts[1].initial_storage
        );
        assert_eq!(
            processed.receipts[1].final_storage,
            processed.final_storage
        );
        assert_eq!(storage.get(&processed.final_storage, "a").await.unwrap(), b"1");
        assert_eq!(storage.get(&processed.final_storage, "b").await.unwrap(), b"2");
    }

    #[tokio::test]
    async fn empty_block_keeps_its_initial_state() {
        let storage = storage();
        let block = genesis(&storage).await.unwrap();
        let processed = process(&block, &storage, &StateRunner).await.unwrap();
        assert!(processed.receipts.is_empty());
        assert_eq!(processed.final_storage, processed.initial_storage);
    }
}
