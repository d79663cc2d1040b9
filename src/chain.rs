//! Follower-side verification of a remote chain.
//!
//! A candidate block is accepted only if re-executing it locally reproduces
//! the received block byte for byte, and the same holds for every ancestor
//! down to the currently accepted head. No voting: re-execution is the
//! proof.

use tracing::debug;

use crate::block;
use crate::errors::{ChainError, ChainResult};
use crate::runner::Runner;
use crate::serializer::BlockSerializer;
use crate::storage::Storage;
use crate::types::Block;

/// Walk from `candidate` back to `current`, re-executing every block on the
/// way. Returns the verified candidate; any divergence is a
/// [`ChainError::ChainMismatch`] naming the first offending field.
pub async fn verify_candidate(
    storage: &Storage,
    serializer: &dyn BlockSerializer,
    runner: &dyn Runner,
    current: &Block,
    candidate: Block,
) -> ChainResult<Block> {
    let mut cursor = candidate.clone();
    loop {
        if cursor.block_number < current.block_number {
            return Err(ChainError::ChainMismatch {
                field: "block_number".into(),
            });
        }
        if cursor.block_number == current.block_number {
            deep_compare(current, &cursor)?;
            return Ok(candidate);
        }

        // strip the claimed outcome and recompute it with the local runner
        let mut replay = cursor.clone();
        replay.receipts.clear();
        replay.final_storage = replay.initial_storage.clone();
        let recomputed = block::process(&replay, storage, runner).await?;
        deep_compare(&recomputed, &cursor)?;
        debug!(block_number = cursor.block_number, "re-execution matched");

        let parent_hash = cursor.parent_block_hash.clone().ok_or_else(|| {
            ChainError::ChainMismatch {
                field: "parent_block_hash".into(),
            }
        })?;
        cursor = block::load(storage, &parent_hash, serializer)
            .await
            .map_err(|_| ChainError::ChainMismatch {
                field: "parent_block_hash".into(),
            })?;
    }
}

fn deep_compare(expected: &Block, actual: &Block) -> ChainResult<()> {
    let mismatch = |field: &str| ChainError::ChainMismatch {
        field: field.to_string(),
    };
    if expected.block_number != actual.block_number {
        return Err(mismatch("block_number"));
    }
    if expected.parent_block_hash != actual.parent_block_hash {
        return Err(mismatch("parent_block_hash"));
    }
    if expected.initial_storage != actual.initial_storage {
        return Err(mismatch("initial_storage"));
    }
    if expected.final_storage != actual.final_storage {
        return Err(mismatch("final_storage"));
    }
    if expected.transactions != actual.transactions {
        return Err(mismatch("transactions"));
    }
    if expected.receipts != actual.receipts {
        return Err(mismatch("receipts"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{genesis, new_block, process, save};
    use crate::dag::MemoryDagStore;
    use crate::runner::StateRunner;
    use crate::serializer::TreeSerializer;
    use crate::types::{Invocation, Transaction};

    async fn minted_chain() -> (Storage, Block, Block) {
        let storage = Storage::new(MemoryDagStore::shared());
        let gen = genesis(&storage).await.unwrap();
        let processed = process(&gen, &storage, &StateRunner).await.unwrap();
        let genesis_hash = save(&processed, &storage, &TreeSerializer).await.unwrap();

        let mut draft = new_block(&storage, &genesis_hash, Vec::new()).await.unwrap();
        draft.transactions.push(Transaction::owned(
            Invocation::new("set", vec!["k".into(), "v".into()]),
            vec![0x01],
        ));
        let minted = process(&draft, &storage, &StateRunner).await.unwrap();
        save(&minted, &storage, &TreeSerializer).await.unwrap();
        (storage, processed, minted)
    }

    #[tokio::test]
    async fn accepts_a_faithful_candidate() {
        let (storage, genesis_block, minted) = minted_chain().await;
        let verified = verify_candidate(
            &storage,
            &TreeSerializer,
            &StateRunner,
            &genesis_block,
            minted.clone(),
        )
        .await
        .unwrap();
        assert_eq!(verified, minted);
    }

    #[tokio::test]
    async fn rejects_a_stale_candidate() {
        let (storage, genesis_block, minted) = minted_chain().await;
        let err = verify_candidate(
            &storage,
            &TreeSerializer,
            &StateRunner,
            &minted,
            genesis_block,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ChainError::ChainMismatch { field } if field == "block_number"
        ));
    }

    #[tokio::test]
    async fn rejects_an_altered_final_state() {
        let (storage, genesis_block, mut minted) = minted_chain().await;
        minted.final_storage = genesis_block.final_storage.clone();
        let err = verify_candidate(
            &storage,
            &TreeSerializer,
            &StateRunner,
            &genesis_block,
            minted,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ChainError::ChainMismatch { field } if field == "final_storage"
        ));
    }

    #[tokio::test]
    async fn rejects_equal_height_divergence() {
        let (storage, genesis_block, _) = minted_chain().await;
        let mut divergent = genesis_block.clone();
        divergent.transactions.push(Transaction::owned(
            Invocation::new("set", vec!["x".into(), "y".into()]),
            vec![0x02],
        ));
        let err = verify_candidate(
            &storage,
            &TreeSerializer,
            &StateRunner,
            &genesis_block,
            divergent,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ChainError::ChainMismatch { field } if field == "transactions"
        ));
    }
}
