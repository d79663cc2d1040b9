//! Standalone verification of Merkle inclusion proofs.
//!
//! A proof is the ordered list of raw protobuf node bytes from the leaf up to
//! the root, as produced by [`crate::storage::Storage::proof`]. Verification
//! needs only sha256 and protobuf decoding; it performs no I/O, so a bridge
//! or external client can check a value against a published root offline.

use crate::dag::multihash_b58;
use crate::errors::{ChainError, ChainResult};
use crate::wire;

/// Check that `proof` ties `expected_value` at `path` to `root`.
///
/// The leaf's data must equal the expected value; each following node must
/// link to the previous one under the path segment, innermost first; and the
/// last node must hash to `root` itself.
pub fn verify(root: &str, path: &str, expected_value: &[u8], proof: &[Vec<u8>]) -> ChainResult<()> {
    let (leaf_bytes, upper) = proof.split_first().ok_or(ChainError::InvalidDataProof)?;
    let leaf = wire::decode_node(leaf_bytes)?;
    if leaf.data != expected_value {
        return Err(ChainError::InvalidDataProof);
    }

    let mut segments: Vec<&str> = path
        .trim_start_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();
    segments.reverse();
    if segments.len() != upper.len() {
        return Err(ChainError::InvalidProof {
            segment: segments
                .get(upper.len())
                .copied()
                .unwrap_or("<root>")
                .to_string(),
        });
    }

    let mut previous = leaf_bytes;
    for (segment, node_bytes) in segments.into_iter().zip(upper) {
        let expected_hash = multihash_b58(previous);
        let node = wire::decode_node(node_bytes)?;
        let found = node
            .links
            .iter()
            .any(|link| link.name == segment && link.hash == expected_hash);
        if !found {
            return Err(ChainError::InvalidProof {
                segment: segment.to_string(),
            });
        }
        previous = node_bytes;
    }

    if multihash_b58(previous) != root {
        return Err(ChainError::InvalidProof {
            segment: "<root>".to_string(),
        });
    }
    Ok(())
}
