use serde::{Deserialize, Serialize};

use crate::crypto::Keypair;
use crate::wire;

/// Printable multihash identifier of a MerkleDAG node. Compared as an opaque
/// string everywhere; only the DAG adapter knows how one is derived.
pub type Hash = String;

/// The pure intent portion of a transaction: a function name plus its
/// positional string arguments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub function: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(function: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            function: function.into(),
            args,
        }
    }

    /// Deterministic byte encoding used as the signing payload.
    pub fn signing_bytes(&self) -> Vec<u8> {
        wire::encode_invocation(self)
    }
}

/// How a transaction is authorised. A user-signed transaction carries a
/// signature over the invocation's signing bytes; a system-queued one carries
/// the raw owner bytes of whoever enqueued it and is trusted at execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionAuth {
    Signed {
        signature: Vec<u8>,
        public_key: Vec<u8>,
    },
    Owned {
        owner: Vec<u8>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub invocation: Invocation,
    pub auth: TransactionAuth,
}

impl Transaction {
    pub fn signed(invocation: Invocation, keypair: &Keypair) -> Self {
        let payload = invocation.signing_bytes();
        let (signature, public_key) = keypair.sign(&payload);
        Self {
            invocation,
            auth: TransactionAuth::Signed {
                signature,
                public_key,
            },
        }
    }

    pub fn owned(invocation: Invocation, owner: Vec<u8>) -> Self {
        Self {
            invocation,
            auth: TransactionAuth::Owned { owner },
        }
    }
}

/// Per-transaction execution result. Status 0 is success; anything else is a
/// failure produced by the runner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub status: u32,
    pub initial_storage: Hash,
    pub final_storage: Hash,
    pub logs: Vec<String>,
    pub debug: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub block_number: u64,
    pub parent_block_hash: Option<Hash>,
    pub initial_storage: Hash,
    pub final_storage: Hash,
    pub transactions: Vec<Transaction>,
    pub receipts: Vec<Receipt>,
}
