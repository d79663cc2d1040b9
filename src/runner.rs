//! Execution capabilities plugged into the block pipeline.
//!
//! `Runner` executes one transaction against an immutable starting root and
//! reports the resulting root; `Reader` serves read-only queries. Both are
//! chosen at startup from configuration, so the chain core never hard-codes
//! a virtual machine. The built-in `state` pair interprets a small
//! key-value instruction set directly over storage, which is enough for
//! local networks and for exercising the pipeline end to end.

use std::sync::Arc;

use async_trait::async_trait;

use crate::crypto;
use crate::errors::{ChainError, ChainResult};
use crate::queue;
use crate::storage::Storage;
use crate::types::{Hash, Invocation, Receipt, Transaction, TransactionAuth};

/// Outcome of running a single invocation.
pub struct RunOutcome {
    pub status: u32,
    pub final_storage: Hash,
    pub logs: Vec<String>,
    pub debug: Option<String>,
}

impl RunOutcome {
    pub fn ok(final_storage: Hash, logs: Vec<String>) -> Self {
        Self {
            status: 0,
            final_storage,
            logs,
            debug: None,
        }
    }

    pub fn failed(final_storage: Hash, debug: String) -> Self {
        Self {
            status: 1,
            final_storage,
            logs: Vec::new(),
            debug: Some(debug),
        }
    }
}

#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(
        &self,
        invocation: &Invocation,
        storage: &Storage,
        initial_storage: &str,
        block_number: u64,
        caller: &[u8],
    ) -> ChainResult<RunOutcome>;
}

#[async_trait]
pub trait Reader: Send + Sync {
    async fn read(
        &self,
        invocation: &Invocation,
        storage: &Storage,
        root: &str,
    ) -> ChainResult<String>;
}

pub fn runner_from_name(name: &str) -> ChainResult<Arc<dyn Runner>> {
    match name {
        "state" => Ok(Arc::new(StateRunner)),
        other => Err(ChainError::Config(format!("unknown runner {other}"))),
    }
}

pub fn reader_from_name(name: &str) -> ChainResult<Arc<dyn Reader>> {
    match name {
        "state" => Ok(Arc::new(StateReader)),
        other => Err(ChainError::Config(format!("unknown reader {other}"))),
    }
}

/// Authorise a transaction, run it, and convert the outcome into a receipt.
///
/// A signed transaction must verify over the invocation's deterministic
/// encoding before it runs; an owner-authorised one was queued by the system
/// and is trusted as-is. A verification failure aborts the caller's whole
/// processing run, which keeps re-execution deterministic for followers.
pub async fn execute_transaction(
    runner: &dyn Runner,
    storage: &Storage,
    transaction: &Transaction,
    initial_storage: &str,
    block_number: u64,
) -> ChainResult<Receipt> {
    let caller = match &transaction.auth {
        TransactionAuth::Signed {
            signature,
            public_key,
        } => crypto::verify(
            &transaction.invocation.signing_bytes(),
            signature,
            public_key,
        )?,
        TransactionAuth::Owned { owner } => owner.clone(),
    };
    let outcome = runner
        .run(
            &transaction.invocation,
            storage,
            initial_storage,
            block_number,
            &caller,
        )
        .await?;
    Ok(Receipt {
        status: outcome.status,
        initial_storage: initial_storage.to_string(),
        final_storage: outcome.final_storage,
        logs: outcome.logs,
        debug: outcome.debug,
    })
}

/// Key-value instruction set over the state tree: `set <path> <value>`,
/// `del <path>`, `defer <block_number> <function> <args…>`.
pub struct StateRunner;

#[async_trait]
impl Runner for StateRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        storage: &Storage,
        initial_storage: &str,
        _block_number: u64,
        caller: &[u8],
    ) -> ChainResult<RunOutcome> {
        match invocation.function.as_str() {
            "set" => {
                let [path, value] = two_args(invocation)?;
                let root = storage.put(initial_storage, path, value.as_bytes()).await?;
                Ok(RunOutcome::ok(root, vec![format!("set {path}")]))
            }
            "del" => {
                let [path] = one_arg(invocation)?;
                match storage.remove(initial_storage, path).await {
                    Ok(root) => Ok(RunOutcome::ok(root, vec![format!("del {path}")])),
                    // an absent path fails the transaction, not the block
                    Err(ChainError::NotFound) => Ok(RunOutcome::failed(
                        initial_storage.to_string(),
                        format!("no value at {path}"),
                    )),
                    Err(err) => Err(err),
                }
            }
            "defer" => {
                let (at, rest) = invocation
                    .args
                    .split_first()
                    .ok_or_else(|| bad_args(invocation))?;
                let (function, args) = rest.split_first().ok_or_else(|| bad_args(invocation))?;
                let at: u64 = at.parse().map_err(|_| bad_args(invocation))?;
                let deferred = Invocation::new(function.clone(), args.to_vec());
                let root = queue::enqueue(storage, initial_storage, at, caller, deferred).await?;
                Ok(RunOutcome::ok(
                    root,
                    vec![format!("deferred {function} to block {at}")],
                ))
            }
            other => Ok(RunOutcome::failed(
                initial_storage.to_string(),
                format!("unknown function {other}"),
            )),
        }
    }
}

/// Read-only companion to [`StateRunner`]: `get <path>`, `ls <path>`.
pub struct StateReader;

#[async_trait]
impl Reader for StateReader {
    async fn read(
        &self,
        invocation: &Invocation,
        storage: &Storage,
        root: &str,
    ) -> ChainResult<String> {
        match invocation.function.as_str() {
            "get" => {
                let [path] = one_arg(invocation)?;
                let bytes = storage.get(root, path).await?;
                String::from_utf8(bytes)
                    .map_err(|err| ChainError::Protocol(format!("non-utf8 value: {err}")))
            }
            "ls" => {
                let path = invocation.args.first().map(String::as_str).unwrap_or("");
                let children = storage.ls(root, path).await?;
                Ok(children
                    .into_iter()
                    .map(|(name, _)| name)
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            other => Err(ChainError::Transaction(format!(
                "unknown read function {other}"
            ))),
        }
    }
}

fn one_arg(invocation: &Invocation) -> ChainResult<[&str; 1]> {
    match invocation.args.as_slice() {
        [a] => Ok([a.as_str()]),
        _ => Err(bad_args(invocation)),
    }
}

fn two_args(invocation: &Invocation) -> ChainResult<[&str; 2]> {
    match invocation.args.as_slice() {
        [a, b] => Ok([a.as_str(), b.as_str()]),
        _ => Err(bad_args(invocation)),
    }
}

fn bad_args(invocation: &Invocation) -> ChainError {
    ChainError::Transaction(format!(
        "malformed arguments for {}",
        invocation.function
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_keypair;
    use crate::dag::MemoryDagStore;

    fn storage() -> Storage {
        Storage::new(MemoryDagStore::shared())
    }

    #[tokio::test]
    async fn set_writes_through_to_storage() {
        let storage = storage();
        let root = storage.new_root().await.unwrap();
        let outcome = StateRunner
            .run(
                &Invocation::new("set", vec!["players/5/name".into(), "thomas".into()]),
                &storage,
                &root,
                1,
                &[0x01],
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, 0);
        assert_eq!(
            storage
                .get(&outcome.final_storage, "players/5/name")
                .await
                .unwrap(),
            b"thomas"
        );
    }

    #[tokio::test]
    async fn del_unlinks_a_written_value() {
        let storage = storage();
        let root = storage.new_root().await.unwrap();
        let root = storage.put(&root, "players/5/name", b"thomas").await.unwrap();
        let outcome = StateRunner
            .run(
                &Invocation::new("del", vec!["players/5/name".into()]),
                &storage,
                &root,
                1,
                &[0x01],
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, 0);
        assert_eq!(outcome.logs, vec!["del players/5/name".to_string()]);
        assert!(matches!(
            storage.get(&outcome.final_storage, "players/5/name").await,
            Err(ChainError::NotFound)
        ));
    }

    #[tokio::test]
    async fn del_of_an_absent_path_fails_the_transaction() {
        let storage = storage();
        let root = storage.new_root().await.unwrap();
        let outcome = StateRunner
            .run(
                &Invocation::new("del", vec!["ghost".into()]),
                &storage,
                &root,
                1,
                &[0x01],
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, 1);
        assert_eq!(outcome.final_storage, root);
        assert!(outcome.debug.unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn unknown_function_fails_without_touching_state() {
        let storage = storage();
        let root = storage.new_root().await.unwrap();
        let outcome = StateRunner
            .run(
                &Invocation::new("conjure", vec![]),
                &storage,
                &root,
                1,
                &[0x01],
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, 1);
        assert_eq!(outcome.final_storage, root);
        assert!(outcome.debug.unwrap().contains("conjure"));
    }

    #[tokio::test]
    async fn defer_queues_under_the_callers_ownership() {
        let storage = storage();
        let root = storage.new_root().await.unwrap();
        let outcome = StateRunner
            .run(
                &Invocation::new("defer", vec!["5".into(), "spawn".into(), "10".into()]),
                &storage,
                &root,
                1,
                &[0xaa],
            )
            .await
            .unwrap();
        let queued = queue::drain_for_block(&storage, &outcome.final_storage, 5)
            .await
            .unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].invocation, Invocation::new("spawn", vec!["10".into()]));
        assert_eq!(
            queued[0].auth,
            TransactionAuth::Owned { owner: vec![0xaa] }
        );
    }

    #[tokio::test]
    async fn execution_rejects_a_tampered_signature() {
        let storage = storage();
        let root = storage.new_root().await.unwrap();
        let keypair = generate_keypair();
        let mut transaction = Transaction::signed(
            Invocation::new("set", vec!["k".into(), "v".into()]),
            &keypair,
        );
        if let TransactionAuth::Signed { signature, .. } = &mut transaction.auth {
            signature[0] ^= 0x01;
        }
        let err = execute_transaction(&StateRunner, &storage, &transaction, &root, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::InvalidSignature));
    }

    #[tokio::test]
    async fn reader_serves_get_and_ls() {
        let storage = storage();
        let root = storage.new_root().await.unwrap();
        let root = storage.put(&root, "players/5/name", b"thomas").await.unwrap();
        let value = StateReader
            .read(
                &Invocation::new("get", vec!["players/5/name".into()]),
                &storage,
                &root,
            )
            .await
            .unwrap();
        assert_eq!(value, "thomas");
        let listing = StateReader
            .read(&Invocation::new("ls", vec!["players".into()]), &storage, &root)
            .await
            .unwrap();
        assert_eq!(listing, "5");
    }
}
