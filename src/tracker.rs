//! Single-writer holder of the current block.
//!
//! The tracker is an actor: it owns the open draft (leader) or the accepted
//! head (follower) and serves messages one at a time over a bounded channel,
//! so transaction ordering, minting, and adoption are serialized by
//! construction. Handles are cheap clones that wrap every call in the
//! default client timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::block;
use crate::chain;
use crate::errors::{ChainError, ChainResult};
use crate::runner::{Reader, Runner};
use crate::serializer::BlockSerializer;
use crate::storage::Storage;
use crate::types::{Block, Hash, Invocation, Transaction};

const MAILBOX_SIZE: usize = 64;
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Leader,
    Follower,
}

impl Mode {
    fn name(self) -> &'static str {
        match self {
            Mode::Leader => "leader",
            Mode::Follower => "follower",
        }
    }
}

enum Request {
    GetBlock(oneshot::Sender<Block>),
    AddTransaction(Transaction, oneshot::Sender<ChainResult<()>>),
    Read(Invocation, oneshot::Sender<ChainResult<String>>),
    ReadAt(Hash, Invocation, oneshot::Sender<ChainResult<String>>),
    Mint(oneshot::Sender<ChainResult<Hash>>),
    Adopt(Block, oneshot::Sender<ChainResult<()>>),
}

pub struct Tracker {
    storage: Storage,
    block: Block,
    runner: Arc<dyn Runner>,
    reader: Arc<dyn Reader>,
    serializer: Arc<dyn BlockSerializer>,
    mode: Mode,
    mailbox: mpsc::Receiver<Request>,
}

#[derive(Clone)]
pub struct TrackerHandle {
    sender: mpsc::Sender<Request>,
}

impl Tracker {
    pub fn spawn(
        storage: Storage,
        block: Block,
        runner: Arc<dyn Runner>,
        reader: Arc<dyn Reader>,
        serializer: Arc<dyn BlockSerializer>,
        mode: Mode,
    ) -> TrackerHandle {
        let (sender, mailbox) = mpsc::channel(MAILBOX_SIZE);
        let tracker = Tracker {
            storage,
            block,
            runner,
            reader,
            serializer,
            mode,
            mailbox,
        };
        tokio::spawn(tracker.run());
        TrackerHandle { sender }
    }

    async fn run(mut self) {
        info!(mode = self.mode.name(), "tracker started");
        while let Some(request) = self.mailbox.recv().await {
            match request {
                Request::GetBlock(reply) => {
                    let _ = reply.send(self.block.clone());
                }
                Request::AddTransaction(transaction, reply) => {
                    let _ = reply.send(self.add_transaction(transaction));
                }
                Request::Read(invocation, reply) => {
                    let root = self.read_root().to_string();
                    let result = self.reader.read(&invocation, &self.storage, &root).await;
                    let _ = reply.send(result);
                }
                Request::ReadAt(block_hash, invocation, reply) => {
                    let _ = reply.send(self.read_at(&block_hash, &invocation).await);
                }
                Request::Mint(reply) => {
                    let _ = reply.send(self.mint().await);
                }
                Request::Adopt(candidate, reply) => {
                    let _ = reply.send(self.adopt(candidate).await);
                }
            }
        }
    }

    fn require_mode(&self, required: Mode) -> ChainResult<()> {
        if self.mode == required {
            Ok(())
        } else {
            Err(ChainError::Mode(self.mode.name().to_string()))
        }
    }

    fn add_transaction(&mut self, transaction: Transaction) -> ChainResult<()> {
        self.require_mode(Mode::Leader)?;
        self.block.transactions.push(transaction);
        Ok(())
    }

    fn read_root(&self) -> &str {
        if self.block.final_storage.is_empty() {
            &self.block.initial_storage
        } else {
            &self.block.final_storage
        }
    }

    async fn read_at(&self, block_hash: &str, invocation: &Invocation) -> ChainResult<String> {
        let root = block::read_final_storage(&self.storage, block_hash).await?;
        self.reader.read(invocation, &self.storage, &root).await
    }

    /// Process and save the open block; on success the draft advances to the
    /// next block number. On failure the draft is left untouched.
    async fn mint(&mut self) -> ChainResult<Hash> {
        self.require_mode(Mode::Leader)?;
        let processed = block::process(&self.block, &self.storage, self.runner.as_ref()).await?;
        let hash = block::save(&processed, &self.storage, self.serializer.as_ref()).await?;
        let next = block::new_block(&self.storage, &hash, Vec::new()).await?;
        info!(
            minted = processed.block_number,
            open = next.block_number,
            "minted block"
        );
        self.block = next;
        Ok(hash)
    }

    async fn adopt(&mut self, candidate: Block) -> ChainResult<()> {
        self.require_mode(Mode::Follower)?;
        let adopted = chain::verify_candidate(
            &self.storage,
            self.serializer.as_ref(),
            self.runner.as_ref(),
            &self.block,
            candidate,
        )
        .await?;
        if adopted.block_number > self.block.block_number {
            info!(block_number = adopted.block_number, "adopted block");
            self.block = adopted;
        }
        Ok(())
    }
}

impl TrackerHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> ChainResult<T> {
        let (reply, receive) = oneshot::channel();
        self.sender
            .send(build(reply))
            .await
            .map_err(|_| ChainError::Transport("tracker is gone".into()))?;
        match timeout(CLIENT_TIMEOUT, receive).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ChainError::Transport("tracker dropped the request".into())),
            Err(_) => {
                warn!("tracker request timed out");
                Err(ChainError::Timeout)
            }
        }
    }

    pub async fn get_block(&self) -> ChainResult<Block> {
        self.request(Request::GetBlock).await
    }

    pub async fn add_transaction(&self, transaction: Transaction) -> ChainResult<()> {
        self.request(|reply| Request::AddTransaction(transaction, reply))
            .await?
    }

    pub async fn read(&self, invocation: Invocation) -> ChainResult<String> {
        self.request(|reply| Request::Read(invocation, reply)).await?
    }

    pub async fn read_at(&self, block_hash: Hash, invocation: Invocation) -> ChainResult<String> {
        self.request(|reply| Request::ReadAt(block_hash, invocation, reply))
            .await?
    }

    pub async fn mint_current_block(&self) -> ChainResult<Hash> {
        self.request(Request::Mint).await?
    }

    pub async fn adopt_block(&self, candidate: Block) -> ChainResult<()> {
        self.request(|reply| Request::Adopt(candidate, reply)).await?
    }
}
