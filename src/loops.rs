//! Periodic leader and follower work, and the publisher actor they share.
//!
//! The leader mints on a timer and pushes each new block hash to the mutable
//! name; the follower resolves the name on its own timer and offers whatever
//! it finds to the tracker. Failures are logged and retried on the next
//! tick; the loops never die on a transport error.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::block;
use crate::dag::NameStore;
use crate::errors::{ChainError, ChainResult};
use crate::serializer::BlockSerializer;
use crate::storage::Storage;
use crate::tracker::TrackerHandle;
use crate::types::Hash;

const MAILBOX_SIZE: usize = 16;
const PUBLISH_CLIENT_TIMEOUT: Duration = Duration::from_secs(120);

enum NameRequest {
    Publish(Hash, oneshot::Sender<ChainResult<()>>),
    Resolve(oneshot::Sender<ChainResult<Hash>>),
}

/// Single-writer guard around the mutable-name service. Publishes are
/// strictly ordered with respect to their corresponding mints because both
/// flow through one actor mailbox each.
pub struct Publisher {
    names: Arc<dyn NameStore>,
    key: String,
    mailbox: mpsc::Receiver<NameRequest>,
}

#[derive(Clone)]
pub struct PublisherHandle {
    sender: mpsc::Sender<NameRequest>,
}

impl Publisher {
    pub fn spawn(names: Arc<dyn NameStore>, key: String) -> PublisherHandle {
        let (sender, mailbox) = mpsc::channel(MAILBOX_SIZE);
        let publisher = Publisher {
            names,
            key,
            mailbox,
        };
        tokio::spawn(publisher.run());
        PublisherHandle { sender }
    }

    async fn run(mut self) {
        while let Some(request) = self.mailbox.recv().await {
            match request {
                NameRequest::Publish(hash, reply) => {
                    let _ = reply.send(self.names.publish(&hash, &self.key).await);
                }
                NameRequest::Resolve(reply) => {
                    let _ = reply.send(self.names.resolve(&self.key, true).await);
                }
            }
        }
    }
}

impl PublisherHandle {
    pub async fn publish(&self, hash: Hash) -> ChainResult<()> {
        let (reply, receive) = oneshot::channel();
        self.sender
            .send(NameRequest::Publish(hash, reply))
            .await
            .map_err(|_| ChainError::Transport("publisher is gone".into()))?;
        match time::timeout(PUBLISH_CLIENT_TIMEOUT, receive).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChainError::Transport("publisher dropped the request".into())),
            Err(_) => Err(ChainError::Timeout),
        }
    }

    pub async fn resolve(&self) -> ChainResult<Hash> {
        let (reply, receive) = oneshot::channel();
        self.sender
            .send(NameRequest::Resolve(reply))
            .await
            .map_err(|_| ChainError::Transport("publisher is gone".into()))?;
        receive
            .await
            .map_err(|_| ChainError::Transport("publisher dropped the request".into()))?
    }
}

/// Mint then publish, forever. One failed tick never stops the next.
pub fn spawn_leader_loop(
    tracker: TrackerHandle,
    publisher: PublisherHandle,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let hash = match tracker.mint_current_block().await {
                Ok(hash) => hash,
                Err(err) => {
                    warn!(?err, "minting failed");
                    continue;
                }
            };
            match publisher.publish(hash.clone()).await {
                Ok(()) => info!(%hash, "published block"),
                Err(err) => warn!(?err, %hash, "publishing failed"),
            }
        }
    })
}

/// Resolve, load, and offer to the tracker, forever. An unset name is the
/// quiet no-publisher-yet case; everything else is logged and retried.
pub fn spawn_follower_loop(
    tracker: TrackerHandle,
    publisher: PublisherHandle,
    storage: Storage,
    serializer: Arc<dyn BlockSerializer>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let hash = match publisher.resolve().await {
                Ok(hash) => hash,
                Err(ChainError::NotFound) => {
                    debug!("mutable name not published yet");
                    continue;
                }
                Err(err) => {
                    warn!(?err, "resolving failed");
                    continue;
                }
            };
            let candidate = match block::load(&storage, &hash, serializer.as_ref()).await {
                Ok(candidate) => candidate,
                Err(err) => {
                    warn!(?err, %hash, "loading candidate failed");
                    continue;
                }
            };
            if let Err(err) = tracker.adopt_block(candidate).await {
                warn!(?err, %hash, "candidate rejected");
            }
        }
    })
}
