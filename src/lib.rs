//! Core crate wiring together the Daisy side-chain runtime.
//!
//! Persistent state lives in a content-addressable MerkleDAG reached through
//! the adapters in `dag`; `storage` overlays path addressing on top of it
//! and `prover` verifies inclusion proofs offline. Blocks move through the
//! `block` pipeline, `chain` re-executes remote candidates, and the
//! `tracker` actor owns the current block in leader or follower mode with
//! the periodic work in `loops`. The HTTP façade lives in `api`.
//!
//! Applications typically depend on [`config::NodeConfig`] to bootstrap a
//! node, [`tracker::TrackerHandle`] to operate it, and the supporting
//! modules for storage, proofs, and execution.

pub mod api;
pub mod block;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod dag;
pub mod errors;
pub mod loops;
pub mod prover;
pub mod queue;
pub mod runner;
pub mod serializer;
pub mod storage;
pub mod tracker;
pub mod types;
pub mod wire;
