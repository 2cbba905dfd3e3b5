//! # Pulse Key-Value Storage
//!
//! Job storage for a shared key-value store with JSON documents and sorted
//! sets.
//!
//! Each job is a document under `job:<id>`; the sorted set `jobs:all` indexes
//! ids by timestamp. Document and index writes are submitted as one
//! conditional [`Transaction`] through a [`KvClient`]:
//!
//! - [`MemoryKv`]: in-process store, used for tests and single-node setups
//! - `RedisKv` (feature `redis`): RedisJSON over `WATCH`/`MULTI`/`EXEC`

mod client;
mod memory;
mod storage;

#[cfg(feature = "redis")]
mod redis;

pub use client::{KvClient, KvOp, Precondition, Transaction, TxOutcome};
pub use memory::MemoryKv;
pub use storage::{JOBS_INDEX_KEY, KvStorage, job_key};

#[cfg(feature = "redis")]
pub use crate::redis::RedisKv;
