//! Redis transport. Requires the RedisJSON module on the server.

use ::redis::aio::MultiplexedConnection;
use ::redis::{Client, RedisError, Value, cmd, from_redis_value};
use async_trait::async_trait;
use pulse_core::StorageError;
use tracing::{debug, trace};

use crate::client::{KvClient, KvOp, Transaction, TxOutcome};

/// [`KvClient`] backed by a Redis server.
///
/// Reads share one multiplexed connection. Each transaction opens its own
/// connection, since `WATCH` state is per connection.
pub struct RedisKv {
    client: Client,
    shared: MultiplexedConnection,
}

impl RedisKv {
    /// Connect to `url`, e.g. `redis://127.0.0.1:6379`.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let client = Client::open(url).map_err(backend)?;
        let shared = client
            .get_multiplexed_async_connection()
            .await
            .map_err(backend)?;
        debug!("Connected to Redis at {}", url);
        Ok(Self { client, shared })
    }
}

fn backend(err: RedisError) -> StorageError {
    StorageError::Backend(err.to_string())
}

#[async_trait]
impl KvClient for RedisKv {
    async fn json_get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut con = self.shared.clone();
        let doc: Option<String> = cmd("JSON.GET")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(backend)?;
        Ok(doc)
    }

    async fn index_range_by_score(&self, index: &str) -> Result<Vec<String>, StorageError> {
        let mut con = self.shared.clone();
        let members: Vec<String> = cmd("ZRANGE")
            .arg(index)
            .arg(0)
            .arg(-1)
            .query_async(&mut con)
            .await
            .map_err(backend)?;
        Ok(members)
    }

    async fn exec(&self, tx: Transaction) -> Result<TxOutcome, StorageError> {
        let mut con = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(backend)?;

        if !tx.conditions.is_empty() {
            let keys: Vec<&str> = tx.conditions.iter().map(|c| c.key()).collect();
            let _: () = cmd("WATCH")
                .arg(&keys)
                .query_async(&mut con)
                .await
                .map_err(backend)?;

            for condition in &tx.conditions {
                let present: bool = cmd("EXISTS")
                    .arg(condition.key())
                    .query_async(&mut con)
                    .await
                    .map_err(backend)?;
                if !condition.holds(present) {
                    let _: () = cmd("UNWATCH")
                        .query_async(&mut con)
                        .await
                        .map_err(backend)?;
                    trace!("Transaction precondition failed on {}", condition.key());
                    return Ok(TxOutcome::Aborted);
                }
            }
        }

        let mut pipeline = ::redis::pipe();
        pipeline.atomic();
        for op in &tx.ops {
            match op {
                KvOp::JsonSet { key, value } => pipeline.cmd("JSON.SET").arg(key).arg("$").arg(value),
                KvOp::JsonSetField { key, field, value } => pipeline
                    .cmd("JSON.SET")
                    .arg(key)
                    .arg(format!("$.{field}"))
                    .arg(value),
                KvOp::JsonGet { key } => pipeline.cmd("JSON.GET").arg(key),
                KvOp::Delete { key } => pipeline.cmd("DEL").arg(key),
                KvOp::IndexAdd {
                    index,
                    member,
                    score,
                } => pipeline.cmd("ZADD").arg(index).arg(*score).arg(member),
                KvOp::IndexRemove { index, member } => {
                    pipeline.cmd("ZREM").arg(index).arg(member)
                }
            };
        }

        // EXEC replies nil when a watched key changed.
        let replies: Option<Vec<Value>> = pipeline.query_async(&mut con).await.map_err(backend)?;
        let Some(replies) = replies else {
            trace!("Transaction aborted by a concurrent write");
            return Ok(TxOutcome::Aborted);
        };

        let replies = tx
            .ops
            .iter()
            .zip(replies.iter())
            .map(|(op, reply)| match op {
                KvOp::JsonGet { .. } => from_redis_value::<Option<String>>(reply).map_err(backend),
                _ => Ok(None),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TxOutcome::Committed(replies))
    }
}
