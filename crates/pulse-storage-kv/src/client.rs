//! Transport contract between the storage backend and a key-value store.

use std::sync::Arc;

use async_trait::async_trait;
use pulse_core::StorageError;

/// Condition checked before a transaction's operations run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    Exists(String),
    NotExists(String),
}

impl Precondition {
    pub fn key(&self) -> &str {
        match self {
            Precondition::Exists(key) | Precondition::NotExists(key) => key,
        }
    }

    /// Whether the condition holds given the key's presence.
    pub fn holds(&self, present: bool) -> bool {
        match self {
            Precondition::Exists(_) => present,
            Precondition::NotExists(_) => !present,
        }
    }
}

/// One operation inside a [`Transaction`].
#[derive(Debug, Clone, PartialEq)]
pub enum KvOp {
    /// Store a JSON document at the root path.
    JsonSet { key: String, value: String },
    /// Set one top-level field of an existing document, leaving the rest
    /// untouched. `value` is JSON.
    JsonSetField { key: String, field: String, value: String },
    /// Read a JSON document. Its reply is the document, if any.
    JsonGet { key: String },
    Delete { key: String },
    /// Add or rescore a sorted set member.
    IndexAdd { index: String, member: String, score: f64 },
    IndexRemove { index: String, member: String },
}

/// Operations applied atomically, only if every precondition holds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    pub conditions: Vec<Precondition>,
    pub ops: Vec<KvOp>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, condition: Precondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn op(mut self, op: KvOp) -> Self {
        self.ops.push(op);
        self
    }
}

/// Result of [`KvClient::exec`].
#[derive(Debug, Clone, PartialEq)]
pub enum TxOutcome {
    /// Applied. One reply per op; only `JsonGet` replies carry a value.
    Committed(Vec<Option<String>>),
    /// A precondition failed or a watched key changed. Nothing was applied.
    Aborted,
}

/// Async access to a key-value store.
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Read a JSON document.
    async fn json_get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Members of a sorted set in ascending score order.
    async fn index_range_by_score(&self, index: &str) -> Result<Vec<String>, StorageError>;

    async fn exec(&self, tx: Transaction) -> Result<TxOutcome, StorageError>;
}

#[async_trait]
impl<C: KvClient + ?Sized> KvClient for Arc<C> {
    async fn json_get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).json_get(key).await
    }

    async fn index_range_by_score(&self, index: &str) -> Result<Vec<String>, StorageError> {
        (**self).index_range_by_score(index).await
    }

    async fn exec(&self, tx: Transaction) -> Result<TxOutcome, StorageError> {
        (**self).exec(tx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_holds() {
        assert!(Precondition::Exists("a".into()).holds(true));
        assert!(!Precondition::Exists("a".into()).holds(false));
        assert!(Precondition::NotExists("a".into()).holds(false));
        assert!(!Precondition::NotExists("a".into()).holds(true));
    }

    #[test]
    fn test_transaction_builder() {
        let tx = Transaction::new()
            .require(Precondition::NotExists("job:1".into()))
            .op(KvOp::Delete { key: "job:1".into() });
        assert_eq!(tx.conditions.len(), 1);
        assert_eq!(tx.conditions[0].key(), "job:1");
        assert_eq!(tx.ops, vec![KvOp::Delete { key: "job:1".into() }]);
    }
}
