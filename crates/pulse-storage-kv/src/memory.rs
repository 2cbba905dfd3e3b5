//! In-process key-value store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_core::StorageError;
use serde_json::Value;

use crate::client::{KvClient, KvOp, Transaction, TxOutcome};

#[derive(Debug, Default)]
struct State {
    docs: HashMap<String, String>,
    indexes: HashMap<String, HashMap<String, f64>>,
}

/// [`KvClient`] over process memory.
///
/// Transactions check and apply under a single lock, which gives the same
/// all-or-nothing behavior a `MULTI/EXEC` with watched keys gives.
#[derive(Debug, Default)]
pub struct MemoryKv {
    state: Mutex<State>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.state.lock().docs.contains_key(key)
    }

    /// Members of `index` with their scores, ascending.
    pub fn index_members(&self, index: &str) -> Vec<(String, f64)> {
        let state = self.state.lock();
        let mut members: Vec<(String, f64)> = state
            .indexes
            .get(index)
            .map(|set| set.iter().map(|(m, s)| (m.clone(), *s)).collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        members
    }

    /// Store a raw document, bypassing transactions.
    pub fn put_raw(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state.lock().docs.insert(key.into(), value.into());
    }
}

impl State {
    fn apply(&mut self, op: KvOp) -> Option<String> {
        match op {
            KvOp::JsonSet { key, value } => {
                self.docs.insert(key, value);
                None
            }
            KvOp::JsonSetField { key, field, value } => {
                let Some(doc) = self.docs.get_mut(&key) else {
                    return None;
                };
                let parsed = serde_json::from_str::<Value>(doc)
                    .and_then(|d| serde_json::from_str::<Value>(&value).map(|v| (d, v)));
                if let Ok((Value::Object(mut fields), value)) = parsed {
                    fields.insert(field, value);
                    *doc = Value::Object(fields).to_string();
                }
                None
            }
            KvOp::JsonGet { key } => self.docs.get(&key).cloned(),
            KvOp::Delete { key } => {
                self.docs.remove(&key);
                None
            }
            KvOp::IndexAdd { index, member, score } => {
                self.indexes.entry(index).or_default().insert(member, score);
                None
            }
            KvOp::IndexRemove { index, member } => {
                if let Some(set) = self.indexes.get_mut(&index) {
                    set.remove(&member);
                    if set.is_empty() {
                        self.indexes.remove(&index);
                    }
                }
                None
            }
        }
    }
}

#[async_trait]
impl KvClient for MemoryKv {
    async fn json_get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.state.lock().docs.get(key).cloned())
    }

    async fn index_range_by_score(&self, index: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .index_members(index)
            .into_iter()
            .map(|(member, _)| member)
            .collect())
    }

    async fn exec(&self, tx: Transaction) -> Result<TxOutcome, StorageError> {
        let mut state = self.state.lock();
        let satisfied = tx
            .conditions
            .iter()
            .all(|condition| condition.holds(state.docs.contains_key(condition.key())));
        if !satisfied {
            return Ok(TxOutcome::Aborted);
        }

        let replies = tx.ops.into_iter().map(|op| state.apply(op)).collect();
        Ok(TxOutcome::Committed(replies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Precondition;

    fn set(key: &str, value: &str) -> KvOp {
        KvOp::JsonSet {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    #[tokio::test]
    async fn test_exec_applies_all_ops() {
        let kv = MemoryKv::new();
        let tx = Transaction::new()
            .require(Precondition::NotExists("a".into()))
            .op(set("a", "1"))
            .op(KvOp::IndexAdd {
                index: "idx".into(),
                member: "a".into(),
                score: 2.0,
            })
            .op(KvOp::JsonGet { key: "a".into() });

        let outcome = kv.exec(tx).await.unwrap();
        assert_eq!(
            outcome,
            TxOutcome::Committed(vec![None, None, Some("1".to_string())])
        );
        assert_eq!(kv.index_members("idx"), vec![("a".to_string(), 2.0)]);
    }

    #[tokio::test]
    async fn test_failed_precondition_applies_nothing() {
        let kv = MemoryKv::new();
        let tx = Transaction::new()
            .require(Precondition::Exists("a".into()))
            .op(set("a", "1"))
            .op(KvOp::IndexAdd {
                index: "idx".into(),
                member: "a".into(),
                score: 1.0,
            });

        assert_eq!(kv.exec(tx).await.unwrap(), TxOutcome::Aborted);
        assert!(!kv.contains_key("a"));
        assert!(kv.index_members("idx").is_empty());
    }

    #[tokio::test]
    async fn test_set_field_keeps_other_fields() {
        let kv = MemoryKv::new();
        kv.put_raw("a", r#"{"status":"Success","seen":1}"#);
        let tx = Transaction::new()
            .require(Precondition::Exists("a".into()))
            .op(KvOp::JsonSetField {
                key: "a".into(),
                field: "seen".into(),
                value: "2".into(),
            })
            .op(KvOp::JsonGet { key: "a".into() });

        let TxOutcome::Committed(replies) = kv.exec(tx).await.unwrap() else {
            panic!("transaction aborted");
        };
        let doc: Value = serde_json::from_str(replies[1].as_deref().unwrap()).unwrap();
        assert_eq!(doc["status"], "Success");
        assert_eq!(doc["seen"], 2);
    }

    #[tokio::test]
    async fn test_range_orders_by_score() {
        let kv = MemoryKv::new();
        let mut tx = Transaction::new();
        for (member, score) in [("late", 30.0), ("early", 10.0), ("middle", 20.0)] {
            tx = tx.op(KvOp::IndexAdd {
                index: "idx".into(),
                member: member.into(),
                score,
            });
        }
        kv.exec(tx).await.unwrap();

        let members = kv.index_range_by_score("idx").await.unwrap();
        assert_eq!(members, ["early", "middle", "late"]);
        assert!(kv.index_range_by_score("missing").await.unwrap().is_empty());
    }
}
