//! Transaction-type custom index activation (§4.7 L1 tick).
//!
//! The DAO/SQL backing for custom indexes is out of scope; this models
//! just the registry interface the L1 executor consults to reject
//! reserved/unknown `txn_type` strings and to resolve a transaction's
//! `custom_indexes` once its defining transaction type has activated.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::tx::SYSTEM_TXN_TYPE_PREFIX;

#[derive(Debug, thiserror::Error)]
pub enum TransactionTypeError {
    #[error("txn_type {0} uses the reserved -SYSTEM prefix")]
    ReservedPrefix(String),
    #[error("txn_type {0} is not registered")]
    Unknown(String),
}

/// A registered transaction type: which fields of the payload should be
/// extracted into the secondary index, and from which block onward.
#[derive(Clone, Debug)]
pub struct TransactionTypeDefinition {
    pub txn_type: String,
    pub custom_indexes: Vec<String>,
    pub active_since_block: u64,
}

/// Consulted by the L1 executor once per tick to validate a transaction's
/// declared `txn_type` and to resolve which custom indexes apply.
pub trait TransactionTypeRegistry: Send + Sync {
    /// Rejects user-submitted `-SYSTEM`-prefixed types and any type that
    /// was never registered.
    fn validate(&self, txn_type: &str) -> Result<(), TransactionTypeError>;

    /// Returns the custom index names active for `txn_type` at
    /// `current_block_id`, or an empty list if none are active yet.
    fn active_custom_indexes(&self, txn_type: &str, current_block_id: u64) -> Vec<String>;

    fn register(&self, definition: TransactionTypeDefinition);
}

#[derive(Default)]
pub struct InMemoryTransactionTypeRegistry {
    definitions: Mutex<HashMap<String, TransactionTypeDefinition>>,
}

impl TransactionTypeRegistry for InMemoryTransactionTypeRegistry {
    fn validate(&self, txn_type: &str) -> Result<(), TransactionTypeError> {
        if txn_type.starts_with(SYSTEM_TXN_TYPE_PREFIX) {
            return Err(TransactionTypeError::ReservedPrefix(txn_type.to_string()));
        }
        if txn_type.is_empty() {
            return Ok(());
        }
        if self.definitions.lock().expect("lock poisoned").contains_key(txn_type) {
            Ok(())
        } else {
            Err(TransactionTypeError::Unknown(txn_type.to_string()))
        }
    }

    fn active_custom_indexes(&self, txn_type: &str, current_block_id: u64) -> Vec<String> {
        self.definitions
            .lock()
            .expect("lock poisoned")
            .get(txn_type)
            .filter(|def| def.active_since_block <= current_block_id)
            .map(|def| def.custom_indexes.clone())
            .unwrap_or_default()
    }

    fn register(&self, definition: TransactionTypeDefinition) {
        self.definitions.lock().expect("lock poisoned").insert(definition.txn_type.clone(), definition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_prefix_is_rejected_even_if_never_registered() {
        let registry = InMemoryTransactionTypeRegistry::default();
        assert!(matches!(
            registry.validate("-SYSTEM-anything"),
            Err(TransactionTypeError::ReservedPrefix(_))
        ));
    }

    #[test]
    fn custom_indexes_activate_only_at_or_after_their_block() {
        let registry = InMemoryTransactionTypeRegistry::default();
        registry.register(TransactionTypeDefinition {
            txn_type: "order".into(),
            custom_indexes: vec!["customer_id".into()],
            active_since_block: 100,
        });

        assert!(registry.active_custom_indexes("order", 50).is_empty());
        assert_eq!(registry.active_custom_indexes("order", 100), vec!["customer_id".to_string()]);
    }

    #[test]
    fn unknown_non_empty_txn_type_is_rejected() {
        let registry = InMemoryTransactionTypeRegistry::default();
        assert!(matches!(registry.validate("mystery"), Err(TransactionTypeError::Unknown(_))));
        assert!(registry.validate("").is_ok());
    }
}
