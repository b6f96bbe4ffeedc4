//! Chain library crate.
//!
//! This crate implements a single level of a hierarchical block
//! verification pipeline (L1 through L5): cryptographic primitives and key
//! management (`crypto`, `keys`), the canonical block/transaction/claim
//! models (`types`), a durable processing queue (`queue`), a matchmaking
//! service client (`matchmaking`), DC1-HMAC interchain authorization
//! (`auth`), per-level tick logic (`executor`), the L1-only broadcast
//! processor that drives claims through the levels (`broadcast`), receipt
//! handling (`receipt`), object storage (`storage`), Prometheus metrics
//! (`metrics`), and node configuration (`config`).
//!
//! A `node` binary crate composes these pieces into a running HTTP service
//! for one level.

pub mod auth;
pub mod broadcast;
pub mod callback;
pub mod config;
pub mod crypto;
pub mod executor;
pub mod keys;
pub mod matchmaking;
pub mod metrics;
pub mod public_chain;
pub mod queue;
pub mod receipt;
pub mod storage;
pub mod transaction_type;
pub mod types;

// Re-export top-level configuration types.
pub use config::{ConfigError, MetricsConfig, NodeConfig, Stage, VerificationNotificationConfig};

// Re-export cryptographic primitives.
pub use crypto::{CryptoError, SupportedEncryption, SupportedHash};

// Re-export key management.
pub use keys::{FileSecretStore, InMemorySecretStore, KeyError, LocalKeypair, PeerKeyResolver, PeerRecord, SecretStore};

// Re-export the L1 transaction-type registry.
pub use transaction_type::{InMemoryTransactionTypeRegistry, TransactionTypeError, TransactionTypeRegistry};

// Re-export the L1 callback dispatcher.
pub use callback::{CallbackDispatcher, HttpCallbackDispatcher};

// Re-export the durable queue abstraction.
pub use queue::{InMemoryQueue, Queue, QueueItem};

// Re-export the matchmaking client surface.
pub use matchmaking::{ClaimCheckDiff, HttpMatchmakingClient, MatchmakingClient, MatchmakingError};

// Re-export DC1-HMAC authorization.
pub use auth::{
    AuthError, AuthVerifier, IncomingAuthRegister, InMemorySharedKeyStore, RequestSigner, SharedKey,
    SharedKeyStore, handle_auth_register,
};

// Re-export per-level executors and shared tick plumbing.
pub use executor::{ExecutorError, TickOutcome};

// Re-export the L1-only broadcast processor.
pub use broadcast::{BroadcastError, BroadcastProcessor};

// Re-export storage backends.
pub use storage::{FsObjectStore, InMemoryObjectStore, ObjectStore, StorageError};

// Re-export metrics registry and the Prometheus exporter.
pub use metrics::{MetricsRegistry, PipelineMetrics, run_prometheus_http_server};

// Re-export the public-chain anchoring interface used by L5.
pub use public_chain::{FakePublicChainClient, PublicChainClient, PublicChainError};

// Re-export receipt handling.
pub use receipt::{ReceiptError, ReceiptHandler, ReceiptRequest};

// Re-export domain types at the crate root for convenience.
pub use types::*;
