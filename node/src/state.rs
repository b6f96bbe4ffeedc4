//! Shared application state: the configured level's executor, the shared
//! matchmaking/storage/auth plumbing every route needs, and the
//! per-level dispatch that lets one set of routes serve any level.

use std::sync::Arc;

use chain::broadcast::dto::{L3BroadcastItem, L4BroadcastItem, L5BroadcastItem};
use chain::executor::l1::L1Executor;
use chain::executor::l2::L2Executor;
use chain::executor::l3::L3Executor;
use chain::executor::l4::L4Executor;
use chain::executor::l5::L5Executor;
use chain::executor::{ExecutorError, TickOutcome};
use chain::types::block::L1AtRestDto;
use chain::{
    AuthVerifier, MatchmakingClient, MetricsRegistry, ObjectStore, PeerKeyResolver, Queue,
    ReceiptHandler, SharedKeyStore, SupportedHash, Transaction,
};

/// The single level this node runs, carrying its own typed executor and
/// queue. One set of HTTP routes dispatches through this instead of
/// maintaining five near-identical route modules.
pub enum LevelRuntime {
    L1(L1Executor),
    L2(L2Executor),
    L3(L3Executor),
    L4(L4Executor),
    L5(L5Executor),
}

impl LevelRuntime {
    pub fn level(&self) -> u8 {
        match self {
            LevelRuntime::L1(_) => 1,
            LevelRuntime::L2(_) => 2,
            LevelRuntime::L3(_) => 3,
            LevelRuntime::L4(_) => 4,
            LevelRuntime::L5(_) => 5,
        }
    }

    pub fn own_dc_id(&self) -> String {
        match self {
            LevelRuntime::L1(e) => e.keypair.dc_id().to_string(),
            LevelRuntime::L2(e) => e.keypair.dc_id().to_string(),
            LevelRuntime::L3(e) => e.keypair.dc_id().to_string(),
            LevelRuntime::L4(e) => e.keypair.dc_id().to_string(),
            LevelRuntime::L5(e) => e.keypair.dc_id().to_string(),
        }
    }

    pub async fn tick(&self) -> Result<TickOutcome, ExecutorError> {
        match self {
            LevelRuntime::L1(e) => e.tick().await,
            LevelRuntime::L2(e) => e.tick().await,
            LevelRuntime::L3(e) => e.tick().await,
            LevelRuntime::L4(e) => e.tick().await,
            LevelRuntime::L5(e) => e.tick().await,
        }
    }

    /// Parses `body` as this level's broadcast item shape and pushes it to
    /// the level's incoming queue (§4.9's per-level `/v1/enqueue` body).
    pub async fn enqueue_json(&self, body: &[u8]) -> Result<(), serde_json::Error> {
        match self {
            LevelRuntime::L1(e) => {
                let txn: Transaction = serde_json::from_slice(body)?;
                e.queue.enqueue(txn, None).await;
            }
            LevelRuntime::L2(e) => {
                let item: L1AtRestDto = serde_json::from_slice(body)?;
                e.queue.enqueue(item, None).await;
            }
            LevelRuntime::L3(e) => {
                let item: L3BroadcastItem = serde_json::from_slice(body)?;
                e.queue.enqueue(item, None).await;
            }
            LevelRuntime::L4(e) => {
                let item: L4BroadcastItem = serde_json::from_slice(body)?;
                e.queue.enqueue(item, None).await;
            }
            LevelRuntime::L5(e) => {
                let item: L5BroadcastItem = serde_json::from_slice(body)?;
                e.queue.enqueue(item, None).await;
            }
        }
        Ok(())
    }
}

/// Shared state held by the API and background tick loops.
pub struct AppState {
    pub runtime: LevelRuntime,
    pub storage: Arc<dyn ObjectStore>,
    pub matchmaking: Arc<dyn MatchmakingClient>,
    pub resolver: Arc<PeerKeyResolver>,
    pub keystore: Arc<dyn SharedKeyStore>,
    pub receipts: ReceiptHandler,
    pub auth: AuthVerifier,
    pub hash: SupportedHash,
    pub metrics: Arc<MetricsRegistry>,
}

pub type SharedState = Arc<AppState>;
