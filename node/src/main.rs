//! Node binary.
//!
//! This binary exposes the inter-chain HTTP surface for one level of the
//! pipeline:
//!
//! - `GET /health`
//! - `GET /metrics` (Prometheus)
//! - `POST /v1/enqueue`
//! - `POST /v1/receipt`
//! - `GET /v1/claim/{blockId}`
//! - `POST /v1/interchain-auth-register`
//!
//! and drives the configured level's tick loop, plus the broadcast
//! processor loop when this is an L1 node with `BROADCAST=true`.

mod auth_guard;
mod config;
mod routes;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::signal;

use chain::executor::l1::L1Executor;
use chain::executor::l2::L2Executor;
use chain::executor::l3::L3Executor;
use chain::executor::l4::L4Executor;
use chain::executor::l5::L5Executor;
use chain::executor::{ExecutorError, RegistrationRenewer, ReceiptSender, TickOutcome};
use chain::{
    AuthVerifier, BroadcastProcessor, FakePublicChainClient, FileSecretStore, FsObjectStore,
    HttpMatchmakingClient, InMemoryQueue, InMemorySharedKeyStore, InMemoryTransactionTypeRegistry,
    LevelRequirement, LocalKeypair, MetricsRegistry, NodeConfig, ObjectStore, PeerKeyResolver,
    ReceiptHandler, RequestSigner, run_prometheus_http_server, SharedKeyStore,
};

use config::ApiConfig;
use routes::{claim, enqueue, health, interchain_auth, receipt};
use state::{AppState, LevelRuntime, SharedState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "node=info,chain=info".to_string()))
        .init();

    if let Err(e) = run().await {
        eprintln!("fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let api_cfg = ApiConfig::default();
    let node_cfg = NodeConfig::from_env().map_err(|e| format!("configuration error: {e}"))?;

    // ---------------------------
    // Metrics
    // ---------------------------

    let metrics = Arc::new(
        MetricsRegistry::new().map_err(|e| format!("failed to initialise metrics registry: {e}"))?,
    );
    if node_cfg.metrics.enabled {
        let metrics_clone = metrics.clone();
        let addr = node_cfg.metrics.listen_addr;
        tokio::spawn(async move {
            if let Err(e) = run_prometheus_http_server(metrics_clone, addr).await {
                eprintln!("metrics HTTP server error: {e}");
            }
        });
        tracing::info!("metrics exporter listening on http://{}/metrics", addr);
    }

    // ---------------------------
    // Identity, storage, keystore
    // ---------------------------

    let key_store_path = std::env::var("KEY_STORE_PATH").unwrap_or_else(|_| "./data/keys/signing.key".to_string());
    let secret_store = FileSecretStore::new(key_store_path);
    let keypair = Arc::new(
        LocalKeypair::load_or_generate(&secret_store).map_err(|e| format!("failed to load signing key: {e}"))?,
    );
    tracing::info!(dc_id = keypair.dc_id(), level = node_cfg.level, "node identity loaded");

    let storage_path = std::env::var("STORAGE_PATH").unwrap_or_else(|_| "./data/storage".to_string());
    let storage: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(storage_path));

    let keystore: Arc<dyn SharedKeyStore> = Arc::new(InMemorySharedKeyStore::default());

    // ---------------------------
    // Matchmaking + peer key resolution
    // ---------------------------

    let matchmaking_signer = Arc::new(RequestSigner::new(
        keypair.dc_id().to_string(),
        keypair.signing_key().clone(),
        node_cfg.hash,
        node_cfg.matchmaking_dc_id.clone(),
        format!(
            "{}/v1/interchain-auth-register",
            node_cfg.matchmaking_url.trim_end_matches('/')
        ),
        keystore.clone(),
    ));
    let matchmaking = Arc::new(
        HttpMatchmakingClient::new(node_cfg.matchmaking_url.clone(), matchmaking_signer, node_cfg.matchmaking_timeout)
            .map_err(|e| format!("failed to build matchmaking client: {e}"))?,
    );
    let resolver = Arc::new(PeerKeyResolver::new(matchmaking.clone()));

    let auth = AuthVerifier::new(node_cfg.hash, keystore.clone(), node_cfg.rate_limit as usize);

    let receipts = ReceiptHandler::new(matchmaking.clone(), storage.clone(), node_cfg.verification_notification.clone());

    let receipt_sender = Arc::new(ReceiptSender::new(
        keypair.dc_id().to_string(),
        keypair.signing_key().clone(),
        node_cfg.hash,
        resolver.clone(),
        keystore.clone(),
    ));

    // ---------------------------
    // Level-specific executor
    // ---------------------------

    let runtime = build_runtime(&node_cfg, keypair.clone(), storage.clone(), matchmaking.clone(), resolver.clone(), receipt_sender.clone())?;

    let app_state: SharedState = Arc::new(AppState {
        runtime,
        storage: storage.clone(),
        matchmaking: matchmaking.clone(),
        resolver: resolver.clone(),
        keystore: keystore.clone(),
        receipts,
        auth,
        hash: node_cfg.hash,
        metrics: metrics.clone(),
    });

    // ---------------------------
    // Tick loop
    // ---------------------------

    let tick_state = app_state.clone();
    let tick_interval = match node_cfg.level {
        1 => Duration::from_secs(5),
        5 => Duration::from_secs(60),
        _ => Duration::from_secs(1),
    };
    tokio::spawn(async move {
        run_tick_loop(tick_state, tick_interval).await;
    });

    // ---------------------------
    // Broadcast processor loop (L1-only)
    // ---------------------------

    if node_cfg.level == 1 && node_cfg.broadcast_enabled {
        let requirements: Vec<LevelRequirement> = [2u8, 3, 4, 5]
            .into_iter()
            .zip(node_cfg.level_requirements)
            .map(|(level, count)| LevelRequirement { level, count })
            .collect();
        let broadcast = BroadcastProcessor::new(
            keypair.clone(),
            storage.clone(),
            matchmaking.clone(),
            resolver.clone(),
            keystore.clone(),
            node_cfg.hash,
            requirements,
        );
        let broadcast_interval = node_cfg.broadcast_interval;
        tokio::spawn(async move {
            loop {
                broadcast.tick().await;
                tokio::time::sleep(broadcast_interval).await;
            }
        });
        tracing::info!("broadcast processor running with interval {:?}", node_cfg.broadcast_interval);
    }

    // ---------------------------
    // HTTP router
    // ---------------------------

    let app = Router::new()
        .route("/health", get(health::health))
        .route("/v1/enqueue", post(enqueue::enqueue))
        .route("/v1/receipt", post(receipt::receipt))
        .route("/v1/claim/{block_id}", get(claim::claim))
        .route("/v1/interchain-auth-register", post(interchain_auth::register))
        .with_state(app_state);

    tracing::info!("node listening on http://{}", api_cfg.listen_addr);

    let listener = tokio::net::TcpListener::bind(api_cfg.listen_addr)
        .await
        .map_err(|e| format!("failed to bind {}: {e}", api_cfg.listen_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("node HTTP server error: {e}"))?;

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn build_runtime(
    node_cfg: &NodeConfig,
    keypair: Arc<LocalKeypair>,
    storage: Arc<dyn ObjectStore>,
    matchmaking: Arc<HttpMatchmakingClient>,
    resolver: Arc<PeerKeyResolver>,
    receipts: Arc<ReceiptSender>,
) -> Result<LevelRuntime, String> {
    let renewer = RegistrationRenewer::default();

    let runtime = match node_cfg.level {
        1 => LevelRuntime::L1(L1Executor {
            keypair,
            own_url: node_cfg.own_url.clone(),
            queue: Arc::new(InMemoryQueue::default()),
            storage,
            matchmaking,
            resolver,
            transaction_types: Arc::new(InMemoryTransactionTypeRegistry::default()),
            callbacks: Arc::new(chain::HttpCallbackDispatcher::default()),
            hash: node_cfg.hash,
            proof_scheme: node_cfg.proof_scheme,
            complexity: node_cfg.pow_complexity,
            renewer,
        }),
        2 => LevelRuntime::L2(L2Executor {
            keypair,
            own_url: node_cfg.own_url.clone(),
            queue: Arc::new(InMemoryQueue::default()),
            storage,
            matchmaking,
            resolver,
            receipts,
            hash: node_cfg.hash,
            proof_scheme: node_cfg.proof_scheme,
            complexity: node_cfg.pow_complexity,
            renewer,
        }),
        3 => LevelRuntime::L3(L3Executor {
            keypair,
            own_url: node_cfg.own_url.clone(),
            queue: Arc::new(InMemoryQueue::default()),
            storage,
            matchmaking,
            resolver,
            receipts,
            hash: node_cfg.hash,
            proof_scheme: node_cfg.proof_scheme,
            complexity: node_cfg.pow_complexity,
            renewer,
        }),
        4 => LevelRuntime::L4(L4Executor {
            keypair,
            own_url: node_cfg.own_url.clone(),
            queue: Arc::new(InMemoryQueue::default()),
            storage,
            matchmaking,
            resolver,
            receipts,
            hash: node_cfg.hash,
            proof_scheme: node_cfg.proof_scheme,
            complexity: node_cfg.pow_complexity,
            renewer,
        }),
        5 => LevelRuntime::L5(L5Executor {
            keypair,
            own_url: node_cfg.own_url.clone(),
            wallet: node_cfg.wallet.clone().ok_or_else(|| "WALLET is required at LEVEL=5".to_string())?,
            network: node_cfg.network.clone().ok_or_else(|| "NETWORK is required at LEVEL=5".to_string())?,
            queue: Arc::new(InMemoryQueue::default()),
            storage,
            matchmaking,
            resolver,
            receipts,
            public_chain: Arc::new(FakePublicChainClient::new(
                std::env::var("ANCHOR_BALANCE").ok().and_then(|v| v.parse().ok()).unwrap_or(1),
            )),
            hash: node_cfg.hash,
            proof_scheme: node_cfg.proof_scheme,
            complexity: node_cfg.pow_complexity,
            renewer,
        }),
        other => return Err(format!("unsupported level {other}")),
    };

    Ok(runtime)
}

async fn run_tick_loop(state: SharedState, interval: Duration) {
    loop {
        match state.runtime.tick().await {
            Ok(TickOutcome::Idle) => {}
            Ok(TickOutcome::Produced { block_id }) => {
                tracing::info!(block_id = %block_id, level = state.runtime.level(), "tick produced a block");
            }
            Err(e) => log_tick_error(&e),
        }
        tokio::time::sleep(interval).await;
    }
}

fn log_tick_error(e: &ExecutorError) {
    tracing::warn!(error = %e, "tick failed");
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
