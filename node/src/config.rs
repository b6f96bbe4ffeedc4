//! Node HTTP server configuration.
//!
//! This only configures the inter-chain HTTP listen address; everything
//! about which level runs and how it signs/verifies comes from
//! `chain::NodeConfig::from_env`.

use std::net::SocketAddr;

/// Configuration for the node's HTTP server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub listen_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .expect("LISTEN_ADDR must be a valid socket address");
        Self { listen_addr: addr }
    }
}
