//! Metrics and instrumentation for the verification pipeline.
//!
//! This module defines Prometheus-compatible metrics for the per-level
//! executors and the broadcast processor, and exposes a small HTTP exporter
//! that serves `/metrics` in Prometheus text format.
//!
//! Typical usage in a node:
//!
//! ```ignore
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//! use chain::metrics::{MetricsRegistry, run_prometheus_http_server};
//!
//! let registry = Arc::new(MetricsRegistry::new()?);
//! let addr: SocketAddr = "127.0.0.1:9898".parse()?;
//!
//! tokio::spawn(run_prometheus_http_server(registry.clone(), addr));
//!
//! registry.pipeline.tick_seconds.with_label_values(&["2"]).observe(duration_secs);
//! ```

pub mod prometheus;

pub use prometheus::{MetricsRegistry, PipelineMetrics, run_prometheus_http_server};
