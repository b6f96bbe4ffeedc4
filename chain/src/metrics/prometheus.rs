//! Prometheus-backed metrics and HTTP exporter.
//!
//! Defines a [`MetricsRegistry`] that owns a Prometheus registry and a set
//! of strongly-typed pipeline metrics, and an async HTTP exporter that
//! serves `/metrics` using `hyper`.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    Method, Request, Response, StatusCode, body::Incoming, header, server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use prometheus::{
    self, Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};

/// Pipeline-wide Prometheus metrics, labelled by level (`"1"`..`"5"`) where
/// a metric applies to more than one level executor.
#[derive(Clone)]
pub struct PipelineMetrics {
    /// Latency of one executor tick (§4.7 steps 1-10), by level.
    pub tick_seconds: HistogramVec,
    /// Blocks this node produced and signed, by level.
    pub blocks_produced: IntCounterVec,
    /// Receipts accepted into a claim check, by level.
    pub receipts_accepted: IntCounterVec,
    /// Receipts rejected (stale sender, already recorded, claim closed), by level.
    pub receipts_rejected: IntCounterVec,
    /// Blocks promoted by the broadcast processor from one level to the next.
    pub broadcast_promotions: IntCounter,
    /// Proof-of-work nonce iterations tried across all `work`-scheme proofs.
    pub pow_iterations: IntCounter,
}

impl PipelineMetrics {
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let tick_seconds = HistogramVec::new(
            HistogramOpts::new("pipeline_tick_seconds", "Time to run one executor tick, by level")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["level"],
        )?;
        registry.register(Box::new(tick_seconds.clone()))?;

        let blocks_produced = IntCounterVec::new(
            Opts::new("pipeline_blocks_produced_total", "Blocks produced and signed, by level"),
            &["level"],
        )?;
        registry.register(Box::new(blocks_produced.clone()))?;

        let receipts_accepted = IntCounterVec::new(
            Opts::new("pipeline_receipts_accepted_total", "Receipts accepted into a claim check, by level"),
            &["level"],
        )?;
        registry.register(Box::new(receipts_accepted.clone()))?;

        let receipts_rejected = IntCounterVec::new(
            Opts::new("pipeline_receipts_rejected_total", "Receipts rejected, by level"),
            &["level"],
        )?;
        registry.register(Box::new(receipts_rejected.clone()))?;

        let broadcast_promotions = IntCounter::with_opts(Opts::new(
            "pipeline_broadcast_promotions_total",
            "Blocks the broadcast processor promoted to the next level",
        ))?;
        registry.register(Box::new(broadcast_promotions.clone()))?;

        let pow_iterations = IntCounter::with_opts(Opts::new(
            "pipeline_pow_iterations_total",
            "Proof-of-work nonce iterations tried across all work-scheme proofs",
        ))?;
        registry.register(Box::new(pow_iterations.clone()))?;

        Ok(Self {
            tick_seconds,
            blocks_produced,
            receipts_accepted,
            receipts_rejected,
            broadcast_promotions,
            pow_iterations,
        })
    }
}

/// Wrapper around a Prometheus registry and the pipeline metrics. This is
/// the handle passed around a node; wrap in an [`Arc`] and share across
/// tasks.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    pub pipeline: PipelineMetrics,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("chain".to_string()), None)?;
        let pipeline = PipelineMetrics::register(&registry)?;
        Ok(Self { registry, pipeline })
    }

    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(error = %e, "failed to encode Prometheus metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Runs an HTTP server exposing `GET /metrics` in Prometheus text format.
/// All other paths return 404. Intended to be spawned onto a Tokio runtime.
pub async fn run_prometheus_http_server(
    metrics: Arc<MetricsRegistry>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let metrics = metrics.clone();
                handle_request(req, metrics)
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                tracing::warn!(error = %err, "metrics HTTP connection error");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    metrics: Arc<MetricsRegistry>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = metrics.gather_text();
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
                .body(Full::new(Bytes::from(body)))
                .unwrap())
        }
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("not found")))
            .unwrap()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;

    #[test]
    fn pipeline_metrics_register_and_record() {
        let registry = Registry::new();
        let metrics = PipelineMetrics::register(&registry).expect("register metrics");

        metrics.tick_seconds.with_label_values(&["1"]).observe(0.01);
        metrics.blocks_produced.with_label_values(&["1"]).inc();
        metrics.receipts_accepted.with_label_values(&["2"]).inc();
        metrics.receipts_rejected.with_label_values(&["2"]).inc();
        metrics.broadcast_promotions.inc();
        metrics.pow_iterations.inc_by(42);

        let metric_families = registry.gather();
        assert!(!metric_families.is_empty());
    }

    #[test]
    fn metrics_registry_gather_text_works() {
        let registry = MetricsRegistry::new().expect("create metrics registry");
        registry.pipeline.tick_seconds.with_label_values(&["3"]).observe(0.02);
        let text = registry.gather_text();
        assert!(text.contains("pipeline_tick_seconds"));
    }
}
