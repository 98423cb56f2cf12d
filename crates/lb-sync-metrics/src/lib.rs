//! ---
//! lbs_section: "04-observability"
//! lbs_subsection: "module"
//! lbs_type: "source"
//! lbs_scope: "code"
//! lbs_description: "Metrics collection and export utilities."
//! lbs_version: "v0.0.0-prealpha"
//! lbs_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the daemon.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Metrics recorded per reconciliation cycle.
#[derive(Clone)]
pub struct CycleMetrics {
    registry: SharedRegistry,
    cycles_total: IntCounter,
    cycle_failures: IntCounterVec,
    renders_total: IntCounter,
    reloads_total: IntCounter,
    group_members: IntGauge,
    cycle_seconds: Histogram,
}

impl CycleMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let cycles_total = IntCounter::with_opts(Opts::new(
            "lb_sync_cycles_total",
            "Total number of reconciliation cycles executed",
        ))?;
        registry.register(Box::new(cycles_total.clone()))?;

        let cycle_failures = IntCounterVec::new(
            Opts::new(
                "lb_sync_cycle_failures_total",
                "Count of failed reconciliation cycles by failure kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(cycle_failures.clone()))?;

        let renders_total = IntCounter::with_opts(Opts::new(
            "lb_sync_renders_total",
            "Number of configuration files written after a membership change",
        ))?;
        registry.register(Box::new(renders_total.clone()))?;

        let reloads_total = IntCounter::with_opts(Opts::new(
            "lb_sync_reloads_total",
            "Number of successful load-balancer reloads",
        ))?;
        registry.register(Box::new(reloads_total.clone()))?;

        let group_members = IntGauge::with_opts(Opts::new(
            "lb_sync_group_members",
            "Member count observed on the most recent successful fetch",
        ))?;
        registry.register(Box::new(group_members.clone()))?;

        let buckets = prometheus::exponential_buckets(0.01, 2.0, 12)
            .context("failed to construct histogram buckets")?;
        let cycle_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "lb_sync_cycle_seconds",
                "Wall-clock duration of reconciliation cycles",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(cycle_seconds.clone()))?;

        Ok(Self {
            registry,
            cycles_total,
            cycle_failures,
            renders_total,
            reloads_total,
            group_members,
            cycle_seconds,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn observe_cycle(&self, duration: Duration) {
        self.cycles_total.inc();
        self.cycle_seconds.observe(duration.as_secs_f64());
    }

    pub fn record_failure(&self, kind: &str) {
        self.cycle_failures.with_label_values(&[kind]).inc();
    }

    pub fn record_render(&self) {
        self.renders_total.inc();
    }

    pub fn record_reload(&self) {
        self.reloads_total.inc();
    }

    pub fn set_group_members(&self, count: usize) {
        self.group_members.set(count as i64);
    }
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(encoder.format_type()),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}
