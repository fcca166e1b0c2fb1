//! Prometheus metrics for the monitor and the `/metrics` scrape endpoint.
//!
//! - `{prefix}failed_xcm_total`: upward messages whose execution did not complete.
//! - `{prefix}service_errors_total{name}`: handled errors by kind.
//! - `{prefix}last_processed_block` / `{prefix}last_failed_block`: relay block gauges.

use actix_web::{dev::Server, web, App, HttpResponse, HttpServer};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

pub struct Metrics {
    registry: Registry,
    failed_xcm_total: IntCounter,
    service_errors_total: IntCounterVec,
    last_processed_block: IntGauge,
    last_failed_block: IntGauge,
}

impl Metrics {
    /// Create and register all metrics, names prefixed with `prefix` (e.g. `xcm_`).
    pub fn new(prefix: &str) -> prometheus::Result<Self> {
        let registry = Registry::new();

        let failed_xcm_total = IntCounter::new(
            format!("{}failed_xcm_total", prefix),
            "Upward messages executed with a non-complete outcome",
        )?;
        registry.register(Box::new(failed_xcm_total.clone()))?;

        let service_errors_total = IntCounterVec::new(
            Opts::new(
                format!("{}service_errors_total", prefix),
                "Errors handled by the monitor, by kind",
            ),
            &["name"],
        )?;
        registry.register(Box::new(service_errors_total.clone()))?;

        let last_processed_block = IntGauge::new(
            format!("{}last_processed_block", prefix),
            "Last relay block fully processed",
        )?;
        registry.register(Box::new(last_processed_block.clone()))?;

        let last_failed_block = IntGauge::new(
            format!("{}last_failed_block", prefix),
            "Last relay block with a failed upward message",
        )?;
        registry.register(Box::new(last_failed_block.clone()))?;

        Ok(Self {
            registry,
            failed_xcm_total,
            service_errors_total,
            last_processed_block,
            last_failed_block,
        })
    }

    pub fn inc_failed_xcm(&self, count: u64) {
        self.failed_xcm_total.inc_by(count);
    }

    pub fn inc_service_error(&self, name: &str) {
        self.service_errors_total.with_label_values(&[name]).inc();
    }

    pub fn set_last_processed_block(&self, block: u64) {
        self.last_processed_block.set(clamp_i64(block));
    }

    pub fn set_last_failed_block(&self, block: u64) {
        self.last_failed_block.set(clamp_i64(block));
    }

    pub fn failed_xcm_total(&self) -> u64 {
        self.failed_xcm_total.get()
    }

    pub fn service_errors(&self, name: &str) -> u64 {
        self.service_errors_total.with_label_values(&[name]).get()
    }

    pub fn last_processed_block(&self) -> i64 {
        self.last_processed_block.get()
    }

    pub fn last_failed_block(&self) -> i64 {
        self.last_failed_block.get()
    }

    /// Text exposition of every registered metric.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn clamp_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

async fn metrics_handler(metrics: web::Data<Metrics>) -> HttpResponse {
    match metrics.encode() {
        Ok(body) => HttpResponse::Ok()
            .content_type(prometheus::TEXT_FORMAT)
            .body(body),
        Err(e) => {
            tracing::warn!(reason = %e, "failed to encode metrics");
            HttpResponse::InternalServerError().body(e.to_string())
        }
    }
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(metrics_handler));
}

/// Bind the scrape endpoint on `0.0.0.0:{port}`. The returned server must be awaited or spawned.
pub fn serve(metrics: Arc<Metrics>, port: u16) -> std::io::Result<Server> {
    let data = web::Data::from(metrics);
    let server = HttpServer::new(move || App::new().app_data(data.clone()).configure(routes))
        .workers(1)
        .disable_signals()
        .bind(("0.0.0.0", port))?
        .run();
    tracing::info!(port, "metrics endpoint listening");
    Ok(server)
}
