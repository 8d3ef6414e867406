//! HTTP surface of the IdeaHub guard.
//!
//! This module provides the health and dashboard endpoints plus the
//! middleware hooks in [`middleware`].

pub mod middleware;

use std::collections::BTreeMap;
use std::sync::Arc;
use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::core::clock::Clock;
use crate::core::performance::{EndpointStats, PerformanceSnapshot};
use crate::core::pipeline::RequestPipeline;
use crate::core::session::SessionManager;
use crate::models::Config;

pub struct ApiState {
    pub pipeline: Arc<RequestPipeline>,
    pub sessions: Option<Arc<SessionManager>>,
    pub config: Arc<Config>,
    pub prometheus: Option<PrometheusHandle>,
}

impl ApiState {
    pub fn new(config: Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            pipeline: Arc::new(RequestPipeline::from_config(&config, clock)),
            sessions: None,
            config: Arc::new(config),
            prometheus: None,
        }
    }

    pub fn with_sessions(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}

/// API configuration function for Actix-web
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health_check)))
        .service(web::resource("/security/metrics").route(web::get().to(security_metrics)))
        .service(web::resource("/performance/metrics").route(web::get().to(performance_metrics)))
        .service(web::resource("/metrics").route(web::get().to(prometheus_metrics)));
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MemoryUsage {
    resident_bytes: u64,
    resident_mb: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestSummary {
    total: usize,
    average_response_time: f64,
    slow_requests: usize,
}

/// Health check endpoint response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
    version: &'static str,
    uptime: u64,
    memory: MemoryUsage,
    cpu: f32,
    requests: RequestSummary,
    endpoints: BTreeMap<String, EndpointStats>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PerformanceResponse {
    overall: PerformanceSnapshot,
    endpoints: BTreeMap<String, EndpointStats>,
    healthy: bool,
}

/// Health check endpoint
async fn health_check(state: web::Data<ApiState>) -> impl Responder {
    let performance = state.pipeline.performance();
    let snapshot = performance.snapshot();
    let healthy = performance.evaluate_health(&snapshot);

    let body = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        timestamp: snapshot.timestamp,
        version: env!("CARGO_PKG_VERSION"),
        uptime: snapshot.uptime_seconds,
        memory: MemoryUsage {
            resident_bytes: snapshot.memory_bytes,
            resident_mb: snapshot.memory_mb,
        },
        cpu: snapshot.cpu_usage,
        requests: RequestSummary {
            total: snapshot.request_count,
            average_response_time: snapshot.average_response_time,
            slow_requests: snapshot.slow_requests,
        },
        endpoints: performance.endpoint_snapshot(),
    };

    if healthy {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

/// Threat dashboard endpoint
async fn security_metrics(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(state.pipeline.threat().report())
}

async fn performance_metrics(state: web::Data<ApiState>) -> impl Responder {
    let performance = state.pipeline.performance();
    let overall = performance.snapshot();
    let healthy = performance.evaluate_health(&overall);
    HttpResponse::Ok().json(PerformanceResponse {
        overall,
        endpoints: performance.endpoint_snapshot(),
        healthy,
    })
}

/// Prometheus exposition endpoint
async fn prometheus_metrics(state: web::Data<ApiState>) -> impl Responder {
    match &state.prometheus {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().finish(),
    }
}
