//! Periodic maintenance for the guard services.
//!
//! Every sweep is an ordinary method so it can be run on demand;
//! [`Maintenance::start`] drives them from tokio intervals in production.

use std::sync::Arc;
use std::time::Duration;
use anyhow::{ensure, Result};
use log::{error, info, warn};
use serde::Serialize;
use tokio::time::{self, Instant, MissedTickBehavior};
use crate::core::pipeline::RequestPipeline;
use crate::core::session::SessionManager;
use crate::core::threat_monitor::Anomaly;
use crate::models::MaintenanceConfig;

/// What a full maintenance pass did
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub anomalies: Vec<Anomaly>,
    pub threat_records_evicted: usize,
    pub endpoints_swept: usize,
    pub rate_limit_windows_swept: usize,
    pub audit_files_removed: usize,
    pub sessions_expired: usize,
}

/// Maintenance service
pub struct Maintenance {
    pipeline: Arc<RequestPipeline>,
    sessions: Option<Arc<SessionManager>>,
    config: MaintenanceConfig,
}

impl Maintenance {
    pub fn new(pipeline: Arc<RequestPipeline>, sessions: Option<Arc<SessionManager>>, config: MaintenanceConfig) -> Self {
        Self {
            pipeline,
            sessions,
            config,
        }
    }

    pub fn run_anomaly_check(&self) -> Vec<Anomaly> {
        let anomalies = self.pipeline.threat().detect_anomalies();
        for anomaly in &anomalies {
            warn!("Security anomaly: {}", anomaly);
        }
        anomalies
    }

    pub fn run_threat_cleanup(&self) -> usize {
        let evicted = self.pipeline.threat().cleanup();
        if evicted > 0 {
            info!("Evicted {} idle threat records", evicted);
        }
        evicted
    }

    /// Sweep endpoint samples and finished rate limit windows
    pub fn run_metrics_sweep(&self) -> (usize, usize) {
        (self.pipeline.performance().sweep(), self.pipeline.rate_limiter().sweep())
    }

    pub async fn run_audit_retention(&self) -> usize {
        match self.pipeline.audit().enforce_retention().await {
            Ok(removed) => removed,
            Err(e) => {
                error!("Audit retention failed: {}", e);
                0
            }
        }
    }

    pub async fn run_session_cleanup(&self) -> usize {
        let Some(sessions) = &self.sessions else {
            return 0;
        };
        match sessions.cleanup_expired().await {
            Ok(removed) => removed,
            Err(e) => {
                error!("Session cleanup failed: {}", e);
                0
            }
        }
    }

    /// Run every sweep once
    pub async fn run_periodic_maintenance(&self) -> MaintenanceReport {
        let anomalies = self.run_anomaly_check();
        let threat_records_evicted = self.run_threat_cleanup();
        let (endpoints_swept, rate_limit_windows_swept) = self.run_metrics_sweep();
        let (audit_files_removed, sessions_expired) =
            futures::join!(self.run_audit_retention(), self.run_session_cleanup());

        MaintenanceReport {
            anomalies,
            threat_records_evicted,
            endpoints_swept,
            rate_limit_windows_swept,
            audit_files_removed,
            sessions_expired,
        }
    }

    /// Run the sweeps on their configured intervals until the task is dropped.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        if !self.config.enabled {
            info!("Periodic maintenance disabled");
            return Ok(());
        }

        let periods = [
            self.config.anomaly_interval_seconds,
            self.config.threat_cleanup_interval_seconds,
            self.config.metrics_sweep_interval_seconds,
            self.config.audit_retention_interval_seconds,
            self.config.session_cleanup_interval_seconds,
        ];
        ensure!(
            periods.iter().all(|seconds| *seconds > 0),
            "maintenance intervals must be positive: {:?}",
            periods
        );

        let ticker = |seconds: u64| {
            let period = Duration::from_secs(seconds);
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        };
        let mut anomaly = ticker(self.config.anomaly_interval_seconds);
        let mut threat_cleanup = ticker(self.config.threat_cleanup_interval_seconds);
        let mut metrics_sweep = ticker(self.config.metrics_sweep_interval_seconds);
        let mut audit_retention = ticker(self.config.audit_retention_interval_seconds);
        let mut session_cleanup = ticker(self.config.session_cleanup_interval_seconds);

        info!("Starting periodic maintenance...");
        loop {
            tokio::select! {
                _ = anomaly.tick() => {
                    self.run_anomaly_check();
                }
                _ = threat_cleanup.tick() => {
                    self.run_threat_cleanup();
                }
                _ = metrics_sweep.tick() => {
                    self.run_metrics_sweep();
                }
                _ = audit_retention.tick() => {
                    self.run_audit_retention().await;
                }
                _ = session_cleanup.tick() => {
                    self.run_session_cleanup().await;
                }
            }
        }
    }
}
