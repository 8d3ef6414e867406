//! Per-endpoint latency tracking and process health.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sysinfo::{Pid, System};
use crate::core::clock::Clock;
use crate::models::PerformanceConfig;
use crate::utils::lock_or_recover;

static UUID_SEGMENT: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$").ok()
});

fn is_identifier(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }
    if segment.bytes().all(|b| b.is_ascii_digit()) {
        return true;
    }
    if segment.len() == 24 && segment.bytes().all(|b| b.is_ascii_hexdigit()) {
        return true;
    }
    UUID_SEGMENT
        .as_ref()
        .map_or(false, |uuid| uuid.is_match(segment))
}

/// Collapse identifier segments of a request path into `:id`.
///
/// `/api/ideas/42/votes` and `/api/ideas/43/votes` both become
/// `/api/ideas/:id/votes`. Any query string is dropped.
pub fn normalize_endpoint(raw_path: &str) -> String {
    let path = raw_path.split(['?', '#']).next().unwrap_or_default();
    path.split('/')
        .map(|segment| if is_identifier(segment) { ":id" } else { segment })
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: DateTime<Utc>,
    duration_ms: f64,
}

/// Aggregates for one normalized endpoint
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStats {
    pub count: usize,
    pub avg_time: f64,
    pub slow_count: usize,
}

/// Process-wide performance snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSnapshot {
    pub request_count: usize,
    pub average_response_time: f64,
    pub slow_requests: usize,
    pub memory_bytes: u64,
    pub memory_mb: f64,
    /// Process CPU percentage since the previous snapshot
    pub cpu_usage: f32,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

/// Performance monitor service
pub struct PerformanceMonitor {
    config: PerformanceConfig,
    clock: Arc<dyn Clock>,
    endpoints: Mutex<HashMap<String, VecDeque<Sample>>>,
    started: Instant,
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl PerformanceMonitor {
    pub fn new(config: PerformanceConfig, clock: Arc<dyn Clock>) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Process statistics unavailable: {}", e);
                None
            }
        };

        // cpu usage is a delta between refreshes, so take the first sample now
        let mut system = System::new();
        if let Some(pid) = pid {
            system.refresh_process(pid);
        }

        Self {
            config,
            clock,
            endpoints: Mutex::new(HashMap::new()),
            started: Instant::now(),
            system: Mutex::new(system),
            pid,
        }
    }

    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }

    fn cutoff(&self) -> DateTime<Utc> {
        self.clock.now() - Duration::seconds(self.config.window_seconds)
    }

    /// Record how long a request to `raw_path` took
    pub fn record_duration(&self, raw_path: &str, duration_ms: f64) {
        let endpoint = normalize_endpoint(raw_path);
        let now = self.clock.now();
        let cutoff = self.cutoff();

        if duration_ms > self.config.slow_threshold_ms {
            warn!("Slow request: {} took {:.1}ms", endpoint, duration_ms);
        }

        let mut endpoints = lock_or_recover(&self.endpoints, "endpoint metrics");
        let samples = endpoints.entry(endpoint).or_default();
        samples.push_back(Sample { at: now, duration_ms });
        while samples.front().map_or(false, |sample| sample.at < cutoff) {
            samples.pop_front();
        }
    }

    /// Aggregates per endpoint over the current window
    pub fn endpoint_snapshot(&self) -> BTreeMap<String, EndpointStats> {
        let cutoff = self.cutoff();
        let slow = self.config.slow_threshold_ms;

        lock_or_recover(&self.endpoints, "endpoint metrics")
            .iter()
            .filter_map(|(endpoint, samples)| {
                let (count, total, slow_count) = samples
                    .iter()
                    .filter(|sample| sample.at >= cutoff)
                    .fold((0usize, 0f64, 0usize), |(count, total, slow_count), sample| {
                        (count + 1, total + sample.duration_ms, slow_count + usize::from(sample.duration_ms > slow))
                    });
                (count > 0).then(|| {
                    (
                        endpoint.clone(),
                        EndpointStats {
                            count,
                            avg_time: total / count as f64,
                            slow_count,
                        },
                    )
                })
            })
            .collect()
    }

    fn process_usage(&self) -> (u64, f32) {
        let Some(pid) = self.pid else {
            return (0, 0.0);
        };
        let mut system = lock_or_recover(&self.system, "system stats");
        if !system.refresh_process(pid) {
            debug!("Process {} missing from system stats", pid);
            return (0, 0.0);
        }
        system
            .process(pid)
            .map_or((0, 0.0), |process| (process.memory(), process.cpu_usage()))
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        let (request_count, total, slow_requests) = self
            .endpoint_snapshot()
            .values()
            .fold((0, 0.0, 0), |(count, total, slow), stats| {
                (count + stats.count, total + stats.avg_time * stats.count as f64, slow + stats.slow_count)
            });
        let (memory_bytes, cpu_usage) = self.process_usage();

        PerformanceSnapshot {
            request_count,
            average_response_time: if request_count > 0 { total / request_count as f64 } else { 0.0 },
            slow_requests,
            memory_bytes,
            memory_mb: memory_bytes as f64 / (1024.0 * 1024.0),
            cpu_usage,
            uptime_seconds: self.started.elapsed().as_secs(),
            timestamp: self.clock.now(),
        }
    }

    /// Health verdict for a snapshot
    pub fn evaluate_health(&self, snapshot: &PerformanceSnapshot) -> bool {
        if snapshot.memory_mb > self.config.memory_ceiling_mb as f64 {
            return false;
        }
        if snapshot.average_response_time > self.config.max_average_ms {
            return false;
        }
        if snapshot.request_count > 0 {
            let slow_fraction = snapshot.slow_requests as f64 / snapshot.request_count as f64;
            if slow_fraction > self.config.max_slow_fraction {
                return false;
            }
        }
        true
    }

    pub fn is_healthy(&self) -> bool {
        self.evaluate_health(&self.snapshot())
    }

    /// Drop samples outside the window and endpoints left without samples.
    /// Returns the number of endpoints removed.
    pub fn sweep(&self) -> usize {
        let cutoff = self.cutoff();
        let mut endpoints = lock_or_recover(&self.endpoints, "endpoint metrics");
        for samples in endpoints.values_mut() {
            while samples.front().map_or(false, |sample| sample.at < cutoff) {
                samples.pop_front();
            }
        }
        let before = endpoints.len();
        endpoints.retain(|_, samples| !samples.is_empty());
        before - endpoints.len()
    }
}
