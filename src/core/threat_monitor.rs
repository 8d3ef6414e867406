//! Threat monitoring for the IdeaHub guard.
//!
//! Every inbound request is attributed to its source address. The monitor
//! keeps a [`ThreatRecord`] per source, matches the request against a fixed
//! set of attack signatures and derives a 0-100 risk score from the record's
//! counters. Blocking decisions, anomaly findings and the dashboard report
//! are all built on top of that score.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, warn};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use crate::core::clock::Clock;
use crate::models::{RiskWeights, ThreatConfig};
use crate::utils::{lock_or_recover, read_or_recover, write_or_recover};

/// A named request signature
#[derive(Debug)]
pub struct ThreatSignature {
    /// Stable identifier stored in [`ThreatRecord::suspicious_patterns`]
    pub id: &'static str,
    pub description: &'static str,
    pattern: Regex,
}

impl ThreatSignature {
    fn new(id: &'static str, description: &'static str, pattern: &str) -> Option<Self> {
        match Regex::new(pattern) {
            Ok(pattern) => Some(Self { id, description, pattern }),
            Err(e) => {
                error!("Invalid threat signature {}: {}", id, e);
                None
            }
        }
    }

    pub fn matches(&self, content: &str) -> bool {
        self.pattern.is_match(content)
    }
}

pub const SQL_INJECTION: &str = "sql_injection";
pub const XSS_SCRIPT: &str = "xss_script";
pub const CODE_EXECUTION: &str = "code_execution";
pub const PATH_TRAVERSAL: &str = "path_traversal";
pub const PRIVILEGED_USERNAME: &str = "privileged_username";
pub const CREDENTIAL_FISHING: &str = "credential_fishing";

fn default_signatures() -> Vec<ThreatSignature> {
    [
        (SQL_INJECTION, "SQL keywords", r"(?i)\b(union|select|insert|update|delete|drop|create|alter)\b"),
        (XSS_SCRIPT, "Inline script tag", r"(?is)<script[^>]*>.*?</script>"),
        (CODE_EXECUTION, "Code execution call", r"(?i)\b(eval|exec|system|cmd)\s*\("),
        (PATH_TRAVERSAL, "Directory traversal", r"\.\./"),
        (PRIVILEGED_USERNAME, "Common privileged usernames", r"(?i)\b(administrator|admin|root|test|guest)\b"),
        (CREDENTIAL_FISHING, "Password fishing", r"(?i)\b(password|passwd|pwd)\b"),
    ]
    .into_iter()
    .filter_map(|(id, description, pattern)| ThreatSignature::new(id, description, pattern))
    .collect()
}

/// Behaviour observed from one source address
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatRecord {
    pub ip_address: String,
    pub request_count: u64,
    pub error_count: u64,
    pub auth_failure_count: u64,
    pub suspicious_patterns: BTreeSet<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl ThreatRecord {
    pub fn new(ip_address: &str, now: DateTime<Utc>) -> Self {
        Self {
            ip_address: ip_address.to_string(),
            request_count: 0,
            error_count: 0,
            auth_failure_count: 0,
            suspicious_patterns: BTreeSet::new(),
            first_seen: now,
            last_seen: now,
        }
    }

    /// Derive the 0-100 risk score for this record as of `now`.
    ///
    /// The request rate is measured over at least one minute so a brand-new
    /// source is not scored on a near-zero denominator.
    pub fn risk_score(&self, now: DateTime<Utc>, weights: &RiskWeights) -> u8 {
        let mut score: u32 = 0;
        let observed = now - self.first_seen;

        let minutes = (observed.num_milliseconds().max(0) as f64 / 60_000.0).max(1.0);
        let rate = self.request_count as f64 / minutes;
        if rate > weights.request_rate_high {
            score += weights.request_rate_high_score;
        } else if rate > weights.request_rate_moderate {
            score += weights.request_rate_moderate_score;
        }

        let error_ratio = self.error_count as f64 / self.request_count.max(1) as f64;
        if error_ratio > weights.error_ratio_high {
            score += weights.error_ratio_high_score;
        } else if error_ratio > weights.error_ratio_moderate {
            score += weights.error_ratio_moderate_score;
        }

        if self.auth_failure_count > weights.auth_failures_high {
            score += weights.auth_failures_high_score;
        } else if self.auth_failure_count > weights.auth_failures_moderate {
            score += weights.auth_failures_moderate_score;
        }

        score = score.saturating_add(
            weights
                .pattern_score
                .saturating_mul(self.suspicious_patterns.len() as u32),
        );

        if observed < Duration::seconds(weights.new_source_seconds) {
            score += weights.new_source_score;
        }

        score.min(100) as u8
    }

    pub fn assess(&self, now: DateTime<Utc>, weights: &RiskWeights) -> ThreatAssessment {
        ThreatAssessment {
            risk_score: self.risk_score(now, weights),
            record: self.clone(),
        }
    }
}

/// A record together with its score at the time it was read
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatAssessment {
    #[serde(flatten)]
    pub record: ThreatRecord,
    pub risk_score: u8,
}

/// Process-wide counters over a rolling one-minute window
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityCounters {
    pub request_count: u64,
    pub error_count: u64,
    pub auth_failures: u64,
    pub suspicious_activity: u64,
    pub window_started: DateTime<Utc>,
}

impl SecurityCounters {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            request_count: 0,
            error_count: 0,
            auth_failures: 0,
            suspicious_activity: 0,
            window_started: now,
        }
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        if now - self.window_started > Duration::minutes(1) {
            *self = Self::new(now);
        }
    }
}

/// Finding produced by [`ThreatMonitor::detect_anomalies`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    HighRequestVolume { count: u64 },
    HighErrorRate { count: u64 },
    HighAuthFailureRate { count: u64 },
    CriticalSource { ip_address: String, risk_score: u8 },
    HighRiskSource { ip_address: String, risk_score: u8 },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::HighRequestVolume { count } => write!(f, "High request volume detected ({} requests/min)", count),
            Anomaly::HighErrorRate { count } => write!(f, "High error rate detected ({} errors/min)", count),
            Anomaly::HighAuthFailureRate { count } => write!(f, "High authentication failure rate ({} failures/min)", count),
            Anomaly::CriticalSource { ip_address, risk_score } => {
                write!(f, "Critical threat detected from IP: {} (score {})", ip_address, risk_score)
            }
            Anomaly::HighRiskSource { ip_address, risk_score } => {
                write!(f, "High risk activity from IP: {} (score {})", ip_address, risk_score)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedSource {
    pub ip_address: String,
    pub expires_at: DateTime<Utc>,
}

/// Snapshot served by the security dashboard endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityReport {
    pub timestamp: DateTime<Utc>,
    pub metrics: SecurityCounters,
    pub blocked_ips: Vec<BlockedSource>,
    pub active_threats: Vec<ThreatAssessment>,
    pub total_threats: usize,
    pub anomalies: Vec<Anomaly>,
}

/// Threat monitor service
pub struct ThreatMonitor {
    config: ThreatConfig,
    clock: Arc<dyn Clock>,
    signatures: Vec<ThreatSignature>,
    records: RwLock<HashMap<String, ThreatRecord>>,
    blocked: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    counters: Mutex<SecurityCounters>,
}

impl ThreatMonitor {
    /// Create a new threat monitor
    pub fn new(config: ThreatConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            config,
            clock,
            signatures: default_signatures(),
            records: RwLock::new(HashMap::new()),
            blocked: Arc::new(RwLock::new(HashMap::new())),
            counters: Mutex::new(SecurityCounters::new(now)),
        }
    }

    pub fn config(&self) -> &ThreatConfig {
        &self.config
    }

    fn bump(&self, update: impl FnOnce(&mut SecurityCounters)) {
        let mut counters = lock_or_recover(&self.counters, "security counters");
        counters.roll(self.clock.now());
        update(&mut counters);
    }

    /// Record a request from `ip` and return its updated assessment.
    ///
    /// The URL, user agent and serialized body are scanned together; a body
    /// that cannot be serialized is scanned as an empty string.
    pub fn analyze(&self, ip: &str, url: &str, user_agent: &str, body: Option<&Value>) -> ThreatAssessment {
        let now = self.clock.now();
        let body = body
            .and_then(|body| serde_json::to_string(body).ok())
            .unwrap_or_default();
        let content = format!("{} {} {}", url, user_agent, body);

        let matched: Vec<&'static str> = self
            .signatures
            .iter()
            .filter(|signature| signature.matches(&content))
            .map(|signature| signature.id)
            .collect();

        self.bump(|counters| {
            counters.request_count += 1;
            if !matched.is_empty() {
                counters.suspicious_activity += 1;
            }
        });

        let mut records = write_or_recover(&self.records, "threat records");
        let record = records
            .entry(ip.to_string())
            .or_insert_with(|| ThreatRecord::new(ip, now));
        record.request_count += 1;
        record.last_seen = now;
        for id in matched {
            if record.suspicious_patterns.insert(id.to_string()) {
                debug!("Source {} matched signature {}", ip, id);
            }
        }

        record.assess(now, &self.config.weights)
    }

    /// Feed a response status back into the source's counters.
    ///
    /// Any 4xx/5xx counts as an error; 401 and 403 also count as failed
    /// authentication.
    pub fn record_outcome(&self, ip: &str, status: u16) {
        if status >= 400 {
            self.record_error(ip);
        }
        if status == 401 || status == 403 {
            self.record_auth_failure(ip);
        }
    }

    pub fn record_error(&self, ip: &str) {
        self.bump(|counters| counters.error_count += 1);

        let now = self.clock.now();
        let mut records = write_or_recover(&self.records, "threat records");
        let record = records
            .entry(ip.to_string())
            .or_insert_with(|| ThreatRecord::new(ip, now));
        record.error_count += 1;
        record.last_seen = now;
    }

    /// Count a failed authentication attempt.
    pub fn record_auth_failure(&self, ip: &str) {
        self.bump(|counters| counters.auth_failures += 1);

        let now = self.clock.now();
        let mut records = write_or_recover(&self.records, "threat records");
        let record = records
            .entry(ip.to_string())
            .or_insert_with(|| ThreatRecord::new(ip, now));
        record.auth_failure_count += 1;
        record.last_seen = now;
    }

    /// Current assessment of a source, if it has been seen
    pub fn assessment(&self, ip: &str) -> Option<ThreatAssessment> {
        let now = self.clock.now();
        read_or_recover(&self.records, "threat records")
            .get(ip)
            .map(|record| record.assess(now, &self.config.weights))
    }

    pub fn is_blocked(&self, ip: &str) -> bool {
        let now = self.clock.now();
        read_or_recover(&self.blocked, "blocked sources")
            .get(ip)
            .map_or(false, |expires_at| *expires_at > now)
    }

    /// Whether requests from `ip` must be denied
    pub fn should_block(&self, ip: &str) -> bool {
        if self.is_blocked(ip) {
            return true;
        }
        self.assessment(ip)
            .map_or(false, |assessment| assessment.risk_score >= self.config.high_risk_score)
    }

    /// Deny `ip` for `duration`.
    ///
    /// When called inside a tokio runtime a timer task removes the entry once
    /// the duration has passed; membership checks ignore expired entries
    /// either way.
    pub fn block(&self, ip: &str, duration: std::time::Duration) {
        let expires_at = self.clock.now() + Duration::from_std(duration).unwrap_or_else(|_| Duration::hours(1));
        write_or_recover(&self.blocked, "blocked sources").insert(ip.to_string(), expires_at);
        warn!("Blocking source {} until {}", ip, expires_at);

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let blocked = Arc::clone(&self.blocked);
            let ip = ip.to_string();
            handle.spawn(async move {
                tokio::time::sleep(duration).await;
                let mut entries = write_or_recover(&blocked, "blocked sources");
                // A later block may have extended the entry
                if entries.get(&ip) == Some(&expires_at) {
                    entries.remove(&ip);
                    debug!("Block on {} expired", ip);
                }
            });
        }
    }

    pub fn blocked_sources(&self) -> Vec<BlockedSource> {
        let now = self.clock.now();
        let mut blocked: Vec<BlockedSource> = read_or_recover(&self.blocked, "blocked sources")
            .iter()
            .filter(|(_, expires_at)| **expires_at > now)
            .map(|(ip, expires_at)| BlockedSource {
                ip_address: ip.clone(),
                expires_at: *expires_at,
            })
            .collect();
        blocked.sort_by(|a, b| a.ip_address.cmp(&b.ip_address));
        blocked
    }

    pub fn tracked_sources(&self) -> usize {
        read_or_recover(&self.records, "threat records").len()
    }

    /// Check global counters and per-source scores.
    ///
    /// Sources at or above the critical score are blocked as a side effect.
    pub fn detect_anomalies(&self) -> Vec<Anomaly> {
        let now = self.clock.now();
        let counters = {
            let mut counters = lock_or_recover(&self.counters, "security counters");
            counters.roll(now);
            counters.clone()
        };

        let mut anomalies = Vec::new();
        if counters.request_count > self.config.max_requests_per_minute {
            anomalies.push(Anomaly::HighRequestVolume { count: counters.request_count });
        }
        if counters.error_count > self.config.max_errors_per_minute {
            anomalies.push(Anomaly::HighErrorRate { count: counters.error_count });
        }
        if counters.auth_failures > self.config.max_auth_failures_per_minute {
            anomalies.push(Anomaly::HighAuthFailureRate { count: counters.auth_failures });
        }

        let mut scored: Vec<(String, u8)> = read_or_recover(&self.records, "threat records")
            .values()
            .map(|record| (record.ip_address.clone(), record.risk_score(now, &self.config.weights)))
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let block_for = std::time::Duration::from_secs(self.config.block_duration_seconds);
        for (ip_address, risk_score) in scored {
            if risk_score >= self.config.critical_risk_score {
                self.block(&ip_address, block_for);
                anomalies.push(Anomaly::CriticalSource { ip_address, risk_score });
            } else if risk_score >= self.config.high_risk_score {
                anomalies.push(Anomaly::HighRiskSource { ip_address, risk_score });
            }
        }

        anomalies
    }

    /// Build the dashboard report. Runs anomaly detection as part of it.
    pub fn report(&self) -> SecurityReport {
        let anomalies = self.detect_anomalies();
        let now = self.clock.now();
        let metrics = {
            let mut counters = lock_or_recover(&self.counters, "security counters");
            counters.roll(now);
            counters.clone()
        };

        let (mut active_threats, total_threats) = {
            let records = read_or_recover(&self.records, "threat records");
            let active: Vec<ThreatAssessment> = records
                .values()
                .map(|record| record.assess(now, &self.config.weights))
                .filter(|assessment| assessment.risk_score > self.config.interesting_score)
                .collect();
            (active, records.len())
        };
        active_threats.sort_by(|a, b| b.risk_score.cmp(&a.risk_score));
        active_threats.truncate(self.config.report_top_sources);

        SecurityReport {
            timestamp: now,
            metrics,
            blocked_ips: self.blocked_sources(),
            active_threats,
            total_threats,
            anomalies,
        }
    }

    /// Evict idle records whose score is below the interesting threshold.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let cutoff = now - Duration::seconds(self.config.record_retention_seconds);
        let weights = &self.config.weights;
        let keep_from = self.config.interesting_score;

        let mut records = write_or_recover(&self.records, "threat records");
        let before = records.len();
        records.retain(|_, record| record.last_seen >= cutoff || record.risk_score(now, weights) >= keep_from);
        before - records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use serde_json::json;

    fn monitor() -> (ThreatMonitor, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (ThreatMonitor::new(ThreatConfig::default(), clock.clone()), clock)
    }

    fn record_with(auth_failures: u64, now: DateTime<Utc>) -> ThreatRecord {
        let mut record = ThreatRecord::new("10.0.0.1", now - Duration::minutes(30));
        record.request_count = 20;
        record.error_count = 2;
        record.auth_failure_count = auth_failures;
        record
    }

    #[test]
    fn test_risk_is_monotonic_in_auth_failures() {
        let now = Utc::now();
        let weights = RiskWeights::default();
        let mut previous = 0;
        for failures in 0..40 {
            let score = record_with(failures, now).risk_score(now, &weights);
            assert!(score >= previous, "score dropped at {} failures", failures);
            previous = score;
        }

        let below = record_with(weights.auth_failures_moderate, now).risk_score(now, &weights);
        let above = record_with(weights.auth_failures_moderate + 1, now).risk_score(now, &weights);
        assert!(above > below);
    }

    #[test]
    fn test_risk_is_capped() {
        let now = Utc::now();
        let mut record = ThreatRecord::new("10.0.0.1", now);
        record.request_count = u64::MAX / 2;
        record.error_count = u64::MAX / 2;
        record.auth_failure_count = u64::MAX;
        for id in ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l"] {
            record.suspicious_patterns.insert(id.to_string());
        }
        assert_eq!(record.risk_score(now, &RiskWeights::default()), 100);
        assert_eq!(ThreatRecord::new("10.0.0.2", now - Duration::hours(1)).risk_score(now, &RiskWeights::default()), 0);
    }

    #[test]
    fn test_repeated_payload_counts_pattern_once() {
        let (monitor, _) = monitor();
        let body = json!({ "q": "1 UNION SELECT secrets" });
        monitor.analyze("10.0.0.1", "/api/ideas", "curl/8.0", Some(&body));
        let second = monitor.analyze("10.0.0.1", "/api/ideas", "curl/8.0", Some(&body));

        assert_eq!(second.record.request_count, 2);
        assert_eq!(second.record.suspicious_patterns.len(), 1);
        assert!(second.record.suspicious_patterns.contains(SQL_INJECTION));
    }

    #[test]
    fn test_script_payload_adds_pattern_score() {
        let (monitor, _) = monitor();
        let clean = json!({ "content": "A great idea" });
        let hostile = json!({ "content": "<script>alert(1)</script>" });

        let clean = monitor.analyze("10.0.0.1", "/api/ideas", "Mozilla/5.0", Some(&clean));
        let flagged = monitor.analyze("10.0.0.2", "/api/ideas", "Mozilla/5.0", Some(&hostile));

        assert!(clean.record.suspicious_patterns.is_empty());
        assert!(flagged.record.suspicious_patterns.contains(XSS_SCRIPT));
        assert_eq!(
            flagged.risk_score,
            clean.risk_score + RiskWeights::default().pattern_score as u8
        );
    }

    #[test]
    fn test_path_traversal_in_url() {
        let (monitor, _) = monitor();
        let assessment = monitor.analyze("10.0.0.1", "/files/../../etc/hosts", "", None);
        assert!(assessment.record.suspicious_patterns.contains(PATH_TRAVERSAL));
    }

    #[test]
    fn test_outcome_for_unknown_source_creates_record() {
        let (monitor, _) = monitor();
        monitor.record_outcome("10.9.9.9", 401);
        let assessment = monitor.assessment("10.9.9.9").unwrap();
        assert_eq!(assessment.record.request_count, 0);
        assert_eq!(assessment.record.error_count, 1);
        assert_eq!(assessment.record.auth_failure_count, 1);

        monitor.record_outcome("10.9.9.9", 200);
        assert_eq!(monitor.assessment("10.9.9.9").unwrap().record.error_count, 1);
    }

    #[test]
    fn test_block_expires_with_clock() {
        let (monitor, clock) = monitor();
        monitor.block("10.0.0.1", std::time::Duration::from_secs(10));
        assert!(monitor.should_block("10.0.0.1"));
        assert_eq!(monitor.blocked_sources().len(), 1);

        clock.advance(Duration::seconds(11));
        assert!(!monitor.should_block("10.0.0.1"));
        assert!(monitor.blocked_sources().is_empty());
    }

    #[tokio::test]
    async fn test_block_timer_removes_entry() {
        let monitor = ThreatMonitor::new(ThreatConfig::default(), Arc::new(crate::core::clock::SystemClock));
        monitor.block("10.0.0.1", std::time::Duration::from_millis(50));
        assert!(monitor.is_blocked("10.0.0.1"));

        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert!(!monitor.is_blocked("10.0.0.1"));
        assert!(monitor.blocked.read().unwrap().is_empty());
    }

    #[test]
    fn test_high_risk_source_is_blocked() {
        let (monitor, _) = monitor();
        monitor.analyze("10.0.0.1", "/api/ideas", "", None);
        for _ in 0..6 {
            monitor.record_outcome("10.0.0.1", 401);
        }
        // errors 6/1 (+25), auth 6 (+35), new source (+15)
        assert_eq!(monitor.assessment("10.0.0.1").unwrap().risk_score, 75);
        assert!(monitor.should_block("10.0.0.1"));
        assert!(!monitor.is_blocked("10.0.0.1"));
    }

    #[test]
    fn test_detect_anomalies_blocks_critical_sources() {
        let (monitor, _) = monitor();
        monitor.analyze("10.0.0.1", "/api/ideas", "", None);
        for _ in 0..11 {
            monitor.record_outcome("10.0.0.1", 401);
        }
        monitor.analyze("10.0.0.2", "/api/ideas", "", None);

        let anomalies = monitor.detect_anomalies();
        assert!(anomalies.contains(&Anomaly::HighAuthFailureRate { count: 11 }));
        assert!(anomalies.contains(&Anomaly::CriticalSource {
            ip_address: "10.0.0.1".to_string(),
            risk_score: 90,
        }));
        assert!(monitor.is_blocked("10.0.0.1"));
        assert!(!monitor.is_blocked("10.0.0.2"));
    }

    #[test]
    fn test_global_counters_roll_after_a_minute() {
        let (monitor, clock) = monitor();
        for _ in 0..6 {
            monitor.record_outcome("10.0.0.1", 500);
        }
        assert_eq!(monitor.report().metrics.error_count, 6);

        clock.advance(Duration::seconds(61));
        assert_eq!(monitor.report().metrics.error_count, 0);
    }

    #[test]
    fn test_cleanup_keeps_risky_sources() {
        let (monitor, clock) = monitor();
        monitor.analyze("10.0.0.1", "/api/ideas", "", None);
        monitor.analyze("10.0.0.2", "/api/ideas", "", None);
        for _ in 0..11 {
            monitor.record_outcome("10.0.0.2", 401);
        }

        clock.advance(Duration::minutes(30));
        assert_eq!(monitor.cleanup(), 0);

        clock.advance(Duration::hours(2));
        assert_eq!(monitor.cleanup(), 1);
        assert!(monitor.assessment("10.0.0.1").is_none());
        assert!(monitor.assessment("10.0.0.2").is_some());
    }

    #[test]
    fn test_report_lists_top_threats_by_score() {
        let (monitor, _) = monitor();
        let body = json!({ "q": "<script>x</script> ../ eval( admin password drop" });
        monitor.analyze("10.0.0.1", "/", "", Some(&body));
        monitor.analyze("10.0.0.2", "/", "", None);
        monitor.analyze("10.0.0.3", "/", "", Some(&json!({ "q": "drop admin password ../" })));

        let report = monitor.report();
        assert_eq!(report.total_threats, 3);
        let order: Vec<&str> = report
            .active_threats
            .iter()
            .map(|threat| threat.record.ip_address.as_str())
            .collect();
        assert_eq!(order, vec!["10.0.0.1", "10.0.0.3"]);
    }
}
