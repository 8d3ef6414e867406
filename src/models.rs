use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Take the client address from `X-Forwarded-For` when the peer is a trusted proxy
    pub trust_proxy: bool,
    /// Proxy addresses allowed to supply `X-Forwarded-For`, exact or CIDR
    pub trusted_proxies: Vec<String>,
    /// Number of trusted proxies in front of the service
    pub proxy_hops: usize,
    /// Largest request body buffered for inspection (bytes)
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            trust_proxy: false,
            trusted_proxies: vec!["127.0.0.1".to_string(), "::1".to_string()],
            proxy_hops: 1,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Seconds to wait for the initial connection before falling back
    pub connect_timeout_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connect_timeout_seconds: 2,
        }
    }
}

/// Score contributions used by the threat monitor.
///
/// Thresholds are strict (`>`), matching how the counters are compared when
/// the score is computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    /// Requests per minute above which the moderate rate score applies
    pub request_rate_moderate: f64,
    /// Requests per minute above which the high rate score applies
    pub request_rate_high: f64,
    pub request_rate_moderate_score: u32,
    pub request_rate_high_score: u32,
    /// Error ratio above which the moderate error score applies
    pub error_ratio_moderate: f64,
    /// Error ratio above which the high error score applies
    pub error_ratio_high: f64,
    pub error_ratio_moderate_score: u32,
    pub error_ratio_high_score: u32,
    /// Authentication failures above which the moderate auth score applies
    pub auth_failures_moderate: u64,
    /// Authentication failures above which the high auth score applies
    pub auth_failures_high: u64,
    pub auth_failures_moderate_score: u32,
    pub auth_failures_high_score: u32,
    /// Added once per distinct matched signature
    pub pattern_score: u32,
    /// Sources first seen less than this many seconds ago are "new"
    pub new_source_seconds: i64,
    pub new_source_score: u32,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            request_rate_moderate: 50.0,
            request_rate_high: 100.0,
            request_rate_moderate_score: 15,
            request_rate_high_score: 30,
            error_ratio_moderate: 0.2,
            error_ratio_high: 0.5,
            error_ratio_moderate_score: 10,
            error_ratio_high_score: 25,
            auth_failures_moderate: 5,
            auth_failures_high: 10,
            auth_failures_moderate_score: 35,
            auth_failures_high_score: 50,
            pattern_score: 10,
            new_source_seconds: 5 * 60,
            new_source_score: 15,
        }
    }
}

/// Threat monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatConfig {
    /// Score at which a source is treated as high risk (and denied)
    pub high_risk_score: u8,
    /// Score at which the anomaly sweep blocks a source outright
    pub critical_risk_score: u8,
    /// Records at or above this score survive the cleanup sweep and show up in reports
    pub interesting_score: u8,
    /// Global requests per minute before an anomaly is reported
    pub max_requests_per_minute: u64,
    /// Global errors per minute before an anomaly is reported
    pub max_errors_per_minute: u64,
    /// Global authentication failures per minute before an anomaly is reported
    pub max_auth_failures_per_minute: u64,
    /// Block duration applied by the anomaly sweep (seconds)
    pub block_duration_seconds: u64,
    /// Failed authentications after which auth endpoints reject the source
    pub brute_force_threshold: u64,
    /// Block duration applied on a brute-force rejection (seconds)
    pub brute_force_block_seconds: u64,
    /// Idle time after which low-risk records are evicted (seconds)
    pub record_retention_seconds: i64,
    /// Number of sources listed in the security report
    pub report_top_sources: usize,
    pub weights: RiskWeights,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            high_risk_score: 75,
            critical_risk_score: 90,
            interesting_score: 50,
            max_requests_per_minute: 1000,
            max_errors_per_minute: 50,
            max_auth_failures_per_minute: 5,
            block_duration_seconds: 60 * 60,
            brute_force_threshold: 5,
            brute_force_block_seconds: 15 * 60,
            record_retention_seconds: 60 * 60,
            report_top_sources: 10,
            weights: RiskWeights::default(),
        }
    }
}

/// A single rate limit budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierLimit {
    /// Requests allowed per window
    pub max_requests: u32,
    /// Time window in seconds
    pub window_seconds: u32,
}

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Paths starting with this prefix use the api budget
    pub api_prefix: String,
    /// Authentication endpoints
    pub auth: TierLimit,
    /// General API endpoints
    pub api: TierLimit,
    /// Everything else
    pub general: TierLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            api_prefix: "/api".to_string(),
            auth: TierLimit {
                max_requests: 500,
                window_seconds: 15 * 60,
            },
            api: TierLimit {
                max_requests: 10_000,
                window_seconds: 15 * 60,
            },
            general: TierLimit {
                max_requests: 1000,
                window_seconds: 15 * 60,
            },
        }
    }
}

/// Input validation limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub enabled: bool,
    /// Longest accepted string, in characters
    pub max_string_length: usize,
    /// Most items accepted in one array
    pub max_array_length: usize,
    /// Rejected content, matched case-insensitively
    pub blocked_patterns: Vec<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_string_length: 5000,
            max_array_length: 50,
            blocked_patterns: vec![
                r"(?s)<script\b[^>]*>.*?</script>".to_string(),
                r"javascript:".to_string(),
                r"on\w+\s*=".to_string(),
                r"data:text/html".to_string(),
                r"vbscript:".to_string(),
            ],
        }
    }
}

/// Performance monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Requests slower than this count as slow (ms)
    pub slow_threshold_ms: f64,
    /// Rolling window for duration samples (seconds)
    pub window_seconds: i64,
    /// Resident memory ceiling for the health check (MiB)
    pub memory_ceiling_mb: u64,
    /// Average response time ceiling for the health check (ms)
    pub max_average_ms: f64,
    /// Maximum fraction of slow requests for the health check
    pub max_slow_fraction: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            slow_threshold_ms: 1000.0,
            window_seconds: 5 * 60,
            memory_ceiling_mb: 512,
            max_average_ms: 500.0,
            max_slow_fraction: 0.1,
        }
    }
}

/// Audit logger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Directory holding the daily audit files
    pub directory: String,
    /// Size after which the current file is rotated (bytes)
    pub max_file_size_bytes: u64,
    /// Number of audit files kept by the retention sweep
    pub max_files: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            directory: "logs/audit".to_string(),
            max_file_size_bytes: 100 * 1024 * 1024,
            max_files: 365,
        }
    }
}

/// Session store selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// Redis when reachable, in-memory otherwise
    Auto,
    Redis,
    Memory,
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub backend: SessionBackend,
    /// Inactivity after which a session is invalid (seconds)
    pub max_inactive_seconds: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackend::Auto,
            max_inactive_seconds: 24 * 60 * 60,
        }
    }
}

/// Periodic maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Whether to run the background sweeps
    pub enabled: bool,
    pub anomaly_interval_seconds: u64,
    pub threat_cleanup_interval_seconds: u64,
    pub metrics_sweep_interval_seconds: u64,
    pub audit_retention_interval_seconds: u64,
    pub session_cleanup_interval_seconds: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            anomaly_interval_seconds: 60,
            threat_cleanup_interval_seconds: 60 * 60,
            metrics_sweep_interval_seconds: 5 * 60,
            audit_retention_interval_seconds: 24 * 60 * 60,
            session_cleanup_interval_seconds: 60 * 60,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Redis configuration
    pub redis: RedisConfig,
    /// Threat monitor configuration
    pub threat: ThreatConfig,
    /// Rate limit configuration
    pub rate_limit: RateLimitConfig,
    /// Input validation configuration
    pub input: InputConfig,
    /// Performance monitor configuration
    pub performance: PerformanceConfig,
    /// Audit logger configuration
    pub audit: AuditConfig,
    /// Session configuration
    pub session: SessionConfig,
    /// Maintenance configuration
    pub maintenance: MaintenanceConfig,
}
