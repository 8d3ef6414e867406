//! The request pipeline.
//!
//! A request moves through [`RequestPipeline::screen`] before the handler runs
//! and [`RequestPipeline::complete`] after it. State that the stages share is
//! carried in an explicit [`RequestContext`].

use std::sync::Arc;
use std::time::{Duration, Instant};
use log::{debug, info, warn};
use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::{json, Map, Value};
use crate::core::audit::{AuditLogger, RequestOrigin, RiskLevel};
use crate::core::clock::Clock;
use crate::core::input_validator::{InputError, InputValidator};
use crate::core::performance::{normalize_endpoint, PerformanceMonitor};
use crate::core::rate_limiter::{RateLimitError, RateLimitTier, RateLimiter};
use crate::core::threat_monitor::{ThreatAssessment, ThreatMonitor};
use crate::models::{Config, ThreatConfig};
use crate::utils::{current_timestamp_millis, generate_id, is_auth_path};

/// Caller identity established by the authentication layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identity {
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub role: Option<String>,
}

/// What the pipeline needs to know about an inbound request
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    /// Source address
    pub source: String,
    pub method: String,
    pub path: String,
    /// Path plus query string
    pub url: String,
    pub user_agent: String,
    pub body: Option<Value>,
    /// Query string parameters as a JSON object
    pub query: Option<Value>,
    pub identity: Option<Identity>,
    pub session_id: Option<String>,
}

/// Per-request state threaded through the stages
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub info: RequestInfo,
    started: Instant,
    pub threat: Option<ThreatAssessment>,
    /// Set when the request was turned away as a brute-force attempt
    pub brute_force_rejected: bool,
}

impl RequestContext {
    pub fn origin(&self) -> RequestOrigin {
        RequestOrigin {
            ip_address: self.info.source.clone(),
            user_agent: self.info.user_agent.clone(),
            method: self.info.method.clone(),
            endpoint: self.info.path.clone(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

/// Fixed-shape rejection returned to the client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Denial {
    #[serde(skip)]
    pub status: u16,
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl Denial {
    pub fn access_denied() -> Self {
        Self {
            status: 403,
            error: "ACCESS_DENIED".to_string(),
            message: "Access denied due to security policy".to_string(),
            retry_after: None,
        }
    }

    /// Budget exhausted on `tier`
    pub fn rate_limited(tier: RateLimitTier, retry_after: u64) -> Self {
        let (error, message) = match tier {
            RateLimitTier::Auth => ("AUTH_RATE_LIMITED", "Too many authentication attempts, please try again later"),
            RateLimitTier::Api => ("API_RATE_LIMITED", "API rate limit exceeded, please try again later"),
            RateLimitTier::General => ("RATE_LIMITED", "Too many requests, please try again later"),
        };
        Self {
            status: 429,
            error: error.to_string(),
            message: message.to_string(),
            retry_after: Some(retry_after),
        }
    }

    /// Repeated failed logins

    pub fn auth_rate_limited(retry_after: u64) -> Self {
        Self {
            status: 429,
            error: "AUTH_RATE_LIMITED".to_string(),
            message: "Too many authentication attempts. Please try again later.".to_string(),
            retry_after: Some(retry_after),
        }
    }

    pub fn invalid_input(error: &InputError) -> Self {
        Self {
            status: 400,
            error: "INVALID_INPUT".to_string(),
            message: error.to_string(),
            retry_after: None,
        }
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self {
            status: 413,
            error: "PAYLOAD_TOO_LARGE".to_string(),
            message: format!("Request body exceeds {} bytes", limit),
            retry_after: None,
        }
    }

    pub fn session_required() -> Self {
        Self {
            status: 401,
            error: "SESSION_REQUIRED".to_string(),
            message: "Session ID required".to_string(),
            retry_after: None,
        }
    }

    pub fn session_invalid() -> Self {
        Self {
            status: 401,
            error: "SESSION_INVALID".to_string(),
            message: "Session expired or invalid".to_string(),
            retry_after: None,
        }
    }
}

/// Outcome of the pre-handler stages
#[derive(Debug, Clone, PartialEq)]
pub enum Screening {
    Proceed,
    /// Source is blocked; nothing further is recorded
    Blocked(Denial),
    /// Turned away after analysis; completion still runs for the denial
    Rejected(Denial),
}

pub struct RequestPipeline {
    threat: Arc<ThreatMonitor>,
    performance: Arc<PerformanceMonitor>,
    audit: Arc<AuditLogger>,
    rate_limiter: Arc<RateLimiter>,
    input: Arc<InputValidator>,
}

impl RequestPipeline {
    pub fn new(
        threat: Arc<ThreatMonitor>,
        performance: Arc<PerformanceMonitor>,
        audit: Arc<AuditLogger>,
        rate_limiter: Arc<RateLimiter>,
        input: Arc<InputValidator>,
    ) -> Self {
        Self {
            threat,
            performance,
            audit,
            rate_limiter,
            input,
        }
    }

    /// Build every service from configuration around a shared clock
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            Arc::new(ThreatMonitor::new(config.threat.clone(), clock.clone())),
            Arc::new(PerformanceMonitor::new(config.performance.clone(), clock.clone())),
            Arc::new(AuditLogger::new(config.audit.clone(), clock.clone())),
            Arc::new(RateLimiter::new(config.rate_limit.clone(), clock)),
            Arc::new(InputValidator::new(config.input.clone())),
        )
    }

    pub fn threat(&self) -> &Arc<ThreatMonitor> {
        &self.threat
    }

    pub fn performance(&self) -> &Arc<PerformanceMonitor> {
        &self.performance
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    fn threat_config(&self) -> &ThreatConfig {
        self.threat.config()
    }

    /// Start timing a request and assign its id
    pub fn begin(&self, info: RequestInfo) -> RequestContext {
        counter!("ideahub_requests_total", 1);
        RequestContext {
            request_id: generate_id("req", current_timestamp_millis()),
            info,
            started: Instant::now(),
            threat: None,
            brute_force_rejected: false,
        }
    }

    /// Deny blocked sources, otherwise analyze the request.
    pub async fn check_access(&self, ctx: &mut RequestContext) -> Option<Denial> {
        let source = ctx.info.source.clone();
        if self.threat.should_block(&source) {
            counter!("ideahub_requests_denied_total", 1, "reason" => "blocked");
            warn!("Denied request {} from blocked source {}", ctx.request_id, source);

            let mut details = Map::new();
            details.insert("ip".to_string(), json!(source));
            self.audit
                .log_security_event(&ctx.origin(), "BLOCKED_IP_ACCESS", details, Some(RiskLevel::Critical))
                .await;
            return Some(Denial::access_denied());
        }

        let assessment = self.threat.analyze(
            &source,
            &ctx.info.url,
            &ctx.info.user_agent,
            ctx.info.body.as_ref(),
        );

        if assessment.risk_score >= self.threat_config().high_risk_score {
            warn!(
                "High risk request {} from {} (score {})",
                ctx.request_id, source, assessment.risk_score
            );
            let mut details = Map::new();
            details.insert("riskScore".to_string(), json!(assessment.risk_score));
            details.insert(
                "suspiciousPatterns".to_string(),
                json!(assessment.record.suspicious_patterns),
            );
            self.audit
                .log_security_event(&ctx.origin(), "HIGH_RISK_REQUEST", details, Some(RiskLevel::High))
                .await;
        }

        ctx.threat = Some(assessment);
        None
    }

    /// Charge the request against its tier's budget
    pub fn check_rate_limit(&self, ctx: &RequestContext) -> Option<Denial> {
        let tier = RateLimitTier::classify(&ctx.info.path, &self.rate_limiter.config().api_prefix);
        match self.rate_limiter.check_rate_limit(tier, &ctx.info.source) {
            Ok(_) => None,
            Err(RateLimitError::ExceededLimit { tier, retry_after_seconds }) => {
                counter!("ideahub_requests_denied_total", 1, "reason" => "rate_limited");
                info!("Rate limited {} on {} tier", ctx.info.source, tier);
                Some(Denial::rate_limited(tier, retry_after_seconds))
            }
        }
    }

    /// Turn away sources that keep failing authentication.
    ///
    /// Only applies to authentication endpoints. Reads the assessment taken by
    /// [`check_access`](Self::check_access) when present, otherwise the
    /// monitor's current view of the source.
    pub async fn check_auth_attempts(&self, ctx: &mut RequestContext) -> Option<Denial> {
        if !is_auth_path(&ctx.info.path) {
            return None;
        }
        let assessment = ctx
            .threat
            .clone()
            .or_else(|| self.threat.assessment(&ctx.info.source))?;

        let config = self.threat_config();
        if assessment.record.auth_failure_count < config.brute_force_threshold {
            return None;
        }

        counter!("ideahub_requests_denied_total", 1, "reason" => "brute_force");
        self.threat
            .block(&ctx.info.source, Duration::from_secs(config.brute_force_block_seconds));

        let mut details = Map::new();
        details.insert("ip".to_string(), json!(ctx.info.source));
        details.insert("authFailures".to_string(), json!(assessment.record.auth_failure_count));
        details.insert("riskScore".to_string(), json!(assessment.risk_score));
        self.audit
            .log_security_event(&ctx.origin(), "BRUTE_FORCE_ATTEMPT", details, Some(RiskLevel::Critical))
            .await;

        ctx.brute_force_rejected = true;
        Some(Denial::auth_rate_limited(config.brute_force_block_seconds))
    }

    /// Refuse oversized or dangerous strings in the JSON body and query.
    ///
    /// Only JSON documents (objects and arrays) are walked; text bodies are
    /// left to the threat signatures.
    pub fn check_input(&self, ctx: &RequestContext) -> Option<Denial> {
        if !self.input.enabled() {
            return None;
        }
        let body = ctx
            .info
            .body
            .as_ref()
            .filter(|body| body.is_object() || body.is_array());
        let result = body
            .into_iter()
            .chain(ctx.info.query.as_ref())
            .try_for_each(|value| self.input.validate(value));

        match result {
            Ok(()) => None,
            Err(e) => {
                counter!("ideahub_requests_denied_total", 1, "reason" => "invalid_input");
                info!("Rejected input from {} on {}: {}", ctx.info.source, ctx.info.path, e);
                Some(Denial::invalid_input(&e))
            }
        }
    }

    /// Run every pre-handler stage in order
    pub async fn screen(&self, ctx: &mut RequestContext) -> Screening {
        if let Some(denial) = self.check_access(ctx).await {
            return Screening::Blocked(denial);
        }
        if let Some(denial) = self.check_rate_limit(ctx) {
            return Screening::Rejected(denial);
        }
        if let Some(denial) = self.check_auth_attempts(ctx).await {
            return Screening::Rejected(denial);
        }
        if let Some(denial) = self.check_input(ctx) {
            return Screening::Rejected(denial);
        }
        Screening::Proceed
    }

    pub fn record_timing(&self, ctx: &RequestContext) {
        let elapsed = ctx.elapsed_ms();
        self.performance.record_duration(&ctx.info.path, elapsed);
        histogram!("ideahub_request_duration_ms", elapsed, "endpoint" => normalize_endpoint(&ctx.info.path));
    }

    /// Feed the response status into the source's threat record
    pub fn record_threat_outcome(&self, ctx: &RequestContext, status: u16) {
        self.threat.record_outcome(&ctx.info.source, status);
        if ctx.brute_force_rejected {
            self.threat.record_auth_failure(&ctx.info.source);
        }
    }

    pub async fn record_audit(&self, ctx: &RequestContext, status: u16) {
        let identity = ctx.info.identity.as_ref();
        self.audit
            .log_api_request(
                &ctx.origin(),
                status,
                identity.and_then(|identity| identity.user_id),
                identity.and_then(|identity| identity.username.as_deref()),
                ctx.info.session_id.as_deref(),
            )
            .await;
    }

    /// Bookkeeping once the response status is known
    pub async fn complete(&self, ctx: &RequestContext, status: u16) {
        counter!("ideahub_responses_total", 1, "status" => status.to_string());
        self.record_timing(ctx);
        self.record_threat_outcome(ctx, status);
        self.record_audit(ctx, status).await;
        debug!(
            "{} {} -> {} in {:.1}ms ({})",
            ctx.info.method,
            ctx.info.path,
            status,
            ctx.elapsed_ms(),
            ctx.request_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audit::AuditEvent;
    use crate::core::clock::ManualClock;
    use chrono::Utc;
    use tempfile::TempDir;

    fn pipeline(dir: &TempDir) -> RequestPipeline {
        let mut config = Config::default();
        config.audit.directory = dir.path().to_string_lossy().into_owned();
        RequestPipeline::from_config(&config, Arc::new(ManualClock::new(Utc::now())))
    }

    fn audit_events(dir: &TempDir) -> Vec<AuditEvent> {
        std::fs::read_dir(dir.path())
            .unwrap()
            .flat_map(|entry| {
                std::fs::read_to_string(entry.unwrap().path())
                    .unwrap()
                    .lines()
                    .map(|line| serde_json::from_str(line).unwrap())
                    .collect::<Vec<AuditEvent>>()
            })
            .collect()
    }

    fn login(source: &str) -> RequestInfo {
        RequestInfo {
            source: source.to_string(),
            method: "POST".to_string(),
            path: "/api/auth/login".to_string(),
            url: "/api/auth/login".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            body: Some(json!({ "username": "alice", "password": "wrong-guess" })),
            ..RequestInfo::default()
        }
    }

    #[tokio::test]
    async fn test_repeated_failed_logins_are_rejected() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);

        for _ in 0..5 {
            let mut ctx = pipeline.begin(login("10.0.0.7"));
            assert_eq!(pipeline.screen(&mut ctx).await, Screening::Proceed);
            pipeline.complete(&ctx, 401).await;
        }

        let mut ctx = pipeline.begin(login("10.0.0.7"));
        let screening = pipeline.screen(&mut ctx).await;
        assert_eq!(screening, Screening::Rejected(Denial::auth_rate_limited(900)));
        pipeline.complete(&ctx, 429).await;

        let assessment = pipeline.threat().assessment("10.0.0.7").unwrap();
        assert_eq!(assessment.record.auth_failure_count, 6);
        assert!(assessment.risk_score >= 75);
        assert!(pipeline.threat().is_blocked("10.0.0.7"));

        let events = audit_events(&dir);
        assert!(events.iter().any(|event| {
            event.event.action == "SECURITY_BRUTE_FORCE_ATTEMPT" && event.event.risk_level == RiskLevel::Critical
        }));
        assert_eq!(events.iter().filter(|event| event.event.action == "API_REQUEST").count(), 6);
    }

    #[tokio::test]
    async fn test_blocked_source_skips_completion() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        pipeline.threat().block("10.0.0.8", Duration::from_secs(60));

        let mut ctx = pipeline.begin(RequestInfo {
            source: "10.0.0.8".to_string(),
            method: "GET".to_string(),
            path: "/api/ideas".to_string(),
            url: "/api/ideas".to_string(),
            ..RequestInfo::default()
        });
        assert_eq!(pipeline.screen(&mut ctx).await, Screening::Blocked(Denial::access_denied()));
        assert!(ctx.threat.is_none());
        assert!(pipeline.threat().assessment("10.0.0.8").is_none());

        let events = audit_events(&dir);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.action, "SECURITY_BLOCKED_IP_ACCESS");
        assert_eq!(events[0].event.risk_level, RiskLevel::Critical);
    }

    #[tokio::test]
    async fn test_rate_limit_rejection() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.audit.directory = dir.path().to_string_lossy().into_owned();
        config.rate_limit.general.max_requests = 1;
        let pipeline = RequestPipeline::from_config(&config, Arc::new(ManualClock::new(Utc::now())));

        let info = RequestInfo {
            source: "10.0.0.9".to_string(),
            method: "GET".to_string(),
            path: "/about".to_string(),
            url: "/about".to_string(),
            ..RequestInfo::default()
        };
        let mut first = pipeline.begin(info.clone());
        assert_eq!(pipeline.screen(&mut first).await, Screening::Proceed);

        let mut second = pipeline.begin(info);
        match pipeline.screen(&mut second).await {
            Screening::Rejected(denial) => {
                assert_eq!(denial.status, 429);
                assert_eq!(denial.error, "RATE_LIMITED");
                assert_eq!(denial.retry_after, Some(900));
            }
            other => panic!("unexpected screening {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_completion_records_identity() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        let mut ctx = pipeline.begin(RequestInfo {
            source: "10.0.0.10".to_string(),
            method: "POST".to_string(),
            path: "/api/ideas/12/votes".to_string(),
            url: "/api/ideas/12/votes".to_string(),
            identity: Some(Identity {
                user_id: Some(12),
                username: Some("bob".to_string()),
                role: Some("member".to_string()),
            }),
            session_id: Some("sess-1".to_string()),
            ..RequestInfo::default()
        });
        assert_eq!(pipeline.screen(&mut ctx).await, Screening::Proceed);
        pipeline.complete(&ctx, 201).await;

        let events = audit_events(&dir);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.user_id, Some(12));
        assert_eq!(events[0].event.username.as_deref(), Some("bob"));
        assert_eq!(events[0].event.session_id.as_deref(), Some("sess-1"));
        assert_eq!(events[0].event.risk_level, RiskLevel::Medium);
        assert_eq!(
            pipeline.performance().endpoint_snapshot()["/api/ideas/:id/votes"].count,
            1
        );
    }

    #[test]
    fn test_denial_body_shape() {
        let body = serde_json::to_value(Denial::rate_limited(RateLimitTier::General, 30)).unwrap();
        assert_eq!(
            body,
            json!({
                "error": "RATE_LIMITED",
                "message": "Too many requests, please try again later",
                "retryAfter": 30
            })
        );
        let body = serde_json::to_value(Denial::access_denied()).unwrap();
        assert!(body.get("retryAfter").is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_codes_follow_tier() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.audit.directory = dir.path().to_string_lossy().into_owned();
        config.rate_limit.auth.max_requests = 1;
        config.rate_limit.api.max_requests = 1;
        let pipeline = RequestPipeline::from_config(&config, Arc::new(ManualClock::new(Utc::now())));

        for (path, code) in [("/api/auth/register", "AUTH_RATE_LIMITED"), ("/api/ideas", "API_RATE_LIMITED")] {
            let info = RequestInfo {
                source: "10.0.0.11".to_string(),
                method: "GET".to_string(),
                path: path.to_string(),
                url: path.to_string(),
                ..RequestInfo::default()
            };
            assert!(pipeline.check_rate_limit(&pipeline.begin(info.clone())).is_none());
            let denial = pipeline.check_rate_limit(&pipeline.begin(info)).unwrap();
            assert_eq!(denial.status, 429);
            assert_eq!(denial.error, code);
        }
    }

    #[tokio::test]
    async fn test_dangerous_input_is_rejected_after_analysis() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);

        let mut ctx = pipeline.begin(RequestInfo {
            source: "10.0.0.12".to_string(),
            method: "POST".to_string(),
            path: "/api/ideas".to_string(),
            url: "/api/ideas".to_string(),
            body: Some(json!({ "title": "Idea", "content": "<script>alert(1)</script>" })),
            ..RequestInfo::default()
        });
        match pipeline.screen(&mut ctx).await {
            Screening::Rejected(denial) => {
                assert_eq!(denial.status, 400);
                assert_eq!(denial.error, "INVALID_INPUT");
                assert_eq!(denial.message, "Input contains potentially dangerous content");
            }
            other => panic!("unexpected screening {:?}", other),
        }
        let assessment = ctx.threat.as_ref().unwrap();
        assert!(assessment.record.suspicious_patterns.contains(crate::core::threat_monitor::XSS_SCRIPT));
    }

    #[tokio::test]
    async fn test_query_and_body_limits() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        let info = RequestInfo {
            source: "10.0.0.13".to_string(),
            method: "GET".to_string(),
            path: "/api/ideas".to_string(),
            url: "/api/ideas".to_string(),
            ..RequestInfo::default()
        };

        let ctx = pipeline.begin(RequestInfo {
            query: Some(json!({ "q": "x".repeat(5001) })),
            ..info.clone()
        });
        assert_eq!(pipeline.check_input(&ctx).unwrap().message, "String length exceeds maximum of 5000 characters");

        let ids: Vec<u32> = (0..51).collect();
        let ctx = pipeline.begin(RequestInfo {
            body: Some(json!({ "ids": ids })),
            ..info.clone()
        });
        assert_eq!(pipeline.check_input(&ctx).unwrap().error, "INVALID_INPUT");

        // Text bodies are not walked
        let ctx = pipeline.begin(RequestInfo {
            body: Some(Value::String("javascript:void(0)".to_string())),
            ..info
        });
        assert!(pipeline.check_input(&ctx).is_none());
    }
}
