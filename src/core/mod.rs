//! Core functionality for the IdeaHub guard.
//!
//! This module contains the core components of the service,
//! including threat monitoring, performance tracking, audit logging,
//! rate limiting, input validation, sessions, and the request pipeline that composes them.

pub mod audit;
pub mod clock;
pub mod input_validator;
pub mod maintenance;
pub mod performance;
pub mod pipeline;
pub mod rate_limiter;
pub mod session;
pub mod threat_monitor;

pub use audit::{AuditEvent, AuditLogger, NewAuditEvent, RequestOrigin, RiskLevel};
pub use clock::{Clock, ManualClock, SystemClock};
pub use input_validator::{InputError, InputValidator};
pub use maintenance::{Maintenance, MaintenanceReport};
pub use performance::{normalize_endpoint, PerformanceMonitor};
pub use pipeline::{Denial, Identity, RequestContext, RequestInfo, RequestPipeline, Screening};
pub use rate_limiter::{RateLimitTier, RateLimiter};
pub use session::{SessionManager, SessionRecord, SessionStore};
pub use threat_monitor::{Anomaly, SecurityReport, ThreatAssessment, ThreatMonitor};
