//! Compliance audit trail.
//!
//! Events are appended as JSON lines to `audit-YYYY-MM-DD.log` inside the
//! configured directory. A file that grows past the size ceiling is renamed
//! to `audit-YYYY-MM-DD-<millis>.log` before the next write, and the retention
//! sweep deletes the oldest files beyond the configured count.
//!
//! Writing never fails the caller: I/O and serialization errors are reported
//! through `log::error!` and the event is dropped.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use crate::core::clock::Clock;
use crate::models::AuditConfig;
use crate::utils::{generate_id, is_admin_path, is_auth_path};

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditStatus {
    #[default]
    Success,
    Failure,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceTags {
    pub pci_dss: bool,
    pub sox: bool,
    pub gdpr: bool,
}

impl Default for ComplianceTags {
    fn default() -> Self {
        Self {
            pci_dss: true,
            sox: true,
            gdpr: true,
        }
    }
}

/// Event as supplied by callers, before it is stamped
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAuditEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
    pub method: String,
    pub endpoint: String,
    pub status: AuditStatus,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
    pub risk_level: RiskLevel,
    pub compliance: ComplianceTags,
}

/// A persisted audit event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_id: String,
    #[serde(flatten)]
    pub event: NewAuditEvent,
}

/// Where a request came from, as recorded on its audit events
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOrigin {
    pub ip_address: String,
    pub user_agent: String,
    pub method: String,
    pub endpoint: String,
}

impl RequestOrigin {
    fn event(&self, action: &str, resource_type: &str) -> NewAuditEvent {
        NewAuditEvent {
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
            method: self.method.clone(),
            endpoint: self.endpoint.clone(),
            ..NewAuditEvent::default()
        }
    }
}

/// Risk of a completed API request, from its path, method and status.
pub fn determine_risk_level(path: &str, method: &str, status_code: u16) -> RiskLevel {
    if is_auth_path(path) {
        return RiskLevel::Medium;
    }
    if is_admin_path(path) {
        return RiskLevel::High;
    }
    if status_code >= 400 {
        return RiskLevel::High;
    }
    match method {
        "POST" | "PUT" | "PATCH" | "DELETE" => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

pub struct AuditLogger {
    config: AuditConfig,
    clock: Arc<dyn Clock>,
    writer: Mutex<()>,
}

impl AuditLogger {
    pub fn new(config: AuditConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            writer: Mutex::new(()),
        }
    }

    pub fn directory(&self) -> &Path {
        Path::new(&self.config.directory)
    }

    fn daily_file(&self, now: DateTime<Utc>) -> PathBuf {
        self.directory()
            .join(format!("audit-{}.log", now.format("%Y-%m-%d")))
    }

    /// Stamp and persist an event, returning the stored form.
    pub async fn log_event(&self, event: NewAuditEvent) -> AuditEvent {
        let now = self.clock.now();
        let event = AuditEvent {
            timestamp: now,
            event_id: generate_id("audit", now.timestamp_millis()),
            event,
        };

        if event.event.risk_level == RiskLevel::Critical {
            error!(
                "CRITICAL SECURITY EVENT: {} from {} on {} ({})",
                event.event.action, event.event.ip_address, event.event.endpoint, event.event_id
            );
        }

        if let Err(e) = self.append(&event).await {
            error!("Failed to write audit event {}: {}", event.event_id, e);
        }
        event
    }

    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let _writer = self.writer.lock().await;
        fs::create_dir_all(self.directory()).await?;
        let path = self.daily_file(event.timestamp);
        self.rotate_if_needed(&path, event.timestamp).await?;

        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn rotate_if_needed(&self, path: &Path, now: DateTime<Utc>) -> Result<(), AuditError> {
        match fs::metadata(path).await {
            Ok(metadata) if metadata.len() > self.config.max_file_size_bytes => {
                let stem = format!("audit-{}-{}", now.format("%Y-%m-%d"), now.timestamp_millis());
                let mut rotated = self.directory().join(format!("{}.log", stem));
                let mut suffix = 1;
                // never rename over an earlier rotation
                while fs::try_exists(&rotated).await? {
                    rotated = self.directory().join(format!("{}-{}.log", stem, suffix));
                    suffix += 1;
                }
                fs::rename(path, &rotated).await?;
                info!("Rotated audit log to {}", rotated.display());
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the oldest audit files beyond the retention count.
    pub async fn enforce_retention(&self) -> Result<usize, AuditError> {
        let _writer = self.writer.lock().await;

        let mut entries = match fs::read_dir(self.directory()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("audit-") && name.ends_with(".log") {
                names.push(name);
            }
        }
        names.sort_unstable_by(|a, b| b.cmp(a));

        let mut removed = 0;
        for name in names.iter().skip(self.config.max_files) {
            match fs::remove_file(self.directory().join(name)).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove audit file {}: {}", name, e),
            }
        }
        if removed > 0 {
            info!("Removed {} expired audit files", removed);
        }
        Ok(removed)
    }

    pub async fn log_authentication_attempt(
        &self,
        origin: &RequestOrigin,
        success: bool,
        user_id: Option<i64>,
        username: Option<&str>,
    ) -> AuditEvent {
        let action = if success { "LOGIN_SUCCESS" } else { "LOGIN_FAILURE" };
        self.log_event(NewAuditEvent {
            user_id,
            username: username.map(str::to_string),
            status: if success { AuditStatus::Success } else { AuditStatus::Failure },
            status_code: if success { 200 } else { 401 },
            risk_level: if success { RiskLevel::Low } else { RiskLevel::Medium },
            ..origin.event(action, "AUTHENTICATION")
        })
        .await
    }

    pub async fn log_data_access(
        &self,
        origin: &RequestOrigin,
        resource_type: &str,
        resource_id: &str,
        user_id: Option<i64>,
    ) -> AuditEvent {
        self.log_event(NewAuditEvent {
            user_id,
            resource_id: Some(resource_id.to_string()),
            status_code: 200,
            ..origin.event("DATA_ACCESS", &resource_type.to_uppercase())
        })
        .await
    }

    pub async fn log_data_modification(
        &self,
        origin: &RequestOrigin,
        resource_type: &str,
        resource_id: &str,
        user_id: Option<i64>,
        changes: Option<Map<String, Value>>,
    ) -> AuditEvent {
        self.log_event(NewAuditEvent {
            user_id,
            resource_id: Some(resource_id.to_string()),
            status_code: 200,
            details: changes,
            risk_level: RiskLevel::Medium,
            ..origin.event("DATA_MODIFICATION", &resource_type.to_uppercase())
        })
        .await
    }

    /// Record a security event as `SECURITY_<TYPE>`. Risk defaults to HIGH.
    pub async fn log_security_event(
        &self,
        origin: &RequestOrigin,
        event_type: &str,
        details: Map<String, Value>,
        risk_level: Option<RiskLevel>,
    ) -> AuditEvent {
        let action = format!("SECURITY_{}", event_type.to_uppercase());
        self.log_event(NewAuditEvent {
            status: AuditStatus::Error,
            status_code: 403,
            details: Some(details),
            risk_level: risk_level.unwrap_or(RiskLevel::High),
            ..origin.event(&action, "SECURITY")
        })
        .await
    }

    pub async fn log_api_request(
        &self,
        origin: &RequestOrigin,
        status_code: u16,
        user_id: Option<i64>,
        username: Option<&str>,
        session_id: Option<&str>,
    ) -> AuditEvent {
        self.log_event(NewAuditEvent {
            user_id,
            username: username.map(str::to_string),
            session_id: session_id.map(str::to_string),
            status: if status_code >= 400 { AuditStatus::Error } else { AuditStatus::Success },
            status_code,
            risk_level: determine_risk_level(&origin.endpoint, &origin.method, status_code),
            ..origin.event("API_REQUEST", "API")
        })
        .await
    }
}
