//! Audit trail for entitlement state transitions
//!
//! Each event is one JSON object per line. Without a configured file the
//! events still reach the `tracing` output at info level.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::entitlement::model::{Identity, SlotName};

/// Audit event types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    GrantCreated,
    GrantRevoked,
    GrantRefunded,
    /// A retrieval reference was minted
    DownloadIssued,
    /// A reserved download unit was given back after a failed delivery
    QuotaReleased,
}

/// One audited transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    /// Node that performed the transition
    pub node_id: String,
    pub identity: Option<String>,
    pub asset_id: Option<String>,
    pub grant_id: Option<String>,
    pub slot: Option<SlotName>,
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, node_id: String) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            node_id,
            identity: None,
            asset_id: None,
            grant_id: None,
            slot: None,
            reason: None,
            expires_at: None,
        }
    }

    pub fn with_identity(mut self, identity: &Identity) -> Self {
        self.identity = Some(identity.as_str().to_string());
        self
    }

    pub fn with_asset(mut self, asset_id: &str) -> Self {
        self.asset_id = Some(asset_id.to_string());
        self
    }

    pub fn with_grant(mut self, grant_id: &str) -> Self {
        self.grant_id = Some(grant_id.to_string());
        self
    }

    pub fn with_slot(mut self, slot: SlotName) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Convert to JSONL line
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Audit logger that appends events to a JSONL file
#[derive(Clone)]
pub struct AuditLogger {
    inner: Arc<Mutex<AuditLoggerInner>>,
    node_id: String,
}

struct AuditLoggerInner {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

impl AuditLogger {
    pub fn new(node_id: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AuditLoggerInner {
                writer: None,
                path: None,
            })),
            node_id,
        }
    }

    /// Initialize file logging to the specified path
    pub async fn init_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut inner = self.inner.lock().await;
        inner.writer = Some(BufWriter::new(file));
        inner.path = Some(path.clone());

        info!("Audit logging initialized to {}", path.display());
        Ok(())
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Start an event stamped with this node's id
    pub fn event(&self, event_type: AuditEventType) -> AuditEvent {
        AuditEvent::new(event_type, self.node_id.clone())
    }

    /// Record an event. Audit failures are logged, never propagated.
    pub async fn log(&self, event: AuditEvent) {
        info!(
            event_type = ?event.event_type,
            identity = event.identity.as_deref(),
            asset_id = event.asset_id.as_deref(),
            grant_id = event.grant_id.as_deref(),
            slot = event.slot.map(SlotName::as_str),
            reason = event.reason.as_deref(),
            "audit"
        );

        let jsonl = match event.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        let mut inner = self.inner.lock().await;

        if let Some(ref mut writer) = inner.writer {
            if let Err(e) = writeln!(writer, "{}", jsonl) {
                error!("Failed to write audit event: {}", e);
            }
            if let Err(e) = writer.flush() {
                error!("Failed to flush audit log: {}", e);
            }
        }
    }

    /// Current log file path
    pub async fn path(&self) -> Option<PathBuf> {
        self.inner.lock().await.path.clone()
    }
}
