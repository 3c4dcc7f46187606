//! Unmask audit events and the sinks that receive them.
//!
//! An event is emitted only when an override reveals a value the masking
//! strategy would otherwise have changed. Sinks are fire-and-forget from the
//! engine's point of view: a failing sink is logged and never blocks or fails
//! the masking decision.
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  MaskingEngine  │────>│   AuditSink     │────>│ log / channel / │
//! │ (override path) │     │                 │     │ durable store   │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use super::target::{MaskingTarget, OverrideKind};

/// Default capacity of the broadcast sink before slow receivers lag.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Raw data crossed the masking boundary because of an override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmaskAuditEvent {
    pub event_time: DateTime<Utc>,
    pub subject_type: String,
    pub data_kind: String,
    pub field_name: Option<String>,
    pub row_id: Option<String>,
    pub requester_roles: Vec<String>,
    pub override_kind: OverrideKind,
    pub reason: Option<String>,
}

impl UnmaskAuditEvent {
    pub fn from_target(
        target: &MaskingTarget,
        field_name: Option<&str>,
        override_kind: OverrideKind,
    ) -> Self {
        Self {
            event_time: Utc::now(),
            subject_type: target.subject_type.clone(),
            data_kind: target.data_kind.clone(),
            field_name: field_name.map(str::to_string),
            row_id: target.row_id.clone(),
            requester_roles: target.requester_roles.clone(),
            override_kind,
            reason: target.reason.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Receives unmask audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: UnmaskAuditEvent) -> Result<(), AuditError>;
}

/// Writes events as structured log records on the `accessgate::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: UnmaskAuditEvent) -> Result<(), AuditError> {
        tracing::info!(
            target: "accessgate::audit",
            event_time = %event.event_time,
            subject_type = %event.subject_type,
            data_kind = %event.data_kind,
            field = ?event.field_name,
            row_id = ?event.row_id,
            roles = ?event.requester_roles,
            override_kind = %event.override_kind,
            reason = ?event.reason,
            "Masked value revealed by override"
        );
        Ok(())
    }
}

/// Publishes events to any number of subscribers over a broadcast channel.
///
/// Events published while nobody is subscribed are dropped and reported as
/// [`AuditError::Unavailable`].
#[derive(Debug, Clone)]
pub struct BroadcastAuditSink {
    sender: broadcast::Sender<UnmaskAuditEvent>,
}

impl BroadcastAuditSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UnmaskAuditEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for BroadcastAuditSink {
    fn record(&self, event: UnmaskAuditEvent) -> Result<(), AuditError> {
        self.sender
            .send(event)
            .map(|_| ())
            .map_err(|_| AuditError::Unavailable("no audit subscribers".to_string()))
    }
}

/// Keeps events in memory, for tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<UnmaskAuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UnmaskAuditEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: UnmaskAuditEvent) -> Result<(), AuditError> {
        self.events.lock().push(event);
        Ok(())
    }
}
