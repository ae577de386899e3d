//! Audit record construction.
//!
//! Every dispatched operation finalizes and sends exactly one audit record,
//! on every exit path. The record accumulates through a builder; the
//! transport behind [`AuditSink`] is an external collaborator.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::context::RequestId;
use crate::policy::Verb;
use crate::types::ResourceReference;

/// How a dispatched operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The operation completed.
    Success,
    /// A recognized business failure (stale preconditions, missing object,
    /// denied policy).
    MinorFail,
    /// An unexpected fault.
    SeriousFail,
}

/// What happened to an object named in an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectLifecycle {
    /// The object was created.
    Creation,
    /// The object was modified.
    Amendment,
    /// The object was read or returned.
    Disclosure,
    /// The object was soft-deleted.
    LogicalDeletion,
    /// The object was permanently erased.
    PermanentErasure,
}

/// Sensitivity classification of the audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    /// Ordinary data.
    #[default]
    Normal,
    /// Restricted data; downstream consumers may redact.
    Restricted,
}

/// One object named in an audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditedObject {
    /// What happened to the object.
    pub lifecycle: ObjectLifecycle,
    /// The object.
    pub reference: ResourceReference,
}

/// A finalized audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Event type label (e.g. `protocol-read`).
    pub event_type: String,
    /// The dispatched verb.
    pub action: Verb,
    /// How the operation ended.
    pub outcome: AuditOutcome,
    /// Sensitivity classification.
    pub sensitivity: Sensitivity,
    /// The objects disclosed, amended or deleted.
    pub objects: Vec<AuditedObject>,
    /// Correlating request id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// When the record was finalized.
    pub recorded_at: DateTime<Utc>,
}

/// Accumulating builder for one operation's audit record.
#[derive(Debug, Clone)]
pub struct AuditRecordBuilder {
    event_type: String,
    action: Verb,
    outcome: AuditOutcome,
    sensitivity: Sensitivity,
    objects: Vec<AuditedObject>,
    request_id: Option<RequestId>,
}

impl AuditRecordBuilder {
    /// Starts a record for a verb.
    #[must_use]
    pub fn new(action: Verb) -> Self {
        Self {
            event_type: format!("protocol-{}", action.name()),
            action,
            outcome: AuditOutcome::Success,
            sensitivity: Sensitivity::Normal,
            objects: Vec::new(),
            request_id: None,
        }
    }

    /// Overrides the event type label.
    #[must_use]
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    /// Sets the correlating request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Sets the sensitivity classification.
    #[must_use]
    pub fn with_sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    /// Records one affected object.
    pub fn add_object(&mut self, lifecycle: ObjectLifecycle, reference: ResourceReference) {
        self.objects.push(AuditedObject {
            lifecycle,
            reference,
        });
    }

    /// Records a set of affected objects under one lifecycle.
    pub fn add_objects<I>(&mut self, lifecycle: ObjectLifecycle, references: I)
    where
        I: IntoIterator<Item = ResourceReference>,
    {
        for reference in references {
            self.add_object(lifecycle, reference);
        }
    }

    /// Sets the outcome.
    pub fn set_outcome(&mut self, outcome: AuditOutcome) {
        self.outcome = outcome;
    }

    /// Finalizes the record.
    #[must_use]
    pub fn build(self) -> AuditRecord {
        AuditRecord {
            event_type: self.event_type,
            action: self.action,
            outcome: self.outcome,
            sensitivity: self.sensitivity,
            objects: self.objects,
            request_id: self.request_id,
            recorded_at: Utc::now(),
        }
    }

    /// Finalizes and sends the record.
    pub fn send(self, sink: &dyn AuditSink) {
        sink.send(self.build());
    }
}

/// The audit transport collaborator.
pub trait AuditSink: Send + Sync {
    /// Accepts one finalized record.
    fn send(&self, record: AuditRecord);
}

/// Sink that emits records as structured log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn send(&self, record: AuditRecord) {
        tracing::info!(
            event_type = %record.event_type,
            action = %record.action,
            outcome = ?record.outcome,
            objects = record.objects.len(),
            "audit"
        );
    }
}

/// Sink that buffers records in memory for inspection.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything sent so far.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// Number of records sent.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` when nothing was sent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AuditSink for RecordingAuditSink {
    fn send(&self, record: AuditRecord) {
        self.records.lock().push(record);
    }
}
