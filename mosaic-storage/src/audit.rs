//! Audit sinks for change events.

use chrono::Utc;
use mosaic_core::{AuditRecord, ChangeEvent};
use std::sync::Mutex;

/// Receives change events after a mutation succeeded. Fire-and-forget:
/// a sink cannot fail the operation that produced the event.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: ChangeEvent);
}

/// Writes every event to the `mosaic::audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: ChangeEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => tracing::info!(target: "mosaic::audit", event = event.name(), %payload, "change recorded"),
            Err(e) => tracing::warn!(target: "mosaic::audit", event = event.name(), error = %e, "change recorded without payload"),
        }
    }
}

/// Keeps events in memory. Used by tests and local tooling.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.records().into_iter().map(|r| r.event).collect()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: ChangeEvent) {
        let record = AuditRecord {
            at: Utc::now(),
            event,
        };
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::{EntityId, EntityIdType};

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingAuditSink::new();
        let id = EntityId::now_v7();
        sink.record(ChangeEvent::EntityUpdated { entity_id: id });
        sink.record(ChangeEvent::EntityDeleted { entity_id: id, hard: false });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name(), "entity_updated");
        assert_eq!(events[1].name(), "entity_deleted");
    }

    #[test]
    fn test_tracing_sink_never_panics() {
        TracingAuditSink.record(ChangeEvent::OrphansSwept { relations_removed: 0 });
    }
}
