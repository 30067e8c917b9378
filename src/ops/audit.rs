use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::event;

/// Bounded so a flood of refused clients cannot grow the trail forever.
const AUDIT_CAPACITY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub event_type: String,
    pub client_id: String,
    pub message: String,
}

#[derive(Clone, Default)]
pub struct AuditSink {
    inner: Arc<Mutex<VecDeque<AuditEvent>>>,
}

impl AuditSink {
    pub fn record(&self, event: AuditEvent) {
        if let Ok(mut guard) = self.inner.lock() {
            if guard.len() >= AUDIT_CAPACITY {
                guard.pop_front();
            }
            guard.push_back(event);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static AUDIT_SINK: OnceLock<AuditSink> = OnceLock::new();

pub fn sink_len() -> usize {
    AUDIT_SINK.get().map(|s| s.len()).unwrap_or(0)
}

/// Copy of the recorded audit events, oldest first.
pub fn snapshot() -> Vec<AuditEvent> {
    AUDIT_SINK
        .get()
        .and_then(|s| s.inner.lock().ok().map(|g| g.iter().cloned().collect()))
        .unwrap_or_default()
}

pub fn events_for(client_id: &str) -> Vec<AuditEvent> {
    snapshot()
        .into_iter()
        .filter(|e| e.client_id == client_id)
        .collect()
}

/// Emit an audit event for a client-visible authorization consequence.
pub fn emit(event_type: &str, client_id: &str, message: &str) {
    event!(
        target: "audit",
        tracing::Level::INFO,
        %event_type,
        %client_id,
        %message
    );
    let sink = AUDIT_SINK.get_or_init(AuditSink::default);
    sink.record(AuditEvent {
        event_type: event_type.to_string(),
        client_id: client_id.to_string(),
        message: message.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitted_events_are_recorded_per_client() {
        emit("client_disconnected", "audit-test-client", "bad topic");
        let events = events_for("audit-test-client");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "bad topic");
        assert!(sink_len() >= 1);
    }

    #[test]
    fn sink_drops_oldest_past_capacity() {
        let sink = AuditSink::default();
        for i in 0..=AUDIT_CAPACITY {
            sink.record(AuditEvent {
                event_type: "t".into(),
                client_id: "c".into(),
                message: i.to_string(),
            });
        }
        assert_eq!(sink.len(), AUDIT_CAPACITY);
        let guard = sink.inner.lock().unwrap();
        assert_eq!(guard.front().map(|e| e.message.as_str()), Some("1"));
        let last = AUDIT_CAPACITY.to_string();
        assert_eq!(guard.back().map(|e| e.message.as_str()), Some(last.as_str()));
    }
}
