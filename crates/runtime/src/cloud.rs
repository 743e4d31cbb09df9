//! Cloud variable hooks
//!
//! Scripts write cloud variables like any other variable; the runtime
//! buffers the new values and hands them to the storage collaborator at
//! tick boundaries. Writes never block a script, and writes to the same
//! variable within one tick coalesce to the last value.
//!
//! The transport itself (websocket, HTTP, whatever) is out of scope:
//! implement [`CloudStore`] and pass it in.

use sb3_core::Value;

/// Storage collaborator for cloud variables. Implementations must not
/// block; failures are theirs to log.
pub trait CloudStore {
    fn save(&mut self, id: &str, value: &Value);
}

/// Discards every write.
#[derive(Debug, Default)]
pub struct NullCloud;

impl CloudStore for NullCloud {
    fn save(&mut self, _id: &str, _value: &Value) {}
}

/// Records writes in memory, for tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryCloud {
    pub saved: Vec<(String, Value)>,
}

impl CloudStore for MemoryCloud {
    fn save(&mut self, id: &str, value: &Value) {
        self.saved.push((id.to_string(), value.clone()));
    }
}

/// Per-tick write buffer, coalescing by variable id.
#[derive(Debug, Default)]
pub struct CloudBuffer {
    pending: Vec<(String, Value)>,
}

impl CloudBuffer {
    /// Record a write. An in-flight write to the same id is replaced.
    pub fn push(&mut self, id: &str, value: Value) {
        if let Some(entry) = self.pending.iter_mut().find(|(k, _)| k == id) {
            entry.1 = value;
        } else {
            self.pending.push((id.to_string(), value));
        }
    }

    /// Forward everything buffered to the store and clear.
    pub fn drain_into(&mut self, store: &mut dyn CloudStore) {
        for (id, value) in self.pending.drain(..) {
            store.save(&id, &value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalesces_per_id() {
        let mut buf = CloudBuffer::default();
        for i in 0..100 {
            buf.push("score", Value::Number(i as f64));
        }
        buf.push("other", Value::Number(7.0));
        let mut store = MemoryCloud::default();
        buf.drain_into(&mut store);
        // one terminal value per id
        assert_eq!(store.saved.len(), 2);
        assert_eq!(store.saved[0], ("score".into(), Value::Number(99.0)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_drain_clears_buffer() {
        let mut buf = CloudBuffer::default();
        buf.push("a", Value::Number(1.0));
        let mut store = MemoryCloud::default();
        buf.drain_into(&mut store);
        buf.drain_into(&mut store);
        assert_eq!(store.saved.len(), 1);
    }
}
