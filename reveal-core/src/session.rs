//! Session collaborator interface.
//!
//! Session-id lifecycle and treatment bucketing live outside the core; the
//! pipeline and decision client only need to read the current values.

use std::sync::{Arc, Mutex};

pub trait SessionProvider: Send + Sync {
    fn session_id(&self) -> String;
    /// Whether this session is in the treatment bucket (eligible for nudges).
    fn is_treatment(&self) -> bool;
}

pub type SharedSession = Arc<dyn SessionProvider>;

/// Fixed session values, replaceable at runtime.
#[derive(Debug)]
pub struct StaticSession {
    inner: Mutex<(String, bool)>,
}

impl StaticSession {
    pub fn new(session_id: &str, is_treatment: bool) -> Self {
        Self {
            inner: Mutex::new((session_id.to_string(), is_treatment)),
        }
    }

    /// Fresh random session id.
    pub fn generated(is_treatment: bool) -> Self {
        Self::new(&format!("sess_{}", uuid::Uuid::new_v4().simple()), is_treatment)
    }

    pub fn rotate(&self, session_id: &str) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.0 = session_id.to_string();
    }
}

impl SessionProvider for StaticSession {
    fn session_id(&self) -> String {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .0
            .clone()
    }

    fn is_treatment(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).1
    }
}
