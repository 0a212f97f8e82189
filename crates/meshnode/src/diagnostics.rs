//! Per-request state and error collection.
//!
//! Every component that can degrade (storage, chain decoding, verification)
//! records what happened here instead of failing the request. Entries are
//! mirrored to `tracing` and surfaced in the operator status view.

use serde::Serialize;
use std::sync::Mutex;

use mesh_common::MeshError;

/// A single collected entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub code: String,
    pub message: String,
}

/// Collector shared by reference through one request
#[derive(Debug, Default)]
pub struct Diagnostics {
    states: Mutex<Vec<Entry>>,
    errors: Mutex<Vec<Entry>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a state change worth showing to the operator
    pub fn state(&self, code: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(code = code, "{}", message);
        push(&self.states, code, message);
    }

    /// Record a non-fatal error
    pub fn error(&self, code: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(code = code, "{}", message);
        push(&self.errors, code, message);
    }

    /// Record a caught [`MeshError`] with the operation it interrupted
    pub fn failure(&self, operation: &str, err: &MeshError) {
        self.error(err.code(), format!("{operation}: {err}"));
    }

    pub fn states(&self) -> Vec<Entry> {
        snapshot(&self.states)
    }

    pub fn errors(&self) -> Vec<Entry> {
        snapshot(&self.errors)
    }

    #[cfg(test)]
    pub fn has_errors(&self) -> bool {
        !snapshot(&self.errors).is_empty()
    }
}

fn push(list: &Mutex<Vec<Entry>>, code: &str, message: String) {
    let mut guard = list.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.push(Entry {
        code: code.to_string(),
        message,
    });
}

fn snapshot(list: &Mutex<Vec<Entry>>) -> Vec<Entry> {
    list.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}
