//! Per-signal flow tracking
//!
//! Every signal gets a short correlation id derived from its signal id.
//! Components log start/step/complete/fail markers tagged with that id so a
//! single trade can be followed across the pipeline without grepping for
//! wallet addresses.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::Error;

/// Length of the hex correlation id
const FLOW_ID_LEN: usize = 8;

/// Derive the stable 8-char correlation id for a signal id
pub fn flow_id_for(signal_id: &str) -> String {
    let digest = Sha256::digest(signal_id.as_bytes());
    hex::encode(digest)[..FLOW_ID_LEN].to_string()
}

/// Tracks signal id -> flow id; stateless beyond the mapping
#[derive(Default)]
pub struct FlowTracker {
    ids: DashMap<String, String>,
}

impl FlowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or mint the flow id for a signal
    pub fn flow_id(&self, signal_id: &str) -> String {
        if let Some(existing) = self.ids.get(signal_id) {
            return existing.clone();
        }
        let id = flow_id_for(signal_id);
        self.ids.insert(signal_id.to_string(), id.clone());
        id
    }

    /// Drop the mapping once a signal reaches a terminal classification
    pub fn release(&self, signal_id: &str) {
        self.ids.remove(signal_id);
    }

    pub fn start(&self, signal_id: &str, service: &str, operation: &str) {
        info!(
            flow = %self.flow_id(signal_id),
            service,
            operation,
            marker = "start",
            "flow start"
        );
    }

    pub fn step(&self, signal_id: &str, service: &str, operation: &str, detail: &str) {
        info!(
            flow = %self.flow_id(signal_id),
            service,
            operation,
            marker = "step",
            detail,
            "flow step"
        );
    }

    pub fn complete(&self, signal_id: &str, service: &str, operation: &str) {
        info!(
            flow = %self.flow_id(signal_id),
            service,
            operation,
            marker = "complete",
            "flow complete"
        );
    }

    pub fn fail(&self, signal_id: &str, service: &str, operation: &str, error: &Error) {
        warn!(
            flow = %self.flow_id(signal_id),
            service,
            operation,
            marker = "fail",
            code = error.code(),
            retriable = error.is_retriable(),
            %error,
            "flow fail"
        );
    }

    pub fn tracked_count(&self) -> usize {
        self.ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_id_is_stable_and_short() {
        let a = flow_id_for("signal-123");
        let b = flow_id_for("signal-123");
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_distinct_signals_get_distinct_ids() {
        assert_ne!(flow_id_for("signal-1"), flow_id_for("signal-2"));
    }

    #[test]
    fn test_tracker_release() {
        let tracker = FlowTracker::new();
        let id = tracker.flow_id("sig");
        assert_eq!(tracker.flow_id("sig"), id);
        assert_eq!(tracker.tracked_count(), 1);
        tracker.release("sig");
        assert_eq!(tracker.tracked_count(), 0);
    }
}
