//! Outbound event bus
//!
//! Fire-and-forget publication of pipeline milestones for external
//! collaborators (persistence, reporting, notifications). The topic set is
//! closed; payloads are JSON values. Delivery is best-effort and never
//! blocks the pipeline.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Closed set of outbound topics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    SignalAccepted,
    SignalRejected,
    SignalFailed,
    TradeEntered,
    TradeExited,
    TradeFailed,
    MonitorEmission,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::SignalAccepted => "signal.accepted",
            Topic::SignalRejected => "signal.rejected",
            Topic::SignalFailed => "signal.failed",
            Topic::TradeEntered => "trade.entered",
            Topic::TradeExited => "trade.exited",
            Topic::TradeFailed => "trade.failed",
            Topic::MonitorEmission => "monitor.emission",
        }
    }
}

pub trait EventBus: Send + Sync {
    /// Best-effort publish; must not block or fail the caller
    fn publish(&self, topic: Topic, payload: Value);
}

/// Default bus: structured log lines only
pub struct LogBus;

impl EventBus for LogBus {
    fn publish(&self, topic: Topic, payload: Value) {
        info!(topic = topic.as_str(), %payload, "event");
    }
}

#[derive(Debug, Clone)]
pub struct BusEvent {
    pub topic: Topic,
    pub payload: Value,
}

/// Bus backed by an unbounded channel, for consumers wired at startup and
/// for deterministic assertions in tests
pub struct ChannelBus {
    tx: mpsc::UnboundedSender<BusEvent>,
}

impl ChannelBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventBus for ChannelBus {
    fn publish(&self, topic: Topic, payload: Value) {
        if self.tx.send(BusEvent { topic, payload }).is_err() {
            debug!(topic = topic.as_str(), "event bus has no consumer");
        }
    }
}
