//! Three-class priority queue for execution requests
//!
//! High drains before medium before low; within a class, strict FIFO.
//! Terminal trades get their pending requests purged so a dead trade never
//! reaches a worker.

use std::collections::VecDeque;

use crate::trade::{ExecutionRequest, Priority};

#[derive(Default)]
pub struct RequestQueue {
    high: VecDeque<ExecutionRequest>,
    medium: VecDeque<ExecutionRequest>,
    low: VecDeque<ExecutionRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: ExecutionRequest) {
        match request.priority {
            Priority::High => self.high.push_back(request),
            Priority::Medium => self.medium.push_back(request),
            Priority::Low => self.low.push_back(request),
        }
    }

    pub fn pop(&mut self) -> Option<ExecutionRequest> {
        self.high
            .pop_front()
            .or_else(|| self.medium.pop_front())
            .or_else(|| self.low.pop_front())
    }

    /// Drop every queued request for a trade; returns how many were removed
    pub fn purge_trade(&mut self, trade_id: &str) -> usize {
        let mut removed = 0;
        for queue in [&mut self.high, &mut self.medium, &mut self.low] {
            let before = queue.len();
            queue.retain(|r| r.trade_id != trade_id);
            removed += before - queue.len();
        }
        removed
    }

    /// Remove and return everything, highest priority first
    pub fn drain_all(&mut self) -> Vec<ExecutionRequest> {
        let mut out = Vec::with_capacity(self.len());
        while let Some(request) = self.pop() {
            out.push(request);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
