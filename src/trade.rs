//! Trade record, state machine, and scheduler work units

use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::resolver::TokenBinding;
use crate::signal::{Side, Signal};

/// Lifecycle of a trade. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeState {
    Pending,
    Entering,
    Entered,
    PartiallyExited,
    Exited,
    StoppedOut,
    Expired,
    Failed,
}

impl TradeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeState::Exited | TradeState::StoppedOut | TradeState::Expired | TradeState::Failed
        )
    }

    /// Legal transitions; everything else is dropped by the scheduler
    pub fn can_transition_to(&self, next: TradeState) -> bool {
        use TradeState::*;
        match (self, next) {
            (Pending, Entering) | (Pending, Failed) => true,
            (Entering, Entered) | (Entering, Failed) => true,
            (Entered, PartiallyExited)
            | (Entered, Exited)
            | (Entered, StoppedOut)
            | (Entered, Expired)
            | (Entered, Failed) => true,
            (PartiallyExited, PartiallyExited)
            | (PartiallyExited, Exited)
            | (PartiallyExited, StoppedOut)
            | (PartiallyExited, Expired)
            | (PartiallyExited, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TradeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TradeState::Pending => "pending",
            TradeState::Entering => "entering",
            TradeState::Entered => "entered",
            TradeState::PartiallyExited => "partially_exited",
            TradeState::Exited => "exited",
            TradeState::StoppedOut => "stopped_out",
            TradeState::Expired => "expired",
            TradeState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Why a position (or part of it) was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitKind {
    Tp1,
    Tp2,
    StopLoss,
    TrailingStop,
    Deadline,
    Manual,
}

impl ExitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitKind::Tp1 => "TP1",
            ExitKind::Tp2 => "TP2",
            ExitKind::StopLoss => "STOP_LOSS",
            ExitKind::TrailingStop => "TRAILING_STOP",
            ExitKind::Deadline => "DEADLINE",
            ExitKind::Manual => "MANUAL",
        }
    }

    /// Tie-break rank within a monitor tick; lower fires first
    pub fn urgency(&self) -> u8 {
        match self {
            ExitKind::Deadline => 0,
            ExitKind::StopLoss => 1,
            ExitKind::TrailingStop => 2,
            ExitKind::Tp2 => 3,
            ExitKind::Tp1 => 4,
            ExitKind::Manual => 5,
        }
    }

    /// Stop-loss and deadline exits must drain the whole position and jump
    /// the queue
    pub fn is_protective(&self) -> bool {
        matches!(self, ExitKind::StopLoss | ExitKind::Deadline)
    }

    /// Terminal state a full exit of this kind lands in
    pub fn terminal_state(&self) -> TradeState {
        match self {
            ExitKind::StopLoss => TradeState::StoppedOut,
            ExitKind::Deadline => TradeState::Expired,
            _ => TradeState::Exited,
        }
    }
}

/// A realised exit (full or partial)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitEvent {
    pub kind: ExitKind,
    pub price: f64,
    pub amount_raw: U256,
    pub percentage_of_position: u32,
    pub tx_hash: Option<String>,
    pub at: DateTime<Utc>,
    /// Profit in base-token units, negative for losses
    pub pnl_base: f64,
}

/// The central mutable record of the pipeline. Identity fields are fixed at
/// creation; only the orchestrator mutates the rest, behind a per-trade
/// lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub signal_id: String,
    pub caller_id: String,
    pub wallet_address: String,
    pub network: String,
    pub sell_binding: TokenBinding,
    pub buy_binding: TokenBinding,
    pub side: Side,
    pub tp1: f64,
    pub tp2: f64,
    pub stop_loss: f64,
    pub deadline: DateTime<Utc>,
    pub entry_price_expected: f64,

    pub state: TradeState,
    pub entry_tx_hash: Option<String>,
    pub entry_filled_raw: Option<U256>,
    pub entry_price_observed: Option<f64>,
    /// Trailing extremum while tp2 is hit: the high for buys, the low for
    /// sells
    pub trailing_high: Option<f64>,
    pub exit_events: Vec<ExitEvent>,
    pub updated_at: DateTime<Utc>,
}

impl Trade {
    pub fn new(
        trade_id: String,
        signal: &Signal,
        network: String,
        sell_binding: TokenBinding,
        buy_binding: TokenBinding,
    ) -> Self {
        Self {
            trade_id,
            signal_id: signal.signal_id.clone(),
            caller_id: signal.caller_id.clone(),
            wallet_address: signal.wallet_address.clone(),
            network,
            sell_binding,
            buy_binding,
            side: signal.side,
            tp1: signal.tp1,
            tp2: signal.tp2,
            stop_loss: signal.stop_loss,
            deadline: signal.deadline,
            entry_price_expected: signal.entry_price,
            state: TradeState::Pending,
            entry_tx_hash: None,
            entry_filled_raw: None,
            entry_price_observed: None,
            trailing_high: None,
            exit_events: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Move to `next`, rejecting illegal transitions. Terminal states are
    /// absorbing: transitioning a terminal trade to its own state is a
    /// no-op, anything else is an error.
    pub fn transition(&mut self, next: TradeState) -> Result<()> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(Error::UnknownError(format!(
                "illegal trade transition {} -> {} for {}",
                self.state, next, self.trade_id
            )));
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Sum of exit percentages recorded so far
    pub fn exited_percentage(&self) -> u32 {
        self.exit_events
            .iter()
            .map(|e| e.percentage_of_position)
            .sum()
    }

    /// Filled quantity still held
    pub fn remaining_raw(&self) -> U256 {
        let filled = self.entry_filled_raw.unwrap_or_default();
        let exited: U256 = self
            .exit_events
            .iter()
            .fold(U256::zero(), |acc, e| acc.saturating_add(e.amount_raw));
        filled.saturating_sub(exited)
    }

    /// Record a realised exit and advance the state machine. Caps the
    /// percentage so the running sum never exceeds 100; at 100 the trade
    /// lands in the exit kind's terminal state.
    pub fn record_exit(&mut self, mut event: ExitEvent) -> Result<()> {
        if self.state.is_terminal() {
            return Ok(());
        }

        let already = self.exited_percentage();
        if already >= 100 {
            return Ok(());
        }
        if already + event.percentage_of_position > 100 {
            event.percentage_of_position = 100 - already;
        }

        let kind = event.kind;
        self.exit_events.push(event);

        if self.exited_percentage() >= 100 {
            self.transition(kind.terminal_state())?;
        } else {
            self.transition(TradeState::PartiallyExited)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Enter,
    Exit,
}

/// Dispatch priority; higher drains first, FIFO within a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// The scheduler's work unit
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub trade_id: String,
    pub action: Action,
    pub amount_raw: U256,
    pub reason: String,
    pub priority: Priority,
    /// Present for exit requests; drives exit accounting and terminal state
    pub exit_kind: Option<ExitKind>,
    /// Price observed when the exit was emitted
    pub exit_price: Option<f64>,
    /// Share of the position this request closes (exit only)
    pub exit_percentage: Option<u32>,
    /// Retry counter for failed exit requests
    pub attempt: u32,
}

impl ExecutionRequest {
    pub fn enter(trade_id: String, amount_raw: U256, reason: String) -> Self {
        Self {
            trade_id,
            action: Action::Enter,
            amount_raw,
            reason,
            priority: Priority::Medium,
            exit_kind: None,
            exit_price: None,
            exit_percentage: None,
            attempt: 0,
        }
    }

    pub fn exit(
        trade_id: String,
        amount_raw: U256,
        kind: ExitKind,
        price: f64,
        percentage: u32,
        reason: String,
    ) -> Self {
        let priority = if kind.is_protective() {
            Priority::High
        } else {
            Priority::Medium
        };
        Self {
            trade_id,
            action: Action::Exit,
            amount_raw,
            reason,
            priority,
            exit_kind: Some(kind),
            exit_price: Some(price),
            exit_percentage: Some(percentage),
            attempt: 0,
        }
    }
}
