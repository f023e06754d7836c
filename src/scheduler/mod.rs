//! Orchestrator and execution scheduler
//!
//! Single source of truth for trade progression. Signals are admitted
//! through the validation pipeline (shape, directory, resolution, wallet,
//! sizing) and become pending trades with a queued entry request. Worker
//! tasks drain the priority queue under per-trade leases; monitor emissions
//! come back through the same queue as exit requests. Terminal states are
//! absorbing and cancel anything still queued for the trade.

pub mod queue;

use chrono::Utc;
use dashmap::DashMap;
use lru::LruCache;
use primitive_types::U256;
use serde_json::json;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::bus::{EventBus, Topic};
use crate::adapters::directory::{WalletDirectory, WalletRecord};
use crate::amount::{apply_bps, pct_to_bps, to_f64_lossy};
use crate::config::{SchedulerConfig, TradingConfig};
use crate::error::{Error, Result};
use crate::flow::FlowTracker;
use crate::monitor::{MonitorEvent, PositionMonitor};
use crate::resolver::{BindingSource, TokenBinding, TokenResolver};
use crate::signal::{Side, Signal};
use crate::sizing::{PositionPlan, PositionSizer};
use crate::trade::{Action, ExecutionRequest, ExitEvent, ExitKind, Trade, TradeState};
use crate::trading::executor::Execute;
use crate::trading::route::RouteProvider;
use crate::wallet::validator::WalletValidator;
use self::queue::RequestQueue;

const SERVICE: &str = "orchestrator";

/// Reply to a submitted signal; replayed verbatim for duplicate deliveries
#[derive(Debug, Clone)]
pub enum Admission {
    Accepted {
        signal_id: String,
        trade_id: String,
    },
    Rejected {
        signal_id: String,
        code: String,
        message: String,
        recommendation: String,
        context: String,
    },
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted { .. })
    }
}

pub struct Orchestrator {
    trading: TradingConfig,
    scheduler: SchedulerConfig,
    trailing_enabled: bool,
    /// network key -> chain id, for the aggregator advisory
    chain_ids: HashMap<String, u64>,

    flow: FlowTracker,
    resolver: Arc<TokenResolver>,
    directory: Arc<dyn WalletDirectory>,
    validator: Arc<WalletValidator>,
    sizer: Arc<PositionSizer>,
    route: Arc<RouteProvider>,
    executor: Arc<dyn Execute>,
    monitor: Arc<PositionMonitor>,
    bus: Arc<dyn EventBus>,

    trades: DashMap<String, Trade>,
    leases: DashMap<String, Arc<AsyncMutex<()>>>,
    queue: Mutex<RequestQueue>,
    queue_notify: Notify,
    dedup: Mutex<LruCache<String, Admission>>,
    shutdown: CancellationToken,
}

#[allow(clippy::too_many_arguments)]
impl Orchestrator {
    pub fn new(
        trading: TradingConfig,
        scheduler: SchedulerConfig,
        trailing_enabled: bool,
        chain_ids: HashMap<String, u64>,
        resolver: Arc<TokenResolver>,
        directory: Arc<dyn WalletDirectory>,
        validator: Arc<WalletValidator>,
        sizer: Arc<PositionSizer>,
        route: Arc<RouteProvider>,
        executor: Arc<dyn Execute>,
        monitor: Arc<PositionMonitor>,
        bus: Arc<dyn EventBus>,
        shutdown: CancellationToken,
    ) -> Self {
        let dedup_capacity =
            NonZeroUsize::new(scheduler.dedup_capacity.max(1)).expect("nonzero capacity");
        Self {
            trading,
            scheduler,
            trailing_enabled,
            chain_ids,
            flow: FlowTracker::new(),
            resolver,
            directory,
            validator,
            sizer,
            route,
            executor,
            monitor,
            bus,
            trades: DashMap::new(),
            leases: DashMap::new(),
            queue: Mutex::new(RequestQueue::new()),
            queue_notify: Notify::new(),
            dedup: Mutex::new(LruCache::new(dedup_capacity)),
            shutdown,
        }
    }

    /// Spawn the drain workers and the monitor-emission consumer
    pub fn start(self: &Arc<Self>, mut monitor_rx: tokio::sync::mpsc::Receiver<MonitorEvent>) {
        for worker in 0..self.scheduler.executor_fan_out {
            let orchestrator = self.clone();
            tokio::spawn(async move {
                orchestrator.worker_loop(worker).await;
            });
        }

        let orchestrator = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = monitor_rx.recv() => {
                        match event {
                            Some(event) => orchestrator.handle_monitor_event(event).await,
                            None => break,
                        }
                    }
                    _ = orchestrator.shutdown.cancelled() => break,
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Signal admission
    // ------------------------------------------------------------------

    /// Admit a signal. Idempotent on signal id: re-delivery replays the
    /// original classification without reprocessing.
    pub async fn submit_signal(&self, signal: Signal) -> Admission {
        if let Some(prior) = self
            .dedup
            .lock()
            .unwrap()
            .get(&signal.signal_id)
            .cloned()
        {
            info!(signal_id = %signal.signal_id, "duplicate signal, replaying classification");
            return prior;
        }

        if self.shutdown.is_cancelled() {
            return self.reject(&signal, &Error::SystemShutdown);
        }

        self.flow.start(&signal.signal_id, SERVICE, "submit_signal");

        let admission = match self.admit(&signal).await {
            Ok(trade_id) => {
                self.flow
                    .complete(&signal.signal_id, SERVICE, "submit_signal");
                self.bus.publish(
                    Topic::SignalAccepted,
                    json!({
                        "signalId": signal.signal_id,
                        "tradeId": trade_id,
                        "symbol": signal.symbol,
                        "side": signal.side.to_string(),
                    }),
                );
                Admission::Accepted {
                    signal_id: signal.signal_id.clone(),
                    trade_id,
                }
            }
            Err(e) => {
                self.flow.fail(&signal.signal_id, SERVICE, "submit_signal", &e);
                self.reject(&signal, &e)
            }
        };

        self.dedup
            .lock()
            .unwrap()
            .put(signal.signal_id.clone(), admission.clone());
        admission
    }

    fn reject(&self, signal: &Signal, error: &Error) -> Admission {
        let admission = Admission::Rejected {
            signal_id: signal.signal_id.clone(),
            code: error.code().to_string(),
            message: error.to_string(),
            recommendation: error.recommendation().to_string(),
            context: signal.summary(),
        };
        self.bus.publish(
            Topic::SignalRejected,
            json!({
                "signalId": signal.signal_id,
                "code": error.code(),
                "message": error.to_string(),
                "context": signal.summary(),
            }),
        );
        admission
    }

    async fn admit(&self, signal: &Signal) -> Result<String> {
        signal.validate(Utc::now())?;
        self.flow.step(&signal.signal_id, SERVICE, "admit", "validated");

        let record = self
            .directory
            .get_wallet(&signal.caller_id, Some(&signal.wallet_address))
            .await?
            .ok_or_else(|| Error::SafeNotDeployed {
                network: "any".into(),
                detail: format!("caller {} unknown to the directory", signal.caller_id),
            })?;
        let active = record.active_networks();

        let bindings = self.resolver.resolve(&signal.symbol, &active).await?;
        // Prefer a chain with an active wallet; otherwise keep the best
        // binding so the wallet validator can name the missing network
        let target = bindings
            .iter()
            .find(|b| active.contains(&b.network) && self.chain_ids.contains_key(&b.network))
            .or_else(|| bindings.iter().find(|b| self.chain_ids.contains_key(&b.network)))
            .or_else(|| bindings.first())
            .cloned()
            .ok_or_else(|| Error::TokenNotFound(signal.symbol.clone()))?;
        let network = target.network.clone();
        self.flow.step(
            &signal.signal_id,
            SERVICE,
            "admit",
            &format!("resolved to {}", network),
        );

        // From here the failure is recorded as a failed trade so that
        // re-delivery replays it without re-executing
        let trade_id = uuid::Uuid::new_v4().to_string();
        match self
            .prepare_entry(signal, &record, &network, target.clone(), &trade_id)
            .await
        {
            Ok((trade, plan)) => {
                self.trades.insert(trade_id.clone(), trade);
                self.enqueue(ExecutionRequest::enter(
                    trade_id.clone(),
                    plan.sell_amount_raw,
                    plan.rationale,
                ));
                Ok(trade_id)
            }
            Err(e) => {
                let (sell, buy) = self.bindings_for_side(
                    signal.side,
                    self.placeholder_base(&network),
                    target,
                );
                let mut trade = Trade::new(trade_id.clone(), signal, network, sell, buy);
                let _ = trade.transition(TradeState::Failed);
                self.trades.insert(trade_id.clone(), trade);
                self.bus.publish(
                    Topic::TradeFailed,
                    json!({
                        "tradeId": trade_id,
                        "signalId": signal.signal_id,
                        "code": e.code(),
                    }),
                );
                Err(e)
            }
        }
    }

    async fn prepare_entry(
        &self,
        signal: &Signal,
        record: &WalletRecord,
        network: &str,
        target: TokenBinding,
        trade_id: &str,
    ) -> Result<(Trade, PositionPlan)> {
        if !self.chain_ids.contains_key(network) {
            return Err(Error::UnsupportedNetwork(network.to_string()));
        }

        let check = self
            .validator
            .validate(&signal.wallet_address, network, record, false)
            .await?;
        self.flow
            .step(&signal.signal_id, SERVICE, "admit", "wallet validated");

        let base = self.base_binding(network).await?;
        let (sell, buy) = self.bindings_for_side(signal.side, base, target);

        if sell.is_native && !check.has_gas() {
            return Err(Error::SafeInsufficientBalance {
                network: network.to_string(),
                detail: format!(
                    "{} holds no native balance for a native-denominated trade",
                    signal.wallet_address
                ),
            });
        }

        let chain_id = *self.chain_ids.get(network).expect("network checked above");
        // Advisory only; a down endpoint must not block admission
        let advisory = self
            .route
            .min_sell_amount(&sell.symbol, chain_id)
            .await
            .unwrap_or(None);

        let plan = self
            .sizer
            .plan(
                &signal.wallet_address,
                network,
                sell.clone(),
                buy.clone(),
                self.trading.position_percentage,
                advisory,
            )
            .await?;
        self.flow
            .step(&signal.signal_id, SERVICE, "admit", &plan.rationale);

        let trade = Trade::new(trade_id.to_string(), signal, network.to_string(), sell, buy);
        Ok((trade, plan))
    }

    /// Base token deployment on the chosen network
    async fn base_binding(&self, network: &str) -> Result<TokenBinding> {
        let bindings = self.resolver.resolve(&self.trading.base_symbol, &[]).await?;
        bindings
            .into_iter()
            .find(|b| b.network == network)
            .ok_or_else(|| {
                Error::UnsupportedNetwork(format!(
                    "{} has no {} deployment configured",
                    network, self.trading.base_symbol
                ))
            })
    }

    fn bindings_for_side(
        &self,
        side: Side,
        base: TokenBinding,
        target: TokenBinding,
    ) -> (TokenBinding, TokenBinding) {
        match side {
            Side::Buy => (base, target),
            Side::Sell => (target, base),
        }
    }

    /// Best-effort base binding for failed-trade records minted before the
    /// base token was resolved
    fn placeholder_base(&self, network: &str) -> TokenBinding {
        TokenBinding {
            symbol: self.trading.base_symbol.clone(),
            network: network.to_string(),
            contract_address: String::new(),
            decimals: 6,
            is_native: false,
            source: BindingSource::Known,
            verified: false,
        }
    }

    // ------------------------------------------------------------------
    // Queue and workers
    // ------------------------------------------------------------------

    pub fn enqueue(&self, request: ExecutionRequest) {
        self.queue.lock().unwrap().push(request);
        self.queue_notify.notify_one();
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    fn pop_request(&self) -> Option<ExecutionRequest> {
        self.queue.lock().unwrap().pop()
    }

    async fn worker_loop(self: Arc<Self>, worker: usize) {
        loop {
            if let Some(request) = self.pop_request() {
                self.dispatch(request).await;
                continue;
            }
            tokio::select! {
                _ = self.queue_notify.notified() => {}
                _ = self.shutdown.cancelled() => {
                    info!(worker, "scheduler worker stopping");
                    break;
                }
            }
        }
    }

    /// Process exactly one queued request, if any. The worker loop calls
    /// this; tests drive it directly for determinism.
    pub async fn drain_one(self: &Arc<Self>) -> bool {
        match self.pop_request() {
            Some(request) => {
                self.dispatch(request).await;
                true
            }
            None => false,
        }
    }

    async fn dispatch(self: &Arc<Self>, request: ExecutionRequest) {
        // Per-trade lease: at most one request in flight per trade
        let lease = self
            .leases
            .entry(request.trade_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lease.lock().await;

        let Some(trade) = self.trades.get(&request.trade_id).map(|t| t.clone()) else {
            warn!(trade_id = %request.trade_id, "dropping request for unknown trade");
            return;
        };

        let legal = match request.action {
            Action::Enter => trade.state == TradeState::Pending,
            Action::Exit => matches!(
                trade.state,
                TradeState::Entered | TradeState::PartiallyExited
            ),
        };
        if !legal {
            warn!(
                trade_id = %trade.trade_id,
                state = %trade.state,
                action = ?request.action,
                "dropping request illegal in current state"
            );
            return;
        }

        match request.action {
            Action::Enter => self.run_entry(trade, request).await,
            Action::Exit => self.run_exit(trade, request).await,
        }
    }

    async fn run_entry(&self, mut trade: Trade, request: ExecutionRequest) {
        if trade.transition(TradeState::Entering).is_err() {
            return;
        }
        self.store(trade.clone());
        self.flow
            .step(&trade.signal_id, "executor", "enter", &request.reason);

        match self.executor.execute(&trade, &request).await {
            Ok(outcome) => {
                trade.entry_tx_hash = Some(outcome.tx_hash.clone());
                trade.entry_filled_raw = outcome.filled_raw;
                trade.entry_price_observed =
                    Self::observed_entry_price(&trade, &request, outcome.filled_raw);
                if trade.transition(TradeState::Entered).is_err() {
                    return;
                }
                self.store(trade.clone());
                self.validator
                    .invalidate(&trade.wallet_address, &trade.network);
                self.monitor.attach(&trade).await;
                self.flow.complete(&trade.signal_id, "executor", "enter");
                self.bus.publish(
                    Topic::TradeEntered,
                    json!({
                        "tradeId": trade.trade_id,
                        "signalId": trade.signal_id,
                        "txHash": outcome.tx_hash,
                        "network": trade.network,
                    }),
                );
            }
            Err(e) => {
                self.flow.fail(&trade.signal_id, "executor", "enter", &e);
                let _ = trade.transition(TradeState::Failed);
                self.store(trade.clone());
                self.bus.publish(
                    Topic::TradeFailed,
                    json!({
                        "tradeId": trade.trade_id,
                        "signalId": trade.signal_id,
                        "code": e.code(),
                    }),
                );
            }
        }
    }

    /// Entry price implied by the fill: sold base per received token
    fn observed_entry_price(
        trade: &Trade,
        request: &ExecutionRequest,
        filled: Option<U256>,
    ) -> Option<f64> {
        let filled = filled?;
        if filled.is_zero() || trade.side != Side::Buy {
            return None;
        }
        let base = to_f64_lossy(request.amount_raw, trade.sell_binding.decimals);
        let tokens = to_f64_lossy(filled, trade.buy_binding.decimals);
        (tokens > 0.0).then_some(base / tokens)
    }

    async fn run_exit(self: &Arc<Self>, mut trade: Trade, request: ExecutionRequest) {
        let kind = request.exit_kind.unwrap_or(ExitKind::Manual);
        self.flow.step(
            &trade.signal_id,
            "executor",
            "exit",
            &format!("{} attempt {}", kind.as_str(), request.attempt),
        );

        match self.executor.execute(&trade, &request).await {
            Ok(outcome) => {
                let price = request.exit_price.unwrap_or_default();
                let percentage = request.exit_percentage.unwrap_or(100);
                let event = ExitEvent {
                    kind,
                    price,
                    amount_raw: request.amount_raw,
                    percentage_of_position: percentage,
                    tx_hash: Some(outcome.tx_hash.clone()),
                    at: Utc::now(),
                    pnl_base: Self::exit_pnl(&trade, price, request.amount_raw),
                };
                if trade.record_exit(event).is_err() {
                    warn!(trade_id = %trade.trade_id, "exit accounting rejected");
                    return;
                }
                self.store(trade.clone());
                self.validator
                    .invalidate(&trade.wallet_address, &trade.network);

                if trade.state.is_terminal() {
                    self.monitor.detach(&trade.trade_id).await;
                    let purged = self.queue.lock().unwrap().purge_trade(&trade.trade_id);
                    if purged > 0 {
                        info!(trade_id = %trade.trade_id, purged, "purged queued requests for terminal trade");
                    }
                    self.flow.complete(&trade.signal_id, "executor", "exit");
                    self.flow.release(&trade.signal_id);
                    self.bus.publish(
                        Topic::TradeExited,
                        json!({
                            "tradeId": trade.trade_id,
                            "signalId": trade.signal_id,
                            "state": trade.state.to_string(),
                            "exitKind": kind.as_str(),
                            "txHash": outcome.tx_hash,
                        }),
                    );
                } else {
                    self.bus.publish(
                        Topic::TradeExited,
                        json!({
                            "tradeId": trade.trade_id,
                            "state": trade.state.to_string(),
                            "exitKind": kind.as_str(),
                            "partial": true,
                        }),
                    );
                }
            }
            Err(e) => {
                self.flow.fail(&trade.signal_id, "executor", "exit", &e);
                self.retry_exit(request, &e).await;
            }
        }
    }

    /// Failed exits re-queue with backoff; protective exits (stop-loss,
    /// deadline) jump straight back at high priority on their first retry.
    /// After the retry budget the monitor is re-attached so the next
    /// threshold crossing emits again.
    async fn retry_exit(self: &Arc<Self>, mut request: ExecutionRequest, error: &Error) {
        request.attempt += 1;
        let kind = request.exit_kind.unwrap_or(ExitKind::Manual);

        if request.attempt > self.scheduler.exit_retry_max {
            warn!(
                trade_id = %request.trade_id,
                kind = kind.as_str(),
                error = %error,
                "exit retries exhausted, re-arming monitor"
            );
            if let Some(trade) = self.trades.get(&request.trade_id).map(|t| t.clone()) {
                if !trade.state.is_terminal() {
                    self.monitor.attach(&trade).await;
                }
            }
            return;
        }

        if kind.is_protective() && request.attempt == 1 {
            request.priority = crate::trade::Priority::High;
            warn!(
                trade_id = %request.trade_id,
                kind = kind.as_str(),
                "protective exit failed, immediate high-priority retry"
            );
            self.enqueue(request);
            return;
        }

        let base = self.scheduler.exit_retry_base_secs.max(1);
        let delay = (base << (request.attempt.saturating_sub(1)).min(16))
            .min(self.scheduler.exit_retry_cap_secs);
        warn!(
            trade_id = %request.trade_id,
            attempt = request.attempt,
            delay_secs = delay,
            error = %error,
            "exit failed, re-queueing with backoff"
        );

        let orchestrator = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(delay)) => {
                    orchestrator.enqueue(request);
                }
                _ = orchestrator.shutdown.cancelled() => {}
            }
        });
    }

    /// Signed price move times the exited quantity, in base units
    fn exit_pnl(trade: &Trade, exit_price: f64, amount_raw: U256) -> f64 {
        let entry = trade
            .entry_price_observed
            .unwrap_or(trade.entry_price_expected);
        if exit_price <= 0.0 || entry <= 0.0 {
            return 0.0;
        }
        match trade.side {
            Side::Buy => {
                let tokens = to_f64_lossy(amount_raw, trade.buy_binding.decimals);
                (exit_price - entry) * tokens
            }
            Side::Sell => {
                let base = to_f64_lossy(amount_raw, trade.sell_binding.decimals);
                (entry - exit_price) * (base / entry)
            }
        }
    }

    // ------------------------------------------------------------------
    // Monitor emissions
    // ------------------------------------------------------------------

    pub async fn handle_monitor_event(self: &Arc<Self>, event: MonitorEvent) {
        let Some(trade) = self.trades.get(&event.trade_id).map(|t| t.clone()) else {
            return;
        };

        self.bus.publish(
            Topic::MonitorEmission,
            json!({
                "tradeId": event.trade_id,
                "kind": event.kind.as_str(),
                "price": event.price,
            }),
        );

        if trade.state.is_terminal() {
            self.monitor.detach(&event.trade_id).await;
            return;
        }

        // With trailing enabled, TP2 arms the trailing stop instead of
        // exiting; the retracement (or a protective stop) closes the rest
        if event.kind == ExitKind::Tp2 && self.trailing_enabled {
            if let Some(mut entry) = self.trades.get_mut(&event.trade_id) {
                entry.trailing_high = Some(event.price);
            }
            return;
        }

        let exited = trade.exited_percentage();
        let percentage = match event.kind {
            ExitKind::Tp1 => self.trading.tp1_exit_percentage.min(100 - exited),
            _ => 100 - exited,
        };
        if percentage == 0 {
            return;
        }

        let filled = trade.entry_filled_raw.unwrap_or_default();
        let amount = apply_bps(filled, pct_to_bps(percentage)).min(trade.remaining_raw());
        if amount.is_zero() {
            warn!(trade_id = %event.trade_id, "monitor exit with nothing to sell");
            return;
        }

        let reason = format!("{} at {}", event.kind.as_str(), event.price);
        self.enqueue(ExecutionRequest::exit(
            event.trade_id.clone(),
            amount,
            event.kind,
            event.price,
            percentage,
            reason,
        ));
    }

    // ------------------------------------------------------------------
    // Lifecycle and introspection
    // ------------------------------------------------------------------

    /// Drop queued work and mark the affected trades failed for later
    /// reconciliation; in-flight executor calls drain on their own.
    pub async fn shutdown_now(&self) {
        self.shutdown.cancel();
        let pending = self.queue.lock().unwrap().drain_all();
        info!(dropped = pending.len(), "scheduler shutdown, dropping queued requests");

        for request in pending {
            if let Some(mut trade) = self.trades.get_mut(&request.trade_id) {
                if !trade.state.is_terminal() && trade.transition(TradeState::Failed).is_ok() {
                    self.bus.publish(
                        Topic::TradeFailed,
                        json!({
                            "tradeId": trade.trade_id,
                            "signalId": trade.signal_id,
                            "code": Error::SystemShutdown.code(),
                        }),
                    );
                }
            }
            self.monitor.detach(&request.trade_id).await;
        }
    }

    fn store(&self, trade: Trade) {
        self.trades.insert(trade.trade_id.clone(), trade);
    }

    pub fn trade(&self, trade_id: &str) -> Option<Trade> {
        self.trades.get(trade_id).map(|t| t.clone())
    }

    pub fn open_trades(&self) -> Vec<Trade> {
        self.trades
            .iter()
            .filter(|t| !t.state.is_terminal())
            .map(|t| t.clone())
            .collect()
    }

    pub fn trade_count(&self) -> usize {
        self.trades.len()
    }
}
