//! Post-entry position monitoring
//!
//! Polls the price feed on a fixed cadence and drives a per-trade state
//! machine (armed -> tp1_hit -> tp2_hit) until an exit condition fires.
//! All watched trades are priced in one batched pass per tick, grouped by
//! symbol. Emissions go to the scheduler over a bounded channel; the
//! monitor never executes trades itself.
//!
//! TP/SL is best-effort, not guaranteed: at a 30-second cadence a fast
//! move can gap through a stop before the next tick sees it.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::price::PriceFeed;
use crate::config::MonitorConfig;
use crate::signal::Side;
use crate::trade::{ExitKind, Trade};

/// One threshold crossing, handed to the scheduler
#[derive(Debug, Clone)]
pub struct MonitorEvent {
    pub trade_id: String,
    pub kind: ExitKind,
    pub price: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArmState {
    Armed,
    Tp1Hit,
    Tp2Hit,
}

/// Monitoring state for one trade
#[derive(Debug, Clone)]
struct Watch {
    trade_id: String,
    symbol: String,
    side: Side,
    tp1: f64,
    tp2: f64,
    stop_loss: f64,
    deadline: DateTime<Utc>,
    state: ArmState,
    /// Extremum since tp2: the high for buys, the low for sells
    trailing: Option<f64>,
}

pub struct PositionMonitor {
    feed: Arc<dyn PriceFeed>,
    config: MonitorConfig,
    watches: Arc<RwLock<HashMap<String, Watch>>>,
    emissions: mpsc::Sender<MonitorEvent>,
    shutdown: CancellationToken,
}

impl PositionMonitor {
    pub fn new(
        feed: Arc<dyn PriceFeed>,
        config: MonitorConfig,
        emissions: mpsc::Sender<MonitorEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            feed,
            config,
            watches: Arc::new(RwLock::new(HashMap::new())),
            emissions,
            shutdown,
        }
    }

    /// Start watching an entered trade. The monitored symbol is the target
    /// token: the buy side of a buy, the sell side of a sell.
    pub async fn attach(&self, trade: &Trade) {
        let symbol = match trade.side {
            Side::Buy => trade.buy_binding.symbol.clone(),
            Side::Sell => trade.sell_binding.symbol.clone(),
        };
        let watch = Watch {
            trade_id: trade.trade_id.clone(),
            symbol,
            side: trade.side,
            tp1: trade.tp1,
            tp2: trade.tp2,
            stop_loss: trade.stop_loss,
            deadline: trade.deadline,
            state: ArmState::Armed,
            trailing: None,
        };
        info!(trade_id = %trade.trade_id, symbol = %watch.symbol, "monitor attached");
        let mut watches = self.watches.write().await;
        watches.insert(trade.trade_id.clone(), watch);
    }

    /// Stop watching; called on terminal emissions and by the scheduler
    /// when a trade reaches a terminal state
    pub async fn detach(&self, trade_id: &str) {
        let mut watches = self.watches.write().await;
        if watches.remove(trade_id).is_some() {
            info!(trade_id, "monitor detached");
        }
    }

    pub async fn watched_count(&self) -> usize {
        self.watches.read().await.len()
    }

    /// Current trailing extremum for a watched trade, if any
    pub async fn trailing_extremum(&self, trade_id: &str) -> Option<f64> {
        self.watches
            .read()
            .await
            .get(trade_id)
            .and_then(|w| w.trailing)
    }

    /// Spawn the tick loop
    pub fn start(self: &Arc<Self>) {
        let monitor = self.clone();
        let period = Duration::from_secs(self.config.tick_seconds);

        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.tick(Utc::now()).await;
                    }
                    _ = monitor.shutdown.cancelled() => {
                        info!("position monitor shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// One pass over all watched trades. Public for deterministic tests.
    pub async fn tick(&self, now: DateTime<Utc>) {
        let symbols: Vec<String> = {
            let watches = self.watches.read().await;
            if watches.is_empty() {
                return;
            }
            let mut symbols: Vec<String> =
                watches.values().map(|w| w.symbol.clone()).collect();
            symbols.sort();
            symbols.dedup();
            symbols
        };

        // One batched fetch per tick; a failed fetch skips the tick with no
        // state change
        let prices = match self.feed.prices(&symbols).await {
            Ok(prices) => prices,
            Err(e) => {
                warn!(error = %e, "price fetch failed, skipping tick");
                return;
            }
        };

        let mut emissions: Vec<MonitorEvent> = Vec::new();
        {
            let mut watches = self.watches.write().await;
            let mut detached: Vec<String> = Vec::new();

            for watch in watches.values_mut() {
                // Deadlines fire even when the symbol has no fresh price
                let price = prices.get(&watch.symbol).map(|p| p.price_usd);
                let Some(kind) = Self::evaluate(watch, price, now, &self.config) else {
                    continue;
                };

                emissions.push(MonitorEvent {
                    trade_id: watch.trade_id.clone(),
                    kind,
                    price: price.unwrap_or(0.0),
                    at: now,
                });

                let terminal_emission = match kind {
                    ExitKind::Deadline | ExitKind::StopLoss | ExitKind::TrailingStop => true,
                    ExitKind::Tp2 => !self.config.trailing_stop_enabled,
                    _ => false,
                };
                if terminal_emission {
                    detached.push(watch.trade_id.clone());
                }
            }

            for trade_id in detached {
                watches.remove(&trade_id);
            }
        }

        for event in emissions {
            debug!(trade_id = %event.trade_id, kind = event.kind.as_str(), price = event.price, "monitor emission");
            // Back-pressured hand-off: a full queue slows the monitor, it
            // never drops an exit
            if self.emissions.send(event).await.is_err() {
                warn!("emission channel closed");
                return;
            }
        }
    }

    /// Decide the single most urgent emission for one watch, mutating its
    /// arm state. Precedence: DEADLINE > STOP_LOSS > TRAILING_STOP > TP2 >
    /// TP1; at most one emission per tick.
    fn evaluate(
        watch: &mut Watch,
        price: Option<f64>,
        now: DateTime<Utc>,
        config: &MonitorConfig,
    ) -> Option<ExitKind> {
        if watch.deadline <= now {
            return Some(ExitKind::Deadline);
        }
        let price = price?;

        match watch.side {
            Side::Buy => {
                if price <= watch.stop_loss {
                    return Some(ExitKind::StopLoss);
                }
                if watch.state == ArmState::Tp2Hit && config.trailing_stop_enabled {
                    let high = watch.trailing.get_or_insert(price);
                    if price > *high {
                        *high = price;
                    }
                    let floor = *high * (1.0 - config.trailing_retracement_pct / 100.0);
                    if price <= floor {
                        return Some(ExitKind::TrailingStop);
                    }
                    return None;
                }
                if watch.state == ArmState::Tp1Hit && price >= watch.tp2 {
                    watch.state = ArmState::Tp2Hit;
                    if config.trailing_stop_enabled {
                        watch.trailing = Some(price);
                    }
                    return Some(ExitKind::Tp2);
                }
                if watch.state == ArmState::Armed && price >= watch.tp1 {
                    watch.state = ArmState::Tp1Hit;
                    return Some(ExitKind::Tp1);
                }
            }
            Side::Sell => {
                if price >= watch.stop_loss {
                    return Some(ExitKind::StopLoss);
                }
                if watch.state == ArmState::Tp2Hit && config.trailing_stop_enabled {
                    let low = watch.trailing.get_or_insert(price);
                    if price < *low {
                        *low = price;
                    }
                    let ceiling = *low * (1.0 + config.trailing_retracement_pct / 100.0);
                    if price >= ceiling {
                        return Some(ExitKind::TrailingStop);
                    }
                    return None;
                }
                if watch.state == ArmState::Tp1Hit && price <= watch.tp2 {
                    watch.state = ArmState::Tp2Hit;
                    if config.trailing_stop_enabled {
                        watch.trailing = Some(price);
                    }
                    return Some(ExitKind::Tp2);
                }
                if watch.state == ArmState::Armed && price <= watch.tp1 {
                    watch.state = ArmState::Tp1Hit;
                    return Some(ExitKind::Tp1);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::price::PricePoint;
    use crate::error::Result;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex;

    struct StubFeed {
        prices: Mutex<HashMap<String, f64>>,
        fail: Mutex<bool>,
    }

    impl StubFeed {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                prices: Mutex::new(HashMap::new()),
                fail: Mutex::new(false),
            })
        }

        fn set(&self, symbol: &str, price: f64) {
            self.prices.lock().unwrap().insert(symbol.into(), price);
        }
    }

    #[async_trait]
    impl PriceFeed for StubFeed {
        async fn price(&self, symbol: &str) -> Result<Option<PricePoint>> {
            Ok(self.prices.lock().unwrap().get(symbol).map(|p| PricePoint {
                price_usd: *p,
                change_24h: None,
                volume_24h: None,
                at: Utc::now(),
            }))
        }

        async fn prices(&self, symbols: &[String]) -> Result<HashMap<String, PricePoint>> {
            if *self.fail.lock().unwrap() {
                return Err(crate::error::Error::PriceDataUnavailable("down".into()));
            }
            let mut out = HashMap::new();
            for symbol in symbols {
                if let Some(point) = self.price(symbol).await? {
                    out.insert(symbol.clone(), point);
                }
            }
            Ok(out)
        }
    }

    fn config(trailing: bool) -> MonitorConfig {
        MonitorConfig {
            tick_seconds: 30,
            trailing_stop_enabled: trailing,
            trailing_retracement_pct: 2.0,
            emission_capacity: 16,
        }
    }

    fn watch(side: Side) -> Watch {
        let (tp1, tp2, stop) = match side {
            Side::Buy => (1.05, 1.10, 0.95),
            Side::Sell => (0.95, 0.90, 1.05),
        };
        Watch {
            trade_id: "t-1".into(),
            symbol: "FOO".into(),
            side,
            tp1,
            tp2,
            stop_loss: stop,
            deadline: Utc::now() + ChronoDuration::hours(1),
            state: ArmState::Armed,
            trailing: None,
        }
    }

    fn eval(w: &mut Watch, price: f64, trailing: bool) -> Option<ExitKind> {
        PositionMonitor::evaluate(w, Some(price), Utc::now(), &config(trailing))
    }

    #[test]
    fn test_buy_tp1_then_tp2_then_trailing() {
        let mut w = watch(Side::Buy);

        assert_eq!(eval(&mut w, 1.02, true), None);
        assert_eq!(eval(&mut w, 1.06, true), Some(ExitKind::Tp1));
        assert_eq!(w.state, ArmState::Tp1Hit);

        assert_eq!(eval(&mut w, 1.11, true), Some(ExitKind::Tp2));
        assert_eq!(w.state, ArmState::Tp2Hit);
        assert_eq!(w.trailing, Some(1.11));

        // new high raises the extremum, no emission
        assert_eq!(eval(&mut w, 1.13, true), None);
        assert_eq!(w.trailing, Some(1.13));

        // 1.107 <= 1.13 * 0.98 = 1.1074
        assert_eq!(eval(&mut w, 1.107, true), Some(ExitKind::TrailingStop));
    }

    #[test]
    fn test_trailing_extremum_is_monotonic() {
        let mut w = watch(Side::Buy);
        eval(&mut w, 1.06, true);
        eval(&mut w, 1.11, true);
        let mut last = w.trailing.unwrap();
        for price in [1.12, 1.10, 1.14, 1.12, 1.15] {
            eval(&mut w, price, true);
            let high = w.trailing.unwrap();
            assert!(high >= last);
            last = high;
        }
        assert_eq!(last, 1.15);
    }

    #[test]
    fn test_stop_loss_beats_everything_but_deadline() {
        let mut w = watch(Side::Buy);
        assert_eq!(eval(&mut w, 0.94, true), Some(ExitKind::StopLoss));
    }

    #[test]
    fn test_deadline_beats_stop_loss() {
        let mut w = watch(Side::Buy);
        w.deadline = Utc::now() - ChronoDuration::seconds(1);
        // price would also trip the stop; deadline wins the tie-break
        let kind =
            PositionMonitor::evaluate(&mut w, Some(0.80), Utc::now(), &config(true)).unwrap();
        assert_eq!(kind, ExitKind::Deadline);
    }

    #[test]
    fn test_deadline_fires_without_price() {
        let mut w = watch(Side::Buy);
        w.deadline = Utc::now() - ChronoDuration::seconds(1);
        let kind = PositionMonitor::evaluate(&mut w, None, Utc::now(), &config(true)).unwrap();
        assert_eq!(kind, ExitKind::Deadline);
    }

    #[test]
    fn test_one_emission_per_tick_even_when_all_levels_cross() {
        // price jumps straight past tp1 and tp2 in one tick: only TP1 fires
        let mut w = watch(Side::Buy);
        assert_eq!(eval(&mut w, 1.20, true), Some(ExitKind::Tp1));
        // next tick reaches tp2
        assert_eq!(eval(&mut w, 1.20, true), Some(ExitKind::Tp2));
    }

    #[test]
    fn test_sell_side_mirrors() {
        let mut w = watch(Side::Sell);

        assert_eq!(eval(&mut w, 1.01, true), None);
        assert_eq!(eval(&mut w, 1.06, true), Some(ExitKind::StopLoss));

        let mut w = watch(Side::Sell);
        assert_eq!(eval(&mut w, 0.94, true), Some(ExitKind::Tp1));
        assert_eq!(eval(&mut w, 0.89, true), Some(ExitKind::Tp2));
        assert_eq!(w.trailing, Some(0.89));

        // lower low tightens the trailing floor
        assert_eq!(eval(&mut w, 0.87, true), None);
        assert_eq!(w.trailing, Some(0.87));

        // 0.888 >= 0.87 * 1.02 = 0.8874
        assert_eq!(eval(&mut w, 0.888, true), Some(ExitKind::TrailingStop));
    }

    #[test]
    fn test_tp2_without_trailing_has_no_trailing_state() {
        let mut w = watch(Side::Buy);
        eval(&mut w, 1.06, false);
        assert_eq!(eval(&mut w, 1.11, false), Some(ExitKind::Tp2));
        assert_eq!(w.trailing, None);
        // trailing disabled: tp2_hit state emits nothing further
        assert_eq!(eval(&mut w, 1.05, false), None);
    }

    fn trade_for_monitor() -> Trade {
        use crate::resolver::{BindingSource, TokenBinding};
        use crate::signal::Signal;
        let binding = |symbol: &str| TokenBinding {
            symbol: symbol.into(),
            network: "arbitrum".into(),
            contract_address: format!("0x{}", "11".repeat(20)),
            decimals: 18,
            is_native: false,
            source: BindingSource::Known,
            verified: true,
        };
        let signal = Signal {
            signal_id: "sig-1".into(),
            caller_id: "caller-1".into(),
            wallet_address: format!("0x{}", "aa".repeat(20)),
            side: Side::Buy,
            symbol: "FOO".into(),
            entry_price: 1.0,
            tp1: 1.05,
            tp2: 1.10,
            stop_loss: 0.95,
            deadline: Utc::now() + ChronoDuration::hours(1),
        };
        Trade::new(
            "t-1".into(),
            &signal,
            "arbitrum".into(),
            binding("USDC"),
            binding("FOO"),
        )
    }

    #[tokio::test]
    async fn test_tick_emits_and_detaches_on_terminal() {
        let feed = StubFeed::new();
        feed.set("FOO", 0.90); // below stop
        let (tx, mut rx) = mpsc::channel(16);
        let monitor = PositionMonitor::new(
            feed.clone(),
            config(true),
            tx,
            CancellationToken::new(),
        );

        monitor.attach(&trade_for_monitor()).await;
        assert_eq!(monitor.watched_count().await, 1);

        monitor.tick(Utc::now()).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, ExitKind::StopLoss);
        assert_eq!(event.trade_id, "t-1");
        assert_eq!(monitor.watched_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_price_fetch_skips_tick() {
        let feed = StubFeed::new();
        feed.set("FOO", 0.90);
        *feed.fail.lock().unwrap() = true;
        let (tx, mut rx) = mpsc::channel(16);
        let monitor = PositionMonitor::new(
            feed.clone(),
            config(true),
            tx,
            CancellationToken::new(),
        );

        monitor.attach(&trade_for_monitor()).await;
        monitor.tick(Utc::now()).await;
        assert!(rx.try_recv().is_err()); // nothing emitted
        assert_eq!(monitor.watched_count().await, 1); // no state change
    }

    #[tokio::test]
    async fn test_tp1_keeps_watch_attached() {
        let feed = StubFeed::new();
        feed.set("FOO", 1.06);
        let (tx, mut rx) = mpsc::channel(16);
        let monitor = PositionMonitor::new(
            feed.clone(),
            config(true),
            tx,
            CancellationToken::new(),
        );

        monitor.attach(&trade_for_monitor()).await;
        monitor.tick(Utc::now()).await;
        assert_eq!(rx.recv().await.unwrap().kind, ExitKind::Tp1);
        // still watching for tp2 / stop
        assert_eq!(monitor.watched_count().await, 1);
    }
}
