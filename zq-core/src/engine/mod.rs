//! Live trading engine: composition root and lifecycle owner
//!
//! Builds the runtime out of the shared bus, cache, data engine,
//! execution engine, risk engine, stop manager, metrics tracker and the
//! optional recovery manager, then owns start/stop for all of them.
//!
//! Two dispatch modes:
//!
//! - **event-driven**: strategies react to `market_data.*` and `order.*`
//!   bus events; no internal timer
//! - **tick-driven**: a clock thread dispatches `system.tick` at a fixed
//!   interval and drives tick strategies synchronously; when dispatch
//!   overruns the interval the overlapping ticks are dropped and counted
//!   in `ticks_missed`
//!
//! Shutdown: cancel open orders (configurable), disconnect providers,
//! flush a final checkpoint, then drain bus handlers within a bounded
//! grace period; anything still running is detached and reported.

use crate::analytics::{RiskMetrics, RiskMetricsConfig};
use crate::bus::{Event, MessageBus};
use crate::cache::Cache;
use crate::core::errors::Result;
use crate::core::types::CancelFilter;
use crate::core::Timestamp;
use crate::data::DataEngine;
use crate::execution::ExecutionEngine;
use crate::recovery::{RecoveryManager, RecoveryReport};
use crate::resilience::ShutdownToken;
use crate::risk::stops::StopLossManager;
use crate::risk::RiskEngine;
use crate::strategy::{Strategy, StrategyContext};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// React to bus events only.
    Event,
    /// Fixed-interval clock dispatch.
    Tick,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mode: EngineMode,
    pub tick_interval: Duration,
    pub cancel_orders_on_stop: bool,
    /// Grace period for draining handlers on stop.
    pub stop_grace: Duration,
    pub run_recovery: bool,
    /// Cadence for `system.metrics.update`.
    pub metrics_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: EngineMode::Event,
            tick_interval: Duration::from_millis(100),
            cancel_orders_on_stop: true,
            stop_grace: Duration::from_secs(5),
            run_recovery: true,
            metrics_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
pub struct EngineStats {
    pub ticks: AtomicU64,
    pub ticks_missed: AtomicU64,
}

type SharedStrategy = Arc<Mutex<Box<dyn Strategy>>>;

pub struct LiveTradingEngine {
    bus: MessageBus,
    cache: Arc<Cache>,
    data: Arc<DataEngine>,
    execution: Arc<ExecutionEngine>,
    risk: Arc<RiskEngine>,
    stops: Arc<StopLossManager>,
    recovery: Option<Arc<RecoveryManager>>,
    metrics: Arc<Mutex<RiskMetrics>>,
    config: EngineConfig,
    shutdown: ShutdownToken,
    stats: Arc<EngineStats>,
    tick_strategies: Arc<Mutex<Vec<SharedStrategy>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl LiveTradingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: MessageBus,
        cache: Arc<Cache>,
        data: Arc<DataEngine>,
        execution: Arc<ExecutionEngine>,
        risk: Arc<RiskEngine>,
        stops: Arc<StopLossManager>,
        recovery: Option<Arc<RecoveryManager>>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            cache,
            data,
            execution,
            risk,
            stops,
            recovery,
            metrics: Arc::new(Mutex::new(RiskMetrics::new(RiskMetricsConfig::default()))),
            config,
            shutdown: ShutdownToken::new(),
            stats: Arc::new(EngineStats::default()),
            tick_strategies: Arc::new(Mutex::new(Vec::new())),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Attach a strategy: quotes, candles and order updates come from the
    /// bus; in tick mode the clock drives `on_tick` as well.
    pub fn attach_strategy(&self, strategy: Box<dyn Strategy>) {
        let name = strategy.name().to_string();
        let shared: SharedStrategy = Arc::new(Mutex::new(strategy));

        let cache = Arc::clone(&self.cache);
        let execution = Arc::clone(&self.execution);
        let handle = Arc::clone(&shared);
        self.bus.subscribe(
            "market_data.**",
            Box::new(move |_, event| {
                let ctx =
                    StrategyContext::new(Arc::clone(&cache), Arc::clone(&execution), Timestamp::now());
                let mut strategy = handle.lock();
                match event {
                    Event::Quote(quote) => strategy.on_quote(&ctx, quote),
                    Event::Candle(candle) => strategy.on_candle(&ctx, candle),
                    _ => {}
                }
                Ok(())
            }),
        );

        let cache = Arc::clone(&self.cache);
        let execution = Arc::clone(&self.execution);
        let handle = Arc::clone(&shared);
        self.bus.subscribe(
            "order.**",
            Box::new(move |topic, event| {
                // The snapshot topic is for the recovery manager only.
                if topic == "order.snapshot" {
                    return Ok(());
                }
                if let Event::Order(order) = event {
                    let ctx = StrategyContext::new(
                        Arc::clone(&cache),
                        Arc::clone(&execution),
                        Timestamp::now(),
                    );
                    handle.lock().on_order(&ctx, order);
                }
                Ok(())
            }),
        );

        if matches!(self.config.mode, EngineMode::Tick) {
            self.tick_strategies.lock().push(shared);
        }
        info!(strategy = %name, mode = ?self.config.mode, "strategy attached");
    }

    /// Start everything. Order matters: commands first so recovery and the
    /// kill switch can reach the execution engine, then streams, then data.
    pub fn start(self: &Arc<Self>) -> Result<Option<RecoveryReport>> {
        self.execution.register_commands()?;
        self.risk.register_commands()?;
        self.execution.start();
        self.stops.start(&self.bus);
        self.watch_component_crashes();
        self.start_metrics_tracker();

        let recovery_report = match (&self.recovery, self.config.run_recovery) {
            (Some(recovery), true) => {
                let report = recovery.recover()?;
                info!(?report, "recovery finished");
                Some(report)
            }
            _ => None,
        };
        if let Some(recovery) = &self.recovery {
            recovery.start();
        }

        self.data.start()?;

        if matches!(self.config.mode, EngineMode::Tick) {
            self.start_clock();
        }
        info!(mode = ?self.config.mode, "live trading engine started");
        Ok(recovery_report)
    }

    /// Block until the shutdown token fires, then run the stop sequence.
    pub fn run_until_stopped(self: &Arc<Self>) {
        while !self.shutdown.wait_timeout(Duration::from_millis(200)) {}
        self.stop();
    }

    /// Stop sequence: cancel orders, stop data, final checkpoint, drain.
    pub fn stop(&self) {
        self.shutdown.stop();

        if self.config.cancel_orders_on_stop {
            let report = self.execution.cancel_all(&CancelFilter::default());
            info!(
                cancelled = report.cancelled,
                failed = report.failed,
                "open orders cancelled on stop"
            );
        }

        self.data.stop();
        if let Some(recovery) = &self.recovery {
            recovery.stop();
        }

        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
        self.bus.close(self.config.stop_grace);
        info!(
            ticks = self.stats.ticks.load(Ordering::Relaxed),
            ticks_missed = self.stats.ticks_missed.load(Ordering::Relaxed),
            "live trading engine stopped"
        );
    }

    fn watch_component_crashes(self: &Arc<Self>) {
        let risk = Arc::clone(&self.risk);
        self.bus.subscribe(
            "system.component.*.crashed",
            Box::new(move |_, event| {
                if let Event::ComponentCrashed { component, message } = event {
                    warn!(component, message, "component crashed");
                    if matches!(component.as_str(), "data" | "execution" | "risk") {
                        risk.trip(&format!("critical component {component} crashed: {message}"));
                    }
                }
                Ok(())
            }),
        );
    }

    fn start_metrics_tracker(self: &Arc<Self>) {
        // Every balance write extends the equity series.
        let metrics = Arc::clone(&self.metrics);
        self.bus.subscribe(
            "cache.balances.**",
            Box::new(move |_, event| {
                if let Event::CacheBalance { new, .. } = event {
                    metrics.lock().push_equity(new.ts, new.total);
                }
                Ok(())
            }),
        );

        let engine = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("metrics-cadence".into())
            .spawn(move || {
                while !engine.shutdown.wait_timeout(engine.config.metrics_interval) {
                    let report = engine.metrics.lock().report();
                    engine
                        .bus
                        .publish("system.metrics.update", Event::Metrics(report));
                }
            })
            .expect("failed to spawn metrics thread");
        self.workers.lock().push(handle);
    }

    fn start_clock(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("clock".into())
            .spawn(move || {
                let interval = engine.config.tick_interval;
                let mut next = Instant::now() + interval;
                let mut seq = 0u64;
                loop {
                    let now = Instant::now();
                    if now < next {
                        if engine.shutdown.wait_timeout(next - now) {
                            break;
                        }
                    } else if engine.shutdown.is_stopped() {
                        break;
                    }

                    // Ticks that fired while the last dispatch was still
                    // running are coalesced away.
                    let mut now = Instant::now();
                    while now >= next + interval {
                        engine.stats.ticks_missed.fetch_add(1, Ordering::Relaxed);
                        next += interval;
                        now = Instant::now();
                    }

                    seq += 1;
                    engine.stats.ticks.fetch_add(1, Ordering::Relaxed);
                    let at = Timestamp::now();
                    engine
                        .bus
                        .publish("system.tick", Event::Tick { seq, at });

                    // Tick strategies run on this thread; overruns surface
                    // as missed ticks above instead of concurrent dispatch.
                    let strategies = engine.tick_strategies.lock().clone();
                    for strategy in strategies {
                        let ctx = StrategyContext::new(
                            Arc::clone(&engine.cache),
                            Arc::clone(&engine.execution),
                            at,
                        );
                        strategy.lock().on_tick(&ctx);
                    }

                    next += interval;
                }
            })
            .expect("failed to spawn clock thread");
        self.workers.lock().push(handle);
    }
}

impl std::fmt::Debug for LiveTradingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveTradingEngine")
            .field("mode", &self.config.mode)
            .field("ticks", &self.stats.ticks.load(Ordering::Relaxed))
            .finish()
    }
}
