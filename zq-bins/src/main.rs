//! zq - run the live trading engine or the event-driven backtester.
//!
//! Exit codes: 0 clean stop, 1 configuration error, 2 recovery failure,
//! 3 runtime panic (after a checkpoint attempt), 130 interrupted.

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use zq_core::adapter::hyperliquid::HyperliquidAdapter;
use zq_core::adapter::{DataProvider, ExecutionClient};
use zq_core::backtest::{BacktestEngine, HistoricalData};
use zq_core::cache::Cache;
use zq_core::config::Config;
use zq_core::core::types::Candle;
use zq_core::data::DataEngine;
use zq_core::engine::LiveTradingEngine;
use zq_core::execution::ExecutionEngine;
use zq_core::recovery::RecoveryManager;
use zq_core::risk::stops::StopLossManager;
use zq_core::risk::RiskEngine;
use zq_core::strategy::{Strategy, ThresholdStrategy};
use zq_core::utils::logger::init_logger;

const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 1;
const EXIT_RECOVERY: i32 = 2;
const EXIT_PANIC: i32 = 3;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "zq", about = "event-driven trading runtime", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the live trading engine.
    Run {
        /// Dispatch mode: "event" or "tick" (overrides the config file).
        #[arg(long)]
        mode: Option<String>,
        #[arg(long)]
        config: PathBuf,
    },
    /// Replay historical candles through a strategy.
    Backtest {
        /// Strategy name (currently: "threshold").
        #[arg(long)]
        strategy: String,
        /// Historical candles, JSON-encoded `HistoricalData`.
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        config: PathBuf,
        /// Write the full report as JSON here.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run { mode, config } => cmd_run(mode, &config),
        Command::Backtest {
            strategy,
            data,
            config,
            output,
        } => cmd_backtest(&strategy, &data, &config, output.as_deref()),
    };
    std::process::exit(code);
}

fn load_config(path: &std::path::Path, mode_override: Option<&str>) -> Result<Config, i32> {
    let mut config = match Config::load(path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return Err(EXIT_CONFIG);
        }
    };
    if let Some(mode) = mode_override {
        config.engine.mode = mode.to_string();
    }
    if let Err(err) = config.validate() {
        eprintln!("configuration error: {err}");
        return Err(EXIT_CONFIG);
    }
    Ok(config)
}

fn cmd_run(mode: Option<String>, config_path: &std::path::Path) -> i32 {
    let config = match load_config(config_path, mode.as_deref()) {
        Ok(config) => config,
        Err(code) => return code,
    };
    init_logger(&config.logging.level, config.logging.json);

    let outcome = std::panic::catch_unwind(|| run_engine(&config));
    match outcome {
        Ok(code) => code,
        Err(_) => {
            error!("runtime panic; a final checkpoint was attempted on the way down");
            EXIT_PANIC
        }
    }
}

fn run_engine(config: &Config) -> i32 {
    let bus = zq_core::bus::MessageBus::new();
    let cache = Arc::new(Cache::new(bus.clone(), config.cache_config()));

    let adapter = match HyperliquidAdapter::new(config.hyperliquid_config(), bus.clone()) {
        Ok(adapter) => adapter,
        Err(err) => {
            eprintln!("adapter initialisation failed: {err}");
            return EXIT_CONFIG;
        }
    };

    let risk = RiskEngine::new(bus.clone(), Arc::clone(&cache), config.risk_config());
    let execution = ExecutionEngine::new(
        bus.clone(),
        Arc::clone(&cache),
        Arc::clone(&risk),
        Arc::clone(&adapter) as Arc<dyn ExecutionClient>,
        config.execution_config(),
    );
    let stops = StopLossManager::new(Arc::clone(&execution));
    let data = DataEngine::new(bus.clone(), Arc::clone(&cache), config.data_config());
    data.register_provider(Arc::clone(&adapter) as Arc<dyn DataProvider>);

    let pairs = config.subscribed_pairs().expect("validated at load");
    let timeframe = config.candle_timeframe().expect("validated at load");
    for pair in pairs {
        if let Err(err) = data.subscribe(pair.clone(), timeframe) {
            error!(%pair, %err, "subscription failed");
        }
    }

    let recovery = RecoveryManager::new(
        bus.clone(),
        Arc::clone(&cache),
        Arc::clone(&execution),
        Arc::clone(&adapter) as Arc<dyn ExecutionClient>,
        Arc::clone(&risk),
        config.recovery_config(),
    );

    let engine_config = config.engine_config().expect("validated at load");
    let engine = LiveTradingEngine::new(
        bus,
        cache,
        data,
        Arc::clone(&execution),
        risk,
        stops,
        Some(recovery),
        engine_config,
    );

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let token = engine.shutdown_token();
        let interrupted = Arc::clone(&interrupted);
        if let Err(err) = ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::Release);
            token.stop();
        }) {
            error!(%err, "could not install SIGINT handler");
        }
    }

    match engine.start() {
        Ok(report) => {
            if let Some(report) = report {
                info!(?report, "recovery report");
            }
        }
        Err(err) => {
            error!(%err, "engine start failed during recovery");
            return EXIT_RECOVERY;
        }
    }
    if let Err(err) = ExecutionClient::stream_order_updates(&*adapter) {
        error!(%err, "account stream unavailable");
    }

    engine.run_until_stopped();
    if interrupted.load(Ordering::Acquire) {
        EXIT_INTERRUPTED
    } else {
        EXIT_OK
    }
}

fn cmd_backtest(
    strategy_name: &str,
    data_path: &std::path::Path,
    config_path: &std::path::Path,
    output: Option<&std::path::Path>,
) -> i32 {
    let config = match load_config(config_path, None) {
        Ok(config) => config,
        Err(code) => return code,
    };
    init_logger(&config.logging.level, config.logging.json);

    let data = match load_historical_data(data_path) {
        Ok(data) => data,
        Err(err) => {
            eprintln!("could not load historical data: {err}");
            return EXIT_CONFIG;
        }
    };

    let mut strategy: Box<dyn Strategy> = match strategy_name {
        "threshold" => {
            // Bands straddle the first close by 1%.
            let first_close = data.candles[0].close;
            Box::new(ThresholdStrategy::new(
                data.pair.clone(),
                first_close * Decimal::new(101, 2),
                first_close * Decimal::new(99, 2),
                Decimal::ONE,
            ))
        }
        other => {
            eprintln!("unknown strategy {other:?}");
            return EXIT_CONFIG;
        }
    };

    let backtest_config = config.backtest_config().expect("validated at load");
    let engine = BacktestEngine::new(backtest_config);
    let report = match engine.run(&data, strategy.as_mut()) {
        Ok(report) => report,
        Err(err) => {
            error!(%err, "backtest failed");
            return EXIT_PANIC;
        }
    };

    let summary = serde_json::json!({
        "orders_submitted": report.orders_submitted,
        "fills": report.fills,
        "trades": report.trades.len(),
        "final_equity": report.final_equity.to_string(),
        "total_return": report.performance.total_return,
        "annualized_return": report.performance.annualized_return,
        "profit_factor": report.performance.profit_factor,
        "win_rate": report.performance.win_rate,
        "avg_trade_duration_secs": report.performance.avg_trade_duration_secs,
        "max_drawdown": report.performance.max_drawdown,
        "sharpe": report.performance.sharpe,
        "sortino": report.performance.sortino,
    });
    match output {
        Some(path) => {
            if let Err(err) = std::fs::write(path, summary.to_string()) {
                eprintln!("could not write report: {err}");
                return EXIT_CONFIG;
            }
            info!(path = %path.display(), "report written");
        }
        None => println!("{summary:#}"),
    }
    EXIT_OK
}

#[derive(serde::Deserialize)]
struct HistoricalDataFile {
    pair: String,
    timeframe: String,
    candles: Vec<Candle>,
}

fn load_historical_data(path: &std::path::Path) -> anyhow::Result<HistoricalData> {
    let raw = std::fs::read_to_string(path)?;
    let file: HistoricalDataFile = serde_json::from_str(&raw)?;
    let data = HistoricalData {
        pair: file.pair.parse()?,
        timeframe: file.timeframe.parse()?,
        candles: file.candles,
    };
    data.validate()?;
    Ok(data)
}
