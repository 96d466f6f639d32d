//! Long-only spot trading bot entry point.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use elite_bot::api::{create_router, AppState};
use elite_bot::backtest::{run_backtest, run_walk_forward, BacktestReport, WalkForwardConfig};
use elite_bot::config::{Config, ExchangeKind};
use elite_bot::engine::Engine;
use elite_bot::exchange::{base_asset, build_exchange, ws::KlineStream, QUOTE_ASSET};
use elite_bot::metrics;
use elite_bot::risk::RiskManager;
use elite_bot::store::TradeStore;
use elite_bot::utils::shutdown_signal;

/// Most candles a backtest downloads.
const MAX_BACKTEST_CANDLES: usize = 2000;

/// Long-only spot trading bot for Binance and Bybit.
#[derive(Parser, Debug)]
#[command(name = "elite_bot")]
#[command(about = "Trend-following long-only spot bot for Binance and Bybit")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Trade on live closed candles.
    Live {
        /// Venue to trade on.
        #[arg(long, value_enum)]
        exchange: ExchangeKind,

        /// Simulate fills against a paper wallet (overrides DRY_RUN).
        #[arg(long)]
        dry_run: Option<bool>,

        /// HTTP server port for health/status (overrides PORT).
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Replay the strategy over recent history.
    Backtest {
        /// Venue to download candles from.
        #[arg(long, value_enum)]
        exchange: ExchangeKind,

        /// Symbol to replay.
        #[arg(long, default_value = "BTCUSDT")]
        symbol: String,

        /// Days of history to fetch.
        #[arg(long, default_value = "90")]
        days: u32,

        /// Also report every walk-forward fold.
        #[arg(long)]
        walk_forward: bool,
    },

    /// Check configuration validity.
    CheckConfig {
        /// Venue whose settings are checked.
        #[arg(long, value_enum)]
        exchange: ExchangeKind,
    },

    /// Check venue connectivity and balances.
    CheckBalance {
        /// Venue to query.
        #[arg(long, value_enum)]
        exchange: ExchangeKind,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logging settings come from the environment; failures surface in the command itself.
    let env_config = Config::load().unwrap_or_default();
    init_tracing(args.verbose, &env_config.log_level, env_config.log_json);

    match args.command {
        Command::Live {
            exchange,
            dry_run,
            port,
        } => cmd_live(exchange, dry_run, port).await,
        Command::Backtest {
            exchange,
            symbol,
            days,
            walk_forward,
        } => cmd_backtest(exchange, &symbol, days, walk_forward).await,
        Command::CheckConfig { exchange } => cmd_check_config(exchange).await,
        Command::CheckBalance { exchange } => cmd_check_balance(exchange).await,
    }
}

/// `--verbose` wins, then `RUST_LOG`, then `LOG_LEVEL`.
fn init_tracing(verbose: bool, log_level: &str, json: bool) {
    let filter = if verbose {
        EnvFilter::new("elite_bot=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer()))
        .init();
}

/// Load and validate configuration for `exchange`.
fn load_config(exchange: ExchangeKind) -> anyhow::Result<Config> {
    let config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    if let Err(e) = config.validate(exchange) {
        error!("Invalid configuration: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed: {}", e));
    }
    Ok(config)
}

/// Run the live engine until a shutdown signal or the kline stream ends.
async fn cmd_live(exchange: ExchangeKind, dry_run_override: Option<bool>, port_override: Option<u16>) -> anyhow::Result<()> {
    info!("Loading configuration...");
    let mut config = Config::load()?;
    if let Some(dry_run) = dry_run_override {
        config.dry_run = dry_run;
    }
    if let Some(port) = port_override {
        config.port = port;
    }
    if let Err(e) = config.validate(exchange) {
        error!("Invalid configuration: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed: {}", e));
    }

    let symbols = config.symbol_list();
    info!(
        exchange = %exchange,
        symbols = ?symbols,
        mode = if config.dry_run { "DRY RUN" } else { "LIVE TRADING" },
        "Configuration loaded"
    );
    if config.kill_switch {
        warn!("KILL_SWITCH is set: no new entries will be opened");
    }

    metrics::install_prometheus(SocketAddr::from(([0, 0, 0, 0], config.metrics_port)));

    let venue = build_exchange(&config, exchange)?;
    let store = TradeStore::connect(&config.db_path).await?;
    let settings = config.exchange_settings(exchange);
    let primary_tf = config.primary_timeframe()?;
    let port = config.port;

    let mut engine = Engine::new(config, venue, store)?;
    let stream = Arc::new(KlineStream::new(exchange, settings.ws_url, symbols, primary_tf));

    let app_state = AppState::new(engine.ready_flag(), stream.connected_flag(), engine.status_handle());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    let router = create_router(app_state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await {
            error!("HTTP server failed: {}", e);
        }
    });

    // Klines buffer in the channel while history is seeded.
    let klines = stream.run_with_reconnect();
    engine.run_live(klines, shutdown_signal()).await?;

    let summary = engine.store().summary().await?;
    info!(
        closed = summary.closed,
        wins = summary.wins,
        total_pnl = %summary.total_pnl,
        "Shutdown complete"
    );
    Ok(())
}

/// Download history and print the backtest report.
async fn cmd_backtest(exchange: ExchangeKind, symbol: &str, days: u32, walk_forward: bool) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    // Downloading public candles needs no credentials.
    config.dry_run = true;
    config.validate(exchange)?;

    let tf = config.primary_timeframe()?;
    let wanted = (i64::from(days) * 24 * 60 / tf.minutes()).max(1) as usize;
    let limit = wanted.min(MAX_BACKTEST_CANDLES);
    let symbol = symbol.to_uppercase();

    info!(exchange = %exchange, symbol = %symbol, tf = %tf, limit, "Fetching history");
    let venue = build_exchange(&config, exchange)?;
    let candles = venue.fetch_ohlcv(&symbol, tf, limit).await?;

    let risk = RiskManager::from_config(&config);
    let start_balance = config.backtest_start_balance;

    println!("======================================================================");
    println!("ELITE BOT - BACKTEST {} {} ({} candles)", symbol, tf, candles.len());
    println!("======================================================================");

    let report = run_backtest(&candles, &config, &risk, start_balance);
    print_report("Full history", &report);
    println!("{}", serde_json::to_string(&report)?);

    if walk_forward {
        let folds = run_walk_forward(&candles, WalkForwardConfig::default(), &config, &risk, start_balance);
        println!("----------------------------------------------------------------------");
        println!("Walk-forward: {} folds", folds.len());
        for (fold, report) in folds.iter().enumerate() {
            print_report(&format!("Fold {}", fold), report);
        }
    }

    println!("======================================================================");
    Ok(())
}

fn print_report(label: &str, report: &BacktestReport) {
    println!(
        "  {:<14} pnl={} trades={} win_rate={:.2}% max_dd={:.2}% sharpe={:.2}",
        label,
        report.pnl.round_dp(2),
        report.trades,
        report.win_rate * 100.0,
        report.max_dd * 100.0,
        report.sharpe
    );
}

/// Print a step label without a newline, flushed so it shows before the step runs.
fn step(out: &mut impl Write, label: &str) -> std::io::Result<()> {
    write!(out, "{label}")?;
    out.flush()
}

/// Check configuration validity.
async fn cmd_check_config(exchange: ExchangeKind) -> anyhow::Result<()> {
    println!("======================================================================");
    println!("ELITE BOT - CONFIGURATION CHECK ({})", exchange);
    println!("======================================================================");

    step(&mut std::io::stdout(), "Loading configuration... ")?;
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    step(&mut std::io::stdout(), "Validating configuration... ")?;
    match config.validate(exchange) {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    let settings = config.exchange_settings(exchange);
    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Symbols: {}", config.symbol_list().join(", "));
    println!(
        "  Timeframes: {} / {} / {}",
        config.primary_tf, config.secondary_tf, config.confirm_tf
    );
    println!("  EMA: {}/{}  RSI: {} (min {})  ATR: {}", config.ema_fast, config.ema_slow, config.rsi_period, config.rsi_long_min, config.atr_period);
    println!("  Position: {}% of free {}", config.position_pct * rust_decimal::Decimal::ONE_HUNDRED, QUOTE_ASSET);
    println!("  Stop/TP: {} / {} ATR", config.stop_atr_mult, config.tp_atr_mult);
    println!("  Partial TP: {}", config.partial_tp_pct);
    println!("  Trailing: {}", if config.trailing_enabled { "Enabled" } else { "Disabled" });
    println!("  Cooldown: {} candles", config.cooldown_candles);
    println!("  Regime filter: {}", if config.use_regime_filter { "Enabled" } else { "Disabled" });
    println!("  Order book imbalance min: {}", config.orderbook_imbalance_min);
    println!("  ML filter: {}", if config.ml_enabled { "Enabled" } else { "Disabled" });
    println!("  REST: {} ({})", settings.base_url, if settings.has_credentials() { "keys present" } else { "no keys" });
    println!("  WebSocket: {}", settings.ws_url);
    println!("  Dry Run: {}", config.dry_run);
    println!("  Kill Switch: {}", config.kill_switch);
    println!("  Journal: {}", config.db_path);
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Check venue connectivity and balances.
async fn cmd_check_balance(exchange: ExchangeKind) -> anyhow::Result<()> {
    println!("======================================================================");
    println!("ELITE BOT - BALANCE CHECK ({})", exchange);
    println!("======================================================================");

    let config = load_config(exchange)?;
    let settings = config.exchange_settings(exchange);
    println!("Host: {}", settings.base_url);
    println!("Dry Run: {}", config.dry_run);
    println!("======================================================================");

    step(&mut std::io::stdout(), "\n1. Creating client... ")?;
    let venue = build_exchange(&config, exchange)?;
    println!("OK");

    step(&mut std::io::stdout(), &format!("\n2. Getting {} balance... ", QUOTE_ASSET))?;
    match venue.fetch_usdt_balance().await {
        Ok(balance) => {
            println!("OK");
            println!("   {} free: {}", QUOTE_ASSET, balance);
        }
        Err(e) => {
            println!("FAILED");
            println!("   Error: {}", e);
        }
    }

    println!("\n3. Getting base balances...");
    for symbol in config.symbol_list() {
        match venue.fetch_base_free(&symbol).await {
            Ok(free) => println!("   {} free: {}", base_asset(&symbol), free),
            Err(e) => println!("   {} FAILED: {}", base_asset(&symbol), e),
        }
    }

    println!("\n======================================================================");
    println!("BALANCE CHECK COMPLETED");
    println!("======================================================================");

    Ok(())
}
