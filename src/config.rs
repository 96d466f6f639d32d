//! Application configuration loaded from environment variables.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;
use strum::{Display, EnumString};
use url::Url;

use crate::error::ConfigError;
use crate::market::Timeframe;

/// Supported trading venues.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, clap::ValueEnum, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Binance spot.
    Binance,
    /// Bybit v5 spot.
    Bybit,
}

/// Connection settings for one venue.
#[derive(Debug, Clone)]
pub struct ExchangeSettings {
    /// REST base URL.
    pub base_url: String,
    /// Public WebSocket URL.
    pub ws_url: String,
    /// API key.
    pub api_key: String,
    /// API secret.
    pub api_secret: String,
}

impl ExchangeSettings {
    /// Whether both key and secret are present.
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === General ===
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub log_json: bool,

    /// SQLite trade journal path.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Comma separated symbols, e.g. "BTCUSDT,SOLUSDT".
    #[serde(default = "default_symbols")]
    pub symbols: String,

    // === Timeframes ===
    /// Timeframe driving the engine.
    #[serde(default = "default_primary_tf")]
    pub primary_tf: String,

    /// Alignment timeframe.
    #[serde(default = "default_secondary_tf")]
    pub secondary_tf: String,

    /// Confirmation timeframe.
    #[serde(default = "default_confirm_tf")]
    pub confirm_tf: String,

    /// Candles fetched per symbol at startup.
    #[serde(default = "default_seed_candles")]
    pub seed_candles: usize,

    /// Maximum primary candles retained per symbol.
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    // === Strategy ===
    /// Fast EMA period.
    #[serde(default = "default_ema_fast")]
    pub ema_fast: usize,

    /// Slow EMA period.
    #[serde(default = "default_ema_slow")]
    pub ema_slow: usize,

    /// RSI period.
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,

    /// Minimum RSI for a long entry.
    #[serde(default = "default_rsi_long_min")]
    pub rsi_long_min: f64,

    /// ATR period.
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,

    /// Gate entries on the SMA50/SMA200 regime of the primary timeframe closes.
    #[serde(default)]
    pub use_regime_filter: bool,

    /// Allow entries in a NEUTRAL regime.
    #[serde(default = "default_true")]
    pub allow_neutral_regime: bool,

    /// Minimum top-10 bid/ask volume ratio (0 disables the gate).
    #[serde(default)]
    pub orderbook_imbalance_min: f64,

    // === Risk ===
    /// Fraction of free USDT committed per entry.
    #[serde(default = "default_position_pct")]
    pub position_pct: Decimal,

    /// Stop distance in ATRs.
    #[serde(default = "default_stop_atr_mult")]
    pub stop_atr_mult: Decimal,

    /// Take-profit distance in ATRs.
    #[serde(default = "default_tp_atr_mult")]
    pub tp_atr_mult: Decimal,

    /// Trail the stop below the best close.
    #[serde(default = "default_true")]
    pub trailing_enabled: bool,

    /// Candles to wait after an entry or exit.
    #[serde(default = "default_cooldown_candles")]
    pub cooldown_candles: u64,

    /// Concurrent positions per symbol (only 1 is supported).
    #[serde(default = "default_max_positions")]
    pub max_positions_per_symbol: u32,

    /// Taker fee rate.
    #[serde(default = "default_fee")]
    pub taker_fee: Decimal,

    /// Maker fee rate.
    #[serde(default = "default_fee")]
    pub maker_fee: Decimal,

    /// Assumed slippage in basis points.
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: Decimal,

    /// Fraction of the position sold at the first take-profit.
    #[serde(default = "default_partial_tp_pct")]
    pub partial_tp_pct: Decimal,

    /// Smallest entry notional worth sending.
    #[serde(default = "default_min_notional")]
    pub min_notional_usdt: Decimal,

    /// Block every new entry.
    #[serde(default)]
    pub kill_switch: bool,

    // === ML filter ===
    /// Enable the ML confirmation filter.
    #[serde(default = "default_true")]
    pub ml_enabled: bool,

    /// Minimum probability accepted by the ML filter.
    #[serde(default = "default_ml_min_proba")]
    pub ml_min_proba: f64,

    // === Operation Modes ===
    /// Simulation mode (orders filled against a paper wallet).
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Starting USDT for the paper wallet.
    #[serde(default = "default_sim_balance")]
    pub sim_balance: Decimal,

    /// Starting balance for backtests.
    #[serde(default = "default_sim_balance")]
    pub backtest_start_balance: Decimal,

    // === REST limits ===
    /// Token bucket refill rate.
    #[serde(default = "default_rest_rate")]
    pub rest_rate_per_sec: f64,

    /// Token bucket capacity.
    #[serde(default = "default_rest_burst")]
    pub rest_burst: f64,

    // === Binance ===
    /// Binance REST base URL.
    #[serde(default = "default_binance_base_url")]
    pub binance_base_url: String,

    /// Binance WebSocket URL.
    #[serde(default = "default_binance_ws_url")]
    pub binance_ws_url: String,

    /// Binance API key.
    #[serde(default)]
    pub binance_api_key: String,

    /// Binance API secret.
    #[serde(default)]
    pub binance_api_secret: String,

    // === Bybit ===
    /// Bybit REST base URL.
    #[serde(default = "default_bybit_base_url")]
    pub bybit_base_url: String,

    /// Bybit WebSocket URL.
    #[serde(default = "default_bybit_ws_url")]
    pub bybit_ws_url: String,

    /// Bybit API key.
    #[serde(default)]
    pub bybit_api_key: String,

    /// Bybit API secret.
    #[serde(default)]
    pub bybit_api_secret: String,

    // === Server Configuration ===
    /// HTTP server port for health/status endpoints.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Prometheus exporter port.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_db_path() -> String {
    "./trades.db".to_string()
}

fn default_symbols() -> String {
    "BTCUSDT,SOLUSDT".to_string()
}

fn default_primary_tf() -> String {
    "15m".to_string()
}

fn default_secondary_tf() -> String {
    "30m".to_string()
}

fn default_confirm_tf() -> String {
    "1h".to_string()
}

fn default_seed_candles() -> usize {
    600
}

fn default_max_history() -> usize {
    2000
}

fn default_ema_fast() -> usize {
    50
}

fn default_ema_slow() -> usize {
    200
}

fn default_rsi_period() -> usize {
    14
}

fn default_rsi_long_min() -> f64 {
    55.0
}

fn default_atr_period() -> usize {
    14
}

fn default_position_pct() -> Decimal {
    Decimal::new(3, 2) // 0.03
}

fn default_stop_atr_mult() -> Decimal {
    Decimal::new(15, 1) // 1.5
}

fn default_tp_atr_mult() -> Decimal {
    Decimal::new(3, 0)
}

fn default_cooldown_candles() -> u64 {
    3
}

fn default_max_positions() -> u32 {
    1
}

fn default_fee() -> Decimal {
    Decimal::new(1, 3) // 0.001
}

fn default_slippage_bps() -> Decimal {
    Decimal::new(5, 0)
}

fn default_partial_tp_pct() -> Decimal {
    Decimal::new(5, 1) // 0.5
}

fn default_min_notional() -> Decimal {
    Decimal::new(10, 0)
}

fn default_ml_min_proba() -> f64 {
    0.55
}

fn default_true() -> bool {
    true
}

fn default_sim_balance() -> Decimal {
    Decimal::new(10_000, 0)
}

fn default_rest_rate() -> f64 {
    8.0
}

fn default_rest_burst() -> f64 {
    16.0
}

fn default_binance_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_binance_ws_url() -> String {
    "wss://stream.binance.com:9443/ws".to_string()
}

fn default_bybit_base_url() -> String {
    "https://api.bybit.com".to_string()
}

fn default_bybit_ws_url() -> String {
    "wss://stream.bybit.com/v5/public/spot".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            db_path: default_db_path(),
            symbols: default_symbols(),
            primary_tf: default_primary_tf(),
            secondary_tf: default_secondary_tf(),
            confirm_tf: default_confirm_tf(),
            seed_candles: default_seed_candles(),
            max_history: default_max_history(),
            ema_fast: default_ema_fast(),
            ema_slow: default_ema_slow(),
            rsi_period: default_rsi_period(),
            rsi_long_min: default_rsi_long_min(),
            atr_period: default_atr_period(),
            use_regime_filter: false,
            allow_neutral_regime: true,
            orderbook_imbalance_min: 0.0,
            position_pct: default_position_pct(),
            stop_atr_mult: default_stop_atr_mult(),
            tp_atr_mult: default_tp_atr_mult(),
            trailing_enabled: true,
            cooldown_candles: default_cooldown_candles(),
            max_positions_per_symbol: default_max_positions(),
            taker_fee: default_fee(),
            maker_fee: default_fee(),
            slippage_bps: default_slippage_bps(),
            partial_tp_pct: default_partial_tp_pct(),
            min_notional_usdt: default_min_notional(),
            kill_switch: false,
            ml_enabled: true,
            ml_min_proba: default_ml_min_proba(),
            dry_run: true,
            sim_balance: default_sim_balance(),
            backtest_start_balance: default_sim_balance(),
            rest_rate_per_sec: default_rest_rate(),
            rest_burst: default_rest_burst(),
            binance_base_url: default_binance_base_url(),
            binance_ws_url: default_binance_ws_url(),
            binance_api_key: String::new(),
            binance_api_secret: String::new(),
            bybit_base_url: default_bybit_base_url(),
            bybit_ws_url: default_bybit_ws_url(),
            bybit_api_key: String::new(),
            bybit_api_secret: String::new(),
            port: default_port(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Ok(envy::from_env()?)
    }

    /// Build a configuration from explicit key/value pairs (keys in UPPER_CASE).
    pub fn from_pairs<I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::from_iter(pairs)?)
    }

    /// Check if the configuration is valid for trading on `exchange`.
    pub fn validate(&self, exchange: ExchangeKind) -> Result<(), ConfigError> {
        if self.symbol_list().is_empty() {
            return Err(ConfigError::invalid("SYMBOLS", "at least one symbol is required"));
        }

        for (key, tf) in [
            ("PRIMARY_TF", &self.primary_tf),
            ("SECONDARY_TF", &self.secondary_tf),
            ("CONFIRM_TF", &self.confirm_tf),
        ] {
            Timeframe::from_str(tf).map_err(|e| ConfigError::invalid(key, e.to_string()))?;
        }

        if self.ema_fast == 0 || self.ema_slow == 0 || self.rsi_period == 0 || self.atr_period == 0 {
            return Err(ConfigError::invalid("EMA/RSI/ATR periods", "periods must be positive"));
        }

        if self.ema_fast >= self.ema_slow {
            return Err(ConfigError::invalid("EMA_FAST", "must be smaller than EMA_SLOW"));
        }

        if self.position_pct <= Decimal::ZERO || self.position_pct > Decimal::ONE {
            return Err(ConfigError::invalid("POSITION_PCT", "must be in (0, 1]"));
        }

        if self.partial_tp_pct < Decimal::ZERO || self.partial_tp_pct > Decimal::ONE {
            return Err(ConfigError::invalid("PARTIAL_TP_PCT", "must be in [0, 1]"));
        }

        if self.stop_atr_mult <= Decimal::ZERO || self.tp_atr_mult <= Decimal::ZERO {
            return Err(ConfigError::invalid("STOP_ATR_MULT/TP_ATR_MULT", "must be positive"));
        }

        if self.taker_fee < Decimal::ZERO || self.maker_fee < Decimal::ZERO || self.slippage_bps < Decimal::ZERO {
            return Err(ConfigError::invalid("TAKER_FEE/MAKER_FEE/SLIPPAGE_BPS", "must not be negative"));
        }

        if !(0.0..=1.0).contains(&self.ml_min_proba) {
            return Err(ConfigError::invalid("ML_MIN_PROBA", "must be in [0, 1]"));
        }

        if self.max_positions_per_symbol != 1 {
            return Err(ConfigError::invalid("MAX_POSITIONS_PER_SYMBOL", "only 1 is supported"));
        }

        if self.rest_rate_per_sec <= 0.0 || self.rest_burst < 1.0 {
            return Err(ConfigError::invalid("REST_RATE_PER_SEC/REST_BURST", "rate must be positive and burst >= 1"));
        }

        if !self.dry_run && !self.exchange_settings(exchange).has_credentials() {
            let key = match exchange {
                ExchangeKind::Binance => "BINANCE_API_KEY/BINANCE_API_SECRET",
                ExchangeKind::Bybit => "BYBIT_API_KEY/BYBIT_API_SECRET",
            };
            return Err(ConfigError::invalid(key, "required when DRY_RUN=false"));
        }

        let settings = self.exchange_settings(exchange);
        let (base_key, ws_key) = match exchange {
            ExchangeKind::Binance => ("BINANCE_BASE_URL", "BINANCE_WS_URL"),
            ExchangeKind::Bybit => ("BYBIT_BASE_URL", "BYBIT_WS_URL"),
        };
        let base = Url::parse(&settings.base_url).map_err(|e| ConfigError::invalid(base_key, e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(base_key, "must be an http(s) URL"));
        }
        let ws = Url::parse(&settings.ws_url).map_err(|e| ConfigError::invalid(ws_key, e.to_string()))?;
        if !matches!(ws.scheme(), "ws" | "wss") {
            return Err(ConfigError::invalid(ws_key, "must be a ws(s) URL"));
        }

        Ok(())
    }

    /// Parsed, upper-cased symbol list.
    pub fn symbol_list(&self) -> Vec<String> {
        self.symbols
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Primary timeframe (validated by [`Config::validate`]).
    pub fn primary_timeframe(&self) -> Result<Timeframe, ConfigError> {
        Timeframe::from_str(&self.primary_tf).map_err(|e| ConfigError::invalid("PRIMARY_TF", e.to_string()))
    }

    /// Connection settings for the chosen venue.
    pub fn exchange_settings(&self, exchange: ExchangeKind) -> ExchangeSettings {
        match exchange {
            ExchangeKind::Binance => ExchangeSettings {
                base_url: self.binance_base_url.clone(),
                ws_url: self.binance_ws_url.clone(),
                api_key: self.binance_api_key.clone(),
                api_secret: self.binance_api_secret.clone(),
            },
            ExchangeKind::Bybit => ExchangeSettings {
                base_url: self.bybit_base_url.clone(),
                ws_url: self.bybit_ws_url.clone(),
                api_key: self.bybit_api_key.clone(),
                api_secret: self.bybit_api_secret.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn default_values_are_sensible() {
        let config = Config::default();
        assert_eq!(config.position_pct, dec!(0.03));
        assert_eq!(config.stop_atr_mult, dec!(1.5));
        assert_eq!(config.tp_atr_mult, dec!(3));
        assert_eq!(config.ema_fast, 50);
        assert_eq!(config.ema_slow, 200);
        assert!(config.dry_run);
        assert!(config.validate(ExchangeKind::Binance).is_ok());
    }

    #[test]
    fn from_pairs_reads_upper_case_keys() {
        let config = Config::from_pairs(pairs(&[
            ("SYMBOLS", "ethusdt, btcusdt ,,"),
            ("POSITION_PCT", "0.05"),
            ("TRAILING_ENABLED", "false"),
            ("EMA_FAST", "20"),
        ]))
        .unwrap();

        assert_eq!(config.symbol_list(), vec!["ETHUSDT", "BTCUSDT"]);
        assert_eq!(config.position_pct, dec!(0.05));
        assert!(!config.trailing_enabled);
        assert_eq!(config.ema_fast, 20);
        assert_eq!(config.ema_slow, 200);
    }

    #[test]
    fn validate_rejects_empty_symbols() {
        let config = Config {
            symbols: " , ".to_string(),
            ..Config::default()
        };
        assert!(config.validate(ExchangeKind::Binance).is_err());
    }

    #[test]
    fn validate_rejects_inverted_emas() {
        let config = Config {
            ema_fast: 200,
            ema_slow: 50,
            ..Config::default()
        };
        assert!(config.validate(ExchangeKind::Bybit).is_err());
    }

    #[test]
    fn validate_rejects_unknown_timeframe() {
        let config = Config {
            secondary_tf: "7m".to_string(),
            ..Config::default()
        };
        assert!(config.validate(ExchangeKind::Binance).is_err());
    }

    #[test]
    fn live_trading_requires_credentials_for_chosen_exchange() {
        let config = Config {
            dry_run: false,
            binance_api_key: "key".to_string(),
            binance_api_secret: "secret".to_string(),
            ..Config::default()
        };
        assert!(config.validate(ExchangeKind::Binance).is_ok());
        assert!(config.validate(ExchangeKind::Bybit).is_err());
    }

    #[test]
    fn validate_checks_venue_urls() {
        let config = Config {
            bybit_ws_url: "https://stream.bybit.com/v5/public/spot".to_string(),
            ..Config::default()
        };
        assert!(config.validate(ExchangeKind::Binance).is_ok());
        assert!(config.validate(ExchangeKind::Bybit).is_err());

        let config = Config {
            binance_base_url: "not a url".to_string(),
            ..Config::default()
        };
        assert!(config.validate(ExchangeKind::Binance).is_err());
    }

    #[test]
    fn exchange_kind_parses_case_insensitively() {
        assert_eq!(ExchangeKind::from_str("binance").unwrap(), ExchangeKind::Binance);
        assert_eq!(ExchangeKind::from_str("ByBit").unwrap(), ExchangeKind::Bybit);
        assert_eq!(ExchangeKind::Bybit.to_string(), "bybit");
    }
}
