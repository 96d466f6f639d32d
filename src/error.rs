//! Unified error types for the spot bot.

use thiserror::Error;

/// Unified error type for the spot bot.
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Exchange REST error.
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    /// Trading/order error.
    #[error("trading error: {0}")]
    Trading(#[from] TradingError),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Trade journal error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Market data error (candles, timeframes).
    #[error("market data error: {0}")]
    MarketData(#[from] MarketDataError),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment could not be deserialized.
    #[error("failed to read environment: {0}")]
    Env(#[from] envy::Error),

    /// A setting has an invalid value.
    #[error("invalid setting {key}: {reason}")]
    Invalid {
        /// Environment key.
        key: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Candle and timeframe errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MarketDataError {
    /// Timeframe string is not recognised.
    #[error("unsupported timeframe: {0}")]
    UnsupportedTimeframe(String),

    /// Resampling target is not supported.
    #[error("unsupported resample target: {0}")]
    UnsupportedResample(String),

    /// No history has been seeded for the symbol.
    #[error("no candle history for {0}")]
    NoHistory(String),
}

/// Exchange REST errors.
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// HTTP transport failure.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Exchange answered with an error status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Exchange answered 200 with an API-level error code.
    #[error("api error {code}: {message}")]
    Api {
        /// Venue-specific return code.
        code: i64,
        /// Venue message.
        message: String,
    },

    /// Response could not be interpreted.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// Signed endpoint called without credentials.
    #[error("missing api credentials for {0}")]
    MissingCredentials(&'static str),

    /// Request signing failed.
    #[error("signing error: {0}")]
    Signing(String),

    /// Order refused before reaching the venue.
    #[error("order rejected: {0}")]
    Rejected(String),

    /// Market data error while shaping a request.
    #[error(transparent)]
    MarketData(#[from] MarketDataError),
}

impl ExchangeError {
    /// Transient failure worth another attempt for a read.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExchangeError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ExchangeError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// The request provably never reached the venue, so resending cannot duplicate it.
    pub fn never_delivered(&self) -> bool {
        match self {
            ExchangeError::Http(e) => e.is_connect(),
            ExchangeError::Status { status, .. } => *status == 429,
            _ => false,
        }
    }
}

/// Trading and order execution errors.
#[derive(Error, Debug)]
pub enum TradingError {
    /// Order submission failed at the exchange.
    #[error("order submission failed: {0}")]
    SubmissionFailed(#[from] ExchangeError),

    /// Invalid order parameters.
    #[error("invalid order parameters: {0}")]
    InvalidParams(String),

    /// Order rejected or not filled.
    #[error("order rejected: {reason}")]
    OrderRejected {
        /// Rejection reason.
        reason: String,
    },
}

/// WebSocket connection and message errors.
#[derive(Error, Debug)]
pub enum WsError {
    /// Connection failed.
    #[error("websocket connection failed: {0}")]
    ConnectionFailed(String),

    /// Send failed.
    #[error("failed to send websocket message: {0}")]
    SendFailed(String),

    /// Tungstenite error.
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Trade journal errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Metadata could not be serialized.
    #[error("metadata encoding failed: {0}")]
    Meta(#[from] serde_json::Error),

    /// Trade id does not exist.
    #[error("trade {0} not found")]
    NotFound(i64),

    /// A stored column could not be decoded.
    #[error("invalid value in column {column}: {value}")]
    InvalidValue {
        /// Column name.
        column: &'static str,
        /// Raw stored value.
        value: String,
    },
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, BotError>;
