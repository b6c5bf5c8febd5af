use thiserror::Error;

/// Errors raised by request validation, before any job is created. Per
/// §7's propagation policy, only `ValidationError` surfaces before a job
/// exists; everything else is discovered once a run is already in flight.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("strategy '{0}' is not registered")]
    UnknownStrategy(String),

    #[error("'{field}' must not be empty")]
    EmptyField { field: &'static str },

    #[error("'hours' must be a finite, positive number, got {0}")]
    InvalidHours(f64),
}

/// Errors raised while building an indicator series from a candle window.
#[derive(Debug, Error)]
pub enum IndicatorError {
    #[error("unknown indicator kind: {0}")]
    UnknownKind(String),

    #[error("invalid option '{key}' for indicator {kind}: {reason}")]
    InvalidOption {
        kind: String,
        key: String,
        reason: String,
    },
}

/// Errors a strategy may raise while evaluating a single candle.
///
/// A `StrategyError` never aborts a run: the executor records it on the
/// affected `SignalRow` and continues with the next candle.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("strategy '{name}' is not registered")]
    UnknownStrategy { name: String },

    #[error("strategy '{name}' rejected its options: {reason}")]
    InvalidOptions { name: String, reason: String },

    #[error("strategy evaluation failed: {0}")]
    EvaluationFailed(String),
}

/// Errors from the sequential per-candle executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("candle window is empty")]
    EmptyWindow,

    #[error("candles are not in strictly ascending time order at index {index}")]
    OutOfOrder { index: usize },

    #[error(transparent)]
    Indicator(#[from] IndicatorError),
}

/// Errors surfaced by the back-test engine; everything else a strategy or
/// validator does wrong is recovered locally per the executor's contract.
#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("insufficient candle history for {symbol} {period}: got {got}, need at least {need}")]
    InsufficientData {
        symbol: String,
        period: String,
        got: usize,
        need: usize,
    },

    #[error("market data unavailable for {symbol} {period}: {reason}")]
    MarketDataUnavailable {
        symbol: String,
        period: String,
        reason: String,
    },

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),
}

/// Errors from the back-test job service.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error("at most {max} periods are supported per multi-period job, got {got}")]
    TooManyPeriods { got: usize, max: usize },

    #[error(transparent)]
    Backtest(#[from] BacktestError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Errors from the exchange instance cache.
#[derive(Debug, Error)]
pub enum ExchangeCacheError {
    #[error("failed to construct client for exchange '{exchange}': {reason}")]
    ConnectFailed { exchange: String, reason: String },

    #[error("no credentials on file for profile {0}")]
    MissingProfile(String),
}
