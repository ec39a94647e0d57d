use thiserror::Error;

/// Closed set of error kinds used across the poller runtime.
///
/// Callers classify errors by variant, never by message. `class()` yields
/// the stable short label that ends up as the machine-readable `reason`
/// on status matrices.
#[derive(Debug, Error)]
pub enum PollerError {
    #[error("missing parameter: {0}")]
    MissingParam(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("implementation error: {0}")]
    Implement(String),

    #[error("no collectors: {0}")]
    NoCollector(String),

    #[error("dynamic load: {0}")]
    Dload(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("no instances: {0}")]
    NoInstance(String),

    #[error("no metrics: {0}")]
    NoMetric(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("task panic: {0}")]
    Panic(String),
}

impl PollerError {
    /// Short stable label for status reporting.
    pub fn class(&self) -> &'static str {
        match self {
            Self::MissingParam(_) => "missing param",
            Self::InvalidParam(_) => "invalid param",
            Self::Implement(_) => "implement",
            Self::NoCollector(_) => "no collector",
            Self::Dload(_) => "dload",
            Self::Connection(_) => "connection",
            Self::NoInstance(_) => "no instance",
            Self::NoMetric(_) => "no metric",
            Self::Config(_) => "config",
            Self::Panic(_) => "panic",
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}
