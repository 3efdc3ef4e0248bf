use derive_more::{Display, From, Into};
use serde::Deserialize;
use std::convert::TryFrom;
use std::num::ParseIntError;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::Arc;

/// A shared monotonic cancellation flag.
///
/// Once set it stays set for the lifetime of the graph it was added to.
#[derive(Clone, Debug)]
#[repr(transparent)]
pub struct Interruptor(Arc<AtomicBool>);

impl Interruptor {
    pub fn new() -> Self {
        Interruptor(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(SeqCst)
    }
}

impl Default for Interruptor {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, From, Into, Display,
)]
#[repr(transparent)]
pub struct RetryDurationUs(pub u64);

impl Default for RetryDurationUs {
    fn default() -> Self {
        // 100ms
        RetryDurationUs(100000)
    }
}

impl FromStr for RetryDurationUs {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(RetryDurationUs(s.trim().parse::<u64>()?))
    }
}

/// Logging verbosity, ordered from nothing to everything.
///
/// Parses both the single-letter codes used by the CLI environment protocol
/// (`T|D|I|W|E|F|N`) and full level names.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Deserialize, Display,
)]
#[serde(try_from = "String")]
pub enum LoggingLevel {
    #[display(fmt = "none")]
    None,
    #[display(fmt = "fatal")]
    Fatal,
    #[display(fmt = "error")]
    Error,
    #[default]
    #[display(fmt = "warn")]
    Warn,
    #[display(fmt = "info")]
    Info,
    #[display(fmt = "debug")]
    Debug,
    #[display(fmt = "trace")]
    Trace,
}

impl LoggingLevel {
    /// The equivalent `tracing` level, or `None` when logging is off.
    pub fn as_tracing_level(self) -> Option<tracing::Level> {
        use LoggingLevel::*;
        match self {
            None => Option::None,
            // tracing has no fatal level
            Fatal | Error => Some(tracing::Level::ERROR),
            Warn => Some(tracing::Level::WARN),
            Info => Some(tracing::Level::INFO),
            Debug => Some(tracing::Level::DEBUG),
            Trace => Some(tracing::Level::TRACE),
        }
    }
}

impl TryFrom<String> for LoggingLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, String> {
        Self::from_str(&s)
    }
}

impl FromStr for LoggingLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use LoggingLevel::*;
        match s.trim() {
            "N" | "n" | "none" | "NONE" => Ok(None),
            "F" | "f" | "fatal" | "FATAL" => Ok(Fatal),
            "E" | "e" | "error" | "ERROR" => Ok(Error),
            "W" | "w" | "warn" | "warning" | "WARN" => Ok(Warn),
            "I" | "i" | "info" | "INFO" => Ok(Info),
            "D" | "d" | "debug" | "DEBUG" => Ok(Debug),
            "T" | "t" | "trace" | "TRACE" => Ok(Trace),
            _ => Err(format!("'{s}' is not a valid logging level")),
        }
    }
}
