pub mod queue;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub use queue::{AuditLog, Consumer, ResultQueue};

/// Value emitted when a query failed or returned nothing.
pub const NAN: &str = "nan";

/// Type hint applied when a measurement carries none ("n" = numeric).
pub const DEFAULT_DATATYPE: char = 'n';

/// One measurement event travelling from an executor to the sink.
///
/// Built once by the executor that produced it and never modified
/// afterwards; the consumer only fills in the default datatype on its own
/// copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    /// Seconds since the epoch, taken when the measurement was emitted.
    pub timestamp: i64,
    /// Fully qualified, dot-delimited series name.
    pub name: String,
    /// Decimal text, or one of the no-data markers.
    pub value: String,
    /// Single-character type hint for the sink.
    pub datatype: Option<char>,
}

impl Measurement {
    /// A numeric measurement stamped with the current time.
    pub fn now(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::at(unix_now(), name, value)
    }

    /// A numeric measurement with an explicit timestamp.
    pub fn at(timestamp: i64, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            timestamp,
            name: name.into(),
            value: value.into(),
            datatype: None,
        }
    }

    /// A failed or empty measurement.
    pub fn nan(timestamp: i64, name: impl Into<String>) -> Self {
        Self::at(timestamp, name, NAN)
    }

    /// True when the value is one of "nan", "null" or "".
    pub fn is_no_data(&self) -> bool {
        matches!(self.value.as_str(), "nan" | "null" | "")
    }

    /// The datatype, falling back to numeric.
    pub fn datatype_or_default(&self) -> char {
        self.datatype.unwrap_or(DEFAULT_DATATYPE)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}={}", self.timestamp, self.name, self.value)
    }
}

/// Current wall-clock time in whole seconds since the epoch.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
