//! Metric identity and value types.
//!
//! A [`MetricInfo`] is the immutable identity of a metric as reported by an
//! endpoint: its path plus the descriptive fields that, if they change,
//! start a new series (a unit change across a schema migration, say).
//! A [`Metric`] pairs that identity with the [`Value`] observed at one
//! collection pass.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identity of a monitored endpoint, typically `host:port`.
///
/// Cheap to clone; every query record carries one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(Arc<str>);

impl EndpointId {
    /// Creates an endpoint identity.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EndpointId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

/// Type of the values a metric reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// Boolean.
    Bool,
    /// Signed integer.
    Int,
    /// Unsigned integer.
    Uint,
    /// Floating point.
    Float,
    /// String.
    String,
    /// Point in time.
    Time,
    /// Elapsed time.
    Duration,
}

/// Unit of the values a metric reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    /// Dimensionless.
    #[default]
    None,
    /// Seconds.
    Second,
    /// Milliseconds.
    Millisecond,
    /// Bytes.
    Byte,
    /// Bytes per second.
    BytePerSecond,
    /// Degrees Celsius.
    Celsius,
}

/// Immutable identity of a metric.
///
/// Two metrics are the same series only if every field matches; a metric
/// whose unit changes under the same path becomes a second series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricInfo {
    path: String,
    description: String,
    unit: Unit,
    kind: Kind,
    bits: u32,
}

impl MetricInfo {
    /// Creates a metric identity.
    pub fn new(
        path: impl Into<String>,
        description: impl Into<String>,
        unit: Unit,
        kind: Kind,
        bits: u32,
    ) -> Self {
        Self {
            path: path.into(),
            description: description.into(),
            unit,
            kind,
            bits,
        }
    }

    /// The metric path, e.g. `/proc/cpu/user`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Human readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Value unit.
    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// Value kind.
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Bit width of numeric values; 0 when not applicable.
    pub fn bits(&self) -> u32 {
        self.bits
    }
}

/// A dynamically typed sample value.
///
/// Equality is structural; a `Float(NaN)` never equals the previous one, so
/// repeated NaN readings are all stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// Unsigned integer value.
    Uint(u64),
    /// Floating point value.
    Float(f64),
    /// String value.
    String(String),
    /// Seconds since the Unix epoch.
    Time(f64),
    /// Elapsed time.
    Duration(Duration),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Duration> for Value {
    fn from(v: Duration) -> Self {
        Self::Duration(v)
    }
}

/// One metric reading from one collection pass over an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Identity of the metric.
    pub info: MetricInfo,
    /// Value read.
    pub value: Value,
}

impl Metric {
    /// Creates a metric reading.
    pub fn new(info: MetricInfo, value: impl Into<Value>) -> Self {
        Self {
            info,
            value: value.into(),
        }
    }
}
