// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire form of a metric shared by the agent, the HTTP API and the on-disk
//! snapshot.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ParseError;

pub const GAUGE: &str = "gauge";
pub const COUNTER: &str = "counter";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    Gauge,
    Counter,
}

impl MetricType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MetricType::Gauge => GAUGE,
            MetricType::Counter => COUNTER,
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            GAUGE => Ok(MetricType::Gauge),
            COUNTER => Ok(MetricType::Counter),
            other => Err(ParseError::UnknownType(other.to_string())),
        }
    }
}

/// A single metric as it travels over JSON.
///
/// The type is kept as the raw string received so that an unknown type can be
/// reported as "not implemented" instead of a malformed body. Exactly one of
/// `value` (gauge) or `delta` (counter) is expected to be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    #[serde(rename = "type")]
    pub mtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Metric {
            id: id.into(),
            mtype: GAUGE.to_string(),
            delta: None,
            value: Some(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Metric {
            id: id.into(),
            mtype: COUNTER.to_string(),
            delta: Some(delta),
            value: None,
        }
    }

    /// Parses the `type` field.
    pub fn kind(&self) -> Result<MetricType, ParseError> {
        self.mtype.parse()
    }

    /// Validates the metric into an update that can be applied to a store.
    pub fn to_update(&self) -> Result<MetricUpdate, ParseError> {
        match self.kind()? {
            MetricType::Gauge => self
                .value
                .map(|value| MetricUpdate::Gauge {
                    name: self.id.clone(),
                    value,
                })
                .ok_or_else(|| ParseError::MissingValue(self.id.clone())),
            MetricType::Counter => self
                .delta
                .map(|delta| MetricUpdate::Counter {
                    name: self.id.clone(),
                    delta,
                })
                .ok_or_else(|| ParseError::MissingDelta(self.id.clone())),
        }
    }
}

/// A validated mutation of the metric store.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricUpdate {
    Gauge { name: String, value: f64 },
    Counter { name: String, delta: i64 },
}

impl MetricUpdate {
    /// Validates metric input coming from URL path segments.
    ///
    /// An unknown type is reported before the value is looked at, so
    /// `/update/histogram/x/abc` is "unknown type" and not "invalid value".
    pub fn parse(mtype: &str, name: &str, raw: &str) -> Result<Self, ParseError> {
        match mtype.parse::<MetricType>()? {
            MetricType::Gauge => raw
                .parse::<f64>()
                .map(|value| MetricUpdate::Gauge {
                    name: name.to_string(),
                    value,
                })
                .map_err(|_| ParseError::InvalidValue {
                    kind: GAUGE,
                    raw: raw.to_string(),
                }),
            MetricType::Counter => raw
                .parse::<i64>()
                .map(|delta| MetricUpdate::Counter {
                    name: name.to_string(),
                    delta,
                })
                .map_err(|_| ParseError::InvalidValue {
                    kind: COUNTER,
                    raw: raw.to_string(),
                }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            MetricUpdate::Gauge { name, .. } | MetricUpdate::Counter { name, .. } => name,
        }
    }
}

impl From<MetricUpdate> for Metric {
    fn from(update: MetricUpdate) -> Self {
        match update {
            MetricUpdate::Gauge { name, value } => Metric::gauge(name, value),
            MetricUpdate::Counter { name, delta } => Metric::counter(name, delta),
        }
    }
}

/// Renders a gauge as plain decimal text, e.g. `123.45` or `3`.
#[must_use]
pub fn format_gauge(value: f64) -> String {
    format!("{value}")
}
