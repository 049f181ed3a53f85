// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Generated protobuf models for the gaugeline streaming-RPC surface.
//!
//! Each [`Metric`] carries an explicit variant tag: `GAUGE` entries use the
//! `value` field, `COUNTER` entries use `delta`. The caller's address travels
//! in the `x-real-ip` request metadata, never in the message body.

#![allow(clippy::pedantic)]
#![allow(clippy::derive_partial_eq_without_eq)]

tonic::include_proto!("gaugeline");

/// Metadata key carrying the agent's best-effort host address.
pub const REAL_IP_METADATA_KEY: &str = "x-real-ip";

pub use metric::MType;
pub use metrics_client::MetricsClient;
pub use metrics_server::{Metrics, MetricsServer};
