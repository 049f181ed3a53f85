// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for parsing, persistence, payload codecs and cryptography.

use std::io;

/// Rejection of client-supplied metric input.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseError {
    #[error("unknown metric type: {0}")]
    UnknownType(String),
    #[error("invalid {kind} value: {raw}")]
    InvalidValue { kind: &'static str, raw: String },
    #[error("missing value for gauge {0}")]
    MissingValue(String),
    #[error("missing delta for counter {0}")]
    MissingDelta(String),
    #[error("metric id is required")]
    MissingId,
}

/// Failure to read or write the on-disk store snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot file not found: {0}")]
    NotFound(String),
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure to encode or decode a batch payload.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to serialize batch: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to deserialize payload: {0}")]
    Deserialize(#[source] serde_json::Error),
    #[error("gzip error: {0}")]
    Gzip(#[source] io::Error),
    #[error("decompressed payload exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

/// Failure while loading keys or transforming a payload with RSA.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("failed to read key file {path}: {source}")]
    ReadKey {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse key: {0}")]
    ParseKey(String),
    #[error("failed to encrypt data: {0}")]
    Encrypt(#[source] rsa::Error),
    #[error("failed to decrypt data: {0}")]
    Decrypt(#[source] rsa::Error),
    #[error("ciphertext length {len} is not a multiple of the key size {block}")]
    Truncated { len: usize, block: usize },
}
