// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Building blocks shared by the gaugeline agent and server: the wire model,
//! the concurrent metric store, on-disk snapshots, retry-with-backoff and the
//! payload transformations (gzip, HMAC signing, RSA encryption) applied around
//! every delivered batch.

pub mod codec;
pub mod crypto;
pub mod duration;
pub mod errors;
pub mod metric;
pub mod net;
pub mod pool;
pub mod retry;
pub mod signing;
pub mod snapshot;
pub mod store;

/// Header carrying the hex HMAC-SHA256 signature of a request or response body.
pub const SIGNATURE_HEADER: &str = "HashSHA256";
/// Header set to `true` when the body is RSA-encrypted.
pub const ENCRYPTED_HEADER: &str = "X-Encrypted";
/// Header carrying the sender's best-effort host address.
pub const REAL_IP_HEADER: &str = "X-Real-IP";
/// Header carrying the proxy chain of client addresses.
pub const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";
