// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use gaugeline_core::net::client_ip;
use gaugeline_core::signing::Signer;
use gaugeline_core::{FORWARDED_FOR_HEADER, REAL_IP_HEADER};
use serde::Serialize;
use tracing::{debug, error};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";

/// Lowercase form of [`gaugeline_core::SIGNATURE_HEADER`].
pub const SIGNATURE: HeaderName = HeaderName::from_static("hashsha256");

/// Does two things:
/// 1. Logs the given message. Server errors are logged at error level,
///    everything else at debug level.
/// 2. Returns the message as a plain-text body with the given status code.
pub fn log_and_create_http_response(message: &str, status: StatusCode) -> Response {
    if status.is_server_error() {
        error!("{message}");
    } else {
        debug!("{message}");
    }
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN))],
        message.to_string(),
    )
        .into_response()
}

/// Serializes `value` as a 200 JSON response. With a signer, the body's
/// signature goes into the `HashSHA256` header.
pub fn signed_json_response<T: Serialize>(value: &T, signer: Option<&Signer>) -> Response {
    let body = match serde_json::to_vec(value) {
        Ok(body) => body,
        Err(e) => {
            return log_and_create_http_response(
                &format!("failed to write response: {e}"),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    };
    let signature = signer.and_then(|s| HeaderValue::from_str(&s.sign(&body)).ok());
    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON))],
        body,
    )
        .into_response();
    if let Some(signature) = signature {
        response.headers_mut().insert(SIGNATURE, signature);
    }
    response
}

/// Returns a header as text when present and valid.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Address a request is attributed to in audit events.
pub fn request_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    client_ip(
        header_str(headers, FORWARDED_FOR_HEADER),
        header_str(headers, REAL_IP_HEADER),
        peer,
    )
}
