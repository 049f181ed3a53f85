// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP handlers for the metrics API.
//!
//! Update bodies go through the same steps the agent applies in reverse:
//! RSA decryption when `X-Encrypted: true`, signature check over the
//! decrypted bytes, gunzip when `Content-Encoding: gzip`, then JSON.

use std::fmt::Write as _;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use gaugeline_core::codec::{decode_json, gunzip};
use gaugeline_core::errors::{CodecError, ParseError};
use gaugeline_core::metric::{format_gauge, Metric, MetricType, MetricUpdate};
use gaugeline_core::{ENCRYPTED_HEADER, SIGNATURE_HEADER};
use serde::de::DeserializeOwned;

use crate::http_utils::{
    header_str, log_and_create_http_response, request_ip, signed_json_response,
};
use crate::router::AppState;
use crate::service::ApplyError;

fn apply_error_response(err: &ApplyError) -> Response {
    match err {
        ApplyError::Invalid(ParseError::UnknownType(_)) => {
            log_and_create_http_response("unknown metric type", StatusCode::NOT_IMPLEMENTED)
        }
        ApplyError::Invalid(e) => {
            log_and_create_http_response(&e.to_string(), StatusCode::BAD_REQUEST)
        }
        ApplyError::Persist(_) => {
            log_and_create_http_response(&err.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Decrypts and authenticates an update body, returning the still-encoded
/// payload.
fn open_body(state: &AppState, headers: &HeaderMap, body: Bytes) -> Result<Vec<u8>, Response> {
    let encrypted =
        header_str(headers, ENCRYPTED_HEADER).is_some_and(|v| v.eq_ignore_ascii_case("true"));
    let payload = match (&state.decryptor, encrypted) {
        (Some(decryptor), true) => decryptor.decrypt(&body).map_err(|e| {
            log_and_create_http_response(
                &format!("failed to decrypt body: {e}"),
                StatusCode::BAD_REQUEST,
            )
        })?,
        _ => body.to_vec(),
    };

    if let Some(signer) = &state.signer {
        match header_str(headers, SIGNATURE_HEADER) {
            Some(signature) if signer.verify(&payload, signature) => {}
            Some(_) => {
                return Err(log_and_create_http_response(
                    "invalid signature",
                    StatusCode::BAD_REQUEST,
                ))
            }
            None => {
                return Err(log_and_create_http_response(
                    "missing signature",
                    StatusCode::BAD_REQUEST,
                ))
            }
        }
    }
    Ok(payload)
}

fn decode_payload<T: DeserializeOwned>(
    headers: &HeaderMap,
    payload: &[u8],
) -> Result<T, Response> {
    let gzipped = header_str(headers, header::CONTENT_ENCODING.as_str())
        .is_some_and(|v| v.contains("gzip"));
    let decoded = if gzipped {
        gunzip(payload).map_err(|e| match e {
            CodecError::TooLarge { .. } => {
                log_and_create_http_response(&e.to_string(), StatusCode::PAYLOAD_TOO_LARGE)
            }
            e => log_and_create_http_response(
                &format!("invalid gzip body: {e}"),
                StatusCode::BAD_REQUEST,
            ),
        })?
    } else {
        payload.to_vec()
    };
    decode_json(&decoded).map_err(|e| {
        log_and_create_http_response(&format!("invalid json: {e}"), StatusCode::BAD_REQUEST)
    })
}

fn peer(connect_info: Option<ConnectInfo<SocketAddr>>) -> Option<SocketAddr> {
    connect_info.map(|ConnectInfo(addr)| addr)
}

/// `POST /update/{type}/{name}/{value}`
pub async fn update_from_path(
    State(state): State<AppState>,
    Path((mtype, name, value)): Path<(String, String, String)>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let update = match MetricUpdate::parse(&mtype, &name, &value) {
        Ok(update) => update,
        Err(e) => return apply_error_response(&ApplyError::Invalid(e)),
    };
    let ip = request_ip(&headers, peer(connect_info));
    match state.service.update(&[Metric::from(update)], &ip).await {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))],
        )
            .into_response(),
        Err(e) => apply_error_response(&e),
    }
}

/// `POST /update` with a single JSON metric.
pub async fn update_json(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let metric: Metric = match open_body(&state, &headers, body)
        .and_then(|payload| decode_payload(&headers, &payload))
    {
        Ok(metric) => metric,
        Err(response) => return response,
    };
    let ip = request_ip(&headers, peer(connect_info));
    match state.service.update(std::slice::from_ref(&metric), &ip).await {
        Ok(()) => signed_json_response(&metric, state.signer.as_deref()),
        Err(e) => apply_error_response(&e),
    }
}

/// `POST /updates/` with a JSON array of metrics.
pub async fn update_batch(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let metrics: Vec<Metric> = match open_body(&state, &headers, body)
        .and_then(|payload| decode_payload(&headers, &payload))
    {
        Ok(metrics) => metrics,
        Err(response) => return response,
    };
    let ip = request_ip(&headers, peer(connect_info));
    match state.service.update(&metrics, &ip).await {
        Ok(()) => signed_json_response(&metrics, state.signer.as_deref()),
        Err(e) => apply_error_response(&e),
    }
}

/// `POST /value` with `{"id","type"}`; replies with the populated metric.
pub async fn value_json(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request: Metric = match decode_payload(&headers, &body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let store = state.service.store();
    let found = match request.kind() {
        Ok(MetricType::Gauge) => store
            .get_gauge(&request.id)
            .map(|value| Metric::gauge(request.id.as_str(), value)),
        Ok(MetricType::Counter) => store
            .get_counter(&request.id)
            .map(|delta| Metric::counter(request.id.as_str(), delta)),
        Err(_) => {
            return log_and_create_http_response("unknown metric type", StatusCode::NOT_IMPLEMENTED)
        }
    };
    match found {
        Some(metric) => signed_json_response(&metric, state.signer.as_deref()),
        None => log_and_create_http_response("not found", StatusCode::NOT_FOUND),
    }
}

/// `GET /value/{type}/{name}` as plain text.
pub async fn value_text(
    State(state): State<AppState>,
    Path((mtype, name)): Path<(String, String)>,
) -> Response {
    let store = state.service.store();
    let value = match mtype.parse::<MetricType>() {
        Ok(MetricType::Gauge) => store.get_gauge(&name).map(format_gauge),
        Ok(MetricType::Counter) => store.get_counter(&name).map(|d| d.to_string()),
        Err(_) => {
            return log_and_create_http_response("invalid metric type", StatusCode::BAD_REQUEST)
        }
    };
    match value {
        Some(value) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))],
            value,
        )
            .into_response(),
        None => log_and_create_http_response("not found", StatusCode::NOT_FOUND),
    }
}

/// `GET /` renders every metric, sorted by name.
pub async fn list_metrics(State(state): State<AppState>) -> Response {
    let mut page = String::from("<html><body><h1>Metrics</h1><ul>");
    for (name, value) in state.service.store().list() {
        let _ = write!(
            page,
            "<li>{}: {}</li>",
            escape_html(&name),
            escape_html(&value)
        );
    }
    page.push_str("</ul></body></html>");
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/html"))],
        page,
    )
        .into_response()
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// `GET /ping` reports database reachability.
pub async fn ping(State(state): State<AppState>) -> Response {
    let Some(repository) = state.service.repository() else {
        return log_and_create_http_response(
            "database not configured",
            StatusCode::INTERNAL_SERVER_ERROR,
        );
    };
    match repository.ping().await {
        Ok(()) => log_and_create_http_response("OK", StatusCode::OK),
        Err(e) => log_and_create_http_response(
            &format!("database not reachable: {e}"),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    }
}
