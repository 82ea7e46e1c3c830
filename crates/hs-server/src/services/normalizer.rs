//! Turns an inbound HTTP request into a [`WebhookEvent`].
//!
//! Normalization is total: a payload that does not decode as JSON is kept as
//! text, missing headers become `None`, and an unknown peer becomes `"unknown"`.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::http::{header, HeaderMap, Method, Uri};
use chrono::Utc;
use hs_protocol::{insert_field, FieldMap, WebhookEvent};

/// Borrowed view of the pieces of a request the normalizer reads.
#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    pub method: &'a Method,
    /// Original request target (path and query).
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    pub session_id: &'a str,
    pub remote_addr: Option<SocketAddr>,
    pub body: &'a [u8],
    /// Believe `X-Forwarded-Proto` / `X-Forwarded-For`.
    pub trust_proxy: bool,
}

pub fn normalize(req: InboundRequest<'_>) -> WebhookEvent {
    let raw_body = (!req.body.is_empty()).then(|| String::from_utf8_lossy(req.body).into_owned());
    let body = raw_body.as_deref().map(decode_body);

    WebhookEvent {
        method: req.method.as_str().to_string(),
        url: reconstruct_url(&req),
        headers: collect_headers(req.headers),
        query: parse_query(req.uri.query()),
        params: BTreeMap::from([("sessionId".to_string(), req.session_id.to_string())]),
        ip: client_ip(&req),
        user_agent: header_str(req.headers, header::USER_AGENT),
        content_length: header_str(req.headers, header::CONTENT_LENGTH),
        origin: header_str(req.headers, header::ORIGIN),
        referer: header_str(req.headers, header::REFERER),
        body,
        raw_body,
        time: Utc::now(),
    }
}

/// JSON when the trimmed text starts like JSON and parses, else the text itself.
pub fn decode_body(raw: &str) -> serde_json::Value {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        match serde_json::from_str(raw) {
            Ok(value) => return value,
            Err(e) => tracing::debug!(error = %e, "Body looks like JSON but does not parse, keeping raw text"),
        }
    }
    serde_json::Value::String(raw.to_string())
}

fn reconstruct_url(req: &InboundRequest<'_>) -> String {
    let scheme = req
        .trust_proxy
        .then(|| forwarded_first(req.headers, "x-forwarded-proto"))
        .flatten()
        .unwrap_or_else(|| "http".to_string());
    let host = header_str(req.headers, header::HOST)
        .or_else(|| req.uri.authority().map(|a| a.to_string()))
        .unwrap_or_else(|| "localhost".to_string());
    let target = req
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| req.uri.path());
    format!("{scheme}://{host}{target}")
}

fn client_ip(req: &InboundRequest<'_>) -> String {
    if req.trust_proxy {
        if let Some(ip) = forwarded_first(req.headers, "x-forwarded-for") {
            return ip;
        }
    }
    req.remote_addr
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn collect_headers(headers: &HeaderMap) -> FieldMap {
    let mut map = FieldMap::new();
    for (name, value) in headers {
        insert_field(
            &mut map,
            name.as_str(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }
    map
}

fn parse_query(query: Option<&str>) -> FieldMap {
    let mut map = FieldMap::new();
    if let Some(query) = query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            insert_field(&mut map, &key, value.into_owned());
        }
    }
    map
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
}

/// First comma-separated entry of a forwarding header.
fn forwarded_first(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
