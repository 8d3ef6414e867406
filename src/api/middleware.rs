//! Request hooks for actix-web.
//!
//! [`guard`] runs the whole pipeline and is what the server installs. The
//! other hooks expose single stages for routes that only want part of it;
//! wrap them with [`actix_web::middleware::from_fn`].

use actix_web::body::{BoxBody, MessageBody};
use actix_web::dev::{Payload, ServiceRequest, ServiceResponse};
use actix_web::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use actix_web::http::StatusCode;
use actix_web::middleware::Next;
use std::net::IpAddr;
use actix_web::{web, Error, HttpMessage, HttpResponse};
use futures::StreamExt;
use log::{debug, error, warn};
use metrics::counter;
use serde_json::{Map, Value};
use crate::api::ApiState;
use crate::core::pipeline::{Denial, Identity, RequestContext, RequestInfo, Screening};
use crate::models::ServerConfig;

const SECURITY_HEADERS: [(&str, &str); 6] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    ("permissions-policy", "camera=(), microphone=(), geolocation=()"),
    ("strict-transport-security", "max-age=31536000; includeSubDomains; preload"),
];

const SESSION_HEADER: &str = "x-session-id";

fn in_network(ip: IpAddr, network: IpAddr, prefix: u32) -> bool {
    match (ip, network) {
        (IpAddr::V4(ip), IpAddr::V4(network)) if prefix <= 32 => {
            let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
            u32::from(ip) & mask == u32::from(network) & mask
        }
        (IpAddr::V6(ip), IpAddr::V6(network)) if prefix <= 128 => {
            let mask = u128::MAX.checked_shl(128 - prefix).unwrap_or(0);
            u128::from(ip) & mask == u128::from(network) & mask
        }
        _ => false,
    }
}

/// Whether `peer` matches an entry of `trusted` (an address or a CIDR range)
fn is_trusted_proxy(peer: IpAddr, trusted: &[String]) -> bool {
    trusted.iter().any(|entry| match entry.split_once('/') {
        Some((network, prefix)) => match (network.trim().parse::<IpAddr>(), prefix.trim().parse::<u32>()) {
            (Ok(network), Ok(prefix)) => in_network(peer, network, prefix),
            _ => {
                warn!("Ignoring malformed trusted proxy {}", entry);
                false
            }
        },
        None => entry.trim().parse::<IpAddr>().map_or(false, |ip| ip == peer),
    })
}

/// The entry `hops` positions from the right of an `X-Forwarded-For` list.
///
/// Proxies append, so that is the address the outermost trusted proxy saw.
/// Shorter lists yield their leftmost entry.
fn forwarded_client(forwarded: &str, hops: usize) -> Option<IpAddr> {
    let entries: Vec<&str> = forwarded
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .collect();
    let index = entries.len().checked_sub(1)?.saturating_sub(hops.saturating_sub(1));
    entries[index].parse().ok()
}

/// Source address of a request.
///
/// The peer address, unless `trust_proxy` is set and the peer is one of the
/// trusted proxies, in which case the client is read from `X-Forwarded-For`.
pub fn client_ip(req: &ServiceRequest, server: &ServerConfig) -> String {
    let Some(peer) = req.peer_addr().map(|addr| addr.ip()) else {
        return "unknown".to_string();
    };

    if server.trust_proxy && server.proxy_hops > 0 && is_trusted_proxy(peer, &server.trusted_proxies) {
        let forwarded = req
            .headers()
            .get_all("x-forwarded-for")
            .filter_map(|value| value.to_str().ok())
            .collect::<Vec<_>>()
            .join(",");
        match forwarded_client(&forwarded, server.proxy_hops) {
            Some(ip) => return ip.to_string(),
            None if !forwarded.is_empty() => debug!("Unusable X-Forwarded-For from {}: {}", peer, forwarded),
            None => {}
        }
    }
    peer.to_string()
}

fn header_str(req: &ServiceRequest, name: impl header::AsHeaderName) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Buffer the request body and put it back for the handler.
///
/// Returns `None` once the body is known to exceed `limit` bytes, either from
/// `Content-Length` or while streaming.
async fn read_body(req: &mut ServiceRequest, limit: usize) -> Result<Option<web::Bytes>, Error> {
    let declared = header_str(req, header::CONTENT_LENGTH).and_then(|length| length.parse::<usize>().ok());
    if declared.map_or(false, |length| length > limit) {
        return Ok(None);
    }

    let mut payload = req.take_payload();
    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk?;
        if body.len() + chunk.len() > limit {
            return Ok(None);
        }
        body.extend_from_slice(&chunk);
    }
    let body = body.freeze();
    req.set_payload(Payload::from(body.clone()));
    Ok(Some(body))
}

/// JSON bodies are scanned as JSON, anything else as text.
fn body_value(body: &[u8]) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    serde_json::from_slice(body)
        .ok()
        .or_else(|| Some(Value::String(String::from_utf8_lossy(body).into_owned())))
}

/// Query parameters as an object; repeated keys collect into an array.
fn query_value(req: &ServiceRequest) -> Option<Value> {
    if req.query_string().is_empty() {
        return None;
    }
    let pairs = match web::Query::<Vec<(String, String)>>::from_query(req.query_string()) {
        Ok(pairs) => pairs.into_inner(),
        Err(e) => {
            debug!("Unparsable query string on {}: {}", req.path(), e);
            return None;
        }
    };

    let mut params = Map::new();
    for (key, value) in pairs {
        match params.get_mut(&key) {
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                params.insert(key, Value::String(value));
            }
        }
    }
    Some(Value::Object(params))
}

fn request_info(req: &ServiceRequest, state: &ApiState, body: Option<Value>) -> RequestInfo {
    RequestInfo {
        source: client_ip(req, &state.config.server),
        method: req.method().to_string(),
        path: req.path().to_string(),
        url: req.uri().to_string(),
        user_agent: header_str(req, header::USER_AGENT).unwrap_or_default(),
        body,
        query: query_value(req),
        identity: req.extensions().get::<Identity>().cloned(),
        session_id: header_str(req, SESSION_HEADER),
    }
}

/// `None` when the body is over the configured limit
async fn request_info_with_body(req: &mut ServiceRequest, state: &ApiState) -> Result<Option<RequestInfo>, Error> {
    let limit = state.config.server.max_body_bytes;
    match read_body(req, limit).await? {
        Some(body) => Ok(Some(request_info(req, state, body_value(&body)))),
        None => {
            counter!("ideahub_requests_denied_total", 1, "reason" => "payload_too_large");
            warn!(
                "Refused oversized body from {} on {}",
                client_ip(req, &state.config.server),
                req.path()
            );
            Ok(None)
        }
    }
}

fn denial_response(denial: &Denial) -> HttpResponse {
    let status = StatusCode::from_u16(denial.status).unwrap_or(StatusCode::FORBIDDEN);
    let mut response = HttpResponse::build(status);
    if let Some(retry_after) = denial.retry_after {
        response.insert_header((header::RETRY_AFTER, retry_after.to_string()));
    }
    response.json(denial)
}

fn apply_security_headers(headers: &mut HeaderMap) {
    for (name, value) in SECURITY_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
}

fn apply_request_id(headers: &mut HeaderMap, ctx: &RequestContext) {
    match HeaderValue::from_str(&ctx.request_id) {
        Ok(value) => {
            headers.insert(HeaderName::from_static("x-request-id"), value);
        }
        Err(e) => debug!("Unusable request id {}: {}", ctx.request_id, e),
    }
}

fn api_state(req: &ServiceRequest) -> Option<web::Data<ApiState>> {
    let state = req.app_data::<web::Data<ApiState>>().cloned();
    if state.is_none() {
        warn!("No ApiState registered; {} passes through unchecked", req.path());
    }
    state
}

fn status_of_error(error: &Error) -> u16 {
    error.as_response_error().status_code().as_u16()
}

/// The full pipeline: screening, handler, completion and response headers.
pub async fn guard(
    mut req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let Some(state) = api_state(&req) else {
        return next.call(req).await.map(ServiceResponse::map_into_left_body::<BoxBody>);
    };
    let pipeline = &state.pipeline;

    let Some(info) = request_info_with_body(&mut req, &state).await? else {
        let denial = Denial::payload_too_large(state.config.server.max_body_bytes);
        let mut res = req.into_response(denial_response(&denial));
        apply_security_headers(res.headers_mut());
        return Ok(res.map_into_right_body());
    };
    let mut ctx = pipeline.begin(info);

    let denial = match pipeline.screen(&mut ctx).await {
        Screening::Proceed => None,
        Screening::Blocked(denial) => Some(denial),
        Screening::Rejected(denial) => {
            pipeline.complete(&ctx, denial.status).await;
            Some(denial)
        }
    };
    if let Some(denial) = denial {
        let mut res = req.into_response(denial_response(&denial));
        apply_security_headers(res.headers_mut());
        apply_request_id(res.headers_mut(), &ctx);
        return Ok(res.map_into_right_body());
    }

    match next.call(req).await {
        Ok(mut res) => {
            pipeline.complete(&ctx, res.status().as_u16()).await;
            apply_security_headers(res.headers_mut());
            apply_request_id(res.headers_mut(), &ctx);
            Ok(res.map_into_left_body())
        }
        Err(e) => {
            pipeline.complete(&ctx, status_of_error(&e)).await;
            Err(e)
        }
    }
}

/// Timing only. Sets `X-Request-ID`.
pub async fn performance(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let Some(state) = api_state(&req) else {
        return next.call(req).await;
    };
    let ctx = state.pipeline.begin(request_info(&req, &state, None));

    let result = next.call(req).await;
    state.pipeline.record_timing(&ctx);
    let mut res = result?;
    apply_request_id(res.headers_mut(), &ctx);
    Ok(res)
}

/// Blocked-source check and threat analysis, with outcome feedback.
pub async fn security(
    mut req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let Some(state) = api_state(&req) else {
        return next.call(req).await.map(ServiceResponse::map_into_left_body::<BoxBody>);
    };
    let Some(info) = request_info_with_body(&mut req, &state).await? else {
        let denial = Denial::payload_too_large(state.config.server.max_body_bytes);
        return Ok(req.into_response(denial_response(&denial)).map_into_right_body());
    };
    let mut ctx = state.pipeline.begin(info);

    if let Some(denial) = state.pipeline.check_access(&mut ctx).await {
        return Ok(req.into_response(denial_response(&denial)).map_into_right_body());
    }

    match next.call(req).await {
        Ok(res) => {
            state.pipeline.record_threat_outcome(&ctx, res.status().as_u16());
            Ok(res.map_into_left_body())
        }
        Err(e) => {
            state.pipeline.record_threat_outcome(&ctx, status_of_error(&e));
            Err(e)
        }
    }
}

/// One `API_REQUEST` audit event per response.
pub async fn audit(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let Some(state) = api_state(&req) else {
        return next.call(req).await;
    };
    let ctx = state.pipeline.begin(request_info(&req, &state, None));

    let result = next.call(req).await;
    let status = match &result {
        Ok(res) => res.status().as_u16(),
        Err(e) => status_of_error(e),
    };
    state.pipeline.record_audit(&ctx, status).await;
    result
}

/// Brute-force protection for authentication routes.
///
/// Reads the source's existing threat record; failures are counted by
/// [`security`] or [`guard`].
pub async fn auth_threat(
    req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let Some(state) = api_state(&req) else {
        return next.call(req).await.map(ServiceResponse::map_into_left_body::<BoxBody>);
    };
    let mut ctx = state.pipeline.begin(request_info(&req, &state, None));

    if let Some(denial) = state.pipeline.check_auth_attempts(&mut ctx).await {
        return Ok(req.into_response(denial_response(&denial)).map_into_right_body());
    }
    next.call(req).await.map(ServiceResponse::map_into_left_body)
}

/// Require a live session named by `X-Session-Id` and refresh it.
///
/// The session's user is attached as the request [`Identity`] when the
/// authentication layer has not set one.
pub async fn session_guard(
    req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let Some(sessions) = api_state(&req).and_then(|state| state.sessions.clone()) else {
        return next.call(req).await.map(ServiceResponse::map_into_left_body::<BoxBody>);
    };

    let Some(session_id) = header_str(&req, SESSION_HEADER) else {
        return Ok(req
            .into_response(denial_response(&Denial::session_required()))
            .map_into_right_body());
    };

    let valid = match sessions.is_session_valid(&session_id).await {
        Ok(valid) => valid,
        Err(e) => {
            error!("Session lookup failed: {}", e);
            false
        }
    };
    if !valid {
        return Ok(req
            .into_response(denial_response(&Denial::session_invalid()))
            .map_into_right_body());
    }

    match sessions.touch_session(&session_id).await {
        Ok(Some(record)) => {
            let mut extensions = req.extensions_mut();
            if extensions.get::<Identity>().is_none() {
                extensions.insert(Identity {
                    user_id: Some(record.user_id),
                    username: Some(record.username),
                    role: Some(record.role),
                });
            }
        }
        Ok(None) => {}
        Err(e) => error!("Failed to refresh session: {}", e),
    }

    next.call(req).await.map(ServiceResponse::map_into_left_body)
}
