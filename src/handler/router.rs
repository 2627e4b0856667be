//! Request routing dispatch module
//!
//! Entry point for HTTP request processing: health probes, body size checks,
//! mapping the path to a handler name, then the hook chain.

use crate::config::{AppState, RoutesConfig};
use crate::handler::hooks::HookRequest;
use crate::http::{self, BoxError};
use crate::logger::{self, AccessLogEntry};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::SERVER;
use hyper::{Request, Response};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Main entry point for HTTP request handling
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
    remote_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let started = Instant::now();
    let entry = state
        .config
        .logging
        .access_log
        .then(|| AccessLogEntry::from_request(&req, remote_addr));

    let mut response = route_request(req, &state).await;

    if let Ok(server) = state.config.http.server_name.parse() {
        response.headers_mut().insert(SERVER, server);
    }

    if let Some(mut entry) = entry {
        entry.status = response.status().as_u16();
        entry.body_bytes = response
            .body()
            .size_hint()
            .exact()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0);
        entry.request_time_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        logger::log_access(&entry, &state.config.logging.access_log_format);
    }

    Ok(response)
}

async fn route_request<B>(req: Request<B>, state: &Arc<AppState>) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let routes = &state.config.routes;
    let path = req.uri().path();

    // 0. Health check endpoints (highest priority, always fast)
    if let Some(resp) = check_health(path, routes) {
        return resp;
    }

    // 1. Resolve handler name; unrouted requests go straight to the chain
    let handler = resolve_handler(path, &routes.handlers).map(ToString::to_string);

    // 2. Check body size of routed requests
    if handler.is_some() {
        if let Some(resp) = check_body_size(&req, state.config.http.max_body_size) {
            return resp;
        }
    }

    // 3. Run the hook chain
    let req = req.map(|body| body.map_err(Into::<BoxError>::into).boxed_unsync());
    state.hooks.run(HookRequest::new(handler, req)).await
}

fn check_health(path: &str, routes: &RoutesConfig) -> Option<Response<Full<Bytes>>> {
    if !routes.health.enabled {
        return None;
    }
    // Readiness only needs the library, which is loaded before the listener binds
    (path == routes.health.liveness_path || path == routes.health.readiness_path)
        .then(|| http::build_health_response("ok"))
}

/// Validate Content-Length header and return 413 if exceeded
fn check_body_size<B>(req: &Request<B>, max_body_size: u64) -> Option<Response<Full<Bytes>>> {
    let content_length = req.headers().get("content-length")?;
    let size = content_length.to_str().ok()?.trim().parse::<u64>().ok()?;
    if size > max_body_size {
        tracing::error!("Request body too large: {size} bytes (max: {max_body_size})");
        return Some(http::build_413_response());
    }
    None
}

/// Map a request path to its handler name: exact match first, then the longest prefix
pub fn resolve_handler<'a>(path: &str, handlers: &'a BTreeMap<String, String>) -> Option<&'a str> {
    if let Some(name) = handlers.get(path) {
        return Some(name);
    }
    handlers
        .iter()
        .filter(|(prefix, _)| is_path_prefix(prefix, path))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, name)| name.as_str())
}

fn is_path_prefix(prefix: &str, path: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/'))
}
