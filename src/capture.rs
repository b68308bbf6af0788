//! Request capture middleware
//!
//! Observes inbound requests and, for tracked methods, queues a log record
//! once the response completes. The middleware never delays, alters, or
//! fails the request it observes: every fallible step in here is caught and
//! downgraded to a diagnostic.

use crate::auth::Principal;
use crate::config::CaptureConfig;
use crate::error::ErrorDetail;
use crate::store::{extract_log_data, RequestContext, RequestLogStore};
use arc_swap::ArcSwap;
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Upper bound on how much of a request body is buffered for logging.
/// Matches the server-wide body limit, so in practice it never truncates.
const BODY_CAPTURE_LIMIT: usize = 10 * 1024 * 1024;

/// Which requests produce a log record
#[derive(Debug)]
pub struct CapturePolicy {
    tracked_methods: HashSet<String>,
    excluded_paths: Vec<String>,
}

impl CapturePolicy {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            tracked_methods: config
                .tracked_methods
                .iter()
                .map(|m| m.to_ascii_uppercase())
                .collect(),
            excluded_paths: config.excluded_paths.clone(),
        }
    }

    /// Exclusion wins over method tracking, regardless of verb
    pub fn should_capture(&self, method: &str, original_url: &str) -> bool {
        if self
            .excluded_paths
            .iter()
            .any(|excluded| original_url.contains(excluded.as_str()))
        {
            return false;
        }
        self.tracked_methods.contains(method)
    }
}

/// State for the capture middleware
#[derive(Clone)]
pub struct CaptureState {
    pub store: RequestLogStore,
    /// Swapped on config reload together with the config itself
    pub policy: Arc<ArcSwap<CapturePolicy>>,
}

/// Capture middleware
///
/// Buffers the request body (the inner service sees it byte-identical),
/// measures wall-clock latency across the inner service, and queues a log
/// event after the response is ready. The queue send is fire-and-forget;
/// the response is returned untouched either way.
pub async fn capture_middleware(
    State(state): State<CaptureState>,
    req: Request,
    next: Next,
) -> Response {
    let original_url = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let tracked = state
        .policy
        .load()
        .should_capture(req.method().as_str(), &original_url);
    if !tracked {
        return next.run(req).await;
    }

    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4();
    let mut ctx = request_context(&req, original_url);
    let (req, body) = buffer_body(req).await;

    let response = next.run(req).await;

    let response_time_ms = started.elapsed().as_millis() as i64;

    // An upstream auth layer attributes the request on the way out; prefer
    // a principal attached before this layer if one exists.
    if ctx.user_id.is_none() {
        ctx.user_id = response
            .extensions()
            .get::<Principal>()
            .map(|p| p.user_id.clone());
    }
    let error_message = response
        .extensions()
        .get::<ErrorDetail>()
        .map(|detail| detail.message.clone());

    let event = extract_log_data(
        &ctx,
        response.status().as_u16(),
        response_time_ms,
        &body,
        error_message,
    );
    tracing::debug!(
        request_id = %request_id,
        method = %event.method,
        path = %event.path,
        status = event.status_code,
        response_time_ms,
        "Captured request log"
    );
    state.store.submit(event);

    response
}

/// Snapshot the fields extraction needs before the request is consumed
fn request_context(req: &Request, original_url: String) -> RequestContext {
    let headers = req.headers();
    RequestContext {
        method: req.method().as_str().to_string(),
        original_url,
        forwarded_for: header_value(headers, "x-forwarded-for"),
        real_ip: header_value(headers, "x-real-ip"),
        peer_addr: req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip()),
        user_agent: header_value(headers, "user-agent"),
        user_id: req.extensions().get::<Principal>().map(|p| p.user_id.clone()),
        raw_query: req.uri().query().map(|q| q.to_string()),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

async fn buffer_body(req: Request) -> (Request, Bytes) {
    let (parts, body) = req.into_parts();
    match axum::body::to_bytes(body, BODY_CAPTURE_LIMIT).await {
        Ok(bytes) => {
            let rebuilt = Request::from_parts(parts, Body::from(bytes.clone()));
            (rebuilt, bytes)
        }
        Err(e) => {
            // The transport already failed; forward an empty body and let
            // the inner service produce the response.
            tracing::debug!(error = %e, "Failed to buffer request body for logging");
            (Request::from_parts(parts, Body::empty()), Bytes::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_policy() -> CapturePolicy {
        CapturePolicy::from_config(&CaptureConfig::default())
    }

    #[test]
    fn test_tracked_methods_are_captured() {
        let policy = test_policy();
        assert!(policy.should_capture("POST", "/users"));
        assert!(policy.should_capture("PUT", "/users/1"));
        assert!(policy.should_capture("PATCH", "/users/1"));
        assert!(policy.should_capture("DELETE", "/users/1"));
    }

    #[test]
    fn test_untracked_methods_pass_through() {
        let policy = test_policy();
        assert!(!policy.should_capture("GET", "/users"));
        assert!(!policy.should_capture("HEAD", "/users"));
        assert!(!policy.should_capture("OPTIONS", "/users"));
    }

    #[test]
    fn test_excluded_path_wins_over_method() {
        let policy = test_policy();
        assert!(!policy.should_capture("POST", "/admin/request-logs/cleanup/trigger"));
    }

    #[test]
    fn test_exclusion_matches_substring_of_original_url() {
        let config = CaptureConfig {
            excluded_paths: vec!["/track".to_string()],
            ..CaptureConfig::default()
        };
        let policy = CapturePolicy::from_config(&config);
        assert!(!policy.should_capture("POST", "/api/track/event?source=web"));
        assert!(policy.should_capture("POST", "/api/users"));
    }

    #[test]
    fn test_method_casing_is_normalized() {
        let config = CaptureConfig {
            tracked_methods: vec!["post".to_string()],
            ..CaptureConfig::default()
        };
        let policy = CapturePolicy::from_config(&config);
        assert!(policy.should_capture("POST", "/users"));
    }
}
