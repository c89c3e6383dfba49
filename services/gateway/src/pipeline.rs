//! The Request Pipeline: INIT -> SELECT -> DISPATCH -> STREAMING -> COMPLETE.
//!
//! One candidate is tried at a time; a pre-response failure (network error,
//! refresh failure, 429, 5xx) advances to the next candidate (FAIL_NEXT).
//! Once a 2xx response is committed, failover is no longer reachable — the
//! body is streamed to the client while a second, independent task drains
//! the same upstream response to extract usage and persist the completed
//! record. The two branches never share a future: a client disconnect
//! can only close the client channel, never the upstream read, so usage
//! extraction survives a dropped client for a bounded drain window.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use provider::ErrorClassification;
use storage::{now_ms, Account, RequestPayload, RequestRecord};
use usage::UsageInterceptor;

use crate::error::Error;
use crate::metrics as gw_metrics;
use crate::AppState;

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Handles every `/v1/*` request: the one entry point into the state
/// machine described in the module docs.
pub async fn handle(State(state): State<AppState>, request: Request<Body>) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().simple());
    let start = Instant::now();
    let timestamp = now_ms();
    let method = request.method().to_string();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let path = request.uri().path().to_string();
    let agent_used = request
        .headers()
        .get("x-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let (parts, body) = request.into_parts();
    let body_bytes = match to_bytes(body, state.config.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return Error::Validation(format!("request body unreadable or too large: {err}")).into_response();
        }
    };

    let mut guard = CompletionGuard {
        state: state.clone(),
        request_id: request_id.clone(),
        method: method.clone(),
        path: path.clone(),
        timestamp,
        agent_used: agent_used.clone(),
        start,
        failover_attempts: 0,
        completed: false,
    };

    let candidates = match state.pool.candidates().await {
        Ok(candidates) => candidates,
        Err(err) => {
            // Empty eligible set: no attempt was made, so no record row is
            // written (spec.md §8 scenario 4).
            guard.completed = true;
            return Error::from(err).into_response();
        }
    };

    let request_headers_b64 = encode_headers(&parts.headers);
    let request_body_b64 = BASE64.encode(&body_bytes);

    let mut last_status: Option<u16> = None;
    let mut last_message = String::from("no candidates available");

    // `retry_attempts` bounds the outer FAIL_NEXT loop across candidates
    // (spec.md §6's "outer request retry"); `retry_delay_ms`/`retry_backoff`
    // pace the gap between successive candidates, never a retry of the
    // same candidate.
    let retry_policy = state.config.retry_policy();
    let attempt_cap = (retry_policy.max_attempts as usize).min(candidates.len());
    let attempted = candidates.iter().take(attempt_cap);

    for (attempt, account) in attempted.enumerate() {
        guard.failover_attempts = attempt as i64;

        if attempt > 0 {
            tokio::time::sleep(retry_policy.delay_for(attempt as u32 - 1)).await;
        }

        let selected = match state.pool.access_token_for(account).await {
            Ok(selected) => selected,
            Err(err) => {
                last_status = None;
                last_message = err.to_string();
                if attempt > 0 {
                    gw_metrics::record_failover_attempt();
                }
                continue;
            }
        };

        if attempt > 0 {
            gw_metrics::record_failover_attempt();
        }

        let mut outbound_headers = build_outbound_headers(&parts.headers);
        state.provider.rewrite_headers(&mut outbound_headers, &selected.access_token);

        let outbound_body = rewrite_body_if_needed(&state, &body_bytes);

        let url = format!("{}{}", state.config.upstream_base_url, path_and_query);
        let send_future = state
            .http_client
            .request(parts.method.clone(), &url)
            .headers(outbound_headers)
            .body(outbound_body)
            .send();

        let header_timeout = Duration::from_secs(state.config.upstream_header_timeout_secs);
        let response = match tokio::time::timeout(header_timeout, send_future).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                last_status = None;
                last_message = format!("upstream network error: {err}");
                gw_metrics::record_upstream_error("network");
                continue;
            }
            Err(_) => {
                last_status = None;
                last_message = "upstream header timeout".to_string();
                gw_metrics::record_upstream_error("timeout");
                continue;
            }
        };

        let status = response.status();
        if status.is_success() {
            guard.completed = true;
            return commit_stream(
                CommitArgs {
                    state,
                    request_id,
                    account: account.clone(),
                    account_id: selected.id,
                    method,
                    path,
                    agent_used,
                    timestamp,
                    start,
                    failover_attempts: attempt as i64,
                    request_headers_b64,
                    request_body_b64,
                },
                response,
            )
            .await;
        }

        let headers = response.headers().clone();
        let body_text = response.text().await.unwrap_or_default();
        let classification = state.provider.classify_error(status.as_u16(), &body_text);
        apply_error_classification(&state, account, status.as_u16(), classification.clone(), &headers).await;
        gw_metrics::record_upstream_error(classification_label(classification));

        last_status = Some(status.as_u16());
        last_message = body_text;
    }

    guard.completed = true;
    let response_time_ms = start.elapsed().as_millis() as i64;
    let record = RequestRecord {
        id: request_id.clone(),
        timestamp,
        method,
        path,
        account_used: None,
        status_code: last_status.map(|s| s as i64),
        success: false,
        error_message: Some(last_message.clone()),
        response_time_ms: Some(response_time_ms),
        failover_attempts: candidates.len() as i64,
        model: None,
        input_tokens: None,
        output_tokens: None,
        cache_read_input_tokens: None,
        cache_creation_input_tokens: None,
        total_tokens: None,
        cost_usd: None,
        output_tokens_per_second: None,
        agent_used,
    };
    state.request_log.push(record.clone());
    let _ = state.log_tx.send(record.clone());
    state.writer.enqueue_record(record);
    gw_metrics::record_request(last_status.unwrap_or(502), "POST", response_time_ms as f64 / 1000.0);

    Error::AllCandidatesFailed {
        status: last_status,
        message: last_message,
    }
    .into_response()
}

/// Any 429 arms a cooldown, independent of `classification`: spec.md §4.3
/// requires a cooldown on every 429 (from `retry-after`, the account's
/// last observed `reset`, or a 60s default), and `classify_429`'s
/// quota-vs-transient text match only distinguishes *why* the account was
/// limited for metrics, not *whether* it gets a cooldown.
async fn apply_error_classification(
    state: &AppState,
    account: &Account,
    status: u16,
    classification: ErrorClassification,
    headers: &reqwest::header::HeaderMap,
) {
    if status == 429 {
        let snapshot = anthropic_pool::parse_rate_limit_headers(headers);
        let until = anthropic_pool::cooldown_until(now_ms(), headers, account.rate_limit_reset);
        if let Err(err) = state
            .pool
            .mark_rate_limited(
                &account.id,
                until,
                snapshot.status.as_deref(),
                snapshot.reset,
                snapshot.remaining,
            )
            .await
        {
            warn!(account_id = %account.id, error = %err, "failed to record rate limit");
        }
        gw_metrics::record_account_rate_limited(&account.name, true);
    }

    if classification == ErrorClassification::Permanent {
        if let Err(err) = state.pool.report_error(&account.id, classification, None).await {
            warn!(account_id = %account.id, error = %err, "failed to pause account");
        }
    }
}

fn classification_label(classification: ErrorClassification) -> &'static str {
    match classification {
        ErrorClassification::Transient => "transient",
        ErrorClassification::QuotaExceeded => "quota_exceeded",
        ErrorClassification::Permanent => "permanent",
    }
}

fn rewrite_body_if_needed(state: &AppState, body_bytes: &Bytes) -> Bytes {
    if !state.provider.needs_body() {
        return body_bytes.clone();
    }
    match serde_json::from_slice::<serde_json::Value>(body_bytes) {
        Ok(mut value) => {
            state.provider.rewrite_body(&mut value);
            match serde_json::to_vec(&value) {
                Ok(bytes) => Bytes::from(bytes),
                Err(_) => body_bytes.clone(),
            }
        }
        Err(_) => body_bytes.clone(),
    }
}

fn build_outbound_headers(client_headers: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in client_headers.iter() {
        if is_hop_by_hop(name.as_str()) || name == axum::http::header::AUTHORIZATION || name == axum::http::header::HOST {
            continue;
        }
        headers.insert(name.clone(), value.clone());
    }
    headers
}

fn encode_headers(headers: &HeaderMap) -> String {
    let map: std::collections::BTreeMap<String, String> = headers
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or("").to_string()))
        .collect();
    let json = serde_json::to_vec(&map).unwrap_or_default();
    BASE64.encode(json)
}

struct CommitArgs {
    state: AppState,
    request_id: String,
    account: Account,
    account_id: String,
    method: String,
    path: String,
    agent_used: Option<String>,
    timestamp: i64,
    start: Instant,
    failover_attempts: i64,
    request_headers_b64: String,
    request_body_b64: String,
}

/// Commits the chosen candidate: builds the client-facing response
/// immediately from the upstream status/headers, and spawns the two
/// decoupled tasks (upstream pump, usage finalize) that drive the body.
async fn commit_stream(args: CommitArgs, response: reqwest::Response) -> Response {
    let CommitArgs {
        state,
        request_id,
        account,
        account_id,
        method,
        path,
        agent_used,
        timestamp,
        start,
        failover_attempts,
        request_headers_b64,
        request_body_b64,
    } = args;

    let status = response.status();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let mut response_headers = HeaderMap::new();
    for (name, value) in response.headers().iter() {
        if is_hop_by_hop(name.as_str()) || name == "set-cookie" {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            response_headers.insert(name, value);
        }
    }
    let response_headers_b64 = encode_headers(&response_headers);

    let (client_tx, client_rx) = mpsc::channel::<Bytes>(state.config.tee_buffer_capacity.max(1));
    let (tee_tx, mut tee_rx) = usage::tee(state.config.tee_buffer_capacity);

    let drain_deadline = Duration::from_secs(state.config.client_cancel_drain_secs);
    let body_idle_timeout = Duration::from_secs(state.config.upstream_body_idle_timeout_secs);

    let pump_request_id = request_id.clone();
    tokio::spawn(async move {
        let mut upstream = response.bytes_stream();
        let mut disconnected_at: Option<Instant> = None;
        loop {
            let next = tokio::time::timeout(body_idle_timeout, upstream.next()).await;
            let chunk = match next {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(err))) => {
                    warn!(request_id = %pump_request_id, error = %err, "upstream stream error mid-flight");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("upstream body idle timeout, closing stream");
                    break;
                }
            };

            tee_tx.offer(chunk.clone());

            if disconnected_at.is_none() {
                if client_tx.send(chunk).await.is_err() {
                    disconnected_at = Some(Instant::now());
                }
            } else if disconnected_at.map(|at| at.elapsed() >= drain_deadline).unwrap_or(false) {
                break;
            }
        }
        drop(tee_tx);
    });

    tokio::spawn(async move {
        let mut interceptor = UsageInterceptor::new();
        while let Some(chunk) = tee_rx.recv().await {
            interceptor.feed(&chunk, &content_type);
        }
        let (snapshot, tokens_per_second) = interceptor.finish();

        if let Err(err) = state.pool.record_dispatch(&account_id).await {
            warn!(account_id = %account_id, error = %err, "failed to record successful dispatch");
        }

        let response_time_ms = start.elapsed().as_millis() as i64;
        let record = RequestRecord {
            id: request_id.clone(),
            timestamp,
            method: method.clone(),
            path,
            account_used: Some(account.id.clone()),
            status_code: Some(status.as_u16() as i64),
            success: true,
            error_message: None,
            response_time_ms: Some(response_time_ms),
            failover_attempts,
            model: snapshot.model.clone(),
            input_tokens: Some(snapshot.input_tokens as i64),
            output_tokens: Some(snapshot.output_tokens as i64),
            cache_read_input_tokens: Some(snapshot.cache_read_input_tokens as i64),
            cache_creation_input_tokens: Some(snapshot.cache_creation_input_tokens as i64),
            total_tokens: Some(snapshot.total_tokens() as i64),
            cost_usd: Some(snapshot.cost_usd()),
            output_tokens_per_second: tokens_per_second,
            agent_used,
        };

        state.request_log.push(record.clone());
        let _ = state.log_tx.send(record.clone());
        state.writer.enqueue_record(record);
        state.writer.enqueue_payload(RequestPayload {
            request_id: request_id.clone(),
            request_headers: request_headers_b64,
            request_body: request_body_b64,
            response_headers: response_headers_b64,
            response_body: "[streamed]".to_string(),
        });

        gw_metrics::record_request(status.as_u16(), &method, response_time_ms as f64 / 1000.0);
        gw_metrics::record_queue_metrics(
            state.writer.metrics().depth(),
            state.writer.metrics().oldest_item_age_ms(),
        );
        info!(request_id = %request_id, account = %account.name, status = status.as_u16(), "request complete");
    });

    let stream = receiver_stream(client_rx);
    let mut builder = Response::builder().status(StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::OK));
    for (name, value) in response_headers.iter() {
        builder = builder.header(name, value);
    }
    builder.body(Body::from_stream(stream)).unwrap_or_else(|_| {
        Error::Internal("failed to build streaming response".to_string()).into_response()
    })
}

fn receiver_stream(rx: mpsc::Receiver<Bytes>) -> impl Stream<Item = Result<Bytes, Infallible>> {
    futures_util::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|chunk| (Ok(chunk), rx)) })
}

/// Guards against pre-STREAMING client disconnects: axum simply drops the
/// handler future when the client goes away with no other hook available,
/// so this records `client_cancelled` on drop unless the request already
/// reached a point that writes its own record.
struct CompletionGuard {
    state: AppState,
    request_id: String,
    method: String,
    path: String,
    timestamp: i64,
    agent_used: Option<String>,
    start: Instant,
    failover_attempts: i64,
    completed: bool,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let record = RequestRecord {
            id: self.request_id.clone(),
            timestamp: self.timestamp,
            method: self.method.clone(),
            path: self.path.clone(),
            account_used: None,
            status_code: None,
            success: false,
            error_message: Some("client_cancelled".to_string()),
            response_time_ms: Some(self.start.elapsed().as_millis() as i64),
            failover_attempts: self.failover_attempts,
            model: None,
            input_tokens: None,
            output_tokens: None,
            cache_read_input_tokens: None,
            cache_creation_input_tokens: None,
            total_tokens: None,
            cost_usd: None,
            output_tokens_per_second: None,
            agent_used: self.agent_used.clone(),
        };
        self.state.request_log.push(record.clone());
        let _ = self.state.log_tx.send(record.clone());
        self.state.writer.enqueue_record(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_detection_matches_proxy_semantics() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("TRANSFER-ENCODING"));
        assert!(!is_hop_by_hop("Content-Type"));
        assert!(!is_hop_by_hop("Authorization"));
    }

    #[test]
    fn build_outbound_headers_strips_authorization_and_host() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer client-token"));
        headers.insert(axum::http::header::HOST, HeaderValue::from_static("client.example"));
        headers.insert("x-agent", HeaderValue::from_static("claude-code"));
        let outbound = build_outbound_headers(&headers);
        assert!(outbound.get(axum::http::header::AUTHORIZATION).is_none());
        assert!(outbound.get(axum::http::header::HOST).is_none());
        assert_eq!(outbound.get("x-agent").unwrap(), "claude-code");
    }

    #[test]
    fn encode_headers_round_trips_through_base64_json() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        let encoded = encode_headers(&headers);
        let decoded = BASE64.decode(encoded).unwrap();
        let map: std::collections::BTreeMap<String, String> = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(map.get("content-type").unwrap(), "application/json");
    }
}
