use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};

use aquaman_audit::AuditEntryDraft;

use crate::headers::{
    constant_time_eq, inject_auth_header, parse_service_path, query_suffix,
    rewrite_host_header, strip_cross_service_auth_headers, strip_hop_by_hop_headers,
};
use crate::state::ProxyState;

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"ok": true}))
}

pub async fn hostmap(State(state): State<Arc<ProxyState>>, headers: HeaderMap) -> Response {
    if let Some(expected_token) = &state.hostmap_token {
        let provided = headers
            .get("x-aquaman-token")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if !constant_time_eq(provided, expected_token) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "unauthorized"})),
            )
                .into_response();
        }
    }

    let mut map = serde_json::Map::new();
    for service in &state.allowed_services {
        if let Some(descriptor) = state.registry.get(service) {
            map.insert(service.clone(), serde_json::Value::String(descriptor.upstream));
        }
    }
    Json(serde_json::Value::Object(map)).into_response()
}

fn json_error(status: StatusCode, body: serde_json::Value) -> Response {
    (status, Json(body)).into_response()
}

fn not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, serde_json::json!({"error": "not_found"}))
}

fn credential_missing(service: &str) -> Response {
    json_error(
        StatusCode::SERVICE_UNAVAILABLE,
        serde_json::json!({"error": "credential_missing", "service": service}),
    )
}

fn backend_error(service: &str) -> Response {
    json_error(
        StatusCode::SERVICE_UNAVAILABLE,
        serde_json::json!({"error": "backend_unavailable", "service": service}),
    )
}

fn upstream_error() -> Response {
    json_error(StatusCode::BAD_GATEWAY, serde_json::json!({"error": "upstream_error"}))
}

fn upstream_timeout() -> Response {
    json_error(StatusCode::GATEWAY_TIMEOUT, serde_json::json!({"error": "upstream_timeout"}))
}

/// Appends one audit entry off the async runtime thread — the audit log
/// does synchronous file I/O (including the rotation fsync), so it must
/// not run inline on a task that's also driving a socket.
async fn write_audit_entry(state: &ProxyState, draft: AuditEntryDraft) {
    let audit = Arc::clone(&state.audit);
    let join_result = tokio::task::spawn_blocking(move || {
        audit.append(draft);
    })
    .await;
    if let Err(err) = join_result {
        tracing::error!(error = %err, "audit append task panicked");
    }
}

/// Records the outcome of a credential access (missing credential, backend
/// error, or the upstream response status once it's known).
async fn record_credential_access(state: &ProxyState, service: &str, success: bool) {
    write_audit_entry(state, AuditEntryDraft::credential_access(service, success)).await;
}

/// Records that a request is about to be dispatched upstream using a live
/// credential, before the connection is opened — so the attempt is on the
/// record even if the process crashes mid-request.
async fn record_credential_dispatch(state: &ProxyState, service: &str) {
    write_audit_entry(state, AuditEntryDraft::credential_dispatch(service)).await;
}

const BACKEND_RETRY_BASE_MS: u64 = 200;
const BACKEND_RETRY_JITTER_MS: u64 = 100;

/// Resolves a credential, retrying once with jitter if the backend reports
/// a transient error, per the `BackendError::Transient` retry policy.
async fn resolve_credential_with_retry(
    state: &ProxyState,
    service: &str,
    credential_key: &str,
) -> Result<Option<String>, aquaman_core::error::AquamanError> {
    match aquaman_secret::resolve_credential(state.credentials.as_ref(), service, credential_key).await {
        Err(err) if err.is_retryable() => {
            let jitter = rand::random::<u64>() % BACKEND_RETRY_JITTER_MS;
            tokio::time::sleep(std::time::Duration::from_millis(BACKEND_RETRY_BASE_MS + jitter)).await;
            tracing::warn!(service, error = %err, "backend reported a transient error, retrying once");
            aquaman_secret::resolve_credential(state.credentials.as_ref(), service, credential_key).await
        }
        result => result,
    }
}

/// The catch-all route: everything that isn't `/_health` or `/_hostmap` is
/// `/<service>/<rest...>` forwarded to the matching upstream, or a 404.
pub async fn forward(State(state): State<Arc<ProxyState>>, req: Request) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let path = uri.path().to_string();

    let Some((service, rest)) = parse_service_path(&path) else {
        return not_found();
    };

    if !state.is_allowed(service) {
        return not_found();
    }
    let Some(descriptor) = state.registry.get(service) else {
        return not_found();
    };

    let mut headers = req.headers().clone();
    strip_cross_service_auth_headers(&mut headers, &state.registry.all_auth_headers());
    strip_hop_by_hop_headers(&mut headers);

    let credential = match resolve_credential_with_retry(&state, service, &descriptor.credential_key).await {
        Ok(Some(value)) => value,
        Ok(None) => {
            record_credential_access(&state, service, false).await;
            return credential_missing(service);
        }
        Err(err) => {
            tracing::warn!(service, error = %err, "credential backend error");
            record_credential_access(&state, service, false).await;
            return backend_error(service);
        }
    };

    if inject_auth_header(&mut headers, &descriptor.auth_header, &descriptor.auth_prefix, &credential).is_err() {
        record_credential_access(&state, service, false).await;
        return backend_error(service);
    }

    let upstream_url = format!(
        "{}/{}{}",
        descriptor.upstream.trim_end_matches('/'),
        rest,
        query_suffix(uri.query())
    );

    if let Ok(parsed) = reqwest::Url::parse(&upstream_url) {
        if let Some(host) = parsed.host_str() {
            rewrite_host_header(&mut headers, host);
        }
    }

    let body_stream = req.into_body().into_data_stream();
    let upstream_body = reqwest::Body::wrap_stream(body_stream);

    record_credential_dispatch(&state, service).await;

    let upstream_result = state
        .http_client
        .request(method, upstream_url.as_str())
        .headers(headers)
        .body(upstream_body)
        .send()
        .await;

    match upstream_result {
        Ok(upstream_response) => {
            let success = upstream_response.status().is_success();
            record_credential_access(&state, service, success).await;
            stream_response(upstream_response)
        }
        Err(err) => {
            record_credential_access(&state, service, false).await;
            if err.is_timeout() {
                upstream_timeout()
            } else {
                tracing::warn!(service, error = %err, "upstream request failed");
                upstream_error()
            }
        }
    }
}

fn stream_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop_headers(&mut headers);
    let body = Body::from_stream(upstream.bytes_stream());

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
