//! Header rewriting. Kept as pure functions over `HeaderMap` so the strip/
//! inject invariants from the testable-properties list can be asserted
//! without spinning up a listener.

use axum::http::{HeaderMap, HeaderName, HeaderValue};

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    HOP_BY_HOP.contains(&lower.as_str()) || lower.starts_with("proxy-")
}

/// Strips every header named in `auth_header_names` (case-insensitive),
/// regardless of what value the client supplied — present, absent, the
/// sentinel placeholder, or an attacker-chosen value all land here first.
pub fn strip_cross_service_auth_headers(headers: &mut HeaderMap, auth_header_names: &[String]) {
    for name in auth_header_names {
        if let Ok(header_name) = HeaderName::try_from(name.as_str()) {
            headers.remove(&header_name);
        }
    }
}

pub fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    let to_remove: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_hop_by_hop(name.as_str()))
        .cloned()
        .collect();
    for name in to_remove {
        headers.remove(&name);
    }
}

/// Sets `auth_header` to `auth_prefix + value`, overwriting anything left
/// over from the strip pass (there shouldn't be anything, but this makes
/// injection idempotent regardless of strip order).
pub fn inject_auth_header(
    headers: &mut HeaderMap,
    auth_header: &str,
    auth_prefix: &str,
    value: &str,
) -> Result<(), axum::http::header::InvalidHeaderValue> {
    let header_name = HeaderName::try_from(auth_header)
        .unwrap_or_else(|_| HeaderName::from_static("x-aquaman-invalid-header"));
    let header_value = HeaderValue::from_str(&format!("{auth_prefix}{value}"))?;
    headers.insert(header_name, header_value);
    Ok(())
}

pub fn rewrite_host_header(headers: &mut HeaderMap, upstream_host: &str) {
    if let Ok(value) = HeaderValue::from_str(upstream_host) {
        headers.insert(axum::http::header::HOST, value);
    }
}

/// Splits `/<service>/<rest...>` into `(service, rest)`. `rest` has no
/// leading slash; it is empty for a bare `/<service>` request.
pub fn parse_service_path(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.strip_prefix('/')?;
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.split_once('/').unwrap_or((trimmed, "")))
}

pub fn query_suffix(query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("?{q}"),
        _ => String::new(),
    }
}

/// Constant-time string comparison for the `/_hostmap` token check. Hand
/// rolled rather than pulling in `subtle`: both inputs are short,
/// human-typed tokens, not cryptographic key material, so this is
/// proportionate.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_map(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(HeaderName::try_from(*name).unwrap(), HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn strip_cross_service_auth_headers_removes_every_registered_service_header() {
        let mut headers = header_map(&[
            ("x-api-key", "client-supplied"),
            ("authorization", "Bearer attacker"),
            ("x-unrelated", "keep-me"),
        ]);
        strip_cross_service_auth_headers(
            &mut headers,
            &["x-api-key".to_string(), "Authorization".to_string()],
        );
        assert!(headers.get("x-api-key").is_none());
        assert!(headers.get("authorization").is_none());
        assert!(headers.get("x-unrelated").is_some());
    }

    #[test]
    fn strip_cross_service_auth_headers_is_invariant_to_client_supplied_value() {
        for value in ["aquaman-proxy-managed", "sk-ant-attacker", ""] {
            let mut headers = header_map(&[("x-api-key", value)]);
            strip_cross_service_auth_headers(&mut headers, &["x-api-key".to_string()]);
            assert!(headers.get("x-api-key").is_none());
        }
    }

    #[test]
    fn strip_hop_by_hop_headers_removes_the_documented_set_and_proxy_star() {
        let mut headers = header_map(&[
            ("Connection", "keep-alive"),
            ("Transfer-Encoding", "chunked"),
            ("Proxy-Authorization", "Basic abc"),
            ("Content-Type", "application/json"),
        ]);
        strip_hop_by_hop_headers(&mut headers);
        assert!(headers.get("connection").is_none());
        assert!(headers.get("transfer-encoding").is_none());
        assert!(headers.get("proxy-authorization").is_none());
        assert!(headers.get("content-type").is_some());
    }

    #[test]
    fn inject_auth_header_combines_prefix_and_value() {
        let mut headers = HeaderMap::new();
        inject_auth_header(&mut headers, "Authorization", "Bearer ", "sk-real").unwrap();
        assert_eq!(headers.get("authorization").unwrap(), "Bearer sk-real");
    }

    #[test]
    fn inject_auth_header_with_empty_prefix_sets_bare_value() {
        let mut headers = HeaderMap::new();
        inject_auth_header(&mut headers, "x-api-key", "", "sk-ant-real-12345").unwrap();
        assert_eq!(headers.get("x-api-key").unwrap(), "sk-ant-real-12345");
    }

    #[test]
    fn parse_service_path_splits_service_and_rest() {
        assert_eq!(parse_service_path("/anthropic/v1/messages"), Some(("anthropic", "v1/messages")));
        assert_eq!(parse_service_path("/anthropic"), Some(("anthropic", "")));
        assert_eq!(parse_service_path("/"), None);
        assert_eq!(parse_service_path("no-leading-slash"), None);
    }

    #[test]
    fn query_suffix_prefixes_with_question_mark_only_when_present() {
        assert_eq!(query_suffix(Some("a=b")), "?a=b");
        assert_eq!(query_suffix(Some("")), "");
        assert_eq!(query_suffix(None), "");
    }

    #[test]
    fn constant_time_eq_matches_string_equality() {
        assert!(constant_time_eq("same-token", "same-token"));
        assert!(!constant_time_eq("same-token", "different"));
        assert!(!constant_time_eq("short", "longer-token"));
    }
}
