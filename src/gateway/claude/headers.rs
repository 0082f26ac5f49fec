//! Usage: Upstream request headers (bearer auth + anthropic-beta merge).

use axum::http::{header, HeaderMap, HeaderValue};

/// Beta token required for OAuth bearer authentication.
pub(crate) const OAUTH_BETA: &str = "oauth-2025-04-20";
pub(crate) const ANTHROPIC_VERSION: &str = "2023-06-01";
pub(crate) const BETA_HEADER: &str = "anthropic-beta";
const VERSION_HEADER: &str = "anthropic-version";

/// Merge caller-supplied beta tokens behind the mandatory OAuth token.
/// Matching is case-sensitive and exact; first-seen order is preserved.
pub(crate) fn merge_beta_tokens(client_header: Option<&str>) -> String {
    let mut tokens: Vec<String> = vec![OAUTH_BETA.to_string()];

    if let Some(raw) = client_header {
        for token in raw.split(',') {
            let token = token.trim();
            if token.is_empty() || tokens.iter().any(|t| t == token) {
                continue;
            }
            tokens.push(token.to_string());
        }
    }

    tokens.join(",")
}

pub(crate) fn build_upstream_headers(access_token: &str, inbound: &HeaderMap) -> HeaderMap {
    let client_beta = inbound.get(BETA_HEADER).and_then(|v| v.to_str().ok());
    let beta = merge_beta_tokens(client_beta);

    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(&format!("Bearer {access_token}")) {
        headers.insert(header::AUTHORIZATION, v);
    }
    if let Ok(v) = HeaderValue::from_str(&beta) {
        headers.insert(BETA_HEADER, v);
    }
    headers.insert(VERSION_HEADER, HeaderValue::from_static(ANTHROPIC_VERSION));
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mandatory_beta_comes_first_and_is_deduplicated() {
        let merged = merge_beta_tokens(Some("foo-2024,oauth-2025-04-20"));
        assert_eq!(merged, "oauth-2025-04-20,foo-2024");
    }

    #[test]
    fn client_order_is_preserved_after_the_mandatory_token() {
        let merged = merge_beta_tokens(Some("b-2, a-1 ,b-2"));
        assert_eq!(merged, "oauth-2025-04-20,b-2,a-1");
    }

    #[test]
    fn dedup_is_case_sensitive() {
        let merged = merge_beta_tokens(Some("OAuth-2025-04-20"));
        assert_eq!(merged, "oauth-2025-04-20,OAuth-2025-04-20");
    }

    #[test]
    fn no_client_header_yields_the_mandatory_token_alone() {
        assert_eq!(merge_beta_tokens(None), "oauth-2025-04-20");
        assert_eq!(merge_beta_tokens(Some("")), "oauth-2025-04-20");
    }

    #[test]
    fn upstream_headers_carry_auth_version_and_content_type() {
        let mut inbound = HeaderMap::new();
        inbound.insert(BETA_HEADER, HeaderValue::from_static("foo-2024"));

        let headers = build_upstream_headers("tok-1", &inbound);
        assert_eq!(
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok()),
            Some("Bearer tok-1")
        );
        assert_eq!(
            headers.get(BETA_HEADER).and_then(|v| v.to_str().ok()),
            Some("oauth-2025-04-20,foo-2024")
        );
        assert_eq!(
            headers.get(VERSION_HEADER).and_then(|v| v.to_str().ok()),
            Some(ANTHROPIC_VERSION)
        );
        assert_eq!(
            headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("application/json")
        );
    }
}
