//! Credential verification
//!
//! Holds the shared secret and decides whether a request presents it. The
//! secret never appears in `Debug` output. Both sides are hashed to SHA-256
//! before a constant-time comparison, so neither the content nor the length of
//! the secret shows in timing.

use crate::config::AuthConfig;
use axum::http::HeaderMap;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

/// The shared secret requests authenticate with
#[derive(Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Exact, constant-time comparison against a presented value
    pub fn matches(&self, presented: &str) -> bool {
        if self.0.is_empty() {
            return false;
        }
        let expected = Sha256::digest(self.0.as_bytes());
        let presented = Sha256::digest(presented.as_bytes());
        expected.as_slice().ct_eq(presented.as_slice()).into()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Credential(<unset>)")
        } else {
            f.write_str("Credential(<redacted>)")
        }
    }
}

/// Outcome of checking a request's credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Authentication is not required
    Open,
    /// The request presented the configured credential
    Authenticated,
    /// Missing, unreadable or wrong credential
    Denied,
}

impl AuthOutcome {
    pub fn is_allowed(self) -> bool {
        !matches!(self, AuthOutcome::Denied)
    }
}

/// Authentication policy built once from configuration
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    require_auth: bool,
    credential: Credential,
    header_name: String,
    query_param_name: Option<String>,
}

impl AuthPolicy {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            require_auth: config.require_auth,
            credential: config.api_key.clone(),
            header_name: config.header_name.clone(),
            query_param_name: config
                .allow_query_param
                .then(|| config.query_param_name.clone()),
        }
    }

    pub fn require_auth(&self) -> bool {
        self.require_auth
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    pub fn query_param_name(&self) -> Option<&str> {
        self.query_param_name.as_deref()
    }

    /// Check the credential carried by a request
    pub fn check(&self, headers: &HeaderMap, query: Option<&str>) -> AuthOutcome {
        if !self.require_auth {
            return AuthOutcome::Open;
        }

        match self.presented(headers, query) {
            Some(value) if self.credential.matches(&value) => AuthOutcome::Authenticated,
            _ => AuthOutcome::Denied,
        }
    }

    /// The credential a request presents: the header first, then the query parameter
    fn presented(&self, headers: &HeaderMap, query: Option<&str>) -> Option<String> {
        // Non-UTF-8 header values count as absent
        if let Some(value) = headers
            .get(self.header_name.as_str())
            .and_then(|v| v.to_str().ok())
        {
            return Some(value.to_string());
        }

        let name = self.query_param_name.as_deref()?;
        query_param(query?, name)
    }
}

/// Find a query parameter, percent-decoding its value. The last occurrence wins.
pub fn query_param(query: &str, name: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| *key == name)
        .last()
        .and_then(|(_, value)| decode_query_value(value))
}

/// Remove every occurrence of a query parameter, returning what is left
pub fn strip_query_param(query: Option<&str>, name: &str) -> Option<String> {
    let query = query.filter(|q| !q.is_empty())?;
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            let key = pair.split_once('=').map(|(k, _)| k).unwrap_or(pair);
            key != name
        })
        .collect();

    if kept.is_empty() {
        None
    } else {
        Some(kept.join("&"))
    }
}

/// Form-style decoding: `+` is a space, invalid UTF-8 counts as absent
fn decode_query_value(value: &str) -> Option<String> {
    let value = value.replace('+', " ");
    percent_decode_str(&value)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn policy(require_auth: bool) -> AuthPolicy {
        AuthPolicy::new(&AuthConfig {
            require_auth,
            api_key: Credential::new("abc123"),
            ..AuthConfig::default()
        })
    }

    fn headers_with_key(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("X-API-Key", HeaderValue::from_str(key).unwrap());
        headers
    }

    #[test]
    fn test_credential_exact_match_only() {
        let credential = Credential::new("abc123");
        assert!(credential.matches("abc123"));
        assert!(!credential.matches("abc12"));
        assert!(!credential.matches("abc1234"));
        assert!(!credential.matches("xabc123"));
        assert!(!credential.matches("ABC123"));
        assert!(!credential.matches(""));
    }

    #[test]
    fn test_empty_credential_matches_nothing() {
        assert!(!Credential::default().matches(""));
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::new("abc123");
        assert_eq!(format!("{:?}", credential), "Credential(<redacted>)");
    }

    #[test]
    fn test_auth_not_required_is_open() {
        let policy = policy(false);
        assert_eq!(policy.check(&HeaderMap::new(), None), AuthOutcome::Open);
        assert_eq!(
            policy.check(&headers_with_key("wrong"), None),
            AuthOutcome::Open
        );
    }

    #[test]
    fn test_header_credential() {
        let policy = policy(true);
        assert_eq!(
            policy.check(&headers_with_key("abc123"), None),
            AuthOutcome::Authenticated
        );
        assert_eq!(
            policy.check(&headers_with_key("abc124"), None),
            AuthOutcome::Denied
        );
        assert_eq!(policy.check(&HeaderMap::new(), None), AuthOutcome::Denied);
    }

    #[test]
    fn test_non_utf8_header_is_absent() {
        let policy = policy(true);
        let mut headers = HeaderMap::new();
        headers.insert("X-API-Key", HeaderValue::from_bytes(&[0xff, 0xfe]).unwrap());
        assert_eq!(policy.check(&headers, None), AuthOutcome::Denied);
    }

    #[test]
    fn test_query_credential() {
        let policy = policy(true);
        assert_eq!(
            policy.check(&HeaderMap::new(), Some("symbol=BTC&api_key=abc123")),
            AuthOutcome::Authenticated
        );
        assert_eq!(
            policy.check(&HeaderMap::new(), Some("api_key=abc%31%32%33")),
            AuthOutcome::Authenticated
        );
    }

    #[test]
    fn test_query_credential_disabled() {
        let policy = AuthPolicy::new(&AuthConfig {
            require_auth: true,
            api_key: Credential::new("abc123"),
            allow_query_param: false,
            ..AuthConfig::default()
        });
        assert_eq!(
            policy.check(&HeaderMap::new(), Some("api_key=abc123")),
            AuthOutcome::Denied
        );
    }

    #[test]
    fn test_header_takes_precedence_over_query() {
        let policy = policy(true);
        assert_eq!(
            policy.check(&headers_with_key("wrong"), Some("api_key=abc123")),
            AuthOutcome::Denied
        );
    }

    #[test]
    fn test_strip_query_param() {
        assert_eq!(strip_query_param(None, "api_key"), None);
        assert_eq!(strip_query_param(Some(""), "api_key"), None);
        assert_eq!(strip_query_param(Some("api_key=x"), "api_key"), None);
        assert_eq!(
            strip_query_param(Some("a=1&api_key=x&b=2"), "api_key"),
            Some("a=1&b=2".to_string())
        );
        assert_eq!(
            strip_query_param(Some("flag&api_key"), "api_key"),
            Some("flag".to_string())
        );
    }

    #[test]
    fn test_query_value_decoding() {
        assert_eq!(
            query_param("api_key=a%2Bb+c", "api_key"),
            Some("a+b c".to_string())
        );
        // Malformed escapes are kept literally and so never match a real key
        assert_eq!(query_param("api_key=%zz", "api_key"), Some("%zz".to_string()));
        assert_eq!(query_param("api_key=%ff%fe", "api_key"), None);
    }

    #[test]
    fn test_credential_length_mismatch_rejected() {
        let credential = Credential::new("abc123");
        assert!(!credential.matches(&"abc123".repeat(64)));
        assert!(!credential.matches("a"));
    }
}
