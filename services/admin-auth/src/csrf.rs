//! Double-submit CSRF protection.
//!
//! The token lives in an `HttpOnly` cookie and is echoed by the client in a
//! header or form field. A mutating request is accepted only when both
//! copies are present and equal.

use crate::config::CsrfConfig;
use crate::request::{self, CookieAttributes};
use crate::token;
use http::HeaderMap;

const TOKEN_BYTES: usize = 32;

/// Form field carrying the echoed token.
pub const FORM_FIELD: &str = "csrf_token";

/// Issues and checks double-submit CSRF tokens.
#[derive(Debug, Clone)]
pub struct CsrfGuard {
    cookie: CookieAttributes,
    header_name: String,
}

impl CsrfGuard {
    /// Create a guard from configuration.
    #[must_use]
    pub fn new(config: &CsrfConfig) -> Self {
        Self {
            cookie: CookieAttributes::new(config.cookie_name.clone(), config.tls_enabled),
            header_name: config.header_name.clone(),
        }
    }

    /// A fresh 64-hex-character token.
    #[must_use]
    pub fn generate_token() -> String {
        token::random_token(TOKEN_BYTES)
    }

    /// Reuse the token from the request cookie, or issue one and write its cookie.
    pub fn get_or_create_token(&self, existing: Option<&str>, response: &mut HeaderMap) -> String {
        if let Some(value) = existing.filter(|v| !v.is_empty()) {
            return value.to_string();
        }
        let value = Self::generate_token();
        self.set_cookie(response, &value);
        value
    }

    /// Write the CSRF cookie. It lasts for the browser session.
    pub fn set_cookie(&self, response: &mut HeaderMap, value: &str) {
        self.cookie.write(response, value, None);
    }

    /// Token carried by the request cookie.
    #[must_use]
    pub fn token_from_request(&self, headers: &HeaderMap) -> Option<String> {
        request::cookie_value(headers, &self.cookie.name)
    }

    /// Constant-time comparison of the cookie and submitted copies.
    #[must_use]
    pub fn validate(cookie: &str, submitted: &str) -> bool {
        !cookie.is_empty() && !submitted.is_empty() && token::constant_time_eq(cookie, submitted)
    }

    /// Check a mutating request: the cookie must match the header, or
    /// failing that the submitted form value.
    #[must_use]
    pub fn verify_request(&self, headers: &HeaderMap, form_value: Option<&str>) -> bool {
        let Some(cookie) = self.token_from_request(headers) else {
            tracing::debug!("CSRF check failed: no cookie");
            return false;
        };

        let submitted = headers
            .get(self.header_name.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .or(form_value);

        let valid = submitted.is_some_and(|submitted| Self::validate(&cookie, submitted));
        if !valid {
            tracing::debug!("CSRF check failed: token mismatch");
        }
        valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{COOKIE, SET_COOKIE};
    use http::HeaderValue;

    fn guard(tls_enabled: bool) -> CsrfGuard {
        CsrfGuard::new(&CsrfConfig {
            tls_enabled,
            ..CsrfConfig::default()
        })
    }

    fn request_with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("other=1; admin_csrf={value}")).unwrap(),
        );
        headers
    }

    #[test]
    fn test_generate_token_shape() {
        let token = CsrfGuard::generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_existing_token_is_reused_verbatim() {
        let guard = guard(false);
        let mut response = HeaderMap::new();
        let token = guard.get_or_create_token(Some("abc"), &mut response);
        assert_eq!(token, "abc");
        assert!(response.get(SET_COOKIE).is_none());
    }

    #[test]
    fn test_missing_token_is_issued_with_cookie() {
        let guard = guard(true);
        let mut response = HeaderMap::new();
        let token = guard.get_or_create_token(Some(""), &mut response);
        assert_eq!(token.len(), 64);

        let cookie = response.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with(&format!("admin_csrf={token}")));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Secure"));
    }

    #[test]
    fn test_validate() {
        assert!(CsrfGuard::validate("same", "same"));
        assert!(!CsrfGuard::validate("same", "other"));
        assert!(!CsrfGuard::validate("", ""));
        assert!(!CsrfGuard::validate("same", ""));
    }

    #[test]
    fn test_verify_request_header_and_form() {
        let guard = guard(false);
        let mut headers = request_with_cookie("tok123");
        assert!(guard.verify_request(&headers, Some("tok123")));
        assert!(!guard.verify_request(&headers, Some("nope")));
        assert!(!guard.verify_request(&headers, None));

        headers.insert("x-csrf-token", HeaderValue::from_static("tok123"));
        assert!(guard.verify_request(&headers, None));

        assert!(!guard.verify_request(&HeaderMap::new(), Some("tok123")));
    }
}
