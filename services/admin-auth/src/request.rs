//! Cookie and header plumbing shared by sessions and CSRF protection.

use http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue};
use std::net::{IpAddr, SocketAddr};

/// Attributes for a `Set-Cookie` header.
///
/// Cookies written here are always `HttpOnly`, `SameSite=Strict` and scoped
/// to `/`.
#[derive(Debug, Clone)]
pub struct CookieAttributes {
    /// Cookie name.
    pub name: String,
    /// Add the `Secure` flag (TLS deployments).
    pub secure: bool,
}

impl CookieAttributes {
    /// Create cookie attributes.
    #[must_use]
    pub fn new(name: impl Into<String>, secure: bool) -> Self {
        Self {
            name: name.into(),
            secure,
        }
    }

    /// Render a `Set-Cookie` value. `max_age` of `None` makes a browser-session cookie.
    #[must_use]
    pub fn render(&self, value: &str, max_age: Option<i64>) -> String {
        let mut cookie = format!("{}={}; Path=/", self.name, value);
        if let Some(secs) = max_age {
            cookie.push_str(&format!("; Max-Age={secs}"));
        }
        cookie.push_str("; HttpOnly; SameSite=Strict");
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Append a cookie to response headers.
    pub fn write(&self, headers: &mut HeaderMap, value: &str, max_age: Option<i64>) {
        append_set_cookie(headers, &self.render(value, max_age));
    }

    /// Append an immediately-expiring cookie that removes this one.
    pub fn clear(&self, headers: &mut HeaderMap) {
        append_set_cookie(headers, &self.render("", Some(-1)));
    }
}

fn append_set_cookie(headers: &mut HeaderMap, cookie: &str) {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            headers.append(SET_COOKIE, value);
        }
        Err(_) => tracing::warn!("Refusing to write cookie with invalid header characters"),
    }
}

/// Find a cookie value across all `Cookie` headers.
#[must_use]
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Extract the token from `Authorization: Bearer <token>`.
///
/// A missing header, another scheme or an empty credential yields an empty
/// string rather than an error.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> String {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim().to_string())
        .unwrap_or_default()
}

/// Resolve the client address for a request.
///
/// Prefers the first `X-Forwarded-For` entry, then `X-Real-IP`, then the
/// transport peer with any port removed. Bracketed IPv6 literals are
/// returned without brackets.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: &str) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    strip_port(peer)
}

fn strip_port(peer: &str) -> String {
    let peer = peer.trim();
    if let Ok(addr) = peer.parse::<SocketAddr>() {
        return addr.ip().to_string();
    }
    if let Ok(ip) = peer.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        return ip.to_string();
    }
    peer.rsplit_once(':')
        .map_or(peer, |(host, _)| host)
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string()
}
