//! Session cookie formatting and parsing.

use axum::http::{header, HeaderMap};
use std::time::Duration;

pub const SESSION_COOKIE: &str = "session";

/// `Set-Cookie` value carrying a new session.
pub fn session_cookie(value: &str, max_age: Duration, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
        SESSION_COOKIE,
        value,
        max_age.as_secs()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that deletes the session on the client.
pub fn clear_session_cookie(secure: bool) -> String {
    session_cookie("", Duration::ZERO, secure)
}

/// Finds the session cookie among the request's `Cookie` headers.
pub fn session_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie("abc", Duration::from_secs(1_209_600), true);
        assert_eq!(
            cookie,
            "session=abc; Max-Age=1209600; Path=/; HttpOnly; SameSite=Lax; Secure"
        );

        let insecure = session_cookie("abc", Duration::from_secs(60), false);
        assert!(!insecure.contains("Secure"));
    }

    #[test]
    fn test_clear_cookie_expires_immediately() {
        let cookie = clear_session_cookie(false);
        assert!(cookie.starts_with("session=;"));
        assert!(cookie.contains("Max-Age=0"));
    }

    #[test]
    fn test_session_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_from_headers(&headers), None);

        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session=tok.en.value; other=1"),
        );
        assert_eq!(session_from_headers(&headers).as_deref(), Some("tok.en.value"));
    }

    #[test]
    fn test_empty_session_cookie_is_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("session="));
        assert_eq!(session_from_headers(&headers), None);
    }
}
