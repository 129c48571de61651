use std::time::Duration;

use axum::http::{
    header::{AUTHORIZATION, COOKIE},
    HeaderMap, HeaderValue,
};

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

/// Build an `HttpOnly` same-site cookie carrying a token.
pub fn token_cookie(
    name: &str,
    token: &str,
    ttl: Duration,
    secure: bool,
) -> Result<HeaderValue, axum::http::header::InvalidHeaderValue> {
    let mut cookie = format!(
        "{name}={token}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
        ttl.as_secs()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub fn clear_cookie(
    name: &str,
    secure: bool,
) -> Result<HeaderValue, axum::http::header::InvalidHeaderValue> {
    let mut cookie = format!("{name}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Value of the named cookie from the request `Cookie` headers. Empty values count as absent.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == name && !val.trim().is_empty()).then(|| val.trim().to_string())
        })
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Access token from the cookie, falling back to the `Authorization` header.
pub fn access_token(headers: &HeaderMap) -> Option<String> {
    read_cookie(headers, ACCESS_COOKIE).or_else(|| bearer_token(headers))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn token_cookie_attributes() {
        let c = token_cookie(ACCESS_COOKIE, "abc.def.ghi", Duration::from_secs(900), true).unwrap();
        let s = c.to_str().unwrap();
        assert!(s.starts_with("accessToken=abc.def.ghi;"));
        assert!(s.contains("HttpOnly"));
        assert!(s.contains("SameSite=Strict"));
        assert!(s.contains("Max-Age=900"));
        assert!(s.ends_with("; Secure"));

        let insecure = token_cookie(REFRESH_COOKIE, "t", Duration::from_secs(1), false).unwrap();
        assert!(!insecure.to_str().unwrap().contains("Secure"));
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let c = clear_cookie(REFRESH_COOKIE, true).unwrap();
        let s = c.to_str().unwrap();
        assert!(s.starts_with("refreshToken=;"));
        assert!(s.contains("Max-Age=0"));
    }

    #[test]
    fn reads_named_cookie_among_others() {
        let h = headers(&[("cookie", "theme=dark; refreshToken=r1; accessToken=a1")]);
        assert_eq!(read_cookie(&h, REFRESH_COOKIE).as_deref(), Some("r1"));
        assert_eq!(read_cookie(&h, ACCESS_COOKIE).as_deref(), Some("a1"));
        assert_eq!(read_cookie(&h, "missing"), None);
    }

    #[test]
    fn empty_cookie_counts_as_absent() {
        let h = headers(&[("cookie", "accessToken=")]);
        assert_eq!(read_cookie(&h, ACCESS_COOKIE), None);
    }

    #[test]
    fn access_token_prefers_cookie_then_bearer() {
        let both = headers(&[("cookie", "accessToken=from-cookie"), ("authorization", "Bearer from-header")]);
        assert_eq!(access_token(&both).as_deref(), Some("from-cookie"));

        let header_only = headers(&[("authorization", "Bearer from-header")]);
        assert_eq!(access_token(&header_only).as_deref(), Some("from-header"));

        let basic = headers(&[("authorization", "Basic dXNlcjpwYXNz")]);
        assert_eq!(access_token(&basic), None);

        assert_eq!(access_token(&HeaderMap::new()), None);
    }
}
