//! Session cookie parsing and minting.

use axum::http::{header, HeaderMap, HeaderValue};
use cookie::time::Duration;
use cookie::{Cookie, SameSite};

use crate::config::SessionConfig;

/// Cookie attributes applied to every issued session cookie.
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    prefix: String,
    path: String,
    max_age_secs: Option<u64>,
    secure: bool,
    http_only: bool,
    same_site: SameSite,
}

impl CookiePolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            prefix: config.cookie_prefix.clone(),
            path: config.cookie_path.clone(),
            max_age_secs: config.cookie_max_age_secs,
            secure: config.cookie_secure,
            http_only: config.cookie_http_only,
            same_site: parse_same_site(&config.cookie_same_site),
        }
    }

    /// Cookie name for a cluster. Distinct per cluster so tenants sharing a
    /// parent domain never read each other's sessions.
    pub fn cookie_name(&self, cluster: &str) -> String {
        format!("{}_{}", self.prefix, cluster)
    }

    /// Build the `Set-Cookie` header value.
    pub fn set_cookie(&self, name: &str, value: &str) -> String {
        let mut cookie = Cookie::build((name.to_string(), value.to_string()))
            .path(self.path.clone())
            .http_only(self.http_only)
            .secure(self.secure)
            .same_site(self.same_site);
        if let Some(max_age) = self.max_age_secs {
            cookie = cookie.max_age(Duration::seconds(i64::try_from(max_age).unwrap_or(i64::MAX)));
        }
        cookie.build().to_string()
    }

    /// Append the session cookie to a response's headers.
    pub fn write(&self, headers: &mut HeaderMap, name: &str, value: &str) {
        match HeaderValue::from_str(&self.set_cookie(name, value)) {
            Ok(v) => {
                headers.append(header::SET_COOKIE, v);
            }
            Err(e) => tracing::warn!(cookie = %name, error = %e, "Session cookie is not a valid header value"),
        }
    }
}

/// Unknown values fall back to `Lax`.
fn parse_same_site(value: &str) -> SameSite {
    if value.eq_ignore_ascii_case("strict") {
        SameSite::Strict
    } else if value.eq_ignore_ascii_case("none") {
        SameSite::None
    } else {
        SameSite::Lax
    }
}

/// Find the value of cookie `name` across every `Cookie` header.
pub fn find_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| Cookie::split_parse(v).filter_map(Result::ok))
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value_trimmed().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CookiePolicy {
        CookiePolicy::from_config(&SessionConfig::default())
    }

    #[test]
    fn finds_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("a=1; sr-affinity_chat=tok-en"));
        headers.append(header::COOKIE, HeaderValue::from_static("b=2"));

        assert_eq!(find_cookie(&headers, "sr-affinity_chat"), Some("tok-en".into()));
        assert_eq!(find_cookie(&headers, "b"), Some("2".into()));
        assert_eq!(find_cookie(&headers, "sr-affinity_game"), None);
    }

    #[test]
    fn tolerates_quotes_padding_and_stray_separators() {
        let mut headers = HeaderMap::new();
        headers.append(
            header::COOKIE,
            HeaderValue::from_static(";; a=1 ;sr-affinity_chat=\"dG9rZW4=\"; ; broken"),
        );
        assert_eq!(find_cookie(&headers, "sr-affinity_chat"), Some("dG9rZW4=".into()));
        assert_eq!(find_cookie(&headers, "a"), Some("1".into()));
        assert_eq!(find_cookie(&headers, "broken"), None);
    }

    #[test]
    fn empty_cookie_is_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("sr-affinity_chat="));
        assert_eq!(find_cookie(&headers, "sr-affinity_chat"), None);
    }

    #[test]
    fn set_cookie_attributes() {
        let mut config = SessionConfig::default();
        config.cookie_max_age_secs = Some(600);
        let policy = CookiePolicy::from_config(&config);

        let name = policy.cookie_name("chat");
        assert_eq!(name, "sr-affinity_chat");

        let issued = policy.set_cookie(&name, "v");
        let parsed = Cookie::parse(issued.as_str()).unwrap();
        assert_eq!(parsed.name(), "sr-affinity_chat");
        assert_eq!(parsed.value(), "v");
        assert_eq!(parsed.path(), Some("/"));
        assert_eq!(parsed.max_age(), Some(Duration::seconds(600)));
        assert_eq!(parsed.http_only(), Some(true));
        assert_eq!(parsed.secure(), Some(true));
        assert_eq!(parsed.same_site(), Some(SameSite::Lax));
    }

    #[test]
    fn same_site_from_config() {
        let mut config = SessionConfig::default();
        config.cookie_same_site = "Strict".into();
        config.cookie_secure = false;
        let issued = CookiePolicy::from_config(&config).set_cookie("sr-affinity_chat", "v");

        let parsed = Cookie::parse(issued.as_str()).unwrap();
        assert_eq!(parsed.same_site(), Some(SameSite::Strict));
        assert_eq!(parsed.secure(), None);
    }

    #[test]
    fn write_appends_header() {
        let mut headers = HeaderMap::new();
        headers.append(header::SET_COOKIE, HeaderValue::from_static("other=1"));
        policy().write(&mut headers, "sr-affinity_chat", "v");
        assert_eq!(headers.get_all(header::SET_COOKIE).iter().count(), 2);
    }
}
