use url::Url;

/// Normalize a URL to avoid duplicates due to minor differences
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();

    // Remove default ports
    if let Some(port) = normalized.port() {
        if (normalized.scheme() == "http" && port == 80)
            || (normalized.scheme() == "https" && port == 443)
        {
            let _ = normalized.set_port(None);
        }
    }

    // Sort query parameters if present
    if let Some(query) = normalized.query() {
        if query.is_empty() {
            normalized.set_query(None);
        } else {
            let mut params: Vec<(&str, &str)> = query
                .split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
                .collect();
            params.sort();

            let sorted_query = params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<String>>()
                .join("&");

            normalized.set_query(Some(&sorted_query));
        }
    }

    // Remove fragments (anchors)
    normalized.set_fragment(None);

    // The url crate already lowercases hosts; a bare "/" path is dropped here
    let mut out = normalized.to_string();
    if normalized.path() == "/" && normalized.query().is_none() && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Resolve an href against a base, keeping only http(s) targets and dropping the fragment
pub fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let mut resolved = base.join(href).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved)
}

/// `scheme://host[:port]` of a URL
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(raw: &str) -> String {
        normalize_url(&Url::parse(raw).unwrap())
    }

    #[test]
    fn test_normalize_url() {
        // Test case insensitivity in host
        assert_eq!(norm("https://EXAMPLE.com/path"), "https://example.com/path");

        // Test removal of default ports
        assert_eq!(norm("https://example.com:443/path"), "https://example.com/path");
        assert_eq!(norm("http://example.com:8080/path"), "http://example.com:8080/path");

        // Test removal of trailing slash
        assert_eq!(norm("https://example.com/"), "https://example.com");

        // Test query parameter sorting
        assert_eq!(
            norm("https://example.com/search?b=2&a=1"),
            "https://example.com/search?a=1&b=2"
        );

        // Test fragment removal
        assert_eq!(norm("https://example.com/page#section"), "https://example.com/page");
    }

    #[test]
    fn test_resolve_link() {
        let base = Url::parse("http://a.test/docs/index.html").unwrap();

        assert_eq!(
            resolve_link(&base, "guide.html#intro").unwrap().as_str(),
            "http://a.test/docs/guide.html"
        );
        assert_eq!(
            resolve_link(&base, "//b.test/x").unwrap().as_str(),
            "http://b.test/x"
        );
        assert!(resolve_link(&base, "#top").is_none());
        assert!(resolve_link(&base, "mailto:someone@a.test").is_none());
        assert!(resolve_link(&base, "javascript:void(0)").is_none());
        assert!(resolve_link(&base, "   ").is_none());
    }

    #[test]
    fn test_origin_of() {
        let url = Url::parse("https://a.test:8443/x?y=1").unwrap();
        assert_eq!(origin_of(&url), "https://a.test:8443");
    }
}
