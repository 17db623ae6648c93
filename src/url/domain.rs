use url::Url;

/// Extracts the lowercase host of a URL, without a leading `www.`
///
/// # Examples
///
/// ```
/// use url::Url;
/// use kumo_crawl::url::extract_domain;
///
/// let url = Url::parse("https://WWW.Example.com/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| {
        let host = h.to_lowercase();
        host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
    })
}

/// Checks if a domain matches a wildcard pattern
///
/// `"example.com"` matches only itself; `"*.example.com"` matches the bare
/// domain and any (nested) subdomain of it.
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    if let Some(base) = pattern.strip_prefix("*.") {
        candidate == base || candidate.ends_with(&format!(".{}", base))
    } else {
        candidate == pattern
    }
}

/// Returns true if `candidate` belongs to the crawl session's domain
///
/// The session domain and its subdomains are in-domain.
pub fn is_same_domain(session_domain: &str, candidate: &str) -> bool {
    matches_wildcard(&format!("*.{}", session_domain), candidate)
}
