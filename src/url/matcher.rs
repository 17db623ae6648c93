use crate::{ConfigError, ConfigResult};
use regex::Regex;
use url::Url;

/// Include/exclude filter compiled from a session's URL patterns
///
/// A URL passes when it matches at least one include pattern (or there are
/// none) and matches no exclude pattern. Patterns are regular expressions
/// matched anywhere in the full URL string.
#[derive(Debug, Clone, Default)]
pub struct UrlFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl UrlFilter {
    /// Compiles the filter
    ///
    /// # Returns
    ///
    /// * `Ok(UrlFilter)` - All patterns compiled
    /// * `Err(ConfigError::InvalidPattern)` - A pattern is not a valid regex
    pub fn new(include: &[String], exclude: &[String]) -> ConfigResult<Self> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// Returns true if the URL should be crawled
    pub fn allows(&self, url: &Url) -> bool {
        let candidate = url.as_str();

        if self.exclude.iter().any(|re| re.is_match(candidate)) {
            return false;
        }

        self.include.is_empty() || self.include.iter().any(|re| re.is_match(candidate))
    }
}

fn compile(patterns: &[String]) -> ConfigResult<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|e| ConfigError::InvalidPattern(format!("'{}': {}", p, e))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_filter_allows_everything() {
        let filter = UrlFilter::default();
        assert!(filter.allows(&url("https://example.com/anything")));
    }

    #[test]
    fn test_exclude_patterns() {
        let filter = UrlFilter::new(&[], &patterns(&["/admin", r"\.pdf$"])).unwrap();
        assert!(filter.allows(&url("https://example.com/docs")));
        assert!(!filter.allows(&url("https://example.com/admin/users")));
        assert!(!filter.allows(&url("https://example.com/files/report.pdf")));
    }

    #[test]
    fn test_include_patterns() {
        let filter = UrlFilter::new(&patterns(&["/blog/", "/news/"]), &[]).unwrap();
        assert!(filter.allows(&url("https://example.com/blog/post-1")));
        assert!(filter.allows(&url("https://example.com/news/today")));
        assert!(!filter.allows(&url("https://example.com/shop")));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let filter = UrlFilter::new(&patterns(&["/blog/"]), &patterns(&["draft"])).unwrap();
        assert!(filter.allows(&url("https://example.com/blog/post")));
        assert!(!filter.allows(&url("https://example.com/blog/draft-post")));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = UrlFilter::new(&patterns(&["[unclosed"]), &[]);
        assert!(matches!(result, Err(ConfigError::InvalidPattern(_))));
    }
}
