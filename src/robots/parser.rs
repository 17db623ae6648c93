//! Robots.txt rules wrapper over the `robotstxt` crate

use robotstxt::DefaultMatcher;
use std::time::Duration;

/// Parsed robots.txt rules for one origin
///
/// `None` content means no usable robots.txt was found, which allows everything.
#[derive(Debug, Clone, Default)]
pub struct ParsedRobots {
    content: Option<String>,
}

impl ParsedRobots {
    /// Wraps raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        let content = Some(content.to_string()).filter(|c| !c.trim().is_empty());
        Self { content }
    }

    /// A permissive rule set, used when robots.txt is missing or unreachable
    pub fn allow_all() -> Self {
        Self { content: None }
    }

    /// Checks if a full URL may be fetched by the given user agent
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        match &self.content {
            None => true,
            Some(content) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(content, user_agent, url)
            }
        }
    }

    /// Returns the `Crawl-delay` that applies to the user agent
    ///
    /// A group naming the agent takes precedence over the `*` group.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        let content = self.content.as_ref()?;
        let agent = user_agent.to_lowercase();

        let mut group: Vec<String> = Vec::new();
        let mut in_rules = false;
        let mut wildcard_delay = None;
        let mut agent_delay = None;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    // A user-agent line after rules starts a new group
                    if in_rules {
                        group.clear();
                        in_rules = false;
                    }
                    group.push(value.to_lowercase());
                }
                "crawl-delay" => {
                    in_rules = true;
                    let Ok(seconds) = value.parse::<f64>() else {
                        continue;
                    };
                    if seconds < 0.0 || !seconds.is_finite() {
                        continue;
                    }
                    let delay = Duration::from_secs_f64(seconds);
                    if group.iter().any(|ua| ua != "*" && agent.contains(ua.as_str())) {
                        agent_delay = Some(delay);
                    } else if group.iter().any(|ua| ua == "*") {
                        wildcard_delay = Some(delay);
                    }
                }
                _ => in_rules = true,
            }
        }

        agent_delay.or(wildcard_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all() {
        let robots = ParsedRobots::allow_all();
        assert!(robots.is_allowed("https://example.com/admin", "KumoCrawl"));
        assert_eq!(robots.crawl_delay("KumoCrawl"), None);
    }

    #[test]
    fn test_disallow_specific_path() {
        let robots = ParsedRobots::from_content("User-agent: *\nDisallow: /admin");
        assert!(robots.is_allowed("https://example.com/", "KumoCrawl"));
        assert!(!robots.is_allowed("https://example.com/admin/users", "KumoCrawl"));
    }

    #[test]
    fn test_allow_overrides_disallow() {
        let robots =
            ParsedRobots::from_content("User-agent: *\nDisallow: /private\nAllow: /private/public");
        assert!(!robots.is_allowed("https://example.com/private", "KumoCrawl"));
        assert!(robots.is_allowed("https://example.com/private/public", "KumoCrawl"));
    }

    #[test]
    fn test_agent_specific_group() {
        let robots =
            ParsedRobots::from_content("User-agent: BadBot\nDisallow: /\n\nUser-agent: *\nAllow: /");
        assert!(robots.is_allowed("https://example.com/page", "KumoCrawl"));
        assert!(!robots.is_allowed("https://example.com/page", "BadBot"));
    }

    #[test]
    fn test_blank_content_allows_all() {
        let robots = ParsedRobots::from_content("   \n");
        assert!(robots.is_allowed("https://example.com/any", "KumoCrawl"));
    }

    #[test]
    fn test_crawl_delay_wildcard_and_agent() {
        let robots = ParsedRobots::from_content(
            "User-agent: KumoCrawl\nCrawl-delay: 5\n\nUser-agent: *\nCrawl-delay: 1.5",
        );
        assert_eq!(robots.crawl_delay("KumoCrawl/0.1"), Some(Duration::from_secs(5)));
        assert_eq!(
            robots.crawl_delay("OtherBot"),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_crawl_delay_multiple_agents_in_group() {
        let robots = ParsedRobots::from_content(
            "User-agent: BotA\nUser-agent: BotB\nDisallow: /x\nCrawl-delay: 3",
        );
        assert_eq!(robots.crawl_delay("BotB"), Some(Duration::from_secs(3)));
        assert_eq!(robots.crawl_delay("BotC"), None);
    }

    #[test]
    fn test_crawl_delay_ignores_garbage() {
        let robots = ParsedRobots::from_content("User-agent: *\nCrawl-delay: soon");
        assert_eq!(robots.crawl_delay("KumoCrawl"), None);
    }
}
