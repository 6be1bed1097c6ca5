//! robots.txt handling. The allow/disallow decision delegates to the
//! `robotstxt` matcher; the line-oriented parse here only extracts what the
//! matcher does not surface: `Sitemap` entries and per-group `Crawl-delay`.

use robotstxt::DefaultMatcher;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct RobotsRule {
    pub user_agent: String,
    pub crawl_delay_seconds: Option<u64>,
}

/// Parsed robots.txt for one origin. Keeps the raw content for the matcher
/// alongside the hand-extracted sitemap and crawl-delay directives.
#[derive(Debug, Clone, Default)]
pub struct RobotsHandler {
    content: String,
    rules: HashMap<String, RobotsRule>,
    sitemaps: Vec<String>,
}

impl RobotsHandler {
    /// Parse robots.txt text. Keys are case-insensitive; `#` starts a
    /// comment; `Sitemap` entries are collected globally and `Crawl-delay`
    /// attaches to the most recent `User-agent` group.
    pub fn parse(text: &str) -> Self {
        let mut handler = Self {
            content: text.to_string(),
            ..Default::default()
        };
        let mut current_agent: Option<String> = None;

        for raw_line in text.lines() {
            let line = match raw_line.find('#') {
                Some(pos) => &raw_line[..pos],
                None => raw_line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim().to_string();

            match key.as_str() {
                "user-agent" => {
                    let agent = value.to_ascii_lowercase();
                    handler
                        .rules
                        .entry(agent.clone())
                        .or_insert_with(|| RobotsRule {
                            user_agent: agent.clone(),
                            ..Default::default()
                        });
                    current_agent = Some(agent);
                }
                "sitemap" => {
                    if !value.is_empty() {
                        handler.sitemaps.push(value);
                    }
                }
                "crawl-delay" => {
                    if let Some(agent) = &current_agent {
                        if let (Some(rule), Ok(secs)) =
                            (handler.rules.get_mut(agent), value.parse::<u64>())
                        {
                            rule.crawl_delay_seconds = Some(secs);
                        }
                    }
                }
                _ => {}
            }
        }

        handler
    }

    /// Whether `path` may be fetched by `user_agent`, per the robots.txt
    /// matching rules (longest match wins, Allow wins ties). Empty content
    /// allows everything.
    pub fn is_allowed(&self, path: &str, user_agent: &str) -> bool {
        if self.content.is_empty() || path.is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, path)
    }

    fn rule_for_agent(&self, user_agent: &str) -> Option<&RobotsRule> {
        let agent = user_agent.to_ascii_lowercase();
        self.rules.get(&agent).or_else(|| self.rules.get("*"))
    }

    /// Crawl delay for the matching rule group, if declared.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<u64> {
        self.rule_for_agent(user_agent)
            .and_then(|rule| rule.crawl_delay_seconds)
    }

    /// Globally collected sitemap URLs, deduplicated in sorted order.
    pub fn get_sitemaps(&self) -> Vec<String> {
        let mut sitemaps = self.sitemaps.clone();
        sitemaps.sort();
        sitemaps.dedup();
        sitemaps
    }
}
