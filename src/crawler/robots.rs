use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::utils::origin_of;

/// Allow/Disallow rules that apply to our user agent on one origin
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsRules {
    /// (allow, path prefix)
    rules: Vec<(bool, String)>,
    pub crawl_delay: Option<Duration>,
}

impl RobotsRules {
    /// Rules that permit everything
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse robots.txt, keeping the group for `agent_token` or, failing that, `*`
    pub fn parse(content: &str, agent_token: &str) -> Self {
        // Groups name the product token, e.g. `adaptive-crawler` for `adaptive-crawler/0.1`
        let token = agent_token
            .split('/')
            .next()
            .unwrap_or(agent_token)
            .trim()
            .to_ascii_lowercase();
        let mut specific = RobotsRules::default();
        let mut wildcard = RobotsRules::default();
        let mut saw_specific = false;

        // Which buckets the current group feeds
        let mut current_agents: Vec<String> = Vec::new();
        let mut in_agent_lines = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            if key == "user-agent" {
                if !in_agent_lines {
                    current_agents.clear();
                }
                in_agent_lines = true;
                current_agents.push(value.to_ascii_lowercase());
                continue;
            }
            in_agent_lines = false;

            let for_specific = current_agents
                .iter()
                .any(|agent| *agent == token);
            let for_wildcard = current_agents.iter().any(|agent| agent == "*");
            saw_specific |= for_specific;

            let apply = |rules: &mut RobotsRules| match key.as_str() {
                "allow" if !value.is_empty() => rules.rules.push((true, value.to_string())),
                "disallow" if !value.is_empty() => rules.rules.push((false, value.to_string())),
                "crawl-delay" => {
                    if let Ok(secs) = value.parse::<f64>() {
                        if secs.is_finite() && secs >= 0.0 {
                            rules.crawl_delay = Some(Duration::from_secs_f64(secs));
                        }
                    }
                }
                _ => {}
            };

            if for_specific {
                apply(&mut specific);
            }
            if for_wildcard {
                apply(&mut wildcard);
            }
        }

        if saw_specific {
            specific
        } else {
            wildcard
        }
    }

    /// Longest matching prefix wins; ties go to Allow
    pub fn is_allowed(&self, url: &Url) -> bool {
        let mut target = url.path().to_string();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }

        let mut best: Option<(usize, bool)> = None;
        for (allow, prefix) in &self.rules {
            if !target.starts_with(prefix.as_str()) {
                continue;
            }
            let len = prefix.len();
            best = match best {
                Some((best_len, best_allow)) if best_len > len || (best_len == len && best_allow) => {
                    Some((best_len, best_allow))
                }
                _ => Some((len, *allow)),
            };
        }

        best.map_or(true, |(_, allow)| allow)
    }
}

/// robots.txt rules fetched once per origin and shared by all tasks
pub struct RobotsCache {
    client: Client,
    agent_token: String,
    rules: Mutex<HashMap<String, Arc<RobotsRules>>>,
}

impl RobotsCache {
    pub fn new(agent_token: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            agent_token: agent_token.into(),
            rules: Mutex::new(HashMap::new()),
        }
    }

    /// Rules for the origin of `url`, fetching them on first use.
    /// An unreachable or non-200 robots.txt allows everything.
    pub async fn rules_for(&self, url: &Url) -> Arc<RobotsRules> {
        let origin = origin_of(url);

        if let Some(rules) = self.rules.lock().await.get(&origin) {
            return rules.clone();
        }

        let rules = Arc::new(self.fetch(&origin).await);
        self.rules
            .lock()
            .await
            .entry(origin)
            .or_insert(rules)
            .clone()
    }

    pub async fn is_allowed(&self, url: &Url) -> bool {
        self.rules_for(url).await.is_allowed(url)
    }

    async fn fetch(&self, origin: &str) -> RobotsRules {
        let robots_url = format!("{}/robots.txt", origin);

        let response = match self.client.get(&robots_url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("No robots.txt for {}: {}", origin, e);
                return RobotsRules::allow_all();
            }
        };

        if !response.status().is_success() {
            debug!("No robots.txt for {} (HTTP {})", origin, response.status());
            return RobotsRules::allow_all();
        }

        match response.text().await {
            Ok(body) => {
                info!("Cached robots.txt for {}", origin);
                RobotsRules::parse(&body, &self.agent_token)
            }
            Err(e) => {
                debug!("Unreadable robots.txt for {}: {}", origin, e);
                RobotsRules::allow_all()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ROBOTS: &str = "\
# comment line
User-agent: *
Disallow: /private
Allow: /private/press
Crawl-delay: 2

User-agent: otherbot
Disallow: /
";

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn wildcard_group_applies_to_unknown_agent() {
        let rules = RobotsRules::parse(ROBOTS, "adaptive-crawler");

        assert!(rules.is_allowed(&url("http://a.test/")));
        assert!(!rules.is_allowed(&url("http://a.test/private/data")));
        assert!(rules.is_allowed(&url("http://a.test/private/press/2024")));
        assert_eq!(rules.crawl_delay, Some(Duration::from_secs(2)));
    }

    #[test]
    fn specific_group_overrides_wildcard() {
        let rules = RobotsRules::parse(ROBOTS, "OtherBot");
        assert!(!rules.is_allowed(&url("http://a.test/anything")));
        assert_eq!(rules.crawl_delay, None);
    }

    #[test]
    fn shared_group_and_empty_disallow() {
        let rules = RobotsRules::parse(
            "User-agent: a\nUser-agent: *\nDisallow:\nDisallow: /tmp  # scratch\n",
            "crawler",
        );
        assert!(rules.is_allowed(&url("http://a.test/")));
        assert!(!rules.is_allowed(&url("http://a.test/tmp/x")));
    }

    #[test]
    fn equal_length_tie_goes_to_allow() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /x\nAllow: /x\n", "crawler");
        assert!(rules.is_allowed(&url("http://a.test/x")));
    }

    #[tokio::test]
    async fn fetches_once_per_origin() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ROBOTS))
            .expect(1)
            .mount(&server)
            .await;

        let cache = RobotsCache::new("adaptive-crawler", Duration::from_secs(5));
        let base = url(&server.uri());

        assert!(!cache.is_allowed(&base.join("/private/a").unwrap()).await);
        assert!(cache.is_allowed(&base.join("/public").unwrap()).await);
        assert_eq!(
            cache.rules_for(&base).await.crawl_delay,
            Some(Duration::from_secs(2))
        );
    }

    #[tokio::test]
    async fn missing_robots_allows_everything() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let cache = RobotsCache::new("adaptive-crawler", Duration::from_secs(5));
        let base = url(&server.uri());
        assert!(cache.is_allowed(&base.join("/private").unwrap()).await);
    }
}
