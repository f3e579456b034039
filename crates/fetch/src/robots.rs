use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use robotstxt::DefaultMatcher;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

use siteaudit_core::url::origin_key;
use siteaudit_core::CrawlError;

/// Outcome of a robots consultation for one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotsVerdict {
    Allowed,
    Disallowed,
    /// robots.txt could not be fetched; policy is allow-all, and the run's
    /// summary gets a notice.
    Unavailable,
}

enum RobotsFile {
    /// Fetched and parseable (or a 4xx meaning "no rules").
    Rules(Option<String>),
    /// Network failure; allow everything.
    FetchFailed,
}

/// Per-origin robots.txt cache with a single-flight guard: concurrent first
/// references to an origin collapse into one GET.
pub struct RobotsPolicy {
    client: reqwest::Client,
    agent_token: String,
    respect: bool,
    cache: DashMap<String, Arc<OnceCell<RobotsFile>>>,
}

impl RobotsPolicy {
    /// Reads `http.user_agent` and `http.respect_robots`.
    pub fn new(user_agent: &str, respect: bool) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(user_agent.to_string())
            .build()
            .map_err(|e| CrawlError::Network(e.to_string()))?;
        // Product token only: "siteaudit/0.1 (+url)" matches "siteaudit".
        let agent_token = user_agent
            .split(['/', ' '])
            .next()
            .unwrap_or("*")
            .to_string();
        Ok(Self {
            client,
            agent_token,
            respect,
            cache: DashMap::new(),
        })
    }

    pub async fn check(&self, url: &Url) -> RobotsVerdict {
        if !self.respect {
            return RobotsVerdict::Allowed;
        }
        let origin = origin_key(url);
        let cell = self
            .cache
            .entry(origin)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let file = cell
            .get_or_init(|| async { self.fetch_robots(url).await })
            .await;
        match file {
            RobotsFile::FetchFailed => RobotsVerdict::Unavailable,
            RobotsFile::Rules(None) => RobotsVerdict::Allowed,
            RobotsFile::Rules(Some(body)) => {
                let mut matcher = DefaultMatcher::default();
                if matcher.one_agent_allowed_by_robots(body, &self.agent_token, url.as_str()) {
                    RobotsVerdict::Allowed
                } else {
                    RobotsVerdict::Disallowed
                }
            }
        }
    }

    /// `Sitemap:` directives from the origin's robots.txt, fetched on
    /// demand and cached like the rules. Works even when rule enforcement
    /// is off, since sitemap discovery is orthogonal to the allow policy.
    pub async fn sitemaps(&self, url: &Url) -> Vec<Url> {
        let origin = origin_key(url);
        let cell = self
            .cache
            .entry(origin)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let file = cell
            .get_or_init(|| async { self.fetch_robots(url).await })
            .await;
        let RobotsFile::Rules(Some(body)) = file else {
            return Vec::new();
        };
        body.lines()
            .filter_map(|line| {
                let line = line.trim();
                let value = line
                    .split_once(':')
                    .filter(|(key, _)| key.trim().eq_ignore_ascii_case("sitemap"))
                    .map(|(_, v)| v.trim())?;
                url.join(value).ok()
            })
            .collect()
    }

    async fn fetch_robots(&self, url: &Url) -> RobotsFile {
        let robots_url = match url.join("/robots.txt") {
            Ok(u) => u,
            Err(_) => return RobotsFile::FetchFailed,
        };
        debug!(url = %robots_url, "fetching robots.txt");
        match self.client.get(robots_url.as_str()).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => RobotsFile::Rules(Some(body)),
                Err(e) => {
                    warn!(url = %robots_url, error = %e, "robots.txt body unreadable");
                    RobotsFile::FetchFailed
                }
            },
            // 404 and friends: the site has no robots rules.
            Ok(_) => RobotsFile::Rules(None),
            Err(e) => {
                warn!(url = %robots_url, error = %e, "robots.txt fetch failed");
                RobotsFile::FetchFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn policy() -> RobotsPolicy {
        RobotsPolicy::new("siteaudit/0.1", true).expect("policy builds")
    }

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{p}", server.uri())).expect("test url")
    }

    #[tokio::test]
    async fn disallow_rule_blocks_matching_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /admin\n"),
            )
            .expect(1)
            .mount(&server)
            .await;
        let policy = policy();
        assert_eq!(
            policy.check(&url(&server, "/admin/users")).await,
            RobotsVerdict::Disallowed
        );
        // Cached: second consultation must not refetch (expect(1) verifies).
        assert_eq!(
            policy.check(&url(&server, "/public")).await,
            RobotsVerdict::Allowed
        );
    }

    #[tokio::test]
    async fn longest_match_allow_wins() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "User-agent: *\nDisallow: /private\nAllow: /private/shared\n",
            ))
            .mount(&server)
            .await;
        let policy = policy();
        assert_eq!(
            policy.check(&url(&server, "/private/x")).await,
            RobotsVerdict::Disallowed
        );
        assert_eq!(
            policy.check(&url(&server, "/private/shared/doc")).await,
            RobotsVerdict::Allowed
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
        assert_eq!(
            policy().check(&url(&server, "/anything")).await,
            RobotsVerdict::Allowed
        );
    }

    #[tokio::test]
    async fn sitemap_directives_are_collected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "User-agent: *\nDisallow: /tmp\nSitemap: {0}/sitemap.xml\nsitemap: {0}/news.xml\n",
                server.uri()
            )))
            .expect(1)
            .mount(&server)
            .await;
        let policy = policy();
        let sitemaps = policy.sitemaps(&url(&server, "/")).await;
        let paths: Vec<&str> = sitemaps.iter().map(|u| u.path()).collect();
        assert_eq!(paths, vec!["/sitemap.xml", "/news.xml"]);
        // shares the cached fetch with rule checks
        assert_eq!(
            policy.check(&url(&server, "/tmp/x")).await,
            RobotsVerdict::Disallowed
        );
    }

    #[tokio::test]
    async fn unreachable_origin_reports_unavailable() {
        let unreachable = Url::parse("http://127.0.0.1:1/page").expect("test url");
        assert_eq!(
            policy().check(&unreachable).await,
            RobotsVerdict::Unavailable
        );
    }

    #[tokio::test]
    async fn disabled_policy_allows_without_fetching() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /\n"))
            .expect(0)
            .mount(&server)
            .await;
        let policy = RobotsPolicy::new("siteaudit/0.1", false).expect("policy builds");
        assert_eq!(
            policy.check(&url(&server, "/blocked")).await,
            RobotsVerdict::Allowed
        );
    }
}
