//! Per-host robots.txt cache.
//!
//! Each host's robots.txt is fetched once per run, on first use, and shared
//! by all workers. A missing, unreadable or unparsable file allows
//! everything.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::Client;
use texting_robots::Robot;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

use lexcrawl_shared::{LexCrawlError, Result};

/// Crawl delays above this are capped.
const MAX_CRAWL_DELAY: Duration = Duration::from_secs(60);

/// Parsed rules for one host. `None` allows everything.
struct HostRobots {
    robot: Option<Robot>,
}

impl HostRobots {
    fn allowed(&self, url: &Url) -> bool {
        self.robot.as_ref().is_none_or(|r| r.allowed(url.as_str()))
    }

    fn crawl_delay(&self) -> Option<Duration> {
        let secs = self.robot.as_ref()?.delay?;
        (secs.is_finite() && secs > 0.0)
            .then(|| Duration::from_secs_f32(secs).min(MAX_CRAWL_DELAY))
    }
}

pub struct RobotsCache {
    client: Client,
    /// Product token matched against `User-agent` groups.
    agent: String,
    hosts: Mutex<HashMap<String, Arc<OnceCell<HostRobots>>>>,
}

impl RobotsCache {
    pub fn new(client: Client, user_agent: &str) -> Self {
        let agent = user_agent
            .split('/')
            .next()
            .unwrap_or(user_agent)
            .trim()
            .to_string();
        Self {
            client,
            agent,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Fail with a permanent fetch error when robots.txt disallows `url`.
    /// Otherwise returns the host's `Crawl-delay`, if any.
    pub async fn check(&self, url: &Url) -> Result<Option<Duration>> {
        let origin = url.origin().ascii_serialization();
        let cell = self.host_cell(&origin);
        let rules = cell.get_or_init(|| self.load(origin)).await;
        if !rules.allowed(url) {
            debug!(%url, "disallowed by robots.txt");
            return Err(LexCrawlError::permanent(url.as_str(), "disallowed by robots.txt"));
        }
        Ok(rules.crawl_delay())
    }

    fn host_cell(&self, origin: &str) -> Arc<OnceCell<HostRobots>> {
        let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(hosts.entry(origin.to_string()).or_default())
    }

    async fn load(&self, origin: String) -> HostRobots {
        let robots_url = format!("{origin}/robots.txt");
        let response = match self.client.get(&robots_url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %robots_url, error = %e, "robots.txt unreachable, allowing all");
                return HostRobots { robot: None };
            }
        };
        if !response.status().is_success() {
            debug!(url = %robots_url, status = %response.status(), "no robots.txt");
            return HostRobots { robot: None };
        }
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %robots_url, error = %e, "robots.txt read failed, allowing all");
                return HostRobots { robot: None };
            }
        };
        match Robot::new(&self.agent, &body) {
            Ok(robot) => {
                info!(url = %robots_url, crawl_delay = ?robot.delay, "loaded robots.txt");
                HostRobots { robot: Some(robot) }
            }
            Err(e) => {
                warn!(url = %robots_url, error = %e, "unparsable robots.txt, allowing all");
                HostRobots { robot: None }
            }
        }
    }
}
