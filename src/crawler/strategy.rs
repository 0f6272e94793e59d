use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::browser::fingerprint::{EvasionProfile, EvasionProfileProvider};
use crate::cli::config::{CrawlerSettings, ProfilePolicy};
use crate::crawler::frontier::Frontier;
use crate::crawler::task::TaskSettings;
use crate::extract::SiteStructure;
use crate::proxy::{ProxyPool, ProxyRecord};
use crate::utils::{normalize_url, origin_of};

/// Per-task browsing parameters derived from the seed pages' structure
#[derive(Debug, Clone)]
pub struct CrawlStrategy {
    /// Origins of the seeds that were fetched
    home_origins: HashSet<String>,

    /// Drop links leaving the home origins instead of merely ranking them last
    same_origin_only: bool,

    max_links_per_page: Option<usize>,

    pub login_required: bool,

    policy: ProfilePolicy,

    /// Shared by every page under `ProfilePolicy::PerTask`
    task_profile: Arc<EvasionProfile>,

    use_proxy: bool,
}

impl CrawlStrategy {
    pub fn derive(
        seeds: &[Url],
        structure: &SiteStructure,
        settings: &CrawlerSettings,
        task_settings: &TaskSettings,
        profiles: &EvasionProfileProvider,
        task_profile: Option<Arc<EvasionProfile>>,
    ) -> Self {
        let home_origins = seeds.iter().map(origin_of).collect();
        let task_profile = task_profile.unwrap_or_else(|| Arc::new(profiles.generate()));

        if structure.login_required {
            info!("Login form detected on seed pages; protected pages will not be reachable");
        }
        debug!(
            links = structure.links.len(),
            forms = structure.forms.len(),
            profile = %task_profile.name,
            "Derived crawl strategy"
        );

        Self {
            home_origins,
            same_origin_only: settings.same_origin_only,
            max_links_per_page: settings.max_links_per_page,
            login_required: structure.login_required,
            policy: settings.profile_policy,
            task_profile,
            use_proxy: task_settings.use_proxy,
        }
    }

    fn is_home(&self, url: &Url) -> bool {
        self.home_origins.contains(&origin_of(url))
    }

    /// Links worth visiting from one page: unseen, permitted by the filters,
    /// same-origin links first (or only), capped per page.
    pub fn select_links(&self, links: &[Url], frontier: &Frontier) -> Vec<Url> {
        let mut seen = HashSet::new();
        let candidates: Vec<&Url> = links
            .iter()
            .filter(|url| seen.insert(normalize_url(url)))
            .filter(|url| !frontier.is_claimed(url))
            .filter(|url| frontier.permits(url))
            .collect();

        let (home, away): (Vec<&Url>, Vec<&Url>) =
            candidates.into_iter().partition(|url| self.is_home(url));

        let mut selected: Vec<Url> = home.into_iter().cloned().collect();
        if self.same_origin_only {
            debug!("Dropping {} off-origin links", away.len());
        } else {
            selected.extend(away.into_iter().cloned());
        }

        if let Some(cap) = self.max_links_per_page {
            selected.truncate(cap);
        }
        selected
    }

    /// Profile for a new operation according to the task's policy
    pub fn profile(&self, profiles: &EvasionProfileProvider) -> Arc<EvasionProfile> {
        match self.policy {
            ProfilePolicy::PerTask => self.task_profile.clone(),
            ProfilePolicy::PerPage => Arc::new(profiles.generate()),
        }
    }

    /// Proxy for a new operation, `None` when proxies are off or exhausted
    pub fn proxy(&self, pool: &ProxyPool) -> Option<Arc<ProxyRecord>> {
        if self.use_proxy {
            pool.get_random()
        } else {
            None
        }
    }

    pub fn task_profile(&self) -> &Arc<EvasionProfile> {
        &self.task_profile
    }
}
