use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use crate::cli::config::{default_fingerprints, BrowserFingerprint, Viewport};

/// Request-level stealth parameters for one browser context.
/// Immutable once generated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvasionProfile {
    pub name: String,
    pub user_agent: String,
    pub headers: BTreeMap<String, String>,
    pub launch_args: Vec<String>,
    pub viewport: Viewport,
}

impl Default for EvasionProfile {
    fn default() -> Self {
        EvasionProfileProvider::new(default_fingerprints(), DESKTOP_VIEWPORT).build(0)
    }
}

const DESKTOP_VIEWPORT: Viewport = Viewport {
    width: 1920,
    height: 1080,
};

const NO_PREVIOUS: usize = usize::MAX;

/// Generates evasion profiles from the configured fingerprints, never handing
/// out the same fingerprint twice in a row while more than one is available.
pub struct EvasionProfileProvider {
    /// Available fingerprints to use
    fingerprints: Vec<BrowserFingerprint>,

    /// Base viewport, jittered per profile
    viewport: Viewport,

    /// Index of the fingerprint used last
    last: AtomicUsize,
}

impl EvasionProfileProvider {
    /// Create a provider; an empty list falls back to the built-in fingerprints
    pub fn new(fingerprints: Vec<BrowserFingerprint>, viewport: Viewport) -> Self {
        let fingerprints = if fingerprints.is_empty() {
            default_fingerprints()
        } else {
            fingerprints
        };

        Self {
            fingerprints,
            viewport,
            last: AtomicUsize::new(NO_PREVIOUS),
        }
    }

    /// Produce a fresh profile
    pub fn generate(&self) -> EvasionProfile {
        let count = self.fingerprints.len();
        let mut rng = thread_rng();

        let mut chosen = 0;
        // The closure always yields Some, so the update cannot fail
        let _ = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |previous| {
                chosen = if previous == NO_PREVIOUS || count == 1 {
                    rng.gen_range(0..count)
                } else {
                    // Any offset but zero moves off the previous fingerprint
                    (previous + rng.gen_range(1..count)) % count
                };
                Some(chosen)
            });

        self.build(chosen)
    }

    /// Complete a basic fingerprint with headers, launch flags and viewport
    fn build(&self, index: usize) -> EvasionProfile {
        let fingerprint = &self.fingerprints[index % self.fingerprints.len()];
        let mut rng = thread_rng();

        let mobile = fingerprint.user_agent.contains("Mobile");
        let viewport = if mobile {
            Viewport {
                width: rng.gen_range(360..430),
                height: rng.gen_range(640..932),
            }
        } else {
            // Small jitter so repeated profiles do not share exact dimensions
            Viewport {
                width: self.viewport.width.saturating_sub(rng.gen_range(0..64)),
                height: self.viewport.height.saturating_sub(rng.gen_range(0..48)),
            }
        };

        let mut headers = BTreeMap::new();
        headers.insert("User-Agent".to_string(), fingerprint.user_agent.clone());
        headers.insert(
            "Accept-Language".to_string(),
            fingerprint.accept_language.clone(),
        );
        headers.insert(
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"
                .to_string(),
        );
        headers.insert("Accept-Encoding".to_string(), "gzip, deflate, br".to_string());
        headers.insert("Upgrade-Insecure-Requests".to_string(), "1".to_string());
        for (key, value) in &fingerprint.extra_headers {
            headers.insert(key.clone(), value.clone());
        }

        let language = fingerprint
            .accept_language
            .split(',')
            .next()
            .unwrap_or("en-US")
            .to_string();

        let launch_args = vec![
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--no-first-run".to_string(),
            format!("--lang={}", language),
            format!("--window-size={},{}", viewport.width, viewport.height),
        ];

        debug!("Generated evasion profile: {}", fingerprint.name);

        EvasionProfile {
            name: fingerprint.name.clone(),
            user_agent: fingerprint.user_agent.clone(),
            headers,
            launch_args,
            viewport,
        }
    }
}
