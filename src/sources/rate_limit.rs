use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use http::Extensions;
use reqwest::Url;
use reqwest_middleware::{Middleware, Next};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

/// (bucket, base-override env var, default base, minimum spacing in ms).
/// PubMed is absent: its spacing depends on `NCBI_API_KEY`.
const UPSTREAMS: &[(&str, &str, &str, u64)] = &[
    ("rxnorm", "REPURPOSE_RXNORM_BASE", "https://rxnav.nlm.nih.gov/REST", 50),
    (
        "pubchem",
        "REPURPOSE_PUBCHEM_BASE",
        "https://pubchem.ncbi.nlm.nih.gov/rest/pug",
        200,
    ),
    (
        "clinicaltrials",
        "REPURPOSE_CTGOV_BASE",
        "https://clinicaltrials.gov/api/v2",
        500,
    ),
    ("openfda", "REPURPOSE_OPENFDA_BASE", "https://api.fda.gov", 250),
];

const PUBMED_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const PUBMED_BASE_ENV: &str = "REPURPOSE_PUBMED_BASE";
const OTHER_ORIGIN_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub(crate) struct UpstreamPolicy {
    pub bucket: &'static str,
    pub prefix: Cow<'static, str>,
    pub min_interval: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Bucket {
    Upstream(&'static str),
    Origin(String),
}

/// Spaces requests per upstream. Each caller reserves the next free slot under
/// the lock and sleeps outside it, so waiters are served in arrival order.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    policies: Vec<UpstreamPolicy>,
    other_interval: Duration,
    next_slot: Mutex<HashMap<Bucket, Instant>>,
}

impl RateLimiter {
    pub(crate) fn from_env() -> Self {
        let pubmed = UpstreamPolicy {
            bucket: "pubmed",
            prefix: crate::sources::env_base(PUBMED_BASE, PUBMED_BASE_ENV),
            min_interval: eutils_min_interval(crate::sources::ncbi_api_key().is_some()),
        };
        let policies = UPSTREAMS
            .iter()
            .map(|&(bucket, env_var, default, ms)| UpstreamPolicy {
                bucket,
                prefix: crate::sources::env_base(default, env_var),
                min_interval: Duration::from_millis(ms),
            })
            .chain(std::iter::once(pubmed))
            .collect();
        Self::new(policies, OTHER_ORIGIN_INTERVAL)
    }

    pub(crate) fn new(policies: Vec<UpstreamPolicy>, other_interval: Duration) -> Self {
        Self {
            policies,
            other_interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// Longest matching base wins, so overrides that share a host stay apart.
    fn bucket_for(&self, url: &Url) -> (Bucket, Duration) {
        let full = url.as_str();
        match self
            .policies
            .iter()
            .filter(|p| full.starts_with(p.prefix.as_ref()))
            .max_by_key(|p| p.prefix.len())
        {
            Some(policy) => (Bucket::Upstream(policy.bucket), policy.min_interval),
            None => (
                Bucket::Origin(url.origin().ascii_serialization()),
                self.other_interval,
            ),
        }
    }

    pub(crate) async fn wait_for_url(&self, url: &Url) {
        let (bucket, interval) = self.bucket_for(url);
        let slot = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots.get(&bucket).map_or(now, |&next| next.max(now));
            slots.insert(bucket, slot + interval);
            slot
        };
        sleep_until(slot).await;
    }
}

fn eutils_min_interval(has_ncbi_api_key: bool) -> Duration {
    // 10 req/sec with a key, 3 without.
    if has_ncbi_api_key {
        Duration::from_millis(100)
    } else {
        Duration::from_millis(334)
    }
}

static GLOBAL_RATE_LIMITER: OnceLock<Arc<RateLimiter>> = OnceLock::new();

fn global_limiter() -> Arc<RateLimiter> {
    GLOBAL_RATE_LIMITER
        .get_or_init(|| Arc::new(RateLimiter::from_env()))
        .clone()
}

#[derive(Clone, Debug)]
pub(crate) struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
}

impl RateLimitMiddleware {
    pub(crate) fn new() -> Self {
        Self {
            limiter: global_limiter(),
        }
    }
}

#[async_trait::async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        self.limiter.wait_for_url(req.url()).await;
        next.run(req, extensions).await
    }
}
