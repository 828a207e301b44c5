use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::entities::drug::MIN_QUERY_CHARS;
use crate::error::RepurposeError;
use crate::sources::rxnorm::{APPROXIMATE_MAX_ENTRIES, DISPLAY_NAMES_MAX, RxNormClient};
use crate::transform;
use crate::utils::cache::{ExpiringCache, NAME_SEARCH_TTL};

const SPELLING_MIN_CHARS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteNameMatch {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rxcui: Option<String>,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DrugConcept {
    pub rxcui: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synonym: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConceptRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rxcui: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RelatedConcepts {
    pub ingredients: Vec<ConceptRef>,
    pub brand_names: Vec<ConceptRef>,
    pub clinical_drugs: Vec<ConceptRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConceptDetails {
    pub concept: DrugConcept,
    pub related: RelatedConcepts,
}

/// Remote drug-name lookup as seen by the search coordinator.
///
/// Implementations never fail: an unavailable upstream yields an empty list.
#[async_trait]
pub trait NameSearch: Send + Sync {
    async fn search(&self, query: &str) -> Vec<RemoteNameMatch>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// RxNorm-backed name search with a 24 h in-process cache.
pub struct NameSearchClient {
    rxnorm: RxNormClient,
    matches: Mutex<ExpiringCache<Vec<RemoteNameMatch>>>,
    display_names: Mutex<ExpiringCache<Vec<String>>>,
    failures: AtomicU64,
    last_failure: Mutex<Option<String>>,
}

impl NameSearchClient {
    pub fn new() -> Result<Self, RepurposeError> {
        Ok(Self::from_rxnorm(RxNormClient::new()?))
    }

    pub fn from_rxnorm(rxnorm: RxNormClient) -> Self {
        Self {
            rxnorm,
            matches: Mutex::new(ExpiringCache::new(NAME_SEARCH_TTL)),
            display_names: Mutex::new(ExpiringCache::new(NAME_SEARCH_TTL)),
            failures: AtomicU64::new(0),
            last_failure: Mutex::new(None),
        }
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn last_failure(&self) -> Option<String> {
        lock(&self.last_failure).clone()
    }

    fn record_failure(&self, operation: &str, query: &str, err: &RepurposeError) {
        warn!(operation, query, error = %err, "RxNorm lookup failed");
        self.failures.fetch_add(1, Ordering::Relaxed);
        *lock(&self.last_failure) = Some(err.to_string());
    }

    fn cache_key(query: &str) -> Option<String> {
        if query.chars().count() < MIN_QUERY_CHARS {
            return None;
        }
        let key = query.trim().to_lowercase();
        (!key.is_empty()).then_some(key)
    }

    /// Display-name completions (up to 20); same guard, cache and failure policy as `search`.
    pub async fn autocomplete(&self, query: &str) -> Vec<String> {
        let Some(key) = Self::cache_key(query) else {
            return Vec::new();
        };
        if let Some(hit) = lock(&self.display_names).get(&key) {
            debug!(query = %key, "Autocomplete cache hit");
            return hit;
        }

        match self.rxnorm.display_names(query).await {
            Ok(terms) => {
                let names = transform::name_match::completions(terms, query, DISPLAY_NAMES_MAX);
                let mut cache = lock(&self.display_names);
                cache.insert(key, names.clone());
                debug!(query, cached = cache.len(), "Autocomplete cached");
                names
            }
            Err(err) => {
                self.record_failure("autocomplete", query, &err);
                Vec::new()
            }
        }
    }

    /// Spelling suggestions for a possibly misspelled name; needs at least three characters.
    /// An unavailable upstream yields an empty list.
    pub async fn spelling_suggestions(&self, query: &str) -> Vec<String> {
        if query.trim().chars().count() < SPELLING_MIN_CHARS {
            return Vec::new();
        }
        match self.rxnorm.spelling_suggestions(query).await {
            Ok(names) => names,
            Err(err) => {
                self.record_failure("spelling", query, &err);
                Vec::new()
            }
        }
    }

    /// Concept properties plus related groups.
    ///
    /// `Ok(None)` means RxNorm could not be reached; `last_failure` holds the reason.
    /// A malformed RxCUI is an `InvalidArgument` and an unknown one is `NotFound`.
    pub async fn concept(&self, rxcui: &str) -> Result<Option<ConceptDetails>, RepurposeError> {
        let props = match self.rxnorm.properties(rxcui).await {
            Ok(props) => props,
            Err(err @ RepurposeError::InvalidArgument(_)) => return Err(err),
            Err(err) => {
                self.record_failure("concept", rxcui, &err);
                return Ok(None);
            }
        };
        let Some(concept) = props.and_then(transform::name_match::concept_from_properties) else {
            return Err(RepurposeError::NotFound {
                entity: "concept".into(),
                id: rxcui.trim().to_string(),
                suggestion: "Find an RxCUI with: repurpose search <drug name>".into(),
            });
        };
        let related = match self.rxnorm.related(&concept.rxcui).await {
            Ok(groups) => transform::name_match::related_concepts(groups),
            Err(err) => {
                warn!(rxcui = %concept.rxcui, error = %err, "RxNorm related lookup failed");
                RelatedConcepts::default()
            }
        };
        Ok(Some(ConceptDetails { concept, related }))
    }
}

#[async_trait]
impl NameSearch for NameSearchClient {
    async fn search(&self, query: &str) -> Vec<RemoteNameMatch> {
        let Some(key) = Self::cache_key(query) else {
            return Vec::new();
        };
        if let Some(hit) = lock(&self.matches).get(&key) {
            debug!(query = %key, "Name search cache hit");
            return hit;
        }

        match self
            .rxnorm
            .approximate_term(query, APPROXIMATE_MAX_ENTRIES)
            .await
        {
            Ok(candidates) => {
                let matches = transform::name_match::from_rxnorm_candidates(candidates);
                let mut cache = lock(&self.matches);
                cache.insert(key, matches.clone());
                debug!(query, cached = cache.len(), "Name search cached");
                matches
            }
            Err(err) => {
                self.record_failure("search", query, &err);
                Vec::new()
            }
        }
    }
}
