//! Real-time evidence summary fetched from four public APIs in parallel.
//!
//! The result is informational only. Curated opportunity records are never
//! rewritten from it.

use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use crate::error::RepurposeError;
use crate::sources::clinicaltrials::ClinicalTrialsClient;
use crate::sources::openfda::{FAERS_MAX_LIMIT, OpenFdaClient};
use crate::sources::pubchem::PubChemClient;
use crate::sources::pubmed::PubMedClient;
use crate::transform;
use crate::utils::cache::{EVIDENCE_TTL, ExpiringCache};

const PUBLICATION_SUGGESTION_THRESHOLD: u64 = 50;
const PUBLICATION_CONFIDENCE_CAP: f64 = 95.0;
const TRIAL_BASE_CONFIDENCE: f64 = 70.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompoundInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub molecular_formula: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub molecular_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iupac_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicationEvidence {
    pub publication_count: u64,
    pub recent_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialEvidence {
    pub total_trials: u64,
    pub active_trials: usize,
    pub phases: Vec<String>,
    pub recent_ids: Vec<String>,
}

impl TrialEvidence {
    /// Most advanced phase seen across the returned studies.
    pub fn highest_phase(&self) -> &'static str {
        let has = |p: &str| self.phases.iter().any(|v| v == p);
        if has("PHASE4") {
            "Phase 4"
        } else if has("PHASE3") {
            "Phase 3"
        } else if has("PHASE2") {
            "Phase 2"
        } else if has("PHASE1") {
            "Phase 1"
        } else {
            "Preclinical"
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyEvidence {
    pub total_reports: u64,
    pub serious_events: usize,
    pub common_reactions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepurposingSuggestion {
    pub disease: String,
    pub confidence: f64,
    pub evidence: String,
    pub phase: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealTimeEvidence {
    pub drug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub pubchem: Option<CompoundInfo>,
    pub pubmed: Option<PublicationEvidence>,
    pub clinical_trials: Option<TrialEvidence>,
    pub adverse_events: Option<SafetyEvidence>,
}

impl RealTimeEvidence {
    pub fn headline(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(pubmed) = &self.pubmed {
            parts.push(format!("{} publications", pubmed.publication_count));
        }
        if let Some(trials) = &self.clinical_trials {
            parts.push(format!("{} trials", trials.total_trials));
        }
        if let Some(adverse) = &self.adverse_events {
            parts.push(format!("{} safety reports", adverse.total_reports));
        }
        if parts.is_empty() {
            return "No real-time evidence available".to_string();
        }
        parts.join(" • ")
    }

    /// Heuristic leads derived from publication and trial volume.
    pub fn suggestions(&self) -> Vec<RepurposingSuggestion> {
        let mut out = Vec::new();

        if let Some(pubmed) = &self.pubmed
            && pubmed.publication_count > PUBLICATION_SUGGESTION_THRESHOLD
        {
            out.push(RepurposingSuggestion {
                disease: "Multiple therapeutic areas (based on publications)".into(),
                confidence: (pubmed.publication_count as f64 / 10.0)
                    .min(PUBLICATION_CONFIDENCE_CAP),
                evidence: format!(
                    "{} research publications found",
                    pubmed.publication_count
                ),
                phase: "Preclinical".into(),
            });
        }

        if let Some(trials) = &self.clinical_trials
            && trials.total_trials > 0
        {
            out.push(RepurposingSuggestion {
                disease: "Clinical investigation areas".into(),
                confidence: TRIAL_BASE_CONFIDENCE + 2.0 * trials.active_trials as f64,
                evidence: format!(
                    "{} clinical trials ({} active)",
                    trials.total_trials, trials.active_trials
                ),
                phase: trials.highest_phase().into(),
            });
        }

        out
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct EvidenceAnalyzer {
    pubchem: PubChemClient,
    pubmed: PubMedClient,
    trials: ClinicalTrialsClient,
    openfda: OpenFdaClient,
    cache: Mutex<ExpiringCache<RealTimeEvidence>>,
}

impl EvidenceAnalyzer {
    pub fn new() -> Result<Self, RepurposeError> {
        Ok(Self::from_clients(
            PubChemClient::new()?,
            PubMedClient::new()?,
            ClinicalTrialsClient::new()?,
            OpenFdaClient::new()?,
        ))
    }

    pub fn from_clients(
        pubchem: PubChemClient,
        pubmed: PubMedClient,
        trials: ClinicalTrialsClient,
        openfda: OpenFdaClient,
    ) -> Self {
        Self {
            pubchem,
            pubmed,
            trials,
            openfda,
            cache: Mutex::new(ExpiringCache::new(EVIDENCE_TTL)),
        }
    }

    async fn compound(&self, drug: &str) -> Option<CompoundInfo> {
        match self.pubchem.compound_by_name(drug).await {
            Ok(compound) => compound.as_ref().map(transform::evidence::compound_info),
            Err(err) => {
                warn!(source = "pubchem", drug, error = %err, "Evidence source unavailable");
                None
            }
        }
    }

    async fn publications(&self, drug: &str) -> Option<PublicationEvidence> {
        match self.pubmed.repurposing_search(drug).await {
            Ok(summary) => Some(transform::evidence::publication_evidence(summary)),
            Err(err) => {
                warn!(source = "pubmed", drug, error = %err, "Evidence source unavailable");
                None
            }
        }
    }

    async fn clinical_trials(&self, drug: &str) -> Option<TrialEvidence> {
        match self.trials.studies_by_intervention(drug).await {
            Ok(resp) => Some(transform::evidence::trial_evidence(&resp)),
            Err(err) => {
                warn!(source = "clinicaltrials", drug, error = %err, "Evidence source unavailable");
                None
            }
        }
    }

    async fn adverse_events(&self, drug: &str) -> Option<SafetyEvidence> {
        match self.openfda.drug_event_search(drug, FAERS_MAX_LIMIT).await {
            Ok(resp) => resp.as_ref().map(transform::evidence::safety_evidence),
            Err(err) => {
                warn!(source = "openfda", drug, error = %err, "Evidence source unavailable");
                None
            }
        }
    }

    /// Each source fails independently; only an empty drug name is an error.
    pub async fn analyze(&self, drug: &str) -> Result<RealTimeEvidence, RepurposeError> {
        let drug = drug.trim();
        if drug.is_empty() {
            return Err(RepurposeError::InvalidArgument(
                "Drug name is required. Example: repurpose analyze metformin".into(),
            ));
        }

        let key = drug.to_lowercase();
        if let Some(hit) = lock(&self.cache).get(&key) {
            debug!(drug, "Evidence cache hit");
            return Ok(hit);
        }

        let (pubchem, pubmed, clinical_trials, adverse_events) = tokio::join!(
            self.compound(drug),
            self.publications(drug),
            self.clinical_trials(drug),
            self.adverse_events(drug),
        );

        let evidence = RealTimeEvidence {
            drug: drug.to_string(),
            timestamp: OffsetDateTime::now_utc().format(&Rfc3339).ok(),
            pubchem,
            pubmed,
            clinical_trials,
            adverse_events,
        };
        lock(&self.cache).insert(key, evidence.clone());
        Ok(evidence)
    }
}
