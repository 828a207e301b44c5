use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RepurposeError;

pub const OPPORTUNITIES_DATASET: &str = "opportunities.json";

pub const DEFAULT_MECHANISM_SCORE: f64 = 0.92;
pub const DEFAULT_SAFETY_SCORE: f64 = 0.88;
pub const DEFAULT_EFFICACY_SCORE: f64 = 0.79;

const HIGH_CONFIDENCE: f64 = 0.8;
const UNKNOWN_TIME_TO_MARKET: u32 = 99;

pub const KNOWN_PHASES: &[&str] = &[
    "Phase 1",
    "Phase 2",
    "Phase 2/3",
    "Phase 3",
    "Standard of Care",
    "Phase 3 (Completed)",
];

pub const KNOWN_PATENT_STATUSES: &[&str] = &[
    "Expired (Generic)",
    "Generic",
    "Generic (some formulations protected)",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityEvidence {
    #[serde(default)]
    pub trials: u32,
    #[serde(default)]
    pub publications: u32,
    #[serde(default)]
    pub phase: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdverseEventCounts {
    #[serde(default)]
    pub mild: u32,
    #[serde(default)]
    pub moderate: u32,
    #[serde(default)]
    pub severe: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicationYear {
    pub year: i32,
    pub count: u32,
}

/// A hand-curated candidate indication for an existing drug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityRecord {
    pub disease: String,
    pub confidence: f64,
    #[serde(default)]
    pub driving_effect: String,
    #[serde(default)]
    pub mechanism: String,
    pub evidence: OpportunityEvidence,
    #[serde(default)]
    pub patent_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roi: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_market: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mechanism_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub efficacy_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commercial_viability: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub molecular_targets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub biomarkers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clinical_endpoints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adverse_events: Option<AdverseEventCounts>,
    #[serde(
        default,
        rename = "publications",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub publication_history: Vec<PublicationYear>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_effectiveness: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regulatory_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competitive_advantage: Option<String>,
}

impl OpportunityRecord {
    pub fn mechanism_score(&self) -> f64 {
        self.mechanism_score.unwrap_or(DEFAULT_MECHANISM_SCORE)
    }

    pub fn safety_score(&self) -> f64 {
        self.safety_score.unwrap_or(DEFAULT_SAFETY_SCORE)
    }

    pub fn efficacy_score(&self) -> f64 {
        self.efficacy_score.unwrap_or(DEFAULT_EFFICACY_SCORE)
    }

    pub fn confidence_percent(&self) -> f64 {
        self.confidence * 100.0
    }

    fn matches_text(&self, term: &str) -> bool {
        self.disease.to_lowercase().contains(term)
            || self.driving_effect.to_lowercase().contains(term)
            || self.mechanism.to_lowercase().contains(term)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SortBy {
    #[default]
    Confidence,
    ConfidenceAsc,
    Publications,
    Trials,
    Roi,
    MarketSize,
    TimeToMarket,
}

impl SortBy {
    pub const KEYS: &[&str] = &[
        "confidence",
        "confidenceAsc",
        "publications",
        "trials",
        "roi",
        "marketSize",
        "timeToMarket",
    ];

    /// Unrecognized keys fall back to the default ordering.
    pub fn from_key(key: &str) -> Self {
        match key.trim() {
            "confidence" => Self::Confidence,
            "confidenceAsc" => Self::ConfidenceAsc,
            "publications" => Self::Publications,
            "trials" => Self::Trials,
            "roi" => Self::Roi,
            "marketSize" => Self::MarketSize,
            "timeToMarket" => Self::TimeToMarket,
            other => {
                debug!(key = other, "Unknown sort key; using confidence");
                Self::Confidence
            }
        }
    }

    pub fn as_key(self) -> &'static str {
        match self {
            Self::Confidence => "confidence",
            Self::ConfidenceAsc => "confidenceAsc",
            Self::Publications => "publications",
            Self::Trials => "trials",
            Self::Roi => "roi",
            Self::MarketSize => "marketSize",
            Self::TimeToMarket => "timeToMarket",
        }
    }

    fn compare(self, a: &OpportunityRecord, b: &OpportunityRecord) -> Ordering {
        match self {
            Self::Confidence => b.confidence.total_cmp(&a.confidence),
            Self::ConfidenceAsc => a.confidence.total_cmp(&b.confidence),
            Self::Publications => b.evidence.publications.cmp(&a.evidence.publications),
            Self::Trials => b.evidence.trials.cmp(&a.evidence.trials),
            Self::Roi => b.roi.unwrap_or(0.0).total_cmp(&a.roi.unwrap_or(0.0)),
            Self::MarketSize => market_size_billions(b.market_size.as_deref())
                .total_cmp(&market_size_billions(a.market_size.as_deref())),
            Self::TimeToMarket => time_to_market_years(a.time_to_market.as_deref())
                .cmp(&time_to_market_years(b.time_to_market.as_deref())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterState {
    /// Minimum confidence, in percent.
    pub confidence: u8,
    pub phases: BTreeSet<String>,
    pub patent_status: BTreeSet<String>,
    pub sort_by: SortBy,
}

impl FilterState {
    pub fn active_filter_count(&self) -> usize {
        usize::from(self.confidence > 0)
            + self.phases.len()
            + self.patent_status.len()
            + usize::from(self.sort_by != SortBy::default())
    }

    fn keeps(&self, record: &OpportunityRecord) -> bool {
        record.confidence_percent() >= f64::from(self.confidence)
            && (self.phases.is_empty() || self.phases.contains(&record.evidence.phase))
            && (self.patent_status.is_empty() || self.patent_status.contains(&record.patent_status))
    }
}

fn leading_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+(?:\.\d+)?)").expect("valid regex"))
}

fn first_integer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("valid regex"))
}

/// `"$4.2B"` → 4.2. Absent or unparseable values sort as 0.
pub(crate) fn market_size_billions(value: Option<&str>) -> f64 {
    let Some(value) = value else {
        return 0.0;
    };
    let stripped = value.replace(['$', 'B'], "");
    leading_number_re()
        .captures(&stripped)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// `"Already Approved"` → 0, `"3-5 years"` → 3, anything else → 99.
pub(crate) fn time_to_market_years(value: Option<&str>) -> u32 {
    let Some(value) = value else {
        return UNKNOWN_TIME_TO_MARKET;
    };
    if value.contains("Already") {
        return 0;
    }
    first_integer_re()
        .find(value)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .unwrap_or(UNKNOWN_TIME_TO_MARKET)
}

/// Filters then stably sorts; ties keep input order.
pub fn apply(opportunities: &[OpportunityRecord], filter: &FilterState) -> Vec<OpportunityRecord> {
    let mut out: Vec<OpportunityRecord> = opportunities
        .iter()
        .filter(|r| filter.keeps(r))
        .cloned()
        .collect();
    out.sort_by(|a, b| filter.sort_by.compare(a, b));
    out
}

/// Case-insensitive match on disease, driving effect or mechanism. A blank term keeps everything.
pub fn search_text(records: &[OpportunityRecord], term: &str) -> Vec<OpportunityRecord> {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return records.to_vec();
    }
    records
        .iter()
        .filter(|r| r.matches_text(&term))
        .cloned()
        .collect()
}

pub fn high_confidence_count(records: &[OpportunityRecord]) -> usize {
    records
        .iter()
        .filter(|r| r.confidence > HIGH_CONFIDENCE)
        .count()
}

#[derive(Debug, Clone)]
struct DrugOpportunities {
    drug: String,
    records: Vec<OpportunityRecord>,
}

/// Opportunity records keyed by drug name (case-insensitive).
#[derive(Debug, Clone)]
pub struct OpportunityCatalog {
    by_drug: HashMap<String, DrugOpportunities>,
}

fn validate_score(drug: &str, disease: &str, field: &str, value: f64) -> Result<(), RepurposeError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        return Ok(());
    }
    Err(RepurposeError::Dataset {
        name: OPPORTUNITIES_DATASET.into(),
        message: format!("{field} {value} out of range [0, 1] for {drug} / {disease}"),
    })
}

impl OpportunityCatalog {
    pub fn init(data: BTreeMap<String, Vec<OpportunityRecord>>) -> Result<Self, RepurposeError> {
        let mut by_drug = HashMap::with_capacity(data.len());
        for (drug, records) in data {
            let drug = drug.trim().to_string();
            let mut seen: HashSet<String> = HashSet::new();
            for record in &records {
                let disease = record.disease.trim();
                if disease.is_empty() {
                    return Err(RepurposeError::Dataset {
                        name: OPPORTUNITIES_DATASET.into(),
                        message: format!("{drug} has an opportunity without a disease"),
                    });
                }
                if !seen.insert(disease.to_lowercase()) {
                    return Err(RepurposeError::Dataset {
                        name: OPPORTUNITIES_DATASET.into(),
                        message: format!("duplicate disease '{disease}' for {drug}"),
                    });
                }
                validate_score(&drug, disease, "confidence", record.confidence)?;
                for (field, value) in [
                    ("mechanismScore", record.mechanism_score),
                    ("safetyScore", record.safety_score),
                    ("efficacyScore", record.efficacy_score),
                ] {
                    if let Some(value) = value {
                        validate_score(&drug, disease, field, value)?;
                    }
                }
            }
            let key = drug.to_lowercase();
            if by_drug
                .insert(key, DrugOpportunities { drug: drug.clone(), records })
                .is_some()
            {
                return Err(RepurposeError::Dataset {
                    name: OPPORTUNITIES_DATASET.into(),
                    message: format!("duplicate drug '{drug}'"),
                });
            }
        }
        debug!(drugs = by_drug.len(), "Opportunity catalog initialized");
        Ok(Self { by_drug })
    }

    pub fn bundled() -> Result<Self, RepurposeError> {
        let data: BTreeMap<String, Vec<OpportunityRecord>> =
            crate::entities::embedded_json(OPPORTUNITIES_DATASET)?;
        Self::init(data)
    }

    /// Drugs that have curated opportunities, sorted by name.
    pub fn drugs(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_drug.values().map(|d| d.drug.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn all_for(&self, drug: &str) -> &[OpportunityRecord] {
        self.by_drug
            .get(&drug.trim().to_lowercase())
            .map(|d| d.records.as_slice())
            .unwrap_or_default()
    }

    /// Unknown drugs yield an empty list.
    pub fn get_opportunities(&self, drug: &str, filter: &FilterState) -> Vec<OpportunityRecord> {
        apply(self.all_for(drug), filter)
    }

    pub fn find(&self, drug: &str, disease: &str) -> Option<&OpportunityRecord> {
        let disease = disease.trim();
        self.all_for(drug)
            .iter()
            .find(|r| r.disease.eq_ignore_ascii_case(disease))
    }
}
