use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RepurposeError;

pub const DRUGS_DATASET: &str = "drugs.json";
pub const MIN_QUERY_CHARS: usize = 2;

const POPULAR_NAMES: &[&str] = &[
    "Metformin",
    "Aspirin",
    "Ibuprofen",
    "Atorvastatin",
    "Lisinopril",
    "Sildenafil",
    "Thalidomide",
    "Tamoxifen",
    "Hydroxychloroquine",
    "Omeprazole",
    "Sertraline",
    "Gabapentin",
    "Methotrexate",
];
const POPULAR_MAX: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrugRecord {
    pub name: String,
    #[serde(default)]
    pub trade_name: String,
    #[serde(default)]
    pub approved_for: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub side_effects: Vec<String>,
    #[serde(default)]
    pub enriched: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone)]
struct SearchIndexEntry {
    name: String,
    trade_name: String,
    searchable_text: String,
}

impl SearchIndexEntry {
    fn new(record: &DrugRecord) -> Self {
        Self {
            name: record.name.to_lowercase(),
            trade_name: record.trade_name.to_lowercase(),
            searchable_text: format!(
                "{} {} {} {}",
                record.name, record.trade_name, record.approved_for, record.category
            )
            .to_lowercase(),
        }
    }

    fn is_exact(&self, q: &str) -> bool {
        self.name == q || self.trade_name == q
    }

    fn is_prefix(&self, q: &str) -> bool {
        self.name.starts_with(q) || (!self.trade_name.is_empty() && self.trade_name.starts_with(q))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryStats {
    pub total: usize,
    pub enriched: usize,
    pub with_external_data: usize,
    pub category_count: usize,
    pub enrichment_rate_percent: f64,
}

/// The bundled drug catalogue plus its precomputed search index.
#[derive(Debug, Clone)]
pub struct DrugDirectory {
    records: Vec<DrugRecord>,
    index: Vec<SearchIndexEntry>,
    by_name: HashMap<String, usize>,
}

impl DrugDirectory {
    pub fn init(records: Vec<DrugRecord>) -> Result<Self, RepurposeError> {
        let mut by_name: HashMap<String, usize> = HashMap::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            let key = record.name.trim().to_lowercase();
            if key.is_empty() {
                return Err(RepurposeError::Dataset {
                    name: DRUGS_DATASET.into(),
                    message: format!("record {i} has an empty name"),
                });
            }
            if by_name.insert(key, i).is_some() {
                return Err(RepurposeError::Dataset {
                    name: DRUGS_DATASET.into(),
                    message: format!("duplicate drug name '{}'", record.name),
                });
            }
        }
        let index = records.iter().map(SearchIndexEntry::new).collect();
        debug!(drugs = records.len(), "Drug directory initialized");
        Ok(Self {
            records,
            index,
            by_name,
        })
    }

    pub fn bundled() -> Result<Self, RepurposeError> {
        let records: Vec<DrugRecord> = crate::entities::embedded_json(DRUGS_DATASET)?;
        Self::init(records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn all(&self) -> &[DrugRecord] {
        &self.records
    }

    pub fn lookup(&self, name: &str) -> Option<&DrugRecord> {
        self.by_name
            .get(&name.trim().to_lowercase())
            .map(|&i| &self.records[i])
    }

    pub fn is_valid(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Tiered match: exact name/trade name wins outright; otherwise prefix
    /// matches come before substring matches. Dataset order within a tier.
    pub fn search(&self, query: &str, limit: usize) -> Vec<&DrugRecord> {
        if query.chars().count() < MIN_QUERY_CHARS {
            return Vec::new();
        }
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return Vec::new();
        }

        let exact: Vec<&DrugRecord> = self
            .index
            .iter()
            .zip(&self.records)
            .filter(|(entry, _)| entry.is_exact(&q))
            .map(|(_, record)| record)
            .take(limit)
            .collect();
        if !exact.is_empty() {
            return exact;
        }

        let prefix = self
            .index
            .iter()
            .zip(&self.records)
            .filter(|(entry, _)| entry.is_prefix(&q));
        let contains = self
            .index
            .iter()
            .zip(&self.records)
            .filter(|(entry, _)| !entry.is_prefix(&q) && entry.searchable_text.contains(&q));

        prefix
            .chain(contains)
            .map(|(_, record)| record)
            .take(limit)
            .collect()
    }

    pub fn categories(&self) -> Vec<&str> {
        self.records
            .iter()
            .map(|r| r.category.as_str())
            .filter(|c| !c.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn by_category(&self, category: &str) -> Vec<&DrugRecord> {
        let category = category.trim();
        self.records
            .iter()
            .filter(|r| r.category.eq_ignore_ascii_case(category))
            .collect()
    }

    pub fn popular(&self) -> Vec<&DrugRecord> {
        self.records
            .iter()
            .filter(|r| POPULAR_NAMES.contains(&r.name.as_str()))
            .take(POPULAR_MAX)
            .collect()
    }

    pub fn stats(&self) -> DirectoryStats {
        let total = self.records.len();
        let enriched = self.records.iter().filter(|r| r.enriched).count();
        let with_external_data = self
            .records
            .iter()
            .filter(|r| r.data_source.as_deref() == Some("OpenFDA"))
            .count();
        let enrichment_rate_percent = if total == 0 {
            0.0
        } else {
            ((enriched as f64 / total as f64) * 1000.0).round() / 10.0
        };
        DirectoryStats {
            total,
            enriched,
            with_external_data,
            category_count: self.categories().len(),
            enrichment_rate_percent,
        }
    }
}
