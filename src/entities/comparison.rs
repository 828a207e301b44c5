use serde::Serialize;

use crate::entities::opportunity::OpportunityRecord;

pub const MAX_COMPARISON_ITEMS: usize = 5;
pub const MIN_COMPARABLE_ITEMS: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ToggleOutcome {
    pub added: bool,
    pub removed: bool,
    pub limit_reached: bool,
}

/// Up to five opportunities, unique by disease, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ComparisonSet {
    items: Vec<OpportunityRecord>,
}

impl ComparisonSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, disease: &str) -> Option<usize> {
        self.items.iter().position(|r| r.disease == disease)
    }

    /// Removes the record if present, otherwise adds it when there is room.
    /// A full set is left unchanged and reports `limit_reached`.
    pub fn toggle(&mut self, record: &OpportunityRecord) -> ToggleOutcome {
        if let Some(i) = self.position(&record.disease) {
            self.items.remove(i);
            return ToggleOutcome {
                removed: true,
                ..ToggleOutcome::default()
            };
        }
        if self.items.len() >= MAX_COMPARISON_ITEMS {
            return ToggleOutcome {
                limit_reached: true,
                ..ToggleOutcome::default()
            };
        }
        self.items.push(record.clone());
        ToggleOutcome {
            added: true,
            ..ToggleOutcome::default()
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, disease: &str) -> bool {
        self.position(disease).is_some()
    }

    pub fn items(&self) -> &[OpportunityRecord] {
        &self.items
    }

    pub fn is_comparable(&self) -> bool {
        self.items.len() >= MIN_COMPARABLE_ITEMS
    }

    pub fn rows(&self) -> Vec<ComparisonRow> {
        comparison_rows(&self.items)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonCell {
    pub value: String,
    pub best: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub metric: &'static str,
    pub cells: Vec<ComparisonCell>,
}

fn numeric_row(
    metric: &'static str,
    records: &[OpportunityRecord],
    value: impl Fn(&OpportunityRecord) -> f64,
    format: impl Fn(f64) -> String,
) -> ComparisonRow {
    let values: Vec<f64> = records.iter().map(value).collect();
    let best = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    ComparisonRow {
        metric,
        cells: values
            .into_iter()
            .map(|v| ComparisonCell {
                value: format(v),
                best: v == best,
            })
            .collect(),
    }
}

fn text_row(
    metric: &'static str,
    records: &[OpportunityRecord],
    value: impl Fn(&OpportunityRecord) -> String,
) -> ComparisonRow {
    ComparisonRow {
        metric,
        cells: records
            .iter()
            .map(|r| ComparisonCell {
                value: value(r),
                best: false,
            })
            .collect(),
    }
}

fn or_na(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("N/A")
        .to_string()
}

fn whole_percent(v: f64) -> String {
    format!("{:.0}%", v * 100.0)
}

/// Side-by-side table; numeric metrics flag every record holding the maximum.
pub fn comparison_rows(records: &[OpportunityRecord]) -> Vec<ComparisonRow> {
    if records.is_empty() {
        return Vec::new();
    }
    vec![
        numeric_row(
            "Confidence",
            records,
            |r| r.confidence,
            |v| format!("{:.1}%", v * 100.0),
        ),
        numeric_row(
            "Publications",
            records,
            |r| f64::from(r.evidence.publications),
            |v| format!("{v:.0}"),
        ),
        numeric_row(
            "Clinical Trials",
            records,
            |r| f64::from(r.evidence.trials),
            |v| format!("{v:.0}"),
        ),
        text_row("Phase", records, |r| r.evidence.phase.clone()),
        numeric_row(
            "Mechanism Score",
            records,
            OpportunityRecord::mechanism_score,
            whole_percent,
        ),
        numeric_row(
            "Safety Score",
            records,
            OpportunityRecord::safety_score,
            whole_percent,
        ),
        numeric_row(
            "Efficacy Score",
            records,
            OpportunityRecord::efficacy_score,
            whole_percent,
        ),
        numeric_row(
            "ROI",
            records,
            |r| r.roi.unwrap_or(0.0),
            |v| format!("{v}%"),
        ),
        text_row("Market Size", records, |r| or_na(r.market_size.as_deref())),
        text_row("Time to Market", records, |r| {
            or_na(r.time_to_market.as_deref())
        }),
        text_row("Patent Status", records, |r| r.patent_status.clone()),
        text_row("Commercial Viability", records, |r| {
            or_na(r.commercial_viability.as_deref())
        }),
        text_row("Driving Effect", records, |r| r.driving_effect.clone()),
        text_row("Mechanism", records, |r| r.mechanism.clone()),
    ]
}
