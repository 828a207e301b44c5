use std::collections::BTreeSet;
use std::sync::OnceLock;

use minijinja::{Environment, context};
use serde::Serialize;

use crate::entities::comparison::{MAX_COMPARISON_ITEMS, MIN_COMPARABLE_ITEMS, ComparisonSet};
use crate::entities::drug::{DirectoryStats, DrugRecord, MIN_QUERY_CHARS};
use crate::entities::evidence::RealTimeEvidence;
use crate::entities::name_search::{ConceptDetails, ConceptRef};
use crate::entities::opportunity::{FilterState, OpportunityRecord, SortBy, high_confidence_count};
use crate::entities::search::{SearchPhase, SearchState};
use crate::error::RepurposeError;

static ENV: OnceLock<Environment<'static>> = OnceLock::new();

#[derive(Serialize)]
struct CategoryRow<'a> {
    name: &'a str,
    count: usize,
}

#[derive(Serialize)]
struct ConceptGroup<'a> {
    label: &'static str,
    items: &'a [ConceptRef],
}

#[derive(Serialize)]
struct ComparisonLine {
    metric: &'static str,
    cells: Vec<String>,
}

fn num(v: f64) -> String {
    let mut out = format!("{v:.2}");
    while out.contains('.') && out.ends_with('0') {
        out.pop();
    }
    if out.ends_with('.') {
        out.pop();
    }
    if out.is_empty() || out == "-0" {
        "0".to_string()
    } else {
        out
    }
}

fn env() -> Result<&'static Environment<'static>, RepurposeError> {
    if let Some(env) = ENV.get() {
        return Ok(env);
    }

    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_filter("truncate", |s: String, max_bytes: usize| -> String {
        if s.len() <= max_bytes {
            return s;
        }
        if max_bytes == 0 {
            return "…".to_string();
        }
        let mut boundary = max_bytes;
        while boundary > 0 && !s.is_char_boundary(boundary) {
            boundary -= 1;
        }
        let mut out = s[..boundary].trim_end().to_string();
        out.push('…');
        out
    });
    env.add_filter("num", num);
    env.add_filter("percent1", |v: f64| -> String { format!("{:.1}%", v * 100.0) });
    env.add_template(
        "drug_search.md.j2",
        include_str!("../../templates/drug_search.md.j2"),
    )?;
    env.add_template("drug.md.j2", include_str!("../../templates/drug.md.j2"))?;
    env.add_template(
        "opportunities.md.j2",
        include_str!("../../templates/opportunities.md.j2"),
    )?;
    env.add_template(
        "comparison.md.j2",
        include_str!("../../templates/comparison.md.j2"),
    )?;
    env.add_template(
        "evidence.md.j2",
        include_str!("../../templates/evidence.md.j2"),
    )?;
    env.add_template("stats.md.j2", include_str!("../../templates/stats.md.j2"))?;
    env.add_template(
        "concept.md.j2",
        include_str!("../../templates/concept.md.j2"),
    )?;
    env.add_template(
        "name_list.md.j2",
        include_str!("../../templates/name_list.md.j2"),
    )?;

    let _ = ENV.set(env);
    Ok(ENV
        .get()
        .expect("ENV should be initialized by the time this is reached"))
}

fn quote_arg(value: &str) -> String {
    let v = value.trim();
    if v.is_empty() {
        return String::new();
    }
    if v.chars().any(|c| c.is_whitespace()) {
        return format!("\"{}\"", v.replace('\"', "\\\""));
    }
    v.to_string()
}

/// Human-readable list of the active filters, in filter-panel order.
pub fn filter_summary(filter: &FilterState, text: Option<&str>) -> Vec<String> {
    let mut out = Vec::new();
    if filter.confidence > 0 {
        out.push(format!("confidence >= {}%", filter.confidence));
    }
    if !filter.phases.is_empty() {
        out.push(format!(
            "phase: {}",
            filter.phases.iter().cloned().collect::<Vec<_>>().join(", ")
        ));
    }
    if !filter.patent_status.is_empty() {
        out.push(format!(
            "patent: {}",
            filter
                .patent_status
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    if let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) {
        out.push(format!("text: {text}"));
    }
    out
}

pub fn drug_search_markdown(state: &SearchState) -> Result<String, RepurposeError> {
    let tmpl = env()?.get_template("drug_search.md.j2")?;
    let too_short = state.query.trim().chars().count() < MIN_QUERY_CHARS;
    Ok(tmpl.render(context! {
        query => state.query.trim(),
        too_short => too_short,
        min_chars => MIN_QUERY_CHARS,
        local => &state.local,
        local_count => state.local.len(),
        remote => &state.remote,
        pending => state.phase == SearchPhase::Searching,
    })?)
}

pub fn drug_markdown(
    drug: &DrugRecord,
    opportunities: &[OpportunityRecord],
) -> Result<String, RepurposeError> {
    let tmpl = env()?.get_template("drug.md.j2")?;
    Ok(tmpl.render(context! {
        drug => drug,
        opportunities => opportunities,
        high_confidence => high_confidence_count(opportunities),
        drug_arg => quote_arg(&drug.name),
    })?)
}

pub fn opportunities_markdown(
    drug: &str,
    opportunities: &[OpportunityRecord],
    total: usize,
    filter: &FilterState,
    text: Option<&str>,
    detail: bool,
) -> Result<String, RepurposeError> {
    let tmpl = env()?.get_template("opportunities.md.j2")?;
    Ok(tmpl.render(context! {
        drug => drug,
        filters => filter_summary(filter, text),
        sort_by => filter.sort_by.as_key(),
        opportunities => opportunities,
        total => total,
        detail => detail,
    })?)
}

fn comparison_lines(set: &ComparisonSet) -> Vec<ComparisonLine> {
    set.rows()
        .into_iter()
        .map(|row| ComparisonLine {
            metric: row.metric,
            cells: row
                .cells
                .into_iter()
                .map(|cell| {
                    if cell.best {
                        format!("**{}**", cell.value)
                    } else {
                        cell.value
                    }
                })
                .collect(),
        })
        .collect()
}

pub fn comparison_markdown(
    drug: &str,
    set: &ComparisonSet,
    skipped: &[String],
    limit_reached: bool,
) -> Result<String, RepurposeError> {
    let tmpl = env()?.get_template("comparison.md.j2")?;
    let headers: Vec<&str> = set.items().iter().map(|r| r.disease.as_str()).collect();
    Ok(tmpl.render(context! {
        drug => drug,
        comparable => set.is_comparable(),
        min_items => MIN_COMPARABLE_ITEMS,
        max_items => MAX_COMPARISON_ITEMS,
        headers => headers,
        rows => comparison_lines(set),
        skipped => skipped,
        limit_reached => limit_reached,
    })?)
}

pub fn evidence_markdown(evidence: &RealTimeEvidence) -> Result<String, RepurposeError> {
    let tmpl = env()?.get_template("evidence.md.j2")?;
    let trial_phases: Vec<&str> = evidence
        .clinical_trials
        .as_ref()
        .map(|t| {
            t.phases
                .iter()
                .map(String::as_str)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        })
        .unwrap_or_default();
    Ok(tmpl.render(context! {
        ev => evidence,
        headline => evidence.headline(),
        trial_phases => trial_phases,
        suggestions => evidence.suggestions(),
    })?)
}

pub fn stats_markdown(
    stats: &DirectoryStats,
    categories: &[(&str, usize)],
    popular: &[&str],
    opportunity_drugs: &[&str],
) -> Result<String, RepurposeError> {
    let tmpl = env()?.get_template("stats.md.j2")?;
    let categories: Vec<CategoryRow<'_>> = categories
        .iter()
        .map(|(name, count)| CategoryRow {
            name,
            count: *count,
        })
        .collect();
    Ok(tmpl.render(context! {
        stats => stats,
        categories => categories,
        popular => popular,
        opportunity_drugs => opportunity_drugs,
    })?)
}

pub fn concept_markdown(details: &ConceptDetails) -> Result<String, RepurposeError> {
    let tmpl = env()?.get_template("concept.md.j2")?;
    let groups = [
        ConceptGroup {
            label: "Ingredients",
            items: &details.related.ingredients,
        },
        ConceptGroup {
            label: "Brand Names",
            items: &details.related.brand_names,
        },
        ConceptGroup {
            label: "Clinical Drugs",
            items: &details.related.clinical_drugs,
        },
    ];
    Ok(tmpl.render(context! {
        details => details,
        groups => groups,
    })?)
}

pub fn name_list_markdown(
    title: &str,
    query: &str,
    names: &[String],
    empty_message: &str,
) -> Result<String, RepurposeError> {
    let tmpl = env()?.get_template("name_list.md.j2")?;
    Ok(tmpl.render(context! {
        title => title,
        query => query.trim(),
        names => names,
        empty_message => empty_message,
    })?)
}

/// Footer naming the sort keys accepted by `--sort`.
pub fn sort_keys_hint() -> String {
    format!("Sort keys: {}", SortBy::KEYS.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::drug::DrugDirectory;
    use crate::entities::evidence::{PublicationEvidence, TrialEvidence};
    use crate::entities::name_search::{DrugConcept, RelatedConcepts, RemoteNameMatch};
    use crate::entities::opportunity::OpportunityCatalog;

    #[test]
    fn quote_arg_wraps_whitespace_and_escapes_quotes() {
        assert_eq!(quote_arg("Metformin"), "Metformin");
        assert_eq!(quote_arg("Valproic Acid"), "\"Valproic Acid\"");
        assert_eq!(quote_arg(" "), "");
    }

    #[test]
    fn num_trims_trailing_zeros() {
        assert_eq!(num(320.0), "320");
        assert_eq!(num(41.2), "41.2");
        assert_eq!(num(129.164), "129.16");
        assert_eq!(num(0.0), "0");
    }

    #[test]
    fn filter_summary_lists_active_filters() {
        let mut filter = FilterState {
            confidence: 70,
            ..FilterState::default()
        };
        filter.phases.insert("Phase 2".into());
        let summary = filter_summary(&filter, Some(" cancer "));
        assert_eq!(
            summary,
            vec!["confidence >= 70%", "phase: Phase 2", "text: cancer"]
        );
        assert!(filter_summary(&FilterState::default(), None).is_empty());
    }

    #[test]
    fn search_markdown_numbers_remote_after_local() {
        let directory = DrugDirectory::bundled().expect("directory");
        let state = SearchState {
            query: "aspirin".into(),
            phase: SearchPhase::Resolved,
            generation: 1,
            local: directory.search("aspirin", 10).into_iter().cloned().collect(),
            remote: vec![RemoteNameMatch {
                name: "aspirin 81 MG".into(),
                rxcui: Some("243670".into()),
                score: 8.0,
                rank: Some(1),
            }],
        };
        let markdown = drug_search_markdown(&state).expect("markdown");
        assert!(markdown.contains("# Drug search: aspirin"));
        assert!(markdown.contains("| 1 | Aspirin | Bayer |"));
        assert!(markdown.contains("| 2 | aspirin 81 MG | 243670 | 8 |"));
    }

    #[test]
    fn search_markdown_short_query_hint() {
        let state = SearchState {
            query: "a".into(),
            phase: SearchPhase::Idle,
            generation: 1,
            local: Vec::new(),
            remote: Vec::new(),
        };
        let markdown = drug_search_markdown(&state).expect("markdown");
        assert!(markdown.contains("at least 2 characters"));
        assert!(!markdown.contains("RxNorm"));
    }

    #[test]
    fn opportunities_markdown_renders_table() {
        let catalog = OpportunityCatalog::bundled().expect("catalog");
        let filter = FilterState::default();
        let records = catalog.get_opportunities("Metformin", &filter);
        let markdown =
            opportunities_markdown("Metformin", &records, records.len(), &filter, None, true)
                .expect("markdown");
        assert!(markdown.contains("| 1 | Cancer Prevention | 87.0% | Phase 2 | 2 | 345 | 320% | $4.2B | 3-5 years |"));
        assert!(markdown.contains("Sorted by: confidence. Showing 3 of 3."));
        assert!(markdown.contains("### 1. Cancer Prevention"));
        assert!(!markdown.contains("Filters:"));
    }

    #[test]
    fn opportunities_markdown_empty_state() {
        let filter = FilterState {
            confidence: 99,
            ..FilterState::default()
        };
        let markdown =
            opportunities_markdown("Metformin", &[], 3, &filter, None, false).expect("markdown");
        assert!(markdown.contains("Filters: confidence >= 99%"));
        assert!(markdown.contains("No opportunities match"));
    }

    #[test]
    fn comparison_markdown_bolds_best_values() {
        let catalog = OpportunityCatalog::bundled().expect("catalog");
        let mut set = ComparisonSet::new();
        for record in catalog.all_for("Metformin").iter().take(2) {
            set.toggle(record);
        }
        let markdown = comparison_markdown("Metformin", &set, &[], false).expect("markdown");
        assert!(markdown.contains("| Metric | Cancer Prevention | Alzheimer's Disease |"));
        assert!(markdown.contains("| Confidence | **87.0%** | 74.0% |"));
        assert!(markdown.contains("| ROI | 320% | **580%** |"));
    }

    #[test]
    fn comparison_markdown_needs_two_items() {
        let set = ComparisonSet::new();
        let markdown = comparison_markdown("Aspirin", &set, &["Gout".to_string()], false)
            .expect("markdown");
        assert!(markdown.contains("Select at least 2 opportunities"));
        assert!(markdown.contains("Not found for Aspirin: Gout"));
    }

    #[test]
    fn evidence_markdown_marks_unavailable_sources() {
        let evidence = RealTimeEvidence {
            drug: "metformin".into(),
            timestamp: None,
            pubchem: None,
            pubmed: Some(PublicationEvidence {
                publication_count: 120,
                recent_ids: vec!["111".into(), "222".into()],
            }),
            clinical_trials: Some(TrialEvidence {
                total_trials: 4,
                active_trials: 1,
                phases: vec!["PHASE2".into(), "PHASE2".into(), "PHASE1".into()],
                recent_ids: vec!["NCT01101438".into()],
            }),
            adverse_events: None,
        };
        let markdown = evidence_markdown(&evidence).expect("markdown");
        assert!(markdown.contains("120 publications • 4 trials"));
        assert!(markdown.contains("Recent PMIDs: 111, 222"));
        assert!(markdown.contains("Phases seen: PHASE1, PHASE2"));
        assert!(markdown.contains("Recent trials: NCT01101438"));
        assert!(markdown.contains("| Clinical investigation areas | 72% |"));
        assert!(markdown.contains("Unavailable."));
    }

    #[test]
    fn concept_markdown_skips_empty_groups() {
        let details = ConceptDetails {
            concept: DrugConcept {
                rxcui: "6809".into(),
                name: "metformin".into(),
                synonym: None,
                tty: Some("IN".into()),
                language: None,
            },
            related: RelatedConcepts {
                brand_names: vec![ConceptRef {
                    name: "Glucophage".into(),
                    rxcui: Some("151827".into()),
                }],
                ..RelatedConcepts::default()
            },
        };
        let markdown = concept_markdown(&details).expect("markdown");
        assert!(markdown.contains("| RxCUI | 6809 |"));
        assert!(markdown.contains("## Brand Names (1)"));
        assert!(markdown.contains("- Glucophage (RxCUI 151827)"));
        assert!(!markdown.contains("Ingredients"));
    }

    #[test]
    fn name_list_markdown_empty_message() {
        let markdown =
            name_list_markdown("Spelling suggestions", "metfromin", &[], "No suggestions.")
                .expect("markdown");
        assert!(markdown.contains("# Spelling suggestions: metfromin"));
        assert!(markdown.contains("No suggestions."));
    }
}
