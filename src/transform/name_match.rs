use crate::entities::name_search::{ConceptRef, DrugConcept, RelatedConcepts, RemoteNameMatch};
use crate::sources::rxnorm::{RxNormCandidate, RxNormConceptGroup, RxNormProperties};

fn trim_nonempty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn from_rxnorm_candidate(candidate: RxNormCandidate) -> Option<RemoteNameMatch> {
    let name = trim_nonempty(candidate.name)?;
    Some(RemoteNameMatch {
        name,
        rxcui: trim_nonempty(candidate.rxcui),
        score: candidate
            .score
            .as_ref()
            .and_then(|s| s.as_f64())
            .unwrap_or(0.0),
        rank: candidate
            .rank
            .as_ref()
            .and_then(|r| r.as_u64())
            .and_then(|r| u32::try_from(r).ok()),
    })
}

/// Drops nameless candidates and orders the rest by score, highest first.
/// Equal scores keep RxNorm's order.
pub fn from_rxnorm_candidates(candidates: Vec<RxNormCandidate>) -> Vec<RemoteNameMatch> {
    let mut out: Vec<RemoteNameMatch> = candidates
        .into_iter()
        .filter_map(from_rxnorm_candidate)
        .collect();
    out.sort_by(|a, b| b.score.total_cmp(&a.score));
    out
}

/// Display terms containing the query, case-insensitively. Prefix matches
/// come first; both tiers keep RxNorm's order.
pub fn completions(terms: Vec<String>, query: &str, limit: usize) -> Vec<String> {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return Vec::new();
    }
    let (prefix, contains): (Vec<_>, Vec<_>) = terms
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| t.to_lowercase().contains(&q))
        .partition(|t| t.to_lowercase().starts_with(&q));
    prefix.into_iter().chain(contains).take(limit).collect()
}

pub fn concept_from_properties(props: RxNormProperties) -> Option<DrugConcept> {
    Some(DrugConcept {
        rxcui: trim_nonempty(props.rxcui)?,
        name: trim_nonempty(props.name)?,
        synonym: trim_nonempty(props.synonym),
        tty: trim_nonempty(props.tty),
        language: trim_nonempty(props.language),
    })
}

fn concept_ref(props: RxNormProperties) -> Option<ConceptRef> {
    Some(ConceptRef {
        name: trim_nonempty(props.name)?,
        rxcui: trim_nonempty(props.rxcui),
    })
}

pub fn related_concepts(groups: Vec<RxNormConceptGroup>) -> RelatedConcepts {
    let mut related = RelatedConcepts::default();
    for group in groups {
        let refs = group.concept_properties.into_iter().filter_map(concept_ref);
        match group.tty.as_deref().map(str::trim) {
            Some("IN") => related.ingredients.extend(refs),
            Some("BN") => related.brand_names.extend(refs),
            Some("SCD") | Some("SBD") => related.clinical_drugs.extend(refs),
            _ => {}
        }
    }
    related
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: Option<&str>, score: serde_json::Value) -> RxNormCandidate {
        serde_json::from_value(serde_json::json!({
            "rxcui": "1",
            "name": name,
            "score": score,
            "rank": "1"
        }))
        .unwrap()
    }

    #[test]
    fn completions_filter_and_rank_prefix_first() {
        let terms: Vec<String> = ["zzdrug", "Buformin / metformin", "metformin", "aspirin", "METFORMIN ER"]
            .iter()
            .map(|t| t.to_string())
            .collect();
        assert_eq!(
            completions(terms.clone(), "Metf", 20),
            vec!["metformin", "METFORMIN ER", "Buformin / metformin"]
        );
        assert_eq!(completions(terms.clone(), "metf", 1), vec!["metformin"]);
        assert!(completions(terms, "  ", 20).is_empty());
    }

    #[test]
    fn candidates_sorted_by_score_with_stable_ties() {
        let out = from_rxnorm_candidates(vec![
            candidate(Some("metformin ER"), serde_json::json!("7.5")),
            candidate(Some("metformin"), serde_json::json!(9.1)),
            candidate(Some("Glucophage"), serde_json::json!("7.5")),
        ]);
        let names: Vec<&str> = out.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["metformin", "metformin ER", "Glucophage"]);
        assert_eq!(out[0].rank, Some(1));
    }

    #[test]
    fn nameless_candidates_are_dropped() {
        let out = from_rxnorm_candidates(vec![
            candidate(None, serde_json::json!("9")),
            candidate(Some("  "), serde_json::json!("8")),
            candidate(Some("aspirin"), serde_json::json!("bogus")),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "aspirin");
        assert_eq!(out[0].score, 0.0);
    }

    #[test]
    fn related_concepts_group_by_term_type() {
        let groups: Vec<RxNormConceptGroup> = serde_json::from_value(serde_json::json!([
            {"tty": "IN", "conceptProperties": [{"rxcui": "6809", "name": "metformin"}]},
            {"tty": "BN", "conceptProperties": [{"rxcui": "151827", "name": "Glucophage"}]},
            {"tty": "SCD", "conceptProperties": [{"rxcui": "861007", "name": "metformin 500 MG Oral Tablet"}]},
            {"tty": "SBD", "conceptProperties": [{"rxcui": "861008", "name": "Glucophage 500 MG Oral Tablet"}]},
            {"tty": "PIN", "conceptProperties": [{"rxcui": "1", "name": "ignored"}]}
        ]))
        .unwrap();

        let related = related_concepts(groups);
        assert_eq!(related.ingredients.len(), 1);
        assert_eq!(related.brand_names[0].name, "Glucophage");
        assert_eq!(related.clinical_drugs.len(), 2);
    }

    #[test]
    fn concept_requires_rxcui_and_name() {
        let props: RxNormProperties = serde_json::from_value(serde_json::json!({
            "rxcui": "6809", "name": "metformin", "synonym": "", "tty": "IN", "language": "ENG"
        }))
        .unwrap();
        let concept = concept_from_properties(props).expect("concept");
        assert_eq!(concept.synonym, None);
        assert_eq!(concept.tty.as_deref(), Some("IN"));

        let props: RxNormProperties =
            serde_json::from_value(serde_json::json!({"name": "metformin"})).unwrap();
        assert!(concept_from_properties(props).is_none());
    }
}
