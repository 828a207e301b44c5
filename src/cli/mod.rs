//! Command-line surface: argument parsing and dispatch to the entity workflows.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::debug;

use crate::entities::comparison::ComparisonSet;
use crate::entities::drug::{DirectoryStats, DrugDirectory, DrugRecord};
use crate::entities::evidence::{EvidenceAnalyzer, RealTimeEvidence, RepurposingSuggestion};
use crate::entities::name_search::NameSearchClient;
use crate::entities::opportunity::{
    FilterState, KNOWN_PATENT_STATUSES, KNOWN_PHASES, OpportunityCatalog, OpportunityRecord,
    SortBy, search_text,
};
use crate::entities::search::SearchCoordinator;
use crate::error::RepurposeError;
use crate::render;
use crate::utils::debounce::DEFAULT_DEBOUNCE;

pub mod health;
mod interactive;

#[derive(Parser, Debug)]
#[command(
    name = "repurpose",
    version,
    about = "Search drugs, rank repurposing opportunities and pull live evidence"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output JSON instead of markdown
    #[arg(long, global = true)]
    pub json: bool,

    /// Bypass the on-disk HTTP cache for this invocation
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Quiet period before an interactive query is searched, in milliseconds
    #[arg(long, global = true, default_value_t = DEFAULT_DEBOUNCE.as_millis() as u64)]
    pub debounce_ms: u64,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search the bundled directory and RxNorm for a drug name
    Search {
        /// Drug name or fragment (at least 2 characters)
        query: Vec<String>,
    },
    /// Type-ahead search session on stdin; `:N` selects result N, `:q` quits
    Interactive,
    /// Show a bundled drug and its repurposing opportunities
    Drug {
        /// Drug name (exact, case-insensitive)
        name: Vec<String>,
    },
    /// List bundled drugs, optionally by category
    List {
        /// Only drugs in this category
        #[arg(long)]
        category: Option<String>,
        /// Only the well-known drugs shown on the start screen
        #[arg(long, conflicts_with = "category")]
        popular: bool,
    },
    /// Filter and sort a drug's repurposing opportunities
    Opportunities {
        /// Drug name
        drug: String,
        #[command(flatten)]
        filter: FilterArgs,
        /// Include mechanism, targets and biomarkers for each opportunity
        #[arg(long)]
        detail: bool,
    },
    /// Compare two to five opportunities of one drug side by side
    Compare {
        /// Drug name
        drug: String,
        /// Disease names of the opportunities to compare
        #[arg(required = true, num_args = 1..)]
        diseases: Vec<String>,
    },
    /// Fetch live evidence from PubChem, PubMed, ClinicalTrials.gov and OpenFDA
    Analyze {
        /// Drug name
        drug: Vec<String>,
    },
    /// Directory statistics and categories
    Stats,
    /// RxNorm display-name completions
    Autocomplete {
        /// Name prefix (at least 2 characters)
        query: Vec<String>,
    },
    /// RxNorm spelling suggestions for a possibly misspelled drug name
    Spell {
        /// Drug name (at least 3 characters)
        query: Vec<String>,
    },
    /// RxNorm concept properties and related ingredients, brands and clinical drugs
    Concept {
        /// RxNorm concept identifier, e.g. 6809
        rxcui: String,
    },
    /// Check upstream API connectivity and the local cache directory
    Health {
        /// Skip the cache directory check
        #[arg(long)]
        apis_only: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Minimum confidence in percent (0-100)
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub min_confidence: u8,
    /// Keep only this development phase (repeatable), e.g. "Phase 2"
    #[arg(long = "phase")]
    pub phases: Vec<String>,
    /// Keep only this patent status (repeatable), e.g. "Expired (Generic)"
    #[arg(long = "patent-status")]
    pub patent_status: Vec<String>,
    /// Sort key: confidence, confidenceAsc, publications, trials, roi, marketSize, timeToMarket
    #[arg(long, default_value = "confidence")]
    pub sort: String,
    /// Keep only opportunities whose disease, effect or mechanism contains this text
    #[arg(long)]
    pub text: Option<String>,
}

impl FilterArgs {
    fn to_filter(&self) -> FilterState {
        FilterState {
            confidence: self.min_confidence,
            phases: trimmed_set(&self.phases),
            patent_status: trimmed_set(&self.patent_status),
            sort_by: SortBy::from_key(&self.sort),
        }
    }

    fn sort_key_known(&self) -> bool {
        SortBy::KEYS.contains(&self.sort.trim())
    }
}

fn trimmed_set(values: &[String]) -> BTreeSet<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_args(parts: &[String]) -> String {
    parts.join(" ").trim().to_string()
}

fn require_name(parts: &[String], example: &str) -> Result<String, RepurposeError> {
    let name = join_args(parts);
    if name.is_empty() {
        return Err(RepurposeError::InvalidArgument(format!(
            "A drug name is required. Example: {example}"
        )));
    }
    Ok(name)
}

#[derive(Serialize)]
struct DrugView<'a> {
    drug: &'a DrugRecord,
    opportunities: Vec<OpportunityRecord>,
}

#[derive(Serialize)]
struct OpportunitiesView<'a> {
    drug: &'a str,
    filter: &'a FilterState,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    active_filters: usize,
    total: usize,
    opportunities: &'a [OpportunityRecord],
}

#[derive(Serialize)]
struct ComparisonView<'a> {
    drug: &'a str,
    items: &'a [OpportunityRecord],
    rows: Vec<crate::entities::comparison::ComparisonRow>,
    skipped: &'a [String],
    limit_reached: bool,
}

#[derive(Serialize)]
struct EvidenceView<'a> {
    #[serde(flatten)]
    evidence: &'a RealTimeEvidence,
    headline: String,
    suggestions: Vec<RepurposingSuggestion>,
}

#[derive(Serialize)]
struct StatsView<'a> {
    stats: DirectoryStats,
    categories: Vec<CategoryCount<'a>>,
    popular: Vec<&'a str>,
    opportunity_drugs: Vec<&'a str>,
}

#[derive(Serialize)]
struct CategoryCount<'a> {
    name: &'a str,
    count: usize,
}

#[derive(Serialize)]
struct NameListView<'a> {
    query: &'a str,
    names: &'a [String],
}

#[derive(Serialize)]
struct ConceptUnavailable<'a> {
    rxcui: &'a str,
    unavailable: &'a str,
}

fn drug_not_found(name: &str) -> RepurposeError {
    RepurposeError::NotFound {
        entity: "drug".into(),
        id: name.to_string(),
        suggestion: format!("Try searching: repurpose search {name}"),
    }
}

async fn search(query: &str, json: bool) -> anyhow::Result<String> {
    let directory = Arc::new(DrugDirectory::bundled()?);
    let remote = Arc::new(NameSearchClient::new()?);
    debug!(drugs = directory.len(), "Drug directory loaded");
    let mut coordinator = SearchCoordinator::new(directory, remote.clone());
    coordinator.on_query_changed(query);
    let state = coordinator.settle().await;
    debug!(
        query,
        total = state.total(),
        rxnorm_failures = remote.failure_count(),
        "Search settled"
    );
    if json {
        return Ok(render::json::to_pretty(state)?);
    }
    Ok(render::markdown::drug_search_markdown(state)?)
}

fn drug(name: &str, json: bool) -> anyhow::Result<String> {
    let directory = DrugDirectory::bundled()?;
    let catalog = OpportunityCatalog::bundled()?;
    let record = directory.lookup(name).ok_or_else(|| drug_not_found(name))?;
    let opportunities = catalog.get_opportunities(&record.name, &FilterState::default());
    if json {
        return Ok(render::json::to_pretty(&DrugView {
            drug: record,
            opportunities,
        })?);
    }
    Ok(render::markdown::drug_markdown(record, &opportunities)?)
}

fn list(category: Option<&str>, popular: bool, json: bool) -> anyhow::Result<String> {
    let directory = DrugDirectory::bundled()?;
    let records: Vec<&DrugRecord> = match (category, popular) {
        (Some(category), _) => directory.by_category(category),
        (None, true) => directory.popular(),
        (None, false) => directory.all().iter().collect(),
    };
    if json {
        return Ok(render::json::to_pretty(&records)?);
    }
    let names: Vec<String> = records.iter().map(|r| r.name.clone()).collect();
    let title = match (category, popular) {
        (Some(_), _) => "Drugs in category",
        (None, true) => "Popular drugs",
        (None, false) => "Drugs",
    };
    Ok(render::markdown::name_list_markdown(
        title,
        category.unwrap_or("bundled directory"),
        &names,
        "No drugs in this category. See: repurpose stats",
    )?)
}

fn opportunities(
    drug: &str,
    args: &FilterArgs,
    detail: bool,
    json: bool,
) -> anyhow::Result<String> {
    let catalog = OpportunityCatalog::bundled()?;
    let directory = DrugDirectory::bundled()?;
    let filter = args.to_filter();
    let drug = drug.trim();
    let total = catalog.all_for(drug).len();
    let mut records = catalog.get_opportunities(drug, &filter);
    let text = args.text.as_deref().map(str::trim).filter(|t| !t.is_empty());
    if let Some(text) = text {
        records = search_text(&records, text);
    }
    debug!(
        drug,
        active_filters = filter.active_filter_count(),
        kept = records.len(),
        total,
        "Opportunities filtered"
    );

    if json {
        return Ok(render::json::to_pretty(&OpportunitiesView {
            drug,
            filter: &filter,
            text,
            active_filters: filter.active_filter_count(),
            total,
            opportunities: &records,
        })?);
    }

    let mut out =
        render::markdown::opportunities_markdown(drug, &records, total, &filter, text, detail)?;
    if total == 0 {
        out.push_str(&format!(
            "\n\nNo curated opportunities for {drug}. Drugs with opportunities: {}",
            catalog.drugs().join(", ")
        ));
        if !directory.is_valid(drug) {
            out.push_str(&format!(
                "\n{drug} is not in the bundled directory. Try searching: repurpose search {drug}"
            ));
        }
    } else if records.is_empty() {
        let unknown_phase = filter.phases.iter().any(|p| !KNOWN_PHASES.contains(&p.as_str()));
        let unknown_patent = filter
            .patent_status
            .iter()
            .any(|p| !KNOWN_PATENT_STATUSES.contains(&p.as_str()));
        if unknown_phase {
            out.push_str(&format!("\n\nKnown phases: {}", KNOWN_PHASES.join(", ")));
        }
        if unknown_patent {
            out.push_str(&format!(
                "\n\nKnown patent statuses: {}",
                KNOWN_PATENT_STATUSES.join(", ")
            ));
        }
    }
    if !args.sort_key_known() {
        out.push_str(&format!(
            "\n\nUnknown sort key '{}', sorted by confidence. {}",
            args.sort.trim(),
            render::markdown::sort_keys_hint()
        ));
    }
    Ok(out)
}

fn compare(drug: &str, diseases: &[String], json: bool) -> anyhow::Result<String> {
    let catalog = OpportunityCatalog::bundled()?;
    let drug = drug.trim();
    let mut set = ComparisonSet::new();
    let mut skipped: Vec<String> = Vec::new();
    let mut limit_reached = false;

    for disease in diseases {
        let disease = disease.trim();
        if disease.is_empty() {
            continue;
        }
        match catalog.find(drug, disease) {
            Some(record) if set.contains(&record.disease) => {}
            Some(record) => limit_reached |= set.toggle(record).limit_reached,
            None if skipped.iter().any(|s| s.eq_ignore_ascii_case(disease)) => {}
            None => skipped.push(disease.to_string()),
        }
    }
    debug!(
        drug,
        selected = set.len(),
        skipped = skipped.len(),
        limit_reached,
        "Comparison built"
    );
    if set.is_empty() && !skipped.is_empty() && catalog.all_for(drug).is_empty() {
        return Err(RepurposeError::NotFound {
            entity: "opportunities".into(),
            id: drug.to_string(),
            suggestion: format!("Drugs with opportunities: {}", catalog.drugs().join(", ")),
        }
        .into());
    }

    if json {
        return Ok(render::json::to_pretty(&ComparisonView {
            drug,
            items: set.items(),
            rows: set.rows(),
            skipped: &skipped,
            limit_reached,
        })?);
    }
    Ok(render::markdown::comparison_markdown(
        drug,
        &set,
        &skipped,
        limit_reached,
    )?)
}

async fn analyze(drug: &str, json: bool) -> anyhow::Result<String> {
    let analyzer = EvidenceAnalyzer::new()?;
    let evidence = analyzer.analyze(drug).await?;
    if json {
        return Ok(render::json::to_pretty(&EvidenceView {
            evidence: &evidence,
            headline: evidence.headline(),
            suggestions: evidence.suggestions(),
        })?);
    }
    Ok(render::markdown::evidence_markdown(&evidence)?)
}

fn stats(json: bool) -> anyhow::Result<String> {
    let directory = DrugDirectory::bundled()?;
    let catalog = OpportunityCatalog::bundled()?;
    let categories: Vec<(&str, usize)> = directory
        .categories()
        .into_iter()
        .map(|c| (c, directory.by_category(c).len()))
        .collect();
    let popular: Vec<&str> = directory.popular().iter().map(|r| r.name.as_str()).collect();
    let opportunity_drugs = catalog.drugs();

    if json {
        return Ok(render::json::to_pretty(&StatsView {
            stats: directory.stats(),
            categories: categories
                .iter()
                .map(|(name, count)| CategoryCount {
                    name,
                    count: *count,
                })
                .collect(),
            popular,
            opportunity_drugs,
        })?);
    }
    Ok(render::markdown::stats_markdown(
        &directory.stats(),
        &categories,
        &popular,
        &opportunity_drugs,
    )?)
}

async fn autocomplete(query: &str, json: bool) -> anyhow::Result<String> {
    let client = NameSearchClient::new()?;
    let names = client.autocomplete(query).await;
    if json {
        return Ok(render::json::to_pretty(&NameListView {
            query,
            names: &names,
        })?);
    }
    let empty = match client.last_failure() {
        Some(err) => format!("RxNorm unavailable: {err}"),
        None => "No completions.".to_string(),
    };
    Ok(render::markdown::name_list_markdown(
        "Completions",
        query,
        &names,
        &empty,
    )?)
}

async fn spell(query: &str, json: bool) -> anyhow::Result<String> {
    let client = NameSearchClient::new()?;
    let names = client.spelling_suggestions(query).await;
    if json {
        return Ok(render::json::to_pretty(&NameListView {
            query,
            names: &names,
        })?);
    }
    let empty = match client.last_failure() {
        Some(err) => format!("RxNorm unavailable: {err}"),
        None => "No suggestions (queries need at least 3 characters).".to_string(),
    };
    Ok(render::markdown::name_list_markdown(
        "Spelling suggestions",
        query,
        &names,
        &empty,
    )?)
}

async fn concept(rxcui: &str, json: bool) -> anyhow::Result<String> {
    let client = NameSearchClient::new()?;
    let Some(details) = client.concept(rxcui).await? else {
        let reason = client.last_failure().unwrap_or_default();
        if json {
            return Ok(render::json::to_pretty(&ConceptUnavailable {
                rxcui: rxcui.trim(),
                unavailable: &reason,
            })?);
        }
        return Ok(format!(
            "# RxNorm concept {}\n\nRxNorm unavailable: {reason}",
            rxcui.trim()
        ));
    };
    if json {
        return Ok(render::json::to_pretty(&details)?);
    }
    Ok(render::markdown::concept_markdown(&details)?)
}

async fn dispatch(command: Commands, json: bool, debounce: Duration) -> anyhow::Result<String> {
    match command {
        Commands::Search { query } => search(&join_args(&query), json).await,
        Commands::Interactive => interactive::run(debounce, json).await,
        Commands::Drug { name } => {
            let name = require_name(&name, "repurpose drug metformin")?;
            drug(&name, json)
        }
        Commands::List { category, popular } => list(category.as_deref(), popular, json),
        Commands::Opportunities {
            drug,
            filter,
            detail,
        } => opportunities(&drug, &filter, detail, json),
        Commands::Compare { drug, diseases } => compare(&drug, &diseases, json),
        Commands::Analyze { drug } => {
            let drug = require_name(&drug, "repurpose analyze metformin")?;
            analyze(&drug, json).await
        }
        Commands::Stats => stats(json),
        Commands::Autocomplete { query } => autocomplete(&join_args(&query), json).await,
        Commands::Spell { query } => spell(&join_args(&query), json).await,
        Commands::Concept { rxcui } => concept(&rxcui, json).await,
        Commands::Health { apis_only } => {
            let report = health::check(apis_only).await?;
            if json {
                return Ok(render::json::to_pretty(&report)?);
            }
            Ok(report.to_markdown())
        }
    }
}

/// Runs one command and returns its rendered output.
///
/// # Errors
///
/// Returns an error when a bundled dataset is invalid, an argument is rejected,
/// or an upstream call that the command depends on fails.
pub async fn run(cli: Cli) -> anyhow::Result<String> {
    let Cli {
        command,
        json,
        no_cache,
        debounce_ms,
    } = cli;
    let debounce = Duration::from_millis(debounce_ms);
    crate::sources::with_no_cache(no_cache, dispatch(command, json, debounce)).await
}
