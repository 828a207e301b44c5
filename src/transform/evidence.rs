use crate::entities::evidence::{
    CompoundInfo, PublicationEvidence, SafetyEvidence, TrialEvidence,
};
use crate::sources::clinicaltrials::StudiesResponse;
use crate::sources::openfda::{FaersEventResult, OpenFdaResponse};
use crate::sources::pubchem::PubChemCompound;
use crate::sources::pubmed::ESearchSummary;

const RECENT_IDS_MAX: usize = 10;
const COMMON_REACTIONS_MAX: usize = 10;

pub fn compound_info(compound: &PubChemCompound) -> CompoundInfo {
    CompoundInfo {
        cid: compound.cid(),
        molecular_formula: compound.string_prop("Molecular Formula"),
        molecular_weight: compound.number_prop("Molecular Weight"),
        iupac_name: compound
            .string_prop_named("IUPAC Name", "Preferred")
            .or_else(|| compound.string_prop("IUPAC Name")),
    }
}

pub fn publication_evidence(summary: ESearchSummary) -> PublicationEvidence {
    PublicationEvidence {
        publication_count: summary.count,
        recent_ids: summary.ids.into_iter().take(RECENT_IDS_MAX).collect(),
    }
}

pub fn trial_evidence(resp: &StudiesResponse) -> TrialEvidence {
    TrialEvidence {
        total_trials: resp.total(),
        active_trials: resp.studies.iter().filter(|s| s.is_recruiting()).count(),
        phases: resp
            .studies
            .iter()
            .flat_map(|s| s.phases().iter())
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
        recent_ids: resp
            .studies
            .iter()
            .filter_map(|s| s.nct_id())
            .take(RECENT_IDS_MAX)
            .map(str::to_string)
            .collect(),
    }
}

/// Reaction terms are taken in report order, duplicates included, capped at ten.
pub fn safety_evidence(resp: &OpenFdaResponse<FaersEventResult>) -> SafetyEvidence {
    SafetyEvidence {
        total_reports: resp.total() as u64,
        serious_events: resp.results.iter().filter(|r| r.is_serious()).count(),
        common_reactions: resp
            .results
            .iter()
            .filter_map(|r| r.patient.as_ref())
            .flat_map(|p| p.reaction.iter())
            .filter_map(|r| r.reactionmeddrapt.as_deref())
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .take(COMMON_REACTIONS_MAX)
            .map(str::to_string)
            .collect(),
    }
}
