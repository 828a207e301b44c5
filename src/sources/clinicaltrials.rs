use std::borrow::Cow;

use serde::Deserialize;

use crate::error::RepurposeError;

// ClinicalTrials.gov data API v2
// Docs: https://clinicaltrials.gov/data-api/api
const CTGOV_BASE: &str = "https://clinicaltrials.gov/api/v2";
const CTGOV_API: &str = "clinicaltrials.gov";
const CTGOV_BASE_ENV: &str = "REPURPOSE_CTGOV_BASE";

pub(crate) const STUDIES_PAGE_SIZE: usize = 100;

pub struct ClinicalTrialsClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
}

impl ClinicalTrialsClient {
    pub fn new() -> Result<Self, RepurposeError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(CTGOV_BASE, CTGOV_BASE_ENV),
        })
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(base: String) -> Result<Self, RepurposeError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: Cow::Owned(base),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        crate::sources::join_endpoint(self.base.as_ref(), path)
    }

    /// First page of studies whose interventions mention `drug`.
    pub async fn studies_by_intervention(
        &self,
        drug: &str,
    ) -> Result<StudiesResponse, RepurposeError> {
        let drug = drug.trim();
        if drug.is_empty() {
            return Err(RepurposeError::InvalidArgument(
                "Drug name is required. Example: repurpose analyze aspirin".into(),
            ));
        }
        if drug.len() > 256 {
            return Err(RepurposeError::InvalidArgument(
                "Drug name is too long.".into(),
            ));
        }

        let page_size = STUDIES_PAGE_SIZE.to_string();
        let url = self.endpoint("studies");
        let req = self.client.get(&url).query(&[
            ("query.intr", drug),
            ("format", "json"),
            ("pageSize", page_size.as_str()),
            ("countTotal", "true"),
        ]);
        let resp = crate::sources::apply_cache_mode(req).send().await?;
        crate::sources::decode_json(resp, CTGOV_API).await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudiesResponse {
    #[serde(default)]
    pub studies: Vec<Study>,
    pub total_count: Option<u64>,
}

impl StudiesResponse {
    /// `totalCount` is only present when requested; fall back to the page size.
    pub fn total(&self) -> u64 {
        self.total_count.unwrap_or(self.studies.len() as u64)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Study {
    pub protocol_section: Option<ProtocolSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolSection {
    pub identification_module: Option<IdentificationModule>,
    pub status_module: Option<StatusModule>,
    pub design_module: Option<DesignModule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentificationModule {
    pub nct_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusModule {
    pub overall_status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DesignModule {
    #[serde(default)]
    pub phases: Vec<String>,
}

impl Study {
    pub fn nct_id(&self) -> Option<&str> {
        self.protocol_section
            .as_ref()?
            .identification_module
            .as_ref()?
            .nct_id
            .as_deref()
    }

    pub fn overall_status(&self) -> Option<&str> {
        self.protocol_section
            .as_ref()?
            .status_module
            .as_ref()?
            .overall_status
            .as_deref()
    }

    pub fn phases(&self) -> &[String] {
        self.protocol_section
            .as_ref()
            .and_then(|p| p.design_module.as_ref())
            .map(|d| d.phases.as_slice())
            .unwrap_or_default()
    }

    pub fn is_recruiting(&self) -> bool {
        self.overall_status() == Some("RECRUITING")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn studies_by_intervention_reads_status_and_phases() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/studies"))
            .and(query_param("query.intr", "Metformin"))
            .and(query_param("format", "json"))
            .and(query_param("pageSize", "100"))
            .and(query_param("countTotal", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "totalCount": 537,
                "studies": [
                    {"protocolSection": {
                        "identificationModule": {"nctId": "NCT01101438", "briefTitle": "Metformin in breast cancer"},
                        "statusModule": {"overallStatus": "RECRUITING"},
                        "designModule": {"phases": ["PHASE3"]}
                    }},
                    {"protocolSection": {
                        "identificationModule": {"nctId": "NCT00000001"},
                        "statusModule": {"overallStatus": "COMPLETED"}
                    }}
                ],
                "nextPageToken": "abc"
            })))
            .mount(&server)
            .await;

        let client = ClinicalTrialsClient::new_for_test(server.uri()).unwrap();
        let resp = client.studies_by_intervention("Metformin").await.unwrap();
        assert_eq!(resp.total(), 537);
        assert_eq!(resp.studies.len(), 2);
        assert_eq!(resp.studies[0].nct_id(), Some("NCT01101438"));
        assert!(resp.studies[0].is_recruiting());
        assert_eq!(resp.studies[0].phases(), ["PHASE3".to_string()]);
        assert!(resp.studies[1].phases().is_empty());
    }

    #[tokio::test]
    async fn studies_by_intervention_rejects_html_error_page() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/studies"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<html>maintenance</html>", "text/html"),
            )
            .mount(&server)
            .await;

        let client = ClinicalTrialsClient::new_for_test(server.uri()).unwrap();
        let err = client.studies_by_intervention("aspirin").await.unwrap_err();
        assert!(err.to_string().contains("HTML"));
    }

    #[test]
    fn total_falls_back_to_page_length() {
        let resp: StudiesResponse =
            serde_json::from_value(serde_json::json!({"studies": [{}, {}]})).unwrap();
        assert_eq!(resp.total(), 2);
    }
}
