use std::borrow::Cow;

use serde::Deserialize;

use crate::error::RepurposeError;
use crate::utils::serde::NumberOrString;

// NCBI E-utilities
// Docs: https://www.ncbi.nlm.nih.gov/books/NBK25499/
const PUBMED_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const PUBMED_API: &str = "pubmed";
const PUBMED_BASE_ENV: &str = "REPURPOSE_PUBMED_BASE";

pub(crate) const ESEARCH_RETMAX: usize = 100;

pub struct PubMedClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    api_key: Option<String>,
}

impl PubMedClient {
    pub fn new() -> Result<Self, RepurposeError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(PUBMED_BASE, PUBMED_BASE_ENV),
            api_key: crate::sources::ncbi_api_key(),
        })
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(base: String, api_key: Option<String>) -> Result<Self, RepurposeError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: Cow::Owned(base),
            api_key: api_key
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        crate::sources::join_endpoint(self.base.as_ref(), path)
    }

    /// Searches PubMed for `"<drug> repurposing"`.
    pub async fn repurposing_search(&self, drug: &str) -> Result<ESearchSummary, RepurposeError> {
        let drug = drug.trim();
        if drug.is_empty() {
            return Err(RepurposeError::InvalidArgument(
                "Drug name is required. Example: repurpose analyze metformin".into(),
            ));
        }
        if drug.len() > 256 {
            return Err(RepurposeError::InvalidArgument(
                "Drug name is too long.".into(),
            ));
        }

        let term = format!("{drug} repurposing");
        let retmax = ESEARCH_RETMAX.to_string();
        let url = self.endpoint("esearch.fcgi");
        let req = self.client.get(&url).query(&[
            ("db", "pubmed"),
            ("term", term.as_str()),
            ("retmode", "json"),
            ("retmax", retmax.as_str()),
        ]);
        let req = crate::sources::append_ncbi_api_key(req, self.api_key.as_deref());
        let resp = crate::sources::apply_cache_mode_with_auth(req, self.api_key.is_some())
            .send()
            .await?;
        let resp: ESearchResponse = crate::sources::decode_json(resp, PUBMED_API).await?;

        let Some(result) = resp.esearchresult else {
            return Err(RepurposeError::Api {
                api: PUBMED_API.to_string(),
                message: "Response is missing esearchresult".into(),
            });
        };
        if let Some(error) = result.error.as_deref().filter(|e| !e.trim().is_empty()) {
            return Err(RepurposeError::Api {
                api: PUBMED_API.to_string(),
                message: error.trim().to_string(),
            });
        }

        Ok(ESearchSummary {
            count: result.count.as_ref().and_then(NumberOrString::as_u64).unwrap_or(0),
            ids: result.idlist,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ESearchSummary {
    pub count: u64,
    pub ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ESearchResponse {
    esearchresult: Option<ESearchResult>,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    count: Option<NumberOrString>,
    #[serde(default)]
    idlist: Vec<String>,
    #[serde(rename = "ERROR")]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn repurposing_search_reads_count_and_ids() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/esearch.fcgi"))
            .and(query_param("db", "pubmed"))
            .and(query_param("term", "metformin repurposing"))
            .and(query_param("retmode", "json"))
            .and(query_param("retmax", "100"))
            .and(query_param("api_key", "ncbi-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "header": {"type": "esearch", "version": "0.3"},
                "esearchresult": {"count": "412", "retmax": "100", "idlist": ["39000001", "38999999"]}
            })))
            .mount(&server)
            .await;

        let client = PubMedClient::new_for_test(server.uri(), Some("ncbi-key".into())).unwrap();
        let summary = client.repurposing_search("metformin").await.unwrap();
        assert_eq!(summary.count, 412);
        assert_eq!(summary.ids, vec!["39000001", "38999999"]);
    }

    #[tokio::test]
    async fn repurposing_search_surfaces_esearch_errors() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/esearch.fcgi"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "esearchresult": {"ERROR": "Invalid query"}
            })))
            .mount(&server)
            .await;

        let client = PubMedClient::new_for_test(server.uri(), None).unwrap();
        let err = client.repurposing_search("aspirin").await.unwrap_err();
        assert!(err.to_string().contains("Invalid query"));
    }

    #[tokio::test]
    async fn repurposing_search_rejects_blank_drug() {
        let client = PubMedClient::new_for_test("http://127.0.0.1".into(), None).unwrap();
        let err = client.repurposing_search("   ").await.unwrap_err();
        assert!(matches!(err, RepurposeError::InvalidArgument(_)));
    }
}
