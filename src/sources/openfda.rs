use std::borrow::Cow;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::RepurposeError;

const OPENFDA_BASE: &str = "https://api.fda.gov";
const OPENFDA_API: &str = "openfda";
const OPENFDA_BASE_ENV: &str = "REPURPOSE_OPENFDA_BASE";

pub(crate) const FAERS_MAX_LIMIT: usize = 100;

pub struct OpenFdaClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    api_key: Option<String>,
}

impl OpenFdaClient {
    pub fn new() -> Result<Self, RepurposeError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(OPENFDA_BASE, OPENFDA_BASE_ENV),
            api_key: std::env::var("OPENFDA_API_KEY")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        })
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(
        base: String,
        api_key: Option<String>,
    ) -> Result<Self, RepurposeError> {
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

    pub(crate) fn escape_query_value(value: &str) -> String {
        crate::utils::query::escape_lucene_value(value)
    }

    /// OpenFDA answers "no matching records" with a 404, which maps to `Ok(None)`.
    async fn get_json_optional<T: DeserializeOwned>(
        &self,
        req: reqwest_middleware::RequestBuilder,
    ) -> Result<Option<T>, RepurposeError> {
        let resp = crate::sources::apply_cache_mode_with_auth(req, self.api_key.is_some())
            .send()
            .await?;
        let status = resp.status();
        let bytes = crate::sources::read_limited_body(resp, OPENFDA_API).await?;

        if status.as_u16() == 404 {
            return Ok(None);
        }

        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            return Err(RepurposeError::Api {
                api: OPENFDA_API.to_string(),
                message: format!("HTTP {status}: {excerpt}"),
            });
        }

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| RepurposeError::ApiJson {
                api: OPENFDA_API.to_string(),
                source,
            })
    }

    /// FAERS reports that list `drug_name` as a medicinal product.
    pub async fn drug_event_search(
        &self,
        drug_name: &str,
        limit: usize,
    ) -> Result<Option<OpenFdaResponse<FaersEventResult>>, RepurposeError> {
        let drug_name = drug_name.trim();
        if drug_name.is_empty() {
            return Err(RepurposeError::InvalidArgument(
                "Drug name is required. Example: repurpose analyze metformin".into(),
            ));
        }
        if drug_name.len() > 256 {
            return Err(RepurposeError::InvalidArgument(
                "Drug name is too long.".into(),
            ));
        }
        if limit == 0 || limit > FAERS_MAX_LIMIT {
            return Err(RepurposeError::InvalidArgument(format!(
                "limit must be between 1 and {FAERS_MAX_LIMIT}"
            )));
        }

        let escaped = Self::escape_query_value(drug_name);
        let search = format!("patient.drug.medicinalproduct:\"{escaped}\"");
        let url = self.endpoint("drug/event.json");
        let mut req = self
            .client
            .get(&url)
            .query(&[("search", search.as_str()), ("limit", &limit.to_string())]);
        if let Some(key) = self.api_key.as_deref() {
            req = req.query(&[("api_key", key)]);
        }
        self.get_json_optional(req).await
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenFdaResponse<T> {
    #[serde(default)]
    pub meta: Option<OpenFdaMeta>,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

impl<T> OpenFdaResponse<T> {
    pub fn total(&self) -> usize {
        self.meta
            .as_ref()
            .and_then(|meta| meta.results.as_ref())
            .map(|results| results.total)
            .unwrap_or(self.results.len())
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenFdaMeta {
    #[serde(default)]
    pub results: Option<OpenFdaMetaResults>,
}

#[derive(Debug, Deserialize)]
pub struct OpenFdaMetaResults {
    #[serde(default)]
    pub total: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaersEventResult {
    #[serde(default)]
    pub serious: Option<String>,
    #[serde(default)]
    pub patient: Option<FaersPatient>,
}

impl FaersEventResult {
    pub fn is_serious(&self) -> bool {
        self.serious.as_deref().map(str::trim) == Some("1")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaersPatient {
    #[serde(default)]
    pub reaction: Vec<FaersReaction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaersReaction {
    #[serde(default)]
    pub reactionmeddrapt: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn escape_query_value_escapes_lucene_special_chars() {
        assert_eq!(
            OpenFdaClient::escape_query_value(r#"5-FU "oral"\x"#),
            r#"5\-FU \"oral\"\\x"#
        );
    }

    #[tokio::test]
    async fn drug_event_search_validates_arguments() {
        let client = OpenFdaClient::new_for_test("http://127.0.0.1".into(), None).unwrap();
        let err = client.drug_event_search("  ", 10).await.unwrap_err();
        assert!(matches!(err, RepurposeError::InvalidArgument(_)));

        let err = client.drug_event_search("aspirin", 0).await.unwrap_err();
        assert!(matches!(err, RepurposeError::InvalidArgument(_)));

        let err = client.drug_event_search("aspirin", 101).await.unwrap_err();
        assert!(matches!(err, RepurposeError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn drug_event_search_builds_medicinal_product_query() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .and(query_param(
                "search",
                "patient.drug.medicinalproduct:\"Metformin\"",
            ))
            .and(query_param("limit", "100"))
            .and(query_param("api_key", "fda-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "meta": {"results": {"skip": 0, "limit": 100, "total": 4210}},
                "results": [
                    {"safetyreportid": "1", "serious": "1",
                     "patient": {"reaction": [{"reactionmeddrapt": "LACTIC ACIDOSIS"}]}},
                    {"safetyreportid": "2", "serious": "2",
                     "patient": {"reaction": [{"reactionmeddrapt": "NAUSEA"}]}}
                ]
            })))
            .mount(&server)
            .await;

        let client = OpenFdaClient::new_for_test(server.uri(), Some("fda-key".into())).unwrap();
        let resp = client
            .drug_event_search("Metformin", 100)
            .await
            .unwrap()
            .expect("results");
        assert_eq!(resp.total(), 4210);
        assert_eq!(resp.results.iter().filter(|r| r.is_serious()).count(), 1);
    }

    #[tokio::test]
    async fn drug_event_search_maps_not_found_to_none() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": {"code": "NOT_FOUND", "message": "No matches found!"}
            })))
            .mount(&server)
            .await;

        let client = OpenFdaClient::new_for_test(server.uri(), None).unwrap();
        let resp = client
            .drug_event_search("Notadrugatall", 10)
            .await
            .unwrap();
        assert!(resp.is_none());
    }
}
