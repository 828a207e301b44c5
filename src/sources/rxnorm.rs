use std::borrow::Cow;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::RepurposeError;
use crate::utils::serde::NumberOrString;

// RxNav REST API (RxNorm)
// Docs: https://lhncbc.nlm.nih.gov/RxNav/APIs/RxNormAPIs.html
const RXNORM_BASE: &str = "https://rxnav.nlm.nih.gov/REST";
const RXNORM_API: &str = "rxnorm";
const RXNORM_BASE_ENV: &str = "REPURPOSE_RXNORM_BASE";

pub(crate) const APPROXIMATE_MAX_ENTRIES: usize = 50;
pub(crate) const DISPLAY_NAMES_MAX: usize = 20;
const RELATED_TTYS: &str = "IN+BN+SCD+SBD";

#[derive(Clone)]
pub struct RxNormClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
}

impl RxNormClient {
    pub fn new() -> Result<Self, RepurposeError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(RXNORM_BASE, RXNORM_BASE_ENV),
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

    async fn get_json<T: DeserializeOwned>(
        &self,
        req: reqwest_middleware::RequestBuilder,
    ) -> Result<T, RepurposeError> {
        let resp = crate::sources::apply_cache_mode(req).send().await?;
        crate::sources::decode_json(resp, RXNORM_API).await
    }

    fn validate_term(term: &str) -> Result<&str, RepurposeError> {
        let term = term.trim();
        if term.is_empty() {
            return Err(RepurposeError::InvalidArgument(
                "Drug name is required. Example: repurpose search metformin".into(),
            ));
        }
        if term.len() > 256 {
            return Err(RepurposeError::InvalidArgument(
                "Drug name is too long.".into(),
            ));
        }
        Ok(term)
    }

    fn validate_rxcui(rxcui: &str) -> Result<&str, RepurposeError> {
        let rxcui = rxcui.trim();
        if rxcui.is_empty() {
            return Err(RepurposeError::InvalidArgument(
                "RxCUI is required. Example: repurpose concept 6809".into(),
            ));
        }
        if rxcui.len() > 16 || !rxcui.chars().all(|c| c.is_ascii_digit()) {
            return Err(RepurposeError::InvalidArgument(format!(
                "RxCUI must contain only digits: {rxcui}"
            )));
        }
        Ok(rxcui)
    }

    /// Fuzzy name match. Candidates come back in RxNorm's own order.
    pub async fn approximate_term(
        &self,
        term: &str,
        max_entries: usize,
    ) -> Result<Vec<RxNormCandidate>, RepurposeError> {
        let term = Self::validate_term(term)?;
        let max_entries = max_entries.clamp(1, APPROXIMATE_MAX_ENTRIES).to_string();
        let url = self.endpoint("approximateTerm.json");
        let resp: ApproximateTermResponse = self
            .get_json(
                self.client
                    .get(&url)
                    .query(&[("term", term), ("maxEntries", max_entries.as_str())]),
            )
            .await?;
        Ok(resp
            .approximate_group
            .map(|group| group.candidate)
            .unwrap_or_default())
    }

    pub async fn display_names(&self, name: &str) -> Result<Vec<String>, RepurposeError> {
        let name = Self::validate_term(name)?;
        let max_entries = DISPLAY_NAMES_MAX.to_string();
        let url = self.endpoint("displaynames.json");
        let resp: DisplayNamesResponse = self
            .get_json(
                self.client
                    .get(&url)
                    .query(&[("name", name), ("maxEntries", max_entries.as_str())]),
            )
            .await?;
        Ok(resp
            .display_terms_list
            .map(|list| list.term)
            .unwrap_or_default())
    }

    pub async fn spelling_suggestions(&self, name: &str) -> Result<Vec<String>, RepurposeError> {
        let name = Self::validate_term(name)?;
        let url = self.endpoint("spellingsuggestions.json");
        let resp: SpellingSuggestionsResponse = self
            .get_json(self.client.get(&url).query(&[("name", name)]))
            .await?;
        Ok(resp
            .suggestion_group
            .and_then(|group| group.suggestion_list)
            .map(|list| list.suggestion)
            .unwrap_or_default())
    }

    pub async fn properties(
        &self,
        rxcui: &str,
    ) -> Result<Option<RxNormProperties>, RepurposeError> {
        let rxcui = Self::validate_rxcui(rxcui)?;
        let url = self.endpoint(&format!("rxcui/{rxcui}/properties.json"));
        let resp: PropertiesResponse = self.get_json(self.client.get(&url)).await?;
        Ok(resp.properties)
    }

    /// Related ingredient, brand and clinical-drug concepts.
    pub async fn related(&self, rxcui: &str) -> Result<Vec<RxNormConceptGroup>, RepurposeError> {
        let rxcui = Self::validate_rxcui(rxcui)?;
        // RxNav expects literal `+` separators, so the filter goes into the URL unencoded.
        let url = format!(
            "{}?tty={RELATED_TTYS}",
            self.endpoint(&format!("rxcui/{rxcui}/related.json"))
        );
        let resp: RelatedResponse = self.get_json(self.client.get(&url)).await?;
        Ok(resp
            .related_group
            .map(|group| group.concept_group)
            .unwrap_or_default())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApproximateTermResponse {
    approximate_group: Option<ApproximateGroup>,
}

#[derive(Debug, Deserialize)]
struct ApproximateGroup {
    #[serde(default)]
    candidate: Vec<RxNormCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RxNormCandidate {
    pub rxcui: Option<String>,
    pub name: Option<String>,
    pub score: Option<NumberOrString>,
    pub rank: Option<NumberOrString>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisplayNamesResponse {
    display_terms_list: Option<DisplayTermsList>,
}

#[derive(Debug, Deserialize)]
struct DisplayTermsList {
    #[serde(default)]
    term: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpellingSuggestionsResponse {
    suggestion_group: Option<SuggestionGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuggestionGroup {
    suggestion_list: Option<SuggestionList>,
}

#[derive(Debug, Deserialize)]
struct SuggestionList {
    #[serde(default)]
    suggestion: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PropertiesResponse {
    properties: Option<RxNormProperties>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RxNormProperties {
    pub rxcui: Option<String>,
    pub name: Option<String>,
    pub synonym: Option<String>,
    pub tty: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelatedResponse {
    related_group: Option<RelatedGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelatedGroup {
    #[serde(default)]
    concept_group: Vec<RxNormConceptGroup>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RxNormConceptGroup {
    pub tty: Option<String>,
    #[serde(default)]
    pub concept_properties: Vec<RxNormProperties>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn approximate_term_reads_candidates() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/approximateTerm.json"))
            .and(query_param("term", "metformn"))
            .and(query_param("maxEntries", "50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "approximateGroup": {
                    "inputTerm": "metformn",
                    "candidate": [
                        {"rxcui": "6809", "rxaui": "1", "score": "9.5", "rank": "1", "name": "metformin", "source": "RXNORM"},
                        {"rxcui": "861007", "rxaui": "2", "score": "7.25", "rank": "2", "source": "RXNORM"}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let client = RxNormClient::new_for_test(server.uri()).unwrap();
        let candidates = client.approximate_term("metformn", 50).await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].name.as_deref(), Some("metformin"));
        assert_eq!(candidates[0].score.as_ref().and_then(|s| s.as_f64()), Some(9.5));
        assert!(candidates[1].name.is_none());
    }

    #[tokio::test]
    async fn approximate_term_handles_missing_group() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/approximateTerm.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"approximateGroup": {"inputTerm": "zz"}})),
            )
            .mount(&server)
            .await;

        let client = RxNormClient::new_for_test(server.uri()).unwrap();
        let candidates = client.approximate_term("zz", 50).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn approximate_term_surfaces_http_errors() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/approximateTerm.json"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .mount(&server)
            .await;

        let client = RxNormClient::new_for_test(server.uri()).unwrap();
        let err = client.approximate_term("aspirin", 50).await.unwrap_err();
        assert!(err.to_string().contains("rxnorm"));
    }

    #[tokio::test]
    async fn display_names_and_spelling_suggestions() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/displaynames.json"))
            .and(query_param("name", "aspi"))
            .and(query_param("maxEntries", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "displayTermsList": {"term": ["aspirin", "aspirin / caffeine"]}
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/spellingsuggestions.json"))
            .and(query_param("name", "asprin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "suggestionGroup": {
                    "name": "asprin",
                    "suggestionList": {"suggestion": ["aspirin"]}
                }
            })))
            .mount(&server)
            .await;

        let client = RxNormClient::new_for_test(server.uri()).unwrap();
        assert_eq!(
            client.display_names("aspi").await.unwrap(),
            vec!["aspirin", "aspirin / caffeine"]
        );
        assert_eq!(
            client.spelling_suggestions("asprin").await.unwrap(),
            vec!["aspirin"]
        );
    }

    #[tokio::test]
    async fn properties_and_related_groups() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rxcui/6809/properties.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "properties": {"rxcui": "6809", "name": "metformin", "synonym": "", "tty": "IN", "language": "ENG"}
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/rxcui/6809/related.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "relatedGroup": {
                    "rxcui": "6809",
                    "conceptGroup": [
                        {"tty": "BN", "conceptProperties": [{"rxcui": "151827", "name": "Glucophage"}]},
                        {"tty": "SBD"}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let client = RxNormClient::new_for_test(server.uri()).unwrap();
        let props = client.properties("6809").await.unwrap().expect("properties");
        assert_eq!(props.tty.as_deref(), Some("IN"));

        let groups = client.related("6809").await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].concept_properties[0].name.as_deref(), Some("Glucophage"));
        assert!(groups[1].concept_properties.is_empty());
    }

    #[tokio::test]
    async fn rxcui_must_be_numeric() {
        let client = RxNormClient::new_for_test("http://127.0.0.1".into()).unwrap();
        let err = client.properties("abc").await.unwrap_err();
        assert!(matches!(err, RepurposeError::InvalidArgument(_)));
    }
}
