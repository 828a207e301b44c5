use std::borrow::Cow;

use serde::Deserialize;

use crate::error::RepurposeError;
use crate::utils::serde::NumberOrString;

// PubChem PUG REST
// Docs: https://pubchem.ncbi.nlm.nih.gov/docs/pug-rest
const PUBCHEM_BASE: &str = "https://pubchem.ncbi.nlm.nih.gov/rest/pug";
const PUBCHEM_API: &str = "pubchem";
const PUBCHEM_BASE_ENV: &str = "REPURPOSE_PUBCHEM_BASE";

pub struct PubChemClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
}

impl PubChemClient {
    pub fn new() -> Result<Self, RepurposeError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(PUBCHEM_BASE, PUBCHEM_BASE_ENV),
        })
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(base: String) -> Result<Self, RepurposeError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: Cow::Owned(base),
        })
    }

    fn compound_by_name_url(&self, name: &str) -> Result<reqwest::Url, RepurposeError> {
        let mut url =
            reqwest::Url::parse(self.base.as_ref().trim_end_matches('/')).map_err(|err| {
                RepurposeError::Api {
                    api: PUBCHEM_API.to_string(),
                    message: format!("Invalid base URL: {err}"),
                }
            })?;
        url.path_segments_mut()
            .map_err(|_| RepurposeError::Api {
                api: PUBCHEM_API.to_string(),
                message: "Base URL cannot carry a path".into(),
            })?
            .pop_if_empty()
            .extend(["compound", "name", name, "JSON"]);
        Ok(url)
    }

    /// First compound record for a drug name. PubChem answers 404 for unknown names.
    pub async fn compound_by_name(
        &self,
        name: &str,
    ) -> Result<Option<PubChemCompound>, RepurposeError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RepurposeError::InvalidArgument(
                "Drug name is required. Example: repurpose analyze aspirin".into(),
            ));
        }
        if name.len() > 256 {
            return Err(RepurposeError::InvalidArgument(
                "Drug name is too long.".into(),
            ));
        }

        let url = self.compound_by_name_url(name)?;
        let resp = crate::sources::apply_cache_mode(self.client.get(url))
            .send()
            .await?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let resp: PubChemCompoundsResponse = crate::sources::decode_json(resp, PUBCHEM_API).await?;
        Ok(resp.compounds.into_iter().next())
    }
}

#[derive(Debug, Deserialize)]
struct PubChemCompoundsResponse {
    #[serde(rename = "PC_Compounds", default)]
    compounds: Vec<PubChemCompound>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PubChemCompound {
    pub id: Option<PubChemCompoundId>,
    #[serde(default)]
    pub props: Vec<PubChemProp>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PubChemCompoundId {
    pub id: Option<PubChemCid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PubChemCid {
    pub cid: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PubChemProp {
    pub urn: Option<PubChemUrn>,
    pub value: Option<PubChemValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PubChemUrn {
    pub label: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PubChemValue {
    pub sval: Option<String>,
    pub fval: Option<NumberOrString>,
    pub ival: Option<i64>,
}

impl PubChemValue {
    fn text(&self) -> Option<String> {
        self.sval
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

impl PubChemCompound {
    pub fn cid(&self) -> Option<u64> {
        self.id.as_ref()?.id.as_ref()?.cid
    }

    /// First property carrying `label`, in record order.
    pub fn prop(&self, label: &str) -> Option<&PubChemValue> {
        self.props
            .iter()
            .find(|p| p.urn.as_ref().and_then(|u| u.label.as_deref()) == Some(label))
            .and_then(|p| p.value.as_ref())
    }

    pub fn string_prop(&self, label: &str) -> Option<String> {
        self.prop(label)?.text()
    }

    /// String property for one naming variant of `label`, e.g. the "Preferred" IUPAC name.
    pub fn string_prop_named(&self, label: &str, name: &str) -> Option<String> {
        self.props
            .iter()
            .filter_map(|p| Some((p.urn.as_ref()?, p.value.as_ref()?)))
            .find(|(urn, _)| urn.label.as_deref() == Some(label) && urn.name.as_deref() == Some(name))
            .and_then(|(_, value)| value.text())
    }

    /// Numeric property; newer records encode some numbers (molecular weight) as `sval`.
    pub fn number_prop(&self, label: &str) -> Option<f64> {
        let value = self.prop(label)?;
        value
            .fval
            .as_ref()
            .and_then(NumberOrString::as_f64)
            .or_else(|| value.sval.as_deref()?.trim().parse::<f64>().ok())
            .or_else(|| value.ival.map(|v| v as f64))
    }
}
