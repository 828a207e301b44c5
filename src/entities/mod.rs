//! Entity-level query and retrieval workflows used by the CLI.

use std::borrow::Cow;

use rust_embed::RustEmbed;
use serde::de::DeserializeOwned;

use crate::error::RepurposeError;

pub(crate) mod comparison;
pub(crate) mod drug;
pub(crate) mod evidence;
pub(crate) mod name_search;
pub(crate) mod opportunity;
pub(crate) mod search;

#[derive(RustEmbed)]
#[folder = "data/"]
struct EmbeddedData;

/// Parses a JSON dataset bundled into the binary from `data/`.
pub(crate) fn embedded_json<T: DeserializeOwned>(name: &str) -> Result<T, RepurposeError> {
    let Some(asset) = EmbeddedData::get(name) else {
        return Err(RepurposeError::Dataset {
            name: name.to_string(),
            message: "not bundled with this build".into(),
        });
    };

    let bytes: Cow<'static, [u8]> = asset.data;
    serde_json::from_slice(&bytes).map_err(|err| RepurposeError::Dataset {
        name: name.to_string(),
        message: err.to_string(),
    })
}
