//! Validation of inbound reconstruction requests.
//!
//! The gateway rejects anything that fails here with a client error before
//! a Job Record is ever built or published.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CoreError;
use crate::types::ModelId;

/// URL schemes accepted for the input archive.
const INPUT_SCHEMES: &[&str] = &["http", "https", "s3"];

/// URL schemes accepted for the callback webhook.
const CALLBACK_SCHEMES: &[&str] = &["http", "https"];

/// Body of `POST /reconstruct`.
///
/// The original field names (`model_id`, `images_zip_url`, `images_url`) are
/// still accepted as aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructRequest {
    #[serde(alias = "model_id")]
    pub id: ModelId,
    #[serde(alias = "images_zip_url", alias = "images_url")]
    pub input_url: String,
    #[serde(default)]
    pub callback_url: Option<String>,
}

impl ReconstructRequest {
    /// Check the identifier and both URLs.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id <= 0 {
            return Err(CoreError::Validation(format!(
                "id must be a positive integer, got {}",
                self.id
            )));
        }
        validate_url("input_url", &self.input_url, INPUT_SCHEMES)?;
        if let Some(callback) = &self.callback_url {
            validate_url("callback_url", callback, CALLBACK_SCHEMES)?;
        }
        Ok(())
    }
}

/// Parse `raw` and require one of `schemes` plus a non-empty host.
fn validate_url(field: &str, raw: &str, schemes: &[&str]) -> Result<Url, CoreError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| CoreError::Validation(format!("{field} is not a valid URL: {e}")))?;

    if !schemes.contains(&url.scheme()) {
        return Err(CoreError::Validation(format!(
            "{field} must use one of the schemes {schemes:?}, got '{}'",
            url.scheme()
        )));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(CoreError::Validation(format!("{field} must include a host"))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
