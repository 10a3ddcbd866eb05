//! Optional shared-secret check for submission endpoints.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Extractor that passes when no API key is configured, or when the
/// `X-API-Key` header matches the configured key.
#[derive(Debug, Clone, Copy)]
pub struct RequireApiKey;

impl FromRequestParts<AppState> for RequireApiKey {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.api_key.as_deref() else {
            return Ok(RequireApiKey);
        };

        let provided = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing X-API-Key header".into()))?;

        if !key_matches(provided, expected) {
            tracing::warn!("Rejected submission with invalid API key");
            return Err(AppError::Unauthorized("Invalid API key".into()));
        }
        Ok(RequireApiKey)
    }
}

fn key_matches(provided: &str, expected: &str) -> bool {
    bool::from(provided.as_bytes().ct_eq(expected.as_bytes()))
}
