use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use sha2::{Digest, Sha256};

use crate::{error::AppError, state::AppState};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Marker for requests that presented the admin API key, through
/// `X-API-Key` or `Authorization: Bearer`. A blank `X-API-Key` falls back
/// to the bearer token. Without a configured key every request passes.
#[derive(Debug, Clone, Copy)]
pub struct AdminKey;

#[async_trait]
impl FromRequestParts<AppState> for AdminKey {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.admin_api_key.as_deref() else {
            return Ok(AdminKey);
        };

        let header_key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|key| !key.trim().is_empty())
            .map(str::to_string);

        let presented = match header_key {
            Some(key) => key,
            None => {
                let TypedHeader(Authorization(bearer)) =
                    TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                        .await
                        .map_err(|_| AppError::unauthorized())?;
                bearer.token().to_string()
            }
        };

        if keys_match(&presented, expected) {
            Ok(AdminKey)
        } else {
            Err(AppError::unauthorized())
        }
    }
}

/// Compares SHA-256 digests of both keys without an early exit.
fn keys_match(presented: &str, expected: &str) -> bool {
    let presented = Sha256::digest(presented.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    presented
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
