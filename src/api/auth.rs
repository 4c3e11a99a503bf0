//! API token check
//!
//! Every management endpoint needs the configured token in the Authorization header

use std::sync::Arc;

use axum::Extension;
use axum::RequestPartsExt;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;

use crate::api::Error;

/// The token accepted by the management API
#[derive(Clone)]
pub struct ApiToken(Arc<str>);

impl ApiToken {
    pub fn new(token: &str) -> Self {
        Self(Arc::from(token))
    }

    /// Compare without bailing out on the first difference
    fn matches(&self, candidate: &str) -> bool {
        let expected = self.0.as_bytes();
        let candidate = candidate.as_bytes();

        expected.len() == candidate.len()
            && expected
                .iter()
                .zip(candidate)
                .fold(0, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

/// Proof the request carries a valid API token
pub struct Authorized;

impl<B> FromRequestParts<B> for Authorized
where
    B: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &B) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| Error::forbidden("Missing API token"))?;

        let Extension(api_token) = parts
            .extract::<Extension<ApiToken>>()
            .await
            .map_err(|_| Error::internal_server_error("Could not get the API token"))?;

        if !api_token.matches(bearer.token()) {
            return Err(Error::forbidden("Invalid API token"));
        }

        Ok(Authorized)
    }
}
