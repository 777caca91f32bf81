//! Request extractors.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};

use super::error::ApiError;

pub const ORG_HEADER: &str = "x-org-id";

/// Tenant scoping, taken from the `x-org-id` header set by the auth layer in front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for OrgId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        extract_org_id(&parts.headers)
    }
}

fn extract_org_id(headers: &HeaderMap) -> Result<OrgId, ApiError> {
    let raw = headers
        .get(ORG_HEADER)
        .ok_or_else(|| ApiError::MissingOrg(format!("missing {ORG_HEADER} header")))?
        .to_str()
        .map_err(|_| ApiError::MissingOrg(format!("invalid {ORG_HEADER} header")))?
        .trim();
    if raw.is_empty() {
        return Err(ApiError::MissingOrg(format!("empty {ORG_HEADER} header")));
    }
    Ok(OrgId(raw.to_string()))
}
