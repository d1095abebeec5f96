use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use provision_core::Owner;

use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ORG_ID_HEADER: &str = "x-org-id";

/// Authenticated caller, as forwarded by the fronting router.
#[derive(Debug, Clone)]
pub struct Caller(pub Owner);

fn required_header(parts: &Parts, name: &str) -> Result<String, AppError> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::BadRequest(format!("Missing {name} header")))
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = required_header(parts, USER_ID_HEADER)?;
        let organization_id = required_header(parts, ORG_ID_HEADER)?;
        Ok(Caller(Owner::new(user_id, organization_id)))
    }
}
