//! Bearer session authentication

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use auth::{Claims, TokenPurpose};
use tracing::{error, warn};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState, workflow::Caller};

/// Claims of the session token a request was authenticated with
#[derive(Debug, Clone)]
pub struct SessionClaims(pub Claims);

/// Authentication middleware
///
/// Verifies the bearer token as a session token, refuses revoked ones and
/// makes `Caller` and `SessionClaims` available to the handler.
pub async fn require_session(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(ApiError::Unauthorized)?;

    let claims = state
        .workflows
        .tokens
        .verify_claims(TokenPurpose::Session, bearer.token())
        .map_err(|e| {
            warn!("Rejected session token: {}", e);
            ApiError::Unauthorized
        })?;

    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| ApiError::Unauthorized)?;

    let revoked = state.revocations.is_revoked(claims.jti).await.map_err(|e| {
        error!("Failed to check session revocation: {}", e);
        ApiError::Internal("Session store unavailable".to_string())
    })?;
    if revoked {
        return Err(ApiError::Unauthorized);
    }

    req.extensions_mut().insert(Caller { user_id });
    req.extensions_mut().insert(SessionClaims(claims));

    Ok(next.run(req).await)
}
