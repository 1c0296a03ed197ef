use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};

use crate::error::ApiError;
use crate::state::AppState;

/// Extract and validate the bearer token, then expose its `Claims` to the
/// handler as an extension.
pub async fn require_auth(
    State(state): State<AppState>,
    auth: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) =
        auth.map_err(|_| ApiError::Unauthorized("Missing bearer token".into()))?;

    let claims = state.tokens.verify(bearer.token())?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
