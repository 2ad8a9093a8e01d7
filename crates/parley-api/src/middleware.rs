use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;

use parley_types::SYSTEM_USER_ID;
use parley_types::api::Claims;

use crate::error::ApiError;
use crate::state::{AppState, with_db};

/// The verified caller, placed in request extensions by `require_auth`.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: i64,
    pub username: String,
}

/// Checks a bearer token and returns its claims.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, ApiError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        debug!("Rejected token: {}", e);
        ApiError::Unauthorized
    })?;

    // The system identity never acts on its own behalf
    if data.claims.sub == SYSTEM_USER_ID {
        return Err(ApiError::Unauthorized);
    }
    Ok(data.claims)
}

/// Verifies the caller and mirrors them into the users table.
pub async fn authenticate(state: &AppState, token: &str) -> Result<Caller, ApiError> {
    let claims = verify_token(token, &state.jwt_secret)?;

    let caller = Caller {
        user_id: claims.sub,
        username: claims.username,
    };
    let (id, name) = (caller.user_id, caller.username.clone());
    with_db(state, move |db| db.ensure_user(id, &name)).await?;
    Ok(caller)
}

/// Extract and validate the JWT from the Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
        .ok_or(ApiError::Unauthorized)?;

    let caller = authenticate(&state, &token).await?;
    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}
