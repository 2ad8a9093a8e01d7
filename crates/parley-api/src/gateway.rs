use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use serde::Deserialize;
use tracing::info;

use parley_gateway::run_connection;

use crate::error::ApiError;
use crate::middleware::authenticate;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    pub token: Option<String>,
}

/// Verifies the caller before upgrading. Browsers cannot set headers on a
/// websocket handshake, so the token may also come in the query string.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer.map(|TypedHeader(auth)| auth.token().to_string()))
        .ok_or(ApiError::Unauthorized)?;

    let caller = authenticate(&state, &token).await?;
    info!(user_id = caller.user_id, "Gateway upgrade accepted for {}", caller.username);

    let dispatcher = state.dispatcher.clone();
    Ok(ws.on_upgrade(move |socket| run_connection(socket, dispatcher, caller.user_id)))
}
