pub mod error;
pub mod fanout;
pub mod gateway;
pub mod media;
pub mod messages;
pub mod middleware;
pub mod profile;
pub mod reactions;
pub mod receipts;
pub mod rooms;
pub mod state;

use axum::{
    Router,
    routing::{delete, get, patch, post},
};
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use state::{AppState, AppStateInner, Limits};

/// Every HTTP route plus the `/gateway` upgrade. Media downloads are served
/// by the binary, which knows where the media directory is mounted.
pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/rooms", get(rooms::list_rooms))
        .route("/rooms/group", post(rooms::create_group))
        .route("/rooms/direct/{user_id}", post(rooms::create_direct))
        .route("/rooms/unread-counts", get(receipts::unread_counts))
        .route("/rooms/{room_id}", delete(rooms::delete_room))
        .route(
            "/rooms/{room_id}/members",
            get(rooms::list_members).post(rooms::add_members),
        )
        .route("/rooms/{room_id}/members/{user_id}", delete(rooms::remove_member))
        .route(
            "/rooms/{room_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/rooms/{room_id}/media", post(messages::send_media))
        .route("/rooms/{room_id}/seen", post(receipts::mark_seen))
        .route("/rooms/{room_id}/last-seen", get(receipts::last_seen))
        .route("/rooms/{room_id}/unread", get(receipts::unread_count))
        .route(
            "/messages/{message_id}/reactions",
            get(reactions::get_reactions)
                .post(reactions::toggle_reaction)
                .delete(reactions::remove_reaction),
        )
        .route("/messages/{message_id}/seen/summary", get(receipts::seen_summary))
        .route("/messages/{message_id}/seen/users", get(receipts::seen_users))
        .route("/users/me", patch(profile::update_me))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state.clone());

    // Authenticates inside the handler, from the query string or header
    let ws_route = Router::new()
        .route("/gateway", get(gateway::ws_upgrade))
        .with_state(state);

    Router::new()
        .merge(protected_routes)
        .merge(ws_route)
        .layer(TraceLayer::new_for_http())
}
