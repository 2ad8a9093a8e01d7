use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::error;

use parley_db::Database;
use parley_gateway::Dispatcher;

use crate::error::ApiError;
use crate::media::MediaStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub dispatcher: Dispatcher,
    pub media: MediaStore,
    pub jwt_secret: String,
    pub limits: Limits,
}

#[derive(Debug, Clone)]
pub struct Limits {
    /// Bound on each store call made while serving a request.
    pub store_timeout: Duration,
    /// Bound on each background fan-out task.
    pub fanout_timeout: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
            fanout_timeout: Duration::from_secs(10),
        }
    }
}

/// Runs a store call off the async runtime, bounded by the store timeout.
pub async fn with_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> parley_db::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let st = state.clone();
    let task = tokio::task::spawn_blocking(move || f(&st.db));

    match timeout(state.limits.store_timeout, task).await {
        Ok(Ok(result)) => result.map_err(ApiError::from),
        Ok(Err(e)) => {
            error!("spawn_blocking join error: {}", e);
            Err(ApiError::Internal(e.to_string()))
        }
        Err(_) => Err(ApiError::Timeout),
    }
}

/// Runs a store write that enforces the store deadline itself. The task is
/// awaited to completion, so a timeout reply always means nothing was
/// committed.
pub async fn with_db_until<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database, Instant) -> parley_db::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let deadline = Instant::now() + state.limits.store_timeout;
    let st = state.clone();

    match tokio::task::spawn_blocking(move || f(&st.db, deadline)).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            Err(ApiError::Internal(e.to_string()))
        }
    }
}

/// Fails with `NotMember` unless the user belongs to the room.
pub async fn require_member(state: &AppState, room_id: i64, user_id: i64) -> Result<(), ApiError> {
    if with_db(state, move |db| db.is_member(room_id, user_id)).await? {
        Ok(())
    } else {
        Err(ApiError::NotMember)
    }
}
