use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::FixedOffset;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

use parley_api::media::MediaStore;
use parley_api::{AppState, AppStateInner, Limits};
use parley_gateway::{Dispatcher, GatewayConfig};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

/// Parsed env var, or `default` when unset. A set but malformed value is an error.
fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().with_context(|| format!("invalid {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret = std::env::var("PARLEY_JWT_SECRET").unwrap_or_default();
    if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
        eprintln!("FATAL: PARLEY_JWT_SECRET is unset or still a placeholder.");
        eprintln!("       It must match the secret of the service issuing tokens.");
        eprintln!("       Set it in your .env file and restart.");
        std::process::exit(1);
    }

    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = env_or("PARLEY_PORT", 5555)?;
    let media_dir: PathBuf = std::env::var("PARLEY_MEDIA_DIR")
        .unwrap_or_else(|_| "./data/chat_uploads".into())
        .into();
    let media_base_url =
        std::env::var("PARLEY_MEDIA_BASE_URL").unwrap_or_else(|_| "/media".into());
    let day_offset_minutes: i32 = env_or("PARLEY_DAY_OFFSET_MINUTES", 0)?;
    let day_offset = FixedOffset::east_opt(day_offset_minutes * 60)
        .with_context(|| format!("PARLEY_DAY_OFFSET_MINUTES out of range: {day_offset_minutes}"))?;

    let gateway = GatewayConfig {
        queue_capacity: env_or("PARLEY_OUTBOUND_QUEUE", 32usize)?.max(1),
        ..GatewayConfig::default()
    };
    let limits = Limits {
        store_timeout: Duration::from_millis(env_or("PARLEY_STORE_TIMEOUT_MS", 5000)?),
        fanout_timeout: Duration::from_millis(env_or("PARLEY_FANOUT_TIMEOUT_MS", 10_000)?),
    };

    // Init database and media
    let db = parley_db::Database::open(&PathBuf::from(&db_path))?.with_day_offset(day_offset);
    let media = MediaStore::new(media_dir.clone(), media_base_url.clone()).await?;

    info!(
        "Outbound queue {} per connection, day offset {}",
        gateway.queue_capacity, day_offset
    );

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db,
        dispatcher: Dispatcher::new(gateway),
        media,
        jwt_secret,
        limits,
    });

    let mut app = parley_api::router(state);

    // Local media is served here unless the base URL points elsewhere
    if media_base_url.starts_with('/') {
        let mount = media_base_url.trim_end_matches('/');
        if !mount.is_empty() {
            app = app.nest_service(mount, ServeDir::new(&media_dir));
            info!("Serving media from {} at {}", media_dir.display(), mount);
        }
    }

    let app = app.layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
