use std::sync::Arc;

use cancel_flow::config::AppConfig;
use cancel_flow::csrf::CsrfService;
use cancel_flow::server::{AppState, app_routes};
use cancel_flow::session::SessionBootstrap;
use cancel_flow::session::model::Subscription;
use cancel_flow::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env()?;

    eprintln!("cancel-flow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path);
    eprintln!("   Session user: {}", config.session_user_id);
    eprintln!("   Bootstrap: http://0.0.0.0:{}/cancel/bootstrap", config.bind_port);
    eprintln!("   CSRF:      http://0.0.0.0:{}/csrf\n", config.bind_port);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&config.db_path)).await?,
    );

    if config.seed_demo {
        ensure_demo_subscription(db.as_ref(), &config.session_user_id).await?;
    }

    // ── HTTP API ─────────────────────────────────────────────────────────
    let state = AppState {
        csrf: Arc::new(CsrfService::new(config.csrf_secret.clone())),
        bootstrap: Arc::new(SessionBootstrap::new(Arc::clone(&db))),
        db,
        user_id: config.session_user_id.clone(),
    };
    let app = app_routes(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.bind_port)).await?;
    tracing::info!(port = config.bind_port, "Cancellation API started");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Stand-in for the external billing system: make sure the session user has
/// a subscription to cancel.
async fn ensure_demo_subscription(db: &dyn Database, user_id: &str) -> anyhow::Result<()> {
    if db.latest_open_subscription(user_id).await?.is_none() {
        let sub = Subscription::new(user_id, 2500);
        db.insert_subscription(&sub).await?;
        tracing::info!(user = user_id, subscription = %sub.id, "Seeded demo subscription");
    }
    Ok(())
}
