mod app;
mod auth;
mod config;
mod db;
mod error;
mod images;
mod rate_limit;
mod state;
mod storage;
#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "blogsite=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = state::AppState::init().await?;

    match app_state.sessions.delete_expired().await {
        Ok(pruned) => tracing::info!(pruned, "expired sessions removed"),
        Err(e) => tracing::warn!(error = %e, "could not prune expired sessions; continuing"),
    }

    let addr = app_state.config.bind_addr()?;
    app::serve(app::build_app(app_state), addr).await
}
