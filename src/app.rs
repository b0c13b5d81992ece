use std::{net::SocketAddr, path::Path};

use axum::Router;
use tower_http::{
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

use crate::{auth, state::AppState, storage::PUBLIC_PREFIX};

pub const INDEX_HTML: &str = "index.html";

/// The single-page shell every client-side route renders into.
pub fn spa_shell(public_dir: &Path) -> ServeFile {
    ServeFile::new(public_dir.join(INDEX_HTML))
}

pub fn build_app(state: AppState) -> Router {
    let public_dir = state.config.public_dir.clone();
    let static_files = ServeDir::new(&public_dir).fallback(spa_shell(&public_dir));

    Router::new()
        .merge(auth::router(&state))
        .nest_service(
            &format!("/{PUBLIC_PREFIX}"),
            ServeDir::new(state.uploads.root()),
        )
        .fallback_service(static_files)
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router, addr: SocketAddr) -> anyhow::Result<()> {
    tracing::info!("listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
