//! A minimal health surface exposing liveness and readiness. Mirrors a
//! typical `crates/api` health module in spirit —
//! a single `axum::Router` bound by `main` with `TcpListener` + `axum::serve`
//! — scaled down to the one route this workspace actually needs; a real
//! metrics exporter is a `taskbridge-observability::metrics` concern, not
//! wired up here (see that module's doc comment).

use axum::routing::get;
use axum::Router;

pub fn router() -> Router {
    Router::new().route("/healthz", get(healthz))
}

async fn healthz() -> &'static str {
    "ok"
}
