use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::config::ServiceConfig;
use crate::core::pipeline;
use crate::core::request::RunRequestBody;
use crate::error::Error;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
}

pub fn app(config: Arc<ServiceConfig>) -> Router {
    Router::new()
        .route("/run", post(run))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { config })
}

async fn healthz() -> &'static str {
    "ok"
}

async fn run(State(state): State<AppState>, Json(body): Json<RunRequestBody>) -> Response {
    match pipeline::execute(&state.config, body).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: Error) -> Response {
    let status = if err.is_bad_request() {
        StatusCode::BAD_REQUEST
    } else {
        error!(%err, "execution failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, err.to_string()).into_response()
}
