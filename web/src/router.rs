use crate::{controller::health_check_controller, ws, AppState};
use axum::{routing::get, Router};

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(ws_routes(app_state))
}

fn health_routes() -> Router {
    Router::new().route("/healthz", get(health_check_controller::health_check))
}

fn ws_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::handler::ws_handler))
        .with_state(app_state)
}
