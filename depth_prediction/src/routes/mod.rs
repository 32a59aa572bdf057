mod depth;
mod health;
mod metrics;
mod model;

use crate::{model_service::ModelSource, server::SharedState};
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes<M: ModelSource>() -> Router<SharedState<M>> {
    Router::new()
        .route("/", get(health::root::<M>))
        .route("/healthz", get(health::healthz::<M>))
        .route("/ping", get(health::ping::<M>))
        .route("/readyz", get(health::readyz))
        .route("/livez", get(health::livez))
        .route("/depth", post(depth::depth::<M>))
        .route("/model", get(model::model_status::<M>))
        .route("/metrics", get(metrics::metrics_handler::<M>))
}
