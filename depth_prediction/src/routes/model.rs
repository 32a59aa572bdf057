use crate::{model_service::ModelSource, server::SharedState};
use axum::{extract::State, response::IntoResponse, response::Json};

pub async fn model_status<M: ModelSource>(
    State(state): State<SharedState<M>>,
) -> impl IntoResponse {
    Json(state.depth_service.loader_status())
}
