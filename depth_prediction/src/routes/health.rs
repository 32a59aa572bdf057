use crate::{device::Device, model_service::ModelSource, server::SharedState};
use axum::{extract::State, response::IntoResponse, response::Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct ServiceStatus {
    ok: bool,
    service: String,
}

#[derive(Serialize)]
pub struct DeviceStatus {
    ok: bool,
    device: Device,
}

#[derive(Serialize)]
pub struct Readiness {
    ready: bool,
}

#[derive(Serialize)]
pub struct Liveness {
    live: bool,
}

pub async fn root<M: ModelSource>(State(state): State<SharedState<M>>) -> impl IntoResponse {
    Json(ServiceStatus {
        ok: true,
        service: state.service_name.clone(),
    })
}

/// Reports the device chosen at startup.
pub async fn healthz<M: ModelSource>(State(state): State<SharedState<M>>) -> impl IntoResponse {
    Json(DeviceStatus {
        ok: true,
        device: state.device,
    })
}

/// Queries the device again on every call.
pub async fn ping<M: ModelSource>(State(state): State<SharedState<M>>) -> impl IntoResponse {
    Json(DeviceStatus {
        ok: true,
        device: state.device_preference.resolve(),
    })
}

// Answers ready even before the model is loaded; `/model` has the real state.
pub async fn readyz() -> impl IntoResponse {
    Json(Readiness { ready: true })
}

pub async fn livez() -> impl IntoResponse {
    Json(Liveness { live: true })
}
