mod depth_map;
mod device;
mod inference_service;
mod loader;
mod model_service;
mod ort_service;
mod routes;
mod server;
mod telemetry;
mod transform;
mod variant;

pub mod app;
pub mod config;

pub use app::start_app;
