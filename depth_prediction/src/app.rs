use crate::config::Config;
use crate::inference_service::DepthService;
use crate::ort_service::OrtModelSource;
use crate::server::{HttpServer, SharedState};
use crate::telemetry::Metrics;

use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let device = config.model.device.resolve();
    tracing::info!(
        "Serving {} ({}) on {}",
        config.model.name,
        config.model.name.identifier(),
        device.as_str()
    );

    let source = OrtModelSource::new(&config.model, device);
    let depth_service = Arc::new(DepthService::new(source, config.model.resize_to_input));

    let metrics = match Metrics::new() {
        Ok(metrics) => Arc::new(metrics),
        Err(e) => {
            tracing::error!("Failed to initialize metrics: {:?}", e);
            return Err(Box::new(e));
        }
    };

    if config.model.preload {
        let depth_service = depth_service.clone();
        tokio::spawn(async move {
            if let Err(e) = depth_service.ensure_loaded().await {
                tracing::warn!("Model preload failed, the next request retries: {}", e);
            }
        });
    }

    let state = SharedState {
        depth_service,
        device,
        device_preference: config.model.device,
        service_name: config.server.service_name.clone(),
        max_upload_bytes: config.server.max_upload_bytes,
        metrics,
    };

    let server = HttpServer::new(state, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
