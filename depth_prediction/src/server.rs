use crate::{
    config::ServerConfig,
    device::{Device, DevicePreference},
    inference_service::DepthService,
    model_service::ModelSource,
    routes::api_routes,
    telemetry::Metrics,
};
use axum::{extract::DefaultBodyLimit, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};

pub struct SharedState<M: ModelSource> {
    pub depth_service: Arc<DepthService<M>>,
    pub device: Device,
    pub device_preference: DevicePreference,
    pub service_name: String,
    pub max_upload_bytes: usize,
    pub metrics: Arc<Metrics>,
}

impl<M: ModelSource> Clone for SharedState<M> {
    fn clone(&self) -> Self {
        Self {
            depth_service: self.depth_service.clone(),
            device: self.device,
            device_preference: self.device_preference,
            service_name: self.service_name.clone(),
            max_upload_bytes: self.max_upload_bytes,
            metrics: self.metrics.clone(),
        }
    }
}

pub fn build_router<M: ModelSource>(state: SharedState<M>) -> Router {
    let metrics_layer = HttpMetricsLayerBuilder::new().build();
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .merge(api_routes::<M>())
        .with_state(state)
        .layer(body_limit)
        .layer(metrics_layer)
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<M: ModelSource>(
        state: SharedState<M>,
        config: &ServerConfig,
    ) -> anyhow::Result<Self> {
        let addr = config.get_address();
        let router = build_router(state);
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn({
            let mut shutdown_rx = shutdown_rx.resubscribe();
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        shutdown_rx.recv().await.ok();
                    })
                    .await?;
                Ok(())
            }
        });

        Ok(server_handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        inference_service::tests::encode_test_image, loader::tests::MockModelSource,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use image::ImageFormat;
    use ndarray::{array, Array2};
    use serde_json::Value;
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    const BOUNDARY: &str = "depth-test-boundary";

    fn state(source: MockModelSource, max_upload_bytes: usize) -> SharedState<MockModelSource> {
        SharedState {
            depth_service: Arc::new(DepthService::new(source, true)),
            device: Device::Cpu,
            device_preference: DevicePreference::Cpu,
            service_name: "Relief Depth API".to_string(),
            max_upload_bytes,
            metrics: Arc::new(Metrics::new().unwrap()),
        }
    }

    fn multipart_body(field: &str, content_type: &str, bytes: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"upload\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn depth_request(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/depth")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_depth_returns_png_with_metadata() {
        let source = MockModelSource::new(array![[0.5f32, 1.5], [2.5, 3.5]]);
        let router = build_router(state(source, 1024 * 1024));
        let image = encode_test_image(21, 13, ImageFormat::Png);
        let expected_sha = crate::depth_map::sha256_hex(&image);

        let response = router
            .oneshot(depth_request(multipart_body("image", "image/png", &image)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let meta: Value =
            serde_json::from_str(response.headers()["x-depth-meta"].to_str().unwrap()).unwrap();
        assert_eq!(meta["width"], 21);
        assert_eq!(meta["height"], 13);
        assert_eq!(meta["depth_min"], 0.5);
        assert_eq!(meta["depth_max"], 3.5);
        assert_eq!(meta["normalized"], true);
        assert_eq!(meta["image_sha256"], expected_sha.as_str());

        let png = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.color(), image::ColorType::L16);
        assert_eq!((decoded.width(), decoded.height()), (21, 13));
    }

    #[tokio::test]
    async fn test_unsupported_type_is_rejected_without_loading() {
        let source = MockModelSource::new(Array2::zeros((2, 2)));
        let loads = source.loads.clone();
        let router = build_router(state(source, 1024 * 1024));

        let response = router
            .oneshot(depth_request(multipart_body(
                "image",
                "text/plain",
                b"hello there",
            )))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let body = json_body(response).await;
        assert!(body["detail"].as_str().unwrap().contains("text/plain"));
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_image_field() {
        let source = MockModelSource::new(Array2::zeros((2, 2)));
        let router = build_router(state(source, 1024 * 1024));
        let image = encode_test_image(4, 4, ImageFormat::Png);

        let response = router
            .oneshot(depth_request(multipart_body("file", "image/png", &image)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_undecodable_image_is_a_server_error() {
        let source = MockModelSource::new(Array2::zeros((2, 2)));
        let router = build_router(state(source, 1024 * 1024));

        let response = router
            .oneshot(depth_request(multipart_body(
                "image",
                "image/jpeg",
                b"not really a jpeg",
            )))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_load_failure_is_unavailable() {
        let mut source = MockModelSource::new(Array2::zeros((2, 2)));
        source.failures = 1;
        let router = build_router(state(source, 1024 * 1024));
        let image = encode_test_image(8, 8, ImageFormat::Png);

        let response = router
            .clone()
            .oneshot(depth_request(multipart_body("image", "image/png", &image)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = router.clone().oneshot(get("/model")).await.unwrap();
        let status = json_body(response).await;
        assert_eq!(status["state"], "failed");
        assert_eq!(status["attempts"], 1);

        let response = router
            .oneshot(depth_request(multipart_body("image", "image/png", &image)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let source = MockModelSource::new(Array2::zeros((2, 2)));
        let router = build_router(state(source, 256));
        let image = encode_test_image(64, 64, ImageFormat::Bmp);

        let response = router
            .oneshot(depth_request(multipart_body("image", "image/bmp", &image)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_probe_endpoints() {
        let source = MockModelSource::new(Array2::zeros((2, 2)));
        let router = build_router(state(source, 1024));

        let root = json_body(router.clone().oneshot(get("/")).await.unwrap()).await;
        assert_eq!(root["ok"], true);
        assert_eq!(root["service"], "Relief Depth API");

        let health = json_body(router.clone().oneshot(get("/healthz")).await.unwrap()).await;
        assert_eq!(health["device"], "cpu");

        let ping = json_body(router.clone().oneshot(get("/ping")).await.unwrap()).await;
        assert_eq!(ping["ok"], true);
        assert_eq!(ping["device"], "cpu");

        let ready = json_body(router.clone().oneshot(get("/readyz")).await.unwrap()).await;
        assert_eq!(ready["ready"], true);

        let live = json_body(router.clone().oneshot(get("/livez")).await.unwrap()).await;
        assert_eq!(live["live"], true);

        let model = json_body(router.oneshot(get("/model")).await.unwrap()).await;
        assert_eq!(model["state"], "unloaded");
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders_text() {
        let source = MockModelSource::new(Array2::zeros((2, 2)));
        let router = build_router(state(source, 1024));

        let response = router.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
