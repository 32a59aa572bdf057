use crate::{
    inference_service::{DepthError, ImageMediaType, UploadedImage},
    model_service::ModelSource,
    server::SharedState,
};
use axum::{
    body::Body,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::time::Instant;
use tracing::instrument;

const ROUTE: &str = "/depth";
const IMAGE_FIELD: &str = "image";
const META_HEADER: &str = "x-depth-meta";

#[instrument(skip(state, multipart))]
pub async fn depth<M: ModelSource>(
    State(state): State<SharedState<M>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, DepthError> {
    state.metrics.record_request(ROUTE);
    let started = Instant::now();

    let mut multipart = multipart.map_err(|e| DepthError::Multipart(e.body_text()))?;
    let limit = state.max_upload_bytes;
    let upload = read_image_field(&mut multipart, limit).await?;
    let upload_len = upload.bytes.len();

    let depth = state.depth_service.estimate(upload).await?;

    let meta =
        serde_json::to_string(&depth.meta).map_err(|e| DepthError::Response(e.to_string()))?;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    state.metrics.record_inference_duration(elapsed_ms, ROUTE);
    tracing::info!(
        "Depth map {}x{} from {} byte upload in {} ms",
        depth.meta.width,
        depth.meta.height,
        upload_len,
        elapsed_ms
    );

    Response::builder()
        .header(header::CONTENT_TYPE, "image/png")
        .header(META_HEADER, meta)
        .body(Body::from(depth.png))
        .map_err(|e| DepthError::Response(e.to_string()))
}

/// Finds the `image` part and checks its declared type before reading its body.
async fn read_image_field(
    multipart: &mut Multipart,
    limit: usize,
) -> Result<UploadedImage, DepthError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let media_type = ImageMediaType::from_content_type(field.content_type())?;
        let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
        return Ok(UploadedImage { media_type, bytes });
    }

    Err(DepthError::MissingImage)
}

fn multipart_error(error: MultipartError, limit: usize) -> DepthError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        DepthError::PayloadTooLarge(limit)
    } else {
        DepthError::Multipart(error.body_text())
    }
}

impl DepthError {
    pub fn status(&self) -> StatusCode {
        match self {
            DepthError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            DepthError::MissingImage => StatusCode::UNPROCESSABLE_ENTITY,
            DepthError::Multipart(_) => StatusCode::BAD_REQUEST,
            DepthError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            DepthError::Load(_) => StatusCode::SERVICE_UNAVAILABLE,
            DepthError::Decode(_)
            | DepthError::Inference(_)
            | DepthError::Encode(_)
            | DepthError::Task(_)
            | DepthError::Response(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DepthError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Depth request failed with {}: {}", status, self);
        } else {
            tracing::warn!("Depth request rejected with {}: {}", status, self);
        }

        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
