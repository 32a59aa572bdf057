use crate::{
    depth_map::{self, DepthMeta},
    loader::{LoaderStatus, ModelLoader, SharedHandle},
    model_service::{DepthModel, InferenceError, LoadError, ModelHandle, ModelSource},
    transform::ensure_batched,
};
use bytes::Bytes;
use image::RgbImage;
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DepthError {
    #[error("Unsupported image type: {0}")]
    UnsupportedMediaType(String),
    #[error("Missing multipart field `image`")]
    MissingImage,
    #[error("Invalid multipart body: {0}")]
    Multipart(String),
    #[error("Upload exceeds the {0} byte limit")]
    PayloadTooLarge(usize),
    #[error("Failed to decode image: {0}")]
    Decode(image::ImageError),
    #[error("Model unavailable: {0}")]
    Load(#[from] LoadError),
    #[error("{0}")]
    Inference(#[from] InferenceError),
    #[error("Failed to encode depth map: {0}")]
    Encode(image::ImageError),
    #[error("Depth task failed: {0}")]
    Task(String),
    #[error("Failed to build response: {0}")]
    Response(String),
}

/// Upload types accepted by the depth endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMediaType {
    Jpeg,
    Png,
    Webp,
    Bmp,
    Tiff,
}

impl ImageMediaType {
    /// Parses a declared content type, ignoring parameters and case.
    pub fn from_content_type(content_type: Option<&str>) -> Result<Self, DepthError> {
        let declared = content_type.unwrap_or_default();
        let essence = declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "image/jpeg" => Ok(Self::Jpeg),
            "image/png" => Ok(Self::Png),
            "image/webp" => Ok(Self::Webp),
            "image/bmp" => Ok(Self::Bmp),
            "image/tiff" => Ok(Self::Tiff),
            _ => Err(DepthError::UnsupportedMediaType(declared.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageMediaType::Jpeg => "image/jpeg",
            ImageMediaType::Png => "image/png",
            ImageMediaType::Webp => "image/webp",
            ImageMediaType::Bmp => "image/bmp",
            ImageMediaType::Tiff => "image/tiff",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub media_type: ImageMediaType,
    pub bytes: Bytes,
}

#[derive(Debug)]
pub struct DepthResponse {
    pub png: Vec<u8>,
    pub meta: DepthMeta,
}

pub struct DepthService<M: ModelSource> {
    loader: ModelLoader<M>,
    resize_to_input: bool,
}

impl<M: ModelSource> DepthService<M> {
    pub fn new(source: M, resize_to_input: bool) -> Self {
        Self {
            loader: ModelLoader::new(source),
            resize_to_input,
        }
    }

    pub async fn ensure_loaded(&self) -> Result<SharedHandle<M>, LoadError> {
        self.loader.ensure_loaded().await
    }

    pub fn loader_status(&self) -> LoaderStatus {
        self.loader.status()
    }

    #[cfg(test)]
    pub fn is_loaded(&self) -> bool {
        self.loader.is_loaded()
    }

    /// Decodes the upload, runs the model and encodes the normalized depth map.
    pub async fn estimate(&self, upload: UploadedImage) -> Result<DepthResponse, DepthError> {
        let image_sha256 = depth_map::sha256_hex(&upload.bytes);
        tracing::debug!(
            "Decoding {} upload of {} bytes",
            upload.media_type.as_str(),
            upload.bytes.len()
        );

        let bytes = upload.bytes.clone();
        let image = tokio::task::spawn_blocking(move || decode_rgb(&bytes))
            .await
            .map_err(|e| DepthError::Task(e.to_string()))??;

        let handle = self.loader.ensure_loaded().await?;

        let resize_to_input = self.resize_to_input;
        tokio::task::spawn_blocking(move || {
            run_pipeline(&handle, &image, resize_to_input, image_sha256)
        })
        .await
        .map_err(|e| DepthError::Task(e.to_string()))?
    }
}

/// Decodes any supported format, sniffing the container from the bytes.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, DepthError> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| DepthError::Decode(image::ImageError::IoError(e)))?;

    let image = reader.decode().map_err(DepthError::Decode)?;
    Ok(image.to_rgb8())
}

fn run_pipeline<D: DepthModel>(
    handle: &ModelHandle<D>,
    image: &RgbImage,
    resize_to_input: bool,
    image_sha256: String,
) -> Result<DepthResponse, DepthError> {
    let input = ensure_batched(handle.transform.apply(image))?;
    let output = handle.model.predict(&input)?;

    let mut prediction = depth_map::squeeze(output)?;
    if resize_to_input {
        prediction = depth_map::resize(prediction, image.width(), image.height())?;
    }

    let (depth_min, depth_max) = depth_map::depth_range(prediction.view());
    let norm = depth_map::normalize(prediction.view(), depth_min, depth_max);
    let depth_image = depth_map::quantize(norm.view())?;
    let png = depth_map::encode_png(&depth_image).map_err(DepthError::Encode)?;

    let (height, width) = prediction.dim();
    let meta = DepthMeta {
        width: width as u32,
        height: height as u32,
        depth_min,
        depth_max,
        normalized: true,
        model: handle.identifier.clone(),
        image_sha256,
    };

    Ok(DepthResponse { png, meta })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::loader::tests::MockModelSource;
    use image::{ImageFormat, Rgb};
    use ndarray::{array, Array2};
    use std::sync::atomic::Ordering;

    pub fn encode_test_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, 90])
        });
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), format)
            .unwrap();
        bytes
    }

    fn upload(bytes: Vec<u8>, media_type: ImageMediaType) -> UploadedImage {
        UploadedImage {
            media_type,
            bytes: Bytes::from(bytes),
        }
    }

    #[test]
    fn test_content_type_allow_list() {
        assert_eq!(
            ImageMediaType::from_content_type(Some("image/jpeg")).unwrap(),
            ImageMediaType::Jpeg
        );
        assert_eq!(
            ImageMediaType::from_content_type(Some("IMAGE/PNG; charset=binary")).unwrap(),
            ImageMediaType::Png
        );
        assert_eq!(
            ImageMediaType::from_content_type(Some("image/tiff")).unwrap(),
            ImageMediaType::Tiff
        );
        assert!(matches!(
            ImageMediaType::from_content_type(Some("text/plain")),
            Err(DepthError::UnsupportedMediaType(_))
        ));
        assert!(matches!(
            ImageMediaType::from_content_type(Some("image/gif")),
            Err(DepthError::UnsupportedMediaType(_))
        ));
        assert!(matches!(
            ImageMediaType::from_content_type(None),
            Err(DepthError::UnsupportedMediaType(_))
        ));
    }

    #[test]
    fn test_decode_forces_rgb() {
        let gray = image::GrayImage::from_pixel(5, 4, image::Luma([200]));
        let mut bytes = Vec::new();
        gray.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        let decoded = decode_rgb(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (5, 4));
        assert_eq!(decoded.get_pixel(0, 0).0, [200, 200, 200]);
    }

    #[tokio::test]
    async fn test_estimate_matches_input_resolution() {
        let source = MockModelSource::new(array![[1.0f32, 2.0], [3.0, 4.0]]);
        let service = DepthService::new(source, true);
        let bytes = encode_test_image(33, 17, ImageFormat::Png);
        let expected_sha = depth_map::sha256_hex(&bytes);

        let response = service
            .estimate(upload(bytes, ImageMediaType::Png))
            .await
            .unwrap();

        assert_eq!(response.meta.width, 33);
        assert_eq!(response.meta.height, 17);
        assert_eq!(response.meta.depth_min, 1.0);
        assert_eq!(response.meta.depth_max, 4.0);
        assert!(response.meta.normalized);
        assert_eq!(response.meta.model, "midas-small-256");
        assert_eq!(response.meta.image_sha256, expected_sha);

        let png = image::load_from_memory(&response.png).unwrap().into_luma16();
        assert_eq!(png.dimensions(), (33, 17));
        assert_eq!(png.get_pixel(0, 0).0[0], 0);
        assert_eq!(png.get_pixel(32, 16).0[0], 65535);
    }

    #[tokio::test]
    async fn test_estimate_keeps_network_resolution_when_disabled() {
        let source = MockModelSource::new(Array2::from_shape_fn((6, 8), |(y, x)| (y * 8 + x) as f32));
        let service = DepthService::new(source, false);

        let response = service
            .estimate(upload(
                encode_test_image(40, 30, ImageFormat::Bmp),
                ImageMediaType::Bmp,
            ))
            .await
            .unwrap();

        assert_eq!((response.meta.width, response.meta.height), (8, 6));
        assert_eq!(response.meta.depth_min, 0.0);
        assert_eq!(response.meta.depth_max, 47.0);
    }

    #[tokio::test]
    async fn test_flat_prediction_returns_black_map() {
        let source = MockModelSource::new(Array2::from_elem((4, 4), 7.5f32));
        let service = DepthService::new(source, true);

        let response = service
            .estimate(upload(
                encode_test_image(12, 9, ImageFormat::Jpeg),
                ImageMediaType::Jpeg,
            ))
            .await
            .unwrap();

        assert_eq!(response.meta.depth_min, response.meta.depth_max);
        let png = image::load_from_memory(&response.png).unwrap().into_luma16();
        assert!(png.pixels().all(|p| p.0[0] == 0));
    }

    #[tokio::test]
    async fn test_invalid_bytes_fail_before_model_load() {
        let source = MockModelSource::new(Array2::zeros((2, 2)));
        let loads = source.loads.clone();
        let service = DepthService::new(source, true);

        let result = service
            .estimate(upload(b"definitely not an image".to_vec(), ImageMediaType::Png))
            .await;

        assert!(matches!(result, Err(DepthError::Decode(_))));
        assert_eq!(loads.load(Ordering::SeqCst), 0);
        assert!(!service.is_loaded());
    }

    #[tokio::test]
    async fn test_load_failure_surfaces_and_retries() {
        let mut source = MockModelSource::new(Array2::zeros((2, 2)));
        source.failures = 1;
        let service = DepthService::new(source, true);
        let bytes = encode_test_image(8, 8, ImageFormat::Png);

        let first = service
            .estimate(upload(bytes.clone(), ImageMediaType::Png))
            .await;
        assert!(matches!(first, Err(DepthError::Load(_))));

        let second = service.estimate(upload(bytes, ImageMediaType::Png)).await;
        assert!(second.is_ok());
    }
}
