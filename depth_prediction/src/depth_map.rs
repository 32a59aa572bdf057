use crate::model_service::InferenceError;
use image::{
    imageops::{self, FilterType},
    ImageBuffer, ImageFormat, Luma,
};
use ndarray::{Array2, ArrayD, ArrayView2, Ix2};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Cursor;

/// Lower bound on the depth range, keeps flat predictions finite.
pub const MIN_RANGE: f64 = 1e-12;
pub const MAX_LEVEL: f64 = 65535.0;

pub type DepthImage = ImageBuffer<Luma<u16>, Vec<u16>>;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DepthMeta {
    pub width: u32,
    pub height: u32,
    pub depth_min: f64,
    pub depth_max: f64,
    pub normalized: bool,
    pub model: String,
    pub image_sha256: String,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Drops singleton axes of the raw model output, which must leave a 2-D map.
pub fn squeeze(output: ArrayD<f32>) -> Result<Array2<f32>, InferenceError> {
    let shape: Vec<usize> = output.shape().iter().copied().filter(|&d| d != 1).collect();
    let shape = match shape.len() {
        2 => shape,
        // A 1xN or 1x1 map keeps its leading singleton rows.
        1 => vec![1, shape[0]],
        0 => vec![1, 1],
        n => {
            return Err(InferenceError::Shape(format!(
                "expected a single depth map, got {} non-singleton dimensions in {:?}",
                n,
                output.shape()
            )))
        }
    };

    let output = output.as_standard_layout().into_owned();
    output
        .into_shape_with_order(shape)
        .and_then(|a| a.into_dimensionality::<Ix2>())
        .map_err(|e| InferenceError::Shape(e.to_string()))
}

/// Bilinear resampling of a depth map to `width` x `height`.
///
/// Float pixels are clamped to `[0, 1]` by `imageops`, so the map is resized in
/// unit range and scaled back. The triangle filter only forms convex
/// combinations, so the range never grows.
pub fn resize(
    depth: Array2<f32>,
    width: u32,
    height: u32,
) -> Result<Array2<f32>, InferenceError> {
    let (rows, cols) = depth.dim();
    if (rows, cols) == (height as usize, width as usize) || rows == 0 || cols == 0 {
        return Ok(depth);
    }

    let (min, max) = depth_range(depth.view());
    let range = (max - min).max(MIN_RANGE) as f32;
    let min = min as f32;

    let unit: Vec<f32> = depth.iter().map(|&v| (v - min) / range).collect();
    let buffer = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(cols as u32, rows as u32, unit)
        .ok_or_else(|| InferenceError::Shape(format!("cannot resize a {}x{} map", cols, rows)))?;

    let resized = imageops::resize(&buffer, width, height, FilterType::Triangle);
    let resized = Array2::from_shape_vec((height as usize, width as usize), resized.into_raw())
        .map_err(|e| InferenceError::Shape(e.to_string()))?;

    Ok(resized.mapv(|v| v * range + min))
}

/// Minimum and maximum of the map.
pub fn depth_range(depth: ArrayView2<f32>) -> (f64, f64) {
    let (min, max) = depth
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &v| {
            (min.min(v), max.max(v))
        });
    (min as f64, max as f64)
}

/// `(x - min) / max(1e-12, max - min)`.
pub fn normalize(depth: ArrayView2<f32>, min: f64, max: f64) -> Array2<f64> {
    let range = (max - min).max(MIN_RANGE);
    depth.mapv(|v| (v as f64 - min) / range)
}

/// Scales `[0, 1]` values to the full 16-bit range.
pub fn quantize(norm: ArrayView2<f64>) -> Result<DepthImage, InferenceError> {
    let (height, width) = norm.dim();
    let data: Vec<u16> = norm
        .iter()
        .map(|&v| (v * MAX_LEVEL).round() as u16)
        .collect();

    ImageBuffer::from_raw(width as u32, height as u32, data).ok_or_else(|| {
        InferenceError::Shape(format!("cannot quantize a {}x{} map", width, height))
    })
}

pub fn encode_png(image: &DepthImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Vec::new();
    image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
    Ok(buffer)
}
