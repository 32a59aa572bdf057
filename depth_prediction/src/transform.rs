use crate::model_service::InferenceError;
use image::{imageops::FilterType, RgbImage};
use ndarray::{Array, Array4, ArrayD, Axis, Ix4};

/// How the input is scaled when the aspect ratio is preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMethod {
    /// Scale as little as possible.
    Minimal,
    /// Fit inside `net_size` x `net_size`.
    UpperBound,
    /// Cover `net_size` x `net_size`.
    LowerBound,
}

/// Preprocessing paired with a depth network: resize, scale to `[0, 1]`,
/// per-channel normalization and HWC to CHW reordering.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTransform {
    pub net_size: u32,
    pub ensure_multiple_of: u32,
    pub keep_aspect_ratio: bool,
    pub resize_method: ResizeMethod,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl InputTransform {
    /// Network input size as `(width, height)` for an image of the given size.
    pub fn target_size(&self, width: u32, height: u32) -> (u32, u32) {
        if !self.keep_aspect_ratio {
            return (self.net_size, self.net_size);
        }

        let net = self.net_size as f64;
        let mut scale_width = net / width as f64;
        let mut scale_height = net / height as f64;

        match self.resize_method {
            ResizeMethod::UpperBound => {
                let scale = scale_width.min(scale_height);
                scale_width = scale;
                scale_height = scale;
            }
            ResizeMethod::LowerBound => {
                let scale = scale_width.max(scale_height);
                scale_width = scale;
                scale_height = scale;
            }
            ResizeMethod::Minimal => {
                if (1.0 - scale_width).abs() < (1.0 - scale_height).abs() {
                    scale_height = scale_width;
                } else {
                    scale_width = scale_height;
                }
            }
        }

        let (min_val, max_val) = match self.resize_method {
            ResizeMethod::UpperBound => (0.0, Some(net)),
            ResizeMethod::LowerBound => (net, None),
            ResizeMethod::Minimal => (0.0, None),
        };

        let new_width = self.constrain(scale_width * width as f64, min_val, max_val);
        let new_height = self.constrain(scale_height * height as f64, min_val, max_val);
        (new_width, new_height)
    }

    fn constrain(&self, x: f64, min_val: f64, max_val: Option<f64>) -> u32 {
        let multiple = self.ensure_multiple_of.max(1) as f64;
        let mut y = (x / multiple).round() * multiple;

        if let Some(max_val) = max_val {
            if y > max_val {
                y = (x / multiple).floor() * multiple;
            }
        }
        if y < min_val {
            y = (x / multiple).ceil() * multiple;
        }

        (y as u32).max(multiple as u32)
    }

    /// Produces an unbatched `(3, H, W)` tensor.
    pub fn apply(&self, image: &RgbImage) -> ArrayD<f32> {
        let (width, height) = self.target_size(image.width(), image.height());
        let resized = image::imageops::resize(image, width, height, FilterType::CatmullRom);

        let mut input = Array::zeros((3, height as usize, width as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let x = x as usize;
            let y = y as usize;
            for channel in 0..3 {
                let value = pixel.0[channel] as f32 / 255.;
                input[[channel, y, x]] = (value - self.mean[channel]) / self.std[channel];
            }
        }

        input.into_dyn()
    }
}

/// Adds the leading batch axis when the transform produced a single image.
pub fn ensure_batched(tensor: ArrayD<f32>) -> Result<Array4<f32>, InferenceError> {
    let tensor = match tensor.ndim() {
        3 => tensor.insert_axis(Axis(0)),
        4 => tensor,
        n => {
            return Err(InferenceError::Shape(format!(
                "expected a 3 or 4 dimensional input tensor, got {} dimensions",
                n
            )))
        }
    };

    tensor
        .into_dimensionality::<Ix4>()
        .map_err(|e| InferenceError::Shape(e.to_string()))
}
