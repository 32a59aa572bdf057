use crate::transform::{InputTransform, ResizeMethod};
use std::{fmt, str::FromStr};

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
const DPT_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
const DPT_STD: [f32; 3] = [0.5, 0.5, 0.5];

/// Pretrained MiDaS-family networks the service knows how to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelVariant {
    DptLarge,
    #[default]
    DptHybrid,
    MidasSmall,
}

impl ModelVariant {
    /// Name accepted in `MODEL_NAME`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelVariant::DptLarge => "DPT_Large",
            ModelVariant::DptHybrid => "DPT_Hybrid",
            ModelVariant::MidasSmall => "MiDaS_small",
        }
    }

    /// Identifier reported in the response metadata.
    pub fn identifier(&self) -> &'static str {
        match self {
            ModelVariant::DptLarge => "midas-dpt-large-512",
            ModelVariant::DptHybrid => "midas-dpt-hybrid-384",
            ModelVariant::MidasSmall => "midas-small-256",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            ModelVariant::DptLarge => "dpt_large.onnx",
            ModelVariant::DptHybrid => "dpt_hybrid.onnx",
            ModelVariant::MidasSmall => "midas_small.onnx",
        }
    }

    /// The preprocessing the network was trained with.
    pub fn transform(&self, keep_aspect_ratio: bool) -> InputTransform {
        match self {
            ModelVariant::DptLarge | ModelVariant::DptHybrid => InputTransform {
                net_size: 384,
                ensure_multiple_of: 32,
                keep_aspect_ratio,
                resize_method: ResizeMethod::Minimal,
                mean: DPT_MEAN,
                std: DPT_STD,
            },
            ModelVariant::MidasSmall => InputTransform {
                net_size: 256,
                ensure_multiple_of: 32,
                keep_aspect_ratio,
                resize_method: ResizeMethod::UpperBound,
                mean: IMAGENET_MEAN,
                std: IMAGENET_STD,
            },
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "dpt_large" => Ok(Self::DptLarge),
            "dpt_hybrid" => Ok(Self::DptHybrid),
            "midas_small" => Ok(Self::MidasSmall),
            other => Err(format!(
                "{} is not a supported model. Use one of `DPT_Large`, `DPT_Hybrid` or `MiDaS_small`.",
                other
            )),
        }
    }
}
