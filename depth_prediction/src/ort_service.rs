use crate::{
    config::ModelConfig,
    device::Device,
    model_service::{DepthModel, InferenceError, LoadError, ModelHandle, ModelSource},
    variant::ModelVariant,
};
use ndarray::{Array4, ArrayD};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// Resolves a variant to its ONNX export under the model directory.
#[derive(Debug, Clone)]
pub struct OrtModelSource {
    variant: ModelVariant,
    model_path: PathBuf,
    device: Device,
    num_instances: usize,
    intra_threads: usize,
    keep_aspect_ratio: bool,
}

impl OrtModelSource {
    pub fn new(model_config: &ModelConfig, device: Device) -> Self {
        Self {
            variant: model_config.name,
            model_path: model_config.get_path(),
            device,
            num_instances: model_config.num_instances.max(1),
            intra_threads: model_config.intra_threads.max(1),
            keep_aspect_ratio: model_config.keep_aspect_ratio,
        }
    }

    fn build_session(&self) -> Result<Session, ort::Error> {
        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.intra_threads)?;

        let builder = match self.device {
            Device::Cuda => builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])?,
            Device::Cpu => builder,
        };

        builder.commit_from_file(&self.model_path)
    }
}

impl ModelSource for OrtModelSource {
    type Model = OrtDepthModel;

    fn load(&self) -> Result<ModelHandle<OrtDepthModel>, LoadError> {
        if !self.model_path.exists() {
            return Err(LoadError::NotFound(self.model_path.clone()));
        }

        tracing::info!(
            "Loading {} from {} on {}",
            self.variant,
            self.model_path.display(),
            self.device.as_str()
        );

        let sessions = (0..self.num_instances)
            .map(|_| self.build_session().map(Mutex::new))
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(|e| LoadError::Session(e.to_string()))?;

        let output_name = sessions
            .first()
            .and_then(|session| session.lock().outputs.first().map(|o| o.name.clone()))
            .ok_or_else(|| LoadError::Session("model has no outputs".to_string()))?;

        tracing::info!(
            "Created {} ONNX sessions, reading output '{}'",
            sessions.len(),
            output_name
        );

        Ok(ModelHandle {
            model: OrtDepthModel {
                sessions: Arc::new(sessions),
                counter: Arc::new(AtomicUsize::new(0)),
                output_name,
            },
            transform: self.variant.transform(self.keep_aspect_ratio),
            identifier: self.variant.identifier().to_string(),
        })
    }
}

pub struct OrtDepthModel {
    sessions: Arc<Vec<Mutex<Session>>>,
    counter: Arc<AtomicUsize>,
    output_name: String,
}

impl DepthModel for OrtDepthModel {
    fn predict(&self, input: &Array4<f32>) -> Result<ArrayD<f32>, InferenceError> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index].lock();

        tracing::debug!("Running depth inference with session {}", index);
        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().into_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| InferenceError::Tensor(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| InferenceError::Run(e.to_string()))?;

        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Tensor(e.to_string()))?;

        let ix = shape.to_ixdyn();
        let array = ArrayD::from_shape_vec(ix, data.to_vec())
            .map_err(|e| InferenceError::Shape(e.to_string()))?;

        Ok(array)
    }
}
