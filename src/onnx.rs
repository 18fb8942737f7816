//! Thin wrapper over ONNX Runtime sessions shared by every model adapter.

use crate::{Error, Result};
use ndarray::{ArrayD, CowArray};
use ort::{Environment, GraphOptimizationLevel, LoggingLevel, Session, SessionBuilder, Value};
use std::path::Path;
use std::sync::Arc;

/// Create the runtime environment all sessions of a registry share
///
/// # Errors
///
/// Returns an error if ONNX Runtime cannot be initialized.
pub fn environment(name: &str) -> Result<Arc<Environment>> {
    Ok(Arc::new(
        Environment::builder()
            .with_name(name)
            .with_log_level(LoggingLevel::Warning)
            .build()?,
    ))
}

/// An owned output tensor copied out of the runtime
#[derive(Debug, Clone)]
pub struct OutputTensor {
    /// Tensor dimensions as reported by the runtime
    pub shape: Vec<usize>,
    /// Row-major values
    pub data: Vec<f32>,
}

impl OutputTensor {
    /// Number of scalar values
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the tensor holds no values
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A loaded ONNX model with a single input
pub struct OnnxModel {
    session: Session,
    name: String,
}

impl OnnxModel {
    /// Load a model from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, cannot be parsed, or has no inputs/outputs.
    pub fn load<P: AsRef<Path>>(environment: &Arc<Environment>, model_path: P, name: &str) -> Result<Self> {
        let model_path = model_path.as_ref();
        log::info!("Loading {} model: {}", name, model_path.display());
        if !model_path.exists() {
            return Err(Error::ModelError(format!(
                "{name} model not found: {}",
                model_path.display()
            )));
        }

        let session = SessionBuilder::new(environment)?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_model_from_file(model_path)?;

        if session.inputs.is_empty() {
            return Err(Error::ModelError(format!("{name} model has no inputs")));
        }
        if session.outputs.is_empty() {
            return Err(Error::ModelError(format!("{name} model has no outputs")));
        }

        Ok(Self {
            session,
            name: name.to_string(),
        })
    }

    /// Declared dimensions of the first input, `None` for dynamic axes
    #[must_use]
    pub fn input_dimensions(&self) -> Vec<Option<u32>> {
        self.session
            .inputs
            .first()
            .map(|input| input.dimensions.clone())
            .unwrap_or_default()
    }

    /// Output names in graph order
    #[must_use]
    pub fn output_names(&self) -> Vec<String> {
        self.session.outputs.iter().map(|o| o.name.clone()).collect()
    }

    /// Index of the output called `name`
    #[must_use]
    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.session.outputs.iter().position(|o| o.name == name)
    }

    /// Run the model on one input tensor and copy every output out.
    ///
    /// # Errors
    ///
    /// Any runtime failure is reported as `ModelInference`.
    pub fn run(&self, input: ArrayD<f32>) -> Result<Vec<OutputTensor>> {
        let cow_array = CowArray::from(input);
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)
            .map_err(|e| Error::inference(format!("{}: {e}", self.name)))?;

        let outputs = self
            .session
            .run(vec![input_tensor])
            .map_err(|e| Error::inference(format!("{}: {e}", self.name)))?;

        outputs
            .iter()
            .map(|value| {
                let tensor = value
                    .try_extract::<f32>()
                    .map_err(|e| Error::inference(format!("{}: {e}", self.name)))?;
                let view = tensor.view();
                Ok(OutputTensor {
                    shape: view.shape().to_vec(),
                    data: view.iter().copied().collect(),
                })
            })
            .collect()
    }
}
