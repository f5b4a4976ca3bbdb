use std::{fmt, io, path::Path};

use log::{debug, warn};
use tract_onnx::prelude::{
    Framework, Graph, InferenceModelExt, IntoTensor, SimplePlan, Tensor, TypedFact, TypedOp, tvec,
};

use crate::{
    error::{PipelineError, Result},
    postprocess::{DETECTION_COLUMNS, rows_to_tensor},
    preprocess::PreprocessedTensor,
};

type RunnableModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Opaque inference call: preprocessed tensor in, raw detection tensor out.
///
/// Backends are constructed once by the caller and handed to the detector.
pub trait InferenceBackend: fmt::Debug {
    fn run(&self, input: &PreprocessedTensor) -> Result<Tensor>;
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for &B {
    fn run(&self, input: &PreprocessedTensor) -> Result<Tensor> {
        (**self).run(input)
    }
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for Box<B> {
    fn run(&self, input: &PreprocessedTensor) -> Result<Tensor> {
        (**self).run(input)
    }
}

/// Tree detection network loaded through tract.
pub struct TreeModel {
    runnable: RunnableModel,
    input_side: u32,
    optimized: bool,
}

impl fmt::Debug for TreeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeModel")
            .field("input_side", &self.input_side)
            .field("optimized", &self.optimized)
            .finish_non_exhaustive()
    }
}

impl TreeModel {
    /// Load the ONNX graph, preferring the optimized plan and falling back to the decluttered one.
    pub fn load<P: AsRef<Path>>(model_path: P, input_side: u32) -> Result<Self> {
        let path = model_path.as_ref();
        if !path.exists() {
            return Err(PipelineError::io(
                path,
                io::Error::new(io::ErrorKind::NotFound, "model file not found"),
            ));
        }

        let (runnable, optimized) = match load_runnable_model(path, true) {
            Ok(model) => {
                debug!(
                    "tree model {} optimized successfully ({input_side}x{input_side})",
                    path.display()
                );
                (model, true)
            }
            Err(opt_err) => {
                warn!(
                    "tree model {} failed optimized load ({opt_err}); falling back to decluttered graph",
                    path.display()
                );
                let decluttered = load_runnable_model(path, false).map_err(|e| {
                    PipelineError::Decode(format!(
                        "decluttered graph failed after optimize error ({opt_err}): {e}"
                    ))
                })?;
                (decluttered, false)
            }
        };

        Ok(Self {
            runnable,
            input_side,
            optimized,
        })
    }

    pub fn input_side(&self) -> u32 {
        self.input_side
    }

    pub fn is_optimized(&self) -> bool {
        self.optimized
    }
}

impl InferenceBackend for TreeModel {
    /// Execute the network. The first output is the `[1, N, 6]` detection tensor.
    fn run(&self, input: &PreprocessedTensor) -> Result<Tensor> {
        let _guard = arbor_utils::timing_guard("arbor_core::model_run", log::Level::Debug);
        let side = self.input_side as usize;
        if input.shape != [1, 3, side, side] {
            return Err(PipelineError::Decode(format!(
                "model expects input [1, 3, {side}, {side}], got {:?}",
                input.shape
            )));
        }

        let tensor = input_tensor(input)?;
        let outputs = self
            .runnable
            .run(tvec![tensor.into()])
            .map_err(|e| PipelineError::InferenceOutput(format!("tree model execution failed: {e}")))?;

        outputs
            .into_iter()
            .next()
            .map(|value| value.into_tensor())
            .ok_or_else(|| PipelineError::InferenceOutput("tree model produced no outputs".into()))
    }
}

/// Backend that returns a fixed output, for detections produced by an external runner.
#[derive(Debug, Clone)]
pub struct ReplayBackend {
    output: Tensor,
}

impl ReplayBackend {
    pub fn new(output: Tensor) -> Self {
        Self { output }
    }

    /// Replay `[x1, y1, x2, y2, confidence, class_id]` rows as a `[1, N, 6]` tensor.
    pub fn from_rows(rows: &[[f32; DETECTION_COLUMNS]]) -> Result<Self> {
        rows_to_tensor(rows).map(Self::new)
    }
}

impl InferenceBackend for ReplayBackend {
    fn run(&self, _input: &PreprocessedTensor) -> Result<Tensor> {
        Ok(self.output.clone())
    }
}

/// Convert a preprocessed buffer into a tract tensor with its declared shape.
pub fn input_tensor(input: &PreprocessedTensor) -> Result<Tensor> {
    Tensor::from_shape(&input.shape, input.data.as_slice())
        .map_err(|e| PipelineError::Decode(format!("input buffer does not match its shape: {e}")))
}

fn load_runnable_model(path: &Path, optimized: bool) -> Result<RunnableModel> {
    let model = tract_onnx::onnx().model_for_path(path).map_err(|e| {
        PipelineError::Decode(format!(
            "failed to parse ONNX graph from {}: {e}",
            path.display()
        ))
    })?;

    let runnable = if optimized {
        model.into_optimized().and_then(|m| m.into_runnable())
    } else {
        model
            .into_typed()
            .and_then(|m| m.into_decluttered())
            .and_then(|m| m.into_runnable())
    };
    runnable.map_err(|e| PipelineError::Decode(format!("unable to prepare tree model graph: {e}")))
}
