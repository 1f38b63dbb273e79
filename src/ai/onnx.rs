//! ONNX Runtime backend.

use std::fmt::Display;
use std::path::Path;

use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;

use super::{InferenceBackend, Matte};
use crate::error::{Error, Result};

/// A committed ORT session for one model file.
pub(crate) struct OnnxBackend {
    session: Session,
}

fn unavailable(path: &Path, err: impl Display) -> Error {
    Error::AiModelUnavailable(format!("failed to load {}: {err}", path.display()))
}

fn inference(err: impl Display) -> Error {
    Error::Inference(err.to_string())
}

impl OnnxBackend {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let session = Session::builder()
            .map_err(|e| unavailable(path, e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| unavailable(path, e))?
            .commit_from_file(path)
            .map_err(|e| unavailable(path, e))?;
        Ok(Self { session })
    }
}

impl InferenceBackend for OnnxBackend {
    fn infer(&mut self, input: &[f32], side: u32) -> Result<Matte> {
        let side = side as usize;
        let array = Array4::from_shape_vec((1, 3, side, side), input.to_vec()).map_err(inference)?;
        let tensor = Value::from_array(array).map_err(inference)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(inference)?;
        let output = outputs[0].try_extract_array::<f32>().map_err(inference)?;

        // Models emit 1x1xHxW, 1xHxW or HxW; the matte is the last two axes.
        let shape = output.shape();
        let (height, width) = match shape.len() {
            2..=4 => (shape[shape.len() - 2], shape[shape.len() - 1]),
            _ => {
                return Err(Error::Inference(format!(
                    "unexpected output shape {shape:?}"
                )))
            }
        };
        let values: Vec<f32> = output.iter().copied().collect();
        if values.len() != height * width {
            return Err(Error::Inference(format!(
                "output shape {shape:?} holds more than one matte"
            )));
        }
        Ok(Matte {
            values,
            width: u32::try_from(width).map_err(inference)?,
            height: u32::try_from(height).map_err(inference)?,
        })
    }
}
