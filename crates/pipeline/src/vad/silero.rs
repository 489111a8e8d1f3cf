//! Silero VAD v5 over ONNX Runtime
//!
//! Takes raw 16 kHz waveform in 512-sample chunks; LSTM-based, stateful.
//! The model session is loaded once per process and shared read-only across
//! sessions; each session keeps its own LSTM carry-over state.

use std::path::Path;
use std::sync::Arc;

use ndarray::Array2;
use ort::{session::builder::GraphOptimizationLevel, session::Session, value::Tensor};
use parking_lot::Mutex;

use super::VadEngine;
use crate::PipelineError;

const SAMPLE_RATE: i64 = 16_000;
const LSTM_LAYERS: usize = 2;
const LSTM_HIDDEN: usize = 64;

/// Process-wide Silero model handle.
pub struct SileroModel {
    session: Mutex<Session>,
}

impl SileroModel {
    /// Load silero_vad.onnx from disk.
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let session = Session::builder()
            .map_err(|e| PipelineError::Model(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| PipelineError::Model(e.to_string()))?
            .with_intra_threads(1)
            .map_err(|e| PipelineError::Model(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

/// Per-session Silero engine: shared model, local LSTM state.
pub struct SileroVad {
    model: Arc<SileroModel>,
    h_state: Array2<f32>,
    c_state: Array2<f32>,
}

impl SileroVad {
    pub fn new(model: Arc<SileroModel>) -> Self {
        Self {
            model,
            h_state: Array2::zeros((LSTM_LAYERS, LSTM_HIDDEN)),
            c_state: Array2::zeros((LSTM_LAYERS, LSTM_HIDDEN)),
        }
    }
}

impl VadEngine for SileroVad {
    fn probability(&mut self, samples: &[f32]) -> Result<f32, PipelineError> {
        let input = Array2::from_shape_vec((1, samples.len()), samples.to_vec())
            .map_err(|e| PipelineError::Vad(e.to_string()))?;
        let sr = ndarray::arr1(&[SAMPLE_RATE]);

        let input_tensor =
            Tensor::from_array(input).map_err(|e| PipelineError::Model(e.to_string()))?;
        let sr_tensor = Tensor::from_array(sr).map_err(|e| PipelineError::Model(e.to_string()))?;
        let h_tensor = Tensor::from_array(self.h_state.clone())
            .map_err(|e| PipelineError::Model(e.to_string()))?;
        let c_tensor = Tensor::from_array(self.c_state.clone())
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        let mut session = self.model.session.lock();
        let outputs = session
            .run(ort::inputs![
                "input" => input_tensor,
                "sr" => sr_tensor,
                "h" => h_tensor,
                "c" => c_tensor,
            ])
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        let (_, speech_data) = outputs
            .get("output")
            .ok_or_else(|| PipelineError::Model("missing output tensor".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::Model(e.to_string()))?;
        let speech_prob = speech_data.first().copied().unwrap_or(0.0);

        // Carry LSTM state forward
        for (name, state) in [("hn", &mut self.h_state), ("cn", &mut self.c_state)] {
            if let Some(tensor) = outputs.get(name) {
                let (shape, data) = tensor
                    .try_extract_tensor::<f32>()
                    .map_err(|e| PipelineError::Model(e.to_string()))?;
                let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
                if dims.len() == 2 && data.len() == dims[0] * dims[1] {
                    let view = ndarray::ArrayView2::from_shape((dims[0], dims[1]), data)
                        .map_err(|e| PipelineError::Model(e.to_string()))?;
                    state.assign(&view);
                }
            }
        }

        Ok(speech_prob)
    }

    fn reset(&mut self) {
        self.h_state.fill(0.0);
        self.c_state.fill(0.0);
    }

    fn name(&self) -> &'static str {
        "silero"
    }
}
