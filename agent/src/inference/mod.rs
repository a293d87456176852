//! Inference: model abstraction, preprocessing, and the per-task pipeline

pub mod labelmap;
pub mod model;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod pipeline;
pub mod preprocess;
pub mod visuals;
