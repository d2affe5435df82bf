//! Image tensor conversion helpers shared by the processor

pub mod postprocessing;
pub mod preprocessing;

pub use postprocessing::{apply_mask, refine_alpha_matting, tensor_to_mask, SegmentationMask};
pub use preprocessing::ImagePreprocessor;
