//! Services that keep image I/O out of the inference path

pub mod io;

pub use io::{ImageIOService, NormalizedImage};
