//! À trous wavelet frequency-band filters and the frame pipeline that runs
//! them.

pub mod config;
pub mod convolution;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod frequency;
pub mod graph;
pub mod logging;
pub mod node;
pub mod nodes;
pub mod registry;
pub mod sample;
pub mod streaming_executor;
pub mod types;
pub mod y4m;
