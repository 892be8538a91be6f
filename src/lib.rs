//! Veldra - GPU device and frame-pipelining layer for real-time renderers

pub mod core;
pub mod gpu;
