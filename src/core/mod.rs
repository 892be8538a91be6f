//! Core types and utilities shared across the device layer

pub mod config;
pub mod error;
pub mod logging;
pub mod time;

pub use config::{GraphicsConfig, ReclaimDelay};
pub use error::Error;
pub use time::{FrameClock, FrameStats};
