//! Rayfield: optical system modeling and vectorized ray propagation
//!
//! This crate models an optical system as an ordered chain of surfaces joined
//! by rigid-body coordinate transforms (tilts and decenters), and traces
//! bundles of rays through that chain. Ray bundles are structure-of-arrays over
//! a grid of configurations, surfaces, wavelengths, field angles and pupil
//! positions.

use thiserror::Error;

pub mod broadcast;
pub mod config;
pub mod constants;
pub mod coordinates;
pub mod rays;
pub mod roots;
pub mod system;
pub mod units;

// Re-export commonly used types
pub use coordinates::{CoordinateSystem, Decenter, Tilt, TiltDecenter, TiltFirst, Vector3};
pub use rays::{GridAxis, Rays};
pub use system::{Aperture, Component, Field, Material, Surface, SurfaceKind, System, Wavelength};
pub use units::{Dimension, Quantity, Unit};

/// Main error type for the rayfield library
#[derive(Debug, Error)]
pub enum RayfieldError {
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: Dimension, found: Dimension },

    #[error("Cannot cast a quantity with dimension {0} to a plain number")]
    NotDimensionless(Dimension),

    #[error("Invalid surface placement: {0}")]
    InvalidPlacement(String),

    #[error("Index {index} out of range for chain of {len} surfaces")]
    IndexOutOfRange { index: isize, len: usize },

    #[error("Surface not found: {0}")]
    SurfaceNotFound(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Unsupported grid axis: {0}")]
    UnsupportedAxis(String),

    #[error("Root finder exceeded {0} iterations without converging")]
    MaxIterationsExceeded(usize),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type for rayfield operations
pub type Result<T> = std::result::Result<T, RayfieldError>;
