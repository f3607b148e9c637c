//! Constants module for optical calculations

use std::f64::consts::PI;

// Tolerances
/// Default relative tolerance for approximate comparisons (numpy `isclose`)
pub const DEFAULT_RTOL: f64 = 1e-5;
/// Default absolute tolerance for approximate comparisons (numpy `isclose`)
pub const DEFAULT_ATOL: f64 = 1e-8;

// Root finding
/// Default convergence threshold on successive function differences
pub const ROOT_MAX_ABS_ERROR: f64 = 1e-9;
/// Default iteration budget of the secant method
pub const ROOT_MAX_ITERATIONS: usize = 100;

// Ray-surface intersection
/// Newton iterations allowed when intersecting a ray with a sag function
pub const SAG_MAX_ITERATIONS: usize = 50;
/// Convergence threshold on the intersection step length in millimeters
pub const SAG_TOLERANCE_MM: f64 = 1e-12;

// Angles
/// Degrees to radians conversion factor
pub const DEG2RAD: f64 = PI / 180.0;
/// Radians to degrees conversion factor
pub const RAD2DEG: f64 = 180.0 / PI;

// Default sentinel surface names
pub const OBJECT_NAME: &str = "Object";
pub const STOP_NAME: &str = "Stop";
pub const IMAGE_NAME: &str = "Image";
