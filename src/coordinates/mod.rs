//! Unit-aware vectors, reference frames and tilt/decenter transforms

pub mod frame;
pub mod transform;
pub mod vector;

pub use frame::CoordinateSystem;
pub use transform::{Decenter, Tilt, TiltDecenter, TiltFirst};
pub use vector::Vector3;
