//! # Unit-Aware Vector Module
//!
//! This module provides a 3D vector whose components carry a physical
//! dimension. It is the position/direction/offset type used by coordinate
//! systems, surface transforms and the ray-trace front end.
//!
//! ## Design Philosophy
//!
//! The three components always share one dimension. They are stored together
//! in a `nalgebra::Vector3<f64>` in base units (millimeters for lengths,
//! radians for angles), so that rotations and products go straight through
//! nalgebra, and the dimension tag travels alongside:
//! - Construction from three `Quantity` values fails if their dimensions differ
//! - Adding or subtracting vectors of different dimension is rejected
//! - Products combine dimensions (`length × length = length²`)
//! - Casting to a plain `[f64; 3]` is refused unless the vector is
//!   dimensionless
//!
//! ## Coordinate Convention
//!
//! Right-handed, with +z the nominal optical axis. The cross product follows
//! the standard definition:
//!
//! ```text
//! (a×b).x =   a.y*b.z - a.z*b.y
//! (a×b).y = -(a.x*b.z - a.z*b.x)
//! (a×b).z =   a.x*b.y - a.y*b.x
//! ```
//!
//! ## Examples
//!
//! ```rust
//! use rayfield::coordinates::vector::Vector3;
//! use rayfield::units::{Quantity, Unit};
//!
//! let offset = Vector3::new(3.0, 4.0, 0.0, Unit::Millimeter);
//! assert_eq!(offset.mag(), Quantity::mm(5.0));
//!
//! // Lengths cannot be cast to bare numbers
//! assert!(offset.to_plain_array().is_err());
//! ```

use std::ops::{Add, Div, Mul, Neg, Sub};

use nalgebra::UnitQuaternion;

use crate::constants::{DEFAULT_ATOL, DEFAULT_RTOL};
use crate::units::{Dimension, Quantity, Unit};
use crate::{RayfieldError, Result};

/// Three-component vector with a shared physical dimension
///
/// Components are stored in base units. Equality (`==`) is exact and
/// includes the dimension; use [`Vector3::isclose`] for tolerant comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vector3 {
    components: nalgebra::Vector3<f64>,
    dimension: Dimension,
}

impl Vector3 {
    /// Creates a vector from three values expressed in `unit`
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rayfield::coordinates::vector::Vector3;
    /// use rayfield::units::{Quantity, Unit};
    ///
    /// let v = Vector3::new(1.0, 2.0, 3.0, Unit::Centimeter);
    /// assert_eq!(v.z(), Quantity::mm(30.0));
    /// ```
    pub fn new(x: f64, y: f64, z: f64, unit: Unit) -> Self {
        let s = unit.scale();
        Vector3 {
            components: nalgebra::Vector3::new(x * s, y * s, z * s),
            dimension: unit.dimension(),
        }
    }

    /// Creates a vector from three quantities of the same dimension
    pub fn from_quantities(x: Quantity, y: Quantity, z: Quantity) -> Result<Self> {
        let dimension = x.dimension();
        y.require(dimension)?;
        z.require(dimension)?;
        Ok(Vector3 {
            components: nalgebra::Vector3::new(x.base_value(), y.base_value(), z.base_value()),
            dimension,
        })
    }

    /// Wraps base-unit components with an explicit dimension
    pub fn from_base(components: nalgebra::Vector3<f64>, dimension: Dimension) -> Self {
        Vector3 {
            components,
            dimension,
        }
    }

    pub fn dimensionless(x: f64, y: f64, z: f64) -> Self {
        Vector3::new(x, y, z, Unit::Dimensionless)
    }

    pub fn zeros(dimension: Dimension) -> Self {
        Vector3::from_base(nalgebra::Vector3::zeros(), dimension)
    }

    pub fn x_hat() -> Self {
        Vector3::dimensionless(1.0, 0.0, 0.0)
    }

    pub fn y_hat() -> Self {
        Vector3::dimensionless(0.0, 1.0, 0.0)
    }

    pub fn z_hat() -> Self {
        Vector3::dimensionless(0.0, 0.0, 1.0)
    }

    pub fn x(&self) -> Quantity {
        Quantity::from_base(self.components.x, self.dimension)
    }

    pub fn y(&self) -> Quantity {
        Quantity::from_base(self.components.y, self.dimension)
    }

    pub fn z(&self) -> Quantity {
        Quantity::from_base(self.components.z, self.dimension)
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// Components in base units
    pub fn base(&self) -> &nalgebra::Vector3<f64> {
        &self.components
    }

    /// Components expressed in `unit`
    pub fn values_in(&self, unit: Unit) -> Result<[f64; 3]> {
        if unit.dimension() != self.dimension {
            return Err(RayfieldError::DimensionMismatch {
                expected: unit.dimension(),
                found: self.dimension,
            });
        }
        let s = unit.scale();
        Ok([
            self.components.x / s,
            self.components.y / s,
            self.components.z / s,
        ])
    }

    /// Casts to a plain array
    ///
    /// Fails with [`RayfieldError::NotDimensionless`] if the vector carries a
    /// unit, rather than silently dropping it.
    pub fn to_plain_array(&self) -> Result<[f64; 3]> {
        if !self.dimension.is_dimensionless() {
            return Err(RayfieldError::NotDimensionless(self.dimension));
        }
        Ok([self.components.x, self.components.y, self.components.z])
    }

    /// Dot product; the result dimension is the product of both dimensions
    pub fn dot(&self, other: &Vector3) -> Quantity {
        Quantity::from_base(
            self.components.dot(&other.components),
            self.dimension * other.dimension,
        )
    }

    /// Right-handed cross product
    pub fn cross(&self, other: &Vector3) -> Vector3 {
        let a = &self.components;
        let b = &other.components;
        let c = nalgebra::Vector3::new(
            a.y * b.z - a.z * b.y,
            -(a.x * b.z - a.z * b.x),
            a.x * b.y - a.y * b.x,
        );
        Vector3::from_base(c, self.dimension * other.dimension)
    }

    /// Euclidean norm
    pub fn mag(&self) -> Quantity {
        Quantity::from_base(self.components.norm(), self.dimension)
    }

    /// Dimensionless unit vector in the same direction, `None` for zero length
    pub fn normalize(&self) -> Option<Vector3> {
        let mag = self.components.norm();
        if mag == 0.0 {
            None
        } else {
            Some(Vector3::from_base(
                self.components / mag,
                Dimension::DIMENSIONLESS,
            ))
        }
    }

    /// Rotates the vector by conjugation with `rotation`
    pub fn rotate(&self, rotation: &UnitQuaternion<f64>) -> Vector3 {
        Vector3::from_base(rotation * self.components, self.dimension)
    }

    /// Approximate equality with the default tolerances
    pub fn isclose(&self, other: &Vector3) -> bool {
        self.isclose_with(other, DEFAULT_RTOL, DEFAULT_ATOL)
    }

    /// Approximate equality: `|a - b| <= atol + rtol * |b|` per component
    ///
    /// Vectors of different dimension are never close.
    pub fn isclose_with(&self, other: &Vector3, rtol: f64, atol: f64) -> bool {
        if self.dimension != other.dimension {
            return false;
        }
        self.components
            .iter()
            .zip(other.components.iter())
            .all(|(a, b)| (a - b).abs() <= atol + rtol * b.abs())
    }

    /// Base-unit components, provided the vector is a length
    pub(crate) fn require_length(&self) -> Result<nalgebra::Vector3<f64>> {
        if self.dimension != Dimension::LENGTH {
            return Err(RayfieldError::DimensionMismatch {
                expected: Dimension::LENGTH,
                found: self.dimension,
            });
        }
        Ok(self.components)
    }

    pub fn checked_add(self, other: Vector3) -> Result<Vector3> {
        if self.dimension != other.dimension {
            return Err(RayfieldError::DimensionMismatch {
                expected: self.dimension,
                found: other.dimension,
            });
        }
        Ok(Vector3::from_base(
            self.components + other.components,
            self.dimension,
        ))
    }

    pub fn checked_sub(self, other: Vector3) -> Result<Vector3> {
        self.checked_add(-other)
    }
}

impl Add for Vector3 {
    type Output = Vector3;

    /// # Panics
    ///
    /// Panics if the dimensions differ; see [`Vector3::checked_add`].
    fn add(self, other: Vector3) -> Vector3 {
        match self.checked_add(other) {
            Ok(v) => v,
            Err(e) => panic!("cannot add vectors: {}", e),
        }
    }
}

impl Sub for Vector3 {
    type Output = Vector3;

    /// # Panics
    ///
    /// Panics if the dimensions differ; see [`Vector3::checked_sub`].
    fn sub(self, other: Vector3) -> Vector3 {
        match self.checked_sub(other) {
            Ok(v) => v,
            Err(e) => panic!("cannot subtract vectors: {}", e),
        }
    }
}

impl Neg for Vector3 {
    type Output = Vector3;

    fn neg(self) -> Vector3 {
        Vector3::from_base(-self.components, self.dimension)
    }
}

impl Mul<f64> for Vector3 {
    type Output = Vector3;

    fn mul(self, scalar: f64) -> Vector3 {
        Vector3::from_base(self.components * scalar, self.dimension)
    }
}

impl Mul<Vector3> for f64 {
    type Output = Vector3;

    fn mul(self, v: Vector3) -> Vector3 {
        v * self
    }
}

impl Mul<Quantity> for Vector3 {
    type Output = Vector3;

    fn mul(self, q: Quantity) -> Vector3 {
        Vector3::from_base(self.components * q.base_value(), self.dimension * q.dimension())
    }
}

impl Mul<Vector3> for Quantity {
    type Output = Vector3;

    fn mul(self, v: Vector3) -> Vector3 {
        v * self
    }
}

impl Div<f64> for Vector3 {
    type Output = Vector3;

    fn div(self, scalar: f64) -> Vector3 {
        Vector3::from_base(self.components / scalar, self.dimension)
    }
}
