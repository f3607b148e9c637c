//! # Physical Units Module
//!
//! This module provides runtime dimension tags for the physical quantities
//! that flow through the optical model: surface thicknesses, wavelengths,
//! tilt angles, groove densities.
//!
//! ## Design Philosophy
//!
//! Every `Quantity` stores its value in the base unit of its dimension and
//! carries the dimension alongside it:
//! - Lengths are stored in millimeters (the customary lens-design unit)
//! - Angles are stored in radians
//! - Times are stored in seconds
//!
//! Units only matter at the edges, when a value is constructed or read back
//! out. Inside the model everything is already in base units, so arithmetic
//! never has to convert.
//!
//! ## Dimension Checking
//!
//! A `Dimension` is a vector of integer exponents over (length, angle, time).
//! Multiplying quantities adds exponents, dividing subtracts them. Adding two
//! quantities of different dimension is a programming error; the `+`/`-`
//! operators panic on it, the same way ndarray panics on incompatible shapes,
//! while `checked_add`/`checked_sub` report it as a `RayfieldError`.
//!
//! ## Examples
//!
//! ```rust
//! use rayfield::units::{Quantity, Unit, Dimension};
//!
//! let thickness = Quantity::new(2.5, Unit::Centimeter);
//! assert_eq!(thickness.value_in(Unit::Millimeter).unwrap(), 25.0);
//!
//! let time = Quantity::new(1.0, Unit::Second);
//! assert!(time.require(Dimension::LENGTH).is_err());
//! ```

use std::f64::consts::PI;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

use crate::{RayfieldError, Result};

/// Exponents of the base dimensions carried by a quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Dimension {
    pub length: i8,
    pub angle: i8,
    pub time: i8,
}

impl Dimension {
    pub const DIMENSIONLESS: Dimension = Dimension::new(0, 0, 0);
    pub const LENGTH: Dimension = Dimension::new(1, 0, 0);
    pub const ANGLE: Dimension = Dimension::new(0, 1, 0);
    pub const TIME: Dimension = Dimension::new(0, 0, 1);
    pub const INVERSE_LENGTH: Dimension = Dimension::new(-1, 0, 0);

    pub const fn new(length: i8, angle: i8, time: i8) -> Self {
        Dimension {
            length,
            angle,
            time,
        }
    }

    pub fn is_dimensionless(&self) -> bool {
        *self == Dimension::DIMENSIONLESS
    }

    /// Raise the dimension to an integer power
    pub fn powi(self, n: i8) -> Dimension {
        Dimension::new(self.length * n, self.angle * n, self.time * n)
    }
}

impl Mul for Dimension {
    type Output = Dimension;

    fn mul(self, other: Dimension) -> Dimension {
        Dimension::new(
            self.length + other.length,
            self.angle + other.angle,
            self.time + other.time,
        )
    }
}

impl Div for Dimension {
    type Output = Dimension;

    fn div(self, other: Dimension) -> Dimension {
        Dimension::new(
            self.length - other.length,
            self.angle - other.angle,
            self.time - other.time,
        )
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dimensionless() {
            return write!(f, "dimensionless");
        }
        let mut parts = Vec::new();
        for (name, exp) in [("length", self.length), ("angle", self.angle), ("time", self.time)] {
            match exp {
                0 => {}
                1 => parts.push(name.to_string()),
                _ => parts.push(format!("{}^{}", name, exp)),
            }
        }
        write!(f, "{}", parts.join("·"))
    }
}

/// Units accepted at the boundaries of the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "nm")]
    Nanometer,
    #[serde(rename = "um")]
    Micrometer,
    #[serde(rename = "mm")]
    Millimeter,
    #[serde(rename = "cm")]
    Centimeter,
    #[serde(rename = "m")]
    Meter,
    #[serde(rename = "rad")]
    Radian,
    #[serde(rename = "deg")]
    Degree,
    #[serde(rename = "arcsec")]
    Arcsecond,
    #[serde(rename = "s")]
    Second,
    #[serde(rename = "")]
    Dimensionless,
    #[serde(rename = "1/mm")]
    PerMillimeter,
}

impl Unit {
    /// The dimension measured by this unit
    pub fn dimension(&self) -> Dimension {
        match self {
            Unit::Nanometer
            | Unit::Micrometer
            | Unit::Millimeter
            | Unit::Centimeter
            | Unit::Meter => Dimension::LENGTH,
            Unit::Radian | Unit::Degree | Unit::Arcsecond => Dimension::ANGLE,
            Unit::Second => Dimension::TIME,
            Unit::Dimensionless => Dimension::DIMENSIONLESS,
            Unit::PerMillimeter => Dimension::INVERSE_LENGTH,
        }
    }

    /// Multiplicative factor taking a value in this unit to the base unit
    pub fn scale(&self) -> f64 {
        match self {
            Unit::Nanometer => 1e-6,
            Unit::Micrometer => 1e-3,
            Unit::Millimeter => 1.0,
            Unit::Centimeter => 10.0,
            Unit::Meter => 1e3,
            Unit::Radian => 1.0,
            Unit::Degree => PI / 180.0,
            Unit::Arcsecond => PI / (180.0 * 3600.0),
            Unit::Second => 1.0,
            Unit::Dimensionless => 1.0,
            Unit::PerMillimeter => 1.0,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Nanometer => "nm",
            Unit::Micrometer => "um",
            Unit::Millimeter => "mm",
            Unit::Centimeter => "cm",
            Unit::Meter => "m",
            Unit::Radian => "rad",
            Unit::Degree => "deg",
            Unit::Arcsecond => "arcsec",
            Unit::Second => "s",
            Unit::Dimensionless => "",
            Unit::PerMillimeter => "1/mm",
        }
    }

    /// Base unit used for storage of a given dimension, if one is named
    pub fn base_for(dimension: Dimension) -> Option<Unit> {
        [
            Unit::Millimeter,
            Unit::Radian,
            Unit::Second,
            Unit::Dimensionless,
            Unit::PerMillimeter,
        ]
        .into_iter()
        .find(|u| u.dimension() == dimension)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// A scalar value tagged with its physical dimension
///
/// The value is held in the base unit of the dimension (see module docs).
/// Two quantities compare equal only if both value and dimension match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    value: f64,
    dimension: Dimension,
}

impl Quantity {
    /// Creates a quantity from a value expressed in `unit`
    pub fn new(value: f64, unit: Unit) -> Self {
        Quantity {
            value: value * unit.scale(),
            dimension: unit.dimension(),
        }
    }

    /// Creates a quantity directly from a base-unit value
    pub fn from_base(value: f64, dimension: Dimension) -> Self {
        Quantity { value, dimension }
    }

    pub fn mm(value: f64) -> Self {
        Quantity::new(value, Unit::Millimeter)
    }

    pub fn nm(value: f64) -> Self {
        Quantity::new(value, Unit::Nanometer)
    }

    pub fn deg(value: f64) -> Self {
        Quantity::new(value, Unit::Degree)
    }

    pub fn rad(value: f64) -> Self {
        Quantity::new(value, Unit::Radian)
    }

    pub fn dimensionless(value: f64) -> Self {
        Quantity::new(value, Unit::Dimensionless)
    }

    /// Value in the base unit of this quantity's dimension
    pub fn base_value(&self) -> f64 {
        self.value
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// Value expressed in `unit`
    ///
    /// Fails if `unit` measures a different dimension.
    pub fn value_in(&self, unit: Unit) -> Result<f64> {
        self.require(unit.dimension())?;
        Ok(self.value / unit.scale())
    }

    /// Returns `self` if it has the expected dimension
    pub fn require(self, expected: Dimension) -> Result<Self> {
        if self.dimension != expected {
            return Err(RayfieldError::DimensionMismatch {
                expected,
                found: self.dimension,
            });
        }
        Ok(self)
    }

    /// Casts to a plain number, refusing to silently drop a unit
    pub fn to_plain(&self) -> Result<f64> {
        if !self.dimension.is_dimensionless() {
            return Err(RayfieldError::NotDimensionless(self.dimension));
        }
        Ok(self.value)
    }

    pub fn checked_add(self, other: Quantity) -> Result<Quantity> {
        other.require(self.dimension)?;
        Ok(Quantity::from_base(self.value + other.value, self.dimension))
    }

    pub fn checked_sub(self, other: Quantity) -> Result<Quantity> {
        other.require(self.dimension)?;
        Ok(Quantity::from_base(self.value - other.value, self.dimension))
    }

    pub fn abs(self) -> Quantity {
        Quantity::from_base(self.value.abs(), self.dimension)
    }

    pub fn is_finite(&self) -> bool {
        self.value.is_finite()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Unit::base_for(self.dimension) {
            Some(unit) if unit != Unit::Dimensionless => write!(f, "{} {}", self.value, unit),
            Some(_) => write!(f, "{}", self.value),
            None => write!(f, "{} [{}]", self.value, self.dimension),
        }
    }
}

impl PartialOrd for Quantity {
    /// Quantities of different dimension are unordered
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        if self.dimension != other.dimension {
            return None;
        }
        self.value.partial_cmp(&other.value)
    }
}

impl Add for Quantity {
    type Output = Quantity;

    /// # Panics
    ///
    /// Panics if the dimensions differ; use [`Quantity::checked_add`] to
    /// handle that case.
    fn add(self, other: Quantity) -> Quantity {
        match self.checked_add(other) {
            Ok(q) => q,
            Err(e) => panic!("cannot add quantities: {}", e),
        }
    }
}

impl Sub for Quantity {
    type Output = Quantity;

    /// # Panics
    ///
    /// Panics if the dimensions differ; use [`Quantity::checked_sub`] to
    /// handle that case.
    fn sub(self, other: Quantity) -> Quantity {
        match self.checked_sub(other) {
            Ok(q) => q,
            Err(e) => panic!("cannot subtract quantities: {}", e),
        }
    }
}

impl Neg for Quantity {
    type Output = Quantity;

    fn neg(self) -> Quantity {
        Quantity::from_base(-self.value, self.dimension)
    }
}

impl Mul for Quantity {
    type Output = Quantity;

    fn mul(self, other: Quantity) -> Quantity {
        Quantity::from_base(self.value * other.value, self.dimension * other.dimension)
    }
}

impl Div for Quantity {
    type Output = Quantity;

    fn div(self, other: Quantity) -> Quantity {
        Quantity::from_base(self.value / other.value, self.dimension / other.dimension)
    }
}

impl Mul<f64> for Quantity {
    type Output = Quantity;

    fn mul(self, scalar: f64) -> Quantity {
        Quantity::from_base(self.value * scalar, self.dimension)
    }
}

impl Mul<Quantity> for f64 {
    type Output = Quantity;

    fn mul(self, q: Quantity) -> Quantity {
        q * self
    }
}

impl Div<f64> for Quantity {
    type Output = Quantity;

    fn div(self, scalar: f64) -> Quantity {
        Quantity::from_base(self.value / scalar, self.dimension)
    }
}

/// Serialized form: `{ "value": 10.0, "unit": "mm" }`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantitySpec {
    pub value: f64,
    pub unit: Unit,
}

impl From<QuantitySpec> for Quantity {
    fn from(spec: QuantitySpec) -> Self {
        Quantity::new(spec.value, spec.unit)
    }
}
