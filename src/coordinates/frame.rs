//! Rigid-body reference frames
//!
//! A `CoordinateSystem` is an origin and an orientation expressed in its
//! parent frame. Composition follows the usual rigid-body rules:
//!
//! ```text
//! (X1, Q1) ∘ (X2, Q2) = (X1 + Q1·X2, Q1·Q2)
//! (X, Q)⁻¹            = (−Q⁻¹·X, Q⁻¹)
//! ```
//!
//! Surface frames in a system are built by chaining these compositions from
//! the global frame outward.

use std::ops::{Add, Mul};

use nalgebra::UnitQuaternion;

use super::vector::Vector3;
use crate::constants::{DEFAULT_ATOL, DEFAULT_RTOL};
use crate::units::Dimension;
use crate::{RayfieldError, Result};

/// Origin + orientation of a local frame relative to its parent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateSystem {
    translation: nalgebra::Vector3<f64>,
    rotation: UnitQuaternion<f64>,
}

impl Default for CoordinateSystem {
    fn default() -> Self {
        CoordinateSystem::global()
    }
}

impl CoordinateSystem {
    /// The identity frame
    pub fn global() -> Self {
        CoordinateSystem {
            translation: nalgebra::Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Creates a frame from an origin (must be a length) and an orientation
    pub fn new(translation: Vector3, rotation: UnitQuaternion<f64>) -> Result<Self> {
        if translation.dimension() != Dimension::LENGTH {
            return Err(RayfieldError::DimensionMismatch {
                expected: Dimension::LENGTH,
                found: translation.dimension(),
            });
        }
        Ok(CoordinateSystem {
            translation: *translation.base(),
            rotation,
        })
    }

    /// Creates a frame from an origin already in millimeters
    pub fn from_base(translation: nalgebra::Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        CoordinateSystem {
            translation,
            rotation,
        }
    }

    pub fn translation(&self) -> Vector3 {
        Vector3::from_base(self.translation, Dimension::LENGTH)
    }

    pub fn rotation(&self) -> &UnitQuaternion<f64> {
        &self.rotation
    }

    /// Translates the origin by `v`, given in this frame's local axes
    pub fn compose_translate(&self, v: &Vector3) -> Result<Self> {
        if v.dimension() != Dimension::LENGTH {
            return Err(RayfieldError::DimensionMismatch {
                expected: Dimension::LENGTH,
                found: v.dimension(),
            });
        }
        Ok(CoordinateSystem {
            translation: self.translation + self.rotation * v.base(),
            rotation: self.rotation,
        })
    }

    /// Rotates the frame by `q`, applied in local axes
    pub fn compose_rotate(&self, q: &UnitQuaternion<f64>) -> Self {
        CoordinateSystem {
            translation: self.translation,
            rotation: self.rotation * q,
        }
    }

    /// Places `other` (expressed in this frame) into this frame's parent
    pub fn compose(&self, other: &CoordinateSystem) -> Self {
        CoordinateSystem {
            translation: self.translation + self.rotation * other.translation,
            rotation: self.rotation * other.rotation,
        }
    }

    /// The frame mapping this frame's parent back into this frame
    pub fn inverse(&self) -> Self {
        let inv = self.rotation.inverse();
        CoordinateSystem {
            translation: -(inv * self.translation),
            rotation: inv,
        }
    }

    /// Relative transform from `other` to `self`
    ///
    /// Satisfies `other.compose(&self.diff(other)) ≈ self`.
    pub fn diff(&self, other: &CoordinateSystem) -> Self {
        other.inverse().compose(self)
    }

    /// Local x axis expressed in the parent frame
    pub fn x_hat(&self) -> Vector3 {
        Vector3::x_hat().rotate(&self.rotation)
    }

    pub fn y_hat(&self) -> Vector3 {
        Vector3::y_hat().rotate(&self.rotation)
    }

    pub fn z_hat(&self) -> Vector3 {
        Vector3::z_hat().rotate(&self.rotation)
    }

    /// Expresses a parent-frame point in local coordinates
    pub fn to_local(&self, point: &Vector3) -> Result<Vector3> {
        let p = point.require_length()?;
        Ok(Vector3::from_base(
            self.rotation.inverse() * (p - self.translation),
            Dimension::LENGTH,
        ))
    }

    /// Expresses a local point in parent-frame coordinates
    pub fn to_parent(&self, point: &Vector3) -> Result<Vector3> {
        let p = point.require_length()?;
        Ok(Vector3::from_base(
            self.translation + self.rotation * p,
            Dimension::LENGTH,
        ))
    }

    /// Where the segment `p1 → p2` crosses this frame's local x-y plane
    ///
    /// Returns the crossing point in the parent frame. `None` when the
    /// segment is parallel to the plane, or when the crossing parameter `t`
    /// falls outside `[0, 1)`. The half-open interval keeps a crossing that
    /// lands exactly on a shared endpoint from being counted by both
    /// adjoining segments.
    pub fn xy_intercept(&self, p1: &Vector3, p2: &Vector3) -> Result<Option<Vector3>> {
        let z1 = self.to_local(p1)?.base().z;
        let z2 = self.to_local(p2)?.base().z;

        if z1 == z2 {
            return Ok(None);
        }
        let t = z1 / (z1 - z2);
        if !(0.0..1.0).contains(&t) {
            return Ok(None);
        }

        let a = p1.base();
        let b = p2.base();
        Ok(Some(Vector3::from_base(a + (b - a) * t, Dimension::LENGTH)))
    }

    /// Approximate equality of origin and orientation
    ///
    /// `q` and `−q` describe the same orientation and compare as close.
    pub fn isclose(&self, other: &CoordinateSystem) -> bool {
        self.isclose_with(other, DEFAULT_RTOL, DEFAULT_ATOL)
    }

    pub fn isclose_with(&self, other: &CoordinateSystem, rtol: f64, atol: f64) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= atol + rtol * b.abs();

        let origin = self
            .translation
            .iter()
            .zip(other.translation.iter())
            .all(|(a, b)| close(*a, *b));

        let q1 = self.rotation.coords;
        let q2 = other.rotation.coords;
        let same = q1.iter().zip(q2.iter()).all(|(a, b)| close(*a, *b));
        let flipped = q1.iter().zip(q2.iter()).all(|(a, b)| close(*a, -*b));

        origin && (same || flipped)
    }
}

impl Add<Vector3> for CoordinateSystem {
    type Output = CoordinateSystem;

    /// # Panics
    ///
    /// Panics unless `v` is a length; see [`CoordinateSystem::compose_translate`].
    fn add(self, v: Vector3) -> CoordinateSystem {
        match self.compose_translate(&v) {
            Ok(cs) => cs,
            Err(e) => panic!("cannot translate coordinate system: {}", e),
        }
    }
}

impl Mul<UnitQuaternion<f64>> for CoordinateSystem {
    type Output = CoordinateSystem;

    fn mul(self, q: UnitQuaternion<f64>) -> CoordinateSystem {
        self.compose_rotate(&q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Unit;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn quarter_turn_x() -> UnitQuaternion<f64> {
        UnitQuaternion::from_axis_angle(&nalgebra::Vector3::x_axis(), PI / 2.0)
    }

    #[test]
    fn test_global_is_identity() {
        let g = CoordinateSystem::global();
        assert_eq!(g.translation(), Vector3::zeros(Dimension::LENGTH));
        assert_eq!(*g.rotation(), UnitQuaternion::identity());
        assert_eq!(g.compose(&g), g);
    }

    #[test]
    fn test_new_rejects_non_length() {
        let bad = CoordinateSystem::new(Vector3::dimensionless(0.0, 0.0, 1.0), UnitQuaternion::identity());
        assert!(matches!(bad, Err(RayfieldError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_translate_is_local() {
        let cs = CoordinateSystem::global() * quarter_turn_x();
        let moved = cs + Vector3::new(0.0, 0.0, 10.0, Unit::Millimeter);
        // Local +z points along global -y after a quarter turn about x
        assert!(moved
            .translation()
            .isclose(&Vector3::new(0.0, -10.0, 0.0, Unit::Millimeter)));
    }

    #[test]
    fn test_inverse_composes_to_identity() {
        let cs = CoordinateSystem::from_base(
            nalgebra::Vector3::new(1.0, -2.0, 3.0),
            UnitQuaternion::from_euler_angles(0.1, -0.4, 0.7),
        );
        assert!(cs.compose(&cs.inverse()).isclose(&CoordinateSystem::global()));
        assert!(cs.inverse().compose(&cs).isclose(&CoordinateSystem::global()));
    }

    #[test]
    fn test_diff_recovers_self() {
        let a = CoordinateSystem::from_base(
            nalgebra::Vector3::new(5.0, 0.0, 1.0),
            UnitQuaternion::from_euler_angles(0.3, 0.0, 0.2),
        );
        let b = CoordinateSystem::from_base(
            nalgebra::Vector3::new(-1.0, 4.0, 9.0),
            UnitQuaternion::from_euler_angles(-0.2, 0.5, 0.0),
        );
        assert!(b.compose(&a.diff(&b)).isclose(&a));
    }

    #[test]
    fn test_isclose_treats_negated_quaternion_as_equal() {
        let q = UnitQuaternion::from_euler_angles(0.2, 0.1, -0.3);
        let neg = UnitQuaternion::new_unchecked(-q.into_inner());
        let a = CoordinateSystem::from_base(nalgebra::Vector3::zeros(), q);
        let b = CoordinateSystem::from_base(nalgebra::Vector3::zeros(), neg);
        assert!(a.isclose(&b));
    }

    #[test]
    fn test_local_axes() {
        let cs = CoordinateSystem::global() * quarter_turn_x();
        assert!(cs.z_hat().isclose(&Vector3::dimensionless(0.0, -1.0, 0.0)));
        assert!(cs.x_hat().isclose(&Vector3::x_hat()));
    }

    #[test]
    fn test_to_local_round_trip() {
        let cs = CoordinateSystem::from_base(
            nalgebra::Vector3::new(1.0, 2.0, 3.0),
            UnitQuaternion::from_euler_angles(0.4, 0.2, 0.1),
        );
        let p = Vector3::new(7.0, -3.0, 2.0, Unit::Millimeter);
        let back = cs.to_parent(&cs.to_local(&p).unwrap()).unwrap();
        assert!(back.isclose(&p));
    }

    #[test]
    fn test_xy_intercept() {
        let plane = CoordinateSystem::global() + Vector3::new(0.0, 0.0, 5.0, Unit::Millimeter);
        let p1 = Vector3::new(1.0, 0.0, 0.0, Unit::Millimeter);
        let p2 = Vector3::new(1.0, 0.0, 10.0, Unit::Millimeter);

        let hit = plane.xy_intercept(&p1, &p2).unwrap().unwrap();
        assert_relative_eq!(hit.z().base_value(), 5.0);
        assert_relative_eq!(hit.x().base_value(), 1.0);

        // Segment entirely on one side
        let p3 = Vector3::new(1.0, 0.0, 4.0, Unit::Millimeter);
        assert!(plane.xy_intercept(&p1, &p3).unwrap().is_none());

        // Parallel segment
        let p4 = Vector3::new(9.0, 0.0, 0.0, Unit::Millimeter);
        assert!(plane.xy_intercept(&p1, &p4).unwrap().is_none());
    }

    #[test]
    fn test_xy_intercept_half_open() {
        let plane = CoordinateSystem::global() + Vector3::new(0.0, 0.0, 10.0, Unit::Millimeter);
        let a = Vector3::new(0.0, 0.0, 0.0, Unit::Millimeter);
        let b = Vector3::new(0.0, 0.0, 10.0, Unit::Millimeter);
        let c = Vector3::new(0.0, 0.0, 20.0, Unit::Millimeter);
        // Crossing at the shared endpoint belongs to the second segment only
        assert!(plane.xy_intercept(&a, &b).unwrap().is_none());
        assert!(plane.xy_intercept(&b, &c).unwrap().is_some());
    }
}
