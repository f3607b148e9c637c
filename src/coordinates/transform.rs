//! # Tilt/Decenter Transforms
//!
//! A `TiltDecenter` describes where a child frame sits relative to its
//! parent: three tilt angles about the x, y and z axes, a decenter offset,
//! and a flag selecting which of the two is applied first.
//!
//! ## Conventions
//!
//! With `tilt_first = false` the child frame is first decentered by `d` and
//! then tilted by
//!
//! ```text
//! R = Rx(a) · Ry(b) · Rz(c)
//! ```
//!
//! With `tilt_first = true` it is tilted first, using the reversed axis order
//! `R = Rz(c) · Ry(b) · Rx(a)`, and then decentered by `d` along the tilted
//! axes. A point `v` in child coordinates maps to the parent as
//!
//! ```text
//! decenter first:  R·v + d
//! tilt first:      R·(v + d)
//! ```
//!
//! Negating every angle and the decenter and flipping `tilt_first` gives the
//! exact inverse, which is what [`TiltDecenter::invert`] (and `!`) returns.
//!
//! ## Configurations
//!
//! Every parameter is a [`PerConfig`] so that one transform can describe a
//! whole sweep of configurations at once. All parameters must broadcast to a
//! common configuration count.

use std::ops::Not;

use nalgebra::UnitQuaternion;
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Zip};

use super::frame::CoordinateSystem;
use super::vector::Vector3;
use crate::broadcast::{broadcast_len, PerConfig};
use crate::constants::DEG2RAD;
use crate::units::{Dimension, Quantity};
use crate::{RayfieldError, Result};

/// Tilt angles in radians about the local x, y and z axes
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tilt {
    pub x: PerConfig<f64>,
    pub y: PerConfig<f64>,
    pub z: PerConfig<f64>,
}

impl Tilt {
    /// Creates a constant tilt from angle quantities
    pub fn new(x: Quantity, y: Quantity, z: Quantity) -> Result<Self> {
        Ok(Tilt {
            x: x.require(Dimension::ANGLE)?.base_value().into(),
            y: y.require(Dimension::ANGLE)?.base_value().into(),
            z: z.require(Dimension::ANGLE)?.base_value().into(),
        })
    }

    pub fn degrees(x: f64, y: f64, z: f64) -> Self {
        Tilt {
            x: (x * DEG2RAD).into(),
            y: (y * DEG2RAD).into(),
            z: (z * DEG2RAD).into(),
        }
    }

    pub fn config_len(&self) -> Result<usize> {
        broadcast_len(&[self.x.len(), self.y.len(), self.z.len()])
    }

    /// Angles (a, b, c) for one configuration
    pub fn angles(&self, config: usize) -> Result<(f64, f64, f64)> {
        Ok((*self.x.get(config)?, *self.y.get(config)?, *self.z.get(config)?))
    }

    fn negate(&self) -> Tilt {
        Tilt {
            x: self.x.map(|v| -v),
            y: self.y.map(|v| -v),
            z: self.z.map(|v| -v),
        }
    }
}

/// Decenter offsets in millimeters along the local x, y and z axes
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Decenter {
    pub x: PerConfig<f64>,
    pub y: PerConfig<f64>,
    pub z: PerConfig<f64>,
}

impl Decenter {
    /// Creates a constant decenter from length quantities
    pub fn new(x: Quantity, y: Quantity, z: Quantity) -> Result<Self> {
        Ok(Decenter {
            x: x.require(Dimension::LENGTH)?.base_value().into(),
            y: y.require(Dimension::LENGTH)?.base_value().into(),
            z: z.require(Dimension::LENGTH)?.base_value().into(),
        })
    }

    pub fn mm(x: f64, y: f64, z: f64) -> Self {
        Decenter {
            x: x.into(),
            y: y.into(),
            z: z.into(),
        }
    }

    pub fn config_len(&self) -> Result<usize> {
        broadcast_len(&[self.x.len(), self.y.len(), self.z.len()])
    }

    pub fn offset(&self, config: usize) -> Result<nalgebra::Vector3<f64>> {
        Ok(nalgebra::Vector3::new(
            *self.x.get(config)?,
            *self.y.get(config)?,
            *self.z.get(config)?,
        ))
    }

    fn negate(&self) -> Decenter {
        Decenter {
            x: self.x.map(|v| -v),
            y: self.y.map(|v| -v),
            z: self.z.map(|v| -v),
        }
    }
}

/// Whether the tilt is applied before the decenter
#[derive(Debug, Clone, PartialEq)]
pub struct TiltFirst(pub PerConfig<bool>);

impl TiltFirst {
    pub fn new(value: bool) -> Self {
        TiltFirst(PerConfig::Constant(value))
    }

    pub fn get(&self, config: usize) -> Result<bool> {
        self.0.get(config).copied()
    }
}

impl Default for TiltFirst {
    fn default() -> Self {
        TiltFirst::new(false)
    }
}

impl From<bool> for TiltFirst {
    fn from(value: bool) -> Self {
        TiltFirst::new(value)
    }
}

/// Rigid transform of a child frame relative to its parent
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TiltDecenter {
    pub tilt: Tilt,
    pub decenter: Decenter,
    pub tilt_first: TiltFirst,
}

impl TiltDecenter {
    pub fn new(tilt: Tilt, decenter: Decenter, tilt_first: TiltFirst) -> Self {
        TiltDecenter {
            tilt,
            decenter,
            tilt_first,
        }
    }

    pub fn identity() -> Self {
        TiltDecenter::default()
    }

    pub fn from_tilt(tilt: Tilt) -> Self {
        TiltDecenter {
            tilt,
            ..Default::default()
        }
    }

    pub fn from_decenter(decenter: Decenter) -> Self {
        TiltDecenter {
            decenter,
            ..Default::default()
        }
    }

    /// Decenter-first transform reproducing the frame `cs`
    ///
    /// The rotation is decomposed as `Rx(a)·Ry(b)·Rz(c)`; the decenter is the
    /// full 3D origin of `cs`.
    pub fn from_coordinate_system(cs: &CoordinateSystem) -> Self {
        let m = cs.rotation().to_rotation_matrix();
        let m = m.matrix();

        let b = m[(0, 2)].clamp(-1.0, 1.0).asin();
        let a = (-m[(1, 2)]).atan2(m[(2, 2)]);
        let c = (-m[(0, 1)]).atan2(m[(0, 0)]);

        let origin = cs.translation();
        let d = origin.base();

        TiltDecenter {
            tilt: Tilt {
                x: a.into(),
                y: b.into(),
                z: c.into(),
            },
            decenter: Decenter::mm(d.x, d.y, d.z),
            tilt_first: TiltFirst::new(false),
        }
    }

    /// Number of configurations all parameters broadcast to
    pub fn config_len(&self) -> Result<usize> {
        broadcast_len(&[
            self.tilt.config_len()?,
            self.decenter.config_len()?,
            self.tilt_first.0.len(),
        ])
    }

    /// Combined rotation for one configuration
    pub fn rotation(&self, config: usize) -> Result<UnitQuaternion<f64>> {
        let (a, b, c) = self.tilt.angles(config)?;
        let rx = UnitQuaternion::from_axis_angle(&nalgebra::Vector3::x_axis(), a);
        let ry = UnitQuaternion::from_axis_angle(&nalgebra::Vector3::y_axis(), b);
        let rz = UnitQuaternion::from_axis_angle(&nalgebra::Vector3::z_axis(), c);

        Ok(if self.tilt_first.get(config)? {
            rz * ry * rx
        } else {
            rx * ry * rz
        })
    }

    /// Frame of the child expressed in the parent, for one configuration
    pub fn to_coordinate_system(&self, config: usize) -> Result<CoordinateSystem> {
        let r = self.rotation(config)?;
        let d = self.decenter.offset(config)?;
        let origin = if self.tilt_first.get(config)? { r * d } else { d };
        Ok(CoordinateSystem::from_base(origin, r))
    }

    /// Maps a child-frame vector into the parent frame
    ///
    /// Pass `decenter = false` for directions and normals, which only rotate.
    pub fn apply(&self, v: &Vector3, decenter: bool, config: usize) -> Result<Vector3> {
        let base = if decenter {
            v.require_length()?
        } else {
            *v.base()
        };
        let out = self.apply_base(&base, decenter, config)?;
        Ok(Vector3::from_base(out, v.dimension()))
    }

    fn apply_base(
        &self,
        v: &nalgebra::Vector3<f64>,
        decenter: bool,
        config: usize,
    ) -> Result<nalgebra::Vector3<f64>> {
        let r = self.rotation(config)?;
        if !decenter {
            return Ok(r * v);
        }
        let d = self.decenter.offset(config)?;
        Ok(if self.tilt_first.get(config)? {
            r * (v + d)
        } else {
            r * v + d
        })
    }

    /// Applies the transform to an array of vectors
    ///
    /// `values` has the configuration axis first and the xyz components last.
    /// A configuration axis of length one is broadcast against the
    /// transform's configurations (and vice versa).
    pub fn apply_array(&self, values: ArrayViewD<f64>, decenter: bool) -> Result<ArrayD<f64>> {
        let shape = values.shape();
        if shape.len() < 2 || shape[shape.len() - 1] != 3 {
            return Err(RayfieldError::ShapeMismatch(format!(
                "expected [configuration, ..., 3] vectors, got {:?}",
                shape
            )));
        }

        let configs = broadcast_len(&[shape[0], self.config_len()?])?;
        let mut out_shape = shape.to_vec();
        out_shape[0] = configs;

        let src = values.broadcast(IxDyn(&out_shape)).ok_or_else(|| {
            RayfieldError::ShapeMismatch(format!("cannot broadcast {:?} to {:?}", shape, out_shape))
        })?;
        let mut out = ArrayD::<f64>::zeros(IxDyn(&out_shape));
        let last = Axis(out_shape.len() - 2);

        for (config, (src, mut dst)) in src
            .axis_iter(Axis(0))
            .zip(out.axis_iter_mut(Axis(0)))
            .enumerate()
        {
            let r = self.rotation(config)?;
            let d = if decenter {
                self.decenter.offset(config)?
            } else {
                nalgebra::Vector3::zeros()
            };
            let tilt_first = self.tilt_first.get(config)?;

            Zip::from(src.lanes(last))
                .and(dst.lanes_mut(last))
                .for_each(|s, mut t| {
                    let v = nalgebra::Vector3::new(s[0], s[1], s[2]);
                    let w = if tilt_first { r * (v + d) } else { r * v + d };
                    t[0] = w.x;
                    t[1] = w.y;
                    t[2] = w.z;
                });
        }

        Ok(out)
    }

    /// Exact inverse transform
    pub fn invert(&self) -> TiltDecenter {
        TiltDecenter {
            tilt: self.tilt.negate(),
            decenter: self.decenter.negate(),
            tilt_first: TiltFirst(self.tilt_first.0.map(|v| !v)),
        }
    }
}

impl Not for &TiltDecenter {
    type Output = TiltDecenter;

    fn not(self) -> TiltDecenter {
        self.invert()
    }
}

impl Not for TiltDecenter {
    type Output = TiltDecenter;

    fn not(self) -> TiltDecenter {
        self.invert()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Unit;
    use approx::assert_relative_eq;
    use ndarray::Array;
    use rstest::rstest;
    use std::f64::consts::PI;

    fn sample(tilt_first: bool) -> TiltDecenter {
        TiltDecenter::new(
            Tilt::degrees(10.0, -25.0, 40.0),
            Decenter::mm(1.5, -2.0, 0.75),
            TiltFirst::new(tilt_first),
        )
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_invert_round_trip(#[case] tilt_first: bool) {
        let t = sample(tilt_first);
        let v = Vector3::new(3.0, 4.0, -5.0, Unit::Millimeter);

        let there = t.apply(&v, true, 0).unwrap();
        let back = (!&t).apply(&there, true, 0).unwrap();
        assert!(back.isclose_with(&v, 1e-12, 1e-12));

        let back = t.apply(&(!&t).apply(&v, true, 0).unwrap(), true, 0).unwrap();
        assert!(back.isclose_with(&v, 1e-12, 1e-12));
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_frame_inverse_matches_inverted_transform(#[case] tilt_first: bool) {
        let t = sample(tilt_first);
        let cs = t.to_coordinate_system(0).unwrap();
        let inv = t.invert().to_coordinate_system(0).unwrap();

        assert!(cs.compose(&inv).isclose(&CoordinateSystem::global()));
        assert!(inv.isclose(&cs.inverse()));

        let frame = CoordinateSystem::from_base(
            nalgebra::Vector3::new(0.0, 1.0, 2.0),
            UnitQuaternion::from_euler_angles(0.3, 0.2, 0.1),
        );
        assert!(frame.compose(&cs).compose(&inv).isclose(&frame));
    }

    #[test]
    fn test_axis_order_depends_on_tilt_first() {
        let tilt = Tilt::degrees(30.0, 45.0, 0.0);
        let a = TiltDecenter::new(tilt.clone(), Decenter::default(), false.into());
        let b = TiltDecenter::new(tilt, Decenter::default(), true.into());
        let ra = a.rotation(0).unwrap();
        let rb = b.rotation(0).unwrap();
        assert!(ra.angle_to(&rb) > 1e-3);
    }

    #[test]
    fn test_decenter_skipped_for_directions() {
        let t = TiltDecenter::from_decenter(Decenter::mm(5.0, 0.0, 0.0));
        let dir = Vector3::z_hat();
        assert_eq!(t.apply(&dir, false, 0).unwrap(), dir);

        let p = Vector3::new(0.0, 0.0, 1.0, Unit::Millimeter);
        assert_eq!(
            t.apply(&p, true, 0).unwrap(),
            Vector3::new(5.0, 0.0, 1.0, Unit::Millimeter)
        );
    }

    #[test]
    fn test_decenter_requires_length() {
        let t = TiltDecenter::from_decenter(Decenter::mm(1.0, 0.0, 0.0));
        assert!(t.apply(&Vector3::z_hat(), true, 0).is_err());
    }

    #[test]
    fn test_tilt_new_rejects_lengths() {
        assert!(Tilt::new(Quantity::mm(1.0), Quantity::deg(0.0), Quantity::deg(0.0)).is_err());
        let t = Tilt::new(Quantity::deg(90.0), Quantity::rad(0.0), Quantity::rad(0.0)).unwrap();
        assert_relative_eq!(*t.x.get(0).unwrap(), PI / 2.0);
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_from_coordinate_system(#[case] tilt_first: bool) {
        let cs = sample(tilt_first).to_coordinate_system(0).unwrap();
        let rebuilt = TiltDecenter::from_coordinate_system(&cs)
            .to_coordinate_system(0)
            .unwrap();
        assert!(rebuilt.isclose_with(&cs, 1e-12, 1e-12));
    }

    #[test]
    fn test_config_broadcast() {
        let mut t = TiltDecenter::identity();
        t.tilt.x = PerConfig::sweep(vec![0.0, 0.1, 0.2]).unwrap();
        t.decenter.y = PerConfig::sweep(vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(t.config_len().unwrap(), 3);

        t.decenter.z = PerConfig::sweep(vec![1.0, 2.0]).unwrap();
        assert!(matches!(t.config_len(), Err(RayfieldError::ShapeMismatch(_))));
    }

    #[test]
    fn test_apply_array_per_config() {
        let mut t = TiltDecenter::identity();
        t.decenter.x = PerConfig::sweep(vec![0.0, 10.0]).unwrap();

        // One configuration in, two out
        let values = Array::from_shape_vec(IxDyn(&[1, 2, 3]), vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0])
            .unwrap();
        let out = t.apply_array(values.view(), true).unwrap();
        assert_eq!(out.shape(), &[2, 2, 3]);
        assert_eq!(out[[0, 1, 0]], 1.0);
        assert_eq!(out[[1, 0, 0]], 10.0);
        assert_eq!(out[[1, 1, 0]], 11.0);

        let rotated = t.apply_array(values.view(), false).unwrap();
        assert_eq!(rotated[[1, 1, 0]], 1.0);
    }

    #[test]
    fn test_apply_array_rejects_bad_shape() {
        let t = TiltDecenter::identity();
        let values = ArrayD::<f64>::zeros(IxDyn(&[2, 4]));
        assert!(t.apply_array(values.view(), true).is_err());
    }
}
