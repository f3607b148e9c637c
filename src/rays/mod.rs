//! # Ray Bundles
//!
//! A `Rays` value is a structure of arrays describing many rays at once.
//! Every per-ray field lives on the same seven-axis grid:
//!
//! ```text
//! [configuration, surface, wavelength, field_y, field_x, pupil_y, pupil_x]
//! ```
//!
//! Vector fields (position, direction, polarization, surface normal) carry one
//! extra trailing axis of length 3 holding the x, y, z components. On
//! construction every field is broadcast to the full grid shape and stored
//! materialized, so propagation code can index any field with the same grid
//! index.
//!
//! Lengths are stored in millimeters and wavelengths too. Directions,
//! polarizations and normals are dimensionless unit vectors.
//!
//! A ray is valid when both `vignetted_mask` (it passed every aperture) and
//! `error_mask` (it hit every surface and refracted/diffracted without
//! failure) are true; see [`Rays::mask`].

mod histogram;

use ndarray::{concatenate, ArrayD, ArrayViewD, Axis, IxDyn, Zip};

pub use histogram::PupilHistogram;

use crate::broadcast::{broadcast_len, broadcast_shapes};
use crate::coordinates::{TiltDecenter, Vector3};
use crate::units::{Dimension, Quantity};
use crate::{RayfieldError, Result};

/// Number of grid axes shared by every ray field
pub const GRID_NDIM: usize = 7;

/// Index of the component axis of vector fields
pub const COMPONENT_AXIS: usize = GRID_NDIM;

/// Semantic axes of the ray grid, in storage order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridAxis {
    Configuration,
    Surface,
    Wavelength,
    FieldY,
    FieldX,
    PupilY,
    PupilX,
}

impl GridAxis {
    pub const ALL: [GridAxis; GRID_NDIM] = [
        GridAxis::Configuration,
        GridAxis::Surface,
        GridAxis::Wavelength,
        GridAxis::FieldY,
        GridAxis::FieldX,
        GridAxis::PupilY,
        GridAxis::PupilX,
    ];

    /// Position of this axis in the grid shape
    pub fn index(self) -> usize {
        match self {
            GridAxis::Configuration => 0,
            GridAxis::Surface => 1,
            GridAxis::Wavelength => 2,
            GridAxis::FieldY => 3,
            GridAxis::FieldX => 4,
            GridAxis::PupilY => 5,
            GridAxis::PupilX => 6,
        }
    }

    pub fn axis(self) -> Axis {
        Axis(self.index())
    }

    pub fn name(self) -> &'static str {
        match self {
            GridAxis::Configuration => "configuration",
            GridAxis::Surface => "surface",
            GridAxis::Wavelength => "wavelength",
            GridAxis::FieldY => "field_y",
            GridAxis::FieldX => "field_x",
            GridAxis::PupilY => "pupil_y",
            GridAxis::PupilX => "pupil_x",
        }
    }
}

/// Optional field values for [`Rays::new`]
///
/// Any field left as `None` takes its default: zero wavelength and position,
/// direction and surface normal along +z, polarization along +x, index of
/// refraction 1 and every ray valid. Supplied arrays may have any shape that
/// broadcasts to the common grid; vector fields must end in an axis of
/// length 3.
#[derive(Debug, Clone, Default)]
pub struct RaysInit {
    pub wavelength: Option<ArrayD<f64>>,
    pub position: Option<ArrayD<f64>>,
    pub direction: Option<ArrayD<f64>>,
    pub polarization: Option<ArrayD<f64>>,
    pub surface_normal: Option<ArrayD<f64>>,
    pub index_of_refraction: Option<ArrayD<f64>>,
    pub vignetted_mask: Option<ArrayD<bool>>,
    pub error_mask: Option<ArrayD<bool>>,
}

/// Mean value of the quantity sampled along each semantic grid axis
#[derive(Debug, Clone, PartialEq)]
pub struct SparseGrid {
    pub wavelength: ndarray::Array1<f64>,
    pub field_x: ndarray::Array1<f64>,
    pub field_y: ndarray::Array1<f64>,
    pub pupil_x: ndarray::Array1<f64>,
    pub pupil_y: ndarray::Array1<f64>,
}

/// A vectorized bundle of rays
#[derive(Debug, Clone, PartialEq)]
pub struct Rays {
    pub(crate) wavelength: ArrayD<f64>,
    pub(crate) position: ArrayD<f64>,
    pub(crate) direction: ArrayD<f64>,
    pub(crate) polarization: ArrayD<f64>,
    pub(crate) surface_normal: ArrayD<f64>,
    pub(crate) index_of_refraction: ArrayD<f64>,
    pub(crate) vignetted_mask: ArrayD<bool>,
    pub(crate) error_mask: ArrayD<bool>,
}

fn vector_grid(shape: &[usize], name: &str) -> Result<Vec<usize>> {
    match shape.split_last() {
        Some((3, grid)) => Ok(grid.to_vec()),
        _ => Err(RayfieldError::ShapeMismatch(format!(
            "{} must end in an axis of length 3, got {:?}",
            name, shape
        ))),
    }
}

fn with_components(grid: &[usize]) -> Vec<usize> {
    let mut shape = grid.to_vec();
    shape.push(3);
    shape
}

fn broadcast_to<T: Clone>(a: &ArrayD<T>, shape: &[usize], name: &str) -> Result<ArrayD<T>> {
    a.broadcast(IxDyn(shape))
        .map(|v| v.to_owned())
        .ok_or_else(|| {
            RayfieldError::ShapeMismatch(format!(
                "{} of shape {:?} cannot be broadcast to {:?}",
                name,
                a.shape(),
                shape
            ))
        })
}

fn materialize<T: Clone>(
    field: Option<ArrayD<T>>,
    shape: &[usize],
    name: &str,
    default: impl FnOnce() -> ArrayD<T>,
) -> Result<ArrayD<T>> {
    match field {
        None => Ok(default()),
        Some(a) if a.shape() == shape => Ok(a),
        Some(a) => broadcast_to(&a, shape, name),
    }
}

fn axis_vector(grid: &[usize], component: usize) -> ArrayD<f64> {
    let mut a = ArrayD::<f64>::zeros(IxDyn(&with_components(grid)));
    a.index_axis_mut(Axis(COMPONENT_AXIS), component).fill(1.0);
    a
}

/// Right-aligns a shape into the seven grid axes
fn pad_grid(shape: &[usize]) -> Result<Vec<usize>> {
    if shape.len() > GRID_NDIM {
        return Err(RayfieldError::ShapeMismatch(format!(
            "ray grids have at most {} axes, got {:?}",
            GRID_NDIM, shape
        )));
    }
    let mut grid = vec![1; GRID_NDIM - shape.len()];
    grid.extend_from_slice(shape);
    Ok(grid)
}

fn check_quantities(values: &[Quantity], dimension: Dimension) -> Result<Vec<f64>> {
    values
        .iter()
        .map(|q| q.require(dimension).map(|q| q.base_value()))
        .collect()
}

/// Mean of `a` over every axis except `keep`
fn mean_keep_axis(a: ArrayViewD<f64>, keep: usize) -> ndarray::Array1<f64> {
    (0..a.shape()[keep])
        .map(|k| a.index_axis(Axis(keep), k).mean().unwrap_or(f64::NAN))
        .collect()
}

impl Rays {
    /// Builds a bundle, broadcasting every supplied field to a common grid
    pub fn new(init: RaysInit) -> Result<Rays> {
        let mut shapes: Vec<Vec<usize>> = Vec::new();
        if let Some(a) = &init.wavelength {
            shapes.push(a.shape().to_vec());
        }
        if let Some(a) = &init.index_of_refraction {
            shapes.push(a.shape().to_vec());
        }
        if let Some(a) = &init.vignetted_mask {
            shapes.push(a.shape().to_vec());
        }
        if let Some(a) = &init.error_mask {
            shapes.push(a.shape().to_vec());
        }
        for (field, name) in [
            (&init.position, "position"),
            (&init.direction, "direction"),
            (&init.polarization, "polarization"),
            (&init.surface_normal, "surface_normal"),
        ] {
            if let Some(a) = field {
                shapes.push(vector_grid(a.shape(), name)?);
            }
        }

        let refs: Vec<&[usize]> = shapes.iter().map(|s| s.as_slice()).collect();
        let grid = pad_grid(&broadcast_shapes(&refs)?)?;
        let vgrid = with_components(&grid);

        Ok(Rays {
            wavelength: materialize(init.wavelength, &grid, "wavelength", || {
                ArrayD::zeros(IxDyn(&grid))
            })?,
            position: materialize(init.position, &vgrid, "position", || {
                ArrayD::zeros(IxDyn(&vgrid))
            })?,
            direction: materialize(init.direction, &vgrid, "direction", || axis_vector(&grid, 2))?,
            polarization: materialize(init.polarization, &vgrid, "polarization", || {
                axis_vector(&grid, 0)
            })?,
            surface_normal: materialize(init.surface_normal, &vgrid, "surface_normal", || {
                axis_vector(&grid, 2)
            })?,
            index_of_refraction: materialize(
                init.index_of_refraction,
                &grid,
                "index_of_refraction",
                || ArrayD::ones(IxDyn(&grid)),
            )?,
            vignetted_mask: materialize(init.vignetted_mask, &grid, "vignetted_mask", || {
                ArrayD::from_elem(IxDyn(&grid), true)
            })?,
            error_mask: materialize(init.error_mask, &grid, "error_mask", || {
                ArrayD::from_elem(IxDyn(&grid), true)
            })?,
        })
    }

    /// A bundle of default rays
    ///
    /// `shape` is right-aligned into the grid axes, so `&[3, 3]` yields a
    /// 3×3 pupil grid.
    pub fn zeros(shape: &[usize]) -> Result<Rays> {
        let grid = pad_grid(shape)?;
        Rays::new(RaysInit {
            wavelength: Some(ArrayD::zeros(IxDyn(&grid))),
            ..Default::default()
        })
    }

    /// Launches rays over a grid of wavelengths, field angles and pupil
    /// positions
    ///
    /// Each ray starts at `start_position`, offset by its pupil coordinates
    /// when pupil grids are given, and travels along +z rotated by `field_x`
    /// toward +x and then by `field_y` toward +y:
    ///
    /// ```text
    /// d = (sin fx, cos fx · sin fy, cos fx · cos fy)
    /// ```
    ///
    /// `mask_fn(field_x, field_y)` seeds the vignetting mask.
    pub fn from_field_angles<F>(
        wavelengths: &[Quantity],
        start_position: &Vector3,
        field_x: &[Quantity],
        field_y: &[Quantity],
        mask_fn: F,
        pupil_x: Option<&[Quantity]>,
        pupil_y: Option<&[Quantity]>,
    ) -> Result<Rays>
    where
        F: Fn(Quantity, Quantity) -> bool,
    {
        let wavelengths = check_quantities(wavelengths, Dimension::LENGTH)?;
        let fx = check_quantities(field_x, Dimension::ANGLE)?;
        let fy = check_quantities(field_y, Dimension::ANGLE)?;
        let px = check_quantities(pupil_x.unwrap_or(&[]), Dimension::LENGTH)?;
        let py = check_quantities(pupil_y.unwrap_or(&[]), Dimension::LENGTH)?;
        let start = start_position.require_length()?;

        if wavelengths.is_empty() || fx.is_empty() || fy.is_empty() {
            return Err(RayfieldError::InvalidInput(
                "wavelength and field grids must not be empty".to_string(),
            ));
        }

        let px = if px.is_empty() { vec![0.0] } else { px };
        let py = if py.is_empty() { vec![0.0] } else { py };

        let grid = vec![1, 1, wavelengths.len(), fy.len(), fx.len(), py.len(), px.len()];
        let vgrid = with_components(&grid);

        let wavelength = ArrayD::from_shape_fn(IxDyn(&grid), |i| wavelengths[i[2]]);
        let position = ArrayD::from_shape_fn(IxDyn(&vgrid), |i| match i[COMPONENT_AXIS] {
            0 => start.x + px[i[6]],
            1 => start.y + py[i[5]],
            _ => start.z,
        });
        let direction = ArrayD::from_shape_fn(IxDyn(&vgrid), |i| {
            let (ax, ay) = (fx[i[4]], fy[i[3]]);
            match i[COMPONENT_AXIS] {
                0 => ax.sin(),
                1 => ax.cos() * ay.sin(),
                _ => ax.cos() * ay.cos(),
            }
        });
        let vignetted_mask = ArrayD::from_shape_fn(IxDyn(&grid), |i| {
            mask_fn(Quantity::rad(fx[i[4]]), Quantity::rad(fy[i[3]]))
        });

        Rays::new(RaysInit {
            wavelength: Some(wavelength),
            position: Some(position),
            direction: Some(direction),
            vignetted_mask: Some(vignetted_mask),
            ..Default::default()
        })
    }

    pub fn grid_shape(&self) -> &[usize] {
        self.wavelength.shape()
    }

    pub fn num_configurations(&self) -> usize {
        self.grid_shape()[GridAxis::Configuration.index()]
    }

    pub fn num_surfaces(&self) -> usize {
        self.grid_shape()[GridAxis::Surface.index()]
    }

    /// Wavelength in millimeters
    pub fn wavelength(&self) -> &ArrayD<f64> {
        &self.wavelength
    }

    /// Position in millimeters
    pub fn position(&self) -> &ArrayD<f64> {
        &self.position
    }

    pub fn direction(&self) -> &ArrayD<f64> {
        &self.direction
    }

    pub fn polarization(&self) -> &ArrayD<f64> {
        &self.polarization
    }

    pub fn surface_normal(&self) -> &ArrayD<f64> {
        &self.surface_normal
    }

    pub fn index_of_refraction(&self) -> &ArrayD<f64> {
        &self.index_of_refraction
    }

    pub fn vignetted_mask(&self) -> &ArrayD<bool> {
        &self.vignetted_mask
    }

    pub fn error_mask(&self) -> &ArrayD<bool> {
        &self.error_mask
    }

    /// Rays that passed every aperture and hit every surface
    pub fn mask(&self) -> ArrayD<bool> {
        Zip::from(&self.vignetted_mask)
            .and(&self.error_mask)
            .map_collect(|&v, &e| v && e)
    }

    /// Position relative to the mean over the pupil axes
    pub fn relative_position(&self) -> Result<ArrayD<f64>> {
        let empty = || RayfieldError::ShapeMismatch("empty pupil grid".to_string());
        let mean = self
            .position
            .mean_axis(GridAxis::PupilX.axis())
            .ok_or_else(empty)?
            .mean_axis(GridAxis::PupilY.axis())
            .ok_or_else(empty)?
            .insert_axis(GridAxis::PupilY.axis())
            .insert_axis(GridAxis::PupilX.axis());
        Ok(&self.position - &mean)
    }

    /// Copy of the bundle with the configuration axis broadcast to `configs`
    pub(crate) fn broadcast_configurations(&self, configs: usize) -> Result<Rays> {
        if configs == self.num_configurations() {
            return Ok(self.clone());
        }
        let mut grid = self.grid_shape().to_vec();
        grid[0] = configs;
        let vgrid = with_components(&grid);

        Ok(Rays {
            wavelength: broadcast_to(&self.wavelength, &grid, "wavelength")?,
            position: broadcast_to(&self.position, &vgrid, "position")?,
            direction: broadcast_to(&self.direction, &vgrid, "direction")?,
            polarization: broadcast_to(&self.polarization, &vgrid, "polarization")?,
            surface_normal: broadcast_to(&self.surface_normal, &vgrid, "surface_normal")?,
            index_of_refraction: broadcast_to(&self.index_of_refraction, &grid, "index_of_refraction")?,
            vignetted_mask: broadcast_to(&self.vignetted_mask, &grid, "vignetted_mask")?,
            error_mask: broadcast_to(&self.error_mask, &grid, "error_mask")?,
        })
    }

    /// A new bundle moved through `transform`
    ///
    /// Positions are fully transformed; directions and surface normals are
    /// only rotated. Configuration `i` of the bundle uses configuration `i`
    /// of the transform.
    pub fn tilt_decenter(&self, transform: &TiltDecenter) -> Result<Rays> {
        let configs = broadcast_len(&[self.num_configurations(), transform.config_len()?])?;
        let mut rays = self.broadcast_configurations(configs)?;
        rays.position = transform.apply_array(rays.position.view(), true)?;
        rays.direction = transform.apply_array(rays.direction.view(), false)?;
        rays.surface_normal = transform.apply_array(rays.surface_normal.view(), false)?;
        Ok(rays)
    }

    /// Mean of the sampled quantity along one grid axis of a configuration
    ///
    /// Wavelength axis: the wavelength. Field axes: the x/y direction
    /// components. Pupil axes: the x/y position relative to the pupil mean.
    pub fn mean_sparse_axis(&self, config: usize, axis: GridAxis) -> Result<ndarray::Array1<f64>> {
        if config >= self.num_configurations() {
            return Err(RayfieldError::InvalidInput(format!(
                "configuration {} requested from a bundle of {}",
                config,
                self.num_configurations()
            )));
        }

        let component = |a: &ArrayD<f64>, c: usize| {
            a.index_axis(Axis(0), config)
                .index_axis(Axis(COMPONENT_AXIS - 1), c)
                .to_owned()
        };

        let grid = match axis {
            GridAxis::Configuration | GridAxis::Surface => {
                return Err(RayfieldError::UnsupportedAxis(axis.name().to_string()))
            }
            GridAxis::Wavelength => self.wavelength.index_axis(Axis(0), config).to_owned(),
            GridAxis::FieldX => component(&self.direction, 0),
            GridAxis::FieldY => component(&self.direction, 1),
            GridAxis::PupilX => component(&self.relative_position()?, 0),
            GridAxis::PupilY => component(&self.relative_position()?, 1),
        };

        // Axis index once the configuration axis is removed
        let keep = axis.index() - 1;
        Ok(mean_keep_axis(grid.view(), keep))
    }

    /// [`Rays::mean_sparse_axis`] for every supported axis
    pub fn mean_sparse_grid(&self, config: usize) -> Result<SparseGrid> {
        Ok(SparseGrid {
            wavelength: self.mean_sparse_axis(config, GridAxis::Wavelength)?,
            field_x: self.mean_sparse_axis(config, GridAxis::FieldX)?,
            field_y: self.mean_sparse_axis(config, GridAxis::FieldY)?,
            pupil_x: self.mean_sparse_axis(config, GridAxis::PupilX)?,
            pupil_y: self.mean_sparse_axis(config, GridAxis::PupilY)?,
        })
    }

    /// Concatenates bundles along the surface axis
    pub fn stack_surfaces(bundles: &[Rays]) -> Result<Rays> {
        if bundles.is_empty() {
            return Err(RayfieldError::InvalidInput(
                "cannot stack an empty list of ray bundles".to_string(),
            ));
        }

        let axis = GridAxis::Surface.axis();
        let cat_f = |get: fn(&Rays) -> &ArrayD<f64>| -> Result<ArrayD<f64>> {
            let views: Vec<ArrayViewD<f64>> = bundles.iter().map(|r| get(r).view()).collect();
            concatenate(axis, &views).map_err(|e| RayfieldError::ShapeMismatch(e.to_string()))
        };
        let cat_b = |get: fn(&Rays) -> &ArrayD<bool>| -> Result<ArrayD<bool>> {
            let views: Vec<ArrayViewD<bool>> = bundles.iter().map(|r| get(r).view()).collect();
            concatenate(axis, &views).map_err(|e| RayfieldError::ShapeMismatch(e.to_string()))
        };

        Ok(Rays {
            wavelength: cat_f(Rays::wavelength)?,
            position: cat_f(Rays::position)?,
            direction: cat_f(Rays::direction)?,
            polarization: cat_f(Rays::polarization)?,
            surface_normal: cat_f(Rays::surface_normal)?,
            index_of_refraction: cat_f(Rays::index_of_refraction)?,
            vignetted_mask: cat_b(Rays::vignetted_mask)?,
            error_mask: cat_b(Rays::error_mask)?,
        })
    }

    /// Subtracts `thickness[config]` from the z position of each configuration
    pub(crate) fn translate_z(&mut self, thickness: impl Fn(usize) -> Result<f64>) -> Result<()> {
        for (config, mut position) in self.position.axis_iter_mut(Axis(0)).enumerate() {
            let t = thickness(config)?;
            position
                .index_axis_mut(Axis(COMPONENT_AXIS - 1), 2)
                .mapv_inplace(|z| z - t);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::PerConfig;
    use crate::coordinates::{Decenter, Tilt, TiltFirst};
    use crate::units::Unit;
    use approx::assert_relative_eq;
    use ndarray::Array;

    fn degrees(values: &[f64]) -> Vec<Quantity> {
        values.iter().map(|&v| Quantity::deg(v)).collect()
    }

    fn millimeters(values: &[f64]) -> Vec<Quantity> {
        values.iter().map(|&v| Quantity::mm(v)).collect()
    }

    fn sample_bundle() -> Rays {
        Rays::from_field_angles(
            &[Quantity::nm(500.0), Quantity::nm(600.0)],
            &Vector3::new(0.0, 0.0, 0.0, Unit::Millimeter),
            &degrees(&[-1.0, 0.0, 1.0]),
            &degrees(&[-0.5, 0.5]),
            |_, _| true,
            Some(millimeters(&[-1.0, 0.0, 1.0]).as_slice()),
            Some(millimeters(&[-2.0, 2.0]).as_slice()),
        )
        .unwrap()
    }

    #[test]
    fn test_zeros_defaults() {
        let rays = Rays::zeros(&[2, 3]).unwrap();
        assert_eq!(rays.grid_shape(), &[1, 1, 1, 1, 1, 2, 3]);
        assert_eq!(rays.position().shape(), &[1, 1, 1, 1, 1, 2, 3, 3]);

        let d = rays.direction().index_axis(Axis(COMPONENT_AXIS), 2);
        assert!(d.iter().all(|&v| v == 1.0));
        let p = rays.polarization().index_axis(Axis(COMPONENT_AXIS), 0);
        assert!(p.iter().all(|&v| v == 1.0));
        let n = rays.surface_normal().index_axis(Axis(COMPONENT_AXIS), 2);
        assert!(n.iter().all(|&v| v == 1.0));
        // Each default field is its own array
        let py = rays.polarization().index_axis(Axis(COMPONENT_AXIS), 2);
        assert!(py.iter().all(|&v| v == 0.0));

        assert!(rays.index_of_refraction().iter().all(|&v| v == 1.0));
        assert!(rays.mask().iter().all(|&m| m));
    }

    #[test]
    fn test_zeros_rejects_too_many_axes() {
        assert!(Rays::zeros(&[1; 8]).is_err());
    }

    #[test]
    fn test_new_broadcasts_fields() {
        let wavelength = Array::from_shape_vec(IxDyn(&[2, 1]), vec![1e-4, 2e-4]).unwrap();
        let position = ArrayD::<f64>::zeros(IxDyn(&[1, 4, 3]));
        let rays = Rays::new(RaysInit {
            wavelength: Some(wavelength),
            position: Some(position),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(rays.grid_shape(), &[1, 1, 1, 1, 1, 2, 4]);
        assert_eq!(rays.wavelength()[&[0, 0, 0, 0, 0, 1, 3][..]], 2e-4);
    }

    #[test]
    fn test_new_rejects_incompatible_fields() {
        let result = Rays::new(RaysInit {
            wavelength: Some(ArrayD::zeros(IxDyn(&[2]))),
            index_of_refraction: Some(ArrayD::ones(IxDyn(&[3]))),
            ..Default::default()
        });
        assert!(matches!(result, Err(RayfieldError::ShapeMismatch(_))));

        let result = Rays::new(RaysInit {
            direction: Some(ArrayD::zeros(IxDyn(&[2, 2]))),
            ..Default::default()
        });
        assert!(matches!(result, Err(RayfieldError::ShapeMismatch(_))));
    }

    #[test]
    fn test_from_field_angles_directions() {
        let rays = sample_bundle();
        assert_eq!(rays.grid_shape(), &[1, 1, 2, 2, 3, 2, 3]);

        // field_x = 1 deg, field_y = 0.5 deg
        let fx = 1.0_f64.to_radians();
        let fy = 0.5_f64.to_radians();
        let d = rays.direction();
        assert_relative_eq!(d[&[0, 0, 0, 1, 2, 0, 0, 0][..]], fx.sin());
        assert_relative_eq!(d[&[0, 0, 0, 1, 2, 0, 0, 1][..]], fx.cos() * fy.sin());
        assert_relative_eq!(d[&[0, 0, 0, 1, 2, 0, 0, 2][..]], fx.cos() * fy.cos());

        // Pupil offsets land on the start position
        let p = rays.position();
        assert_eq!(p[&[0, 0, 0, 0, 0, 1, 2, 0][..]], 1.0);
        assert_eq!(p[&[0, 0, 0, 0, 0, 1, 2, 1][..]], 2.0);
        assert_relative_eq!(rays.wavelength()[&[0, 0, 1, 0, 0, 0, 0][..]], 6e-4, max_relative = 1e-12);
    }

    #[test]
    fn test_from_field_angles_mask_fn() {
        let rays = Rays::from_field_angles(
            &[Quantity::nm(500.0)],
            &Vector3::zeros(Dimension::LENGTH),
            &degrees(&[-1.0, 0.0, 1.0]),
            &degrees(&[0.0]),
            |fx, _| fx.base_value() >= 0.0,
            None,
            None,
        )
        .unwrap();
        let mask: Vec<bool> = rays.mask().iter().copied().collect();
        assert_eq!(mask, vec![false, true, true]);
    }

    #[test]
    fn test_from_field_angles_checks_units() {
        let result = Rays::from_field_angles(
            &[Quantity::deg(1.0)],
            &Vector3::zeros(Dimension::LENGTH),
            &degrees(&[0.0]),
            &degrees(&[0.0]),
            |_, _| true,
            None,
            None,
        );
        assert!(matches!(result, Err(RayfieldError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_tilt_decenter_round_trip() {
        let rays = sample_bundle();
        let transform = TiltDecenter::new(
            Tilt::degrees(12.0, -7.0, 30.0),
            Decenter::mm(1.0, -3.0, 2.5),
            TiltFirst::new(false),
        );
        let back = rays
            .tilt_decenter(&transform)
            .unwrap()
            .tilt_decenter(&!&transform)
            .unwrap();

        for (a, b) in back.position().iter().zip(rays.position().iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12, max_relative = 1e-12);
        }
        for (a, b) in back.direction().iter().zip(rays.direction().iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_tilt_decenter_broadcasts_configurations() {
        let rays = Rays::zeros(&[1]).unwrap();
        let mut transform = TiltDecenter::identity();
        transform.decenter.x = PerConfig::sweep(vec![0.0, 5.0, 10.0]).unwrap();

        let moved = rays.tilt_decenter(&transform).unwrap();
        assert_eq!(moved.num_configurations(), 3);
        assert_eq!(moved.position()[&[2, 0, 0, 0, 0, 0, 0, 0][..]], 10.0);
        // Directions are not decentered
        assert_eq!(moved.direction()[&[2, 0, 0, 0, 0, 0, 0, 0][..]], 0.0);
        assert_eq!(moved.mask().len(), 3);
    }

    #[test]
    fn test_relative_position() {
        let rays = sample_bundle();
        let rel = rays.relative_position().unwrap();
        // pupil_x grid is centred on zero, pupil_y is +-2
        assert_relative_eq!(rel[&[0, 0, 0, 0, 0, 0, 0, 0][..]], -1.0, max_relative = 1e-12);
        assert_relative_eq!(rel[&[0, 0, 0, 0, 0, 1, 0, 1][..]], 2.0, max_relative = 1e-12);
    }

    #[test]
    fn test_mean_sparse_grid() {
        let rays = sample_bundle();
        let grid = rays.mean_sparse_grid(0).unwrap();

        assert_eq!(grid.wavelength.len(), 2);
        assert_relative_eq!(grid.wavelength[1], 6e-4, max_relative = 1e-12);
        assert_relative_eq!(grid.field_x[2], 1.0_f64.to_radians().sin(), max_relative = 1e-12);
        assert_relative_eq!(grid.field_x[1], 0.0, epsilon = 1e-15);
        assert_relative_eq!(grid.pupil_x[0], -1.0, max_relative = 1e-12);
        assert_relative_eq!(grid.pupil_y[1], 2.0, max_relative = 1e-12);
    }

    #[test]
    fn test_mean_sparse_axis_unsupported() {
        let rays = sample_bundle();
        assert!(matches!(
            rays.mean_sparse_axis(0, GridAxis::Surface),
            Err(RayfieldError::UnsupportedAxis(_))
        ));
        assert!(matches!(
            rays.mean_sparse_axis(0, GridAxis::Configuration),
            Err(RayfieldError::UnsupportedAxis(_))
        ));
        assert!(rays.mean_sparse_axis(4, GridAxis::Wavelength).is_err());
    }

    #[test]
    fn test_stack_surfaces() {
        let a = Rays::zeros(&[2]).unwrap();
        let b = Rays::zeros(&[2]).unwrap();
        let stacked = Rays::stack_surfaces(&[a, b]).unwrap();
        assert_eq!(stacked.num_surfaces(), 2);
        assert_eq!(stacked.grid_shape(), &[1, 2, 1, 1, 1, 1, 2]);
        assert!(Rays::stack_surfaces(&[]).is_err());
    }

    #[test]
    fn test_translate_z() {
        let mut rays = Rays::zeros(&[1]).unwrap();
        rays.translate_z(|_| Ok(4.0)).unwrap();
        assert_eq!(rays.position()[&[0, 0, 0, 0, 0, 0, 0, 2][..]], -4.0);
    }
}
