//! Ray propagation across a single surface
//!
//! Rays arrive expressed in the outgoing frame of the previous surface. Each
//! step moves them into this surface's frame with `~pre`, lets the surface
//! act on them, then moves them on with `~post` and the thickness so they
//! leave in the frame the next surface expects.
//!
//! ## Interaction law
//!
//! Refraction, reflection and diffraction share the vector grating equation.
//! With incoming direction `d`, surface normal `n`, incoming index `n1`,
//! outgoing index `n2`, order `m`, wavelength `λ` and groove vector
//! `G = g(x)·x̂`:
//!
//! ```text
//! a   = n1·d − m·λ·G
//! a_t = a − (a·n)·n
//! d'  = (a_t ± sqrt(n2² − |a_t|²)·n) / n2
//! ```
//!
//! The sign keeps the ray on the far side of the surface for transmission
//! and turns it back for mirrors. A negative discriminant is total internal
//! reflection or an evanescent order, and the ray is flagged as an error.

use nalgebra::Vector3;
use ndarray::{Axis, Zip};

use super::surface::{Surface, SurfaceKind};
use crate::broadcast::broadcast_len;
use crate::constants::{SAG_MAX_ITERATIONS, SAG_TOLERANCE_MM};
use crate::rays::{Rays, COMPONENT_AXIS};
use crate::{RayfieldError, Result};

/// Geometry of a surface in its own frame
pub trait SurfaceShape {
    /// Height of the surface above the local x-y plane at (x, y)
    fn sag(&self, x: f64, y: f64) -> f64;

    /// Unit normal at (x, y), oriented toward +z
    fn normal(&self, x: f64, y: f64) -> Vector3<f64>;

    /// Distance along `d` from `p` to the surface, if the ray hits it
    fn intersect(&self, p: &Vector3<f64>, d: &Vector3<f64>) -> Option<f64> {
        newton_intersect(self, p, d)
    }
}

/// Newton iteration on `p_z + t·d_z − sag(p_x + t·d_x, p_y + t·d_y) = 0`,
/// starting from the local x-y plane
pub fn newton_intersect<S: SurfaceShape + ?Sized>(
    shape: &S,
    p: &Vector3<f64>,
    d: &Vector3<f64>,
) -> Option<f64> {
    let mut t = if d.z != 0.0 { -p.z / d.z } else { 0.0 };

    for _ in 0..SAG_MAX_ITERATIONS {
        let q = p + d * t;
        let f = q.z - shape.sag(q.x, q.y);
        let n = shape.normal(q.x, q.y);
        if !f.is_finite() || n.z == 0.0 {
            return None;
        }
        // n ∝ (−∂s/∂x, −∂s/∂y, 1)
        let df = d.z + (n.x * d.x + n.y * d.y) / n.z;
        if df == 0.0 {
            return None;
        }
        let step = f / df;
        t -= step;
        if step.abs() < SAG_TOLERANCE_MM {
            return t.is_finite().then_some(t);
        }
    }
    None
}

fn curvature(radius: f64) -> f64 {
    if radius.is_finite() && radius != 0.0 {
        1.0 / radius
    } else {
        0.0
    }
}

fn conic_sag(c: f64, k: f64, r2: f64) -> f64 {
    c * r2 / (1.0 + (1.0 - (1.0 + k) * c * c * r2).sqrt())
}

/// Slope of the conic sag along the radius, divided by the radius
fn conic_slope(c: f64, k: f64, r2: f64) -> f64 {
    c / (1.0 - (1.0 + k) * c * c * r2).sqrt()
}

fn normal_from_slopes(sx: f64, sy: f64) -> Vector3<f64> {
    Vector3::new(-sx, -sy, 1.0).normalize()
}

/// Closed-form intersection with `c(x² + y² + (1+k)z²) − 2z = 0`
///
/// Picks the root on the vertex branch; for a flat surface this reduces to
/// `t = −p_z / d_z`.
fn conic_intersect(c: f64, k: f64, p: &Vector3<f64>, d: &Vector3<f64>) -> Option<f64> {
    let k1 = 1.0 + k;
    let a = c * (d.x * d.x + d.y * d.y + k1 * d.z * d.z);
    let b = 2.0 * (c * (p.x * d.x + p.y * d.y + k1 * p.z * d.z) - d.z);
    let cc = c * (p.x * p.x + p.y * p.y + k1 * p.z * p.z) - 2.0 * p.z;

    let disc = b * b - 4.0 * a * cc;
    if disc < 0.0 {
        return None;
    }
    let sign = if b < 0.0 { -1.0 } else { 1.0 };
    let denom = -b - sign * disc.sqrt();
    if denom == 0.0 {
        return None;
    }
    let t = 2.0 * cc / denom;
    t.is_finite().then_some(t)
}

impl SurfaceShape for SurfaceKind {
    fn sag(&self, x: f64, y: f64) -> f64 {
        match self {
            SurfaceKind::Object | SurfaceKind::CoordinateBreak => 0.0,
            SurfaceKind::Standard { radius, conic, .. }
            | SurfaceKind::DiffractionGrating { radius, conic, .. }
            | SurfaceKind::VariableLineSpaceGrating { radius, conic, .. } => {
                conic_sag(curvature(*radius), *conic, x * x + y * y)
            }
            SurfaceKind::Toroidal {
                radius,
                conic,
                radius_of_rotation,
                ..
            } => {
                let zy = conic_sag(curvature(*radius), *conic, y * y);
                if !radius_of_rotation.is_finite() {
                    return zy;
                }
                let u = radius_of_rotation - zy;
                radius_of_rotation - u.signum() * (u * u - x * x).sqrt()
            }
        }
    }

    fn normal(&self, x: f64, y: f64) -> Vector3<f64> {
        match self {
            SurfaceKind::Object | SurfaceKind::CoordinateBreak => Vector3::z(),
            SurfaceKind::Standard { radius, conic, .. }
            | SurfaceKind::DiffractionGrating { radius, conic, .. }
            | SurfaceKind::VariableLineSpaceGrating { radius, conic, .. } => {
                let s = conic_slope(curvature(*radius), *conic, x * x + y * y);
                normal_from_slopes(s * x, s * y)
            }
            SurfaceKind::Toroidal {
                radius,
                conic,
                radius_of_rotation,
                ..
            } => {
                let c = curvature(*radius);
                let dzy = conic_slope(c, *conic, y * y) * y;
                if !radius_of_rotation.is_finite() {
                    return normal_from_slopes(0.0, dzy);
                }
                let u = radius_of_rotation - conic_sag(c, *conic, y * y);
                let w = (u * u - x * x).sqrt();
                normal_from_slopes(u.signum() * x / w, u.abs() * dzy / w)
            }
        }
    }

    fn intersect(&self, p: &Vector3<f64>, d: &Vector3<f64>) -> Option<f64> {
        match self {
            SurfaceKind::Object | SurfaceKind::CoordinateBreak => conic_intersect(0.0, 0.0, p, d),
            SurfaceKind::Standard { radius, conic, .. }
            | SurfaceKind::DiffractionGrating { radius, conic, .. }
            | SurfaceKind::VariableLineSpaceGrating { radius, conic, .. } => {
                conic_intersect(curvature(*radius), *conic, p, d)
            }
            SurfaceKind::Toroidal { .. } => newton_intersect(self, p, d),
        }
    }
}

/// State of one ray after it meets a surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interaction {
    pub position: Vector3<f64>,
    pub direction: Vector3<f64>,
    pub normal: Vector3<f64>,
    pub index: f64,
}

impl SurfaceKind {
    /// Intersects one ray with the surface and bends it
    ///
    /// Positions and wavelength are in millimeters. `None` when the ray
    /// misses, or no propagating outgoing direction exists.
    pub fn interact(
        &self,
        position: &Vector3<f64>,
        direction: &Vector3<f64>,
        index: f64,
        wavelength: f64,
    ) -> Option<Interaction> {
        let t = self.intersect(position, direction)?;
        let hit = position + direction * t;
        let normal = self.normal(hit.x, hit.y);
        if !normal.iter().all(|v| v.is_finite()) {
            return None;
        }

        let material = match self.material() {
            Some(material) => *material,
            None => {
                return Some(Interaction {
                    position: hit,
                    direction: *direction,
                    normal,
                    index,
                })
            }
        };
        let n2 = material.outgoing_index(index);

        let groove = Vector3::x() * self.groove_density_at(hit.x);
        let a = direction * index - groove * (self.diffraction_order() as f64 * wavelength);
        let a_t = a - normal * a.dot(&normal);

        let disc = n2 * n2 - a_t.norm_squared();
        if disc < 0.0 {
            return None;
        }
        let side = direction.dot(&normal).signum();
        let sign = if material.is_mirror() { -side } else { side };
        let out = (a_t + normal * (sign * disc.sqrt())) / n2;

        Some(Interaction {
            position: hit,
            direction: out,
            normal,
            index: n2,
        })
    }
}

impl Surface {
    /// Advances `rays` across this surface
    ///
    /// `is_first` skips the incoming `~pre` transform (rays are launched in
    /// the first surface's frame) and `is_final` skips the outgoing `~post`
    /// and thickness, leaving rays in this surface's frame.
    ///
    /// # Errors
    ///
    /// [`RayfieldError::InvalidPlacement`] for an object surface that is not
    /// first or is final, and shape errors when the configuration counts of
    /// the bundle and the surface do not broadcast.
    pub fn propagate_rays(&self, rays: &Rays, is_first: bool, is_final: bool) -> Result<Rays> {
        let rays = self.trace_local(rays, is_first, is_final)?;
        if is_final {
            Ok(rays)
        } else {
            self.depart(rays)
        }
    }

    /// Moves rays into this surface's frame and lets the surface act on them
    ///
    /// Inactive surfaces only contribute their frame change.
    pub(crate) fn trace_local(&self, rays: &Rays, is_first: bool, is_final: bool) -> Result<Rays> {
        if let SurfaceKind::Object = self.kind {
            if !is_first {
                return Err(RayfieldError::InvalidPlacement(format!(
                    "object surface '{}' must be the first surface",
                    self.name
                )));
            }
            if is_final {
                return Err(RayfieldError::InvalidPlacement(format!(
                    "object surface '{}' cannot be the final surface",
                    self.name
                )));
            }
        }

        let configs = broadcast_len(&[rays.num_configurations(), self.config_len()?])?;
        let mut rays = rays.broadcast_configurations(configs)?;

        if !is_first {
            rays = rays.tilt_decenter(&!&self.pre)?;
        }

        if self.is_active && self.kind.material().is_some() {
            self.interact_rays(&mut rays);
        }

        log::debug!(
            "traced {} rays to {} surface '{}'",
            rays.error_mask.len(),
            self.kind.name(),
            self.name
        );
        Ok(rays)
    }

    /// Carries rays from this surface's frame into the next surface's
    /// incoming frame
    pub(crate) fn depart(&self, rays: Rays) -> Result<Rays> {
        let mut rays = rays.tilt_decenter(&!&self.post)?;
        rays.translate_z(|config| {
            let t = self.thickness_mm(config)?;
            Ok(if t.is_finite() { t } else { 0.0 })
        })?;
        Ok(rays)
    }

    fn interact_rays(&self, rays: &mut Rays) {
        let ax = Axis(COMPONENT_AXIS);
        let mut lost = 0usize;

        Zip::from(rays.position.lanes_mut(ax))
            .and(rays.direction.lanes_mut(ax))
            .and(rays.surface_normal.lanes_mut(ax))
            .and(&mut rays.index_of_refraction)
            .and(&rays.wavelength)
            .and(&mut rays.error_mask)
            .for_each(|mut p, mut d, mut n, index, &wavelength, ok| {
                if !*ok {
                    return;
                }
                let position = Vector3::new(p[0], p[1], p[2]);
                let direction = Vector3::new(d[0], d[1], d[2]);
                match self.kind.interact(&position, &direction, *index, wavelength) {
                    Some(hit) => {
                        for i in 0..3 {
                            p[i] = hit.position[i];
                            d[i] = hit.direction[i];
                            n[i] = hit.normal[i];
                        }
                        *index = hit.index;
                    }
                    None => {
                        *ok = false;
                        lost += 1;
                    }
                }
            });

        if lost > 0 {
            log::warn!("{} rays failed to propagate through '{}'", lost, self.name);
        }

        if let Some(aperture) = self.kind.aperture() {
            Zip::from(rays.position.lanes(ax))
                .and(&rays.error_mask)
                .and(&mut rays.vignetted_mask)
                .for_each(|p, &ok, passes| {
                    if ok {
                        *passes &= aperture.is_unvignetted(p[0], p[1]);
                    }
                });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinates::{Tilt, TiltDecenter};
    use crate::system::{Aperture, Material};
    use crate::units::Quantity;
    use approx::assert_relative_eq;

    fn spherical(radius: f64, material: Material) -> SurfaceKind {
        SurfaceKind::Standard {
            radius,
            conic: 0.0,
            material,
            aperture: None,
        }
    }

    #[test]
    fn test_conic_sag_sphere() {
        let kind = spherical(100.0, Material::Mirror);
        let r: f64 = 10.0;
        let expected = 100.0 - (100.0 * 100.0 - r * r).sqrt();
        assert_relative_eq!(kind.sag(r, 0.0), expected, max_relative = 1e-12);
        assert_relative_eq!(kind.sag(6.0, 8.0), expected, max_relative = 1e-12);
    }

    #[test]
    fn test_flat_normal() {
        let kind = SurfaceKind::flat();
        assert_eq!(kind.sag(3.0, -2.0), 0.0);
        assert_eq!(kind.normal(3.0, -2.0), Vector3::z());
    }

    #[test]
    fn test_sphere_normal_points_at_center() {
        let kind = spherical(50.0, Material::Mirror);
        let (x, y) = (3.0, 4.0);
        let z = kind.sag(x, y);
        let to_center = (Vector3::new(0.0, 0.0, 50.0) - Vector3::new(x, y, z)).normalize();
        let n = kind.normal(x, y);
        assert_relative_eq!(n.dot(&to_center), 1.0, max_relative = 1e-12);
    }

    #[test]
    fn test_conic_intersection_matches_newton() {
        let kind = SurfaceKind::Standard {
            radius: -80.0,
            conic: -0.5,
            material: Material::Mirror,
            aperture: None,
        };
        let p = Vector3::new(2.0, -1.0, -30.0);
        let d = Vector3::new(0.05, 0.02, 1.0).normalize();
        let closed = kind.intersect(&p, &d).unwrap();
        let newton = newton_intersect(&kind, &p, &d).unwrap();
        assert_relative_eq!(closed, newton, max_relative = 1e-9);

        let q = p + d * closed;
        assert_relative_eq!(q.z, kind.sag(q.x, q.y), epsilon = 1e-9);
    }

    #[test]
    fn test_toroid_reduces_to_cylinder() {
        let kind = SurfaceKind::Toroidal {
            radius: 40.0,
            conic: 0.0,
            radius_of_rotation: f64::INFINITY,
            material: Material::Mirror,
            aperture: None,
        };
        // Flat along x, curved along y
        assert_eq!(kind.sag(5.0, 0.0), 0.0);
        assert_relative_eq!(kind.sag(0.0, 4.0), 40.0 - (1600.0_f64 - 16.0).sqrt(), max_relative = 1e-12);
    }

    #[test]
    fn test_toroid_with_equal_radii_is_sphere() {
        let torus = SurfaceKind::Toroidal {
            radius: 60.0,
            conic: 0.0,
            radius_of_rotation: 60.0,
            material: Material::Mirror,
            aperture: None,
        };
        let sphere = spherical(60.0, Material::Mirror);
        assert_relative_eq!(torus.sag(3.0, 4.0), sphere.sag(3.0, 4.0), max_relative = 1e-12);
        let nt = torus.normal(3.0, 4.0);
        let ns = sphere.normal(3.0, 4.0);
        assert_relative_eq!(nt.dot(&ns), 1.0, max_relative = 1e-12);

        let p = Vector3::new(1.0, 2.0, -10.0);
        let d = Vector3::new(0.0, 0.0, 1.0);
        let t = torus.intersect(&p, &d).unwrap();
        assert_relative_eq!(t, 10.0 + sphere.sag(1.0, 2.0), max_relative = 1e-9);
    }

    #[test]
    fn test_flat_mirror_reflects() {
        let kind = SurfaceKind::Standard {
            radius: f64::INFINITY,
            conic: 0.0,
            material: Material::Mirror,
            aperture: None,
        };
        let d = Vector3::new(0.6, 0.0, 0.8);
        let hit = kind
            .interact(&Vector3::new(0.0, 0.0, -1.0), &d, 1.0, 5e-4)
            .unwrap();
        assert_relative_eq!(hit.direction.x, 0.6, max_relative = 1e-12);
        assert_relative_eq!(hit.direction.z, -0.8, max_relative = 1e-12);
        assert_relative_eq!(hit.position.z, 0.0);
        assert_relative_eq!(hit.position.x, 0.75, max_relative = 1e-12);
    }

    #[test]
    fn test_snell_refraction() {
        let kind = spherical(f64::INFINITY, Material::Refractive { index: 1.5 });
        let theta: f64 = 30.0_f64.to_radians();
        let d = Vector3::new(theta.sin(), 0.0, theta.cos());
        let hit = kind.interact(&Vector3::zeros(), &d, 1.0, 5e-4).unwrap();
        assert_relative_eq!(hit.direction.x, theta.sin() / 1.5, max_relative = 1e-12);
        assert!(hit.direction.z > 0.0);
        assert_relative_eq!(hit.direction.norm(), 1.0, max_relative = 1e-12);
        assert_eq!(hit.index, 1.5);
    }

    #[test]
    fn test_total_internal_reflection_is_lost() {
        let kind = spherical(f64::INFINITY, Material::Vacuum);
        let theta: f64 = 60.0_f64.to_radians();
        let d = Vector3::new(theta.sin(), 0.0, theta.cos());
        assert!(kind.interact(&Vector3::zeros(), &d, 1.5, 5e-4).is_none());
    }

    #[test]
    fn test_grating_equation() {
        // 600 lines/mm, first order, 500 nm, normal incidence, reflective
        let kind = SurfaceKind::DiffractionGrating {
            radius: f64::INFINITY,
            conic: 0.0,
            material: Material::Mirror,
            aperture: None,
            groove_density: 600.0,
            diffraction_order: 1,
        };
        let wavelength = 500e-6;
        let hit = kind
            .interact(&Vector3::zeros(), &Vector3::z(), 1.0, wavelength)
            .unwrap();
        assert_relative_eq!(hit.direction.x, -0.3, max_relative = 1e-12);
        assert!(hit.direction.z < 0.0);
        assert_relative_eq!(hit.direction.norm(), 1.0, max_relative = 1e-12);
    }

    #[test]
    fn test_evanescent_order_is_lost() {
        let kind = SurfaceKind::DiffractionGrating {
            radius: f64::INFINITY,
            conic: 0.0,
            material: Material::Mirror,
            aperture: None,
            groove_density: 3000.0,
            diffraction_order: 1,
        };
        assert!(kind
            .interact(&Vector3::zeros(), &Vector3::z(), 1.0, 500e-6)
            .is_none());
    }

    #[test]
    fn test_object_placement_errors() {
        let object = Surface::new("Object", SurfaceKind::Object);
        let rays = Rays::zeros(&[1]).unwrap();
        assert!(matches!(
            object.propagate_rays(&rays, false, false),
            Err(RayfieldError::InvalidPlacement(_))
        ));
        assert!(matches!(
            object.propagate_rays(&rays, true, true),
            Err(RayfieldError::InvalidPlacement(_))
        ));
        assert!(object.propagate_rays(&rays, true, false).is_ok());
    }

    #[test]
    fn test_infinite_object_thickness_is_skipped() {
        let mut object = Surface::new("Object", SurfaceKind::Object);
        object.thickness = f64::INFINITY.into();
        let rays = Rays::zeros(&[1]).unwrap();
        let out = object.propagate_rays(&rays, true, false).unwrap();
        assert_eq!(out.position(), rays.position());

        object.set_thickness(Quantity::mm(5.0)).unwrap();
        let out = object.propagate_rays(&rays, true, false).unwrap();
        assert_eq!(out.position()[&[0, 0, 0, 0, 0, 0, 0, 2][..]], -5.0);
    }

    #[test]
    fn test_coordinate_break_moves_frame() {
        let cb = Surface::coordinate_break(
            "fold",
            TiltDecenter::from_tilt(Tilt::degrees(0.0, 90.0, 0.0)),
        );
        let rays = Rays::zeros(&[1]).unwrap();
        let out = cb.propagate_rays(&rays, false, true).unwrap();
        // Undoing a 90 degree tilt about y turns +z into -x
        let d = out.direction();
        assert_relative_eq!(d[&[0, 0, 0, 0, 0, 0, 0, 0][..]], -1.0, epsilon = 1e-12);
        assert_relative_eq!(d[&[0, 0, 0, 0, 0, 0, 0, 2][..]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_aperture_vignettes() {
        let surface = Surface::new(
            "stop",
            SurfaceKind::Standard {
                radius: f64::INFINITY,
                conic: 0.0,
                material: Material::Vacuum,
                aperture: Some(Aperture::circular(1.5)),
            },
        );
        let mut position = ndarray::ArrayD::<f64>::zeros(ndarray::IxDyn(&[3, 3]));
        for (i, x) in [0.0, 1.0, 2.0].iter().enumerate() {
            position[[i, 0]] = *x;
        }
        let rays = Rays::new(crate::rays::RaysInit {
            position: Some(position),
            ..Default::default()
        })
        .unwrap();
        let out = surface.propagate_rays(&rays, false, true).unwrap();
        let mask: Vec<bool> = out.mask().iter().copied().collect();
        assert_eq!(mask, vec![true, true, false]);
        assert!(out.error_mask().iter().all(|&m| m));
    }
}
