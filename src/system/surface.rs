//! Surfaces and their kinds

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::aperture::Aperture;
use super::material::Material;
use crate::broadcast::{broadcast_len, PerConfig};
use crate::coordinates::TiltDecenter;
use crate::units::{Dimension, Quantity};
use crate::Result;

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of a surface, unique for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

impl SurfaceId {
    fn next() -> Self {
        SurfaceId(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Physical behavior of a surface
///
/// Radii are in millimeters; an infinite or zero radius is flat. Groove
/// densities are in lines per millimeter and the variable line spacing
/// coefficients in lines/mm², /mm³ and /mm⁴, with the density evaluated as
/// `g(x) = g0 + g1·x + g2·x² + g3·x³` along the local x axis.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceKind {
    /// Where rays are launched; only valid as the first surface
    Object,
    /// Pure change of frame with no physical interaction
    CoordinateBreak,
    Standard {
        radius: f64,
        conic: f64,
        material: Material,
        aperture: Option<Aperture>,
    },
    /// Conic profile in y-z swept around an axis parallel to y
    Toroidal {
        radius: f64,
        conic: f64,
        radius_of_rotation: f64,
        material: Material,
        aperture: Option<Aperture>,
    },
    DiffractionGrating {
        radius: f64,
        conic: f64,
        material: Material,
        aperture: Option<Aperture>,
        groove_density: f64,
        diffraction_order: i32,
    },
    VariableLineSpaceGrating {
        radius: f64,
        conic: f64,
        material: Material,
        aperture: Option<Aperture>,
        groove_density: f64,
        diffraction_order: i32,
        coeff_linear: f64,
        coeff_quadratic: f64,
        coeff_cubic: f64,
    },
}

impl SurfaceKind {
    /// Flat, vacuum-filled, unbounded surface
    pub fn flat() -> Self {
        SurfaceKind::Standard {
            radius: f64::INFINITY,
            conic: 0.0,
            material: Material::Vacuum,
            aperture: None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SurfaceKind::Object => "object",
            SurfaceKind::CoordinateBreak => "coordinate break",
            SurfaceKind::Standard { .. } => "standard",
            SurfaceKind::Toroidal { .. } => "toroidal",
            SurfaceKind::DiffractionGrating { .. } => "diffraction grating",
            SurfaceKind::VariableLineSpaceGrating { .. } => "variable line space grating",
        }
    }

    pub fn material(&self) -> Option<&Material> {
        match self {
            SurfaceKind::Object | SurfaceKind::CoordinateBreak => None,
            SurfaceKind::Standard { material, .. }
            | SurfaceKind::Toroidal { material, .. }
            | SurfaceKind::DiffractionGrating { material, .. }
            | SurfaceKind::VariableLineSpaceGrating { material, .. } => Some(material),
        }
    }

    pub fn aperture(&self) -> Option<&Aperture> {
        match self {
            SurfaceKind::Object | SurfaceKind::CoordinateBreak => None,
            SurfaceKind::Standard { aperture, .. }
            | SurfaceKind::Toroidal { aperture, .. }
            | SurfaceKind::DiffractionGrating { aperture, .. }
            | SurfaceKind::VariableLineSpaceGrating { aperture, .. } => aperture.as_ref(),
        }
    }

    /// Groove density (lines/mm) at local x, zero for non-gratings
    pub fn groove_density_at(&self, x: f64) -> f64 {
        match self {
            SurfaceKind::DiffractionGrating { groove_density, .. } => *groove_density,
            SurfaceKind::VariableLineSpaceGrating {
                groove_density,
                coeff_linear,
                coeff_quadratic,
                coeff_cubic,
                ..
            } => {
                let x2 = x * x;
                groove_density + coeff_linear * x + coeff_quadratic * x2 + coeff_cubic * x * x2
            }
            _ => 0.0,
        }
    }

    pub fn diffraction_order(&self) -> i32 {
        match self {
            SurfaceKind::DiffractionGrating {
                diffraction_order, ..
            }
            | SurfaceKind::VariableLineSpaceGrating {
                diffraction_order, ..
            } => *diffraction_order,
            _ => 0,
        }
    }
}

/// One optical surface
///
/// A surface on its own is unlinked: its frames only exist once a
/// [`System`](super::System) holds it. Cloning assigns a fresh id.
#[derive(Debug, PartialEq)]
pub struct Surface {
    id: SurfaceId,
    pub name: String,
    pub comment: String,
    /// Distance to the next surface along the local z axis, in millimeters
    pub thickness: PerConfig<f64>,
    /// Transform into this surface's frame from the previous surface's
    pub pre: TiltDecenter,
    /// Transform applied after the surface, before the thickness
    pub post: TiltDecenter,
    pub(crate) is_stop: bool,
    pub is_active: bool,
    pub is_visible: bool,
    /// Name of the component this surface belongs to
    pub component: Option<String>,
    pub kind: SurfaceKind,
}

impl Clone for Surface {
    fn clone(&self) -> Self {
        Surface {
            id: SurfaceId::next(),
            name: self.name.clone(),
            comment: self.comment.clone(),
            thickness: self.thickness.clone(),
            pre: self.pre.clone(),
            post: self.post.clone(),
            is_stop: self.is_stop,
            is_active: self.is_active,
            is_visible: self.is_visible,
            component: self.component.clone(),
            kind: self.kind.clone(),
        }
    }
}

impl Surface {
    pub fn new(name: impl Into<String>, kind: SurfaceKind) -> Self {
        Surface {
            id: SurfaceId::next(),
            name: name.into(),
            comment: String::new(),
            thickness: PerConfig::Constant(0.0),
            pre: TiltDecenter::identity(),
            post: TiltDecenter::identity(),
            is_stop: false,
            is_active: true,
            is_visible: true,
            component: None,
            kind,
        }
    }

    /// Flat standard surface
    pub fn standard(name: impl Into<String>) -> Self {
        Surface::new(name, SurfaceKind::flat())
    }

    /// Coordinate break moving the following surfaces by `transform`
    pub fn coordinate_break(name: impl Into<String>, transform: TiltDecenter) -> Self {
        Surface::new(name, SurfaceKind::CoordinateBreak).with_pre(transform)
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn is_stop(&self) -> bool {
        self.is_stop
    }

    /// Sets a constant thickness; fails unless `thickness` is a length
    pub fn set_thickness(&mut self, thickness: Quantity) -> Result<()> {
        let t = thickness.require(Dimension::LENGTH)?;
        self.thickness = PerConfig::Constant(t.base_value());
        Ok(())
    }

    /// Sets one thickness per configuration
    pub fn set_thickness_sweep(&mut self, thickness: &[Quantity]) -> Result<()> {
        let values = thickness
            .iter()
            .map(|t| t.require(Dimension::LENGTH).map(|t| t.base_value()))
            .collect::<Result<Vec<f64>>>()?;
        self.thickness = PerConfig::sweep(values)?;
        Ok(())
    }

    pub fn with_thickness(mut self, thickness: Quantity) -> Result<Self> {
        self.set_thickness(thickness)?;
        Ok(self)
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_pre(mut self, pre: TiltDecenter) -> Self {
        self.pre = pre;
        self
    }

    pub fn with_post(mut self, post: TiltDecenter) -> Self {
        self.post = post;
        self
    }

    /// Requests that this surface become the stop once inserted
    pub fn with_stop(mut self, is_stop: bool) -> Self {
        self.is_stop = is_stop;
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Thickness of one configuration, in millimeters
    pub fn thickness_mm(&self, config: usize) -> Result<f64> {
        self.thickness.get(config).copied()
    }

    /// Number of configurations the surface parameters broadcast to
    pub fn config_len(&self) -> Result<usize> {
        broadcast_len(&[
            self.thickness.len(),
            self.pre.config_len()?,
            self.post.config_len()?,
        ])
    }
}
