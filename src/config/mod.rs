//! JSON descriptions of optical systems
//!
//! A [`SystemConfig`] is the serialized form of a [`System`]. Physical
//! values are written with their unit, `{ "value": 10.0, "unit": "mm" }`,
//! and checked against the expected dimension when the system is built.
//!
//! ```json
//! {
//!   "name": "fold",
//!   "entrance_pupil_radius": { "value": 10, "unit": "mm" },
//!   "fields": [{ "x": { "value": 0, "unit": "deg" }, "y": { "value": 0.5, "unit": "deg" } }],
//!   "wavelengths": [{ "value": { "value": 550, "unit": "nm" } }],
//!   "surfaces": [
//!     {
//!       "name": "mirror",
//!       "type": "standard",
//!       "material": { "type": "mirror" },
//!       "pre": { "tilt": { "x": 45, "unit": "deg" } },
//!       "thickness": { "value": -50, "unit": "mm" }
//!     }
//!   ]
//! }
//! ```
//!
//! Surfaces are inserted in order between the stop and image sentinels.

use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::broadcast::PerConfig;
use crate::coordinates::{Decenter, Tilt, TiltDecenter, TiltFirst};
use crate::system::{Aperture, Field, Material, Surface, SurfaceKind, System, Wavelength};
use crate::units::{Dimension, Quantity, QuantitySpec, Unit};
use crate::{RayfieldError, Result};

fn default_weight() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_order() -> i32 {
    1
}

fn default_angle_unit() -> Unit {
    Unit::Degree
}

fn default_length_unit() -> Unit {
    Unit::Millimeter
}

/// Converts an optional radius to millimeters, `None` meaning flat
fn radius_mm(radius: &Option<QuantitySpec>) -> Result<f64> {
    match radius {
        Some(r) => Ok(Quantity::from(*r).require(Dimension::LENGTH)?.base_value()),
        None => Ok(f64::INFINITY),
    }
}

/// Scales every value of `values` from `unit` to base units
fn scaled(values: &PerConfig<f64>, unit: Unit) -> PerConfig<f64> {
    let scale = unit.scale();
    values.map(|v| v * scale)
}

fn check_unit(unit: Unit, expected: Dimension) -> Result<()> {
    if unit.dimension() != expected {
        return Err(RayfieldError::DimensionMismatch {
            expected,
            found: unit.dimension(),
        });
    }
    Ok(())
}

/// Tilt angles, degrees unless another angle unit is given
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TiltSpec {
    #[serde(default)]
    pub x: PerConfig<f64>,
    #[serde(default)]
    pub y: PerConfig<f64>,
    #[serde(default)]
    pub z: PerConfig<f64>,
    #[serde(default = "default_angle_unit")]
    pub unit: Unit,
}

/// Decenter offsets, millimeters unless another length unit is given
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecenterSpec {
    #[serde(default)]
    pub x: PerConfig<f64>,
    #[serde(default)]
    pub y: PerConfig<f64>,
    #[serde(default)]
    pub z: PerConfig<f64>,
    #[serde(default = "default_length_unit")]
    pub unit: Unit,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TiltDecenterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tilt: Option<TiltSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decenter: Option<DecenterSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tilt_first: Option<PerConfig<bool>>,
}

impl TiltDecenterConfig {
    pub fn build(&self) -> Result<TiltDecenter> {
        let tilt = match &self.tilt {
            Some(t) => {
                check_unit(t.unit, Dimension::ANGLE)?;
                Tilt {
                    x: scaled(&t.x, t.unit),
                    y: scaled(&t.y, t.unit),
                    z: scaled(&t.z, t.unit),
                }
            }
            None => Tilt::default(),
        };
        let decenter = match &self.decenter {
            Some(d) => {
                check_unit(d.unit, Dimension::LENGTH)?;
                Decenter {
                    x: scaled(&d.x, d.unit),
                    y: scaled(&d.y, d.unit),
                    z: scaled(&d.z, d.unit),
                }
            }
            None => Decenter::default(),
        };
        let tilt_first = self
            .tilt_first
            .clone()
            .map(TiltFirst)
            .unwrap_or_default();

        let transform = TiltDecenter::new(tilt, decenter, tilt_first);
        // Parameters must broadcast to one configuration count
        transform.config_len()?;
        Ok(transform)
    }
}

/// Physical kind of a configured surface, tagged by `"type"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KindConfig {
    CoordinateBreak,
    Standard {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        radius: Option<QuantitySpec>,
        #[serde(default)]
        conic: f64,
        #[serde(default)]
        material: Material,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        aperture: Option<Aperture>,
    },
    Toroidal {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        radius: Option<QuantitySpec>,
        #[serde(default)]
        conic: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        radius_of_rotation: Option<QuantitySpec>,
        #[serde(default)]
        material: Material,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        aperture: Option<Aperture>,
    },
    DiffractionGrating {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        radius: Option<QuantitySpec>,
        #[serde(default)]
        conic: f64,
        #[serde(default)]
        material: Material,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        aperture: Option<Aperture>,
        groove_density: QuantitySpec,
        #[serde(default = "default_order")]
        diffraction_order: i32,
    },
    /// Coefficients are plain lines/mm², /mm³ and /mm⁴
    VariableLineSpaceGrating {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        radius: Option<QuantitySpec>,
        #[serde(default)]
        conic: f64,
        #[serde(default)]
        material: Material,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        aperture: Option<Aperture>,
        groove_density: QuantitySpec,
        #[serde(default = "default_order")]
        diffraction_order: i32,
        #[serde(default)]
        coeff_linear: f64,
        #[serde(default)]
        coeff_quadratic: f64,
        #[serde(default)]
        coeff_cubic: f64,
    },
}

impl KindConfig {
    pub fn build(&self) -> Result<SurfaceKind> {
        let groove = |g: &QuantitySpec| -> Result<f64> {
            Ok(Quantity::from(*g)
                .require(Dimension::INVERSE_LENGTH)?
                .base_value())
        };

        Ok(match self {
            KindConfig::CoordinateBreak => SurfaceKind::CoordinateBreak,
            KindConfig::Standard {
                radius,
                conic,
                material,
                aperture,
            } => SurfaceKind::Standard {
                radius: radius_mm(radius)?,
                conic: *conic,
                material: *material,
                aperture: aperture.clone(),
            },
            KindConfig::Toroidal {
                radius,
                conic,
                radius_of_rotation,
                material,
                aperture,
            } => SurfaceKind::Toroidal {
                radius: radius_mm(radius)?,
                conic: *conic,
                radius_of_rotation: radius_mm(radius_of_rotation)?,
                material: *material,
                aperture: aperture.clone(),
            },
            KindConfig::DiffractionGrating {
                radius,
                conic,
                material,
                aperture,
                groove_density,
                diffraction_order,
            } => SurfaceKind::DiffractionGrating {
                radius: radius_mm(radius)?,
                conic: *conic,
                material: *material,
                aperture: aperture.clone(),
                groove_density: groove(groove_density)?,
                diffraction_order: *diffraction_order,
            },
            KindConfig::VariableLineSpaceGrating {
                radius,
                conic,
                material,
                aperture,
                groove_density,
                diffraction_order,
                coeff_linear,
                coeff_quadratic,
                coeff_cubic,
            } => SurfaceKind::VariableLineSpaceGrating {
                radius: radius_mm(radius)?,
                conic: *conic,
                material: *material,
                aperture: aperture.clone(),
                groove_density: groove(groove_density)?,
                diffraction_order: *diffraction_order,
                coeff_linear: *coeff_linear,
                coeff_quadratic: *coeff_quadratic,
                coeff_cubic: *coeff_cubic,
            },
        })
    }
}

/// One surface of a [`SystemConfig`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceConfig {
    pub name: String,
    #[serde(default)]
    pub comment: String,
    /// A single thickness or one per configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thickness: Option<PerConfig<QuantitySpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre: Option<TiltDecenterConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<TiltDecenterConfig>,
    #[serde(default)]
    pub stop: bool,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(flatten)]
    pub kind: KindConfig,
}

impl SurfaceConfig {
    pub fn build(&self) -> Result<Surface> {
        let mut surface = Surface::new(self.name.clone(), self.kind.build()?)
            .with_comment(self.comment.clone())
            .with_stop(self.stop);
        surface.is_active = self.active;
        surface.component = self.component.clone();

        match &self.thickness {
            Some(PerConfig::Constant(t)) => surface.set_thickness((*t).into())?,
            Some(PerConfig::Sweep(ts)) => {
                let ts: Vec<Quantity> = ts.iter().map(|&t| t.into()).collect();
                surface.set_thickness_sweep(&ts)?;
            }
            None => {}
        }
        if let Some(pre) = &self.pre {
            surface.pre = pre.build()?;
        }
        if let Some(post) = &self.post {
            surface.post = post.build()?;
        }
        surface.config_len()?;
        Ok(surface)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub x: QuantitySpec,
    pub y: QuantitySpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WavelengthConfig {
    pub value: QuantitySpec,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// Serialized description of a whole system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub name: String,
    #[serde(default)]
    pub comment: String,
    /// Distance from the object to the stop sentinel; infinite when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_distance: Option<QuantitySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrance_pupil_radius: Option<QuantitySpec>,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub wavelengths: Vec<WavelengthConfig>,
    pub surfaces: Vec<SurfaceConfig>,
    /// Replaces the default flat image surface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<SurfaceConfig>,
}

impl SystemConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SystemConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks constraints serde cannot express
    pub fn validate(&self) -> Result<()> {
        let stops = self
            .surfaces
            .iter()
            .chain(self.image.iter())
            .filter(|s| s.stop)
            .count();
        if stops > 1 {
            return Err(RayfieldError::ConfigError(format!(
                "system '{}' flags {} surfaces as the stop",
                self.name, stops
            )));
        }
        if let Some(r) = self.entrance_pupil_radius {
            let r = Quantity::from(r).require(Dimension::LENGTH)?;
            if r.base_value() < 0.0 {
                return Err(RayfieldError::ConfigError(format!(
                    "entrance pupil radius must not be negative, got {}",
                    r
                )));
            }
        }
        if let Some(s) = self.surfaces.iter().find(|s| s.name.is_empty()) {
            return Err(RayfieldError::ConfigError(format!(
                "surface of type {:?} has no name",
                s.kind
            )));
        }
        Ok(())
    }

    pub fn build(&self) -> Result<System> {
        self.validate()?;

        let mut system = System::new(self.name.clone());
        system.comment = self.comment.clone();

        if let Some(d) = self.object_distance {
            system.modify(0, |object| object.set_thickness(d.into()))?;
        }
        if let Some(r) = self.entrance_pupil_radius {
            system.entrance_pupil_radius = Quantity::from(r).base_value();
        }
        system.fields = self
            .fields
            .iter()
            .map(|f| Field::new(f.x.into(), f.y.into()))
            .collect::<Result<Vec<Field>>>()?;
        system.wavelengths = self
            .wavelengths
            .iter()
            .map(|w| Wavelength::new(w.value.into()).map(|wl| wl.with_weight(w.weight)))
            .collect::<Result<Vec<Wavelength>>>()?;

        for surface in &self.surfaces {
            system.insert(surface.build()?, -1)?;
        }
        if let Some(image) = &self.image {
            system.remove(-1)?;
            system.append(image.build()?)?;
        }
        system.config_len()?;

        info!(
            "built system '{}' with {} surfaces",
            system.name,
            system.len()
        );
        Ok(system)
    }
}
