//! # Optical Systems
//!
//! A [`System`] is an ordered chain of [`Surface`]s. Every chain starts life
//! with three sentinel surfaces:
//!
//! - the object, at infinite thickness, where rays are launched
//! - the stop, which limits the pupil
//! - the image
//!
//! Exactly one surface carries the stop flag at any time.
//!
//! ## Frames
//!
//! Each surface sees three frames, all expressed in the global frame:
//!
//! ```text
//! input(k) = back(k - 1)                (global for the first surface)
//! front(k) = input(k) ∘ pre(k)
//! back(k)  = front(k) ∘ post(k) + thickness(k) along the local z axis
//! ```
//!
//! Frames are derived from the chain, never stored on surfaces. They are
//! resolved lazily for every configuration at once and dropped by every
//! mutation.

mod aperture;
mod material;
mod propagate;
mod surface;

use log::{debug, info};
use ndarray::Array1;
use once_cell::sync::OnceCell;
use serde::Serialize;

pub use aperture::{Aperture, ApertureShape};
pub use material::Material;
pub use propagate::{newton_intersect, Interaction, SurfaceShape};
pub use surface::{Surface, SurfaceId, SurfaceKind};

use crate::broadcast::broadcast_len;
use crate::constants::{IMAGE_NAME, OBJECT_NAME, RAD2DEG, STOP_NAME};
use crate::coordinates::{CoordinateSystem, TiltDecenter, Vector3};
use crate::rays::{Rays, COMPONENT_AXIS};
use crate::roots::{find_root, SecantOptions};
use crate::units::{Dimension, Quantity, Unit};
use crate::{RayfieldError, Result};

/// A field angle, in radians
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Field {
    pub x: f64,
    pub y: f64,
}

impl Field {
    pub fn new(x: Quantity, y: Quantity) -> Result<Self> {
        Ok(Field {
            x: x.require(Dimension::ANGLE)?.base_value(),
            y: y.require(Dimension::ANGLE)?.base_value(),
        })
    }

    pub fn degrees(x: f64, y: f64) -> Self {
        Field {
            x: x.to_radians(),
            y: y.to_radians(),
        }
    }
}

/// A design wavelength, in millimeters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wavelength {
    pub value: f64,
    pub weight: f64,
}

impl Wavelength {
    pub fn new(value: Quantity) -> Result<Self> {
        Ok(Wavelength {
            value: value.require(Dimension::LENGTH)?.base_value(),
            weight: 1.0,
        })
    }

    pub fn nm(value: f64) -> Self {
        Wavelength {
            value: Quantity::nm(value).base_value(),
            weight: 1.0,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// A named group of surfaces, such as the passes of one baffle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub name: String,
    /// Chain indices of the member surfaces, ascending
    pub indices: Vec<usize>,
}

impl Component {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Member surfaces of `system`, skipping indices it no longer has
    pub fn surfaces<'a>(&'a self, system: &'a System) -> impl Iterator<Item = &'a Surface> + 'a {
        self.indices.iter().filter_map(move |&i| system.surfaces.get(i))
    }
}

/// One row of a system summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfaceRow {
    pub index: usize,
    pub name: String,
    pub kind: String,
    pub component: Option<String>,
    pub comment: String,
    pub is_stop: bool,
    /// Millimeters
    pub thickness: f64,
    /// Front frame origin in global millimeters
    pub origin: [f64; 3],
    /// Front frame orientation as decenter-first x/y/z tilts, in degrees
    pub tilt: [f64; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SurfaceFrames {
    input: CoordinateSystem,
    front: CoordinateSystem,
    back: CoordinateSystem,
}

/// An ordered chain of surfaces
#[derive(Debug, Clone)]
pub struct System {
    pub name: String,
    pub comment: String,
    surfaces: Vec<Surface>,
    pub fields: Vec<Field>,
    pub wavelengths: Vec<Wavelength>,
    /// Millimeters
    pub entrance_pupil_radius: f64,
    /// `frames[config][surface]`
    frames: OnceCell<Vec<Vec<SurfaceFrames>>>,
}

impl System {
    /// A chain holding the object, stop and image sentinels
    pub fn new(name: impl Into<String>) -> Self {
        let mut object = Surface::new(OBJECT_NAME, SurfaceKind::Object);
        object.thickness = f64::INFINITY.into();

        let mut system = System {
            name: name.into(),
            comment: String::new(),
            surfaces: vec![
                object,
                Surface::standard(STOP_NAME).with_stop(true),
                Surface::standard(IMAGE_NAME),
            ],
            fields: Vec::new(),
            wavelengths: Vec::new(),
            entrance_pupil_radius: 0.0,
            frames: OnceCell::new(),
        };
        system.normalize_stop();
        system
    }

    fn invalidate(&mut self) {
        if self.frames.take().is_some() {
            debug!("dropped cached frames of system '{}'", self.name);
        }
    }

    /// Keeps exactly one stop, falling back to the first non-object surface
    fn normalize_stop(&mut self) {
        match self.surfaces.iter().position(|s| s.is_stop) {
            Some(first) => {
                for surface in self.surfaces.iter_mut().skip(first + 1) {
                    surface.is_stop = false;
                }
            }
            None => {
                let index = if self.surfaces.len() > 1 { 1 } else { 0 };
                if let Some(surface) = self.surfaces.get_mut(index) {
                    surface.is_stop = true;
                }
            }
        }
    }

    fn resolve_index(&self, index: isize) -> Result<usize> {
        let len = self.surfaces.len();
        let resolved = if index < 0 { index + len as isize } else { index };
        if resolved < 0 || resolved as usize >= len {
            return Err(RayfieldError::IndexOutOfRange { index, len });
        }
        Ok(resolved as usize)
    }

    /// Inserts `surface` before `index`
    ///
    /// `index == len()` appends. Negative indices count from the end, so
    /// `-1` inserts before the image. A surface inserted with its stop flag
    /// set becomes the stop.
    pub fn insert(&mut self, surface: Surface, index: isize) -> Result<()> {
        let len = self.surfaces.len();
        let resolved = if index < 0 { index + len as isize } else { index };
        if resolved < 0 || resolved as usize > len {
            return Err(RayfieldError::IndexOutOfRange { index, len });
        }
        let resolved = resolved as usize;

        if surface.is_stop {
            for s in self.surfaces.iter_mut() {
                s.is_stop = false;
            }
        }
        debug!("inserting surface '{}' at {}", surface.name, resolved);
        self.surfaces.insert(resolved, surface);
        self.normalize_stop();
        self.invalidate();
        Ok(())
    }

    pub fn append(&mut self, surface: Surface) -> Result<()> {
        self.insert(surface, self.surfaces.len() as isize)
    }

    /// Removes and returns the surface at `index`
    pub fn remove(&mut self, index: isize) -> Result<Surface> {
        let index = self.resolve_index(index)?;
        let mut surface = self.surfaces.remove(index);
        surface.is_stop = false;
        self.normalize_stop();
        self.invalidate();
        Ok(surface)
    }

    pub fn get(&self, index: isize) -> Result<&Surface> {
        let index = self.resolve_index(index)?;
        Ok(&self.surfaces[index])
    }

    /// Edits the surface at `index` in place
    ///
    /// Cached frames are dropped and the stop is re-normalized afterwards:
    /// a surface that comes out of `edit` flagged becomes the stop, and a
    /// stop that loses its flag falls back to the first non-object surface.
    pub fn modify<R>(
        &mut self,
        index: isize,
        edit: impl FnOnce(&mut Surface) -> Result<R>,
    ) -> Result<R> {
        let index = self.resolve_index(index)?;
        self.invalidate();
        let result = edit(&mut self.surfaces[index]);
        if self.surfaces[index].is_stop {
            self.flag_stop(index);
        } else {
            self.normalize_stop();
        }
        result
    }

    pub fn by_name(&self, name: &str) -> Option<&Surface> {
        self.surfaces.iter().find(|s| s.name == name)
    }

    pub fn by_id(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.iter().find(|s| s.id() == id)
    }

    pub fn index_of(&self, id: SurfaceId) -> Option<usize> {
        self.surfaces.iter().position(|s| s.id() == id)
    }

    pub fn prev(&self, index: usize) -> Option<&Surface> {
        index.checked_sub(1).and_then(|i| self.surfaces.get(i))
    }

    pub fn next(&self, index: usize) -> Option<&Surface> {
        self.surfaces.get(index + 1)
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Surface> {
        self.surfaces.iter()
    }

    pub fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }

    pub fn object(&self) -> Option<&Surface> {
        self.surfaces.first()
    }

    pub fn image(&self) -> Option<&Surface> {
        self.surfaces.last()
    }

    pub fn stop(&self) -> Option<&Surface> {
        self.surfaces.iter().find(|s| s.is_stop)
    }

    pub fn stop_index(&self) -> Option<usize> {
        self.surfaces.iter().position(|s| s.is_stop)
    }

    /// Moves the stop flag to the surface with `id`
    pub fn set_stop(&mut self, id: SurfaceId) -> Result<()> {
        let index = self
            .index_of(id)
            .ok_or_else(|| RayfieldError::SurfaceNotFound(id.to_string()))?;
        self.flag_stop(index);
        Ok(())
    }

    pub fn set_stop_index(&mut self, index: isize) -> Result<()> {
        let index = self.resolve_index(index)?;
        self.flag_stop(index);
        Ok(())
    }

    fn flag_stop(&mut self, index: usize) {
        for (i, surface) in self.surfaces.iter_mut().enumerate() {
            surface.is_stop = i == index;
        }
    }

    /// Number of configurations every surface parameter broadcasts to
    pub fn config_len(&self) -> Result<usize> {
        let lens = self
            .surfaces
            .iter()
            .map(Surface::config_len)
            .collect::<Result<Vec<usize>>>()?;
        broadcast_len(&lens)
    }

    fn frames_of_config(&self, config: usize) -> Result<Vec<SurfaceFrames>> {
        let mut input = CoordinateSystem::global();
        let mut frames = Vec::with_capacity(self.surfaces.len());
        for surface in &self.surfaces {
            let front = input.compose(&surface.pre.to_coordinate_system(config)?);
            let mut back = front.compose(&surface.post.to_coordinate_system(config)?);
            let t = surface.thickness_mm(config)?;
            // The object at infinity contributes no translation
            if t.is_finite() {
                back = back.compose_translate(&Vector3::new(0.0, 0.0, t, Unit::Millimeter))?;
            }
            frames.push(SurfaceFrames { input, front, back });
            input = back;
        }
        Ok(frames)
    }

    fn frames(&self, index: usize, config: usize) -> Result<&SurfaceFrames> {
        let all = self.frames.get_or_try_init(|| {
            let configs = self.config_len()?;
            debug!(
                "resolving frames of system '{}' for {} configurations",
                self.name, configs
            );
            (0..configs).map(|c| self.frames_of_config(c)).collect()
        })?;

        let per_config = all.get(config).ok_or_else(|| {
            RayfieldError::InvalidInput(format!(
                "configuration {} requested from a system of {}",
                config,
                all.len()
            ))
        })?;
        per_config.get(index).ok_or(RayfieldError::IndexOutOfRange {
            index: index as isize,
            len: per_config.len(),
        })
    }

    /// Frame the rays arrive in, before the surface's `pre` transform
    pub fn input_cs(&self, index: usize, config: usize) -> Result<CoordinateSystem> {
        Ok(self.frames(index, config)?.input)
    }

    /// Frame of the surface itself
    pub fn front_cs(&self, index: usize, config: usize) -> Result<CoordinateSystem> {
        Ok(self.frames(index, config)?.front)
    }

    /// Alias of [`System::front_cs`]
    pub fn pre_cs(&self, index: usize, config: usize) -> Result<CoordinateSystem> {
        self.front_cs(index, config)
    }

    /// Frame the rays leave in, after `post` and the thickness
    pub fn back_cs(&self, index: usize, config: usize) -> Result<CoordinateSystem> {
        Ok(self.frames(index, config)?.back)
    }

    /// Groups of surfaces sharing a component label, in chain order
    pub fn components(&self) -> Vec<Component> {
        let mut components: Vec<Component> = Vec::new();
        for (i, surface) in self.surfaces.iter().enumerate() {
            let Some(name) = &surface.component else {
                continue;
            };
            match components.iter_mut().find(|c| &c.name == name) {
                Some(component) => component.indices.push(i),
                None => components.push(Component {
                    name: name.clone(),
                    indices: vec![i],
                }),
            }
        }
        components
    }

    pub fn component(&self, name: &str) -> Option<Component> {
        self.components().into_iter().find(|c| c.name == name)
    }

    /// Splits every surface whose thickness crosses the x-y plane of
    /// `plane` and inserts one baffle surface per crossing
    ///
    /// Geometry is taken from configuration 0, while thickness sweeps carry
    /// over: each configuration keeps its own distance past the baffle. Each
    /// baffle surface sits on the plane, carries the residual thickness of
    /// the split and is labelled with its pass number, counted from 0 along
    /// the ray path.
    /// Surfaces with infinite thickness are never split.
    pub fn add_baffle(&mut self, name: &str, plane: &CoordinateSystem) -> Result<Component> {
        const CONFIG: usize = 0;

        let ids: Vec<SurfaceId> = self.surfaces.iter().map(Surface::id).collect();
        let mut pass = 0usize;

        for id in ids {
            let index = self
                .index_of(id)
                .ok_or_else(|| RayfieldError::SurfaceNotFound(id.to_string()))?;
            let surface = &self.surfaces[index];
            let thickness = surface.thickness_mm(CONFIG)?;
            if !thickness.is_finite() {
                continue;
            }

            let start = self
                .front_cs(index, CONFIG)?
                .compose(&surface.post.to_coordinate_system(CONFIG)?);
            let end = self.back_cs(index, CONFIG)?;
            let Some(hit) = plane.xy_intercept(&start.translation(), &end.translation())? else {
                continue;
            };

            let before = start.to_local(&hit)?.base().z;
            let residual = surface.thickness.map(|t| t - before);

            self.surfaces[index].set_thickness(Quantity::mm(before))?;
            self.invalidate();
            let split_back = self.back_cs(index, CONFIG)?;

            let pre = TiltDecenter::from_coordinate_system(&plane.diff(&split_back));
            let post = pre.invert();
            let mut baffle = Surface::standard(name)
                .with_comment(format!("pass = {}", pass))
                .with_component(name)
                .with_pre(pre)
                .with_post(post);
            baffle.thickness = residual;

            self.insert(baffle, index as isize + 1)?;
            debug!(
                "baffle '{}' pass {} splits surface {} at {:.6} mm",
                name, pass, index, before
            );
            pass += 1;
        }

        info!("baffle '{}' inserted with {} passes", name, pass);
        Ok(self.component(name).unwrap_or(Component {
            name: name.to_string(),
            indices: Vec::new(),
        }))
    }

    /// Summary rows of every surface for one configuration
    pub fn table(&self, config: usize) -> Result<Vec<SurfaceRow>> {
        self.surfaces
            .iter()
            .enumerate()
            .map(|(index, surface)| {
                let front = self.front_cs(index, config)?;
                let origin = *front.translation().base();
                let euler = TiltDecenter::from_coordinate_system(&front);
                let (a, b, c) = euler.tilt.angles(0)?;
                Ok(SurfaceRow {
                    index,
                    name: surface.name.clone(),
                    kind: surface.kind.name().to_string(),
                    component: surface.component.clone(),
                    comment: surface.comment.clone(),
                    is_stop: surface.is_stop,
                    thickness: surface.thickness_mm(config)?,
                    origin: [origin.x, origin.y, origin.z],
                    tilt: [a * RAD2DEG, b * RAD2DEG, c * RAD2DEG],
                })
            })
            .collect()
    }

    /// A bundle spanning the defined fields and wavelengths
    ///
    /// Field angles are sampled on `num_field` points per axis between the
    /// extreme defined fields; the pupil is a square `num_pupil` grid across
    /// the entrance pupil diameter, launched from the origin of the object
    /// frame.
    pub fn field_rays(&self, num_field: usize, num_pupil: usize) -> Result<Rays> {
        if self.fields.is_empty() || self.wavelengths.is_empty() {
            return Err(RayfieldError::InvalidInput(format!(
                "system '{}' needs at least one field and one wavelength",
                self.name
            )));
        }
        if num_field == 0 || num_pupil == 0 {
            return Err(RayfieldError::InvalidInput(
                "field and pupil grids need at least one sample".to_string(),
            ));
        }

        let span = |values: Vec<f64>, n: usize| -> Vec<f64> {
            let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if lo == hi || n == 1 {
                vec![0.5 * (lo + hi)]
            } else {
                Array1::linspace(lo, hi, n).to_vec()
            }
        };

        let fx = span(self.fields.iter().map(|f| f.x).collect(), num_field);
        let fy = span(self.fields.iter().map(|f| f.y).collect(), num_field);
        let r = self.entrance_pupil_radius;
        let pupil: Vec<Quantity> = span(vec![-r, r], num_pupil)
            .into_iter()
            .map(Quantity::mm)
            .collect();

        let wavelengths: Vec<Quantity> = self
            .wavelengths
            .iter()
            .map(|w| Quantity::mm(w.value))
            .collect();
        let fx: Vec<Quantity> = fx.into_iter().map(Quantity::rad).collect();
        let fy: Vec<Quantity> = fy.into_iter().map(Quantity::rad).collect();

        Rays::from_field_angles(
            &wavelengths,
            &Vector3::zeros(Dimension::LENGTH),
            &fx,
            &fy,
            |_, _| true,
            Some(pupil.as_slice()),
            Some(pupil.as_slice()),
        )
    }

    /// Broadcasts `rays` over every configuration of the system
    fn prepare(&self, rays: &Rays) -> Result<Rays> {
        if self.surfaces.is_empty() {
            return Err(RayfieldError::InvalidInput(format!(
                "system '{}' has no surfaces to trace",
                self.name
            )));
        }
        let configs = broadcast_len(&[rays.num_configurations(), self.config_len()?])?;
        rays.broadcast_configurations(configs)
    }

    /// Traces `rays` through surfaces `0..=last`, returning the bundle in
    /// the local frame of every surface
    fn trace_through(&self, rays: &Rays, last: usize) -> Result<Vec<Rays>> {
        let final_index = self.surfaces.len() - 1;
        let mut current = self.prepare(rays)?;
        let mut local = Vec::with_capacity(last + 1);

        for (index, surface) in self.surfaces.iter().enumerate().take(last + 1) {
            let arrived = surface.trace_local(&current, index == 0, index == final_index)?;
            if index < last {
                current = surface.depart(arrived.clone())?;
            }
            local.push(arrived);
        }
        Ok(local)
    }

    /// Traces `rays` through the whole chain
    ///
    /// The result holds, along the surface axis, the bundle as seen in the
    /// local frame of each surface after it acted on the rays.
    pub fn raytrace(&self, rays: &Rays) -> Result<Rays> {
        let local = self.trace_through(rays, self.surfaces.len().saturating_sub(1))?;
        let stacked = Rays::stack_surfaces(&local)?;
        info!(
            "traced {} rays through {} surfaces of '{}', {} unvignetted at the image",
            rays.error_mask.len(),
            self.surfaces.len(),
            self.name,
            local
                .last()
                .map(|r| r.mask().iter().filter(|&&m| m).count())
                .unwrap_or(0)
        );
        Ok(stacked)
    }

    /// Traces `rays` through the whole chain, returning only the bundle in
    /// the image frame
    pub fn raytrace_final(&self, rays: &Rays) -> Result<Rays> {
        let mut local = self.trace_through(rays, self.surfaces.len().saturating_sub(1))?;
        local.pop().ok_or_else(|| {
            RayfieldError::InvalidInput(format!("system '{}' has no surfaces", self.name))
        })
    }

    /// Launch position of the chief ray for one field angle
    ///
    /// Searches the object-frame x/y start position whose ray crosses the
    /// centre of the stop, using the secant method. The result lies on the
    /// object frame's x-y plane.
    pub fn aim_chief_ray(
        &self,
        field_x: Quantity,
        field_y: Quantity,
        wavelength: Quantity,
        config: usize,
    ) -> Result<Vector3> {
        let stop = self
            .stop_index()
            .ok_or_else(|| RayfieldError::SurfaceNotFound(STOP_NAME.to_string()))?;
        let configs = self.config_len()?;
        if config >= configs {
            return Err(RayfieldError::InvalidInput(format!(
                "configuration {} requested from a system of {}",
                config, configs
            )));
        }

        let stop_position = |start: &Array1<f64>| -> Result<Array1<f64>> {
            let rays = Rays::from_field_angles(
                &[wavelength],
                &Vector3::new(start[0], start[1], 0.0, Unit::Millimeter),
                &[field_x],
                &[field_y],
                |_, _| true,
                None,
                None,
            )?;
            let local = self.trace_through(&rays, stop)?;
            let at_stop = local.last().ok_or_else(|| {
                RayfieldError::InvalidInput("empty trace while aiming".to_string())
            })?;

            let ray = [config, 0, 0, 0, 0, 0, 0];
            if !at_stop.error_mask()[ray.as_slice()] {
                return Err(RayfieldError::InvalidInput(format!(
                    "chief ray launched from ({}, {}) mm missed the stop",
                    start[0], start[1]
                )));
            }
            let mut p = [0usize; COMPONENT_AXIS + 1];
            p[..COMPONENT_AXIS].copy_from_slice(&ray);
            let x = at_stop.position()[p.as_slice()];
            p[COMPONENT_AXIS] = 1;
            let y = at_stop.position()[p.as_slice()];
            Ok(Array1::from(vec![x, y]))
        };

        let step = if self.entrance_pupil_radius > 0.0 {
            0.1 * self.entrance_pupil_radius
        } else {
            1.0
        };
        let root = find_root(
            stop_position,
            &Array1::zeros(2),
            &Array1::from_elem(2, step),
            SecantOptions::default(),
        )?;
        debug!("chief ray aimed at ({}, {}) mm", root[0], root[1]);
        Ok(Vector3::new(root[0], root[1], 0.0, Unit::Millimeter))
    }
}
