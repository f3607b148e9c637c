//! Shape broadcasting helpers
//!
//! Ray bundles and surface parameters follow numpy broadcasting rules: shapes
//! are right-aligned, and along each axis the lengths must either agree or be
//! one. `PerConfig` is the one-dimensional special case used for parameters
//! that may vary across configurations.

use serde::{Deserialize, Deserializer, Serialize};

use crate::{RayfieldError, Result};

/// Broadcast a set of shapes to their common shape
pub fn broadcast_shapes(shapes: &[&[usize]]) -> Result<Vec<usize>> {
    let ndim = shapes.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut out = vec![1usize; ndim];

    for shape in shapes {
        let offset = ndim - shape.len();
        for (i, &len) in shape.iter().enumerate() {
            let slot = &mut out[offset + i];
            if *slot == 1 {
                *slot = len;
            } else if len != 1 && len != *slot {
                return Err(RayfieldError::ShapeMismatch(format!(
                    "shapes {:?} cannot be broadcast together",
                    shapes
                )));
            }
        }
    }

    Ok(out)
}

/// Broadcast lengths of one-dimensional parameters
pub fn broadcast_len(lens: &[usize]) -> Result<usize> {
    let shapes: Vec<[usize; 1]> = lens.iter().map(|&l| [l]).collect();
    let refs: Vec<&[usize]> = shapes.iter().map(|s| s.as_slice()).collect();
    Ok(broadcast_shapes(&refs)?.first().copied().unwrap_or(1))
}

/// A parameter with one value per configuration
///
/// A single value is shared by every configuration. Otherwise the list holds
/// exactly one entry per configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PerConfig<T> {
    Constant(T),
    Sweep(Vec<T>),
}

/// Wire form of [`PerConfig`], checked by [`PerConfig::sweep`] on the way in
#[derive(Deserialize)]
#[serde(untagged)]
enum RawPerConfig<T> {
    Constant(T),
    Sweep(Vec<T>),
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for PerConfig<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match RawPerConfig::deserialize(deserializer)? {
            RawPerConfig::Constant(value) => Ok(PerConfig::Constant(value)),
            RawPerConfig::Sweep(values) => PerConfig::sweep(values).map_err(serde::de::Error::custom),
        }
    }
}

impl<T> PerConfig<T> {
    /// Creates a sweep over configurations
    pub fn sweep(values: Vec<T>) -> Result<Self> {
        if values.is_empty() {
            return Err(RayfieldError::InvalidInput(
                "a configuration sweep needs at least one value".to_string(),
            ));
        }
        Ok(PerConfig::Sweep(values))
    }

    /// Number of configurations described (1 for a constant)
    pub fn len(&self) -> usize {
        match self {
            PerConfig::Constant(_) => 1,
            PerConfig::Sweep(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value for configuration `config`, broadcasting constants
    pub fn get(&self, config: usize) -> Result<&T> {
        match self {
            PerConfig::Constant(v) => Ok(v),
            PerConfig::Sweep(values) if values.len() == 1 => Ok(&values[0]),
            PerConfig::Sweep(values) => values.get(config).ok_or_else(|| {
                RayfieldError::ShapeMismatch(format!(
                    "configuration {} requested from a sweep of {}",
                    config,
                    values.len()
                ))
            }),
        }
    }

    /// Applies `f` to every stored value
    pub fn map<U>(&self, f: impl Fn(&T) -> U) -> PerConfig<U> {
        match self {
            PerConfig::Constant(v) => PerConfig::Constant(f(v)),
            PerConfig::Sweep(values) => PerConfig::Sweep(values.iter().map(f).collect()),
        }
    }

    pub fn values(&self) -> Vec<&T> {
        match self {
            PerConfig::Constant(v) => vec![v],
            PerConfig::Sweep(values) => values.iter().collect(),
        }
    }
}

impl<T: Default> Default for PerConfig<T> {
    fn default() -> Self {
        PerConfig::Constant(T::default())
    }
}

impl<T> From<T> for PerConfig<T> {
    fn from(value: T) -> Self {
        PerConfig::Constant(value)
    }
}
