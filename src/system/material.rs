//! Optical materials following a surface

use serde::{Deserialize, Serialize};

/// Medium a ray enters after interacting with a surface
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Material {
    /// Empty space, index 1
    #[default]
    Vacuum,
    /// Reflective coating; rays stay in the incoming medium
    Mirror,
    /// Homogeneous dielectric with a constant index
    Refractive { index: f64 },
}

impl Material {
    pub fn is_mirror(&self) -> bool {
        matches!(self, Material::Mirror)
    }

    /// Index of the medium after the surface, given the incoming index
    pub fn outgoing_index(&self, incoming: f64) -> f64 {
        match self {
            Material::Vacuum => 1.0,
            Material::Mirror => incoming,
            Material::Refractive { index } => *index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_index() {
        assert_eq!(Material::Vacuum.outgoing_index(1.5), 1.0);
        assert_eq!(Material::Mirror.outgoing_index(1.5), 1.5);
        assert_eq!(Material::Refractive { index: 1.7 }.outgoing_index(1.0), 1.7);
    }

    #[test]
    fn test_material_json() {
        let m: Material = serde_json::from_str(r#"{"type": "refractive", "index": 1.5}"#).unwrap();
        assert_eq!(m, Material::Refractive { index: 1.5 });
        let m: Material = serde_json::from_str(r#"{"type": "mirror"}"#).unwrap();
        assert!(m.is_mirror());
    }
}
