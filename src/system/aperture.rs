//! Apertures and obscurations
//!
//! All dimensions are in millimeters in the surface's local x-y plane. The
//! decenter shifts the aperture before containment is tested; an obscuration
//! blocks the rays its shape contains instead of passing them.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Number of points used to outline a circular aperture
const CIRCLE_SAMPLES: usize = 64;

/// Outline of an aperture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum ApertureShape {
    Circular { radius: f64 },
    /// Ordered vertices of an arbitrary (possibly concave) polygon
    Polygon { vertices: Vec<[f64; 2]> },
    Rectangular { half_width_x: f64, half_width_y: f64 },
    /// Polygon inscribed in a circle of `radius`, first vertex on +x
    RegularPolygon { radius: f64, num_sides: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aperture {
    #[serde(flatten)]
    pub shape: ApertureShape,
    #[serde(default)]
    pub decenter_x: f64,
    #[serde(default)]
    pub decenter_y: f64,
    #[serde(default)]
    pub is_obscuration: bool,
}

/// Even-odd crossing test
fn polygon_contains(vertices: &[[f64; 2]], x: f64, y: f64) -> bool {
    let n = vertices.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let [xi, yi] = vertices[i];
        let [xj, yj] = vertices[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn regular_polygon(radius: f64, num_sides: usize) -> Vec<[f64; 2]> {
    (0..num_sides)
        .map(|k| {
            let angle = 2.0 * PI * k as f64 / num_sides as f64;
            [radius * angle.cos(), radius * angle.sin()]
        })
        .collect()
}

impl Aperture {
    pub fn new(shape: ApertureShape) -> Self {
        Aperture {
            shape,
            decenter_x: 0.0,
            decenter_y: 0.0,
            is_obscuration: false,
        }
    }

    pub fn circular(radius: f64) -> Self {
        Aperture::new(ApertureShape::Circular { radius })
    }

    pub fn rectangular(half_width_x: f64, half_width_y: f64) -> Self {
        Aperture::new(ApertureShape::Rectangular {
            half_width_x,
            half_width_y,
        })
    }

    pub fn polygon(vertices: Vec<[f64; 2]>) -> Self {
        Aperture::new(ApertureShape::Polygon { vertices })
    }

    pub fn regular_polygon(radius: f64, num_sides: usize) -> Self {
        Aperture::new(ApertureShape::RegularPolygon { radius, num_sides })
    }

    pub fn with_decenter(mut self, x: f64, y: f64) -> Self {
        self.decenter_x = x;
        self.decenter_y = y;
        self
    }

    pub fn obscuration(mut self) -> Self {
        self.is_obscuration = true;
        self
    }

    /// Whether a ray landing at local (x, y) passes this aperture
    pub fn is_unvignetted(&self, x: f64, y: f64) -> bool {
        let x = x - self.decenter_x;
        let y = y - self.decenter_y;

        let inside = match &self.shape {
            ApertureShape::Circular { radius } => x.hypot(y) < *radius,
            ApertureShape::Polygon { vertices } => polygon_contains(vertices, x, y),
            ApertureShape::Rectangular {
                half_width_x,
                half_width_y,
            } => x.abs() <= *half_width_x && y.abs() <= *half_width_y,
            ApertureShape::RegularPolygon { radius, num_sides } => {
                polygon_contains(&regular_polygon(*radius, *num_sides), x, y)
            }
        };

        inside != self.is_obscuration
    }

    /// Outline of the aperture, decenter included
    pub fn vertices(&self) -> Vec<[f64; 2]> {
        let outline = match &self.shape {
            ApertureShape::Circular { radius } => regular_polygon(*radius, CIRCLE_SAMPLES),
            ApertureShape::Polygon { vertices } => vertices.clone(),
            ApertureShape::Rectangular {
                half_width_x: hx,
                half_width_y: hy,
            } => vec![[*hx, *hy], [*hx, -*hy], [-*hx, -*hy], [-*hx, *hy]],
            ApertureShape::RegularPolygon { radius, num_sides } => {
                regular_polygon(*radius, *num_sides)
            }
        };
        outline
            .into_iter()
            .map(|[x, y]| [x + self.decenter_x, y + self.decenter_y])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, 0.0, true)]
    #[case(0.9, 0.0, true)]
    #[case(0.8, 0.8, false)]
    #[case(1.0, 0.0, false)]
    fn test_circular(#[case] x: f64, #[case] y: f64, #[case] passes: bool) {
        assert_eq!(Aperture::circular(1.0).is_unvignetted(x, y), passes);
        assert_eq!(Aperture::circular(1.0).obscuration().is_unvignetted(x, y), !passes);
    }

    #[test]
    fn test_decenter_shifts_aperture() {
        let a = Aperture::circular(1.0).with_decenter(5.0, 0.0);
        assert!(a.is_unvignetted(5.5, 0.0));
        assert!(!a.is_unvignetted(0.0, 0.0));
    }

    #[test]
    fn test_convex_polygon() {
        let triangle = Aperture::polygon(vec![[0.0, 0.0], [4.0, 0.0], [0.0, 4.0]]);
        assert!(triangle.is_unvignetted(1.0, 1.0));
        assert!(!triangle.is_unvignetted(3.0, 3.0));
        assert!(!triangle.is_unvignetted(-1.0, 1.0));
    }

    #[test]
    fn test_concave_polygon() {
        // U shape opening toward +y
        let u = Aperture::polygon(vec![
            [0.0, 0.0],
            [3.0, 0.0],
            [3.0, 3.0],
            [2.0, 3.0],
            [2.0, 1.0],
            [1.0, 1.0],
            [1.0, 3.0],
            [0.0, 3.0],
        ]);
        assert!(u.is_unvignetted(0.5, 2.0));
        assert!(u.is_unvignetted(2.5, 2.0));
        assert!(u.is_unvignetted(1.5, 0.5));
        assert!(!u.is_unvignetted(1.5, 2.0));
        assert!(!u.is_unvignetted(4.0, 0.5));
    }

    #[test]
    fn test_rectangular() {
        let r = Aperture::rectangular(2.0, 1.0);
        assert!(r.is_unvignetted(1.9, -0.9));
        assert!(!r.is_unvignetted(0.0, 1.1));
        assert_eq!(r.vertices().len(), 4);
    }

    #[test]
    fn test_regular_polygon() {
        let hex = Aperture::regular_polygon(1.0, 6);
        assert_eq!(hex.vertices().len(), 6);
        assert!(hex.is_unvignetted(0.0, 0.0));
        assert!(hex.is_unvignetted(0.95, 0.0));
        // The flat edge sits at sqrt(3)/2 along y
        assert!(!hex.is_unvignetted(0.0, 0.9));
    }

    #[test]
    fn test_aperture_json() {
        let a: Aperture =
            serde_json::from_str(r#"{"shape": "circular", "radius": 2.5, "is_obscuration": true}"#)
                .unwrap();
        assert_eq!(a, Aperture::circular(2.5).obscuration());
    }
}
