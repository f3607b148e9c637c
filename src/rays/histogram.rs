//! 2D histograms of pupil-plane ray positions

use ndarray::{Array1, ArrayD, Axis, Dimension, IxDyn, Zip};

use super::{GridAxis, Rays, COMPONENT_AXIS};
use crate::{RayfieldError, Result};

/// Ray counts binned over pupil-plane x/y position
///
/// `counts` has shape
/// `[configuration, surface, wavelength, field_y, field_x, bins_x, bins_y]`.
/// Every slice shares the same bin edges, in millimeters.
#[derive(Debug, Clone, PartialEq)]
pub struct PupilHistogram {
    pub counts: ArrayD<f64>,
    pub edges_x: Array1<f64>,
    pub edges_y: Array1<f64>,
}

/// Histogram range, widened by ±0.5 when degenerate
fn bin_edges(lo: f64, hi: f64, bins: usize) -> Array1<f64> {
    let (lo, hi) = if lo == hi { (lo - 0.5, hi + 0.5) } else { (lo, hi) };
    Array1::linspace(lo, hi, bins + 1)
}

/// Bin index of `v`, with the last bin closed on the right
fn bin_index(v: f64, edges: &Array1<f64>) -> Option<usize> {
    let bins = edges.len() - 1;
    let lo = edges[0];
    let hi = edges[bins];
    if !(lo..=hi).contains(&v) {
        return None;
    }
    if v == hi {
        return Some(bins - 1);
    }
    let i = ((v - lo) / (hi - lo) * bins as f64).floor() as usize;
    Some(i.min(bins - 1))
}

impl Rays {
    /// Histograms pupil positions for every (configuration, surface,
    /// wavelength, field) slice
    ///
    /// With `use_vignetted` only the error mask weights the rays, so rays
    /// blocked by apertures are still counted; otherwise the full [`Rays::mask`]
    /// is used. Without explicit `limits` (`[(x_min, x_max), (y_min, y_max)]`)
    /// the range spans every counted ray. `relative_to_centroid` subtracts
    /// the pupil mean of each slice first.
    pub fn pupil_hist2d(
        &self,
        bins: (usize, usize),
        limits: Option<[(f64, f64); 2]>,
        use_vignetted: bool,
        relative_to_centroid: bool,
    ) -> Result<PupilHistogram> {
        if bins.0 == 0 || bins.1 == 0 {
            return Err(RayfieldError::InvalidInput(
                "histograms need at least one bin per axis".to_string(),
            ));
        }

        let weights = if use_vignetted {
            self.error_mask.clone()
        } else {
            self.mask()
        };

        let position = if relative_to_centroid {
            self.relative_position()?
        } else {
            self.position.clone()
        };
        let px = position.index_axis(Axis(COMPONENT_AXIS), 0);
        let py = position.index_axis(Axis(COMPONENT_AXIS), 1);

        let [(x_lo, x_hi), (y_lo, y_hi)] = match limits {
            Some(limits) => limits,
            None => {
                let mut range = [(f64::INFINITY, f64::NEG_INFINITY); 2];
                Zip::from(&weights)
                    .and(&px)
                    .and(&py)
                    .for_each(|&w, &x, &y| {
                        if w {
                            range[0] = (range[0].0.min(x), range[0].1.max(x));
                            range[1] = (range[1].0.min(y), range[1].1.max(y));
                        }
                    });
                if !range[0].0.is_finite() {
                    return Err(RayfieldError::InvalidInput(
                        "no unmasked rays to derive histogram limits from".to_string(),
                    ));
                }
                range
            }
        };

        let edges_x = bin_edges(x_lo, x_hi, bins.0);
        let edges_y = bin_edges(y_lo, y_hi, bins.1);

        let grid = self.grid_shape();
        let mut shape = grid[..GridAxis::PupilY.index()].to_vec();
        shape.extend_from_slice(&[bins.0, bins.1]);
        let mut counts = ArrayD::<f64>::zeros(IxDyn(&shape));

        for (idx, &w) in weights.indexed_iter() {
            if !w {
                continue;
            }
            let i = idx.slice();
            if let (Some(bx), Some(by)) = (bin_index(px[i], &edges_x), bin_index(py[i], &edges_y)) {
                counts[&[i[0], i[1], i[2], i[3], i[4], bx, by][..]] += 1.0;
            }
        }

        Ok(PupilHistogram {
            counts,
            edges_x,
            edges_y,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinates::Vector3;
    use crate::rays::RaysInit;
    use crate::units::{Dimension, Quantity};

    fn pupil_grid(n: usize) -> Rays {
        let coords: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let position = ArrayD::from_shape_fn(IxDyn(&[n, n, 3]), |i| match i[2] {
            0 => coords[i[1]],
            1 => coords[i[0]],
            _ => 0.0,
        });
        Rays::new(RaysInit {
            position: Some(position),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_bin_index_closes_last_bin() {
        let edges = bin_edges(0.0, 4.0, 4);
        assert_eq!(bin_index(0.0, &edges), Some(0));
        assert_eq!(bin_index(3.999, &edges), Some(3));
        assert_eq!(bin_index(4.0, &edges), Some(3));
        assert_eq!(bin_index(4.5, &edges), None);
        assert_eq!(bin_index(-0.1, &edges), None);
    }

    #[test]
    fn test_degenerate_range_expands() {
        let edges = bin_edges(2.0, 2.0, 2);
        assert_eq!(edges.to_vec(), vec![1.5, 2.0, 2.5]);
    }

    #[test]
    fn test_histogram_counts_every_ray() {
        let rays = pupil_grid(4);
        let hist = rays.pupil_hist2d((2, 2), None, false, false).unwrap();
        assert_eq!(hist.counts.shape(), &[1, 1, 1, 1, 1, 2, 2]);
        assert_eq!(hist.counts.sum(), 16.0);
        assert!(hist.counts.iter().all(|&c| c == 4.0));
        assert_eq!(hist.edges_x[0], 0.0);
        assert_eq!(hist.edges_x[2], 3.0);
    }

    #[test]
    fn test_histogram_masks() {
        let mut rays = pupil_grid(2);
        rays.vignetted_mask[&[0, 0, 0, 0, 0, 0, 0][..]] = false;
        rays.error_mask[&[0, 0, 0, 0, 0, 1, 1][..]] = false;

        let limits = Some([(0.0, 1.0), (0.0, 1.0)]);
        let valid = rays.pupil_hist2d((2, 2), limits, false, false).unwrap();
        assert_eq!(valid.counts.sum(), 2.0);

        let with_vignetted = rays.pupil_hist2d((2, 2), limits, true, false).unwrap();
        assert_eq!(with_vignetted.counts.sum(), 3.0);
    }

    #[test]
    fn test_histogram_relative_to_centroid() {
        let rays = pupil_grid(3);
        let hist = rays.pupil_hist2d((3, 3), None, false, true).unwrap();
        assert_eq!(hist.edges_x[0], -1.0);
        assert_eq!(hist.edges_x[3], 1.0);
    }

    #[test]
    fn test_histogram_over_field_and_wavelength_grid() {
        let deg = Quantity::deg;
        let mm = Quantity::mm;
        // Only the negative field_x column survives vignetting
        let rays = Rays::from_field_angles(
            &[Quantity::nm(450.0), Quantity::nm(650.0)],
            &Vector3::zeros(Dimension::LENGTH),
            &[deg(-1.0), deg(1.0)],
            &[deg(-1.0), deg(0.0), deg(1.0)],
            |fx, _| fx.base_value() < 0.0,
            Some(&[mm(-1.0), mm(1.0)]),
            Some(&[mm(-1.0), mm(1.0)]),
        )
        .unwrap();

        let all = rays.pupil_hist2d((2, 2), None, true, false).unwrap();
        assert_eq!(all.counts.shape(), &[1, 1, 2, 3, 2, 2, 2]);
        assert!(all.counts.iter().all(|&c| c == 1.0));

        let valid = rays.pupil_hist2d((2, 2), None, false, false).unwrap();
        assert_eq!(valid.counts.sum(), 24.0);
        assert_eq!(valid.counts.index_axis(Axis(4), 1).sum(), 0.0);
        assert!(valid.counts.index_axis(Axis(4), 0).iter().all(|&c| c == 1.0));
    }

    #[test]
    fn test_histogram_without_valid_rays() {
        let mut rays = pupil_grid(2);
        rays.error_mask.fill(false);
        assert!(rays.pupil_hist2d((2, 2), None, false, false).is_err());
    }
}
