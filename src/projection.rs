use std::ops::Range;

use ndarray::{Array2, ArrayView1, ArrayView3, Axis, Zip, s};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use web_time::Instant;

use crate::{
    enums::{Orientation, Reduction},
    volume::Volume,
};

/// Sub-range of the volume along each projection axis: `half_thickness`
/// voxels either side of `center` (x, y, z voxel indices).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slab {
    pub center: [usize; 3],
    pub half_thickness: usize,
}

impl Slab {
    /// Voxel range along `axis`, clamped to `len`.
    fn range(&self, axis: usize, len: usize) -> Range<usize> {
        let center = self.center[axis];
        let clamped = center.min(len.saturating_sub(1));
        if clamped != center {
            debug!(axis, center, clamped, "slab centre clamped into the volume");
        }
        let start = clamped.saturating_sub(self.half_thickness);
        let end = (clamped + self.half_thickness + 1).min(len);
        start..end
    }
}

/// The three projections, laid out like the orthogonal reslices
/// (axial `[y, x]`, coronal `[z, x]`, sagittal `[z, y]`).
#[derive(Debug, Clone, PartialEq)]
pub struct Projections {
    pub axial: Array2<f32>,
    pub coronal: Array2<f32>,
    pub sagittal: Array2<f32>,
}

impl Projections {
    pub fn get(&self, orientation: Orientation) -> &Array2<f32> {
        match orientation {
            Orientation::Axial => &self.axial,
            Orientation::Coronal => &self.coronal,
            Orientation::Sagittal => &self.sagittal,
        }
    }
}

pub struct ProjectionEngine;

impl ProjectionEngine {
    /// Projects along all three principal axes.
    pub fn project(volume: &Volume, reduction: Reduction, slab: Option<Slab>) -> Projections {
        let started = Instant::now();
        let projections = Projections {
            axial: Self::project_axis(volume, Orientation::Axial, reduction, slab),
            coronal: Self::project_axis(volume, Orientation::Coronal, reduction, slab),
            sagittal: Self::project_axis(volume, Orientation::Sagittal, reduction, slab),
        };
        info!(
            reduction = ?reduction,
            slab = slab.is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "projected volume"
        );
        projections
    }

    /// Reduces along the normal of `orientation`. Without a slab the whole
    /// extent contributes.
    pub fn project_axis(
        volume: &Volume,
        orientation: Orientation,
        reduction: Reduction,
        slab: Option<Slab>,
    ) -> Array2<f32> {
        let data = volume.data().view();
        let voxel_axis = orientation.normal_axis();
        // data is [z, y, x], so voxel axis x lives on array axis 2.
        let array_axis = 2 - voxel_axis;
        let len = data.len_of(Axis(array_axis));
        let range = slab.map_or(0..len, |slab| slab.range(voxel_axis, len));

        let view: ArrayView3<f32> = match array_axis {
            0 => data.slice(s![range, .., ..]),
            1 => data.slice(s![.., range, ..]),
            _ => data.slice(s![.., .., range]),
        };

        // Removing the reduced axis leaves [y, x], [z, x] or [z, y].
        Zip::from(view.lanes(Axis(array_axis)))
            .par_map_collect(|lane| Self::reduce(lane, reduction))
    }

    fn reduce(lane: ArrayView1<f32>, reduction: Reduction) -> f32 {
        if lane.is_empty() {
            return 0.0;
        }
        match reduction {
            Reduction::Max => lane.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v)),
            Reduction::Min => lane.fold(f32::INFINITY, |acc, &v| acc.min(v)),
            Reduction::Average => {
                let sum: f64 = lane.iter().map(|&v| f64::from(v)).sum();
                (sum / lane.len() as f64) as f32
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn gradient_volume() -> Volume {
        let data = Array3::from_shape_fn((4, 3, 2), |(z, y, x)| (z * 100 + y * 10 + x) as f32);
        Volume::new(data, (1.0, 1.0, 1.0)).unwrap()
    }

    #[test]
    fn projections_have_reslice_layout() {
        let projections = ProjectionEngine::project(&gradient_volume(), Reduction::Max, None);
        assert_eq!(projections.axial.dim(), (3, 2));
        assert_eq!(projections.coronal.dim(), (4, 2));
        assert_eq!(projections.sagittal.dim(), (4, 3));
        assert_eq!(projections.axial[[2, 1]], 321.0);
        assert_eq!(projections.coronal[[1, 1]], 121.0);
        assert_eq!(projections.sagittal[[3, 2]], 321.0);
    }

    #[test]
    fn minimum_projection_takes_lowest_voxel() {
        let projection = ProjectionEngine::project_axis(
            &gradient_volume(),
            Orientation::Coronal,
            Reduction::Min,
            None,
        );
        assert_eq!(projection[[2, 1]], 201.0);
    }

    #[test]
    fn slab_limits_contributing_slices() {
        let slab = Slab {
            center: [0, 0, 1],
            half_thickness: 1,
        };
        let projection = ProjectionEngine::project_axis(
            &gradient_volume(),
            Orientation::Axial,
            Reduction::Average,
            Some(slab),
        );
        // Slices 0..=2 contribute: (0 + 100 + 200) / 3.
        assert_eq!(projection[[0, 0]], 100.0);
    }

    #[test]
    fn slab_centre_outside_volume_is_clamped() {
        let slab = Slab {
            center: [0, 0, 99],
            half_thickness: 0,
        };
        let projection = ProjectionEngine::project_axis(
            &gradient_volume(),
            Orientation::Axial,
            Reduction::Max,
            Some(slab),
        );
        assert_eq!(projection[[0, 0]], 300.0);
    }
}
