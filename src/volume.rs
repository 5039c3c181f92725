use glam::{DMat3, DVec3};
use ndarray::Array3;

use crate::{
    enums::Interpolation,
    error::{ReconstructionError, Result},
    interpolator::Interpolator,
};

/// Distance from an integer coordinate below which a sample snaps onto the voxel.
const SNAP_EPSILON: f64 = 1e-6;

/// Dense scalar volume in physical units (after rescale).
///
/// Voxel `(x, y, z)` lives at `data[[z, y, x]]`, where x is the column, y the
/// row and z the slice index in sorted order.
#[derive(Debug, Clone)]
pub struct Volume {
    data: Array3<f32>,
    spacing: DVec3,
    origin: DVec3,
    orientation: DMat3,
    /// Distance of each slice from slice 0 along the slice normal.
    slice_offsets: Vec<f64>,
    uniform: bool,
}

impl Volume {
    /// Axis aligned volume at the world origin.
    pub fn new(data: Array3<f32>, spacing: (f64, f64, f64)) -> Result<Self> {
        Self::with_geometry(
            data,
            DVec3::new(spacing.0, spacing.1, spacing.2),
            DVec3::ZERO,
            DMat3::IDENTITY,
        )
    }

    /// Volume with uniform slice spacing and the given placement.
    /// `orientation` columns map the voxel x, y, z axes to world directions.
    ///
    /// Every spacing component must be finite and positive.
    pub fn with_geometry(
        data: Array3<f32>,
        spacing: DVec3,
        origin: DVec3,
        orientation: DMat3,
    ) -> Result<Self> {
        if !spacing.is_finite() || spacing.min_element() <= 0.0 {
            return Err(ReconstructionError::invalid_config(format!(
                "voxel spacing must be finite and positive, got {spacing:?}"
            )));
        }
        let depth = data.dim().0;
        let slice_offsets = (0..depth).map(|z| z as f64 * spacing.z).collect();
        Ok(Self {
            data,
            spacing,
            origin,
            orientation,
            slice_offsets,
            uniform: true,
        })
    }

    /// Volume whose slices sit at irregular `slice_offsets` (one per slice,
    /// increasing, first is 0). `spacing.z` is the representative gap.
    pub(crate) fn with_slice_offsets(mut self, slice_offsets: Vec<f64>, uniform: bool) -> Self {
        debug_assert_eq!(slice_offsets.len(), self.data.dim().0);
        self.slice_offsets = slice_offsets;
        self.uniform = uniform;
        self
    }

    /// Number of voxels along (x, y, z).
    pub fn dimensions(&self) -> (usize, usize, usize) {
        let (depth, height, width) = self.data.dim();
        (width, height, depth)
    }

    /// Underlying array, indexed `[z, y, x]`.
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn spacing(&self) -> DVec3 {
        self.spacing
    }

    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    pub fn orientation(&self) -> DMat3 {
        self.orientation
    }

    pub fn slice_offsets(&self) -> &[f64] {
        &self.slice_offsets
    }

    /// False when slice gaps vary beyond tolerance. Such volumes are sampled
    /// from the nearest available slice along z.
    pub fn is_uniform(&self) -> bool {
        self.uniform
    }

    pub fn voxel_count(&self) -> usize {
        self.data.len()
    }

    /// Strict voxel lookup.
    pub fn value(&self, x: usize, y: usize, z: usize) -> Result<f32> {
        self.data
            .get([z, y, x])
            .copied()
            .ok_or(ReconstructionError::OutOfRange {
                x,
                y,
                z,
                dimensions: self.dimensions(),
            })
    }

    /// Display raster (width, height, depth) preserving physical aspect ratio.
    pub fn isotropic_dimensions(&self) -> (usize, usize, usize) {
        Interpolator::get_isotropic_dimensions(
            (self.spacing.x, self.spacing.y, self.spacing.z),
            self.dimensions(),
        )
    }

    pub fn voxel_to_world(&self, voxel: DVec3) -> DVec3 {
        let local = DVec3::new(
            voxel.x * self.spacing.x,
            voxel.y * self.spacing.y,
            self.offset_for_index(voxel.z),
        );
        self.origin + self.orientation * local
    }

    /// Continuous voxel coordinates of a world point. Points outside the
    /// volume map to coordinates outside `[0, n - 1]`.
    pub fn world_to_voxel(&self, world: DVec3) -> DVec3 {
        let local = self.orientation.transpose() * (world - self.origin);
        DVec3::new(
            local.x / self.spacing.x,
            local.y / self.spacing.y,
            self.index_for_offset(local.z),
        )
    }

    /// World positions of the eight corner voxel centres.
    pub fn corners(&self) -> [DVec3; 8] {
        let (nx, ny, nz) = self.dimensions();
        let max = DVec3::new(
            nx.saturating_sub(1) as f64,
            ny.saturating_sub(1) as f64,
            nz.saturating_sub(1) as f64,
        );
        let mut corners = [DVec3::ZERO; 8];
        for (i, corner) in corners.iter_mut().enumerate() {
            let voxel = DVec3::new(
                if i & 1 == 0 { 0.0 } else { max.x },
                if i & 2 == 0 { 0.0 } else { max.y },
                if i & 4 == 0 { 0.0 } else { max.z },
            );
            *corner = self.voxel_to_world(voxel);
        }
        corners
    }

    /// World position of the volume centre.
    pub fn center(&self) -> DVec3 {
        let (nx, ny, nz) = self.dimensions();
        self.voxel_to_world(DVec3::new(
            (nx as f64 - 1.0) / 2.0,
            (ny as f64 - 1.0) / 2.0,
            (nz as f64 - 1.0) / 2.0,
        ))
    }

    /// Sample at continuous voxel coordinates; `None` outside the volume.
    pub fn sample_voxel(&self, voxel: DVec3, interpolation: Interpolation) -> Option<f32> {
        let (nx, ny, nz) = self.dimensions();
        let x = snap(voxel.x);
        let y = snap(voxel.y);
        let z = snap(voxel.z);

        let view = self.data.view();
        match interpolation {
            Interpolation::Nearest => {
                if !within_nearest(x, nx) || !within_nearest(y, ny) || !within_nearest(z, nz) {
                    return None;
                }
                Some(Interpolator::nearest(&view, z, y, x))
            }
            Interpolation::Trilinear => {
                if !within_linear(x, nx) || !within_linear(y, ny) {
                    return None;
                }
                let (x, y) = (x.max(0.0), y.max(0.0));
                if self.uniform {
                    if !within_linear(z, nz) {
                        return None;
                    }
                    Some(Interpolator::trilinear_interpolate(&view, z.max(0.0), y, x))
                } else {
                    // Irregular stacks only interpolate in-plane.
                    if !within_nearest(z, nz) {
                        return None;
                    }
                    let z = (z.round().max(0.0) as usize).min(nz - 1);
                    let slice = self.data.index_axis(ndarray::Axis(0), z);
                    Some(Interpolator::bilinear_interpolate(&slice, y, x))
                }
            }
        }
    }

    pub fn sample_world(&self, world: DVec3, interpolation: Interpolation) -> Option<f32> {
        self.sample_voxel(self.world_to_voxel(world), interpolation)
    }

    fn offset_for_index(&self, z: f64) -> f64 {
        if self.uniform || self.slice_offsets.len() < 2 {
            return z * self.spacing.z;
        }
        let last = self.slice_offsets.len() - 1;
        if z <= 0.0 {
            let gap = self.slice_offsets[1] - self.slice_offsets[0];
            return z * gap;
        }
        if z >= last as f64 {
            let gap = self.slice_offsets[last] - self.slice_offsets[last - 1];
            return self.slice_offsets[last] + (z - last as f64) * gap;
        }
        let lower = z.floor() as usize;
        let t = z - lower as f64;
        let a = self.slice_offsets[lower];
        let b = self.slice_offsets[lower + 1];
        a + (b - a) * t
    }

    fn index_for_offset(&self, offset: f64) -> f64 {
        if self.uniform || self.slice_offsets.len() < 2 {
            return offset / self.spacing.z;
        }
        let offsets = &self.slice_offsets;
        let last = offsets.len() - 1;
        if offset <= offsets[0] {
            return (offset - offsets[0]) / (offsets[1] - offsets[0]);
        }
        if offset >= offsets[last] {
            return last as f64 + (offset - offsets[last]) / (offsets[last] - offsets[last - 1]);
        }
        // First slice strictly above `offset`.
        let upper = offsets.partition_point(|&o| o <= offset);
        let lower = upper - 1;
        let t = (offset - offsets[lower]) / (offsets[upper] - offsets[lower]);
        lower as f64 + t
    }
}

#[inline]
fn snap(c: f64) -> f64 {
    let rounded = c.round();
    if (c - rounded).abs() < SNAP_EPSILON {
        rounded
    } else {
        c
    }
}

#[inline]
fn within_nearest(c: f64, n: usize) -> bool {
    c >= -0.5 && c < n as f64 - 0.5
}

#[inline]
fn within_linear(c: f64, n: usize) -> bool {
    c >= 0.0 && c <= n as f64 - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_volume() -> Volume {
        let data = Array3::from_shape_fn((4, 3, 2), |(z, y, x)| (z * 100 + y * 10 + x) as f32);
        Volume::new(data, (0.5, 0.5, 2.0)).unwrap()
    }

    #[test]
    fn dimensions_are_reported_as_xyz() {
        assert_eq!(ramp_volume().dimensions(), (2, 3, 4));
    }

    #[test]
    fn world_voxel_round_trip() {
        let volume = ramp_volume();
        let voxel = DVec3::new(1.0, 2.0, 3.0);
        let world = volume.voxel_to_world(voxel);
        assert_eq!(world, DVec3::new(0.5, 1.0, 6.0));
        assert!((volume.world_to_voxel(world) - voxel).length() < 1e-12);
    }

    #[test]
    fn strict_lookup_reports_out_of_range() {
        let volume = ramp_volume();
        assert_eq!(volume.value(1, 2, 3).unwrap(), 321.0);
        assert!(matches!(
            volume.value(2, 0, 0),
            Err(ReconstructionError::OutOfRange { x: 2, .. })
        ));
    }

    #[test]
    fn samples_outside_the_volume_are_none() {
        let volume = ramp_volume();
        assert_eq!(
            volume.sample_voxel(DVec3::new(0.0, 0.0, 4.0), Interpolation::Trilinear),
            None
        );
        assert_eq!(
            volume.sample_voxel(DVec3::new(-0.7, 0.0, 0.0), Interpolation::Nearest),
            None
        );
        assert_eq!(
            volume.sample_voxel(DVec3::new(0.0, 1.0, 2.5), Interpolation::Trilinear),
            Some(260.0)
        );
    }

    #[test]
    fn irregular_stack_uses_nearest_slice() {
        let data = Array3::from_shape_fn((3, 2, 2), |(z, _, _)| z as f32);
        let volume = Volume::new(data, (1.0, 1.0, 1.0))
            .unwrap()
            .with_slice_offsets(vec![0.0, 1.0, 5.0], false);

        // 4 mm lies between slice 1 (1 mm) and slice 2 (5 mm), closer to slice 2.
        let voxel = volume.world_to_voxel(DVec3::new(0.0, 0.0, 4.0));
        assert!((voxel.z - 1.75).abs() < 1e-12);
        assert_eq!(volume.sample_voxel(voxel, Interpolation::Trilinear), Some(2.0));
        assert_eq!(volume.voxel_to_world(DVec3::new(0.0, 0.0, 2.0)).z, 5.0);
    }

    #[test]
    fn degenerate_spacing_is_rejected() {
        for spacing in [(1.0, 1.0, 0.0), (1.0, -0.5, 1.0), (f64::NAN, 1.0, 1.0)] {
            let result = Volume::new(Array3::zeros((2, 2, 2)), spacing);
            assert!(matches!(result, Err(ReconstructionError::InvalidConfig(_))));
        }
        let infinite = DVec3::new(1.0, 1.0, f64::INFINITY);
        let result =
            Volume::with_geometry(Array3::zeros((2, 2, 2)), infinite, DVec3::ZERO, DMat3::IDENTITY);
        assert!(result.is_err());
    }
}
