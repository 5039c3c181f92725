use ndarray::{ArrayView2, ArrayView3, Axis};

pub(crate) struct Interpolator;

impl Interpolator {
    /// Raster size (width, height, depth) that keeps physical aspect ratios
    /// when every axis is resampled to the finest spacing. Counts are sample
    /// positions, so an axis of `n` voxels spans `n - 1` gaps.
    pub(crate) fn get_isotropic_dimensions(
        spacing: (f64, f64, f64),
        dimensions: (usize, usize, usize),
    ) -> (usize, usize, usize) {
        let (x_spacing, y_spacing, z_spacing) = spacing;
        let min_spacing = x_spacing.min(y_spacing).min(z_spacing);
        let inv_min_spacing = 1.0 / min_spacing;

        let scale = |count: usize, spacing: f64| {
            let gaps = count.saturating_sub(1) as f64 * spacing * inv_min_spacing;
            gaps.round() as usize + 1
        };

        (
            scale(dimensions.0, x_spacing),
            scale(dimensions.1, y_spacing),
            scale(dimensions.2, z_spacing),
        )
    }

    /// Bilinear sample of `slice` (rows, columns) at in-bounds coordinates.
    #[inline]
    pub(crate) fn bilinear_interpolate(slice: &ArrayView2<f32>, y: f64, x: f64) -> f32 {
        let (height, width) = slice.dim();

        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let y1 = (y0 + 1).min(height - 1);
        let x1 = (x0 + 1).min(width - 1);

        let dy = (y - y0 as f64) as f32;
        let dx = (x - x0 as f64) as f32;
        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;

        let v00 = slice[[y0, x0]];
        let v01 = slice[[y0, x1]];
        let v10 = slice[[y1, x0]];
        let v11 = slice[[y1, x1]];

        let v0 = v00.mul_add(one_minus_dx, v01 * dx);
        let v1 = v10.mul_add(one_minus_dx, v11 * dx);

        v0.mul_add(one_minus_dy, v1 * dy)
    }

    /// Trilinear sample of `data` (depth, rows, columns) at in-bounds coordinates.
    #[inline]
    pub(crate) fn trilinear_interpolate(data: &ArrayView3<f32>, z: f64, y: f64, x: f64) -> f32 {
        let depth = data.dim().0;
        let z0 = z.floor() as usize;
        let z1 = (z0 + 1).min(depth - 1);
        let dz = (z - z0 as f64) as f32;

        let lower = Self::bilinear_interpolate(&data.index_axis(Axis(0), z0), y, x);
        if dz == 0.0 || z1 == z0 {
            return lower;
        }
        let upper = Self::bilinear_interpolate(&data.index_axis(Axis(0), z1), y, x);

        lower.mul_add(1.0 - dz, upper * dz)
    }

    #[inline]
    pub(crate) fn nearest(data: &ArrayView3<f32>, z: f64, y: f64, x: f64) -> f32 {
        let (depth, height, width) = data.dim();
        let z = (z.round().max(0.0) as usize).min(depth - 1);
        let y = (y.round().max(0.0) as usize).min(height - 1);
        let x = (x.round().max(0.0) as usize).min(width - 1);
        data[[z, y, x]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn isotropic_dimensions_stretch_coarse_axes() {
        let dims = Interpolator::get_isotropic_dimensions((0.5, 0.5, 2.0), (10, 10, 4));
        assert_eq!(dims, (10, 10, 13));
    }

    #[test]
    fn single_voxel_axis_keeps_one_sample() {
        let dims = Interpolator::get_isotropic_dimensions((1.0, 1.0, 3.0), (4, 4, 1));
        assert_eq!(dims, (4, 4, 1));
    }

    #[test]
    fn trilinear_midpoint_is_mean_of_corners() {
        let data = Array3::from_shape_fn((2, 2, 2), |(z, y, x)| (z * 4 + y * 2 + x) as f32);
        let value = Interpolator::trilinear_interpolate(&data.view(), 0.5, 0.5, 0.5);
        assert!((value - 3.5).abs() < 1e-6);
    }

    #[test]
    fn integer_coordinates_return_exact_voxels() {
        let data = Array3::from_shape_fn((3, 3, 3), |(z, y, x)| (z * 9 + y * 3 + x) as f32);
        let view = data.view();
        assert_eq!(Interpolator::trilinear_interpolate(&view, 2.0, 1.0, 2.0), 23.0);
        assert_eq!(Interpolator::nearest(&view, 1.4, 0.6, 2.2), 14.0);
    }
}
