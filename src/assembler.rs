use std::cmp::Ordering;

use glam::{DMat3, DVec3};
use ndarray::{Array2, Array3, Axis};
use rayon::prelude::*;
use tracing::{info, warn};
use web_time::Instant;

use crate::{
    config::ReconstructionConfig,
    error::{ReconstructionError, Result},
    geometry::SliceGeometry,
    volume::Volume,
};

/// Slice gaps shorter than this (mm) count as two slices at the same position.
const DUPLICATE_POSITION_EPSILON: f64 = 1e-4;

/// One decoded slice: stored pixel values (rows, columns) before rescale.
#[derive(Debug, Clone)]
pub struct DecodedSlice {
    pub pixels: Array2<f32>,
    pub geometry: SliceGeometry,
}

impl DecodedSlice {
    pub fn new<T>(pixels: Array2<T>, geometry: SliceGeometry) -> Self
    where
        T: Copy + Into<f32>,
    {
        Self {
            pixels: pixels.mapv(Into::into),
            geometry,
        }
    }
}

/// Builds a [`Volume`] from the slices of one series.
pub struct VolumeAssembler {
    orientation_tolerance: f64,
    spacing_tolerance: f64,
}

impl Default for VolumeAssembler {
    fn default() -> Self {
        Self::from_config(&ReconstructionConfig::default())
    }
}

impl VolumeAssembler {
    pub fn from_config(config: &ReconstructionConfig) -> Self {
        Self {
            orientation_tolerance: config.orientation_tolerance,
            spacing_tolerance: config.spacing_tolerance,
        }
    }

    /// Assemble slices given in any order.
    ///
    /// # Errors
    ///
    /// `InsufficientData` for fewer than two slices, `GeometryMismatch` for
    /// invalid direction cosines, differing in-plane dimensions or
    /// orientations, or two slices at the same position.
    pub fn assemble(&self, slices: Vec<DecodedSlice>) -> Result<Volume> {
        let started = Instant::now();
        if slices.len() < 2 {
            return Err(ReconstructionError::InsufficientData {
                slices: slices.len(),
            });
        }

        self.validate_geometry(&slices)?;

        let reference = slices[0].geometry.clone();
        let normal = reference.normal().normalize();
        let mut slices = slices;
        Self::sort_slices(&mut slices, normal);

        let distances: Vec<f64> = slices
            .iter()
            .map(|slice| slice.geometry.distance_along(normal))
            .collect();
        let (slice_spacing, uniform) = self.slice_spacing(&distances)?;
        if !uniform {
            warn!(
                slices = slices.len(),
                median_spacing = slice_spacing,
                "irregular slice spacing, volume will be sampled from nearest slices"
            );
        }

        let data = Self::build_volume_array(&slices);

        let first = &slices[0].geometry;
        let (row_spacing, col_spacing) = first.pixel_spacing;
        let spacing = DVec3::new(col_spacing, row_spacing, slice_spacing);
        let orientation = DMat3::from_cols(
            first.row_direction.normalize(),
            first.col_direction.normalize(),
            normal,
        );
        let offsets: Vec<f64> = distances.iter().map(|d| d - distances[0]).collect();

        let volume = Volume::with_geometry(data, spacing, first.position, orientation)?
            .with_slice_offsets(offsets, uniform);

        info!(
            slices = slices.len(),
            dimensions = ?volume.dimensions(),
            spacing = ?(spacing.x, spacing.y, spacing.z),
            uniform,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "assembled volume"
        );
        Ok(volume)
    }

    fn validate_geometry(&self, slices: &[DecodedSlice]) -> Result<()> {
        let reference = &slices[0].geometry;
        for (index, slice) in slices.iter().enumerate() {
            let geometry = &slice.geometry;
            geometry.validate(self.orientation_tolerance).map_err(|e| match e {
                ReconstructionError::GeometryMismatch(detail) => {
                    ReconstructionError::GeometryMismatch(format!("slice {index}: {detail}"))
                }
                other => other,
            })?;

            let (rows, columns) = slice.pixels.dim();
            if rows != geometry.rows || columns != geometry.columns {
                return Err(ReconstructionError::GeometryMismatch(format!(
                    "slice {index}: pixel array is {columns}x{rows} but geometry declares {}x{}",
                    geometry.columns, geometry.rows
                )));
            }
            if rows != reference.rows || columns != reference.columns {
                return Err(ReconstructionError::GeometryMismatch(format!(
                    "slice {index}: dimensions {columns}x{rows} differ from {}x{}",
                    reference.columns, reference.rows
                )));
            }
            if !geometry.same_orientation(reference, self.orientation_tolerance) {
                return Err(ReconstructionError::GeometryMismatch(format!(
                    "slice {index}: orientation {:?}/{:?} differs from {:?}/{:?}",
                    geometry.row_direction,
                    geometry.col_direction,
                    reference.row_direction,
                    reference.col_direction
                )));
            }
        }
        Ok(())
    }

    fn sort_slices(slices: &mut [DecodedSlice], normal: DVec3) {
        slices.sort_by(|a, b| {
            let da = a.geometry.distance_along(normal);
            let db = b.geometry.distance_along(normal);
            da.partial_cmp(&db)
                .unwrap_or(Ordering::Equal)
                .then(a.geometry.instance_index.cmp(&b.geometry.instance_index))
        });
    }

    /// Median gap between consecutive slices and whether all gaps stay within
    /// tolerance of it.
    fn slice_spacing(&self, distances: &[f64]) -> Result<(f64, bool)> {
        let mut gaps: Vec<f64> = distances.windows(2).map(|w| w[1] - w[0]).collect();
        if let Some(index) = gaps.iter().position(|&g| g < DUPLICATE_POSITION_EPSILON) {
            return Err(ReconstructionError::GeometryMismatch(format!(
                "slices {index} and {} share the same position ({:.4} mm)",
                index + 1,
                distances[index]
            )));
        }

        let uneven = gaps.clone();
        gaps.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let mid = gaps.len() / 2;
        let median = if gaps.len() % 2 == 0 {
            (gaps[mid - 1] + gaps[mid]) / 2.0
        } else {
            gaps[mid]
        };

        let uniform = uneven
            .iter()
            .all(|g| (g - median).abs() <= self.spacing_tolerance * median);
        Ok((median, uniform))
    }

    fn build_volume_array(slices: &[DecodedSlice]) -> Array3<f32> {
        let (height, width) = slices[0].pixels.dim();
        let depth = slices.len();
        let mut volume = Array3::<f32>::zeros((depth, height, width));

        volume
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(slices.par_iter())
            .for_each(|(mut target, slice)| {
                let slope = slice.geometry.rescale_slope as f32;
                let intercept = slice.geometry.rescale_intercept as f32;
                target.zip_mut_with(&slice.pixels, |out, &stored| {
                    *out = stored.mul_add(slope, intercept);
                });
            });

        volume
    }
}
