//! Multiplanar reslicing of a [`Volume`] along orthogonal or oblique planes.

use glam::DVec3;
use ndarray::{Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;
use web_time::Instant;

use crate::{
    enums::{Interpolation, Orientation},
    error::{ReconstructionError, Result},
    geometry::basis_for_normal,
    volume::Volume,
};

/// A plane through the volume. `origin` is the crosshair position; `u` and
/// `v` span the plane and map to image columns and rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CuttingPlane {
    pub origin: DVec3,
    pub normal: DVec3,
    pub u: DVec3,
    pub v: DVec3,
}

impl CuttingPlane {
    /// Plane through `origin` aligned with the principal axes of `volume`.
    pub fn orthogonal(volume: &Volume, orientation: Orientation, origin: DVec3) -> Self {
        let axes = volume.orientation();
        let (x, y, z) = (axes.x_axis, axes.y_axis, axes.z_axis);
        let (u, v, normal) = match orientation {
            Orientation::Axial => (x, y, z),
            Orientation::Coronal => (x, z, y),
            Orientation::Sagittal => (y, z, x),
        };
        Self {
            origin,
            normal,
            u,
            v,
        }
    }

    /// Tilted plane through `origin` with an arbitrary in-plane basis.
    pub fn oblique(origin: DVec3, normal: DVec3) -> Result<Self> {
        let normal = normal.try_normalize().ok_or_else(|| {
            ReconstructionError::invalid_config(format!("degenerate plane normal {normal:?}"))
        })?;
        let basis = basis_for_normal(normal);
        Ok(Self {
            origin,
            normal,
            u: basis.x_axis,
            v: basis.y_axis,
        })
    }

    /// Signed distance of `point` from the plane.
    pub fn distance(&self, point: DVec3) -> f64 {
        (point - self.origin).dot(self.normal)
    }
}

/// Affine map between viewport pixels and world points on a cutting plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneMapping {
    /// World position of pixel (0, 0).
    pub top_left: DVec3,
    pub u: DVec3,
    pub v: DVec3,
    /// Millimetres per column.
    pub u_step: f64,
    /// Millimetres per row.
    pub v_step: f64,
    pub width: usize,
    pub height: usize,
}

impl PlaneMapping {
    /// Fits a `width` x `height` raster over the projection of the volume
    /// onto `plane`, so the whole volume cross-section is visible.
    pub fn fit(volume: &Volume, plane: &CuttingPlane, width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ReconstructionError::invalid_config(format!(
                "raster size must be positive, got {width}x{height}"
            )));
        }
        let (mut u_min, mut u_max) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut v_min, mut v_max) = (f64::INFINITY, f64::NEG_INFINITY);
        for corner in volume.corners() {
            let offset = corner - plane.origin;
            let (cu, cv) = (offset.dot(plane.u), offset.dot(plane.v));
            u_min = u_min.min(cu);
            u_max = u_max.max(cu);
            v_min = v_min.min(cv);
            v_max = v_max.max(cv);
        }

        let step = |min: f64, max: f64, count: usize| {
            if count > 1 {
                (max - min) / (count - 1) as f64
            } else {
                0.0
            }
        };

        Ok(Self {
            top_left: plane.origin + plane.u * u_min + plane.v * v_min,
            u: plane.u,
            v: plane.v,
            u_step: step(u_min, u_max, width),
            v_step: step(v_min, v_max, height),
            width,
            height,
        })
    }

    pub fn to_world(&self, col: f64, row: f64) -> DVec3 {
        self.top_left + self.u * (col * self.u_step) + self.v * (row * self.v_step)
    }

    /// Viewport coordinate (col, row) of the projection of `world` onto the plane.
    pub fn to_viewport(&self, world: DVec3) -> (f64, f64) {
        let offset = world - self.top_left;
        let col = if self.u_step > 0.0 {
            offset.dot(self.u) / self.u_step
        } else {
            0.0
        };
        let row = if self.v_step > 0.0 {
            offset.dot(self.v) / self.v_step
        } else {
            0.0
        };
        (col, row)
    }

    /// Clamps a viewport coordinate onto the raster.
    pub fn clamp(&self, col: f64, row: f64) -> (f64, f64) {
        (
            col.clamp(0.0, (self.width - 1) as f64),
            row.clamp(0.0, (self.height - 1) as f64),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResampleOptions {
    pub interpolation: Interpolation,
    /// Value written where the plane leaves the volume.
    pub background: f32,
}

impl Default for ResampleOptions {
    fn default() -> Self {
        Self {
            interpolation: Interpolation::Trilinear,
            background: 0.0,
        }
    }
}

/// Raster size of an orthogonal reslice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterSize {
    /// One pixel per voxel.
    #[default]
    Native,
    /// Scaled so pixels are square in millimetres.
    Isotropic,
    Fixed { width: usize, height: usize },
}

impl RasterSize {
    /// (width, height) for a plane of `orientation`.
    pub fn resolve(self, volume: &Volume, orientation: Orientation) -> (usize, usize) {
        let dims = match self {
            RasterSize::Native => volume.dimensions(),
            RasterSize::Isotropic => volume.isotropic_dimensions(),
            RasterSize::Fixed { width, height } => return (width, height),
        };
        let dims = [dims.0, dims.1, dims.2];
        let (u, v) = orientation.in_plane_axes();
        (dims[u], dims[v])
    }
}

pub struct Resampler;

impl Resampler {
    /// Reslices `volume` along `plane` into a `width` x `height` image
    /// (indexed `[row, col]`). Samples outside the volume take
    /// `options.background`; the image is always complete.
    pub fn reslice(
        volume: &Volume,
        plane: &CuttingPlane,
        (width, height): (usize, usize),
        options: ResampleOptions,
    ) -> Result<Array2<f32>> {
        if !plane.origin.is_finite() || !plane.u.is_finite() || !plane.v.is_finite() {
            return Err(ReconstructionError::invalid_config(
                "cutting plane must have finite origin and basis",
            ));
        }
        let mapping = PlaneMapping::fit(volume, plane, width, height)?;
        Ok(Self::reslice_mapping(volume, &mapping, options))
    }

    /// Orthogonal reslice through `origin`. Returns the image together with
    /// the mapping used, so callers can place overlays.
    pub fn reslice_orthogonal(
        volume: &Volume,
        orientation: Orientation,
        origin: DVec3,
        raster: RasterSize,
        options: ResampleOptions,
    ) -> Result<(Array2<f32>, PlaneMapping)> {
        let plane = CuttingPlane::orthogonal(volume, orientation, origin);
        let (width, height) = raster.resolve(volume, orientation);
        let mapping = PlaneMapping::fit(volume, &plane, width, height)?;
        let image = Self::reslice_mapping(volume, &mapping, options);
        Ok((image, mapping))
    }

    pub fn reslice_mapping(
        volume: &Volume,
        mapping: &PlaneMapping,
        options: ResampleOptions,
    ) -> Array2<f32> {
        let started = Instant::now();
        let mut image =
            Array2::<f32>::from_elem((mapping.height, mapping.width), options.background);

        image
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(row, mut line)| {
                for (col, pixel) in line.iter_mut().enumerate() {
                    let world = mapping.to_world(col as f64, row as f64);
                    if let Some(value) = volume.sample_world(world, options.interpolation) {
                        *pixel = value;
                    }
                }
            });

        debug!(
            width = mapping.width,
            height = mapping.height,
            interpolation = ?options.interpolation,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "resliced plane"
        );
        image
    }
}
