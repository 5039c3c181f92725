use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};

use crate::error::{ReconstructionError, Result};

/// Spatial metadata of one decoded slice, in patient (world) coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceGeometry {
    /// World position of the first transmitted pixel (top left corner).
    pub position: DVec3,
    /// Direction of increasing column index.
    pub row_direction: DVec3,
    /// Direction of increasing row index.
    pub col_direction: DVec3,
    /// (spacing between rows, spacing between columns) in mm.
    pub pixel_spacing: (f64, f64),
    pub slice_thickness: f64,
    pub rescale_slope: f64,
    pub rescale_intercept: f64,
    pub rows: usize,
    pub columns: usize,
    /// Acquisition order hint, only used to break ties.
    pub instance_index: i32,
}

impl SliceGeometry {
    /// Axis aligned slice at height `z` with identity rescale.
    pub fn axial(z: f64, rows: usize, columns: usize, pixel_spacing: (f64, f64)) -> Self {
        Self {
            position: DVec3::new(0.0, 0.0, z),
            row_direction: DVec3::X,
            col_direction: DVec3::Y,
            pixel_spacing,
            slice_thickness: 1.0,
            rescale_slope: 1.0,
            rescale_intercept: 0.0,
            rows,
            columns,
            instance_index: 0,
        }
    }

    pub fn with_instance_index(mut self, instance_index: i32) -> Self {
        self.instance_index = instance_index;
        self
    }

    pub fn with_rescale(mut self, slope: f64, intercept: f64) -> Self {
        self.rescale_slope = slope;
        self.rescale_intercept = intercept;
        self
    }

    /// Slice normal, `row_direction x col_direction`.
    pub fn normal(&self) -> DVec3 {
        self.row_direction.cross(self.col_direction)
    }

    /// Signed distance of the slice origin along `normal`.
    pub fn distance_along(&self, normal: DVec3) -> f64 {
        self.position.dot(normal)
    }

    /// Rejects direction cosines that are not orthonormal within `tolerance`
    /// and non-positive spacings.
    pub fn validate(&self, tolerance: f64) -> Result<()> {
        let row_len = self.row_direction.length();
        let col_len = self.col_direction.length();
        if (row_len - 1.0).abs() > tolerance || (col_len - 1.0).abs() > tolerance {
            return Err(ReconstructionError::GeometryMismatch(format!(
                "direction cosines are not unit vectors (|row| {row_len:.4}, |col| {col_len:.4})"
            )));
        }
        let dot = self.row_direction.dot(self.col_direction);
        if dot.abs() > tolerance {
            return Err(ReconstructionError::GeometryMismatch(format!(
                "row and column directions are not orthogonal (dot = {dot:.4})"
            )));
        }
        let (row_spacing, col_spacing) = self.pixel_spacing;
        if !(row_spacing > 0.0 && col_spacing > 0.0) {
            return Err(ReconstructionError::GeometryMismatch(format!(
                "pixel spacing must be positive, got {:?}",
                self.pixel_spacing
            )));
        }
        if self.rows == 0 || self.columns == 0 {
            return Err(ReconstructionError::GeometryMismatch(format!(
                "empty slice of {}x{} pixels",
                self.columns, self.rows
            )));
        }
        Ok(())
    }

    /// True when both direction cosines agree with `other` within `tolerance`.
    pub fn same_orientation(&self, other: &SliceGeometry, tolerance: f64) -> bool {
        let row = (self.row_direction - other.row_direction).abs().max_element();
        let col = (self.col_direction - other.col_direction).abs().max_element();
        row <= tolerance && col <= tolerance
    }
}

/// Orthonormal matrix whose columns are `u`, `v`, `n` for a plane normal `n`.
pub fn basis_for_normal(normal: DVec3) -> DMat3 {
    let n = normal.try_normalize().unwrap_or(DVec3::Z);

    // Seed with the axis least aligned with the normal.
    let abs_n = n.abs();
    let seed = if abs_n.x <= abs_n.y && abs_n.x <= abs_n.z {
        DVec3::X
    } else if abs_n.y <= abs_n.z {
        DVec3::Y
    } else {
        DVec3::Z
    };

    let u = n.cross(seed).normalize();
    let v = n.cross(u).normalize();
    DMat3::from_cols(u, v, n)
}
