//! Compositing ray-march renderer.

use std::{
    cmp::Ordering as CmpOrdering,
    str::FromStr,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use glam::DVec3;
use image::RgbImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use web_time::Instant;

use crate::{
    config::ReconstructionConfig,
    enums::{Interpolation, Orientation},
    error::{ReconstructionError, Result},
    resampler::{CuttingPlane, PlaneMapping, RasterSize},
    transfer::raster_from_vec,
    volume::Volume,
};

/// Sampling density. The step is a multiple of the finest voxel spacing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderQuality {
    Fast,
    #[default]
    Normal,
    High,
}

impl RenderQuality {
    pub fn step_factor(self) -> f64 {
        match self {
            RenderQuality::Fast => 2.0,
            RenderQuality::Normal => 1.0,
            RenderQuality::High => 0.5,
        }
    }
}

impl FromStr for RenderQuality {
    type Err = ReconstructionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fast" | "low" => Ok(RenderQuality::Fast),
            "normal" => Ok(RenderQuality::Normal),
            "high" | "ultra" => Ok(RenderQuality::High),
            other => Err(ReconstructionError::invalid_config(format!(
                "unknown render quality '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    pub value: f32,
    /// Linear RGB in [0, 1].
    pub color: [f32; 3],
    /// Opacity per reference step, in [0, 1].
    pub opacity: f32,
}

/// Piecewise linear colour and opacity over the intensity domain. Values
/// outside the control points take the nearest end point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorOpacityFunction {
    points: Vec<ControlPoint>,
}

impl ColorOpacityFunction {
    pub fn new(mut points: Vec<ControlPoint>) -> Result<Self> {
        if points.is_empty() {
            return Err(ReconstructionError::invalid_config(
                "transfer function needs at least one control point",
            ));
        }
        let unit = |v: f32| (0.0..=1.0).contains(&v);
        if let Some(bad) = points
            .iter()
            .find(|p| !p.value.is_finite() || !unit(p.opacity) || !p.color.iter().all(|&c| unit(c)))
        {
            return Err(ReconstructionError::invalid_config(format!(
                "control point out of range: {bad:?}"
            )));
        }
        points.sort_by(|a, b| a.value.partial_cmp(&b.value).unwrap_or(CmpOrdering::Equal));
        Ok(Self { points })
    }

    pub fn transparent() -> Self {
        Self {
            points: vec![ControlPoint {
                value: 0.0,
                color: [0.0; 3],
                opacity: 0.0,
            }],
        }
    }

    /// Zero opacity below `threshold`, a steep rise over the next 100 units
    /// approximating the bone surface.
    pub fn bone(threshold: f32) -> Self {
        Self {
            points: vec![
                ControlPoint {
                    value: threshold,
                    color: [0.9, 0.85, 0.75],
                    opacity: 0.0,
                },
                ControlPoint {
                    value: threshold + 100.0,
                    color: [0.95, 0.92, 0.84],
                    opacity: 0.8,
                },
                ControlPoint {
                    value: threshold + 1000.0,
                    color: [1.0, 1.0, 1.0],
                    opacity: 0.95,
                },
            ],
        }
    }

    /// Grey ramp across a window with a soft maximum opacity.
    pub fn grayscale(center: f32, width: f32, max_opacity: f32) -> Result<Self> {
        if !(width > 0.0) {
            return Err(ReconstructionError::invalid_config(format!(
                "window width must be positive, got {width}"
            )));
        }
        Self::new(vec![
            ControlPoint {
                value: center - width / 2.0,
                color: [0.0; 3],
                opacity: 0.0,
            },
            ControlPoint {
                value: center + width / 2.0,
                color: [1.0; 3],
                opacity: max_opacity,
            },
        ])
    }

    pub fn is_transparent(&self) -> bool {
        self.points.iter().all(|p| p.opacity == 0.0)
    }

    pub fn evaluate(&self, value: f32) -> ([f32; 3], f32) {
        let upper = self.points.partition_point(|p| p.value <= value);
        if upper == 0 {
            let first = self.points[0];
            return (first.color, first.opacity);
        }
        if upper == self.points.len() {
            let last = self.points[upper - 1];
            return (last.color, last.opacity);
        }
        let (a, b) = (self.points[upper - 1], self.points[upper]);
        let t = (value - a.value) / (b.value - a.value);
        let lerp = |x: f32, y: f32| x + (y - x) * t;
        (
            [
                lerp(a.color[0], b.color[0]),
                lerp(a.color[1], b.color[1]),
                lerp(a.color[2], b.color[2]),
            ],
            lerp(a.opacity, b.opacity),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewDirection {
    /// Looking along the normal of a principal plane; the image has the
    /// same layout as the matching reslice.
    Principal(Orientation),
    Arbitrary(DVec3),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    pub quality: RenderQuality,
    pub interpolation: Interpolation,
    pub background: [u8; 3],
    pub early_termination: f32,
    /// (width, height); defaults to the native plane raster.
    pub raster: Option<(usize, usize)>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::from_config(&ReconstructionConfig::default())
    }
}

impl RenderOptions {
    pub fn from_config(config: &ReconstructionConfig) -> Self {
        Self {
            quality: config.quality,
            interpolation: config.interpolation,
            background: [0, 0, 0],
            early_termination: config.early_termination,
            raster: None,
        }
    }
}

/// Orthographic camera derived from a view direction.
struct Camera {
    mapping: PlaneMapping,
    direction: DVec3,
    near: f64,
    far: f64,
}

impl Camera {
    fn new(volume: &Volume, view: ViewDirection, raster: Option<(usize, usize)>) -> Result<Self> {
        let center = volume.center();
        let (plane, default_raster) = match view {
            ViewDirection::Principal(orientation) => (
                CuttingPlane::orthogonal(volume, orientation, center),
                RasterSize::Native.resolve(volume, orientation),
            ),
            ViewDirection::Arbitrary(direction) => {
                let (nx, ny, nz) = volume.dimensions();
                let side = nx.max(ny).max(nz);
                (CuttingPlane::oblique(center, direction)?, (side, side))
            }
        };
        let (width, height) = raster.unwrap_or(default_raster);
        let mapping = PlaneMapping::fit(volume, &plane, width, height)?;

        let (mut near, mut far) = (f64::INFINITY, f64::NEG_INFINITY);
        for corner in volume.corners() {
            let depth = plane.distance(corner);
            near = near.min(depth);
            far = far.max(depth);
        }
        Ok(Self {
            mapping,
            direction: plane.normal,
            near,
            far,
        })
    }
}

pub struct VolumeRenderer;

impl VolumeRenderer {
    pub fn render(
        volume: &Volume,
        transfer: &ColorOpacityFunction,
        view: ViewDirection,
        options: RenderOptions,
    ) -> Result<RgbImage> {
        Self::render_cancellable(volume, transfer, view, options, &AtomicBool::new(false))
    }

    /// "Bone 3D": the renderer with [`ColorOpacityFunction::bone`].
    pub fn render_bone(
        volume: &Volume,
        threshold: f32,
        view: ViewDirection,
        options: RenderOptions,
    ) -> Result<RgbImage> {
        Self::render(volume, &ColorOpacityFunction::bone(threshold), view, options)
    }

    /// Like [`VolumeRenderer::render`], but gives up with
    /// `ReconstructionError::Cancelled` once `cancel` is set. The flag is
    /// checked before each image row.
    pub fn render_cancellable(
        volume: &Volume,
        transfer: &ColorOpacityFunction,
        view: ViewDirection,
        options: RenderOptions,
        cancel: &AtomicBool,
    ) -> Result<RgbImage> {
        Self::render_with_progress(volume, transfer, view, options, cancel, &|_, _| {})
    }

    /// Cancellable render that reports `(rows_done, total_rows)` to
    /// `progress` after every finished row. Calls come from worker threads and
    /// may interleave; a completed render reports `total_rows` exactly once.
    pub fn render_with_progress(
        volume: &Volume,
        transfer: &ColorOpacityFunction,
        view: ViewDirection,
        options: RenderOptions,
        cancel: &AtomicBool,
        progress: &(dyn Fn(usize, usize) + Sync),
    ) -> Result<RgbImage> {
        if !(options.early_termination > 0.0 && options.early_termination <= 1.0) {
            return Err(ReconstructionError::invalid_config(
                "early_termination must lie in (0, 1]",
            ));
        }
        let started = Instant::now();
        let camera = Camera::new(volume, view, options.raster)?;
        let spacing = volume.spacing();
        let reference_step = spacing.x.min(spacing.y).min(spacing.z);
        let step_factor = options.quality.step_factor();
        let step = reference_step * step_factor;
        let span = (camera.far - camera.near) / step;
        if !(step > 0.0) || !span.is_finite() || span < 0.0 {
            return Err(ReconstructionError::invalid_config(format!(
                "cannot march a volume with spacing {spacing:?}"
            )));
        }
        let samples = span.floor() as usize + 1;
        let (width, height) = (camera.mapping.width, camera.mapping.height);
        let rows_done = AtomicUsize::new(0);

        let rows: Vec<Vec<u8>> = (0..height)
            .into_par_iter()
            .map(|row| {
                if cancel.load(Ordering::Relaxed) {
                    return Err(ReconstructionError::Cancelled);
                }
                let mut line = Vec::with_capacity(width * 3);
                for col in 0..width {
                    let entry = camera.mapping.to_world(col as f64, row as f64)
                        + camera.direction * camera.near;
                    let pixel = Self::march(
                        volume,
                        transfer,
                        entry,
                        camera.direction * step,
                        samples,
                        step_factor,
                        &options,
                    );
                    line.extend_from_slice(&pixel);
                }
                let done = rows_done.fetch_add(1, Ordering::AcqRel) + 1;
                progress(done, height);
                Ok(line)
            })
            .collect::<Result<_>>()?;

        let image = raster_from_vec(width, height, rows.concat())?;
        info!(
            width,
            height,
            samples,
            quality = ?options.quality,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rendered volume"
        );
        Ok(image)
    }

    /// Front-to-back compositing along one ray.
    fn march(
        volume: &Volume,
        transfer: &ColorOpacityFunction,
        entry: DVec3,
        delta: DVec3,
        samples: usize,
        step_factor: f64,
        options: &RenderOptions,
    ) -> [u8; 3] {
        let mut color = [0f32; 3];
        let mut alpha = 0f32;

        for i in 0..samples {
            let point = entry + delta * i as f64;
            let Some(value) = volume.sample_world(point, options.interpolation) else {
                continue;
            };
            let (sample_color, sample_opacity) = transfer.evaluate(value);
            if sample_opacity <= 0.0 {
                continue;
            }
            // Opacity correction for steps other than the reference spacing.
            let sample_alpha = 1.0 - (1.0 - sample_opacity).powf(step_factor as f32);
            let weight = (1.0 - alpha) * sample_alpha;
            for (c, s) in color.iter_mut().zip(sample_color) {
                *c += weight * s;
            }
            alpha += weight;
            if alpha >= options.early_termination {
                break;
            }
        }

        let mut pixel = [0u8; 3];
        for ((out, c), bg) in pixel.iter_mut().zip(color).zip(options.background) {
            let value = c * 255.0 + (1.0 - alpha) * f32::from(bg);
            *out = value.clamp(0.0, 255.0).round() as u8;
        }
        pixel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn block_volume() -> Volume {
        let data = Array3::from_shape_fn((6, 6, 6), |(z, y, x)| {
            if (2..4).contains(&z) && (2..4).contains(&y) && (2..4).contains(&x) {
                1000.0
            } else {
                0.0
            }
        });
        Volume::new(data, (1.0, 1.0, 1.0)).unwrap()
    }

    #[test]
    fn transfer_function_interpolates_and_clamps() {
        let tf = ColorOpacityFunction::grayscale(50.0, 100.0, 0.5).unwrap();
        assert_eq!(tf.evaluate(-10.0), ([0.0; 3], 0.0));
        assert_eq!(tf.evaluate(50.0), ([0.5; 3], 0.25));
        assert_eq!(tf.evaluate(500.0), ([1.0; 3], 0.5));
    }

    #[test]
    fn invalid_control_points_are_rejected() {
        let result = ColorOpacityFunction::new(vec![ControlPoint {
            value: 0.0,
            color: [0.0; 3],
            opacity: 1.5,
        }]);
        assert!(matches!(result, Err(ReconstructionError::InvalidConfig(_))));
    }

    #[test]
    fn bone_render_shows_block_only_where_rays_hit_it() {
        let options = RenderOptions::default();
        let image = VolumeRenderer::render_bone(
            &block_volume(),
            200.0,
            ViewDirection::Principal(Orientation::Axial),
            options,
        )
        .unwrap();
        assert_eq!(image.dimensions(), (6, 6));
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0]);
        assert!(image.get_pixel(2, 2).0[0] > 200);
    }

    #[test]
    fn cancelled_render_aborts() {
        let cancel = AtomicBool::new(true);
        let result = VolumeRenderer::render_cancellable(
            &block_volume(),
            &ColorOpacityFunction::bone(200.0),
            ViewDirection::Arbitrary(DVec3::new(1.0, 1.0, 0.0)),
            RenderOptions::default(),
            &cancel,
        );
        assert!(matches!(result, Err(ReconstructionError::Cancelled)));
    }

    #[test]
    fn progress_counts_every_row() {
        let calls = AtomicUsize::new(0);
        let furthest = AtomicUsize::new(0);
        let image = VolumeRenderer::render_with_progress(
            &block_volume(),
            &ColorOpacityFunction::bone(200.0),
            ViewDirection::Principal(Orientation::Coronal),
            RenderOptions::default(),
            &AtomicBool::new(false),
            &|done, total| {
                assert_eq!(total, 6);
                calls.fetch_add(1, Ordering::Relaxed);
                furthest.fetch_max(done, Ordering::Relaxed);
            },
        )
        .unwrap();
        assert_eq!(image.height(), 6);
        assert_eq!(calls.into_inner(), 6);
        assert_eq!(furthest.into_inner(), 6);
    }

    #[test]
    fn flat_volume_renders_a_single_sample_per_ray() {
        let data = Array3::from_elem((1, 3, 3), 1000.0);
        let volume = Volume::new(data, (1.0, 1.0, 1.0)).unwrap();
        let image = VolumeRenderer::render_bone(
            &volume,
            200.0,
            ViewDirection::Principal(Orientation::Axial),
            RenderOptions::default(),
        )
        .unwrap();
        assert!(image.pixels().all(|p| p.0[0] > 0));
    }

    #[test]
    fn quality_names_parse() {
        assert_eq!("HIGH".parse::<RenderQuality>().unwrap(), RenderQuality::High);
        assert!("best".parse::<RenderQuality>().is_err());
    }
}
