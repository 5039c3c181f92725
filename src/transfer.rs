//! Mapping of physical intensities to displayable rasters.

use std::{path::Path, str::FromStr};

use image::{GrayImage, ImageBuffer, ImageResult, Pixel, RgbImage};
use ndarray::ArrayView2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    config::ReconstructionConfig,
    error::{ReconstructionError, Result},
    statistics::{percentile, sorted_finite},
};

/// Typical Hounsfield value of air, the CT background.
pub const CT_AIR_VALUE: f32 = -1000.0;

fn default_bone_threshold() -> f32 {
    200.0
}

/// Thresholding policy for advisory hotspot / defect detection.
///
/// A pixel qualifies when it lies beyond the `percentile` of the image (above
/// it for hotspots, below it for defects) and, if set, beyond `fixed_cutoff`
/// as well. Qualifying pixels are grouped into 4-connected regions and
/// regions with fewer than `min_pixels` pixels are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionPolicy {
    pub percentile: f32,
    #[serde(default)]
    pub fixed_cutoff: Option<f32>,
    pub min_pixels: usize,
    /// Defects only: pixels at or below this value are background and never
    /// part of a defect. Defaults to the image minimum.
    #[serde(default)]
    pub floor: Option<f32>,
}

impl RegionPolicy {
    pub fn hotspots() -> Self {
        Self {
            percentile: 99.0,
            fixed_cutoff: None,
            min_pixels: 4,
            floor: None,
        }
    }

    pub fn defects() -> Self {
        Self {
            percentile: 5.0,
            fixed_cutoff: None,
            min_pixels: 4,
            floor: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(ReconstructionError::invalid_config(format!(
                "region percentile must lie in [0, 100], got {}",
                self.percentile
            )));
        }
        if self.min_pixels == 0 {
            return Err(ReconstructionError::invalid_config(
                "region min_pixels must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Modality specific behaviour layered on the linear window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "profile", rename_all = "kebab-case")]
pub enum ModalityProfile {
    /// Values below `threshold` map to background before windowing.
    CtBone {
        #[serde(default = "default_bone_threshold")]
        threshold: f32,
    },
    CtSoftTissue,
    MrT1,
    MrT2,
    /// Hue ramp keyed by normalised SUV, with hotspot detection.
    PetSuv {
        #[serde(default = "RegionPolicy::hotspots")]
        policy: RegionPolicy,
    },
    /// Hue ramp keyed by normalised uptake, with defect detection.
    SpectTracer {
        #[serde(default = "RegionPolicy::defects")]
        policy: RegionPolicy,
    },
    GenericLinear,
}

impl ModalityProfile {
    /// PET profile detecting hotspots with `config.hotspot`.
    pub fn pet_suv(config: &ReconstructionConfig) -> Self {
        ModalityProfile::PetSuv {
            policy: config.hotspot,
        }
    }

    /// SPECT profile detecting defects with `config.defect`.
    pub fn spect_tracer(config: &ReconstructionConfig) -> Self {
        ModalityProfile::SpectTracer {
            policy: config.defect,
        }
    }

    /// Replaces the tunables carried by the profile (bone threshold, region
    /// policies) with the ones from `config`.
    pub fn configured(self, config: &ReconstructionConfig) -> Self {
        match self {
            ModalityProfile::CtBone { .. } => ModalityProfile::CtBone {
                threshold: config.bone_threshold,
            },
            ModalityProfile::PetSuv { .. } => Self::pet_suv(config),
            ModalityProfile::SpectTracer { .. } => Self::spect_tracer(config),
            other => other,
        }
    }

    /// Value used for samples outside the volume.
    pub fn air_value(&self) -> f32 {
        match self {
            ModalityProfile::CtBone { .. } | ModalityProfile::CtSoftTissue => CT_AIR_VALUE,
            _ => 0.0,
        }
    }

    pub fn is_colormap(&self) -> bool {
        matches!(
            self,
            ModalityProfile::PetSuv { .. } | ModalityProfile::SpectTracer { .. }
        )
    }

    fn validate(&self) -> Result<()> {
        match self {
            ModalityProfile::CtBone { threshold } if !threshold.is_finite() => Err(
                ReconstructionError::invalid_config("bone threshold must be finite"),
            ),
            ModalityProfile::PetSuv { policy } | ModalityProfile::SpectTracer { policy } => {
                policy.validate()
            }
            _ => Ok(()),
        }
    }
}

impl FromStr for ModalityProfile {
    type Err = ReconstructionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "ct-bone" => Ok(ModalityProfile::CtBone {
                threshold: default_bone_threshold(),
            }),
            "ct-soft-tissue" => Ok(ModalityProfile::CtSoftTissue),
            "mr-t1" => Ok(ModalityProfile::MrT1),
            "mr-t2" => Ok(ModalityProfile::MrT2),
            "pet-suv" => Ok(ModalityProfile::PetSuv {
                policy: RegionPolicy::hotspots(),
            }),
            "spect-tracer" => Ok(ModalityProfile::SpectTracer {
                policy: RegionPolicy::defects(),
            }),
            "generic-linear" => Ok(ModalityProfile::GenericLinear),
            other => Err(ReconstructionError::invalid_config(format!(
                "unknown modality profile '{other}'"
            ))),
        }
    }
}

/// Named CT windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPreset {
    Lung,
    Bone,
    SoftTissue,
    Brain,
    Liver,
    Mediastinum,
}

impl WindowPreset {
    /// (center, width) in Hounsfield units.
    pub fn window(self) -> (f32, f32) {
        match self {
            WindowPreset::Lung => (-600.0, 1600.0),
            WindowPreset::Bone => (300.0, 1500.0),
            WindowPreset::SoftTissue => (40.0, 350.0),
            WindowPreset::Brain => (40.0, 80.0),
            WindowPreset::Liver => (60.0, 160.0),
            WindowPreset::Mediastinum => (50.0, 350.0),
        }
    }
}

impl FromStr for WindowPreset {
    type Err = ReconstructionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "lung" => Ok(WindowPreset::Lung),
            "bone" => Ok(WindowPreset::Bone),
            "soft_tissue" => Ok(WindowPreset::SoftTissue),
            "brain" => Ok(WindowPreset::Brain),
            "liver" => Ok(WindowPreset::Liver),
            "mediastinum" => Ok(WindowPreset::Mediastinum),
            other => Err(ReconstructionError::invalid_config(format!(
                "unknown window preset '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransferFunctionConfig {
    pub window_center: f32,
    pub window_width: f32,
    #[serde(default)]
    pub invert: bool,
    #[serde(flatten)]
    pub profile: ModalityProfile,
}

impl TransferFunctionConfig {
    pub fn new(window_center: f32, window_width: f32, profile: ModalityProfile) -> Self {
        Self {
            window_center,
            window_width,
            invert: false,
            profile,
        }
    }

    pub fn from_preset(preset: WindowPreset) -> Self {
        let (center, width) = preset.window();
        Self::new(center, width, ModalityProfile::CtSoftTissue)
    }

    /// Window spanning the 5th to 95th percentile of `image`.
    pub fn auto(image: ArrayView2<f32>, profile: ModalityProfile) -> Result<Self> {
        let sorted = sorted_finite(image.iter().copied());
        let (Some(p5), Some(p95)) = (percentile(&sorted, 5.0), percentile(&sorted, 95.0)) else {
            return Err(ReconstructionError::invalid_config(
                "cannot derive a window from an image without finite values",
            ));
        };
        Ok(Self::new((p5 + p95) / 2.0, (p95 - p5).max(1.0), profile))
    }

    pub fn inverted(mut self) -> Self {
        self.invert = !self.invert;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.window_width > 0.0 && self.window_width.is_finite()) {
            return Err(ReconstructionError::invalid_config(format!(
                "window width must be positive, got {}",
                self.window_width
            )));
        }
        if !self.window_center.is_finite() {
            return Err(ReconstructionError::invalid_config(
                "window center must be finite",
            ));
        }
        self.profile.validate()
    }

    fn lower_bound(&self) -> f32 {
        self.window_center - self.window_width / 2.0
    }

    /// Windowed grey value of one sample, before any colormap. Under the CT
    /// bone profile, samples below the threshold are background (0) whether
    /// or not the output is inverted.
    pub fn gray(&self, value: f32) -> u8 {
        if let ModalityProfile::CtBone { threshold } = self.profile {
            if !(value >= threshold) {
                return 0;
            }
        }
        self.finish(window_level(value, self.window_center, self.window_width))
    }

    /// Colour of one sample under the profile.
    pub fn rgb(&self, value: f32) -> [u8; 3] {
        let ramp = match self.profile {
            ModalityProfile::PetSuv { .. } => HueRamp::PET,
            ModalityProfile::SpectTracer { .. } => HueRamp::SPECT,
            _ => {
                let g = self.gray(value);
                return [g, g, g];
            }
        };
        let mut t = ((value - self.lower_bound()) / self.window_width).clamp(0.0, 1.0);
        if t.is_nan() {
            t = 0.0;
        }
        if self.invert {
            t = 1.0 - t;
        }
        ramp.color(t)
    }

    fn finish(&self, value: u8) -> u8 {
        if self.invert { invert(value) } else { value }
    }
}

/// Linear window/level onto `[0, 255]`.
pub fn window_level(value: f32, center: f32, width: f32) -> u8 {
    let lower = center - width / 2.0;
    let scaled = 255.0 * (value - lower) / width;
    if scaled.is_nan() {
        return 0;
    }
    scaled.clamp(0.0, 255.0).round() as u8
}

pub fn invert(value: u8) -> u8 {
    255 - value
}

/// Hue sweep from `start` to `end` degrees; brightness ramps up over the
/// first quarter so zero uptake stays black.
#[derive(Debug, Clone, Copy)]
struct HueRamp {
    start: f32,
    end: f32,
}

impl HueRamp {
    const PET: HueRamp = HueRamp {
        start: 240.0,
        end: 0.0,
    };
    const SPECT: HueRamp = HueRamp {
        start: 300.0,
        end: 0.0,
    };

    fn color(self, t: f32) -> [u8; 3] {
        let hue = self.start + (self.end - self.start) * t;
        let brightness = (t * 4.0).min(1.0);
        hsv_to_rgb(hue, 1.0, brightness)
    }
}

fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> [u8; 3] {
    let h = hue.rem_euclid(360.0) / 60.0;
    let c = value * saturation;
    let x = c * (1.0 - ((h % 2.0) - 1.0).abs());
    let m = value - c;
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let to_u8 = |v: f32| ((v + m) * 255.0).clamp(0.0, 255.0).round() as u8;
    [to_u8(r), to_u8(g), to_u8(b)]
}

/// Displayable raster handed to the caller for encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayImage {
    Gray(GrayImage),
    Rgb(RgbImage),
}

impl DisplayImage {
    pub fn width(&self) -> u32 {
        match self {
            DisplayImage::Gray(image) => image.width(),
            DisplayImage::Rgb(image) => image.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            DisplayImage::Gray(image) => image.height(),
            DisplayImage::Rgb(image) => image.height(),
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            DisplayImage::Gray(_) => 1,
            DisplayImage::Rgb(_) => 3,
        }
    }

    /// Row-major interleaved bytes.
    pub fn as_raw(&self) -> &[u8] {
        match self {
            DisplayImage::Gray(image) => image.as_raw(),
            DisplayImage::Rgb(image) => image.as_raw(),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> ImageResult<()> {
        match self {
            DisplayImage::Gray(image) => image.save(path),
            DisplayImage::Rgb(image) => image.save(path),
        }
    }
}

pub(crate) fn raster_from_vec<P>(
    width: usize,
    height: usize,
    data: Vec<u8>,
) -> Result<ImageBuffer<P, Vec<u8>>>
where
    P: Pixel<Subpixel = u8>,
{
    let too_large = || ReconstructionError::invalid_config("raster exceeds u32 dimensions");
    let width = u32::try_from(width).map_err(|_| too_large())?;
    let height = u32::try_from(height).map_err(|_| too_large())?;
    ImageBuffer::from_raw(width, height, data).ok_or_else(|| {
        ReconstructionError::invalid_config("raster buffer does not match its dimensions")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    Hotspot,
    Defect,
}

/// Advisory candidate region; not a diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRegion {
    pub kind: RegionKind,
    pub pixel_count: usize,
    /// (min col, min row, max col, max row), inclusive.
    pub bounding_box: (usize, usize, usize, usize),
    /// (col, row)
    pub centroid: (f64, f64),
    /// Maximum for hotspots, minimum for defects.
    pub peak: f32,
    pub mean: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RegionDetection {
    #[default]
    Skip,
    Detect,
}

#[derive(Debug, Clone)]
pub struct TransferOutput {
    pub image: DisplayImage,
    /// Present when detection was requested.
    pub regions: Option<Vec<CandidateRegion>>,
}

/// Maps a scalar image (`[row, col]`) to a displayable raster.
pub fn apply_transfer(
    image: ArrayView2<f32>,
    config: &TransferFunctionConfig,
    detection: RegionDetection,
) -> Result<TransferOutput> {
    config.validate()?;
    let (height, width) = image.dim();

    let display = if config.profile.is_colormap() {
        let data: Vec<u8> = image
            .outer_iter()
            .into_par_iter()
            .flat_map_iter(|row| {
                row.iter()
                    .flat_map(|&v| config.rgb(v))
                    .collect::<Vec<u8>>()
            })
            .collect();
        DisplayImage::Rgb(raster_from_vec(width, height, data)?)
    } else {
        let data: Vec<u8> = image
            .outer_iter()
            .into_par_iter()
            .flat_map_iter(|row| row.iter().map(|&v| config.gray(v)).collect::<Vec<u8>>())
            .collect();
        DisplayImage::Gray(raster_from_vec(width, height, data)?)
    };

    let regions = match detection {
        RegionDetection::Skip => None,
        RegionDetection::Detect => Some(detect_regions(image, config)?),
    };

    Ok(TransferOutput {
        image: display,
        regions,
    })
}

/// Hotspots for PET-SUV, defects for SPECT-tracer, nothing otherwise.
pub fn detect_regions(
    image: ArrayView2<f32>,
    config: &TransferFunctionConfig,
) -> Result<Vec<CandidateRegion>> {
    config.validate()?;
    let regions = match config.profile {
        ModalityProfile::PetSuv { policy } => detect_hotspots(image, &policy),
        ModalityProfile::SpectTracer { policy } => detect_defects(image, &policy),
        _ => Vec::new(),
    };
    debug!(regions = regions.len(), profile = ?config.profile, "region detection");
    Ok(regions)
}

fn detect_hotspots(image: ArrayView2<f32>, policy: &RegionPolicy) -> Vec<CandidateRegion> {
    let sorted = sorted_finite(image.iter().copied());
    let (Some(&min), Some(mut threshold)) =
        (sorted.first(), percentile(&sorted, f64::from(policy.percentile)))
    else {
        return Vec::new();
    };
    if let Some(cutoff) = policy.fixed_cutoff {
        threshold = threshold.max(cutoff);
    }
    if threshold <= min {
        // No contrast to speak of.
        return Vec::new();
    }
    label_regions(image, RegionKind::Hotspot, policy.min_pixels, |v| {
        v >= threshold
    })
}

fn detect_defects(image: ArrayView2<f32>, policy: &RegionPolicy) -> Vec<CandidateRegion> {
    let Some(image_min) = sorted_finite(image.iter().copied()).first().copied() else {
        return Vec::new();
    };
    let floor = policy.floor.unwrap_or(image_min);
    let candidates = sorted_finite(image.iter().copied().filter(|&v| v > floor));
    let (Some(&max), Some(mut threshold)) =
        (candidates.last(), percentile(&candidates, f64::from(policy.percentile)))
    else {
        return Vec::new();
    };
    if let Some(cutoff) = policy.fixed_cutoff {
        threshold = threshold.min(cutoff);
    }
    if threshold >= max {
        return Vec::new();
    }
    label_regions(image, RegionKind::Defect, policy.min_pixels, |v| {
        v > floor && v <= threshold
    })
}

/// 4-connected components of the pixels accepted by `inside`, in scan order.
fn label_regions(
    image: ArrayView2<f32>,
    kind: RegionKind,
    min_pixels: usize,
    inside: impl Fn(f32) -> bool,
) -> Vec<CandidateRegion> {
    let (height, width) = image.dim();
    let mut visited = vec![false; width * height];
    let mut regions = Vec::new();
    let mut stack = Vec::new();

    for start_row in 0..height {
        for start_col in 0..width {
            let start = start_row * width + start_col;
            if visited[start] || !inside(image[[start_row, start_col]]) {
                continue;
            }
            visited[start] = true;
            stack.push((start_row, start_col));

            let mut count = 0usize;
            let mut sum = 0f64;
            let (mut sum_col, mut sum_row) = (0f64, 0f64);
            let mut peak = image[[start_row, start_col]];
            let mut bbox = (start_col, start_row, start_col, start_row);

            while let Some((row, col)) = stack.pop() {
                let value = image[[row, col]];
                count += 1;
                sum += f64::from(value);
                sum_col += col as f64;
                sum_row += row as f64;
                peak = match kind {
                    RegionKind::Hotspot => peak.max(value),
                    RegionKind::Defect => peak.min(value),
                };
                bbox = (
                    bbox.0.min(col),
                    bbox.1.min(row),
                    bbox.2.max(col),
                    bbox.3.max(row),
                );

                let neighbours = [
                    (row.wrapping_sub(1), col),
                    (row + 1, col),
                    (row, col.wrapping_sub(1)),
                    (row, col + 1),
                ];
                for (r, c) in neighbours {
                    if r >= height || c >= width {
                        continue;
                    }
                    let index = r * width + c;
                    if !visited[index] && inside(image[[r, c]]) {
                        visited[index] = true;
                        stack.push((r, c));
                    }
                }
            }

            if count >= min_pixels {
                regions.push(CandidateRegion {
                    kind,
                    pixel_count: count,
                    bounding_box: bbox,
                    centroid: (sum_col / count as f64, sum_row / count as f64),
                    peak,
                    mean: (sum / count as f64) as f32,
                });
            }
        }
    }
    regions
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    #[test]
    fn linear_window_maps_bounds() {
        assert_eq!(window_level(-160.0, 40.0, 400.0), 0);
        assert_eq!(window_level(240.0, 40.0, 400.0), 255);
        assert_eq!(window_level(40.0, 40.0, 400.0), 128);
        assert_eq!(window_level(5000.0, 40.0, 400.0), 255);
        assert_eq!(window_level(f32::NAN, 40.0, 400.0), 0);
    }

    #[test]
    fn invert_twice_is_identity() {
        for value in 0..=255u8 {
            assert_eq!(invert(invert(value)), value);
        }
    }

    #[test]
    fn non_positive_width_is_rejected_before_work() {
        let config = TransferFunctionConfig::new(40.0, 0.0, ModalityProfile::GenericLinear);
        let image = Array2::<f32>::zeros((2, 2));
        assert!(matches!(
            apply_transfer(image.view(), &config, RegionDetection::Skip),
            Err(ReconstructionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn unknown_profile_name_is_invalid() {
        assert!("ct-lung".parse::<ModalityProfile>().is_err());
        assert_eq!(
            "PET_SUV".parse::<ModalityProfile>().unwrap(),
            ModalityProfile::PetSuv {
                policy: RegionPolicy::hotspots()
            }
        );
    }

    #[test]
    fn bone_profile_suppresses_soft_tissue() {
        let profile = ModalityProfile::CtBone { threshold: 200.0 };
        let config = TransferFunctionConfig::new(300.0, 1500.0, profile);
        assert_eq!(config.gray(150.0), 0);
        assert!(config.gray(700.0) > 0);
    }

    #[test]
    fn inverted_bone_profile_keeps_soft_tissue_black() {
        let profile = ModalityProfile::CtBone { threshold: 200.0 };
        let inverted = TransferFunctionConfig::new(300.0, 1500.0, profile).inverted();
        assert_eq!(inverted.gray(150.0), 0);
        assert_eq!(inverted.gray(f32::NAN), 0);
        assert!(inverted.gray(250.0) > inverted.gray(900.0));
    }

    #[test]
    fn pet_profile_produces_rgb() {
        let config = TransferFunctionConfig::new(5.0, 10.0, "pet-suv".parse().unwrap());
        let image = array![[0.0, 10.0]];
        let output = apply_transfer(image.view(), &config, RegionDetection::Skip).unwrap();
        assert_eq!(output.image.channels(), 3);
        assert_eq!(output.image.as_raw(), &[0, 0, 0, 255, 0, 0]);
        assert!(output.regions.is_none());
    }

    #[test]
    fn presets_match_known_windows() {
        let config = TransferFunctionConfig::from_preset("lung".parse().unwrap());
        assert_eq!((config.window_center, config.window_width), (-600.0, 1600.0));
    }

    #[test]
    fn auto_window_spans_inner_percentiles() {
        let image = Array2::from_shape_fn((1, 101), |(_, x)| x as f32);
        let config = TransferFunctionConfig::auto(image.view(), ModalityProfile::MrT1).unwrap();
        assert_eq!(config.window_center, 50.0);
        assert_eq!(config.window_width, 90.0);
    }

    #[test]
    fn pet_hotspot_is_reported_with_bounds() {
        let mut image = Array2::<f32>::from_elem((10, 10), 1.0);
        for row in 2..4 {
            for col in 5..7 {
                image[[row, col]] = 8.0;
            }
        }
        // 4 of 100 pixels are hot, so the 99th percentile lands on them.
        let policy = RegionPolicy::hotspots();
        let config = TransferFunctionConfig::new(4.0, 8.0, ModalityProfile::PetSuv { policy });
        let output = apply_transfer(image.view(), &config, RegionDetection::Detect).unwrap();
        let regions = output.regions.unwrap();
        assert_eq!(regions.len(), 1);
        let region = &regions[0];
        assert_eq!(region.kind, RegionKind::Hotspot);
        assert_eq!(region.pixel_count, 4);
        assert_eq!(region.bounding_box, (5, 2, 6, 3));
        assert_eq!(region.centroid, (5.5, 2.5));
        assert_eq!(region.peak, 8.0);
    }

    #[test]
    fn fixed_cutoff_suppresses_weak_hotspots() {
        let mut image = Array2::<f32>::from_elem((10, 10), 1.0);
        for row in 0..2 {
            for col in 0..2 {
                image[[row, col]] = 2.0;
            }
        }
        let policy = RegionPolicy {
            percentile: 90.0,
            fixed_cutoff: Some(2.5),
            ..RegionPolicy::hotspots()
        };
        let config = TransferFunctionConfig::new(4.0, 8.0, ModalityProfile::PetSuv { policy });
        assert!(detect_regions(image.view(), &config).unwrap().is_empty());
    }

    #[test]
    fn spect_defect_ignores_background() {
        let mut image = Array2::<f32>::zeros((8, 8));
        for row in 1..7 {
            for col in 1..7 {
                image[[row, col]] = 100.0;
            }
        }
        for row in 3..5 {
            for col in 3..5 {
                image[[row, col]] = 20.0;
            }
        }
        let policy = RegionPolicy {
            percentile: 10.0,
            ..RegionPolicy::defects()
        };
        let profile = ModalityProfile::SpectTracer { policy };
        let config = TransferFunctionConfig::new(50.0, 100.0, profile);
        let regions = detect_regions(image.view(), &config).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].kind, RegionKind::Defect);
        assert_eq!(regions[0].pixel_count, 4);
        assert_eq!(regions[0].peak, 20.0);
    }

    #[test]
    fn config_deserializes_from_flat_json() {
        let config: TransferFunctionConfig = serde_json::from_str(
            r#"{ "window_center": 300, "window_width": 1500, "profile": "ct-bone" }"#,
        )
        .unwrap();
        assert_eq!(config.profile, ModalityProfile::CtBone { threshold: 200.0 });
        assert!(!config.invert);

        let pet: TransferFunctionConfig = serde_json::from_str(
            r#"{ "window_center": 5, "window_width": 10, "profile": "pet-suv" }"#,
        )
        .unwrap();
        assert_eq!(
            pet.profile,
            ModalityProfile::PetSuv {
                policy: RegionPolicy::hotspots()
            }
        );

        let spect: TransferFunctionConfig = serde_json::from_str(
            r#"{ "window_center": 50, "window_width": 100, "profile": "spect-tracer" }"#,
        )
        .unwrap();
        assert_eq!(
            spect.profile,
            ModalityProfile::SpectTracer {
                policy: RegionPolicy::defects()
            }
        );
    }

    #[test]
    fn profiles_take_region_policies_from_the_config() {
        let config = ReconstructionConfig::from_json_str(
            r#"{ "hotspot": { "percentile": 95.0, "min_pixels": 2 },
                 "defect": { "percentile": 1.0, "min_pixels": 8, "floor": 10.0 },
                 "bone_threshold": 350.0 }"#,
        )
        .unwrap();

        let ModalityProfile::PetSuv { policy } = ModalityProfile::pet_suv(&config) else {
            panic!("expected a PET profile");
        };
        assert_eq!(policy.percentile, 95.0);
        assert_eq!(policy.min_pixels, 2);

        let spect = "spect-tracer".parse::<ModalityProfile>().unwrap().configured(&config);
        assert_eq!(spect, ModalityProfile::spect_tracer(&config));
        let ModalityProfile::SpectTracer { policy } = spect else {
            panic!("expected a SPECT profile");
        };
        assert_eq!(policy.floor, Some(10.0));

        let bone = "ct-bone".parse::<ModalityProfile>().unwrap().configured(&config);
        assert_eq!(bone, ModalityProfile::CtBone { threshold: 350.0 });
        assert_eq!(ModalityProfile::MrT1.configured(&config), ModalityProfile::MrT1);
    }
}
