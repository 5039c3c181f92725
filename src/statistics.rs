//! Summary statistics over images and volumes.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::volume::Volume;

/// Finite values of `values`, sorted ascending.
pub fn sorted_finite(values: impl IntoIterator<Item = f32>) -> Vec<f32> {
    let mut sorted: Vec<f32> = values.into_iter().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    sorted
}

/// Percentile `p` (0 to 100) of ascending `sorted` values, linearly
/// interpolated between closest ranks. `None` for an empty input.
pub fn percentile(sorted: &[f32], p: f64) -> Option<f32> {
    let last = sorted.len().checked_sub(1)?;
    let rank = (p.clamp(0.0, 100.0) / 100.0) * last as f64;
    let lower = rank.floor() as usize;
    let upper = (lower + 1).min(last);
    let t = (rank - lower as f64) as f32;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * t)
}

fn mean_and_std(sorted: &[f32]) -> (f32, f32) {
    let n = sorted.len() as f64;
    let mean = sorted.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let variance = sorted
        .iter()
        .map(|&v| (f64::from(v) - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean as f32, variance.sqrt() as f32)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageStatistics {
    pub count: usize,
    pub mean: f32,
    pub std: f32,
    pub min: f32,
    pub max: f32,
    pub median: f32,
    pub p5: f32,
    pub p95: f32,
}

impl ImageStatistics {
    /// Statistics over the finite values, or `None` when there are none.
    pub fn compute(values: impl IntoIterator<Item = f32>) -> Option<Self> {
        let sorted = sorted_finite(values);
        if sorted.is_empty() {
            return None;
        }
        let (mean, std) = mean_and_std(&sorted);
        Some(Self {
            count: sorted.len(),
            mean,
            std,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            median: percentile(&sorted, 50.0)?,
            p5: percentile(&sorted, 5.0)?,
            p95: percentile(&sorted, 95.0)?,
        })
    }
}

/// Density statistics of the voxels above a bone threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoneDensityStatistics {
    pub bone_voxels: usize,
    pub total_voxels: usize,
    pub bone_percentage: f32,
    pub mean_density: f32,
    pub std_density: f32,
    pub min_density: f32,
    pub max_density: f32,
    pub median_density: f32,
    pub p5: f32,
    pub p25: f32,
    pub p75: f32,
    pub p95: f32,
}

impl BoneDensityStatistics {
    /// `None` when no voxel exceeds `threshold`.
    pub fn compute(volume: &Volume, threshold: f32) -> Option<Self> {
        let bone = sorted_finite(volume.data().iter().copied().filter(|&v| v > threshold));
        if bone.is_empty() {
            return None;
        }
        let total_voxels = volume.voxel_count();
        let (mean, std) = mean_and_std(&bone);
        Some(Self {
            bone_voxels: bone.len(),
            total_voxels,
            bone_percentage: (bone.len() as f64 / total_voxels as f64 * 100.0) as f32,
            mean_density: mean,
            std_density: std,
            min_density: bone[0],
            max_density: bone[bone.len() - 1],
            median_density: percentile(&bone, 50.0)?,
            p5: percentile(&bone, 5.0)?,
            p25: percentile(&bone, 25.0)?,
            p75: percentile(&bone, 75.0)?,
            p95: percentile(&bone, 95.0)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn percentile_interpolates_between_ranks() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&sorted, 0.0), Some(1.0));
        assert_eq!(percentile(&sorted, 50.0), Some(2.5));
        assert_eq!(percentile(&sorted, 100.0), Some(4.0));
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn statistics_ignore_non_finite_values() {
        let stats = ImageStatistics::compute([1.0, f32::NAN, 3.0, f32::INFINITY]).unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.mean, 2.0);
        assert_eq!(stats.std, 1.0);
        assert_eq!((stats.min, stats.max, stats.median), (1.0, 3.0, 2.0));
    }

    #[test]
    fn bone_statistics_only_count_dense_voxels() {
        let data = Array3::from_shape_fn((2, 2, 2), |(z, _, x)| {
            if z == 1 { 400.0 + x as f32 * 200.0 } else { 40.0 }
        });
        let volume = Volume::new(data, (1.0, 1.0, 1.0)).unwrap();
        let stats = BoneDensityStatistics::compute(&volume, 200.0).unwrap();
        assert_eq!(stats.bone_voxels, 4);
        assert_eq!(stats.bone_percentage, 50.0);
        assert_eq!(stats.mean_density, 500.0);
        assert!(BoneDensityStatistics::compute(&volume, 1000.0).is_none());
    }
}
