use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ReconstructionError;

/// The three principal planes. Voxel axes are x = column, y = row,
/// z = slice index after sorting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Normal along z, shows (x, y).
    Axial,
    /// Normal along y, shows (x, z).
    Coronal,
    /// Normal along x, shows (y, z).
    Sagittal,
}

impl Orientation {
    pub const ALL: [Orientation; 3] = [
        Orientation::Axial,
        Orientation::Coronal,
        Orientation::Sagittal,
    ];

    /// Voxel axis (0 = x, 1 = y, 2 = z) running along the plane normal.
    pub fn normal_axis(self) -> usize {
        match self {
            Orientation::Axial => 2,
            Orientation::Coronal => 1,
            Orientation::Sagittal => 0,
        }
    }

    /// Voxel axes shown as (width, height) of the plane image.
    pub fn in_plane_axes(self) -> (usize, usize) {
        match self {
            Orientation::Axial => (0, 1),
            Orientation::Coronal => (0, 2),
            Orientation::Sagittal => (1, 2),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Orientation::Axial => "axial",
            Orientation::Coronal => "coronal",
            Orientation::Sagittal => "sagittal",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Closest voxel. Used for fast previews and non-uniform volumes.
    Nearest,
    #[default]
    Trilinear,
}

impl FromStr for Interpolation {
    type Err = ReconstructionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(Interpolation::Nearest),
            "trilinear" | "linear" => Ok(Interpolation::Trilinear),
            other => Err(ReconstructionError::invalid_config(format!(
                "unknown interpolation mode '{other}'"
            ))),
        }
    }
}

/// How intensities are reduced along a projection ray.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    /// MIP
    Max,
    /// MinIP
    Min,
    Average,
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reduction::Max => "mip",
            Reduction::Min => "minip",
            Reduction::Average => "average",
        };
        f.write_str(name)
    }
}

impl FromStr for Reduction {
    type Err = ReconstructionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "max" | "mip" => Ok(Reduction::Max),
            "min" | "minip" => Ok(Reduction::Min),
            "average" | "avg" | "mean" => Ok(Reduction::Average),
            other => Err(ReconstructionError::invalid_config(format!(
                "unknown reduction kind '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduction_names_parse() {
        assert_eq!("MIP".parse::<Reduction>().unwrap(), Reduction::Max);
        assert_eq!("minip".parse::<Reduction>().unwrap(), Reduction::Min);
        assert_eq!("average".parse::<Reduction>().unwrap(), Reduction::Average);
        assert!(matches!(
            "median".parse::<Reduction>(),
            Err(ReconstructionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn plane_axes_cover_all_three_axes() {
        for orientation in Orientation::ALL {
            let (u, v) = orientation.in_plane_axes();
            let mut axes = [u, v, orientation.normal_axis()];
            axes.sort_unstable();
            assert_eq!(axes, [0, 1, 2]);
        }
    }
}
