//! # DICOM reconstruction library
//!
//! This crate turns a stack of decoded DICOM slices into a volume and
//! derives the views a PACS viewer shows from it.
//!
//! Slices arrive as pixel arrays with their spatial metadata
//! ([`SliceGeometry`]). The [`VolumeAssembler`] sorts them along the slice
//! normal, checks that they belong together and stacks them into a
//! [`Volume`] in physical units. [`VolumeLoader`] does the same starting
//! from `.dcm` files on disk. From a volume the library produces:
//!  - multiplanar reslices along the axial, coronal and sagittal planes or
//!    any oblique plane ([`Resampler`], optionally [`GpuResampler`])
//!  - maximum, minimum and average intensity projections, optionally
//!    limited to a slab ([`ProjectionEngine`])
//!  - composited volume renderings such as a bone view ([`VolumeRenderer`])
//!
//! Scalar images become displayable rasters through a modality aware
//! [`TransferFunctionConfig`]: window/level for CT and MR, colour maps with
//! hotspot or defect detection for PET and SPECT.
//!
//! A [`CrosshairSession`] keeps the 3D cursor of one viewer in sync across
//! the three orthogonal views; [`SessionRegistry`] holds one per viewer.
//! Heavy per-pixel work runs in parallel on rayon, and results do not
//! depend on the number of threads.
//!
//! # Examples
//!
//! ## Maximum intensity projection of a series
//!
//! ```no_run
//! # use dicom_reconstruction::{
//! #     ProjectionEngine, Reduction, ReconstructionConfig, TransferFunctionConfig, VolumeLoader,
//! #     WindowPreset, apply_transfer, RegionDetection,
//! # };
//! let config = ReconstructionConfig::default();
//! let volume = VolumeLoader::load_from_directory("dicom", &config)
//!     .expect("should have assembled the series");
//! let projections = ProjectionEngine::project(&volume, Reduction::Max, None);
//! let transfer = TransferFunctionConfig::from_preset(WindowPreset::Bone);
//! let output = apply_transfer(projections.coronal.view(), &transfer, RegionDetection::Skip)
//!     .expect("bone window is valid");
//! output.image.save("coronal_mip.png").expect("should have written the image");
//! ```

pub mod assembler;
pub mod config;
pub mod crosshair;
pub mod enums;
pub mod error;
pub mod geometry;
pub mod gpu_resampler;
mod interpolator;
pub mod projection;
pub mod renderer;
pub mod resampler;
pub mod statistics;
pub mod transfer;
pub mod volume;
pub mod volume_loader;

pub use assembler::{DecodedSlice, VolumeAssembler};
pub use config::ReconstructionConfig;
pub use crosshair::{
    CrosshairOverlay, CrosshairSession, CrosshairState, CrosshairUpdate, InteractionState,
    PlaneSet, SessionId, SessionRegistry,
};
pub use enums::{Interpolation, Orientation, Reduction};
pub use error::{ReconstructionError, Result};
pub use geometry::SliceGeometry;
pub use gpu_resampler::{GpuContext, GpuResampler};
pub use projection::{ProjectionEngine, Projections, Slab};
pub use renderer::{
    ColorOpacityFunction, ControlPoint, RenderOptions, RenderQuality, ViewDirection,
    VolumeRenderer,
};
pub use resampler::{CuttingPlane, PlaneMapping, RasterSize, ResampleOptions, Resampler};
pub use statistics::{BoneDensityStatistics, ImageStatistics};
pub use transfer::{
    CandidateRegion, DisplayImage, ModalityProfile, RegionDetection, RegionKind, RegionPolicy,
    TransferFunctionConfig, TransferOutput, WindowPreset, apply_transfer, detect_regions, invert,
    window_level,
};
pub use volume::Volume;
pub use volume_loader::{VolumeLoader, VolumeLoaderError};
