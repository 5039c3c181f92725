//! Adapter from DICOM series on disk to [`DecodedSlice`]s.

use std::{fs, path::Path};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder},
};
use dicom_dictionary_std::tags;
use glam::DVec3;
use ndarray::{Array2, s};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    assembler::{DecodedSlice, VolumeAssembler},
    config::ReconstructionConfig,
    error::ReconstructionError,
    geometry::SliceGeometry,
    volume::Volume,
};

type DicomObject = FileDicomObject<InMemDicomObject>;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Missing or malformed attribute {0}")]
    MissingAttribute(&'static str),

    #[error("Pixel data could not be decoded: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error(transparent)]
    Reconstruction(#[from] ReconstructionError),
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Geometry and stored pixel values of every decodable image object.
    /// Objects without pixel data or geometry are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeLoaderError::NoValidImages`] if nothing could be decoded.
    pub fn slices_from_dicom_objects(
        dicom_objects: &[DicomObject],
    ) -> Result<Vec<DecodedSlice>, VolumeLoaderError> {
        let slices: Vec<_> = dicom_objects
            .par_iter()
            .enumerate()
            .filter_map(|(index, dicom_object)| match Self::decode_slice(dicom_object) {
                Ok(slice) => Some(slice),
                Err(error) => {
                    warn!(index, %error, "skipping DICOM object");
                    None
                }
            })
            .collect();

        if slices.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }
        Ok(slices)
    }

    pub fn slices_from_file_paths(
        paths: &[impl AsRef<Path> + Sync],
    ) -> Result<Vec<DecodedSlice>, VolumeLoaderError> {
        let objects: Result<Vec<_>, _> = paths
            .par_iter()
            .map(|path| open_file(path.as_ref()))
            .collect();

        Self::slices_from_dicom_objects(&objects?)
    }

    /// Reads every `.dcm` file in `path`.
    pub fn slices_from_directory(
        path: impl AsRef<Path>,
    ) -> Result<Vec<DecodedSlice>, VolumeLoaderError> {
        let paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }
        info!(directory = %path.as_ref().display(), files = paths.len(), "reading DICOM series");

        Self::slices_from_file_paths(&paths)
    }

    /// Reads and assembles the series in `path`.
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        config: &ReconstructionConfig,
    ) -> Result<Volume, VolumeLoaderError> {
        let slices = Self::slices_from_directory(path)?;
        Ok(VolumeAssembler::from_config(config).assemble(slices)?)
    }

    fn decode_slice(dicom_object: &DicomObject) -> Result<DecodedSlice, VolumeLoaderError> {
        let geometry = Self::geometry(dicom_object)?;
        let pixels = Self::decode_pixels(dicom_object)?;
        Ok(DecodedSlice::new(pixels, geometry))
    }

    /// First frame, first sample, stored values. Rescale is applied by the
    /// assembler from the geometry.
    fn decode_pixels(dicom_object: &DicomObject) -> Result<Array2<f32>, VolumeLoaderError> {
        let pixel_data = dicom_object
            .decode_pixel_data()
            .map_err(|e| VolumeLoaderError::Decode(e.to_string()))?;
        let options = ConvertOptions::new().with_modality_lut(ModalityLutOption::None);
        pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
            .map_err(|e| VolumeLoaderError::Decode(e.to_string()))
    }

    fn geometry(dicom_object: &DicomObject) -> Result<SliceGeometry, VolumeLoaderError> {
        let position = Self::floats(
            dicom_object,
            tags::IMAGE_POSITION_PATIENT,
            "ImagePositionPatient",
            3,
        )?;
        let cosines = Self::floats(
            dicom_object,
            tags::IMAGE_ORIENTATION_PATIENT,
            "ImageOrientationPatient",
            6,
        )?;
        let pixel_spacing = Self::floats(dicom_object, tags::PIXEL_SPACING, "PixelSpacing", 2)?;

        let rows = Self::dimension(dicom_object, tags::ROWS, "Rows")?;
        let columns = Self::dimension(dicom_object, tags::COLUMNS, "Columns")?;
        let slice_thickness =
            Self::optional_float(dicom_object, tags::SLICE_THICKNESS).unwrap_or(0.0);
        let slope = Self::optional_float(dicom_object, tags::RESCALE_SLOPE).unwrap_or(1.0);
        let intercept = Self::optional_float(dicom_object, tags::RESCALE_INTERCEPT).unwrap_or(0.0);
        let instance_index = Self::int(dicom_object, tags::INSTANCE_NUMBER, "InstanceNumber")
            .ok()
            .and_then(|n| i32::try_from(n).ok())
            .unwrap_or(0);

        Ok(SliceGeometry {
            position: DVec3::new(position[0], position[1], position[2]),
            row_direction: DVec3::new(cosines[0], cosines[1], cosines[2]),
            col_direction: DVec3::new(cosines[3], cosines[4], cosines[5]),
            pixel_spacing: (pixel_spacing[0], pixel_spacing[1]),
            slice_thickness,
            rescale_slope: slope,
            rescale_intercept: intercept,
            rows,
            columns,
            instance_index,
        })
    }

    fn floats(
        dicom_object: &DicomObject,
        tag: dicom::core::Tag,
        name: &'static str,
        count: usize,
    ) -> Result<Vec<f64>, VolumeLoaderError> {
        dicom_object
            .element(tag)
            .ok()
            .and_then(|element| element.to_multi_float64().ok())
            .filter(|values| values.len() >= count)
            .ok_or(VolumeLoaderError::MissingAttribute(name))
    }

    fn optional_float(dicom_object: &DicomObject, tag: dicom::core::Tag) -> Option<f64> {
        dicom_object.element(tag).ok()?.to_float64().ok()
    }

    fn int(
        dicom_object: &DicomObject,
        tag: dicom::core::Tag,
        name: &'static str,
    ) -> Result<i64, VolumeLoaderError> {
        dicom_object
            .element(tag)
            .ok()
            .and_then(|element| element.to_int::<i64>().ok())
            .ok_or(VolumeLoaderError::MissingAttribute(name))
    }

    fn dimension(
        dicom_object: &DicomObject,
        tag: dicom::core::Tag,
        name: &'static str,
    ) -> Result<usize, VolumeLoaderError> {
        usize::try_from(Self::int(dicom_object, tag, name)?)
            .map_err(|_| VolumeLoaderError::MissingAttribute(name))
    }
}
