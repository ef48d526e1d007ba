//! Reading DICOM files into [`SliceRecord`]s.
//!
//! The loader is the only part of the crate touching the DICOM object model.
//! Everything downstream works on the decoded records.

use crate::record::{FrameGeometry, ImageOrientation, PixelBuffer, SliceRecord, TagValue};

use dicom::{
    core::{Tag, VR, header::Header},
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use nalgebra::Vector3;
use rayon::prelude::*;
use std::{collections::BTreeMap, fs, path::Path};
use thiserror::Error;

const PER_FRAME_FUNCTIONAL_GROUPS: Tag = Tag(0x5200, 0x9230);
const SHARED_FUNCTIONAL_GROUPS: Tag = Tag(0x5200, 0x9229);
const PLANE_POSITION: Tag = Tag(0x0020, 0x9113);
const PLANE_ORIENTATION: Tag = Tag(0x0020, 0x9116);
const PIXEL_MEASURES: Tag = Tag(0x0028, 0x9110);
const FRAME_CONTENT: Tag = Tag(0x0020, 0x9111);
const TEMPORAL_POSITION_INDEX: Tag = Tag(0x0020, 0x9128);
const IN_STACK_POSITION_NUMBER: Tag = Tag(0x0020, 0x9057);
const MR_DIFFUSION: Tag = Tag(0x0018, 0x9117);
const DIFFUSION_B_VALUE: Tag = Tag(0x0018, 0x9087);
const DIFFUSION_GRADIENT_DIRECTION: Tag = Tag(0x0018, 0x9076);
const DIFFUSION_GRADIENT_ORIENTATION: Tag = Tag(0x0018, 0x9089);
const PIXEL_VALUE_TRANSFORMATION: Tag = Tag(0x0028, 0x9145);

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

pub struct SeriesLoader;

impl SeriesLoader {
    /// Decode DICOM objects into slice records
    ///
    /// Objects are decoded in parallel. Objects whose pixel data cannot be
    /// decoded still produce a record, without pixels.
    ///
    /// # Errors
    ///
    /// Returns error if no objects were given
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
    ) -> Result<Vec<SliceRecord>, LoaderError> {
        if dicom_objects.is_empty() {
            return Err(LoaderError::NoValidImages);
        }
        Ok(dicom_objects
            .par_iter()
            .map(Self::record_from_dicom_object)
            .collect())
    }

    /// Load records from file paths, skipping files that are not DICOM
    pub fn load_from_file_paths(paths: &[impl AsRef<Path> + Sync]) -> Result<Vec<SliceRecord>, LoaderError> {
        let records: Vec<_> = paths
            .par_iter()
            .filter_map(|path| match open_file(path.as_ref()) {
                Ok(object) => Some(Self::record_from_dicom_object(&object)),
                Err(error) => {
                    log::warn!("Skipping {}: {error}", path.as_ref().display());
                    None
                }
            })
            .collect();

        if records.is_empty() {
            return Err(LoaderError::NoValidImages);
        }
        Ok(records)
    }

    /// Load records from every regular file in a directory
    ///
    /// DICOM files often come without extension, so no extension filter is
    /// applied; files that fail to parse are skipped.
    pub fn load_from_directory(path: impl AsRef<Path>) -> Result<Vec<SliceRecord>, LoaderError> {
        let mut paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(LoaderError::NoValidImages);
        }

        Self::load_from_file_paths(&paths)
    }

    /// Split records by Series Instance UID, in order of first appearance.
    pub fn group_by_series(records: Vec<SliceRecord>) -> Vec<Vec<SliceRecord>> {
        let mut order: Vec<Option<String>> = Vec::new();
        let mut groups: BTreeMap<usize, Vec<SliceRecord>> = BTreeMap::new();
        for record in records {
            let index = match order.iter().position(|uid| *uid == record.series_uid) {
                Some(index) => index,
                None => {
                    order.push(record.series_uid.clone());
                    order.len() - 1
                }
            };
            groups.entry(index).or_default().push(record);
        }
        groups.into_values().collect()
    }

    pub fn record_from_dicom_object(dicom_object: &FileDicomObject<InMemDicomObject>) -> SliceRecord {
        let mut record = Self::read_attributes(dicom_object);
        let transfer_syntax = dicom_object
            .meta()
            .transfer_syntax()
            .trim_end_matches(|c: char| c == '\0' || c.is_whitespace());
        record.transfer_syntax = Some(transfer_syntax.to_string());
        record.pixels = Self::decode_pixels(dicom_object);
        Self::rescale_pixels(&mut record);
        record
    }

    /// Read every attribute the pipeline uses, except pixel data.
    pub fn read_attributes(object: &InMemDicomObject) -> SliceRecord {
        let shared = first_item(object, SHARED_FUNCTIONAL_GROUPS);
        let frames = object
            .element(PER_FRAME_FUNCTIONAL_GROUPS)
            .ok()
            .and_then(|element| element.items())
            .map(|items| {
                items
                    .iter()
                    .map(|item| Self::frame_geometry(item, shared))
                    .collect()
            })
            .unwrap_or_default();

        SliceRecord {
            series_uid: text(object, tags::SERIES_INSTANCE_UID),
            instance_number: int(object, tags::INSTANCE_NUMBER),
            image_position: vector(object, tags::IMAGE_POSITION_PATIENT),
            image_orientation: floats(object, tags::IMAGE_ORIENTATION_PATIENT)
                .and_then(|cosines| ImageOrientation::from_cosines(&cosines)),
            pixel_spacing: spacing(object),
            slice_thickness: float(object, tags::SLICE_THICKNESS),
            spacing_between_slices: float(object, tags::SPACING_BETWEEN_SLICES),
            rows: int(object, tags::ROWS).and_then(|rows| u16::try_from(rows).ok()),
            columns: int(object, tags::COLUMNS).and_then(|columns| u16::try_from(columns).ok()),
            photometric_interpretation: text(object, tags::PHOTOMETRIC_INTERPRETATION),
            modality: text(object, tags::MODALITY),
            image_type: object
                .element(tags::IMAGE_TYPE)
                .ok()
                .and_then(|element| element.to_multi_str().ok())
                .map(|values| values.iter().map(|value| value.trim().to_string()).collect())
                .unwrap_or_default(),
            repetition_time: float(object, tags::REPETITION_TIME),
            echo_time: float(object, tags::ECHO_TIME),
            rescale_slope: float(object, tags::RESCALE_SLOPE),
            rescale_intercept: float(object, tags::RESCALE_INTERCEPT),
            manufacturer: text(object, tags::MANUFACTURER),
            transfer_syntax: None,
            frames,
            private_tags: Self::private_tags(object),
            pixels: None,
        }
    }

    fn frame_geometry(item: &InMemDicomObject, shared: Option<&InMemDicomObject>) -> FrameGeometry {
        // per-frame macros override the shared ones
        let group = |sequence: Tag| first_item(item, sequence).or_else(|| shared.and_then(|s| first_item(s, sequence)));
        let frame_content = group(FRAME_CONTENT);
        let diffusion = group(MR_DIFFUSION);
        let transformation = group(PIXEL_VALUE_TRANSFORMATION);

        FrameGeometry {
            position: group(PLANE_POSITION).and_then(|plane| vector(plane, tags::IMAGE_POSITION_PATIENT)),
            orientation: group(PLANE_ORIENTATION)
                .and_then(|plane| floats(plane, tags::IMAGE_ORIENTATION_PATIENT))
                .and_then(|cosines| ImageOrientation::from_cosines(&cosines)),
            pixel_spacing: group(PIXEL_MEASURES).and_then(spacing),
            temporal_index: frame_content.and_then(|content| int(content, TEMPORAL_POSITION_INDEX)),
            stack_position: frame_content.and_then(|content| int(content, IN_STACK_POSITION_NUMBER)),
            b_value: diffusion.and_then(|diffusion| float(diffusion, DIFFUSION_B_VALUE)),
            gradient: diffusion
                .and_then(|diffusion| first_item(diffusion, DIFFUSION_GRADIENT_DIRECTION))
                .and_then(|direction| vector(direction, DIFFUSION_GRADIENT_ORIENTATION)),
            rescale_slope: transformation.and_then(|transformation| float(transformation, tags::RESCALE_SLOPE)),
            rescale_intercept: transformation
                .and_then(|transformation| float(transformation, tags::RESCALE_INTERCEPT)),
        }
    }

    /// Elements of odd groups, keyed by tag.
    fn private_tags(object: &InMemDicomObject) -> BTreeMap<Tag, TagValue> {
        object
            .iter()
            .filter(|element| element.tag().group() % 2 == 1 && element.vr() != VR::SQ)
            .filter_map(|element| {
                let value = match element.vr() {
                    VR::UN | VR::OB | VR::OW => TagValue::from_raw_bytes(&element.to_bytes().ok()?),
                    VR::LO | VR::SH | VR::LT | VR::ST | VR::UT | VR::CS | VR::UI => {
                        TagValue::Text(element.to_str().ok()?.trim().to_string())
                    }
                    _ => match element.to_multi_float64() {
                        Ok(numbers) => TagValue::Numbers(numbers),
                        Err(_) => TagValue::Text(element.to_str().ok()?.trim().to_string()),
                    },
                };
                Some((element.tag(), value))
            })
            .collect()
    }

    fn decode_pixels(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<PixelBuffer> {
        let pixel_data = match dicom_object.decode_pixel_data() {
            Ok(pixel_data) => pixel_data,
            Err(error) => {
                log::warn!("Could not decode pixel data: {error}");
                return None;
            }
        };
        // stored values, rescaled per frame afterwards
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::None)
            .with_voi_lut(VoiLutOption::Identity);
        pixel_data
            .to_ndarray_with_options::<i32>(&options)
            .map_err(|error| log::warn!("Could not convert pixel data: {error}"))
            .ok()
    }

    /// Map stored values to modality values with Rescale Slope and Intercept.
    ///
    /// A frame's own pixel value transformation takes precedence over the
    /// one of the object. Results are rounded to integers; color data is
    /// left alone.
    fn rescale_pixels(record: &mut SliceRecord) {
        if record.is_rgb() {
            return;
        }
        let Some(pixels) = record.pixels.as_mut() else {
            return;
        };
        for (index, mut frame) in pixels.outer_iter_mut().enumerate() {
            let geometry = record.frames.get(index);
            let slope = geometry
                .and_then(|geometry| geometry.rescale_slope)
                .or(record.rescale_slope)
                .unwrap_or(1.0);
            let intercept = geometry
                .and_then(|geometry| geometry.rescale_intercept)
                .or(record.rescale_intercept)
                .unwrap_or(0.0);
            if slope == 1.0 && intercept == 0.0 {
                continue;
            }
            frame.mapv_inplace(|value| (f64::from(value) * slope + intercept).round() as i32);
        }
    }
}

fn first_item(object: &InMemDicomObject, sequence: Tag) -> Option<&InMemDicomObject> {
    object.element(sequence).ok()?.items()?.first()
}

fn floats(object: &InMemDicomObject, tag: Tag) -> Option<Vec<f64>> {
    object.element(tag).ok()?.to_multi_float64().ok()
}

fn float(object: &InMemDicomObject, tag: Tag) -> Option<f64> {
    floats(object, tag)?.first().copied()
}

fn int(object: &InMemDicomObject, tag: Tag) -> Option<i32> {
    object.element(tag).ok()?.to_int::<i32>().ok()
}

fn text(object: &InMemDicomObject, tag: Tag) -> Option<String> {
    let value = object.element(tag).ok()?.to_str().ok()?;
    let value = value.trim_end_matches('\0').trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn vector(object: &InMemDicomObject, tag: Tag) -> Option<Vector3<f64>> {
    match floats(object, tag)?.as_slice() {
        [x, y, z, ..] => Some(Vector3::new(*x, *y, *z)),
        _ => None,
    }
}

fn spacing(object: &InMemDicomObject) -> Option<[f64; 2]> {
    match floats(object, tags::PIXEL_SPACING)?.as_slice() {
        [row, column, ..] => Some([*row, *column]),
        _ => None,
    }
}
