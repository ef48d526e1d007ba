//! Decoded slice records and the per-plane views the pipeline works on.
//!
//! A [`SliceRecord`] holds what the tag decoder produced for one file.
//! Absent tags are `None`. The pipeline never mutates records; it works on
//! [`Slice`] views, one per physical plane, which it reorders, filters and
//! groups.

use std::collections::BTreeMap;

use dicom::core::Tag;
use nalgebra::Vector3;
use ndarray::{Array4, ArrayView3, Axis};

use crate::enums::Orientation;

/// Decoded pixels laid out as `(frames, rows, columns, samples)`.
pub type PixelBuffer = Array4<i32>;

/// Modalities of objects that carry no image volume.
const NON_IMAGING_MODALITIES: [&str; 6] = ["SR", "PR", "KO", "DOC", "RTPLAN", "RTSTRUCT"];

/// Value of a vendor private tag.
///
/// Private tags are often stored without a dictionary entry, so the same
/// attribute can reach us as binary numbers or as backslash separated text.
#[derive(Clone, Debug, PartialEq)]
pub enum TagValue {
    Numbers(Vec<f64>),
    Text(String),
}

impl TagValue {
    pub fn numbers(&self) -> Vec<f64> {
        match self {
            TagValue::Numbers(values) => values.clone(),
            TagValue::Text(text) => text
                .split('\\')
                .map(|part| part.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
                .filter(|part| !part.is_empty())
                .filter_map(|part| part.parse::<f64>().ok())
                .collect(),
        }
    }

    pub fn first(&self) -> Option<f64> {
        self.numbers().first().copied()
    }

    /// Interpret the bytes of an element with unknown VR.
    pub fn from_raw_bytes(bytes: &[u8]) -> Self {
        let trimmed = bytes
            .iter()
            .rposition(|b| *b != 0 && *b != b' ')
            .map_or(&bytes[..0], |end| &bytes[..=end]);
        if !trimmed.is_empty() && trimmed.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            return TagValue::Text(String::from_utf8_lossy(trimmed).into_owned());
        }
        if !bytes.is_empty() && bytes.len() % 8 == 0 {
            let values = bytes
                .chunks_exact(8)
                .map(|chunk| {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(chunk);
                    f64::from_le_bytes(buf)
                })
                .collect();
            return TagValue::Numbers(values);
        }
        if !bytes.is_empty() && bytes.len() % 4 == 0 {
            let values = bytes
                .chunks_exact(4)
                .map(|chunk| {
                    let mut buf = [0u8; 4];
                    buf.copy_from_slice(chunk);
                    f32::from_le_bytes(buf) as f64
                })
                .collect();
            return TagValue::Numbers(values);
        }
        TagValue::Text(String::from_utf8_lossy(trimmed).into_owned())
    }
}

/// Row and column direction cosines (Image Orientation (Patient)).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageOrientation {
    pub row: Vector3<f64>,
    pub column: Vector3<f64>,
}

impl ImageOrientation {
    pub fn new(row: Vector3<f64>, column: Vector3<f64>) -> Self {
        Self { row, column }
    }

    pub fn from_cosines(values: &[f64]) -> Option<Self> {
        if values.len() < 6 {
            return None;
        }
        Some(Self {
            row: Vector3::new(values[0], values[1], values[2]),
            column: Vector3::new(values[3], values[4], values[5]),
        })
    }

    pub fn normal(&self) -> Vector3<f64> {
        self.row.cross(&self.column)
    }

    pub fn plane(&self) -> Orientation {
        let normal = self.normal().abs();
        if normal.z >= normal.x && normal.z >= normal.y {
            Orientation::Axial
        } else if normal.y >= normal.x {
            Orientation::Coronal
        } else {
            Orientation::Sagittal
        }
    }

    /// Both cosines equal within `tolerance`, component wise.
    pub fn is_close(&self, other: &ImageOrientation, tolerance: f64) -> bool {
        (self.row - other.row).amax() <= tolerance && (self.column - other.column).amax() <= tolerance
    }
}

/// Geometry and diffusion encoding of one frame of a multi-frame object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameGeometry {
    pub position: Option<Vector3<f64>>,
    pub orientation: Option<ImageOrientation>,
    pub pixel_spacing: Option<[f64; 2]>,
    pub temporal_index: Option<i32>,
    pub stack_position: Option<i32>,
    pub b_value: Option<f64>,
    pub gradient: Option<Vector3<f64>>,
    /// Pixel value transformation of this frame, if it has its own
    pub rescale_slope: Option<f64>,
    pub rescale_intercept: Option<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct SliceRecord {
    pub series_uid: Option<String>,
    pub instance_number: Option<i32>,
    pub image_position: Option<Vector3<f64>>,
    pub image_orientation: Option<ImageOrientation>,
    /// `[row spacing, column spacing]` in mm
    pub pixel_spacing: Option<[f64; 2]>,
    pub slice_thickness: Option<f64>,
    pub spacing_between_slices: Option<f64>,
    pub rows: Option<u16>,
    pub columns: Option<u16>,
    pub photometric_interpretation: Option<String>,
    pub modality: Option<String>,
    pub image_type: Vec<String>,
    pub repetition_time: Option<f64>,
    pub echo_time: Option<f64>,
    pub rescale_slope: Option<f64>,
    pub rescale_intercept: Option<f64>,
    pub manufacturer: Option<String>,
    pub transfer_syntax: Option<String>,
    /// Per-frame functional groups, empty for single-frame objects
    pub frames: Vec<FrameGeometry>,
    pub private_tags: BTreeMap<Tag, TagValue>,
    /// Modality values: rescale slope and intercept already applied
    pub pixels: Option<PixelBuffer>,
}

impl SliceRecord {
    pub fn is_multiframe(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn is_rgb(&self) -> bool {
        self.photometric_interpretation
            .as_deref()
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("RGB"))
    }

    pub fn private_tag(&self, tag: Tag) -> Option<&TagValue> {
        self.private_tags.get(&tag)
    }

    pub fn private_number(&self, tag: Tag) -> Option<f64> {
        self.private_tag(tag).and_then(TagValue::first)
    }

    pub fn has_image_type(&self, flag: &str) -> bool {
        self.image_type
            .iter()
            .any(|value| value.trim().eq_ignore_ascii_case(flag))
    }

    pub fn manufacturer_contains(&self, needle: &str) -> bool {
        self.manufacturer
            .as_deref()
            .is_some_and(|value| value.to_ascii_uppercase().contains(&needle.to_ascii_uppercase()))
    }

    pub fn is_modality(&self, modality: &str) -> bool {
        self.modality
            .as_deref()
            .is_some_and(|value| value.trim().eq_ignore_ascii_case(modality))
    }

    /// Basic screen for objects that can contribute to a volume.
    pub fn is_imaging(&self) -> bool {
        if NON_IMAGING_MODALITIES
            .iter()
            .any(|modality| self.is_modality(modality))
        {
            return false;
        }
        if self.is_multiframe() {
            return true;
        }
        self.image_position.is_some() && self.image_orientation.is_some()
    }
}

/// One physical plane: a record, or one frame of a multi-frame record.
#[derive(Clone, Copy, Debug)]
pub struct Slice<'a> {
    pub record: &'a SliceRecord,
    pub frame: usize,
    /// Ordinal of the acquisition volume a frame belongs to
    pub volume: usize,
    pub position: Option<Vector3<f64>>,
    pub orientation: Option<ImageOrientation>,
    pub pixel_spacing: Option<[f64; 2]>,
}

impl<'a> Slice<'a> {
    /// Expand records into plane views in input order.
    pub fn expand(records: &'a [SliceRecord]) -> Vec<Slice<'a>> {
        records
            .iter()
            .flat_map(|record| {
                if record.is_multiframe() {
                    Self::from_frames(record)
                } else {
                    vec![Self::from_record(record)]
                }
            })
            .collect()
    }

    pub fn from_record(record: &'a SliceRecord) -> Self {
        Self {
            record,
            frame: 0,
            volume: 0,
            position: record.image_position,
            orientation: record.image_orientation,
            pixel_spacing: record.pixel_spacing,
        }
    }

    fn from_frames(record: &'a SliceRecord) -> Vec<Self> {
        // frames sharing temporal index and diffusion encoding form one volume,
        // numbered in order of first appearance
        let mut volume_keys = Vec::new();
        record
            .frames
            .iter()
            .enumerate()
            .map(|(frame, geometry)| {
                let key = (
                    geometry.temporal_index,
                    geometry.b_value.map(f64::to_bits),
                    geometry.gradient.map(|g| [g.x.to_bits(), g.y.to_bits(), g.z.to_bits()]),
                );
                let volume = match volume_keys.iter().position(|known| *known == key) {
                    Some(index) => index,
                    None => {
                        volume_keys.push(key);
                        volume_keys.len() - 1
                    }
                };
                Self {
                    record,
                    frame,
                    volume,
                    position: geometry.position.or(record.image_position),
                    orientation: geometry.orientation.or(record.image_orientation),
                    pixel_spacing: geometry.pixel_spacing.or(record.pixel_spacing),
                }
            })
            .collect()
    }

    pub fn is_frame(&self) -> bool {
        self.record.is_multiframe()
    }

    pub fn frame_geometry(&self) -> Option<&'a FrameGeometry> {
        self.record.frames.get(self.frame)
    }

    /// Instance number of a file, or the one based frame number of a frame.
    pub fn instance_number(&self) -> Option<i64> {
        if self.is_frame() {
            Some(self.frame as i64 + 1)
        } else {
            self.record.instance_number.map(i64::from)
        }
    }

    pub fn order_key(&self) -> (usize, i64) {
        (self.volume, self.instance_number().unwrap_or(0))
    }

    /// Pixels of this plane as `(rows, columns, samples)`.
    pub fn pixels(&self) -> Option<ArrayView3<'a, i32>> {
        let buffer = self.record.pixels.as_ref()?;
        if self.frame >= buffer.len_of(Axis(0)) {
            return None;
        }
        Some(buffer.index_axis(Axis(0), self.frame))
    }

    pub fn normal(&self) -> Option<Vector3<f64>> {
        self.orientation.map(|orientation| orientation.normal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn text_and_numeric_values() {
        let text = TagValue::Text("1000\\8\\0\\0".to_string());
        assert_eq!(text.first(), Some(1000.0));
        assert_eq!(text.numbers(), vec![1000.0, 8.0, 0.0, 0.0]);

        let numbers = TagValue::Numbers(vec![0.5, -0.5, 0.7]);
        assert_eq!(numbers.numbers(), vec![0.5, -0.5, 0.7]);
    }

    #[test]
    fn raw_bytes_as_text_or_doubles() {
        assert_eq!(
            TagValue::from_raw_bytes(b"700 "),
            TagValue::Text("700".to_string())
        );

        let mut bytes = Vec::new();
        for value in [1.0f64, 0.0, -0.5] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        assert_eq!(
            TagValue::from_raw_bytes(&bytes),
            TagValue::Numbers(vec![1.0, 0.0, -0.5])
        );
    }

    #[test]
    fn orientation_plane() {
        let axial = ImageOrientation::from_cosines(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]).unwrap();
        assert_eq!(axial.plane(), Orientation::Axial);
        let sagittal = ImageOrientation::from_cosines(&[0.0, 1.0, 0.0, 0.0, 0.0, -1.0]).unwrap();
        assert_eq!(sagittal.plane(), Orientation::Sagittal);
        assert!(ImageOrientation::from_cosines(&[1.0, 0.0]).is_none());
    }

    #[test]
    fn frames_expand_with_volume_ordinals() {
        let frame = |temporal: i32, z: f64| FrameGeometry {
            position: Some(Vector3::new(0.0, 0.0, z)),
            temporal_index: Some(temporal),
            ..Default::default()
        };
        let record = SliceRecord {
            frames: vec![frame(1, 0.0), frame(1, 1.0), frame(2, 0.0), frame(2, 1.0)],
            pixels: Some(Array4::zeros((4, 2, 2, 1))),
            ..Default::default()
        };
        let records = [record];
        let slices = Slice::expand(&records);
        assert_eq!(slices.len(), 4);
        let volumes: Vec<_> = slices.iter().map(|slice| slice.volume).collect();
        assert_eq!(volumes, vec![0, 0, 1, 1]);
        assert_eq!(slices[3].instance_number(), Some(4));
        assert_eq!(slices[2].pixels().unwrap().dim(), (2, 2, 1));
    }
}
