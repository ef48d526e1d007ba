//! Diffusion b-value and gradient direction tables.
//!
//! Vendors store the encoding of each timepoint in different places; a
//! [`DiffusionSource`] says where to look. Values are normalised the same
//! way for every vendor, see [`normalize`].

use dicom::core::Tag;
use nalgebra::Vector3;

use crate::record::Slice;

/// One b-value and unit gradient direction per timepoint.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DiffusionTable {
    pub b_values: Vec<i32>,
    pub directions: Vec<Vector3<f64>>,
}

impl DiffusionTable {
    pub fn len(&self) -> usize {
        self.b_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.b_values.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GradientTags {
    /// One multi-valued element holding the whole vector
    Vector(Tag),
    /// One element per component
    Components([Tag; 3]),
}

/// Private tags holding the diffusion encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiffusionTags {
    pub b_value: Tag,
    pub gradient: GradientTags,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffusionSource {
    Private(DiffusionTags),
    /// MR diffusion functional group of each frame
    PerFrame,
}

impl DiffusionSource {
    /// Raw b-value and gradient of one slice.
    ///
    /// A missing gradient reads as the zero vector, a missing b-value as no
    /// encoding at all. A frame with its own diffusion functional group is
    /// read from there, whatever the source.
    pub fn read(&self, slice: &Slice<'_>) -> Option<(f64, Vector3<f64>)> {
        if let Some(encoding) = Self::read_frame(slice) {
            return Some(encoding);
        }
        match self {
            DiffusionSource::Private(tags) => {
                let record = slice.record;
                let b_value = record.private_number(tags.b_value)?;
                let gradient = match tags.gradient {
                    GradientTags::Vector(tag) => record
                        .private_tag(tag)
                        .map(|value| value.numbers())
                        .filter(|values| values.len() >= 3)
                        .map(|values| Vector3::new(values[0], values[1], values[2])),
                    GradientTags::Components([x, y, z]) => {
                        match (record.private_number(x), record.private_number(y), record.private_number(z)) {
                            (Some(x), Some(y), Some(z)) => Some(Vector3::new(x, y, z)),
                            _ => None,
                        }
                    }
                };
                Some((b_value, gradient.unwrap_or_else(Vector3::zeros)))
            }
            DiffusionSource::PerFrame => None,
        }
    }

    fn read_frame(slice: &Slice<'_>) -> Option<(f64, Vector3<f64>)> {
        let frame = slice.frame_geometry()?;
        Some((frame.b_value?, frame.gradient.unwrap_or_else(Vector3::zeros)))
    }

    /// Any slice carries a nonzero b-value.
    pub fn is_diffusion(&self, slices: &[Slice<'_>]) -> bool {
        slices
            .iter()
            .filter_map(|slice| self.read(slice))
            .any(|(b_value, _)| b_value != 0.0)
    }

    /// Table over the first slice of every timepoint.
    pub fn extract(&self, heads: &[Slice<'_>]) -> DiffusionTable {
        let mut table = DiffusionTable::default();
        for head in heads {
            let (b_value, gradient) = self
                .read(head)
                .unwrap_or((0.0, Vector3::zeros()));
            let (b_value, direction) = normalize(b_value, gradient);
            table.b_values.push(b_value);
            table.directions.push(direction);
        }
        log::debug!("Extracted {} diffusion directions", table.len());
        table
    }
}

/// Scanner encoding to output convention.
///
/// The first gradient component flips sign. A nonzero b-value is scaled by
/// the squared gradient length and the direction normalised; b = 0 passes
/// through.
pub fn normalize(b_value: f64, gradient: Vector3<f64>) -> (i32, Vector3<f64>) {
    let gradient = Vector3::new(-gradient.x, gradient.y, gradient.z);
    if b_value == 0.0 {
        return (0, gradient);
    }
    let length = gradient.norm();
    let direction = if length != 0.0 { gradient / length } else { gradient };
    ((b_value * length * length).round() as i32, direction)
}

/// Derived isotropic image: weighted but without a direction.
pub fn is_trace(b_value: f64, gradient: &Vector3<f64>) -> bool {
    b_value != 0.0 && gradient.iter().all(|component| *component == 0.0)
}
