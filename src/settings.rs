//! Conversion settings.
//!
//! A [`Settings`] value is passed explicitly to every conversion entry
//! point. It is plain data, so a batch of series can share one instance
//! across threads.

use serde::{Deserialize, Serialize};

use crate::enums::Interpolation;

/// Slices below this count are treated as a localizer, not a volume.
pub const MIN_SLICE_COUNT: usize = 4;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub validate_slicecount: bool,
    pub validate_orientation: bool,
    pub validate_orthogonal: bool,
    pub validate_slice_increment: bool,
    pub validate_instance_number: bool,
    /// Reject multi-frame data stored with the implicit VR transfer syntax
    pub validate_multiframe_implicit: bool,
    /// Resample inconsistent slice increments and gantry tilted volumes
    pub resample: bool,
    pub resample_padding: i32,
    /// 0 nearest neighbour, 1 linear, 2 to 5 B-spline
    pub resample_spline_interpolation_order: u8,
    /// Store the output in LAS voxel order
    pub reorient: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            validate_slicecount: true,
            validate_orientation: true,
            validate_orthogonal: true,
            validate_slice_increment: true,
            validate_instance_number: false,
            validate_multiframe_implicit: true,
            resample: false,
            resample_padding: 0,
            resample_spline_interpolation_order: 0,
            reorient: true,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validate_slicecount(mut self, enabled: bool) -> Self {
        self.validate_slicecount = enabled;
        self
    }

    pub fn with_validate_orientation(mut self, enabled: bool) -> Self {
        self.validate_orientation = enabled;
        self
    }

    /// Disabling this allows gantry tilted data; the tilt ends up in the
    /// affine unless resampling is enabled as well.
    pub fn with_validate_orthogonal(mut self, enabled: bool) -> Self {
        self.validate_orthogonal = enabled;
        self
    }

    pub fn with_validate_slice_increment(mut self, enabled: bool) -> Self {
        self.validate_slice_increment = enabled;
        self
    }

    pub fn with_validate_instance_number(mut self, enabled: bool) -> Self {
        self.validate_instance_number = enabled;
        self
    }

    pub fn with_validate_multiframe_implicit(mut self, enabled: bool) -> Self {
        self.validate_multiframe_implicit = enabled;
        self
    }

    pub fn with_resample(mut self, enabled: bool) -> Self {
        self.resample = enabled;
        self
    }

    pub fn with_resample_padding(mut self, padding: i32) -> Self {
        self.resample_padding = padding;
        self
    }

    pub fn with_resample_spline_interpolation_order(mut self, order: u8) -> Self {
        self.resample_spline_interpolation_order = order;
        self
    }

    pub fn with_reorient(mut self, enabled: bool) -> Self {
        self.reorient = enabled;
        self
    }

    /// `None` when the configured order is outside 0..=5.
    pub fn interpolation(&self) -> Option<Interpolation> {
        Interpolation::from_order(self.resample_spline_interpolation_order)
    }
}
