use serde::{Deserialize, Serialize};

/// Anatomical plane a slice lies in, judged by its dominant normal component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

/// Resampling kernel, built from the spline order in [`crate::settings::Settings`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    #[default]
    Nearest,
    Linear,
    /// B-spline of order 2 to 5
    Spline(u8),
}

impl Interpolation {
    pub fn from_order(order: u8) -> Option<Self> {
        match order {
            0 => Some(Interpolation::Nearest),
            1 => Some(Interpolation::Linear),
            2..=5 => Some(Interpolation::Spline(order)),
            _ => None,
        }
    }

    pub fn order(&self) -> u8 {
        match self {
            Interpolation::Nearest => 0,
            Interpolation::Linear => 1,
            Interpolation::Spline(order) => *order,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    ImagePositionPatient,
    InstanceNumber,
}

/// Assembly strategy chosen by the vendor dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    SingleFrame,
    Mosaic,
    Classic4d,
    MultiFrame,
    AnatomicalOnly,
}

/// Acquisition type found by the vendor specific classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquisition {
    Anatomical,
    Mosaic,
    FourD,
    Diffusion,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpatialUnit {
    Millimeter,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemporalUnit {
    Unknown,
}
