use thiserror::Error;

/// A geometric check rejected the series.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("Too few slices, probably a localizer")]
    TooFewSlices,

    #[error("Image orientation is not consistent between slices")]
    OrientationInconsistent,

    #[error("Slices are not orthogonal to the stack direction (gantry tilt)")]
    NotOrthogonal,

    #[error("Slice increment is not consistent through all slices")]
    SliceIncrementInconsistent,

    #[error("Instance numbers are not contiguous")]
    InstanceNumberInconsistent,
}

impl ValidationFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationFailure::TooFewSlices => "TOO_FEW_SLICES/LOCALIZER",
            ValidationFailure::OrientationInconsistent => "IMAGE_ORIENTATION_INCONSISTENT",
            ValidationFailure::NotOrthogonal => "NON_CUBICAL_IMAGE/GANTRY_TILT",
            ValidationFailure::SliceIncrementInconsistent => "SLICE_INCREMENT_INCONSISTENT",
            ValidationFailure::InstanceNumberInconsistent => "INSTANCE_NUMBER_INCONSISTENT",
        }
    }
}

/// The voxel block could not be built from the validated slices.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AssemblyFailure {
    #[error("Timepoints have different slice counts ({expected} expected, {found} found)")]
    MissingFiles { expected: usize, found: usize },

    #[error("Slices do not form a volume")]
    NotAVolume,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing {0} needed to compute the affine")]
    MissingGeometry(&'static str),

    #[error("Voxel size must be positive and finite")]
    InvalidVoxelSize,
}

impl AssemblyFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            AssemblyFailure::MissingFiles { .. } => "MISSING_DICOM_FILES",
            AssemblyFailure::NotAVolume => "NOT_A_VOLUME",
            AssemblyFailure::InconsistentDimensions => "INCONSISTENT_DIMENSIONS",
            AssemblyFailure::MissingGeometry(_) => "MISSING_GEOMETRY",
            AssemblyFailure::InvalidVoxelSize => "INVALID_VOXEL_SIZE",
        }
    }
}

/// The input is outside what the converter supports.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum UnsupportedInput {
    #[error("No slice records given")]
    Empty,

    #[error("Records are not imaging DICOM")]
    NonImaging,

    #[error("Unsupported data: {0}")]
    UnsupportedData(&'static str),

    #[error("Resampling of inconsistent slice increments is not supported for multiframe data")]
    MultiframeResampling,

    #[error("Multiframe data with implicit transfer syntax is rejected")]
    MultiframeImplicit,

    #[error("Spline interpolation order {0} is not in 0..=5")]
    InvalidInterpolationOrder(u8),
}

impl UnsupportedInput {
    pub fn reason(&self) -> &'static str {
        match self {
            UnsupportedInput::Empty => "NO_DICOM_FILES",
            UnsupportedInput::NonImaging => "NON_IMAGING_DICOM_FILES",
            UnsupportedInput::UnsupportedData(_) => "UNSUPPORTED_DATA",
            UnsupportedInput::MultiframeResampling => "MULTIFRAME_RESAMPLING_NOT_SUPPORTED",
            UnsupportedInput::MultiframeImplicit => "MULTIFRAME_IMPLICIT_NOT_SUPPORTED",
            UnsupportedInput::InvalidInterpolationOrder(_) => "INVALID_INTERPOLATION_ORDER",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationFailure),

    #[error("Assembly failed: {0}")]
    Assembly(#[from] AssemblyFailure),

    #[error("Unsupported input: {0}")]
    Unsupported(#[from] UnsupportedInput),
}

impl ConversionError {
    /// Machine readable code of the failed check.
    pub fn reason(&self) -> &'static str {
        match self {
            ConversionError::Validation(failure) => failure.reason(),
            ConversionError::Assembly(failure) => failure.reason(),
            ConversionError::Unsupported(failure) => failure.reason(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConversionError>;
