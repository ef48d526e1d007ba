//! # DICOM-to-volume library
//!
//! This crate assembles the images of one DICOM series into a single
//! geometrically normalized volume: a 3D or 4D voxel array plus the affine
//! transform mapping voxel indices to patient coordinates in millimeters
//! (RAS convention, as NIfTI writers expect it).
//!
//! This library builds on the dicom-rs ecosystem. DICOM files are decoded
//! into [`SliceRecord`]s by the [`SeriesLoader`], in parallel using rayon.
//! The conversion then:
//!  - screens the input (empty, non-imaging, mixed or implicit series)
//!  - dispatches on the manufacturer: Siemens, GE, Philips, Hitachi or a
//!    generic path
//!  - validates the geometry: slice count, orientation, increment and
//!    gantry tilt
//!  - assembles single-frame, mosaic, classic 4D and multi-frame series
//!  - extracts the diffusion b-values and gradient directions
//!  - reorients the volume to the canonical LAS axis order
//!  - optionally resamples inconsistent spacing and gantry tilt onto a
//!    regular orthogonal grid, using B-splines of order 0 to 5
//!
//! Every check can be relaxed through [`Settings`]. Failures carry a stable
//! reason code, see [`ConversionError::reason`].
//!
//! Writing the volume to disk is left to the library consumer; the
//! [`OutputHeader`] lists the header fields a writer should set.
//!
//! # Examples
//!
//! ## Converting every series of a directory
//!
//! ```no_run
//! # use dicom_to_volume::{SeriesLoader, Settings, convert_batch};
//! let records = SeriesLoader::load_from_directory("dicom")
//!     .expect("should have loaded files from directory");
//! let series = SeriesLoader::group_by_series(records);
//! for converted in convert_batch(&series, &Settings::default()) {
//!     match converted.result {
//!         Ok(volume) => println!("{:?}: {:?}", converted.series_uid, volume.volume.dim()),
//!         Err(error) => println!("{:?}: {}", converted.series_uid, error.reason()),
//!     }
//! }
//! ```
//!
//! ## Resampling a tilted acquisition
//!
//! ```no_run
//! # use dicom_to_volume::{SeriesLoader, Settings, convert_series};
//! let records = SeriesLoader::load_from_directory("dicom/ct").unwrap();
//! let settings = Settings::default()
//!     .with_validate_orthogonal(false)
//!     .with_resample(true)
//!     .with_resample_spline_interpolation_order(1);
//! let converted = convert_series(&records, &settings).unwrap();
//! assert!(converted.volume.is_orthogonal());
//! ```

pub mod assembly;
pub mod convert;
pub mod diffusion;
pub mod enums;
pub mod error;
pub mod generic;
pub mod geometry;
pub mod grouping;
mod interpolator;
pub mod record;
pub mod reorient;
pub mod resample;
pub mod settings;
pub mod validation;
pub mod vendor;
pub mod volume;
pub mod volume_loader;

#[cfg(test)]
mod fixtures;

pub use convert::{ConvertedVolume, OutputHeader, SeriesResult, convert_batch, convert_series};
pub use diffusion::DiffusionTable;
pub use enums::{Acquisition, Interpolation, Strategy};
pub use error::{ConversionError, Result};
pub use record::{FrameGeometry, ImageOrientation, SliceRecord, TagValue};
pub use settings::Settings;
pub use vendor::Vendor;
pub use volume::{Volume, VoxelData};
pub use volume_loader::{LoaderError, SeriesLoader};
