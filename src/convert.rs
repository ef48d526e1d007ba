//! Conversion entry points.
//!
//! [`convert_series`] runs the whole pipeline over the records of one
//! series: screening, filtering, vendor dispatch, assembly, reorientation
//! and, when enabled, gantry tilt resampling. [`convert_batch`] does the
//! same for independent series in parallel.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::diffusion::DiffusionTable;
use crate::enums::{Acquisition, Interpolation, SpatialUnit, Strategy, TemporalUnit};
use crate::error::{Result, UnsupportedInput};
use crate::record::{Slice, SliceRecord};
use crate::reorient::reorient;
use crate::resample::resample_tilted;
use crate::settings::Settings;
use crate::validation::filter_slices;
use crate::vendor::{self, Vendor};
use crate::volume::Volume;

/// Header fields a volumetric writer should set.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputHeader {
    pub scl_slope: f64,
    pub scl_inter: f64,
    pub spatial_unit: SpatialUnit,
    pub temporal_unit: TemporalUnit,
}

impl Default for OutputHeader {
    fn default() -> Self {
        Self {
            scl_slope: 1.0,
            scl_inter: 0.0,
            spatial_unit: SpatialUnit::Millimeter,
            temporal_unit: TemporalUnit::Unknown,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConvertedVolume {
    pub volume: Volume,
    pub vendor: Vendor,
    pub strategy: Strategy,
    pub acquisition: Acquisition,
    /// Only set when both repetition and echo time are present
    pub repetition_time: Option<f64>,
    pub echo_time: Option<f64>,
    pub diffusion: Option<DiffusionTable>,
    pub max_slice_increment: f64,
    pub header: OutputHeader,
}

/// Outcome of one series of a batch.
#[derive(Debug)]
pub struct SeriesResult {
    pub series_uid: Option<String>,
    pub result: Result<ConvertedVolume>,
}

/// Convert the records of one series into a volume.
pub fn convert_series(records: &[SliceRecord], settings: &Settings) -> Result<ConvertedVolume> {
    let start = Instant::now();
    let interpolation = if settings.resample {
        settings.interpolation().ok_or(UnsupportedInput::InvalidInterpolationOrder(
            settings.resample_spline_interpolation_order,
        ))?
    } else {
        Interpolation::default()
    };
    vendor::check_input(records, settings)?;

    let vendor = Vendor::classify(records);
    log::info!("Found manufacturer: {vendor:?}");
    let orientation = records.iter().find_map(|record| {
        record
            .image_orientation
            .or_else(|| record.frames.first()?.orientation)
    });
    if let Some(orientation) = orientation {
        log::debug!("Found {:?} slices", orientation.plane());
    }
    let slices = filter_slices(Slice::expand(records));
    // from the first slice kept by the filters
    let timing = slices
        .first()
        .map(|first| (first.record.repetition_time, first.record.echo_time));
    let assembled = vendor.assemble(slices, settings, interpolation)?;

    let mut volume = assembled.volume;
    if settings.reorient || settings.resample {
        volume = reorient(volume);
    }
    if settings.resample && !volume.is_orthogonal() {
        volume = resample_tilted(&volume, interpolation, settings.resample_padding)?;
        volume = reorient(volume);
    }

    let (repetition_time, echo_time) = match timing {
        Some((Some(repetition_time), Some(echo_time))) => (Some(repetition_time), Some(echo_time)),
        _ => (None, None),
    };

    log::info!(
        "Converted {} records ({:?}, {:?}) in {:?}",
        records.len(),
        assembled.strategy,
        assembled.acquisition,
        start.elapsed()
    );
    Ok(ConvertedVolume {
        volume,
        vendor,
        strategy: assembled.strategy,
        acquisition: assembled.acquisition,
        repetition_time,
        echo_time,
        diffusion: assembled.diffusion,
        max_slice_increment: assembled.max_slice_increment,
        header: OutputHeader::default(),
    })
}

/// Convert independent series in parallel, one result per series.
pub fn convert_batch(series: &[Vec<SliceRecord>], settings: &Settings) -> Vec<SeriesResult> {
    series
        .par_iter()
        .map(|records| {
            let series_uid = records.first().and_then(|record| record.series_uid.clone());
            let result = convert_series(records, settings);
            if let Err(error) = &result {
                log::warn!("Series {series_uid:?} not converted: {error}");
            }
            SeriesResult { series_uid, result }
        })
        .collect()
}
