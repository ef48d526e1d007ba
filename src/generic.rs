//! Assembly strategies shared by all vendors: a single anatomical stack,
//! multi-frame objects and stacks of timepoints.

use crate::assembly::{assemble_3d, assemble_4d};
use crate::diffusion::DiffusionSource;
use crate::enums::{Acquisition, Interpolation, SortBy, Strategy};
use crate::error::Result;
use crate::grouping::{GroupedSeries, group_frames, sort_slices};
use crate::record::Slice;
use crate::resample::resample_inconsistent;
use crate::settings::Settings;
use crate::validation::{Validator, is_slice_increment_inconsistent};
use crate::vendor::Assembled;

/// One stack ordered by position.
///
/// `series_checks` runs slice count, orientation and orthogonality first;
/// vendors that already ran them pass `false`. With resampling enabled an
/// inconsistent slice increment is resampled instead of rejected.
pub fn convert_anatomical(
    mut slices: Vec<Slice<'_>>,
    settings: &Settings,
    interpolation: Interpolation,
    series_checks: bool,
) -> Result<Assembled> {
    let validator = Validator::new(settings);
    if series_checks {
        validator.check_series(&slices)?;
    }
    sort_slices(&mut slices, SortBy::ImagePositionPatient);
    validator.check_slice_increment(&slices)?;
    validator.check_instance_numbers(&slices)?;

    let strategy = if slices.iter().any(Slice::is_frame) {
        Strategy::MultiFrame
    } else {
        Strategy::SingleFrame
    };
    log::info!("Assuming anatomical data");

    let (volume, max_slice_increment) =
        if settings.resample && is_slice_increment_inconsistent(&slices) {
            resample_inconsistent(&slices, interpolation, settings.resample_padding)?
        } else {
            assemble_3d(&slices)?
        };

    Ok(Assembled {
        volume,
        strategy,
        acquisition: Acquisition::Anatomical,
        diffusion: None,
        max_slice_increment,
    })
}

/// One stack per timepoint, each checked on its own: slice count,
/// orientation, orthogonality and increment.
///
/// With a diffusion source the b-values and gradients of the first slice of
/// every timepoint are extracted when any slice is diffusion weighted.
pub fn convert_4d(
    grouped: &GroupedSeries<'_>,
    settings: &Settings,
    strategy: Strategy,
    diffusion: Option<DiffusionSource>,
) -> Result<Assembled> {
    let validator = Validator::new(settings);
    for stack in &grouped.stacks {
        validator.check_slice_count(stack.len())?;
        validator.check_orientation(stack)?;
        validator.check_orthogonal(stack)?;
        validator.check_slice_increment(stack)?;
    }
    let (volume, max_slice_increment) = assemble_4d(&grouped.stacks)?;

    let slices: Vec<Slice<'_>> = grouped.slices().copied().collect();
    let diffusion = diffusion
        .filter(|source| source.is_diffusion(&slices))
        .map(|source| source.extract(&grouped.heads()));
    let acquisition = if diffusion.is_some() {
        log::info!("Found sequence type: diffusion");
        Acquisition::Diffusion
    } else {
        log::info!("Found sequence type: 4D");
        Acquisition::FourD
    };

    Ok(Assembled {
        volume,
        strategy,
        acquisition,
        diffusion,
        max_slice_increment,
    })
}

/// Frames of one multi-frame object.
///
/// Several acquisition volumes in the frames make a 4D result, diffusion
/// encoding read from the per-frame functional groups.
pub fn convert_multiframe(
    slices: Vec<Slice<'_>>,
    settings: &Settings,
    interpolation: Interpolation,
) -> Result<Assembled> {
    let grouped = group_frames(slices);
    if grouped.is_4d() {
        return convert_4d(
            &grouped,
            settings,
            Strategy::MultiFrame,
            Some(DiffusionSource::PerFrame),
        );
    }
    let slices = grouped.stacks.into_iter().flatten().collect();
    convert_anatomical(slices, settings, interpolation, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::grouping::group_stacks;
    use crate::record::{FrameGeometry, ImageOrientation, SliceRecord};
    use nalgebra::Vector3;
    use ndarray::Array4;

    fn tilted() -> ImageOrientation {
        ImageOrientation::new(Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 0.995, 0.0998))
    }

    /// `volumes` diffusion volumes of `per_volume` frames, 1 mm apart.
    fn multiframe_record(volumes: usize, per_volume: usize) -> SliceRecord {
        let frames = (0..volumes * per_volume)
            .map(|index| FrameGeometry {
                position: Some(Vector3::new(0.0, 0.0, (index % per_volume) as f64)),
                temporal_index: Some((index / per_volume) as i32),
                ..Default::default()
            })
            .collect();
        SliceRecord {
            image_orientation: fixtures::axial_record(1, 0.0).image_orientation,
            pixel_spacing: Some([1.0, 1.0]),
            frames,
            pixels: Some(Array4::zeros((volumes * per_volume, 3, 4, 1))),
            ..Default::default()
        }
    }

    #[test]
    fn anatomical_stack_sorted_by_position() {
        let mut records = fixtures::axial_series(6, 2.0);
        records.reverse();
        let assembled =
            convert_anatomical(Slice::expand(&records), &Settings::default(), Interpolation::Nearest, true)
                .unwrap();
        assert_eq!(assembled.strategy, Strategy::SingleFrame);
        assert_eq!(assembled.acquisition, Acquisition::Anatomical);
        assert_eq!(assembled.volume.dim()[2], 6);
        approx::assert_relative_eq!(assembled.max_slice_increment, 2.0);
    }

    #[test]
    fn too_few_slices_unless_disabled() {
        let records = fixtures::axial_series(3, 2.0);
        let strict = convert_anatomical(Slice::expand(&records), &Settings::default(), Interpolation::Nearest, true);
        assert_eq!(strict.unwrap_err().reason(), "TOO_FEW_SLICES/LOCALIZER");

        let lenient = Settings::default().with_validate_slicecount(false);
        let assembled =
            convert_anatomical(Slice::expand(&records), &lenient, Interpolation::Nearest, true).unwrap();
        assert_eq!(assembled.volume.dim()[2], 3);
    }

    #[test]
    fn timepoints_are_checked_per_stack() {
        let mut records = fixtures::axial_4d(2, 5, 2.0);
        records[7].image_position = Some(Vector3::new(10.0, 20.0, 4.5));
        let grouped = group_stacks(Slice::expand(&records));
        let result = convert_4d(&grouped, &Settings::default(), Strategy::Classic4d, None);
        assert_eq!(result.unwrap_err().reason(), "SLICE_INCREMENT_INCONSISTENT");

        let records = fixtures::axial_4d(2, 5, 2.0);
        let grouped = group_stacks(Slice::expand(&records));
        let assembled = convert_4d(&grouped, &Settings::default(), Strategy::Classic4d, None).unwrap();
        assert_eq!(assembled.acquisition, Acquisition::FourD);
        assert!(assembled.diffusion.is_none());
    }

    #[test]
    fn multiframe_volumes_become_timepoints() {
        let frames = (0..8)
            .map(|index| FrameGeometry {
                position: Some(Vector3::new(0.0, 0.0, (index % 4) as f64)),
                temporal_index: Some(index / 4),
                b_value: Some(if index < 4 { 0.0 } else { 1000.0 }),
                gradient: Some(if index < 4 { Vector3::zeros() } else { Vector3::new(0.0, 1.0, 0.0) }),
                ..Default::default()
            })
            .collect();
        let record = SliceRecord {
            image_orientation: fixtures::axial_record(1, 0.0).image_orientation,
            pixel_spacing: Some([1.0, 1.0]),
            frames,
            pixels: Some(Array4::zeros((8, 3, 4, 1))),
            ..Default::default()
        };
        let records = [record];
        let assembled =
            convert_multiframe(Slice::expand(&records), &Settings::default(), Interpolation::Nearest).unwrap();
        assert_eq!(assembled.strategy, Strategy::MultiFrame);
        assert_eq!(assembled.acquisition, Acquisition::Diffusion);
        assert_eq!(assembled.volume.data().shape(), &[4, 3, 4, 2]);
        assert_eq!(assembled.diffusion.unwrap().b_values, vec![0, 1000]);
    }

    #[test]
    fn every_timepoint_checks_orientation() {
        let records = fixtures::axial_4d(4, 5, 2.0);
        let mut grouped = group_stacks(Slice::expand(&records));
        assert_eq!(grouped.len(), 4);
        grouped.stacks[2][2].orientation = Some(tilted());
        let result = convert_4d(&grouped, &Settings::default(), Strategy::Classic4d, None);
        assert_eq!(result.unwrap_err().reason(), "IMAGE_ORIENTATION_INCONSISTENT");

        let lenient = Settings::default().with_validate_orientation(false);
        assert!(convert_4d(&grouped, &lenient, Strategy::Classic4d, None).is_ok());
    }

    #[test]
    fn every_timepoint_needs_enough_slices() {
        let records = fixtures::axial_4d(2, 5, 2.0);
        let mut grouped = group_stacks(Slice::expand(&records));
        grouped.stacks[1].truncate(3);
        let result = convert_4d(&grouped, &Settings::default(), Strategy::Classic4d, None);
        assert_eq!(result.unwrap_err().reason(), "TOO_FEW_SLICES/LOCALIZER");
    }

    #[test]
    fn multiframe_volumes_are_checked_on_their_own() {
        let mut record = multiframe_record(2, 5);
        record.frames[7].orientation = Some(tilted());
        let records = [record];
        let result = convert_multiframe(Slice::expand(&records), &Settings::default(), Interpolation::Nearest);
        assert_eq!(result.unwrap_err().reason(), "IMAGE_ORIENTATION_INCONSISTENT");

        let records = [multiframe_record(2, 3)];
        let result = convert_multiframe(Slice::expand(&records), &Settings::default(), Interpolation::Nearest);
        assert_eq!(result.unwrap_err().reason(), "TOO_FEW_SLICES/LOCALIZER");

        let records = [multiframe_record(2, 5)];
        let assembled =
            convert_multiframe(Slice::expand(&records), &Settings::default(), Interpolation::Nearest).unwrap();
        assert_eq!(assembled.acquisition, Acquisition::FourD);
    }
}
