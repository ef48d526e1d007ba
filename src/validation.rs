//! Pre-assembly filtering and the toggleable geometry checks.
//!
//! Filtering always runs and only ever logs what it skipped. The checks
//! each map to one switch in [`Settings`]; a disabled check is skipped
//! entirely, an enabled one fails with its own [`ValidationFailure`].

use crate::error::{Result, ValidationFailure};
use crate::geometry::{
    INCREMENT_ATOL, INCREMENT_RTOL, ORIENTATION_ATOL, is_close, is_parallel, unit,
};
use crate::record::{ImageOrientation, Slice};
use crate::settings::{MIN_SLICE_COUNT, Settings};

/// Drop slices that cannot be part of the volume.
///
/// In order: slices without pixel data, duplicates (same position, same
/// pixels), localizer or projection images, and, when several orientations
/// are present, every orientation with fewer than [`MIN_SLICE_COUNT`] slices.
pub fn filter_slices(slices: Vec<Slice<'_>>) -> Vec<Slice<'_>> {
    let slices = remove_without_pixels(slices);
    let slices = remove_duplicates(slices);
    let slices = remove_localizers_by_image_type(slices);
    remove_localizers_by_orientation(slices)
}

fn remove_without_pixels(slices: Vec<Slice<'_>>) -> Vec<Slice<'_>> {
    slices
        .into_iter()
        .filter(|slice| {
            let keep = slice.pixels().is_some();
            if !keep {
                log::info!(
                    "Skipping slice without pixel data (instance {:?})",
                    slice.instance_number()
                );
            }
            keep
        })
        .collect()
}

fn remove_duplicates(slices: Vec<Slice<'_>>) -> Vec<Slice<'_>> {
    let mut kept: Vec<Slice<'_>> = Vec::with_capacity(slices.len());
    for slice in slices {
        let duplicate = kept.iter().any(|other| {
            other.position == slice.position && other.pixels() == slice.pixels()
        });
        if duplicate {
            log::info!(
                "Skipping duplicate slice (instance {:?})",
                slice.instance_number()
            );
        } else {
            kept.push(slice);
        }
    }
    kept
}

fn is_localizer(slice: &Slice<'_>) -> bool {
    slice.record.has_image_type("LOCALIZER")
        || slice
            .record
            .image_type
            .iter()
            .any(|flag| flag.to_ascii_uppercase().contains("PROJECTION"))
}

fn remove_localizers_by_image_type(slices: Vec<Slice<'_>>) -> Vec<Slice<'_>> {
    slices
        .into_iter()
        .filter(|slice| {
            let localizer = is_localizer(slice);
            if localizer {
                log::info!(
                    "Skipping localizer (instance {:?})",
                    slice.instance_number()
                );
            }
            !localizer
        })
        .collect()
}

fn same_orientation(a: &Option<ImageOrientation>, b: &Option<ImageOrientation>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.is_close(b, ORIENTATION_ATOL),
        (None, None) => true,
        _ => false,
    }
}

fn remove_localizers_by_orientation(slices: Vec<Slice<'_>>) -> Vec<Slice<'_>> {
    let mut orientations: Vec<Option<ImageOrientation>> = Vec::new();
    let groups: Vec<usize> = slices
        .iter()
        .map(|slice| {
            match orientations
                .iter()
                .position(|orientation| same_orientation(orientation, &slice.orientation))
            {
                Some(group) => group,
                None => {
                    orientations.push(slice.orientation);
                    orientations.len() - 1
                }
            }
        })
        .collect();
    if orientations.len() <= 1 {
        return slices;
    }

    let mut counts = vec![0usize; orientations.len()];
    for group in &groups {
        counts[*group] += 1;
    }
    slices
        .into_iter()
        .zip(groups)
        .filter_map(|(slice, group)| {
            if counts[group] >= MIN_SLICE_COUNT {
                Some(slice)
            } else {
                log::info!(
                    "Skipping localizer by orientation (instance {:?})",
                    slice.instance_number()
                );
                None
            }
        })
        .collect()
}

/// Slice-to-slice displacements projected on the slice normal.
fn projected_increments(stack: &[Slice<'_>]) -> Option<Vec<f64>> {
    let normal = unit(&stack.first()?.normal()?)?;
    stack
        .windows(2)
        .map(|pair| Some((pair[1].position? - pair[0].position?).dot(&normal)))
        .collect()
}

/// Whether any increment departs from the first one beyond tolerance.
pub fn is_slice_increment_inconsistent(stack: &[Slice<'_>]) -> bool {
    let Some(increments) = projected_increments(stack) else {
        return false;
    };
    let Some(first) = increments.first() else {
        return false;
    };
    increments
        .iter()
        .any(|increment| !is_close(*increment, *first, INCREMENT_RTOL, INCREMENT_ATOL))
}

/// Direction from the first to the last slice runs along the slice normal.
pub fn is_orthogonal_stack(stack: &[Slice<'_>]) -> bool {
    let (Some(first), Some(last)) = (stack.first(), stack.last()) else {
        return true;
    };
    let (Some(normal), Some(start), Some(end)) = (first.normal(), first.position, last.position)
    else {
        return true;
    };
    let (Some(normal), Some(direction)) = (unit(&normal), unit(&(end - start))) else {
        // first and last coincide: no direction to compare
        return true;
    };
    is_parallel(&normal, &direction)
}

pub struct Validator<'s> {
    settings: &'s Settings,
}

impl<'s> Validator<'s> {
    pub fn new(settings: &'s Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        self.settings
    }

    pub fn check_slice_count(&self, count: usize) -> Result<()> {
        if self.settings.validate_slicecount && count < MIN_SLICE_COUNT {
            log::warn!("Found {count} slices, at least {MIN_SLICE_COUNT} needed");
            return Err(ValidationFailure::TooFewSlices.into());
        }
        Ok(())
    }

    pub fn check_orientation(&self, slices: &[Slice<'_>]) -> Result<()> {
        if !self.settings.validate_orientation {
            return Ok(());
        }
        let Some(reference) = slices.iter().find_map(|slice| slice.orientation) else {
            return Ok(());
        };
        let consistent = slices.iter().all(|slice| {
            slice
                .orientation
                .is_none_or(|orientation| orientation.is_close(&reference, ORIENTATION_ATOL))
        });
        if !consistent {
            log::warn!("Image orientation not consistent through all slices");
            return Err(ValidationFailure::OrientationInconsistent.into());
        }
        Ok(())
    }

    pub fn check_orthogonal(&self, stack: &[Slice<'_>]) -> Result<()> {
        if self.settings.validate_orthogonal && !is_orthogonal_stack(stack) {
            log::warn!("Slices are not orthogonal to the stack direction");
            return Err(ValidationFailure::NotOrthogonal.into());
        }
        Ok(())
    }

    pub fn check_slice_increment(&self, stack: &[Slice<'_>]) -> Result<()> {
        if self.settings.validate_slice_increment && is_slice_increment_inconsistent(stack) {
            log::warn!("Slice increment not consistent through all slices");
            return Err(ValidationFailure::SliceIncrementInconsistent.into());
        }
        Ok(())
    }

    pub fn check_instance_numbers(&self, slices: &[Slice<'_>]) -> Result<()> {
        if !self.settings.validate_instance_number {
            return Ok(());
        }
        let mut numbers: Vec<i64> = slices.iter().filter_map(Slice::instance_number).collect();
        numbers.sort_unstable();
        if numbers.windows(2).any(|pair| pair[1] - pair[0] != 1) {
            log::warn!("Instance numbers are not contiguous");
            return Err(ValidationFailure::InstanceNumberInconsistent.into());
        }
        Ok(())
    }

    /// Checks over the whole series: slice count, orientation, orthogonality.
    pub fn check_series(&self, slices: &[Slice<'_>]) -> Result<()> {
        self.check_slice_count(slices.len())?;
        self.check_orientation(slices)?;
        self.check_orthogonal(slices)
    }
}
