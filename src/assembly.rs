//! Builds voxel blocks and their affines from ordered stacks.

use nalgebra::Vector3;
use ndarray::{Array4, ArrayView3, Axis, s};

use crate::error::{AssemblyFailure, Result};
use crate::geometry::{self, affine_from_patient_axes};
use crate::record::{Slice, SliceRecord};
use crate::volume::{Volume, VoxelData};

/// Assemble one sorted stack into a 3D volume.
///
/// Returns the volume and the slice increment in mm.
pub fn assemble_3d(stack: &[Slice<'_>]) -> Result<(Volume, f64)> {
    let data = stack_pixels(stack)?;
    let (affine, increment) = geometry::create_affine(stack)?;
    Ok((Volume::new(data.squeeze_trailing(), affine), increment))
}

/// Assemble one stack per timepoint into a 4D volume.
///
/// All timepoints share the affine of the first one.
pub fn assemble_4d(stacks: &[Vec<Slice<'_>>]) -> Result<(Volume, f64)> {
    let first = stacks.first().ok_or(AssemblyFailure::NotAVolume)?;
    let expected = first.len();
    if let Some(stack) = stacks.iter().find(|stack| stack.len() != expected) {
        log::warn!(
            "Timepoints differ in slice count ({expected} vs {})",
            stack.len()
        );
        return Err(AssemblyFailure::MissingFiles {
            expected,
            found: stack.len(),
        }
        .into());
    }

    let (affine, increment) = geometry::create_affine(first)?;
    let blocks = stacks
        .iter()
        .map(|stack| stack_pixels(stack))
        .collect::<Result<Vec<_>>>()?;
    let data = VoxelData::stack_timepoints(blocks)?;
    Ok((Volume::new(data.squeeze_trailing(), affine), increment))
}

/// Unpack Siemens mosaic records, one timepoint per record.
///
/// Each record holds `tiles` slices laid out row major on a square grid of
/// `ceil(sqrt(tiles))` tiles per side.
pub fn assemble_mosaic(records: &[&SliceRecord], tiles: usize) -> Result<(Volume, f64)> {
    let first = *records.first().ok_or(AssemblyFailure::NotAVolume)?;
    if tiles == 0 {
        return Err(AssemblyFailure::NotAVolume.into());
    }
    let grid = (tiles as f64).sqrt().ceil() as usize;

    let blocks = records
        .iter()
        .map(|record| unpack_mosaic(record, tiles, grid))
        .collect::<Result<Vec<_>>>()?;
    let data = if blocks.len() == 1 {
        blocks.into_iter().next().ok_or(AssemblyFailure::NotAVolume)?
    } else {
        VoxelData::stack_timepoints(blocks)?
    };

    let (affine, increment) = mosaic_affine(first, grid)?;
    Ok((Volume::new(data.squeeze_trailing(), affine), increment))
}

fn first_plane(record: &SliceRecord) -> Result<ArrayView3<'_, i32>> {
    record
        .pixels
        .as_ref()
        .filter(|pixels| pixels.len_of(Axis(0)) > 0)
        .map(|pixels| pixels.index_axis(Axis(0), 0))
        .ok_or_else(|| AssemblyFailure::MissingGeometry("pixel data").into())
}

fn unpack_mosaic(record: &SliceRecord, tiles: usize, grid: usize) -> Result<VoxelData> {
    let plane = first_plane(record)?;
    let (rows, columns, samples) = plane.dim();
    let (tile_rows, tile_columns) = (rows / grid, columns / grid);
    if tile_rows == 0 || tile_columns == 0 {
        return Err(AssemblyFailure::InconsistentDimensions.into());
    }

    let mut block = Array4::<i32>::zeros((tile_columns, tile_rows, tiles, samples));
    for tile in 0..tiles {
        let row_start = (tile / grid) * tile_rows;
        let column_start = (tile % grid) * tile_columns;
        let view = plane.slice(s![
            row_start..row_start + tile_rows,
            column_start..column_start + tile_columns,
            ..
        ]);
        block
            .slice_mut(s![.., .., tile, ..])
            .assign(&view.permuted_axes([1, 0, 2]));
    }
    Ok(to_voxel_data(block, record.is_rgb()))
}

fn mosaic_affine(record: &SliceRecord, grid: usize) -> Result<(geometry::Affine, f64)> {
    let orientation = record
        .image_orientation
        .ok_or(AssemblyFailure::MissingGeometry("image orientation"))?;
    let [row_spacing, column_spacing] = record
        .pixel_spacing
        .ok_or(AssemblyFailure::MissingGeometry("pixel spacing"))?;
    let position = record
        .image_position
        .ok_or(AssemblyFailure::MissingGeometry("image position"))?;
    let (rows, columns, _) = first_plane(record)?.dim();
    let (tile_rows, tile_columns) = (rows / grid, columns / grid);

    // the stored position is the corner of the whole mosaic, not of a tile
    let corrected: Vector3<f64> = position
        + orientation.row * column_spacing * (columns - tile_columns) as f64 / 2.0
        + orientation.column * row_spacing * (rows - tile_rows) as f64 / 2.0;

    let spacing = record
        .spacing_between_slices
        .or(record.slice_thickness)
        .unwrap_or(1.0);
    let step = orientation.normal() * spacing;
    let increment = step.norm();
    if increment == 0.0 {
        return Err(AssemblyFailure::NotAVolume.into());
    }

    let affine = affine_from_patient_axes(
        &(orientation.row * column_spacing),
        &(orientation.column * row_spacing),
        &step,
        &corrected,
    );
    Ok((affine, increment))
}

/// Pixel planes of a stack as `(x, y, z[, channel])`.
fn stack_pixels(stack: &[Slice<'_>]) -> Result<VoxelData> {
    let first = stack.first().ok_or(AssemblyFailure::NotAVolume)?;
    let (rows, columns, samples) = first
        .pixels()
        .ok_or(AssemblyFailure::MissingGeometry("pixel data"))?
        .dim();

    let mut block = Array4::<i32>::zeros((columns, rows, stack.len(), samples));
    for (index, slice) in stack.iter().enumerate() {
        let plane = slice
            .pixels()
            .ok_or(AssemblyFailure::MissingGeometry("pixel data"))?;
        if plane.dim() != (rows, columns, samples) {
            log::warn!(
                "Slice {:?} is {:?}, expected {:?}",
                slice.instance_number(),
                plane.dim(),
                (rows, columns, samples)
            );
            return Err(AssemblyFailure::InconsistentDimensions.into());
        }
        block
            .slice_mut(s![.., .., index, ..])
            .assign(&plane.permuted_axes([1, 0, 2]));
    }
    Ok(to_voxel_data(block, first.record.is_rgb()))
}

fn to_voxel_data(block: Array4<i32>, rgb: bool) -> VoxelData {
    if rgb {
        let (x, y, z, samples) = block.dim();
        let rgba = Array4::from_shape_fn((x, y, z, 4), |(i, j, k, channel)| {
            if channel == 3 {
                u8::MAX
            } else if channel < samples {
                block[[i, j, k, channel]].clamp(0, u8::MAX as i32) as u8
            } else {
                0
            }
        });
        VoxelData::Rgba(rgba.into_dyn())
    } else {
        VoxelData::Scalar(block.index_axis_move(Axis(3), 0).into_dyn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, COLUMNS, ROWS, pixel_value};
    use crate::grouping::group_stacks;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    #[test]
    fn planes_are_transposed_into_x_y_z() {
        let records = fixtures::axial_series(5, 2.0);
        let slices = Slice::expand(&records);
        let (volume, increment) = assemble_3d(&slices).unwrap();
        assert_relative_eq!(increment, 2.0);
        assert_eq!(volume.dim(), [COLUMNS, ROWS, 5]);
        let VoxelData::Scalar(data) = volume.data() else {
            panic!("expected scalar data");
        };
        assert_eq!(data[[3, 1, 4]], pixel_value(5, 1, 3));
        assert_eq!(data[[0, 2, 0]], pixel_value(1, 2, 0));
    }

    #[test]
    fn single_slice_stays_three_dimensional() {
        let records = fixtures::axial_series(1, 1.0);
        let slices = Slice::expand(&records);
        let (volume, _) = assemble_3d(&slices).unwrap();
        assert_eq!(volume.data().shape(), &[COLUMNS, ROWS, 1]);
    }

    #[test]
    fn rgb_becomes_rgba_with_opaque_alpha() {
        let mut records = fixtures::axial_series(4, 1.0);
        for record in &mut records {
            record.photometric_interpretation = Some("RGB".to_string());
            record.pixels = Some(Array4::from_shape_fn((1, ROWS, COLUMNS, 3), |(_, _, _, c)| {
                [10, 300, -5][c]
            }));
        }
        let slices = Slice::expand(&records);
        let (volume, _) = assemble_3d(&slices).unwrap();
        let VoxelData::Rgba(data) = volume.data() else {
            panic!("expected rgba data");
        };
        assert_eq!(data.shape(), &[COLUMNS, ROWS, 4, 4]);
        assert_eq!(data[[0, 0, 0, 0]], 10);
        assert_eq!(data[[0, 0, 0, 1]], 255);
        assert_eq!(data[[0, 0, 0, 2]], 0);
        assert!(data.index_axis(Axis(3), 3).iter().all(|alpha| *alpha == 255));
    }

    #[test]
    fn mismatched_planes_fail() {
        let mut records = fixtures::axial_series(4, 1.0);
        records[2].pixels = Some(Array4::zeros((1, ROWS + 1, COLUMNS, 1)));
        let slices = Slice::expand(&records);
        assert_eq!(
            assemble_3d(&slices).unwrap_err().reason(),
            "INCONSISTENT_DIMENSIONS"
        );
    }

    #[test]
    fn timepoints_stack_on_fourth_axis() {
        let records = fixtures::axial_4d(3, 4, 2.0);
        let grouped = group_stacks(Slice::expand(&records));
        let (volume, _) = assemble_4d(&grouped.stacks).unwrap();
        assert_eq!(volume.data().shape(), &[COLUMNS, ROWS, 4, 3]);
        let VoxelData::Scalar(data) = volume.data() else {
            panic!("expected scalar data");
        };
        // second timepoint, third slice is instance 7
        assert_eq!(data[[1, 1, 2, 1]], pixel_value(7, 1, 1));
    }

    #[test]
    fn uneven_timepoints_are_missing_files() {
        let mut records = fixtures::axial_4d(3, 4, 2.0);
        records.pop();
        let grouped = group_stacks(Slice::expand(&records));
        let error = assemble_4d(&grouped.stacks).unwrap_err();
        assert_eq!(error.reason(), "MISSING_DICOM_FILES");
    }

    #[test]
    fn mosaic_tiles_unpack_in_row_major_order() {
        // 3 tiles on a 2 x 2 grid of 3 x 4 tiles
        let mut record = fixtures::axial_record(1, 0.0);
        record.pixels = Some(Array4::from_shape_fn((1, 6, 8, 1), |(_, row, column, _)| {
            ((row / 3) * 2 + column / 4) as i32 * 1000 + (row % 3) as i32 * 10 + (column % 4) as i32
        }));
        record.spacing_between_slices = Some(3.0);
        let (volume, increment) = assemble_mosaic(&[&record], 3).unwrap();
        assert_relative_eq!(increment, 3.0);
        assert_eq!(volume.data().shape(), &[4, 3, 3]);
        let VoxelData::Scalar(data) = volume.data() else {
            panic!("expected scalar data");
        };
        assert_eq!(data[[2, 1, 0]], 12);
        assert_eq!(data[[3, 2, 2]], 2023);

        // corner shifted by half the unused mosaic extent
        let origin = geometry::translation(&volume.affine);
        assert_relative_eq!(
            origin,
            Vector3::new(-(10.0 + 0.8 * 2.0), -(20.0 + 0.6 * 1.5), 0.0),
            epsilon = 1e-9
        );
    }
}
