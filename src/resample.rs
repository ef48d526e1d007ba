//! Resampling of stacks with inconsistent slice increments and of gantry
//! tilted volumes onto a regular, orthogonal grid.

use nalgebra::{Matrix3, Vector3};
use ndarray::{Array3, Array4, ArrayD, Axis, IxDyn, Zip};
use num_traits::{Bounded, NumCast, ToPrimitive};

use crate::assembly::assemble_3d;
use crate::enums::Interpolation;
use crate::error::{AssemblyFailure, Result, UnsupportedInput};
use crate::geometry::{
    Affine, INCREMENT_ATOL, INCREMENT_RTOL, all_close, apply, column, from_columns, unit,
};
use crate::interpolator::Interpolator;
use crate::record::Slice;
use crate::volume::{Volume, VoxelData};

/// Percentile of the slice increments whose voxel size becomes the target.
const INCREMENT_PERCENTILE: f64 = 15.0;

/// How far outside the source grid a target voxel may fall and still be sampled.
const EDGE_TOLERANCE: f64 = 1e-3;

/// Resample a sorted stack whose slice increment changes along the stack.
///
/// The stack is split where the increment changes, each part is assembled
/// on its own and all parts are resampled on one grid at the voxel size of
/// the finest commonly used increment. Returns the volume and the largest
/// increment seen.
pub fn resample_inconsistent(
    stack: &[Slice<'_>],
    interpolation: Interpolation,
    padding: i32,
) -> Result<(Volume, f64)> {
    if stack.iter().any(Slice::is_frame) {
        return Err(UnsupportedInput::MultiframeResampling.into());
    }
    let (groups, max_increment) = split_by_increment(stack)?;
    log::info!(
        "Slice increment inconsistent, resampling {} groups",
        groups.len()
    );

    let mut volumes = Vec::with_capacity(groups.len());
    let mut samples = Vec::new();
    for group in &groups {
        let (volume, _) = assemble_3d(group)?;
        let zooms = volume.voxel_spacing();
        let increment = zooms.norm();
        samples.extend(std::iter::repeat_n((increment, zooms), group.len() - 1));
        volumes.push(volume);
    }

    let voxel_size = select_voxel_size(&samples)?;
    log::debug!("Resampling to voxel size {voxel_size:?}");
    let volume = resample_volumes(&volumes, &voxel_size, interpolation, padding)?;
    Ok((volume, max_increment))
}

/// Resample a gantry tilted volume onto an orthogonal grid.
///
/// The slice spacing is the tilted slice step projected on the slice normal.
pub fn resample_tilted(volume: &Volume, interpolation: Interpolation, padding: i32) -> Result<Volume> {
    let normal = unit(&column(&volume.affine, 0).cross(&column(&volume.affine, 1)))
        .ok_or(AssemblyFailure::NotAVolume)?;
    let spacing = volume.voxel_spacing();
    let slice_spacing = column(&volume.affine, 2).dot(&normal).abs();
    if slice_spacing == 0.0 {
        return Err(AssemblyFailure::NotAVolume.into());
    }
    log::warn!("Gantry tilt detected, resampling to {slice_spacing:.4} mm slices");
    resample_volumes(
        std::slice::from_ref(volume),
        &Vector3::new(spacing.x, spacing.y, slice_spacing),
        interpolation,
        padding,
    )
}

/// Split where the displacement between consecutive slices departs from
/// the running increment. Neighbouring groups share their boundary slice.
pub fn split_by_increment<'a>(stack: &[Slice<'a>]) -> Result<(Vec<Vec<Slice<'a>>>, f64)> {
    let positions = stack
        .iter()
        .map(|slice| slice.position.ok_or(AssemblyFailure::MissingGeometry("image position")))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if stack.len() < 2 {
        return Ok((vec![stack.to_vec()], 0.0));
    }

    let mut increment = positions[1] - positions[0];
    let mut max_increment = increment.norm();
    let mut groups = Vec::new();
    let mut current = vec![stack[0], stack[1]];
    for index in 2..stack.len() {
        let step = positions[index] - positions[index - 1];
        max_increment = max_increment.max(step.norm());
        if all_close(&step, &increment, INCREMENT_RTOL, INCREMENT_ATOL) {
            current.push(stack[index]);
        } else {
            let boundary = current[current.len() - 1];
            groups.push(std::mem::replace(&mut current, vec![boundary, stack[index]]));
            increment = step;
        }
    }
    groups.push(current);
    Ok((groups, max_increment))
}

/// Linear interpolation between closest ranks.
fn percentile(values: &[f64], percent: f64) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = percent / 100.0 * (sorted.len().checked_sub(1)? as f64);
    let (low, high) = (rank.floor() as usize, rank.ceil() as usize);
    Some(sorted[low] + (sorted[high] - sorted[low]) * (rank - low as f64))
}

/// Voxel size of the increment sample closest to the 15th percentile.
fn select_voxel_size(samples: &[(f64, Vector3<f64>)]) -> Result<Vector3<f64>> {
    let increments: Vec<f64> = samples.iter().map(|(increment, _)| *increment).collect();
    let target = percentile(&increments, INCREMENT_PERCENTILE).ok_or(AssemblyFailure::NotAVolume)?;
    samples
        .iter()
        .min_by(|a, b| (a.0 - target).abs().total_cmp(&(b.0 - target).abs()))
        .map(|(_, zooms)| *zooms)
        .ok_or_else(|| AssemblyFailure::NotAVolume.into())
}

/// Regular output grid enclosing a set of volumes.
#[derive(Clone, Debug, PartialEq)]
struct Grid {
    affine: Affine,
    shape: [usize; 3],
}

impl Grid {
    /// Axes follow the in-plane directions of the first volume, the third
    /// axis their cross product pointing the way its slices run.
    fn enclosing(volumes: &[Volume], voxel_size: &Vector3<f64>) -> Result<Self> {
        if voxel_size.iter().any(|size| !size.is_finite() || *size <= 0.0) {
            log::warn!("Cannot resample to voxel size {:?}", voxel_size.as_slice());
            return Err(AssemblyFailure::InvalidVoxelSize.into());
        }
        let first = volumes.first().ok_or(AssemblyFailure::NotAVolume)?;
        let (Some(x), Some(y)) = (unit(&column(&first.affine, 0)), unit(&column(&first.affine, 1)))
        else {
            return Err(AssemblyFailure::NotAVolume.into());
        };
        let mut z = unit(&x.cross(&y)).ok_or(AssemblyFailure::NotAVolume)?;
        if z.dot(&column(&first.affine, 2)) < 0.0 {
            z = -z;
        }
        let rotation = Matrix3::from_columns(&[x, y, z]);

        let mut lower = Vector3::repeat(f64::INFINITY);
        let mut upper = Vector3::repeat(f64::NEG_INFINITY);
        for volume in volumes {
            let [nx, ny, nz] = volume.dim();
            for corner in 0..8 {
                let index = Vector3::new(
                    if corner & 1 == 0 { 0.0 } else { (nx - 1) as f64 },
                    if corner & 2 == 0 { 0.0 } else { (ny - 1) as f64 },
                    if corner & 4 == 0 { 0.0 } else { (nz - 1) as f64 },
                );
                let local = rotation.transpose() * apply(&volume.affine, &index);
                lower = lower.inf(&local);
                upper = upper.sup(&local);
            }
        }

        let shape = Interpolator::output_shape(&(upper - lower), voxel_size);
        let affine = from_columns(
            &(x * voxel_size.x),
            &(y * voxel_size.y),
            &(z * voxel_size.z),
            &(rotation * lower),
        );
        Ok(Self { affine, shape })
    }
}

/// Resample volumes onto the grid enclosing all of them.
///
/// Later volumes overwrite earlier ones where they overlap; voxels outside
/// every volume keep `padding`.
pub fn resample_volumes(
    volumes: &[Volume],
    voxel_size: &Vector3<f64>,
    interpolation: Interpolation,
    padding: i32,
) -> Result<Volume> {
    let grid = Grid::enclosing(volumes, voxel_size)?;
    let interpolator = Interpolator::new(interpolation);
    log::debug!("Resampling {} volume(s) onto {:?}", volumes.len(), grid.shape);

    let data = match volumes[0].data() {
        VoxelData::Scalar(_) => {
            let sources = volumes
                .iter()
                .map(|volume| match volume.data() {
                    VoxelData::Scalar(data) => Ok((data, &volume.affine)),
                    VoxelData::Rgba(_) => Err(AssemblyFailure::InconsistentDimensions),
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            VoxelData::Scalar(resample_arrays(&sources, &grid, interpolator, padding)?)
        }
        VoxelData::Rgba(_) => {
            let sources = volumes
                .iter()
                .map(|volume| match volume.data() {
                    VoxelData::Rgba(data) => Ok((data, &volume.affine)),
                    VoxelData::Scalar(_) => Err(AssemblyFailure::InconsistentDimensions),
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            VoxelData::Rgba(resample_arrays(&sources, &grid, interpolator, padding)?)
        }
    };
    Ok(Volume::new(data, grid.affine))
}

/// Round and saturate an interpolated value into the voxel type.
fn saturate<T: NumCast + Bounded + ToPrimitive>(value: f64) -> T {
    let low = T::min_value().to_f64().unwrap_or(f64::MIN);
    let high = T::max_value().to_f64().unwrap_or(f64::MAX);
    <T as NumCast>::from(value.round().clamp(low, high)).unwrap_or_else(T::min_value)
}

fn resample_arrays<T>(
    sources: &[(&ArrayD<T>, &Affine)],
    grid: &Grid,
    interpolator: Interpolator,
    padding: i32,
) -> Result<ArrayD<T>>
where
    T: Copy + Send + Sync + NumCast + Bounded + ToPrimitive,
{
    let (first, _) = sources.first().ok_or(AssemblyFailure::NotAVolume)?;
    let trailing = first.shape()[3..].to_vec();
    let channels: usize = trailing.iter().product();
    let [nx, ny, nz] = grid.shape;

    let mut output = Array4::from_elem((nx, ny, nz, channels), saturate::<T>(padding as f64));
    for (data, affine) in sources {
        if data.shape()[3..] != trailing[..] {
            return Err(AssemblyFailure::InconsistentDimensions.into());
        }
        let shape = data.shape();
        let source_shape = [shape[0], shape[1], shape[2]];
        let source = data
            .to_shape((shape[0], shape[1], shape[2], channels))
            .map_err(|_| AssemblyFailure::InconsistentDimensions)?;
        // target voxel index to source voxel index
        let index_map = affine
            .try_inverse()
            .ok_or(AssemblyFailure::NotAVolume)?
            * grid.affine;

        for channel in 0..channels {
            let values: Array3<f64> = source
                .index_axis(Axis(3), channel)
                .mapv(|value| value.to_f64().unwrap_or(0.0));
            let coefficients = interpolator.coefficients(values);
            let coefficients = coefficients.view();
            Zip::indexed(output.index_axis_mut(Axis(3), channel)).par_for_each(|(i, j, k), value| {
                let point = apply(&index_map, &Vector3::new(i as f64, j as f64, k as f64));
                let inside = (0..3).all(|axis| {
                    point[axis] >= -EDGE_TOLERANCE
                        && point[axis] <= (source_shape[axis] - 1) as f64 + EDGE_TOLERANCE
                });
                if inside {
                    let clamped = Vector3::from_fn(|axis, _| {
                        point[axis].clamp(0.0, (source_shape[axis] - 1) as f64)
                    });
                    *value = saturate(interpolator.sample(&coefficients, &clamped));
                }
            });
        }
    }

    let mut full_shape = vec![nx, ny, nz];
    full_shape.extend_from_slice(&trailing);
    output
        .into_shape_with_order(IxDyn(&full_shape))
        .map_err(|_| AssemblyFailure::InconsistentDimensions.into())
}
