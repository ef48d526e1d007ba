//! Affine construction and tolerance based geometry comparisons.
//!
//! Slice geometry arrives in the DICOM patient coordinate system (LPS). The
//! affines built here map voxel indices to RAS compatible millimetres, which
//! is what volumetric writers expect: the first two physical rows are negated.
//!
//! The tolerances are calibration constants carried over from practice with
//! scanner data; keep them as they are.

use nalgebra::{Matrix4, Vector3, Vector4};

use crate::error::{AssemblyFailure, Result};
use crate::record::Slice;

pub type Affine = Matrix4<f64>;

pub const DIRECTION_RTOL: f64 = 0.05;
pub const DIRECTION_ATOL: f64 = 0.05;
pub const INCREMENT_RTOL: f64 = 0.05;
pub const INCREMENT_ATOL: f64 = 0.1;
pub const ORIENTATION_ATOL: f64 = 0.0001;

/// `|a - b| <= atol + rtol * |b|`
#[inline]
pub fn is_close(a: f64, b: f64, rtol: f64, atol: f64) -> bool {
    (a - b).abs() <= atol + rtol * b.abs()
}

pub fn all_close(a: &Vector3<f64>, b: &Vector3<f64>, rtol: f64, atol: f64) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| is_close(*x, *y, rtol, atol))
}

/// Unit vectors pointing the same or the opposite way.
pub fn is_parallel(a: &Vector3<f64>, b: &Vector3<f64>) -> bool {
    all_close(a, b, DIRECTION_RTOL, DIRECTION_ATOL)
        || all_close(a, &-b, DIRECTION_RTOL, DIRECTION_ATOL)
}

pub fn unit(vector: &Vector3<f64>) -> Option<Vector3<f64>> {
    vector.try_normalize(f64::EPSILON)
}

pub fn column(affine: &Affine, index: usize) -> Vector3<f64> {
    Vector3::new(affine[(0, index)], affine[(1, index)], affine[(2, index)])
}

pub fn translation(affine: &Affine) -> Vector3<f64> {
    column(affine, 3)
}

/// Length of each voxel axis in mm.
pub fn voxel_spacing(affine: &Affine) -> Vector3<f64> {
    Vector3::new(
        column(affine, 0).norm(),
        column(affine, 1).norm(),
        column(affine, 2).norm(),
    )
}

/// Affine with the given columns, all expressed in the output (RAS) frame.
#[rustfmt::skip]
pub fn from_columns(x: &Vector3<f64>, y: &Vector3<f64>, z: &Vector3<f64>, origin: &Vector3<f64>) -> Affine {
    Affine::new(
        x[0], y[0], z[0], origin[0],
        x[1], y[1], z[1], origin[1],
        x[2], y[2], z[2], origin[2],
        0.0,  0.0,  0.0,  1.0,
    )
}

/// Affine from LPS patient space vectors: per voxel steps along the rows,
/// the columns and the slices, and the position of voxel (0, 0, 0).
pub fn affine_from_patient_axes(
    row_step: &Vector3<f64>,
    column_step: &Vector3<f64>,
    slice_step: &Vector3<f64>,
    origin: &Vector3<f64>,
) -> Affine {
    let lps_to_ras = Matrix4::from_diagonal(&Vector4::new(-1.0, -1.0, 1.0, 1.0));
    lps_to_ras * from_columns(row_step, column_step, slice_step, origin)
}

/// Affine of a sorted stack together with its slice increment.
///
/// With a single slice the step comes from the declared spacing between
/// slices, then the slice thickness, then 1 mm.
pub fn create_affine(slices: &[Slice<'_>]) -> Result<(Affine, f64)> {
    let first = slices.first().ok_or(AssemblyFailure::NotAVolume)?;
    let orientation = first
        .orientation
        .ok_or(AssemblyFailure::MissingGeometry("image orientation"))?;
    let [row_spacing, column_spacing] = first
        .pixel_spacing
        .ok_or(AssemblyFailure::MissingGeometry("pixel spacing"))?;
    let position = first
        .position
        .ok_or(AssemblyFailure::MissingGeometry("image position"))?;

    let step = if slices.len() == 1 {
        let thickness = first
            .record
            .spacing_between_slices
            .or(first.record.slice_thickness)
            .unwrap_or(1.0);
        -orientation.normal() * thickness
    } else {
        let last = slices[slices.len() - 1]
            .position
            .ok_or(AssemblyFailure::MissingGeometry("image position"))?;
        (last - position) / (slices.len() - 1) as f64
    };

    let increment = step.norm();
    if increment == 0.0 {
        return Err(AssemblyFailure::NotAVolume.into());
    }
    log::debug!("Slice step {step:?}, increment {increment:.4}");

    let affine = affine_from_patient_axes(
        &(orientation.row * column_spacing),
        &(orientation.column * row_spacing),
        &step,
        &position,
    );
    Ok((affine, increment))
}

/// Third voxel axis perpendicular to the first two, within tolerance.
pub fn is_orthogonal(affine: &Affine) -> bool {
    let (Some(x), Some(y), Some(z)) = (
        unit(&column(affine, 0)),
        unit(&column(affine, 1)),
        unit(&column(affine, 2)),
    ) else {
        return false;
    };
    match unit(&x.cross(&y)) {
        Some(perpendicular) => is_parallel(&z, &perpendicular),
        None => false,
    }
}

/// Physical position of a voxel index.
pub fn apply(affine: &Affine, index: &Vector3<f64>) -> Vector3<f64> {
    let point = affine * Vector4::new(index.x, index.y, index.z, 1.0);
    Vector3::new(point.x, point.y, point.z)
}
