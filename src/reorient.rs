//! Lossless reordering of voxel axes into LAS orientation.

use ndarray::{ArrayD, Axis};

use crate::geometry::{Affine, column};
use crate::volume::{Volume, VoxelData};

/// Sign each physical axis should run with: left, anterior, superior.
const TARGET_SIGNS: [f64; 3] = [-1.0, 1.0, 1.0];

/// Voxel axis feeding each output axis, and whether it runs reversed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AxisMapping {
    pub order: [usize; 3],
    pub flips: [bool; 3],
}

impl AxisMapping {
    /// Pairs voxel axes with physical axes by repeatedly taking the largest
    /// remaining direction component.
    pub fn from_affine(affine: &Affine) -> Self {
        let mut order = [0usize; 3];
        let mut voxel_taken = [false; 3];
        let mut physical_taken = [false; 3];
        for _ in 0..3 {
            let mut best = (0usize, 0usize, f64::NEG_INFINITY);
            for physical in (0..3).filter(|p| !physical_taken[*p]) {
                for voxel in (0..3).filter(|v| !voxel_taken[*v]) {
                    let magnitude = affine[(physical, voxel)].abs();
                    if magnitude > best.2 {
                        best = (physical, voxel, magnitude);
                    }
                }
            }
            let (physical, voxel, _) = best;
            order[physical] = voxel;
            physical_taken[physical] = true;
            voxel_taken[voxel] = true;
        }

        let flips = [0, 1, 2].map(|physical| {
            affine[(physical, order[physical])].signum() != TARGET_SIGNS[physical]
        });
        Self { order, flips }
    }

    pub fn is_identity(&self) -> bool {
        self.order == [0, 1, 2] && self.flips == [false; 3]
    }
}

/// Permute and flip the voxel axes so they run left, anterior, superior.
///
/// Voxel values are only moved, never interpolated, and every voxel keeps
/// its physical position. Applying this twice is the same as once.
pub fn reorient(volume: Volume) -> Volume {
    let mapping = AxisMapping::from_affine(&volume.affine);
    if mapping.is_identity() {
        return volume;
    }
    log::debug!("Reorienting with {mapping:?}");

    let shape = volume.dim();
    let mut affine = volume.affine;
    for physical in 0..3 {
        let source = mapping.order[physical];
        let mut direction = column(&volume.affine, source);
        if mapping.flips[physical] {
            let extent = direction * (shape[source] as f64 - 1.0);
            for row in 0..3 {
                affine[(row, 3)] += extent[row];
            }
            direction = -direction;
        }
        for row in 0..3 {
            affine[(row, physical)] = direction[row];
        }
    }

    let data = match volume.data {
        VoxelData::Scalar(data) => VoxelData::Scalar(reorder(data, &mapping)),
        VoxelData::Rgba(data) => VoxelData::Rgba(reorder(data, &mapping)),
    };
    Volume::new(data, affine)
}

fn reorder<T: Clone>(data: ArrayD<T>, mapping: &AxisMapping) -> ArrayD<T> {
    let mut axes = mapping.order.to_vec();
    axes.extend(3..data.ndim());
    let mut data = data.permuted_axes(axes);
    for (axis, flip) in mapping.flips.iter().enumerate() {
        if *flip {
            data.invert_axis(Axis(axis));
        }
    }
    data.as_standard_layout().into_owned()
}
