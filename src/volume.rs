use nalgebra::Vector3;
use ndarray::{ArrayD, Axis};

use crate::error::{AssemblyFailure, Result};
use crate::geometry::{self, Affine};

/// Voxel values, spatial axes first: `(x, y, z[, t])`.
///
/// RGB data carries an extra trailing channel axis of length 4 (RGBA).
#[derive(Clone, Debug, PartialEq)]
pub enum VoxelData {
    Scalar(ArrayD<i32>),
    Rgba(ArrayD<u8>),
}

impl VoxelData {
    pub fn shape(&self) -> &[usize] {
        match self {
            VoxelData::Scalar(data) => data.shape(),
            VoxelData::Rgba(data) => data.shape(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn is_rgba(&self) -> bool {
        matches!(self, VoxelData::Rgba(_))
    }

    pub fn spatial_shape(&self) -> [usize; 3] {
        let shape = self.shape();
        [shape[0], shape[1], shape[2]]
    }

    /// Number of volumes along the fourth axis, 1 for 3D data.
    pub fn timepoints(&self) -> usize {
        let non_spatial = if self.is_rgba() {
            self.ndim() - 1
        } else {
            self.ndim()
        };
        if non_spatial > 3 { self.shape()[3] } else { 1 }
    }

    /// Drop singleton axes after the spatial ones.
    ///
    /// Spatial axes are never squeezed, so a single slice stays a 3D volume.
    pub fn squeeze_trailing(self) -> Self {
        match self {
            VoxelData::Scalar(data) => VoxelData::Scalar(squeeze_axes(data, false)),
            VoxelData::Rgba(data) => VoxelData::Rgba(squeeze_axes(data, true)),
        }
    }

    /// Stack blocks of equal shape along a new fourth axis.
    pub fn stack_timepoints(blocks: Vec<VoxelData>) -> Result<VoxelData> {
        let first = blocks.first().ok_or(AssemblyFailure::NotAVolume)?;
        if first.is_rgba() {
            let arrays = blocks
                .into_iter()
                .map(|block| match block {
                    VoxelData::Rgba(data) => Ok(data),
                    VoxelData::Scalar(_) => Err(AssemblyFailure::InconsistentDimensions),
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(VoxelData::Rgba(stack_arrays(&arrays)?))
        } else {
            let arrays = blocks
                .into_iter()
                .map(|block| match block {
                    VoxelData::Scalar(data) => Ok(data),
                    VoxelData::Rgba(_) => Err(AssemblyFailure::InconsistentDimensions),
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(VoxelData::Scalar(stack_arrays(&arrays)?))
        }
    }
}

fn squeeze_axes<T>(mut data: ArrayD<T>, keep_last: bool) -> ArrayD<T> {
    let end = if keep_last {
        data.ndim().saturating_sub(1)
    } else {
        data.ndim()
    };
    for axis in (3..end).rev() {
        if data.len_of(Axis(axis)) == 1 {
            data = data.index_axis_move(Axis(axis), 0);
        }
    }
    data
}

fn stack_arrays<T: Clone>(arrays: &[ArrayD<T>]) -> std::result::Result<ArrayD<T>, AssemblyFailure> {
    let views: Vec<_> = arrays.iter().map(|array| array.view()).collect();
    ndarray::stack(Axis(3), &views).map_err(|_| AssemblyFailure::InconsistentDimensions)
}

/// Voxel data placed in patient space by its affine.
#[derive(Clone, Debug, PartialEq)]
pub struct Volume {
    pub data: VoxelData,
    pub affine: Affine,
}

impl Volume {
    pub fn new(data: VoxelData, affine: Affine) -> Self {
        Self { data, affine }
    }

    /// Get the spatial dimensions of the volume (x, y, z)
    pub fn dim(&self) -> [usize; 3] {
        self.data.spatial_shape()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &VoxelData {
        &self.data
    }

    /// Get a mutable reference to the underlying data
    pub fn data_mut(&mut self) -> &mut VoxelData {
        &mut self.data
    }

    pub fn voxel_spacing(&self) -> Vector3<f64> {
        geometry::voxel_spacing(&self.affine)
    }

    pub fn is_orthogonal(&self) -> bool {
        geometry::is_orthogonal(&self.affine)
    }
}
