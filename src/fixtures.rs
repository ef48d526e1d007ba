//! Synthetic slice records for unit tests.

use nalgebra::Vector3;
use ndarray::Array4;

use crate::record::{ImageOrientation, SliceRecord};

pub(crate) const ROWS: usize = 3;
pub(crate) const COLUMNS: usize = 4;

/// Pixel value encoding its origin: `instance * 100 + row * 10 + column`.
pub(crate) fn pixel_value(instance: i32, row: usize, column: usize) -> i32 {
    instance * 100 + row as i32 * 10 + column as i32
}

pub(crate) fn pixels(instance: i32) -> Array4<i32> {
    Array4::from_shape_fn((1, ROWS, COLUMNS, 1), |(_, row, column, _)| {
        pixel_value(instance, row, column)
    })
}

/// Axial MR slice at height `z`, 0.6 mm rows and 0.8 mm columns.
pub(crate) fn axial_record(instance: i32, z: f64) -> SliceRecord {
    SliceRecord {
        series_uid: Some("1.2.3".to_string()),
        instance_number: Some(instance),
        image_position: Some(Vector3::new(10.0, 20.0, z)),
        image_orientation: Some(ImageOrientation::new(
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        )),
        pixel_spacing: Some([0.6, 0.8]),
        rows: Some(ROWS as u16),
        columns: Some(COLUMNS as u16),
        photometric_interpretation: Some("MONOCHROME2".to_string()),
        modality: Some("MR".to_string()),
        image_type: vec!["ORIGINAL".to_string(), "PRIMARY".to_string()],
        repetition_time: Some(2000.0),
        echo_time: Some(30.0),
        pixels: Some(pixels(instance)),
        ..Default::default()
    }
}

pub(crate) fn axial_series(count: usize, spacing: f64) -> Vec<SliceRecord> {
    (0..count)
        .map(|index| axial_record(index as i32 + 1, index as f64 * spacing))
        .collect()
}

/// `timepoints` stacks of `slices` each, instance numbers running time major.
pub(crate) fn axial_4d(timepoints: usize, slices: usize, spacing: f64) -> Vec<SliceRecord> {
    (0..timepoints * slices)
        .map(|index| axial_record(index as i32 + 1, (index % slices) as f64 * spacing))
        .collect()
}

pub(crate) fn with_manufacturer(mut records: Vec<SliceRecord>, manufacturer: &str) -> Vec<SliceRecord> {
    for record in &mut records {
        record.manufacturer = Some(manufacturer.to_string());
    }
    records
}
