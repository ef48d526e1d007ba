use dicom_to_volume::{ImageOrientation, SliceRecord};
use nalgebra::Vector3;
use ndarray::Array4;

pub const ROWS: usize = 3;
pub const COLUMNS: usize = 4;

/// Axial MR slice at height `z`, every pixel holding `instance`.
pub fn axial_slice(instance: i32, z: f64) -> SliceRecord {
    SliceRecord {
        series_uid: Some("1.3.6.1.4.1.9590.100.1".to_string()),
        instance_number: Some(instance),
        image_position: Some(Vector3::new(-100.0, -120.0, z)),
        image_orientation: Some(ImageOrientation::new(
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        )),
        pixel_spacing: Some([0.6, 0.8]),
        slice_thickness: Some(2.0),
        rows: Some(ROWS as u16),
        columns: Some(COLUMNS as u16),
        photometric_interpretation: Some("MONOCHROME2".to_string()),
        modality: Some("MR".to_string()),
        image_type: vec!["ORIGINAL".to_string(), "PRIMARY".to_string()],
        repetition_time: Some(500.0),
        echo_time: Some(12.0),
        pixels: Some(Array4::from_elem((1, ROWS, COLUMNS, 1), instance)),
        ..Default::default()
    }
}

/// Slices at the given heights, instance numbers in list order.
pub fn series_at(heights: &[f64]) -> Vec<SliceRecord> {
    heights
        .iter()
        .enumerate()
        .map(|(index, z)| axial_slice(index as i32 + 1, *z))
        .collect()
}

pub fn series(count: usize, spacing: f64) -> Vec<SliceRecord> {
    let heights: Vec<f64> = (0..count).map(|index| index as f64 * spacing).collect();
    series_at(&heights)
}

/// Classic 4D layout: `timepoints` stacks of `slices`, instances time major.
#[allow(dead_code)]
pub fn timeseries(timepoints: usize, slices: usize, spacing: f64) -> Vec<SliceRecord> {
    (0..timepoints * slices)
        .map(|index| axial_slice(index as i32 + 1, (index % slices) as f64 * spacing))
        .collect()
}

#[allow(dead_code)]
pub fn made_by(mut records: Vec<SliceRecord>, manufacturer: &str) -> Vec<SliceRecord> {
    for record in &mut records {
        record.manufacturer = Some(manufacturer.to_string());
    }
    records
}
