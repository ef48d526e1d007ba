use std::{env, path::PathBuf};

use dicom_to_volume::{SeriesLoader, Settings, convert_batch};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let directory = env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("dicom"), PathBuf::from);
    let records = SeriesLoader::load_from_directory(&directory)
        .expect("should have loaded files from directory");
    let series = SeriesLoader::group_by_series(records);
    log::info!("Found {} series in {}", series.len(), directory.display());

    for converted in convert_batch(&series, &Settings::default()) {
        match converted.result {
            Ok(volume) => log::info!(
                "{}: {:?} {:?} volume of shape {:?}, voxel spacing {:?}",
                converted.series_uid.unwrap_or_default(),
                volume.vendor,
                volume.acquisition,
                volume.volume.data().shape(),
                volume.volume.voxel_spacing().as_slice(),
            ),
            Err(error) => log::warn!(
                "{}: not converted ({})",
                converted.series_uid.unwrap_or_default(),
                error.reason()
            ),
        }
    }
}
