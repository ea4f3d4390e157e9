//! Source file fixtures shared by the unit tests: in-memory index columns for the engine and
//! small HDF5 files for the container.
use ndarray::{Array1, Array3, Array4};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::constants::{agipd_image_path, epix_data_path};
use super::error::SourceError;
use super::hdf_writer::require_group;
use super::index_reader::{IndexColumns, IndexSource, IndexTable, SourceIndexReader};
use super::source_file::{PixelLayout, SourceFile, StreamId, StreamKind};

#[derive(Debug, Default)]
pub struct MemorySource {
    columns: HashMap<PathBuf, IndexColumns>,
}

impl MemorySource {
    pub fn insert_agipd(&mut self, file: &SourceFile, trains: &[u64], pulses: &[u64]) {
        self.columns.insert(
            file.path.clone(),
            IndexColumns {
                train_ids: Some(trains.to_vec()),
                pulse_ids: Some(pulses.to_vec()),
                cell_ids: Some(pulses.iter().map(|p| *p as u16).collect()),
            },
        );
    }

    pub fn insert_trains(&mut self, file: &SourceFile, trains: &[u64]) {
        self.columns.insert(
            file.path.clone(),
            IndexColumns {
                train_ids: Some(trains.to_vec()),
                ..Default::default()
            },
        );
    }
}

impl IndexSource for MemorySource {
    fn read_index(&self, file: &SourceFile, _kind: StreamKind) -> Result<IndexColumns, SourceError> {
        Ok(self.columns.get(&file.path).cloned().unwrap_or_default())
    }
}

pub fn agipd_file(module: usize, sequence: usize, frames: usize) -> SourceFile {
    SourceFile {
        path: PathBuf::from(format!(
            "/raw/r0001/RAW-R0001-AGIPD{module:02}-S{sequence:05}.h5"
        )),
        stream: StreamId::Agipd(module),
        sequence,
        frame_count: frames,
        index_path: agipd_image_path(module),
        data_path: format!("{}/data", agipd_image_path(module)),
        dataset_shape: vec![frames, 2, 512, 128],
        layout: PixelLayout::Interleaved,
    }
}

pub fn epix_file(epix: u8, sequence: usize, frames: usize) -> SourceFile {
    SourceFile {
        path: PathBuf::from(format!(
            "/raw/r0001/RAW-R0001-EPIX{epix:02}-S{sequence:05}.h5"
        )),
        stream: StreamId::Epix(epix),
        sequence,
        frame_count: frames,
        index_path: String::from("INDEX"),
        data_path: epix_data_path(epix),
        dataset_shape: vec![frames, 708, 768],
        layout: PixelLayout::Plain,
    }
}

/// Build a module table where each file holds consecutive trains with `pulses` frames each
pub fn agipd_table(module: usize, first_train: u64, file_trains: &[usize], pulses: u64) -> IndexTable {
    let mut source = MemorySource::default();
    let mut files = Vec::new();
    let mut train = first_train;
    for (seq, n_trains) in file_trains.iter().enumerate() {
        let mut trains = Vec::new();
        let mut pulse_ids = Vec::new();
        for _ in 0..*n_trains {
            for p in 0..pulses {
                trains.push(train);
                pulse_ids.push(p);
            }
            train += 1;
        }
        let file = agipd_file(module, seq, trains.len());
        source.insert_agipd(&file, &trains, &pulse_ids);
        files.push(file);
    }
    SourceIndexReader::new(&source)
        .read_stream(StreamId::Agipd(module), files)
        .unwrap()
}

/// Build an ePix table from one list of train ids per file
pub fn epix_table(epix: u8, file_trains: &[Vec<u64>]) -> IndexTable {
    let mut source = MemorySource::default();
    let mut files = Vec::new();
    for (seq, trains) in file_trains.iter().enumerate() {
        let file = epix_file(epix, seq, trains.len());
        source.insert_trains(&file, trains);
        files.push(file);
    }
    SourceIndexReader::new(&source)
        .read_stream(StreamId::Epix(epix), files)
        .unwrap()
}

/// Pixel pattern of the HDF5 fixtures, unique per train, pulse, gain channel, module and pixel
pub fn agipd_pixel(train: u64, pulse: u64, channel: usize, module: usize, row: usize, col: usize) -> u16 {
    (train * 100 + pulse * 10) as u16 + (channel * 1000 + module * 50 + row * 4 + col) as u16
}

/// Write a raw AGIPD sequence file of `trains` trains with `pulses` frames of 6x4 pixels each
pub fn write_agipd_source(
    dir: &Path,
    run: i32,
    module: usize,
    sequence: usize,
    first_train: u64,
    trains: usize,
    pulses: u64,
) {
    let path = dir.join(format!("RAW-R{run:04}-AGIPD{module:02}-S{sequence:05}.h5"));
    let file = hdf5::File::create(path).unwrap();
    let image = require_group(&file, &agipd_image_path(module)).unwrap();
    let frames = trains * pulses as usize;
    let train_ids = Array1::from_shape_fn(frames, |i| first_train + (i as u64) / pulses);
    let pulse_ids = Array1::from_shape_fn(frames, |i| (i as u64) % pulses);
    let cell_ids = pulse_ids.mapv(|p| p as u16);
    let data = Array4::from_shape_fn((frames, 2, 6, 4), |(f, ch, r, c)| {
        agipd_pixel(train_ids[f], pulse_ids[f], ch, module, r, c)
    });
    image.new_dataset_builder().with_data(&train_ids).create("trainId").unwrap();
    image.new_dataset_builder().with_data(&pulse_ids).create("pulseId").unwrap();
    image.new_dataset_builder().with_data(&cell_ids).create("cellId").unwrap();
    image.new_dataset_builder().with_data(&data).create("data").unwrap();
}

/// Write an ePix sequence file, one 3x5 frame per train
pub fn write_epix_source(dir: &Path, run: i32, epix: u8, sequence: usize, trains: &[u64]) {
    let path = dir.join(format!("RAW-R{run:04}-EPIX{epix:02}-S{sequence:05}.h5"));
    let file = hdf5::File::create(path).unwrap();
    require_group(&file, "INDEX")
        .unwrap()
        .new_dataset_builder()
        .with_data(trains)
        .create("trainId")
        .unwrap();
    let data_path = epix_data_path(epix);
    let (group, name) = data_path.rsplit_once('/').unwrap();
    let pixels = Array3::from_shape_fn((trains.len(), 3, 5), |(f, r, c)| {
        (trains[f] as usize * 10 + r * 5 + c) as u16
    });
    require_group(&file, group)
        .unwrap()
        .new_dataset_builder()
        .with_data(&pixels)
        .create(name)
        .unwrap();
}
