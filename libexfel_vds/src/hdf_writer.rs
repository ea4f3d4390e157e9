use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{Dataset, File, Group, Selection};
use ndarray::{arr0, s, Array3, Array4, Ix4};
use std::collections::BTreeMap;
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use time::OffsetDateTime;

use super::calib::CorrectedArrays;
use super::constants::*;
use super::error::HDF5WriterError;
use super::index_reader::IndexTable;
use super::layout::{FrameIndex, StreamLayout};
use super::source_file::{PixelLayout, SourceFile};

const PART_EXTENSION: &str = "part";

/// One mapping entry of a virtual dataset
struct VirtualMapping {
    src_file: String,
    src_dataset: String,
    src_extents: Vec<usize>,
    src_selection: Selection,
    vds_selection: Selection,
}

/// A simple struct which wraps around the hdf5-rust library.
///
/// Opens an HDF5 container for one run and writes the aligned view into it. Everything is
/// written to `<name>.h5.part`; only `close` moves it to its final name, so an aborted run
/// never leaves a container that looks complete.
#[derive(Debug)]
pub struct VdsWriter {
    file_handle: File,
    part_path: PathBuf,
    final_path: PathBuf,
}
// Structure
// date, version
// data
// |---- AGIPD
// |    |---- moduleId(dset)
// |    |---- index
// |    |    |---- trainId, pulseId, cellId(dset)
// |    |    |---- data, gain(virtual dset)
// |---- EPIX-1, EPIX-2
// |    |---- data(virtual dset)
// |---- AGIPD_corrected
// |    |---- adu, data, mask(dset)
// |    |---- good(dset)
// index
// |---- run, stream, trainId(dset)

impl VdsWriter {
    /// Create the writer, opening the partial file next to `path`
    pub fn new(path: &Path) -> Result<Self, HDF5WriterError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| HDF5WriterError::BadOutputPath(path.to_path_buf()))?;
        let part_path = path.with_file_name(format!(
            "{}.{PART_EXTENSION}",
            file_name.to_string_lossy()
        ));

        // Virtual datasets need the 1.10 file format
        let file_handle = File::with_options()
            .with_fapl(|p| p.libver_latest())
            .create(&part_path)?;

        let version = format!("{}:{}", env!("CARGO_PKG_NAME"), FORMAT_VERSION);
        file_handle
            .new_attr::<VarLenUnicode>()
            .create("version")?
            .write_scalar(&VarLenUnicode::from_str(&version)?)?;
        file_handle
            .new_attr::<VarLenUnicode>()
            .create("date")?
            .write_scalar(&VarLenUnicode::from_str(
                &OffsetDateTime::now_utc().to_string(),
            )?)?;

        Ok(Self {
            file_handle,
            part_path,
            final_path: path.to_path_buf(),
        })
    }

    /// Write the run-level index: run number, stream tag and the aligned trains
    pub fn write_index(
        &self,
        run_number: i32,
        stream_tag: &str,
        train_ids: &[u64],
    ) -> Result<(), HDF5WriterError> {
        let index = require_group(&self.file_handle, INDEX_GROUP)?;
        index
            .new_dataset_builder()
            .with_data(&arr0(run_number))
            .create("run")?;
        index
            .new_dataset_builder()
            .with_data(&arr0(VarLenUnicode::from_str(stream_tag)?))
            .create("stream")?;
        index
            .new_dataset_builder()
            .with_data(train_ids)
            .create(AGIPD_TRAIN_KEY)?;
        Ok(())
    }

    /// Write the AGIPD module list, per-frame index and the virtual data and gain arrays.
    ///
    /// `tables` and `layouts` are in module order; module `i` becomes slice `i` of the
    /// module axis.
    pub fn write_agipd(
        &self,
        tables: &[IndexTable],
        layouts: &[StreamLayout],
        frame_index: &FrameIndex,
    ) -> Result<(), HDF5WriterError> {
        let agipd = require_group(&self.file_handle, AGIPD_GROUP)?;
        let module_ids: Vec<u16> = tables
            .iter()
            .filter_map(|t| t.stream.module_id())
            .map(|m| m as u16)
            .collect();
        agipd
            .new_dataset_builder()
            .with_data(module_ids.as_slice())
            .create(AGIPD_MODULE_KEY)?;

        let index = require_group(&self.file_handle, AGIPD_INDEX_GROUP)?;
        index
            .new_dataset_builder()
            .with_data(frame_index.train_ids.as_slice())
            .create(AGIPD_TRAIN_KEY)?;
        index
            .new_dataset_builder()
            .with_data(frame_index.pulse_ids.as_slice())
            .create(AGIPD_PULSE_KEY)?;
        index
            .new_dataset_builder()
            .with_data(frame_index.cell_ids.as_slice())
            .create(AGIPD_CELL_KEY)?;

        let (Some(first), Some(first_table)) = (layouts.first(), tables.first()) else {
            return Ok(());
        };
        let mut shape = vec![first.length, layouts.len()];
        shape.extend_from_slice(&first_table.files[0].frame_shape());

        let mut data_maps = Vec::new();
        let mut gain_maps = Vec::new();
        for (slot, (table, layout)) in tables.iter().zip(layouts).enumerate() {
            for region in &layout.regions {
                let file = &table.files[region.file];
                let src_file = absolute_name(file)?;
                let src = region.source_offset..region.source_end();
                let dst = region.virtual_offset..region.virtual_end();
                let (data_src, gain_src): (Selection, Option<(String, Selection)>) =
                    match &file.layout {
                        PixelLayout::Interleaved => (
                            s![src.clone(), RAW_DATA_CHANNEL, .., ..].into(),
                            Some((
                                file.data_path.clone(),
                                s![src, RAW_GAIN_CHANNEL, .., ..].into(),
                            )),
                        ),
                        PixelLayout::Separate { gain_path } => (
                            s![src.clone(), .., ..].into(),
                            Some((gain_path.clone(), s![src, .., ..].into())),
                        ),
                        PixelLayout::Plain => (s![src, .., ..].into(), None),
                    };
                data_maps.push(VirtualMapping {
                    src_file: src_file.clone(),
                    src_dataset: file.data_path.clone(),
                    src_extents: file.dataset_shape.clone(),
                    src_selection: data_src,
                    vds_selection: s![dst.clone(), slot, .., ..].into(),
                });
                if let Some((gain_path, gain_selection)) = gain_src {
                    gain_maps.push(VirtualMapping {
                        src_file,
                        src_dataset: gain_path,
                        src_extents: file.dataset_shape.clone(),
                        src_selection: gain_selection,
                        vds_selection: s![dst, slot, .., ..].into(),
                    });
                }
            }
        }

        create_virtual_dataset::<u16>(&index, AGIPD_DATA_KEY, &shape, &data_maps)?;
        create_virtual_dataset::<u16>(&index, AGIPD_GAIN_KEY, &shape, &gain_maps)?;
        Ok(())
    }

    /// Write the virtual data array of one ePix detector
    pub fn write_epix(
        &self,
        epix_id: u8,
        table: &IndexTable,
        layout: &StreamLayout,
    ) -> Result<(), HDF5WriterError> {
        let group = require_group(&self.file_handle, &epix_group(epix_id))?;
        let mut shape = vec![layout.length];
        shape.extend_from_slice(&layout.frame_shape);

        let mut maps = Vec::with_capacity(layout.regions.len());
        for region in &layout.regions {
            let file = &table.files[region.file];
            maps.push(VirtualMapping {
                src_file: absolute_name(file)?,
                src_dataset: file.data_path.clone(),
                src_extents: file.dataset_shape.clone(),
                src_selection: s![region.source_offset..region.source_end(), .., ..].into(),
                vds_selection: s![region.virtual_offset..region.virtual_end(), .., ..].into(),
            });
        }
        create_virtual_dataset::<u16>(&group, AGIPD_DATA_KEY, &shape, &maps)?;
        Ok(())
    }

    /// Shape of the virtual AGIPD data array, `(frame, module, row, col)`
    pub fn agipd_shape(&self) -> Result<Vec<usize>, HDF5WriterError> {
        self.file_handle.flush()?;
        let index = self.file_handle.group(AGIPD_INDEX_GROUP)?;
        Ok(index.dataset(AGIPD_DATA_KEY)?.shape())
    }

    /// Read a range of frames of the virtual AGIPD data and gain arrays back through the
    /// container
    pub fn read_agipd_frames(
        &self,
        frames: Range<usize>,
    ) -> Result<(Array4<u16>, Array4<u16>), HDF5WriterError> {
        let index = self.file_handle.group(AGIPD_INDEX_GROUP)?;
        let data = index
            .dataset(AGIPD_DATA_KEY)?
            .read_slice::<u16, _, Ix4>(s![frames.clone(), .., .., ..])?;
        let gain = index
            .dataset(AGIPD_GAIN_KEY)?
            .read_slice::<u16, _, Ix4>(s![frames, .., .., ..])?;
        Ok((data, gain))
    }

    /// Create the calibrated datasets, shaped `(gain_mode, frame, module, row, col)`, and
    /// store the usable pixel map. The arrays are filled chunk by chunk with
    /// [`CorrectedDatasets::write_frames`].
    pub fn create_corrected(
        &self,
        shape: [usize; 5],
        good_pixels: &Array3<bool>,
    ) -> Result<CorrectedDatasets, HDF5WriterError> {
        let group = require_group(&self.file_handle, AGIPD_CORRECTED_GROUP)?;
        group
            .new_dataset_builder()
            .with_data(good_pixels)
            .create(GOOD_PIXEL_KEY)?;
        Ok(CorrectedDatasets {
            adu: group.new_dataset::<f64>().shape(shape.to_vec()).create("adu")?,
            data: group.new_dataset::<f64>().shape(shape.to_vec()).create("data")?,
            mask: group.new_dataset::<bool>().shape(shape.to_vec()).create("mask")?,
        })
    }

    /// Drop whatever part of the calibrated group made it to the file
    pub fn remove_corrected(&self) -> Result<(), HDF5WriterError> {
        if self.file_handle.link_exists(AGIPD_CORRECTED_GROUP) {
            self.file_handle.unlink(AGIPD_CORRECTED_GROUP)?;
        }
        Ok(())
    }

    /// Close the container and move it to its final name
    pub fn close(self) -> Result<PathBuf, HDF5WriterError> {
        self.file_handle.flush()?;
        self.file_handle.close()?;
        std::fs::rename(&self.part_path, &self.final_path)?;
        Ok(self.final_path)
    }

    /// Close and delete the partial container
    pub fn abort(self) {
        let part_path = self.part_path.clone();
        drop(self);
        if let Err(e) = std::fs::remove_file(&part_path) {
            log::warn!("Could not remove partial output {}: {e}", part_path.display());
        }
    }
}

/// The calibrated datasets of a container
#[derive(Debug)]
pub struct CorrectedDatasets {
    adu: Dataset,
    data: Dataset,
    mask: Dataset,
}

impl CorrectedDatasets {
    /// Write calibrated frames starting at frame `first_frame`
    pub fn write_frames(
        &self,
        first_frame: usize,
        corrected: &CorrectedArrays,
    ) -> Result<(), HDF5WriterError> {
        let frames = first_frame..first_frame + corrected.adu.len_of(ndarray::Axis(1));
        self.adu
            .write_slice(&corrected.adu, s![.., frames.clone(), .., .., ..])?;
        self.data
            .write_slice(&corrected.data, s![.., frames.clone(), .., .., ..])?;
        self.mask
            .write_slice(&corrected.mask, s![.., frames, .., .., ..])?;
        Ok(())
    }
}

/// Write source file information in a yaml file next to a closed container
pub fn write_fileinfo<'a>(
    container: &Path,
    tables: impl Iterator<Item = &'a IndexTable>,
) -> Result<PathBuf, HDF5WriterError> {
    let mut file_map = BTreeMap::<String, Vec<String>>::new();
    for table in tables {
        let mut file_list = Vec::with_capacity(table.files.len());
        let mut size_list = Vec::with_capacity(table.files.len());
        for file in &table.files {
            let bytes = file.path.metadata().map(|m| m.len()).unwrap_or(0);
            size_list.push(human_bytes::human_bytes(bytes as f64));
            file_list.push(file.path.to_string_lossy().to_string());
        }
        file_map.insert(format!("{}_file_names", table.stream), file_list);
        file_map.insert(format!("{}_file_sizes", table.stream), size_list);
    }

    let info_path = container.with_extension("yml");
    let mut info_file = std::fs::File::create(&info_path)?;
    info_file.write_all(serde_yaml::to_string(&file_map)?.as_bytes())?;
    Ok(info_path)
}

/// Open a group at a slash separated path, creating any missing level
pub fn require_group(root: &Group, path: &str) -> Result<Group, hdf5::Error> {
    let mut group = root.clone();
    for name in path.split('/').filter(|n| !n.is_empty()) {
        group = match group.group(name) {
            Ok(g) => g,
            Err(_) => group.create_group(name)?,
        };
    }
    Ok(group)
}

/// Source file name as stored in the mapping; must resolve from any working directory
fn absolute_name(file: &SourceFile) -> Result<String, HDF5WriterError> {
    Ok(std::fs::canonicalize(&file.path)?
        .to_string_lossy()
        .to_string())
}

fn create_virtual_dataset<T: H5Type>(
    group: &Group,
    name: &str,
    shape: &[usize],
    mappings: &[VirtualMapping],
) -> Result<Dataset, HDF5WriterError> {
    let vds_extents = shape.to_vec();
    Ok(group
        .new_dataset::<T>()
        .shape(shape.to_vec())
        .with_dcpl(|plist| {
            for map in mappings {
                plist.virtual_map(
                    &map.src_file,
                    &map.src_dataset,
                    map.src_extents.clone(),
                    map.src_selection.clone(),
                    vds_extents.clone(),
                    map.vds_selection.clone(),
                );
            }
            plist
        })
        .create(name)?)
}
