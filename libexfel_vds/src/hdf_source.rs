use hdf5::types::H5Type;
use hdf5::File;
use std::path::Path;

use super::constants::{agipd_image_path, epix_data_path, EPIX_TRAIN_KEY};
use super::error::SourceError;
use super::file_stack::FileStack;
use super::index_reader::{IndexColumns, IndexSource};
use super::source_file::{PixelLayout, SourceFile, StreamId, StreamKind};

const TRAIN_FIELD: &str = "trainId";
const PULSE_FIELD: &str = "pulseId";
const CELL_FIELD: &str = "cellId";
const DATA_FIELD: &str = "data";
const GAIN_FIELD: &str = "gain";

/// Reads index columns and dataset geometry from EuXFEL HDF5 files.
#[derive(Debug, Clone, Copy, Default)]
pub struct HDFIndexSource;

impl HDFIndexSource {
    /// Open every file of a stack and describe its frames.
    ///
    /// Only dataset metadata is touched; no index or pixel values are read here.
    pub fn describe_stack(&self, stack: &FileStack) -> Result<Vec<SourceFile>, SourceError> {
        stack
            .files
            .iter()
            .enumerate()
            .map(|(idx, path)| {
                let sequence = path
                    .file_name()
                    .and_then(|n| SourceFile::parse_sequence(&n.to_string_lossy()))
                    .unwrap_or(idx);
                Self::describe_file(path, stack.stream, sequence)
            })
            .collect()
    }

    fn describe_file(path: &Path, stream: StreamId, sequence: usize) -> Result<SourceFile, SourceError> {
        let file = File::open(path)?;
        let (index_path, data_path) = match stream {
            StreamId::Agipd(module) => {
                let image = agipd_image_path(module);
                (image.clone(), format!("{image}/{DATA_FIELD}"))
            }
            StreamId::Epix(epix) => (
                EPIX_TRAIN_KEY
                    .rsplit_once('/')
                    .map(|(group, _)| group.to_string())
                    .unwrap_or_default(),
                epix_data_path(epix),
            ),
        };
        if !file.link_exists(&data_path) {
            return Err(SourceError::MissingIndex {
                stream,
                file: path.to_path_buf(),
                field: DATA_FIELD,
            });
        }
        let dataset_shape = file.dataset(&data_path)?.shape();

        let bad_shape = || SourceError::BadDataShape {
            stream,
            file: path.to_path_buf(),
            shape: dataset_shape.clone(),
        };
        let layout = match (stream, dataset_shape.len()) {
            (StreamId::Agipd(_), 4) if dataset_shape[1] == 2 => PixelLayout::Interleaved,
            (StreamId::Agipd(_), 3) => {
                let gain_path = format!("{index_path}/{GAIN_FIELD}");
                if !file.link_exists(&gain_path) {
                    return Err(SourceError::MissingIndex {
                        stream,
                        file: path.to_path_buf(),
                        field: GAIN_FIELD,
                    });
                }
                PixelLayout::Separate { gain_path }
            }
            (StreamId::Epix(_), 3) => PixelLayout::Plain,
            _ => return Err(bad_shape()),
        };

        Ok(SourceFile {
            path: path.to_path_buf(),
            stream,
            sequence,
            frame_count: dataset_shape[0],
            index_path,
            data_path,
            dataset_shape,
            layout,
        })
    }
}

impl IndexSource for HDFIndexSource {
    fn read_index(&self, file: &SourceFile, kind: StreamKind) -> Result<IndexColumns, SourceError> {
        let handle = File::open(&file.path)?;
        let field = |name: &str| format!("{}/{}", file.index_path, name);
        let mut columns = IndexColumns {
            train_ids: read_column::<u64>(&handle, &field(TRAIN_FIELD))?,
            ..Default::default()
        };
        if kind == StreamKind::MultiField {
            columns.pulse_ids = read_column::<u64>(&handle, &field(PULSE_FIELD))?;
            columns.cell_ids = read_column::<u16>(&handle, &field(CELL_FIELD))?;
        }
        Ok(columns)
    }
}

/// Read a whole index column, None if the file does not have it
fn read_column<T: H5Type>(file: &File, path: &str) -> Result<Option<Vec<T>>, SourceError> {
    if !file.link_exists(path) {
        return Ok(None);
    }
    Ok(Some(file.dataset(path)?.read_raw::<T>()?))
}
