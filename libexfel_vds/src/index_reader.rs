use super::constants::INVALID_TRAIN_ID;
use super::error::SourceError;
use super::source_file::{SourceFile, StreamId, StreamKind};

/// Per-frame index columns of one source file, exactly as stored.
///
/// A column is None when the file does not carry that field at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexColumns {
    pub train_ids: Option<Vec<u64>>,
    pub pulse_ids: Option<Vec<u64>>,
    pub cell_ids: Option<Vec<u16>>,
}

/// Anything that can hand out the index columns of a source file.
///
/// Implementations must only read index fields, never pixel data.
pub trait IndexSource {
    fn read_index(&self, file: &SourceFile, kind: StreamKind) -> Result<IndexColumns, SourceError>;
}

/// A single frame of a stream. `file` indexes into the owning table's file list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRecord {
    pub train_id: u64,
    pub pulse_id: u64,
    pub cell_id: u16,
    pub file: usize,
    pub offset: usize,
}

/// All frames of one stream, in file sequence order.
///
/// Train ids never decrease across the table and offsets strictly increase within a file.
#[derive(Debug, Clone)]
pub struct IndexTable {
    pub stream: StreamId,
    pub files: Vec<SourceFile>,
    pub frames: Vec<FrameRecord>,
    /// Frames dropped because their train id was never filled in
    pub skipped_frames: usize,
}

impl IndexTable {
    /// Distinct train ids of the stream in ascending order
    pub fn train_ids(&self) -> Vec<u64> {
        let mut trains: Vec<u64> = self.frames.iter().map(|f| f.train_id).collect();
        trains.dedup();
        trains
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Pixel shape of a single frame (taken from the first file)
    pub fn frame_shape(&self) -> &[usize] {
        self.files.first().map(|f| f.frame_shape()).unwrap_or(&[])
    }

    /// First and last valid train ids stored in a given file
    pub fn file_train_range(&self, file: usize) -> Option<(u64, u64)> {
        let mut trains = self
            .frames
            .iter()
            .filter(|f| f.file == file)
            .map(|f| f.train_id);
        let first = trains.next()?;
        Some((first, trains.last().unwrap_or(first)))
    }
}

/// Builds an IndexTable for a stream from its source files
pub struct SourceIndexReader<'a, S: IndexSource> {
    source: &'a S,
}

impl<'a, S: IndexSource> SourceIndexReader<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Read the index columns of every file of a stream, in the order given.
    ///
    /// Returns EmptyStream if the files hold no valid frame at all.
    pub fn read_stream(
        &self,
        stream: StreamId,
        files: Vec<SourceFile>,
    ) -> Result<IndexTable, SourceError> {
        let kind = stream.kind();
        let mut frames: Vec<FrameRecord> = Vec::new();
        let mut skipped_frames = 0;
        let mut last_train: Option<u64> = None;

        for (file_idx, file) in files.iter().enumerate() {
            let columns = self.source.read_index(file, kind)?;
            let trains = required(columns.train_ids, file, "trainId")?;
            let (pulses, cells) = match kind {
                StreamKind::MultiField => (
                    Some(required(columns.pulse_ids, file, "pulseId")?),
                    Some(required(columns.cell_ids, file, "cellId")?),
                ),
                StreamKind::SingleField => (None, None),
            };

            for offset in 0..file.frame_count {
                let train_id = trains[offset];
                if train_id == INVALID_TRAIN_ID {
                    skipped_frames += 1;
                    continue;
                }
                if let Some(previous) = last_train {
                    if train_id < previous {
                        return Err(SourceError::TrainOrder {
                            stream,
                            file: file.path.clone(),
                            previous,
                            found: train_id,
                        });
                    }
                }
                last_train = Some(train_id);
                frames.push(FrameRecord {
                    train_id,
                    pulse_id: pulses.as_ref().map_or(0, |p| p[offset]),
                    cell_id: cells.as_ref().map_or(0, |c| c[offset]),
                    file: file_idx,
                    offset,
                });
            }
        }

        if frames.is_empty() {
            return Err(SourceError::EmptyStream { stream });
        }

        Ok(IndexTable {
            stream,
            files,
            frames,
            skipped_frames,
        })
    }
}

/// Unwrap an index column, checking it covers every frame of the file
fn required<T>(
    column: Option<Vec<T>>,
    file: &SourceFile,
    field: &'static str,
) -> Result<Vec<T>, SourceError> {
    let column = column.ok_or_else(|| SourceError::MissingIndex {
        stream: file.stream,
        file: file.path.clone(),
        field,
    })?;
    if column.len() != file.frame_count {
        return Err(SourceError::IndexLength {
            stream: file.stream,
            file: file.path.clone(),
            field,
            expected: file.frame_count,
            found: column.len(),
        });
    }
    Ok(column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{agipd_file, epix_file, MemorySource};

    #[test]
    fn test_multi_field_across_files() {
        let mut source = MemorySource::default();
        let a = agipd_file(0, 0, 4);
        let b = agipd_file(0, 1, 2);
        source.insert_agipd(&a, &[100, 100, 101, 101], &[0, 1, 0, 1]);
        source.insert_agipd(&b, &[102, 102], &[0, 1]);

        let table = SourceIndexReader::new(&source)
            .read_stream(StreamId::Agipd(0), vec![a, b])
            .unwrap();
        assert_eq!(table.frame_count(), 6);
        assert_eq!(table.train_ids(), vec![100, 101, 102]);
        assert_eq!(table.frames[4].file, 1);
        assert_eq!(table.frames[4].offset, 0);
        assert_eq!(table.frames[5].pulse_id, 1);
        assert_eq!(table.file_train_range(0), Some((100, 101)));
        assert_eq!(table.frame_shape(), &[512, 128]);
    }

    #[test]
    fn test_single_field_ignores_pulses() {
        let mut source = MemorySource::default();
        let file = epix_file(1, 0, 3);
        source.insert_trains(&file, &[7, 8, 9]);
        let table = SourceIndexReader::new(&source)
            .read_stream(StreamId::Epix(1), vec![file])
            .unwrap();
        assert_eq!(table.train_ids(), vec![7, 8, 9]);
        assert!(table.frames.iter().all(|f| f.pulse_id == 0));
    }

    #[test]
    fn test_unfilled_tail_is_skipped() {
        let mut source = MemorySource::default();
        let file = agipd_file(2, 0, 5);
        source.insert_agipd(&file, &[10, 11, 12, 0, 0], &[0, 0, 0, 0, 0]);
        let table = SourceIndexReader::new(&source)
            .read_stream(StreamId::Agipd(2), vec![file])
            .unwrap();
        assert_eq!(table.frame_count(), 3);
        assert_eq!(table.skipped_frames, 2);
    }

    #[test]
    fn test_missing_pulse_field() {
        let mut source = MemorySource::default();
        let file = agipd_file(0, 0, 2);
        source.insert_trains(&file, &[1, 2]);
        match SourceIndexReader::new(&source).read_stream(StreamId::Agipd(0), vec![file]) {
            Err(SourceError::MissingIndex { field, stream, .. }) => {
                assert_eq!(field, "pulseId");
                assert_eq!(stream, StreamId::Agipd(0));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn test_short_column() {
        let mut source = MemorySource::default();
        let file = epix_file(2, 0, 3);
        source.insert_trains(&file, &[1, 2]);
        match SourceIndexReader::new(&source).read_stream(StreamId::Epix(2), vec![file]) {
            Err(SourceError::IndexLength {
                expected, found, ..
            }) => assert_eq!((expected, found), (3, 2)),
            _ => panic!(),
        }
    }

    #[test]
    fn test_empty_stream() {
        let source = MemorySource::default();
        match SourceIndexReader::new(&source).read_stream(StreamId::Agipd(5), vec![]) {
            Err(SourceError::EmptyStream { stream }) => assert_eq!(stream, StreamId::Agipd(5)),
            _ => panic!(),
        }
    }

    #[test]
    fn test_decreasing_trains() {
        let mut source = MemorySource::default();
        let a = agipd_file(0, 0, 2);
        let b = agipd_file(0, 1, 2);
        source.insert_agipd(&a, &[5, 6], &[0, 0]);
        source.insert_agipd(&b, &[4, 7], &[0, 0]);
        match SourceIndexReader::new(&source).read_stream(StreamId::Agipd(0), vec![a, b]) {
            Err(SourceError::TrainOrder {
                previous, found, ..
            }) => assert_eq!((previous, found), (6, 4)),
            _ => panic!(),
        }
    }
}
