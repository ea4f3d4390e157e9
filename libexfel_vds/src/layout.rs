use super::error::LayoutError;
use super::index_reader::IndexTable;
use super::pulse::FrameSelection;
use super::source_file::StreamId;

/// Maps `source_length` frames starting at `source_offset` of one file onto the virtual
/// frame axis at `virtual_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualRegion {
    pub file: usize,
    pub source_offset: usize,
    pub source_length: usize,
    pub virtual_offset: usize,
    pub virtual_length: usize,
}

impl VirtualRegion {
    pub fn source_end(&self) -> usize {
        self.source_offset + self.source_length
    }

    pub fn virtual_end(&self) -> usize {
        self.virtual_offset + self.virtual_length
    }
}

/// The complete mapping of one stream's virtual array, regions in virtual order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLayout {
    pub stream: StreamId,
    pub frame_shape: Vec<usize>,
    pub regions: Vec<VirtualRegion>,
    pub length: usize,
}

impl StreamLayout {
    pub fn new(stream: StreamId, frame_shape: &[usize]) -> Self {
        Self {
            stream,
            frame_shape: frame_shape.to_vec(),
            regions: Vec::new(),
            length: 0,
        }
    }

    /// Append one source frame to the end of the virtual array.
    ///
    /// The frame extends the last region when it directly follows it in the same file,
    /// otherwise it opens a new region.
    pub fn push_frame(&mut self, file: usize, offset: usize) {
        match self.regions.last_mut() {
            Some(last) if last.file == file && last.source_end() == offset => {
                last.source_length += 1;
                last.virtual_length += 1;
            }
            _ => self.regions.push(VirtualRegion {
                file,
                source_offset: offset,
                source_length: 1,
                virtual_offset: self.length,
                virtual_length: 1,
            }),
        }
        self.length += 1;
    }

    /// True when the regions tile `[0, length)` with no gap and no overlap
    pub fn covers_exactly(&self) -> bool {
        let mut cursor = 0;
        for region in &self.regions {
            if region.virtual_offset != cursor
                || region.virtual_length == 0
                || region.virtual_length != region.source_length
            {
                return false;
            }
            cursor = region.virtual_end();
        }
        cursor == self.length
    }
}

/// Per-frame index columns of the virtual array.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameIndex {
    pub train_ids: Vec<u64>,
    pub pulse_ids: Vec<u64>,
    pub cell_ids: Vec<u16>,
}

pub struct VirtualLayoutBuilder;

impl VirtualLayoutBuilder {
    /// Build the region list of one stream from its selected frames
    pub fn build_stream(table: &IndexTable, selection: &FrameSelection) -> StreamLayout {
        let mut layout = StreamLayout::new(table.stream, table.frame_shape());
        for row in selection.rows() {
            let frame = &table.frames[row];
            layout.push_frame(frame.file, frame.offset);
        }
        layout
    }

    /// Build one region list per AGIPD module.
    ///
    /// Every module must have the same frame shape in every file, and the same number of
    /// selected frames, since they become slices of one array.
    pub fn build_modules(
        tables: &[IndexTable],
        selections: &[FrameSelection],
    ) -> Result<Vec<StreamLayout>, LayoutError> {
        let expected_shape = tables.first().map(|t| t.frame_shape().to_vec()).unwrap_or_default();
        let mut layouts: Vec<StreamLayout> = Vec::with_capacity(tables.len());
        for (table, selection) in tables.iter().zip(selections) {
            let module = table.stream.module_id().unwrap_or_default();
            if let Some(file) = table.files.iter().find(|f| f.frame_shape() != expected_shape) {
                return Err(LayoutError::ShapeMismatch {
                    module,
                    expected: expected_shape,
                    found: file.frame_shape().to_vec(),
                });
            }
            let layout = Self::build_stream(table, selection);
            if let Some(first) = layouts.first() {
                if first.length != layout.length {
                    return Err(LayoutError::LengthMismatch {
                        module,
                        expected: first.length,
                        found: layout.length,
                    });
                }
            }
            layouts.push(layout);
        }
        Ok(layouts)
    }

    /// Train, pulse and cell id of every frame of the virtual array
    pub fn frame_index(table: &IndexTable, selection: &FrameSelection) -> FrameIndex {
        let mut index = FrameIndex::default();
        for row in selection.rows() {
            let frame = &table.frames[row];
            index.train_ids.push(frame.train_id);
            index.pulse_ids.push(frame.pulse_id);
            index.cell_ids.push(frame.cell_id);
        }
        index
    }
}
