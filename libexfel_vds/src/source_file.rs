use std::fmt::Display;
use std::path::PathBuf;

/// Identifies one independent stream of frames: a single AGIPD module or one ePix detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamId {
    Agipd(usize),
    Epix(u8),
}

impl StreamId {
    /// The index columns a stream of this kind carries
    pub fn kind(&self) -> StreamKind {
        match self {
            Self::Agipd(_) => StreamKind::MultiField,
            Self::Epix(_) => StreamKind::SingleField,
        }
    }

    pub fn module_id(&self) -> Option<usize> {
        match self {
            Self::Agipd(m) => Some(*m),
            Self::Epix(_) => None,
        }
    }
}

impl Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agipd(m) => write!(f, "AGIPD{m:02}"),
            Self::Epix(e) => write!(f, "EPIX-{e}"),
        }
    }
}

/// Which per-frame index columns a stream provides.
///
/// AGIPD writes several frames per train, each labelled with train, pulse and memory cell.
/// ePix writes one frame per train and only the train id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    MultiField,
    SingleField,
}

/// Where the gain stage of each pixel lives in a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelLayout {
    /// Raw AGIPD: `(frame, 2, row, col)`, data and gain on the second axis
    Interleaved,
    /// Processed AGIPD: `(frame, row, col)` with gain in a dataset of its own
    Separate { gain_path: String },
    /// ePix: `(frame, row, col)`, no gain information
    Plain,
}

/// One physical file holding a contiguous run of frames for one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub stream: StreamId,
    pub sequence: usize,
    pub frame_count: usize,
    /// HDF5 group holding the per-frame index columns
    pub index_path: String,
    pub data_path: String,
    /// Full shape of the data dataset, frame axis first
    pub dataset_shape: Vec<usize>,
    pub layout: PixelLayout,
}

impl SourceFile {
    /// Shape of one frame's pixels, without the frame axis or the interleaved gain axis
    pub fn frame_shape(&self) -> &[usize] {
        match self.layout {
            PixelLayout::Interleaved => self.dataset_shape.get(2..).unwrap_or(&[]),
            _ => self.dataset_shape.get(1..).unwrap_or(&[]),
        }
    }

    /// Sequence number parsed from an EuXFEL file name, e.g. `RAW-R0001-AGIPD00-S00002.h5` is 2
    pub fn parse_sequence(file_name: &str) -> Option<usize> {
        let stem = file_name.strip_suffix(".h5")?;
        let (_, seq) = stem.rsplit_once("-S")?;
        seq.parse().ok()
    }
}
