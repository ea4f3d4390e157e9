use std::path::PathBuf;
use thiserror::Error;

use super::source_file::StreamId;
use super::worker_status::WorkerStatus;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Stream {stream} file {file:?} is missing the index field {field}")]
    MissingIndex {
        stream: StreamId,
        file: PathBuf,
        field: &'static str,
    },
    #[error("Stream {stream} file {file:?} index field {field} has {found} entries; expected {expected}")]
    IndexLength {
        stream: StreamId,
        file: PathBuf,
        field: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Stream {stream} contributed no frames")]
    EmptyStream { stream: StreamId },
    #[error("Stream {stream} file {file:?} has train {found} after train {previous}; train ids must not decrease")]
    TrainOrder {
        stream: StreamId,
        file: PathBuf,
        previous: u64,
        found: u64,
    },
    #[error("Stream {stream} file {file:?} has data dataset of shape {shape:?}, which is not a frame stack")]
    BadDataShape {
        stream: StreamId,
        file: PathBuf,
        shape: Vec<usize>,
    },
    #[error("Source file failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Source discovery failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("No common trains across {n_streams} streams (individual ranges span trains {first} to {last})")]
    NoCommonTrains {
        n_streams: usize,
        first: u64,
        last: u64,
    },
    #[error("No AGIPD module remained to align after excluding unreadable modules")]
    NoUsableModules,
}

#[derive(Debug, Error)]
pub enum PulseError {
    #[error("Pulse {pulse_id} of train {train_id} is missing from AGIPD module {module} but present in other modules")]
    PulseNotFound {
        train_id: u64,
        module: usize,
        pulse_id: u64,
    },
    #[error("Requested pulse {pulse_id} is not present in any train from {first_train} to {last_train}")]
    PulseNeverPresent {
        pulse_id: u64,
        first_train: u64,
        last_train: u64,
    },
}

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("AGIPD module {module} has frame shape {found:?}; expected {expected:?}")]
    ShapeMismatch {
        module: usize,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("AGIPD module {module} selects {found} frames; expected {expected}")]
    LengthMismatch {
        module: usize,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Calibration shape mismatch for {what}: expected {expected:?}, found {found:?}")]
    CalibrationShape {
        what: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("Calibration was requested but no dark constants file is configured")]
    MissingDarkPath,
    #[error("Calibration requires at least one gain mode")]
    NoGainModes,
    #[error("Calibration failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
}

#[derive(Debug, Error)]
pub enum HDF5WriterError {
    #[error("HDF5Writer failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("HDF5Writer failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("HDF5Writer failed to convert to yaml: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("HDF5Writer failed to encode a string: {0}")]
    StringError(#[from] hdf5::types::StringError),
    #[error("HDF5Writer was given a path with no file name: {0:?}")]
    BadOutputPath(PathBuf),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config selects module {0}, but AGIPD only has modules 0 to 15")]
    BadModule(usize),
    #[error("Config calibrates {modes} gain modes but gives {found} gain factors")]
    MissingGainFactors { modes: usize, found: usize },
    #[error("Config chunk_frames must be at least 1")]
    BadChunkSize,
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Source error: {0}")]
    SourceError(#[from] SourceError),
    #[error("Processor failed due to alignment error: {0}")]
    AlignError(#[from] AlignError),
    #[error("Processor failed due to pulse selection error: {0}")]
    PulseError(#[from] PulseError),
    #[error("Processor failed due to layout error: {0}")]
    LayoutError(#[from] LayoutError),
    #[error("Processor failed due to calibration error: {0}")]
    CalibrationError(#[from] CalibrationError),
    #[error("Processor failed due to HDF5Writer error: {0}")]
    HDFError(#[from] HDF5WriterError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed because run {0} has no AGIPD or ePix files")]
    NoFilesError(i32),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Processor failed to build runs {0:?}")]
    FailedRuns(Vec<i32>),
}
