use std::fmt::Display;

/// The part of a run a worker is busy with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stage {
    #[default]
    Indexing,
    Writing,
    Calibrating,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Indexing => write!(f, "Indexing"),
            Self::Writing => write!(f, "Writing"),
            Self::Calibrating => write!(f, "Calibrating"),
        }
    }
}

/// Progress message sent from a worker to whoever draws the progress bars.
///
/// `progress` is the completed fraction (0 to 1) of `stage` for run `run_number`.
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub run_number: i32,
    pub worker_id: usize,
    pub stage: Stage,
}

impl WorkerStatus {
    pub fn new(progress: f32, run_number: i32, worker_id: usize, stage: Stage) -> Self {
        Self {
            progress: progress.clamp(0.0, 1.0),
            run_number,
            worker_id,
            stage,
        }
    }

    /// Progress as a whole percentage, for progress bars
    pub fn percent(&self) -> u64 {
        (self.progress * 100.0).round() as u64
    }
}
