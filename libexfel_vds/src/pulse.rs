use fxhash::FxHashSet;

use super::aligner::{AlignedStream, AlignedTrainSet};
use super::error::PulseError;
use super::index_reader::IndexTable;
use super::source_file::StreamId;

/// The table rows of one stream that make it into the virtual array, grouped by train.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSelection {
    pub stream: StreamId,
    pub trains: Vec<Vec<usize>>,
}

impl FrameSelection {
    /// Every frame of every aligned train
    pub fn all(aligned: &AlignedStream) -> Self {
        Self {
            stream: aligned.stream,
            trains: aligned.rows.iter().map(|r| r.clone().collect()).collect(),
        }
    }

    /// Only the first frame of each aligned train, for detectors with one image per train
    pub fn first_per_train(aligned: &AlignedStream) -> Self {
        Self {
            stream: aligned.stream,
            trains: aligned.rows.iter().map(|r| vec![r.start]).collect(),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.trains.iter().map(|t| t.len()).sum()
    }

    /// Selected rows in virtual-array order
    pub fn rows(&self) -> impl Iterator<Item = usize> + '_ {
        self.trains.iter().flatten().copied()
    }
}

/// Restricts AGIPD frames to a requested set of pulse ids.
#[derive(Debug, Clone, Default)]
pub struct PulseSelector {
    pulse_ids: Vec<u64>,
    wanted: FxHashSet<u64>,
}

impl PulseSelector {
    /// An empty list of pulse ids keeps every frame
    pub fn new(pulse_ids: &[u64]) -> Self {
        Self {
            pulse_ids: pulse_ids.to_vec(),
            wanted: pulse_ids.iter().copied().collect(),
        }
    }

    fn is_noop(&self) -> bool {
        self.pulse_ids.is_empty()
    }

    fn keeps(&self, pulse_id: u64) -> bool {
        self.is_noop() || self.wanted.contains(&pulse_id)
    }

    /// Select the frames of each AGIPD module table.
    ///
    /// Within a train the stored frame order is kept. All modules must agree on the pulses
    /// each train holds, filtered or not, since they share the frame axis of the virtual
    /// array.
    pub fn select(
        &self,
        aligned: &AlignedTrainSet,
        tables: &[IndexTable],
    ) -> Result<Vec<FrameSelection>, PulseError> {
        let streams: Vec<(&IndexTable, &AlignedStream)> = tables
            .iter()
            .filter_map(|table| aligned.stream(table.stream).map(|s| (table, s)))
            .collect();

        let mut selections: Vec<FrameSelection> = streams
            .iter()
            .map(|(_, s)| FrameSelection {
                stream: s.stream,
                trains: Vec::with_capacity(aligned.len()),
            })
            .collect();
        let mut seen: FxHashSet<u64> = FxHashSet::default();

        for (train_idx, train_id) in aligned.train_ids.iter().enumerate() {
            let mut reference: Option<(StreamId, Vec<u64>)> = None;
            for ((table, stream), selection) in streams.iter().zip(selections.iter_mut()) {
                let rows: Vec<usize> = stream.rows[train_idx]
                    .clone()
                    .filter(|row| self.keeps(table.frames[*row].pulse_id))
                    .collect();
                let pulses: Vec<u64> = rows.iter().map(|r| table.frames[*r].pulse_id).collect();

                match &reference {
                    None => {
                        seen.extend(pulses.iter().copied());
                        reference = Some((stream.stream, pulses));
                    }
                    Some((ref_stream, ref_pulses)) => {
                        if *ref_pulses != pulses {
                            return Err(disagreement(
                                *train_id,
                                (*ref_stream, ref_pulses.as_slice()),
                                (stream.stream, pulses.as_slice()),
                            ));
                        }
                    }
                }
                selection.trains.push(rows);
            }
        }

        if let Some(pulse_id) = self.pulse_ids.iter().find(|p| !seen.contains(*p)) {
            return Err(PulseError::PulseNeverPresent {
                pulse_id: *pulse_id,
                first_train: aligned.train_ids.first().copied().unwrap_or_default(),
                last_train: aligned.train_ids.last().copied().unwrap_or_default(),
            });
        }

        Ok(selections)
    }
}

/// Name the module and pulse responsible for two modules disagreeing on a train
fn disagreement(
    train_id: u64,
    (ref_stream, ref_pulses): (StreamId, &[u64]),
    (stream, pulses): (StreamId, &[u64]),
) -> PulseError {
    let module_of = |s: StreamId| s.module_id().unwrap_or_default();
    if let Some(pulse_id) = ref_pulses.iter().find(|p| !pulses.contains(p)) {
        PulseError::PulseNotFound {
            train_id,
            module: module_of(stream),
            pulse_id: *pulse_id,
        }
    } else if let Some(pulse_id) = pulses.iter().find(|p| !ref_pulses.contains(p)) {
        PulseError::PulseNotFound {
            train_id,
            module: module_of(ref_stream),
            pulse_id: *pulse_id,
        }
    } else {
        // Same pulses, repeated a different number of times
        let pulse_id = pulses
            .iter()
            .zip(ref_pulses)
            .find(|(a, b)| a != b)
            .map(|(a, _)| *a)
            .or_else(|| ref_pulses.get(pulses.len()).copied())
            .or_else(|| pulses.get(ref_pulses.len()).copied())
            .unwrap_or_default();
        PulseError::PulseNotFound {
            train_id,
            module: module_of(stream),
            pulse_id,
        }
    }
}
