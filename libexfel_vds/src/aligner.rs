use std::fmt::Display;
use std::ops::Range;

use super::error::AlignError;
use super::index_reader::IndexTable;
use super::source_file::StreamId;

/// The rows of one stream's IndexTable belonging to each aligned train.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedStream {
    pub stream: StreamId,
    /// One non-empty row range per aligned train, in train order
    pub rows: Vec<Range<usize>>,
}

/// Trains present in every contributing stream, ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedTrainSet {
    pub train_ids: Vec<u64>,
    pub streams: Vec<AlignedStream>,
}

impl AlignedTrainSet {
    pub fn len(&self) -> usize {
        self.train_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train_ids.is_empty()
    }

    pub fn stream(&self, stream: StreamId) -> Option<&AlignedStream> {
        self.streams.iter().find(|s| s.stream == stream)
    }
}

/// Operator feedback on how much alignment cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentReport {
    pub widest_stream: StreamId,
    pub widest_trains: usize,
    pub retained_trains: usize,
    pub first_train: u64,
    pub last_train: u64,
    /// Distinct trains seen in each stream before intersecting
    pub stream_trains: Vec<(StreamId, usize)>,
}

impl AlignmentReport {
    pub fn dropped_trains(&self) -> usize {
        self.widest_trains - self.retained_trains
    }
}

impl Display for AlignmentReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} trains (originally {} in {}, {} dropped) in [{}, {}]",
            self.retained_trains,
            self.widest_trains,
            self.widest_stream,
            self.dropped_trains(),
            self.first_train,
            self.last_train
        )
    }
}

/// Intersects the train ids of every AGIPD module and auxiliary detector.
pub struct TrainAligner;

impl TrainAligner {
    /// Compute the trains common to all streams and where each of them sits in every stream.
    ///
    /// AGIPD streams come first in the output, followed by the auxiliary streams, each in
    /// the order given.
    pub fn align(
        agipd: &[IndexTable],
        auxiliary: &[IndexTable],
    ) -> Result<(AlignedTrainSet, AlignmentReport), AlignError> {
        if agipd.is_empty() {
            return Err(AlignError::NoUsableModules);
        }

        let mut stream_trains = Vec::new();
        let mut widest: Option<(StreamId, usize)> = None;
        let mut common: Option<Vec<u64>> = None;
        let mut span: Option<(u64, u64)> = None;
        for table in agipd.iter().chain(auxiliary) {
            let trains = table.train_ids();
            stream_trains.push((table.stream, trains.len()));
            if widest.map_or(true, |(_, n)| trains.len() > n) {
                widest = Some((table.stream, trains.len()));
            }
            if let (Some(first), Some(last)) = (trains.first(), trains.last()) {
                span = Some(match span {
                    Some((lo, hi)) => (lo.min(*first), hi.max(*last)),
                    None => (*first, *last),
                });
            }
            common = Some(match common {
                Some(current) => intersect(&current, &trains),
                None => trains,
            });
        }

        let train_ids = common.unwrap_or_default();
        if train_ids.is_empty() {
            let (first, last) = span.unwrap_or((0, 0));
            return Err(AlignError::NoCommonTrains {
                n_streams: stream_trains.len(),
                first,
                last,
            });
        }

        let streams = agipd
            .iter()
            .chain(auxiliary)
            .map(|table| AlignedStream {
                stream: table.stream,
                rows: train_rows(table, &train_ids),
            })
            .collect();

        let (widest_stream, widest_trains) = widest.unwrap_or((agipd[0].stream, 0));
        let report = AlignmentReport {
            widest_stream,
            widest_trains,
            retained_trains: train_ids.len(),
            first_train: train_ids[0],
            last_train: train_ids[train_ids.len() - 1],
            stream_trains,
        };
        Ok((AlignedTrainSet { train_ids, streams }, report))
    }
}

/// Intersection of two ascending, repeat-free sequences
fn intersect(a: &[u64], b: &[u64]) -> Vec<u64> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

/// Locate each train's rows with a single forward walk over the (ordered) table.
/// Every train in `trains` must be present in the table.
fn train_rows(table: &IndexTable, trains: &[u64]) -> Vec<Range<usize>> {
    let frames = &table.frames;
    let mut rows = Vec::with_capacity(trains.len());
    let mut row = 0;
    for train in trains {
        while row < frames.len() && frames[row].train_id < *train {
            row += 1;
        }
        let start = row;
        while row < frames.len() && frames[row].train_id == *train {
            row += 1;
        }
        rows.push(start..row);
    }
    rows
}
