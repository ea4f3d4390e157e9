use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use super::aligner::{AlignmentReport, TrainAligner};
use super::calib::{CalibrationTables, DarkCalibrator};
use super::config::Config;
use super::constants::EPIX_IDS;
use super::error::{AlignError, CalibrationError, ProcessorError, SourceError};
use super::file_stack::FileStack;
use super::hdf_source::HDFIndexSource;
use super::hdf_writer::{write_fileinfo, VdsWriter};
use super::index_reader::{IndexTable, SourceIndexReader};
use super::layout::{FrameIndex, StreamLayout, VirtualLayoutBuilder};
use super::pulse::{FrameSelection, PulseSelector};
use super::source_file::StreamId;
use super::worker_status::{Stage, WorkerStatus};

/// What happened to the calibration stage of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalibrationStatus {
    NotRequested,
    Written,
    /// The raw view was still written; the message says why the calibration was not
    Failed(String),
}

/// Everything an operator needs to know about one processed run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_number: i32,
    pub path: PathBuf,
    pub report: AlignmentReport,
    pub agipd_frames: usize,
    pub modules: Vec<usize>,
    /// Streams left out of the output and the reason
    pub excluded: Vec<(StreamId, String)>,
    pub calibration: CalibrationStatus,
}

/// The mapped streams of a run, ready to be written
struct RunLayout {
    train_ids: Vec<u64>,
    agipd: Vec<StreamLayout>,
    frame_index: FrameIndex,
    epix: Vec<(IndexTable, StreamLayout)>,
}

/// Read one stream; any failure here only costs that stream
fn read_stream(source: &HDFIndexSource, stack: &FileStack) -> Result<IndexTable, SourceError> {
    let files = source.describe_stack(stack)?;
    SourceIndexReader::new(source).read_stream(stack.stream, files)
}

/// Read every stack, setting aside the streams which fail
fn read_stacks(
    stacks: &[FileStack],
    excluded: &mut Vec<(StreamId, String)>,
    run_number: i32,
    tx: &Sender<WorkerStatus>,
    worker_id: usize,
    done: &mut usize,
    total: usize,
) -> Result<Vec<IndexTable>, ProcessorError> {
    let source = HDFIndexSource;
    let mut tables = Vec::with_capacity(stacks.len());
    for stack in stacks {
        match read_stream(&source, stack) {
            Ok(table) => {
                log::info!(
                    "{}: {} frames in {} files ({}), {} unfilled frames skipped",
                    table.stream,
                    table.frame_count(),
                    table.files.len(),
                    human_bytes::human_bytes(stack.total_stack_size_bytes as f64),
                    table.skipped_frames
                );
                for (idx, file) in table.files.iter().enumerate() {
                    if let Some((first, last)) = table.file_train_range(idx) {
                        log::debug!("{} holds trains {first} to {last}", file.path.display());
                    }
                }
                tables.push(table);
            }
            Err(e) => {
                log::warn!("Excluding {} from run {run_number}: {e}", stack.stream);
                excluded.push((stack.stream, e.to_string()));
            }
        }
        *done += 1;
        tx.send(WorkerStatus::new(
            *done as f32 / total as f32,
            run_number,
            worker_id,
            Stage::Indexing,
        ))?;
    }
    Ok(tables)
}

/// Align the streams and map the selected frames; nothing is written yet
fn build_layout(
    config: &Config,
    agipd_tables: &[IndexTable],
    epix_tables: Vec<IndexTable>,
) -> Result<(RunLayout, AlignmentReport), ProcessorError> {
    if agipd_tables.is_empty() {
        return Err(AlignError::NoUsableModules.into());
    }
    let (aligned, report) = TrainAligner::align(agipd_tables, &epix_tables)?;
    log::info!("{report}");
    if report.dropped_trains() > 0 {
        log::warn!(
            "{} trains of the widest stream {} are not present in every stream and were dropped",
            report.dropped_trains(),
            report.widest_stream
        );
    }

    if config.has_pulse_filter() {
        log::info!("Keeping pulses {:?} of every train", config.pulse_ids);
    }
    let selector = PulseSelector::new(&config.pulse_ids);
    let selections = selector.select(&aligned, agipd_tables)?;
    let agipd = VirtualLayoutBuilder::build_modules(agipd_tables, &selections)?;
    let frame_index = VirtualLayoutBuilder::frame_index(&agipd_tables[0], &selections[0]);

    let mut epix = Vec::with_capacity(epix_tables.len());
    for table in epix_tables {
        let Some(stream) = aligned.stream(table.stream) else {
            continue;
        };
        let layout = VirtualLayoutBuilder::build_stream(&table, &FrameSelection::first_per_train(stream));
        epix.push((table, layout));
    }

    Ok((
        RunLayout {
            train_ids: aligned.train_ids,
            agipd,
            frame_index,
            epix,
        },
        report,
    ))
}

/// Write the raw virtual view of a run
fn write_views(
    config: &Config,
    run_number: i32,
    writer: &VdsWriter,
    agipd_tables: &[IndexTable],
    layout: &RunLayout,
) -> Result<(), ProcessorError> {
    writer.write_index(run_number, config.stream_tag(), &layout.train_ids)?;
    writer.write_agipd(agipd_tables, &layout.agipd, &layout.frame_index)?;
    for (table, epix_layout) in &layout.epix {
        if let StreamId::Epix(epix_id) = table.stream {
            writer.write_epix(epix_id, table, epix_layout)?;
        }
    }
    Ok(())
}

/// Calibrate the AGIPD view of the container with the dark constants of the first frame's
/// memory cell, `config.chunk_frames` frames at a time
fn calibrate_run(
    config: &Config,
    writer: &VdsWriter,
    modules: &[usize],
    frame_index: &FrameIndex,
    tx: &Sender<WorkerStatus>,
    run_number: i32,
    worker_id: usize,
) -> Result<(), ProcessorError> {
    let dark_path: &Path = config
        .dark_path
        .as_deref()
        .ok_or(CalibrationError::MissingDarkPath)?;
    let cell_id = frame_index.cell_ids.first().copied().unwrap_or_default() as usize;
    let tables = CalibrationTables::from_dark_file(
        dark_path,
        cell_id,
        modules,
        config.gain_modes,
        &config.gain_factors,
    )?;
    let shape = writer.agipd_shape()?;
    let &[frames, n_modules, rows, cols] = shape.as_slice() else {
        return Err(CalibrationError::CalibrationShape {
            what: "virtual AGIPD data",
            expected: vec![frame_index.train_ids.len(), modules.len()],
            found: shape.clone(),
        }
        .into());
    };
    let datasets = writer.create_corrected(
        [tables.n_modes(), frames, n_modules, rows, cols],
        &tables.good_pixels,
    )?;
    let calibrator = DarkCalibrator::new(tables);
    let chunk = config.chunk_frames.max(1);
    for first in (0..frames).step_by(chunk) {
        let last = (first + chunk).min(frames);
        let (data, gain) = writer.read_agipd_frames(first..last)?;
        let corrected = calibrator.calibrate(data.view(), gain.view())?;
        datasets.write_frames(first, &corrected)?;
        tx.send(WorkerStatus::new(
            last as f32 / frames as f32,
            run_number,
            worker_id,
            Stage::Calibrating,
        ))?;
    }
    Ok(())
}

/// The main loop of exfel_vds.
///
/// Builds the aligned virtual view of one run (and its calibration, if asked for) in a single
/// output container. Unreadable streams are left out; alignment and layout failures abort the
/// run without leaving an output behind.
pub fn process_run(
    config: &Config,
    run_number: i32,
    tx: &Sender<WorkerStatus>,
    worker_id: &usize,
) -> Result<RunSummary, ProcessorError> {
    let run_dir = config.get_run_directory(run_number)?;
    let mut agipd_stacks = Vec::new();
    for module in config.module_ids() {
        agipd_stacks.push(FileStack::agipd(&run_dir, module)?);
    }
    let mut epix_stacks = Vec::new();
    for epix_id in EPIX_IDS {
        epix_stacks.push(FileStack::epix(&run_dir, run_number, epix_id)?);
    }
    if agipd_stacks.iter().chain(&epix_stacks).all(|s| s.is_empty()) {
        return Err(ProcessorError::NoFilesError(run_number));
    }
    let total_bytes: u64 = agipd_stacks
        .iter()
        .chain(&epix_stacks)
        .map(|s| s.total_stack_size_bytes)
        .sum();
    log::info!(
        "Total run size: {}",
        human_bytes::human_bytes(total_bytes as f64)
    );

    // Index
    let mut excluded = Vec::new();
    let total_streams = agipd_stacks.len() + epix_stacks.len();
    let mut done = 0;
    tx.send(WorkerStatus::new(0.0, run_number, *worker_id, Stage::Indexing))?;
    let agipd_tables = read_stacks(
        &agipd_stacks,
        &mut excluded,
        run_number,
        tx,
        *worker_id,
        &mut done,
        total_streams,
    )?;
    let epix_tables = read_stacks(
        &epix_stacks,
        &mut excluded,
        run_number,
        tx,
        *worker_id,
        &mut done,
        total_streams,
    )?;

    // Align and map
    let (layout, report) = build_layout(config, &agipd_tables, epix_tables)?;
    let modules: Vec<usize> = agipd_tables
        .iter()
        .filter_map(|t| t.stream.module_id())
        .collect();
    let agipd_frames = layout.frame_index.train_ids.len();
    log::info!(
        "Mapping {agipd_frames} frames of {} modules over {} trains",
        modules.len(),
        layout.train_ids.len()
    );

    // Write
    tx.send(WorkerStatus::new(0.0, run_number, *worker_id, Stage::Writing))?;
    let hdf_path = config.get_hdf_file_name(run_number)?;
    let writer = VdsWriter::new(&hdf_path)?;
    if let Err(e) = write_views(config, run_number, &writer, &agipd_tables, &layout) {
        writer.abort();
        return Err(e);
    }
    tx.send(WorkerStatus::new(1.0, run_number, *worker_id, Stage::Writing))?;

    // Calibrate
    let calibration = if config.calibrate {
        tx.send(WorkerStatus::new(0.0, run_number, *worker_id, Stage::Calibrating))?;
        let status = match calibrate_run(
            config,
            &writer,
            &modules,
            &layout.frame_index,
            tx,
            run_number,
            *worker_id,
        ) {
            Ok(()) => {
                log::info!("Calibrated data written for run {run_number}");
                CalibrationStatus::Written
            }
            Err(e) => {
                log::error!("Calibration of run {run_number} failed, keeping only the raw view: {e}");
                if let Err(e) = writer.remove_corrected() {
                    log::warn!("Could not remove the partial calibration output: {e}");
                }
                CalibrationStatus::Failed(e.to_string())
            }
        };
        tx.send(WorkerStatus::new(1.0, run_number, *worker_id, Stage::Calibrating))?;
        status
    } else {
        CalibrationStatus::NotRequested
    };

    let path = writer.close()?;
    log::info!("Run {run_number} written to {}", path.display());
    let tables = agipd_tables.iter().chain(layout.epix.iter().map(|(t, _)| t));
    match write_fileinfo(&path, tables) {
        Ok(info_path) => log::info!("Source file information written to {}", info_path.display()),
        Err(e) => log::warn!("Could not write source file information for run {run_number}: {e}"),
    }

    Ok(RunSummary {
        run_number,
        path,
        report,
        agipd_frames,
        modules,
        excluded,
        calibration,
    })
}

/// Report a finished run through the log
fn log_summary(summary: &RunSummary) {
    for (stream, reason) in &summary.excluded {
        log::warn!(
            "Run {}: {stream} was excluded ({reason})",
            summary.run_number
        );
    }
    if let CalibrationStatus::Failed(reason) = &summary.calibration {
        log::warn!(
            "Run {}: raw view is valid, calibration failed ({reason})",
            summary.run_number
        );
    }
}

/// The function to be called by a separate thread.
/// Allows multiple runs to be processed
pub fn process(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<(), ProcessorError> {
    let runs: Vec<i32> = (config.first_run_number..(config.last_run_number + 1)).collect();
    process_subset(config, tx, worker_id, runs)
}

/// Process a subset of runs.
///
/// A failed run is logged and the next one started; the failed run numbers are returned
/// once the subset is done.
pub fn process_subset(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
    subset: Vec<i32>,
) -> Result<(), ProcessorError> {
    let mut failed = Vec::new();
    for run in subset {
        if config.does_run_exist(run) {
            log::info!("Processing run {}...", run);
            match process_run(&config, run, &tx, &worker_id) {
                Ok(summary) => {
                    log_summary(&summary);
                    log::info!("Finished processing run {}.", run);
                }
                // Nobody is listening for progress anymore
                Err(ProcessorError::SendError(e)) => return Err(e.into()),
                Err(e) => {
                    log::error!("Run {run} failed: {e}");
                    failed.push(run);
                }
            }
        } else {
            log::info!("Run {} does not exist, skipping...", run);
        }
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(ProcessorError::FailedRuns(failed))
    }
}

/// Divide a run range in to a set of subranges (per thread/worker)
pub fn create_subsets(config: &Config) -> Vec<Vec<i32>> {
    let mut subsets: Vec<Vec<i32>> = vec![Vec::new(); config.n_threads.max(1) as usize];
    let n_subsets = subsets.len();

    for (idx, run) in (config.first_run_number..(config.last_run_number + 1)).enumerate() {
        subsets[idx % n_subsets].push(run)
    }

    subsets.retain(|s| !s.is_empty());
    subsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{AGIPD_CORRECTED_GROUP, BADPIXEL_KEY, GAIN_FACTORS, GAIN_LEVEL_KEY, OFFSET_KEY};
    use crate::test_utils::{write_agipd_source, write_epix_source};
    use ndarray::{Array2, Array5, Axis, Ix3, Ix5};
    use std::sync::mpsc;

    /// A run directory with modules 0 and 1, both ePix detectors, and an output directory
    fn make_run(root: &Path, run: i32) -> Config {
        let run_dir = root.join("raw").join(format!("r{run:04}"));
        std::fs::create_dir_all(&run_dir).unwrap();
        std::fs::create_dir_all(root.join("out")).unwrap();
        write_agipd_source(&run_dir, run, 0, 0, 20, 4, 3);
        write_agipd_source(&run_dir, run, 0, 1, 24, 4, 3);
        write_agipd_source(&run_dir, run, 1, 0, 21, 6, 3);
        write_epix_source(&run_dir, run, 1, 0, &[20, 21, 22, 23, 24, 25, 26]);
        write_epix_source(&run_dir, run, 2, 0, &[21, 22, 23, 24, 25, 26, 27]);
        Config {
            raw_path: root.join("raw"),
            out_path: root.join("out"),
            modules: vec![0, 1, 5],
            first_run_number: run,
            last_run_number: run,
            ..Default::default()
        }
    }

    fn write_dark(path: &Path) {
        let file = hdf5::File::create(path).unwrap();
        let offset = Array5::<f32>::from_shape_fn((3, 4, 2, 6, 4), |(g, cell, m, _, _)| {
            (g * 100 + cell * 10 + m) as f32
        });
        let mut level = Array5::<f32>::zeros((3, 4, 2, 6, 4));
        level.index_axis_mut(Axis(0), 1).fill(1500.0);
        level.index_axis_mut(Axis(0), 2).fill(60000.0);
        file.new_dataset_builder()
            .with_data(&offset)
            .create(OFFSET_KEY)
            .unwrap();
        file.new_dataset_builder()
            .with_data(&level)
            .create(GAIN_LEVEL_KEY)
            .unwrap();
        // modules stacked along the rows; module 1 row 4 col 2 is bad
        let mut bad = Array2::<u32>::zeros((2 * 6, 4));
        bad[[6 + 4, 2]] = 1;
        file.new_dataset_builder()
            .with_data(&bad)
            .create(BADPIXEL_KEY)
            .unwrap();
    }

    #[test]
    fn test_run_with_missing_module() {
        let dir = tempfile::tempdir().unwrap();
        let config = make_run(dir.path(), 3);
        let (tx, _rx) = mpsc::channel();
        let summary = process_run(&config, 3, &tx, &0).unwrap();

        assert_eq!(summary.modules, vec![0, 1]);
        assert_eq!(summary.excluded.len(), 1);
        assert_eq!(summary.excluded[0].0, StreamId::Agipd(5));
        assert_eq!(summary.report.retained_trains, 6);
        assert_eq!(summary.agipd_frames, 18);
        assert_eq!(summary.calibration, CalibrationStatus::NotRequested);
        assert!(summary.path.exists());
        assert!(summary.path.with_extension("yml").exists());
        assert!(!dir.path().join("out/hdf5/r0003.h5.part").exists());

        let file = hdf5::File::open(&summary.path).unwrap();
        let trains = file.dataset("index/trainId").unwrap().read_raw::<u64>().unwrap();
        assert_eq!(trains, vec![21, 22, 23, 24, 25, 26]);
        let epix = file.dataset("data/EPIX-2/data").unwrap().shape();
        assert_eq!(epix, vec![6, 3, 5]);
        assert!(!file.link_exists(AGIPD_CORRECTED_GROUP));
    }

    #[test]
    fn test_calibrated_run() {
        let dir = tempfile::tempdir().unwrap();
        let dark_path = dir.path().join("dark.h5");
        write_dark(&dark_path);
        let config = Config {
            modules: vec![0, 1],
            pulse_ids: vec![1, 2],
            calibrate: true,
            dark_path: Some(dark_path),
            chunk_frames: 5,
            ..make_run(dir.path(), 4)
        };
        let (tx, _rx) = mpsc::channel();
        let summary = process_run(&config, 4, &tx, &0).unwrap();
        assert_eq!(summary.calibration, CalibrationStatus::Written);
        assert_eq!(summary.agipd_frames, 12);

        let file = hdf5::File::open(&summary.path).unwrap();
        let group = file.group(AGIPD_CORRECTED_GROUP).unwrap();
        let mask = group.dataset("mask").unwrap().read::<bool, Ix5>().unwrap();
        assert_eq!(mask.dim(), (2, 12, 2, 6, 4));
        // every gain value is above the first boundary
        assert!(mask.index_axis(Axis(0), 1).iter().all(|m| *m));
        assert!(mask.index_axis(Axis(0), 0).iter().all(|m| !*m));

        let adu = group.dataset("adu").unwrap().read::<f64, Ix5>().unwrap();
        let raw = file
            .dataset("data/AGIPD/index/data")
            .unwrap()
            .read::<u16, ndarray::Ix4>()
            .unwrap();
        // first frame is pulse 1, cell 1
        for m in 0..2 {
            let expected = raw[[0, m, 2, 3]] as f64 - (100 + 10 + m) as f64;
            approx::assert_abs_diff_eq!(adu[[1, 0, m, 2, 3]], expected, epsilon = 1e-9);
        }
        // the last chunk holds frames 10 and 11, still calibrated with cell 1
        let expected = raw[[11, 1, 5, 0]] as f64 - (100 + 10 + 1) as f64;
        approx::assert_abs_diff_eq!(adu[[1, 11, 1, 5, 0]], expected, epsilon = 1e-9);

        let good = group.dataset("good").unwrap().read::<bool, Ix3>().unwrap();
        assert_eq!(good.iter().filter(|g| !**g).count(), 1);
        assert!(!good[[1, 4, 2]]);
        let data = group.dataset("data").unwrap().read::<f64, Ix5>().unwrap();
        assert!(data.index_axis(Axis(0), 0).iter().all(|d| *d == 0.0));
        for f in 0..12 {
            assert_eq!(data[[1, f, 1, 4, 2]], 0.0);
        }
        // medium gain signal is scaled to photons around one zero level per module frame
        let baseline = data[[1, 3, 0, 5, 3]] / GAIN_FACTORS[1] - adu[[1, 3, 0, 5, 3]];
        let other = data[[1, 3, 0, 0, 0]] / GAIN_FACTORS[1] - adu[[1, 3, 0, 0, 0]];
        approx::assert_abs_diff_eq!(baseline, other, epsilon = 1e-9);
    }

    #[test]
    fn test_calibration_failure_keeps_raw_view() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            calibrate: true,
            ..make_run(dir.path(), 5)
        };
        let (tx, _rx) = mpsc::channel();
        let summary = process_run(&config, 5, &tx, &0).unwrap();
        assert!(matches!(summary.calibration, CalibrationStatus::Failed(_)));
        let file = hdf5::File::open(&summary.path).unwrap();
        assert!(file.link_exists("data/AGIPD/index/data"));
        assert!(!file.link_exists(AGIPD_CORRECTED_GROUP));
    }

    #[test]
    fn test_no_common_trains_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = make_run(dir.path(), 6);
        let run_dir = config.get_run_directory(6).unwrap();
        std::fs::remove_file(run_dir.join("RAW-R0006-EPIX02-S00000.h5")).unwrap();
        write_epix_source(&run_dir, 6, 2, 0, &[90, 91]);

        let (tx, _rx) = mpsc::channel();
        match process_run(&config, 6, &tx, &0) {
            Err(ProcessorError::AlignError(AlignError::NoCommonTrains { .. })) => (),
            other => panic!("unexpected result {other:?}"),
        }
        assert!(!dir.path().join("out/hdf5/r0006.h5").exists());
        assert!(!dir.path().join("out/hdf5/r0006.h5.part").exists());
        assert!(!dir.path().join("out/hdf5/r0006.yml").exists());
    }

    #[test]
    fn test_failed_run_does_not_stop_subset() {
        let dir = tempfile::tempdir().unwrap();
        let config = make_run(dir.path(), 6);
        let run_dir = config.get_run_directory(6).unwrap();
        std::fs::remove_file(run_dir.join("RAW-R0006-EPIX02-S00000.h5")).unwrap();
        write_epix_source(&run_dir, 6, 2, 0, &[90, 91]);
        make_run(dir.path(), 7);

        let (tx, _rx) = mpsc::channel();
        match process_subset(config, tx, 0, vec![6, 7]) {
            Err(ProcessorError::FailedRuns(runs)) => assert_eq!(runs, vec![6]),
            other => panic!("unexpected result {other:?}"),
        }
        assert!(!dir.path().join("out/hdf5/r0006.h5").exists());
        assert!(dir.path().join("out/hdf5/r0007.h5").exists());
        assert!(dir.path().join("out/hdf5/r0007.yml").exists());
    }

    #[test]
    fn test_no_usable_modules() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            modules: vec![7],
            ..make_run(dir.path(), 8)
        };
        let (tx, _rx) = mpsc::channel();
        match process_run(&config, 8, &tx, &0) {
            Err(ProcessorError::AlignError(AlignError::NoUsableModules)) => (),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_create_subsets() {
        let config = Config {
            first_run_number: 1,
            last_run_number: 5,
            n_threads: 2,
            ..Default::default()
        };
        assert_eq!(create_subsets(&config), vec![vec![1, 3, 5], vec![2, 4]]);
        let config = Config {
            n_threads: 8,
            ..config
        };
        assert_eq!(create_subsets(&config).len(), 5);
    }
}
