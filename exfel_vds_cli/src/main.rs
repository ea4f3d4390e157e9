use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use libexfel_vds::config::Config;
use libexfel_vds::process::{create_subsets, process_subset};
use libexfel_vds::worker_status::WorkerStatus;

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

fn main() {
    // Create a cli
    let matches = Command::new("exfel_vds_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );

        make_template_config(&config_path);
        log::info!("Done.");
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    if !config.is_n_threads_valid() {
        log::error!("n_threads must be at least 1, found {}", config.n_threads);
        return;
    }
    log::info!("Config successfully loaded.");
    log::info!("Raw Path: {}", config.raw_path.to_string_lossy());
    log::info!("Output Path: {}", config.out_path.to_string_lossy());
    match &config.dark_path {
        Some(p) => log::info!("Dark Path: {}", p.to_string_lossy()),
        None => log::info!("Dark Path: None"),
    }
    log::info!("Modules: {:?}", config.module_ids());
    log::info!("Pulses: {:?}", config.pulse_ids);
    log::info!("Stream: {}", config.stream_tag());
    log::info!("Calibrate: {}", config.calibrate);
    log::info!(
        "First Run: {} Last Run: {}",
        config.first_run_number,
        config.last_run_number
    );

    // Setup one progress bar and one task per worker
    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    let mut handles = Vec::new();
    let mut bars = Vec::new();
    let style = ProgressStyle::with_template("{msg:<32} [{bar:40.cyan/blue}] {pos:>3}%")
        .expect("Progress bar template is invalid!");
    for (idx, subset) in create_subsets(&config).into_iter().enumerate() {
        let pb = pb_manager.add(ProgressBar::new(100).with_style(style.clone()));
        pb.set_message(format!("Worker {idx} waiting"));
        bars.push(pb);
        let conf = config.clone();
        let worker_tx = tx.clone();
        handles.push(std::thread::spawn(move || {
            process_subset(conf, worker_tx, idx, subset)
        }));
    }
    drop(tx);

    loop {
        // No UI here, so sleep for ~ 1 sec between updates
        std::thread::sleep(std::time::Duration::from_secs(1));
        while let Ok(status) = rx.try_recv() {
            if let Some(pb) = bars.get(status.worker_id) {
                pb.set_message(format!(
                    "Worker {} run {} {}",
                    status.worker_id,
                    status.run_number,
                    status.stage
                ));
                pb.set_position(status.percent());
            }
        }

        if handles.iter().all(|h| h.is_finished()) {
            for (idx, handle) in handles.drain(..).enumerate() {
                match handle.join() {
                    Ok(Ok(_)) => log::info!("Worker {idx} successfully built its runs!"),
                    Ok(Err(e)) => {
                        log::error!("Worker {idx} failed with error: {e}");
                        if let Some(pb) = bars.get(idx) {
                            pb.abandon_with_message(format!("Worker {idx} failed"));
                        }
                    }
                    Err(_) => log::error!("Failed to join worker {idx}!"),
                }
            }
            break;
        }
    }

    for pb in bars {
        pb.finish();
    }

    log::info!("Done.");
}
