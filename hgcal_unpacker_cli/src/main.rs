//! # hgcal_unpacker_cli
//!
//! Part of the hgcal_unpacker crate family.
//!
//! Command line application to unpack HGCAL raw data and export the level-0 calibration.
//!
//! ## Use
//!
//! ```bash
//! hgcal_unpacker_cli -p config.yaml new
//! hgcal_unpacker_cli -p config.yaml emulate -o run_0001.raw
//! hgcal_unpacker_cli -p config.yaml
//! ```
//!
//! `new` writes a template configuration, `emulate` writes random pedestal events for the
//! configured module table, and without a subcommand the configured raw files are processed.
//! Detailed logs are written to `hgcal_unpacker.log`.
use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use libhgcal_unpacker::config::Config;
use libhgcal_unpacker::process::{create_subsets, emulate, process};
use libhgcal_unpacker::worker_status::{BarColor, WorkerStatus};

fn make_template_config(path: &Path) {
    Config::default()
        .write_config_file(path)
        .expect("Failed to write template config file!");
}

fn setup_file_logger() {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from("./hgcal_unpacker.log"))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()
            .expect("Could not create log file!"),
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .build()
            .expect("Could not create file logger!"),
    );
    spdlog::set_default_logger(logger);
}

fn bar_style(color: &BarColor) -> ProgressStyle {
    let color = match color {
        BarColor::CYAN => "cyan",
        BarColor::MAGENTA => "magenta",
        BarColor::RED => "red",
        BarColor::GREEN => "green",
    };
    ProgressStyle::with_template(&format!(
        "{{prefix}} [{{bar:40.{color}/blue}}] {{percent}}% {{msg}}"
    ))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn main() {
    // Create a cli
    let matches = Command::new("hgcal_unpacker_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(
            Command::new("emulate")
                .about("Write random events for the configured module table")
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .required(true)
                        .help("Path to the raw file to write"),
                ),
        )
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the configuration file"),
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
    setup_file_logger();

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
    log::info!("Config successfully loaded.");
    log::info!(
        "Module locator: {}",
        config.module_locator_path.to_string_lossy()
    );
    for path in &config.cell_map_paths {
        log::info!("Cell map: {}", path.to_string_lossy());
    }

    if let Some(("emulate", sub_matches)) = matches.subcommand() {
        let output = PathBuf::from(
            sub_matches
                .get_one::<String>("output")
                .expect("Output is required"),
        );
        log::info!(
            "Emulating {} events to {}...",
            config.emulator.n_events,
            output.to_string_lossy()
        );
        match emulate(&config, &output, &mut rand::thread_rng()) {
            Ok(n_events) => log::info!("Wrote {n_events} events."),
            Err(e) => log::error!("Emulation failed with error: {e}"),
        }
        return;
    }

    log::info!("Raw files: {}", config.raw_paths.len());
    log::info!(
        "Calibration output: {}",
        config.calibration_out_path.to_string_lossy()
    );
    log::info!("Number of workers: {}", config.n_threads);

    // One bar per worker that gets files
    let bars: Vec<Option<ProgressBar>> = create_subsets(&config)
        .iter()
        .enumerate()
        .map(|(idx, subset)| {
            if subset.is_empty() {
                return None;
            }
            let pb = pb_manager.add(ProgressBar::new(100));
            pb.set_style(bar_style(&BarColor::CYAN));
            pb.set_prefix(format!("Worker {idx}"));
            Some(pb)
        })
        .collect();

    // Spawn the task!
    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    let handle = std::thread::spawn(move || process(config, tx));

    loop {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(status) => {
                if let Some(Some(pb)) = bars.get(status.worker_id) {
                    pb.set_style(bar_style(&status.color));
                    pb.set_message(format!("file {}", status.file_number));
                    pb.set_position((status.progress * 100.0) as u64);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => (),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                std::thread::sleep(Duration::from_millis(50))
            }
        }

        if handle.is_finished() {
            match handle.join() {
                Ok(result) => match result {
                    Ok(summary) => log::info!(
                        "Successfully unpacked {} events ({} skipped, {} faults)!",
                        summary.n_events,
                        summary.n_skipped_events,
                        summary.n_faults
                    ),
                    Err(e) => log::error!(
                        "Unpacking failed with error: {e}. Check hgcal_unpacker.log for details."
                    ),
                },
                Err(_) => log::error!("Failed to join unpacking task!"),
            }
            break;
        }
    }

    for pb in bars.iter().flatten() {
        pb.finish();
    }

    log::info!("Done.");
}
