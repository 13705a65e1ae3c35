use std::path::Path;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use rand::Rng;

use super::calibration::{CalibrationParams, RocConfigParams};
use super::cell_statistics::CellStatisticsMap;
use super::config::Config;
use super::emulator::emulate_event;
use super::error::{ProcessorError, UnpackerError};
use super::event_unpacker::{ConfiguredReadout, EventUnpacker};
use super::mapping::ElectronicsMapping;
use super::module_map::ModuleIndexer;
use super::raw_file::{RawEventFile, RawEventWriter};
use super::worker_status::{BarColor, WorkerStatus};

/// Event, channel and fault counts of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub n_events: u64,
    /// Events dropped for crossing a ceiling
    pub n_skipped_events: u64,
    pub n_channels: u64,
    pub n_common_modes: u64,
    pub n_faults: u64,
}

impl RunSummary {
    pub fn merge(&mut self, other: &RunSummary) {
        self.n_events += other.n_events;
        self.n_skipped_events += other.n_skipped_events;
        self.n_channels += other.n_channels;
        self.n_common_modes += other.n_common_modes;
        self.n_faults += other.n_faults;
    }
}

/// What a worker hands back once its files are done
#[derive(Debug, Clone, Default)]
pub struct WorkerOutput {
    pub statistics: CellStatisticsMap,
    pub summary: RunSummary,
}

/// Unpack every event of one raw file into the worker's accumulators
fn process_file(
    unpacker: &EventUnpacker<ConfiguredReadout>,
    path: &Path,
    output: &mut WorkerOutput,
    tx: &Sender<WorkerStatus>,
    worker_id: usize,
    file_number: usize,
) -> Result<(), ProcessorError> {
    let mut file = RawEventFile::new(path)?;
    let total_data_size = file.size_bytes();
    spdlog::info!(
        "Processing {} with size {}",
        path.display(),
        human_bytes::human_bytes(total_data_size as f64)
    );
    let flush_frac: f32 = 0.01;
    let flush_val = (total_data_size as f64 * flush_frac as f64) as u64;
    let mut last_flush: u64 = 0;
    let skipped_before = output.summary.n_skipped_events;
    let faults_before = output.summary.n_faults;

    tx.send(WorkerStatus::new(0.0, file_number, worker_id, BarColor::CYAN))?;
    while let Some(event) = file.next_event()? {
        match unpacker.unpack_event(&event) {
            Ok(data) => {
                output.summary.n_events += 1;
                output.summary.n_channels += data.channels.len() as u64;
                output.summary.n_common_modes += data.common_modes.len() as u64;
                output.summary.n_faults += data.faults.len() as u64;
                output.statistics.fill(&data);
            }
            Err(e @ UnpackerError::CapacityExceeded { .. }) => {
                spdlog::warn!("Skipping event {}: {e}", event.event_id);
                output.summary.n_skipped_events += 1;
            }
            Err(e) => return Err(e.into()),
        }

        let position = file.position()?;
        if position - last_flush > flush_val {
            last_flush = position;
            tx.send(WorkerStatus::new(
                position as f32 / total_data_size as f32,
                file_number,
                worker_id,
                BarColor::CYAN,
            ))?;
        }
    }
    let color = if output.summary.n_skipped_events > skipped_before
        || output.summary.n_faults > faults_before
    {
        BarColor::MAGENTA
    } else {
        BarColor::GREEN
    };
    tx.send(WorkerStatus::new(1.0, file_number, worker_id, color))?;
    spdlog::info!("Done with {}.", path.display());
    Ok(())
}

/// Process a subset of the raw files. Each worker owns its unpacker and statistics.
pub fn process_subset(
    config: Config,
    readout: ConfiguredReadout,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
    subset: Vec<usize>,
) -> Result<WorkerOutput, ProcessorError> {
    let unpacker =
        EventUnpacker::new(config.unpacker.clone(), readout)?.with_fed_filter(&config.fed_ids);
    let mut output = WorkerOutput::default();
    for file_number in subset {
        match config.raw_paths.get(file_number) {
            Some(path) => {
                if let Err(e) =
                    process_file(&unpacker, path, &mut output, &tx, worker_id, file_number)
                {
                    spdlog::error!("Worker {worker_id} failed on {}: {e}", path.display());
                    // The receiver may be gone already
                    let _ = tx.send(WorkerStatus::new(0.0, file_number, worker_id, BarColor::RED));
                    return Err(e);
                }
            }
            None => spdlog::warn!("Raw file {file_number} is not configured, skipping..."),
        }
    }
    Ok(output)
}

/// Divide the raw file list in to a set of subsets (per thread/worker)
pub fn create_subsets(config: &Config) -> Vec<Vec<usize>> {
    let n_subsets = config.n_threads.max(1) as usize;
    let mut subsets: Vec<Vec<usize>> = vec![Vec::new(); n_subsets];

    for file_number in 0..config.raw_paths.len() {
        subsets[file_number % n_subsets].push(file_number)
    }

    subsets
}

/// Level-0 constants: the input table when given, with every channel seen in the run
/// overwritten from its statistics
pub fn calibrate(
    config: &Config,
    mapping: &ElectronicsMapping,
    statistics: &CellStatisticsMap,
) -> Result<CalibrationParams, ProcessorError> {
    let index = config.calibration_index(mapping);
    let mut params = match &config.calibration_in_path {
        Some(path) => {
            spdlog::info!("Loading calibration constants from {}", path.display());
            CalibrationParams::load(path, index)?
        }
        None => CalibrationParams::new(index),
    };
    params.fill_from_statistics(statistics)?;
    Ok(params)
}

/// The main loop of hgcal_unpacker.
///
/// Loads the mapping, splits the raw files over `n_threads` workers, merges their statistics
/// and exports the calibration table. Progress is reported through `tx`.
pub fn process(config: Config, tx: Sender<WorkerStatus>) -> Result<RunSummary, ProcessorError> {
    config.validate()?;
    config.check_inputs()?;

    let mapping = Arc::new(ElectronicsMapping::load(
        &config.module_locator_path,
        &config.cell_map_paths,
    )?);
    spdlog::info!(
        "Loaded {} modules and {} cells",
        mapping.modules.modules().count(),
        mapping.cells.max_index()
    );
    let readout = ConfiguredReadout::new(mapping.clone(), &config.module_configs)?;
    let roc_params = RocConfigParams::from_module_configs(
        config.calibration_index(&mapping),
        &mapping,
        &config.module_configs,
        config.gain_override,
    )?;

    let mut total_data_size: u64 = 0;
    for path in &config.raw_paths {
        total_data_size += std::fs::metadata(path)?.len();
    }
    spdlog::info!(
        "Total run size: {}",
        human_bytes::human_bytes(total_data_size as f64)
    );

    let mut workers = vec![];
    for (idx, subset) in create_subsets(&config).into_iter().enumerate() {
        // Dont make empty workers
        if subset.is_empty() {
            continue;
        }
        let conf = config.clone();
        let readout = readout.clone();
        let tx = tx.clone();
        workers.push(std::thread::spawn(move || {
            process_subset(conf, readout, tx, idx, subset)
        }));
    }

    // Joined in worker order so the merged sums do not depend on scheduling
    let mut statistics = CellStatisticsMap::new();
    let mut summary = RunSummary::default();
    for worker in workers {
        let output = worker.join().map_err(|_| ProcessorError::WorkerPanic)??;
        statistics.merge(&output.statistics);
        summary.merge(&output.summary);
    }
    spdlog::info!(
        "Unpacked {} events ({} skipped) with {} channels, {} common modes and {} faults",
        summary.n_events,
        summary.n_skipped_events,
        summary.n_channels,
        summary.n_common_modes,
        summary.n_faults
    );

    let params = calibrate(&config, &mapping, &statistics)?;
    params.export(&config.calibration_out_path)?;
    if let Some(path) = &config.roc_gains_out_path {
        roc_params.export(path)?;
    }
    Ok(summary)
}

/// Write `config.emulator.n_events` random events for the configured module table to a raw
/// file. Returns the number of events written.
pub fn emulate<R: Rng>(config: &Config, path: &Path, rng: &mut R) -> Result<u64, ProcessorError> {
    let modules = ModuleIndexer::new(&config.module_locator_path)?;
    let mut writer = RawEventWriter::new(path)?;
    for event_id in 1..=config.emulator.n_events {
        let event = emulate_event(&modules, &config.emulator, event_id, rng)?;
        writer.write_event(&event)?;
    }
    let n_events = writer.n_events();
    writer.close()?;
    spdlog::info!(
        "Emulated {n_events} events to {} ({})",
        path.display(),
        human_bytes::human_bytes(std::fs::metadata(path)?.len() as f64)
    );
    Ok(n_events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell_map::tests::{HD_CELL_TABLE, TILE_CELL_TABLE};
    use crate::emulator::EmulatorConfig;
    use crate::error::RawFileError;
    use crate::frame_parser::UnpackerConfig;
    use crate::module_map::tests::MODULE_TABLE;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::path::PathBuf;
    use std::sync::mpsc;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("hgcal_process_{}_{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn make_config(dir: &Path, n_raw: usize) -> Config {
        let module_locator_path = dir.join("modulelocator.txt");
        std::fs::write(&module_locator_path, MODULE_TABLE).unwrap();
        let hd_path = dir.join("hd_cells.txt");
        std::fs::write(&hd_path, HD_CELL_TABLE).unwrap();
        let tile_path = dir.join("tile_cells.txt");
        std::fs::write(&tile_path, TILE_CELL_TABLE).unwrap();
        Config {
            raw_paths: (0..n_raw).map(|i| dir.join(format!("run_{i}.raw"))).collect(),
            module_locator_path,
            cell_map_paths: vec![hd_path, tile_path],
            calibration_out_path: dir.join("calib.txt"),
            unpacker: UnpackerConfig {
                fix_calib_channel: false,
                ..Default::default()
            },
            emulator: EmulatorConfig {
                n_events: 20,
                ..Default::default()
            },
            n_threads: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_create_subsets() {
        let config = Config {
            raw_paths: (0..5).map(|i| PathBuf::from(format!("{i}.raw"))).collect(),
            n_threads: 2,
            ..Default::default()
        };
        assert_eq!(create_subsets(&config), vec![vec![0, 2, 4], vec![1, 3]]);
    }

    #[test]
    fn test_emulate_and_process() {
        let dir = temp_dir("pipeline");
        let config = make_config(&dir, 3);
        let mut rng = StdRng::seed_from_u64(11);
        for path in &config.raw_paths {
            assert_eq!(emulate(&config, path, &mut rng).unwrap(), 20);
        }

        let (tx, rx) = mpsc::channel::<WorkerStatus>();
        let summary = process(config.clone(), tx).unwrap();
        assert_eq!(summary.n_events, 60);
        assert_eq!(summary.n_skipped_events, 0);
        assert_eq!(summary.n_faults, 0);
        // LD 6 e-Rx, HD 12, LD 6, tile 4
        assert_eq!(summary.n_channels, 60 * (6 + 12 + 6 + 4) * 37);
        assert_eq!(summary.n_common_modes, 60 * (6 + 12 + 6 + 4));

        let statuses: Vec<WorkerStatus> = rx.try_iter().collect();
        for file_number in 0..3 {
            assert!(statuses.iter().any(|s| s.file_number == file_number
                && s.progress == 1.0
                && s.color == BarColor::GREEN));
        }

        let table = std::fs::read_to_string(&config.calibration_out_path).unwrap();
        assert_eq!(table.lines().count(), 1 + (6 + 12 + 6 + 4) * 37);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_skipped_events() {
        let dir = temp_dir("skipped");
        let mut config = make_config(&dir, 1);
        config.n_threads = 1;
        emulate(&config, &config.raw_paths[0], &mut StdRng::seed_from_u64(3)).unwrap();
        config.unpacker.channel_max = 100;

        let (tx, rx) = mpsc::channel::<WorkerStatus>();
        let summary = process(config.clone(), tx).unwrap();
        assert_eq!(summary.n_events, 0);
        assert_eq!(summary.n_skipped_events, 20);
        let last = rx.try_iter().last().unwrap();
        assert_eq!(last.progress, 1.0);
        assert_eq!(last.color, BarColor::MAGENTA);
        // Header only
        let table = std::fs::read_to_string(&config.calibration_out_path).unwrap();
        assert_eq!(table.lines().count(), 1);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_corrupt_raw_file() {
        let dir = temp_dir("corrupt");
        let config = make_config(&dir, 1);
        // Event 1 claims more FED blocks than the file holds
        let bytes: Vec<u8> = [1u32, u32::MAX]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        std::fs::write(&config.raw_paths[0], bytes).unwrap();

        let (tx, rx) = mpsc::channel::<WorkerStatus>();
        assert!(matches!(
            process(config, tx),
            Err(ProcessorError::RawFileError(RawFileError::TruncatedEvent(1)))
        ));
        assert_eq!(rx.try_iter().last().unwrap().color, BarColor::RED);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_raw_file() {
        let dir = temp_dir("missing");
        let config = make_config(&dir, 1);
        let (tx, _rx) = mpsc::channel::<WorkerStatus>();
        assert!(matches!(
            process(config, tx),
            Err(ProcessorError::ConfigError(_))
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
