// # Level-0 calibration table
// One line per channel, space separated, after a header line:
//
// Channel Pedestal Noise CM_slope CM_offset BXm1_slope BXm1_offset
// 0x10000000 100.250 1.980 0.010 99.700 0.001 100.100
//
// The channel is the electronics id in hex. Lines starting with # are comments. Undefined
// statistics are written as NaN.
//
// The ROC gain table has one `0x%08x gain` line per mapped ROC half, keyed by the electronics
// id of the half with channel 0.
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::cell_statistics::CellStatisticsMap;
use super::config::ModuleConfig;
use super::dense_index::CalibrationParameterIndex;
use super::electronics_id::ElectronicsId;
use super::error::CalibrationError;
use super::mapping::ElectronicsMapping;

const CALIBRATION_HEADER: &str = "Channel Pedestal Noise CM_slope CM_offset BXm1_slope BXm1_offset";
const CALIBRATION_ENTRIES_PER_LINE: usize = 7;
const ROC_GAIN_HEADER: &str = "ROC Gain";
const DEFAULT_GAIN: u8 = 1;

/// Calibration constants of one channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationValues {
    pub pedestal: f32,
    pub noise: f32,
    pub cm_slope: f32,
    pub cm_offset: f32,
    pub bxm1_slope: f32,
    pub bxm1_offset: f32,
}

/// Channel-level calibration constants stored column-wise in dense index order
#[derive(Debug, Clone)]
pub struct CalibrationParams {
    index: CalibrationParameterIndex,
    ids: Vec<Option<ElectronicsId>>,
    pub pedestal: Vec<f32>,
    pub noise: Vec<f32>,
    pub cm_slope: Vec<f32>,
    pub cm_offset: Vec<f32>,
    pub bxm1_slope: Vec<f32>,
    pub bxm1_offset: Vec<f32>,
}

impl CalibrationParams {
    pub fn new(index: CalibrationParameterIndex) -> Self {
        let size = index.size(false);
        Self {
            index,
            ids: vec![None; size],
            pedestal: vec![0.0; size],
            noise: vec![0.0; size],
            cm_slope: vec![0.0; size],
            cm_offset: vec![0.0; size],
            bxm1_slope: vec![0.0; size],
            bxm1_offset: vec![0.0; size],
        }
    }

    pub fn index(&self) -> &CalibrationParameterIndex {
        &self.index
    }

    pub fn size(&self) -> usize {
        self.ids.len()
    }

    /// Number of channels holding constants
    pub fn n_filled(&self) -> usize {
        self.ids.iter().filter(|id| id.is_some()).count()
    }

    pub fn set(&mut self, id: ElectronicsId, values: &CalibrationValues) -> Result<(), CalibrationError> {
        let idx = self
            .index
            .dense_map(&id)
            .ok_or(CalibrationError::OutOfRange(id.raw()))?;
        self.ids[idx] = Some(id);
        self.pedestal[idx] = values.pedestal;
        self.noise[idx] = values.noise;
        self.cm_slope[idx] = values.cm_slope;
        self.cm_offset[idx] = values.cm_offset;
        self.bxm1_slope[idx] = values.bxm1_slope;
        self.bxm1_offset[idx] = values.bxm1_offset;
        Ok(())
    }

    pub fn get(&self, id: &ElectronicsId) -> Option<CalibrationValues> {
        let idx = self.index.dense_map(id)?;
        if self.ids[idx].is_none() {
            return None;
        }
        Some(CalibrationValues {
            pedestal: self.pedestal[idx],
            noise: self.noise[idx],
            cm_slope: self.cm_slope[idx],
            cm_offset: self.cm_offset[idx],
            bxm1_slope: self.bxm1_slope[idx],
            bxm1_offset: self.bxm1_offset[idx],
        })
    }

    /// Overwrite the constants of every channel in the statistics map. The common-mode terms
    /// come from the fit against the common-mode sum, the BX-1 terms from the fit against the
    /// previous ADC sample.
    pub fn fill_from_statistics(&mut self, stats: &CellStatisticsMap) -> Result<(), CalibrationError> {
        for (id, cell) in stats.sorted() {
            let (pedestal, noise) = cell.mean_and_stddev();
            let lines = cell.slopes_and_intercepts();
            let values = CalibrationValues {
                pedestal: pedestal as f32,
                noise: noise as f32,
                cm_slope: lines[0].0 as f32,
                cm_offset: lines[0].1 as f32,
                bxm1_slope: lines[1].0 as f32,
                bxm1_offset: lines[1].1 as f32,
            };
            self.set(id, &values)?;
        }
        Ok(())
    }

    /// Read a calibration table from a file
    pub fn load(path: &Path, index: CalibrationParameterIndex) -> Result<Self, CalibrationError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents, index)
    }

    pub fn parse(contents: &str, index: CalibrationParameterIndex) -> Result<Self, CalibrationError> {
        let mut params = Self::new(index);
        for (line_idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.contains("Channel") {
                continue;
            }
            let entries: Vec<&str> = line.split_whitespace().collect();
            if entries.len() < CALIBRATION_ENTRIES_PER_LINE {
                return Err(CalibrationError::MalformedRow(line_idx + 1));
            }
            let hex = entries[0]
                .trim_start_matches("0x")
                .trim_start_matches("0X");
            let id = ElectronicsId::from_raw(u32::from_str_radix(hex, 16)?);
            let values = CalibrationValues {
                pedestal: entries[1].parse()?,
                noise: entries[2].parse()?,
                cm_slope: entries[3].parse()?,
                cm_offset: entries[4].parse()?,
                bxm1_slope: entries[5].parse()?,
                bxm1_offset: entries[6].parse()?,
            };
            params.set(id, &values)?;
        }
        spdlog::info!("Loaded calibration constants for {} channels", params.n_filled());
        Ok(params)
    }

    /// Write the filled channels in ascending electronics id order
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<(), CalibrationError> {
        writeln!(writer, "{CALIBRATION_HEADER}")?;
        let mut filled: Vec<(ElectronicsId, usize)> = self
            .ids
            .iter()
            .enumerate()
            .filter_map(|(idx, id)| id.map(|id| (id, idx)))
            .collect();
        filled.sort();
        for (id, idx) in filled {
            writeln!(
                writer,
                "{:#010x} {:.3} {:.3} {:.3} {:.3} {:.3} {:.3}",
                id.raw(),
                self.pedestal[idx],
                self.noise[idx],
                self.cm_slope[idx],
                self.cm_offset[idx],
                self.bxm1_slope[idx],
                self.bxm1_offset[idx]
            )?;
        }
        Ok(())
    }

    pub fn export(&self, path: &Path) -> Result<(), CalibrationError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write(&mut writer)?;
        writer.flush()?;
        spdlog::info!(
            "Exported calibration constants for {} channels to {}",
            self.n_filled(),
            path.display()
        );
        Ok(())
    }
}

/// One gain per ROC half, in dense ROC order
#[derive(Debug, Clone)]
pub struct RocConfigParams {
    index: CalibrationParameterIndex,
    ids: Vec<Option<ElectronicsId>>,
    pub gains: Vec<u8>,
}

impl RocConfigParams {
    /// Gains of every ROC half of the mapped modules. An override replaces every gain; halves
    /// no configuration mentions keep the default gain of 1.
    pub fn from_module_configs(
        index: CalibrationParameterIndex,
        mapping: &ElectronicsMapping,
        module_configs: &[ModuleConfig],
        gain_override: Option<u8>,
    ) -> Result<Self, CalibrationError> {
        let size = index.size(true);
        let mut ids = vec![None; size];
        for (_, module) in mapping.modules.modules() {
            for erx in 0..module.n_erx {
                let id = module.eleid.with_erx(erx as u8);
                let roc = index
                    .dense_roc_map(&id)
                    .ok_or(CalibrationError::OutOfRange(id.raw()))?;
                ids[roc] = Some(id);
            }
        }

        let mut gains = vec![DEFAULT_GAIN; size];
        if let Some(gain) = gain_override {
            spdlog::info!("Overriding all ROC gains with {gain}");
            gains.iter_mut().for_each(|g| *g = gain);
            return Ok(Self { index, ids, gains });
        }

        for module_config in module_configs {
            let idx = mapping.modules.index_for_hardware(
                module_config.fed_id,
                module_config.capture_block_idx,
                module_config.econd_idx,
            )?;
            let Some(module) = mapping.modules.module(idx) else {
                continue;
            };
            for (erx, gain) in module_config.gains.iter().enumerate() {
                let id = module.eleid.with_erx(erx as u8);
                let roc = index
                    .dense_roc_map(&id)
                    .ok_or(CalibrationError::OutOfRange(id.raw()))?;
                gains[roc] = *gain;
            }
        }
        Ok(Self { index, ids, gains })
    }

    pub fn gain(&self, id: &ElectronicsId) -> Option<u8> {
        self.index.dense_roc_map(id).map(|roc| self.gains[roc])
    }

    /// Write the gain of every mapped ROC half in ascending electronics id order
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<(), CalibrationError> {
        writeln!(writer, "{ROC_GAIN_HEADER}")?;
        let mut mapped: Vec<(ElectronicsId, usize)> = self
            .ids
            .iter()
            .enumerate()
            .filter_map(|(roc, id)| id.map(|id| (id, roc)))
            .collect();
        mapped.sort();
        for (id, roc) in mapped {
            writeln!(writer, "{:#010x} {}", id.raw(), self.gains[roc])?;
        }
        Ok(())
    }

    pub fn export(&self, path: &Path) -> Result<(), CalibrationError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write(&mut writer)?;
        writer.flush()?;
        spdlog::info!(
            "Exported gains for {} ROC halves to {}",
            self.ids.iter().flatten().count(),
            path.display()
        );
        Ok(())
    }
}
