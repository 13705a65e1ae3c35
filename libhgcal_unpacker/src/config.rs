use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::constants::COMMON_MODES_PER_ERX;
use super::dense_index::{CalibrationParameterIndex, DenseIndexConfig, DenseIndexer};
use super::emulator::EmulatorConfig;
use super::error::ConfigError;
use super::frame_parser::UnpackerConfig;
use super::mapping::ElectronicsMapping;

/// Readout settings of one ECON-D, addressed by its hardware coordinates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub fed_id: u16,
    pub capture_block_idx: u8,
    pub econd_idx: u8,
    #[serde(default)]
    pub char_mode: bool,
    /// Gain of each ROC half, in e-Rx order
    #[serde(default)]
    pub gains: Vec<u8>,
}

/// Structure representing the application configuration. Contains pathing, mapping and
/// unpacker settings. Configs are seralizable and deserializable to YAML using serde and
/// serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub raw_paths: Vec<PathBuf>,
    pub module_locator_path: PathBuf,
    pub cell_map_paths: Vec<PathBuf>,
    pub calibration_in_path: Option<PathBuf>,
    pub calibration_out_path: PathBuf,
    /// Gain of every mapped ROC half, written next to the calibration table when set
    #[serde(default)]
    pub roc_gains_out_path: Option<PathBuf>,
    #[serde(default)]
    pub fed_ids: Vec<u16>,
    #[serde(default)]
    pub unpacker: UnpackerConfig,
    #[serde(default)]
    pub dense_index: Option<DenseIndexConfig>,
    #[serde(default)]
    pub module_configs: Vec<ModuleConfig>,
    #[serde(default)]
    pub gain_override: Option<u8>,
    #[serde(default)]
    pub emulator: EmulatorConfig,
    pub n_threads: i32,
}

impl Default for Config {
    /// Generate a new Config object. All paths will be empty/invalid
    fn default() -> Self {
        Self {
            raw_paths: vec![],
            module_locator_path: PathBuf::from("None"),
            cell_map_paths: vec![],
            calibration_in_path: None,
            calibration_out_path: PathBuf::from("None"),
            roc_gains_out_path: None,
            fed_ids: vec![],
            unpacker: UnpackerConfig::default(),
            dense_index: None,
            module_configs: vec![],
            gain_override: None,
            emulator: EmulatorConfig::default(),
            n_threads: 1,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }

    /// Check the settings themselves. Paths are checked by [`Config::check_inputs`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.is_n_threads_valid() {
            return Err(ConfigError::Invalid(format!(
                "n_threads must be at least 1, found {}",
                self.n_threads
            )));
        }
        self.unpacker
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if let Some(dense_index) = &self.dense_index {
            DenseIndexer::new(*dense_index).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        for module in &self.module_configs {
            if module.gains.len() > self.unpacker.num_erxs_in_econd as usize {
                return Err(ConfigError::Invalid(format!(
                    "module at FED {} capture block {} ECON-D {} lists {} gains for at most {} e-Rx",
                    module.fed_id,
                    module.capture_block_idx,
                    module.econd_idx,
                    module.gains.len(),
                    self.unpacker.num_erxs_in_econd
                )));
            }
        }
        Ok(())
    }

    /// Check that every input file exists
    pub fn check_inputs(&self) -> Result<(), ConfigError> {
        let inputs = self
            .raw_paths
            .iter()
            .chain(self.cell_map_paths.iter())
            .chain(self.calibration_in_path.iter())
            .chain(std::iter::once(&self.module_locator_path));
        for path in inputs {
            if !path.exists() {
                return Err(ConfigError::BadFilePath(path.clone()));
            }
        }
        Ok(())
    }

    /// Calibration storage layout: the explicit capacities when given, otherwise the ones
    /// observed in the module table
    pub fn calibration_index(&self, mapping: &ElectronicsMapping) -> CalibrationParameterIndex {
        match &self.dense_index {
            Some(dense_index) => {
                CalibrationParameterIndex::from_dense_config(dense_index, COMMON_MODES_PER_ERX)
            }
            None => mapping.calibration_index,
        }
    }
}
