use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DenseIndexError {
    #[error("DenseIndexer was given a zero capacity for level {0}")]
    ZeroCapacity(&'static str),
    #[error("DenseIndexer capacity {value} for level {level} does not fit the {bits} bit electronics id field")]
    CapacityTooWide {
        level: &'static str,
        value: u32,
        bits: u32,
    },
    #[error("DenseIndexer was given {level} value {value} outside of capacity {max}")]
    OutOfRange {
        level: &'static str,
        value: u32,
        max: u32,
    },
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Mapping table failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Could not load mapping table because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Mapping table has a malformed row at line {line}: {reason}")]
    MalformedRow { line: usize, reason: String },
    #[error("Mapping table contains the unknown module type code {0}")]
    UnknownTypeCode(String),
    #[error("Mapping table has no entry for {0}")]
    NotFound(String),
    #[error("Mapping failed due to dense index error: {0}")]
    DenseIndex(#[from] DenseIndexError),
    #[error("MappingStore lock was poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnpackerError {
    #[error("Unpacker exceeded the {what} ceiling: {count} > {max}")]
    CapacityExceeded {
        what: &'static str,
        count: usize,
        max: usize,
    },
    #[error("Unpacker was configured with {0}")]
    BadConfiguration(String),
    #[error("Unpacker failed because an S-Link worker panicked")]
    WorkerPanic,
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Calibration table failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Calibration table failed to parse an integer: {0}")]
    ParsingIntError(#[from] std::num::ParseIntError),
    #[error("Calibration table failed to parse a float: {0}")]
    ParsingFloatError(#[from] std::num::ParseFloatError),
    #[error("Calibration table has a malformed row at line {0}")]
    MalformedRow(usize),
    #[error("Calibration table contains electronics id {0:#010x} outside of the dense index")]
    OutOfRange(u32),
    #[error("Calibration failed due to mapping error: {0}")]
    MapError(#[from] MappingError),
}

#[derive(Debug, Error)]
pub enum RawFileError {
    #[error("Could not open RawEventFile because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("RawEventFile failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("RawEventFile ended in the middle of event {0}")]
    TruncatedEvent(u32),
    #[error("RawEventFile event {event_id} has FED id {fed_id} which does not fit 16 bits")]
    BadFedId { event_id: u32, fed_id: u32 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config is invalid: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to mapping error: {0}")]
    MapError(#[from] MappingError),
    #[error("Processor failed due to Unpacker error: {0}")]
    UnpackerError(#[from] UnpackerError),
    #[error("Processor failed due to calibration error: {0}")]
    CalibrationError(#[from] CalibrationError),
    #[error("Processor failed due to RawEventFile error: {0}")]
    RawFileError(#[from] RawFileError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Processor failed because a worker thread panicked")]
    WorkerPanic,
}
