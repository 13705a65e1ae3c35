// Cell template tables describe every readout channel of a module flavour. Two row shapes
// exist, and the first data row of a file decides which one the whole file uses:
//
// silicon: typecode chip half seq rocpin cellidx triglink trigcell iu iv trace t
// SiPM:    typecode chip half cellidx seq iu iv trigcell triglink t
//
// Cells are stored per module type, (chip * 2 + half) * 37 + seq inside the block of their
// type, so the dense index does not depend on which tables were loaded.
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use super::constants::*;
use super::detector_id::{econd_erx, silicon_cell_part};
use super::electronics_id::ElectronicsId;
use super::error::MappingError;
use super::module_map::column;
use super::module_type::{type_index, MODULE_TYPES};

const SI_ENTRIES_PER_LINE: usize = 12;
const SIPM_ENTRIES_PER_LINE: usize = 10;
const CALIB_TAG: &str = "CALIB";

/// One readout channel of a module template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellInfo {
    pub valid: bool,
    pub is_high_density: bool,
    pub is_calibration: bool,
    pub is_sipm: bool,
    pub type_idx: usize,
    pub chip: u8,
    pub half: u8,
    pub seq: u8,
    pub rocpin: u16,
    pub cell_idx: i32,
    pub trig_link: i32,
    pub trig_cell: i32,
    /// cell u, or the ring coordinate of a tile
    pub i1: i32,
    /// cell v, or the phi coordinate of a tile
    pub i2: i32,
    pub trace: f32,
    pub t: i32,
    /// e-Rx and channel part of the electronics id
    pub eleid: ElectronicsId,
    /// cell part of the silicon detector id, 0 for tiles
    pub detid: u32,
}

/// The ROC pin column holds a number, or a `CALIB` tag for the calibration cells whose
/// trailing digits (if any) give the pin.
fn parse_rocpin(entry: &str, line: usize) -> Result<(bool, u16), MappingError> {
    if entry.contains(CALIB_TAG) {
        let digits: String = entry
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<char>>()
            .into_iter()
            .rev()
            .collect();
        let pin = if digits.is_empty() {
            0
        } else {
            digits.parse::<u16>().map_err(|_| MappingError::MalformedRow {
                line,
                reason: format!("bad calibration pin {entry}"),
            })?
        };
        Ok((true, pin))
    } else {
        column(&[entry], 0, line).map(|pin| (false, pin))
    }
}

#[derive(Debug, Clone)]
pub struct CellIndexer {
    offsets: Vec<usize>,
    cells: Vec<CellInfo>,
}

impl Default for CellIndexer {
    fn default() -> Self {
        let mut offsets = Vec::with_capacity(MODULE_TYPES.len());
        let mut total = 0;
        for mtype in MODULE_TYPES.iter() {
            offsets.push(total);
            total += mtype.n_erx as usize * CHANNELS_PER_ERX as usize;
        }
        Self {
            offsets,
            cells: vec![CellInfo::default(); total],
        }
    }
}

impl CellIndexer {
    /// Build from a list of cell template files
    pub fn new(paths: &[PathBuf]) -> Result<Self, MappingError> {
        let mut indexer = Self::default();
        for path in paths {
            indexer.load(path)?;
        }
        Ok(indexer)
    }

    pub fn load(&mut self, path: &Path) -> Result<(), MappingError> {
        if !path.exists() {
            return Err(MappingError::BadFilePath(path.to_path_buf()));
        }
        let mut contents = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut contents)?;
        self.parse(&contents)
    }

    /// Add the cells of one template table
    pub fn parse(&mut self, contents: &str) -> Result<(), MappingError> {
        let mut is_sipm = false;
        let mut first_row = true;
        let mut n_cells = 0;
        for (line_idx, line) in contents.lines().enumerate().skip(1) {
            let line_number = line_idx + 1;
            let entries: Vec<&str> = line.split_whitespace().collect();
            if entries.is_empty() {
                continue;
            }
            // The first data row fixes the row shape for the file and is itself a data row
            if first_row {
                is_sipm = entries[0].contains("TM");
                first_row = false;
            }
            let cell = if is_sipm {
                Self::parse_sipm_row(&entries, line_number)?
            } else {
                Self::parse_silicon_row(&entries, line_number)?
            };
            let typecode = entries[0];
            let idx = self.dense_index(typecode, cell.chip, cell.half, cell.seq).map_err(|e| {
                MappingError::MalformedRow {
                    line: line_number,
                    reason: e.to_string(),
                }
            })?;
            self.cells[idx] = cell;
            n_cells += 1;
        }
        spdlog::debug!("CellIndexer loaded {n_cells} cells (SiPM: {is_sipm})");
        Ok(())
    }

    fn parse_silicon_row(entries: &[&str], line: usize) -> Result<CellInfo, MappingError> {
        if entries.len() < SI_ENTRIES_PER_LINE {
            return Err(MappingError::MalformedRow {
                line,
                reason: format!("expected {SI_ENTRIES_PER_LINE} columns, found {}", entries.len()),
            });
        }
        let typecode = entries[0];
        let type_idx = type_index(typecode).map_err(|e| MappingError::MalformedRow {
            line,
            reason: e.to_string(),
        })?;
        let chip: u8 = column(entries, 1, line)?;
        let half: u8 = column(entries, 2, line)?;
        let seq: u8 = column(entries, 3, line)?;
        let (is_calibration, rocpin) = parse_rocpin(entries[4], line)?;
        let i1: i32 = column(entries, 8, line)?;
        let i2: i32 = column(entries, 9, line)?;
        Self::check_coordinates(chip, half, seq, line)?;

        Ok(CellInfo {
            valid: true,
            is_high_density: typecode.contains("MH"),
            is_calibration,
            is_sipm: false,
            type_idx,
            chip,
            half,
            seq,
            rocpin,
            cell_idx: column(entries, 5, line)?,
            trig_link: column(entries, 6, line)?,
            trig_cell: column(entries, 7, line)?,
            i1,
            i2,
            trace: column(entries, 10, line)?,
            t: column(entries, 11, line)?,
            eleid: ElectronicsId::new(false, 0, 0, 0, econd_erx(chip, half) as u8, seq),
            detid: silicon_cell_part(i1.max(0) as u32, i2.max(0) as u32),
        })
    }

    fn parse_sipm_row(entries: &[&str], line: usize) -> Result<CellInfo, MappingError> {
        if entries.len() < SIPM_ENTRIES_PER_LINE {
            return Err(MappingError::MalformedRow {
                line,
                reason: format!("expected {SIPM_ENTRIES_PER_LINE} columns, found {}", entries.len()),
            });
        }
        let type_idx = type_index(entries[0]).map_err(|e| MappingError::MalformedRow {
            line,
            reason: e.to_string(),
        })?;
        let chip: u8 = column(entries, 1, line)?;
        let half: u8 = column(entries, 2, line)?;
        let cell_idx: i32 = column(entries, 3, line)?;
        let seq: u8 = column(entries, 4, line)?;
        Self::check_coordinates(chip, half, seq, line)?;

        Ok(CellInfo {
            valid: true,
            is_high_density: false,
            is_calibration: false,
            is_sipm: true,
            type_idx,
            chip,
            half,
            seq,
            rocpin: cell_idx.max(0) as u16,
            cell_idx,
            trig_link: column(entries, 8, line)?,
            trig_cell: column(entries, 7, line)?,
            i1: column(entries, 5, line)?,
            i2: column(entries, 6, line)?,
            trace: 0.0,
            t: column(entries, 9, line)?,
            eleid: ElectronicsId::new(false, 0, 0, 0, econd_erx(chip, half) as u8, seq),
            detid: 0,
        })
    }

    fn check_coordinates(chip: u8, half: u8, seq: u8, line: usize) -> Result<(), MappingError> {
        if half > 1 || chip as u32 * 2 + 1 > ECONDERX_MASK || seq as u32 >= CHANNELS_PER_ERX {
            return Err(MappingError::MalformedRow {
                line,
                reason: format!("chip {chip} half {half} seq {seq} out of range"),
            });
        }
        Ok(())
    }

    /// Dense index of a cell from its table row coordinates
    pub fn dense_index(&self, typecode: &str, chip: u8, half: u8, seq: u8) -> Result<usize, MappingError> {
        let type_idx = type_index(typecode)?;
        let erx = chip as u32 * 2 + half as u32;
        if half > 1 || erx >= MODULE_TYPES[type_idx].n_erx || seq as u32 >= CHANNELS_PER_ERX {
            return Err(MappingError::NotFound(format!(
                "cell {typecode} chip {chip} half {half} seq {seq}"
            )));
        }
        Ok(self.offsets[type_idx] + (erx * CHANNELS_PER_ERX + seq as u32) as usize)
    }

    /// Size of the dense cell array
    pub fn max_index(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, idx: usize) -> Option<&CellInfo> {
        self.cells.get(idx).filter(|c| c.valid)
    }

    pub fn cell_for_row(&self, typecode: &str, chip: u8, half: u8, seq: u8) -> Option<&CellInfo> {
        self.dense_index(typecode, chip, half, seq)
            .ok()
            .and_then(|idx| self.cell(idx))
    }

    /// Valid cells of one module type with their dense index
    pub fn cells_for_type(&self, type_idx: usize) -> impl Iterator<Item = (usize, &CellInfo)> {
        let (start, end) = match MODULE_TYPES.get(type_idx) {
            Some(mtype) => {
                let start = self.offsets[type_idx];
                (start, start + mtype.n_erx as usize * CHANNELS_PER_ERX as usize)
            }
            None => (0, 0),
        };
        self.cells[start..end]
            .iter()
            .enumerate()
            .filter(|(_, c)| c.valid)
            .map(move |(i, c)| (start + i, c))
    }
}
