// The module locator table places every physical module in the readout:
//
// plane u v typecode econdidx captureblock captureblockidx slinkidx fedid zside
//
// The first line is a header. (fedid, captureblockidx, econdidx) is the hardware key of a
// module; the dense index runs over (slinkidx, captureblockidx, econdidx) with capacities
// taken from the largest values found in the table, so unused combinations leave invalid
// slots in the backing array.
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use fxhash::FxHashMap;

use super::constants::*;
use super::dense_index::{DenseBounds, DenseIndexConfig, DenseIndexer, HardwareAddress, IndexLevel};
use super::detector_id::silicon_detector_id;
use super::electronics_id::ElectronicsId;
use super::error::MappingError;
use super::module_type::{convert_type_code, module_type, type_index};

const MODULE_ENTRIES_PER_LINE: usize = 10;

/// One row of the module locator table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleInfo {
    pub valid: bool,
    pub zside: bool,
    pub is_sipm: bool,
    pub is_high_density: bool,
    pub cell_type: u8,
    pub plane: u32,
    /// wafer u, or the tile module coordinate for SiPM-on-tile modules
    pub i1: i32,
    /// wafer v, or the tile module coordinate for SiPM-on-tile modules
    pub i2: i32,
    pub typecode: String,
    pub type_idx: usize,
    pub fed_id: u16,
    pub slink_idx: u16,
    pub capture_block: u8,
    pub capture_block_idx: u8,
    pub econd_idx: u8,
    pub n_erx: u32,
    pub erx_enable_bits: u16,
    pub eleid: ElectronicsId,
    pub detid: u32,
}

/// Parse one whitespace separated column, reporting failures as a malformed row
pub(crate) fn column<T: FromStr>(entries: &[&str], idx: usize, line: usize) -> Result<T, MappingError> {
    let entry = entries.get(idx).ok_or_else(|| MappingError::MalformedRow {
        line,
        reason: format!("missing column {idx}"),
    })?;
    entry.parse::<T>().map_err(|_| MappingError::MalformedRow {
        line,
        reason: format!("could not parse column {idx} ({entry})"),
    })
}

/// ModuleIndexer holds the module table in dense order together with the FED to S-Link map
/// and the per-module e-Rx enable pattern.
#[derive(Debug, Clone)]
pub struct ModuleIndexer {
    indexer: DenseIndexer,
    modules: Vec<ModuleInfo>,
    fed_to_slink: FxHashMap<u16, u32>,
    bounds: DenseBounds,
}

impl ModuleIndexer {
    /// Read a module locator table from a file
    pub fn new(path: &Path) -> Result<Self, MappingError> {
        if !path.exists() {
            return Err(MappingError::BadFilePath(path.to_path_buf()));
        }
        let mut contents = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut contents)?;
        Self::parse(&contents)
    }

    /// Parse the text of a module locator table
    pub fn parse(contents: &str) -> Result<Self, MappingError> {
        let mut rows: Vec<ModuleInfo> = Vec::new();
        let mut row_lines: Vec<usize> = Vec::new();
        let mut fed_to_slink: FxHashMap<u16, u32> = FxHashMap::default();

        for (line_idx, line) in contents.lines().enumerate().skip(1) {
            let line_number = line_idx + 1;
            let entries: Vec<&str> = line.split_whitespace().collect();
            if entries.is_empty() {
                continue;
            }
            if entries.len() < MODULE_ENTRIES_PER_LINE {
                return Err(MappingError::MalformedRow {
                    line: line_number,
                    reason: format!(
                        "expected {MODULE_ENTRIES_PER_LINE} columns, found {}",
                        entries.len()
                    ),
                });
            }

            let plane: u32 = column(&entries, 0, line_number)?;
            let i1: i32 = column(&entries, 1, line_number)?;
            let i2: i32 = column(&entries, 2, line_number)?;
            let typecode = entries[3].to_string();
            let econd_idx: u8 = column(&entries, 4, line_number)?;
            let capture_block: u8 = column(&entries, 5, line_number)?;
            let capture_block_idx: u8 = column(&entries, 6, line_number)?;
            let slink_idx: u16 = column(&entries, 7, line_number)?;
            let fed_id: u16 = column(&entries, 8, line_number)?;
            let zside: i32 = column(&entries, 9, line_number)?;

            let unknown = |e: MappingError| MappingError::MalformedRow {
                line: line_number,
                reason: e.to_string(),
            };
            let mtype = module_type(&typecode).map_err(unknown)?;
            let type_idx = type_index(&typecode).map_err(unknown)?;
            let (is_sipm, cell_type) = convert_type_code(&typecode).map_err(unknown)?;

            if fed_id as u32 > FEDID_MASK
                || capture_block as u32 > CAPTUREBLOCK_MASK
                || econd_idx as u32 > ECONDIDX_MASK
            {
                return Err(MappingError::MalformedRow {
                    line: line_number,
                    reason: String::from("hardware coordinate does not fit the electronics id"),
                });
            }

            match fed_to_slink.get(&fed_id) {
                Some(slink) if *slink != slink_idx as u32 => {
                    return Err(MappingError::MalformedRow {
                        line: line_number,
                        reason: format!("FED {fed_id} assigned to S-Links {slink} and {slink_idx}"),
                    });
                }
                Some(_) => (),
                None => {
                    fed_to_slink.insert(fed_id, slink_idx as u32);
                }
            }

            let detid = if is_sipm {
                0
            } else {
                silicon_detector_id(zside > 0, plane, i1, i2, cell_type, 0, 0).raw()
            };

            row_lines.push(line_number);
            rows.push(ModuleInfo {
                valid: true,
                zside: zside > 0,
                is_sipm,
                is_high_density: mtype.is_high_density(),
                cell_type,
                plane,
                i1,
                i2,
                typecode,
                type_idx,
                fed_id,
                slink_idx,
                capture_block,
                capture_block_idx,
                econd_idx,
                n_erx: mtype.n_erx,
                erx_enable_bits: mtype.erx_enable_bits(),
                eleid: ElectronicsId::new(zside > 0, fed_id, capture_block, econd_idx, 0, 0),
                detid,
            });
        }

        if rows.is_empty() {
            return Err(MappingError::MalformedRow {
                line: 0,
                reason: String::from("module table has no rows"),
            });
        }

        let bounds = DenseBounds {
            fed_max: rows.iter().map(|m| m.fed_id as u32).max().unwrap_or(0) + 1,
            slink_max: rows.iter().map(|m| m.slink_idx as u32).max().unwrap_or(0) + 1,
            capture_block_max: rows
                .iter()
                .map(|m| m.capture_block_idx as u32)
                .max()
                .unwrap_or(0)
                + 1,
            capture_block_id_max: rows
                .iter()
                .map(|m| m.capture_block as u32)
                .max()
                .unwrap_or(0)
                + 1,
            econd_max: rows.iter().map(|m| m.econd_idx as u32).max().unwrap_or(0) + 1,
            erx_max: rows.iter().map(|m| m.n_erx).max().unwrap_or(0),
        };
        let indexer = DenseIndexer::new(DenseIndexConfig {
            slink_max: bounds.slink_max,
            slink_capture_block_max: bounds.capture_block_max,
            capture_block_econd_max: bounds.econd_max,
            econd_erx_max: bounds.erx_max,
            erx_channel_max: CHANNELS_PER_ERX,
            ..Default::default()
        })?;

        let mut modules = vec![ModuleInfo::default(); indexer.size(IndexLevel::Econd)];
        for (module, line_number) in rows.into_iter().zip(row_lines) {
            let address = HardwareAddress::new(
                module.slink_idx as u32,
                module.capture_block_idx as u32,
                module.econd_idx as u32,
                0,
                0,
            );
            let idx = indexer.dense_index(&address, IndexLevel::Econd)? as usize;
            if modules[idx].valid {
                return Err(MappingError::MalformedRow {
                    line: line_number,
                    reason: format!(
                        "duplicate module at FED {} capture block {} ECON-D {}",
                        module.fed_id, module.capture_block_idx, module.econd_idx
                    ),
                });
            }
            modules[idx] = module;
        }

        spdlog::debug!(
            "ModuleIndexer loaded {} modules into {} slots",
            modules.iter().filter(|m| m.valid).count(),
            modules.len()
        );

        Ok(Self {
            indexer,
            modules,
            fed_to_slink,
            bounds,
        })
    }

    /// Size of the dense module array
    pub fn max_index(&self) -> usize {
        self.modules.len()
    }

    pub fn dense_bounds(&self) -> DenseBounds {
        self.bounds
    }

    pub fn slink_for_fed(&self, fed_id: u16) -> Option<u32> {
        self.fed_to_slink.get(&fed_id).copied()
    }

    fn slot(&self, slink: u32, capture_block_idx: u32, econd_idx: u32) -> Option<usize> {
        let address = HardwareAddress::new(slink, capture_block_idx, econd_idx, 0, 0);
        let idx = self.indexer.dense_index(&address, IndexLevel::Econd).ok()? as usize;
        if self.modules[idx].valid {
            Some(idx)
        } else {
            None
        }
    }

    /// Dense index of the module at the given hardware coordinates
    pub fn index_for_hardware(
        &self,
        fed_id: u16,
        capture_block_idx: u8,
        econd_idx: u8,
    ) -> Result<usize, MappingError> {
        self.slink_for_fed(fed_id)
            .and_then(|slink| self.slot(slink, capture_block_idx as u32, econd_idx as u32))
            .ok_or_else(|| {
                MappingError::NotFound(format!(
                    "module at FED {fed_id} capture block {capture_block_idx} ECON-D {econd_idx}"
                ))
            })
    }

    pub fn module_for_hardware(
        &self,
        fed_id: u16,
        capture_block_idx: u8,
        econd_idx: u8,
    ) -> Option<&ModuleInfo> {
        self.index_for_hardware(fed_id, capture_block_idx, econd_idx)
            .ok()
            .map(|idx| &self.modules[idx])
    }

    pub fn module_for_slink(&self, slink: u32, capture_block_idx: u32, econd_idx: u32) -> Option<&ModuleInfo> {
        self.slot(slink, capture_block_idx, econd_idx)
            .map(|idx| &self.modules[idx])
    }

    /// Valid module at a dense index
    pub fn module(&self, idx: usize) -> Option<&ModuleInfo> {
        self.modules.get(idx).filter(|m| m.valid)
    }

    /// All valid modules with their dense index
    pub fn modules(&self) -> impl Iterator<Item = (usize, &ModuleInfo)> {
        self.modules.iter().enumerate().filter(|(_, m)| m.valid)
    }

    pub fn erx_enable_bits(&self, slink: u32, capture_block_idx: u32, econd_idx: u32) -> Option<u16> {
        self.module_for_slink(slink, capture_block_idx, econd_idx)
            .map(|m| m.erx_enable_bits)
    }

    /// Override the e-Rx enable pattern of one module
    pub fn set_erx_enable_bits(
        &mut self,
        fed_id: u16,
        capture_block_idx: u8,
        econd_idx: u8,
        bits: u16,
    ) -> Result<(), MappingError> {
        let idx = self.index_for_hardware(fed_id, capture_block_idx, econd_idx)?;
        self.modules[idx].erx_enable_bits = bits;
        Ok(())
    }
}
