use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use super::cell_map::CellIndexer;
use super::dense_index::CalibrationParameterIndex;
use super::detector_id::SiliconDetId;
use super::electronics_id::ElectronicsId;
use super::error::MappingError;
use super::module_map::ModuleIndexer;

/// ElectronicsMapping bundles everything loaded from the mapping tables. It is immutable once
/// built; a new table set produces a new mapping.
#[derive(Debug, Clone)]
pub struct ElectronicsMapping {
    pub modules: ModuleIndexer,
    pub cells: CellIndexer,
    pub calibration_index: CalibrationParameterIndex,
}

impl ElectronicsMapping {
    pub fn new(modules: ModuleIndexer, cells: CellIndexer) -> Self {
        let calibration_index = CalibrationParameterIndex::from_module_bounds(
            &modules.dense_bounds(),
            super::constants::COMMON_MODES_PER_ERX,
        );
        Self {
            modules,
            cells,
            calibration_index,
        }
    }

    pub fn load(module_path: &Path, cell_paths: &[PathBuf]) -> Result<Self, MappingError> {
        let modules = ModuleIndexer::new(module_path)?;
        let cells = CellIndexer::new(cell_paths)?;
        Ok(Self::new(modules, cells))
    }

    pub fn parse(module_table: &str, cell_tables: &[&str]) -> Result<Self, MappingError> {
        let modules = ModuleIndexer::parse(module_table)?;
        let mut cells = CellIndexer::default();
        for table in cell_tables {
            cells.parse(table)?;
        }
        Ok(Self::new(modules, cells))
    }

    /// Match a silicon cell id to its module (by module id) and then to a cell of the same
    /// module type (by cell coordinates). The cell index is None when only the module matched.
    pub fn module_cell_indices_for_si_cell(
        &self,
        detid: SiliconDetId,
    ) -> Option<(usize, Option<usize>)> {
        let module_id = detid.module_id().raw();
        let (module_idx, module) = self
            .modules
            .modules()
            .find(|(_, m)| !m.is_sipm && m.detid == module_id)?;
        let cell_part = detid.cell_part();
        let cell_idx = self
            .cells
            .cells_for_type(module.type_idx)
            .find(|(_, c)| c.detid == cell_part)
            .map(|(idx, _)| idx);
        Some((module_idx, cell_idx))
    }

    /// Electronics id of a silicon cell, or the zero id when the module or the cell is unknown
    pub fn electronics_id_for_si_cell(&self, detid: SiliconDetId) -> ElectronicsId {
        match self.module_cell_indices_for_si_cell(detid) {
            Some((module_idx, Some(cell_idx))) => {
                match (self.modules.module(module_idx), self.cells.cell(cell_idx)) {
                    (Some(module), Some(cell)) => {
                        ElectronicsId::from_raw(module.eleid.raw() + cell.eleid.raw())
                    }
                    _ => ElectronicsId::default(),
                }
            }
            _ => ElectronicsId::default(),
        }
    }

    /// Silicon detector id of a channel, or None for unknown channels and tiles
    pub fn si_cell_for_electronics_id(&self, id: ElectronicsId) -> Option<SiliconDetId> {
        let module = self
            .modules
            .modules()
            .map(|(_, m)| m)
            .find(|m| m.eleid.econd_raw_id() == id.econd_raw_id())?;
        if module.is_sipm {
            return None;
        }
        let erx = id.econd_erx();
        let cell = self
            .cells
            .cells_for_type(module.type_idx)
            .map(|(_, c)| c)
            .find(|c| c.eleid.econd_erx() == erx && c.seq == id.half_roc_channel())?;
        Some(SiliconDetId::from_raw(module.detid | cell.detid))
    }
}

/// Shared holder of the current mapping. Readers take an `Arc` snapshot that stays valid while
/// a reload builds and swaps in a complete replacement.
#[derive(Debug)]
pub struct MappingStore {
    current: RwLock<Arc<ElectronicsMapping>>,
}

impl MappingStore {
    pub fn new(mapping: ElectronicsMapping) -> Self {
        Self {
            current: RwLock::new(Arc::new(mapping)),
        }
    }

    pub fn snapshot(&self) -> Result<Arc<ElectronicsMapping>, MappingError> {
        self.current
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| MappingError::Poisoned)
    }

    pub fn replace(&self, mapping: ElectronicsMapping) -> Result<(), MappingError> {
        let mut guard = self.current.write().map_err(|_| MappingError::Poisoned)?;
        *guard = Arc::new(mapping);
        Ok(())
    }

    /// Rebuild from the given tables. On failure the previous mapping stays in place.
    pub fn reload(&self, module_path: &Path, cell_paths: &[PathBuf]) -> Result<(), MappingError> {
        let mapping = ElectronicsMapping::load(module_path, cell_paths)?;
        self.replace(mapping)?;
        spdlog::info!("Reloaded electronics mapping from {}", module_path.display());
        Ok(())
    }
}
