//! Detector geometry identifiers and the translation from mapping-table coordinates.
//!
//! Both id flavours share the common detector word layout: detector in bits 31:28 and
//! sub-detector (always 0 for HGCAL) in bits 27:25. Silicon cells are addressed by layer, wafer
//! (u, v) and cell (u, v); scintillator tiles by layer, ring and phi.
use std::fmt::Display;

use super::constants::*;
use super::electronics_id::ElectronicsId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    HGCalEE,
    HGCalHSi,
    HGCalHSc,
}

impl DetectorKind {
    pub fn raw(&self) -> u32 {
        match self {
            DetectorKind::HGCalEE => DET_HGCAL_EE,
            DetectorKind::HGCalHSi => DET_HGCAL_HSI,
            DetectorKind::HGCalHSc => DET_HGCAL_HSC,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            DET_HGCAL_EE => Some(DetectorKind::HGCalEE),
            DET_HGCAL_HSI => Some(DetectorKind::HGCalHSi),
            DET_HGCAL_HSC => Some(DetectorKind::HGCalHSc),
            _ => None,
        }
    }

    /// Silicon planes up to 26 belong to the electromagnetic section
    pub fn for_silicon_plane(plane: u32) -> Self {
        if plane <= LAST_EE_PLANE {
            DetectorKind::HGCalEE
        } else {
            DetectorKind::HGCalHSi
        }
    }
}

// Sub-detector bits stay 0
fn detector_word(det: DetectorKind) -> u32 {
    (det.raw() & DETID_DET_MASK) << DETID_DET_SHIFT
}

fn detector_of(raw: u32) -> Option<DetectorKind> {
    DetectorKind::from_raw((raw >> DETID_DET_SHIFT) & DETID_DET_MASK)
}

fn signed_field(raw: u32, offset: u32, mask: u32, sign_offset: u32) -> i32 {
    let value = ((raw >> offset) & mask) as i32;
    if (raw >> sign_offset) & 0x1 == 1 {
        -value
    } else {
        value
    }
}

/// Id of a silicon cell (or of a module when the cell coordinates are zero)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiliconDetId(u32);

impl SiliconDetId {
    /// `zp < 0` marks the negative endcap
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        det: DetectorKind,
        zp: i32,
        cell_type: u8,
        layer: u32,
        wafer_u: i32,
        wafer_v: i32,
        cell_u: u32,
        cell_v: u32,
    ) -> Self {
        let raw = detector_word(det)
            | ((cell_type as u32 & SI_TYPE_MASK) << SI_TYPE_OFFSET)
            | (((zp < 0) as u32) << SI_ZSIDE_OFFSET)
            | ((layer & SI_LAYER_MASK) << SI_LAYER_OFFSET)
            | ((wafer_u.unsigned_abs() & SI_WAFER_MASK) << SI_WAFERU_OFFSET)
            | (((wafer_u < 0) as u32) << SI_WAFERU_SIGN_OFFSET)
            | ((wafer_v.unsigned_abs() & SI_WAFER_MASK) << SI_WAFERV_OFFSET)
            | (((wafer_v < 0) as u32) << SI_WAFERV_SIGN_OFFSET)
            | ((cell_v & SI_CELL_MASK) << SI_CELLV_OFFSET)
            | ((cell_u & SI_CELL_MASK) << SI_CELLU_OFFSET);
        Self(raw)
    }

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn detector(&self) -> Option<DetectorKind> {
        detector_of(self.0)
    }

    /// +1 or -1
    pub fn zside(&self) -> i32 {
        if (self.0 >> SI_ZSIDE_OFFSET) & 0x1 == 1 {
            -1
        } else {
            1
        }
    }

    pub fn cell_type(&self) -> u8 {
        ((self.0 >> SI_TYPE_OFFSET) & SI_TYPE_MASK) as u8
    }

    pub fn layer(&self) -> u32 {
        (self.0 >> SI_LAYER_OFFSET) & SI_LAYER_MASK
    }

    pub fn wafer_u(&self) -> i32 {
        signed_field(self.0, SI_WAFERU_OFFSET, SI_WAFER_MASK, SI_WAFERU_SIGN_OFFSET)
    }

    pub fn wafer_v(&self) -> i32 {
        signed_field(self.0, SI_WAFERV_OFFSET, SI_WAFER_MASK, SI_WAFERV_SIGN_OFFSET)
    }

    pub fn cell_u(&self) -> u32 {
        (self.0 >> SI_CELLU_OFFSET) & SI_CELL_MASK
    }

    pub fn cell_v(&self) -> u32 {
        (self.0 >> SI_CELLV_OFFSET) & SI_CELL_MASK
    }

    /// The same id with the cell coordinates cleared
    pub fn module_id(&self) -> SiliconDetId {
        SiliconDetId(self.0 & !SI_CELL_PART_MASK)
    }

    /// The cell coordinates alone, as stored in cell template tables
    pub fn cell_part(&self) -> u32 {
        self.0 & SI_CELL_PART_MASK
    }
}

impl Display for SiliconDetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:#010x} (det: {:?} z: {} type: {} layer: {} wafer: ({}, {}) cell: ({}, {}))",
            self.0,
            self.detector(),
            self.zside(),
            self.cell_type(),
            self.layer(),
            self.wafer_u(),
            self.wafer_v(),
            self.cell_u(),
            self.cell_v()
        )
    }
}

/// Id of a scintillator tile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScintillatorDetId(u32);

impl ScintillatorDetId {
    /// A negative ring marks the negative endcap
    pub fn new(cell_type: u8, layer: u32, ring: i32, iphi: u32, trigger: bool, sipm: u8) -> Self {
        let raw = detector_word(DetectorKind::HGCalHSc)
            | ((cell_type as u32 & SC_TYPE_MASK) << SC_TYPE_OFFSET)
            | (((ring < 0) as u32) << SC_ZSIDE_OFFSET)
            | (((sipm & 0x1) as u32) << SC_SIPM_OFFSET)
            | ((trigger as u32) << SC_TRIGGER_OFFSET)
            | ((layer & SC_LAYER_MASK) << SC_LAYER_OFFSET)
            | ((ring.unsigned_abs() & SC_RING_MASK) << SC_RING_OFFSET)
            | ((iphi & SC_PHI_MASK) << SC_PHI_OFFSET);
        Self(raw)
    }

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn detector(&self) -> Option<DetectorKind> {
        detector_of(self.0)
    }

    pub fn zside(&self) -> i32 {
        if (self.0 >> SC_ZSIDE_OFFSET) & 0x1 == 1 {
            -1
        } else {
            1
        }
    }

    pub fn cell_type(&self) -> u8 {
        ((self.0 >> SC_TYPE_OFFSET) & SC_TYPE_MASK) as u8
    }

    pub fn sipm(&self) -> u8 {
        ((self.0 >> SC_SIPM_OFFSET) & 0x1) as u8
    }

    pub fn trigger(&self) -> bool {
        (self.0 >> SC_TRIGGER_OFFSET) & 0x1 == 1
    }

    pub fn layer(&self) -> u32 {
        (self.0 >> SC_LAYER_OFFSET) & SC_LAYER_MASK
    }

    /// Signed ring, negative on the negative endcap
    pub fn ring(&self) -> i32 {
        self.zside() * ((self.0 >> SC_RING_OFFSET) & SC_RING_MASK) as i32
    }

    pub fn iphi(&self) -> u32 {
        (self.0 >> SC_PHI_OFFSET) & SC_PHI_MASK
    }
}

/// e-Rx of a HGCROC half
pub fn econd_erx(chip: u8, half: u8) -> u16 {
    chip as u16 * 2 + half as u16
}

pub fn electronics_id_for(
    zside: bool,
    fed_id: u16,
    capture_block: u8,
    econd_idx: u8,
    chip: u8,
    half: u8,
    seq: u8,
) -> ElectronicsId {
    ElectronicsId::new(
        zside,
        fed_id,
        capture_block,
        econd_idx,
        econd_erx(chip, half) as u8,
        seq,
    )
}

pub fn silicon_detector_id(
    zside: bool,
    plane: u32,
    wafer_u: i32,
    wafer_v: i32,
    cell_type: u8,
    cell_u: u32,
    cell_v: u32,
) -> SiliconDetId {
    let zp = if zside { 1 } else { -1 };
    SiliconDetId::new(
        DetectorKind::for_silicon_plane(plane),
        zp,
        cell_type,
        plane,
        wafer_u,
        wafer_v,
        cell_u,
        cell_v,
    )
}

/// Tiles are numbered from plane 26 on; the ring sign carries the side and phi counts 8 tiles
/// per module column starting at 1. The scintillator type is always 0 and the SiPM size is
/// taken from the cell type. Returns None for a plane in front of the scintillator or a
/// negative phi.
pub fn scintillator_detector_id(
    zside: bool,
    plane: u32,
    wafer_v: i32,
    cell_type: u8,
    cell_u: i32,
    cell_v: i32,
) -> Option<ScintillatorDetId> {
    let layer = u32::try_from(plane as i32 - SCINTILLATOR_LAYER_OFFSET).ok()?;
    let ring = if zside { cell_u } else { -cell_u };
    let iphi = u32::try_from(wafer_v * SC_PHI_PER_WAFER + cell_v + 1).ok()?;
    Some(ScintillatorDetId::new(0, layer, ring, iphi, false, cell_type))
}

/// Cell coordinates of a silicon cell as stored in a cell template table
pub fn silicon_cell_part(cell_u: u32, cell_v: u32) -> u32 {
    SiliconDetId::new(DetectorKind::HGCalEE, 0, 0, 0, 0, 0, cell_u, cell_v).cell_part()
}
