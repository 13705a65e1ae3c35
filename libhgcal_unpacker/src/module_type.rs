use super::error::MappingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Density {
    Low,
    High,
    SiPM,
}

/// A module flavour as identified by the first four characters of its type code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleType {
    pub prefix: &'static str,
    pub density: Density,
    pub n_erx: u32,
    /// 0 for full wafers, >0 for the partial shapes
    pub wafer_type: u8,
}

impl ModuleType {
    pub fn is_sipm(&self) -> bool {
        self.density == Density::SiPM
    }

    pub fn is_high_density(&self) -> bool {
        self.density == Density::High
    }

    /// Default e-Rx enable pattern: every e-Rx of the module read out
    pub fn erx_enable_bits(&self) -> u16 {
        ((1u32 << self.n_erx) - 1) as u16
    }
}

/// Every module flavour known to the mapping. The position in this table is the type index
/// stored in module and cell entries.
#[rustfmt::skip]
pub const MODULE_TYPES: [ModuleType; 13] = [
    ModuleType { prefix: "ML-F", density: Density::Low, n_erx: 6, wafer_type: 0 },
    ModuleType { prefix: "ML-T", density: Density::Low, n_erx: 6, wafer_type: 1 },
    ModuleType { prefix: "ML-B", density: Density::Low, n_erx: 6, wafer_type: 2 },
    ModuleType { prefix: "ML-L", density: Density::Low, n_erx: 6, wafer_type: 3 },
    ModuleType { prefix: "ML-R", density: Density::Low, n_erx: 6, wafer_type: 4 },
    ModuleType { prefix: "ML-5", density: Density::Low, n_erx: 6, wafer_type: 5 },
    ModuleType { prefix: "MH-F", density: Density::High, n_erx: 12, wafer_type: 0 },
    ModuleType { prefix: "MH-T", density: Density::High, n_erx: 12, wafer_type: 1 },
    ModuleType { prefix: "MH-B", density: Density::High, n_erx: 12, wafer_type: 2 },
    ModuleType { prefix: "MH-L", density: Density::High, n_erx: 12, wafer_type: 3 },
    ModuleType { prefix: "MH-R", density: Density::High, n_erx: 12, wafer_type: 4 },
    ModuleType { prefix: "TM-N", density: Density::SiPM, n_erx: 4, wafer_type: 0 },
    ModuleType { prefix: "TM-K", density: Density::SiPM, n_erx: 4, wafer_type: 0 },
];

/// Index of the module type matching the start of a type code
pub fn type_index(typecode: &str) -> Result<usize, MappingError> {
    MODULE_TYPES
        .iter()
        .position(|t| typecode.starts_with(t.prefix))
        .ok_or_else(|| MappingError::UnknownTypeCode(typecode.to_string()))
}

pub fn module_type(typecode: &str) -> Result<&'static ModuleType, MappingError> {
    Ok(&MODULE_TYPES[type_index(typecode)?])
}

/// Decode a type code into (is SiPM, cell type).
///
/// Silicon codes carry the density in the second character and the sensor thickness in the
/// fifth, e.g. `ML-F3PT-TX-0003`. Tile modules always have cell type 0.
pub fn convert_type_code(typecode: &str) -> Result<(bool, u8), MappingError> {
    if typecode.contains("TM") {
        return Ok((true, 0));
    }
    let bytes = typecode.as_bytes();
    if bytes.len() < 5 {
        return Err(MappingError::UnknownTypeCode(typecode.to_string()));
    }
    match (bytes[1], bytes[4]) {
        (b'H', b'1') => Ok((false, 0)),
        (b'L', b'2') => Ok((false, 1)),
        (b'L', b'3') => Ok((false, 2)),
        (b'H', b'2') => Ok((false, 3)),
        _ => Err(MappingError::UnknownTypeCode(typecode.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_lookup() {
        assert_eq!(type_index("ML-F3PT-TX-0003").unwrap(), 0);
        assert_eq!(type_index("MH-F").unwrap(), 6);
        let tile = module_type("TM-N2").unwrap();
        assert!(tile.is_sipm());
        assert!(matches!(
            type_index("XX-F"),
            Err(MappingError::UnknownTypeCode(_))
        ));
    }

    #[test]
    fn test_enable_bits() {
        assert_eq!(module_type("ML-L").unwrap().erx_enable_bits(), 0x3f);
        assert_eq!(module_type("MH-F").unwrap().erx_enable_bits(), 0xfff);
    }

    #[test]
    fn test_convert_type_code() {
        assert_eq!(convert_type_code("MH-F1").unwrap(), (false, 0));
        assert_eq!(convert_type_code("ML-F2XX").unwrap(), (false, 1));
        assert_eq!(convert_type_code("ML-F3PT-TX-0003").unwrap(), (false, 2));
        assert_eq!(convert_type_code("MH-R2").unwrap(), (false, 3));
        assert_eq!(convert_type_code("TM-N").unwrap(), (true, 0));
        assert!(convert_type_code("ML-F1").is_err());
        assert!(convert_type_code("ML").is_err());
    }
}
