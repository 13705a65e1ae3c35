//! Dense indexing of the hierarchical readout address.
//!
//! The address (S-Link, capture block, ECON-D, e-Rx, channel) is treated as a mixed-radix
//! number whose digits are bounded by the capacities in [`DenseIndexConfig`]. Each coarser
//! level is a strict prefix of the full channel-level formula
//!
//! ```text
//! ((((slink * CB + cb) * ECOND + econd) * ERX + erx) * CH + ch)
//! ```
//!
//! so flat arrays can be allocated at any granularity with [`DenseIndexer::size`].
use serde::{Deserialize, Serialize};

use super::constants::*;
use super::electronics_id::ElectronicsId;
use super::error::DenseIndexError;

/// Capacity bounds for each level of the readout hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenseIndexConfig {
    pub max_feds_per_endcap: u32,
    pub slink_max: u32,
    pub slink_capture_block_max: u32,
    pub capture_block_econd_max: u32,
    pub econd_erx_max: u32,
    pub erx_channel_max: u32,
}

impl Default for DenseIndexConfig {
    fn default() -> Self {
        Self {
            max_feds_per_endcap: DEFAULT_MAX_FEDS_PER_ENDCAP,
            slink_max: DEFAULT_SLINK_MAX,
            slink_capture_block_max: DEFAULT_SLINK_CAPTURE_BLOCK_MAX,
            capture_block_econd_max: DEFAULT_CAPTURE_BLOCK_ECOND_MAX,
            econd_erx_max: DEFAULT_ECOND_ERX_MAX,
            erx_channel_max: DEFAULT_ERX_CHANNEL_MAX,
        }
    }
}

/// Granularity of a dense index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexLevel {
    SLink,
    CaptureBlock,
    Econd,
    ERx,
    Channel,
}

impl IndexLevel {
    fn depth(&self) -> usize {
        match self {
            IndexLevel::SLink => 1,
            IndexLevel::CaptureBlock => 2,
            IndexLevel::Econd => 3,
            IndexLevel::ERx => 4,
            IndexLevel::Channel => 5,
        }
    }
}

const LEVEL_NAMES: [&str; 5] = ["slink", "capture block", "econd", "erx", "channel"];
// Widths of the electronics id fields each level ends up in
const LEVEL_LIMITS: [u32; 5] = [
    FEDID_MASK + 1,
    CAPTUREBLOCK_MASK + 1,
    ECONDIDX_MASK + 1,
    ECONDERX_MASK + 1,
    HALFROCCHANNEL_MASK + 1,
];

/// A position in the readout hierarchy, in dense index coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HardwareAddress {
    pub slink: u32,
    pub capture_block: u32,
    pub econd: u32,
    pub erx: u32,
    pub channel: u32,
}

impl HardwareAddress {
    pub fn new(slink: u32, capture_block: u32, econd: u32, erx: u32, channel: u32) -> Self {
        Self {
            slink,
            capture_block,
            econd,
            erx,
            channel,
        }
    }

    /// The FED id field is used as the S-Link coordinate
    pub fn from_electronics_id(id: &ElectronicsId) -> Self {
        Self {
            slink: id.fed_id() as u32,
            capture_block: id.capture_block() as u32,
            econd: id.econd_idx() as u32,
            erx: id.econd_erx() as u32,
            channel: id.half_roc_channel() as u32,
        }
    }

    fn digits(&self) -> [u32; 5] {
        [
            self.slink,
            self.capture_block,
            self.econd,
            self.erx,
            self.channel,
        ]
    }
}

/// Validated mixed-radix indexer over the readout hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DenseIndexer {
    config: DenseIndexConfig,
    radices: [u32; 5],
}

impl DenseIndexer {
    /// Validates every capacity: non-zero and within its electronics id field. The widest
    /// accepted configuration spans 28 bits, so every index fits in a u32.
    pub fn new(config: DenseIndexConfig) -> Result<Self, DenseIndexError> {
        let radices = [
            config.slink_max,
            config.slink_capture_block_max,
            config.capture_block_econd_max,
            config.econd_erx_max,
            config.erx_channel_max,
        ];
        for (level, radix) in radices.iter().enumerate() {
            if *radix == 0 {
                return Err(DenseIndexError::ZeroCapacity(LEVEL_NAMES[level]));
            }
            if *radix > LEVEL_LIMITS[level] {
                return Err(DenseIndexError::CapacityTooWide {
                    level: LEVEL_NAMES[level],
                    value: *radix,
                    bits: LEVEL_LIMITS[level].trailing_zeros(),
                });
            }
        }
        Ok(Self { config, radices })
    }

    pub fn config(&self) -> &DenseIndexConfig {
        &self.config
    }

    /// Number of slots at the given level
    pub fn size(&self, level: IndexLevel) -> usize {
        self.radices[..level.depth()]
            .iter()
            .map(|r| *r as usize)
            .product()
    }

    pub fn dense_index(
        &self,
        address: &HardwareAddress,
        level: IndexLevel,
    ) -> Result<u32, DenseIndexError> {
        let digits = address.digits();
        let mut index: u32 = 0;
        for (depth, digit) in digits.iter().enumerate().take(level.depth()) {
            let radix = self.radices[depth];
            if *digit >= radix {
                return Err(DenseIndexError::OutOfRange {
                    level: LEVEL_NAMES[depth],
                    value: *digit,
                    max: radix,
                });
            }
            index = index * radix + digit;
        }
        Ok(index)
    }

    pub fn dense_index_for_id(
        &self,
        id: &ElectronicsId,
        level: IndexLevel,
    ) -> Result<u32, DenseIndexError> {
        self.dense_index(&HardwareAddress::from_electronics_id(id), level)
    }

    /// Exact left inverse of [`DenseIndexer::dense_index`] at the same level. Components finer
    /// than the level are zero.
    pub fn inverse(&self, index: u32, level: IndexLevel) -> Result<HardwareAddress, DenseIndexError> {
        let size = self.size(level);
        if index as usize >= size {
            return Err(DenseIndexError::OutOfRange {
                level: LEVEL_NAMES[level.depth() - 1],
                value: index,
                max: size as u32,
            });
        }
        let mut digits = [0u32; 5];
        let mut rest = index;
        for depth in (1..level.depth()).rev() {
            digits[depth] = rest % self.radices[depth];
            rest /= self.radices[depth];
        }
        digits[0] = rest;
        Ok(HardwareAddress::new(
            digits[0], digits[1], digits[2], digits[3], digits[4],
        ))
    }

    /// The endcap side is not part of the dense index. It is recovered from the S-Link number
    /// by comparing against the per-endcap FED count; a link exactly at the threshold is
    /// reported on the negative side.
    pub fn zside_for_slink(&self, slink: u32) -> bool {
        slink > self.config.max_feds_per_endcap
    }

    /// Rebuild a channel-level electronics id from its dense index
    pub fn inverse_electronics_id(&self, index: u32) -> Result<ElectronicsId, DenseIndexError> {
        let addr = self.inverse(index, IndexLevel::Channel)?;
        Ok(ElectronicsId::new(
            self.zside_for_slink(addr.slink),
            addr.slink as u16,
            addr.capture_block as u8,
            addr.econd as u8,
            addr.erx as u8,
            addr.channel as u8,
        ))
    }
}

/// Capacities implied by a loaded module table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DenseBounds {
    pub fed_max: u32,
    pub slink_max: u32,
    /// Bound on the capture block ordinal within an S-Link
    pub capture_block_max: u32,
    /// Bound on the capture block number carried by electronics ids
    pub capture_block_id_max: u32,
    pub econd_max: u32,
    pub erx_max: u32,
}

/// Dense storage index for calibration parameters.
///
/// Channel-level arrays use [`CalibrationParameterIndex::dense_map`], ROC-level arrays (one
/// slot per e-Rx) use [`CalibrationParameterIndex::dense_roc_map`]. The S-Link coordinate is the
/// FED id field of the electronics id. The channel capacity includes the common-mode slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationParameterIndex {
    pub event_slink_max: u32,
    pub slink_capture_block_max: u32,
    pub capture_block_econd_max: u32,
    pub econd_erx_max: u32,
    pub erx_channel_max: u32,
}

impl Default for CalibrationParameterIndex {
    fn default() -> Self {
        Self {
            event_slink_max: DEFAULT_SLINK_MAX,
            slink_capture_block_max: DEFAULT_SLINK_CAPTURE_BLOCK_MAX,
            capture_block_econd_max: DEFAULT_CAPTURE_BLOCK_ECOND_MAX,
            econd_erx_max: DEFAULT_ECOND_ERX_MAX,
            erx_channel_max: DEFAULT_ERX_CHANNEL_MAX,
        }
    }
}

impl CalibrationParameterIndex {
    pub fn from_module_bounds(bounds: &DenseBounds, common_modes: u32) -> Self {
        Self {
            event_slink_max: bounds.fed_max,
            slink_capture_block_max: bounds.capture_block_id_max,
            capture_block_econd_max: bounds.econd_max,
            econd_erx_max: bounds.erx_max,
            erx_channel_max: CHANNELS_PER_ERX + common_modes,
        }
    }

    /// Fixed capacities instead of the ones observed in a module table
    pub fn from_dense_config(config: &DenseIndexConfig, common_modes: u32) -> Self {
        Self {
            event_slink_max: config.slink_max,
            slink_capture_block_max: config.slink_capture_block_max,
            capture_block_econd_max: config.capture_block_econd_max,
            econd_erx_max: config.econd_erx_max,
            erx_channel_max: config.erx_channel_max + common_modes,
        }
    }

    fn roc_index(&self, id: &ElectronicsId) -> Option<u32> {
        let addr = HardwareAddress::from_electronics_id(id);
        if addr.slink >= self.event_slink_max
            || addr.capture_block >= self.slink_capture_block_max
            || addr.econd >= self.capture_block_econd_max
            || addr.erx >= self.econd_erx_max
        {
            return None;
        }
        let mut index = addr.slink * self.slink_capture_block_max + addr.capture_block;
        index = index * self.capture_block_econd_max + addr.econd;
        Some(index * self.econd_erx_max + addr.erx)
    }

    /// Channel-level slot, None if the id lies outside the capacities
    pub fn dense_map(&self, id: &ElectronicsId) -> Option<usize> {
        let channel = id.half_roc_channel() as u32;
        if channel >= self.erx_channel_max {
            return None;
        }
        self.roc_index(id)
            .map(|roc| roc as usize * self.erx_channel_max as usize + channel as usize)
    }

    /// e-Rx (ROC half) level slot
    pub fn dense_roc_map(&self, id: &ElectronicsId) -> Option<usize> {
        self.roc_index(id).map(|roc| roc as usize)
    }

    pub fn size(&self, roc_level: bool) -> usize {
        let size = self.event_slink_max as usize
            * self.slink_capture_block_max as usize
            * self.capture_block_econd_max as usize
            * self.econd_erx_max as usize;
        if roc_level {
            size
        } else {
            size * self.erx_channel_max as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn small_config() -> DenseIndexConfig {
        DenseIndexConfig {
            max_feds_per_endcap: 2,
            slink_max: 4,
            slink_capture_block_max: 3,
            capture_block_econd_max: 2,
            econd_erx_max: 3,
            erx_channel_max: 5,
        }
    }

    #[test]
    fn test_defaults() {
        let indexer = DenseIndexer::new(DenseIndexConfig::default()).unwrap();
        assert_eq!(indexer.size(IndexLevel::SLink), 1000);
        assert_eq!(indexer.size(IndexLevel::Channel), 1000 * 10 * 12 * 12 * 37);
        let addr = HardwareAddress::new(1, 2, 3, 4, 5);
        let expected = (((1 * 10 + 2) * 12 + 3) * 12 + 4) * 37 + 5;
        assert_eq!(
            indexer.dense_index(&addr, IndexLevel::Channel).unwrap(),
            expected
        );
        assert_eq!(
            indexer.dense_index(&addr, IndexLevel::Econd).unwrap(),
            (1 * 10 + 2) * 12 + 3
        );
    }

    #[test]
    fn test_injective_and_inverse() {
        let indexer = DenseIndexer::new(small_config()).unwrap();
        let mut seen = HashSet::new();
        for slink in 0..4 {
            for cb in 0..3 {
                for econd in 0..2 {
                    for erx in 0..3 {
                        for ch in 0..5 {
                            let addr = HardwareAddress::new(slink, cb, econd, erx, ch);
                            let idx = indexer.dense_index(&addr, IndexLevel::Channel).unwrap();
                            assert!((idx as usize) < indexer.size(IndexLevel::Channel));
                            assert!(seen.insert(idx));
                            assert_eq!(indexer.inverse(idx, IndexLevel::Channel).unwrap(), addr);
                        }
                    }
                }
            }
        }
        assert_eq!(seen.len(), indexer.size(IndexLevel::Channel));
    }

    #[test]
    fn test_prefix_levels() {
        let indexer = DenseIndexer::new(small_config()).unwrap();
        let addr = HardwareAddress::new(3, 1, 1, 2, 4);
        let erx = indexer.dense_index(&addr, IndexLevel::ERx).unwrap();
        let ch = indexer.dense_index(&addr, IndexLevel::Channel).unwrap();
        assert_eq!(ch, erx * 5 + 4);
        let back = indexer.inverse(erx, IndexLevel::ERx).unwrap();
        assert_eq!(back, HardwareAddress::new(3, 1, 1, 2, 0));
    }

    #[test]
    fn test_out_of_range() {
        let indexer = DenseIndexer::new(small_config()).unwrap();
        let addr = HardwareAddress::new(0, 3, 0, 0, 0);
        assert_eq!(
            indexer.dense_index(&addr, IndexLevel::Channel),
            Err(DenseIndexError::OutOfRange {
                level: "capture block",
                value: 3,
                max: 3
            })
        );
        // Components below the requested level are not checked
        assert!(indexer.dense_index(&addr, IndexLevel::SLink).is_ok());
        assert!(indexer
            .inverse(indexer.size(IndexLevel::Econd) as u32, IndexLevel::Econd)
            .is_err());
    }

    #[test]
    fn test_bad_configs() {
        let mut config = small_config();
        config.econd_erx_max = 0;
        assert_eq!(
            DenseIndexer::new(config),
            Err(DenseIndexError::ZeroCapacity("erx"))
        );
        let mut config = small_config();
        config.erx_channel_max = 65;
        assert!(matches!(
            DenseIndexer::new(config),
            Err(DenseIndexError::CapacityTooWide { bits: 6, .. })
        ));
        let config = DenseIndexConfig {
            max_feds_per_endcap: 512,
            slink_max: 1024,
            slink_capture_block_max: 16,
            capture_block_econd_max: 16,
            econd_erx_max: 16,
            erx_channel_max: 64,
        };
        let widest = DenseIndexer::new(config).unwrap();
        assert_eq!(widest.size(IndexLevel::Channel), 1 << 28);
    }

    #[test]
    fn test_zside_recovery() {
        let indexer = DenseIndexer::new(small_config()).unwrap();
        let id = ElectronicsId::new(false, 1, 2, 1, 2, 3);
        let idx = indexer
            .dense_index_for_id(&id, IndexLevel::Channel)
            .unwrap();
        assert_eq!(indexer.inverse_electronics_id(idx).unwrap(), id);

        // Above the per-endcap count the link is placed on the positive side
        let id = ElectronicsId::new(false, 3, 0, 0, 0, 0);
        let idx = indexer
            .dense_index_for_id(&id, IndexLevel::Channel)
            .unwrap();
        let back = indexer.inverse_electronics_id(idx).unwrap();
        assert!(back.zside());
        assert_eq!(back.fed_id(), 3);
        // A link exactly at the threshold stays on the negative side
        assert!(!indexer.zside_for_slink(2));
    }

    #[test]
    fn test_calibration_index() {
        let bounds = DenseBounds {
            fed_max: 2,
            slink_max: 2,
            capture_block_max: 1,
            capture_block_id_max: 1,
            econd_max: 3,
            erx_max: 12,
        };
        let index = CalibrationParameterIndex::from_module_bounds(&bounds, 2);
        assert_eq!(index.erx_channel_max, 39);
        assert_eq!(index.size(true), 2 * 1 * 3 * 12);
        assert_eq!(index.size(false), 2 * 1 * 3 * 12 * 39);

        let id = ElectronicsId::new(false, 1, 0, 2, 11, 38);
        let roc = index.dense_roc_map(&id).unwrap();
        assert_eq!(roc, (1 * 3 + 2) * 12 + 11);
        assert_eq!(index.dense_map(&id).unwrap(), roc * 39 + 38);
        assert_eq!(index.dense_map(&id).unwrap(), index.size(false) - 1);
        assert!(index
            .dense_map(&ElectronicsId::new(false, 2, 0, 0, 0, 0))
            .is_none());

        let fixed = CalibrationParameterIndex::from_dense_config(&DenseIndexConfig::default(), 2);
        assert_eq!(fixed.erx_channel_max, 39);
        assert_eq!(fixed.event_slink_max, DEFAULT_SLINK_MAX);
        assert!(fixed.dense_map(&ElectronicsId::new(true, 999, 9, 11, 11, 38)).is_some());
    }
}
