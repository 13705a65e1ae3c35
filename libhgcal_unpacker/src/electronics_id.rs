use std::fmt::Display;

use super::constants::*;

/// ElectronicsId is the packed hardware address of a readout channel.
///
/// The address is hierarchical: endcap side, FED (one S-Link), capture block, ECON-D,
/// e-Rx (one HGCROC half), and channel within the half. Every field has a fixed width inside the
/// 32 bit raw word, so packing and unpacking are exact inverses for in-range values. Values wider
/// than their field are truncated to the field width when packing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElectronicsId(u32);

impl ElectronicsId {
    pub fn new(
        zside: bool,
        fed_id: u16,
        capture_block: u8,
        econd_idx: u8,
        econd_erx: u8,
        half_roc_channel: u8,
    ) -> Self {
        let raw = ((zside as u32 & ZSIDE_MASK) << ZSIDE_SHIFT)
            | ((fed_id as u32 & FEDID_MASK) << FEDID_SHIFT)
            | ((capture_block as u32 & CAPTUREBLOCK_MASK) << CAPTUREBLOCK_SHIFT)
            | ((econd_idx as u32 & ECONDIDX_MASK) << ECONDIDX_SHIFT)
            | ((econd_erx as u32 & ECONDERX_MASK) << ECONDERX_SHIFT)
            | ((half_roc_channel as u32 & HALFROCCHANNEL_MASK) << HALFROCCHANNEL_SHIFT);
        Self(raw)
    }

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn zside(&self) -> bool {
        (self.0 >> ZSIDE_SHIFT) & ZSIDE_MASK == 1
    }

    pub fn fed_id(&self) -> u16 {
        ((self.0 >> FEDID_SHIFT) & FEDID_MASK) as u16
    }

    pub fn capture_block(&self) -> u8 {
        ((self.0 >> CAPTUREBLOCK_SHIFT) & CAPTUREBLOCK_MASK) as u8
    }

    pub fn econd_idx(&self) -> u8 {
        ((self.0 >> ECONDIDX_SHIFT) & ECONDIDX_MASK) as u8
    }

    pub fn econd_erx(&self) -> u8 {
        ((self.0 >> ECONDERX_SHIFT) & ECONDERX_MASK) as u8
    }

    pub fn half_roc_channel(&self) -> u8 {
        ((self.0 >> HALFROCCHANNEL_SHIFT) & HALFROCCHANNEL_MASK) as u8
    }

    /// The HGCROC this e-Rx belongs to
    pub fn roc(&self) -> u8 {
        self.econd_erx() / 2
    }

    /// Which half of the HGCROC this e-Rx reads out
    pub fn half(&self) -> u8 {
        self.econd_erx() % 2
    }

    /// Channels 37 and 38 of an e-Rx carry its two common-mode values
    pub fn is_common_mode(&self) -> bool {
        let ch = self.half_roc_channel() as u32;
        (CHANNELS_PER_ERX..CHANNELS_PER_ERX + COMMON_MODES_PER_ERX).contains(&ch)
    }

    /// The ECON-D level id, used as the key of per-module configuration
    pub fn econd_raw_id(&self) -> u32 {
        self.0 & !((ECONDERX_MASK << ECONDERX_SHIFT) | (HALFROCCHANNEL_MASK << HALFROCCHANNEL_SHIFT))
    }

    /// The e-Rx level id (channel bits cleared)
    pub fn erx_raw_id(&self) -> u32 {
        self.0 & !(HALFROCCHANNEL_MASK << HALFROCCHANNEL_SHIFT)
    }

    /// Same address with a different channel
    pub fn with_channel(&self, half_roc_channel: u8) -> Self {
        Self(
            self.erx_raw_id()
                | ((half_roc_channel as u32 & HALFROCCHANNEL_MASK) << HALFROCCHANNEL_SHIFT),
        )
    }

    /// First channel of another e-Rx of the same ECON-D
    pub fn with_erx(&self, econd_erx: u8) -> Self {
        Self(self.econd_raw_id() | ((econd_erx as u32 & ECONDERX_MASK) << ECONDERX_SHIFT))
    }
}

impl From<u32> for ElectronicsId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<ElectronicsId> for u32 {
    fn from(value: ElectronicsId) -> Self {
        value.0
    }
}

impl Display for ElectronicsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:#010x} (zside: {} fed: {} cb: {} econd: {} erx: {} ch: {})",
            self.0,
            self.zside(),
            self.fed_id(),
            self.capture_block(),
            self.econd_idx(),
            self.econd_erx(),
            self.half_roc_channel()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        for zside in [false, true] {
            for fed in [0u16, 1, 511, 513, 1023] {
                for cb in [0u8, 7, 15] {
                    for econd in [0u8, 11, 15] {
                        for erx in [0u8, 5, 11] {
                            for ch in [0u8, 18, 36, 38, 63] {
                                let id = ElectronicsId::new(zside, fed, cb, econd, erx, ch);
                                assert_eq!(id.zside(), zside);
                                assert_eq!(id.fed_id(), fed);
                                assert_eq!(id.capture_block(), cb);
                                assert_eq!(id.econd_idx(), econd);
                                assert_eq!(id.econd_erx(), erx);
                                assert_eq!(id.half_roc_channel(), ch);
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_known_layout() {
        let id = ElectronicsId::new(true, 3, 2, 1, 5, 7);
        let expected = (1 << 28) | (3 << 18) | (2 << 14) | (1 << 10) | (5 << 6) | 7;
        assert_eq!(id.raw(), expected);
        assert_eq!(id.roc(), 2);
        assert_eq!(id.half(), 1);
        assert_eq!(id.econd_raw_id(), expected & !0x3ff);
        assert_eq!(id.erx_raw_id(), expected & !0x3f);
    }

    #[test]
    fn test_wide_values_do_not_leak() {
        let id = ElectronicsId::new(false, 0, 0x1f, 0, 0, 0);
        assert_eq!(id.capture_block(), 0xf);
        assert_eq!(id.econd_idx(), 0);
    }

    #[test]
    fn test_common_mode_channels() {
        let id = ElectronicsId::new(false, 0, 0, 0, 0, 36);
        assert!(!id.is_common_mode());
        assert!(id.with_channel(37).is_common_mode());
        assert!(id.with_channel(38).is_common_mode());
        assert!(!id.with_channel(39).is_common_mode());
    }

    #[test]
    fn test_with_erx() {
        let id = ElectronicsId::new(true, 12, 3, 4, 7, 20);
        assert_eq!(id.with_erx(2), ElectronicsId::new(true, 12, 3, 4, 2, 0));
    }
}
