// Electronics id bit layout
pub const ZSIDE_SHIFT: u32 = 28;
pub const ZSIDE_MASK: u32 = 0x1;
pub const FEDID_SHIFT: u32 = 18;
pub const FEDID_MASK: u32 = 0x3ff;
pub const CAPTUREBLOCK_SHIFT: u32 = 14;
pub const CAPTUREBLOCK_MASK: u32 = 0xf;
pub const ECONDIDX_SHIFT: u32 = 10;
pub const ECONDIDX_MASK: u32 = 0xf;
pub const ECONDERX_SHIFT: u32 = 6;
pub const ECONDERX_MASK: u32 = 0xf;
pub const HALFROCCHANNEL_SHIFT: u32 = 0;
pub const HALFROCCHANNEL_MASK: u32 = 0x3f;

// Channels per e-Rx, and the two common-mode slots that follow them
pub const CHANNELS_PER_ERX: u32 = 37;
pub const COMMON_MODES_PER_ERX: u32 = 2;
pub const CALIB_CHANNEL: u32 = 18;

// Dense index defaults
pub const DEFAULT_MAX_FEDS_PER_ENDCAP: u32 = 512;
pub const DEFAULT_SLINK_MAX: u32 = 1000;
pub const DEFAULT_SLINK_CAPTURE_BLOCK_MAX: u32 = 10;
pub const DEFAULT_CAPTURE_BLOCK_ECOND_MAX: u32 = 12;
pub const DEFAULT_ECOND_ERX_MAX: u32 = 12;
pub const DEFAULT_ERX_CHANNEL_MAX: u32 = CHANNELS_PER_ERX;

// DetId layout shared by every HGCAL id
pub const DETID_DET_SHIFT: u32 = 28;
pub const DETID_DET_MASK: u32 = 0xf;
pub const DET_HGCAL_EE: u32 = 8;
pub const DET_HGCAL_HSI: u32 = 9;
pub const DET_HGCAL_HSC: u32 = 10;
pub const LAST_EE_PLANE: u32 = 26;
pub const SCINTILLATOR_LAYER_OFFSET: i32 = 25;

// Silicon id layout
pub const SI_CELLU_OFFSET: u32 = 0;
pub const SI_CELLV_OFFSET: u32 = 5;
pub const SI_CELL_MASK: u32 = 0x1f;
pub const SI_WAFERU_OFFSET: u32 = 10;
pub const SI_WAFERU_SIGN_OFFSET: u32 = 14;
pub const SI_WAFERV_OFFSET: u32 = 15;
pub const SI_WAFERV_SIGN_OFFSET: u32 = 19;
pub const SI_WAFER_MASK: u32 = 0xf;
pub const SI_LAYER_OFFSET: u32 = 20;
pub const SI_LAYER_MASK: u32 = 0x1f;
pub const SI_ZSIDE_OFFSET: u32 = 25;
pub const SI_TYPE_OFFSET: u32 = 26;
pub const SI_TYPE_MASK: u32 = 0x3;
pub const SI_CELL_PART_MASK: u32 = 0x3ff;

// Scintillator id layout
pub const SC_PHI_OFFSET: u32 = 0;
pub const SC_PHI_MASK: u32 = 0x1ff;
pub const SC_RING_OFFSET: u32 = 9;
pub const SC_RING_MASK: u32 = 0xff;
pub const SC_LAYER_OFFSET: u32 = 17;
pub const SC_LAYER_MASK: u32 = 0x1f;
pub const SC_TRIGGER_OFFSET: u32 = 22;
pub const SC_SIPM_OFFSET: u32 = 23;
pub const SC_ZSIDE_OFFSET: u32 = 25;
pub const SC_TYPE_OFFSET: u32 = 26;
pub const SC_TYPE_MASK: u32 = 0x3;
pub const SC_PHI_PER_WAFER: i32 = 8;

// S-Link framing
pub const SLINK_HEADER_WORDS: usize = 4;
pub const SLINK_TRAILER_WORDS: usize = 4;
pub const SLINK_MARKER_SHIFT: u32 = 24;
pub const SLINK_MARKER_MASK: u32 = 0xff;
pub const SLINK_SOURCE_ID_MASK: u32 = 0xffff;
pub const DEFAULT_SLINK_BOE: u32 = 0x55;
pub const DEFAULT_SLINK_EOE: u32 = 0xaa;

// Capture block header, as a 64 bit value
pub const CB_HEADER_WORDS: usize = 2;
pub const CB_MARKER_SHIFT: u32 = 25;
pub const CB_MARKER_MASK: u32 = 0x7f;
pub const CB_BX_SHIFT: u32 = 45;
pub const CB_BX_MASK: u64 = 0xfff;
pub const CB_EVENT_SHIFT: u32 = 38;
pub const CB_EVENT_MASK: u64 = 0x7f;
pub const CB_ORBIT_SHIFT: u32 = 36;
pub const CB_ORBIT_MASK: u64 = 0x3;
pub const CB_STATUS_BITS: u32 = 3;
pub const CB_STATUS_MASK: u64 = 0x7;
pub const CB_STATUS_NORMAL: u8 = 0b000;
pub const CB_STATUS_ABSENT: u8 = 0b111;
pub const CB_MAX_ECONDS: u32 = 12;
pub const DEFAULT_CB_HEADER_MARKER: u32 = 0x5f;

// ECON-D header
pub const ECOND_HEADER_WORDS: usize = 2;
pub const ECOND_MARKER_SHIFT: u32 = 23;
pub const ECOND_MARKER_MASK: u32 = 0x1ff;
pub const ECOND_LENGTH_SHIFT: u32 = 14;
pub const ECOND_LENGTH_MASK: u32 = 0x1ff;
pub const ECOND_TRUNCATED_SHIFT: u32 = 6;
pub const ECOND_BX_SHIFT: u32 = 20;
pub const ECOND_BX_MASK: u32 = 0xfff;
pub const ECOND_L1A_SHIFT: u32 = 14;
pub const ECOND_L1A_MASK: u32 = 0x3f;
pub const ECOND_ORBIT_SHIFT: u32 = 11;
pub const ECOND_ORBIT_MASK: u32 = 0x7;
pub const DEFAULT_ECOND_HEADER_MARKER: u32 = 0x154;
pub const DEFAULT_PAYLOAD_LENGTH_MAX: u32 = 469;
pub const DEFAULT_NUM_ERXS_IN_ECOND: u32 = 12;

// e-Rx sub-packet header
pub const ERX_STATUS_SHIFT: u32 = 29;
pub const ERX_STATUS_MASK: u32 = 0x7;
pub const ERX_EMPTY_SHIFT: u32 = 25;
pub const ERX_CM0_SHIFT: u32 = 15;
pub const ERX_CM1_SHIFT: u32 = 5;
pub const ERX_CM_MASK: u32 = 0x3ff;
pub const ERX_MAP_HIGH_MASK: u32 = 0x1f;

// Channel word
pub const CH_TCTP_SHIFT: u32 = 30;
pub const CH_TCTP_MASK: u32 = 0x3;
pub const CH_FIELD0_SHIFT: u32 = 20;
pub const CH_FIELD1_SHIFT: u32 = 10;
pub const CH_FIELD2_SHIFT: u32 = 0;
pub const CH_FIELD_MASK: u32 = 0x3ff;
pub const TCTP_TOT_THRESHOLD: u8 = 2;
pub const TCTP_TOT_SATURATED: u8 = 3;

// Unpacking quality flags
pub const FLAG_CHAR_MODE: u16 = 0x1;
pub const FLAG_CALIB_FIXUP: u16 = 0x2;
pub const FLAG_ERX_STATUS: u16 = 0x4;
pub const FLAG_TOT_SATURATED: u16 = 0x8;

// Unpacker ceilings
pub const DEFAULT_FLAGGED_ECOND_MAX: u32 = 200;
pub const DEFAULT_CHANNEL_MAX: u32 = 7_000_000;
pub const DEFAULT_COMMON_MODE_MAX: u32 = 4_000_000;

// Sentinel for fault fields that do not apply
pub const UNSET_INDEX: u8 = 0xff;

// ECON-D CRC-32: poly 0x04c11db7, no reflection, no init or final xor
pub const ECOND_CRC: crc::Algorithm<u32> = crc::Algorithm {
    width: 32,
    poly: 0x04c1_1db7,
    init: 0x0000_0000,
    refin: false,
    refout: false,
    xorout: 0x0000_0000,
    check: 0x89a1_897f,
    residue: 0x0000_0000,
};
