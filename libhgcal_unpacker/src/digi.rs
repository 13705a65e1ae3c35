use std::fmt::Display;

use super::constants::*;
use super::electronics_id::ElectronicsId;

/// One unpacked channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodedChannel {
    pub id: ElectronicsId,
    pub tctp: u8,
    pub adc: u16,
    pub adcm1: u16,
    pub tot: u16,
    pub toa: u16,
    /// Sum of the two common-mode values of the channel's e-Rx
    pub cm: u16,
    pub flags: u16,
}

impl DecodedChannel {
    pub fn is_char_mode(&self) -> bool {
        self.flags & FLAG_CHAR_MODE != 0
    }
}

/// The two common-mode values of one e-Rx. The id carries channel 37.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommonModeRecord {
    pub id: ElectronicsId,
    pub cm0: u16,
    pub cm1: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultCategory {
    /// Malformed framing; the frame is skipped and parsing resynchronises
    Structural,
    /// Hardware the mapping does not know about
    LookupMiss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultReason {
    SLinkTooShort,
    BadSLinkHeader,
    BadCaptureBlockHeader,
    EcondStatus,
    BadEcondHeader,
    PayloadTooLong,
    TruncatedEcond,
    EcondTruncatedFlag,
    LengthMismatch,
    CrcMismatch,
    UnmappedFed,
    UnmappedEcond,
}

impl FaultReason {
    pub fn category(&self) -> FaultCategory {
        match self {
            FaultReason::UnmappedFed | FaultReason::UnmappedEcond => FaultCategory::LookupMiss,
            _ => FaultCategory::Structural,
        }
    }

    /// Numeric reason code for columnar output
    pub fn code(&self) -> u8 {
        match self {
            FaultReason::SLinkTooShort => 1,
            FaultReason::BadSLinkHeader => 2,
            FaultReason::BadCaptureBlockHeader => 3,
            FaultReason::EcondStatus => 4,
            FaultReason::BadEcondHeader => 5,
            FaultReason::PayloadTooLong => 6,
            FaultReason::TruncatedEcond => 7,
            FaultReason::EcondTruncatedFlag => 8,
            FaultReason::LengthMismatch => 9,
            FaultReason::CrcMismatch => 10,
            FaultReason::UnmappedFed => 11,
            FaultReason::UnmappedEcond => 12,
        }
    }
}

impl Display for FaultReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            FaultReason::SLinkTooShort => "S-Link buffer shorter than its header and trailer",
            FaultReason::BadSLinkHeader => "bad S-Link begin-of-event marker",
            FaultReason::BadCaptureBlockHeader => "bad capture block header marker",
            FaultReason::EcondStatus => "ECON-D flagged by the capture block",
            FaultReason::BadEcondHeader => "bad ECON-D header marker",
            FaultReason::PayloadTooLong => "ECON-D payload longer than allowed",
            FaultReason::TruncatedEcond => "ECON-D runs past the end of the S-Link",
            FaultReason::EcondTruncatedFlag => "ECON-D reports a truncated payload",
            FaultReason::LengthMismatch => "ECON-D payload length does not match its e-Rx blocks",
            FaultReason::CrcMismatch => "ECON-D CRC mismatch",
            FaultReason::UnmappedFed => "FED missing from the mapping",
            FaultReason::UnmappedEcond => "ECON-D missing from the mapping",
        };
        write!(f, "{text}")
    }
}

/// A frame that could not be unpacked. Capture block and ECON-D are [`UNSET_INDEX`] when
/// the fault concerns a whole S-Link or capture block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaultRecord {
    pub fed_id: u16,
    pub capture_block: u8,
    pub econd_idx: u8,
    pub reason: FaultReason,
}

impl Display for FaultRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FED {} capture block {} ECON-D {}: {}",
            self.fed_id, self.capture_block, self.econd_idx, self.reason
        )
    }
}

/// Everything unpacked from one S-Link buffer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SLinkData {
    pub fed_id: u16,
    pub event_id: u32,
    pub source_id: u16,
    pub channels: Vec<DecodedChannel>,
    pub common_modes: Vec<CommonModeRecord>,
    pub faults: Vec<FaultRecord>,
}

impl SLinkData {
    pub fn new(fed_id: u16) -> Self {
        Self {
            fed_id,
            ..Default::default()
        }
    }
}

/// Unpacked content of one event, all S-Links merged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventData {
    pub event_id: u32,
    pub channels: Vec<DecodedChannel>,
    pub common_modes: Vec<CommonModeRecord>,
    pub faults: Vec<FaultRecord>,
}

impl EventData {
    pub fn new(event_id: u32) -> Self {
        Self {
            event_id,
            ..Default::default()
        }
    }

    pub fn append(&mut self, mut slink: SLinkData) {
        self.channels.append(&mut slink.channels);
        self.common_modes.append(&mut slink.common_modes);
        self.faults.append(&mut slink.faults);
    }

    /// Number of decoded channels
    pub fn size(&self) -> usize {
        self.channels.len()
    }

    /// Common-mode sum of every channel, aligned with `channels`
    pub fn common_mode_sums(&self) -> Vec<u16> {
        self.channels.iter().map(|c| c.cm).collect()
    }

    pub fn n_structural_faults(&self) -> usize {
        self.faults
            .iter()
            .filter(|f| f.reason.category() == FaultCategory::Structural)
            .count()
    }
}
