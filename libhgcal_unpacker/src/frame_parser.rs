//! Decoding of one S-Link buffer.
//!
//! The buffer is walked as S-Link header, capture blocks, ECON-D frames and e-Rx blocks. Any
//! malformed frame becomes a [`FaultRecord`] and the parser moves on to the next frame it can
//! find. Only a fault count above [`UnpackerConfig::flagged_econd_max`] stops the parse with
//! an error. Channels of an ECON-D are kept only when the whole frame decoded cleanly.
use bitvec::prelude::*;
use serde::{Deserialize, Serialize};

use super::channel_data::ChannelData;
use super::constants::*;
use super::digi::{CommonModeRecord, DecodedChannel, FaultCategory, FaultReason, FaultRecord, SLinkData};
use super::electronics_id::ElectronicsId;
use super::error::UnpackerError;
use super::module_map::ModuleIndexer;

static CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&ECOND_CRC);

/// Structural constants of the readout and the ceilings of the unpacker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnpackerConfig {
    pub slink_boe: u32,
    pub slink_eoe: u32,
    pub cb_header_marker: u32,
    pub econd_header_marker: u32,
    pub payload_length_max: u32,
    pub num_erxs_in_econd: u32,
    pub slink_capture_block_max: u32,
    pub capture_block_econd_max: u32,
    pub apply_fw_workaround: bool,
    pub check_crc: bool,
    pub fix_calib_channel: bool,
    /// Forces characterization mode on (or off) for every ECON-D
    pub char_mode_override: Option<bool>,
    pub flagged_econd_max: u32,
    pub channel_max: u32,
    pub common_mode_max: u32,
}

impl Default for UnpackerConfig {
    fn default() -> Self {
        Self {
            slink_boe: DEFAULT_SLINK_BOE,
            slink_eoe: DEFAULT_SLINK_EOE,
            cb_header_marker: DEFAULT_CB_HEADER_MARKER,
            econd_header_marker: DEFAULT_ECOND_HEADER_MARKER,
            payload_length_max: DEFAULT_PAYLOAD_LENGTH_MAX,
            num_erxs_in_econd: DEFAULT_NUM_ERXS_IN_ECOND,
            slink_capture_block_max: DEFAULT_SLINK_CAPTURE_BLOCK_MAX,
            capture_block_econd_max: DEFAULT_CAPTURE_BLOCK_ECOND_MAX,
            apply_fw_workaround: false,
            check_crc: true,
            fix_calib_channel: true,
            char_mode_override: None,
            flagged_econd_max: DEFAULT_FLAGGED_ECOND_MAX,
            channel_max: DEFAULT_CHANNEL_MAX,
            common_mode_max: DEFAULT_COMMON_MODE_MAX,
        }
    }
}

impl UnpackerConfig {
    pub fn validate(&self) -> Result<(), UnpackerError> {
        if self.capture_block_econd_max == 0 || self.capture_block_econd_max > CB_MAX_ECONDS {
            return Err(UnpackerError::BadConfiguration(format!(
                "capture_block_econd_max {} (allowed 1..={CB_MAX_ECONDS})",
                self.capture_block_econd_max
            )));
        }
        if self.slink_capture_block_max == 0 || self.slink_capture_block_max > CAPTUREBLOCK_MASK + 1 {
            return Err(UnpackerError::BadConfiguration(format!(
                "slink_capture_block_max {} (allowed 1..={})",
                self.slink_capture_block_max,
                CAPTUREBLOCK_MASK + 1
            )));
        }
        if self.num_erxs_in_econd == 0 || self.num_erxs_in_econd > ECONDERX_MASK + 1 {
            return Err(UnpackerError::BadConfiguration(format!(
                "num_erxs_in_econd {} (allowed 1..={})",
                self.num_erxs_in_econd,
                ECONDERX_MASK + 1
            )));
        }
        if self.payload_length_max > ECOND_LENGTH_MASK {
            return Err(UnpackerError::BadConfiguration(format!(
                "payload_length_max {} wider than the {ECOND_LENGTH_MASK} word length field",
                self.payload_length_max
            )));
        }
        Ok(())
    }
}

/// What the readout knows about one ECON-D
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcondReadout {
    /// ECON-D level electronics id (e-Rx and channel bits zero)
    pub eleid: ElectronicsId,
    pub erx_enable_bits: u16,
    pub char_mode: bool,
}

/// Mapping queries the parser needs. Implementations are shared read-only between workers.
pub trait ReadoutLookup: Sync {
    fn slink_for_fed(&self, fed_id: u16) -> Option<u32>;

    fn econd_readout(&self, slink: u32, capture_block_idx: u32, econd_idx: u32) -> Option<EcondReadout>;
}

impl ReadoutLookup for ModuleIndexer {
    fn slink_for_fed(&self, fed_id: u16) -> Option<u32> {
        ModuleIndexer::slink_for_fed(self, fed_id)
    }

    fn econd_readout(&self, slink: u32, capture_block_idx: u32, econd_idx: u32) -> Option<EcondReadout> {
        self.module_for_slink(slink, capture_block_idx, econd_idx)
            .map(|module| EcondReadout {
                eleid: module.eleid,
                erx_enable_bits: module.erx_enable_bits,
                char_mode: false,
            })
    }
}

/// CRC of an ECON-D frame: header words then payload words without the trailing CRC word,
/// each fed most significant byte first.
pub fn econd_crc(header: &[u32], data: &[u32]) -> u32 {
    let mut digest = CRC32.digest();
    for word in header.iter().chain(data) {
        digest.update(&word.to_be_bytes());
    }
    digest.finalize()
}

// Where parsing continues after an ECON-D frame
enum Resume {
    At(usize),
    Abandon,
}

#[derive(Default)]
struct EcondRecords {
    channels: Vec<DecodedChannel>,
    common_modes: Vec<CommonModeRecord>,
}

/// Parses S-Link buffers against a fixed configuration and readout lookup
#[derive(Debug)]
pub struct FrameParser<'a, L: ReadoutLookup + ?Sized> {
    config: &'a UnpackerConfig,
    lookup: &'a L,
}

impl<'a, L: ReadoutLookup + ?Sized> FrameParser<'a, L> {
    pub fn new(config: &'a UnpackerConfig, lookup: &'a L) -> Self {
        Self { config, lookup }
    }

    /// Decode the buffer of one FED. Malformed frames are reported as faults in the returned
    /// data; an error is returned only when the fault ceiling is crossed.
    pub fn parse(&self, fed_id: u16, words: &[u32]) -> Result<SLinkData, UnpackerError> {
        let mut data = SLinkData::new(fed_id);

        if words.len() < SLINK_HEADER_WORDS + SLINK_TRAILER_WORDS {
            self.record(&mut data, UNSET_INDEX, UNSET_INDEX, FaultReason::SLinkTooShort)?;
            return Ok(data);
        }
        let boe = (words[0] >> SLINK_MARKER_SHIFT) & SLINK_MARKER_MASK;
        if boe != self.config.slink_boe {
            self.record(&mut data, UNSET_INDEX, UNSET_INDEX, FaultReason::BadSLinkHeader)?;
            return Ok(data);
        }
        data.event_id = words[1];
        data.source_id = (words[3] & SLINK_SOURCE_ID_MASK) as u16;

        let trailer_start = words.len() - SLINK_TRAILER_WORDS;
        let eoe = (words[trailer_start] >> SLINK_MARKER_SHIFT) & SLINK_MARKER_MASK;
        if eoe != self.config.slink_eoe {
            spdlog::warn!(
                "FED {fed_id} event {}: S-Link trailer marker {eoe:#04x} does not match {:#04x}",
                data.event_id,
                self.config.slink_eoe
            );
        }

        let slink = match self.lookup.slink_for_fed(fed_id) {
            Some(slink) => slink,
            None => {
                self.record(&mut data, UNSET_INDEX, UNSET_INDEX, FaultReason::UnmappedFed)?;
                return Ok(data);
            }
        };

        let body = &words[SLINK_HEADER_WORDS..trailer_start];
        let mut pos = 0;
        let mut cb_idx = 0;
        while pos < body.len() && cb_idx < self.config.slink_capture_block_max {
            if body.len() - pos < CB_HEADER_WORDS || !self.is_capture_block_header(body[pos]) {
                self.record(&mut data, cb_idx as u8, UNSET_INDEX, FaultReason::BadCaptureBlockHeader)?;
                pos = match body[pos + 1..]
                    .iter()
                    .position(|w| self.is_capture_block_header(*w))
                {
                    Some(offset) => pos + 1 + offset,
                    None => body.len(),
                };
                cb_idx += 1;
                continue;
            }
            let header = ((body[pos] as u64) << 32) | body[pos + 1] as u64;
            pos += CB_HEADER_WORDS;
            pos = self.parse_capture_block(&mut data, slink, cb_idx, header, body, pos)?;
            cb_idx += 1;
        }
        if pos < body.len() {
            spdlog::warn!(
                "FED {fed_id} event {}: {} words left after {cb_idx} capture blocks",
                data.event_id,
                body.len() - pos
            );
        }

        Ok(data)
    }

    fn is_capture_block_header(&self, word: u32) -> bool {
        (word >> CB_MARKER_SHIFT) & CB_MARKER_MASK == self.config.cb_header_marker
    }

    fn record(
        &self,
        data: &mut SLinkData,
        capture_block: u8,
        econd_idx: u8,
        reason: FaultReason,
    ) -> Result<(), UnpackerError> {
        let fault = FaultRecord {
            fed_id: data.fed_id,
            capture_block,
            econd_idx,
            reason,
        };
        match reason.category() {
            FaultCategory::Structural => spdlog::debug!("Unpacker fault at {fault}"),
            FaultCategory::LookupMiss => spdlog::warn!("Unpacker lookup miss at {fault}"),
        }
        data.faults.push(fault);
        if data.faults.len() > self.config.flagged_econd_max as usize {
            spdlog::error!(
                "FED {} event {} has {} faults, above the ceiling of {}",
                data.fed_id,
                data.event_id,
                data.faults.len(),
                self.config.flagged_econd_max
            );
            return Err(UnpackerError::CapacityExceeded {
                what: "flagged ECON-D",
                count: data.faults.len(),
                max: self.config.flagged_econd_max as usize,
            });
        }
        Ok(())
    }

    fn parse_capture_block(
        &self,
        data: &mut SLinkData,
        slink: u32,
        cb_idx: u32,
        header: u64,
        body: &[u32],
        mut pos: usize,
    ) -> Result<usize, UnpackerError> {
        spdlog::trace!(
            "Capture block {cb_idx}: BX {} event {} orbit {}",
            (header >> CB_BX_SHIFT) & CB_BX_MASK,
            (header >> CB_EVENT_SHIFT) & CB_EVENT_MASK,
            (header >> CB_ORBIT_SHIFT) & CB_ORBIT_MASK
        );
        for econd in 0..self.config.capture_block_econd_max {
            let status = ((header >> (CB_STATUS_BITS * econd)) & CB_STATUS_MASK) as u8;
            if status == CB_STATUS_ABSENT {
                continue;
            }
            match self.parse_econd(data, slink, cb_idx, econd, status != CB_STATUS_NORMAL, body, pos)? {
                Resume::At(next) => pos = next,
                Resume::Abandon => return Ok(body.len()),
            }
        }
        Ok(pos)
    }

    #[allow(clippy::too_many_arguments)]
    fn parse_econd(
        &self,
        data: &mut SLinkData,
        slink: u32,
        cb_idx: u32,
        econd: u32,
        flagged: bool,
        body: &[u32],
        mut pos: usize,
    ) -> Result<Resume, UnpackerError> {
        let (cb, ec) = (cb_idx as u8, econd as u8);
        if body.len() - pos < ECOND_HEADER_WORDS {
            self.record(data, cb, ec, FaultReason::TruncatedEcond)?;
            return Ok(Resume::Abandon);
        }
        if self.config.apply_fw_workaround && body[pos] == body[pos + 1] {
            pos += 1;
            if body.len() - pos < ECOND_HEADER_WORDS {
                self.record(data, cb, ec, FaultReason::TruncatedEcond)?;
                return Ok(Resume::Abandon);
            }
        }

        let header = [body[pos], body[pos + 1]];
        let marker = (header[0] >> ECOND_MARKER_SHIFT) & ECOND_MARKER_MASK;
        let length = ((header[0] >> ECOND_LENGTH_SHIFT) & ECOND_LENGTH_MASK) as usize;
        let payload_start = pos + ECOND_HEADER_WORDS;
        let frame_end = payload_start + length;

        if marker != self.config.econd_header_marker {
            self.record(data, cb, ec, FaultReason::BadEcondHeader)?;
            return Ok(if frame_end <= body.len() {
                Resume::At(frame_end)
            } else {
                Resume::Abandon
            });
        }
        if length > self.config.payload_length_max as usize {
            self.record(data, cb, ec, FaultReason::PayloadTooLong)?;
            return Ok(Resume::At(frame_end.min(body.len())));
        }
        if frame_end > body.len() {
            self.record(data, cb, ec, FaultReason::TruncatedEcond)?;
            return Ok(Resume::Abandon);
        }
        if (header[0] >> ECOND_TRUNCATED_SHIFT) & 1 == 1 {
            self.record(data, cb, ec, FaultReason::EcondTruncatedFlag)?;
            return Ok(Resume::At(frame_end));
        }
        if flagged {
            self.record(data, cb, ec, FaultReason::EcondStatus)?;
            return Ok(Resume::At(frame_end));
        }
        let readout = match self.lookup.econd_readout(slink, cb_idx, econd) {
            Some(readout) => readout,
            None => {
                self.record(data, cb, ec, FaultReason::UnmappedEcond)?;
                return Ok(Resume::At(frame_end));
            }
        };

        let payload = &body[payload_start..frame_end];
        let Some((crc_word, erx_words)) = payload.split_last() else {
            self.record(data, cb, ec, FaultReason::LengthMismatch)?;
            return Ok(Resume::At(frame_end));
        };
        let records = match self.decode_erx_blocks(&readout, erx_words) {
            Ok(records) => records,
            Err(reason) => {
                self.record(data, cb, ec, reason)?;
                return Ok(Resume::At(frame_end));
            }
        };
        if self.config.check_crc && econd_crc(&header, erx_words) != *crc_word {
            self.record(data, cb, ec, FaultReason::CrcMismatch)?;
            return Ok(Resume::At(frame_end));
        }

        let EcondRecords {
            mut channels,
            mut common_modes,
        } = records;
        data.channels.append(&mut channels);
        data.common_modes.append(&mut common_modes);
        Ok(Resume::At(frame_end))
    }

    fn decode_erx_blocks(
        &self,
        readout: &EcondReadout,
        words: &[u32],
    ) -> Result<EcondRecords, FaultReason> {
        let mut records = EcondRecords::default();
        let module_char_mode = self.config.char_mode_override.unwrap_or(readout.char_mode);
        let eleid = readout.eleid;
        let mut words = words.iter().copied();

        for erx in 0..self.config.num_erxs_in_econd {
            if (readout.erx_enable_bits >> erx) & 1 == 0 {
                continue;
            }
            let w0 = words.next().ok_or(FaultReason::LengthMismatch)?;
            let status = (w0 >> ERX_STATUS_SHIFT) & ERX_STATUS_MASK;
            let cm0 = ((w0 >> ERX_CM0_SHIFT) & ERX_CM_MASK) as u16;
            let cm1 = ((w0 >> ERX_CM1_SHIFT) & ERX_CM_MASK) as u16;
            let erx_id = ElectronicsId::new(
                eleid.zside(),
                eleid.fed_id(),
                eleid.capture_block(),
                eleid.econd_idx(),
                erx as u8,
                CHANNELS_PER_ERX as u8,
            );
            records.common_modes.push(CommonModeRecord {
                id: erx_id,
                cm0,
                cm1,
            });
            if (w0 >> ERX_EMPTY_SHIFT) & 1 == 1 {
                continue;
            }

            let w1 = words.next().ok_or(FaultReason::LengthMismatch)?;
            let map = (((w0 & ERX_MAP_HIGH_MASK) as u64) << 32) | w1 as u64;
            for channel in map.view_bits::<Lsb0>()[..CHANNELS_PER_ERX as usize].iter_ones() {
                let word = words.next().ok_or(FaultReason::LengthMismatch)?;
                let calib_fixup = self.config.fix_calib_channel && channel == CALIB_CHANNEL as usize;
                let char_mode = module_char_mode || calib_fixup;
                let decoded = ChannelData::decode(word, char_mode);

                let mut flags = 0;
                if char_mode {
                    flags |= FLAG_CHAR_MODE;
                }
                if calib_fixup && !module_char_mode {
                    flags |= FLAG_CALIB_FIXUP;
                }
                if status != 0 {
                    flags |= FLAG_ERX_STATUS;
                }
                if decoded.is_tot_saturated() {
                    flags |= FLAG_TOT_SATURATED;
                }
                records.channels.push(DecodedChannel {
                    id: erx_id.with_channel(channel as u8),
                    tctp: decoded.tctp,
                    adc: decoded.adc,
                    adcm1: decoded.adcm1,
                    tot: decoded.tot,
                    toa: decoded.toa,
                    cm: cm0 + cm1,
                    flags,
                });
            }
        }

        if words.next().is_some() {
            return Err(FaultReason::LengthMismatch);
        }
        Ok(records)
    }
}
