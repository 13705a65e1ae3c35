//! Builders for synthetic S-Link buffers and a random event generator
//!
//! The builders lay out words exactly as the readout does (lengths and CRCs are computed), so
//! buffers can be corrupted word by word to exercise the unpacker. [`emulate_event`] fills every
//! module of a module table with Gaussian pedestals.
use bitvec::prelude::*;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use super::channel_data::ChannelData;
use super::constants::*;
use super::error::UnpackerError;
use super::frame_parser::econd_crc;
use super::module_map::ModuleIndexer;
use super::raw_file::{FedBuffer, RawEvent};

/// One e-Rx sub-packet
#[derive(Debug, Clone, Default)]
pub struct ErxBlock {
    pub erx: u8,
    pub status: u8,
    pub cm0: u16,
    pub cm1: u16,
    empty: bool,
    // (channel, encoded word)
    channels: Vec<(u8, u32)>,
}

impl ErxBlock {
    pub fn new(erx: u8, cm0: u16, cm1: u16) -> Self {
        Self {
            erx,
            cm0,
            cm1,
            ..Default::default()
        }
    }

    /// A block with the empty flag set: common modes only
    pub fn empty(erx: u8, cm0: u16, cm1: u16) -> Self {
        Self {
            empty: true,
            ..Self::new(erx, cm0, cm1)
        }
    }

    /// All 37 channels with the same ADC. The calibration channel is written in
    /// characterization layout.
    pub fn full(erx: u8, adc: u16, cm0: u16, cm1: u16) -> Self {
        let mut block = Self::new(erx, cm0, cm1);
        for channel in 0..CHANNELS_PER_ERX as u8 {
            let data = ChannelData {
                adc,
                ..Default::default()
            };
            block = if channel as u32 == CALIB_CHANNEL {
                block.with_char_channel(channel, data)
            } else {
                block.with_channel(channel, data)
            };
        }
        block
    }

    pub fn with_status(mut self, status: u8) -> Self {
        self.status = status;
        self
    }

    pub fn with_channel(mut self, channel: u8, data: ChannelData) -> Self {
        self.channels.push((channel, data.encode(false)));
        self
    }

    pub fn with_char_channel(mut self, channel: u8, data: ChannelData) -> Self {
        self.channels.push((channel, data.encode(true)));
        self
    }

    pub fn words(&self) -> Vec<u32> {
        let mut map = 0u64;
        for (channel, _) in &self.channels {
            map.view_bits_mut::<Lsb0>().set(*channel as usize, true);
        }
        let w0 = ((self.status as u32 & ERX_STATUS_MASK) << ERX_STATUS_SHIFT)
            | ((self.empty as u32) << ERX_EMPTY_SHIFT)
            | ((self.cm0 as u32 & ERX_CM_MASK) << ERX_CM0_SHIFT)
            | ((self.cm1 as u32 & ERX_CM_MASK) << ERX_CM1_SHIFT)
            | ((map >> 32) as u32 & ERX_MAP_HIGH_MASK);
        if self.empty {
            return vec![w0];
        }

        let mut channels = self.channels.clone();
        channels.sort_by_key(|(channel, _)| *channel);
        let mut words = Vec::with_capacity(2 + channels.len());
        words.push(w0);
        words.push(map as u32);
        words.extend(channels.iter().map(|(_, word)| *word));
        words
    }
}

/// One ECON-D frame
#[derive(Debug, Clone)]
pub struct EcondBuilder {
    marker: u32,
    bx: u16,
    l1a: u8,
    orbit: u8,
    truncated: bool,
    duplicate_first_word: bool,
    blocks: Vec<ErxBlock>,
}

impl Default for EcondBuilder {
    fn default() -> Self {
        Self {
            marker: DEFAULT_ECOND_HEADER_MARKER,
            bx: 0,
            l1a: 0,
            orbit: 0,
            truncated: false,
            duplicate_first_word: false,
            blocks: vec![],
        }
    }
}

impl EcondBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks must be added in e-Rx order
    pub fn with_erx(mut self, block: ErxBlock) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn with_marker(mut self, marker: u32) -> Self {
        self.marker = marker;
        self
    }

    pub fn with_timing(mut self, bx: u16, l1a: u8, orbit: u8) -> Self {
        self.bx = bx;
        self.l1a = l1a;
        self.orbit = orbit;
        self
    }

    /// Set the T flag
    pub fn truncated(mut self) -> Self {
        self.truncated = true;
        self
    }

    /// Repeat the first header word, as some firmware versions do
    pub fn duplicate_first_word(mut self) -> Self {
        self.duplicate_first_word = true;
        self
    }

    pub fn words(&self) -> Vec<u32> {
        let payload: Vec<u32> = self.blocks.iter().flat_map(|b| b.words()).collect();
        let length = payload.len() as u32 + 1;
        let h0 = ((self.marker & ECOND_MARKER_MASK) << ECOND_MARKER_SHIFT)
            | ((length & ECOND_LENGTH_MASK) << ECOND_LENGTH_SHIFT)
            | ((self.truncated as u32) << ECOND_TRUNCATED_SHIFT);
        let h1 = ((self.bx as u32 & ECOND_BX_MASK) << ECOND_BX_SHIFT)
            | ((self.l1a as u32 & ECOND_L1A_MASK) << ECOND_L1A_SHIFT)
            | ((self.orbit as u32 & ECOND_ORBIT_MASK) << ECOND_ORBIT_SHIFT);
        let crc = econd_crc(&[h0, h1], &payload);

        let mut words = Vec::with_capacity(payload.len() + 4);
        words.push(h0);
        if self.duplicate_first_word {
            words.push(h0);
        }
        words.push(h1);
        words.extend(payload);
        words.push(crc);
        words
    }
}

/// One capture block. ECON-D slots without a frame are marked absent.
#[derive(Debug, Clone)]
pub struct CaptureBlockBuilder {
    marker: u32,
    bx: u16,
    event: u8,
    orbit: u8,
    econds: Vec<(u8, u8, EcondBuilder)>,
}

impl Default for CaptureBlockBuilder {
    fn default() -> Self {
        Self {
            marker: DEFAULT_CB_HEADER_MARKER,
            bx: 0,
            event: 0,
            orbit: 0,
            econds: vec![],
        }
    }
}

impl CaptureBlockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_econd(self, econd_idx: u8, econd: EcondBuilder) -> Self {
        self.with_econd_status(econd_idx, econd, CB_STATUS_NORMAL)
    }

    pub fn with_econd_status(mut self, econd_idx: u8, econd: EcondBuilder, status: u8) -> Self {
        self.econds.push((econd_idx, status, econd));
        self
    }

    pub fn with_marker(mut self, marker: u32) -> Self {
        self.marker = marker;
        self
    }

    pub fn with_timing(mut self, bx: u16, event: u8, orbit: u8) -> Self {
        self.bx = bx;
        self.event = event;
        self.orbit = orbit;
        self
    }

    pub fn words(&self) -> Vec<u32> {
        let mut econds: Vec<&(u8, u8, EcondBuilder)> = self.econds.iter().collect();
        econds.sort_by_key(|(idx, _, _)| *idx);

        let mut status: u64 = 0;
        for idx in 0..CB_MAX_ECONDS {
            status |= (CB_STATUS_ABSENT as u64) << (CB_STATUS_BITS * idx);
        }
        for (idx, econd_status, _) in &econds {
            let shift = CB_STATUS_BITS * *idx as u32;
            status &= !(CB_STATUS_MASK << shift);
            status |= (*econd_status as u64 & CB_STATUS_MASK) << shift;
        }
        let header = ((self.marker as u64 & CB_MARKER_MASK as u64) << (32 + CB_MARKER_SHIFT))
            | ((self.bx as u64 & CB_BX_MASK) << CB_BX_SHIFT)
            | ((self.event as u64 & CB_EVENT_MASK) << CB_EVENT_SHIFT)
            | ((self.orbit as u64 & CB_ORBIT_MASK) << CB_ORBIT_SHIFT)
            | status;

        let mut words = vec![(header >> 32) as u32, header as u32];
        for (_, _, econd) in econds {
            words.extend(econd.words());
        }
        words
    }
}

/// A complete S-Link buffer with header and trailer
#[derive(Debug, Clone)]
pub struct SLinkBuilder {
    event_id: u32,
    source_id: u16,
    boe: u32,
    eoe: u32,
    capture_blocks: Vec<CaptureBlockBuilder>,
}

impl SLinkBuilder {
    pub fn new(event_id: u32) -> Self {
        Self {
            event_id,
            source_id: 0,
            boe: DEFAULT_SLINK_BOE,
            eoe: DEFAULT_SLINK_EOE,
            capture_blocks: vec![],
        }
    }

    pub fn with_source_id(mut self, source_id: u16) -> Self {
        self.source_id = source_id;
        self
    }

    pub fn with_capture_block(mut self, capture_block: CaptureBlockBuilder) -> Self {
        self.capture_blocks.push(capture_block);
        self
    }

    pub fn build(&self) -> Vec<u32> {
        let mut words = vec![
            (self.boe & SLINK_MARKER_MASK) << SLINK_MARKER_SHIFT,
            self.event_id,
            0,
            self.source_id as u32 & SLINK_SOURCE_ID_MASK,
        ];
        for capture_block in &self.capture_blocks {
            words.extend(capture_block.words());
        }
        let total = (words.len() + SLINK_TRAILER_WORDS) as u32;
        words.extend([(self.eoe & SLINK_MARKER_MASK) << SLINK_MARKER_SHIFT, total, 0, 0]);
        words
    }
}

/// Settings of the random event generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub n_events: u32,
    pub pedestal: f64,
    pub noise: f64,
    /// Mean of each of the two common-mode values
    pub common_mode: f64,
    pub common_mode_noise: f64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            n_events: 1000,
            pedestal: 100.0,
            noise: 2.0,
            common_mode: 50.0,
            common_mode_noise: 1.0,
        }
    }
}

fn sample_10bit<R: Rng>(rng: &mut R, dist: &Normal<f64>) -> u16 {
    dist.sample(rng).round().clamp(0.0, CH_FIELD_MASK as f64) as u16
}

/// Build one event holding one S-Link buffer per FED of the module table, with every enabled
/// channel of every module filled.
pub fn emulate_event<R: Rng>(
    modules: &ModuleIndexer,
    config: &EmulatorConfig,
    event_id: u32,
    rng: &mut R,
) -> Result<RawEvent, UnpackerError> {
    let bad_width = |e: rand_distr::NormalError| UnpackerError::BadConfiguration(e.to_string());
    let pedestal = Normal::new(config.pedestal, config.noise).map_err(bad_width)?;
    let common_mode =
        Normal::new(config.common_mode, config.common_mode_noise).map_err(bad_width)?;

    let mut feds: Vec<(u16, u16)> = modules
        .modules()
        .map(|(_, m)| (m.fed_id, m.slink_idx))
        .collect();
    feds.sort();
    feds.dedup();

    let mut event = RawEvent {
        event_id,
        feds: Vec::with_capacity(feds.len()),
    };
    for (fed_id, slink_idx) in feds {
        let mut fed_modules: Vec<_> = modules
            .modules()
            .map(|(_, m)| m)
            .filter(|m| m.fed_id == fed_id)
            .collect();
        fed_modules.sort_by_key(|m| (m.capture_block_idx, m.econd_idx));

        let mut slink = SLinkBuilder::new(event_id).with_source_id(slink_idx);
        let n_blocks = fed_modules
            .iter()
            .map(|m| m.capture_block_idx as usize + 1)
            .max()
            .unwrap_or(0);
        for cb_idx in 0..n_blocks {
            let mut capture_block = CaptureBlockBuilder::new().with_timing(
                (event_id % 3564) as u16,
                event_id as u8,
                0,
            );
            for module in fed_modules
                .iter()
                .filter(|m| m.capture_block_idx as usize == cb_idx)
            {
                let mut econd = EcondBuilder::new();
                for erx in 0..DEFAULT_NUM_ERXS_IN_ECOND as u8 {
                    if (module.erx_enable_bits >> erx) & 1 == 0 {
                        continue;
                    }
                    let mut block = ErxBlock::new(
                        erx,
                        sample_10bit(rng, &common_mode),
                        sample_10bit(rng, &common_mode),
                    );
                    for channel in 0..CHANNELS_PER_ERX as u8 {
                        let data = ChannelData {
                            adc: sample_10bit(rng, &pedestal),
                            adcm1: sample_10bit(rng, &pedestal),
                            toa: 0,
                            ..Default::default()
                        };
                        block = block.with_channel(channel, data);
                    }
                    econd = econd.with_erx(block);
                }
                capture_block = capture_block.with_econd(module.econd_idx, econd);
            }
            slink = slink.with_capture_block(capture_block);
        }
        event.feds.push(FedBuffer {
            fed_id,
            words: slink.build(),
        });
    }
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_parser::{FrameParser, UnpackerConfig};
    use crate::module_map::tests::MODULE_TABLE;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_econd_length_and_crc() {
        let econd = EcondBuilder::new().with_erx(ErxBlock::full(0, 1, 0, 0));
        let words = econd.words();
        // header, e-Rx header pair, 37 channels, CRC
        assert_eq!(words.len(), 2 + 2 + 37 + 1);
        let length = (words[0] >> ECOND_LENGTH_SHIFT) & ECOND_LENGTH_MASK;
        assert_eq!(length as usize, words.len() - 2);
        let crc = econd_crc(&words[..2], &words[2..words.len() - 1]);
        assert_eq!(crc, words[words.len() - 1]);
    }

    #[test]
    fn test_capture_block_status() {
        let words = CaptureBlockBuilder::new()
            .with_econd(1, EcondBuilder::new())
            .words();
        let header = ((words[0] as u64) << 32) | words[1] as u64;
        assert_eq!((words[0] >> CB_MARKER_SHIFT) & CB_MARKER_MASK, DEFAULT_CB_HEADER_MARKER);
        assert_eq!(header & 0x7, CB_STATUS_ABSENT as u64);
        assert_eq!((header >> 3) & 0x7, CB_STATUS_NORMAL as u64);
        assert_eq!((header >> 33) & 0x7, CB_STATUS_ABSENT as u64);
    }

    #[test]
    fn test_empty_block() {
        let words = ErxBlock::empty(3, 10, 20).words();
        assert_eq!(words.len(), 1);
        assert_eq!((words[0] >> ERX_EMPTY_SHIFT) & 1, 1);
        assert_eq!((words[0] >> ERX_CM0_SHIFT) & ERX_CM_MASK, 10);
    }

    #[test]
    fn test_emulated_event_unpacks() {
        let modules = ModuleIndexer::parse(MODULE_TABLE).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let event = emulate_event(&modules, &EmulatorConfig::default(), 3, &mut rng).unwrap();
        assert_eq!(event.feds.len(), 2);

        let config = UnpackerConfig {
            fix_calib_channel: false,
            ..Default::default()
        };
        let parser = FrameParser::new(&config, &modules);
        let n_channels: usize = event
            .feds
            .iter()
            .map(|fed| {
                let data = parser.parse(fed.fed_id, &fed.words).unwrap();
                assert!(data.faults.is_empty());
                assert_eq!(data.event_id, 3);
                data.channels.len()
            })
            .sum();
        // LD 6 e-Rx, HD 12, LD 6, tile 4
        assert_eq!(n_channels, (6 + 12 + 6 + 4) * 37);
    }

    #[test]
    fn test_bad_noise() {
        let modules = ModuleIndexer::parse(MODULE_TABLE).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let config = EmulatorConfig {
            noise: -1.0,
            ..Default::default()
        };
        assert!(emulate_event(&modules, &config, 0, &mut rng).is_err());
    }
}
