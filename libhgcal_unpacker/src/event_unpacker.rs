use std::sync::Arc;

use fxhash::FxHashMap;

use super::config::ModuleConfig;
use super::digi::{EventData, SLinkData};
use super::error::{MappingError, UnpackerError};
use super::frame_parser::{EcondReadout, FrameParser, ReadoutLookup, UnpackerConfig};
use super::mapping::ElectronicsMapping;
use super::raw_file::{FedBuffer, RawEvent};

/// The readout of a mapping snapshot together with the per-module characterization modes
#[derive(Debug, Clone)]
pub struct ConfiguredReadout {
    mapping: Arc<ElectronicsMapping>,
    char_modes: FxHashMap<u32, bool>,
}

impl ConfiguredReadout {
    /// Every module configuration must name a module of the mapping
    pub fn new(
        mapping: Arc<ElectronicsMapping>,
        module_configs: &[ModuleConfig],
    ) -> Result<Self, MappingError> {
        let mut char_modes = FxHashMap::default();
        for module_config in module_configs {
            let idx = mapping.modules.index_for_hardware(
                module_config.fed_id,
                module_config.capture_block_idx,
                module_config.econd_idx,
            )?;
            if let Some(module) = mapping.modules.module(idx) {
                char_modes.insert(module.eleid.econd_raw_id(), module_config.char_mode);
            }
        }
        Ok(Self {
            mapping,
            char_modes,
        })
    }

    pub fn mapping(&self) -> &Arc<ElectronicsMapping> {
        &self.mapping
    }
}

impl ReadoutLookup for ConfiguredReadout {
    fn slink_for_fed(&self, fed_id: u16) -> Option<u32> {
        self.mapping.modules.slink_for_fed(fed_id)
    }

    fn econd_readout(&self, slink: u32, capture_block_idx: u32, econd_idx: u32) -> Option<EcondReadout> {
        self.mapping
            .modules
            .econd_readout(slink, capture_block_idx, econd_idx)
            .map(|readout| EcondReadout {
                char_mode: self
                    .char_modes
                    .get(&readout.eleid.econd_raw_id())
                    .copied()
                    .unwrap_or(false),
                ..readout
            })
    }
}

/// EventUnpacker runs the frame parser over every FED buffer of an event and applies the
/// event-level ceilings. An event that crosses a ceiling yields an error and no data.
#[derive(Debug)]
pub struct EventUnpacker<L: ReadoutLookup> {
    config: UnpackerConfig,
    lookup: L,
    fed_ids: Vec<u16>,
}

impl<L: ReadoutLookup> EventUnpacker<L> {
    pub fn new(config: UnpackerConfig, lookup: L) -> Result<Self, UnpackerError> {
        config.validate()?;
        Ok(Self {
            config,
            lookup,
            fed_ids: vec![],
        })
    }

    /// Only unpack the listed FEDs. An empty list selects every FED.
    pub fn with_fed_filter(mut self, fed_ids: &[u16]) -> Self {
        self.fed_ids = fed_ids.to_vec();
        self
    }

    pub fn config(&self) -> &UnpackerConfig {
        &self.config
    }

    pub fn lookup(&self) -> &L {
        &self.lookup
    }

    fn selected<'e>(&self, event: &'e RawEvent) -> Vec<&'e FedBuffer> {
        event
            .feds
            .iter()
            .filter(|fed| self.fed_ids.is_empty() || self.fed_ids.contains(&fed.fed_id))
            .collect()
    }

    pub fn unpack_event(&self, event: &RawEvent) -> Result<EventData, UnpackerError> {
        let parser = FrameParser::new(&self.config, &self.lookup);
        let mut data = EventData::new(event.event_id);
        for fed in self.selected(event) {
            let slink = parser.parse(fed.fed_id, &fed.words)?;
            self.merge(&mut data, slink)?;
        }
        Ok(data)
    }

    /// Same result as [`EventUnpacker::unpack_event`], with the FED buffers split over
    /// `n_workers` scoped threads
    pub fn unpack_event_parallel(
        &self,
        event: &RawEvent,
        n_workers: usize,
    ) -> Result<EventData, UnpackerError> {
        let feds = self.selected(event);
        if n_workers <= 1 || feds.len() < 2 {
            return self.unpack_event(event);
        }
        let subset_size = feds.len().div_ceil(n_workers);

        let results: Vec<Result<Vec<SLinkData>, UnpackerError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = feds
                .chunks(subset_size)
                .map(|subset| {
                    scope.spawn(move || {
                        let parser = FrameParser::new(&self.config, &self.lookup);
                        subset
                            .iter()
                            .map(|fed| parser.parse(fed.fed_id, &fed.words))
                            .collect::<Result<Vec<SLinkData>, UnpackerError>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or(Err(UnpackerError::WorkerPanic)))
                .collect()
        });

        let mut data = EventData::new(event.event_id);
        for result in results {
            for slink in result? {
                self.merge(&mut data, slink)?;
            }
        }
        Ok(data)
    }

    fn merge(&self, data: &mut EventData, slink: SLinkData) -> Result<(), UnpackerError> {
        if slink.faults.is_empty() && slink.event_id != data.event_id {
            spdlog::warn!(
                "FED {} reports event {} inside event {}",
                slink.fed_id,
                slink.event_id,
                data.event_id
            );
        }
        data.append(slink);
        check_ceiling("flagged ECON-D", data.faults.len(), self.config.flagged_econd_max)?;
        check_ceiling("channel", data.channels.len(), self.config.channel_max)?;
        check_ceiling("common mode", data.common_modes.len(), self.config.common_mode_max)?;
        Ok(())
    }
}

fn check_ceiling(what: &'static str, count: usize, max: u32) -> Result<(), UnpackerError> {
    if count > max as usize {
        spdlog::error!("Event exceeds the {what} ceiling: {count} > {max}");
        return Err(UnpackerError::CapacityExceeded {
            what,
            count,
            max: max as usize,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FLAG_CHAR_MODE;
    use crate::digi::FaultReason;
    use crate::emulator::{CaptureBlockBuilder, EcondBuilder, ErxBlock, SLinkBuilder};
    use crate::module_map::tests::MODULE_TABLE;

    fn readout(module_configs: &[ModuleConfig]) -> ConfiguredReadout {
        let mapping = Arc::new(ElectronicsMapping::parse(MODULE_TABLE, &[]).unwrap());
        ConfiguredReadout::new(mapping, module_configs).unwrap()
    }

    fn econd(n_erx: u8, adc: u16) -> EcondBuilder {
        (0..n_erx).fold(EcondBuilder::new(), |econd, erx| {
            econd.with_erx(ErxBlock::full(erx, adc, 1, 2))
        })
    }

    fn event() -> RawEvent {
        let fed0 = SLinkBuilder::new(5)
            .with_capture_block(
                CaptureBlockBuilder::new()
                    .with_econd(0, econd(6, 10))
                    .with_econd(1, econd(12, 20)),
            )
            .with_capture_block(CaptureBlockBuilder::new().with_econd(0, econd(6, 30)))
            .build();
        let fed7 = SLinkBuilder::new(5)
            .with_capture_block(CaptureBlockBuilder::new().with_econd(0, econd(4, 40)))
            .build();
        RawEvent {
            event_id: 5,
            feds: vec![
                FedBuffer {
                    fed_id: 0,
                    words: fed0,
                },
                FedBuffer {
                    fed_id: 7,
                    words: fed7,
                },
            ],
        }
    }

    #[test]
    fn test_unpack_event() {
        let unpacker = EventUnpacker::new(UnpackerConfig::default(), readout(&[])).unwrap();
        let data = unpacker.unpack_event(&event()).unwrap();
        assert_eq!(data.event_id, 5);
        assert!(data.faults.is_empty());
        assert_eq!(data.size(), (6 + 12 + 6 + 4) * 37);
        assert_eq!(data.common_modes.len(), 6 + 12 + 6 + 4);
        assert!(data.common_mode_sums().iter().all(|cm| *cm == 3));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let unpacker = EventUnpacker::new(UnpackerConfig::default(), readout(&[])).unwrap();
        let event = event();
        let sequential = unpacker.unpack_event(&event).unwrap();
        for n_workers in [1, 2, 4] {
            let parallel = unpacker.unpack_event_parallel(&event, n_workers).unwrap();
            assert_eq!(parallel, sequential);
        }
    }

    #[test]
    fn test_fed_filter() {
        let unpacker = EventUnpacker::new(UnpackerConfig::default(), readout(&[]))
            .unwrap()
            .with_fed_filter(&[7]);
        let data = unpacker.unpack_event(&event()).unwrap();
        assert_eq!(data.size(), 4 * 37);
        assert!(data.channels.iter().all(|c| c.id.fed_id() == 7));
    }

    #[test]
    fn test_module_char_mode() {
        let configs = [ModuleConfig {
            fed_id: 7,
            capture_block_idx: 0,
            econd_idx: 0,
            char_mode: true,
            gains: vec![],
        }];
        let unpacker = EventUnpacker::new(UnpackerConfig::default(), readout(&configs)).unwrap();
        let data = unpacker.unpack_event(&event()).unwrap();
        for channel in &data.channels {
            let expected = channel.id.fed_id() == 7 || channel.id.half_roc_channel() == 18;
            assert_eq!(channel.is_char_mode(), expected);
        }
        assert!(data
            .channels
            .iter()
            .filter(|c| c.id.fed_id() == 7)
            .all(|c| c.flags & FLAG_CHAR_MODE != 0));
    }

    #[test]
    fn test_unknown_module_config() {
        let mapping = Arc::new(ElectronicsMapping::parse(MODULE_TABLE, &[]).unwrap());
        let configs = [ModuleConfig {
            fed_id: 3,
            ..Default::default()
        }];
        assert!(matches!(
            ConfiguredReadout::new(mapping, &configs),
            Err(MappingError::NotFound(_))
        ));
    }

    #[test]
    fn test_event_ceilings() {
        let config = UnpackerConfig {
            channel_max: 100,
            ..Default::default()
        };
        let unpacker = EventUnpacker::new(config, readout(&[])).unwrap();
        assert_eq!(
            unpacker.unpack_event(&event()),
            Err(UnpackerError::CapacityExceeded {
                what: "channel",
                count: (6 + 12 + 6) * 37,
                max: 100
            })
        );
        assert!(unpacker.unpack_event_parallel(&event(), 2).is_err());

        // One flagged ECON-D per FED stays under a ceiling of 1 per S-Link but not per event
        let config = UnpackerConfig {
            flagged_econd_max: 1,
            ..Default::default()
        };
        let unpacker = EventUnpacker::new(config, readout(&[])).unwrap();
        let flagged = |fed_id: u16| FedBuffer {
            fed_id,
            words: SLinkBuilder::new(5)
                .with_capture_block(
                    CaptureBlockBuilder::new().with_econd_status(0, econd(6, 1), 0b001),
                )
                .build(),
        };
        let single = RawEvent {
            event_id: 5,
            feds: vec![flagged(0)],
        };
        let data = unpacker.unpack_event(&single).unwrap();
        assert_eq!(data.faults[0].reason, FaultReason::EcondStatus);

        let double = RawEvent {
            event_id: 5,
            feds: vec![flagged(0), flagged(7)],
        };
        assert!(matches!(
            unpacker.unpack_event(&double),
            Err(UnpackerError::CapacityExceeded {
                what: "flagged ECON-D",
                count: 2,
                max: 1
            })
        ));
        assert!(unpacker.unpack_event_parallel(&double, 2).is_err());
    }

    #[test]
    fn test_bad_config() {
        let config = UnpackerConfig {
            num_erxs_in_econd: 0,
            ..Default::default()
        };
        assert!(EventUnpacker::new(config, readout(&[])).is_err());
    }

    #[test]
    fn test_faults_are_merged() {
        let unpacker = EventUnpacker::new(UnpackerConfig::default(), readout(&[])).unwrap();
        let mut event = event();
        event.feds[1].fed_id = 9;
        let data = unpacker.unpack_event_parallel(&event, 2).unwrap();
        assert_eq!(data.faults.len(), 1);
        assert_eq!(data.faults[0].reason, FaultReason::UnmappedFed);
        assert_eq!(data.size(), (6 + 12 + 6) * 37);
    }
}
