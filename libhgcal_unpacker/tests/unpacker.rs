use libhgcal_unpacker::digi::{FaultCategory, FaultReason};
use libhgcal_unpacker::electronics_id::ElectronicsId;
use libhgcal_unpacker::emulator::{CaptureBlockBuilder, EcondBuilder, ErxBlock, SLinkBuilder};
use libhgcal_unpacker::error::UnpackerError;
use libhgcal_unpacker::event_unpacker::EventUnpacker;
use libhgcal_unpacker::frame_parser::{EcondReadout, FrameParser, ReadoutLookup, UnpackerConfig};
use libhgcal_unpacker::raw_file::{FedBuffer, RawEvent};

/// FEDs 0 to 3 are mapped one to one onto S-Links, and every ECON-D reads out only e-Rx 0
struct SingleErxReadout;

impl ReadoutLookup for SingleErxReadout {
    fn slink_for_fed(&self, fed_id: u16) -> Option<u32> {
        (fed_id < 4).then_some(fed_id as u32)
    }

    fn econd_readout(&self, slink: u32, capture_block_idx: u32, econd_idx: u32) -> Option<EcondReadout> {
        Some(EcondReadout {
            eleid: ElectronicsId::new(
                false,
                slink as u16,
                capture_block_idx as u8,
                econd_idx as u8,
                0,
                0,
            ),
            erx_enable_bits: 0b1,
            char_mode: false,
        })
    }
}

fn single_erx_econd(adc: u16) -> EcondBuilder {
    EcondBuilder::new().with_erx(ErxBlock::full(0, adc, 10, 12))
}

fn fed_buffer(event_id: u32, econds: &[EcondBuilder]) -> Vec<u32> {
    let mut capture_block = CaptureBlockBuilder::new();
    for (idx, econd) in econds.iter().enumerate() {
        capture_block = capture_block.with_econd(idx as u8, econd.clone());
    }
    SLinkBuilder::new(event_id)
        .with_capture_block(capture_block)
        .build()
}

#[test]
fn test_minimal_buffer() {
    let config = UnpackerConfig::default();
    let parser = FrameParser::new(&config, &SingleErxReadout);
    let data = parser
        .parse(1, &fed_buffer(5, &[single_erx_econd(77)]))
        .unwrap();
    assert_eq!(data.event_id, 5);
    assert_eq!(data.channels.len(), 37);
    assert!(data.faults.is_empty());
    assert_eq!(data.common_modes.len(), 1);
    assert_eq!(data.common_modes[0].cm0, 10);
    assert_eq!(data.common_modes[0].cm1, 12);
    for (channel, decoded) in data.channels.iter().enumerate() {
        assert_eq!(decoded.id.half_roc_channel() as usize, channel);
        assert_eq!(decoded.id.fed_id(), 1);
        assert_eq!(decoded.cm, 22);
        if channel != 18 {
            assert_eq!(decoded.adc, 77);
        }
    }
}

#[test]
fn test_corrupted_econd_marker() {
    let config = UnpackerConfig::default();
    let parser = FrameParser::new(&config, &SingleErxReadout);

    let data = parser
        .parse(0, &fed_buffer(1, &[single_erx_econd(40).with_marker(0x0ab)]))
        .unwrap();
    assert!(data.channels.is_empty());
    assert_eq!(data.faults.len(), 1);
    assert_eq!(data.faults[0].reason, FaultReason::BadEcondHeader);
    assert_eq!(data.faults[0].reason.category(), FaultCategory::Structural);

    // The frame length is still intact, so the following ECON-D is read normally
    let buffer = fed_buffer(
        1,
        &[single_erx_econd(40).with_marker(0x0ab), single_erx_econd(41)],
    );
    let data = parser.parse(0, &buffer).unwrap();
    assert_eq!(data.faults.len(), 1);
    assert_eq!(data.faults[0].econd_idx, 0);
    assert_eq!(data.channels.len(), 37);
    assert!(data.channels.iter().all(|c| c.id.econd_idx() == 1));
    assert_eq!(data.channels[0].adc, 41);
}

#[test]
fn test_flagged_ceiling() {
    let config = UnpackerConfig {
        flagged_econd_max: 2,
        ..Default::default()
    };
    let mut capture_block = CaptureBlockBuilder::new();
    for idx in 0..3 {
        capture_block = capture_block.with_econd_status(idx, single_erx_econd(1), 0b010);
    }
    let buffer = SLinkBuilder::new(3)
        .with_capture_block(capture_block)
        .build();
    let event = RawEvent {
        event_id: 3,
        feds: vec![FedBuffer {
            fed_id: 0,
            words: buffer,
        }],
    };
    let unpacker = EventUnpacker::new(config, SingleErxReadout).unwrap();
    assert!(matches!(
        unpacker.unpack_event(&event),
        Err(UnpackerError::CapacityExceeded {
            what: "flagged ECON-D",
            count: 3,
            max: 2
        })
    ));
}

#[test]
fn test_parallel_matches_sequential() {
    let feds = (0..6u16)
        .map(|fed_id| FedBuffer {
            fed_id,
            words: fed_buffer(
                9,
                &[
                    single_erx_econd(fed_id * 10),
                    single_erx_econd(fed_id * 10 + 1).with_marker(if fed_id == 2 { 0 } else { 0x154 }),
                ],
            ),
        })
        .collect();
    let event = RawEvent { event_id: 9, feds };
    let unpacker = EventUnpacker::new(UnpackerConfig::default(), SingleErxReadout).unwrap();

    let sequential = unpacker.unpack_event(&event).unwrap();
    // FEDs 4 and 5 are not mapped, FED 2 has one bad ECON-D
    assert_eq!(sequential.channels.len(), 7 * 37);
    assert_eq!(sequential.faults.len(), 3);
    assert_eq!(sequential.n_structural_faults(), 1);
    for n_workers in [2, 3, 8] {
        let parallel = unpacker.unpack_event_parallel(&event, n_workers).unwrap();
        assert_eq!(parallel, sequential);
    }
}
