//! # hgcal_unpacker
//!
//! hgcal_unpacker decodes raw data of the CMS HGCAL front-end electronics, written in Rust.
//! It walks the S-Link buffers read out for each event (S-Link, capture block, ECON-D,
//! e-Rx, channel), validates every framing level, and produces per-channel records, per
//! e-Rx common-mode values and one fault record per malformed ECON-D. The decoded pedestal
//! runs are accumulated per channel and exported as a level-0 calibration table.
//!
//! Underneath the unpacker is the electronics indexing: a bit-packed electronics id for a
//! hardware address, a dense flat index for array storage, and translation between the
//! electronics and the detector geometry (silicon and scintillator cell ids) through the
//! module locator and cell template tables.
//!
//! ## Installation
//!
//! The only method of install is from source. If you have not used Rust before, you will
//! need to install the Rust tool chain, see the
//! [Rust docs](https://www.rust-lang.org/tools/install).
//!
//! To build and install the CLI use `cargo install --path ./hgcal_unpacker_cli` from the
//! top level repository. The binary is installed to your cargo install location (typically
//! `~/.cargo/bin/`).
//!
//! ## Configuration
//!
//! A job is configured through a YAML file. A template can be made with
//! `hgcal_unpacker_cli new -p config.yaml`; the format is as follows:
//!
//! ```yml
//! raw_paths:
//! - /data/run_0001.raw
//! module_locator_path: /data/modulelocator.txt
//! cell_map_paths:
//! - /data/WaferCellMapTraces.txt
//! calibration_in_path: null
//! calibration_out_path: /data/level0_calib.txt
//! roc_gains_out_path: /data/roc_gains.txt
//! fed_ids: []
//! unpacker:
//!   slink_boe: 85
//!   slink_eoe: 170
//!   cb_header_marker: 95
//!   econd_header_marker: 340
//!   payload_length_max: 469
//!   num_erxs_in_econd: 12
//!   slink_capture_block_max: 10
//!   capture_block_econd_max: 12
//!   apply_fw_workaround: false
//!   check_crc: true
//!   fix_calib_channel: true
//!   char_mode_override: null
//!   flagged_econd_max: 200
//!   channel_max: 7000000
//!   common_mode_max: 4000000
//! dense_index: null
//! module_configs:
//! - fed_id: 0
//!   capture_block_idx: 0
//!   econd_idx: 0
//!   char_mode: false
//!   gains: [1, 1, 2, 2, 1, 1]
//! gain_override: null
//! emulator:
//!   n_events: 1000
//!   pedestal: 100.0
//!   noise: 2.0
//!   common_mode: 50.0
//!   common_mode_noise: 1.0
//! n_threads: 1
//! ```
//!
//! - `raw_paths`: raw event dump files. They are divided amongst `n_threads` workers; only
//! the workers that get a file are created.
//! - `fed_ids`: FEDs to unpack. An empty list unpacks every FED of each event.
//! - `calibration_in_path`: optional level-0 table to start from. Channels seen in the run
//! are overwritten, the others are exported unchanged.
//! - `dense_index`: explicit capacities of the dense index. When `null` the capacities are
//! the ones observed in the module table.
//! - `module_configs`: characterization mode and per ROC half gains of each ECON-D,
//! addressed by FED, capture block and ECON-D index.
//! - `gain_override`: replaces every ROC gain when set.
//! - `roc_gains_out_path`: optional table of the gain of every mapped ROC half.
//!
//! ### Module Locator Format
//!
//! Whitespace separated, with a header line:
//!
//! ```text
//! plane u v typecode econdidx captureblock captureblockidx slinkidx fedid zside
//! ```
//!
//! ### Cell Template Format
//!
//! Whitespace separated, with a header line. Silicon rows are
//! `typecode chip half seq rocpin cellidx triglink trigcell iu iv trace t` and SiPM rows are
//! `typecode chip half cellidx seq iring iphi trigcell triglink t`.
//!
//! ### Raw Event Format
//!
//! Little-endian 32-bit words, repeated until the end of the file:
//!
//! ```text
//! event id | number of FED blocks | (fed id | payload bytes | payload)...
//! ```
//!
//! ## Output
//!
//! hgcal_unpacker outputs the level-0 calibration table and a log file. The table holds one
//! line per channel, `0x%08x pedestal noise CM_slope CM_offset BXm1_slope BXm1_offset`, in
//! ascending electronics id order. When `roc_gains_out_path` is set, the ROC gains are written
//! as `0x%08x gain` lines, one per ROC half. The log file (`hgcal_unpacker.log`) records every fault
//! and skipped event and should be checked when the terminal reports a problem.
pub mod calibration;
pub mod cell_map;
pub mod cell_statistics;
pub mod channel_data;
pub mod config;
pub mod constants;
pub mod dense_index;
pub mod detector_id;
pub mod digi;
pub mod electronics_id;
pub mod emulator;
pub mod error;
pub mod event_unpacker;
pub mod frame_parser;
pub mod mapping;
pub mod module_map;
pub mod module_type;
pub mod process;
pub mod raw_file;
pub mod worker_status;
