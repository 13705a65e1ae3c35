use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::error::RawFileError;

// # Raw event dump
// A raw dump is a sequence of events, all little-endian:
//
// u32 event id | u32 number of FED blocks | blocks
//
// and each block is u32 FED id | u32 payload length in bytes | payload.
// Payloads are S-Link buffers; a trailing partial word is zero padded when read.

/// The S-Link buffer of one FED
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FedBuffer {
    pub fed_id: u16,
    pub words: Vec<u32>,
}

/// All FED buffers read out for one event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    pub event_id: u32,
    pub feds: Vec<FedBuffer>,
}

/// Group bytes into little-endian words, zero padding a trailing partial word
pub fn words_from_bytes(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        })
        .collect()
}

#[derive(Debug)]
pub struct RawEventFile {
    file_handle: BufReader<File>,
    file_path: PathBuf,
    size_bytes: u64,
    is_eof: bool,
}

impl RawEventFile {
    /// Open a raw dump in read-only mode
    pub fn new(path: &Path) -> Result<Self, RawFileError> {
        if !path.exists() {
            return Err(RawFileError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let size_bytes = file.metadata()?.len();
        Ok(Self {
            file_handle: BufReader::new(file),
            file_path: path.to_path_buf(),
            size_bytes,
            is_eof: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Bytes consumed so far
    pub fn position(&mut self) -> Result<u64, RawFileError> {
        Ok(self.file_handle.stream_position()?)
    }

    fn remaining_bytes(&mut self) -> Result<u64, RawFileError> {
        Ok(self.size_bytes.saturating_sub(self.position()?))
    }

    /// Read the next event. Returns None at the end of the file. Sizes read from the file are
    /// checked against the bytes left before anything is allocated.
    pub fn next_event(&mut self) -> Result<Option<RawEvent>, RawFileError> {
        if self.is_eof {
            return Ok(None);
        }
        let event_id = match self.file_handle.read_u32::<LittleEndian>() {
            Ok(id) => id,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.is_eof = true;
                return Ok(None);
            }
            Err(e) => return Err(RawFileError::IOError(e)),
        };
        let truncated = |e: std::io::Error| match e.kind() {
            ErrorKind::UnexpectedEof => RawFileError::TruncatedEvent(event_id),
            _ => RawFileError::IOError(e),
        };

        let n_feds = self
            .file_handle
            .read_u32::<LittleEndian>()
            .map_err(truncated)?;
        // Every FED block carries at least its id and length
        if n_feds as u64 * 8 > self.remaining_bytes()? {
            return Err(RawFileError::TruncatedEvent(event_id));
        }
        let mut event = RawEvent {
            event_id,
            feds: vec![],
        };
        for _ in 0..n_feds {
            let fed_id = self
                .file_handle
                .read_u32::<LittleEndian>()
                .map_err(truncated)?;
            let n_bytes = self
                .file_handle
                .read_u32::<LittleEndian>()
                .map_err(truncated)?;
            let fed_id = u16::try_from(fed_id)
                .map_err(|_| RawFileError::BadFedId { event_id, fed_id })?;
            if n_bytes as u64 > self.remaining_bytes()? {
                return Err(RawFileError::TruncatedEvent(event_id));
            }
            let mut bytes = vec![0u8; n_bytes as usize];
            self.file_handle.read_exact(&mut bytes).map_err(truncated)?;
            event.feds.push(FedBuffer {
                fed_id,
                words: words_from_bytes(&bytes),
            });
        }
        Ok(Some(event))
    }
}

/// Serialize one event in the raw dump layout
pub fn write_raw_event<W: Write>(writer: &mut W, event: &RawEvent) -> Result<(), RawFileError> {
    writer.write_u32::<LittleEndian>(event.event_id)?;
    writer.write_u32::<LittleEndian>(event.feds.len() as u32)?;
    for fed in &event.feds {
        writer.write_u32::<LittleEndian>(fed.fed_id as u32)?;
        writer.write_u32::<LittleEndian>((fed.words.len() * 4) as u32)?;
        for word in &fed.words {
            writer.write_u32::<LittleEndian>(*word)?;
        }
    }
    Ok(())
}

#[derive(Debug)]
pub struct RawEventWriter {
    file_handle: BufWriter<File>,
    n_events: u64,
}

impl RawEventWriter {
    /// Create (or truncate) a raw dump
    pub fn new(path: &Path) -> Result<Self, RawFileError> {
        let file = File::create(path)?;
        Ok(Self {
            file_handle: BufWriter::new(file),
            n_events: 0,
        })
    }

    pub fn write_event(&mut self, event: &RawEvent) -> Result<(), RawFileError> {
        write_raw_event(&mut self.file_handle, event)?;
        self.n_events += 1;
        Ok(())
    }

    pub fn n_events(&self) -> u64 {
        self.n_events
    }

    pub fn close(mut self) -> Result<(), RawFileError> {
        self.file_handle.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("hgcal_raw_{}_{name}", std::process::id()))
    }

    #[test]
    fn test_words_from_bytes() {
        let words = words_from_bytes(&[0x01, 0x02, 0x03, 0x04, 0xaa, 0xbb]);
        assert_eq!(words, vec![0x0403_0201, 0x0000_bbaa]);
        assert!(words_from_bytes(&[]).is_empty());
    }

    #[test]
    fn test_write_then_read() {
        let path = temp_path("events.raw");
        let events = vec![
            RawEvent {
                event_id: 1,
                feds: vec![
                    FedBuffer {
                        fed_id: 0,
                        words: vec![0x5500_0000, 1, 2, 3],
                    },
                    FedBuffer {
                        fed_id: 7,
                        words: vec![],
                    },
                ],
            },
            RawEvent {
                event_id: 2,
                feds: vec![],
            },
        ];
        let mut writer = RawEventWriter::new(&path).unwrap();
        for event in &events {
            writer.write_event(event).unwrap();
        }
        assert_eq!(writer.n_events(), 2);
        writer.close().unwrap();

        let mut file = RawEventFile::new(&path).unwrap();
        assert_eq!(file.size_bytes(), 8 + 8 + 16 + 8 + 8);
        let mut read = vec![];
        while let Some(event) = file.next_event().unwrap() {
            read.push(event);
        }
        assert_eq!(read, events);
        assert!(file.next_event().unwrap().is_none());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_truncated_event() {
        let path = temp_path("truncated.raw");
        let mut bytes = vec![];
        bytes.write_u32::<LittleEndian>(9).unwrap();
        bytes.write_u32::<LittleEndian>(1).unwrap();
        bytes.write_u32::<LittleEndian>(3).unwrap();
        bytes.write_u32::<LittleEndian>(16).unwrap();
        bytes.extend([0u8; 6]);
        std::fs::write(&path, &bytes).unwrap();

        let mut file = RawEventFile::new(&path).unwrap();
        assert!(matches!(
            file.next_event(),
            Err(RawFileError::TruncatedEvent(9))
        ));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_oversized_header() {
        let path = temp_path("oversized.raw");
        let mut bytes = vec![];
        bytes.write_u32::<LittleEndian>(1).unwrap();
        bytes.write_u32::<LittleEndian>(u32::MAX).unwrap();
        std::fs::write(&path, &bytes).unwrap();
        let mut file = RawEventFile::new(&path).unwrap();
        assert!(matches!(
            file.next_event(),
            Err(RawFileError::TruncatedEvent(1))
        ));

        bytes.clear();
        bytes.write_u32::<LittleEndian>(2).unwrap();
        bytes.write_u32::<LittleEndian>(1).unwrap();
        bytes.write_u32::<LittleEndian>(0).unwrap();
        bytes.write_u32::<LittleEndian>(u32::MAX).unwrap();
        std::fs::write(&path, &bytes).unwrap();
        let mut file = RawEventFile::new(&path).unwrap();
        assert!(matches!(
            file.next_event(),
            Err(RawFileError::TruncatedEvent(2))
        ));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_wide_fed_id() {
        let path = temp_path("wide_fed.raw");
        let mut bytes = vec![];
        bytes.write_u32::<LittleEndian>(4).unwrap();
        bytes.write_u32::<LittleEndian>(1).unwrap();
        bytes.write_u32::<LittleEndian>(0x1_0003).unwrap();
        bytes.write_u32::<LittleEndian>(0).unwrap();
        std::fs::write(&path, &bytes).unwrap();
        let mut file = RawEventFile::new(&path).unwrap();
        assert!(matches!(
            file.next_event(),
            Err(RawFileError::BadFedId {
                event_id: 4,
                fed_id: 0x1_0003
            })
        ));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            RawEventFile::new(Path::new("/no/such/run.raw")),
            Err(RawFileError::BadFilePath(_))
        ));
    }
}
