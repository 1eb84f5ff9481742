//! Framed record log backing the engine's `MANIFEST` file.
//!
//! The engine appends version edits as length- and checksum-framed records;
//! this layer only needs to scan them for the file-number watermark when
//! deciding where an epoch cut-over lands. Frame layout:
//! `[length: u32][crc64: u64][payload]`, all integers big-endian.

use std::io::{Cursor, Read};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
};

use crate::error::{Error, Result};

const NEXT_FILE_NUMBER: u8 = 0x01;
const ADD_FILE: u8 = 0x02;
const DELETE_FILE: u8 = 0x03;

const FRAME_HEADER_SIZE: usize = 12;

/// A single entry in the engine's manifest log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestRecord {
    /// Watermark: every file number below this value has been handed out.
    NextFileNumber(u64),
    /// A table file entered the live set.
    AddFile {
        /// Engine-assigned file number.
        number: u64,
        /// Level the file lives on.
        level: u32,
        /// Size of the file in bytes.
        size: u64,
    },
    /// A table file left the live set.
    DeleteFile {
        /// Engine-assigned file number.
        number: u64,
        /// Level the file lived on.
        level: u32,
    },
}

impl ManifestRecord {
    /// Encode the record payload, excluding framing.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            ManifestRecord::NextFileNumber(next) => {
                WriteBytesExt::write_u8(&mut buf, NEXT_FILE_NUMBER).expect("vec write");
                WriteBytesExt::write_u64::<BigEndian>(&mut buf, *next).expect("vec write");
            }
            ManifestRecord::AddFile {
                number,
                level,
                size,
            } => {
                WriteBytesExt::write_u8(&mut buf, ADD_FILE).expect("vec write");
                WriteBytesExt::write_u64::<BigEndian>(&mut buf, *number).expect("vec write");
                WriteBytesExt::write_u32::<BigEndian>(&mut buf, *level).expect("vec write");
                WriteBytesExt::write_u64::<BigEndian>(&mut buf, *size).expect("vec write");
            }
            ManifestRecord::DeleteFile { number, level } => {
                WriteBytesExt::write_u8(&mut buf, DELETE_FILE).expect("vec write");
                WriteBytesExt::write_u64::<BigEndian>(&mut buf, *number).expect("vec write");
                WriteBytesExt::write_u32::<BigEndian>(&mut buf, *level).expect("vec write");
            }
        }
        buf
    }

    /// Decode a record payload produced by [`ManifestRecord::encode`].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(buf);
        let record = match reader.read_u8()? {
            NEXT_FILE_NUMBER => ManifestRecord::NextFileNumber(reader.read_u64::<BigEndian>()?),
            ADD_FILE => ManifestRecord::AddFile {
                number: reader.read_u64::<BigEndian>()?,
                level: reader.read_u32::<BigEndian>()?,
                size: reader.read_u64::<BigEndian>()?,
            },
            DELETE_FILE => ManifestRecord::DeleteFile {
                number: reader.read_u64::<BigEndian>()?,
                level: reader.read_u32::<BigEndian>()?,
            },
            tag => {
                return Err(Error::Corruption(format!(
                    "unknown manifest record tag {tag:#04x}"
                )))
            }
        };
        Ok(record)
    }
}

/// Appender for manifest record logs.
pub struct ManifestLogWriter {
    file: File,
}

impl ManifestLogWriter {
    /// Open `path` for appending, creating it when absent.
    pub async fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self { file })
    }

    /// Append one framed record.
    pub async fn append(&mut self, record: &ManifestRecord) -> Result<()> {
        let payload = record.encode();
        let mut digest = crc64fast::Digest::new();
        digest.write(&payload);

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        WriteBytesExt::write_u32::<BigEndian>(&mut frame, payload.len() as u32)
            .expect("vec write");
        WriteBytesExt::write_u64::<BigEndian>(&mut frame, digest.sum64()).expect("vec write");
        frame.extend_from_slice(&payload);
        self.file.write_all(&frame).await?;
        Ok(())
    }

    /// Flush appended records to durable storage.
    pub async fn sync(&mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }
}

/// Scan the manifest log at `path` for the first file number not yet handed
/// out by the engine.
///
/// A torn final frame is treated as the end of the log; a checksum mismatch
/// on a complete frame is corruption.
pub async fn max_file_number(path: &Path) -> Result<u64> {
    let data = tokio::fs::read(path).await?;
    let mut cursor = Cursor::new(data.as_slice());
    let mut max = 0u64;
    loop {
        let remaining = data.len() as u64 - cursor.position();
        if remaining < FRAME_HEADER_SIZE as u64 {
            break;
        }
        let len = cursor.read_u32::<BigEndian>()? as u64;
        let checksum = cursor.read_u64::<BigEndian>()?;
        if data.len() as u64 - cursor.position() < len {
            break;
        }
        let mut payload = vec![0u8; len as usize];
        cursor.read_exact(&mut payload)?;
        let mut digest = crc64fast::Digest::new();
        digest.write(&payload);
        if digest.sum64() != checksum {
            return Err(Error::Corruption(format!(
                "manifest record checksum mismatch in {}",
                path.display()
            )));
        }
        match ManifestRecord::decode(&payload)? {
            ManifestRecord::NextFileNumber(next) => max = max.max(next),
            ManifestRecord::AddFile { number, .. } => max = max.max(number + 1),
            ManifestRecord::DeleteFile { .. } => {}
        }
    }
    Ok(max)
}
