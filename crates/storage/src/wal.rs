//! Write-ahead log.
//!
//! Format: each entry is `[4-byte CRC32][4-byte length][JSON payload]\n`.
//! Replay stops at the first torn or corrupt entry; everything before it is
//! recovered.

use crate::record::WalRecord;
use crc32fast::Hasher;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error("WAL I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("WAL serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Fsync policy for the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// Fsync after every write.
    Always,
    /// Fsync periodically (caller controls).
    Batch,
    /// Never explicitly fsync (OS decides).
    None,
}

impl FsyncPolicy {
    /// Parse the `storage.fsync` config value; unknown values mean `Batch`.
    pub fn from_str_config(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "always" => Self::Always,
            "none" => Self::None,
            _ => Self::Batch,
        }
    }
}

/// An append-only write-ahead log.
#[derive(Debug)]
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    fsync: FsyncPolicy,
    entries_written: u64,
    unsynced: u64,
}

impl Wal {
    /// Open or create a WAL file at the given path.
    pub fn open(path: &Path, fsync: FsyncPolicy) -> Result<Self, WalError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            fsync,
            entries_written: 0,
            unsynced: 0,
        })
    }

    /// Append a record to the WAL.
    pub fn append(&mut self, record: &WalRecord) -> Result<(), WalError> {
        let payload = serde_json::to_vec(record)?;

        let mut hasher = Hasher::new();
        hasher.update(&payload);
        let crc = hasher.finalize();

        let len = payload.len() as u32;

        // Write: CRC(4) + LEN(4) + PAYLOAD + \n
        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;

        if self.fsync == FsyncPolicy::Always {
            self.writer.get_ref().sync_all()?;
        } else {
            self.unsynced += 1;
        }

        self.entries_written += 1;
        Ok(())
    }

    /// Explicitly fsync the WAL (for batch mode).
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Number of entries written since open.
    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }

    /// Entries appended since the last fsync.
    pub fn unsynced(&self) -> u64 {
        self.unsynced
    }

    pub fn fsync_policy(&self) -> FsyncPolicy {
        self.fsync
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replay all valid entries from a WAL file, in write order.
    pub fn replay(path: &Path) -> Result<Vec<WalRecord>, WalError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(WalError::Io(e)),
        };

        let mut reader = BufReader::new(file);
        let mut records = Vec::new();

        loop {
            let payload = match read_frame(&mut reader)? {
                Frame::Entry(payload) => payload,
                Frame::Eof => break,
                Frame::Torn => {
                    tracing::warn!(entry = records.len(), "WAL truncated mid-entry; stopping replay");
                    break;
                }
                Frame::BadCrc { expected, actual } => {
                    tracing::warn!(
                        entry = records.len(),
                        "WAL CRC mismatch: expected {:#010x}, got {:#010x}; stopping replay",
                        expected,
                        actual
                    );
                    break;
                }
            };
            records.push(serde_json::from_slice(&payload)?);
        }

        Ok(records)
    }
}

enum Frame {
    Entry(Vec<u8>),
    Eof,
    Torn,
    BadCrc { expected: u32, actual: u32 },
}

/// Read one `CRC | LEN | PAYLOAD | \n` frame.
fn read_frame(reader: &mut impl Read) -> Result<Frame, WalError> {
    let mut crc_buf = [0u8; 4];
    match reader.read_exact(&mut crc_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(Frame::Eof),
        Err(e) => return Err(WalError::Io(e)),
    }
    let expected = u32::from_le_bytes(crc_buf);

    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(Frame::Torn);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
    if !read_full(reader, &mut payload)? {
        return Ok(Frame::Torn);
    }
    let mut nl = [0u8; 1];
    if !read_full(reader, &mut nl)? {
        return Ok(Frame::Torn);
    }

    let mut hasher = Hasher::new();
    hasher.update(&payload);
    let actual = hasher.finalize();
    if actual != expected {
        return Ok(Frame::BadCrc { expected, actual });
    }
    Ok(Frame::Entry(payload))
}

/// `read_exact` that reports a short read as `false` instead of an error.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool, WalError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(WalError::Io(e)),
    }
}
