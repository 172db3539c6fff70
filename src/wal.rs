// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{commit::LogPosition, Batch};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{
    fs::{File, OpenOptions},
    io::{BufReader, Read, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{
            AtomicBool, AtomicU64,
            Ordering::{Acquire, Release},
        },
        Mutex,
    },
};
use xxhash_rust::xxh3::xxh3_64;

/// File name of the write-ahead log inside the engine folder
pub const WAL_FILE: &str = "wal.log";

/// Magic bytes at the start of every record
pub const RECORD_HEADER_MAGIC: &[u8] = b"WAL1";

/// Size of a record header: magic, checksum (u64), payload length (u32)
pub const RECORD_HEADER_LEN: usize =
    RECORD_HEADER_MAGIC.len() + std::mem::size_of::<u64>() + std::mem::size_of::<u32>();

/// Append-only write-ahead log
///
/// Every record is one encoded [`Batch`]. Appends go straight to the OS,
/// [`Wal::sync_up_to`] makes them durable. Concurrent syncs are grouped:
/// one `fsync` covers every record that was appended before it started.
///
/// After a failed append or sync, the log is poisoned and rejects
/// all further operations, because it is unknown what made it to disk.
pub struct Wal {
    path: PathBuf,

    writer: Mutex<File>,

    /// Handle used for syncing, so syncs do not block appends
    sync_file: File,

    /// End of the last appended record
    written: AtomicU64,

    /// Position up to which the log is known to be durable
    synced: Mutex<LogPosition>,

    poisoned: AtomicBool,
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Wal({:?}, written={})", self.path, self.written())
    }
}

impl Wal {
    /// Opens the log for appending, creating it if it does not exist.
    ///
    /// Existing records are kept, new records are appended after them.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        let sync_file = file.try_clone()?;

        log::debug!("Opened write-ahead log at {path:?} ({len} bytes)");

        Ok(Self {
            path: path.into(),
            writer: Mutex::new(file),
            sync_file,
            written: AtomicU64::new(len),
            synced: Mutex::new(len),
            poisoned: AtomicBool::new(false),
        })
    }

    /// Returns the log's path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the end position of the last appended record.
    #[must_use]
    pub fn written(&self) -> LogPosition {
        self.written.load(Acquire)
    }

    /// Returns the position up to which the log is durable.
    #[must_use]
    pub fn synced(&self) -> LogPosition {
        *self.synced.lock().expect("lock is poisoned")
    }

    /// Returns `true` if an earlier failure made the log unusable.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Acquire)
    }

    fn check_poisoned(&self) -> crate::Result<()> {
        if self.is_poisoned() {
            Err(crate::Error::Poisoned)
        } else {
            Ok(())
        }
    }

    fn poison(&self, e: std::io::Error) -> crate::Error {
        log::error!("Write-ahead log {:?} failed and is now poisoned: {e:?}", self.path);
        self.poisoned.store(true, Release);
        crate::Error::Io(e)
    }

    /// Appends a record, returning the log position after it.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or the log is poisoned.
    ///
    /// # Panics
    ///
    /// Panics if the payload is 4 GiB or larger.
    pub fn append(&self, payload: &[u8]) -> crate::Result<LogPosition> {
        assert!(
            u32::try_from(payload.len()).is_ok(),
            "write-ahead log record is too large"
        );

        // NOTE:
        // RECORD LAYOUT
        //
        // [MAGIC_BYTES; 4B]
        // [Checksum; 8B]
        // [payload len; 4B]
        // [...payload; ?]
        let mut record = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
        record.extend_from_slice(RECORD_HEADER_MAGIC);
        record.write_u64::<LittleEndian>(xxh3_64(payload))?;

        // NOTE: Truncation is okay, checked above
        #[allow(clippy::cast_possible_truncation)]
        record.write_u32::<LittleEndian>(payload.len() as u32)?;

        record.extend_from_slice(payload);

        let mut writer = self.writer.lock().expect("lock is poisoned");
        self.check_poisoned()?;

        writer.write_all(&record).map_err(|e| self.poison(e))?;

        let position = self.written.load(Acquire) + record.len() as u64;
        self.written.store(position, Release);

        Ok(position)
    }

    /// Makes the log durable at least up to `position`.
    ///
    /// Returns immediately if a concurrent sync already covered it.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or the log is poisoned.
    pub fn sync_up_to(&self, position: LogPosition) -> crate::Result<()> {
        let mut synced = self.synced.lock().expect("lock is poisoned");
        self.check_poisoned()?;

        if *synced >= position {
            return Ok(());
        }

        // Everything appended until now is covered by this sync
        let target = self.written();

        self.sync_file.sync_data().map_err(|e| self.poison(e))?;

        log::debug!(
            "Synced write-ahead log {:?} up to {target} (requested {position})",
            self.path,
        );

        *synced = target;

        Ok(())
    }

    /// Syncs everything that was appended so far.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or the log is poisoned.
    pub fn sync(&self) -> crate::Result<()> {
        self.sync_up_to(self.written())
    }
}

/// Reads back the batches of a write-ahead log
///
/// A record that was cut off by a crash ends the iteration silently.
/// A checksum mismatch yields an error, after which the reader is exhausted.
pub struct WalReader {
    reader: BufReader<File>,
    offset: u64,
    len: u64,
    failed: bool,
}

impl WalReader {
    /// Opens a write-ahead log for reading.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            reader: BufReader::new(file),
            offset: 0,
            len,
            failed: false,
        })
    }

    /// Returns the position of the next record.
    #[must_use]
    pub fn offset(&self) -> LogPosition {
        self.offset
    }

    fn read_record(&mut self) -> crate::Result<Option<Batch>> {
        let remaining = self.len - self.offset;

        if remaining == 0 {
            return Ok(None);
        }

        if remaining < RECORD_HEADER_LEN as u64 {
            log::warn!("Write-ahead log ends in a torn record header at {}", self.offset);
            return Ok(None);
        }

        let mut magic = [0u8; RECORD_HEADER_MAGIC.len()];
        self.reader.read_exact(&mut magic)?;

        if magic != RECORD_HEADER_MAGIC {
            return Err(crate::Error::Decode(
                crate::coding::DecodeError::InvalidHeader("WalRecord"),
            ));
        }

        let expected_checksum = self.reader.read_u64::<LittleEndian>()?;
        let payload_len = self.reader.read_u32::<LittleEndian>()?;

        if remaining < RECORD_HEADER_LEN as u64 + u64::from(payload_len) {
            log::warn!("Write-ahead log ends in a torn record at {}", self.offset);
            return Ok(None);
        }

        let mut payload = vec![0; payload_len as usize];
        self.reader.read_exact(&mut payload)?;

        let checksum = xxh3_64(&payload);

        if checksum != expected_checksum {
            log::error!(
                "Checksum mismatch for write-ahead log record at {}, got={checksum}, expected={expected_checksum}",
                self.offset,
            );

            return Err(crate::Error::InvalidChecksum((checksum, expected_checksum)));
        }

        self.offset += RECORD_HEADER_LEN as u64 + u64::from(payload_len);

        Ok(Some(Batch::from_data(payload)?))
    }
}

impl Iterator for WalReader {
    type Item = crate::Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        match self.read_record() {
            Ok(batch) => batch.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
