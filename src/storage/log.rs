//! Append-only record log
//!
//! ```text
//! +--------------------+
//! | Frame Length       | (u32 LE, whole frame)
//! +--------------------+
//! | Kind               | (u8: 1 = put, 2 = tombstone)
//! +--------------------+
//! | Body               | (fixed-width record, or local id u32 LE)
//! +--------------------+
//! | Checksum           | (u32 LE, CRC32 of everything before it)
//! +--------------------+
//! ```
//!
//! Every append is synced before it is acknowledged. The offset map is
//! rebuilt by scanning on open; the latest frame for an id wins. Any
//! checksum or framing failure, on open or on read, is fatal.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::errors::{StorageError, StorageResult};
use super::{RecordStore, WalOffset};
use crate::observability::{log_event, Event};
use crate::partition::{compute_checksum, LocalId, Record, RecordRef, RecordSchema};

/// File name inside the data directory
pub const LOG_FILE_NAME: &str = "records.log";

const KIND_PUT: u8 = 1;
const KIND_TOMBSTONE: u8 = 2;
const FRAME_OVERHEAD: usize = 4 + 1 + 4;

#[derive(Debug)]
pub struct RecordLog {
    path: PathBuf,
    file: File,
    schema: RecordSchema,
    end: u64,
    offsets: HashMap<LocalId, u64>,
}

impl RecordLog {
    /// Opens or creates `<data_dir>/records.log`.
    pub fn open(data_dir: &Path, schema: RecordSchema) -> StorageResult<Self> {
        fs::create_dir_all(data_dir).map_err(|e| {
            StorageError::write_failed(
                format!("Failed to create data directory: {}", data_dir.display()),
                e,
            )
        })?;
        let path = data_dir.join(LOG_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                StorageError::write_failed(format!("Failed to open record log: {}", path.display()), e)
            })?;

        let contents = fs::read(&path)
            .map_err(|e| StorageError::read_failed(format!("Failed to scan {}", path.display()), e))?;
        let offsets = match scan(&contents, &schema) {
            Ok(offsets) => offsets,
            Err(err) => {
                log_event(Event::RecordLogCorruption, &[("reason", err.message())]);
                return Err(err);
            }
        };
        let end = contents.len() as u64;
        let live = offsets.len().to_string();
        log_event(
            Event::RecordLogOpened,
            &[("path", &path.display().to_string()), ("live_records", &live)],
        );
        Ok(Self {
            path,
            file,
            schema,
            end,
            offsets,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    fn append(&mut self, kind: u8, body: &[u8]) -> StorageResult<WalOffset> {
        let frame = encode_frame(kind, body);
        let offset = self.end;
        self.file
            .write_all(&frame)
            .map_err(|e| StorageError::write_failed("Failed to append frame", e))?;
        self.file
            .sync_all()
            .map_err(|e| StorageError::write_failed("Failed to sync record log", e))?;
        self.end += frame.len() as u64;
        Ok(offset)
    }

    fn read_at(&self, reader: &mut File, offset: u64) -> StorageResult<Record> {
        reader
            .seek(SeekFrom::Start(offset))
            .map_err(|e| StorageError::read_failed("Failed to seek record log", e))?;
        let mut len_buf = [0u8; 4];
        reader
            .read_exact(&mut len_buf)
            .map_err(|e| StorageError::corruption_at_offset(offset, format!("Unreadable frame: {}", e)))?;
        let len = u32::from_le_bytes(len_buf) as usize;
        if len < FRAME_OVERHEAD {
            return Err(StorageError::corruption_at_offset(offset, format!("Invalid frame length: {}", len)));
        }
        let mut frame = vec![0u8; len];
        frame[..4].copy_from_slice(&len_buf);
        reader
            .read_exact(&mut frame[4..])
            .map_err(|e| StorageError::corruption_at_offset(offset, format!("Truncated frame: {}", e)))?;
        match decode_frame(&frame, offset, &self.schema)? {
            Frame::Put(record) => Ok(record),
            Frame::Tombstone(id) => Err(StorageError::corruption_at_offset(
                offset,
                format!("Offset map points at tombstone for {}", id),
            )),
        }
    }
}

impl RecordStore for RecordLog {
    fn durable_insert(&mut self, record: &Record) -> StorageResult<WalOffset> {
        let body = record.encode(&self.schema);
        let offset = self.append(KIND_PUT, &body)?;
        self.offsets.insert(record.id, offset);
        Ok(offset)
    }

    fn durable_delete(&mut self, id: RecordRef) -> StorageResult<WalOffset> {
        let offset = self.append(KIND_TOMBSTONE, &id.local_id.to_le_bytes())?;
        self.offsets.remove(&id.local_id);
        Ok(offset)
    }

    fn hydrate(&self, ids: &[RecordRef]) -> StorageResult<Vec<Record>> {
        let mut reader = File::open(&self.path)
            .map_err(|e| StorageError::read_failed(format!("Failed to open {}", self.path.display()), e))?;
        ids.iter()
            .map(|id| {
                let offset = self
                    .offsets
                    .get(&id.local_id)
                    .copied()
                    .ok_or_else(|| StorageError::record_unknown(id.local_id))?;
                self.read_at(&mut reader, offset)
            })
            .collect()
    }

    fn live_records(&self) -> StorageResult<Vec<Record>> {
        let mut ids: Vec<LocalId> = self.offsets.keys().copied().collect();
        ids.sort_unstable();
        let refs: Vec<RecordRef> = ids.into_iter().map(|id| RecordRef::new(0, id)).collect();
        self.hydrate(&refs)
    }
}

enum Frame {
    Put(Record),
    Tombstone(LocalId),
}

fn encode_frame(kind: u8, body: &[u8]) -> Vec<u8> {
    let len = (FRAME_OVERHEAD + body.len()) as u32;
    let mut frame = Vec::with_capacity(len as usize);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.push(kind);
    frame.extend_from_slice(body);
    let crc = compute_checksum(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

fn decode_frame(frame: &[u8], offset: u64, schema: &RecordSchema) -> StorageResult<Frame> {
    let split = frame.len() - 4;
    let mut stored = [0u8; 4];
    stored.copy_from_slice(&frame[split..]);
    if compute_checksum(&frame[..split]) != u32::from_le_bytes(stored) {
        return Err(StorageError::corruption_at_offset(offset, "Frame checksum mismatch"));
    }
    let body = &frame[5..split];
    match frame[4] {
        KIND_PUT => {
            if body.len() != schema.record_size() {
                return Err(StorageError::corruption_at_offset(
                    offset,
                    format!("Record body is {} bytes, schema expects {}", body.len(), schema.record_size()),
                ));
            }
            Record::decode(body, schema)
                .map(Frame::Put)
                .map_err(|e| StorageError::corruption_at_offset(offset, e.to_string()))
        }
        KIND_TOMBSTONE => {
            let id: [u8; 4] = body
                .try_into()
                .map_err(|_| StorageError::corruption_at_offset(offset, "Tombstone body is not 4 bytes"))?;
            Ok(Frame::Tombstone(LocalId::from_le_bytes(id)))
        }
        other => Err(StorageError::corruption_at_offset(offset, format!("Unknown frame kind {}", other))),
    }
}

fn scan(contents: &[u8], schema: &RecordSchema) -> StorageResult<HashMap<LocalId, u64>> {
    let mut offsets = HashMap::new();
    let mut pos = 0usize;
    while pos < contents.len() {
        let offset = pos as u64;
        let remaining = contents.len() - pos;
        if remaining < FRAME_OVERHEAD {
            return Err(StorageError::corruption_at_offset(
                offset,
                format!("Truncated log: {} trailing bytes", remaining),
            ));
        }
        let mut len_buf = [0u8; 4];
        len_buf.copy_from_slice(&contents[pos..pos + 4]);
        let len = u32::from_le_bytes(len_buf) as usize;
        if len < FRAME_OVERHEAD || len > remaining {
            return Err(StorageError::corruption_at_offset(offset, format!("Invalid frame length: {}", len)));
        }
        match decode_frame(&contents[pos..pos + len], offset, schema)? {
            Frame::Put(record) => {
                offsets.insert(record.id, offset);
            }
            Frame::Tombstone(id) => {
                offsets.remove(&id);
            }
        }
        pos += len;
    }
    Ok(offsets)
}
